//! `pdf2docx` CLI - convert a PDF file into a Word document

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use clap::Parser;
use log::{info, LevelFilter};
use simple_logger::SimpleLogger;

use pdf2docx::{docx_file_name, ConvertOptions, Converter};

#[derive(Parser)]
#[command(name = "pdf2docx")]
#[command(about = "Reflow a PDF into an editable Word document")]
#[command(version)]
struct Cli {
    /// PDF file to convert
    input: PathBuf,

    /// Where to write the .docx (default: input with a .docx extension)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Password for encrypted documents
    #[arg(long)]
    password: Option<String>,

    /// Widest image in the output, in pixels
    #[arg(long, default_value_t = pdf2docx::DEFAULT_MAX_IMAGE_WIDTH)]
    max_image_width: u32,

    /// Give up on a single image after this many seconds
    #[arg(long, default_value = "5")]
    image_timeout: f64,

    /// More log output (repeat for trace)
    #[arg(short, long, action = clap::ArgAction::Count, conflicts_with = "quiet")]
    verbose: u8,

    /// Only log errors
    #[arg(short, long)]
    quiet: bool,
}

impl Cli {
    fn level(&self) -> LevelFilter {
        match (self.quiet, self.verbose) {
            (true, _) => LevelFilter::Error,
            (false, 0) => LevelFilter::Info,
            (false, 1) => LevelFilter::Debug,
            (false, _) => LevelFilter::Trace,
        }
    }
}

fn read_pdf(path: &Path) -> Result<Vec<u8>> {
    let is_pdf_name = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("pdf"));
    let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    if !is_pdf_name && !bytes.starts_with(b"%PDF") {
        bail!("{} is not a PDF file", path.display());
    }
    Ok(bytes)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    SimpleLogger::new().with_level(cli.level()).init()?;

    if !cli.image_timeout.is_finite() || cli.image_timeout <= 0.0 {
        bail!("--image-timeout must be a positive number of seconds");
    }

    let bytes = read_pdf(&cli.input)?;
    let converter = match &cli.password {
        Some(password) => Converter::load_encrypted(&bytes, password),
        None => Converter::load(&bytes),
    }
    .with_context(|| format!("opening {}", cli.input.display()))?;

    let options = ConvertOptions::default()
        .with_max_image_width(cli.max_image_width)
        .with_resolve_timeout(Duration::from_secs_f64(cli.image_timeout));
    let converter = converter.with_options(options);
    info!("{}: {} page(s)", cli.input.display(), converter.page_count());

    let start = Instant::now();
    let docx = converter
        .convert(&mut |percent: u8| info!("{}%", percent))
        .await
        .with_context(|| format!("converting {}", cli.input.display()))?;

    let output = cli.output.clone().unwrap_or_else(|| docx_file_name(&cli.input));
    std::fs::write(&output, &docx).with_context(|| format!("writing {}", output.display()))?;
    info!("Wrote {} ({} bytes) in {:.2?}", output.display(), docx.len(), start.elapsed());
    Ok(())
}
