//! Convert PDF documents into Word (`.docx`) documents by reflowing each
//! page's text lines and embedded images, top of the page first.
//!
//! ```no_run
//! # async fn run() -> pdf2docx::ConvertResult<()> {
//! let pdf = std::fs::read("report.pdf")?;
//! let converter = pdf2docx::Converter::load(&pdf)?;
//! let docx = converter.convert(&mut |percent: u8| println!("{percent}%")).await?;
//! std::fs::write("report.docx", docx)?;
//! # Ok(())
//! # }
//! ```

// Re-export lopdf so custom resolvers can name its types
pub use lopdf;

mod colors;
pub mod convert;
pub mod docx;
mod encodings;
pub mod error;
pub mod fonts;
pub mod materialize;
pub mod merge;
mod metrics;
mod objects;
pub mod resolver;
pub mod scanner;
pub mod text;

pub use convert::{docx_file_name, page_count, pdf_to_word, CancelHandle, ConvertOptions, Converter, ProgressSink};
pub use docx::{emit_page, scale_to_width, DocxPackage, PageSection, Paragraph, BOLD_THRESHOLD, DEFAULT_MAX_IMAGE_WIDTH};
pub use error::{ConvertError, ConvertResult};
pub use materialize::{materialize, EncodedImage};
pub use merge::{merge_content, ContentItem, ExtractedImage};
pub use resolver::{resolve_with_deadline, ImageResolver, LopdfResolver, RawImage};
pub use scanner::{scan_page_images, ImageRef, ScannedImage};
pub use text::{assemble_lines, extract_text_runs, TextLine, TextRun, LINE_TOLERANCE};
