//! Page-at-a-time conversion of a whole document.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use lopdf::content::Content;
use lopdf::encryption::DecryptionError;
use lopdf::{Dictionary, Document, Object, ObjectId};

use crate::docx::{emit_page, DocxPackage, PageSection, DEFAULT_MAX_IMAGE_WIDTH};
use crate::encodings::pdf_to_utf8;
use crate::error::{ConvertError, ConvertResult};
use crate::materialize::{materialize, EncodedImage};
use crate::merge::{merge_content, ExtractedImage};
use crate::objects::{get_inherited, maybe_deref};
use crate::resolver::{resolve_with_deadline, ImageResolver, LopdfResolver, RawImage};
use crate::scanner::scan_page_images;
use crate::text::{assemble_lines, extract_text_runs};

/// Options controlling a conversion.
#[derive(Clone, Debug, PartialEq)]
pub struct ConvertOptions {
    /// Widest image, in pixels, placed in the output (default: 605).
    pub max_image_width: u32,
    /// Images narrower or shorter than this are dropped (default: 20).
    pub min_image_side: u32,
    /// How long a single image lookup may take (default: 5 s).
    pub resolve_timeout: Duration,
    /// Maximum nesting of Form XObjects that is followed (default: 10).
    pub max_form_depth: usize,
}

impl Default for ConvertOptions {
    fn default() -> Self {
        Self {
            max_image_width: DEFAULT_MAX_IMAGE_WIDTH,
            min_image_side: 20,
            resolve_timeout: Duration::from_secs(5),
            max_form_depth: 10,
        }
    }
}

impl ConvertOptions {
    pub fn with_max_image_width(mut self, width: u32) -> Self {
        self.max_image_width = width;
        self
    }

    pub fn with_min_image_side(mut self, side: u32) -> Self {
        self.min_image_side = side;
        self
    }

    pub fn with_resolve_timeout(mut self, timeout: Duration) -> Self {
        self.resolve_timeout = timeout;
        self
    }

    pub fn with_max_form_depth(mut self, depth: usize) -> Self {
        self.max_form_depth = depth;
        self
    }
}

/// Receives conversion progress as a whole percentage.
pub trait ProgressSink {
    fn report(&mut self, percent: u8);
}

impl<F: FnMut(u8)> ProgressSink for F {
    fn report(&mut self, percent: u8) {
        self(percent)
    }
}

impl ProgressSink for () {
    fn report(&mut self, _percent: u8) {}
}

/// Requests that a running conversion stop at the next page or image.
#[derive(Clone, Debug, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn check(&self) -> ConvertResult<()> {
        if self.is_cancelled() {
            Err(ConvertError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// A loaded PDF ready to be converted.
pub struct Converter {
    doc: Arc<Document>,
    options: ConvertOptions,
    cancel: CancelHandle,
}

fn maybe_decrypt(doc: &mut Document) -> ConvertResult<()> {
    if !doc.is_encrypted() {
        return Ok(());
    }

    if let Err(e) = doc.decrypt("") {
        if let lopdf::Error::Decryption(DecryptionError::IncorrectPassword) = e {
            error!("Encrypted documents must be decrypted with a password");
        }
        return Err(ConvertError::Parse(e));
    }

    Ok(())
}

impl Converter {
    /// Parse a PDF, decrypting it with the empty password if needed.
    pub fn load(bytes: &[u8]) -> ConvertResult<Self> {
        let mut doc = Document::load_mem(bytes)?;
        maybe_decrypt(&mut doc)?;
        Ok(Self::from_document(doc))
    }

    pub fn load_encrypted(bytes: &[u8], password: &str) -> ConvertResult<Self> {
        let mut doc = Document::load_mem(bytes)?;
        if doc.is_encrypted() {
            doc.decrypt(password)?;
        }
        Ok(Self::from_document(doc))
    }

    pub fn from_document(doc: Document) -> Self {
        Converter {
            doc: Arc::new(doc),
            options: ConvertOptions::default(),
            cancel: CancelHandle::new(),
        }
    }

    pub fn with_options(mut self, options: ConvertOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> &ConvertOptions {
        &self.options
    }

    /// A handle that can cancel conversions run by this converter.
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    pub fn page_count(&self) -> usize {
        self.doc.get_pages().len()
    }

    /// Convert to `.docx` bytes, decoding images from the document itself.
    pub async fn convert(&self, progress: &mut impl ProgressSink) -> ConvertResult<Vec<u8>> {
        let resolver = LopdfResolver::new(self.doc.clone());
        self.convert_with(&resolver, progress).await
    }

    /// Convert to `.docx` bytes, looking images up through `resolver`.
    pub async fn convert_with<R>(&self, resolver: &R, progress: &mut impl ProgressSink) -> ConvertResult<Vec<u8>>
    where
        R: ImageResolver + ?Sized,
    {
        self.build_package(resolver, progress).await?.to_bytes()
    }

    /// Run the page pipeline and return the unserialised document.
    pub async fn build_package<R>(&self, resolver: &R, progress: &mut impl ProgressSink) -> ConvertResult<DocxPackage>
    where
        R: ImageResolver + ?Sized,
    {
        let pages: Vec<ObjectId> = self.doc.get_pages().into_values().collect();
        if pages.is_empty() {
            return Err(ConvertError::NoPages);
        }
        let total = pages.len();
        info!("Converting {} page(s)", total);

        let mut sections = Vec::with_capacity(total);
        for (i, page_id) in pages.into_iter().enumerate() {
            self.cancel.check()?;
            let is_last = i + 1 == total;
            sections.push(self.convert_page(resolver, page_id, is_last).await?);
            progress.report(percent(i + 1, total));
        }

        let package = DocxPackage::new(sections);
        Ok(match document_title(&self.doc) {
            Some(title) => package.with_title(title),
            None => package,
        })
    }

    async fn convert_page<R>(&self, resolver: &R, page_id: ObjectId, is_last: bool) -> ConvertResult<PageSection>
    where
        R: ImageResolver + ?Sized,
    {
        let doc = self.doc.as_ref();
        let page = doc
            .get_object(page_id)?
            .as_dict()
            .map_err(|_| ConvertError::InvalidStructure("Page object must be dictionary".to_string()))?;
        let empty_resources = Dictionary::new();
        let resources: &Dictionary = get_inherited(doc, page, b"Resources").unwrap_or(&empty_resources);
        let content = Content::decode(&doc.get_page_content(page_id)?)?;

        let scanned = scan_page_images(doc, &content.operations, resources, self.options.max_form_depth);
        let mut images = Vec::new();
        for found in scanned {
            let resolved = resolve_with_deadline(resolver, &found.reference, self.options.resolve_timeout).await;
            self.cancel.check()?;
            // Any failed lookup only costs this image.
            let raw = match resolved {
                Ok(raw) => raw,
                Err(ConvertError::Cancelled) => return Err(ConvertError::Cancelled),
                Err(e) => {
                    warn!("Skipping {}: {}", found.reference, e);
                    continue;
                }
            };
            match self.place_image(raw) {
                Ok(Some(image)) => images.push(ExtractedImage { image, y: found.y }),
                Ok(None) => {}
                Err(e) if e.is_image_local() => warn!("Skipping {}: {}", found.reference, e),
                Err(e) => return Err(e),
            }
        }

        let runs = extract_text_runs(doc, &content.operations, resources, self.options.max_form_depth);
        let lines = assemble_lines(runs);
        debug!("Page {:?}: {} line(s), {} image(s)", page_id, lines.len(), images.len());

        let items = merge_content(lines, images);
        Ok(emit_page(items, is_last, self.options.max_image_width))
    }

    fn place_image(&self, raw: RawImage) -> ConvertResult<Option<EncodedImage>> {
        let (width, height) = raw.dimensions();
        let min = self.options.min_image_side;
        if width < min || height < min {
            debug!("Dropping {}x{} image below {}px", width, height, min);
            return Ok(None);
        }
        materialize(raw).map(Some)
    }
}

fn percent(done: usize, total: usize) -> u8 {
    (done as f64 / total as f64 * 100.0).round() as u8
}

fn document_title(doc: &Document) -> Option<String> {
    let info = doc.trailer.get(b"Info").ok()?;
    let info = maybe_deref(doc, info).ok()?.as_dict().ok()?;
    let title = match maybe_deref(doc, info.get(b"Title").ok()?).ok()? {
        Object::String(bytes, _) => pdf_to_utf8(bytes).ok()?,
        _ => return None,
    };
    let title = title.trim();
    (!title.is_empty()).then(|| title.to_string())
}

/// Convert a PDF held in memory to `.docx` bytes with default options.
pub async fn pdf_to_word(bytes: &[u8]) -> ConvertResult<Vec<u8>> {
    Converter::load(bytes)?.convert(&mut ()).await
}

/// Number of pages in a PDF held in memory.
pub fn page_count(bytes: &[u8]) -> ConvertResult<usize> {
    Ok(Converter::load(bytes)?.page_count())
}

/// The output path for `path`: same location, `.docx` extension.
pub fn docx_file_name(path: &Path) -> PathBuf {
    path.with_extension("docx")
}
