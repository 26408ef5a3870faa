use std::time::Duration;

use thiserror::Error;

/// Errors raised while converting a PDF into a Word document.
///
/// Any error returned while looking up an image only drops that image, as
/// do the image-level failures of re-encoding it (see
/// [`ConvertError::is_image_local`]). Everything else ends the conversion.
#[derive(Error, Debug)]
pub enum ConvertError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("PDF parsing error: {0}")]
    Parse(#[from] lopdf::Error),

    #[error("Invalid PDF structure: {0}")]
    InvalidStructure(String),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Encoding error: {0}")]
    Encoding(String),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Unsupported image: {0}")]
    UnsupportedImage(String),

    #[error("Image lookup timed out after {0:?}")]
    ImageTimeout(Duration),

    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("Archive error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("Document has no pages")]
    NoPages,

    #[error("Conversion cancelled")]
    Cancelled,
}

impl ConvertError {
    /// Whether this error only affects a single embedded image.
    pub fn is_image_local(&self) -> bool {
        matches!(
            self,
            ConvertError::Image(_)
                | ConvertError::UnsupportedImage(_)
                | ConvertError::ImageTimeout(_)
                | ConvertError::Task(_)
        )
    }
}

pub type ConvertResult<T> = std::result::Result<T, ConvertError>;
