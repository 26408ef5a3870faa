use crate::materialize::EncodedImage;
use crate::text::TextLine;

/// An image placed on a page.
#[derive(Clone, Debug, PartialEq)]
pub struct ExtractedImage {
    pub image: EncodedImage,
    pub y: f64,
}

/// One unit of page content, in reading order once merged.
#[derive(Clone, Debug, PartialEq)]
pub enum ContentItem {
    Text(TextLine),
    Image(ExtractedImage),
}

impl ContentItem {
    pub fn y(&self) -> f64 {
        match self {
            ContentItem::Text(line) => line.y,
            ContentItem::Image(image) => image.y,
        }
    }
}

/// Interleave a page's lines and images from the top of the page down.
///
/// The sort is stable and lines are queued ahead of images, so a line and
/// an image at the same height come out text first.
pub fn merge_content(lines: Vec<TextLine>, images: Vec<ExtractedImage>) -> Vec<ContentItem> {
    let mut items: Vec<ContentItem> = lines
        .into_iter()
        .map(ContentItem::Text)
        .chain(images.into_iter().map(ContentItem::Image))
        .collect();
    items.sort_by(|a, b| b.y().total_cmp(&a.y()));
    items
}
