//! Paragraph model of the output document and its OOXML packaging.
//!
//! Every source page becomes one section of paragraphs. The package holds
//! just the parts Word needs to open a document: content types, package
//! relationships, core and app properties, the main document part and the
//! PNG media it references.

use std::borrow::Cow;
use std::io::{Cursor, Seek, Write};

use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::error::ConvertResult;
use crate::merge::ContentItem;

/// Lines set in a font larger than this are emitted bold.
pub const BOLD_THRESHOLD: f64 = 15.0;

/// 6.3 inches at 96 DPI.
pub const DEFAULT_MAX_IMAGE_WIDTH: u32 = 605;

const EMU_PER_PIXEL: u64 = 9525;

// A4 portrait in twentieths of a point, with one inch margins.
const PAGE_WIDTH_TWIPS: u32 = 11906;
const PAGE_HEIGHT_TWIPS: u32 = 16838;
const MARGIN_TWIPS: u32 = 1440;

const NS_MAIN: &str = "http://schemas.openxmlformats.org/wordprocessingml/2006/main";
const NS_REL: &str = "http://schemas.openxmlformats.org/officeDocument/2006/relationships";
const NS_WP: &str = "http://schemas.openxmlformats.org/drawingml/2006/wordprocessingDrawing";
const NS_A: &str = "http://schemas.openxmlformats.org/drawingml/2006/main";
const NS_PIC: &str = "http://schemas.openxmlformats.org/drawingml/2006/picture";
const NS_PKG_REL: &str = "http://schemas.openxmlformats.org/package/2006/relationships";
const REL_OFFICE_DOCUMENT: &str = "http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument";
const REL_CORE: &str = "http://schemas.openxmlformats.org/package/2006/relationships/metadata/core-properties";
const REL_EXTENDED: &str = "http://schemas.openxmlformats.org/officeDocument/2006/relationships/extended-properties";
const REL_IMAGE: &str = "http://schemas.openxmlformats.org/officeDocument/2006/relationships/image";

#[derive(Clone, Debug, PartialEq)]
pub enum Paragraph {
    Text {
        text: String,
        bold: bool,
        /// Font size in half points, as Word stores it.
        size_half_points: Option<u32>,
    },
    Image {
        png: Vec<u8>,
        width: u32,
        height: u32,
    },
    PageBreak,
}

impl Paragraph {
    fn empty() -> Self {
        Paragraph::Text { text: String::new(), bold: false, size_half_points: None }
    }
}

/// The paragraphs produced from one source page.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PageSection {
    pub paragraphs: Vec<Paragraph>,
}

/// Fit `width` to `max_width`, scaling the height by the same ratio.
///
/// Images already narrow enough are returned unchanged; height is never
/// capped on its own.
pub fn scale_to_width(width: u32, height: u32, max_width: u32) -> (u32, u32) {
    if width <= max_width {
        return (width, height);
    }
    let scaled = (height as f64 * max_width as f64 / width as f64).round_ties_even();
    (max_width, (scaled as u32).max(1))
}

/// Turn a page's merged content into a section of paragraphs.
///
/// An empty page still yields one empty paragraph, and every page but the
/// last ends with a page break.
pub fn emit_page(items: Vec<ContentItem>, is_last: bool, max_image_width: u32) -> PageSection {
    let mut paragraphs: Vec<Paragraph> = items
        .into_iter()
        .map(|item| match item {
            ContentItem::Text(line) => Paragraph::Text {
                text: line.text,
                bold: line.font_size > BOLD_THRESHOLD,
                size_half_points: Some((line.font_size * 2.0).round().max(0.0) as u32),
            },
            ContentItem::Image(placed) => {
                let (width, height) = scale_to_width(placed.image.width, placed.image.height, max_image_width);
                Paragraph::Image { png: placed.image.png, width, height }
            }
        })
        .collect();

    if paragraphs.is_empty() {
        paragraphs.push(Paragraph::empty());
    }
    if !is_last {
        paragraphs.push(Paragraph::PageBreak);
    }
    PageSection { paragraphs }
}

/// A complete `.docx` ready to be written out.
#[derive(Clone, Debug, Default)]
pub struct DocxPackage {
    sections: Vec<PageSection>,
    title: Option<String>,
}

impl DocxPackage {
    pub fn new(sections: Vec<PageSection>) -> Self {
        DocxPackage { sections, title: None }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn sections(&self) -> &[PageSection] {
        &self.sections
    }

    pub fn to_bytes(&self) -> ConvertResult<Vec<u8>> {
        let mut buffer = Cursor::new(Vec::new());
        self.write_to(&mut buffer)?;
        Ok(buffer.into_inner())
    }

    pub fn write_to<W: Write + Seek>(&self, out: W) -> ConvertResult<()> {
        let mut zip = ZipWriter::new(out);
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
        // PNG data is already compressed.
        let media_options = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);

        let images: Vec<&[u8]> = self
            .sections
            .iter()
            .flat_map(|s| &s.paragraphs)
            .filter_map(|p| match p {
                Paragraph::Image { png, .. } => Some(png.as_slice()),
                _ => None,
            })
            .collect();

        let parts = [
            ("[Content_Types].xml", content_types()?),
            ("_rels/.rels", package_rels()?),
            ("docProps/core.xml", core_properties(self.title.as_deref())?),
            ("docProps/app.xml", app_properties(self.sections.len())?),
            ("word/document.xml", self.document_xml()?),
            ("word/_rels/document.xml.rels", document_rels(images.len())?),
        ];
        for (name, data) in parts {
            zip.start_file(name, options)?;
            zip.write_all(&data)?;
        }
        for (i, png) in images.iter().enumerate() {
            zip.start_file(format!("word/media/image{}.png", i + 1), media_options)?;
            zip.write_all(png)?;
        }
        zip.finish()?;
        Ok(())
    }

    fn document_xml(&self) -> ConvertResult<Vec<u8>> {
        xml_part(|w| {
            start(
                w,
                "w:document",
                &[
                    ("xmlns:w", NS_MAIN),
                    ("xmlns:r", NS_REL),
                    ("xmlns:wp", NS_WP),
                    ("xmlns:a", NS_A),
                    ("xmlns:pic", NS_PIC),
                ],
            )?;
            start(w, "w:body", &[])?;

            let mut image_index = 0;
            let count = self.sections.len();
            for (s, section) in self.sections.iter().enumerate() {
                let last_section = s + 1 == count;
                let n = section.paragraphs.len();
                for (i, paragraph) in section.paragraphs.iter().enumerate() {
                    let closes_section = !last_section && i + 1 == n;
                    start(w, "w:p", &[])?;
                    if closes_section {
                        start(w, "w:pPr", &[])?;
                        section_properties(w, true)?;
                        end(w, "w:pPr")?;
                    }
                    match paragraph {
                        Paragraph::Text { text, bold, size_half_points } => {
                            text_run(w, text, *bold, *size_half_points)?;
                        }
                        Paragraph::Image { width, height, .. } => {
                            image_index += 1;
                            drawing(w, image_index, *width, *height)?;
                        }
                        Paragraph::PageBreak => {
                            start(w, "w:r", &[])?;
                            empty(w, "w:br", &[("w:type", "page")])?;
                            end(w, "w:r")?;
                        }
                    }
                    end(w, "w:p")?;
                }
            }

            section_properties(w, false)?;
            end(w, "w:body")?;
            end(w, "w:document")
        })
    }
}

type XmlWriter = Writer<Vec<u8>>;

fn xml_part(body: impl FnOnce(&mut XmlWriter) -> ConvertResult<()>) -> ConvertResult<Vec<u8>> {
    let mut writer = Writer::new(Vec::new());
    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), Some("yes"))))?;
    body(&mut writer)?;
    Ok(writer.into_inner())
}

fn element<'a>(name: &'a str, attrs: &[(&'a str, &'a str)]) -> BytesStart<'a> {
    let mut elem = BytesStart::new(name);
    for &attr in attrs {
        elem.push_attribute(attr);
    }
    elem
}

fn start(w: &mut XmlWriter, name: &str, attrs: &[(&str, &str)]) -> ConvertResult<()> {
    w.write_event(Event::Start(element(name, attrs)))?;
    Ok(())
}

fn empty(w: &mut XmlWriter, name: &str, attrs: &[(&str, &str)]) -> ConvertResult<()> {
    w.write_event(Event::Empty(element(name, attrs)))?;
    Ok(())
}

fn end(w: &mut XmlWriter, name: &str) -> ConvertResult<()> {
    w.write_event(Event::End(BytesEnd::new(name)))?;
    Ok(())
}

fn simple_element(w: &mut XmlWriter, name: &str, value: &str) -> ConvertResult<()> {
    start(w, name, &[])?;
    w.write_event(Event::Text(BytesText::new(value)))?;
    end(w, name)
}

/// Drop characters that XML 1.0 does not allow in documents.
fn xml_safe(text: &str) -> Cow<'_, str> {
    let allowed = |c: char| matches!(c, '\t' | '\n' | '\r') || (c >= ' ' && c != '\u{FFFE}' && c != '\u{FFFF}');
    if text.chars().all(allowed) {
        Cow::Borrowed(text)
    } else {
        Cow::Owned(text.chars().filter(|&c| allowed(c)).collect())
    }
}

fn text_run(w: &mut XmlWriter, text: &str, bold: bool, size_half_points: Option<u32>) -> ConvertResult<()> {
    start(w, "w:r", &[])?;
    if bold || size_half_points.is_some() {
        start(w, "w:rPr", &[])?;
        if bold {
            empty(w, "w:b", &[])?;
            empty(w, "w:bCs", &[])?;
        }
        if let Some(size) = size_half_points {
            let size = size.to_string();
            empty(w, "w:sz", &[("w:val", size.as_str())])?;
            empty(w, "w:szCs", &[("w:val", size.as_str())])?;
        }
        end(w, "w:rPr")?;
    }
    start(w, "w:t", &[("xml:space", "preserve")])?;
    w.write_event(Event::Text(BytesText::new(&xml_safe(text))))?;
    end(w, "w:t")?;
    end(w, "w:r")
}

fn drawing(w: &mut XmlWriter, index: usize, width: u32, height: u32) -> ConvertResult<()> {
    let cx = (width as u64 * EMU_PER_PIXEL).to_string();
    let cy = (height as u64 * EMU_PER_PIXEL).to_string();
    let id = index.to_string();
    let name = format!("Picture {}", index);
    let file_name = format!("image{}.png", index);
    let rel_id = image_rel_id(index);

    start(w, "w:r", &[])?;
    start(w, "w:drawing", &[])?;
    start(w, "wp:inline", &[("distT", "0"), ("distB", "0"), ("distL", "0"), ("distR", "0")])?;
    empty(w, "wp:extent", &[("cx", cx.as_str()), ("cy", cy.as_str())])?;
    empty(w, "wp:effectExtent", &[("l", "0"), ("t", "0"), ("r", "0"), ("b", "0")])?;
    empty(w, "wp:docPr", &[("id", id.as_str()), ("name", name.as_str())])?;
    start(w, "wp:cNvGraphicFramePr", &[])?;
    empty(w, "a:graphicFrameLocks", &[("noChangeAspect", "1")])?;
    end(w, "wp:cNvGraphicFramePr")?;
    start(w, "a:graphic", &[])?;
    start(w, "a:graphicData", &[("uri", NS_PIC)])?;
    start(w, "pic:pic", &[])?;

    start(w, "pic:nvPicPr", &[])?;
    empty(w, "pic:cNvPr", &[("id", id.as_str()), ("name", file_name.as_str())])?;
    empty(w, "pic:cNvPicPr", &[])?;
    end(w, "pic:nvPicPr")?;

    start(w, "pic:blipFill", &[])?;
    empty(w, "a:blip", &[("r:embed", rel_id.as_str())])?;
    start(w, "a:stretch", &[])?;
    empty(w, "a:fillRect", &[])?;
    end(w, "a:stretch")?;
    end(w, "pic:blipFill")?;

    start(w, "pic:spPr", &[])?;
    start(w, "a:xfrm", &[])?;
    empty(w, "a:off", &[("x", "0"), ("y", "0")])?;
    empty(w, "a:ext", &[("cx", cx.as_str()), ("cy", cy.as_str())])?;
    end(w, "a:xfrm")?;
    start(w, "a:prstGeom", &[("prst", "rect")])?;
    empty(w, "a:avLst", &[])?;
    end(w, "a:prstGeom")?;
    end(w, "pic:spPr")?;

    end(w, "pic:pic")?;
    end(w, "a:graphicData")?;
    end(w, "a:graphic")?;
    end(w, "wp:inline")?;
    end(w, "w:drawing")?;
    end(w, "w:r")
}

fn section_properties(w: &mut XmlWriter, continuous: bool) -> ConvertResult<()> {
    let page_width = PAGE_WIDTH_TWIPS.to_string();
    let page_height = PAGE_HEIGHT_TWIPS.to_string();
    let margin = MARGIN_TWIPS.to_string();

    start(w, "w:sectPr", &[])?;
    if continuous {
        empty(w, "w:type", &[("w:val", "continuous")])?;
    }
    empty(w, "w:pgSz", &[("w:w", page_width.as_str()), ("w:h", page_height.as_str())])?;
    empty(
        w,
        "w:pgMar",
        &[
            ("w:top", margin.as_str()),
            ("w:right", margin.as_str()),
            ("w:bottom", margin.as_str()),
            ("w:left", margin.as_str()),
            ("w:header", "708"),
            ("w:footer", "708"),
            ("w:gutter", "0"),
        ],
    )?;
    end(w, "w:sectPr")
}

fn image_rel_id(index: usize) -> String {
    format!("rIdImage{}", index)
}

fn content_types() -> ConvertResult<Vec<u8>> {
    xml_part(|w| {
        start(w, "Types", &[("xmlns", "http://schemas.openxmlformats.org/package/2006/content-types")])?;
        empty(w, "Default", &[("Extension", "rels"), ("ContentType", "application/vnd.openxmlformats-package.relationships+xml")])?;
        empty(w, "Default", &[("Extension", "xml"), ("ContentType", "application/xml")])?;
        empty(w, "Default", &[("Extension", "png"), ("ContentType", "image/png")])?;
        empty(
            w,
            "Override",
            &[
                ("PartName", "/word/document.xml"),
                ("ContentType", "application/vnd.openxmlformats-officedocument.wordprocessingml.document.main+xml"),
            ],
        )?;
        empty(
            w,
            "Override",
            &[
                ("PartName", "/docProps/core.xml"),
                ("ContentType", "application/vnd.openxmlformats-package.core-properties+xml"),
            ],
        )?;
        empty(
            w,
            "Override",
            &[
                ("PartName", "/docProps/app.xml"),
                ("ContentType", "application/vnd.openxmlformats-officedocument.extended-properties+xml"),
            ],
        )?;
        end(w, "Types")
    })
}

fn package_rels() -> ConvertResult<Vec<u8>> {
    xml_part(|w| {
        start(w, "Relationships", &[("xmlns", NS_PKG_REL)])?;
        empty(w, "Relationship", &[("Id", "rId1"), ("Type", REL_OFFICE_DOCUMENT), ("Target", "word/document.xml")])?;
        empty(w, "Relationship", &[("Id", "rId2"), ("Type", REL_CORE), ("Target", "docProps/core.xml")])?;
        empty(w, "Relationship", &[("Id", "rId3"), ("Type", REL_EXTENDED), ("Target", "docProps/app.xml")])?;
        end(w, "Relationships")
    })
}

fn document_rels(image_count: usize) -> ConvertResult<Vec<u8>> {
    xml_part(|w| {
        start(w, "Relationships", &[("xmlns", NS_PKG_REL)])?;
        for index in 1..=image_count {
            let id = image_rel_id(index);
            let target = format!("media/image{}.png", index);
            empty(w, "Relationship", &[("Id", id.as_str()), ("Type", REL_IMAGE), ("Target", target.as_str())])?;
        }
        end(w, "Relationships")
    })
}

fn core_properties(title: Option<&str>) -> ConvertResult<Vec<u8>> {
    xml_part(|w| {
        start(
            w,
            "cp:coreProperties",
            &[
                ("xmlns:cp", "http://schemas.openxmlformats.org/package/2006/metadata/core-properties"),
                ("xmlns:dc", "http://purl.org/dc/elements/1.1/"),
                ("xmlns:dcterms", "http://purl.org/dc/terms/"),
                ("xmlns:xsi", "http://www.w3.org/2001/XMLSchema-instance"),
            ],
        )?;
        if let Some(title) = title {
            simple_element(w, "dc:title", &xml_safe(title))?;
        }
        simple_element(w, "dc:creator", env!("CARGO_PKG_NAME"))?;
        end(w, "cp:coreProperties")
    })
}

fn app_properties(pages: usize) -> ConvertResult<Vec<u8>> {
    xml_part(|w| {
        start(
            w,
            "Properties",
            &[("xmlns", "http://schemas.openxmlformats.org/officeDocument/2006/extended-properties")],
        )?;
        simple_element(w, "Application", concat!(env!("CARGO_PKG_NAME"), " ", env!("CARGO_PKG_VERSION")))?;
        simple_element(w, "Pages", &pages.to_string())?;
        end(w, "Properties")
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::materialize::EncodedImage;
    use crate::merge::ExtractedImage;
    use crate::text::TextLine;
    use std::io::Read;

    fn line(text: &str, y: f64, font_size: f64) -> ContentItem {
        ContentItem::Text(TextLine { text: text.to_string(), y, font_size })
    }

    fn image(width: u32, height: u32) -> ContentItem {
        ContentItem::Image(ExtractedImage { image: EncodedImage { png: vec![1, 2, 3], width, height }, y: 0.0 })
    }

    #[test]
    fn wide_images_are_scaled_to_fit() {
        assert_eq!(scale_to_width(1200, 800, 605), (605, 403));
        assert_eq!(scale_to_width(2000, 1000, 605), (605, 302));
        assert_eq!(scale_to_width(400, 300, 605), (400, 300));
        assert_eq!(scale_to_width(605, 3000, 605), (605, 3000));
        assert_eq!(scale_to_width(10000, 1, 605), (605, 1));
    }

    #[test]
    fn large_fonts_are_bold_and_sized() {
        let section = emit_page(vec![line("Title", 700.0, 20.0), line("body", 650.0, 12.0), line("edge", 600.0, 15.0)], true, 605);
        assert_eq!(
            section.paragraphs,
            vec![
                Paragraph::Text { text: "Title".into(), bold: true, size_half_points: Some(40) },
                Paragraph::Text { text: "body".into(), bold: false, size_half_points: Some(24) },
                Paragraph::Text { text: "edge".into(), bold: false, size_half_points: Some(30) },
            ]
        );
    }

    #[test]
    fn empty_page_gets_placeholder_and_break() {
        let section = emit_page(Vec::new(), false, 605);
        assert_eq!(section.paragraphs, vec![Paragraph::empty(), Paragraph::PageBreak]);
        let last = emit_page(Vec::new(), true, 605);
        assert_eq!(last.paragraphs, vec![Paragraph::empty()]);
    }

    #[test]
    fn images_keep_order_and_scale() {
        let section = emit_page(vec![image(1200, 600), image(400, 300)], false, 605);
        let sizes: Vec<(u32, u32)> = section
            .paragraphs
            .iter()
            .filter_map(|p| match p {
                Paragraph::Image { width, height, .. } => Some((*width, *height)),
                _ => None,
            })
            .collect();
        assert_eq!(sizes, vec![(605, 302), (400, 300)]);
        assert_eq!(section.paragraphs.last(), Some(&Paragraph::PageBreak));
    }

    #[test]
    fn control_characters_are_stripped() {
        assert_eq!(xml_safe("plain"), Cow::Borrowed("plain"));
        assert_eq!(xml_safe("a\u{1}b\tc\u{FFFF}"), "ab\tc");
    }

    fn read_part(bytes: &[u8], name: &str) -> String {
        let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
        let mut part = archive.by_name(name).unwrap();
        let mut xml = String::new();
        part.read_to_string(&mut xml).unwrap();
        xml
    }

    #[test]
    fn package_contains_parts_and_media() {
        let sections = vec![
            emit_page(vec![line("Fish & Chips <menu>", 700.0, 20.0)], false, 605),
            emit_page(vec![image(2000, 1000)], true, 605),
        ];
        let bytes = DocxPackage::new(sections).with_title("Menu").to_bytes().unwrap();

        let mut archive = zip::ZipArchive::new(Cursor::new(bytes.as_slice())).unwrap();
        for name in [
            "[Content_Types].xml",
            "_rels/.rels",
            "docProps/core.xml",
            "docProps/app.xml",
            "word/document.xml",
            "word/_rels/document.xml.rels",
            "word/media/image1.png",
        ] {
            assert!(archive.by_name(name).is_ok(), "missing {name}");
        }

        let document = read_part(&bytes, "word/document.xml");
        assert!(document.contains("Fish &amp; Chips &lt;menu&gt;"));
        assert!(document.contains("<w:b/>"));
        assert!(document.contains(r#"<w:sz w:val="40"/>"#));
        assert!(document.contains(r#"<w:br w:type="page"/>"#));
        assert_eq!(document.matches("<w:sectPr>").count(), 2);
        assert_eq!(document.matches(r#"<w:type w:val="continuous"/>"#).count(), 1);
        assert!(document.contains(r#"<wp:extent cx="5762625" cy="2876550"/>"#));
        assert!(document.contains(r#"r:embed="rIdImage1""#));

        let rels = read_part(&bytes, "word/_rels/document.xml.rels");
        assert!(rels.contains(r#"Target="media/image1.png""#));
        assert!(read_part(&bytes, "docProps/core.xml").contains("<dc:title>Menu</dc:title>"));
        assert!(read_part(&bytes, "docProps/app.xml").contains("<Pages>2</Pages>"));
    }
}
