//! Positioned text extraction and grouping of text runs into lines.

use std::collections::HashMap;
use std::sync::Arc;

use euclid::Transform2D;
use log::{debug, warn};
use lopdf::content::{Content, Operation};
use lopdf::{Dictionary, Document, Object};
use unicode_normalization::UnicodeNormalization;

use crate::error::{ConvertError, ConvertResult};
use crate::fonts::{make_font, PdfFont};
use crate::objects::{self, as_num, get, get_contents, maybe_get, maybe_get_name};

pub struct PdfSpace;
pub type PdfTransform = Transform2D<f64, PdfSpace, PdfSpace>;

/// Runs whose baselines are at most this far apart share a line.
pub const LINE_TOLERANCE: f64 = 2.0;

/// Used for lines whose first run reports no usable size.
const DEFAULT_FONT_SIZE: f64 = 12.0;

/// A `TJ` adjustment moving right by more than this many thousandths of an
/// em is treated as a word gap.
const TJ_SPACE_THRESHOLD: f64 = 250.0;

/// The text painted by one show operator.
#[derive(Clone, Debug, PartialEq)]
pub struct TextRun {
    pub text: String,
    pub x: f64,
    pub y: f64,
    pub font_size: f64,
}

/// Runs sharing a baseline, joined left to right.
#[derive(Clone, Debug, PartialEq)]
pub struct TextLine {
    pub text: String,
    pub y: f64,
    pub font_size: f64,
}

/// Group text runs into lines, top of the page first.
///
/// Whitespace-only runs are dropped. Runs are ordered by descending
/// baseline; a run starts a new line when its baseline is more than
/// [`LINE_TOLERANCE`] below the previous run's. Within a line runs are
/// ordered left to right, and the leftmost run supplies the line's
/// position and font size.
pub fn assemble_lines(runs: Vec<TextRun>) -> Vec<TextLine> {
    let mut runs: Vec<TextRun> = runs.into_iter().filter(|r| !r.text.trim().is_empty()).collect();
    runs.sort_by(|a, b| b.y.total_cmp(&a.y));

    let mut lines = Vec::new();
    let mut current: Vec<TextRun> = Vec::new();
    for run in runs {
        if current.last().is_some_and(|prev| (prev.y - run.y).abs() > LINE_TOLERANCE) {
            lines.extend(finish_line(std::mem::take(&mut current)));
        }
        current.push(run);
    }
    lines.extend(finish_line(current));
    lines
}

fn finish_line(mut runs: Vec<TextRun>) -> Option<TextLine> {
    runs.sort_by(|a, b| a.x.total_cmp(&b.x));
    let first = runs.first()?;
    let y = first.y;
    let font_size = if first.font_size > 0.0 { first.font_size } else { DEFAULT_FONT_SIZE };
    let text = runs.iter().map(|r| r.text.as_str()).collect::<Vec<_>>().join(" ");
    Some(TextLine { text: text.trim().to_string(), y, font_size })
}

/// Extract one [`TextRun`] per text-showing operator on a page.
///
/// Operators that fail to apply (bad operands, unloadable fonts) are
/// logged and skipped; they never abort the page.
pub fn extract_text_runs(
    doc: &Document,
    operations: &[Operation],
    resources: &Dictionary,
    max_form_depth: usize,
) -> Vec<TextRun> {
    let mut p = Processor { doc, max_form_depth, runs: Vec::new() };
    p.process_operations(operations, resources, GraphicsState::default(), 0);
    p.runs
}

#[derive(Clone)]
struct TextState {
    font: Option<Arc<dyn PdfFont>>,
    font_size: f64,
    character_spacing: f64,
    word_spacing: f64,
    horizontal_scaling: f64,
    leading: f64,
    rise: f64,
    tm: PdfTransform,
}

#[derive(Clone)]
struct GraphicsState {
    ctm: PdfTransform,
    ts: TextState,
}

impl Default for GraphicsState {
    fn default() -> Self {
        GraphicsState {
            ctm: Transform2D::identity(),
            ts: TextState {
                font: None,
                font_size: 0.,
                character_spacing: 0.,
                word_spacing: 0.,
                horizontal_scaling: 1.0,
                leading: 0.,
                rise: 0.,
                tm: Transform2D::identity(),
            },
        }
    }
}

struct Processor<'a> {
    doc: &'a Document,
    max_form_depth: usize,
    runs: Vec<TextRun>,
}

/// Per-content-stream interpreter state.
struct StreamState<'r> {
    resources: &'r Dictionary,
    fonts: HashMap<Vec<u8>, Option<Arc<dyn PdfFont>>>,
    gs: GraphicsState,
    gs_stack: Vec<GraphicsState>,
    tlm: PdfTransform,
    depth: usize,
}

fn operand(op: &Operation, i: usize) -> ConvertResult<f64> {
    op.operands
        .get(i)
        .ok_or_else(|| ConvertError::InvalidStructure(format!("{} is missing operand {}", op.operator, i)))
        .and_then(as_num)
}

fn matrix(op: &Operation) -> ConvertResult<PdfTransform> {
    let [a, b, c, d, e, f] = objects::as_matrix(&op.operands)
        .ok_or_else(|| ConvertError::InvalidStructure(format!("{} requires 6 numbers", op.operator)))?;
    Ok(Transform2D::new(a, b, c, d, e, f))
}

impl<'a> Processor<'a> {
    fn process_operations(&mut self, operations: &[Operation], resources: &Dictionary, gs: GraphicsState, depth: usize) {
        let mut st = StreamState {
            resources,
            fonts: HashMap::new(),
            gs,
            gs_stack: Vec::new(),
            tlm: Transform2D::identity(),
            depth,
        };
        for op in operations {
            if let Err(e) = self.apply(&mut st, op) {
                debug!("Skipping {} operator: {}", op.operator, e);
            }
        }
    }

    fn apply(&mut self, st: &mut StreamState, op: &Operation) -> ConvertResult<()> {
        match op.operator.as_ref() {
            "BT" | "ET" => {
                st.tlm = Transform2D::identity();
                st.gs.ts.tm = st.tlm;
            }
            "cm" => {
                let m = matrix(op)?;
                st.gs.ctm = m.then(&st.gs.ctm);
            }
            "q" => st.gs_stack.push(st.gs.clone()),
            "Q" => match st.gs_stack.pop() {
                Some(gs) => st.gs = gs,
                None => warn!("No state to pop"),
            },
            "Tf" => {
                let name = op
                    .operands
                    .first()
                    .and_then(|n| n.as_name().ok())
                    .ok_or_else(|| ConvertError::InvalidStructure("Tf requires name operand".to_string()))?;
                st.gs.ts.font = self.font(st, name);
                st.gs.ts.font_size = operand(op, 1)?;
            }
            "Tc" => st.gs.ts.character_spacing = operand(op, 0)?,
            "Tw" => st.gs.ts.word_spacing = operand(op, 0)?,
            "Tz" => st.gs.ts.horizontal_scaling = operand(op, 0)? / 100.,
            "TL" => st.gs.ts.leading = operand(op, 0)?,
            "Ts" => st.gs.ts.rise = operand(op, 0)?,
            "Tm" => {
                st.tlm = matrix(op)?;
                st.gs.ts.tm = st.tlm;
            }
            "Td" => {
                let (tx, ty) = (operand(op, 0)?, operand(op, 1)?);
                next_line(st, tx, ty);
            }
            "TD" => {
                let (tx, ty) = (operand(op, 0)?, operand(op, 1)?);
                st.gs.ts.leading = -ty;
                next_line(st, tx, ty);
            }
            "T*" => {
                let leading = st.gs.ts.leading;
                next_line(st, 0., -leading);
            }
            "Tj" => self.show(&mut st.gs, &op.operands[..op.operands.len().min(1)]),
            "TJ" => {
                if let Some(Object::Array(array)) = op.operands.first() {
                    self.show(&mut st.gs, array);
                }
            }
            "'" => {
                let leading = st.gs.ts.leading;
                next_line(st, 0., -leading);
                self.show(&mut st.gs, &op.operands[..op.operands.len().min(1)]);
            }
            "\"" => {
                st.gs.ts.word_spacing = operand(op, 0)?;
                st.gs.ts.character_spacing = operand(op, 1)?;
                let leading = st.gs.ts.leading;
                next_line(st, 0., -leading);
                self.show(&mut st.gs, op.operands.get(2..3).unwrap_or_default());
            }
            "Do" => {
                let name = op
                    .operands
                    .first()
                    .and_then(|n| n.as_name().ok())
                    .ok_or_else(|| ConvertError::InvalidStructure("Do requires name operand".to_string()))?;
                self.form(st, name)?;
            }
            _ => {}
        }
        Ok(())
    }

    fn font(&self, st: &mut StreamState, name: &[u8]) -> Option<Arc<dyn PdfFont>> {
        let doc = self.doc;
        let resources = st.resources;
        st.fonts
            .entry(name.to_owned())
            .or_insert_with(|| {
                let loaded = get::<&Dictionary>(doc, resources, b"Font")
                    .and_then(|fonts| get::<&Dictionary>(doc, fonts, name))
                    .and_then(|font| make_font(doc, font));
                match loaded {
                    Ok(font) => Some(font),
                    Err(e) => {
                        warn!("Failed to load font {:?}: {}", String::from_utf8_lossy(name), e);
                        None
                    }
                }
            })
            .clone()
    }

    fn form(&mut self, st: &mut StreamState, name: &[u8]) -> ConvertResult<()> {
        let doc = self.doc;
        let xobjects: &Dictionary = get(doc, st.resources, b"XObject")?;
        let xf: &lopdf::Stream = get(doc, xobjects, name)?;
        if maybe_get_name(doc, &xf.dict, b"Subtype") != Some(&b"Form"[..]) {
            return Ok(());
        }
        if st.depth >= self.max_form_depth {
            warn!("Form XObjects nested deeper than {}; not descending", self.max_form_depth);
            return Ok(());
        }

        let resources = objects::maybe_get_obj(doc, &xf.dict, b"Resources")
            .and_then(|r| r.as_dict().ok())
            .unwrap_or(st.resources);
        let mut gs = st.gs.clone();
        if let Some(m) = maybe_get::<Vec<f64>>(doc, &xf.dict, b"Matrix").and_then(|m| <[f64; 6]>::try_from(m).ok()) {
            let [a, b, c, d, e, f] = m;
            gs.ctm = Transform2D::new(a, b, c, d, e, f).then(&gs.ctm);
        }
        let content = Content::decode(&get_contents(xf))?;
        self.process_operations(&content.operations, resources, gs, st.depth + 1);
        Ok(())
    }

    /// Paint a sequence of strings and `TJ` adjustments as one run.
    fn show(&mut self, gs: &mut GraphicsState, parts: &[Object]) {
        let Some(font) = gs.ts.font.clone() else {
            debug!("Text shown without a font");
            return;
        };

        let start = self.rendering_matrix(gs);
        let mut text = String::new();
        for part in parts {
            match part {
                Object::String(s, _) => self.show_string(gs, font.as_ref(), s, &mut text),
                Object::Integer(_) | Object::Real(_) => {
                    let Ok(tj) = as_num(part) else { continue };
                    let ts = &mut gs.ts;
                    let tx = ts.horizontal_scaling * (-tj / 1000. * ts.font_size);
                    ts.tm = Transform2D::translation(tx, 0.).then(&ts.tm);
                    if -tj > TJ_SPACE_THRESHOLD && !text.is_empty() && !text.ends_with(' ') {
                        text.push(' ');
                    }
                }
                _ => {}
            }
        }

        let vertical_scale = start.m21.hypot(start.m22);
        self.runs.push(TextRun {
            text: text.nfkc().collect(),
            x: start.m31,
            y: start.m32,
            font_size: gs.ts.font_size * vertical_scale,
        });
    }

    fn rendering_matrix(&self, gs: &GraphicsState) -> PdfTransform {
        let ts = &gs.ts;
        let tsm = Transform2D::new(ts.horizontal_scaling, 0., 0., 1.0, 0., ts.rise);
        tsm.then(&ts.tm.then(&gs.ctm))
    }

    fn show_string(&self, gs: &mut GraphicsState, font: &dyn PdfFont, s: &[u8], text: &mut String) {
        let ts = &mut gs.ts;
        let mut iter = s.iter();
        while let Some((c, length)) = font.next_char(&mut iter) {
            text.push_str(&font.decode_char(c));

            let w0 = font.get_width(c) / 1000.;
            let mut spacing = ts.character_spacing;
            if c == 32 && length == 1 {
                spacing += ts.word_spacing;
            }
            let tx = ts.horizontal_scaling * (w0 * ts.font_size + spacing);
            ts.tm = Transform2D::translation(tx, 0.).then(&ts.tm);
        }
    }
}

fn next_line(st: &mut StreamState, tx: f64, ty: f64) {
    st.tlm = Transform2D::translation(tx, ty).then(&st.tlm);
    st.gs.ts.tm = st.tlm;
}

#[cfg(test)]
mod tests {
    use super::*;
    use lopdf::{dictionary, Stream, StringFormat};

    fn run(text: &str, x: f64, y: f64, font_size: f64) -> TextRun {
        TextRun { text: text.to_string(), x, y, font_size }
    }

    #[test]
    fn runs_within_tolerance_share_a_line() {
        let lines = assemble_lines(vec![run("world", 200.0, 498.5, 12.0), run("Hello", 72.0, 500.0, 12.0)]);
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].text, "Hello world");
        assert_eq!(lines[0].y, 500.0);
    }

    #[test]
    fn runs_beyond_tolerance_split_regardless_of_order() {
        let a = run("upper", 72.0, 500.0, 12.0);
        let b = run("lower", 72.0, 497.5, 12.0);
        for runs in [vec![a.clone(), b.clone()], vec![b, a]] {
            let lines = assemble_lines(runs);
            let texts: Vec<&str> = lines.iter().map(|l| l.text.as_str()).collect();
            assert_eq!(texts, vec!["upper", "lower"]);
        }
    }

    #[test]
    fn lines_are_top_down_and_left_to_right() {
        let lines = assemble_lines(vec![
            run("c", 300.0, 600.0, 10.0),
            run("body", 72.0, 400.0, 12.0),
            run("a", 72.0, 600.0, 20.0),
            run("b", 150.0, 601.0, 10.0),
            run("   ", 10.0, 700.0, 10.0),
        ]);
        let texts: Vec<&str> = lines.iter().map(|l| l.text.as_str()).collect();
        assert_eq!(texts, vec!["a b c", "body"]);
        assert_eq!(lines[0].font_size, 20.0);
    }

    #[test]
    fn sizeless_runs_fall_back_to_twelve_points() {
        let lines = assemble_lines(vec![run("tiny", 72.0, 300.0, 0.0)]);
        assert_eq!(lines[0].font_size, 12.0);
    }

    #[test]
    fn whitespace_only_input_gives_no_lines() {
        assert!(assemble_lines(vec![run(" ", 0.0, 0.0, 12.0), run("", 0.0, 10.0, 12.0)]).is_empty());
    }

    fn page_doc(content: Content) -> (Document, Dictionary, Vec<Operation>) {
        let mut doc = Document::with_version("1.5");
        let font = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica",
            "Encoding" => "WinAnsiEncoding",
        });
        let resources = dictionary! { "Font" => dictionary! { "F1" => font } };
        (doc, resources, content.operations)
    }

    fn s(text: &str) -> Object {
        Object::String(text.as_bytes().to_vec(), StringFormat::Literal)
    }

    #[test_log::test]
    fn show_operators_produce_positioned_runs() {
        let content = Content {
            operations: vec![
                Operation::new("BT", vec![]),
                Operation::new("Tf", vec!["F1".into(), 20.into()]),
                Operation::new("Td", vec![72.into(), 700.into()]),
                Operation::new("Tj", vec![s("Heading")]),
                Operation::new("Tf", vec!["F1".into(), 12.into()]),
                Operation::new("Td", vec![0.into(), Object::Integer(-40)]),
                Operation::new("TJ", vec![Object::Array(vec![s("Body"), Object::Integer(-300), s("text")])]),
                Operation::new("ET", vec![]),
            ],
        };
        let (doc, resources, ops) = page_doc(content);
        let runs = extract_text_runs(&doc, &ops, &resources, 10);

        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0], run("Heading", 72.0, 700.0, 20.0));
        assert_eq!(runs[1].text, "Body text");
        assert_eq!((runs[1].x, runs[1].y, runs[1].font_size), (72.0, 660.0, 12.0));
    }

    #[test_log::test]
    fn ctm_scales_font_size_and_moves_baseline() {
        let content = Content {
            operations: vec![
                Operation::new("q", vec![]),
                Operation::new("cm", vec![2.into(), 0.into(), 0.into(), 2.into(), 10.into(), 20.into()]),
                Operation::new("BT", vec![]),
                Operation::new("Tf", vec!["F1".into(), 10.into()]),
                Operation::new("Tm", vec![1.into(), 0.into(), 0.into(), 1.into(), 5.into(), 100.into()]),
                Operation::new("Tj", vec![s("Scaled")]),
                Operation::new("ET", vec![]),
                Operation::new("Q", vec![]),
            ],
        };
        let (doc, resources, ops) = page_doc(content);
        let runs = extract_text_runs(&doc, &ops, &resources, 10);
        assert_eq!(runs, vec![run("Scaled", 20.0, 220.0, 20.0)]);
    }

    #[test_log::test]
    fn missing_font_skips_show_without_failing() {
        let content = Content {
            operations: vec![
                Operation::new("BT", vec![]),
                Operation::new("Tf", vec!["F9".into(), 12.into()]),
                Operation::new("Tj", vec![s("lost")]),
                Operation::new("Tf", vec!["F1".into(), 12.into()]),
                Operation::new("Tj", vec![s("kept")]),
                Operation::new("ET", vec![]),
            ],
        };
        let (doc, resources, ops) = page_doc(content);
        let runs = extract_text_runs(&doc, &ops, &resources, 10);
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].text, "kept");
    }

    #[test_log::test]
    fn form_text_uses_form_matrix() {
        let (mut doc, _, _) = page_doc(Content { operations: vec![] });
        let font = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica",
        });
        let form_content = Content {
            operations: vec![
                Operation::new("BT", vec![]),
                Operation::new("Tf", vec!["F1".into(), 12.into()]),
                Operation::new("Tj", vec![s("inside")]),
                Operation::new("ET", vec![]),
            ],
        };
        let form = doc.add_object(Stream::new(
            dictionary! {
                "Subtype" => "Form",
                "Matrix" => vec![1.into(), 0.into(), 0.into(), 1.into(), 50.into(), 300.into()],
                "Resources" => dictionary! { "Font" => dictionary! { "F1" => font } },
            },
            form_content.encode().unwrap(),
        ));
        let resources = dictionary! { "XObject" => dictionary! { "Fm1" => form } };
        let ops = vec![Operation::new("Do", vec!["Fm1".into()])];

        let runs = extract_text_runs(&doc, &ops, &resources, 10);
        assert_eq!(runs, vec![run("inside", 50.0, 300.0, 12.0)]);
        assert!(extract_text_runs(&doc, &ops, &resources, 0).is_empty());
    }
}
