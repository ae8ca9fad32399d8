//! Page layout reading.
//!
//! [`LopdfSource`] walks each page's decoded content stream and records where
//! text was drawn ([`TextRun`]) and where images were placed. Grouping runs
//! into lines, cells, and blocks is pure geometry on [`PageLayout`], so the
//! extraction passes can be exercised with hand-built layouts.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use lopdf::content::Content;
use lopdf::{Document, Encoding, Object, ObjectId};
use rulevault_shared::{BoundingBox, Result, RuleVaultError};

/// Average glyph advance as a fraction of the font size. Glyph metrics are
/// not read, so run widths are estimates.
const AVG_GLYPH_WIDTH: f32 = 0.5;

/// Runs whose baselines differ by less than this fraction of the font size
/// share a line.
const LINE_TOLERANCE: f32 = 0.3;

/// Horizontal gap (in font sizes) above which two runs are separate cells.
const COLUMN_GAP: f32 = 1.5;

/// Horizontal gap (in font sizes) above which two runs are separate words.
const WORD_GAP: f32 = 0.15;

/// Vertical baseline distance (in font sizes) above which a new block starts.
const BLOCK_GAP: f32 = 1.6;

/// `TJ` adjustments more negative than this (thousandths of an em) read as a space.
const TJ_SPACE_THRESHOLD: f32 = -200.0;

// ---------------------------------------------------------------------------
// Layout model
// ---------------------------------------------------------------------------

/// Text drawn by a single show-text operator.
#[derive(Debug, Clone, PartialEq)]
pub struct TextRun {
    pub text: String,
    /// Baseline origin in page space.
    pub x: f32,
    pub y: f32,
    /// Effective font size after text and page transforms.
    pub font_size: f32,
    /// The font's `BaseFont` name marks it bold.
    pub bold: bool,
}

impl TextRun {
    pub fn new(text: impl Into<String>, x: f32, y: f32, font_size: f32) -> Self {
        Self {
            text: text.into(),
            x,
            y,
            font_size,
            bold: false,
        }
    }

    /// Estimated right edge of the run.
    pub fn end_x(&self) -> f32 {
        self.x + estimated_width(&self.text, self.font_size)
    }
}

fn estimated_width(text: &str, font_size: f32) -> f32 {
    text.chars().count() as f32 * font_size * AVG_GLYPH_WIDTH
}

/// Runs sharing a baseline, ordered left to right.
#[derive(Debug, Clone)]
pub struct TextLine {
    pub y: f32,
    pub runs: Vec<TextRun>,
}

impl TextLine {
    /// Split the line into cells at wide horizontal gaps.
    pub fn cells(&self) -> Vec<String> {
        let mut cells: Vec<String> = Vec::new();
        let mut prev: Option<&TextRun> = None;

        for run in &self.runs {
            let gap = prev.map(|p| (run.x - p.end_x(), p.font_size));
            match (gap, cells.last_mut()) {
                (Some((gap, size)), Some(cell)) if gap <= size * COLUMN_GAP => {
                    if gap > size * WORD_GAP && !cell.ends_with(' ') && !run.text.starts_with(' ')
                    {
                        cell.push(' ');
                    }
                    cell.push_str(&run.text);
                }
                _ => cells.push(run.text.clone()),
            }
            prev = Some(run);
        }

        cells
            .into_iter()
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .collect()
    }

    pub fn text(&self) -> String {
        self.cells().join(" ")
    }

    pub fn font_size(&self) -> f32 {
        mean(self.runs.iter().map(|r| r.font_size))
    }

    pub fn bbox(&self) -> BoundingBox {
        let x0 = self.runs.iter().map(|r| r.x).fold(f32::INFINITY, f32::min);
        let x1 = self.runs.iter().map(TextRun::end_x).fold(f32::NEG_INFINITY, f32::max);
        BoundingBox {
            x0,
            y0: self.y,
            x1,
            y1: self.y + self.font_size(),
        }
    }
}

fn mean(values: impl Iterator<Item = f32>) -> f32 {
    let (sum, count) = values.fold((0.0_f32, 0_u32), |(s, c), v| (s + v, c + 1));
    if count == 0 { 0.0 } else { sum / count as f32 }
}

/// Whether a layout block holds text or an image placement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    Text,
    Image,
}

/// A visually contiguous region of a page.
#[derive(Debug, Clone)]
pub struct LayoutBlock {
    pub kind: BlockKind,
    /// Lines joined with `\n`. Empty for images.
    pub text: String,
    pub bbox: BoundingBox,
    pub font_size: f32,
    /// Every run in the block uses a bold font.
    pub bold: bool,
}

impl LayoutBlock {
    fn from_lines(lines: &[TextLine]) -> Self {
        let text = lines.iter().map(TextLine::text).collect::<Vec<_>>().join("\n");
        let bbox = lines
            .iter()
            .map(TextLine::bbox)
            .reduce(|a, b| a.union(&b))
            .unwrap_or(BoundingBox { x0: 0.0, y0: 0.0, x1: 0.0, y1: 0.0 });
        let runs = lines.iter().flat_map(|l| l.runs.iter());
        Self {
            kind: BlockKind::Text,
            text,
            bbox,
            font_size: mean(runs.clone().map(|r| r.font_size)),
            bold: runs.clone().next().is_some() && runs.clone().all(|r| r.bold),
        }
    }

    fn image(bbox: BoundingBox) -> Self {
        Self {
            kind: BlockKind::Image,
            text: String::new(),
            bbox,
            font_size: 0.0,
            bold: false,
        }
    }
}

/// Everything drawn on one page.
#[derive(Debug, Clone, Default)]
pub struct PageLayout {
    /// 1-based page number.
    pub number: u32,
    pub runs: Vec<TextRun>,
    pub images: Vec<BoundingBox>,
}

impl PageLayout {
    pub fn new(number: u32) -> Self {
        Self {
            number,
            ..Default::default()
        }
    }

    /// Group runs into lines, top of the page first.
    pub fn lines(&self) -> Vec<TextLine> {
        let mut runs: Vec<&TextRun> = self.runs.iter().collect();
        runs.sort_by(|a, b| b.y.total_cmp(&a.y).then(a.x.total_cmp(&b.x)));

        let mut lines: Vec<TextLine> = Vec::new();
        for run in runs {
            match lines.last_mut() {
                Some(line) if (line.y - run.y).abs() <= run.font_size.max(1.0) * LINE_TOLERANCE => {
                    line.runs.push(run.clone());
                }
                _ => lines.push(TextLine {
                    y: run.y,
                    runs: vec![run.clone()],
                }),
            }
        }
        for line in &mut lines {
            line.runs.sort_by(|a, b| a.x.total_cmp(&b.x));
        }
        lines
    }

    /// Group lines into blocks separated by vertical whitespace, followed by
    /// one block per image placement.
    pub fn blocks(&self) -> Vec<LayoutBlock> {
        let mut blocks = Vec::new();
        let mut current: Vec<TextLine> = Vec::new();

        for line in self.lines() {
            if current.last().is_some_and(|prev| is_block_break(prev, &line)) {
                blocks.push(LayoutBlock::from_lines(&current));
                current.clear();
            }
            current.push(line);
        }
        if !current.is_empty() {
            blocks.push(LayoutBlock::from_lines(&current));
        }

        blocks.extend(self.images.iter().copied().map(LayoutBlock::image));
        blocks
    }
}

/// Separates consecutive lines that belong to different blocks.
pub(crate) fn is_block_break(prev: &TextLine, next: &TextLine) -> bool {
    prev.y - next.y > prev.font_size().max(1.0) * BLOCK_GAP
}

// ---------------------------------------------------------------------------
// LayoutSource
// ---------------------------------------------------------------------------

/// Reads page layouts from a document on disk.
///
/// Called from a blocking thread; implementations may do synchronous I/O.
pub trait LayoutSource: Send + Sync {
    fn read_pages(&self, path: &Path) -> Result<Vec<PageLayout>>;
}

/// Layout reader backed by `lopdf`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LopdfSource;

impl LayoutSource for LopdfSource {
    fn read_pages(&self, path: &Path) -> Result<Vec<PageLayout>> {
        let doc = Document::load(path)
            .map_err(|e| RuleVaultError::extraction(path, format!("failed to open PDF: {e}")))?;

        let mut pages = Vec::new();
        for (number, page_id) in doc.get_pages() {
            let page = read_page(&doc, page_id, number).map_err(|e| {
                RuleVaultError::extraction(path, format!("failed to read page {number}: {e}"))
            })?;
            pages.push(page);
        }

        tracing::debug!(pages = pages.len(), "read page layouts");
        Ok(pages)
    }
}

// ---------------------------------------------------------------------------
// Content stream walker
// ---------------------------------------------------------------------------

/// Affine transform `[a b c d e f]` in PDF row-vector convention.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Matrix([f32; 6]);

impl Matrix {
    const IDENTITY: Matrix = Matrix([1.0, 0.0, 0.0, 1.0, 0.0, 0.0]);

    fn translate(tx: f32, ty: f32) -> Matrix {
        Matrix([1.0, 0.0, 0.0, 1.0, tx, ty])
    }

    /// `self × other`: apply `self` first, then `other`.
    fn then(&self, other: &Matrix) -> Matrix {
        let [a1, b1, c1, d1, e1, f1] = self.0;
        let [a2, b2, c2, d2, e2, f2] = other.0;
        Matrix([
            a1 * a2 + b1 * c2,
            a1 * b2 + b1 * d2,
            c1 * a2 + d1 * c2,
            c1 * b2 + d1 * d2,
            e1 * a2 + f1 * c2 + e2,
            e1 * b2 + f1 * d2 + f2,
        ])
    }

    fn vertical_scale(&self) -> f32 {
        let [_, b, _, d, _, _] = self.0;
        (b * b + d * d).sqrt()
    }
}

struct FontInfo<'a> {
    encoding: Option<Encoding<'a>>,
    bold: bool,
}

impl FontInfo<'_> {
    fn decode(&self, bytes: &[u8]) -> String {
        self.encoding
            .as_ref()
            .and_then(|enc| Document::decode_text(enc, bytes).ok())
            .unwrap_or_else(|| String::from_utf8_lossy(bytes).into_owned())
    }
}

fn page_fonts(doc: &Document, page_id: ObjectId) -> HashMap<Vec<u8>, FontInfo<'_>> {
    let fonts = doc.get_page_fonts(page_id).unwrap_or_default();
    fonts
        .into_iter()
        .map(|(name, font)| {
            let encoding = if font.type_is(b"Font") {
                font.get_font_encoding(doc).ok()
            } else {
                None
            };
            let bold = font
                .get(b"BaseFont")
                .and_then(Object::as_name)
                .map(|base| {
                    let base = String::from_utf8_lossy(base);
                    ["Bold", "Black", "Heavy"].iter().any(|w| base.contains(w))
                })
                .unwrap_or(false);
            (name, FontInfo { encoding, bold })
        })
        .collect()
}

fn image_xobject_names(doc: &Document, page_id: ObjectId) -> HashSet<Vec<u8>> {
    let mut names = HashSet::new();
    let Ok((direct, inherited)) = doc.get_page_resources(page_id) else {
        return names;
    };

    let dicts = direct
        .into_iter()
        .chain(inherited.iter().filter_map(|id| doc.get_dictionary(*id).ok()));
    for resources in dicts {
        let Ok(xobjects) = resources.get_deref(b"XObject", doc).and_then(Object::as_dict) else {
            continue;
        };
        for (name, value) in xobjects.iter() {
            let is_image = doc
                .dereference(value)
                .ok()
                .and_then(|(_, obj)| obj.as_stream().ok())
                .and_then(|stream| stream.dict.get(b"Subtype").and_then(Object::as_name).ok())
                .is_some_and(|subtype| subtype == b"Image".as_slice());
            if is_image {
                names.insert(name.clone());
            }
        }
    }
    names
}

/// Graphics and text state needed to place text.
struct Walker<'a> {
    fonts: &'a HashMap<Vec<u8>, FontInfo<'a>>,
    ctm: Matrix,
    ctm_stack: Vec<Matrix>,
    tm: Matrix,
    tlm: Matrix,
    leading: f32,
    font_size: f32,
    font: Option<Vec<u8>>,
    page: PageLayout,
}

impl<'a> Walker<'a> {
    fn new(fonts: &'a HashMap<Vec<u8>, FontInfo<'a>>, number: u32) -> Self {
        Self {
            fonts,
            ctm: Matrix::IDENTITY,
            ctm_stack: Vec::new(),
            tm: Matrix::IDENTITY,
            tlm: Matrix::IDENTITY,
            leading: 0.0,
            font_size: 0.0,
            font: None,
            page: PageLayout::new(number),
        }
    }

    fn move_line(&mut self, tx: f32, ty: f32) {
        self.tlm = Matrix::translate(tx, ty).then(&self.tlm);
        self.tm = self.tlm;
    }

    fn font_info(&self) -> Option<&FontInfo<'a>> {
        self.font.as_ref().and_then(|name| self.fonts.get(name))
    }

    fn decode(&self, bytes: &[u8]) -> String {
        match self.font_info() {
            Some(font) => font.decode(bytes),
            None => String::from_utf8_lossy(bytes).into_owned(),
        }
    }

    /// Record `text` at the current text position, then advance past it.
    fn show(&mut self, text: String, extra_advance: f32) {
        let placed = self.tm.then(&self.ctm);
        let [_, _, _, _, x, y] = placed.0;
        let advance = estimated_width(&text, self.font_size) + extra_advance;

        if !text.trim().is_empty() {
            let mut run = TextRun::new(text, x, y, self.font_size * placed.vertical_scale());
            run.bold = self.font_info().is_some_and(|f| f.bold);
            self.page.runs.push(run);
        }

        self.tm = Matrix::translate(advance, 0.0).then(&self.tm);
    }

    fn show_array(&mut self, items: &[Object]) {
        let mut text = String::new();
        let mut adjust = 0.0;
        for item in items {
            match item {
                Object::String(bytes, _) => text.push_str(&self.decode(bytes)),
                other => {
                    if let Ok(n) = other.as_float() {
                        if n < TJ_SPACE_THRESHOLD && !text.ends_with(' ') {
                            text.push(' ');
                        }
                        adjust -= n / 1000.0 * self.font_size;
                    }
                }
            }
        }
        self.show(text, adjust);
    }

    fn apply(&mut self, operator: &str, operands: &[Object], image_names: &HashSet<Vec<u8>>) {
        let num = |i: usize| operands.get(i).and_then(|o| o.as_float().ok()).unwrap_or(0.0);
        let matrix = || Matrix([num(0), num(1), num(2), num(3), num(4), num(5)]);

        match operator {
            "q" => self.ctm_stack.push(self.ctm),
            "Q" => {
                if let Some(ctm) = self.ctm_stack.pop() {
                    self.ctm = ctm;
                }
            }
            "cm" => self.ctm = matrix().then(&self.ctm),
            "BT" => {
                self.tm = Matrix::IDENTITY;
                self.tlm = Matrix::IDENTITY;
            }
            "Tf" => {
                self.font = operands.first().and_then(|o| o.as_name().ok()).map(<[u8]>::to_vec);
                self.font_size = num(1);
            }
            "TL" => self.leading = num(0),
            "Td" => self.move_line(num(0), num(1)),
            "TD" => {
                self.leading = -num(1);
                self.move_line(num(0), num(1));
            }
            "Tm" => {
                self.tlm = matrix();
                self.tm = self.tlm;
            }
            "T*" => self.move_line(0.0, -self.leading),
            "Tj" | "'" | "\"" => {
                if operator != "Tj" {
                    self.move_line(0.0, -self.leading);
                }
                let string_at = if operator == "\"" { 2 } else { 0 };
                if let Some(Object::String(bytes, _)) = operands.get(string_at) {
                    let text = self.decode(bytes);
                    self.show(text, 0.0);
                }
            }
            "TJ" => {
                if let Some(Object::Array(items)) = operands.first() {
                    self.show_array(items);
                }
            }
            "Do" => {
                let is_image = operands
                    .first()
                    .and_then(|o| o.as_name().ok())
                    .is_some_and(|name| image_names.contains(name));
                if is_image {
                    let [a, _, _, d, e, f] = self.ctm.0;
                    self.page.images.push(BoundingBox {
                        x0: e.min(e + a),
                        y0: f.min(f + d),
                        x1: e.max(e + a),
                        y1: f.max(f + d),
                    });
                }
            }
            _ => {}
        }
    }
}

fn read_page(doc: &Document, page_id: ObjectId, number: u32) -> lopdf::Result<PageLayout> {
    let data = doc.get_page_content(page_id)?;
    let content = Content::decode(&data)?;
    let fonts = page_fonts(doc, page_id);
    let image_names = image_xobject_names(doc, page_id);

    let mut walker = Walker::new(&fonts, number);
    for op in &content.operations {
        walker.apply(&op.operator, &op.operands, &image_names);
    }
    Ok(walker.page)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{placed, temp_pdf_path, write_pdf};

    #[test]
    fn runs_on_one_baseline_form_a_line() {
        let mut page = PageLayout::new(1);
        page.runs.push(TextRun::new("Damage", 200.0, 700.0, 10.0));
        page.runs.push(TextRun::new("Weapon", 72.0, 700.5, 10.0));
        page.runs.push(TextRun::new("Dagger", 72.0, 688.0, 10.0));

        let lines = page.lines();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].cells(), vec!["Weapon", "Damage"]);
        assert_eq!(lines[1].text(), "Dagger");
    }

    #[test]
    fn adjacent_runs_share_a_cell() {
        let line = TextLine {
            y: 700.0,
            runs: vec![
                TextRun::new("Magic", 72.0, 700.0, 10.0),
                // "Magic" ends at 97.0; a small gap reads as a word break.
                TextRun::new("Missile", 100.0, 700.0, 10.0),
            ],
        };
        assert_eq!(line.cells(), vec!["Magic Missile"]);
    }

    #[test]
    fn vertical_gap_splits_blocks() {
        let mut page = PageLayout::new(1);
        page.runs.push(TextRun::new("First paragraph line", 72.0, 700.0, 10.0));
        page.runs.push(TextRun::new("continues here", 72.0, 688.0, 10.0));
        page.runs.push(TextRun::new("Second paragraph", 72.0, 640.0, 10.0));
        page.images.push(BoundingBox { x0: 0.0, y0: 0.0, x1: 10.0, y1: 10.0 });

        let blocks = page.blocks();
        assert_eq!(blocks.len(), 3);
        assert_eq!(blocks[0].text, "First paragraph line\ncontinues here");
        assert_eq!(blocks[1].text, "Second paragraph");
        assert_eq!(blocks[2].kind, BlockKind::Image);
    }

    #[test]
    fn matrix_composition_translates() {
        let m = Matrix::translate(10.0, 5.0).then(&Matrix([2.0, 0.0, 0.0, 2.0, 0.0, 0.0]));
        assert_eq!(m.0, [2.0, 0.0, 0.0, 2.0, 20.0, 10.0]);
        assert!((m.vertical_scale() - 2.0).abs() < f32::EPSILON);
    }

    #[test]
    fn lopdf_source_reads_text_positions() {
        let path = temp_pdf_path();
        let mut heading = placed("FIREBALL", 72, 700, 14);
        heading.bold = true;
        write_pdf(&path, 792, &[heading, placed("A bright streak", 72, 680, 10)]).expect("write pdf");

        let pages = LopdfSource.read_pages(&path).expect("read pdf");
        let _ = std::fs::remove_file(&path);

        assert_eq!(pages.len(), 1);
        let page = &pages[0];
        assert_eq!(page.number, 1);
        assert_eq!(page.runs.len(), 2);
        assert_eq!(page.runs[0].text, "FIREBALL");
        assert!(page.runs[0].bold);
        assert!((page.runs[0].x - 72.0).abs() < 0.01);
        assert!((page.runs[0].y - 700.0).abs() < 0.01);
        assert!((page.runs[0].font_size - 14.0).abs() < 0.01);
        assert!(!page.runs[1].bold);
    }

    #[test]
    fn missing_file_is_extraction_error() {
        let err = LopdfSource
            .read_pages(Path::new("/nonexistent/rulebook.pdf"))
            .unwrap_err();
        assert!(matches!(err, RuleVaultError::Extraction { .. }));
    }
}
