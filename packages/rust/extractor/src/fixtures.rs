//! Builds small single-page PDFs for extraction tests.

use std::path::Path;

use lopdf::content::{Content, Operation};
use lopdf::{Document, Object, Stream, dictionary};

/// One line of text placed at `(x, y)`.
#[derive(Debug, Clone)]
pub struct Placed<'a> {
    pub text: &'a str,
    pub x: i64,
    pub y: i64,
    pub size: i64,
    pub bold: bool,
}

pub fn placed(text: &str, x: i64, y: i64, size: i64) -> Placed<'_> {
    Placed {
        text,
        x,
        y,
        size,
        bold: false,
    }
}

/// Write a one-page PDF of the given height with every item in its own text object.
pub fn write_pdf(path: &Path, height: i64, items: &[Placed<'_>]) -> lopdf::Result<()> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let regular = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Courier",
        "Encoding" => "WinAnsiEncoding",
    });
    let bold = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Courier-Bold",
        "Encoding" => "WinAnsiEncoding",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! {
            "F1" => regular,
            "F2" => bold,
        },
    });

    let mut operations = Vec::with_capacity(items.len() * 5);
    for item in items {
        let font = if item.bold { "F2" } else { "F1" };
        operations.push(Operation::new("BT", vec![]));
        operations.push(Operation::new("Tf", vec![font.into(), item.size.into()]));
        operations.push(Operation::new("Td", vec![item.x.into(), item.y.into()]));
        operations.push(Operation::new("Tj", vec![Object::string_literal(item.text)]));
        operations.push(Operation::new("ET", vec![]));
    }
    let content = Content { operations };
    let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode()?));

    let page_id = doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "Contents" => content_id,
    });
    let pages = dictionary! {
        "Type" => "Pages",
        "Kids" => vec![page_id.into()],
        "Count" => 1,
        "Resources" => resources_id,
        "MediaBox" => vec![0.into(), 0.into(), 612.into(), height.into()],
    };
    doc.objects.insert(pages_id, Object::Dictionary(pages));
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    doc.save(path)?;
    Ok(())
}

/// A fresh path under the system temp directory.
#[cfg(test)]
pub fn temp_pdf_path() -> std::path::PathBuf {
    std::env::temp_dir().join(format!("rv_test_{}.pdf", uuid::Uuid::now_v7()))
}
