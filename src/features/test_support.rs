//! Shared fixtures for unit tests.

use std::io::Cursor;

use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine;
use chrono::{DateTime, TimeZone, Utc};
use image::{DynamicImage, ImageOutputFormat, Rgb, RgbImage};
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, Stream};

use crate::error::{SignError, SignResult};
use crate::features::pdf::PdfWriter;

pub fn fixed_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 11, 3, 15, 4, 5).unwrap()
}

/// A document with one page per `(width, height)`. Fonts live on the page
/// tree root so pages inherit them.
pub fn sample_pdf(pages: &[(f64, f64)]) -> Vec<u8> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
    });

    let mut kids = Vec::new();
    for (w, h) in pages {
        let content = Content {
            operations: vec![
                Operation::new("BT", vec![]),
                Operation::new("Tf", vec!["F1".into(), 20.into()]),
                Operation::new("Td", vec![50.into(), 700.into()]),
                Operation::new("Tj", vec![Object::string_literal("Please sign below:")]),
                Operation::new("ET", vec![]),
            ],
        };
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode().unwrap()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "MediaBox" => vec![0.into(), 0.into(), Object::Real(*w as f32), Object::Real(*h as f32)],
            "Contents" => content_id,
        });
        kids.push(Object::Reference(page_id));
    }

    let count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
            "Resources" => dictionary! {
                "Font" => dictionary! { "F1" => font_id },
            },
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut out = Vec::new();
    doc.save_to(&mut out).unwrap();
    out
}

/// A white PNG with a diagonal blue stroke.
pub fn sample_signature_png(width: u32, height: u32) -> Vec<u8> {
    let mut img = RgbImage::from_pixel(width, height, Rgb([255, 255, 255]));
    for i in 0..width.min(height) {
        img.put_pixel(i, i, Rgb([0x1e, 0x40, 0xaf]));
    }
    let mut png = Vec::new();
    DynamicImage::ImageRgb8(img)
        .write_to(&mut Cursor::new(&mut png), ImageOutputFormat::Png)
        .unwrap();
    png
}

pub fn sample_signature_data_url(width: u32, height: u32) -> String {
    format!(
        "data:image/png;base64,{}",
        B64.encode(sample_signature_png(width, height))
    )
}

/// Operations the composer appended to the first page, i.e. everything after
/// the wrapped original content.
pub fn added_operations(original: &[u8], signed: &[u8]) -> Vec<Operation> {
    let first_page_ops = |bytes: &[u8]| {
        let doc = Document::load_mem(bytes).unwrap();
        let page_id = *doc.get_pages().values().next().unwrap();
        Content::decode(&doc.get_page_content(page_id).unwrap())
            .unwrap()
            .operations
    };
    let before = first_page_ops(original).len();
    first_page_ops(signed).into_iter().skip(before + 2).collect()
}

pub struct FailingWriter;

impl PdfWriter for FailingWriter {
    fn write(&self, _doc: &mut Document) -> SignResult<Vec<u8>> {
        Err(SignError::SerializationFailure("disk full".into()))
    }
}
