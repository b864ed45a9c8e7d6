use std::io::Write;

use chrono::{DateTime, Utc};
use flate2::write::ZlibEncoder;
use flate2::Compression;
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Dictionary, Document, Object, ObjectId, Stream, StringFormat};
use serde::Serialize;

use crate::error::{SignError, SignResult};
use crate::features::envelope::ValidatedImage;
use crate::features::placement::{PlacementSpec, Rect};
use crate::i18n;

const FALLBACK_PAGE_SIZE: (f64, f64) = (595.0, 842.0);
const CAPTION_SIZE: f64 = 8.0;
const MARKER_SIZE: f64 = 12.0;
const SIGNED_LINE_SIZE: f64 = 10.0;

const GREY: [f64; 3] = [0.5, 0.5, 0.5];
const GREEN: [f64; 3] = [0.0, 0.5, 0.0];
const FRAME_FILL: [f64; 3] = [1.0, 1.0, 0.9];
const FRAME_BORDER: [f64; 3] = [0.0, 0.0, 1.0];

const PRODUCER: &str = "signpad_core";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SignatureMode {
    Image,
    Text,
    CopyThrough,
}

#[derive(Debug, Clone)]
pub struct ComposedPdf {
    pub bytes: Vec<u8>,
    pub mode: SignatureMode,
    pub page_count: u32,
    pub placement: PlacementSpec,
    /// Why the image path was not taken, when a signature was supplied.
    pub fallback_reason: Option<String>,
}

/// Serializes a finished document. Split out so the save step can fail on
/// its own without touching the rest of the pipeline.
pub trait PdfWriter: Send + Sync {
    fn write(&self, doc: &mut Document) -> SignResult<Vec<u8>>;
}

pub struct MemoryWriter;

impl PdfWriter for MemoryWriter {
    fn write(&self, doc: &mut Document) -> SignResult<Vec<u8>> {
        let mut buffer = Vec::new();
        doc.save_to(&mut buffer)
            .map_err(|e| SignError::SerializationFailure(e.to_string()))?;
        Ok(buffer)
    }
}

/// Stamps the signature, or the text fallback, onto the first page.
pub fn compose(
    pdf_bytes: &[u8],
    signature: Option<&ValidatedImage>,
    signed_at: &DateTime<Utc>,
    locale: &str,
    writer: &dyn PdfWriter,
) -> SignResult<ComposedPdf> {
    let mut doc = load_document(pdf_bytes)?;
    let pages = doc.get_pages();
    let page_count = pages.len() as u32;
    let page_id = *pages.values().next().ok_or(SignError::EmptyDocument)?;

    let (width, height) = page_dimensions(&doc, page_id)?;
    let placement = PlacementSpec::for_page(width, height);
    log::info!(
        "pdf: {} page(s), first page {}x{}, anchor ({}, {})",
        page_count,
        width,
        height,
        placement.anchor_x,
        placement.anchor_y
    );

    isolate_existing_contents(&mut doc, page_id)?;

    let mut fallback_reason = None;
    let mode = match signature {
        Some(image) => {
            let snapshot = PageSnapshot::take(&doc, page_id)?;
            match embed_signature_image(&mut doc, page_id, &placement, image, signed_at, locale) {
                Ok(()) => SignatureMode::Image,
                Err(e) => {
                    log::warn!("pdf: image path failed, drawing text signature: {e}");
                    snapshot.restore(&mut doc);
                    fallback_reason = Some(e.to_string());
                    draw_text_signature(&mut doc, page_id, &placement, signed_at, locale)?;
                    SignatureMode::Text
                }
            }
        }
        None => {
            log::info!("pdf: no usable signature image, drawing text signature");
            draw_text_signature(&mut doc, page_id, &placement, signed_at, locale)?;
            SignatureMode::Text
        }
    };

    stamp_info(&mut doc, signed_at)?;
    let bytes = writer.write(&mut doc)?;
    Ok(ComposedPdf {
        bytes,
        mode,
        page_count,
        placement,
        fallback_reason,
    })
}

pub fn load_document(bytes: &[u8]) -> SignResult<Document> {
    Document::load_mem(bytes).map_err(|e| SignError::InvalidDocument(e.to_string()))
}

/// Page count without composing anything; `None` if the bytes do not parse.
pub fn page_count(bytes: &[u8]) -> Option<u32> {
    load_document(bytes).ok().map(|doc| doc.get_pages().len() as u32)
}

/// The page objects an embedding attempt can modify, plus the object id
/// high-water mark, so a failed attempt leaves nothing behind.
struct PageSnapshot {
    max_id: u32,
    saved: Vec<(ObjectId, Object)>,
}

impl PageSnapshot {
    fn take(doc: &Document, page_id: ObjectId) -> SignResult<Self> {
        let page = page_dict(doc, page_id)?;
        let mut saved = vec![(page_id, Object::Dictionary(page.clone()))];
        if let Ok(Object::Reference(res_id)) = page.get(b"Resources") {
            if let Ok(shared) = doc.get_object(*res_id) {
                saved.push((*res_id, shared.clone()));
            }
        }
        Ok(Self {
            max_id: doc.max_id,
            saved,
        })
    }

    fn restore(self, doc: &mut Document) {
        let max_id = self.max_id;
        doc.objects.retain(|id, _| id.0 <= max_id);
        doc.max_id = max_id;
        for (id, object) in self.saved {
            doc.objects.insert(id, object);
        }
    }
}

fn embed_signature_image(
    doc: &mut Document,
    page_id: ObjectId,
    placement: &PlacementSpec,
    signature: &ValidatedImage,
    signed_at: &DateTime<Utc>,
    locale: &str,
) -> SignResult<()> {
    let img = image::load_from_memory(&signature.bytes)
        .map_err(|e| SignError::EmbedFailure(format!("image_decode_failed:{e}")))?
        .to_rgba8();
    let (img_w, img_h) = img.dimensions();
    if img_w == 0 || img_h == 0 {
        return Err(SignError::EmbedFailure("image_empty".into()));
    }
    let mut rgb = Vec::with_capacity((img_w * img_h * 3) as usize);
    let mut alpha = Vec::with_capacity((img_w * img_h) as usize);
    for pixel in img.pixels() {
        rgb.push(pixel[0]);
        rgb.push(pixel[1]);
        rgb.push(pixel[2]);
        alpha.push(pixel[3]);
    }

    let mut image_dict = dictionary! {
        "Type" => "XObject",
        "Subtype" => "Image",
        "Width" => img_w as i64,
        "Height" => img_h as i64,
        "ColorSpace" => "DeviceRGB",
        "BitsPerComponent" => 8,
        "Filter" => "FlateDecode",
    };
    if alpha.iter().any(|a| *a != u8::MAX) {
        let smask_stream = Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => img_w as i64,
                "Height" => img_h as i64,
                "ColorSpace" => "DeviceGray",
                "BitsPerComponent" => 8,
                "Filter" => "FlateDecode",
            },
            deflate(&alpha)?,
        );
        let smask_id = doc.add_object(smask_stream);
        image_dict.set("SMask", smask_id);
    }
    let image_id = doc.add_object(Stream::new(image_dict, deflate(&rgb)?));
    let image_name = register_resource(doc, page_id, b"XObject", "SigImg", Object::Reference(image_id))
        .map_err(as_embed_failure)?;
    let font_name = register_font(doc, page_id).map_err(as_embed_failure)?;

    let [signed_on, time] = i18n::image_captions(signed_at, locale);
    let [first, second] = placement.caption_baselines();
    let image_box = placement.image_box;

    let mut ops = Vec::new();
    ops.push(Operation::new("q", vec![]));
    push_color(&mut ops, "rg", FRAME_FILL);
    push_color(&mut ops, "RG", FRAME_BORDER);
    ops.push(Operation::new("w", vec![real(1.0)]));
    push_rect(&mut ops, &placement.frame_box);
    ops.push(Operation::new("B", vec![]));
    ops.push(Operation::new("Q", vec![]));

    ops.push(Operation::new("q", vec![]));
    ops.push(Operation::new(
        "cm",
        vec![
            real(image_box.width),
            real(0.0),
            real(0.0),
            real(image_box.height),
            real(image_box.x),
            real(image_box.y),
        ],
    ));
    ops.push(Operation::new("Do", vec![Object::Name(image_name.into_bytes())]));
    ops.push(Operation::new("Q", vec![]));

    push_text(&mut ops, &font_name, CAPTION_SIZE, GREY, placement.anchor_x, first, &signed_on);
    push_text(&mut ops, &font_name, CAPTION_SIZE, GREY, placement.anchor_x, second, &time);

    append_operations(doc, page_id, ops).map_err(as_embed_failure)?;
    log::info!(
        "pdf: embedded {}x{} signature image at ({}, {})",
        img_w,
        img_h,
        image_box.x,
        image_box.y
    );
    Ok(())
}

fn draw_text_signature(
    doc: &mut Document,
    page_id: ObjectId,
    placement: &PlacementSpec,
    signed_at: &DateTime<Utc>,
    locale: &str,
) -> SignResult<()> {
    let font_name = register_font(doc, page_id)?;
    let [marker, signed, time] = i18n::fallback_lines(signed_at, locale);
    let [b0, b1, b2] = placement.fallback_baselines();
    let x = placement.anchor_x;

    let mut ops = Vec::new();
    push_text(&mut ops, &font_name, MARKER_SIZE, GREEN, x, b0, &marker);
    push_text(&mut ops, &font_name, SIGNED_LINE_SIZE, GREY, x, b1, &signed);
    push_text(&mut ops, &font_name, CAPTION_SIZE, GREY, x, b2, &time);
    append_operations(doc, page_id, ops)
}

fn as_embed_failure(err: SignError) -> SignError {
    match err {
        SignError::EmbedFailure(_) => err,
        other => SignError::EmbedFailure(other.to_string()),
    }
}

fn deflate(data: &[u8]) -> SignResult<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(data)
        .map_err(|e| SignError::EmbedFailure(format!("deflate_failed:{e}")))?;
    encoder
        .finish()
        .map_err(|e| SignError::EmbedFailure(format!("deflate_failed:{e}")))
}

fn real(value: f64) -> Object {
    Object::Real(value as f32)
}

fn push_color(ops: &mut Vec<Operation>, operator: &str, rgb: [f64; 3]) {
    ops.push(Operation::new(operator, rgb.iter().map(|c| real(*c)).collect()));
}

fn push_rect(ops: &mut Vec<Operation>, rect: &Rect) {
    ops.push(Operation::new(
        "re",
        vec![real(rect.x), real(rect.y), real(rect.width), real(rect.height)],
    ));
}

fn push_text(
    ops: &mut Vec<Operation>,
    font: &str,
    size: f64,
    rgb: [f64; 3],
    x: f64,
    y: f64,
    text: &str,
) {
    ops.push(Operation::new("q", vec![]));
    ops.push(Operation::new("BT", vec![]));
    ops.push(Operation::new("Tf", vec![Object::Name(font.as_bytes().to_vec()), real(size)]));
    push_color(ops, "rg", rgb);
    ops.push(Operation::new("Td", vec![real(x), real(y)]));
    ops.push(Operation::new(
        "Tj",
        vec![Object::String(win_ansi(text), StringFormat::Literal)],
    ));
    ops.push(Operation::new("ET", vec![]));
    ops.push(Operation::new("Q", vec![]));
}

/// Standard fonts are declared WinAnsi; Latin-1 maps straight across, the rest becomes '?'.
fn win_ansi(text: &str) -> Vec<u8> {
    text.chars()
        .map(|c| match c as u32 {
            0x20..=0x7e | 0xa0..=0xff => c as u32 as u8,
            _ => b'?',
        })
        .collect()
}

fn append_operations(doc: &mut Document, page_id: ObjectId, operations: Vec<Operation>) -> SignResult<()> {
    let content = Content { operations }
        .encode()
        .map_err(|e| SignError::EmbedFailure(format!("content_encode_failed:{e}")))?;
    doc.add_page_contents(page_id, content)
        .map_err(|e| SignError::EmbedFailure(format!("add_content_failed:{e}")))
}

/// Wraps whatever the page already draws in `q ... Q` so graphics state it
/// leaves behind cannot shift the signature.
fn isolate_existing_contents(doc: &mut Document, page_id: ObjectId) -> SignResult<()> {
    let existing = page_dict(doc, page_id)?.get(b"Contents").ok().cloned();
    let mut parts = match existing {
        None => return Ok(()),
        Some(Object::Array(items)) => items,
        Some(Object::Reference(id)) => match doc.get_object(id) {
            Ok(Object::Array(items)) => items.clone(),
            _ => vec![Object::Reference(id)],
        },
        Some(_) => return Err(SignError::InvalidDocument("page_contents_invalid".into())),
    };
    if parts.is_empty() {
        return Ok(());
    }
    let open = doc.add_object(Stream::new(Dictionary::new(), b"q\n".to_vec()));
    let close = doc.add_object(Stream::new(Dictionary::new(), b"\nQ\n".to_vec()));
    parts.insert(0, Object::Reference(open));
    parts.push(Object::Reference(close));
    page_dict_mut(doc, page_id)?.set("Contents", Object::Array(parts));
    Ok(())
}

fn register_font(doc: &mut Document, page_id: ObjectId) -> SignResult<String> {
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
        "Encoding" => "WinAnsiEncoding",
    });
    register_resource(doc, page_id, b"Font", "SigHelv", Object::Reference(font_id))
}

/// Adds `value` under a fresh name in the page's `category` resources
/// (`Font`, `XObject`, ...) and returns that name.
fn register_resource(
    doc: &mut Document,
    page_id: ObjectId,
    category: &[u8],
    prefix: &str,
    value: Object,
) -> SignResult<String> {
    let mut entries = {
        let resources = resolved_resources(doc, page_id)?;
        match resources.get(category) {
            Ok(Object::Dictionary(dict)) => dict.clone(),
            Ok(Object::Reference(id)) => doc
                .get_object(*id)
                .and_then(Object::as_dict)
                .cloned()
                .unwrap_or_else(|_| Dictionary::new()),
            _ => Dictionary::new(),
        }
    };
    let mut name = prefix.to_string();
    let mut n = 1;
    while entries.has(name.as_bytes()) {
        n += 1;
        name = format!("{prefix}{n}");
    }
    entries.set(name.clone(), value);
    page_resources_mut(doc, page_id)?.set(category.to_vec(), Object::Dictionary(entries));
    Ok(name)
}

/// The effective resources of a page, following `Parent` when the page has none.
fn resolved_resources(doc: &Document, page_id: ObjectId) -> SignResult<Dictionary> {
    let mut current = Some(page_id);
    while let Some(id) = current {
        let dict = page_dict(doc, id)?;
        match dict.get(b"Resources") {
            Ok(Object::Dictionary(res)) => return Ok(res.clone()),
            Ok(Object::Reference(res_id)) => {
                return doc
                    .get_object(*res_id)
                    .and_then(Object::as_dict)
                    .cloned()
                    .map_err(|_| SignError::EmbedFailure("resources_missing_dict".into()));
            }
            Ok(_) => return Err(SignError::EmbedFailure("resources_invalid".into())),
            Err(_) => {}
        }
        current = dict.get(b"Parent").and_then(Object::as_reference).ok();
    }
    Ok(Dictionary::new())
}

fn page_resources_mut(doc: &mut Document, page_id: ObjectId) -> SignResult<&mut Dictionary> {
    let shared = match page_dict(doc, page_id)?.get(b"Resources") {
        Ok(Object::Reference(id)) => Some(*id),
        Ok(Object::Dictionary(_)) => None,
        Ok(_) => return Err(SignError::EmbedFailure("resources_invalid".into())),
        Err(_) => {
            let inherited = resolved_resources(doc, page_id)?;
            page_dict_mut(doc, page_id)?.set("Resources", Object::Dictionary(inherited));
            None
        }
    };
    match shared {
        Some(id) => doc
            .get_object_mut(id)
            .and_then(Object::as_dict_mut)
            .map_err(|_| SignError::EmbedFailure("resources_missing_dict".into())),
        None => page_dict_mut(doc, page_id)?
            .get_mut(b"Resources")
            .and_then(Object::as_dict_mut)
            .map_err(|_| SignError::EmbedFailure("resources_missing_dict".into())),
    }
}

fn page_dict(doc: &Document, page_id: ObjectId) -> SignResult<&Dictionary> {
    doc.get_object(page_id)
        .and_then(Object::as_dict)
        .map_err(|_| SignError::InvalidDocument("page_missing_dict".into()))
}

fn page_dict_mut(doc: &mut Document, page_id: ObjectId) -> SignResult<&mut Dictionary> {
    doc.get_object_mut(page_id)
        .and_then(Object::as_dict_mut)
        .map_err(|_| SignError::InvalidDocument("page_missing_dict".into()))
}

fn page_dimensions(doc: &Document, page_id: ObjectId) -> SignResult<(f64, f64)> {
    let mut current = Some(page_id);
    while let Some(id) = current {
        let dict = page_dict(doc, id)?;
        if let Some((w, h)) = extract_media_box(doc, dict) {
            return Ok((w, h));
        }
        current = dict.get(b"Parent").and_then(Object::as_reference).ok();
    }
    log::warn!("pdf: first page has no MediaBox, assuming A4");
    Ok(FALLBACK_PAGE_SIZE)
}

fn extract_media_box(doc: &Document, dict: &Dictionary) -> Option<(f64, f64)> {
    let raw = dict.get(b"MediaBox").ok()?;
    let resolved = match raw {
        Object::Reference(id) => doc.get_object(*id).ok()?,
        other => other,
    };
    let arr = resolved.as_array().ok()?;
    if arr.len() != 4 {
        return None;
    }
    let llx = obj_to_f64(&arr[0])?;
    let lly = obj_to_f64(&arr[1])?;
    let urx = obj_to_f64(&arr[2])?;
    let ury = obj_to_f64(&arr[3])?;
    Some(((urx - llx).abs(), (ury - lly).abs()))
}

pub(crate) fn obj_to_f64(obj: &Object) -> Option<f64> {
    match obj {
        Object::Integer(i) => Some(*i as f64),
        Object::Real(f) => Some((*f).into()),
        _ => None,
    }
}

/// Records the modification in the document info dictionary.
fn stamp_info(doc: &mut Document, signed_at: &DateTime<Utc>) -> SignResult<()> {
    let info_id = match doc.trailer.get(b"Info").and_then(Object::as_reference) {
        Ok(id) => id,
        Err(_) => {
            let new_info = doc.add_object(Object::Dictionary(Dictionary::new()));
            doc.trailer.set("Info", new_info);
            new_info
        }
    };
    let stamp = signed_at.format("D:%Y%m%d%H%M%SZ").to_string();
    let info = doc
        .get_object_mut(info_id)
        .and_then(Object::as_dict_mut)
        .map_err(|_| SignError::SerializationFailure("pdf_info_missing_dict".into()))?;
    info.set("ModDate", Object::String(stamp.into_bytes(), StringFormat::Literal));
    info.set("Producer", Object::string_literal(PRODUCER));
    Ok(())
}
