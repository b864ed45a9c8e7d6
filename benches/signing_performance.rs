// Capture export and page composition timings
// Run with: cargo bench --bench signing_performance

use chrono::Utc;
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, Stream};
use signpad_core::features::capture::{CaptureSurface, PointerId, SurfaceGeometry};
use signpad_core::features::envelope::validate_signature;
use signpad_core::features::pdf::{compose, MemoryWriter};

fn letter_pdf(pages: usize) -> Vec<u8> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let mut kids = Vec::new();
    for _ in 0..pages {
        let content = Content {
            operations: vec![
                Operation::new("BT", vec![]),
                Operation::new("Td", vec![50.into(), 700.into()]),
                Operation::new("ET", vec![]),
            ],
        };
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode().unwrap()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
            "Contents" => content_id,
        });
        kids.push(Object::Reference(page_id));
    }
    let count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! { "Type" => "Pages", "Kids" => kids, "Count" => count }),
    );
    let catalog_id = doc.add_object(dictionary! { "Type" => "Catalog", "Pages" => pages_id });
    doc.trailer.set("Root", catalog_id);
    let mut out = Vec::new();
    doc.save_to(&mut out).unwrap();
    out
}

fn scribbled_surface() -> CaptureSurface {
    let mut surface = CaptureSurface::new(SurfaceGeometry::new(0.0, 0.0, 600.0, 192.0, 2.0));
    surface.begin(PointerId::MOUSE, 10.0, 150.0);
    for i in 0..120 {
        let x = 10.0 + i as f32 * 4.5;
        let y = 96.0 + (i as f32 * 0.3).sin() * 60.0;
        surface.extend(PointerId::MOUSE, x, y);
    }
    surface.end(PointerId::MOUSE);
    surface
}

fn benchmark_capture(c: &mut Criterion) {
    let surface = scribbled_surface();
    c.bench_function("capture_export_png", |b| {
        b.iter(|| black_box(surface.export().unwrap()))
    });
}

fn benchmark_compose(c: &mut Criterion) {
    let pdf = letter_pdf(10);
    let data_url = scribbled_surface().export().unwrap().to_data_url();
    let signature = validate_signature(&data_url).unwrap();
    let now = Utc::now();

    c.bench_function("compose_image_signature", |b| {
        b.iter(|| black_box(compose(&pdf, Some(&signature), &now, "en", &MemoryWriter).unwrap()))
    });
    c.bench_function("compose_text_signature", |b| {
        b.iter(|| black_box(compose(&pdf, None, &now, "en", &MemoryWriter).unwrap()))
    });
}

criterion_group!(benches, benchmark_capture, benchmark_compose);
criterion_main!(benches);
