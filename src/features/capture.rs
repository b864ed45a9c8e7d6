//! Handwritten signature capture.
//!
//! Pointer events arrive in viewport space. They are mapped to surface-local
//! logical coordinates before being recorded, so the exported image looks the
//! same whatever pixel density the capturing device used for its backing store.

use std::io::Cursor;

use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine;
use image::{DynamicImage, ImageOutputFormat, Rgb, RgbImage};
use imageproc::drawing::draw_filled_circle_mut;
use serde::{Deserialize, Serialize};

use crate::error::CaptureError;

pub const STROKE_WIDTH: f32 = 3.0;
pub const STROKE_COLOR: Rgb<u8> = Rgb([0x1e, 0x40, 0xaf]);
pub const BACKGROUND: Rgb<u8> = Rgb([255, 255, 255]);
pub const PNG_DATA_URL_PREFIX: &str = "data:image/png;base64,";

/// Distance between stamped dabs along a segment, in output pixels.
const DAB_SPACING: f32 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StrokePoint {
    pub x: f32,
    pub y: f32,
}

impl StrokePoint {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// Identifies one contact (mouse, pen or a single finger).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PointerId(pub i64);

impl PointerId {
    pub const MOUSE: PointerId = PointerId(0);
}

/// Where the surface sits on screen and how its backing store is sized.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SurfaceGeometry {
    pub offset_x: f32,
    pub offset_y: f32,
    pub display_width: f32,
    pub display_height: f32,
    pub device_pixel_ratio: f32,
    pub backing_width: u32,
    pub backing_height: u32,
}

impl SurfaceGeometry {
    /// Backing store sized as `display * device_pixel_ratio`.
    pub fn new(
        offset_x: f32,
        offset_y: f32,
        display_width: f32,
        display_height: f32,
        device_pixel_ratio: f32,
    ) -> Self {
        let dpr = if device_pixel_ratio.is_finite() && device_pixel_ratio > 0.0 {
            device_pixel_ratio
        } else {
            1.0
        };
        let display_width = display_width.max(1.0);
        let display_height = display_height.max(1.0);
        Self {
            offset_x,
            offset_y,
            display_width,
            display_height,
            device_pixel_ratio: dpr,
            backing_width: (display_width * dpr).round().max(1.0) as u32,
            backing_height: (display_height * dpr).round().max(1.0) as u32,
        }
    }

    pub fn scale_x(&self) -> f32 {
        self.backing_width as f32 / self.display_width
    }

    pub fn scale_y(&self) -> f32 {
        self.backing_height as f32 / self.display_height
    }

    /// Viewport coordinates to logical surface coordinates.
    ///
    /// The offset is removed, the point is scaled into backing pixels by
    /// `backing / display`, then brought back to logical units by the
    /// density the backing store was allocated with. Points off the surface
    /// are pinned to its edge; NaN lands on the origin.
    pub fn to_logical(&self, raw_x: f32, raw_y: f32) -> StrokePoint {
        let x = (raw_x - self.offset_x) * self.scale_x() / self.device_pixel_ratio;
        let y = (raw_y - self.offset_y) * self.scale_y() / self.device_pixel_ratio;
        StrokePoint {
            x: pin(x, self.display_width),
            y: pin(y, self.display_height),
        }
    }

    pub fn logical_size(&self) -> (u32, u32) {
        (
            self.display_width.round().max(1.0) as u32,
            self.display_height.round().max(1.0) as u32,
        )
    }
}

impl Default for SurfaceGeometry {
    /// 600x192 logical pixels, the size of the drawing pad on a desktop layout.
    fn default() -> Self {
        Self::new(0.0, 0.0, 600.0, 192.0, 1.0)
    }
}

/// The encoded result of a capture session.
#[derive(Debug, Clone, PartialEq)]
pub struct SignatureImage {
    pub png: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl SignatureImage {
    pub fn to_data_url(&self) -> String {
        format!("{PNG_DATA_URL_PREFIX}{}", B64.encode(&self.png))
    }
}

#[derive(Debug, Clone)]
struct ActiveStroke {
    pointer: PointerId,
    points: Vec<StrokePoint>,
}

pub struct CaptureSurface {
    geometry: SurfaceGeometry,
    backing: RgbImage,
    strokes: Vec<Vec<StrokePoint>>,
    active: Option<ActiveStroke>,
}

impl CaptureSurface {
    pub fn new(geometry: SurfaceGeometry) -> Self {
        Self {
            backing: blank(geometry.backing_width, geometry.backing_height),
            geometry,
            strokes: Vec::new(),
            active: None,
        }
    }

    pub fn geometry(&self) -> &SurfaceGeometry {
        &self.geometry
    }

    /// The live bitmap at backing resolution.
    pub fn backing(&self) -> &RgbImage {
        &self.backing
    }

    pub fn is_drawing(&self) -> bool {
        self.active.is_some()
    }

    /// True once any stroke has at least one drawn segment.
    pub fn has_ink(&self) -> bool {
        self.strokes.iter().any(|s| s.len() > 1)
            || self.active.as_ref().map_or(false, |a| a.points.len() > 1)
    }

    pub fn stroke_count(&self) -> usize {
        self.strokes.len() + usize::from(self.active.is_some())
    }

    /// Starts a stroke for `pointer`. Ignored while another stroke is active,
    /// which also covers extra fingers landing during a touch.
    pub fn begin(&mut self, pointer: PointerId, raw_x: f32, raw_y: f32) -> bool {
        if self.active.is_some() {
            log::debug!("capture: ignoring begin from {:?}, stroke already active", pointer);
            return false;
        }
        let point = self.geometry.to_logical(raw_x, raw_y);
        self.active = Some(ActiveStroke {
            pointer,
            points: vec![point],
        });
        true
    }

    /// Appends a point to the active stroke and paints the new segment.
    /// Events from any pointer other than the one that began the stroke are dropped.
    pub fn extend(&mut self, pointer: PointerId, raw_x: f32, raw_y: f32) -> bool {
        let point = self.geometry.to_logical(raw_x, raw_y);
        let (sx, sy) = (self.geometry.scale_x(), self.geometry.scale_y());
        let Some(active) = self.active.as_mut() else {
            return false;
        };
        if active.pointer != pointer {
            return false;
        }
        let Some(&prev) = active.points.last() else {
            return false;
        };
        active.points.push(point);
        paint_segment(&mut self.backing, prev, point, sx, sy);
        true
    }

    /// Closes the active stroke. Calling it with no stroke active, or from a
    /// pointer that does not own the stroke, does nothing.
    pub fn end(&mut self, pointer: PointerId) {
        let owned = self.active.as_ref().map_or(false, |a| a.pointer == pointer);
        if !owned {
            return;
        }
        if let Some(active) = self.active.take() {
            // A tap without movement never paints anything.
            if active.points.len() > 1 {
                self.strokes.push(active.points);
            }
        }
    }

    /// Aborts whatever is active, regardless of owner (touch cancel, pointer leave).
    pub fn cancel(&mut self) {
        if let Some(active) = self.active.take() {
            if active.points.len() > 1 {
                self.strokes.push(active.points);
            }
        }
    }

    pub fn clear(&mut self) {
        self.strokes.clear();
        self.active = None;
        self.backing = blank(self.geometry.backing_width, self.geometry.backing_height);
    }

    /// Re-renders every stroke at logical size and encodes it as PNG.
    pub fn export(&self) -> Result<SignatureImage, CaptureError> {
        if !self.has_ink() {
            return Err(CaptureError::EmptyCapture);
        }
        let (width, height) = self.geometry.logical_size();
        let mut out = blank(width, height);
        let active = self.active.iter().map(|a| &a.points);
        for stroke in self.strokes.iter().chain(active) {
            for pair in stroke.windows(2) {
                paint_segment(&mut out, pair[0], pair[1], 1.0, 1.0);
            }
        }

        let mut png = Vec::new();
        DynamicImage::ImageRgb8(out).write_to(&mut Cursor::new(&mut png), ImageOutputFormat::Png)?;
        log::info!(
            "capture: exported {}x{} signature, {} strokes, {} bytes",
            width,
            height,
            self.strokes.len(),
            png.len()
        );
        Ok(SignatureImage { png, width, height })
    }
}

impl Default for CaptureSurface {
    fn default() -> Self {
        Self::new(SurfaceGeometry::default())
    }
}

fn pin(value: f32, max: f32) -> f32 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, max)
    }
}

fn blank(width: u32, height: u32) -> RgbImage {
    RgbImage::from_pixel(width.max(1), height.max(1), BACKGROUND)
}

/// Paints a round-capped segment by stamping discs along it.
fn paint_segment(target: &mut RgbImage, from: StrokePoint, to: StrokePoint, sx: f32, sy: f32) {
    let (x0, y0) = (from.x * sx, from.y * sy);
    let (x1, y1) = (to.x * sx, to.y * sy);
    let radius = ((STROKE_WIDTH * sx.max(sy)) / 2.0).floor().max(1.0) as i32;
    let length = ((x1 - x0).powi(2) + (y1 - y0).powi(2)).sqrt();
    let steps = (length / DAB_SPACING).ceil().max(1.0) as u32;
    for i in 0..=steps {
        let t = i as f32 / steps as f32;
        let cx = (x0 + (x1 - x0) * t).round() as i32;
        let cy = (y0 + (y1 - y0) * t).round() as i32;
        draw_filled_circle_mut(target, (cx, cy), radius, STROKE_COLOR);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::GenericImageView;

    fn geometry(dpr: f32) -> SurfaceGeometry {
        SurfaceGeometry::new(20.0, 100.0, 300.0, 120.0, dpr)
    }

    fn draw_line(surface: &mut CaptureSurface) {
        let pointer = PointerId::MOUSE;
        surface.begin(pointer, 40.0, 140.0);
        surface.extend(pointer, 120.0, 160.0);
        surface.extend(pointer, 200.0, 150.0);
        surface.end(pointer);
    }

    fn ink_pixels(img: &RgbImage) -> usize {
        img.pixels().filter(|p| **p != BACKGROUND).count()
    }

    #[test]
    fn maps_viewport_points_to_logical_space() {
        for dpr in [1.0, 2.0, 3.0] {
            let point = geometry(dpr).to_logical(170.0, 160.0);
            assert!((point.x - 150.0).abs() < 1e-3, "dpr {dpr}: {point:?}");
            assert!((point.y - 60.0).abs() < 1e-3, "dpr {dpr}: {point:?}");
        }
    }

    #[test]
    fn backing_store_scales_with_density() {
        let geo = geometry(2.0);
        assert_eq!((geo.backing_width, geo.backing_height), (600, 240));
        assert_eq!(geo.logical_size(), (300, 120));
        let odd = SurfaceGeometry::new(0.0, 0.0, 100.0, 50.0, f32::NAN);
        assert_eq!(odd.backing_width, 100);
    }

    #[test]
    fn export_without_strokes_fails() {
        let mut surface = CaptureSurface::new(geometry(1.0));
        assert!(matches!(surface.export(), Err(CaptureError::EmptyCapture)));

        draw_line(&mut surface);
        assert!(surface.export().is_ok());

        surface.clear();
        assert!(matches!(surface.export(), Err(CaptureError::EmptyCapture)));
        assert_eq!(ink_pixels(surface.backing()), 0);
    }

    #[test]
    fn tap_without_movement_is_not_ink() {
        let mut surface = CaptureSurface::new(geometry(1.0));
        surface.begin(PointerId::MOUSE, 50.0, 150.0);
        surface.end(PointerId::MOUSE);
        assert!(!surface.has_ink());
        assert_eq!(surface.stroke_count(), 0);
        assert!(matches!(surface.export(), Err(CaptureError::EmptyCapture)));
    }

    #[test]
    fn extend_without_begin_is_ignored() {
        let mut surface = CaptureSurface::new(geometry(1.0));
        assert!(!surface.extend(PointerId::MOUSE, 60.0, 150.0));
        assert_eq!(ink_pixels(surface.backing()), 0);
    }

    #[test]
    fn begin_while_drawing_is_a_no_op() {
        let mut surface = CaptureSurface::new(geometry(1.0));
        assert!(surface.begin(PointerId::MOUSE, 40.0, 140.0));
        assert!(!surface.begin(PointerId::MOUSE, 90.0, 190.0));
        surface.extend(PointerId::MOUSE, 60.0, 140.0);
        surface.end(PointerId::MOUSE);
        surface.end(PointerId::MOUSE);
        assert_eq!(surface.stroke_count(), 1);
        assert!(!surface.is_drawing());
    }

    #[test]
    fn second_touch_is_ignored_until_first_lifts() {
        let first = PointerId(7);
        let second = PointerId(8);
        let mut surface = CaptureSurface::new(geometry(2.0));

        assert!(surface.begin(first, 40.0, 140.0));
        assert!(!surface.begin(second, 250.0, 200.0));
        assert!(!surface.extend(second, 260.0, 210.0));
        assert!(surface.extend(first, 100.0, 150.0));

        // Lifting the ignored finger must not close the owner's stroke.
        surface.end(second);
        assert!(surface.is_drawing());
        surface.end(first);
        assert!(!surface.is_drawing());
        assert_eq!(surface.stroke_count(), 1);

        // Once released, the next contact may draw.
        assert!(surface.begin(second, 40.0, 200.0));
        assert!(surface.extend(second, 80.0, 200.0));
        surface.end(second);
        assert_eq!(surface.stroke_count(), 2);
    }

    #[test]
    fn export_is_density_independent() {
        let mut low = CaptureSurface::new(geometry(1.0));
        let mut high = CaptureSurface::new(geometry(3.0));
        draw_line(&mut low);
        draw_line(&mut high);

        assert!(ink_pixels(high.backing()) > ink_pixels(low.backing()));

        let a = low.export().expect("export low");
        let b = high.export().expect("export high");
        assert_eq!((a.width, a.height), (300, 120));
        assert_eq!(a, b);

        let decoded = image::load_from_memory(&a.png).unwrap();
        assert_eq!(decoded.dimensions(), (300, 120));
        assert_eq!(decoded.to_rgb8().get_pixel(0, 0), &BACKGROUND);
        assert!(ink_pixels(&decoded.to_rgb8()) > 0);
    }

    #[test]
    fn far_off_points_are_pinned_to_the_surface() {
        let geo = geometry(2.0);
        assert_eq!(geo.to_logical(1.0e12, -1.0e12), StrokePoint::new(300.0, 0.0));
        assert_eq!(geo.to_logical(f32::NAN, f32::INFINITY), StrokePoint::new(0.0, 120.0));

        let mut surface = CaptureSurface::new(geo);
        assert!(surface.begin(PointerId::MOUSE, 30.0, 110.0));
        assert!(surface.extend(PointerId::MOUSE, 1.0e12, 110.0));
        assert!(surface.extend(PointerId::MOUSE, f32::MIN, f32::MAX));
        surface.end(PointerId::MOUSE);

        let image = surface.export().expect("export after wild input");
        assert_eq!((image.width, image.height), (300, 120));
    }

    #[test]
    fn cancel_keeps_drawn_segments() {
        let mut surface = CaptureSurface::new(geometry(1.0));
        surface.begin(PointerId(3), 40.0, 140.0);
        surface.extend(PointerId(3), 90.0, 140.0);
        surface.cancel();
        assert!(!surface.is_drawing());
        assert!(surface.has_ink());
    }

    #[test]
    fn data_url_carries_png_prefix() {
        let mut surface = CaptureSurface::default();
        surface.begin(PointerId::MOUSE, 10.0, 10.0);
        surface.extend(PointerId::MOUSE, 200.0, 100.0);
        let url = surface.export().unwrap().to_data_url();
        assert!(url.starts_with(PNG_DATA_URL_PREFIX));
        assert!(url.len() > 100);
    }
}
