use serde::Serialize;

/// Distance from the top edge the signature is aimed at. Tuned for one-page
/// letter/A4 documents; shorter pages clamp to [`MIN_BOTTOM_MARGIN`].
pub const TOP_OFFSET: f64 = 800.0;
pub const MIN_BOTTOM_MARGIN: f64 = 50.0;
pub const MIN_LEFT_MARGIN: f64 = 10.0;
pub const HALF_BLOCK_WIDTH: f64 = 100.0;

pub const IMAGE_WIDTH: f64 = 100.0;
pub const IMAGE_HEIGHT: f64 = 50.0;
pub const FRAME_PADDING: f64 = 5.0;
pub const TEXT_BLOCK_WIDTH: f64 = 200.0;
pub const TEXT_BLOCK_HEIGHT: f64 = 45.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// Where every signature-related mark lands on the target page, in PDF user
/// space (origin bottom-left).
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PlacementSpec {
    pub anchor_x: f64,
    pub anchor_y: f64,
    pub image_box: Rect,
    pub frame_box: Rect,
    pub text_box: Rect,
}

impl PlacementSpec {
    pub fn for_page(width: f64, height: f64) -> Self {
        let anchor_x = (width / 2.0 - HALF_BLOCK_WIDTH).max(MIN_LEFT_MARGIN);
        let anchor_y = (height - TOP_OFFSET).max(MIN_BOTTOM_MARGIN);
        let image_box = Rect {
            x: anchor_x,
            y: anchor_y + 30.0,
            width: IMAGE_WIDTH,
            height: IMAGE_HEIGHT,
        };
        let frame_box = Rect {
            x: image_box.x - FRAME_PADDING,
            y: image_box.y - FRAME_PADDING,
            width: IMAGE_WIDTH + 2.0 * FRAME_PADDING,
            height: IMAGE_HEIGHT + 2.0 * FRAME_PADDING,
        };
        let text_box = Rect {
            x: anchor_x,
            y: anchor_y,
            width: TEXT_BLOCK_WIDTH,
            height: TEXT_BLOCK_HEIGHT,
        };
        Self {
            anchor_x,
            anchor_y,
            image_box,
            frame_box,
            text_box,
        }
    }

    /// Baselines for the two caption lines under the image.
    pub fn caption_baselines(&self) -> [f64; 2] {
        [self.anchor_y + 10.0, self.anchor_y - 5.0]
    }

    /// Baselines for the three lines of the text fallback block.
    pub fn fallback_baselines(&self) -> [f64; 3] {
        [self.anchor_y + 30.0, self.anchor_y + 15.0, self.anchor_y]
    }
}
