//! "Day N" badge drawn over labelled clips.
//!
//! Geometry scales with the surface width:
//!
//! ```text
//!  (0.5f, 0.5f)
//!   ┌──────────────────────┐  ▲
//!   │ 0.5f  Day 12   0.5f  │  │ f + 2·0.3f
//!   └──────────────────────┘  ▼
//!   f = font px = 7% of surface width, radius = 0.3 × badge height
//! ```

use std::path::Path;

use dayreel_common::OverlayConfig;
use image::{Rgba, RgbaImage};
use rusttype::{point, Font, Scale};

/// System font locations tried when no font path is configured.
const FONT_CANDIDATES: &[&str] = &[
    "/usr/share/fonts/truetype/dejavu/DejaVuSans-Bold.ttf",
    "/usr/share/fonts/TTF/DejaVuSans-Bold.ttf",
    "/usr/share/fonts/dejavu/DejaVuSans-Bold.ttf",
    "/usr/share/fonts/truetype/liberation/LiberationSans-Bold.ttf",
    "/System/Library/Fonts/Supplemental/Arial Bold.ttf",
    "/Library/Fonts/Arial Bold.ttf",
    "C:\\Windows\\Fonts\\arialbd.ttf",
];

/// Pixel geometry of one badge.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BadgeLayout {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub radius: f32,
    pub font_px: f32,
    pub pad_x: f32,
    pub pad_y: f32,
}

impl BadgeLayout {
    /// Lay out a badge for text `text_width` pixels wide.
    pub fn compute(surface_width: u32, font_scale: f32, text_width: f32) -> Self {
        let font_px = (surface_width as f32 * font_scale).max(1.0);
        let pad_x = font_px * 0.5;
        let pad_y = font_px * 0.3;
        let width = text_width + pad_x * 2.0;
        let height = font_px + pad_y * 2.0;
        Self {
            x: font_px * 0.5,
            y: font_px * 0.5,
            width,
            height,
            radius: height * 0.3,
            font_px,
            pad_x,
            pad_y,
        }
    }

    /// Whether the pixel centre of `(px, py)` lies inside the rounded
    /// rectangle.
    pub fn contains(&self, px: u32, py: u32) -> bool {
        let cx = px as f32 + 0.5;
        let cy = py as f32 + 0.5;
        if cx < self.x || cy < self.y || cx > self.x + self.width || cy > self.y + self.height {
            return false;
        }
        let r = self.radius.min(self.width / 2.0).min(self.height / 2.0);
        let nearest_x = cx.clamp(self.x + r, self.x + self.width - r);
        let nearest_y = cy.clamp(self.y + r, self.y + self.height - r);
        let dx = cx - nearest_x;
        let dy = cy - nearest_y;
        dx * dx + dy * dy <= r * r
    }
}

/// Draws badges onto surface frames.
pub struct OverlayRenderer {
    font: Option<Font<'static>>,
    font_scale: f32,
    opacity: f32,
    warned_missing_font: bool,
}

impl OverlayRenderer {
    /// Load the configured font, or the first system font found.
    pub fn new(config: &OverlayConfig) -> Self {
        let font = match &config.font_path {
            Some(path) => load_font(path),
            None => FONT_CANDIDATES
                .iter()
                .map(Path::new)
                .find_map(load_font),
        };
        if let Some(path) = &config.font_path {
            if font.is_none() {
                tracing::warn!(path = %path.display(), "Configured overlay font could not be loaded");
            }
        }
        Self {
            font,
            font_scale: config.font_scale,
            opacity: config.badge_opacity.clamp(0.0, 1.0),
            warned_missing_font: false,
        }
    }

    /// A renderer that draws the badge background only.
    pub fn without_font(config: &OverlayConfig) -> Self {
        Self {
            font: None,
            font_scale: config.font_scale,
            opacity: config.badge_opacity.clamp(0.0, 1.0),
            warned_missing_font: false,
        }
    }

    pub fn has_font(&self) -> bool {
        self.font.is_some()
    }

    /// Badge geometry for `text` on a surface `surface_width` wide.
    pub fn layout(&self, surface_width: u32, text: &str) -> BadgeLayout {
        let font_px = (surface_width as f32 * self.font_scale).max(1.0);
        let text_width = match &self.font {
            Some(font) => measure_text(font, Scale::uniform(font_px), text),
            // Typical bold sans advance is a little over half the em.
            None => font_px * 0.55 * text.chars().count() as f32,
        };
        BadgeLayout::compute(surface_width, self.font_scale, text_width)
    }

    /// Draw the badge for `text` in the top-left corner of `image`.
    pub fn draw_badge(&mut self, image: &mut RgbaImage, text: &str) -> BadgeLayout {
        let layout = self.layout(image.width(), text);
        fill_rounded_rect(image, &layout, [0, 0, 0], self.opacity);

        match &self.font {
            Some(font) => {
                let scale = Scale::uniform(layout.font_px);
                let ascent = font.v_metrics(scale).ascent;
                let origin = point(layout.x + layout.pad_x, layout.y + layout.pad_y + ascent);
                draw_text(image, font, scale, origin, text, [255, 255, 255]);
            }
            None => {
                if !self.warned_missing_font {
                    tracing::warn!("No overlay font available; drawing badges without text");
                    self.warned_missing_font = true;
                }
            }
        }
        layout
    }
}

fn load_font(path: &Path) -> Option<Font<'static>> {
    let bytes = std::fs::read(path).ok()?;
    let font = Font::try_from_vec(bytes)?;
    tracing::debug!(path = %path.display(), "Overlay font loaded");
    Some(font)
}

fn measure_text(font: &Font<'_>, scale: Scale, text: &str) -> f32 {
    font.layout(text, scale, point(0.0, 0.0))
        .last()
        .map(|glyph| glyph.position().x + glyph.unpositioned().h_metrics().advance_width)
        .unwrap_or(0.0)
}

fn blend(pixel: &mut Rgba<u8>, color: [u8; 3], alpha: f32) {
    if alpha <= 0.0 {
        return;
    }
    let alpha = alpha.min(1.0);
    let inv = 1.0 - alpha;
    for (channel, value) in pixel.0.iter_mut().take(3).zip(color) {
        *channel = (value as f32 * alpha + *channel as f32 * inv).round() as u8;
    }
    let dst_alpha = pixel.0[3] as f32 / 255.0;
    pixel.0[3] = ((alpha + dst_alpha * inv) * 255.0).round() as u8;
}

fn fill_rounded_rect(image: &mut RgbaImage, layout: &BadgeLayout, color: [u8; 3], alpha: f32) {
    let x0 = layout.x.floor().max(0.0) as u32;
    let y0 = layout.y.floor().max(0.0) as u32;
    let x1 = ((layout.x + layout.width).ceil() as u32).min(image.width());
    let y1 = ((layout.y + layout.height).ceil() as u32).min(image.height());
    for py in y0..y1 {
        for px in x0..x1 {
            if layout.contains(px, py) {
                blend(image.get_pixel_mut(px, py), color, alpha);
            }
        }
    }
}

fn draw_text(
    image: &mut RgbaImage,
    font: &Font<'_>,
    scale: Scale,
    origin: rusttype::Point<f32>,
    text: &str,
    color: [u8; 3],
) {
    let (width, height) = image.dimensions();
    for glyph in font.layout(text, scale, origin) {
        let Some(bounds) = glyph.pixel_bounding_box() else {
            continue;
        };
        glyph.draw(|gx, gy, coverage| {
            let px = bounds.min.x + gx as i32;
            let py = bounds.min.y + gy as i32;
            if px >= 0 && py >= 0 && (px as u32) < width && (py as u32) < height {
                blend(image.get_pixel_mut(px as u32, py as u32), color, coverage);
            }
        });
    }
}
