//! Alert effects drawn over live-view frames.

use crate::camera::encode_jpeg;
use crate::error::CaptureError;
use image::{ImageFormat, Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_text_mut};
use imageproc::rect::Rect;
use rusttype::{Font, Scale};
use std::sync::Arc;
use tracing::{debug, warn};

const BORDER_WIDTH: u32 = 10;
const WRAP_WIDTH: usize = 60;
const MAX_LINES: usize = 5;
const JPEG_QUALITY: u8 = 80;

const RED: Rgb<u8> = Rgb([255, 0, 0]);
const GREEN: Rgb<u8> = Rgb([0, 255, 0]);
const WHITE: Rgb<u8> = Rgb([255, 255, 255]);
const BLACK: Rgb<u8> = Rgb([0, 0, 0]);

/// What the latest verdict says, as far as the overlay cares
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OverlayState {
    pub confidence: f32,
    pub risk: bool,
    pub explanation: String,
    pub auto_analyze: bool,
}

/// Breathing red intensity in [0.2, 0.7]
pub fn pulse_opacity(seconds: f64) -> f32 {
    (((seconds * 5.0).sin() + 1.0) / 2.0 * 0.5 + 0.2) as f32
}

/// Greedy word wrap; words longer than `width` are split
pub fn wrap_text(text: &str, width: usize) -> Vec<String> {
    let width = width.max(1);
    let mut lines = Vec::new();
    let mut current = String::new();

    for word in text.split_whitespace() {
        let mut word: Vec<char> = word.chars().collect();

        while word.len() > width {
            if !current.is_empty() {
                lines.push(std::mem::take(&mut current));
            }
            let rest = word.split_off(width);
            lines.push(word.into_iter().collect());
            word = rest;
        }

        let current_len = current.chars().count();
        if current_len > 0 && current_len + 1 + word.len() > width {
            lines.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.extend(word);
    }

    if !current.is_empty() {
        lines.push(current);
    }
    lines
}

pub struct OverlayRenderer {
    risk_threshold: f32,
    font: Option<Font<'static>>,
}

impl OverlayRenderer {
    /// Text overlays are skipped when the font can't be loaded
    pub fn new(risk_threshold: f32, font_path: &str) -> Self {
        let font = match std::fs::read(font_path) {
            Ok(data) => {
                let font = Font::try_from_vec(data);
                if font.is_none() {
                    warn!("Failed to parse overlay font '{}'", font_path);
                }
                font
            }
            Err(e) => {
                debug!("Overlay font '{}' unavailable: {}", font_path, e);
                None
            }
        };

        Self {
            risk_threshold,
            font,
        }
    }

    pub fn has_font(&self) -> bool {
        self.font.is_some()
    }

    fn flashes(&self, state: &OverlayState) -> bool {
        state.confidence > self.risk_threshold
    }

    /// Draw the alert effects for `state` at time `seconds`; frames needing no
    /// effects are returned untouched
    pub fn render(
        &self,
        jpeg: Arc<Vec<u8>>,
        state: &OverlayState,
        seconds: f64,
    ) -> Result<Arc<Vec<u8>>, CaptureError> {
        let flashes = self.flashes(state);
        let labels = state.auto_analyze && self.font.is_some();
        if !flashes && !labels {
            return Ok(jpeg);
        }

        let mut img = image::load_from_memory_with_format(&jpeg, ImageFormat::Jpeg)
            .map_err(|e| CaptureError::Decode {
                details: e.to_string(),
            })?
            .to_rgb8();

        if flashes {
            blend_red(&mut img, pulse_opacity(seconds));
            draw_border(&mut img);
        }

        if let (true, Some(font)) = (state.auto_analyze, &self.font) {
            draw_labels(&mut img, font, state);
        }

        Ok(Arc::new(encode_jpeg(&img, JPEG_QUALITY)?))
    }
}

fn blend_red(img: &mut RgbImage, opacity: f32) {
    let keep = 1.0 - opacity;
    for pixel in img.pixels_mut() {
        for (channel, tint) in pixel.0.iter_mut().zip(RED.0) {
            *channel = (tint as f32 * opacity + *channel as f32 * keep).round() as u8;
        }
    }
}

fn draw_border(img: &mut RgbImage) {
    let (w, h) = img.dimensions();
    let b = BORDER_WIDTH.min(w).min(h);
    if b == 0 {
        return;
    }

    draw_filled_rect_mut(img, Rect::at(0, 0).of_size(w, b), RED);
    draw_filled_rect_mut(img, Rect::at(0, (h - b) as i32).of_size(w, b), RED);
    draw_filled_rect_mut(img, Rect::at(0, 0).of_size(b, h), RED);
    draw_filled_rect_mut(img, Rect::at((w - b) as i32, 0).of_size(b, h), RED);
}

fn draw_labels(img: &mut RgbImage, font: &Font<'static>, state: &OverlayState) {
    let (status, color) = if state.risk { ("RISK", RED) } else { ("SAFE", GREEN) };
    draw_text_mut(img, color, 10, 8, Scale::uniform(32.0), font, status);

    let scale = Scale::uniform(20.0);
    let mut y = 50;
    for line in wrap_text(&state.explanation, WRAP_WIDTH)
        .iter()
        .take(MAX_LINES)
    {
        // Outline
        for (dx, dy) in [(-1, 0), (1, 0), (0, -1), (0, 1)] {
            draw_text_mut(img, BLACK, 10 + dx, y + dy, scale, font, line);
        }
        draw_text_mut(img, WHITE, 10, y, scale, font, line);
        y += 25;
    }
}
