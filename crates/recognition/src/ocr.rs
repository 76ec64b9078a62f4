//! OCR driver: turns receipt media into text, plus the tiled visual
//! fallback for Mercado Pago headers whose headline amount defeats the
//! textual pipeline.
//!
//! Errors never propagate out of `text_from_media`: a failed decode or a
//! missing language pack logs and yields an empty string, which the
//! pipeline treats as a parser-inconclusive rejection.

use image::codecs::png::PngEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ExtendedColorType, GrayImage, ImageEncoder};
use imageproc::contrast::equalize_histogram;
use imageproc::filter::median_filter;
use tesseract::{PageSegMode, Tesseract};
use thiserror::Error;

use crate::numeric::{has_triple_zero_hint, normalize_numeric_token};
use crate::text::{grouped_tokens, DOLLAR_AMOUNT_RE};

const OCR_LANG: &str = "spa+eng";

/// Whitelists are literal character sets for tesseract.
const TEXT_WHITELIST: &str =
    "0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz$.,:-/ ";
const DIGIT_WHITELIST: &str = "0123456789$., ";

/// Longest edge fed to the engine for whole-image recognition.
const MAX_OCR_WIDTH: u32 = 1600;

/// Mercado Pago header region of interest, as fractions of the image.
const ROI_X0: f32 = 0.04;
const ROI_X1: f32 = 0.70;
const ROI_Y0: f32 = 0.08;
const ROI_Y1: f32 = 0.48;

const TILE_COLS: u32 = 4;
const TILE_ROWS: u32 = 6;
const TILE_PAD_X_FRAC: f32 = 0.08;
const TILE_PAD_Y_FRAC: f32 = 0.04;
const MIN_TILE_SIDE: u32 = 16;
const MIN_TILE_OCR_WIDTH: u32 = 600;

#[derive(Debug, Error)]
pub enum OcrError {
    #[error("image decode failed: {0}")]
    Decode(String),

    #[error("ocr engine failure: {0}")]
    Engine(String),

    #[error("pdf extraction failed: {0}")]
    Pdf(String),
}

/// Extract text from receipt media. Returns an empty string on any
/// failure or unsupported mimetype.
pub fn text_from_media(bytes: &[u8], mimetype: &str) -> String {
    match mimetype {
        "application/pdf" => match pdf_text(bytes) {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(error = %e, "PDF text extraction failed");
                String::new()
            }
        },
        "image/jpeg" | "image/png" | "image/webp" => {
            // Pre-processing is best-effort: on failure the original
            // bytes go straight to the engine.
            let input = match preprocess(bytes) {
                Ok(png) => png,
                Err(e) => {
                    tracing::debug!(error = %e, "pre-processing unavailable, using raw bytes");
                    bytes.to_vec()
                }
            };
            match recognize(&input, TEXT_WHITELIST, None) {
                Ok(text) => text,
                Err(e) => {
                    tracing::warn!(error = %e, "OCR recognition failed");
                    String::new()
                }
            }
        }
        other => {
            tracing::debug!(mimetype = other, "unsupported mimetype for OCR");
            String::new()
        }
    }
}

fn pdf_text(bytes: &[u8]) -> Result<String, OcrError> {
    pdf_extract::extract_text_from_mem(bytes).map_err(|e| OcrError::Pdf(e.to_string()))
}

/// Resize to a bounded width, grayscale, histogram-normalise and
/// re-encode as PNG for the engine.
fn preprocess(bytes: &[u8]) -> Result<Vec<u8>, OcrError> {
    let img = image::load_from_memory(bytes).map_err(|e| OcrError::Decode(e.to_string()))?;
    let img = if img.width() > MAX_OCR_WIDTH {
        let nh = (img.height() as u64 * MAX_OCR_WIDTH as u64 / img.width() as u64).max(1) as u32;
        img.resize_exact(MAX_OCR_WIDTH, nh, FilterType::Lanczos3)
    } else {
        img
    };
    let gray = equalize_histogram(&img.to_luma8());
    encode_png(&gray)
}

fn encode_png(gray: &GrayImage) -> Result<Vec<u8>, OcrError> {
    let mut png = Vec::new();
    PngEncoder::new(&mut png)
        .write_image(
            gray.as_raw(),
            gray.width(),
            gray.height(),
            ExtendedColorType::L8,
        )
        .map_err(|e| OcrError::Engine(e.to_string()))?;
    Ok(png)
}

fn recognize(png: &[u8], whitelist: &str, psm: Option<PageSegMode>) -> Result<String, OcrError> {
    let tess = Tesseract::new(None, Some(OCR_LANG))
        .map_err(|e| OcrError::Engine(e.to_string()))?
        .set_image_from_mem(png)
        .map_err(|e| OcrError::Engine(e.to_string()))?;
    let mut tess = tess
        .set_variable("tessedit_char_whitelist", whitelist)
        .map_err(|e| OcrError::Engine(e.to_string()))?;
    if let Some(psm) = psm {
        tess.set_page_seg_mode(psm);
    }
    let mut tess = tess.recognize().map_err(|e| OcrError::Engine(e.to_string()))?;
    tess.get_text().map_err(|e| OcrError::Engine(e.to_string()))
}

/// Tiled re-read of the Mercado Pago header area. Used only when the
/// textual pipeline yields no usable amount. Returns the maximum positive
/// value recognised across tiles, with the triple-zero hint applied
/// across tile boundaries.
pub fn visual_amount_fallback(bytes: &[u8], mimetype: &str) -> Option<f64> {
    if !matches!(mimetype, "image/jpeg" | "image/png" | "image/webp") {
        return None;
    }
    let img = match image::load_from_memory(bytes) {
        Ok(img) => img,
        Err(e) => {
            tracing::warn!(error = %e, "visual fallback: decode failed");
            return None;
        }
    };

    let (w, h) = (img.width(), img.height());
    let roi_x0 = (w as f32 * ROI_X0) as u32;
    let roi_x1 = (w as f32 * ROI_X1) as u32;
    let roi_y0 = (h as f32 * ROI_Y0) as u32;
    let roi_y1 = (h as f32 * ROI_Y1) as u32;
    if roi_x1 <= roi_x0 || roi_y1 <= roi_y0 {
        return None;
    }

    let tile_w = (roi_x1 - roi_x0) / TILE_COLS;
    let tile_h = (roi_y1 - roi_y0) / TILE_ROWS;
    let pad_x = (w as f32 * TILE_PAD_X_FRAC) as u32;
    let pad_y = (h as f32 * TILE_PAD_Y_FRAC) as u32;

    let mut best: Option<f64> = None;
    let mut hint = false;

    for row in 0..TILE_ROWS {
        for col in 0..TILE_COLS {
            let x0 = (roi_x0 + col * tile_w).saturating_sub(pad_x);
            let y0 = (roi_y0 + row * tile_h).saturating_sub(pad_y);
            let x1 = (roi_x0 + (col + 1) * tile_w + pad_x).min(w);
            let y1 = (roi_y0 + (row + 1) * tile_h + pad_y).min(h);
            if x1 <= x0 + MIN_TILE_SIDE || y1 <= y0 + MIN_TILE_SIDE {
                continue;
            }

            let tile = img.crop_imm(x0, y0, x1 - x0, y1 - y0);
            let tile = upscale_tile(tile);
            let gray = equalize_histogram(&tile.to_luma8());

            for variant in tile_variants(&gray) {
                let Ok(png) = encode_png(&variant) else { continue };
                for psm in [PageSegMode::PsmSingleBlock, PageSegMode::PsmSingleLine] {
                    let Ok(text) = recognize(&png, DIGIT_WHITELIST, Some(psm)) else {
                        continue;
                    };
                    if text.trim().is_empty() {
                        continue;
                    }
                    hint |= has_triple_zero_hint(&text);
                    for value in tile_values(&text) {
                        if value > 0.0 {
                            best = Some(best.map_or(value, |b: f64| b.max(value)));
                        }
                    }
                }
            }
        }
    }

    match best {
        Some(v) if v < 1000.0 && hint => Some(v * 1000.0),
        other => other,
    }
}

fn upscale_tile(tile: DynamicImage) -> DynamicImage {
    if tile.width() >= MIN_TILE_OCR_WIDTH {
        return tile;
    }
    let factor = MIN_TILE_OCR_WIDTH.div_ceil(tile.width());
    tile.resize_exact(
        tile.width() * factor,
        tile.height() * factor,
        FilterType::Lanczos3,
    )
}

/// The three enhancement variants tried per tile, tuned on Mercado Pago
/// header renders.
fn tile_variants(gray: &GrayImage) -> Vec<GrayImage> {
    let a = linear(gray, 1.35, -18.0);
    let b = threshold(&linear(&median_filter(gray, 1, 1), 1.5, -20.0), 150);
    let c = gamma(&linear(gray, 1.8, -25.0), 0.9);
    vec![a, b, c]
}

fn linear(img: &GrayImage, mul: f32, add: f32) -> GrayImage {
    let mut out = img.clone();
    for p in out.pixels_mut() {
        p[0] = (p[0] as f32 * mul + add).clamp(0.0, 255.0) as u8;
    }
    out
}

fn threshold(img: &GrayImage, cutoff: u8) -> GrayImage {
    let mut out = img.clone();
    for p in out.pixels_mut() {
        p[0] = if p[0] > cutoff { 255 } else { 0 };
    }
    out
}

fn gamma(img: &GrayImage, g: f32) -> GrayImage {
    let mut out = img.clone();
    for p in out.pixels_mut() {
        let norm = (p[0] as f32 / 255.0).powf(g);
        p[0] = (norm * 255.0).clamp(0.0, 255.0) as u8;
    }
    out
}

/// Amount candidates inside one recognised tile text: `$`-led tokens
/// first, grouped-or-long bare numerics otherwise.
fn tile_values(text: &str) -> Vec<f64> {
    let mut values = Vec::new();
    for cap in DOLLAR_AMOUNT_RE.captures_iter(text) {
        if let Some(v) = normalize_numeric_token(&cap[1]) {
            values.push(v);
        }
    }
    if values.is_empty() {
        for line in text.lines() {
            for token in grouped_tokens(line) {
                if let Some(v) = normalize_numeric_token(token) {
                    values.push(v);
                }
            }
        }
    }
    values
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsupported_mimetype_yields_empty_text() {
        assert_eq!(text_from_media(b"not an image", "video/mp4"), "");
    }

    #[test]
    fn broken_image_yields_empty_text() {
        // Decode fails, pre-processing falls back to raw bytes, the
        // engine then rejects them; either way the caller sees "".
        assert_eq!(text_from_media(b"garbage", "image/png"), "");
    }

    #[test]
    fn fallback_rejects_non_raster() {
        assert_eq!(visual_amount_fallback(b"%PDF-1.4", "application/pdf"), None);
        assert_eq!(visual_amount_fallback(b"garbage", "image/png"), None);
    }

    #[test]
    fn tile_values_prefers_dollar_tokens() {
        assert_eq!(tile_values("$ 12.500"), vec![12_500.0]);
        // Without a `$`, grouped numerics still count.
        assert_eq!(tile_values("15.000"), vec![15_000.0]);
        assert!(tile_values("sin montos").is_empty());
    }

    #[test]
    fn cross_tile_hint_semantics() {
        // Mirrors the fallback's final step: a sub-1000 best with a hint
        // seen anywhere escalates by a thousand.
        let best = Some(12.0_f64);
        let hint = true;
        let resolved = match best {
            Some(v) if v < 1000.0 && hint => Some(v * 1000.0),
            other => other,
        };
        assert_eq!(resolved, Some(12_000.0));
    }

    #[test]
    fn thresholded_variant_is_binary() {
        let img = GrayImage::from_pixel(4, 4, image::Luma([200u8]));
        let variants = tile_variants(&img);
        assert_eq!(variants.len(), 3);
        for p in variants[1].pixels() {
            assert!(p[0] == 0 || p[0] == 255);
        }
    }
}
