//! Result post-processing: flattening and watermarking.

use std::env;

use anyhow::{bail, Context, Result};
use image::imageops::{self, FilterType};
use image::{DynamicImage, Rgba, RgbaImage};
use reqwest::blocking::Client as HttpClient;

use crate::normalize::encode_jpeg;

/// Fixed address of the watermark asset, fetched at composite time.
/// Overridable via `STAGECRAFT_WATERMARK_URL`.
pub const WATERMARK_URL: &str = "https://i.ibb.co/hFW1f4TH/LOGO150.png";

pub const OUTPUT_JPEG_QUALITY: u8 = 95;

/// Watermark edge length and padding as fractions of the base width. Both
/// axes use the width-derived values.
const WATERMARK_SIZE_RATIO: f64 = 0.15;
const WATERMARK_PADDING_RATIO: f64 = 0.02;

/// Draw the possibly-transparent source over an opaque white canvas of the
/// same dimensions and encode as JPEG.
pub fn flatten_to_jpeg(bytes: &[u8]) -> Result<Vec<u8>> {
    let source = image::load_from_memory(bytes)
        .context("generated image could not be decoded")?
        .to_rgba8();
    let mut canvas = RgbaImage::from_pixel(
        source.width(),
        source.height(),
        Rgba([255, 255, 255, 255]),
    );
    imageops::overlay(&mut canvas, &source, 0, 0);
    encode_jpeg(&DynamicImage::ImageRgba8(canvas), OUTPUT_JPEG_QUALITY)
}

/// Composite the watermark onto the base image, bottom-right, sized to
/// 15% of the base width with 2% padding. Both assets must decode before
/// anything is drawn; either failure aborts with no partial output.
pub fn apply_watermark(base: &[u8], mark: &[u8]) -> Result<Vec<u8>> {
    let base_image = image::load_from_memory(base)
        .context("Failed to load base image.")?
        .to_rgba8();
    let mark_image = image::load_from_memory(mark)
        .context("Failed to load watermark image.")?
        .to_rgba8();

    let width = base_image.width();
    let height = base_image.height();
    let mark_side = ((f64::from(width) * WATERMARK_SIZE_RATIO) as u32).max(1);
    let padding = (f64::from(width) * WATERMARK_PADDING_RATIO) as u32;
    let x = width.saturating_sub(mark_side + padding);
    let y = height.saturating_sub(mark_side + padding);

    let scaled = imageops::resize(&mark_image, mark_side, mark_side, FilterType::Triangle);
    let mut canvas = base_image;
    imageops::overlay(&mut canvas, &scaled, i64::from(x), i64::from(y));
    encode_jpeg(&DynamicImage::ImageRgba8(canvas), OUTPUT_JPEG_QUALITY)
}

/// Fetch the watermark asset. Called once per export run, not per image.
pub fn fetch_watermark() -> Result<Vec<u8>> {
    let url = watermark_url();
    let response = HttpClient::new()
        .get(&url)
        .send()
        .with_context(|| format!("failed downloading watermark ({url})"))?;
    if !response.status().is_success() {
        bail!("watermark download failed ({})", response.status().as_u16());
    }
    let bytes = response
        .bytes()
        .context("failed reading watermark bytes")?
        .to_vec();
    Ok(bytes)
}

fn watermark_url() -> String {
    env::var("STAGECRAFT_WATERMARK_URL")
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| WATERMARK_URL.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::encode_png_rgba;

    fn solid_png(w: u32, h: u32, rgba: [u8; 4]) -> Vec<u8> {
        let img = RgbaImage::from_pixel(w, h, Rgba(rgba));
        encode_png_rgba(&img).expect("test png encodes")
    }

    #[test]
    fn flatten_turns_transparency_white() -> Result<()> {
        let flattened = flatten_to_jpeg(&solid_png(32, 32, [0, 0, 0, 0]))?;
        let decoded = image::load_from_memory(&flattened)?.to_rgb8();
        let pixel = decoded.get_pixel(16, 16);
        assert!(pixel[0] > 250 && pixel[1] > 250 && pixel[2] > 250);
        Ok(())
    }

    #[test]
    fn flatten_keeps_opaque_content() -> Result<()> {
        let flattened = flatten_to_jpeg(&solid_png(32, 32, [200, 10, 10, 255]))?;
        let decoded = image::load_from_memory(&flattened)?.to_rgb8();
        let pixel = decoded.get_pixel(16, 16);
        assert!(pixel[0] > 150 && pixel[1] < 80 && pixel[2] < 80);
        Ok(())
    }

    #[test]
    fn watermark_lands_in_the_bottom_right_block() -> Result<()> {
        let base = solid_png(400, 200, [255, 255, 255, 255]);
        let mark = solid_png(10, 10, [200, 10, 10, 255]);
        let stamped = apply_watermark(&base, &mark)?;
        let decoded = image::load_from_memory(&stamped)?.to_rgb8();

        // W=400: mark side 60, padding 8 -> left edge 332, top edge 132.
        let inside = decoded.get_pixel(332 + 30, 132 + 30);
        assert!(inside[0] > 150 && inside[1] < 80);

        let outside = decoded.get_pixel(20, 20);
        assert!(outside[0] > 230 && outside[1] > 230 && outside[2] > 230);

        let left_of_mark = decoded.get_pixel(300, 162);
        assert!(left_of_mark[0] > 230 && left_of_mark[1] > 230);
        Ok(())
    }

    #[test]
    fn watermark_failure_is_all_or_nothing() {
        let base = solid_png(64, 64, [255, 255, 255, 255]);
        let err = apply_watermark(&base, b"not an image").unwrap_err();
        assert!(err.to_string().contains("watermark image"));

        let err = apply_watermark(b"not an image", &base).unwrap_err();
        assert!(err.to_string().contains("base image"));
    }
}
