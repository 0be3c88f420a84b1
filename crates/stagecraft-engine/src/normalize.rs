//! Upload normalization and subject staging.
//!
//! Every uploaded photo is downsampled so its longer dimension fits the
//! working bound before anything else touches it; downstream payloads then
//! stay within what the remote service accepts. Staging places the subject
//! on a square transparent canvas so the model reads the transparent pixels
//! as the region to paint.

use anyhow::{ensure, Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::imageops::{self, FilterType};
use image::{DynamicImage, Rgba, RgbaImage};

/// Longest dimension allowed for a normalized upload.
pub const MAX_UPLOAD_DIMENSION: u32 = 1024;

/// Side length of the square staging canvas sent to the model.
pub const STAGE_CANVAS_SIZE: u32 = 1024;

pub const UPLOAD_JPEG_QUALITY: u8 = 90;

/// Fraction of the staging canvas the subject's longer edge may occupy.
const STAGE_FILL_RATIO: f64 = 0.9;

/// Decode an uploaded image, shrink it to at most
/// [`MAX_UPLOAD_DIMENSION`] on the longer edge (aspect ratio preserved),
/// and re-encode as JPEG. Images already inside the bound are only
/// re-encoded.
pub fn optimize_upload(bytes: &[u8]) -> Result<Vec<u8>> {
    let decoded =
        image::load_from_memory(bytes).context("uploaded image could not be decoded")?;
    let long_axis = decoded.width().max(decoded.height());
    let resized = if long_axis > MAX_UPLOAD_DIMENSION {
        decoded.resize(
            MAX_UPLOAD_DIMENSION,
            MAX_UPLOAD_DIMENSION,
            FilterType::Triangle,
        )
    } else {
        decoded
    };
    encode_jpeg(&resized, UPLOAD_JPEG_QUALITY)
}

/// Center the subject on a transparent [`STAGE_CANVAS_SIZE`]² canvas,
/// scaled to 90% of the best fit, and encode losslessly. The transparent
/// border is what the background-synthesis call paints into.
pub fn stage_subject(bytes: &[u8]) -> Result<Vec<u8>> {
    let subject = image::load_from_memory(bytes)
        .context("subject image could not be decoded")?
        .to_rgba8();
    ensure!(
        subject.width() > 0 && subject.height() > 0,
        "subject image has zero size"
    );

    let canvas_side = STAGE_CANVAS_SIZE;
    let scale = (f64::from(canvas_side) / f64::from(subject.width()))
        .min(f64::from(canvas_side) / f64::from(subject.height()))
        * STAGE_FILL_RATIO;
    let scaled_w = ((f64::from(subject.width()) * scale).round() as u32).max(1);
    let scaled_h = ((f64::from(subject.height()) * scale).round() as u32).max(1);
    let scaled = imageops::resize(&subject, scaled_w, scaled_h, FilterType::Triangle);

    let mut canvas = RgbaImage::from_pixel(canvas_side, canvas_side, Rgba([0, 0, 0, 0]));
    let x = i64::from((canvas_side - scaled_w) / 2);
    let y = i64::from((canvas_side - scaled_h) / 2);
    imageops::overlay(&mut canvas, &scaled, x, y);

    encode_png_rgba(&canvas)
}

/// Re-encode arbitrary image bytes as PNG, e.g. for payload slots that
/// expect lossless input.
pub fn reencode_png(bytes: &[u8]) -> Result<Vec<u8>> {
    let decoded = image::load_from_memory(bytes).context("image could not be decoded")?;
    encode_png_rgba(&decoded.to_rgba8())
}

pub(crate) fn encode_jpeg(image: &DynamicImage, quality: u8) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    let encoder = JpegEncoder::new_with_quality(&mut out, quality);
    image
        .to_rgb8()
        .write_with_encoder(encoder)
        .context("JPEG encode failed")?;
    Ok(out)
}

pub(crate) fn encode_png_rgba(image: &RgbaImage) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    let encoder = PngEncoder::new(&mut out);
    image
        .write_with_encoder(encoder)
        .context("PNG encode failed")?;
    Ok(out)
}
