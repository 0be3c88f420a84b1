//! Result export: deterministic filenames, sequential writes.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::composite;

/// Local-time stamp shared by every file of one export run.
pub fn export_timestamp() -> String {
    chrono::Local::now().format("%Y%m%d%H%M%S").to_string()
}

/// `sealed_creation_<ts>_<n>.jpg` for watermarked exports,
/// `ai_creation_<ts>_<n>.jpg` otherwise. Indices are 1-based.
pub fn export_filename(watermarked: bool, timestamp: &str, index: usize) -> String {
    let prefix = if watermarked { "sealed" } else { "ai" };
    format!("{prefix}_creation_{timestamp}_{}.jpg", index + 1)
}

/// Write the selected images to `out_dir`, watermarking each one first
/// when a mark is supplied. Sequential: the first failure stops the run,
/// leaving earlier files in place and later ones unwritten.
pub fn export_images(
    out_dir: &Path,
    images: &[Vec<u8>],
    watermark: Option<&[u8]>,
    timestamp: &str,
) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(out_dir)
        .with_context(|| format!("failed to create {}", out_dir.display()))?;

    let mut written = Vec::with_capacity(images.len());
    for (index, image) in images.iter().enumerate() {
        let bytes = match watermark {
            Some(mark) => composite::apply_watermark(image, mark)?,
            None => image.clone(),
        };
        let path = out_dir.join(export_filename(watermark.is_some(), timestamp, index));
        fs::write(&path, bytes).with_context(|| format!("failed to write {}", path.display()))?;
        written.push(path);
    }
    Ok(written)
}
