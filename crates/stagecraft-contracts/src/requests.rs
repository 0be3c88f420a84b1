use anyhow::{bail, Result};

use crate::palette::RegionInstructions;

/// Context for a background-synthesis request. Immutable once built; the
/// constructor performs the boundary validation so nothing incomplete ever
/// reaches the orchestrator.
#[derive(Debug, Clone)]
pub struct BackgroundRequest {
    pub base_image: Vec<u8>,
    pub prompt: String,
    pub negative_prompt: String,
    pub subject_name: String,
}

impl BackgroundRequest {
    pub fn new(
        base_image: Vec<u8>,
        prompt: impl Into<String>,
        negative_prompt: impl Into<String>,
        subject_name: impl Into<String>,
    ) -> Result<BackgroundRequest> {
        if base_image.is_empty() {
            bail!("請先上傳一個主體。");
        }
        let prompt = prompt.into();
        if prompt.trim().is_empty() {
            bail!("創作指令不能為空。");
        }
        Ok(BackgroundRequest {
            base_image,
            prompt,
            negative_prompt: negative_prompt.into(),
            subject_name: subject_name.into(),
        })
    }
}

/// Context for a masked-inpainting request.
///
/// The prompt is the combined per-region instruction block. Validation
/// requires at least one painted region with non-blank text and a non-empty
/// mask; both checks happen here, before any remote call.
#[derive(Debug, Clone)]
pub struct InpaintRequest {
    pub base_image: Vec<u8>,
    pub mask: Vec<u8>,
    pub subject_image: Option<Vec<u8>>,
    pub prompt: String,
    pub negative_prompt: String,
    pub subject_name: String,
}

impl InpaintRequest {
    pub fn new(
        base_image: Vec<u8>,
        mask: Vec<u8>,
        mask_is_empty: bool,
        regions: &RegionInstructions,
        subject_image: Option<Vec<u8>>,
        negative_prompt: impl Into<String>,
        subject_name: impl Into<String>,
    ) -> Result<InpaintRequest> {
        let combined = regions.combined();
        if combined.is_empty() {
            bail!("請至少為一個塗色區域填寫指令。");
        }
        if mask_is_empty {
            bail!("請先在畫布上塗抹需要內繪的區域。");
        }
        Ok(InpaintRequest {
            base_image,
            mask,
            subject_image,
            prompt: combined,
            negative_prompt: negative_prompt.into(),
            subject_name: subject_name.into(),
        })
    }
}
