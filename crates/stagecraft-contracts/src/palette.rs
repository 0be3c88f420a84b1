use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};

/// The fixed brush palette offered by the inpainting canvas.
///
/// Each color doubles as a region key: instruction text is attached to the
/// color a region was painted with, and the display label is what the model
/// sees in the combined instruction block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BrushColor {
    Red,
    Black,
    White,
    Yellow,
    Blue,
}

impl BrushColor {
    pub const ALL: [BrushColor; 5] = [
        BrushColor::Red,
        BrushColor::Black,
        BrushColor::White,
        BrushColor::Yellow,
        BrushColor::Blue,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            BrushColor::Red => "red",
            BrushColor::Black => "black",
            BrushColor::White => "white",
            BrushColor::Yellow => "yellow",
            BrushColor::Blue => "blue",
        }
    }

    /// Display label used in region instruction lines.
    pub fn label(&self) -> &'static str {
        match self {
            BrushColor::Red => "紅色",
            BrushColor::Black => "黑色",
            BrushColor::White => "白色",
            BrushColor::Yellow => "黃色",
            BrushColor::Blue => "藍色",
        }
    }

    pub fn hex(&self) -> &'static str {
        match self {
            BrushColor::Red => "#ef4444",
            BrushColor::Black => "#000000",
            BrushColor::White => "#ffffff",
            BrushColor::Yellow => "#f59e0b",
            BrushColor::Blue => "#3b82f6",
        }
    }

    /// Opaque RGBA for the visible paint surface.
    pub fn rgba(&self) -> [u8; 4] {
        match self {
            BrushColor::Red => [0xef, 0x44, 0x44, 0xff],
            BrushColor::Black => [0x00, 0x00, 0x00, 0xff],
            BrushColor::White => [0xff, 0xff, 0xff, 0xff],
            BrushColor::Yellow => [0xf5, 0x9e, 0x0b, 0xff],
            BrushColor::Blue => [0x3b, 0x82, 0xf6, 0xff],
        }
    }

    pub fn parse(raw: &str) -> Option<BrushColor> {
        let normalized = raw.trim().to_ascii_lowercase();
        BrushColor::ALL
            .into_iter()
            .find(|color| color.name() == normalized || color.hex() == normalized)
    }
}

/// Per-region edit directives keyed by brush color.
///
/// A color enters the active set the first time a stroke is painted with it
/// and leaves only on reset. Instruction text may be upserted for any color
/// at any time; only colors that are both painted and carry non-blank text
/// contribute lines to the combined instruction block.
#[derive(Debug, Clone, Default)]
pub struct RegionInstructions {
    painted: IndexSet<BrushColor>,
    instructions: IndexMap<BrushColor, String>,
}

impl RegionInstructions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that at least one stroke was painted with `color`. Idempotent.
    pub fn register(&mut self, color: BrushColor) {
        self.painted.insert(color);
    }

    pub fn set_instruction(&mut self, color: BrushColor, text: impl Into<String>) {
        self.instructions.insert(color, text.into());
    }

    pub fn is_painted(&self, color: BrushColor) -> bool {
        self.painted.contains(&color)
    }

    pub fn painted_colors(&self) -> impl Iterator<Item = BrushColor> + '_ {
        self.painted.iter().copied()
    }

    pub fn instruction(&self, color: BrushColor) -> Option<&str> {
        self.instructions.get(&color).map(String::as_str)
    }

    /// One `- <label>: <instruction>` line per painted color with non-blank
    /// text, in the order the colors were first painted.
    pub fn combined(&self) -> String {
        self.painted
            .iter()
            .filter_map(|color| {
                let text = self.instructions.get(color).map(String::as_str)?;
                let trimmed = text.trim();
                if trimmed.is_empty() {
                    return None;
                }
                Some(format!("- {}: {}", color.label(), trimmed))
            })
            .collect::<Vec<String>>()
            .join("\n")
    }

    pub fn clear(&mut self) {
        self.painted.clear();
        self.instructions.clear();
    }
}
