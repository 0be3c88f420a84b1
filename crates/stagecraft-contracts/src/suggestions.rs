use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// One commercial-photography scene suggestion returned by the analysis
/// call: an instruction, the intended visual focus, and a lighting note.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Suggestion {
    pub prompt: String,
    pub focus: String,
    pub lighting: String,
}

/// The three fixed suggestion categories the analysis call must produce.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SceneAnalysis {
    pub usage_scenario: Suggestion,
    pub result_display: Suggestion,
    pub still_life: Suggestion,
}

impl SceneAnalysis {
    /// Parse the model's JSON reply. A non-JSON reply is its own failure
    /// mode, distinct from transport errors.
    pub fn from_json(raw: &str) -> Result<SceneAnalysis> {
        serde_json::from_str(raw).context("AI returned non-JSON response for analysis.")
    }

    /// Category display labels, in the order suggestions are presented.
    pub fn themes(&self) -> [(&'static str, &Suggestion); 3] {
        [
            ("使用情境", &self.usage_scenario),
            ("成果展示", &self.result_display),
            ("靜物擺放", &self.still_life),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::SceneAnalysis;
    use serde_json::json;

    #[test]
    fn parses_well_formed_analysis() -> anyhow::Result<()> {
        let raw = json!({
            "usage_scenario": {"prompt": "p1", "focus": "f1", "lighting": "l1"},
            "result_display": {"prompt": "p2", "focus": "f2", "lighting": "l2"},
            "still_life": {"prompt": "p3", "focus": "f3", "lighting": "l3"},
        })
        .to_string();

        let analysis = SceneAnalysis::from_json(&raw)?;
        assert_eq!(analysis.usage_scenario.prompt, "p1");
        assert_eq!(analysis.themes()[2].0, "靜物擺放");
        assert_eq!(analysis.themes()[2].1.lighting, "l3");
        Ok(())
    }

    #[test]
    fn rejects_non_json_reply() {
        let err = SceneAnalysis::from_json("以下是我的建議：...").unwrap_err();
        assert!(err.to_string().contains("non-JSON"));
    }
}
