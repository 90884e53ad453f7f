use serde::{Deserialize, Serialize};

/// Two-part plan produced for advanced analyses: the question asked of every
/// transcript and the instructions used when merging the answers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisStrategy {
    pub intermediate_question: String,
    pub final_synthesis_instructions: String,
}

impl AnalysisStrategy {
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "intermediateQuestion": self.intermediate_question,
            "finalSynthesisInstructions": self.final_synthesis_instructions,
        })
    }

    pub fn from_json(value: serde_json::Value) -> Result<Self, String> {
        serde_json::from_value(value).map_err(|e| format!("Invalid strategy JSON: {}", e))
    }
}
