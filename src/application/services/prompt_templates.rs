use regex::Regex;
use std::collections::{BTreeSet, HashMap};
use std::sync::LazyLock;

static SLOT_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\s*([a-z_]+)\s*\}\}").expect("slot pattern is a valid regex")
});

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TemplateError {
    #[error("Template '{template}' is missing values for: {slots:?}")]
    MissingSlots {
        template: &'static str,
        slots: Vec<String>,
    },
    #[error("Template '{template}' has no slots named: {slots:?}")]
    UnknownSlots {
        template: &'static str,
        slots: Vec<String>,
    },
}

/// A prompt with named `{{slot}}` placeholders. Rendering requires a value for
/// every slot and rejects values for slots the template does not declare.
#[derive(Debug, Clone, Copy)]
pub struct PromptTemplate {
    pub name: &'static str,
    body: &'static str,
}

impl PromptTemplate {
    pub const fn new(name: &'static str, body: &'static str) -> Self {
        Self { name, body }
    }

    pub fn slots(&self) -> BTreeSet<String> {
        SLOT_PATTERN
            .captures_iter(self.body)
            .map(|caps| caps[1].to_string())
            .collect()
    }

    pub fn render(&self, values: &[(&str, &str)]) -> Result<String, TemplateError> {
        let provided: HashMap<&str, &str> = values.iter().copied().collect();
        let slots = self.slots();

        let unknown: Vec<String> = provided
            .keys()
            .filter(|key| !slots.contains(**key))
            .map(|key| key.to_string())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        if !unknown.is_empty() {
            return Err(TemplateError::UnknownSlots {
                template: self.name,
                slots: unknown,
            });
        }

        let missing: Vec<String> = slots
            .iter()
            .filter(|slot| !provided.contains_key(slot.as_str()))
            .cloned()
            .collect();
        if !missing.is_empty() {
            return Err(TemplateError::MissingSlots {
                template: self.name,
                slots: missing,
            });
        }

        // Values are substituted in a single pass so slot syntax inside a
        // transcript is never expanded.
        let rendered = SLOT_PATTERN.replace_all(self.body, |caps: &regex::Captures| {
            provided.get(&caps[1]).copied().unwrap_or_default().to_string()
        });
        Ok(rendered.into_owned())
    }
}

pub const ANALYST_SYSTEM_PROMPT: &str = "You are a careful clinical documentation assistant. \
You answer strictly from the therapy session material you are given and say so when it \
does not contain the answer.";

pub const MAP_GENERIC: PromptTemplate = PromptTemplate::new(
    "map_generic",
    "Answer the user's question using only the transcript of the therapy session below. \
If the transcript contains nothing relevant, say so briefly.\n\n\
Question:\n{{question}}\n\n\
Session: {{session_name}} ({{session_date}})\n\
Transcript:\n{{transcript}}",
);

pub const MAP_WITH_STRATEGY: PromptTemplate = PromptTemplate::new(
    "map_with_strategy",
    "{{intermediate_question}}\n\n\
Use only the transcript of the therapy session below.\n\n\
Session: {{session_name}} ({{session_date}})\n\
Transcript:\n{{transcript}}",
);

pub const REDUCE_GENERIC: PromptTemplate = PromptTemplate::new(
    "reduce_generic",
    "Several therapy sessions were each analysed separately to answer the question below. \
The per-session answers are listed in chronological order. Synthesize them into one \
coherent answer, pointing out changes over time where relevant.\n\n\
Question:\n{{question}}\n\n\
Per-session answers:\n{{summaries}}",
);

pub const REDUCE_WITH_STRATEGY: PromptTemplate = PromptTemplate::new(
    "reduce_with_strategy",
    "{{synthesis_instructions}}\n\n\
The original request was:\n{{question}}\n\n\
Per-session answers, in chronological order:\n{{summaries}}",
);

pub const STRATEGY_PLANNER: PromptTemplate = PromptTemplate::new(
    "strategy_planner",
    "A clinician wants to analyse several therapy session transcripts with this request:\n\n\
{{question}}\n\n\
Each transcript will be processed on its own first, then the per-transcript answers will \
be merged. Plan this in two parts and reply with a JSON object containing exactly two \
string fields:\n\
- \"intermediate_question\": the question to ask of every single transcript\n\
- \"final_synthesis_instructions\": how to merge the per-transcript answers into the final answer\n\n\
Reply with the JSON object only.",
);

pub const SHORT_PROMPT: PromptTemplate = PromptTemplate::new(
    "short_prompt",
    "Write a title of at most eight words for this analysis request. \
Reply with the title only, without quotes.\n\n{{question}}",
);
