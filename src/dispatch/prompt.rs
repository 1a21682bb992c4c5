//! Persona wording and prompt assembly.

use serde::{Deserialize, Serialize};

use crate::notes::ScoredNote;

/// Context block used when no note matched.
pub const NO_MEMORIES: &str = "No relevant memories found.";

/// Separator between retrieved notes in the context block.
pub const CONTEXT_DELIMITER: &str = "\n---\n";

const STUDY_GUIDE_SYSTEM: &str = r#"You are the "Interview Prep Companion," an AI assistant helping a Computer Science Master's student prepare for technical interviews.

Your goal is to help the user recall their own study notes, behavioral stories, and algorithm patterns.

context from your notes:
{context}

Instructions:
1. When answering, prioritize the user's saved notes (from context). If they ask "What was my story about leadership?", find the specific anecdote they saved.
2. If the user uses /learn, confirm that you have added this to their "Study Guide."
3. Be encouraging but precise. If they ask a technical question, give a brief, high-quality answer suitable for an interview response.

User Query: {query}"#;

const MEMORY_SYSTEM: &str = r"You are a helpful assistant with a long-term memory. The user saves facts with /learn and later asks about them.

Relevant memories:
{context}

Answer using the memories above when they are relevant. If they do not cover the question, say so and answer from general knowledge.

User Query: {query}";

const CONFIRMATION_TEMPLATE: &str =
    r#"Confirm that you have saved this note: "{note}". Reply with exactly: "{confirmation}""#;

/// Built-in persona presets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum PersonaPreset {
    /// Interview prep companion.
    #[default]
    StudyGuide,
    /// General memory assistant.
    Memory,
}

/// Wording and retrieval settings for one assistant persona.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Persona {
    /// Recall system prompt with `{context}` and `{query}` placeholders.
    pub system_template: String,
    /// Learn confirmation prompt with `{note}` and `{confirmation}` placeholders.
    pub confirmation_template: String,
    /// Reply the model is asked to give after a save.
    pub confirmation: String,
    /// Message sent when a client connects.
    pub greeting: String,
    /// Learn command token, without the trailing space.
    pub learn_command: String,
    /// Notes retrieved per recall.
    pub top_k: usize,
}

impl Persona {
    #[must_use]
    pub fn study_guide() -> Self {
        Self {
            system_template: STUDY_GUIDE_SYSTEM.to_string(),
            confirmation_template: CONFIRMATION_TEMPLATE.to_string(),
            confirmation: "📚 Saved to your Study Guide!".to_string(),
            greeting: "🎓 Interview Prep online. I'm ready to quiz you. Use `/learn` to save a LeetCode pattern or behavioral story, or ask me to recall one.".to_string(),
            learn_command: "/learn".to_string(),
            top_k: 3,
        }
    }

    #[must_use]
    pub fn memory() -> Self {
        Self {
            system_template: MEMORY_SYSTEM.to_string(),
            confirmation_template: CONFIRMATION_TEMPLATE.to_string(),
            confirmation: "🧠 Memory saved!".to_string(),
            greeting: "🧠 Memory assistant online. Use `/learn` to save something, or ask me about what you saved.".to_string(),
            learn_command: "/learn".to_string(),
            top_k: 3,
        }
    }

    #[must_use]
    pub fn preset(preset: PersonaPreset) -> Self {
        match preset {
            PersonaPreset::StudyGuide => Self::study_guide(),
            PersonaPreset::Memory => Self::memory(),
        }
    }

    /// Recall system prompt with the context block and query embedded verbatim.
    #[must_use]
    pub fn system_prompt(&self, context: &str, query: &str) -> String {
        render(
            &self.system_template,
            &[("context", context), ("query", query)],
        )
    }

    /// Single-shot prompt asking the model to confirm a save.
    #[must_use]
    pub fn confirmation_prompt(&self, note: &str) -> String {
        render(
            &self.confirmation_template,
            &[("note", note), ("confirmation", &self.confirmation)],
        )
    }
}

/// Join retrieved note texts, or the no-memories marker when there are none.
#[must_use]
pub fn context_block(notes: &[ScoredNote]) -> String {
    if notes.is_empty() {
        return NO_MEMORIES.to_string();
    }
    notes
        .iter()
        .map(|n| n.text.as_str())
        .collect::<Vec<_>>()
        .join(CONTEXT_DELIMITER)
}

/// Replace `{name}` placeholders in one pass.
///
/// Substituted values are never rescanned, so a note containing `{query}`
/// stays as written. Unknown placeholders are left untouched.
fn render(template: &str, values: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        let replaced = after.find('}').and_then(|end| {
            let name = &after[..end];
            values
                .iter()
                .find(|(key, _)| *key == name)
                .map(|(_, value)| (*value, end))
        });
        match replaced {
            Some((value, end)) => {
                out.push_str(value);
                rest = &after[end + 1..];
            }
            None => {
                out.push('{');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}
