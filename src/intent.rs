//! Intent routing for chat messages.
//!
//! A message is either a question to answer from retrieved context or a
//! request that needs a different path (currently whole-document summary).
//! Classification is best-effort: a classifier that fails yields
//! [`Intent::Other`], which the chat pipeline answers like a question.

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;

use crate::config::{GenerationConfig, IntentConfig};
use crate::generation::{Generator, OllamaGenerator};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    QuestionAnswering,
    SummarizeFullDocument,
    SummarizeSection,
    FindSection,
    CompareSections,
    Other,
}

impl Intent {
    pub const ALL: [Intent; 6] = [
        Intent::QuestionAnswering,
        Intent::SummarizeFullDocument,
        Intent::SummarizeSection,
        Intent::FindSection,
        Intent::CompareSections,
        Intent::Other,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Intent::QuestionAnswering => "question_answering",
            Intent::SummarizeFullDocument => "summarize_full_document",
            Intent::SummarizeSection => "summarize_section",
            Intent::FindSection => "find_section",
            Intent::CompareSections => "compare_sections",
            Intent::Other => "other",
        }
    }

    /// Map a classifier label to an intent.
    ///
    /// Labels are normalized (case, spaces, punctuation) and matched
    /// exactly first, then by containment, so `"Summarize Full Document"`
    /// and `"intent: find_section."` both resolve. `"Q&A"` is accepted as
    /// question answering. Anything else is [`Intent::Other`].
    pub fn from_label(label: &str) -> Intent {
        let norm = normalize(label);
        if norm == "q_a" || norm == "qa" {
            return Intent::QuestionAnswering;
        }
        if let Some(intent) = Self::ALL.iter().find(|i| i.label() == norm) {
            return *intent;
        }
        // Longer labels first so summarize_full_document wins over a
        // shorter label it happens to contain.
        let mut by_len = Self::ALL;
        by_len.sort_by_key(|i| std::cmp::Reverse(i.label().len()));
        by_len
            .into_iter()
            .filter(|i| *i != Intent::Other)
            .find(|i| norm.contains(i.label()))
            .unwrap_or(Intent::Other)
    }
}

impl std::fmt::Display for Intent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

fn normalize(label: &str) -> String {
    let mut out = String::with_capacity(label.len());
    for c in label.trim().chars() {
        if c.is_alphanumeric() {
            out.extend(c.to_lowercase());
        } else if !out.ends_with('_') {
            out.push('_');
        }
    }
    out.trim_matches('_').to_string()
}

#[async_trait]
pub trait IntentClassifier: Send + Sync {
    async fn classify(&self, message: &str) -> Intent;
}

/// Treats every message as a question.
pub struct DisabledClassifier;

#[async_trait]
impl IntentClassifier for DisabledClassifier {
    async fn classify(&self, _message: &str) -> Intent {
        Intent::QuestionAnswering
    }
}

/// Zero-shot classification with an Ollama model.
pub struct OllamaIntentClassifier {
    generator: Arc<dyn Generator>,
}

impl OllamaIntentClassifier {
    pub fn new(generator: Arc<dyn Generator>) -> Self {
        Self { generator }
    }
}

#[async_trait]
impl IntentClassifier for OllamaIntentClassifier {
    async fn classify(&self, message: &str) -> Intent {
        match self.generator.generate(&classification_prompt(message)).await {
            Ok(label) => {
                let intent = Intent::from_label(&label);
                tracing::debug!(%intent, raw = %label.trim(), "classified intent");
                intent
            }
            Err(e) => {
                tracing::warn!(error = %format!("{e:#}"), "intent classification failed");
                Intent::Other
            }
        }
    }
}

fn classification_prompt(message: &str) -> String {
    let labels: Vec<&str> = Intent::ALL.iter().map(|i| i.label()).collect();
    format!(
        "Classify the user's message into exactly one of these intents: {}.\n\
         Use summarize_full_document only when the user asks for a summary of the whole document.\n\
         Reply with the intent label only.\n\nMessage: {}\nIntent:",
        labels.join(", "),
        message
    )
}

pub fn create_classifier(
    config: &IntentConfig,
    generation: &GenerationConfig,
) -> Result<Arc<dyn IntentClassifier>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledClassifier)),
        "ollama" => {
            let gen_config = GenerationConfig {
                url: config.url.clone().unwrap_or_else(|| generation.url.clone()),
                model: config.model.clone(),
                temperature: 0.0,
                ..generation.clone()
            };
            Ok(Arc::new(OllamaIntentClassifier::new(Arc::new(
                OllamaGenerator::new(&gen_config)?,
            ))))
        }
        other => anyhow::bail!("Unknown intent provider: {}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedGenerator(Result<&'static str, &'static str>);

    #[async_trait]
    impl Generator for FixedGenerator {
        fn model_name(&self) -> &str {
            "fixed"
        }

        async fn generate(&self, _prompt: &str) -> Result<String> {
            match self.0 {
                Ok(s) => Ok(s.to_string()),
                Err(e) => Err(anyhow::anyhow!(e)),
            }
        }
    }

    #[test]
    fn test_from_label_exact_and_legacy() {
        assert_eq!(Intent::from_label("find_section"), Intent::FindSection);
        assert_eq!(Intent::from_label("Q&A"), Intent::QuestionAnswering);
        assert_eq!(
            Intent::from_label("Summarize Full Document"),
            Intent::SummarizeFullDocument
        );
        assert_eq!(Intent::from_label("OTHER"), Intent::Other);
    }

    #[test]
    fn test_from_label_containment_and_fallback() {
        assert_eq!(
            Intent::from_label("Intent: summarize_section."),
            Intent::SummarizeSection
        );
        assert_eq!(
            Intent::from_label("the answer is compare_sections"),
            Intent::CompareSections
        );
        assert_eq!(Intent::from_label("banana"), Intent::Other);
        assert_eq!(Intent::from_label(""), Intent::Other);
    }

    #[test]
    fn test_intent_serializes_snake_case() {
        let json = serde_json::to_string(&Intent::SummarizeFullDocument).unwrap();
        assert_eq!(json, "\"summarize_full_document\"");
    }

    #[tokio::test]
    async fn test_ollama_classifier_maps_and_degrades() {
        let ok = OllamaIntentClassifier::new(Arc::new(FixedGenerator(Ok(
            "summarize_full_document",
        ))));
        assert_eq!(ok.classify("sum it up").await, Intent::SummarizeFullDocument);

        let failing = OllamaIntentClassifier::new(Arc::new(FixedGenerator(Err("down"))));
        assert_eq!(failing.classify("anything").await, Intent::Other);

        assert_eq!(
            DisabledClassifier.classify("summarize").await,
            Intent::QuestionAnswering
        );
    }

    #[test]
    fn test_classification_prompt_lists_labels() {
        let p = classification_prompt("hi");
        for intent in Intent::ALL {
            assert!(p.contains(intent.label()));
        }
        assert!(p.ends_with("Message: hi\nIntent:"));
    }
}
