//! Text generation through a local Ollama instance, plus the prompt
//! builders for the chat and summarization paths.

use anyhow::Result;
use async_trait::async_trait;

use crate::config::GenerationConfig;
use crate::http;

/// A text-in, text-out language model.
#[async_trait]
pub trait Generator: Send + Sync {
    fn model_name(&self) -> &str;

    async fn generate(&self, prompt: &str) -> Result<String>;
}

/// Non-streaming completions from `POST /api/generate`.
pub struct OllamaGenerator {
    model: String,
    url: String,
    temperature: f32,
    max_retries: u32,
    client: reqwest::Client,
}

impl OllamaGenerator {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        Ok(Self {
            model: config.model.clone(),
            url: config.url.trim_end_matches('/').to_string(),
            temperature: config.temperature,
            max_retries: config.max_retries,
            client: http::client(config.timeout_secs)?,
        })
    }
}

#[async_trait]
impl Generator for OllamaGenerator {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &str) -> Result<String> {
        let endpoint = format!("{}/api/generate", self.url);
        let body = serde_json::json!({
            "model": self.model,
            "prompt": prompt,
            "stream": false,
            "options": { "temperature": self.temperature },
        });

        let json = http::send_json_with_retry(
            || self.client.post(&endpoint).json(&body),
            self.max_retries,
            "Ollama",
        )
        .await
        .map_err(|e| e.context(format!("is Ollama running at {}?", self.url)))?;

        tracing::debug!(model = %self.model, prompt_chars = prompt.len(), "generated");
        parse_generate_response(&json)
    }
}

fn parse_generate_response(json: &serde_json::Value) -> Result<String> {
    json.get("response")
        .and_then(|r| r.as_str())
        .map(|s| s.trim().to_string())
        .ok_or_else(|| anyhow::anyhow!("Invalid Ollama response: missing response field"))
}

/// Question-answering prompt over retrieved context.
pub fn answer_prompt(context: &str, question: &str) -> String {
    format!(
        "Answer the question based on the following context:\n\n{context}\n\nQuestion: {question}\nAnswer:"
    )
}

/// Whole-document summary prompt.
pub fn summary_prompt(document: &str) -> String {
    format!("Summarize the following document:\n\n{document}\n\nSummary:")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_generate_response() {
        let json = serde_json::json!({"model": "m", "response": "  Paris.\n", "done": true});
        assert_eq!(parse_generate_response(&json).unwrap(), "Paris.");
        assert!(parse_generate_response(&serde_json::json!({"error": "x"})).is_err());
    }

    #[test]
    fn test_prompts_embed_inputs() {
        let p = answer_prompt("ctx one\n\nctx two", "What?");
        assert!(p.starts_with("Answer the question based on the following context:\n\nctx one"));
        assert!(p.ends_with("Question: What?\nAnswer:"));

        let s = summary_prompt("body");
        assert_eq!(s, "Summarize the following document:\n\nbody\n\nSummary:");
    }

    #[test]
    fn test_generator_strips_trailing_slash() {
        let g = OllamaGenerator::new(&GenerationConfig {
            url: "http://localhost:11434/".into(),
            ..GenerationConfig::default()
        })
        .unwrap();
        assert_eq!(g.url, "http://localhost:11434");
        assert_eq!(g.model_name(), "gemma3:4b");
    }
}
