// ABOUTME: Sentence analysis via a hosted language model
// ABOUTME: Turns a sentence into vocabulary quiz items through an OpenAI-compatible chat API

use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

const SYSTEM_PROMPT: &str = "You are an English language expert. Analyze the given sentence.";

const FORMAT_INSTRUCTIONS: &str = r#"The output must be a JSON object with this shape:
{"words": [{"word": string, "meaning": string, "options": [string, string, string, string]}], "source_guess": string}
- "word": the difficult English word or expression
- "meaning": its correct Chinese meaning in the original sentence
- "options": 4 Chinese meanings, one of which is exactly "meaning"
- "source_guess": a guess of the exact source (show, episode, time and context)"#;

/// Errors from sentence analysis. Surfaced to the caller as-is, never retried.
#[derive(Error, Debug)]
pub enum AnalyzeError {
    /// No API key configured
    #[error("LLM not initialized. Check API Key.")]
    MissingCredentials,

    /// The model endpoint failed or was unreachable
    #[error("upstream error: {0}")]
    Upstream(String),

    /// The model replied with something that is not the expected JSON
    #[error("malformed model output: {0}")]
    MalformedOutput(String),
}

/// Language-model endpoint settings
#[derive(Clone)]
pub struct LlmConfig {
    /// Base URL of an OpenAI-compatible API
    pub base_url: String,
    /// Model name
    pub model: String,
    /// Bearer token
    pub api_key: Option<String>,
    /// Request timeout
    pub timeout: Duration,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.siliconflow.cn/v1".to_string(),
            model: "deepseek-ai/DeepSeek-V3".to_string(),
            api_key: None,
            timeout: Duration::from_secs(60),
        }
    }
}

impl fmt::Debug for LlmConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LlmConfig")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// One quiz item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WordInfo {
    /// The difficult word or expression
    pub word: String,
    /// Correct meaning in context
    #[serde(default)]
    pub meaning: String,
    /// Multiple-choice options
    #[serde(default)]
    pub options: Vec<String>,
}

impl WordInfo {
    /// Make sure the correct meaning is one of the options by replacing the
    /// first option when it is missing
    fn ensure_meaning_in_options(&mut self) {
        if self.meaning.is_empty() || self.options.is_empty() {
            return;
        }
        if !self.options.contains(&self.meaning) {
            self.options[0] = self.meaning.clone();
        }
    }
}

/// Structured analysis of one sentence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    /// Quiz items
    pub words: Vec<WordInfo>,
    /// Where the sentence probably comes from
    #[serde(rename = "source")]
    pub source_guess: String,
    /// When the analysis ran
    pub timestamp: String,
    /// The analysed sentence
    pub sentence: String,
    /// Token accounting reported by the API, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_usage: Option<serde_json::Value>,
}

/// Anything that can turn a sentence into quiz items
pub trait Analyzer: Send + Sync {
    /// Analyse a sentence. Blocking.
    fn analyze(&self, sentence: &str) -> Result<AnalysisResult, AnalyzeError>;
}

/// What the model is asked to produce
#[derive(Debug, Deserialize)]
struct ModelOutput {
    #[serde(default)]
    words: Vec<WordInfo>,
    #[serde(default = "unknown_source")]
    source_guess: String,
}

fn unknown_source() -> String {
    "Unknown".to_string()
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: String,
}

/// Strip Markdown code fences and surrounding chatter from a model reply
fn extract_json(content: &str) -> &str {
    let trimmed = content.trim();
    match (trimmed.find('{'), trimmed.rfind('}')) {
        (Some(start), Some(end)) if start < end => &trimmed[start..=end],
        _ => trimmed,
    }
}

fn parse_model_output(content: &str) -> Result<ModelOutput, AnalyzeError> {
    let mut output: ModelOutput = serde_json::from_str(extract_json(content))
        .map_err(|e| AnalyzeError::MalformedOutput(e.to_string()))?;
    for word in &mut output.words {
        word.ensure_meaning_in_options();
    }
    Ok(output)
}

fn user_prompt(sentence: &str) -> String {
    format!(
        "Extract up to 4 difficult vocabulary words (IELTS level) from the following sentence.\n\
         For each word, provide its correct Chinese meaning and 3 other confusing Chinese meanings as options.\n\
         CRITICAL: Ensure the 'meaning' field is EXACTLY present in the 'options' list.\n\
         Also find out the exact source.\n\
         IMPORTANT: Return ONLY PURE JSON. Do NOT include comments (like //), markdown blocks (```json), or any other text.\n\n\
         Sentence: {sentence}\n\n\
         {FORMAT_INSTRUCTIONS}"
    )
}

/// Analyzer backed by an OpenAI-compatible `/chat/completions` endpoint
pub struct LlmAnalyzer {
    config: LlmConfig,
    agent: ureq::Agent,
}

impl LlmAnalyzer {
    /// Create an analyzer
    pub fn new(config: LlmConfig) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(config.timeout).build();
        Self { config, agent }
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'))
    }
}

impl Analyzer for LlmAnalyzer {
    fn analyze(&self, sentence: &str) -> Result<AnalysisResult, AnalyzeError> {
        let api_key = self
            .config
            .api_key
            .as_deref()
            .filter(|k| !k.is_empty())
            .ok_or(AnalyzeError::MissingCredentials)?;

        let body = json!({
            "model": self.config.model,
            "messages": [
                { "role": "system", "content": SYSTEM_PROMPT },
                { "role": "user", "content": user_prompt(sentence) },
            ],
        });

        let response = self
            .agent
            .post(&self.endpoint())
            .set("Authorization", &format!("Bearer {}", api_key))
            .send_json(body)
            .map_err(|e| match e {
                ureq::Error::Status(code, response) => AnalyzeError::Upstream(format!(
                    "HTTP {}: {}",
                    code,
                    response.into_string().unwrap_or_default()
                )),
                ureq::Error::Transport(t) => AnalyzeError::Upstream(t.to_string()),
            })?;

        let chat: ChatResponse = response
            .into_json()
            .map_err(|e| AnalyzeError::Upstream(format!("invalid response body: {}", e)))?;

        let content = chat
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| AnalyzeError::MalformedOutput("no choices in response".to_string()))?;

        let output = parse_model_output(&content)?;
        log::debug!(
            "Analysed sentence: {} word(s), source: {}",
            output.words.len(),
            output.source_guess
        );

        Ok(AnalysisResult {
            words: output.words,
            source_guess: output.source_guess,
            timestamp: super::now_timestamp(),
            sentence: sentence.to_string(),
            token_usage: chat.usage,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_json() {
        let output = parse_model_output(
            r#"{"words":[{"word":"reimbursement","meaning":"报销","options":["报销","补偿","退款","奖励"]}],"source_guess":"Friends S01E12"}"#,
        )
        .unwrap();

        assert_eq!(output.words.len(), 1);
        assert_eq!(output.words[0].word, "reimbursement");
        assert_eq!(output.source_guess, "Friends S01E12");
    }

    #[test]
    fn test_parse_fenced_json() {
        let content = "```json\n{\"words\": [], \"source_guess\": \"a podcast\"}\n```";
        let output = parse_model_output(content).unwrap();

        assert!(output.words.is_empty());
        assert_eq!(output.source_guess, "a podcast");
    }

    #[test]
    fn test_missing_source_defaults_to_unknown() {
        let output = parse_model_output(r#"{"words": []}"#).unwrap();
        assert_eq!(output.source_guess, "Unknown");
    }

    #[test]
    fn test_meaning_forced_into_options() {
        let output = parse_model_output(
            r#"{"words":[{"word":"candid","meaning":"坦率的","options":["糖果","候选","蜡烛","照片"]}],"source_guess":"x"}"#,
        )
        .unwrap();

        assert_eq!(output.words[0].options[0], "坦率的");
        assert_eq!(output.words[0].options.len(), 4);
    }

    #[test]
    fn test_empty_options_untouched() {
        let mut word = WordInfo {
            word: "w".into(),
            meaning: "m".into(),
            options: vec![],
        };
        word.ensure_meaning_in_options();
        assert!(word.options.is_empty());
    }

    #[test]
    fn test_malformed_output() {
        let err = parse_model_output("I cannot help with that.").unwrap_err();
        assert!(matches!(err, AnalyzeError::MalformedOutput(_)));
    }

    #[test]
    fn test_missing_credentials_short_circuits() {
        let analyzer = LlmAnalyzer::new(LlmConfig {
            // Unroutable: any network attempt would fail differently
            base_url: "http://127.0.0.1:9".to_string(),
            ..LlmConfig::default()
        });

        let err = analyzer.analyze("Hello there").unwrap_err();
        assert!(matches!(err, AnalyzeError::MissingCredentials));
        assert_eq!(err.to_string(), "LLM not initialized. Check API Key.");
    }

    #[test]
    fn test_debug_redacts_key() {
        let config = LlmConfig {
            api_key: Some("sk-secret".to_string()),
            ..LlmConfig::default()
        };
        let debug = format!("{:?}", config);
        assert!(!debug.contains("sk-secret"));
        assert!(debug.contains("<redacted>"));
    }

    #[test]
    fn test_result_serializes_source_key() {
        let result = AnalysisResult {
            words: vec![],
            source_guess: "Unknown".into(),
            timestamp: "2024-01-01 00:00:00".into(),
            sentence: "s".into(),
            token_usage: None,
        };
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["source"], "Unknown");
        assert!(value.get("token_usage").is_none());
    }
}
