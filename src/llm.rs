//! Ollama generation backend.
//!
//! Model resolution follows a strict precedence: explicit override, then
//! the `OLLAMA_MODEL` environment variable, then the preferred list
//! intersected with whatever is installed locally, then any installed
//! model. "Nothing suitable" is a typed error, not a panic from deep in a
//! call chain.

use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

pub const PREFERRED_MODELS: &[&str] = &[
    "qwen2.5:3b",
    "qwen:0.5b",
    "qwen2.5:0.5b",
    "qwen2.5:14b",
    "qwen2.5:7b",
    "llama3.1:8b",
    "mistral:7b",
];

const OLLAMA_DEFAULT_HOST: &str = "http://localhost:11434";
const DEFAULT_TIMEOUT_SECS: u64 = 600;

#[derive(Error, Debug)]
pub enum LlmError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error(
        "No suitable Ollama model found locally. Pull one of: {}",
        PREFERRED_MODELS.join(", ")
    )]
    NoModelAvailable,

    #[error("Ollama generation failed: {0}")]
    Generation(String),
}

pub type Result<T> = std::result::Result<T, LlmError>;

fn request_timeout() -> Duration {
    let secs = match std::env::var("OLLAMA_TIMEOUT_SEC") {
        Ok(raw) => match raw.parse::<u64>() {
            Ok(v) if v >= 1 => v,
            _ => {
                log::warn!(
                    "Invalid OLLAMA_TIMEOUT_SEC={:?}. Falling back to {}.",
                    raw,
                    DEFAULT_TIMEOUT_SECS
                );
                DEFAULT_TIMEOUT_SECS
            }
        },
        Err(_) => DEFAULT_TIMEOUT_SECS,
    };
    Duration::from_secs(secs)
}

/// Pick the first preferred model that is installed, else any installed
/// model.
fn select_preferred_model(installed: &[String]) -> Option<String> {
    for preferred in PREFERRED_MODELS {
        if installed.iter().any(|m| m == preferred) {
            return Some(preferred.to_string());
        }
    }
    installed.first().cloned()
}

/// Resolution: explicit override > environment > installed models.
fn choose_model(
    explicit: Option<&str>,
    env_model: Option<String>,
    installed: &[String],
) -> Option<String> {
    explicit
        .map(|m| m.to_string())
        .or(env_model)
        .or_else(|| select_preferred_model(installed))
}

pub struct OllamaClient {
    host: String,
    pub model: String,
    client: reqwest::blocking::Client,
}

#[derive(Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<TagModel>,
}

#[derive(Deserialize)]
struct TagModel {
    name: String,
}

#[derive(Deserialize, Default)]
struct GenerateResponse {
    #[serde(default)]
    response: String,
    #[serde(default)]
    error: String,
}

impl OllamaClient {
    pub fn create(host: Option<&str>, model_override: Option<&str>) -> Result<Self> {
        let host = host
            .map(|h| h.to_string())
            .or_else(|| std::env::var("OLLAMA_HOST").ok())
            .unwrap_or_else(|| OLLAMA_DEFAULT_HOST.to_string())
            .trim_end_matches('/')
            .to_string();

        let client = reqwest::blocking::Client::builder()
            .timeout(request_timeout())
            .build()?;

        let env_model = std::env::var("OLLAMA_MODEL").ok().filter(|m| !m.is_empty());
        let model = match choose_model(model_override, env_model, &[]) {
            Some(m) => m,
            None => {
                let installed = list_local_models(&client, &host);
                select_preferred_model(&installed).ok_or(LlmError::NoModelAvailable)?
            }
        };

        log::info!("Using Ollama model: {}", model);
        Ok(Self {
            host,
            model,
            client,
        })
    }

    /// Generate a completion at temperature 0. A missing-model response
    /// triggers one retry with the next preferred installed model, then
    /// the failure is final.
    pub fn generate(&mut self, prompt: &str) -> Result<String> {
        let resp = self.request(&self.model, prompt)?;

        let resp = if Self::is_missing_model(&resp) {
            let installed: Vec<String> = list_local_models(&self.client, &self.host)
                .into_iter()
                .filter(|m| *m != self.model)
                .collect();
            match select_preferred_model(&installed) {
                Some(fallback) => {
                    log::warn!(
                        "Model '{}' not found in Ollama. Retrying with '{}'.",
                        self.model,
                        fallback
                    );
                    self.model = fallback;
                    self.request(&self.model, prompt)?
                }
                None => resp,
            }
        } else {
            resp
        };

        if !resp.status.is_success() {
            return Err(LlmError::Generation(format!(
                "status {}: {}",
                resp.status, resp.body.error
            )));
        }
        Ok(resp.body.response.trim().to_string())
    }

    fn request(&self, model: &str, prompt: &str) -> Result<RawResponse> {
        let url = format!("{}/api/generate", self.host);
        let resp = self
            .client
            .post(&url)
            .json(&serde_json::json!({
                "model": model,
                "prompt": prompt,
                "stream": false,
                "options": { "temperature": 0.0 },
            }))
            .send()
            .map_err(|e| LlmError::Generation(e.to_string()))?;
        let status = resp.status();
        let body: GenerateResponse = resp.json().unwrap_or_default();
        Ok(RawResponse { status, body })
    }

    fn is_missing_model(resp: &RawResponse) -> bool {
        if resp.status != reqwest::StatusCode::NOT_FOUND {
            return false;
        }
        let msg = resp.body.error.to_lowercase();
        msg.contains("model") && (msg.contains("not found") || msg.contains("no such"))
    }
}

struct RawResponse {
    status: reqwest::StatusCode,
    body: GenerateResponse,
}

/// Installed models, via the tags endpoint. Any failure here reads as
/// "nothing installed"; the caller decides whether that is fatal.
fn list_local_models(client: &reqwest::blocking::Client, host: &str) -> Vec<String> {
    let url = format!("{}/api/tags", host);
    let resp = match client.get(&url).timeout(Duration::from_secs(10)).send() {
        Ok(r) => r,
        Err(_) => return Vec::new(),
    };
    if !resp.status().is_success() {
        return Vec::new();
    }
    match resp.json::<TagsResponse>() {
        Ok(tags) => tags.models.into_iter().map(|m| m.name).collect(),
        Err(_) => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn installed(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[test]
    fn test_explicit_override_wins() {
        let chosen = choose_model(
            Some("custom:latest"),
            Some("env-model".to_string()),
            &installed(&["qwen2.5:3b"]),
        );
        assert_eq!(chosen.as_deref(), Some("custom:latest"));
    }

    #[test]
    fn test_env_beats_installed_list() {
        let chosen = choose_model(None, Some("env-model".to_string()), &installed(&["qwen2.5:3b"]));
        assert_eq!(chosen.as_deref(), Some("env-model"));
    }

    #[test]
    fn test_preferred_order_respected() {
        let chosen = select_preferred_model(&installed(&["mistral:7b", "qwen2.5:7b"]));
        assert_eq!(chosen.as_deref(), Some("qwen2.5:7b"));
    }

    #[test]
    fn test_falls_back_to_any_installed() {
        let chosen = select_preferred_model(&installed(&["weird-model:latest"]));
        assert_eq!(chosen.as_deref(), Some("weird-model:latest"));
    }

    #[test]
    fn test_nothing_installed_is_none() {
        assert_eq!(select_preferred_model(&[]), None);
        assert_eq!(choose_model(None, None, &[]), None);
    }
}
