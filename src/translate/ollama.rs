//! Ollama inference backend
//!
//! Talks to a locally hosted Ollama server. Generation uses the streaming
//! `/api/generate` endpoint, which answers with newline-delimited JSON:
//! ```json
//! {"model":"gemma3n:e2b","response":"Hol","done":false}
//! ```

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, trace};

use super::engine::{EngineError, InferenceEngine, ModelSpec};
use super::TranslationConfig;

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    prompt: Option<&'a str>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    keep_alive: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct GenerateChunk {
    #[serde(default)]
    response: Option<String>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    models: Vec<TagInfo>,
}

#[derive(Debug, Deserialize)]
struct TagInfo {
    name: String,
}

/// Splits a byte stream into complete lines
#[derive(Debug, Default)]
pub struct LineDecoder {
    buf: Vec<u8>,
}

impl LineDecoder {
    /// Feed a chunk and return every line it completed
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(chunk);
        let mut lines = Vec::new();
        while let Some(pos) = self.buf.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line).trim().to_string();
            if !line.is_empty() {
                lines.push(line);
            }
        }
        lines
    }

    /// Whatever is left once the stream ended
    pub fn finish(&mut self) -> Option<String> {
        let rest = String::from_utf8_lossy(&self.buf).trim().to_string();
        self.buf.clear();
        (!rest.is_empty()).then_some(rest)
    }
}

/// Accumulates streamed generation chunks
#[derive(Debug, Default)]
struct GenerationAccumulator {
    text: String,
    done: bool,
}

impl GenerationAccumulator {
    fn feed(&mut self, line: &str) -> Result<(), EngineError> {
        let chunk: GenerateChunk = serde_json::from_str(line)
            .map_err(|e| EngineError::Protocol(format!("{e}: {line}")))?;
        if let Some(error) = chunk.error {
            return Err(EngineError::Inference(error));
        }
        if let Some(piece) = chunk.response {
            self.text.push_str(&piece);
        }
        self.done |= chunk.done;
        Ok(())
    }

    fn finish(self) -> Result<String, EngineError> {
        if !self.done {
            return Err(EngineError::Protocol("stream ended before done".to_string()));
        }
        Ok(self.text.trim().to_string())
    }
}

/// Inference engine backed by an Ollama server
pub struct OllamaEngine {
    client: Client,
    base_url: String,
    keep_alive: String,
    temperature: f32,
}

impl OllamaEngine {
    pub fn new(config: &TranslationConfig) -> Result<Self, EngineError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| EngineError::Unreachable(e.to_string()))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            keep_alive: config.keep_alive.clone(),
            temperature: config.temperature,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn list_models(&self) -> Result<Vec<String>, EngineError> {
        let response = self
            .client
            .get(self.url("/api/tags"))
            .timeout(Duration::from_secs(10))
            .send()
            .await
            .map_err(|e| EngineError::Unreachable(format!("{}: {}", self.base_url, e)))?;

        if !response.status().is_success() {
            return Err(EngineError::Unreachable(format!(
                "listing models failed with status {}",
                response.status()
            )));
        }

        let tags: TagsResponse = response
            .json()
            .await
            .map_err(|e| EngineError::Protocol(e.to_string()))?;
        Ok(tags.models.into_iter().map(|m| m.name).collect())
    }
}

/// Whether `wanted` names one of the installed models (an untagged name matches `:latest`)
pub fn model_installed(installed: &[String], wanted: &str) -> bool {
    installed.iter().any(|name| {
        name == wanted
            || (!wanted.contains(':') && name.strip_suffix(":latest") == Some(wanted))
    })
}

#[async_trait]
impl InferenceEngine for OllamaEngine {
    async fn load(&self, model: &ModelSpec) -> Result<(), EngineError> {
        let installed = self.list_models().await?;
        if !model_installed(&installed, &model.name) {
            return Err(EngineError::ModelNotFound(model.name.clone()));
        }

        // A generate call without a prompt loads the weights into memory.
        let request = GenerateRequest {
            model: &model.name,
            prompt: None,
            stream: false,
            keep_alive: Some(serde_json::Value::String(self.keep_alive.clone())),
            options: None,
        };
        let response = self
            .client
            .post(self.url("/api/generate"))
            .json(&request)
            .send()
            .await
            .map_err(|e| EngineError::Unreachable(e.to_string()))?;
        if !response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EngineError::Inference(format!("warm-up failed: {}", body.trim())));
        }

        info!("Ollama loaded '{}' from {}", model.name, self.base_url);
        Ok(())
    }

    async fn generate(&self, model: &ModelSpec, prompt: &str) -> Result<String, EngineError> {
        let request = GenerateRequest {
            model: &model.name,
            prompt: Some(prompt),
            stream: true,
            keep_alive: Some(serde_json::Value::String(self.keep_alive.clone())),
            options: Some(serde_json::json!({ "temperature": self.temperature })),
        };

        let response = self
            .client
            .post(self.url("/api/generate"))
            .json(&request)
            .send()
            .await
            .map_err(|e| EngineError::Unreachable(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(EngineError::Inference(format!("{}: {}", status, body.trim())));
        }

        let mut decoder = LineDecoder::default();
        let mut acc = GenerationAccumulator::default();
        let mut stream = response.bytes_stream();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| EngineError::Inference(e.to_string()))?;
            for line in decoder.push(&chunk) {
                trace!("ollama chunk: {}", line);
                acc.feed(&line)?;
            }
        }
        if let Some(line) = decoder.finish() {
            acc.feed(&line)?;
        }

        let text = acc.finish()?;
        debug!("Generated {} chars with '{}'", text.len(), model.name);
        Ok(text)
    }

    async fn unload(&self, model: &ModelSpec) -> Result<(), EngineError> {
        let request = GenerateRequest {
            model: &model.name,
            prompt: None,
            stream: false,
            keep_alive: Some(serde_json::Value::from(0)),
            options: None,
        };
        self.client
            .post(self.url("/api/generate"))
            .timeout(Duration::from_secs(5))
            .json(&request)
            .send()
            .await
            .map_err(|e| EngineError::Unreachable(e.to_string()))?;
        debug!("Ollama unloaded '{}'", model.name);
        Ok(())
    }
}
