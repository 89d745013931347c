use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::format::DeclaredFormat;
use super::model::LanguageModel;
use super::prompt::SYSTEM_PROMPT;
use super::NormalizationError;
use crate::pipeline_config::NormalizerConfig;

/// Low temperature keeps answers close to the document.
const TEMPERATURE: f32 = 0.1;
/// One short value plus a one-line rationale.
const MAX_ANSWER_TOKENS: u32 = 64;
/// Budget for the model-list request, independent of the generation timeout.
const TAGS_TIMEOUT: Duration = Duration::from_secs(2);

/// Ollama HTTP client for local inference.
pub struct OllamaClient {
    base_url: String,
    model: String,
    client: reqwest::blocking::Client,
    timeout_secs: u64,
}

impl OllamaClient {
    pub fn new(base_url: &str, model: &str, timeout_secs: u64) -> Result<Self, NormalizationError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| NormalizationError::HttpClient(e.to_string()))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            client,
            timeout_secs,
        })
    }

    pub fn from_config(config: &NormalizerConfig) -> Result<Self, NormalizationError> {
        Self::new(&config.base_url, &config.model, config.timeout_secs)
    }

    fn list_models(&self) -> Result<Vec<String>, NormalizationError> {
        let url = format!("{}/api/tags", self.base_url);
        let response = self
            .client
            .get(&url)
            .timeout(TAGS_TIMEOUT)
            .send()
            .map_err(|e| self.map_send_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(NormalizationError::Service {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: TagsResponse = response
            .json()
            .map_err(|e| NormalizationError::ResponseParsing(e.to_string()))?;
        Ok(parsed.models.into_iter().map(|m| m.name).collect())
    }

    fn map_send_error(&self, e: reqwest::Error) -> NormalizationError {
        if e.is_connect() {
            NormalizationError::Connection(self.base_url.clone())
        } else if e.is_timeout() {
            NormalizationError::Timeout(self.timeout_secs)
        } else {
            NormalizationError::HttpClient(e.to_string())
        }
    }
}

/// Request body for Ollama /api/generate
#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    system: String,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Serialize)]
struct GenerateOptions {
    temperature: f32,
    num_predict: u32,
}

/// Response body from Ollama /api/generate
#[derive(Deserialize)]
struct GenerateResponse {
    response: String,
}

/// Response body from Ollama /api/tags
#[derive(Deserialize)]
struct TagsResponse {
    models: Vec<TagsModel>,
}

#[derive(Deserialize)]
struct TagsModel {
    name: String,
}

impl LanguageModel for OllamaClient {
    fn name(&self) -> &str {
        &self.model
    }

    fn is_available(&self) -> Result<bool, NormalizationError> {
        let models = self.list_models()?;
        Ok(models.iter().any(|m| m.starts_with(&self.model)))
    }

    fn complete(&self, prompt: &str, format: &DeclaredFormat) -> Result<String, NormalizationError> {
        let url = format!("{}/api/generate", self.base_url);
        let body = GenerateRequest {
            model: &self.model,
            prompt,
            system: format!("{SYSTEM_PROMPT}\nRequired format: {}", format.description),
            stream: false,
            options: GenerateOptions {
                temperature: TEMPERATURE,
                num_predict: MAX_ANSWER_TOKENS,
            },
        };

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .map_err(|e| self.map_send_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(NormalizationError::Service {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: GenerateResponse = response
            .json()
            .map_err(|e| NormalizationError::ResponseParsing(e.to_string()))?;
        Ok(parsed.response)
    }
}
