//! External translation providers.
//!
//! The pipeline only needs one capability from a provider: turn a piece of
//! text in the source language into the target language. The HTTP
//! implementation speaks the LibreTranslate JSON API, which Argos-based
//! local servers and hosted instances both expose.

use crate::error::{PipelineError, PipelineResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

#[async_trait]
pub trait TranslationProvider: Send + Sync {
    /// Translate `text` from `source_lang` to `target_lang`.
    ///
    /// Transient problems (timeouts, rate limiting, 5xx) must surface as
    /// [`PipelineError::TransientTranslationFailure`] so the client retries them.
    async fn translate(
        &self,
        text: &str,
        source_lang: &str,
        target_lang: &str,
    ) -> PipelineResult<String>;

    /// Verify the provider can serve the language pair before any work starts.
    async fn health_check(&self, _source_lang: &str, _target_lang: &str) -> PipelineResult<()> {
        Ok(())
    }

    fn provider_name(&self) -> &str;
}

#[derive(Debug, Serialize)]
struct TranslateRequest<'a> {
    q: &'a str,
    source: &'a str,
    target: &'a str,
    format: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    api_key: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct TranslateResponse {
    #[serde(rename = "translatedText")]
    translated_text: String,
}

#[derive(Debug, Deserialize)]
struct LanguageInfo {
    code: String,
    #[serde(default)]
    targets: Vec<String>,
}

/// LibreTranslate-compatible HTTP provider
#[derive(Debug, Clone)]
pub struct HttpTranslationProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpTranslationProvider {
    pub fn new(base_url: &str, api_key: Option<String>) -> PipelineResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| {
                PipelineError::ProviderUnavailable(format!("failed to build HTTP client: {}", e))
            })?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }
}

#[async_trait]
impl TranslationProvider for HttpTranslationProvider {
    async fn translate(
        &self,
        text: &str,
        source_lang: &str,
        target_lang: &str,
    ) -> PipelineResult<String> {
        let request = TranslateRequest {
            q: text,
            source: source_lang,
            target: target_lang,
            format: "text",
            api_key: self.api_key.as_deref(),
        };

        let response = self
            .client
            .post(self.endpoint("translate"))
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                PipelineError::TransientTranslationFailure(format!("request failed: {}", e))
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|e| format!("<failed to read body: {}>", e));
            return Err(classify_status(status, &body));
        }

        let parsed: TranslateResponse = response.json().await.map_err(|e| {
            PipelineError::TransientTranslationFailure(format!("unparsable response: {}", e))
        })?;

        debug!("Provider translated {} chars", text.chars().count());
        Ok(parsed.translated_text)
    }

    async fn health_check(&self, source_lang: &str, target_lang: &str) -> PipelineResult<()> {
        let response = self
            .client
            .get(self.endpoint("languages"))
            .send()
            .await
            .map_err(|e| {
                PipelineError::ProviderUnavailable(format!(
                    "cannot reach {}: {}",
                    self.base_url, e
                ))
            })?;

        if !response.status().is_success() {
            return Err(PipelineError::ProviderUnavailable(format!(
                "language listing failed with {}",
                response.status()
            )));
        }

        let languages: Vec<LanguageInfo> = response.json().await.map_err(|e| {
            PipelineError::ProviderUnavailable(format!("unparsable language listing: {}", e))
        })?;

        let supported = languages
            .iter()
            .any(|l| l.code == source_lang && l.targets.iter().any(|t| t == target_lang));
        if !supported {
            return Err(PipelineError::ProviderUnavailable(format!(
                "no {} -> {} translation installed at {}",
                source_lang, target_lang, self.base_url
            )));
        }

        info!("Provider at {} supports {} -> {}", self.base_url, source_lang, target_lang);
        Ok(())
    }

    fn provider_name(&self) -> &str {
        "LibreTranslate"
    }
}

/// 429 and 5xx are worth retrying. Bad credentials mean no request can
/// succeed. Any other 4xx is about this one text and will not get better.
fn classify_status(status: reqwest::StatusCode, body: &str) -> PipelineError {
    let message = format!("provider returned {}: {}", status, body);
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        PipelineError::TransientTranslationFailure(message)
    } else if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
        PipelineError::ProviderUnavailable(message)
    } else {
        PipelineError::TranslationRejected(message)
    }
}
