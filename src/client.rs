//! Translation client: pass-through rules, retry, and the failure policy
//! wrapped around a [`TranslationProvider`].

use crate::error::{PipelineError, PipelineResult};
use crate::metrics::PipelineMetrics;
use crate::provider::TranslationProvider;
use crate::retry::{with_retry_if, RetryPolicy};
use serde::{Deserialize, Serialize};
use std::ops::RangeInclusive;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, warn};

/// What happens to a leaf whose provider calls all failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailurePolicy {
    /// Keep the original text, log the failure, and carry on.
    PassThrough,
    /// Fail the batch so it is retried on the next run.
    Propagate,
}

impl FromStr for FailurePolicy {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pass-through" | "passthrough" => Ok(FailurePolicy::PassThrough),
            "propagate" => Ok(FailurePolicy::Propagate),
            other => Err(PipelineError::Configuration(format!(
                "unknown failure policy '{}', expected pass-through or propagate",
                other
            ))),
        }
    }
}

const ASCII: &[RangeInclusive<char>] = &['\u{0000}'..='\u{007F}'];
const DEVANAGARI: &[RangeInclusive<char>] = &['\u{0900}'..='\u{097F}'];
const CYRILLIC: &[RangeInclusive<char>] = &['\u{0400}'..='\u{04FF}'];
const ARABIC: &[RangeInclusive<char>] = &['\u{0600}'..='\u{06FF}'];
const HAN: &[RangeInclusive<char>] = &['\u{4E00}'..='\u{9FFF}'];
const JAPANESE: &[RangeInclusive<char>] = &['\u{3040}'..='\u{30FF}', '\u{4E00}'..='\u{9FFF}'];

fn script_ranges(source_lang: &str) -> Option<&'static [RangeInclusive<char>]> {
    let primary = source_lang
        .split(['-', '_'])
        .next()
        .unwrap_or(source_lang)
        .to_ascii_lowercase();

    match primary.as_str() {
        "en" | "es" | "fr" | "de" | "it" | "pt" | "nl" | "id" | "ms" | "sw" => Some(ASCII),
        "hi" | "mr" | "ne" => Some(DEVANAGARI),
        "ru" | "uk" | "bg" | "sr" => Some(CYRILLIC),
        "ar" | "fa" | "ur" => Some(ARABIC),
        "zh" => Some(HAN),
        "ja" => Some(JAPANESE),
        _ => None,
    }
}

/// Cheap "is this source-language text" check.
///
/// One character inside the source script's code-point range is enough.
/// For Latin-script sources that range is plain ASCII, so digits and
/// punctuation count too. Unknown source languages accept everything.
pub fn contains_source_script(text: &str, source_lang: &str) -> bool {
    match script_ranges(source_lang) {
        Some(ranges) => text
            .chars()
            .any(|c| ranges.iter().any(|range| range.contains(&c))),
        None => true,
    }
}

/// Whether a leaf should be sent to the provider at all.
pub fn is_translatable(text: &str, source_lang: &str) -> bool {
    !text.trim().is_empty() && contains_source_script(text, source_lang)
}

pub struct TranslationClient {
    provider: Arc<dyn TranslationProvider>,
    retry: RetryPolicy,
    source_lang: String,
    target_lang: String,
    policy: FailurePolicy,
    metrics: Arc<PipelineMetrics>,
}

impl TranslationClient {
    pub fn new(
        provider: Arc<dyn TranslationProvider>,
        source_lang: impl Into<String>,
        target_lang: impl Into<String>,
    ) -> Self {
        Self {
            provider,
            retry: RetryPolicy::default(),
            source_lang: source_lang.into(),
            target_lang: target_lang.into(),
            policy: FailurePolicy::PassThrough,
            metrics: Arc::new(PipelineMetrics::new()),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<PipelineMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn metrics(&self) -> &Arc<PipelineMetrics> {
        &self.metrics
    }

    pub fn is_translatable(&self, text: &str) -> bool {
        is_translatable(text, &self.source_lang)
    }

    /// Confirm the provider can serve this client's language pair.
    pub async fn ensure_available(&self) -> PipelineResult<()> {
        self.provider
            .health_check(&self.source_lang, &self.target_lang)
            .await
    }

    /// Translate `text`, returning the original for pass-through input and,
    /// under [`FailurePolicy::PassThrough`], for exhausted failures.
    pub async fn translate(&self, text: &str) -> PipelineResult<String> {
        Ok(self
            .try_translate(text)
            .await?
            .unwrap_or_else(|| text.to_string()))
    }

    /// Like [`translate`](Self::translate) but reports "kept the original"
    /// as `None`, so callers can avoid caching untranslated text.
    pub async fn try_translate(&self, text: &str) -> PipelineResult<Option<String>> {
        if !self.is_translatable(text) {
            self.metrics.record_pass_through();
            return Ok(None);
        }

        self.metrics.record_provider_call();
        let result = with_retry_if(
            &self.retry,
            &format!("Translate via {}", self.provider.provider_name()),
            || self.provider.translate(text, &self.source_lang, &self.target_lang),
            PipelineError::is_retryable,
        )
        .await;

        match result {
            Ok(translated) => {
                debug!("Translated: {} -> {}", text, translated);
                Ok(Some(translated))
            }
            Err(e) => {
                self.metrics.record_provider_failure();
                match self.policy {
                    FailurePolicy::PassThrough => {
                        warn!("Keeping original text for {:?}: {}", text, e);
                        Ok(None)
                    }
                    FailurePolicy::Propagate => Err(e),
                }
            }
        }
    }
}
