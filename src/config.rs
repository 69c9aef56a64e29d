use crate::client::FailurePolicy;
use crate::error::PipelineError;
use crate::pool::Topology;
use crate::walker::Dialect;
use anyhow::{Context, Result};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Shape of the word-list output file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputShape {
    /// Same shape as the input, leaves replaced
    Full,
    /// `{kanji, kana, meaning}` per word entry
    Condensed,
}

impl FromStr for OutputShape {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "full" => Ok(OutputShape::Full),
            "condensed" => Ok(OutputShape::Condensed),
            other => Err(PipelineError::Configuration(format!(
                "unknown output shape '{}', expected full or condensed",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    // Languages
    pub source_lang: String,
    pub target_lang: String,
    /// Gloss tag kept by the word-list dialect
    pub gloss_lang: String,

    // Scheduling
    pub batch_size: usize,
    pub worker_count: usize,
    pub sub_batch_size: usize,
    pub queue_read_timeout: Duration,
    pub topology: Topology,
    pub failure_policy: FailurePolicy,

    // Documents
    pub dialect: Dialect,
    pub output_shape: OutputShape,
    pub input_location: PathBuf,
    pub output_location: PathBuf,

    // Provider
    pub translate_api_url: String,
    pub translate_api_key: Option<String>,

    // Retry
    pub retry_max_attempts: u32,
    pub retry_initial_delay: Duration,
    pub retry_max_delay: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let source_lang = env_or("SOURCE_LANG", "en");
        let gloss_lang = std::env::var("GLOSS_LANG")
            .unwrap_or_else(|_| default_gloss_lang(&source_lang).to_string());

        let config = Self {
            // Languages
            target_lang: env_or("TARGET_LANG", "hi"),
            source_lang,
            gloss_lang,

            // Scheduling
            batch_size: env_parse("BATCH_SIZE", 500)?,
            worker_count: env_parse("WORKER_COUNT", 4)?,
            sub_batch_size: env_parse("SUB_BATCH_SIZE", 50)?,
            queue_read_timeout: Duration::from_millis(env_parse("QUEUE_READ_TIMEOUT_MS", 1000)?),
            topology: env_parse("TOPOLOGY", Topology::Partitioned)?,
            failure_policy: env_parse("FAILURE_POLICY", FailurePolicy::PassThrough)?,

            // Documents
            dialect: env_parse("DIALECT", Dialect::TermBank)?,
            output_shape: env_parse("WORD_LIST_OUTPUT", OutputShape::Full)?,
            input_location: std::env::var("INPUT_LOCATION")
                .context("INPUT_LOCATION not set")?
                .into(),
            output_location: std::env::var("OUTPUT_LOCATION")
                .context("OUTPUT_LOCATION not set")?
                .into(),

            // Provider
            translate_api_url: std::env::var("TRANSLATE_API_URL")
                .context("TRANSLATE_API_URL not set")?,
            translate_api_key: std::env::var("TRANSLATE_API_KEY")
                .ok()
                .filter(|key| !key.is_empty()),

            // Retry
            retry_max_attempts: env_parse("RETRY_MAX_ATTEMPTS", 3)?,
            retry_initial_delay: Duration::from_millis(env_parse("RETRY_INITIAL_DELAY_MS", 4000)?),
            retry_max_delay: Duration::from_millis(env_parse("RETRY_MAX_DELAY_MS", 10000)?),
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject settings the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), PipelineError> {
        let positive = [
            ("BATCH_SIZE", self.batch_size),
            ("WORKER_COUNT", self.worker_count),
            ("SUB_BATCH_SIZE", self.sub_batch_size),
            ("RETRY_MAX_ATTEMPTS", self.retry_max_attempts as usize),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(PipelineError::Configuration(format!(
                    "{} must be a positive number",
                    name
                )));
            }
        }

        for (name, value) in [
            ("SOURCE_LANG", &self.source_lang),
            ("TARGET_LANG", &self.target_lang),
        ] {
            if value.trim().is_empty() {
                return Err(PipelineError::Configuration(format!("{} is empty", name)));
            }
        }

        Ok(())
    }
}

/// JMdict-style three-letter gloss tag for a two-letter language code.
pub fn default_gloss_lang(source_lang: &str) -> &str {
    match source_lang {
        "en" => "eng",
        "de" => "ger",
        "fr" => "fre",
        "es" => "spa",
        "ru" => "rus",
        "nl" => "dut",
        "hu" => "hun",
        "sv" => "swe",
        "sl" => "slv",
        other => other,
    }
}

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

/// Parse an optional variable; a present but invalid value is an error.
fn env_parse<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid {} '{}': {}", name, raw, e)),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const VARS: &[&str] = &[
        "SOURCE_LANG",
        "TARGET_LANG",
        "GLOSS_LANG",
        "BATCH_SIZE",
        "WORKER_COUNT",
        "SUB_BATCH_SIZE",
        "QUEUE_READ_TIMEOUT_MS",
        "TOPOLOGY",
        "FAILURE_POLICY",
        "DIALECT",
        "WORD_LIST_OUTPUT",
        "INPUT_LOCATION",
        "OUTPUT_LOCATION",
        "TRANSLATE_API_URL",
        "TRANSLATE_API_KEY",
        "RETRY_MAX_ATTEMPTS",
        "RETRY_INITIAL_DELAY_MS",
        "RETRY_MAX_DELAY_MS",
    ];

    fn reset_env() {
        for var in VARS {
            std::env::remove_var(var);
        }
        std::env::set_var("INPUT_LOCATION", "jitendex-yomitan");
        std::env::set_var("OUTPUT_LOCATION", "jitendex-yomitan_hindi");
        std::env::set_var("TRANSLATE_API_URL", "http://localhost:5000");
    }

    #[test]
    #[serial]
    fn test_defaults() {
        reset_env();
        let config = Config::from_env().unwrap();

        assert_eq!(config.source_lang, "en");
        assert_eq!(config.target_lang, "hi");
        assert_eq!(config.gloss_lang, "eng");
        assert_eq!(config.batch_size, 500);
        assert_eq!(config.worker_count, 4);
        assert_eq!(config.sub_batch_size, 50);
        assert_eq!(config.topology, Topology::Partitioned);
        assert_eq!(config.failure_policy, FailurePolicy::PassThrough);
        assert_eq!(config.dialect, Dialect::TermBank);
        assert_eq!(config.output_shape, OutputShape::Full);
        assert_eq!(config.retry_max_attempts, 3);
        assert_eq!(config.retry_initial_delay, Duration::from_secs(4));
        assert_eq!(config.retry_max_delay, Duration::from_secs(10));
        assert_eq!(config.translate_api_key, None);
    }

    #[test]
    #[serial]
    fn test_overrides() {
        reset_env();
        std::env::set_var("SOURCE_LANG", "de");
        std::env::set_var("WORKER_COUNT", "12");
        std::env::set_var("TOPOLOGY", "queue");
        std::env::set_var("FAILURE_POLICY", "propagate");
        std::env::set_var("DIALECT", "word-list");
        std::env::set_var("WORD_LIST_OUTPUT", "condensed");
        std::env::set_var("TRANSLATE_API_KEY", "k");

        let config = Config::from_env().unwrap();
        assert_eq!(config.gloss_lang, "ger");
        assert_eq!(config.worker_count, 12);
        assert_eq!(config.topology, Topology::Queue);
        assert_eq!(config.failure_policy, FailurePolicy::Propagate);
        assert_eq!(config.dialect, Dialect::WordList);
        assert_eq!(config.output_shape, OutputShape::Condensed);
        assert_eq!(config.translate_api_key.as_deref(), Some("k"));
        reset_env();
    }

    #[test]
    #[serial]
    fn test_zero_worker_count_is_rejected() {
        reset_env();
        std::env::set_var("WORKER_COUNT", "0");
        let err = Config::from_env().unwrap_err();
        assert!(err.to_string().contains("WORKER_COUNT"));
        reset_env();
    }

    #[test]
    #[serial]
    fn test_unparsable_batch_size_is_rejected() {
        reset_env();
        std::env::set_var("BATCH_SIZE", "-5");
        let err = Config::from_env().unwrap_err();
        assert!(err.to_string().contains("BATCH_SIZE"));
        reset_env();
    }

    #[test]
    #[serial]
    fn test_missing_output_location() {
        reset_env();
        std::env::remove_var("OUTPUT_LOCATION");
        let err = Config::from_env().unwrap_err();
        assert!(err.to_string().contains("OUTPUT_LOCATION"));
        reset_env();
    }

    #[test]
    fn test_default_gloss_lang() {
        assert_eq!(default_gloss_lang("en"), "eng");
        assert_eq!(default_gloss_lang("xx"), "xx");
    }
}
