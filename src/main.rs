use anyhow::{Context, Result};
use dictionary_translator::config::Config;
use dictionary_translator::pipeline::{discover_inputs, Pipeline, ShutdownSignal};
use dictionary_translator::provider::HttpTranslationProvider;
use std::sync::Arc;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file (ignored when variables come from the environment)
    let _ = dotenvy::dotenv();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("dictionary_translator=info".parse()?),
        )
        .init();

    let config = Config::from_env()?;
    info!(
        "Translating {} -> {} from {} into {}",
        config.source_lang,
        config.target_lang,
        config.input_location.display(),
        config.output_location.display()
    );

    let inputs = discover_inputs(&config.input_location, config.dialect)?;
    if inputs.is_empty() {
        warn!("No input documents found in {}", config.input_location.display());
        return Ok(());
    }
    info!("Found {} input documents", inputs.len());

    let provider = HttpTranslationProvider::new(
        &config.translate_api_url,
        config.translate_api_key.clone(),
    )?;

    let shutdown = ShutdownSignal::new();
    let pipeline = Pipeline::from_config(&config, Arc::new(provider))?.with_shutdown(shutdown.clone());

    // Stop at the next batch boundary on Ctrl-C
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, finishing the current batch");
            shutdown.trigger();
        }
    });

    let report = pipeline.run(&inputs).await.context("translation run failed")?;

    for (input, reason) in &report.failed {
        error!("Not translated: {} ({})", input.display(), reason);
    }
    info!("Metrics: {}", serde_json::to_string(&report.metrics)?);

    if report.interrupted {
        info!("Run interrupted; rerun to resume from the last committed batch");
    } else {
        info!("All documents translated");
    }
    Ok(())
}
