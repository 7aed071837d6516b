// gemflows — Provider factory

use super::{http::HttpProvider, GenerationProvider};
use crate::config::Config;
use std::sync::Arc;
use std::time::Duration;

/// Create the generation provider from the loaded config.
///
/// Returns `Ok(None)` when no API key is configured; workflows without
/// `generate` steps still run in that case.
pub fn create_provider(cfg: &Config) -> anyhow::Result<Option<Arc<dyn GenerationProvider>>> {
    let p = &cfg.provider;
    if p.api_key.is_empty() {
        tracing::debug!("No provider API key configured");
        return Ok(None);
    }

    let provider = HttpProvider::new(
        p.api_key.clone(),
        p.api_base.clone(),
        p.default_model.clone(),
        Duration::from_secs(p.timeout_secs),
    )?
    .with_retries(p.max_retries, Duration::from_millis(p.retry_delay_ms));

    tracing::info!(
        model = %provider.default_model(),
        api_base = %provider.api_base(),
        "Creating generation provider"
    );

    Ok(Some(Arc::new(provider)))
}
