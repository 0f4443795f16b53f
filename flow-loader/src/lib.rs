//! Common `FlowEstimator` instance loader.

use anyhow::{Context, Result};
use froth::prelude::v1::{FlowEstimator, LkParams, PipelineConfig};
use lk_estimator::LucasKanade;
use log::*;
use std::path::Path;

/// Create a flow estimator with the given parameters.
pub fn create_estimator(params: &LkParams) -> Box<dyn FlowEstimator + Send> {
    debug!("creating estimator with {:?}", params);
    Box::new(LucasKanade::from(*params))
}

/// Load a pipeline config from a JSON file.
///
/// If no path is given, the default config is returned. Missing fields take their defaults.
pub fn load_config(path: Option<&Path>) -> Result<PipelineConfig> {
    let path = match path {
        Some(path) => path,
        None => return Ok(Default::default()),
    };

    let file = std::fs::File::open(path)
        .with_context(|| format!("failed to open config {}", path.display()))?;

    let config: PipelineConfig = serde_json::from_reader(std::io::BufReader::new(file))
        .with_context(|| format!("failed to parse config {}", path.display()))?;

    info!("loaded config from {}", path.display());

    Ok(config)
}
