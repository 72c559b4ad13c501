use std::path::PathBuf;

use anyhow::{Context, Result};
use chunked_inference::config::InferenceConfig;
use chunked_inference::replay::replay_requests;
use chunked_inference::{logging, predictors, InferenceApi};

fn main() -> Result<()> {
    logging::init_logging();

    let config = InferenceConfig::from_env().with_record_requests(false);
    let journal_path = std::env::args_os()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| config.journal_path());

    let predictor = predictors::predictor_from_env().map_err(anyhow::Error::msg)?;
    let profile = predictor.profile();
    log::info!(
        "replaying with predictor {} ({} on {})",
        profile.predictor_id,
        profile.model_id,
        profile.device
    );

    let api = InferenceApi::new(predictor, config);
    let report = replay_requests(&api, &journal_path)
        .with_context(|| format!("failed to replay {}", journal_path.display()))?;

    println!(
        "replayed {} requests ({} skipped, {} failed), {} frames propagated",
        report.replayed, report.skipped, report.failed, report.frames_propagated
    );
    Ok(())
}
