use std::sync::Arc;

use video_predictor::VideoPredictor;
use video_predictor_mock::{MockPredictor, MOCK_PREDICTOR_ID};

pub const DEFAULT_PREDICTOR_ID: &str = MOCK_PREDICTOR_ID;
pub const PREDICTOR_ENV_VAR: &str = "INFERENCE_PREDICTOR";
/// Frame count of the simulated video served by the mock predictor.
pub const MOCK_FRAMES_ENV_VAR: &str = "INFERENCE_MOCK_FRAMES";

pub fn predictor_from_env() -> Result<Arc<dyn VideoPredictor>, String> {
    let predictor_id = std::env::var(PREDICTOR_ENV_VAR)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty());

    if predictor_id.as_deref().unwrap_or(DEFAULT_PREDICTOR_ID) == MOCK_PREDICTOR_ID {
        if let Some(total_frames) = std::env::var(MOCK_FRAMES_ENV_VAR)
            .ok()
            .and_then(|value| value.trim().parse::<usize>().ok())
        {
            return Ok(Arc::new(MockPredictor::new(total_frames)));
        }
    }

    predictor_for_id(predictor_id.as_deref().unwrap_or(DEFAULT_PREDICTOR_ID))
}

pub fn predictor_for_id(predictor_id: &str) -> Result<Arc<dyn VideoPredictor>, String> {
    match predictor_id {
        MOCK_PREDICTOR_ID => Ok(Arc::new(MockPredictor::default())),
        unknown => Err(format!(
            "Unsupported predictor '{unknown}'. Available predictors: {MOCK_PREDICTOR_ID}"
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn predictor_for_id_supports_mock() {
        let predictor = predictor_for_id("mock").expect("mock predictor should resolve");
        assert_eq!(predictor.profile().predictor_id, "mock");
    }

    #[test]
    fn predictor_for_id_rejects_unknown_predictor() {
        let error = match predictor_for_id("sam2") {
            Ok(_) => panic!("unknown predictors should fail"),
            Err(error) => error,
        };

        assert!(error.contains("Unsupported predictor 'sam2'"));
    }
}
