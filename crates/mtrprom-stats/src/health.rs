use mtrprom_model::ConfigError;

/// Points subtracted per millisecond of mean per-hop jitter (K_j).
pub const DEFAULT_JITTER_WEIGHT: f64 = 1.0;

/// Points subtracted per ms² of RTT variance across responding hops (K_v).
pub const DEFAULT_VARIANCE_WEIGHT: f64 = 0.01;

/// Upper bound of every individual penalty and of the score itself.
pub const MAX_SCORE: f64 = 100.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HealthWeights {
    pub jitter: f64,
    pub variance: f64,
}

impl Default for HealthWeights {
    fn default() -> Self {
        Self {
            jitter: DEFAULT_JITTER_WEIGHT,
            variance: DEFAULT_VARIANCE_WEIGHT,
        }
    }
}

impl HealthWeights {
    pub fn new(jitter: f64, variance: f64) -> Result<Self, ConfigError> {
        check_weight("jitter_weight", jitter)?;
        check_weight("variance_weight", variance)?;
        Ok(Self { jitter, variance })
    }
}

fn check_weight(name: &'static str, value: f64) -> Result<(), ConfigError> {
    if !value.is_finite() || value < 0.0 {
        return Err(ConfigError::InvalidSetting {
            name,
            reason: format!("must be a finite non-negative number, got {value}"),
        });
    }
    Ok(())
}

/// Composite 0-100 score. Each input only ever subtracts, so the score is
/// non-increasing in loss, jitter and variance.
pub fn health_score(
    end_to_end_loss_percent: f64,
    path_avg_jitter_ms: f64,
    path_rtt_variance_ms: f64,
    weights: &HealthWeights,
) -> f64 {
    let loss_penalty = end_to_end_loss_percent.clamp(0.0, MAX_SCORE);
    let jitter_penalty = (path_avg_jitter_ms * weights.jitter).clamp(0.0, MAX_SCORE);
    let variance_penalty = (path_rtt_variance_ms * weights.variance).clamp(0.0, MAX_SCORE);

    (MAX_SCORE - loss_penalty - jitter_penalty - variance_penalty).clamp(0.0, MAX_SCORE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn perfect_path_scores_full_marks() {
        assert_eq!(health_score(0.0, 0.0, 0.0, &HealthWeights::default()), 100.0);
    }

    #[test]
    fn penalties_add_up() {
        let weights = HealthWeights::default();
        // 10 points of loss, 2 points of jitter, 1 point of variance
        let score = health_score(10.0, 2.0, 100.0, &weights);
        assert!((score - 87.0).abs() < 1e-9);
    }

    #[test]
    fn score_is_clamped() {
        let weights = HealthWeights::default();
        assert_eq!(health_score(100.0, 500.0, 1e9, &weights), 0.0);
        assert_eq!(health_score(60.0, 60.0, 0.0, &weights), 0.0);
    }

    #[test]
    fn score_never_increases_with_worse_inputs() {
        let weights = HealthWeights::new(2.5, 0.2).unwrap();
        let steps: Vec<f64> = (0..60).map(|step| step as f64 * 2.5).collect();

        for window in steps.windows(2) {
            let (a, b) = (window[0], window[1]);
            assert!(health_score(b, 1.0, 10.0, &weights) <= health_score(a, 1.0, 10.0, &weights));
            assert!(health_score(5.0, b, 10.0, &weights) <= health_score(5.0, a, 10.0, &weights));
            assert!(health_score(5.0, 1.0, b, &weights) <= health_score(5.0, 1.0, a, &weights));
        }
    }

    #[test]
    fn rejects_negative_weights() {
        assert!(HealthWeights::new(-1.0, 0.0).is_err());
        assert!(HealthWeights::new(1.0, f64::NAN).is_err());
    }
}
