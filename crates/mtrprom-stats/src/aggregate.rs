use crate::health::{health_score, HealthWeights};
use mtrprom_model::{EndToEnd, HopRecord, PathStats, ProbeError};

/// Derives whole-path statistics from a parsed hop sequence.
///
/// The end-to-end values come from the last hop that answered at all, not
/// from the last hop by index: a destination that filters probes still has
/// upstream routers that reveal the path quality.
pub fn aggregate(hops: &[HopRecord], weights: &HealthWeights) -> Result<PathStats, ProbeError> {
    let responding: Vec<&HopRecord> = hops.iter().filter(|hop| hop.responded()).collect();
    let last = responding.last().ok_or(ProbeError::NoResponse)?;
    let end_to_end = EndToEnd::from(*last);

    let avg_rtts: Vec<f64> = responding.iter().map(|hop| hop.avg_rtt_ms).collect();
    let jitters: Vec<f64> = responding.iter().map(|hop| hop.jitter_ms).collect();

    let path_rtt_variance_ms = population_variance(&avg_rtts);
    let path_avg_jitter_ms = mean(&jitters);
    let path_max_jitter_ms = jitters.iter().copied().fold(0.0, f64::max);

    let path_health_score = health_score(
        end_to_end.loss_percent,
        path_avg_jitter_ms,
        path_rtt_variance_ms,
        weights,
    );

    Ok(PathStats {
        end_to_end,
        responding_hops: responding.len() as u32,
        path_rtt_variance_ms,
        path_avg_jitter_ms,
        path_max_jitter_ms,
        path_health_score,
    })
}

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Population variance; 0 for fewer than two values.
pub fn population_variance(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let avg = mean(values);
    values.iter().map(|value| (value - avg).powi(2)).sum::<f64>() / values.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn variance_of_constant_values_is_zero() {
        assert_eq!(population_variance(&[4.0, 4.0, 4.0]), 0.0);
        assert_eq!(population_variance(&[7.0]), 0.0);
        assert_eq!(population_variance(&[]), 0.0);
    }

    #[test]
    fn variance_is_population_not_sample() {
        // sample variance would be 2/3 * 3 / 2 = 1.0
        assert!((population_variance(&[1.0, 2.0, 3.0]) - 2.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn mean_of_empty_is_zero() {
        assert_eq!(mean(&[]), 0.0);
    }
}
