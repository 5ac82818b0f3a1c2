use mtrprom_model::ConfigError;
use mtrprom_stats::HealthWeights;
use mtrprom_trace::MeasureSettings;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct CollectSettings {
    /// Packets sent to every hop per measurement.
    pub cycles: u32,
    pub per_probe_timeout: Duration,
    /// Wall-clock budget of the whole cycle, measured from `build_snapshot` entry.
    pub overall_deadline: Duration,
    pub workers: usize,
    /// Extra attempts after an execution failure.
    pub retries: u32,
    pub interval_secs: Option<f64>,
    pub numeric: bool,
    pub weights: HealthWeights,
}

impl Default for CollectSettings {
    fn default() -> Self {
        Self {
            cycles: 10,
            per_probe_timeout: Duration::from_secs(120),
            overall_deadline: Duration::from_secs(300),
            workers: 4,
            retries: 0,
            interval_secs: None,
            numeric: false,
            weights: HealthWeights::default(),
        }
    }
}

impl CollectSettings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cycles == 0 {
            return Err(invalid("cycles", "must be at least 1"));
        }
        if self.workers == 0 {
            return Err(invalid("workers", "must be at least 1"));
        }
        if self.per_probe_timeout.is_zero() {
            return Err(invalid("per_probe_timeout", "must be positive"));
        }
        if self.overall_deadline.is_zero() {
            return Err(invalid("overall_deadline", "must be positive"));
        }
        if let Some(interval) = self.interval_secs {
            if !interval.is_finite() || interval <= 0.0 {
                return Err(invalid("interval_secs", "must be a positive number of seconds"));
            }
        }
        // re-checks weights built by struct literal rather than HealthWeights::new
        HealthWeights::new(self.weights.jitter, self.weights.variance)?;
        Ok(())
    }

    pub(crate) fn measure_settings(&self, timeout: Duration) -> MeasureSettings {
        MeasureSettings {
            cycles: self.cycles,
            timeout,
            interval_secs: self.interval_secs,
            numeric: self.numeric,
        }
    }
}

fn invalid(name: &'static str, reason: &str) -> ConfigError {
    ConfigError::InvalidSetting {
        name,
        reason: reason.to_string(),
    }
}
