//! Per-path statistics and the path-health score.

pub mod aggregate;
pub mod health;

pub use aggregate::{aggregate, mean, population_variance};
pub use health::{
    health_score, HealthWeights, DEFAULT_JITTER_WEIGHT, DEFAULT_VARIANCE_WEIGHT, MAX_SCORE,
};
