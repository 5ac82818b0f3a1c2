//! Shared data structures for mtrprom.

pub mod error;
pub mod labels;

pub use error::{ConfigError, ProbeError};
pub use labels::{LabelSet, RESERVED_LABELS};

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;

/// Host label for a hop that never answered a single packet.
pub const UNRESPONSIVE_HOST: &str = "unresponsive";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProbeDefinition {
    pub name: String,
    pub target: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub labels: LabelSet,
}

fn default_port() -> u16 {
    443
}

impl ProbeDefinition {
    pub fn new(
        name: &str,
        target: &str,
        port: u16,
        labels: LabelSet,
    ) -> Result<Self, ConfigError> {
        let probe = Self {
            name: name.to_string(),
            target: target.to_string(),
            port,
            labels,
        };
        probe.validate()?;
        Ok(probe)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::EmptyName);
        }
        let target = self.target.trim();
        if target.is_empty() || target.chars().any(char::is_whitespace) || target.starts_with('-') {
            return Err(ConfigError::InvalidTarget {
                name: self.name.clone(),
                target: self.target.clone(),
            });
        }
        Ok(())
    }
}

/// Validates every definition and the uniqueness of probe names.
pub fn validate_probes(probes: &[ProbeDefinition]) -> Result<(), ConfigError> {
    let mut seen = HashSet::new();
    for probe in probes {
        probe.validate()?;
        if !seen.insert(probe.name.as_str()) {
            return Err(ConfigError::DuplicateProbe(probe.name.clone()));
        }
    }
    Ok(())
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HopRecord {
    pub hop: u32,
    pub host: String,
    pub packets_sent: u32,
    pub packets_received: u32,
    pub loss_percent: f64,
    pub last_rtt_ms: f64,
    pub avg_rtt_ms: f64,
    pub best_rtt_ms: f64,
    pub worst_rtt_ms: f64,
    pub jitter_ms: f64,
}

/// Per-hop summary values as reported by a measurement tool.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RttSummary {
    pub last_ms: f64,
    pub avg_ms: f64,
    pub best_ms: f64,
    pub worst_ms: f64,
    pub stddev_ms: f64,
}

pub fn loss_percent(sent: u32, received: u32) -> f64 {
    if sent == 0 {
        return 100.0;
    }
    let lost = sent.saturating_sub(received);
    lost as f64 / sent as f64 * 100.0
}

impl HopRecord {
    /// Builds a record from already summarised values. RTT fields are zeroed
    /// for a hop that received nothing, and jitter is zeroed below two samples.
    pub fn from_summary(
        hop: u32,
        host: &str,
        packets_sent: u32,
        packets_received: u32,
        rtt: RttSummary,
    ) -> Self {
        let rtt = if packets_received == 0 {
            RttSummary::default()
        } else if packets_received < 2 {
            RttSummary {
                stddev_ms: 0.0,
                ..rtt
            }
        } else {
            rtt
        };

        Self {
            hop,
            host: host.to_string(),
            packets_sent,
            packets_received,
            loss_percent: loss_percent(packets_sent, packets_received),
            last_rtt_ms: rtt.last_ms,
            avg_rtt_ms: rtt.avg_ms,
            best_rtt_ms: rtt.best_ms,
            worst_rtt_ms: rtt.worst_ms,
            jitter_ms: rtt.stddev_ms,
        }
    }

    /// Builds a record from raw per-packet samples, `None` marking a lost packet.
    /// Jitter is the population standard deviation of the received samples.
    pub fn from_samples(hop: u32, host: &str, samples: &[Option<f64>]) -> Self {
        let received: Vec<f64> = samples.iter().copied().flatten().collect();
        let sent = samples.len() as u32;
        let count = received.len() as u32;

        if received.is_empty() {
            return Self::from_summary(hop, host, sent, 0, RttSummary::default());
        }

        let n = received.len() as f64;
        let avg = received.iter().sum::<f64>() / n;
        let best = received.iter().copied().fold(f64::INFINITY, f64::min);
        let worst = received.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let last = received[received.len() - 1];
        let variance = received.iter().map(|rtt| (rtt - avg).powi(2)).sum::<f64>() / n;

        Self::from_summary(
            hop,
            host,
            sent,
            count,
            RttSummary {
                last_ms: last,
                // keep best <= avg <= worst in the face of float rounding
                avg_ms: avg.clamp(best, worst),
                best_ms: best,
                worst_ms: worst,
                stddev_ms: variance.sqrt(),
            },
        )
    }

    pub fn responded(&self) -> bool {
        self.packets_received > 0
    }
}

/// End-to-end values, copied from the last hop that answered.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EndToEnd {
    pub hop: u32,
    pub host: String,
    pub loss_percent: f64,
    pub last_rtt_ms: f64,
    pub avg_rtt_ms: f64,
    pub best_rtt_ms: f64,
    pub worst_rtt_ms: f64,
    pub jitter_ms: f64,
}

impl From<&HopRecord> for EndToEnd {
    fn from(hop: &HopRecord) -> Self {
        Self {
            hop: hop.hop,
            host: hop.host.clone(),
            loss_percent: hop.loss_percent,
            last_rtt_ms: hop.last_rtt_ms,
            avg_rtt_ms: hop.avg_rtt_ms,
            best_rtt_ms: hop.best_rtt_ms,
            worst_rtt_ms: hop.worst_rtt_ms,
            jitter_ms: hop.jitter_ms,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PathStats {
    pub end_to_end: EndToEnd,
    pub responding_hops: u32,
    pub path_rtt_variance_ms: f64,
    pub path_avg_jitter_ms: f64,
    pub path_max_jitter_ms: f64,
    pub path_health_score: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProbeStatus {
    Succeeded,
    Failed,
    TimedOut,
}

impl ProbeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::TimedOut => "timed_out",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProbeResult {
    pub probe: Arc<ProbeDefinition>,
    pub hops: Vec<HopRecord>,
    pub stats: Option<PathStats>,
    pub status: ProbeStatus,
    pub error: Option<ProbeError>,
    pub timestamp_ms: i64,
    pub attempts: u32,
}

impl ProbeResult {
    pub fn succeeded(
        probe: Arc<ProbeDefinition>,
        hops: Vec<HopRecord>,
        stats: PathStats,
        timestamp_ms: i64,
        attempts: u32,
    ) -> Self {
        Self {
            probe,
            hops,
            stats: Some(stats),
            status: ProbeStatus::Succeeded,
            error: None,
            timestamp_ms,
            attempts,
        }
    }

    /// Hops are kept when the measurement itself completed (a path where
    /// nothing answered still has a topology); statistics never are.
    pub fn failed(
        probe: Arc<ProbeDefinition>,
        hops: Vec<HopRecord>,
        error: ProbeError,
        timestamp_ms: i64,
        attempts: u32,
    ) -> Self {
        let status = match error {
            ProbeError::TimedOut { .. } => ProbeStatus::TimedOut,
            _ => ProbeStatus::Failed,
        };
        Self {
            probe,
            hops,
            stats: None,
            status,
            error: Some(error),
            timestamp_ms,
            attempts,
        }
    }

    pub fn hop_count(&self) -> usize {
        self.hops.len()
    }

    pub fn is_success(&self) -> bool {
        self.status == ProbeStatus::Succeeded
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Snapshot {
    pub generated_at_ms: i64,
    pub results: Vec<ProbeResult>,
}

impl Snapshot {
    pub fn succeeded(&self) -> usize {
        self.results.iter().filter(|result| result.is_success()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn github() -> ProbeDefinition {
        let mut labels = LabelSet::new();
        labels.insert("service", "github").unwrap();
        ProbeDefinition::new("github", "github.com", 443, labels).unwrap()
    }

    #[test]
    fn loss_is_derived_from_counts() {
        assert_eq!(loss_percent(10, 10), 0.0);
        assert_eq!(loss_percent(10, 7), (10.0 - 7.0) / 10.0 * 100.0);
        assert_eq!(loss_percent(3, 1), (3.0 - 1.0) / 3.0 * 100.0);
        assert_eq!(loss_percent(4, 0), 100.0);
    }

    #[test]
    fn from_samples_computes_population_stddev() {
        let hop = HopRecord::from_samples(2, "10.0.0.1", &[Some(2.0), None, Some(4.0), Some(6.0)]);
        assert_eq!(hop.packets_sent, 4);
        assert_eq!(hop.packets_received, 3);
        assert_eq!(hop.loss_percent, 25.0);
        assert_eq!(hop.best_rtt_ms, 2.0);
        assert_eq!(hop.worst_rtt_ms, 6.0);
        assert_eq!(hop.last_rtt_ms, 6.0);
        assert!((hop.avg_rtt_ms - 4.0).abs() < 1e-12);
        assert!((hop.jitter_ms - (8.0f64 / 3.0).sqrt()).abs() < 1e-12);
    }

    #[test]
    fn single_sample_has_no_jitter() {
        let hop = HopRecord::from_samples(1, "10.0.0.1", &[None, Some(3.5), None]);
        assert_eq!(hop.jitter_ms, 0.0);
        assert_eq!(hop.last_rtt_ms, 3.5);
    }

    #[test]
    fn silent_hop_has_zeroed_rtts() {
        let hop = HopRecord::from_summary(
            3,
            UNRESPONSIVE_HOST,
            10,
            0,
            RttSummary {
                last_ms: 9.0,
                avg_ms: 9.0,
                best_ms: 9.0,
                worst_ms: 9.0,
                stddev_ms: 1.0,
            },
        );
        assert!(!hop.responded());
        assert_eq!(hop.loss_percent, 100.0);
        assert_eq!(hop.avg_rtt_ms, 0.0);
        assert_eq!(hop.jitter_ms, 0.0);
    }

    #[test]
    fn duplicate_probe_names_are_rejected() {
        let probes = vec![github(), github()];
        assert_eq!(
            validate_probes(&probes),
            Err(ConfigError::DuplicateProbe("github".to_string()))
        );
    }

    #[test]
    fn invalid_targets_are_rejected() {
        assert!(ProbeDefinition::new("a", "", 0, LabelSet::new()).is_err());
        assert!(ProbeDefinition::new("a", "git hub.com", 0, LabelSet::new()).is_err());
        assert!(ProbeDefinition::new("a", "--flag", 0, LabelSet::new()).is_err());
        assert_eq!(
            ProbeDefinition::new(" ", "1.1.1.1", 0, LabelSet::new()),
            Err(ConfigError::EmptyName)
        );
    }

    #[test]
    fn failed_result_status_follows_error_kind() {
        let probe = Arc::new(github());
        let timed_out = ProbeResult::failed(
            probe.clone(),
            Vec::new(),
            ProbeError::TimedOut { after_ms: 5 },
            0,
            1,
        );
        assert_eq!(timed_out.status, ProbeStatus::TimedOut);
        assert!(timed_out.stats.is_none());

        let failed = ProbeResult::failed(probe, Vec::new(), ProbeError::NoResponse, 0, 1);
        assert_eq!(failed.status, ProbeStatus::Failed);
        assert_eq!(failed.error, Some(ProbeError::NoResponse));
    }

    #[test]
    fn probe_definition_round_trip_is_stable() {
        let probe = github();
        let json = serde_json::to_string_pretty(&probe).unwrap();
        let decoded: ProbeDefinition = serde_json::from_str(&json).unwrap();
        assert_eq!(probe, decoded);
        assert_eq!(json, serde_json::to_string_pretty(&decoded).unwrap());
    }
}
