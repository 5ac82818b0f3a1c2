//! Prometheus text exposition of a snapshot.
//!
//! Output is a pure function of the snapshot: families always appear in the
//! same order, samples follow configuration order and hop order, and every
//! family carries its `# HELP`/`# TYPE` header even when it has no samples.

use mtrprom_model::{HopRecord, PathStats, ProbeResult, Snapshot};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricType {
    Gauge,
    Counter,
}

impl MetricType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Gauge => "gauge",
            Self::Counter => "counter",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Value {
    Integer(i64),
    /// Percentages and the health score.
    Percent(f64),
    /// Milliseconds and ms².
    Millis(f64),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Integer(value) => write!(f, "{value}"),
            Self::Percent(value) => write!(f, "{value:.1}"),
            Self::Millis(value) => write!(f, "{value:.3}"),
        }
    }
}

struct ProbeFamily {
    name: &'static str,
    help: &'static str,
    value: fn(&ProbeResult, &PathStats) -> Value,
}

struct HopFamily {
    name: &'static str,
    help: &'static str,
    kind: MetricType,
    value: fn(&HopRecord) -> Value,
}

const INFO: &str = "mtr_info";
const HOP_INFO: &str = "mtr_hop_info";
const LAST_RUN: &str = "mtr_last_run_timestamp_ms";

const PROBE_FAMILIES: &[ProbeFamily] = &[
    ProbeFamily {
        name: "mtr_hop_count",
        help: "Number of hops on the measured path",
        value: |result, _| Value::Integer(result.hop_count() as i64),
    },
    ProbeFamily {
        name: "mtr_responding_hop_count",
        help: "Number of hops that answered at least one packet",
        value: |_, stats| Value::Integer(i64::from(stats.responding_hops)),
    },
    ProbeFamily {
        name: "mtr_silent_hops_count",
        help: "Number of hops that answered no packet",
        value: |result, stats| {
            Value::Integer(result.hop_count() as i64 - i64::from(stats.responding_hops))
        },
    },
    ProbeFamily {
        name: "mtr_end_to_end_loss_percent",
        help: "Packet loss at the last responding hop",
        value: |_, stats| Value::Percent(stats.end_to_end.loss_percent),
    },
    ProbeFamily {
        name: "mtr_end_to_end_last_rtt_ms",
        help: "Most recent round trip time at the last responding hop",
        value: |_, stats| Value::Millis(stats.end_to_end.last_rtt_ms),
    },
    ProbeFamily {
        name: "mtr_end_to_end_avg_rtt_ms",
        help: "Mean round trip time at the last responding hop",
        value: |_, stats| Value::Millis(stats.end_to_end.avg_rtt_ms),
    },
    ProbeFamily {
        name: "mtr_end_to_end_best_rtt_ms",
        help: "Lowest round trip time at the last responding hop",
        value: |_, stats| Value::Millis(stats.end_to_end.best_rtt_ms),
    },
    ProbeFamily {
        name: "mtr_end_to_end_worst_rtt_ms",
        help: "Highest round trip time at the last responding hop",
        value: |_, stats| Value::Millis(stats.end_to_end.worst_rtt_ms),
    },
    ProbeFamily {
        name: "mtr_end_to_end_jitter_ms",
        help: "Round trip time standard deviation at the last responding hop",
        value: |_, stats| Value::Millis(stats.end_to_end.jitter_ms),
    },
    ProbeFamily {
        name: "mtr_path_health_score",
        help: "Composite path health score from 0 to 100",
        value: |_, stats| Value::Percent(stats.path_health_score),
    },
    ProbeFamily {
        name: "mtr_path_rtt_variance_ms",
        help: "Population variance of mean round trip time across responding hops in ms squared",
        value: |_, stats| Value::Millis(stats.path_rtt_variance_ms),
    },
    ProbeFamily {
        name: "mtr_path_avg_jitter_ms",
        help: "Mean jitter across responding hops",
        value: |_, stats| Value::Millis(stats.path_avg_jitter_ms),
    },
    ProbeFamily {
        name: "mtr_path_max_jitter_ms",
        help: "Highest jitter of any responding hop",
        value: |_, stats| Value::Millis(stats.path_max_jitter_ms),
    },
];

const HOP_FAMILIES: &[HopFamily] = &[
    HopFamily {
        name: "mtr_loss_percent",
        help: "Packet loss at this hop",
        kind: MetricType::Gauge,
        value: |hop| Value::Percent(hop.loss_percent),
    },
    HopFamily {
        name: "mtr_packets_sent",
        help: "Packets sent towards this hop during the measurement",
        kind: MetricType::Counter,
        value: |hop| Value::Integer(i64::from(hop.packets_sent)),
    },
    HopFamily {
        name: "mtr_packets_received",
        help: "Packets answered by this hop during the measurement",
        kind: MetricType::Counter,
        value: |hop| Value::Integer(i64::from(hop.packets_received)),
    },
    HopFamily {
        name: "mtr_last_rtt_ms",
        help: "Most recent round trip time to this hop",
        kind: MetricType::Gauge,
        value: |hop| Value::Millis(hop.last_rtt_ms),
    },
    HopFamily {
        name: "mtr_avg_rtt_ms",
        help: "Mean round trip time to this hop",
        kind: MetricType::Gauge,
        value: |hop| Value::Millis(hop.avg_rtt_ms),
    },
    HopFamily {
        name: "mtr_best_rtt_ms",
        help: "Lowest round trip time to this hop",
        kind: MetricType::Gauge,
        value: |hop| Value::Millis(hop.best_rtt_ms),
    },
    HopFamily {
        name: "mtr_worst_rtt_ms",
        help: "Highest round trip time to this hop",
        kind: MetricType::Gauge,
        value: |hop| Value::Millis(hop.worst_rtt_ms),
    },
    HopFamily {
        name: "mtr_jitter_ms",
        help: "Round trip time standard deviation at this hop",
        kind: MetricType::Gauge,
        value: |hop| Value::Millis(hop.jitter_ms),
    },
];

/// Every family name in output order.
pub fn family_names() -> Vec<&'static str> {
    let mut names = vec![INFO];
    names.extend(PROBE_FAMILIES.iter().map(|family| family.name));
    names.push(HOP_INFO);
    names.extend(HOP_FAMILIES.iter().map(|family| family.name));
    names.push(LAST_RUN);
    names
}

pub fn render(snapshot: &Snapshot) -> String {
    let mut out = String::new();

    header(&mut out, INFO, "Probe presence and outcome of the last run", MetricType::Gauge);
    for result in &snapshot.results {
        let mut labels = probe_labels(result);
        labels.push(("port", result.probe.port.to_string()));
        labels.push(("status", result.status.as_str().to_string()));
        sample(&mut out, INFO, &labels, Value::Integer(1));
    }

    for family in PROBE_FAMILIES {
        header(&mut out, family.name, family.help, MetricType::Gauge);
        for (result, stats) in succeeded(snapshot) {
            sample(&mut out, family.name, &probe_labels(result), (family.value)(result, stats));
        }
    }

    header(&mut out, HOP_INFO, "Hop presence on the measured path", MetricType::Gauge);
    for (result, _) in succeeded(snapshot) {
        for hop in &result.hops {
            let mut labels = hop_labels(result, hop);
            labels.push(("responding", hop.responded().to_string()));
            sample(&mut out, HOP_INFO, &labels, Value::Integer(1));
        }
    }

    for family in HOP_FAMILIES {
        header(&mut out, family.name, family.help, family.kind);
        for (result, _) in succeeded(snapshot) {
            for hop in &result.hops {
                sample(&mut out, family.name, &hop_labels(result, hop), (family.value)(hop));
            }
        }
    }

    header(
        &mut out,
        LAST_RUN,
        "Wall clock time the last measurement completed, in ms since the epoch",
        MetricType::Gauge,
    );
    for result in &snapshot.results {
        sample(&mut out, LAST_RUN, &probe_labels(result), Value::Integer(result.timestamp_ms));
    }

    out
}

fn succeeded(snapshot: &Snapshot) -> impl Iterator<Item = (&ProbeResult, &PathStats)> {
    snapshot
        .results
        .iter()
        .filter_map(|result| result.stats.as_ref().map(|stats| (result, stats)))
}

type Labels<'a> = Vec<(&'a str, String)>;

fn probe_labels(result: &ProbeResult) -> Labels<'_> {
    let mut labels: Labels<'_> = result
        .probe
        .labels
        .iter()
        .map(|(key, value)| (key, value.to_string()))
        .collect();
    labels.push(("target", result.probe.target.clone()));
    labels.push(("probe", result.probe.name.clone()));
    labels
}

fn hop_labels<'a>(result: &'a ProbeResult, hop: &HopRecord) -> Labels<'a> {
    let mut labels = probe_labels(result);
    labels.push(("hop", hop.hop.to_string()));
    labels.push(("host", hop.host.clone()));
    labels
}

fn header(out: &mut String, name: &str, help: &str, kind: MetricType) {
    out.push_str(&format!("# HELP {name} {help}\n# TYPE {name} {}\n", kind.as_str()));
}

fn sample(out: &mut String, name: &str, labels: &[(&str, String)], value: Value) {
    out.push_str(name);
    if !labels.is_empty() {
        let rendered: Vec<String> = labels
            .iter()
            .map(|(key, value)| format!("{key}=\"{}\"", escape_label_value(value)))
            .collect();
        out.push('{');
        out.push_str(&rendered.join(","));
        out.push('}');
    }
    out.push_str(&format!(" {value}\n"));
}

pub fn escape_label_value(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '\\' => escaped.push_str("\\\\"),
            '"' => escaped.push_str("\\\""),
            '\n' => escaped.push_str("\\n"),
            other => escaped.push(other),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_label_values() {
        assert_eq!(escape_label_value(r#"a"b\c"#), r#"a\"b\\c"#);
        assert_eq!(escape_label_value("two\nlines"), "two\\nlines");
        assert_eq!(escape_label_value("plain"), "plain");
    }

    #[test]
    fn value_precision() {
        assert_eq!(Value::Integer(10).to_string(), "10");
        assert_eq!(Value::Percent(12.345).to_string(), "12.3");
        assert_eq!(Value::Millis(1.0).to_string(), "1.000");
        assert_eq!(Value::Millis(0.12345).to_string(), "0.123");
    }

    #[test]
    fn family_names_are_unique() {
        let names = family_names();
        let mut sorted = names.clone();
        sorted.sort();
        sorted.dedup();
        assert_eq!(sorted.len(), names.len());
        assert_eq!(names.len(), 24);
    }
}
