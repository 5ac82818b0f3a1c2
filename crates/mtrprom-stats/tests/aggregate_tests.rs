use mtrprom_model::{HopRecord, ProbeError, RttSummary, UNRESPONSIVE_HOST};
use mtrprom_stats::{aggregate, HealthWeights};

fn hop(index: u32, host: &str, sent: u32, received: u32, avg: f64, jitter: f64) -> HopRecord {
    HopRecord::from_summary(
        index,
        host,
        sent,
        received,
        RttSummary {
            last_ms: avg,
            avg_ms: avg,
            best_ms: avg - jitter,
            worst_ms: avg + jitter,
            stddev_ms: jitter,
        },
    )
}

fn silent(index: u32, sent: u32) -> HopRecord {
    HopRecord::from_summary(index, UNRESPONSIVE_HOST, sent, 0, RttSummary::default())
}

#[test]
fn clean_three_hop_path_scores_near_full() {
    let hops = vec![
        hop(1, "_gateway", 10, 10, 1.7, 0.1),
        hop(2, "10.20.0.1", 10, 10, 4.9, 0.3),
        hop(3, "lb-140-82-121-4-fra.github.com", 10, 10, 11.0, 0.4),
    ];

    let stats = aggregate(&hops, &HealthWeights::default()).unwrap();

    assert_eq!(stats.end_to_end.hop, 3);
    assert_eq!(stats.end_to_end.host, "lb-140-82-121-4-fra.github.com");
    assert_eq!(stats.end_to_end.loss_percent, 0.0);
    assert_eq!(stats.responding_hops, 3);
    assert!((stats.path_max_jitter_ms - 0.4).abs() < 1e-9);
    assert!((stats.path_avg_jitter_ms - 0.8 / 3.0).abs() < 1e-9);
    assert!(stats.path_health_score > 99.0);
    assert!(stats.path_health_score <= 100.0);
}

#[test]
fn end_to_end_uses_last_responding_hop() {
    let hops = vec![
        hop(1, "_gateway", 10, 10, 1.0, 0.1),
        hop(2, "core", 10, 8, 8.0, 1.0),
        silent(3, 10),
        silent(4, 10),
    ];

    let stats = aggregate(&hops, &HealthWeights::default()).unwrap();

    assert_eq!(stats.end_to_end.hop, 2);
    assert_eq!(stats.end_to_end.host, "core");
    assert_eq!(stats.end_to_end.loss_percent, 20.0);
    assert_eq!(stats.responding_hops, 2);
    // silent hops do not drag the jitter mean towards zero
    assert!((stats.path_avg_jitter_ms - 0.55).abs() < 1e-9);
    assert!((stats.path_rtt_variance_ms - 12.25).abs() < 1e-9);
}

#[test]
fn single_responding_hop_has_no_variance() {
    let hops = vec![hop(1, "only", 5, 5, 3.0, 0.5)];
    let stats = aggregate(&hops, &HealthWeights::default()).unwrap();
    assert_eq!(stats.path_rtt_variance_ms, 0.0);
    assert!((stats.path_health_score - 99.5).abs() < 1e-9);
}

#[test]
fn empty_or_silent_path_is_no_response() {
    let weights = HealthWeights::default();
    assert_eq!(aggregate(&[], &weights), Err(ProbeError::NoResponse));
    assert_eq!(
        aggregate(&[silent(1, 10), silent(2, 10)], &weights),
        Err(ProbeError::NoResponse)
    );
}

#[test]
fn score_drops_as_loss_grows() {
    let weights = HealthWeights::default();
    let mut previous = f64::INFINITY;

    for received in (1..=10).rev() {
        let hops = vec![
            hop(1, "_gateway", 10, 10, 1.0, 0.2),
            hop(2, "dest", 10, received, 20.0, 2.0),
        ];
        let score = aggregate(&hops, &weights).unwrap().path_health_score;
        assert!(score <= previous);
        assert!((0.0..=100.0).contains(&score));
        previous = score;
    }
}

#[test]
fn custom_weights_change_the_score() {
    let hops = vec![hop(1, "a", 10, 10, 5.0, 2.0), hop(2, "b", 10, 10, 25.0, 4.0)];

    let default = aggregate(&hops, &HealthWeights::default()).unwrap();
    let ignore_all = aggregate(&hops, &HealthWeights::new(0.0, 0.0).unwrap()).unwrap();

    assert_eq!(ignore_all.path_health_score, 100.0);
    // jitter 3.0 * 1.0 + variance 100.0 * 0.01
    assert!((default.path_health_score - 96.0).abs() < 1e-9);
}
