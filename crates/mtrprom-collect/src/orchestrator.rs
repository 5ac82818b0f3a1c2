use crate::settings::CollectSettings;
use mtrprom_model::{HopRecord, PathStats, ProbeDefinition, ProbeError, ProbeResult, Snapshot};
use mtrprom_stats::aggregate;
use mtrprom_trace::process::{DRAIN_GRACE, POLL_INTERVAL};
use mtrprom_trace::{parse, Cancellation, MeasureSettings, PathProber};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// How long the collector waits, after cancelling, for in-flight workers to
/// kill their child process and report back.
pub const CANCEL_GRACE: Duration = POLL_INTERVAL.saturating_add(DRAIN_GRACE);

pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Measures every probe on a bounded worker pool and returns exactly one
/// result per definition, in definition order.
///
/// Results travel back over a channel to this thread, which owns the result
/// slots. When `overall_deadline` passes the collector stops waiting, raises
/// the shared cancellation flag (in-flight measurements kill their child
/// process, queued ones never start) and records every missing slot as
/// timed out. Workers still running get [`CANCEL_GRACE`] to observe the flag
/// and reap their children before the snapshot is returned.
pub fn build_snapshot<P>(
    probes: &[ProbeDefinition],
    settings: &CollectSettings,
    prober: Arc<P>,
) -> Snapshot
where
    P: PathProber + 'static,
{
    let started = Instant::now();
    let deadline = started + settings.overall_deadline;
    let definitions: Vec<Arc<ProbeDefinition>> =
        probes.iter().cloned().map(Arc::new).collect();

    let pool = match rayon::ThreadPoolBuilder::new()
        .num_threads(settings.workers.max(1))
        .thread_name(|index| format!("mtrprom-probe-{index}"))
        .build()
    {
        Ok(pool) => pool,
        Err(err) => {
            warn!(error = %err, "failed to build worker pool");
            let error = ProbeError::Execution(format!("worker pool unavailable: {err}"));
            let timestamp_ms = now_ms();
            let results = definitions
                .into_iter()
                .map(|probe| ProbeResult::failed(probe, Vec::new(), error.clone(), timestamp_ms, 0))
                .collect();
            return Snapshot {
                generated_at_ms: timestamp_ms,
                results,
            };
        }
    };

    let cancel = Cancellation::new();
    let (tx, rx) = mpsc::channel::<(usize, ProbeResult)>();

    for (index, probe) in definitions.iter().enumerate() {
        let tx = tx.clone();
        let probe = Arc::clone(probe);
        let prober = Arc::clone(&prober);
        let cancel = cancel.clone();
        let settings = settings.clone();
        pool.spawn(move || {
            let result = run_probe(prober.as_ref(), probe, &settings, deadline, &cancel);
            // the collector may already have given up on this slot
            let _ = tx.send((index, result));
        });
    }
    drop(tx);

    let mut slots: Vec<Option<ProbeResult>> = (0..definitions.len()).map(|_| None).collect();
    let mut pending = definitions.len();
    let mut deadline_hit = false;

    while pending > 0 {
        let Some(left) = deadline.checked_duration_since(Instant::now()) else {
            deadline_hit = true;
            break;
        };
        match rx.recv_timeout(left) {
            Ok((index, result)) => {
                if slots[index].replace(result).is_none() {
                    pending -= 1;
                }
            }
            Err(RecvTimeoutError::Timeout) => {
                deadline_hit = true;
                break;
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    let elapsed_ms = started.elapsed().as_millis() as u64;
    if pending > 0 {
        cancel.cancel();
        warn!(
            pending,
            deadline_hit,
            "collection stopped before every probe reported"
        );
        let unreported = await_cancelled(&rx, pending);
        if unreported > 0 {
            warn!(unreported, "workers still running after cancellation grace");
        }
    }

    let generated_at_ms = now_ms();
    let results: Vec<ProbeResult> = slots
        .into_iter()
        .zip(definitions)
        .map(|(slot, probe)| {
            slot.unwrap_or_else(|| {
                let error = if deadline_hit {
                    ProbeError::TimedOut {
                        after_ms: elapsed_ms,
                    }
                } else {
                    ProbeError::Execution("worker exited without a result".to_string())
                };
                ProbeResult::failed(probe, Vec::new(), error, generated_at_ms, 0)
            })
        })
        .collect();

    let snapshot = Snapshot {
        generated_at_ms,
        results,
    };
    info!(
        probes = snapshot.results.len(),
        succeeded = snapshot.succeeded(),
        elapsed_ms,
        "collection finished"
    );
    snapshot
}

/// Waits up to [`CANCEL_GRACE`] for `pending` late reports. Their results
/// are dropped since they missed the deadline. Returns how many never came.
fn await_cancelled(rx: &Receiver<(usize, ProbeResult)>, mut pending: usize) -> usize {
    let grace_end = Instant::now() + CANCEL_GRACE;
    while pending > 0 {
        let Some(left) = grace_end.checked_duration_since(Instant::now()) else {
            break;
        };
        match rx.recv_timeout(left) {
            Ok(_) => pending -= 1,
            Err(_) => break,
        }
    }
    pending
}

/// Prober, parser and aggregator for one definition, with retries after
/// execution failures while the overall deadline allows.
fn run_probe<P>(
    prober: &P,
    probe: Arc<ProbeDefinition>,
    settings: &CollectSettings,
    deadline: Instant,
    cancel: &Cancellation,
) -> ProbeResult
where
    P: PathProber + ?Sized,
{
    let started = Instant::now();
    let mut attempts = 0;

    let (hops, outcome) = loop {
        let left = deadline.checked_duration_since(Instant::now());
        let left = match left {
            Some(left) if !left.is_zero() && !cancel.is_cancelled() => left,
            _ => {
                let after_ms = started.elapsed().as_millis() as u64;
                break (Vec::new(), Err(ProbeError::TimedOut { after_ms }));
            }
        };

        attempts += 1;
        let measure = settings.measure_settings(settings.per_probe_timeout.min(left));
        debug!(
            probe = %probe.name,
            target = %probe.target,
            attempt = attempts,
            timeout_ms = measure.timeout.as_millis() as u64,
            "measuring"
        );

        let (hops, outcome) = measure_once(prober, &probe, settings, &measure, cancel);
        match outcome {
            Err(err) if err.is_retryable() && attempts <= settings.retries => {
                warn!(probe = %probe.name, attempt = attempts, error = %err, "retrying probe");
            }
            outcome => break (hops, outcome),
        }
    };

    let timestamp_ms = now_ms();
    match outcome {
        Ok(stats) => {
            debug!(
                probe = %probe.name,
                hops = hops.len(),
                score = stats.path_health_score,
                "probe succeeded"
            );
            ProbeResult::succeeded(probe, hops, stats, timestamp_ms, attempts)
        }
        Err(err) => {
            warn!(probe = %probe.name, kind = err.kind(), error = %err, "probe failed");
            ProbeResult::failed(probe, hops, err, timestamp_ms, attempts)
        }
    }
}

fn measure_once<P>(
    prober: &P,
    probe: &ProbeDefinition,
    settings: &CollectSettings,
    measure: &MeasureSettings,
    cancel: &Cancellation,
) -> (Vec<HopRecord>, Result<PathStats, ProbeError>)
where
    P: PathProber + ?Sized,
{
    let raw = match prober.measure(probe, measure, cancel) {
        Ok(raw) => raw,
        Err(err) => return (Vec::new(), Err(err)),
    };
    let hops = match parse(&raw) {
        Ok(hops) => hops,
        Err(err) => return (Vec::new(), Err(err)),
    };
    let stats = aggregate(&hops, &settings.weights);
    (hops, stats)
}
