use crate::process::run_with_deadline;
use mtrprom_model::{ProbeDefinition, ProbeError};
use std::path::PathBuf;
use std::process::Command;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Report columns requested from mtr: loss, sent, received, last, avg, best, worst, stddev.
pub const MTR_FIELDS: &str = "LSRNABWV";

pub const TRACEROUTE_MAX_HOPS: u32 = 30;
pub const TRACEROUTE_WAIT_SECS: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawFormat {
    MtrJson,
    MtrReport,
    Traceroute,
}

/// Unparsed output of one measurement.
#[derive(Debug, Clone, PartialEq)]
pub struct RawMeasurement {
    pub format: RawFormat,
    pub text: String,
}

#[derive(Debug, Clone)]
pub struct MeasureSettings {
    pub cycles: u32,
    pub timeout: Duration,
    pub interval_secs: Option<f64>,
    pub numeric: bool,
}

impl Default for MeasureSettings {
    fn default() -> Self {
        Self {
            cycles: 10,
            timeout: Duration::from_secs(120),
            interval_secs: None,
            numeric: false,
        }
    }
}

/// Cooperative cancellation shared between the collector and every in-flight probe.
#[derive(Debug, Clone, Default)]
pub struct Cancellation(Arc<AtomicBool>);

impl Cancellation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

pub trait PathProber: Send + Sync {
    /// Runs one measurement against `probe.target`. Must return within
    /// `settings.timeout` (plus a short cleanup grace) and must give up as soon
    /// as `cancel` is raised.
    fn measure(
        &self,
        probe: &ProbeDefinition,
        settings: &MeasureSettings,
        cancel: &Cancellation,
    ) -> Result<RawMeasurement, ProbeError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Backend {
    #[default]
    MtrJson,
    MtrReport,
    Traceroute,
}

impl Backend {
    pub fn format(self) -> RawFormat {
        match self {
            Self::MtrJson => RawFormat::MtrJson,
            Self::MtrReport => RawFormat::MtrReport,
            Self::Traceroute => RawFormat::Traceroute,
        }
    }

    pub fn default_program(self) -> &'static str {
        match self {
            Self::MtrJson | Self::MtrReport => "mtr",
            Self::Traceroute => "traceroute",
        }
    }
}

/// Prober backed by an external `mtr` or `traceroute` binary.
#[derive(Debug, Clone)]
pub struct SystemProber {
    pub program: PathBuf,
    pub backend: Backend,
}

impl SystemProber {
    pub fn new(backend: Backend) -> Self {
        Self {
            program: PathBuf::from(backend.default_program()),
            backend,
        }
    }

    pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = program.into();
        self
    }

    pub fn args(&self, target: &str, settings: &MeasureSettings) -> Vec<String> {
        let cycles = settings.cycles.max(1).to_string();
        let mut args: Vec<String> = Vec::new();

        match self.backend {
            Backend::MtrJson | Backend::MtrReport => {
                if self.backend == Backend::MtrJson {
                    args.push("--json".to_string());
                } else {
                    args.push("--report".to_string());
                    args.push("--report-wide".to_string());
                }
                args.push("--report-cycles".to_string());
                args.push(cycles);
                args.push("--order".to_string());
                args.push(MTR_FIELDS.to_string());
                if let Some(interval) = settings.interval_secs {
                    args.push("--interval".to_string());
                    args.push(interval.to_string());
                }
                if settings.numeric {
                    args.push("--no-dns".to_string());
                }
            }
            Backend::Traceroute => {
                args.push("-n".to_string());
                args.push("-q".to_string());
                args.push(cycles);
                args.push("-m".to_string());
                args.push(TRACEROUTE_MAX_HOPS.to_string());
                args.push("-w".to_string());
                args.push(TRACEROUTE_WAIT_SECS.to_string());
            }
        }

        args.push(target.to_string());
        args
    }
}

impl PathProber for SystemProber {
    fn measure(
        &self,
        probe: &ProbeDefinition,
        settings: &MeasureSettings,
        cancel: &Cancellation,
    ) -> Result<RawMeasurement, ProbeError> {
        let args = self.args(&probe.target, settings);
        debug!(probe = %probe.name, program = ?self.program, ?args, "running measurement");

        let mut command = Command::new(&self.program);
        command.args(&args);
        let output = run_with_deadline(&mut command, settings.timeout, cancel)?;

        if !output.status.success() {
            if output.stdout.trim().is_empty() {
                return Err(ProbeError::Execution(format!(
                    "{} failed for {} ({}): {}",
                    self.program.display(),
                    probe.target,
                    output.status,
                    output.stderr.trim()
                )));
            }
            // Some builds exit non-zero when the target never answers but still
            // print the hops they saw.
            warn!(
                probe = %probe.name,
                status = %output.status,
                "measurement exited unsuccessfully, parsing its report"
            );
        }

        Ok(RawMeasurement {
            format: self.backend.format(),
            text: output.stdout,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mtr_json_args() {
        let prober = SystemProber::new(Backend::MtrJson);
        let settings = MeasureSettings {
            cycles: 10,
            interval_secs: Some(0.5),
            numeric: true,
            ..MeasureSettings::default()
        };
        assert_eq!(
            prober.args("github.com", &settings),
            vec![
                "--json",
                "--report-cycles",
                "10",
                "--order",
                "LSRNABWV",
                "--interval",
                "0.5",
                "--no-dns",
                "github.com"
            ]
        );
    }

    #[test]
    fn traceroute_args_use_cycles_as_queries() {
        let prober = SystemProber::new(Backend::Traceroute);
        let settings = MeasureSettings {
            cycles: 5,
            ..MeasureSettings::default()
        };
        let args = prober.args("1.1.1.1", &settings);
        assert_eq!(args[..3], ["-n", "-q", "5"]);
        assert_eq!(args.last().map(String::as_str), Some("1.1.1.1"));
        assert_eq!(prober.program, PathBuf::from("traceroute"));
    }

    #[test]
    fn cancellation_is_shared_between_clones() {
        let cancel = Cancellation::new();
        let other = cancel.clone();
        assert!(!other.is_cancelled());
        cancel.cancel();
        assert!(other.is_cancelled());
    }
}
