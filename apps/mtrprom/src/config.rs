use anyhow::{anyhow, Result};
use clap::ValueEnum;
use mtrprom_collect::CollectSettings;
use mtrprom_expo::DEFAULT_OUTPUT_FILE;
use mtrprom_model::{validate_probes, ConfigError, ProbeDefinition};
use mtrprom_stats::HealthWeights;
use mtrprom_trace::{Backend, SystemProber};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum BackendName {
    MtrJson,
    MtrReport,
    Traceroute,
}

impl From<BackendName> for Backend {
    fn from(name: BackendName) -> Self {
        match name {
            BackendName::MtrJson => Backend::MtrJson,
            BackendName::MtrReport => Backend::MtrReport,
            BackendName::Traceroute => Backend::Traceroute,
        }
    }
}

/// `global:` section of the config file. Command-line flags are folded in
/// with [`GlobalConfig::overlay`], so every field is optional here and
/// defaults are applied only in [`RunConfig::resolve`].
#[derive(Debug, Default, Clone, PartialEq, Deserialize)]
pub struct GlobalConfig {
    pub output: Option<PathBuf>,
    pub output_dir: Option<PathBuf>,
    pub mtr_cycles: Option<u32>,
    pub probe_timeout_secs: Option<u64>,
    pub deadline_secs: Option<u64>,
    pub workers: Option<usize>,
    pub retries: Option<u32>,
    pub interval_secs: Option<f64>,
    pub numeric: Option<bool>,
    pub backend: Option<BackendName>,
    pub program: Option<PathBuf>,
    pub jitter_weight: Option<f64>,
    pub variance_weight: Option<f64>,
    pub json_output: Option<PathBuf>,
}

impl GlobalConfig {
    /// Values set in `other` win.
    pub fn overlay(self, other: GlobalConfig) -> GlobalConfig {
        // an explicit output file and an output directory are alternatives
        let (output, output_dir) = if other.output.is_some() || other.output_dir.is_some() {
            (other.output, other.output_dir)
        } else {
            (self.output, self.output_dir)
        };

        GlobalConfig {
            output,
            output_dir,
            mtr_cycles: other.mtr_cycles.or(self.mtr_cycles),
            probe_timeout_secs: other.probe_timeout_secs.or(self.probe_timeout_secs),
            deadline_secs: other.deadline_secs.or(self.deadline_secs),
            workers: other.workers.or(self.workers),
            retries: other.retries.or(self.retries),
            interval_secs: other.interval_secs.or(self.interval_secs),
            numeric: other.numeric.or(self.numeric),
            backend: other.backend.or(self.backend),
            program: other.program.or(self.program),
            jitter_weight: other.jitter_weight.or(self.jitter_weight),
            variance_weight: other.variance_weight.or(self.variance_weight),
            json_output: other.json_output.or(self.json_output),
        }
    }
}

#[derive(Debug, Default, Clone, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub global: GlobalConfig,
    #[serde(default)]
    pub probes: Vec<ProbeDefinition>,
}

pub fn load_config(path: &Path) -> Result<FileConfig> {
    let contents = fs::read_to_string(path)
        .map_err(|err| anyhow!("failed to read config {:?}: {}", path, err))?;
    parse_config(&contents).map_err(|err| anyhow!("invalid config {:?}: {}", path, err))
}

pub fn parse_config(contents: &str) -> Result<FileConfig, serde_yaml::Error> {
    serde_yaml::from_str(contents)
}

/// Fully resolved and validated settings for one collection cycle.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub output: PathBuf,
    pub json_output: Option<PathBuf>,
    pub backend: Backend,
    pub program: Option<PathBuf>,
    pub collect: CollectSettings,
    pub probes: Vec<ProbeDefinition>,
}

impl RunConfig {
    pub fn resolve(global: GlobalConfig, probes: Vec<ProbeDefinition>) -> Result<Self, ConfigError> {
        let defaults = CollectSettings::default();

        let output = match (global.output, global.output_dir) {
            (Some(output), _) => output,
            (None, Some(dir)) => dir.join(DEFAULT_OUTPUT_FILE),
            (None, None) => {
                return Err(ConfigError::InvalidSetting {
                    name: "output",
                    reason: "set either output or output_dir".to_string(),
                })
            }
        };

        let weights = HealthWeights::new(
            global.jitter_weight.unwrap_or(defaults.weights.jitter),
            global.variance_weight.unwrap_or(defaults.weights.variance),
        )?;

        let collect = CollectSettings {
            cycles: global.mtr_cycles.unwrap_or(defaults.cycles),
            per_probe_timeout: global
                .probe_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.per_probe_timeout),
            overall_deadline: global
                .deadline_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.overall_deadline),
            workers: global.workers.unwrap_or(defaults.workers),
            retries: global.retries.unwrap_or(defaults.retries),
            interval_secs: global.interval_secs,
            numeric: global.numeric.unwrap_or(defaults.numeric),
            weights,
        };
        collect.validate()?;
        validate_probes(&probes)?;

        Ok(Self {
            output,
            json_output: global.json_output,
            backend: global.backend.map(Backend::from).unwrap_or_default(),
            program: global.program,
            collect,
            probes,
        })
    }

    pub fn prober(&self) -> SystemProber {
        let prober = SystemProber::new(self.backend);
        match &self.program {
            Some(program) => prober.with_program(program.clone()),
            None => prober,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
global:
  output_dir: /var/lib/node_exporter/textfile
  mtr_cycles: 20
  workers: 2
  backend: mtr-report

probes:
  - name: cloudflare_dns
    target: 1.1.1.1
    port: 53
    labels:
      service: dns
  - name: ping_test
    target: 8.8.8.8
"#;

    #[test]
    fn parses_sample_config() {
        let config = parse_config(SAMPLE).unwrap();
        assert_eq!(config.global.mtr_cycles, Some(20));
        assert_eq!(config.global.backend, Some(BackendName::MtrReport));
        assert_eq!(config.probes.len(), 2);
        assert_eq!(config.probes[0].port, 53);
        assert_eq!(config.probes[0].labels.get("service"), Some("dns"));
        assert_eq!(config.probes[1].port, 443);
        assert!(config.probes[1].labels.is_empty());
    }

    #[test]
    fn resolves_output_dir_and_defaults() {
        let config = parse_config(SAMPLE).unwrap();
        let run = RunConfig::resolve(config.global, config.probes).unwrap();

        assert_eq!(
            run.output,
            PathBuf::from("/var/lib/node_exporter/textfile/mtr_all_probes.prom")
        );
        assert_eq!(run.backend, Backend::MtrReport);
        assert_eq!(run.collect.cycles, 20);
        assert_eq!(run.collect.workers, 2);
        assert_eq!(run.collect.per_probe_timeout, Duration::from_secs(120));
        assert_eq!(run.collect.weights, HealthWeights::default());
        assert_eq!(run.prober().program, PathBuf::from("mtr"));
    }

    #[test]
    fn command_line_overrides_file() {
        let config = parse_config(SAMPLE).unwrap();
        let cli = GlobalConfig {
            output: Some(PathBuf::from("/tmp/out.prom")),
            mtr_cycles: Some(3),
            ..GlobalConfig::default()
        };
        let merged = config.global.overlay(cli);

        assert_eq!(merged.output, Some(PathBuf::from("/tmp/out.prom")));
        assert_eq!(merged.output_dir, None);
        assert_eq!(merged.mtr_cycles, Some(3));
        assert_eq!(merged.workers, Some(2));
    }

    #[test]
    fn missing_output_is_rejected() {
        let err = RunConfig::resolve(GlobalConfig::default(), Vec::new()).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidSetting { name: "output", .. }));
    }

    #[test]
    fn duplicate_probe_names_are_rejected() {
        let text = r#"
global: { output: out.prom }
probes:
  - { name: a, target: 1.1.1.1 }
  - { name: a, target: 8.8.8.8 }
"#;
        let config = parse_config(text).unwrap();
        let err = RunConfig::resolve(config.global, config.probes).unwrap_err();
        assert_eq!(err, ConfigError::DuplicateProbe("a".to_string()));
    }

    #[test]
    fn reserved_label_fails_to_load() {
        let text = r#"
probes:
  - name: a
    target: 1.1.1.1
    labels: { target: other }
"#;
        assert!(parse_config(text).is_err());
    }

    #[test]
    fn repeated_label_key_fails_to_load() {
        let text = r#"
probes:
  - name: a
    target: 1.1.1.1
    labels:
      env: prod
      env: dev
"#;
        let err = parse_config(text).unwrap_err();
        assert!(err.to_string().contains("duplicate label \"env\""), "{err}");
    }

    #[test]
    fn negative_weight_is_rejected() {
        let global = GlobalConfig {
            output: Some(PathBuf::from("out.prom")),
            jitter_weight: Some(-1.0),
            ..GlobalConfig::default()
        };
        assert!(RunConfig::resolve(global, Vec::new()).is_err());
    }
}
