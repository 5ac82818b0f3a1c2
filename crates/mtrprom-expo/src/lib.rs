//! Exposition rendering and atomic publication of snapshots.

pub mod atomic;
pub mod render;

pub use atomic::{write_atomic, StagedFile, WriteError};
pub use render::{escape_label_value, family_names, render, MetricType};

/// File name used when only an output directory is configured.
pub const DEFAULT_OUTPUT_FILE: &str = "mtr_all_probes.prom";
