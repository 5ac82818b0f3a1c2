//! Path measurement and parsing.

pub mod parser;
pub mod process;
pub mod runner;

pub use parser::{parse, parse_mtr_json, parse_mtr_report, parse_traceroute, validate_sequence};
pub use process::{run_with_deadline, ProcessOutput};
pub use runner::{
    Backend, Cancellation, MeasureSettings, PathProber, RawFormat, RawMeasurement, SystemProber,
};
