//! Fan-out of probe definitions into a single snapshot.

pub mod orchestrator;
pub mod settings;

pub use orchestrator::{build_snapshot, now_ms, CANCEL_GRACE};
pub use settings::CollectSettings;
