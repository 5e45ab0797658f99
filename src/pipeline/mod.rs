pub mod consolidator;
pub mod input_locator;
pub mod run_summary;

pub use consolidator::Consolidator;
pub use input_locator::locate_inputs;
pub use run_summary::{RunStatus, RunSummary, Stage};
