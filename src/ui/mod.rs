pub mod icons;
pub mod progress;
pub mod report;

pub use progress::RunSpinner;
pub use report::{render_history, render_result, render_stats, render_summary};
