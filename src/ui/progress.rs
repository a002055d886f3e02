use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

use crate::ui::icons::{CHECK, CROSS, PAUSE};
use crate::workspace::RunStatus;

/// Single-line spinner shown while a pipeline run is in flight.
///
/// Hidden when `visible` is false, so callers can keep one code path for
/// interactive runs where the spinner would fight with prompts.
pub struct RunSpinner {
    bar: ProgressBar,
}

impl RunSpinner {
    pub fn new(project: &str, visible: bool) -> Self {
        let bar = if visible {
            ProgressBar::new_spinner()
        } else {
            ProgressBar::hidden()
        };
        let spinner_style = ProgressStyle::default_spinner()
            .template("{spinner:.cyan} {prefix:.bold} {msg} {elapsed:.dim}")
            .expect("progress bar template is a valid static string");
        bar.set_style(spinner_style);
        bar.set_prefix(project.to_string());
        bar.set_message("running requirements pipeline");
        bar.enable_steady_tick(Duration::from_millis(100));
        Self { bar }
    }

    pub fn set_message(&self, msg: impl Into<String>) {
        self.bar.set_message(msg.into());
    }

    /// Stop the spinner and leave a one-line outcome behind.
    pub fn finish(&self, status: RunStatus) {
        let line = match status {
            RunStatus::Completed => format!("{}{}", CHECK, style("pipeline completed").green()),
            RunStatus::Paused => format!("{}{}", PAUSE, style("pipeline paused").yellow()),
            RunStatus::Failed => format!("{}{}", CROSS, style("pipeline failed").red()),
            other => format!("pipeline {}", other),
        };
        self.bar.finish_with_message(line);
    }

    pub fn abandon(&self) {
        self.bar.finish_and_clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hidden_spinner_finishes_cleanly() {
        let spinner = RunSpinner::new("task-tracker", false);
        spinner.set_message("modeling");
        spinner.finish(RunStatus::Completed);
        assert!(spinner.bar.is_finished());
    }
}
