//! CLI command implementations.
//!
//! Each submodule owns one or more related `Commands` variants:
//!
//! | Module      | Commands handled                  |
//! |-------------|-----------------------------------|
//! | `project`   | `Init`                            |
//! | `run`       | `Run`                             |
//! | `workspace` | `Status`, `Cleanup`, `Archive`    |
//! | `export`    | `Export`                          |

pub mod export;
pub mod project;
pub mod run;
pub mod workspace;

pub use export::cmd_export;
pub use project::cmd_init;
pub use run::{RunArgs, cmd_run};
pub use workspace::{cmd_archive, cmd_cleanup, cmd_status};
