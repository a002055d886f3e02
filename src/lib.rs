pub mod config;
pub mod errors;
pub mod export;
pub mod init;
pub mod ledger;
pub mod logging;
pub mod mare_config;
pub mod pipeline;
pub mod quality;
pub mod roles;
pub mod ui;
pub mod workspace;
