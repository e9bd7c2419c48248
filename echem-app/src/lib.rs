pub mod config;
pub mod fs_host;
pub mod logging;
pub mod plotting;
pub mod workflow;
