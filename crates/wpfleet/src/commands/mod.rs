//! Command dispatch: bridges CLI args -> sync client / server -> output formatting.

pub mod config_cmd;
pub mod serve;
pub mod sites;
pub mod util;
