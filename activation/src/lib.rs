pub mod alias_cache;
pub mod api;
pub mod cms;
pub mod config;
pub mod content;
pub mod metrics_defs;
pub mod orchestrator;
pub mod personalize;
pub mod record;
pub mod token;
pub mod types;
pub mod upstream;
pub mod users;

#[cfg(test)]
mod testutils;
