//! Standalone crate for the relay configuration file.

#![doc(issue_tracker_base_url = "https://github.com/blxr-relay/relay/issues/")]
#![cfg_attr(not(test), warn(unused_crate_dependencies))]

pub mod config;
pub use config::{Config, NetworkSection};
