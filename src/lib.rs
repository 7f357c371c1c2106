//! Jenkins-to-Graphite monitoring sidecar.
//!
//! Polls a Jenkins server on a fixed interval, derives queue, agent, and
//! running-build metrics, and forwards them to Graphite's plaintext port
//! under a dotted-path namespace.

pub mod collector;
pub mod config;
pub mod error;
pub mod graphite;
pub mod jenkins;
pub mod labels;
pub mod metrics;

pub use error::{Error, ErrorKind, Result};
