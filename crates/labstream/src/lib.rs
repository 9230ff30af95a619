// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # LabStream - Lab Streaming Network Library
//!
//! Discovery of live measurement streams on a local network. Providers
//! advertise a stream descriptor; recipients locate matching streams with a
//! structured query over UDP multicast and unicast probing.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use labstream::{Resolver, Result};
//!
//! fn main() -> Result<()> {
//!     let mut resolver = Resolver::new()?;
//!
//!     // Block until at least one EEG stream is found (or 5 s have passed)
//!     let streams = resolver.resolve_oneshot("type='EEG'", 1, 5.0, 0.0)?;
//!     for info in &streams {
//!         println!("found {} on {}", info.name, info.hostname);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! +------------------------------------------------------------+
//! |                     Resolver (facade)                      |
//! |   resolve_oneshot | resolve_continuous | results | cancel  |
//! +------------------------------------------------------------+
//! |                      Wave Scheduler                        |
//! |   multicast burst -> delayed unicast burst -> next wave    |
//! +------------------------------------------------------------+
//! |                     Resolve Attempts                       |
//! |   one UDP socket per protocol stack, bounded by max RTT    |
//! +------------------------------------------------------------+
//! |                       Result Store                         |
//! |   stream uid -> (descriptor, last seen), aged on demand    |
//! +------------------------------------------------------------+
//! ```

/// Monotonic clock used for timestamps, pacing, and result aging.
pub mod clock;
/// Global configuration (tuning constants, address lists, runtime config).
pub mod config;
/// Stream discovery (resolver, wave scheduler, wire protocol, query language).
pub mod discovery;

pub use config::ApiConfig;
pub use discovery::query::build_query;
pub use discovery::resolver::Resolver;
pub use discovery::stream_info::StreamInfo;

/// Errors returned by labstream operations.
///
/// I/O failures inside the resolver core (per-endpoint send errors, socket
/// open failures on one protocol stack, undecodable replies) are absorbed
/// and logged; only query validation and construction-time failures surface
/// through this type.
#[derive(Debug)]
pub enum Error {
    /// The query string failed to parse (surfaced before any I/O starts).
    InvalidQuery(String),
    /// Configuration file could not be read.
    ConfigIo(String),
    /// Configuration content could not be parsed.
    ConfigParse(String),
    /// A configuration field holds an unusable value.
    ConfigValue(String),
    /// I/O error with underlying cause (e.g. worker thread spawn failure).
    IoError(std::io::Error),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidQuery(s) => write!(f, "invalid query: {}", s),
            Self::ConfigIo(s) => write!(f, "config I/O error: {}", s),
            Self::ConfigParse(s) => write!(f, "config parse error: {}", s),
            Self::ConfigValue(s) => write!(f, "invalid config value: {}", s),
            Self::IoError(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::IoError(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Self::IoError(e)
    }
}

/// Result alias for labstream operations.
pub type Result<T> = std::result::Result<T, Error>;

/// LabStream library version string.
pub const VERSION: &str = "0.2.0";
