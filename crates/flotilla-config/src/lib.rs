#![forbid(unsafe_code)]
#![deny(
    warnings,
    dead_code,
    unused,
    unused_imports,
    unused_must_use,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls,
    missing_docs
)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::multiple_crate_versions)]

//! Process-wide configuration.
//!
//! A single TOML file plus `FLOTILLA_*` environment overrides supplies
//! everything the service needs at boot: the HTTP bind address, the SQLite
//! database path, the 32-byte credential key, the external-program
//! allow-list, and tuning defaults for refresh and scheduling. Validation
//! is eager; a process with bad config never starts serving.

mod error;
mod model;

pub use error::{ConfigError, ConfigResult};
pub use model::{FlotillaConfig, LogFormat};
