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

//! HTTP/JSON control plane.
//!
//! Thin handlers over the typed layers below: every error arriving here
//! already carries an [`flotilla_core::ErrorKind`], and the [`error`]
//! module maps kinds to status codes exactly once. Handlers never
//! interpret upstream HTTP statuses themselves.

mod error;
mod http;
mod state;

pub use error::ApiError;
pub use http::router;
pub use state::ApiState;
