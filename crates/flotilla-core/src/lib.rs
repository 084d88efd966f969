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

//! Shared torrent DTOs and the error taxonomy used across the Flotilla
//! workspace.
//!
//! Every crate that touches upstream state speaks in terms of the types
//! defined here: [`TorrentView`] is the normalized record synced from an
//! upstream, [`Instance`] identifies one registered endpoint, and
//! [`ErrorKind`] is the stable classification the HTTP boundary maps to
//! status codes.

mod domain;
mod error;
mod hash;
mod model;

pub use domain::tracker_domain;
pub use error::{ErrorKind, Kinded};
pub use hash::canonical_hash;
pub use model::{
    Category, Counters, Instance, TorrentState, TorrentView, UNCATEGORIZED, UNTAGGED,
};
