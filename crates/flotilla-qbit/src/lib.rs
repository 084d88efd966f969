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

//! Typed, cookie-authenticated client for a single qBittorrent WebUI
//! endpoint.
//!
//! The client speaks the documented subset of the api/v2 surface: session
//! login, `sync/maindata` cursors, torrent listing and actions, category and
//! tag management, preferences, RSS, and the torrent-creator task API (gated
//! on upstream version). Every HTTP status leaving this crate has already
//! been folded into [`QbitError`] by [`error::classify`]; callers never see
//! raw status codes.
//!
//! Retry discipline: one silent re-login on an authentication rejection,
//! exponential backoff (250 ms base, 5 s cap, 3 attempts) for idempotent
//! reads, and no automatic retry for mutations.

mod client;
mod error;
pub mod models;

pub use client::{AddTorrentOptions, AddTorrentPayload, BulkVerb, QbitClient, QbitClientConfig};
pub use error::{QbitError, QbitResult, classify};
