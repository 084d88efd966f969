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

//! Per-instance snapshot cache and mutation fan-out.
//!
//! Every registered instance gets one [`SnapshotManager`] owning an
//! immutable [`Snapshot`] behind an atomic pointer. Readers load the
//! current pointer without blocking; refreshes and optimistic patches
//! build a new snapshot and publish it with a single swap, so a reader
//! always observes a consistent image and a monotonically non-decreasing
//! `serving_version`.
//!
//! Refreshes ride qBittorrent's `sync/maindata` cursor: deltas are applied
//! to a clone of the current snapshot and a full rebuild happens whenever
//! the upstream signals `full_update`. At most one refresh is in flight
//! per instance; stale readers are served the published snapshot while the
//! refresh proceeds.

mod detail;
mod error;
mod manager;
mod service;
mod snapshot;

pub use detail::{DetailCache, DetailEndpoint};
pub use error::{SyncError, SyncResult};
pub use manager::{MaindataSource, SnapshotManager, SnapshotRead};
pub use service::SyncService;
pub use snapshot::{Snapshot, SnapshotState};
