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

//! The filter/query layer.
//!
//! Parses list requests into a normalized plan, evaluates them against
//! instance snapshots, and produces pages with totals and per-dimension
//! counters. Filter dimensions AND-combine; elements within a dimension
//! OR-combine (tags optionally require all). Counters for a dimension
//! ignore that dimension's own filter, so the UI can show what each
//! bucket would contain. The expression filter reuses the rule engine's
//! condition grammar.

mod error;
mod filter;
mod service;
mod sort;

pub use error::{QueryError, QueryResult};
pub use filter::{StatusFilter, TagMatchMode, TorrentFilter};
pub use service::{
    CrossInstanceRow, CrossListRequest, CrossListResponse, FieldSelector, InstanceWarning,
    ListRequest, ListResponse, ListingService,
};
pub use sort::{SortDirection, SortKey};
