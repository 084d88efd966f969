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

//! Lazy per-instance client pool.
//!
//! The pool owns the only mapping from instance ids to live upstream
//! sessions. Reads are lock-free loads of a shared snapshot pointer;
//! writes clone the map, mutate the clone, and publish it with a single
//! swap. Clients are constructed on first use, decrypting stored
//! credentials with the process-wide AEAD key, and are torn down when the
//! instance is deleted or its session degrades.

mod crypto;
mod error;
mod handle;
mod pool;

pub use crypto::Crypter;
pub use error::{PoolError, PoolResult};
pub use handle::ClientHandle;
pub use pool::{ClientPool, InstanceDirectory};
