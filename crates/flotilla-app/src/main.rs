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
    rustdoc::bare_urls
)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::multiple_crate_versions)]

//! Flotilla: a multi-instance qBittorrent management proxy.

mod bootstrap;
mod telemetry;

use std::path::PathBuf;

use anyhow::Result;

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("FLOTILLA_CONFIG").ok())
        .unwrap_or_else(|| "flotilla.toml".to_string());
    bootstrap::run(&PathBuf::from(config_path)).await
}
