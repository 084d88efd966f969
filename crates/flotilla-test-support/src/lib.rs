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

//! Shared fixtures for Flotilla test suites.

use std::collections::BTreeSet;

use flotilla_core::{TorrentState, TorrentView, tracker_domain};
use flotilla_qbit::models::MainData;

/// Builder for [`TorrentView`] fixtures with sane defaults.
#[derive(Debug, Clone)]
pub struct TorrentFixture {
    view: TorrentView,
}

impl TorrentFixture {
    /// A seeding torrent with the given hash and matching name.
    #[must_use]
    pub fn new(hash: &str) -> Self {
        Self {
            view: TorrentView {
                hash: hash.to_ascii_lowercase(),
                infohash_v1: Some(hash.to_ascii_lowercase()),
                infohash_v2: None,
                name: format!("torrent-{hash}"),
                size: 1_000,
                progress: 1.0,
                state: TorrentState::Uploading,
                category: String::new(),
                tags: BTreeSet::new(),
                tracker: String::new(),
                tracker_domain: String::new(),
                added_on: 0,
                completion_on: 0,
                save_path: String::new(),
                content_path: String::new(),
                ratio: 0.0,
                ratio_limit: -2.0,
                seeding_time: 0,
                seeding_time_limit: -2,
                dlspeed: 0,
                upspeed: 0,
                dl_limit: 0,
                up_limit: 0,
                num_seeds: 0,
                num_leechs: 0,
                eta: 8_640_000,
                is_private: false,
                amount_left: 0,
                time_active: 0,
                last_activity: 0,
                availability: 0.0,
                uploaded: 0,
                downloaded: 0,
            },
        }
    }

    /// Set the display name.
    #[must_use]
    pub fn name(mut self, name: &str) -> Self {
        self.view.name = name.to_string();
        self
    }

    /// Set the lifecycle state.
    #[must_use]
    pub const fn state(mut self, state: TorrentState) -> Self {
        self.view.state = state;
        self
    }

    /// Set the tag set.
    #[must_use]
    pub fn tags(mut self, tags: &[&str]) -> Self {
        self.view.tags = tags.iter().map(|tag| (*tag).to_string()).collect();
        self
    }

    /// Set the category.
    #[must_use]
    pub fn category(mut self, category: &str) -> Self {
        self.view.category = category.to_string();
        self
    }

    /// Set the payload size in bytes.
    #[must_use]
    pub const fn size(mut self, size: i64) -> Self {
        self.view.size = size;
        self
    }

    /// Set the share ratio.
    #[must_use]
    pub const fn ratio(mut self, ratio: f64) -> Self {
        self.view.ratio = ratio;
        self
    }

    /// Set the completion fraction.
    #[must_use]
    pub const fn progress(mut self, progress: f64) -> Self {
        self.view.progress = progress;
        self
    }

    /// Set seeding time in seconds.
    #[must_use]
    pub const fn seeding_time(mut self, seconds: i64) -> Self {
        self.view.seeding_time = seconds;
        self
    }

    /// Set the added-on unix timestamp.
    #[must_use]
    pub const fn added_on(mut self, added_on: i64) -> Self {
        self.view.added_on = added_on;
        self
    }

    /// Set the announce URL and derive the domain.
    #[must_use]
    pub fn tracker(mut self, url: &str) -> Self {
        self.view.tracker = url.to_string();
        self.view.tracker_domain = tracker_domain(url);
        self
    }

    /// Set save and content paths.
    #[must_use]
    pub fn paths(mut self, save_path: &str, content_path: &str) -> Self {
        self.view.save_path = save_path.to_string();
        self.view.content_path = content_path.to_string();
        self
    }

    /// Mark the torrent private.
    #[must_use]
    pub const fn private(mut self, private: bool) -> Self {
        self.view.is_private = private;
        self
    }

    /// Set current transfer speeds in bytes per second.
    #[must_use]
    pub const fn speeds(mut self, dlspeed: i64, upspeed: i64) -> Self {
        self.view.dlspeed = dlspeed;
        self.view.upspeed = upspeed;
        self
    }

    /// Finish the fixture.
    #[must_use]
    pub fn build(self) -> TorrentView {
        self.view
    }
}

/// Decode a `sync/maindata` JSON fixture.
///
/// # Panics
///
/// Panics when the fixture does not decode; fixtures are test inputs.
#[must_use]
pub fn maindata(json: serde_json::Value) -> MainData {
    serde_json::from_value(json).expect("maindata fixture must decode")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixture_defaults_are_seeding_and_complete() {
        let view = TorrentFixture::new("AA11").build();
        assert_eq!(view.hash, "aa11");
        assert_eq!(view.state, TorrentState::Uploading);
        assert!((view.progress - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn tracker_setter_derives_the_domain() {
        let view = TorrentFixture::new("aa")
            .tracker("https://announce.example.org/x")
            .build();
        assert_eq!(view.tracker_domain, "example.org");
    }
}
