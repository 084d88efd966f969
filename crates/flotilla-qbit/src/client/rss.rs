//! RSS feed and auto-download rule RPCs.
//!
//! The RSS tree is an upstream-defined nested structure, so payloads pass
//! through as untyped JSON.

use serde_json::Value;

use crate::client::QbitClient;
use crate::error::{QbitError, QbitResult};

impl QbitClient {
    /// Add an RSS feed at an optional folder path.
    ///
    /// # Errors
    ///
    /// Returns [`QbitError::Conflict`] when the feed already exists.
    pub async fn rss_add_feed(&self, url: &str, path: Option<&str>) -> QbitResult<()> {
        let mut form = vec![("url", url.to_string())];
        if let Some(path) = path {
            form.push(("path", path.to_string()));
        }
        self.post_form("rss/addFeed", &form).await
    }

    /// Remove a feed or folder by path.
    ///
    /// # Errors
    ///
    /// Returns a classified upstream error.
    pub async fn rss_remove_item(&self, path: &str) -> QbitResult<()> {
        self.post_form("rss/removeItem", &[("path", path.to_string())])
            .await
    }

    /// Fetch the full RSS tree, optionally with article data.
    ///
    /// # Errors
    ///
    /// Returns a classified upstream error.
    pub async fn rss_get_all(&self, with_data: bool) -> QbitResult<Value> {
        self.get_json("rss/items", &[("withData", with_data.to_string())])
            .await
    }

    /// Create or replace an auto-download rule.
    ///
    /// # Errors
    ///
    /// Returns a classified upstream error.
    pub async fn rss_set_rule(&self, name: &str, definition: &Value) -> QbitResult<()> {
        let encoded = serde_json::to_string(definition).map_err(QbitError::Decode)?;
        self.post_form(
            "rss/setRule",
            &[("ruleName", name.to_string()), ("ruleDef", encoded)],
        )
        .await
    }

    /// Fetch all auto-download rules keyed by name.
    ///
    /// # Errors
    ///
    /// Returns a classified upstream error.
    pub async fn rss_get_rules(&self) -> QbitResult<Value> {
        self.get_json("rss/rules", &[]).await
    }

    /// Remove an auto-download rule.
    ///
    /// # Errors
    ///
    /// Returns a classified upstream error.
    pub async fn rss_remove_rule(&self, name: &str) -> QbitResult<()> {
        self.post_form("rss/removeRule", &[("ruleName", name.to_string())])
            .await
    }
}
