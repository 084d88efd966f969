//! Application-level RPCs: version discovery and preferences.

use serde_json::Value;

use crate::client::QbitClient;
use crate::error::{QbitError, QbitResult};

impl QbitClient {
    /// Fetch the upstream application version, e.g. `v5.0.2`.
    ///
    /// # Errors
    ///
    /// Returns a classified upstream error.
    pub(crate) async fn fetch_version(&self) -> QbitResult<String> {
        let version = self.get_text("app/version", &[]).await?;
        Ok(version.trim().to_string())
    }

    /// Fetch the WebAPI version, e.g. `2.11.2`.
    ///
    /// # Errors
    ///
    /// Returns a classified upstream error.
    pub async fn get_webapi_version(&self) -> QbitResult<String> {
        let version = self.get_text("app/webapiVersion", &[]).await?;
        Ok(version.trim().to_string())
    }

    /// Fetch the full preferences object.
    ///
    /// The preference surface varies per upstream version, so the payload
    /// is passed through as untyped JSON.
    ///
    /// # Errors
    ///
    /// Returns a classified upstream error.
    pub async fn get_app_preferences(&self) -> QbitResult<Value> {
        self.get_json("app/preferences", &[]).await
    }

    /// Patch preferences; only the keys present in `prefs` change.
    ///
    /// # Errors
    ///
    /// Returns a classified upstream error.
    pub async fn set_preferences(&self, prefs: &Value) -> QbitResult<()> {
        let encoded = serde_json::to_string(prefs).map_err(QbitError::Decode)?;
        self.post_form("app/setPreferences", &[("json", encoded)])
            .await
    }

    /// Fetch the default save path configured upstream.
    ///
    /// # Errors
    ///
    /// Returns a classified upstream error.
    pub async fn get_default_save_path(&self) -> QbitResult<String> {
        self.get_text("app/defaultSavePath", &[]).await
    }
}
