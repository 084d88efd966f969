//! Per-instance session handle with degradation tracking.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use flotilla_qbit::{QbitClient, QbitError};
use tracing::warn;

/// Consecutive auth/connect failures inside the window that degrade a
/// session.
const DEGRADE_THRESHOLD: u32 = 5;
/// Window in which consecutive failures are counted.
const DEGRADE_WINDOW: Duration = Duration::from_secs(60);

#[derive(Debug, Default)]
struct Health {
    consecutive_failures: u32,
    window_start: Option<Instant>,
    degraded: bool,
}

/// A live upstream session shared by every caller targeting one instance.
#[derive(Debug)]
pub struct ClientHandle {
    /// Instance this session belongs to.
    pub instance_id: i64,
    client: QbitClient,
    health: Mutex<Health>,
}

impl ClientHandle {
    pub(crate) fn new(instance_id: i64, client: QbitClient) -> Self {
        Self {
            instance_id,
            client,
            health: Mutex::new(Health::default()),
        }
    }

    /// The underlying typed client.
    #[must_use]
    pub const fn client(&self) -> &QbitClient {
        &self.client
    }

    /// Whether repeated failures have degraded this session.
    #[must_use]
    pub fn is_degraded(&self) -> bool {
        self.health.lock().map(|h| h.degraded).unwrap_or(true)
    }

    /// Record a successful upstream call, resetting the failure window.
    pub fn record_success(&self) {
        if let Ok(mut health) = self.health.lock() {
            health.consecutive_failures = 0;
            health.window_start = None;
            health.degraded = false;
        }
    }

    /// Record a failed upstream call. Only authentication rejections and
    /// transient connect failures count toward degradation.
    pub fn record_failure(&self, err: &QbitError) {
        if !matches!(
            err,
            QbitError::Unauthorized | QbitError::Transient { .. }
        ) {
            return;
        }
        let Ok(mut health) = self.health.lock() else {
            return;
        };
        let now = Instant::now();
        match health.window_start {
            Some(start) if now.duration_since(start) <= DEGRADE_WINDOW => {
                health.consecutive_failures += 1;
            }
            _ => {
                health.window_start = Some(now);
                health.consecutive_failures = 1;
            }
        }
        if health.consecutive_failures >= DEGRADE_THRESHOLD && !health.degraded {
            health.degraded = true;
            warn!(
                instance_id = self.instance_id,
                failures = health.consecutive_failures,
                "upstream session degraded after repeated failures"
            );
        }
    }

    /// Observe a call outcome, updating health either way.
    pub fn observe<T>(&self, result: &Result<T, QbitError>) {
        match result {
            Ok(_) => self.record_success(),
            Err(err) => self.record_failure(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flotilla_qbit::QbitClientConfig;

    async fn handle() -> ClientHandle {
        // The client never dials in these tests; construction only.
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("POST"))
            .and(wiremock::matchers::path("/api/v2/auth/login"))
            .respond_with(wiremock::ResponseTemplate::new(200).set_body_string("Ok."))
            .mount(&server)
            .await;
        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .and(wiremock::matchers::path("/api/v2/app/version"))
            .respond_with(wiremock::ResponseTemplate::new(200).set_body_string("v5.0.2"))
            .mount(&server)
            .await;
        let client = QbitClient::connect(QbitClientConfig::new(
            server.uri(),
            "admin",
            "adminadmin",
        ))
        .await
        .expect("connect");
        ClientHandle::new(1, client)
    }

    #[tokio::test]
    async fn five_auth_failures_degrade_the_session() {
        let handle = handle().await;
        for _ in 0..4 {
            handle.record_failure(&QbitError::Unauthorized);
            assert!(!handle.is_degraded());
        }
        handle.record_failure(&QbitError::Unauthorized);
        assert!(handle.is_degraded());
    }

    #[tokio::test]
    async fn success_resets_the_window() {
        let handle = handle().await;
        for _ in 0..4 {
            handle.record_failure(&QbitError::Unauthorized);
        }
        handle.record_success();
        handle.record_failure(&QbitError::Unauthorized);
        assert!(!handle.is_degraded());
    }

    #[tokio::test]
    async fn permanent_errors_do_not_degrade() {
        let handle = handle().await;
        for _ in 0..10 {
            handle.record_failure(&QbitError::NotFound);
        }
        assert!(!handle.is_degraded());
    }
}
