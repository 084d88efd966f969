//! Shared handler state.

use std::sync::Arc;

use flotilla_data::Database;
use flotilla_pool::ClientPool;
use flotilla_query::ListingService;
use flotilla_rules::RuleEngine;
use flotilla_sync::SyncService;

/// Everything the handlers need, cloned cheaply per request.
#[derive(Clone)]
pub struct ApiState {
    /// Persistence.
    pub db: Database,
    /// Client pool (instance sessions + credential crypter).
    pub pool: Arc<ClientPool>,
    /// Snapshot cache and mutation fan-out.
    pub sync: Arc<SyncService>,
    /// Read-side listing facade.
    pub listing: Arc<ListingService>,
    /// Automation engine.
    pub engine: Arc<RuleEngine>,
}

impl ApiState {
    /// Assemble the handler state.
    #[must_use]
    pub fn new(
        db: Database,
        pool: Arc<ClientPool>,
        sync: Arc<SyncService>,
        listing: Arc<ListingService>,
        engine: Arc<RuleEngine>,
    ) -> Self {
        Self {
            db,
            pool,
            sync,
            listing,
            engine,
        }
    }
}
