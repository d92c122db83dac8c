pub mod api;
pub mod auth;
pub mod backup;
pub mod config;
pub mod models;
pub mod security;
pub mod store;
pub mod visits;

use std::sync::Arc;

use auth::{AccountManager, SessionManager};
use backup::BackupEngine;
use config::Config;
use security::SecurityMonitor;
use store::RecordStore;
use visits::VisitRegistry;

pub struct AppState {
    pub config: Config,
    pub store: Arc<RecordStore>,
    pub accounts: Arc<AccountManager>,
    pub sessions: Arc<SessionManager>,
    pub visits: Arc<VisitRegistry>,
    pub monitor: Arc<SecurityMonitor>,
    /// None when backups are disabled in the config.
    pub backups: Option<Arc<BackupEngine>>,
}

impl AppState {
    pub fn new(
        config: Config,
        store: Arc<RecordStore>,
        accounts: Arc<AccountManager>,
        sessions: Arc<SessionManager>,
        monitor: Arc<SecurityMonitor>,
        backups: Option<Arc<BackupEngine>>,
    ) -> Self {
        let visits = Arc::new(VisitRegistry::new(store.clone()));
        Self {
            config,
            store,
            accounts,
            sessions,
            visits,
            monitor,
            backups,
        }
    }
}
