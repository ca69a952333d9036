//! Wires the concrete persistence/storage backends and domain services
//! together into the single `Clone`-able handle that axum hands to every
//! extractor and handler via `Router::with_state`.

use std::sync::Arc;

use crate::auth::{OAuth2Service, RbacService};
use crate::config::Config;
use crate::files::FileService;
use crate::modelversions::ModelService;
use crate::persistence::{InMemoryStore, Store};
use crate::processing::{BroadcastProgressNotifier, ProgressNotifier};
use crate::storage::{MemoryStorageProvider, StorageProvider};
use crate::workspaces::WorkspaceService;

#[derive(Clone)]
pub struct Services {
    pub config: Arc<Config>,
    pub store: Arc<dyn Store>,
    pub storage: Arc<dyn StorageProvider>,
    pub rbac: RbacService,
    pub oauth: OAuth2Service,
    pub files: FileService,
    pub models: ModelService,
    pub workspaces: WorkspaceService,
    pub progress: Arc<dyn ProgressNotifier>,
}

impl Services {
    pub fn new(config: Config, store: Arc<dyn Store>, storage: Arc<dyn StorageProvider>) -> Self {
        Self::with_progress_notifier(config, store, storage, Arc::new(BroadcastProgressNotifier::new()))
    }

    pub fn with_progress_notifier(
        config: Config,
        store: Arc<dyn Store>,
        storage: Arc<dyn StorageProvider>,
        progress: Arc<dyn ProgressNotifier>,
    ) -> Self {
        let rbac = RbacService::new(store.clone());
        let oauth = OAuth2Service::new(store.clone(), config.oauth.clone(), rbac.clone());
        let files = FileService::new(store.clone(), storage.clone(), rbac.clone());
        let models = ModelService::new(store.clone(), storage.clone(), rbac.clone());
        let workspaces = WorkspaceService::new(store.clone(), rbac.clone());
        Self {
            config: Arc::new(config),
            store,
            storage,
            rbac,
            oauth,
            files,
            models,
            workspaces,
            progress,
        }
    }

    /// An all-in-memory wiring for unit and integration tests.
    pub async fn test() -> Self {
        let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
        let storage: Arc<dyn StorageProvider> = Arc::new(MemoryStorageProvider::new());
        Self::new(Config::default(), store, storage)
    }
}
