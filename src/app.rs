use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};

use crate::catalog::Catalog;
use crate::config::Settings;
use crate::connectivity::{ConnectivityProbe, HttpReachability};
use crate::refresh::fetch::HttpFetcher;
use crate::store::SqliteStore;
use crate::sync::confirm::HttpConfirmer;
use crate::sync::router::ConfirmRouter;

/// Wiring shared by every command: store, settings and catalog.
pub struct AppContext {
    pub store: SqliteStore,
    pub settings: Settings,
    pub catalog: Arc<Catalog>,
}

impl AppContext {
    pub async fn open(db: &str, catalog_path: &Path) -> Result<Self> {
        let settings = Settings::from_env()?;
        let catalog = Catalog::load_or_empty(catalog_path)
            .with_context(|| format!("load catalog {}", catalog_path.display()))?;
        let store = SqliteStore::connect(db).await.with_context(|| format!("open {db}"))?;
        store.migrate().await.context("apply migrations")?;
        Ok(Self { store, settings, catalog: Arc::new(catalog) })
    }

    pub fn probe(&self) -> Result<ConnectivityProbe> {
        let source = HttpReachability::new(self.settings.http_client()?, self.settings.resolved_probe_url()?);
        Ok(ConnectivityProbe::new(Arc::new(source)))
    }

    pub fn fetcher(&self) -> Result<HttpFetcher> {
        Ok(HttpFetcher::new(
            self.settings.http_client()?,
            self.settings.base_url()?.clone(),
            self.settings.org_id.clone(),
            self.settings.api_token.clone(),
        ))
    }

    /// One HTTP confirmer per catalog entry that declares a confirm endpoint.
    pub fn confirm_router(&self) -> Result<ConfirmRouter> {
        let http = self.settings.http_client()?;
        let base = self.settings.base_url()?;
        let mut router = ConfirmRouter::new();
        for api in self.catalog.confirmable() {
            let Some(path) = api.confirm_path.as_deref() else { continue };
            let endpoint = base
                .join(path.trim_start_matches('/'))
                .with_context(|| format!("confirm path for {}", api.responsibility))?;
            let confirmer = HttpConfirmer::new(http.clone(), endpoint, self.settings.api_token.clone(), self.store.clone());
            router.register(api.responsibility.clone(), Arc::new(confirmer));
        }
        Ok(router)
    }
}
