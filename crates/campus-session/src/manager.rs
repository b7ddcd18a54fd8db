//! Site registry and session lifecycle.
//!
//! The manager keeps at most one current site. Stored sites are loaded on
//! demand into shared [`Site`] handles, and every handle has its site
//! schemas installed before it is returned.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use campus_db::queries::current_site;
use campus_db::queries::sites::{self, SiteRow};
use campus_db::site_schema::apply_site_schemas;
use campus_db::{
    DbError, MigrationReport, SchemaRegistry, SchemaScope, SharedConnection, SiteDatabases,
    SiteSchema, StorageLocation,
};
use campus_sync::SyncCoordinator;
use campus_types::version::{check_site_version, convert_version_name, VersionCheck};
use campus_types::{
    Event, RedirectPayload, SessionContext, SiteBasicInfo, SiteConfig, SiteId, SiteInfo,
    SitePublicConfig,
};
use futures_util::future::{BoxFuture, FutureExt, Shared};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::context::CurrentSite;
use crate::events::EventBus;
use crate::remote::RemoteService;
use crate::schemas::core_schemas;
use crate::site::{SiteServices, SITE_INFO_WS};
use crate::{create_site_id, urls, Result, SessionConfig, SessionError, Site};

type MigrationOutcome = std::result::Result<MigrationReport, Arc<DbError>>;
type MigrationFuture = Shared<BoxFuture<'static, MigrationOutcome>>;

/// What [`SessionManager::logout`] does besides clearing the current site.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogoutOptions {
    /// Mark the site logged out even if its config does not demand it.
    pub force_logout: bool,
    /// Delete the site after logging out.
    pub remove_account: bool,
}

/// Owner of the site registry and the current session.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Inner>,
}

struct Inner {
    app_db: SharedConnection,
    site_dbs: SiteDatabases,
    services: Arc<SiteServices>,
    current: Arc<CurrentSite>,
    sync: Arc<SyncCoordinator>,
    sites: Mutex<HashMap<SiteId, Arc<Site>>>,
    registry: RwLock<SchemaRegistry>,
    migrations: Mutex<HashMap<SiteId, MigrationFuture>>,
    session_restored: AtomicBool,
}

impl SessionManager {
    /// Open storage at `location`. `schemas` are installed on every site in
    /// addition to the core schemas.
    pub fn new(
        location: StorageLocation,
        remote: Arc<dyn RemoteService>,
        config: SessionConfig,
        schemas: impl IntoIterator<Item = SiteSchema>,
    ) -> Result<Self> {
        let app_db = campus_db::open_app(&location)?;
        let current = Arc::new(CurrentSite::new());
        let context: Arc<dyn SessionContext> = current.clone();
        let registry = SchemaRegistry::with_schemas(core_schemas().into_iter().chain(schemas));

        tracing::info!(location = ?location, schemas = registry.len(), "Session manager ready");
        Ok(Self {
            inner: Arc::new(Inner {
                app_db: Arc::new(tokio::sync::Mutex::new(app_db)),
                site_dbs: SiteDatabases::new(location),
                services: Arc::new(SiteServices {
                    remote,
                    events: EventBus::default(),
                    config,
                }),
                current,
                sync: Arc::new(SyncCoordinator::new(context)),
                sites: Mutex::new(HashMap::new()),
                registry: RwLock::new(registry),
                migrations: Mutex::new(HashMap::new()),
                session_restored: AtomicBool::new(false),
            }),
        })
    }

    pub fn events(&self) -> &EventBus {
        &self.inner.services.events
    }

    pub fn sync(&self) -> &Arc<SyncCoordinator> {
        &self.inner.sync
    }

    /// The current-site pointer, for components that only need its id.
    pub fn context(&self) -> Arc<CurrentSite> {
        Arc::clone(&self.inner.current)
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.services.config
    }

    pub fn location(&self) -> &StorageLocation {
        self.inner.site_dbs.location()
    }

    pub fn current_site(&self) -> Option<Arc<Site>> {
        self.inner.current.get()
    }

    pub fn current_site_id(&self) -> Option<SiteId> {
        self.inner.current.current_site_id()
    }

    pub fn required_current_site(&self) -> Result<Arc<Site>> {
        self.current_site().ok_or(SessionError::NoCurrentSite)
    }

    pub fn is_current_site(&self, site_id: &SiteId) -> bool {
        self.inner.current.is(site_id)
    }

    /// Whether a current site exists and holds a token.
    pub fn is_logged_in(&self) -> bool {
        self.current_site()
            .map(|site| !site.token().is_empty())
            .unwrap_or(false)
    }

    /// Number of site handles held in memory.
    pub fn loaded_sites(&self) -> usize {
        self.lock_sites().len()
    }

    // ------------------------------------------------------------------
    // Site handles
    // ------------------------------------------------------------------

    /// Handle of a stored site, or of the current site when `site_id` is `None`.
    pub async fn get_site(&self, site_id: Option<&SiteId>) -> Result<Arc<Site>> {
        let Some(site_id) = site_id else {
            return self.required_current_site();
        };
        if let Some(site) = self.current_site().filter(|site| site.id() == site_id) {
            return Ok(site);
        }
        if let Some(site) = self.cached_site(site_id) {
            return Ok(site);
        }
        Ok(self.load_handle(site_id).await?.0)
    }

    /// Build a handle from the stored record and install pending schemas.
    async fn load_handle(&self, site_id: &SiteId) -> Result<(Arc<Site>, MigrationReport)> {
        let row = {
            let conn = self.inner.app_db.lock().await;
            sites::get(&conn, site_id)
        }
        .map_err(|e| not_found_as(e, site_id))?;

        let site = self.make_site(row)?;
        let report = self.migrate_site_schemas(&site).await?;
        tracing::debug!(site_id = %site_id, "Loaded site handle");
        Ok((self.cache_site(site), report))
    }

    /// Handle of the first site stored with `site_url`.
    pub async fn get_site_by_url(&self, site_url: &str) -> Result<Arc<Site>> {
        let row = {
            let conn = self.inner.app_db.lock().await;
            sites::get_by_url(&conn, site_url)
        };
        match row {
            Ok(row) => self.get_site(Some(&row.id)).await,
            Err(DbError::NotFound(_)) => Err(SessionError::NotFound(SiteId::new(site_url))),
            Err(e) => Err(e.into()),
        }
    }

    fn make_site(&self, row: SiteRow) -> Result<Arc<Site>> {
        let db = self.inner.site_dbs.open(&row.id)?;
        Ok(Arc::new(Site::from_row(
            row,
            db,
            Arc::clone(&self.inner.services),
        )))
    }

    fn cached_site(&self, site_id: &SiteId) -> Option<Arc<Site>> {
        self.lock_sites().get(site_id).cloned()
    }

    /// Keep a handle, returning the one already kept if another load won.
    fn cache_site(&self, site: Arc<Site>) -> Arc<Site> {
        Arc::clone(self.lock_sites().entry(site.id().clone()).or_insert(site))
    }

    // ------------------------------------------------------------------
    // Site schemas
    // ------------------------------------------------------------------

    /// Install every pending registered schema on a site.
    ///
    /// Concurrent calls for the same site share one pass and its outcome.
    /// Once the pass finishes the next call starts a new one, which finds
    /// nothing to do unless a schema was registered meanwhile.
    pub async fn migrate_site_schemas(&self, site: &Site) -> Result<MigrationReport> {
        let site_id = site.id().clone();
        let pass = {
            let mut migrations = self.lock_migrations();
            match migrations.get(&site_id) {
                Some(pass) => pass.clone(),
                None => {
                    let pass = self.start_migration(site);
                    migrations.insert(site_id.clone(), pass.clone());
                    pass
                }
            }
        };

        let outcome = pass.await;

        {
            let mut migrations = self.lock_migrations();
            if migrations
                .get(&site_id)
                .map(|pass| pass.peek().is_some())
                .unwrap_or(false)
            {
                migrations.remove(&site_id);
            }
        }

        outcome.map_err(|e| migration_error(&e))
    }

    fn start_migration(&self, site: &Site) -> MigrationFuture {
        let schemas: Vec<SiteSchema> = self.read_registry().iter().cloned().collect();
        let db = Arc::clone(site.db());
        let site_id = site.id().clone();

        async move {
            let conn = db.lock().await;
            apply_site_schemas(&conn, &site_id, schemas.iter()).map_err(Arc::new)
        }
        .boxed()
        .shared()
    }

    /// Add or replace a site schema.
    ///
    /// It is installed right away on the current site and, unless scoped
    /// to one site, on every other stored site. Sites loaded later get it
    /// through [`SessionManager::migrate_site_schemas`].
    pub async fn register_site_schema(&self, schema: SiteSchema) -> Result<Vec<MigrationReport>> {
        let replaced = self.write_registry().register(schema.clone());
        tracing::info!(
            schema = %schema.name,
            version = schema.version,
            replaced = replaced.is_some(),
            "Registered site schema"
        );

        let mut reports = Vec::new();
        let Some(current) = self.current_site() else {
            return Ok(reports);
        };
        reports.push(self.apply_schema(&current, &schema).await?);

        if schema.scope == SchemaScope::AllSites {
            for site_id in self.get_sites_ids().await? {
                if &site_id == current.id() {
                    continue;
                }
                let report = match self.cached_site(&site_id) {
                    Some(site) => self.apply_schema(&site, &schema).await?,
                    None => {
                        // Loading installs every pending schema, this one included,
                        // unless the load was already running with the old registry.
                        let (site, mut report) = self.load_handle(&site_id).await?;
                        report.applied.retain(|applied| applied.name == schema.name);
                        if report.applied.is_empty() {
                            report = self.apply_schema(&site, &schema).await?;
                        }
                        report
                    }
                };
                reports.push(report);
            }
        }
        Ok(reports)
    }

    async fn apply_schema(&self, site: &Site, schema: &SiteSchema) -> Result<MigrationReport> {
        let conn = site.db().lock().await;
        apply_site_schemas(&conn, site.id(), [schema]).map_err(|e| migration_error(&e))
    }

    // ------------------------------------------------------------------
    // Adding and authenticating sites
    // ------------------------------------------------------------------

    /// Store a site record and return its id.
    pub async fn add_site(
        &self,
        site_url: &str,
        token: &str,
        info: SiteInfo,
        private_token: &str,
        config: Option<SiteConfig>,
        oauth_id: Option<i64>,
    ) -> Result<SiteId> {
        let id_url = if info.siteurl.is_empty() {
            site_url
        } else {
            info.siteurl.as_str()
        };
        let site_id = create_site_id(id_url, &info.username);
        let row = SiteRow {
            id: site_id.clone(),
            site_url: site_url.to_string(),
            token: token.to_string(),
            private_token: private_token.to_string(),
            info: Some(info),
            config,
            logged_out: false,
            oauth_id,
        };

        {
            let conn = self.inner.app_db.lock().await;
            sites::insert(&conn, &row)?;
        }

        // A kept handle must follow the new record.
        if let Some(site) = self.cached_site(&site_id) {
            site.set_logged_out(false);
            site.set_token(&row.token, &row.private_token);
            if let Some(info) = row.info {
                site.set_info(info);
            }
            if let Some(config) = row.config {
                site.set_config(config);
            }
            site.set_oauth_id(row.oauth_id);
        }

        tracing::info!(site_id = %site_id, site_url, "Site added");
        Ok(site_id)
    }

    /// Authenticate a token against a site and store the account.
    ///
    /// Fetches and validates the site info, reuses the stored record of
    /// the same account if there is one, fetches the site config (required
    /// for new accounts) and optionally makes the site current.
    pub async fn new_site(
        &self,
        site_url: &str,
        token: &str,
        private_token: &str,
        login: bool,
        oauth_id: Option<i64>,
    ) -> Result<SiteId> {
        let site_url = urls::normalize_site_url(site_url)?;
        let data = self
            .inner
            .services
            .remote
            .call(&site_url, token, SITE_INFO_WS, &json!({}))
            .await?;
        let info: SiteInfo = serde_json::from_value(data)?;
        check_version(&info)?;

        let site_id = create_site_id(&info.siteurl, &info.username);
        let existing = match self.get_site(Some(&site_id)).await {
            Ok(site) => Some(site),
            Err(e) if e.is_not_found() => None,
            Err(e) => return Err(e),
        };
        let is_new = existing.is_none();

        let site = match existing {
            Some(site) => {
                site.set_logged_out(false);
                site.set_token(token, private_token);
                site.set_info(info.clone());
                site.set_oauth_id(oauth_id);
                site
            }
            None => {
                let site = self.make_site(SiteRow {
                    id: site_id.clone(),
                    site_url: site_url.clone(),
                    token: token.to_string(),
                    private_token: private_token.to_string(),
                    info: Some(info.clone()),
                    config: None,
                    logged_out: false,
                    oauth_id,
                })?;
                self.migrate_site_schemas(&site).await?;
                site
            }
        };

        match site.fetch_config(false).await {
            Ok(config) => site.set_config(config),
            Err(e) if is_new => return Err(e),
            Err(e) => {
                tracing::warn!(site_id = %site_id, error = %e, "Could not refresh site config")
            }
        }

        {
            let conn = self.inner.app_db.lock().await;
            sites::insert(&conn, &site.to_row())?;
        }
        let site = self.cache_site(site);

        if login {
            self.inner.current.set(Arc::clone(&site));
            self.login(&site_id).await?;
        } else if self.is_current_site(&site_id) {
            self.events()
                .trigger(Event::SiteUpdated(info.clone()), Some(&site_id));
        }

        tracing::info!(site_id = %site_id, site_url = %site_url, new = is_new, "Site authenticated");
        self.events().trigger(Event::SiteAdded(info), Some(&site_id));
        Ok(site_id)
    }

    /// Replace the credentials of the account `username` at `site_url` and log in.
    pub async fn update_site_token(
        &self,
        site_url: &str,
        username: &str,
        token: &str,
        private_token: &str,
    ) -> Result<SiteId> {
        let site_id = create_site_id(site_url, username);
        self.update_site_token_by_site_id(&site_id, token, private_token)
            .await?;
        self.login(&site_id).await?;
        Ok(site_id)
    }

    /// Replace the credentials of a site. Clears its logged-out flag.
    pub async fn update_site_token_by_site_id(
        &self,
        site_id: &SiteId,
        token: &str,
        private_token: &str,
    ) -> Result<()> {
        let site = self.get_site(Some(site_id)).await?;
        site.set_logged_out(false);
        site.set_token(token, private_token);

        let conn = self.inner.app_db.lock().await;
        sites::update_token(&conn, site_id, token, private_token)?;
        tracing::info!(site_id = %site_id, "Site token updated");
        Ok(())
    }

    /// Refresh the stored info and config of a site.
    ///
    /// A site whose version is no longer supported is marked logged out.
    /// When the config cannot be fetched the stored one is kept.
    pub async fn update_site_info(&self, site_id: Option<&SiteId>) -> Result<()> {
        let site = self.get_site(site_id).await?;
        let info = site.fetch_site_info().await?;
        site.set_info(info.clone());

        if let Err(e) = check_version(&info) {
            tracing::warn!(site_id = %site.id(), error = %e, "Site version no longer supported");
            self.mark_logged_out(&site).await?;
            return Err(e);
        }

        let config = match site.fetch_config(true).await {
            Ok(config) => {
                site.set_config(config.clone());
                Some(config)
            }
            Err(e) => {
                tracing::debug!(site_id = %site.id(), error = %e, "Keeping stored site config");
                None
            }
        };

        {
            let conn = self.inner.app_db.lock().await;
            sites::update_info(&conn, site.id(), &info, config.as_ref())?;
        }
        self.events()
            .trigger(Event::SiteUpdated(info), Some(site.id()));
        Ok(())
    }

    pub async fn update_site_info_by_url(&self, site_url: &str, username: &str) -> Result<()> {
        let site_id = create_site_id(site_url, username);
        self.update_site_info(Some(&site_id)).await
    }

    // ------------------------------------------------------------------
    // Session lifecycle
    // ------------------------------------------------------------------

    /// Make a stored site current.
    ///
    /// Returns false without changing the current site when the site is
    /// logged out or its server switched to the extended service plugin
    /// since the last login; both emit [`Event::SessionExpired`].
    pub async fn load_site(&self, site_id: &SiteId, redirect: Option<RedirectPayload>) -> Result<bool> {
        let site = self.get_site(Some(site_id)).await?;

        if site.is_logged_out() {
            tracing::info!(site_id = %site_id, "Refusing to load logged out site");
            self.events()
                .trigger(Event::SessionExpired(redirect.unwrap_or_default()), Some(site_id));
            return Ok(false);
        }

        match site.check_extended_service_installed_and_not_used().await {
            Ok(true) => {
                tracing::info!(site_id = %site_id, "Authentication plugin changed, login required");
                self.events()
                    .trigger(Event::SessionExpired(redirect.unwrap_or_default()), Some(site_id));
                return Ok(false);
            }
            Ok(false) => {}
            Err(e) => {
                tracing::debug!(site_id = %site_id, error = %e, "Extended service check failed")
            }
        }

        self.login(site_id).await?;
        if self.config().refresh_info_on_load {
            self.spawn_refresh(site_id.clone());
        }
        tracing::info!(site_id = %site_id, "Site loaded");
        Ok(true)
    }

    fn spawn_refresh(&self, site_id: SiteId) {
        let manager = self.clone();
        tokio::spawn(async move {
            match manager.get_site(Some(&site_id)).await {
                Ok(site) => match site.public_config().await {
                    Ok(public_config) => {
                        if let Err(e) = manager.check_required_minimum_version(&public_config).await {
                            tracing::warn!(site_id = %site_id, error = %e, "App does not meet site requirements");
                        }
                    }
                    Err(e) => {
                        tracing::debug!(site_id = %site_id, error = %e, "Could not fetch public config")
                    }
                },
                Err(e) => {
                    tracing::warn!(site_id = %site_id, error = %e, "Site vanished before refresh");
                    return;
                }
            }

            if let Err(e) = manager.update_site_info(Some(&site_id)).await {
                tracing::warn!(site_id = %site_id, error = %e, "Background site info refresh failed");
            }
        });
    }

    /// Make a site current and persist the pointer.
    pub async fn login(&self, site_id: &SiteId) -> Result<()> {
        let site = self.get_site(Some(site_id)).await?;
        self.inner.current.set(site);
        {
            let conn = self.inner.app_db.lock().await;
            current_site::set(&conn, site_id)?;
        }
        self.events().trigger(Event::Login, Some(site_id));
        Ok(())
    }

    /// End the current session.
    ///
    /// Releases the sync blocks of the site and clears the stored pointer.
    /// The site is marked logged out when forced by `options` or by its
    /// config. Without a current site this does nothing.
    pub async fn logout(&self, options: LogoutOptions) -> Result<()> {
        let Some(site) = self.inner.current.take() else {
            tracing::debug!("Logout without a current site");
            return Ok(());
        };
        let site_id = site.id().clone();

        let forced = options.force_logout
            || site
                .config()
                .map(|config| config.forces_logout())
                .unwrap_or(false);
        if forced {
            if let Err(e) = self.mark_logged_out(&site).await {
                tracing::warn!(site_id = %site_id, error = %e, "Failed to mark site logged out");
            }
        }

        {
            let conn = self.inner.app_db.lock().await;
            if let Err(e) = current_site::clear(&conn) {
                tracing::warn!(site_id = %site_id, error = %e, "Failed to clear current site");
            }
        }
        self.inner.sync.clear_all_blocks(Some(&site_id));

        if options.remove_account {
            self.remove_site(&site_id).await?;
        }

        tracing::info!(site_id = %site_id, forced, "Logged out");
        self.events().trigger(Event::Logout, Some(&site_id));
        Ok(())
    }

    /// Mark a site logged out and drop its credentials.
    pub async fn set_site_logged_out(&self, site_id: &SiteId) -> Result<()> {
        let site = self.get_site(Some(site_id)).await?;
        self.mark_logged_out(&site).await
    }

    async fn mark_logged_out(&self, site: &Site) -> Result<()> {
        site.set_logged_out(true);
        let conn = self.inner.app_db.lock().await;
        sites::set_logged_out(&conn, site.id(), true)?;
        tracing::info!(site_id = %site.id(), "Site marked logged out");
        Ok(())
    }

    /// Delete a site with its database and files.
    pub async fn delete_site(&self, site_id: &SiteId) -> Result<()> {
        if self.is_current_site(site_id) {
            self.logout(LogoutOptions::default()).await?;
        }
        self.remove_site(site_id).await
    }

    /// The database goes first so a crash never leaves a record without storage.
    async fn remove_site(&self, site_id: &SiteId) -> Result<()> {
        let site_url = match self.cached_site(site_id) {
            Some(site) => site.url().to_string(),
            None => {
                let conn = self.inner.app_db.lock().await;
                sites::get(&conn, site_id)
                    .map_err(|e| not_found_as(e, site_id))?
                    .site_url
            }
        };

        self.inner.site_dbs.delete(site_id)?;
        self.lock_sites().remove(site_id);
        self.lock_migrations().remove(site_id);

        {
            let conn = self.inner.app_db.lock().await;
            if let Err(e) = sites::delete(&conn, site_id) {
                tracing::warn!(site_id = %site_id, error = %e, "Failed to remove site record");
            }
        }

        self.inner.site_dbs.delete_folder(site_id)?;
        self.inner.sync.clear_all_blocks(Some(site_id));

        tracing::info!(site_id = %site_id, site_url = %site_url, "Site deleted");
        self.events()
            .trigger(Event::SiteDeleted { site_url }, Some(site_id));
        Ok(())
    }

    /// Load the site that was current when the process last ran.
    ///
    /// Only the first call does anything. Failures are logged. Returns the
    /// id of the restored site.
    pub async fn restore_session(&self) -> Option<SiteId> {
        if self.inner.session_restored.swap(true, Ordering::SeqCst) {
            tracing::debug!("Session already restored");
            return None;
        }

        let stored = {
            let conn = self.inner.app_db.lock().await;
            current_site::get(&conn)
        };
        let stored = stored.unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Could not read stored current site");
            None
        });

        if let Some(site_id) = &stored {
            match self.load_site(site_id, None).await {
                Ok(true) => tracing::info!(site_id = %site_id, "Session restored"),
                Ok(false) => tracing::info!(site_id = %site_id, "Stored session needs login"),
                Err(e) => tracing::warn!(site_id = %site_id, error = %e, "Could not restore session"),
            }
        }

        let restored = self.current_site_id();
        self.events().trigger_unique(
            Event::SessionRestored {
                site_id: restored.clone(),
            },
            None,
        );
        restored
    }

    /// Compare the minimum app version a site requires with this app.
    ///
    /// When the app is too old the current site is logged out and marked
    /// logged out. Unparsable versions are ignored.
    pub async fn check_required_minimum_version(
        &self,
        public_config: &SitePublicConfig,
    ) -> Result<()> {
        let Some(required) = public_config
            .tool_mobile_minimumversion
            .as_deref()
            .filter(|v| !v.trim().is_empty())
        else {
            return Ok(());
        };

        let app_version = &self.config().app_version;
        let (Some(required_number), Some(app_number)) =
            (convert_version_name(required), convert_version_name(app_version))
        else {
            tracing::warn!(required, app_version = %app_version, "Cannot compare app versions");
            return Ok(());
        };
        if required_number <= app_number {
            return Ok(());
        }

        tracing::warn!(required, app_version = %app_version, "App update required by site");
        if let Some(site) = self.current_site() {
            if let Err(e) = self.logout(LogoutOptions::default()).await {
                tracing::warn!(error = %e, "Logout after version check failed");
            }
            if let Err(e) = self.mark_logged_out(&site).await {
                tracing::warn!(error = %e, "Failed to mark site logged out");
            }
        }
        Err(SessionError::AppUpdateRequired {
            required: required.to_string(),
        })
    }

    // ------------------------------------------------------------------
    // Registry queries
    // ------------------------------------------------------------------

    pub async fn has_sites(&self) -> Result<bool> {
        let conn = self.inner.app_db.lock().await;
        Ok(sites::has_any(&conn)?)
    }

    /// Summaries of the stored sites, optionally restricted to `ids`.
    pub async fn get_sites(&self, ids: Option<&[SiteId]>) -> Result<Vec<SiteBasicInfo>> {
        let rows = {
            let conn = self.inner.app_db.lock().await;
            sites::list(&conn)?
        };
        Ok(rows
            .into_iter()
            .filter(|row| ids.map(|ids| ids.contains(&row.id)).unwrap_or(true))
            .map(basic_info)
            .collect())
    }

    /// [`SessionManager::get_sites`] ordered by site name, URL, then user name.
    pub async fn get_sorted_sites(&self, ids: Option<&[SiteId]>) -> Result<Vec<SiteBasicInfo>> {
        let mut sites = self.get_sites(ids).await?;
        sites.sort_by_cached_key(sort_key);
        Ok(sites)
    }

    pub async fn get_sites_ids(&self) -> Result<Vec<SiteId>> {
        let conn = self.inner.app_db.lock().await;
        Ok(sites::list_ids(&conn)?)
    }

    pub async fn get_logged_in_sites_ids(&self) -> Result<Vec<SiteId>> {
        let conn = self.inner.app_db.lock().await;
        Ok(sites::list_logged_in_ids(&conn)?)
    }

    /// Id of the site stored as current, whether or not it is loaded.
    pub async fn get_stored_current_site_id(&self) -> Result<Option<SiteId>> {
        let conn = self.inner.app_db.lock().await;
        Ok(current_site::get(&conn)?)
    }

    /// Sites a URL belongs to.
    ///
    /// Relative URLs belong to the current site, other non-http URLs to
    /// none. With `prioritize`, a matching current site is the only answer.
    pub async fn get_site_ids_from_url(
        &self,
        url: &str,
        prioritize: bool,
        username: Option<&str>,
    ) -> Result<Vec<SiteId>> {
        if !urls::is_http_url(url) {
            if urls::is_absolute_url(url) {
                return Ok(Vec::new());
            }
            return Ok(self.current_site_id().into_iter().collect());
        }

        let user_matches = |info: Option<&SiteInfo>| match username {
            Some(username) => info.map(|i| i.username == username).unwrap_or(false),
            None => true,
        };

        if prioritize {
            if let Some(current) = self.current_site() {
                if current.contains_url(url) && user_matches(current.info().as_ref()) {
                    return Ok(vec![current.id().clone()]);
                }
            }
        }

        let rows = {
            let conn = self.inner.app_db.lock().await;
            sites::list(&conn)?
        };
        Ok(rows
            .into_iter()
            .filter(|row| urls::site_contains_url(&row.site_url, url) && user_matches(row.info.as_ref()))
            .map(|row| row.id)
            .collect())
    }

    /// Whether the administrator of a site disabled `name`.
    pub async fn is_feature_disabled(&self, name: &str, site_id: Option<&SiteId>) -> Result<bool> {
        Ok(self.get_site(site_id).await?.is_feature_disabled(name))
    }

    fn lock_sites(&self) -> MutexGuard<'_, HashMap<SiteId, Arc<Site>>> {
        self.inner.sites.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_migrations(&self) -> MutexGuard<'_, HashMap<SiteId, MigrationFuture>> {
        self.inner.migrations.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn read_registry(&self) -> std::sync::RwLockReadGuard<'_, SchemaRegistry> {
        self.inner.registry.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_registry(&self) -> std::sync::RwLockWriteGuard<'_, SchemaRegistry> {
        self.inner.registry.write().unwrap_or_else(|e| e.into_inner())
    }
}

fn check_version(info: &SiteInfo) -> Result<()> {
    match check_site_version(info) {
        VersionCheck::Valid => Ok(()),
        VersionCheck::LegacyApp => Err(SessionError::LegacySiteVersion),
        VersionCheck::Invalid => Err(SessionError::InvalidSiteVersion),
    }
}

fn not_found_as(err: DbError, site_id: &SiteId) -> SessionError {
    match err {
        DbError::NotFound(_) => SessionError::NotFound(site_id.clone()),
        other => other.into(),
    }
}

fn migration_error(err: &DbError) -> SessionError {
    match err {
        DbError::SchemaMigrationFailed { schema, reason } => SessionError::SchemaMigrationFailed {
            schema: schema.clone(),
            reason: reason.clone(),
        },
        DbError::StorageUnavailable(reason) => {
            SessionError::Db(DbError::StorageUnavailable(reason.clone()))
        }
        other => SessionError::SchemaMigrationFailed {
            schema: "schema_versions".to_string(),
            reason: other.to_string(),
        },
    }
}

fn basic_info(row: SiteRow) -> SiteBasicInfo {
    let info = row.info.as_ref();
    SiteBasicInfo {
        fullname: info.map(|i| i.fullname.clone()),
        sitename: info.map(|i| i.sitename.clone()),
        avatar: info.map(|i| i.userpictureurl.clone()),
        site_home_id: info.map(SiteInfo::site_home_id).unwrap_or(1),
        logged_out: row.logged_out,
        id: row.id,
        site_url: row.site_url,
    }
}

fn sort_key(site: &SiteBasicInfo) -> (String, String, String) {
    (
        site.sitename
            .as_deref()
            .unwrap_or_default()
            .trim()
            .to_lowercase(),
        urls::remove_protocol(&site.site_url).to_lowercase(),
        site.fullname
            .as_deref()
            .unwrap_or_default()
            .trim()
            .to_lowercase(),
    )
}
