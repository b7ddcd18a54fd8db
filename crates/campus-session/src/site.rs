//! Handle of one stored account.
//!
//! A [`Site`] owns the credentials and metadata of an account and the
//! connection to its database. Reads go through the web service cache
//! according to a [`ReadingStrategy`]; writes always hit the network.

use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use campus_cache::{cache_id, resolve, store, CacheLookup, Resolved, Source, WriteOptions};
use campus_db::queries::sites::SiteRow;
use campus_db::SharedConnection;
use campus_types::{
    now_millis, Event, ReadingStrategy, RedirectPayload, SiteBasicInfo, SiteConfig, SiteId,
    SiteInfo, SitePublicConfig, UpdateFrequency, EXTENDED_SERVICE_WS_PREFIX,
};
use serde_json::{json, Value};

use crate::events::EventBus;
use crate::remote::RemoteService;
use crate::{urls, Result, SessionConfig, SessionError};

/// Web service returning the account and site metadata.
pub const SITE_INFO_WS: &str = "core_webservice_get_site_info";

/// Web service returning the administrator settings for the app.
pub const SITE_CONFIG_WS: &str = "tool_mobile_get_config";

/// Collaborators shared by every site of a manager.
pub(crate) struct SiteServices {
    pub remote: Arc<dyn RemoteService>,
    pub events: EventBus,
    pub config: SessionConfig,
}

#[derive(Clone, Debug, Default)]
struct SiteState {
    token: String,
    private_token: String,
    info: Option<SiteInfo>,
    config: Option<SiteConfig>,
    logged_out: bool,
    oauth_id: Option<i64>,
}

/// How a cached read is performed and stored.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ReadOptions {
    pub strategy: ReadingStrategy,
    /// Key shared by related entries, used for invalidation.
    pub cache_key: Option<String>,
    /// Look the entry up by `cache_key` instead of the call hash.
    pub get_cache_using_cache_key: bool,
    pub unique_cache_key: bool,
    pub component: Option<String>,
    pub component_id: Option<i64>,
    pub update_frequency: UpdateFrequency,
}

impl ReadOptions {
    pub fn new(strategy: ReadingStrategy) -> Self {
        Self {
            strategy,
            ..Self::default()
        }
    }

    pub fn cache_key(mut self, key: impl Into<String>) -> Self {
        self.cache_key = Some(key.into());
        self
    }

    pub fn component(mut self, component: impl Into<String>, component_id: Option<i64>) -> Self {
        self.component = Some(component.into());
        self.component_id = component_id;
        self
    }

    pub fn update_frequency(mut self, frequency: UpdateFrequency) -> Self {
        self.update_frequency = frequency;
        self
    }

    fn write_options(&self) -> WriteOptions {
        WriteOptions {
            cache_key: self.cache_key.clone(),
            component: self.component.clone(),
            component_id: self.component_id,
            update_frequency: self.update_frequency,
            unique_cache_key: self.unique_cache_key,
        }
    }
}

/// An account at an LMS site.
pub struct Site {
    id: SiteId,
    site_url: String,
    db: SharedConnection,
    services: Arc<SiteServices>,
    state: RwLock<SiteState>,
}

impl Site {
    pub(crate) fn from_row(row: SiteRow, db: SharedConnection, services: Arc<SiteServices>) -> Self {
        Self {
            id: row.id,
            site_url: row.site_url,
            db,
            services,
            state: RwLock::new(SiteState {
                token: row.token,
                private_token: row.private_token,
                info: row.info,
                config: row.config,
                logged_out: row.logged_out,
                oauth_id: row.oauth_id,
            }),
        }
    }

    /// Registry record mirroring the in-memory state.
    pub(crate) fn to_row(&self) -> SiteRow {
        let state = self.read_state();
        SiteRow {
            id: self.id.clone(),
            site_url: self.site_url.clone(),
            token: state.token.clone(),
            private_token: state.private_token.clone(),
            info: state.info.clone(),
            config: state.config.clone(),
            logged_out: state.logged_out,
            oauth_id: state.oauth_id,
        }
    }

    pub fn id(&self) -> &SiteId {
        &self.id
    }

    pub fn url(&self) -> &str {
        &self.site_url
    }

    pub fn token(&self) -> String {
        self.read_state().token.clone()
    }

    pub fn private_token(&self) -> String {
        self.read_state().private_token.clone()
    }

    pub fn info(&self) -> Option<SiteInfo> {
        self.read_state().info.clone()
    }

    pub fn config(&self) -> Option<SiteConfig> {
        self.read_state().config.clone()
    }

    pub fn oauth_id(&self) -> Option<i64> {
        self.read_state().oauth_id
    }

    pub fn is_logged_out(&self) -> bool {
        self.read_state().logged_out
    }

    /// Database holding the tables of this site.
    pub fn db(&self) -> &SharedConnection {
        &self.db
    }

    pub fn user_id(&self) -> Option<i64> {
        self.read_state().info.as_ref().map(|info| info.userid)
    }

    pub fn site_home_id(&self) -> i64 {
        self.read_state()
            .info
            .as_ref()
            .map(SiteInfo::site_home_id)
            .unwrap_or(1)
    }

    pub fn site_name(&self) -> Option<String> {
        self.read_state().info.as_ref().map(|info| info.sitename.clone())
    }

    pub fn basic_info(&self) -> SiteBasicInfo {
        let state = self.read_state();
        let info = state.info.as_ref();
        SiteBasicInfo {
            id: self.id.clone(),
            site_url: self.site_url.clone(),
            fullname: info.map(|i| i.fullname.clone()),
            sitename: info.map(|i| i.sitename.clone()),
            avatar: info.map(|i| i.userpictureurl.clone()),
            site_home_id: info.map(SiteInfo::site_home_id).unwrap_or(1),
            logged_out: state.logged_out,
        }
    }

    pub(crate) fn set_token(&self, token: &str, private_token: &str) {
        let mut state = self.write_state();
        state.token = token.to_string();
        state.private_token = private_token.to_string();
    }

    pub(crate) fn set_info(&self, info: SiteInfo) {
        self.write_state().info = Some(info);
    }

    pub(crate) fn set_config(&self, config: SiteConfig) {
        self.write_state().config = Some(config);
    }

    pub(crate) fn set_oauth_id(&self, oauth_id: Option<i64>) {
        self.write_state().oauth_id = oauth_id;
    }

    /// Flag the session as dead. Logging out drops the credentials.
    pub(crate) fn set_logged_out(&self, logged_out: bool) {
        let mut state = self.write_state();
        state.logged_out = logged_out;
        if logged_out {
            state.token.clear();
            state.private_token.clear();
        }
    }

    /// Whether `url` points inside this site.
    pub fn contains_url(&self, url: &str) -> bool {
        urls::site_contains_url(&self.site_url, url)
    }

    /// Whether the site release satisfies `releases`, see
    /// [`campus_types::version::is_version_greater_equal_than`].
    pub fn is_version_greater_equal_than(&self, releases: &[&str]) -> bool {
        let version = self
            .read_state()
            .info
            .as_ref()
            .and_then(|info| info.version.as_deref())
            .and_then(|v| v.split('.').next())
            .and_then(|v| v.trim().parse::<u64>().ok());
        match version {
            Some(version) => campus_types::version::is_version_greater_equal_than(version, releases),
            None => false,
        }
    }

    /// Whether the administrator disabled `name` for the app.
    pub fn is_feature_disabled(&self, name: &str) -> bool {
        self.read_state()
            .config
            .as_ref()
            .map(|config| {
                config
                    .disabled_features()
                    .split(',')
                    .any(|feature| feature.trim() == name)
            })
            .unwrap_or(false)
    }

    /// Whether the stored info lists functions of the extended service plugin.
    pub fn uses_extended_service(&self) -> bool {
        self.read_state()
            .info
            .as_ref()
            .map(|info| info.uses_functions_with_prefix(EXTENDED_SERVICE_WS_PREFIX))
            .unwrap_or(false)
    }

    /// Name under which `method` can be called on this site.
    ///
    /// Falls back to the extended service variant when only that one is
    /// available. Without stored info every method is assumed available.
    pub fn ws_name(&self, method: &str) -> Result<String> {
        let state = self.read_state();
        let Some(info) = state.info.as_ref() else {
            return Ok(method.to_string());
        };
        if info.has_function(method) {
            return Ok(method.to_string());
        }
        let extended = format!("{EXTENDED_SERVICE_WS_PREFIX}{method}");
        if info.has_function(&extended) {
            return Ok(extended);
        }
        Err(SessionError::FunctionNotAvailable(method.to_string()))
    }

    pub fn ws_available(&self, method: &str) -> bool {
        self.ws_name(method).is_ok()
    }

    /// Cached read of a web service.
    pub async fn read(&self, method: &str, params: &Value, options: &ReadOptions) -> Result<Value> {
        Ok(self.read_resolved(method, params, options).await?.data)
    }

    /// Like [`Site::read`], also reporting where the data came from.
    pub async fn read_resolved(
        &self,
        method: &str,
        params: &Value,
        options: &ReadOptions,
    ) -> Result<Resolved> {
        let method = self.ws_name(method)?;
        let id = cache_id(&method, params);
        let strategy = options.strategy;

        let lookup = if strategy.reads_cache() {
            self.lookup(&id, options).await
        } else {
            CacheLookup::Absent
        };

        let resolved = resolve(strategy, lookup, || self.request(&method, params)).await?;

        if resolved.source == Source::Network && strategy.saves_to_cache() {
            let conn = self.db.lock().await;
            let stored = store::write(
                &conn,
                &self.services.config.cache,
                &id,
                &resolved.data,
                &options.write_options(),
                now_millis(),
            );
            if let Err(e) = stored {
                tracing::warn!(site_id = %self.id, method = %method, error = %e, "Failed to cache response");
            }
        }
        Ok(resolved)
    }

    /// Uncached call that changes data on the server.
    pub async fn write(&self, method: &str, params: &Value) -> Result<Value> {
        let method = self.ws_name(method)?;
        self.request(&method, params).await
    }

    async fn lookup(&self, id: &str, options: &ReadOptions) -> CacheLookup {
        let conn = self.db.lock().await;
        let now = now_millis();
        let lookup = match (&options.cache_key, options.get_cache_using_cache_key) {
            (Some(key), true) => store::read_by_key(&conn, key, id, now),
            _ => store::read(&conn, id, now),
        };
        lookup.unwrap_or_else(|e| {
            tracing::warn!(site_id = %self.id, error = %e, "Cache lookup failed");
            CacheLookup::Absent
        })
    }

    async fn request(&self, method: &str, params: &Value) -> Result<Value> {
        if self.is_logged_out() {
            return Err(SessionError::SessionExpired(self.id.clone()));
        }

        let token = self.token();
        match self
            .services
            .remote
            .call(&self.site_url, &token, method, params)
            .await
        {
            Ok(data) => Ok(data),
            Err(e) if e.is_invalid_token() => {
                self.expire_session();
                Err(SessionError::SessionExpired(self.id.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Mark the session dead in memory and tell the global handler.
    fn expire_session(&self) {
        tracing::info!(site_id = %self.id, "Token rejected, session expired");
        self.set_logged_out(true);
        self.services
            .events
            .trigger(Event::SessionExpired(RedirectPayload::default()), Some(&self.id));
    }

    /// Fetch fresh account and site metadata.
    pub async fn fetch_site_info(&self) -> Result<SiteInfo> {
        let data = self.request(SITE_INFO_WS, &json!({})).await?;
        Ok(serde_json::from_value(data)?)
    }

    /// Fetch the app settings of the site, optionally bypassing the cache.
    pub async fn fetch_config(&self, ignore_cache: bool) -> Result<SiteConfig> {
        if !self.ws_available(SITE_CONFIG_WS) {
            return Ok(SiteConfig::default());
        }
        let strategy = if ignore_cache {
            ReadingStrategy::OnlyNetwork
        } else {
            ReadingStrategy::Default
        };
        let options = ReadOptions::new(strategy)
            .cache_key(SITE_CONFIG_WS)
            .update_frequency(UpdateFrequency::Rarely);
        let data = self.read(SITE_CONFIG_WS, &json!({}), &options).await?;
        Ok(parse_config(&data))
    }

    pub async fn public_config(&self) -> Result<SitePublicConfig> {
        Ok(self.services.remote.public_config(&self.site_url).await?)
    }

    /// Whether the extended service plugin is installed on the server while
    /// this account does not use it, which means the login must be redone.
    pub async fn check_extended_service_installed_and_not_used(&self) -> Result<bool> {
        let Some(service) = self.services.config.extended_service.as_deref() else {
            return Ok(false);
        };
        if self.uses_extended_service() {
            return Ok(false);
        }
        Ok(self
            .services
            .remote
            .check_extended_service(&self.site_url, service)
            .await?)
    }

    /// Mark every cached response of the site as stale.
    pub async fn invalidate_ws_cache(&self) -> Result<usize> {
        let result = {
            let conn = self.db.lock().await;
            store::invalidate_all(&conn)
        };
        self.services
            .events
            .trigger(Event::WsCacheInvalidated, Some(&self.id));
        Ok(result?)
    }

    pub async fn invalidate_ws_cache_for_key(&self, key: &str) -> Result<usize> {
        let conn = self.db.lock().await;
        Ok(store::invalidate_key(&conn, key)?)
    }

    pub async fn invalidate_ws_cache_for_key_prefix(&self, prefix: &str) -> Result<usize> {
        let conn = self.db.lock().await;
        Ok(store::invalidate_key_prefix(&conn, prefix)?)
    }

    pub async fn invalidate_multiple_ws_cache_for_key(&self, keys: &[&str]) -> Result<usize> {
        let conn = self.db.lock().await;
        let mut changed = 0;
        for key in keys {
            changed += store::invalidate_key(&conn, key)?;
        }
        Ok(changed)
    }

    pub async fn invalidate_component_cache(
        &self,
        component: &str,
        component_id: Option<i64>,
    ) -> Result<usize> {
        let conn = self.db.lock().await;
        Ok(store::invalidate_component(&conn, component, component_id)?)
    }

    pub async fn delete_component_from_cache(
        &self,
        component: &str,
        component_id: Option<i64>,
    ) -> Result<usize> {
        let conn = self.db.lock().await;
        Ok(store::delete_component(&conn, component, component_id)?)
    }

    /// Bytes of cached responses held for a component.
    pub async fn component_cache_size(&self, component: &str, component_id: Option<i64>) -> Result<u64> {
        let conn = self.db.lock().await;
        Ok(store::component_size(&conn, component, component_id)?)
    }

    fn read_state(&self) -> RwLockReadGuard<'_, SiteState> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, SiteState> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }
}

/// Turn `{"settings": [{"name", "value"}]}` into a [`SiteConfig`].
fn parse_config(data: &Value) -> SiteConfig {
    let mut config = SiteConfig::default();
    let settings = data
        .get("settings")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();
    for setting in settings {
        let Some(name) = setting.get("name").and_then(Value::as_str) else {
            continue;
        };
        let value = match setting.get("value") {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Null) | None => String::new(),
            Some(other) => other.to_string(),
        };
        config.set(name, value);
    }
    config
}
