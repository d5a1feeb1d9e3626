//! Single-source client: initial load, background refresh, lookup, close.
//!
//! Lifecycle:
//! ```text
//! connect ─► Loading ─┬─► Ready ◄──► Refreshing (timer tick / refresh())
//!                     └─► Err   (timer cancelled before returning)
//! Ready ─► close() ─► Closed   (lookups keep working on the last tree)
//! ```

use std::sync::Arc;
use std::time::Duration;

use prost_reflect::{DescriptorPool, DynamicMessage, MessageDescriptor};
use serde::Serialize;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{validate_source_url, ClientOptions};
use crate::error::StencilError;
use crate::refresh::RefreshStrategy;
use crate::store::DescriptorStore;
use crate::transport::Fetcher;
use crate::tree::TypeTree;

/// Notified whenever a refresh after the initial load installs a new tree.
pub trait SchemaUpdateListener: Send + Sync + 'static {
    fn on_schema_update(&self, source: &str, tree: &TypeTree);
}

impl<F> SchemaUpdateListener for F
where
    F: Fn(&str, &TypeTree) + Send + Sync + 'static,
{
    fn on_schema_update(&self, source: &str, tree: &TypeTree) {
        self(source, tree)
    }
}

struct ClientInner {
    url: String,
    options: ClientOptions,
    fetcher: Arc<dyn Fetcher>,
    strategy: Box<dyn RefreshStrategy>,
    store: DescriptorStore,
    listener: Option<Arc<dyn SchemaUpdateListener>>,
    /// Serializes refreshes; held for the whole fetch + decode + install.
    refresh_lock: tokio::sync::Mutex<()>,
}

impl ClientInner {
    async fn fetch_tree(&self) -> Result<Option<TypeTree>, StencilError> {
        let payload = self
            .strategy
            .refresh(&*self.fetcher, &self.url, &self.options.transport)
            .await?;
        payload.map(|bytes| TypeTree::decode(&bytes)).transpose()
    }

    /// Run one refresh with `refresh_lock` already held. Returns whether a new
    /// tree was installed.
    async fn load_locked(
        &self,
        notify: bool,
        cancel: &CancellationToken,
    ) -> Result<bool, StencilError> {
        let Some(tree) = self.fetch_tree().await? else {
            debug!(url = %self.url, "descriptor set unchanged");
            return Ok(false);
        };
        if cancel.is_cancelled() {
            debug!(url = %self.url, "client closed during refresh, discarding result");
            return Ok(false);
        }

        let tree = Arc::new(tree);
        self.store.write(&self.url, Arc::clone(&tree));
        info!(url = %self.url, types = tree.len(), "descriptor set loaded");

        if notify {
            if let Some(listener) = &self.listener {
                listener.on_schema_update(&self.url, &tree);
            }
        }
        Ok(true)
    }

    /// Timer body. Never fails: errors are logged and the cached tree stays.
    async fn tick(&self, cancel: &CancellationToken) {
        let Ok(_guard) = self.refresh_lock.try_lock() else {
            debug!(url = %self.url, "previous refresh still running, skipping tick");
            return;
        };
        if let Err(e) = self.load_locked(true, cancel).await {
            warn!(
                url = %self.url,
                strategy = %self.strategy.kind(),
                error = %e,
                "refresh failed, keeping cached descriptors"
            );
        }
    }
}

/// Returns `true` if any message in the tree below `message` carried fields
/// its descriptor does not declare.
pub(crate) fn has_unknown_fields(message: &DynamicMessage) -> bool {
    use prost_reflect::Value;

    fn value_has_unknown(value: &Value) -> bool {
        match value {
            Value::Message(m) => has_unknown_fields(m),
            Value::List(items) => items.iter().any(value_has_unknown),
            Value::Map(entries) => entries.values().any(value_has_unknown),
            _ => false,
        }
    }

    message.unknown_fields().next().is_some()
        || message.fields().any(|(_, value)| value_has_unknown(value))
}

fn spawn_timer(
    inner: Arc<ClientInner>,
    cancel: CancellationToken,
    period: Duration,
) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => inner.tick(&cancel).await,
            }
        }
        debug!(url = %inner.url, "refresh timer stopped");
    });
}

/// Builder for [`Client`].
pub struct ClientBuilder {
    url: String,
    fetcher: Arc<dyn Fetcher>,
    options: ClientOptions,
    store: Option<DescriptorStore>,
    listener: Option<Arc<dyn SchemaUpdateListener>>,
}

impl ClientBuilder {
    pub fn options(mut self, options: ClientOptions) -> Self {
        self.options = options;
        self
    }

    /// Publish trees into a shared store instead of a private one.
    pub fn store(mut self, store: DescriptorStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn on_update(mut self, listener: impl SchemaUpdateListener) -> Self {
        self.listener = Some(Arc::new(listener));
        self
    }

    pub(crate) fn listener(mut self, listener: Option<Arc<dyn SchemaUpdateListener>>) -> Self {
        self.listener = listener;
        self
    }

    /// Validate the configuration, start the refresh timer if enabled and
    /// perform the initial load.
    ///
    /// On failure the timer is cancelled before the error is returned.
    pub async fn connect(self) -> Result<Client, StencilError> {
        validate_source_url(&self.url)?;
        self.options.validate()?;

        let inner = Arc::new(ClientInner {
            strategy: self.options.refresh_strategy.build(),
            url: self.url,
            options: self.options,
            fetcher: self.fetcher,
            store: self.store.unwrap_or_default(),
            listener: self.listener,
            refresh_lock: tokio::sync::Mutex::new(()),
        });

        let cancel = CancellationToken::new();
        if inner.options.should_refresh {
            spawn_timer(
                Arc::clone(&inner),
                cancel.clone(),
                inner.options.refresh_interval,
            );
        }
        let client = Client { inner, cancel };

        let initial = {
            let _guard = client.inner.refresh_lock.lock().await;
            client.inner.load_locked(false, &client.cancel).await
        };
        match initial {
            Ok(true) => {}
            Ok(false) => {
                warn!(url = %client.inner.url, "registry listed no schema versions, starting empty");
                client.inner.store.write(
                    &client.inner.url,
                    Arc::new(TypeTree::from_pool(DescriptorPool::new())),
                );
            }
            Err(e) => {
                client.close();
                return Err(e);
            }
        }

        info!(
            url = %client.inner.url,
            strategy = %client.inner.strategy.kind(),
            auto_refresh = client.inner.options.should_refresh,
            "client ready"
        );
        Ok(client)
    }
}

/// Resolves message types from one registry source.
///
/// Lookups never wait for a refresh: they read a snapshot of the current
/// tree from the [`DescriptorStore`].
pub struct Client {
    inner: Arc<ClientInner>,
    cancel: CancellationToken,
}

impl Client {
    pub fn builder(url: impl Into<String>, fetcher: Arc<dyn Fetcher>) -> ClientBuilder {
        ClientBuilder {
            url: url.into(),
            fetcher,
            options: ClientOptions::default(),
            store: None,
            listener: None,
        }
    }

    /// Shorthand for `builder(url, fetcher).options(options).connect()`.
    pub async fn connect(
        url: impl Into<String>,
        options: ClientOptions,
        fetcher: Arc<dyn Fetcher>,
    ) -> Result<Self, StencilError> {
        Self::builder(url, fetcher).options(options).connect().await
    }

    pub fn url(&self) -> &str {
        &self.inner.url
    }

    pub fn options(&self) -> &ClientOptions {
        &self.inner.options
    }

    pub fn store(&self) -> &DescriptorStore {
        &self.inner.store
    }

    /// The current tree.
    pub fn snapshot(&self) -> Arc<TypeTree> {
        self.inner
            .store
            .read(&self.inner.url)
            .unwrap_or_else(|| Arc::new(TypeTree::from_pool(DescriptorPool::new())))
    }

    pub fn get_type(&self, name: &str) -> Result<MessageDescriptor, StencilError> {
        self.snapshot().get_type(name)
    }

    pub fn type_names(&self) -> Vec<String> {
        self.snapshot().type_names()
    }

    /// Decode wire-format `data` as a message of type `name`.
    pub fn parse(&self, name: &str, data: &[u8]) -> Result<DynamicMessage, StencilError> {
        self.snapshot().parse(name, data)
    }

    /// Encode the JSON form of `data` as a message of type `name`.
    pub fn serialize<T: Serialize + ?Sized>(
        &self,
        name: &str,
        data: &T,
    ) -> Result<Vec<u8>, StencilError> {
        self.snapshot().serialize(name, data)
    }

    /// Like [`parse`](Self::parse), but refreshes once and parses again when
    /// `data` carries fields the current descriptor does not know.
    pub async fn parse_with_refresh(
        &self,
        name: &str,
        data: &[u8],
    ) -> Result<DynamicMessage, StencilError> {
        let message = self.parse(name, data)?;
        if !has_unknown_fields(&message) {
            return Ok(message);
        }
        debug!(url = %self.inner.url, type_name = name, "unknown fields in message, refreshing");
        self.refresh().await?;
        self.parse(name, data)
    }

    /// Like [`serialize`](Self::serialize), but refreshes once and retries
    /// when the type is unknown or `data` does not fit it.
    pub async fn serialize_with_refresh<T: Serialize + ?Sized>(
        &self,
        name: &str,
        data: &T,
    ) -> Result<Vec<u8>, StencilError> {
        match self.serialize(name, data) {
            Err(e) if e.is_stale_schema() => {
                debug!(url = %self.inner.url, type_name = name, error = %e, "refreshing before retry");
                self.refresh().await?;
                self.serialize(name, data)
            }
            other => other,
        }
    }

    /// Refresh now, waiting for any running refresh to finish first.
    ///
    /// Returns `Ok(true)` if a new tree was installed. Errors propagate to
    /// the caller; the cached tree is kept. A closed client does nothing.
    pub async fn refresh(&self) -> Result<bool, StencilError> {
        if self.is_closed() {
            debug!(url = %self.inner.url, "refresh requested on closed client");
            return Ok(false);
        }
        let _guard = self.inner.refresh_lock.lock().await;
        self.inner.load_locked(true, &self.cancel).await
    }

    /// Stop background refreshes. A refresh already in flight completes but
    /// its result is dropped. Safe to call more than once.
    pub fn close(&self) {
        if self.cancel.is_cancelled() {
            return;
        }
        // the timer task is never aborted; an in-flight tick runs to completion
        self.cancel.cancel();
        debug!(url = %self.inner.url, "client closed");
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("url", &self.inner.url)
            .field("strategy", &self.inner.strategy.kind())
            .field("closed", &self.is_closed())
            .finish()
    }
}
