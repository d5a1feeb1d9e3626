//! Multi-source client with ordered fail-over across registries.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use futures::future::try_join_all;
use prost_reflect::{DynamicMessage, MessageDescriptor};
use serde::Serialize;
use tracing::{debug, info};

use crate::client::{has_unknown_fields, Client, SchemaUpdateListener};
use crate::config::ClientOptions;
use crate::error::StencilError;
use crate::store::DescriptorStore;
use crate::transport::Fetcher;

/// Builder for [`MultiSourceClient`].
pub struct MultiSourceClientBuilder {
    urls: Vec<String>,
    fetcher: Arc<dyn Fetcher>,
    options: ClientOptions,
    listener: Option<Arc<dyn SchemaUpdateListener>>,
}

impl MultiSourceClientBuilder {
    pub fn options(mut self, options: ClientOptions) -> Self {
        self.options = options;
        self
    }

    pub fn on_update(mut self, listener: impl SchemaUpdateListener) -> Self {
        self.listener = Some(Arc::new(listener));
        self
    }

    /// Connect every source concurrently. Fails with the first error any
    /// source raises; clients already connected are dropped, which stops
    /// their timers.
    pub async fn connect(self) -> Result<MultiSourceClient, StencilError> {
        if self.urls.is_empty() {
            return Err(StencilError::InvalidConfiguration(
                "at least one registry url is required".into(),
            ));
        }
        let mut seen = HashSet::new();
        if let Some(dup) = self.urls.iter().find(|u| !seen.insert(u.as_str())) {
            return Err(StencilError::InvalidConfiguration(format!(
                "duplicate registry url {dup:?}"
            )));
        }

        let store = DescriptorStore::new();
        let clients = try_join_all(self.urls.iter().map(|url| {
            Client::builder(url.clone(), Arc::clone(&self.fetcher))
                .options(self.options.clone())
                .store(store.clone())
                .listener(self.listener.clone())
                .connect()
        }))
        .await?;

        info!(sources = clients.len(), "multi-source client ready");
        Ok(MultiSourceClient { clients, store })
    }
}

/// Resolves types from several registries, trying them in configured order.
pub struct MultiSourceClient {
    clients: Vec<Client>,
    store: DescriptorStore,
}

impl MultiSourceClient {
    pub fn builder<I, S>(urls: I, fetcher: Arc<dyn Fetcher>) -> MultiSourceClientBuilder
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        MultiSourceClientBuilder {
            urls: urls.into_iter().map(Into::into).collect(),
            fetcher,
            options: ClientOptions::default(),
            listener: None,
        }
    }

    /// Shorthand for `builder(urls, fetcher).options(options).connect()`.
    pub async fn connect<I, S>(
        urls: I,
        options: ClientOptions,
        fetcher: Arc<dyn Fetcher>,
    ) -> Result<Self, StencilError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::builder(urls, fetcher).options(options).connect().await
    }

    /// First constituent that resolves `name`.
    fn resolve(&self, name: &str) -> Result<(&Client, MessageDescriptor), StencilError> {
        for client in &self.clients {
            match client.get_type(name) {
                Ok(desc) => return Ok((client, desc)),
                Err(e) => debug!(url = %client.url(), error = %e, "type not in source"),
            }
        }
        Err(StencilError::TypeNotFound(name.to_string()))
    }

    pub fn get_type(&self, name: &str) -> Result<MessageDescriptor, StencilError> {
        self.resolve(name).map(|(_, desc)| desc)
    }

    /// Union of every source's type names, sorted.
    pub fn type_names(&self) -> Vec<String> {
        self.clients
            .iter()
            .flat_map(|c| c.type_names())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    pub fn parse(&self, name: &str, data: &[u8]) -> Result<DynamicMessage, StencilError> {
        let (client, _) = self.resolve(name)?;
        client.parse(name, data)
    }

    pub fn serialize<T: Serialize + ?Sized>(
        &self,
        name: &str,
        data: &T,
    ) -> Result<Vec<u8>, StencilError> {
        let (client, _) = self.resolve(name)?;
        client.serialize(name, data)
    }

    /// Parse, and if the message carries fields the resolving source does
    /// not know, refresh every source and parse again.
    pub async fn parse_with_refresh(
        &self,
        name: &str,
        data: &[u8],
    ) -> Result<DynamicMessage, StencilError> {
        let message = self.parse(name, data)?;
        if !has_unknown_fields(&message) {
            return Ok(message);
        }
        self.refresh().await?;
        self.parse(name, data)
    }

    /// Serialize, and if the type is missing everywhere or `data` does not
    /// fit it, refresh every source and try once more.
    pub async fn serialize_with_refresh<T: Serialize + ?Sized>(
        &self,
        name: &str,
        data: &T,
    ) -> Result<Vec<u8>, StencilError> {
        match self.serialize(name, data) {
            Err(e) if e.is_stale_schema() => {
                self.refresh().await?;
                self.serialize(name, data)
            }
            other => other,
        }
    }

    /// Refresh every source in order. All sources are attempted; the first
    /// error is returned.
    pub async fn refresh(&self) -> Result<bool, StencilError> {
        let mut changed = false;
        let mut first_err = None;
        for client in &self.clients {
            match client.refresh().await {
                Ok(c) => changed |= c,
                Err(e) => {
                    first_err.get_or_insert(e);
                }
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(changed),
        }
    }

    /// Close every source.
    pub fn close(&self) {
        for client in &self.clients {
            client.close();
        }
    }

    pub fn urls(&self) -> Vec<&str> {
        self.clients.iter().map(|c| c.url()).collect()
    }

    pub fn clients(&self) -> &[Client] {
        &self.clients
    }

    pub fn store(&self) -> &DescriptorStore {
        &self.store
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

impl std::fmt::Debug for MultiSourceClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MultiSourceClient")
            .field("clients", &self.clients)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::testutil::{
        descriptor_set, descriptor_set_with, descriptor_set_with_one_fields, MockFetcher,
    };
    use crate::tree::TypeTree;

    const A: &str = "http://registry-a/schemas/x";
    const B: &str = "http://registry-b/schemas/x";

    fn two_sources() -> Arc<MockFetcher> {
        let fetcher = Arc::new(MockFetcher::new());
        fetcher
            .respond(A, 200, descriptor_set(true))
            .respond(B, 200, descriptor_set_with(&["OnlyInB"]));
        fetcher
    }

    #[tokio::test]
    async fn falls_through_to_later_source() {
        let client = MultiSourceClient::connect([A, B], ClientOptions::default(), two_sources())
            .await
            .unwrap();
        assert!(client.clients()[0].get_type("test.OnlyInB").is_err());
        let desc = client.get_type("test.OnlyInB").unwrap();
        assert_eq!(desc.full_name(), "test.OnlyInB");
    }

    #[tokio::test]
    async fn miss_everywhere_names_the_type() {
        let client = MultiSourceClient::connect([A, B], ClientOptions::default(), two_sources())
            .await
            .unwrap();
        let err = client.get_type("test.Two.Three.Five").unwrap_err();
        assert_eq!(err.to_string(), "no such type: test.Two.Three.Five");
    }

    #[tokio::test]
    async fn any_failing_source_fails_construction() {
        let fetcher = Arc::new(MockFetcher::new());
        fetcher
            .respond(A, 200, descriptor_set(true))
            .respond(B, 500, "");
        let err = MultiSourceClient::connect([A, B], ClientOptions::default(), fetcher)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Unable to download descriptor file");
    }

    #[tokio::test]
    async fn incomplete_set_fails_construction() {
        let fetcher = Arc::new(MockFetcher::new());
        fetcher.respond(A, 200, descriptor_set(false));
        let err = MultiSourceClient::connect([A], ClientOptions::default(), fetcher)
            .await
            .unwrap_err();
        assert!(matches!(err, StencilError::SchemaInvalid(_)));
    }

    #[tokio::test]
    async fn rejects_empty_and_duplicate_urls() {
        let fetcher = two_sources();
        let empty: [&str; 0] = [];
        assert!(matches!(
            MultiSourceClient::connect(empty, ClientOptions::default(), fetcher.clone()).await,
            Err(StencilError::InvalidConfiguration(_))
        ));
        assert!(matches!(
            MultiSourceClient::connect([A, A], ClientOptions::default(), fetcher.clone()).await,
            Err(StencilError::InvalidConfiguration(_))
        ));
        assert!(fetcher.calls().is_empty());
    }

    #[tokio::test]
    async fn sources_share_one_store() {
        let client = MultiSourceClient::connect([A, B], ClientOptions::default(), two_sources())
            .await
            .unwrap();
        assert_eq!(client.store().sources(), vec![A.to_string(), B.to_string()]);
        assert_eq!(client.urls(), vec![A, B]);
        let names = client.type_names();
        assert!(names.contains(&"test.One".to_string()));
        assert!(names.contains(&"test.OnlyInB".to_string()));
        assert_eq!(names.iter().filter(|n| *n == "test.One").count(), 1);
    }

    #[tokio::test]
    async fn serialize_and_parse_use_the_resolving_source() {
        let client = MultiSourceClient::connect([A, B], ClientOptions::default(), two_sources())
            .await
            .unwrap();
        let bytes = client
            .serialize("test.OnlyInB", &serde_json::json!({ "id": 7 }))
            .unwrap();
        let msg = client.parse("test.OnlyInB", &bytes).unwrap();
        assert_eq!(msg.get_field_by_name("id").unwrap().as_i64(), Some(7));
    }

    #[tokio::test]
    async fn refresh_attempts_every_source() {
        let fetcher = Arc::new(MockFetcher::new());
        fetcher
            .respond(A, 200, descriptor_set(true))
            .respond(A, 500, "")
            .respond(B, 200, descriptor_set(true))
            .respond(B, 200, descriptor_set_with(&["Later"]));
        let client = MultiSourceClient::connect([A, B], ClientOptions::default(), fetcher.clone())
            .await
            .unwrap();

        assert!(client.refresh().await.is_err());
        assert_eq!(fetcher.call_count(B), 2);
        assert!(client.get_type("test.Later").is_ok());
    }

    #[tokio::test]
    async fn parse_with_refresh_reaches_every_source() {
        let newer = descriptor_set_with_one_fields(&[("count", 2)]);
        let bytes = TypeTree::decode(&newer)
            .unwrap()
            .serialize("test.One", &serde_json::json!({ "data": "x", "count": 9 }))
            .unwrap();
        let fetcher = Arc::new(MockFetcher::new());
        fetcher
            .respond(A, 200, descriptor_set(true))
            .respond(A, 200, newer)
            .respond(B, 200, descriptor_set(true));
        let client = MultiSourceClient::connect([A, B], ClientOptions::default(), fetcher.clone())
            .await
            .unwrap();

        let msg = client.parse_with_refresh("test.One", &bytes).await.unwrap();
        assert_eq!(msg.get_field_by_name("count").unwrap().as_i64(), Some(9));
        assert_eq!(fetcher.call_count(A), 2);
        assert_eq!(fetcher.call_count(B), 2);
    }

    #[tokio::test]
    async fn serialize_with_refresh_picks_up_new_field() {
        let fetcher = Arc::new(MockFetcher::new());
        fetcher
            .respond(A, 200, descriptor_set(true))
            .respond(A, 200, descriptor_set_with_one_fields(&[("added_later", 2)]))
            .respond(B, 200, descriptor_set(true));
        let client = MultiSourceClient::connect([A, B], ClientOptions::default(), fetcher)
            .await
            .unwrap();
        let data = serde_json::json!({ "data": "x", "added_later": 3 });

        assert!(client.serialize("test.One", &data).is_err());
        let bytes = client.serialize_with_refresh("test.One", &data).await.unwrap();
        let msg = client.parse("test.One", &bytes).unwrap();
        assert_eq!(msg.get_field_by_name("added_later").unwrap().as_i64(), Some(3));
    }

    #[tokio::test(start_paused = true)]
    async fn close_stops_every_source() {
        let fetcher = two_sources();
        let client = MultiSourceClient::connect(
            [A, B],
            ClientOptions::default().with_refresh(Duration::from_secs(1)),
            fetcher.clone(),
        )
        .await
        .unwrap();
        tokio::time::sleep(Duration::from_millis(2_500)).await;
        assert_eq!(fetcher.call_count(A), 3);
        assert_eq!(fetcher.call_count(B), 3);

        client.close();
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(fetcher.call_count(A), 3);
        assert_eq!(fetcher.call_count(B), 3);
    }
}
