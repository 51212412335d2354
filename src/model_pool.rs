use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;

use crate::provider::{ModelHandleKey, ModelProvider, ProviderError, ProviderFactory};

/// Process-wide, provider-agnostic cache of model clients keyed by
/// `(provider, model, endpoint)`. Clients are created once per key and
/// reused across runs; callers never close them directly, they call
/// [`ModelPool::teardown`] at workflow end, which closes every client
/// opened during that run's lifetime in LIFO order.
///
/// Registered [`ProviderFactory`] instances are looked up by provider name;
/// the pool itself never constructs a client — it only owns and reuses
/// the ones the registered factory hands back.
pub struct ModelPool {
    factories: HashMap<String, Arc<dyn ProviderFactory>>,
    clients: DashMap<ModelHandleKey, Arc<dyn ModelProvider>>,
    creation_order: Mutex<Vec<ModelHandleKey>>,
}

impl ModelPool {
    pub fn new(factories: HashMap<String, Arc<dyn ProviderFactory>>) -> Self {
        Self {
            factories,
            clients: DashMap::new(),
            creation_order: Mutex::new(Vec::new()),
        }
    }

    /// Returns the cached client for `key`, creating and registering one
    /// via the matching factory on first request. Per the invariant in
    /// §8.4 ("exactly one client per unique handle key"), two concurrent
    /// first-requests for the same key may both run `factory.create_client`,
    /// but only the one that wins the `entry()` insertion is kept and
    /// returned to every caller — mirroring `AgentCache::get_or_build`'s
    /// insert-if-absent pattern. The loser's client is simply dropped
    /// unregistered, so `creation_order` and `teardown` only ever see the
    /// client that actually ended up in `self.clients`.
    pub async fn get_or_create(&self, key: &ModelHandleKey) -> Result<Arc<dyn ModelProvider>, ProviderError> {
        if let Some(existing) = self.clients.get(key) {
            return Ok(existing.clone());
        }

        let factory = self.factories.get(&key.provider).ok_or_else(|| {
            ProviderError::InvalidRequest(format!("no provider factory registered for '{}'", key.provider))
        })?;

        let client = factory.create_client(key).await?;
        let inserted = match self.clients.entry(key.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => false,
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                vacant.insert(client);
                true
            }
        };
        if inserted {
            self.creation_order.lock().await.push(key.clone());
        }
        Ok(self.clients.get(key).expect("just inserted or already present").clone())
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Closes every client created through this pool instance, in reverse
    /// creation order, per the Lifecycle note in §3. A fresh `ModelPool`
    /// is constructed per workflow invocation by the run driver, so this
    /// tears down exactly the clients that run opened.
    pub async fn teardown(&self) {
        let order = {
            let mut guard = self.creation_order.lock().await;
            std::mem::take(&mut *guard)
        };
        for key in order.into_iter().rev() {
            if let Some((_, client)) = self.clients.remove(&key) {
                client.close().await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{InvokeRequest, InvokeResponse};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingProvider;

    #[async_trait]
    impl ModelProvider for CountingProvider {
        async fn invoke(&self, _request: InvokeRequest) -> Result<InvokeResponse, ProviderError> {
            Ok(InvokeResponse {
                response_text: "ok".to_string(),
                tokens_input: 1,
                tokens_output: 1,
                tool_calls: Vec::new(),
            })
        }
    }

    struct CountingFactory {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl ProviderFactory for CountingFactory {
        async fn create_client(&self, _key: &ModelHandleKey) -> Result<Arc<dyn ModelProvider>, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(CountingProvider))
        }
    }

    #[tokio::test]
    async fn reuses_client_for_identical_key() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut factories: HashMap<String, Arc<dyn ProviderFactory>> = HashMap::new();
        factories.insert(
            "mock".to_string(),
            Arc::new(CountingFactory { calls: calls.clone() }),
        );
        let pool = ModelPool::new(factories);
        let key = ModelHandleKey::new("mock", "mock-large", None);

        pool.get_or_create(&key).await.unwrap();
        pool.get_or_create(&key).await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(pool.len(), 1);
    }

    #[tokio::test]
    async fn concurrent_first_access_converges_on_one_client() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut factories: HashMap<String, Arc<dyn ProviderFactory>> = HashMap::new();
        factories.insert(
            "mock".to_string(),
            Arc::new(CountingFactory { calls: calls.clone() }),
        );
        let pool = Arc::new(ModelPool::new(factories));
        let key = ModelHandleKey::new("mock", "mock-large", None);

        let mut set = tokio::task::JoinSet::new();
        for _ in 0..8 {
            let pool = pool.clone();
            let key = key.clone();
            set.spawn(async move { pool.get_or_create(&key).await.unwrap() });
        }

        let mut clients = Vec::new();
        while let Some(joined) = set.join_next().await {
            clients.push(joined.unwrap());
        }

        assert_eq!(pool.len(), 1, "exactly one client survives per key");
        let first_ptr = Arc::as_ptr(&clients[0]);
        assert!(
            clients.iter().all(|c| Arc::as_ptr(c) == first_ptr),
            "every racing caller must observe the same client instance"
        );

        pool.teardown().await;
        assert!(pool.is_empty());
    }

    #[tokio::test]
    async fn errors_on_unregistered_provider() {
        let pool = ModelPool::new(HashMap::new());
        let key = ModelHandleKey::new("unknown", "m", None);
        assert!(pool.get_or_create(&key).await.is_err());
    }
}
