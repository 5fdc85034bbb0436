use dashmap::DashMap;
use futures::future::join_all;
use std::sync::Arc;
use tracing::info;

use crate::session::SessionHolder;

/// Session Holders of a running flow, keyed by connection id.
#[derive(Default)]
pub struct NodeRegistry {
    holders: DashMap<String, Arc<SessionHolder>>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `holder` under its id, replacing any previous one.
    pub fn register(&self, holder: Arc<SessionHolder>) -> Option<Arc<SessionHolder>> {
        self.holders.insert(holder.id().to_string(), holder)
    }

    pub fn holder(&self, id: &str) -> Option<Arc<SessionHolder>> {
        self.holders.get(id).map(|h| Arc::clone(h.value()))
    }

    pub fn remove(&self, id: &str) -> Option<Arc<SessionHolder>> {
        self.holders.remove(id).map(|(_, h)| h)
    }

    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.holders.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.holders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.holders.is_empty()
    }

    /// Flow teardown: logs out every registered holder.
    pub async fn close_all(&self) {
        let holders: Vec<Arc<SessionHolder>> =
            self.holders.iter().map(|e| Arc::clone(e.value())).collect();

        join_all(holders.iter().map(|h| h.logout())).await;
        info!(count = holders.len(), "Closed all connections");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::mock::MockAuthenticator;
    use crate::config::ConnectionConfig;
    use crate::guidance::GuidanceRegistry;

    fn holder(id: &str, auth: Arc<MockAuthenticator>) -> Arc<SessionHolder> {
        SessionHolder::new(
            &ConnectionConfig::new(id, "test.example.com"),
            auth,
            Arc::new(GuidanceRegistry::new()),
        )
    }

    #[test]
    fn test_register_and_lookup() {
        let auth = Arc::new(MockAuthenticator::new());
        let registry = NodeRegistry::new();
        assert!(registry.register(holder("b", auth.clone())).is_none());
        assert!(registry.register(holder("a", auth.clone())).is_none());
        assert!(registry.register(holder("a", auth)).is_some());

        assert_eq!(registry.ids(), vec!["a", "b"]);
        assert_eq!(registry.holder("b").unwrap().id(), "b");
        assert!(registry.holder("c").is_none());
        assert!(registry.remove("b").is_some());
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_close_all_logs_out_every_holder() {
        let auth = Arc::new(MockAuthenticator::new());
        let registry = NodeRegistry::new();
        let first = holder("a", auth.clone());
        let second = holder("b", auth.clone());
        first.refresh().await;
        second.refresh().await;
        registry.register(first.clone());
        registry.register(second.clone());

        registry.close_all().await;

        assert!(!first.is_connected());
        assert!(!second.is_connected());
        assert!(auth.sessions().iter().all(|s| s.logout_count() == 1));
    }
}
