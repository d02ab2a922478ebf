//! Resolution of notify requests into destination tokens.

mod request;

pub use request::{
    MembershipRequest, NotifyRequest, NotifyTarget, RegisterRequest, UnregisterRequest,
};

use std::collections::HashSet;
use std::sync::Arc;

use tracing::debug;

use crate::error::RelayError;
use crate::registry::{ClosedGroupRegistry, DeviceRegistry, DeviceToken, TokenSet};

/// Turns a [`NotifyRequest`] into the deduplicated list of devices to push to.
#[derive(Clone)]
pub struct NotificationRouter {
    devices: Arc<DeviceRegistry>,
    groups: Arc<ClosedGroupRegistry>,
}

impl NotificationRouter {
    pub const fn new(devices: Arc<DeviceRegistry>, groups: Arc<ClosedGroupRegistry>) -> Self {
        Self { devices, groups }
    }

    /// Validate `request` and resolve its target.
    ///
    /// An unknown target, or one without devices, resolves to an empty list.
    pub async fn resolve(&self, request: &NotifyRequest) -> Result<Vec<DeviceToken>, RelayError> {
        let target = request.target()?;
        Ok(self.resolve_target(target).await)
    }

    pub async fn resolve_target(&self, target: NotifyTarget<'_>) -> Vec<DeviceToken> {
        match target {
            NotifyTarget::Identity(identity) => self.devices.lookup(identity).await.to_vec(),
            NotifyTarget::ClosedGroup(group_id) => {
                let members: Vec<_> = self.groups.members(group_id).await.into_iter().collect();
                let sets = self.devices.lookup_many(&members).await;
                let destinations = unique_destinations(&sets);
                debug!(
                    group_id = %group_id,
                    members = members.len(),
                    destinations = destinations.len(),
                    "Resolved closed group"
                );
                destinations
            }
        }
    }
}

/// Flatten token sets in order, keeping the first occurrence of each token.
pub fn unique_destinations(sets: &[TokenSet]) -> Vec<DeviceToken> {
    let mut seen = HashSet::new();
    sets.iter()
        .flat_map(TokenSet::iter)
        .filter(|device| seen.insert(device.token.clone()))
        .collect()
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::registry::Platform;
    use crate::storage::{MemoryStore, RegistryStore};

    fn router() -> (NotificationRouter, Arc<DeviceRegistry>, Arc<ClosedGroupRegistry>) {
        let store: Arc<dyn RegistryStore> = Arc::new(MemoryStore::new());
        let devices = Arc::new(DeviceRegistry::new(Arc::clone(&store), 5));
        let groups = Arc::new(ClosedGroupRegistry::new(store));
        (
            NotificationRouter::new(Arc::clone(&devices), Arc::clone(&groups)),
            devices,
            groups,
        )
    }

    fn tokens(destinations: &[DeviceToken]) -> Vec<&str> {
        let mut tokens: Vec<&str> = destinations.iter().map(|d| d.token.as_str()).collect();
        tokens.sort_unstable();
        tokens
    }

    #[tokio::test]
    async fn identity_target_returns_its_tokens() {
        let (router, devices, _) = router();
        devices.register("05aa", "A", Platform::Android).await.unwrap();
        devices.register("05aa", "B", Platform::Ios).await.unwrap();

        let resolved = router
            .resolve(&NotifyRequest::to_identity("05aa", "x"))
            .await
            .unwrap();
        assert_eq!(tokens(&resolved), vec!["A", "B"]);
    }

    #[tokio::test]
    async fn group_target_unions_member_tokens() {
        let (router, devices, groups) = router();
        devices.register("id1", "T1", Platform::Android).await.unwrap();
        devices.register("id2", "T2", Platform::Android).await.unwrap();
        devices.register("id2", "T3", Platform::Ios).await.unwrap();
        groups.subscribe("g1", "id1").await.unwrap();
        groups.subscribe("g1", "id2").await.unwrap();

        let resolved = router
            .resolve(&NotifyRequest::to_group("g1", "x"))
            .await
            .unwrap();
        assert_eq!(tokens(&resolved), vec!["T1", "T2", "T3"]);
    }

    #[tokio::test]
    async fn unknown_targets_resolve_empty() {
        let (router, _, groups) = router();
        groups.subscribe("g1", "nobody").await.unwrap();

        assert!(
            router
                .resolve(&NotifyRequest::to_identity("05zz", "x"))
                .await
                .unwrap()
                .is_empty()
        );
        assert!(
            router
                .resolve(&NotifyRequest::to_group("g1", "x"))
                .await
                .unwrap()
                .is_empty()
        );
        assert!(
            router
                .resolve(&NotifyRequest::to_group("missing", "x"))
                .await
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test]
    async fn malformed_request_is_rejected() {
        let (router, _, _) = router();
        let req = NotifyRequest {
            identity: None,
            group_id: None,
            payload: "x".into(),
        };
        assert!(matches!(
            router.resolve(&req).await,
            Err(RelayError::Validation(_))
        ));
    }

    #[test]
    fn duplicate_tokens_across_sets_appear_once() {
        let id1: TokenSet = [DeviceToken::new("T1", Platform::Android)]
            .into_iter()
            .collect();
        let id2: TokenSet = ["T1", "T2", "T3"]
            .into_iter()
            .map(|t| DeviceToken::new(t, Platform::Android))
            .collect();

        let resolved = unique_destinations(&[id1, id2]);
        assert_eq!(tokens(&resolved), vec!["T1", "T2", "T3"]);
        assert_eq!(resolved[0].token, "T1");
    }
}
