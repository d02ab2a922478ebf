//! Closed group membership registry.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};

use crate::error::{RelayError, require_non_empty};
use crate::storage::{Record, RecordKey, RegistryStore, StoreError};

use super::types::{GroupId, Identity};

/// Thread-safe map of group id → member identities.
///
/// Membership changes are computed as set insert/remove under the write
/// lock, so concurrent subscribe/unsubscribe calls never overwrite each
/// other. Groups are kept when their last member leaves.
pub struct ClosedGroupRegistry {
    groups: RwLock<HashMap<GroupId, BTreeSet<Identity>>>,
    store: Arc<dyn RegistryStore>,
}

impl ClosedGroupRegistry {
    pub fn new(store: Arc<dyn RegistryStore>) -> Self {
        Self {
            groups: RwLock::new(HashMap::new()),
            store,
        }
    }

    /// Rebuild memberships from the closed-group records in `store`.
    pub async fn load(store: Arc<dyn RegistryStore>) -> Result<Self, StoreError> {
        let mut groups = HashMap::new();
        for (key, record) in store.load_all().await? {
            if let (RecordKey::ClosedGroup(group_id), Record::Members(members)) = (key, record) {
                groups.insert(group_id, members.into_iter().collect::<BTreeSet<_>>());
            }
        }
        info!(groups = groups.len(), "Closed group registry loaded");

        Ok(Self {
            groups: RwLock::new(groups),
            store,
        })
    }

    /// Add `identity` to `group_id`. Subscribing an existing member is a no-op.
    #[instrument(skip(self))]
    pub async fn subscribe(&self, group_id: &str, identity: &str) -> Result<(), RelayError> {
        require_non_empty("group_id", group_id)?;
        require_non_empty("identity", identity)?;

        let mut groups = self.groups.write().await;
        let created = !groups.contains_key(group_id);
        let members = groups.entry(group_id.to_string()).or_default();
        if !members.insert(identity.to_string()) {
            debug!("Already a member");
            return Ok(());
        }

        let record = Record::Members(members.iter().cloned().collect());
        let key = RecordKey::ClosedGroup(group_id.to_string());
        if let Err(e) = self.store.persist(&key, &record).await {
            if created {
                groups.remove(group_id);
            } else if let Some(members) = groups.get_mut(group_id) {
                members.remove(identity);
            }
            warn!(error = %e, "Failed to persist subscription, rolled back");
            return Err(e.into());
        }

        info!("Subscribed to closed group");
        Ok(())
    }

    /// Remove `identity` from `group_id`. Unknown groups and non-members are
    /// a no-op.
    #[instrument(skip(self))]
    pub async fn unsubscribe(&self, group_id: &str, identity: &str) -> Result<(), RelayError> {
        require_non_empty("group_id", group_id)?;
        require_non_empty("identity", identity)?;

        let mut groups = self.groups.write().await;
        let Some(members) = groups.get_mut(group_id) else {
            debug!("Closed group not found");
            return Ok(());
        };
        if !members.remove(identity) {
            debug!("Not a member");
            return Ok(());
        }

        let record = Record::Members(members.iter().cloned().collect());
        let key = RecordKey::ClosedGroup(group_id.to_string());
        if let Err(e) = self.store.persist(&key, &record).await {
            members.insert(identity.to_string());
            warn!(error = %e, "Failed to persist unsubscription, rolled back");
            return Err(e.into());
        }

        info!("Unsubscribed from closed group");
        Ok(())
    }

    /// Members of `group_id`; empty when the group is unknown.
    pub async fn members(&self, group_id: &str) -> BTreeSet<Identity> {
        self.groups
            .read()
            .await
            .get(group_id)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn group_count(&self) -> usize {
        self.groups.read().await.len()
    }
}
