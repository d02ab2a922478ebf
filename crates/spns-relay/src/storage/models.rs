//! Data models for SPNS relay storage.

use serde::{Deserialize, Serialize};

use crate::registry::{DeviceToken, GroupId, Identity};

/// Key of one durable registry record.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RecordKey {
    /// Token set of one identity.
    Device(Identity),
    /// Membership of one closed group.
    ClosedGroup(GroupId),
}

impl RecordKey {
    pub const DEVICE_KIND: &'static str = "device";
    pub const CLOSED_GROUP_KIND: &'static str = "closed_group";

    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Device(_) => Self::DEVICE_KIND,
            Self::ClosedGroup(_) => Self::CLOSED_GROUP_KIND,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Self::Device(id) | Self::ClosedGroup(id) => id,
        }
    }

    /// Rebuild a key from its stored `(kind, id)` columns.
    pub fn from_parts(kind: &str, id: &str) -> Option<Self> {
        match kind {
            Self::DEVICE_KIND => Some(Self::Device(id.to_string())),
            Self::CLOSED_GROUP_KIND => Some(Self::ClosedGroup(id.to_string())),
            _ => None,
        }
    }
}

/// Value of one durable registry record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Record {
    Devices(Vec<DeviceToken>),
    Members(Vec<Identity>),
}

impl Record {
    /// Decode a stored JSON value according to the record kind.
    pub fn decode(key: &RecordKey, value: &str) -> Result<Self, serde_json::Error> {
        match key {
            RecordKey::Device(_) => serde_json::from_str(value).map(Self::Devices),
            RecordKey::ClosedGroup(_) => serde_json::from_str(value).map(Self::Members),
        }
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// One write in a multi-record batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreWrite {
    Put(RecordKey, Record),
    Delete(RecordKey),
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct RegistryRow {
    pub kind: String,
    pub record_key: String,
    pub value: String,
    pub updated_at: i64,
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::registry::Platform;

    #[test]
    fn key_round_trips_through_parts() {
        let key = RecordKey::ClosedGroup("g1".into());
        assert_eq!(RecordKey::from_parts(key.kind(), key.id()), Some(key));
        assert_eq!(RecordKey::from_parts("bogus", "x"), None);
    }

    #[test]
    fn decode_uses_key_kind() {
        let key = RecordKey::Device("05ab".into());
        let record = Record::Devices(vec![DeviceToken::new("tok", Platform::Ios)]);
        let stored = record.encode().unwrap();
        assert_eq!(Record::decode(&key, &stored).unwrap(), record);

        let group = RecordKey::ClosedGroup("g1".into());
        let members = Record::decode(&group, r#"["05aa","05bb"]"#).unwrap();
        assert_eq!(members, Record::Members(vec!["05aa".into(), "05bb".into()]));
    }

    #[test]
    fn decode_rejects_mismatched_shape() {
        let key = RecordKey::Device("05ab".into());
        assert!(Record::decode(&key, r#"["05aa"]"#).is_err());
    }
}
