//! Inbound request shapes, already authenticated and decoded by the
//! transport.

use serde::{Deserialize, Serialize};

use crate::error::RelayError;
use crate::registry::{GroupId, Identity, Platform};

/// Register a device token for an identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub token: String,
    pub identity: Identity,
    #[serde(default)]
    pub platform: Platform,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnregisterRequest {
    pub token: String,
}

/// Subscribe or unsubscribe an identity to a closed group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MembershipRequest {
    pub group_id: GroupId,
    pub identity: Identity,
}

/// A notification addressed to one identity or to a closed group.
///
/// Exactly one of `identity` and `group_id` must be set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotifyRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity: Option<Identity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<GroupId>,
    /// Opaque payload, forwarded untouched.
    pub payload: String,
}

/// Validated target of a [`NotifyRequest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyTarget<'a> {
    Identity(&'a str),
    ClosedGroup(&'a str),
}

impl NotifyRequest {
    pub fn to_identity(identity: impl Into<Identity>, payload: impl Into<String>) -> Self {
        Self {
            identity: Some(identity.into()),
            group_id: None,
            payload: payload.into(),
        }
    }

    pub fn to_group(group_id: impl Into<GroupId>, payload: impl Into<String>) -> Self {
        Self {
            identity: None,
            group_id: Some(group_id.into()),
            payload: payload.into(),
        }
    }

    /// Check the request shape and return its target.
    ///
    /// Neither or both targets set, or an empty target string, is a
    /// validation error.
    pub fn target(&self) -> Result<NotifyTarget<'_>, RelayError> {
        match (self.identity.as_deref(), self.group_id.as_deref()) {
            (Some(_), Some(_)) => Err(RelayError::Validation(
                "exactly one of identity and group_id must be set, got both".into(),
            )),
            (None, None) => Err(RelayError::Validation(
                "exactly one of identity and group_id must be set, got neither".into(),
            )),
            (Some(""), None) => Err(RelayError::Validation("identity is required".into())),
            (None, Some("")) => Err(RelayError::Validation("group_id is required".into())),
            (Some(identity), None) => Ok(NotifyTarget::Identity(identity)),
            (None, Some(group_id)) => Ok(NotifyTarget::ClosedGroup(group_id)),
        }
    }
}
