//! In-memory registries for device tokens and closed group memberships.

mod closed_groups;
mod devices;
mod types;

pub use closed_groups::ClosedGroupRegistry;
pub use devices::{DeviceRegistry, FailureOutcome};
pub use types::{DeviceToken, GroupId, Identity, Platform, TokenSet, token_prefix};
