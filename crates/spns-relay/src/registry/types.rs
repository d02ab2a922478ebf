//! Value types shared by the registries, router, and dispatch queue.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Client identity (a hex-encoded public key, the "session id").
pub type Identity = String;

/// Closed group identifier.
pub type GroupId = String;

/// Push platform a token was registered from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Android,
    Ios,
    #[default]
    Unknown,
}

impl Platform {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Android => "android",
            Self::Ios => "ios",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A device push token together with the platform it was registered from.
///
/// Equality for set purposes is decided by [`TokenSet`], which keys on the
/// token string alone.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceToken {
    pub token: String,
    #[serde(default)]
    pub platform: Platform,
}

impl DeviceToken {
    pub fn new(token: impl Into<String>, platform: Platform) -> Self {
        Self {
            token: token.into(),
            platform,
        }
    }
}

/// The set of push tokens registered for one identity.
///
/// Iteration order is the lexical order of the token strings, which keeps
/// resolution output deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenSet {
    tokens: BTreeMap<String, Platform>,
}

impl TokenSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or update a token. Returns `true` if the token was not present.
    pub fn insert(&mut self, device: DeviceToken) -> bool {
        self.tokens.insert(device.token, device.platform).is_none()
    }

    /// Remove a token, returning the platform it was registered with.
    pub fn remove(&mut self, token: &str) -> Option<Platform> {
        self.tokens.remove(token)
    }

    pub fn contains(&self, token: &str) -> bool {
        self.tokens.contains_key(token)
    }

    pub fn platform_of(&self, token: &str) -> Option<Platform> {
        self.tokens.get(token).copied()
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = DeviceToken> + '_ {
        self.tokens
            .iter()
            .map(|(token, platform)| DeviceToken::new(token.clone(), *platform))
    }

    pub fn to_vec(&self) -> Vec<DeviceToken> {
        self.iter().collect()
    }
}

impl FromIterator<DeviceToken> for TokenSet {
    fn from_iter<I: IntoIterator<Item = DeviceToken>>(iter: I) -> Self {
        let mut set = Self::new();
        for device in iter {
            set.insert(device);
        }
        set
    }
}

/// First eight characters of a token, for logging.
pub fn token_prefix(token: &str) -> &str {
    token
        .char_indices()
        .nth(8)
        .map_or(token, |(idx, _)| &token[..idx])
}
