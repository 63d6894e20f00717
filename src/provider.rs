//! Provider identity
//!
//! A [`ProviderKey`] names the logical source a range database was built
//! from. Keys compare and hash by name only, so built-in keys and keys
//! minted by callers for custom sources share one identity space.

use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;

/// Name-keyed provider identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProviderKey(Cow<'static, str>);

impl ProviderKey {
    /// Full IP2Location CSV export
    pub const IP2LOCATION: ProviderKey = ProviderKey(Cow::Borrowed("ip2location"));

    /// IP2Location LITE CSV export
    pub const IP2LOCATION_LITE: ProviderKey = ProviderKey(Cow::Borrowed("ip2location-lite"));

    /// Mint a key for a custom source
    pub fn new(name: impl Into<String>) -> Self {
        ProviderKey(Cow::Owned(name.into()))
    }

    /// Provider name
    pub fn name(&self) -> &str {
        &self.0
    }

    /// Keys shipped with the crate
    pub fn builtin() -> [ProviderKey; 2] {
        [Self::IP2LOCATION, Self::IP2LOCATION_LITE]
    }
}

impl From<&str> for ProviderKey {
    fn from(name: &str) -> Self {
        ProviderKey::new(name)
    }
}

impl From<String> for ProviderKey {
    fn from(name: String) -> Self {
        ProviderKey::new(name)
    }
}

impl fmt::Display for ProviderKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
