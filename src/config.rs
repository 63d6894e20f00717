//! JSON configuration for resolvers and provider builds
//!
//! ```json
//! {
//!   "defaults": { "workers": 4, "retain_original_line": false },
//!   "providers": [
//!     { "name": "ip2location-lite", "path": "IP2LOCATION-LITE-DB3.CSV.gz" },
//!     {
//!       "name": "ip2location",
//!       "path": "IP2LOCATION-DB11.CSV",
//!       "vpn_sources": ["vpn-v4.csv", "vpn-v6.csv"],
//!       "ingest": { "storage": { "type": "file", "path": "db11.idx", "cache_capacity": 4096 } }
//!     }
//!   ]
//! }
//! ```
//!
//! Built-in provider names get their CSV layout automatically; any other
//! name must carry an explicit `layout`.

use crate::builder::StorageStrategy;
use crate::decorator::source::VpnLayout;
use crate::error::{Error, Result};
use crate::parser::CsvLayout;
use crate::provider::ProviderKey;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Default bytes per parse batch (128KB)
pub const DEFAULT_BATCH_BYTES: usize = 128 * 1024;

/// How one provider source is ingested
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Parse worker threads
    pub workers: usize,
    /// Target bytes per parse batch
    pub batch_bytes: usize,
    /// Keep each record's source line on its payload
    pub retain_original_line: bool,
    /// Index storage
    pub storage: StorageStrategy,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            workers: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            batch_bytes: DEFAULT_BATCH_BYTES,
            retain_original_line: false,
            storage: StorageStrategy::InMemory,
        }
    }
}

/// One provider backed by a CSV range export
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Provider key
    pub name: ProviderKey,
    /// Range export (`.gz` is decompressed)
    pub path: PathBuf,
    /// Column layout; defaults to the built-in layout for the provider name
    #[serde(default)]
    pub layout: Option<CsvLayout>,
    /// VPN range tables overlaid onto the export, read as one sequence
    #[serde(default)]
    pub vpn_sources: Vec<PathBuf>,
    /// Column layout of the VPN tables
    #[serde(default)]
    pub vpn_layout: VpnLayout,
    /// Overrides for the resolver-wide ingest defaults
    #[serde(default)]
    pub ingest: Option<IngestConfig>,
}

impl ProviderConfig {
    /// Layout to parse the export with
    pub fn resolved_layout(&self) -> Result<CsvLayout> {
        match &self.layout {
            Some(layout) => Ok(layout.clone()),
            None => CsvLayout::for_provider(&self.name)
                .ok_or_else(|| Error::Config(format!("provider {} needs an explicit layout", self.name))),
        }
    }
}

/// A set of providers to build into a resolver
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolverConfig {
    /// Providers in registration order
    pub providers: Vec<ProviderConfig>,
    /// Ingest settings for providers without their own
    #[serde(default)]
    pub defaults: IngestConfig,
}

impl ResolverConfig {
    /// Parse a JSON config
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Load a JSON config file
    ///
    /// Relative source and index paths are resolved against the file's directory.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)?;
        let mut config = Self::from_json_str(&text)?;
        if let Some(base) = path.parent() {
            config.rebase(base);
        }
        Ok(config)
    }

    /// Ingest settings in effect for `provider`
    pub fn ingest_for<'a>(&'a self, provider: &'a ProviderConfig) -> &'a IngestConfig {
        provider.ingest.as_ref().unwrap_or(&self.defaults)
    }

    fn rebase(&mut self, base: &Path) {
        let join = |p: &mut PathBuf| {
            if p.is_relative() && p.as_os_str() != "-" {
                *p = base.join(&*p);
            }
        };
        for ingest in std::iter::once(&mut self.defaults)
            .chain(self.providers.iter_mut().filter_map(|p| p.ingest.as_mut()))
        {
            if let StorageStrategy::File { path, .. } = &mut ingest.storage {
                join(path);
            }
        }
        for provider in &mut self.providers {
            join(&mut provider.path);
            for vpn in &mut provider.vpn_sources {
                join(vpn);
            }
        }
    }
}
