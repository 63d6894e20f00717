//! Multi-provider lookup
//!
//! A [`Resolver`] answers one IP query against every registered provider at
//! once. Providers are either existing [`IpDatabase`] implementations (for
//! example a wrapped vendor binary reader) or raw line sources that are
//! ingested into a fresh index when the resolver is built.
//!
//! # Example
//!
//! ```rust,no_run
//! use georange::resolver::{LineSource, ResolverBuilder};
//! use georange::parser::{CsvLayout, CsvRangeParser};
//! use georange::ProviderKey;
//! use std::sync::Arc;
//!
//! let parser = Arc::new(CsvRangeParser::new(CsvLayout::ip2location_lite()));
//! let resolver = ResolverBuilder::new()
//!     .register(
//!         ProviderKey::IP2LOCATION_LITE,
//!         LineSource::new("IP2LOCATION-LITE-DB3.CSV.gz", parser).into(),
//!     )
//!     .build()?;
//!
//! for (provider, hit) in resolver.resolve_str("1.0.4.1")? {
//!     println!("{}: {:?}", provider, hit.and_then(|info| info.city().map(str::to_owned)));
//! }
//! # Ok::<(), georange::Error>(())
//! ```

use crate::builder::{BuildListener, DatabaseBuilder, FailFastListener, StorageStrategy};
use crate::config::{IngestConfig, ResolverConfig};
use crate::database::IpDatabase;
use crate::decorator::source::{DecoratorLineParser, DecoratorReader, VpnCsvParser};
use crate::decorator::{DecoratorEngine, VpnDecoration};
use crate::error::{Error, Result};
use crate::info::{InformationPayload, TriState};
use crate::ip::IpValue;
use crate::parser::{CsvRangeParser, LineParser};
use crate::processing::{self, Interrupt, LineFileReader};
use crate::provider::ProviderKey;
use rayon::prelude::*;
use rustc_hash::{FxHashMap, FxHashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// A raw line source to ingest into a provider index
#[derive(Clone)]
pub struct LineSource {
    /// Source file (`.gz` is decompressed, `-` is stdin)
    pub path: PathBuf,
    /// Line parser for the source format
    pub parser: Arc<dyn LineParser>,
    /// Worker, batching and storage settings
    pub ingest: IngestConfig,
    /// VPN tables overlaid onto the records, merged by key
    pub vpn_sources: Vec<PathBuf>,
    /// Parser for the VPN tables
    pub vpn_parser: Arc<dyn DecoratorLineParser<TriState>>,
    /// Build listener
    pub listener: Arc<dyn BuildListener>,
}

impl LineSource {
    /// Source with default ingest settings and no decoration
    pub fn new(path: impl Into<PathBuf>, parser: Arc<dyn LineParser>) -> Self {
        Self {
            path: path.into(),
            parser,
            ingest: IngestConfig::default(),
            vpn_sources: Vec::new(),
            vpn_parser: Arc::new(VpnCsvParser::default()),
            listener: Arc::new(FailFastListener),
        }
    }

    /// Use different ingest settings
    pub fn with_ingest(mut self, ingest: IngestConfig) -> Self {
        self.ingest = ingest;
        self
    }

    /// Overlay VPN tables
    pub fn with_vpn_sources(mut self, paths: Vec<PathBuf>, parser: Arc<dyn DecoratorLineParser<TriState>>) -> Self {
        self.vpn_sources = paths;
        self.vpn_parser = parser;
        self
    }

    /// Replace the default fail-fast listener
    pub fn with_listener(mut self, listener: Arc<dyn BuildListener>) -> Self {
        self.listener = listener;
        self
    }

    fn build(self, provider: ProviderKey, interrupt: &Interrupt) -> Result<Arc<dyn IpDatabase>> {
        let mut builder = DatabaseBuilder::new(provider, &self.ingest.storage)?.with_listener(self.listener);
        let reader = LineFileReader::new(&self.path, self.ingest.batch_bytes)?;

        if self.vpn_sources.is_empty() {
            processing::ingest(reader, self.parser, &mut builder, &self.ingest, None, interrupt)?;
        } else {
            let vpn = DecoratorReader::from_files(self.vpn_sources.as_slice(), self.vpn_parser)?;
            let mut engine = DecoratorEngine::new(vec![vpn], VpnDecoration);
            processing::ingest(reader, self.parser, &mut builder, &self.ingest, Some(&mut engine), interrupt)?;
        }
        builder.finish()
    }
}

impl fmt::Debug for LineSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LineSource")
            .field("path", &self.path)
            .field("ingest", &self.ingest)
            .field("vpn_sources", &self.vpn_sources)
            .finish_non_exhaustive()
    }
}

/// Backing data of one provider
#[derive(Clone)]
pub enum ProviderSource {
    /// A ready-made database
    Database(Arc<dyn IpDatabase>),
    /// A line source ingested at build time
    Lines(LineSource),
}

impl From<LineSource> for ProviderSource {
    fn from(source: LineSource) -> Self {
        ProviderSource::Lines(source)
    }
}

impl From<Arc<dyn IpDatabase>> for ProviderSource {
    fn from(db: Arc<dyn IpDatabase>) -> Self {
        ProviderSource::Database(db)
    }
}

/// Collects provider sources and builds a [`Resolver`]
#[derive(Default)]
pub struct ResolverBuilder {
    sources: Vec<(ProviderKey, ProviderSource)>,
    interrupt: Interrupt,
}

impl ResolverBuilder {
    /// Builder with no providers
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider
    ///
    /// Duplicate keys are reported by [`build`](Self::build).
    pub fn register(mut self, provider: ProviderKey, source: ProviderSource) -> Self {
        self.sources.push((provider, source));
        self
    }

    /// Register a ready-made database
    pub fn register_database(self, provider: ProviderKey, db: Arc<dyn IpDatabase>) -> Self {
        self.register(provider, ProviderSource::Database(db))
    }

    /// Token that aborts every line-source build when set
    pub fn with_interrupt(mut self, interrupt: Interrupt) -> Self {
        self.interrupt = interrupt;
        self
    }

    /// Builder for every provider in a config
    pub fn from_config(config: &ResolverConfig) -> Result<Self> {
        let mut builder = Self::new();
        for provider in &config.providers {
            let parser = Arc::new(CsvRangeParser::new(provider.resolved_layout()?));
            let source = LineSource::new(provider.path.clone(), parser)
                .with_ingest(config.ingest_for(provider).clone())
                .with_vpn_sources(
                    provider.vpn_sources.clone(),
                    Arc::new(VpnCsvParser::new(provider.vpn_layout.clone())),
                );
            builder = builder.register(provider.name.clone(), source.into());
        }
        Ok(builder)
    }

    /// Build every provider
    ///
    /// Registration problems are reported before any source is read. Line
    /// sources are ingested in parallel; the first failure in registration
    /// order is returned.
    ///
    /// # Errors
    ///
    /// - [`Error::NoProviders`] when nothing was registered
    /// - [`Error::DuplicateProvider`] when a key was registered twice
    /// - [`Error::Config`] when two line sources would write the same index file
    /// - any build error of a line source
    pub fn build(self) -> Result<Resolver> {
        if self.sources.is_empty() {
            return Err(Error::NoProviders);
        }
        let mut seen = FxHashSet::default();
        let mut index_owners: FxHashMap<&Path, &ProviderKey> = FxHashMap::default();
        for (provider, source) in &self.sources {
            if !seen.insert(provider) {
                return Err(Error::DuplicateProvider(provider.clone()));
            }
            if let ProviderSource::Lines(LineSource {
                ingest: IngestConfig {
                    storage: StorageStrategy::File { path, .. },
                    ..
                },
                ..
            }) = source
            {
                if let Some(owner) = index_owners.insert(path.as_path(), provider) {
                    return Err(Error::Config(format!(
                        "providers {} and {} both write the index {}",
                        owner,
                        provider,
                        path.display()
                    )));
                }
            }
        }

        log::debug!("building {} providers", self.sources.len());
        let interrupt = self.interrupt;
        let built: Vec<Result<(ProviderKey, Arc<dyn IpDatabase>)>> = self
            .sources
            .into_par_iter()
            .map(|(provider, source)| {
                let db = match source {
                    ProviderSource::Database(db) => db,
                    ProviderSource::Lines(lines) => lines.build(provider.clone(), &interrupt)?,
                };
                Ok((provider, db))
            })
            .collect();

        let mut order = Vec::with_capacity(built.len());
        let mut databases = FxHashMap::default();
        for result in built {
            let (provider, db) = result?;
            order.push(provider.clone());
            databases.insert(provider, db);
        }
        Ok(Resolver { order, databases })
    }
}

/// Frozen set of provider databases
///
/// Lookups take `&self` and never fail, so a resolver can be shared across
/// threads behind an `Arc`.
pub struct Resolver {
    order: Vec<ProviderKey>,
    databases: FxHashMap<ProviderKey, Arc<dyn IpDatabase>>,
}

impl Resolver {
    /// Query every provider
    ///
    /// The map has one entry per provider; `None` means the provider has no
    /// range covering `ip`.
    pub fn resolve(&self, ip: &IpValue) -> FxHashMap<ProviderKey, Option<InformationPayload>> {
        self.databases
            .iter()
            .map(|(provider, db)| (provider.clone(), db.get(ip)))
            .collect()
    }

    /// Query every provider with an address in text form
    pub fn resolve_str(&self, ip: &str) -> Result<FxHashMap<ProviderKey, Option<InformationPayload>>> {
        let ip: IpValue = ip.parse().map_err(|_| Error::InvalidAddress(ip.to_string()))?;
        Ok(self.resolve(&ip))
    }

    /// Query one provider
    ///
    /// # Errors
    ///
    /// [`Error::ProviderUnavailable`] when `provider` was never registered;
    /// an uncovered address is `Ok(None)`.
    pub fn resolve_provider(&self, provider: &ProviderKey, ip: &IpValue) -> Result<Option<InformationPayload>> {
        self.databases
            .get(provider)
            .map(|db| db.get(ip))
            .ok_or_else(|| Error::ProviderUnavailable(provider.clone()))
    }

    /// Registered providers in registration order
    pub fn providers(&self) -> &[ProviderKey] {
        &self.order
    }

    /// Database of one provider
    pub fn database(&self, provider: &ProviderKey) -> Option<&Arc<dyn IpDatabase>> {
        self.databases.get(provider)
    }

    /// Number of providers
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Whether no providers are registered (never true for a built resolver)
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

impl fmt::Debug for Resolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolver").field("providers", &self.order).finish()
    }
}
