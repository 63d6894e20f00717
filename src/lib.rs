//! Georange - IP Range Databases for Geolocation Providers
//!
//! Georange turns vendor range exports (sorted `start,end,...` CSV lines)
//! into lookup indexes, optionally overlays secondary range lists such as
//! VPN tables onto them, and answers "which range covers this address?"
//! across several providers at once.
//!
//! # Quick Start
//!
//! ```rust
//! use georange::builder::{DatabaseBuilder, StorageStrategy};
//! use georange::parser::{CsvLayout, CsvRangeParser, LineParser};
//! use georange::resolver::ResolverBuilder;
//! use georange::{ProviderKey, RawLine};
//!
//! let parser = CsvRangeParser::new(CsvLayout::ip2location_lite());
//! let mut builder = DatabaseBuilder::new(ProviderKey::IP2LOCATION_LITE, &StorageStrategy::InMemory)?;
//! builder.insert(parser.parse(&RawLine::new(1, "1.0.0.0,1.0.0.255,AU,Australia,Queensland,Brisbane"), false)?)?;
//! builder.insert(parser.parse(&RawLine::new(2, "1.0.4.0,1.0.7.255,AU,Australia,Victoria,Melbourne"), false)?)?;
//!
//! let resolver = ResolverBuilder::new()
//!     .register_database(ProviderKey::IP2LOCATION_LITE, builder.finish()?)
//!     .build()?;
//!
//! let hit = resolver.resolve_provider(&ProviderKey::IP2LOCATION_LITE, &"1.0.4.1".parse()?)?;
//! assert_eq!(hit.and_then(|info| info.city().map(str::to_owned)).as_deref(), Some("Melbourne"));
//!
//! // Gaps between ranges are empty results, not errors
//! assert!(resolver.resolve_provider(&ProviderKey::IP2LOCATION_LITE, &"1.0.2.0".parse()?)?.is_none());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! # Key Features
//!
//! - **Floor Lookups**: O(log n) range search over IPv4 and IPv6 in one index
//! - **Two Storage Strategies**: in-memory, or a memory-mapped index file for very large feeds
//! - **Range Decoration**: sweep-line overlay that splits ranges at VPN-table boundaries
//! - **Parallel Ingest**: multi-threaded parsing with strictly ordered insertion
//! - **Gzip Sources**: `.gz` exports are read transparently
//! - **Pluggable Providers**: any `IpDatabase` implementation can join a resolver
//!
//! # Architecture
//!
//! ```text
//! source.csv(.gz) ─→ LineFileReader ─→ parse workers ─→ reorder ─→ DecoratorEngine ─→ DatabaseBuilder
//!                                                                       ↑                     │
//!                                                         DecoratorReader (vpn tables)        ↓
//!                                                                              MemoryDatabase | FileDatabase
//!                                                                                             │
//!                                                                              Resolver ←─────┘
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

// Module declarations
/// Database builder and build listeners
pub mod builder;
pub mod codec;
pub mod config;
pub mod database;
pub mod decorator;
/// Error types for georange operations
pub mod error;
pub mod file_index;
pub mod file_reader;
pub mod info;
pub mod ip;
pub mod parser;
pub mod processing;
pub mod provider;
pub mod record;
pub mod resolver;

// Re-exports for Rust consumers

pub use crate::builder::{BuildListener, DatabaseBuilder, StorageStrategy};
pub use crate::database::{IpDatabase, MemoryDatabase};
pub use crate::error::{Error, Result};
pub use crate::file_index::FileDatabase;
pub use crate::info::{InformationPayload, TriState};
pub use crate::ip::{IpFamily, IpRange, IpValue};
pub use crate::parser::{LineParser, ParseError};
pub use crate::provider::ProviderKey;
pub use crate::record::{RangeRecord, RawLine};
pub use crate::resolver::{Resolver, ResolverBuilder};

// Version information
/// Library version string
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
