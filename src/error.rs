/// Error types for the georange library
use crate::ip::IpValue;
use crate::parser::ParseError;
use crate::provider::ProviderKey;

/// Result type alias for georange operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for building and resolving range databases
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A single raw line could not be turned into a range record
    #[error(transparent)]
    Parse(#[from] ParseError),

    /// A range record did not start after the end of the previous one
    #[error("{provider}: line {line} out of order: start {start} does not follow {previous}")]
    OutOfOrder {
        /// Provider being built
        provider: ProviderKey,
        /// Source line number of the offending record
        line: u64,
        /// End of the previously inserted range
        previous: IpValue,
        /// Start of the rejected range
        start: IpValue,
    },

    /// Ingestion was cooperatively interrupted before the build finished
    #[error("{provider}: build interrupted")]
    Interrupted {
        /// Provider whose build was aborted
        provider: ProviderKey,
    },

    /// The builder was already finished
    #[error("{provider}: builder already finished")]
    BuilderFinished {
        /// Provider whose builder was frozen
        provider: ProviderKey,
    },

    /// Two sources were registered under the same provider key
    #[error("duplicate provider: {0}")]
    DuplicateProvider(ProviderKey),

    /// A resolver was built without any providers
    #[error("no providers registered")]
    NoProviders,

    /// A query referenced a provider that was never registered
    #[error("provider unavailable: {0}")]
    ProviderUnavailable(ProviderKey),

    /// Range bounds are reversed or belong to different address families
    #[error("invalid range {start} - {end}")]
    InvalidRange {
        /// Lower bound
        start: IpValue,
        /// Upper bound
        end: IpValue,
    },

    /// Text could not be parsed as an IP address
    #[error("invalid address: {0:?}")]
    InvalidAddress(String),

    /// Binary key or payload encoding error
    #[error("codec error: {0}")]
    Codec(String),

    /// A persisted index failed validation
    #[error("invalid index: {0}")]
    InvalidIndex(String),

    /// Configuration could not be applied
    #[error("config error: {0}")]
    Config(String),

    /// An I/O error occurred
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// A JSON (de)serialization error
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}
