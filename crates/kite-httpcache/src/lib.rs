//! Kite HTTP Cache
//!
//! Persistent HTTP response cache for the resource-loading subsystem:
//! per-resource content files plus one consolidated, digest-protected
//! metadata file (the "FAT" file), with RFC 7234 freshness checks and
//! deterministic eviction under configurable size budgets.
//!
//! The cache is single-threaded by design: every operation runs
//! synchronously on the owning thread and leaves the index, the eviction
//! ordering and the running totals mutually consistent before returning.
//! Cache misses and rejected writes are normal outcomes, not errors.

mod cache;
mod codec;
pub mod digest;
mod resource;
mod response;
mod store;

pub use cache::{
    normalize_url, AdmissionPolicy, AdmissionQuery, CacheConfig, Handle, HttpCache,
    FAT_FORMAT_VERSION,
};
pub use codec::{ByteReader, ByteWriter, CodecError};
pub use resource::{CachedResource, CONTENT_SIZE_ALIGNMENT};
pub use response::{RequestMeta, ResponseMeta, SecureLevel, SecureState, SecurityInfo};
pub use store::CONTENT_FILE_EXT;
pub use url::Url;

/// Cache persistence error. Only the FAT file paths surface these;
/// ordinary lookups and content I/O report misses through their return
/// values instead.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("FAT file too small ({0} bytes)")]
    FatTooSmall(usize),

    #[error("FAT digest mismatch")]
    DigestMismatch,

    #[error("unsupported FAT format version {0}")]
    VersionMismatch(u32),
}
