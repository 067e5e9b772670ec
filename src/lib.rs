//! scorta: cache-aside query proxy.
//!
//! Sits between a caller and two backing stores: a relational primary store
//! and a key-value cache store. Read queries are intercepted, keyed
//! deterministically from the query text and bound parameters, and executed
//! under a per-call-resolvable policy:
//!
//! - **cache** (default): primary first; on success, best-effort
//!   write-through; on primary failure, fall back to the cache store.
//! - **skip**: bypass the cache store entirely.
//! - **refresh**: always trust the primary and repopulate the cache on
//!   success.
//!
//! Results served from the cache carry a cache-hit marker in place of the
//! primary store's column metadata, so callers can always tell the two
//! apart.
//!
//! ## Configuration
//!
//! Instance defaults come from `scorta.toml` / `SCORTA__*` environment
//! variables (see [`config`]) and can be overridden per call:
//!
//! ```toml
//! [cache]
//! expire_seconds = 2629746
//! key_prefix = "sql."
//! hash = "fast32"        # fast32 | fast64 | secure | full
//! mode = "cache"         # cache | skip | refresh
//! ```

pub mod config;
pub mod hash;
pub mod keys;
pub mod policy;
pub mod proxy;
pub mod store;
pub mod telemetry;

pub use hash::HashKind;
pub use keys::derive_key;
pub use policy::{CacheMode, CacheOptions, QueryOverrides};
pub use proxy::{ProxyError, QueryProxy, ResultEnvelope, ResultMeta};
pub use store::memory::MemoryCacheStore;
pub use store::postgres::PostgresPrimary;
pub use store::{
    CacheReadError, CacheStore, CacheWriteError, FieldMeta, PrimaryQueryError, PrimaryStore,
    QueryOutput, SqlParam,
};
