//! Store capabilities consumed by the proxy.
//!
//! The proxy treats both backing stores as abstract capabilities it does not
//! implement: a relational primary store that executes queries, and a
//! key-value cache store with expiring entries. Adapters for Postgres
//! ([`postgres::PostgresPrimary`]) and an in-process TTL cache
//! ([`memory::MemoryCacheStore`]) live in this module's children.

mod lock;
pub mod memory;
pub mod postgres;

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

/// A positional bind parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlParam {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl SqlParam {
    /// JSON scalar used in the canonical payload serialization.
    pub fn to_json(&self) -> Value {
        match self {
            SqlParam::Null => Value::Null,
            SqlParam::Bool(value) => Value::Bool(*value),
            SqlParam::Int(value) => Value::from(*value),
            SqlParam::Float(value) => Value::from(*value),
            SqlParam::Text(value) => Value::String(value.clone()),
        }
    }
}

impl From<bool> for SqlParam {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for SqlParam {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<f64> for SqlParam {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<&str> for SqlParam {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for SqlParam {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

/// Column descriptor reported by the primary store.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldMeta {
    pub name: String,
    pub type_name: String,
}

/// Result of a primary-store query: rows as a JSON array plus column metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryOutput {
    pub rows: Value,
    pub fields: Vec<FieldMeta>,
}

/// Primary store execution failure: syntax, connectivity, timeout,
/// undifferentiated from the proxy's perspective.
#[derive(Debug, Error)]
#[error("primary query failed: {message}")]
pub struct PrimaryQueryError {
    message: String,
}

impl PrimaryQueryError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Cache store read failure. Surfaced to the caller on the fallback path.
#[derive(Debug, Error)]
#[error("cache read failed: {message}")]
pub struct CacheReadError {
    message: String,
}

impl CacheReadError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Cache store write failure. Always swallowed by the orchestrator; cache
/// population is not required for correctness of the primary-backed response.
#[derive(Debug, Error)]
#[error("cache write failed: {message}")]
pub struct CacheWriteError {
    message: String,
}

impl CacheWriteError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// The authoritative relational data source.
#[async_trait]
pub trait PrimaryStore: Send + Sync {
    async fn query(
        &self,
        sql: &str,
        params: &[SqlParam],
    ) -> Result<QueryOutput, PrimaryQueryError>;
}

/// The key-value store used as a fast, potentially stale secondary source.
///
/// Entry expiry is owned entirely by the store; the proxy only passes the
/// resolved lifetime along with each write.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheReadError>;
    async fn set(&self, key: &str, value: &str, expire: Duration) -> Result<(), CacheWriteError>;
}
