//! Query orchestration: the cache-aside state machine and its call surfaces.
//!
//! A [`QueryProxy`] sits between a caller and the two backing stores. Each
//! invocation resolves the caching policy, derives the cache key, and runs at
//! most two sequential external operations: the primary query, then (mode and
//! outcome permitting) one cache read or write. The proxy holds no locks and
//! shares nothing mutable between concurrent invocations beyond the read-only
//! defaults template.

use std::sync::Arc;
use std::time::Instant;

use metrics::{counter, histogram};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::keys::derive_key;
use crate::policy::{CacheMode, CacheOptions, QueryOverrides};
use crate::store::{
    CacheReadError, CacheStore, FieldMeta, PrimaryQueryError, PrimaryStore, QueryOutput, SqlParam,
};

pub(crate) const METRIC_FALLBACK_HIT: &str = "scorta_fallback_hit_total";
pub(crate) const METRIC_FALLBACK_MISS: &str = "scorta_fallback_miss_total";
pub(crate) const METRIC_WRITE: &str = "scorta_cache_write_total";
pub(crate) const METRIC_WRITE_ERROR: &str = "scorta_cache_write_error_total";
pub(crate) const METRIC_WRITE_SKIPPED: &str = "scorta_cache_write_skipped_total";
pub(crate) const METRIC_PRIMARY_QUERY_MS: &str = "scorta_primary_query_ms";

/// Failure surfaced to the caller.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// The primary store failed and the resolved mode does not fall back.
    #[error(transparent)]
    Primary(#[from] PrimaryQueryError),
    /// The primary store failed and the cache fallback failed too. Carries
    /// the derived key so the caller can still tell the fallback path was
    /// taken.
    #[error("cache fallback for key `{key}` failed: {source}")]
    CacheFallback {
        key: String,
        source: CacheReadError,
    },
}

impl ProxyError {
    fn cache_fallback(key: &str, source: CacheReadError) -> Self {
        Self::CacheFallback {
            key: key.to_string(),
            source,
        }
    }
}

/// Where the payload of a [`ResultEnvelope`] came from.
///
/// The cache-hit marker is mutually exclusive with genuine primary-store
/// field metadata; it is the only way to distinguish a cache-served result
/// from a primary-served one.
#[derive(Debug, Clone, PartialEq)]
pub enum ResultMeta {
    /// Served by the primary store; carries its column descriptors.
    Fields(Vec<FieldMeta>),
    /// Served (or attempted) from the cache store under this key.
    CacheHit { key: String },
}

/// What a query invocation returns: rows plus provenance metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultEnvelope {
    /// Primary rows, the cache-restored equivalent, or `Value::Null` on a
    /// fallback soft miss.
    pub rows: Value,
    pub meta: ResultMeta,
}

impl ResultEnvelope {
    fn from_primary(output: QueryOutput) -> Self {
        Self {
            rows: output.rows,
            meta: ResultMeta::Fields(output.fields),
        }
    }

    fn from_cache(rows: Value, key: String) -> Self {
        Self {
            rows,
            meta: ResultMeta::CacheHit { key },
        }
    }

    pub fn served_from_cache(&self) -> bool {
        matches!(self.meta, ResultMeta::CacheHit { .. })
    }

    /// Cache key, when the payload was served from the cache store.
    pub fn cache_key(&self) -> Option<&str> {
        match &self.meta {
            ResultMeta::CacheHit { key } => Some(key),
            ResultMeta::Fields(_) => None,
        }
    }

    /// Column descriptors, when the payload came from the primary store.
    pub fn fields(&self) -> Option<&[FieldMeta]> {
        match &self.meta {
            ResultMeta::Fields(fields) => Some(fields),
            ResultMeta::CacheHit { .. } => None,
        }
    }
}

/// Outcome of a best-effort write-through. Failures are logged and counted
/// but never surfaced; this type exists so the suppression is visible rather
/// than an empty error handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WriteOutcome {
    Written,
    SkippedUnchanged,
    Failed,
}

/// Cache-aside proxy over a primary store and a cache store.
///
/// The store handles are supplied externally and outlive the proxy; the
/// defaults template is immutable after construction.
pub struct QueryProxy<P, C> {
    primary: Arc<P>,
    cache: Arc<C>,
    defaults: CacheOptions,
    write_skip_unchanged: bool,
}

impl<P: PrimaryStore, C: CacheStore> QueryProxy<P, C> {
    pub fn new(primary: Arc<P>, cache: Arc<C>) -> Self {
        Self::with_defaults(primary, cache, CacheOptions::default())
    }

    pub fn with_defaults(primary: Arc<P>, cache: Arc<C>, defaults: CacheOptions) -> Self {
        Self {
            primary,
            cache,
            defaults,
            write_skip_unchanged: false,
        }
    }

    /// When enabled, write-through probes the cache first and skips the
    /// write when the serialized payload is byte-identical to the cached
    /// value. The probe is best-effort: probe failures degrade to a normal
    /// write attempt. Off by default, keeping the unconditional write-through
    /// of the reference behavior.
    pub fn write_skip_unchanged(mut self, enabled: bool) -> Self {
        self.write_skip_unchanged = enabled;
        self
    }

    pub fn defaults(&self) -> &CacheOptions {
        &self.defaults
    }

    /// Future-style entry point using the instance defaults.
    pub async fn query(
        &self,
        sql: &str,
        params: &[SqlParam],
    ) -> Result<ResultEnvelope, ProxyError> {
        self.query_with(sql, params, &QueryOverrides::default()).await
    }

    /// Future-style entry point with per-call overrides.
    pub async fn query_with(
        &self,
        sql: &str,
        params: &[SqlParam],
        overrides: &QueryOverrides,
    ) -> Result<ResultEnvelope, ProxyError> {
        let options = self.defaults.resolve(overrides);
        let key = derive_key(sql, params, &options);
        debug!(key = %key, mode = ?options.mode, "executing query through proxy");

        match options.mode {
            CacheMode::Skip => self.run_skip(sql, params).await,
            CacheMode::Refresh => self.run_refresh(sql, params, &key, &options).await,
            CacheMode::Cache => self.run_cache_aside(sql, params, &key, &options).await,
        }
    }

    /// Completion-style entry point: identical policy semantics to
    /// [`QueryProxy::query_with`], delivered to a handler invoked exactly
    /// once instead of through the returned future.
    pub async fn query_with_callback<F>(
        &self,
        sql: &str,
        params: &[SqlParam],
        overrides: &QueryOverrides,
        on_complete: F,
    ) where
        F: FnOnce(Result<ResultEnvelope, ProxyError>) + Send,
    {
        on_complete(self.query_with(sql, params, overrides).await);
    }

    async fn run_primary(
        &self,
        sql: &str,
        params: &[SqlParam],
    ) -> Result<QueryOutput, PrimaryQueryError> {
        let started_at = Instant::now();
        let result = self.primary.query(sql, params).await;
        histogram!(METRIC_PRIMARY_QUERY_MS).record(started_at.elapsed().as_secs_f64() * 1000.0);
        result
    }

    async fn run_skip(
        &self,
        sql: &str,
        params: &[SqlParam],
    ) -> Result<ResultEnvelope, ProxyError> {
        let output = self.run_primary(sql, params).await?;
        Ok(ResultEnvelope::from_primary(output))
    }

    async fn run_refresh(
        &self,
        sql: &str,
        params: &[SqlParam],
        key: &str,
        options: &CacheOptions,
    ) -> Result<ResultEnvelope, ProxyError> {
        let output = self.run_primary(sql, params).await?;
        let outcome = self.write_through(key, &output.rows, options).await;
        debug!(key = %key, outcome = ?outcome, "refresh write-through completed");
        Ok(ResultEnvelope::from_primary(output))
    }

    async fn run_cache_aside(
        &self,
        sql: &str,
        params: &[SqlParam],
        key: &str,
        options: &CacheOptions,
    ) -> Result<ResultEnvelope, ProxyError> {
        match self.run_primary(sql, params).await {
            Ok(output) => {
                let outcome = self.write_through(key, &output.rows, options).await;
                debug!(key = %key, outcome = ?outcome, "write-through after primary success");
                Ok(ResultEnvelope::from_primary(output))
            }
            Err(primary_err) => {
                warn!(
                    key = %key,
                    error = %primary_err,
                    "primary store failed; falling back to cache"
                );
                self.serve_from_cache(key).await
            }
        }
    }

    async fn serve_from_cache(&self, key: &str) -> Result<ResultEnvelope, ProxyError> {
        match self.cache.get(key).await {
            Ok(Some(payload)) => match serde_json::from_str::<Value>(&payload) {
                Ok(rows) => {
                    counter!(METRIC_FALLBACK_HIT).increment(1);
                    Ok(ResultEnvelope::from_cache(rows, key.to_string()))
                }
                Err(err) => Err(ProxyError::cache_fallback(
                    key,
                    CacheReadError::new(format!("cached payload is not valid JSON: {err}")),
                )),
            },
            // Soft miss: degraded-availability path with nothing cached yet.
            Ok(None) => {
                counter!(METRIC_FALLBACK_MISS).increment(1);
                Ok(ResultEnvelope::from_cache(Value::Null, key.to_string()))
            }
            Err(read_err) => Err(ProxyError::cache_fallback(key, read_err)),
        }
    }

    async fn write_through(&self, key: &str, rows: &Value, options: &CacheOptions) -> WriteOutcome {
        let payload = rows.to_string();

        if self.write_skip_unchanged
            && matches!(self.cache.get(key).await, Ok(Some(existing)) if existing == payload)
        {
            counter!(METRIC_WRITE_SKIPPED).increment(1);
            return WriteOutcome::SkippedUnchanged;
        }

        match self.cache.set(key, &payload, options.expire()).await {
            Ok(()) => {
                counter!(METRIC_WRITE).increment(1);
                WriteOutcome::Written
            }
            Err(err) => {
                counter!(METRIC_WRITE_ERROR).increment(1);
                warn!(
                    key = %key,
                    error = %err,
                    "cache write failed; result still served from primary"
                );
                WriteOutcome::Failed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use serde_json::json;

    use super::*;
    use crate::store::CacheWriteError;

    struct StubPrimary {
        outcome: Result<QueryOutput, String>,
    }

    #[async_trait]
    impl PrimaryStore for StubPrimary {
        async fn query(
            &self,
            _sql: &str,
            _params: &[SqlParam],
        ) -> Result<QueryOutput, PrimaryQueryError> {
            self.outcome.clone().map_err(PrimaryQueryError::new)
        }
    }

    #[derive(Default)]
    struct StubCache {
        entries: Mutex<HashMap<String, String>>,
        get_calls: AtomicUsize,
        set_calls: AtomicUsize,
        fail_reads: bool,
        fail_writes: bool,
    }

    impl StubCache {
        fn seeded(key: &str, value: &str) -> Self {
            let cache = Self::default();
            cache
                .entries
                .lock()
                .expect("entries lock")
                .insert(key.to_string(), value.to_string());
            cache
        }
    }

    #[async_trait]
    impl CacheStore for StubCache {
        async fn get(&self, key: &str) -> Result<Option<String>, CacheReadError> {
            self.get_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_reads {
                return Err(CacheReadError::new("injected read failure"));
            }
            Ok(self.entries.lock().expect("entries lock").get(key).cloned())
        }

        async fn set(
            &self,
            key: &str,
            value: &str,
            _expire: Duration,
        ) -> Result<(), CacheWriteError> {
            self.set_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_writes {
                return Err(CacheWriteError::new("injected write failure"));
            }
            self.entries
                .lock()
                .expect("entries lock")
                .insert(key.to_string(), value.to_string());
            Ok(())
        }
    }

    fn sample_output() -> QueryOutput {
        QueryOutput {
            rows: json!([{"id": 1}]),
            fields: vec![FieldMeta {
                name: "id".to_string(),
                type_name: "INT4".to_string(),
            }],
        }
    }

    fn proxy_over(
        primary: StubPrimary,
        cache: StubCache,
    ) -> QueryProxy<StubPrimary, StubCache> {
        QueryProxy::new(Arc::new(primary), Arc::new(cache))
    }

    #[tokio::test]
    async fn write_through_reports_written() {
        let proxy = proxy_over(
            StubPrimary {
                outcome: Ok(sample_output()),
            },
            StubCache::default(),
        );
        let outcome = proxy
            .write_through("k", &json!([{"id": 1}]), &CacheOptions::default())
            .await;
        assert_eq!(outcome, WriteOutcome::Written);
    }

    #[tokio::test]
    async fn write_through_swallows_failures() {
        let proxy = proxy_over(
            StubPrimary {
                outcome: Ok(sample_output()),
            },
            StubCache {
                fail_writes: true,
                ..StubCache::default()
            },
        );
        let outcome = proxy
            .write_through("k", &json!([]), &CacheOptions::default())
            .await;
        assert_eq!(outcome, WriteOutcome::Failed);
    }

    #[tokio::test]
    async fn write_through_skips_unchanged_payload_when_enabled() {
        let rows = json!([{"id": 1}]);
        let proxy = proxy_over(
            StubPrimary {
                outcome: Ok(sample_output()),
            },
            StubCache::seeded("k", &rows.to_string()),
        )
        .write_skip_unchanged(true);

        let outcome = proxy.write_through("k", &rows, &CacheOptions::default()).await;
        assert_eq!(outcome, WriteOutcome::SkippedUnchanged);
        assert_eq!(proxy.cache.set_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn write_through_writes_changed_payload_when_skip_enabled() {
        let proxy = proxy_over(
            StubPrimary {
                outcome: Ok(sample_output()),
            },
            StubCache::seeded("k", "[{\"id\":2}]"),
        )
        .write_skip_unchanged(true);

        let outcome = proxy
            .write_through("k", &json!([{"id": 1}]), &CacheOptions::default())
            .await;
        assert_eq!(outcome, WriteOutcome::Written);
    }

    #[tokio::test]
    async fn skip_unchanged_probe_failure_degrades_to_write() {
        let proxy = proxy_over(
            StubPrimary {
                outcome: Ok(sample_output()),
            },
            StubCache {
                fail_reads: true,
                ..StubCache::default()
            },
        )
        .write_skip_unchanged(true);

        let outcome = proxy
            .write_through("k", &json!([]), &CacheOptions::default())
            .await;
        assert_eq!(outcome, WriteOutcome::Written);
    }

    #[tokio::test]
    async fn probe_is_not_issued_when_knob_is_off() {
        let proxy = proxy_over(
            StubPrimary {
                outcome: Ok(sample_output()),
            },
            StubCache::default(),
        );
        let _ = proxy
            .write_through("k", &json!([]), &CacheOptions::default())
            .await;
        assert_eq!(proxy.cache.get_calls.load(Ordering::SeqCst), 0);
        assert_eq!(proxy.cache.set_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn corrupt_cached_payload_surfaces_as_fallback_error() {
        let proxy = proxy_over(
            StubPrimary {
                outcome: Err("primary down".to_string()),
            },
            StubCache::seeded("sql.q[]", "not json"),
        );
        let overrides = QueryOverrides {
            hash: Some(crate::hash::HashKind::Full),
            ..QueryOverrides::default()
        };
        let err = proxy
            .query_with("q", &[], &overrides)
            .await
            .expect_err("corrupt payload rejected");
        assert!(matches!(err, ProxyError::CacheFallback { ref key, .. } if key == "sql.q[]"));
    }

    #[tokio::test]
    async fn callback_adapter_invokes_handler_exactly_once() {
        let proxy = proxy_over(
            StubPrimary {
                outcome: Ok(sample_output()),
            },
            StubCache::default(),
        );
        let delivered = Mutex::new(Vec::new());
        proxy
            .query_with_callback("q", &[], &QueryOverrides::default(), |result| {
                delivered
                    .lock()
                    .expect("delivered lock")
                    .push(result.expect("query succeeds"));
            })
            .await;

        let delivered = delivered.into_inner().expect("delivered lock");
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].rows, json!([{"id": 1}]));
    }
}
