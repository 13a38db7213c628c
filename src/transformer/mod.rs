//! Transformer Engine: adjacency-only request/response transformers and
//! the chains built from them.

pub mod chain;

pub use chain::TransformerChain;

use crate::error::{Result, TimescapeError};
use crate::rid::Rid;
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

/// A transform function over a JSON payload. Returning a boxed future
/// (rather than an `async fn` in a trait) lets callers register plain
/// closures — an `Arc<dyn Fn>` callback type over a trait object, since
/// no other state is needed here.
pub type TransformFn =
    Arc<dyn Fn(serde_json::Value) -> BoxFuture<'static, anyhow::Result<serde_json::Value>> + Send + Sync>;

/// Which of a pair's four functions a call needs: request or response
/// leg, forward (older→newer) or backward (newer→older) direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Leg {
    Request,
    Response,
}

/// One registered edge between two adjacent revisions. Carries all four
/// transform functions so a single registration serves both directions
/// of travel between the pair.
#[derive(Clone)]
pub struct TransformerPair {
    pub from: Rid,
    pub to: Rid,
    pub forward_request: Option<TransformFn>,
    pub forward_response: Option<TransformFn>,
    pub backward_request: Option<TransformFn>,
    pub backward_response: Option<TransformFn>,
    pub immutable: bool,
    pub created_at_ms: i64,
    pub created_by: Option<String>,
}

impl TransformerPair {
    fn pick(&self, leg: Leg, forward: bool) -> Option<&TransformFn> {
        match (leg, forward) {
            (Leg::Request, true) => self.forward_request.as_ref(),
            (Leg::Request, false) => self.backward_request.as_ref(),
            (Leg::Response, true) => self.forward_response.as_ref(),
            (Leg::Response, false) => self.backward_response.as_ref(),
        }
    }
}

impl std::fmt::Debug for TransformerPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransformerPair")
            .field("from", &self.from)
            .field("to", &self.to)
            .field("has_forward_request", &self.forward_request.is_some())
            .field("has_forward_response", &self.forward_response.is_some())
            .field("has_backward_request", &self.backward_request.is_some())
            .field("has_backward_response", &self.backward_response.is_some())
            .field("immutable", &self.immutable)
            .finish()
    }
}

/// Engine configuration: timeout per transformer step and maximum chain
/// length a `build_chain` call is willing to walk.
#[derive(Debug, Clone, Copy)]
pub struct TransformerConfig {
    pub step_timeout: Duration,
    pub max_chain_length: usize,
}

impl Default for TransformerConfig {
    fn default() -> Self {
        Self { step_timeout: Duration::from_secs(5), max_chain_length: 25 }
    }
}

impl TransformerConfig {
    pub fn with_step_timeout(mut self, timeout: Duration) -> Self {
        self.step_timeout = timeout;
        self
    }

    pub fn with_max_chain_length(mut self, max: usize) -> Self {
        self.max_chain_length = max;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_chain_length == 0 {
            return Err(TimescapeError::InvalidFormat("max_chain_length must be > 0".to_string()));
        }
        if self.step_timeout.is_zero() {
            return Err(TimescapeError::InvalidFormat("step_timeout must be > 0".to_string()));
        }
        Ok(())
    }
}

/// Options for a single `transform_request`/`transform_response` call.
#[derive(Debug, Clone, Default)]
pub struct TransformOptions {
    /// Overrides the engine's configured step timeout for this call only.
    pub timeout: Option<Duration>,
    /// On failure, return the original input with the error attached
    /// rather than failing the whole call.
    pub fallback_on_error: bool,
}

/// Result of running a chain's transforms. Always produced — transform
/// failures are reported here, not raised, carrying how far execution
/// got before it stopped.
#[derive(Debug, Clone)]
pub struct TransformOutcome {
    pub data: serde_json::Value,
    pub visited: Vec<Rid>,
    pub error: Option<TimescapeError>,
}

impl TransformOutcome {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Registry of adjacency-only transformer pairs plus the chain builder
/// and executor over them. Pairs are indexed under both orderings of
/// their endpoints so lookup is O(1) regardless of travel direction.
pub struct TransformerEngine {
    pairs: RwLock<HashMap<(Rid, Rid), Arc<TransformerPair>>>,
    config: TransformerConfig,
}

impl TransformerEngine {
    pub fn new() -> Self {
        Self::with_config(TransformerConfig::default())
    }

    pub fn with_config(config: TransformerConfig) -> Self {
        Self { pairs: RwLock::new(HashMap::new()), config }
    }

    pub fn config(&self) -> TransformerConfig {
        self.config
    }

    /// Register a transformer between two adjacent revisions. A pair can
    /// only be registered once it is marked immutable, and only once —
    /// under either ordering of its endpoints.
    pub fn register(&self, pair: TransformerPair) -> Result<()> {
        if !pair.immutable {
            return Err(TimescapeError::ImmutableRequired);
        }
        let forward_key = (pair.from.clone(), pair.to.clone());
        let backward_key = (pair.to.clone(), pair.from.clone());
        let mut pairs = self.pairs.write().expect("transformer lock poisoned");
        if pairs.contains_key(&forward_key) {
            return Err(TimescapeError::AlreadyRegistered(pair.from.to_string(), pair.to.to_string()));
        }
        let shared = Arc::new(pair);
        pairs.insert(forward_key, shared.clone());
        pairs.insert(backward_key, shared);
        Ok(())
    }

    pub fn has(&self, from: &Rid, to: &Rid) -> bool {
        let pairs = self.pairs.read().expect("transformer lock poisoned");
        pairs.contains_key(&(from.clone(), to.clone()))
    }

    pub fn get(&self, from: &Rid, to: &Rid) -> Option<Arc<TransformerPair>> {
        let pairs = self.pairs.read().expect("transformer lock poisoned");
        pairs.get(&(from.clone(), to.clone())).cloned()
    }

    /// Build the linear sequence of revisions to visit between `from`
    /// and `to`, positioning both within `all_versions` sorted by
    /// embedded timestamp and walking forward or backward between their
    /// indices. Fails if either endpoint is absent from `all_versions`
    /// or the walk exceeds the configured maximum chain length.
    pub fn build_chain(&self, from: &Rid, to: &Rid, all_versions: &[Rid]) -> Result<TransformerChain> {
        if from == to {
            return Ok(TransformerChain::empty(from.clone()));
        }

        let mut sorted: Vec<&Rid> = all_versions.iter().collect();
        sorted.sort_by_key(|v| (v.timestamp_seconds(), v.counter()));

        let i = sorted
            .iter()
            .position(|v| *v == from)
            .ok_or_else(|| TimescapeError::NoChain { from: from.to_string(), to: to.to_string() })?;
        let j = sorted
            .iter()
            .position(|v| *v == to)
            .ok_or_else(|| TimescapeError::NoChain { from: from.to_string(), to: to.to_string() })?;

        let versions: Vec<Rid> = if i < j {
            sorted[i..=j].iter().map(|v| (**v).clone()).collect()
        } else {
            sorted[j..=i].iter().rev().map(|v| (**v).clone()).collect()
        };

        if versions.len() - 1 > self.config.max_chain_length {
            return Err(TimescapeError::ChainTooLong { length: versions.len() - 1, max: self.config.max_chain_length });
        }

        Ok(TransformerChain::new(versions))
    }

    pub async fn transform_request(
        &self,
        data: serde_json::Value,
        from: &Rid,
        to: &Rid,
        all_versions: &[Rid],
        opts: &TransformOptions,
    ) -> TransformOutcome {
        self.run(data, from, to, all_versions, Leg::Request, opts).await
    }

    pub async fn transform_response(
        &self,
        data: serde_json::Value,
        from: &Rid,
        to: &Rid,
        all_versions: &[Rid],
        opts: &TransformOptions,
    ) -> TransformOutcome {
        self.run(data, from, to, all_versions, Leg::Response, opts).await
    }

    async fn run(
        &self,
        data: serde_json::Value,
        from: &Rid,
        to: &Rid,
        all_versions: &[Rid],
        leg: Leg,
        opts: &TransformOptions,
    ) -> TransformOutcome {
        let chain = match self.build_chain(from, to, all_versions) {
            Ok(chain) => chain,
            Err(e) => return TransformOutcome { data, visited: Vec::new(), error: Some(e) },
        };

        let timeout = opts.timeout.unwrap_or(self.config.step_timeout);
        let mut current = data.clone();
        let mut visited = vec![chain.from().clone()];

        for (u, v) in chain.steps() {
            let forward = u.timestamp_seconds() < v.timestamp_seconds();
            let pair = match self.get(u, v) {
                Some(pair) => pair,
                None => {
                    let err = TimescapeError::NoTransformer { from: u.to_string(), to: v.to_string() };
                    return self.finish(data, current, visited, err, opts.fallback_on_error);
                }
            };

            if let Some(f) = pair.pick(leg, forward) {
                match run_step(f, current.clone(), timeout).await {
                    Ok(next) => current = next,
                    Err(e) => return self.finish(data, current, visited, e, opts.fallback_on_error),
                }
            }
            visited.push(v.clone());
        }

        TransformOutcome { data: current, visited, error: None }
    }

    fn finish(
        &self,
        original: serde_json::Value,
        partial: serde_json::Value,
        visited: Vec<Rid>,
        error: TimescapeError,
        fallback_on_error: bool,
    ) -> TransformOutcome {
        if fallback_on_error {
            TransformOutcome { data: original, visited, error: Some(error) }
        } else {
            TransformOutcome { data: partial, visited, error: Some(error) }
        }
    }
}

async fn run_step(f: &TransformFn, payload: serde_json::Value, timeout: Duration) -> Result<serde_json::Value> {
    match tokio::time::timeout(timeout, f(payload)).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(TimescapeError::TransformerFailed(e.to_string())),
        Err(_) => Err(TimescapeError::TransformerTimeout(timeout)),
    }
}

impl Default for TransformerEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn passthrough_pair(from: Rid, to: Rid) -> TransformerPair {
        TransformerPair {
            from,
            to,
            forward_request: None,
            forward_response: None,
            backward_request: None,
            backward_response: None,
            immutable: true,
            created_at_ms: 0,
            created_by: None,
        }
    }

    fn rid(secs: u64, slug: &str, counter: u64) -> Rid {
        Rid::new(secs, slug, counter)
    }

    #[test]
    fn register_rejects_mutable_pair() {
        let engine = TransformerEngine::new();
        let mut pair = passthrough_pair(rid(1, "a", 0), rid(2, "a", 0));
        pair.immutable = false;
        let err = engine.register(pair).unwrap_err();
        assert_eq!(err.code(), "IMMUTABLE_REQUIRED");
    }

    #[test]
    fn register_rejects_duplicate_either_ordering() {
        let engine = TransformerEngine::new();
        let v1 = rid(1, "a", 0);
        let v2 = rid(2, "a", 0);
        engine.register(passthrough_pair(v1.clone(), v2.clone())).unwrap();
        let err = engine.register(passthrough_pair(v2.clone(), v1.clone())).unwrap_err();
        assert_eq!(err.code(), "ALREADY_REGISTERED");
    }

    #[test]
    fn get_is_bidirectional() {
        let engine = TransformerEngine::new();
        let v1 = rid(1, "a", 0);
        let v2 = rid(2, "a", 0);
        engine.register(passthrough_pair(v1.clone(), v2.clone())).unwrap();
        assert!(engine.has(&v1, &v2));
        assert!(engine.has(&v2, &v1));
    }

    #[test]
    fn build_chain_same_version_is_empty() {
        let engine = TransformerEngine::new();
        let v1 = rid(1, "a", 0);
        let chain = engine.build_chain(&v1, &v1, &[v1.clone()]).unwrap();
        assert!(chain.is_empty());
    }

    #[test]
    fn build_chain_walks_forward_and_backward() {
        let engine = TransformerEngine::new();
        let v1 = rid(1, "a", 0);
        let v2 = rid(2, "a", 0);
        let v3 = rid(3, "a", 0);
        let all = vec![v1.clone(), v2.clone(), v3.clone()];

        let forward = engine.build_chain(&v1, &v3, &all).unwrap();
        assert_eq!(forward.versions(), &[v1.clone(), v2.clone(), v3.clone()]);

        let backward = engine.build_chain(&v3, &v1, &all).unwrap();
        assert_eq!(backward.versions(), &[v3.clone(), v2.clone(), v1.clone()]);
    }

    #[test]
    fn build_chain_fails_when_endpoint_missing_from_versions() {
        let engine = TransformerEngine::new();
        let v1 = rid(1, "a", 0);
        let v2 = rid(2, "a", 0);
        let err = engine.build_chain(&v1, &v2, &[v1.clone()]).unwrap_err();
        assert_eq!(err.code(), "VERSION_NOT_FOUND");
    }

    #[test]
    fn build_chain_enforces_max_length() {
        let engine = TransformerEngine::with_config(TransformerConfig::default().with_max_chain_length(1));
        let v1 = rid(1, "a", 0);
        let v2 = rid(2, "a", 0);
        let v3 = rid(3, "a", 0);
        let all = vec![v1.clone(), v2.clone(), v3.clone()];

        let err = engine.build_chain(&v1, &v3, &all).unwrap_err();
        assert_eq!(err.code(), "CHAIN_TOO_LONG");
    }

    #[tokio::test]
    async fn transform_request_applies_forward_function_going_forward() {
        let engine = TransformerEngine::new();
        let v1 = rid(1, "a", 0);
        let v2 = rid(2, "a", 0);
        let mut pair = passthrough_pair(v1.clone(), v2.clone());
        pair.forward_request = Some(Arc::new(|value: serde_json::Value| {
            Box::pin(async move {
                let mut obj = value.as_object().cloned().unwrap_or_default();
                obj.insert("touched".into(), serde_json::Value::Bool(true));
                Ok(serde_json::Value::Object(obj))
            })
        }));
        engine.register(pair).unwrap();

        let all = vec![v1.clone(), v2.clone()];
        let outcome = engine
            .transform_request(serde_json::json!({}), &v1, &v2, &all, &TransformOptions::default())
            .await;
        assert!(outcome.is_success());
        assert_eq!(outcome.data["touched"], serde_json::Value::Bool(true));
    }

    #[tokio::test]
    async fn transform_request_applies_backward_function_going_backward() {
        let engine = TransformerEngine::new();
        let v1 = rid(1, "a", 0);
        let v2 = rid(2, "a", 0);
        let mut pair = passthrough_pair(v1.clone(), v2.clone());
        pair.backward_request = Some(Arc::new(|value: serde_json::Value| {
            Box::pin(async move {
                let mut obj = value.as_object().cloned().unwrap_or_default();
                obj.insert("downgraded".into(), serde_json::Value::Bool(true));
                Ok(serde_json::Value::Object(obj))
            })
        }));
        engine.register(pair).unwrap();

        let all = vec![v1.clone(), v2.clone()];
        let outcome = engine
            .transform_request(serde_json::json!({}), &v2, &v1, &all, &TransformOptions::default())
            .await;
        assert!(outcome.is_success());
        assert_eq!(outcome.data["downgraded"], serde_json::Value::Bool(true));
    }

    #[tokio::test]
    async fn missing_function_passes_data_through_unchanged() {
        let engine = TransformerEngine::new();
        let v1 = rid(1, "a", 0);
        let v2 = rid(2, "a", 0);
        engine.register(passthrough_pair(v1.clone(), v2.clone())).unwrap();

        let all = vec![v1.clone(), v2.clone()];
        let outcome = engine
            .transform_request(serde_json::json!({"x": 1}), &v1, &v2, &all, &TransformOptions::default())
            .await;
        assert!(outcome.is_success());
        assert_eq!(outcome.data, serde_json::json!({"x": 1}));
    }

    #[tokio::test]
    async fn transform_step_timeout_surfaces_as_error() {
        let engine = TransformerEngine::with_config(
            TransformerConfig::default().with_step_timeout(Duration::from_millis(10)),
        );
        let v1 = rid(1, "a", 0);
        let v2 = rid(2, "a", 0);
        let mut pair = passthrough_pair(v1.clone(), v2.clone());
        pair.forward_request = Some(Arc::new(|value: serde_json::Value| {
            Box::pin(async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok(value)
            })
        }));
        engine.register(pair).unwrap();

        let all = vec![v1.clone(), v2.clone()];
        let outcome = engine
            .transform_request(serde_json::json!({}), &v1, &v2, &all, &TransformOptions::default())
            .await;
        assert_eq!(outcome.error.unwrap().code(), "TRANSFORMER_TIMEOUT");
    }

    #[tokio::test]
    async fn fallback_on_error_returns_original_data_with_error_attached() {
        let engine = TransformerEngine::new();
        let v1 = rid(1, "a", 0);
        let v2 = rid(2, "a", 0);
        let mut pair = passthrough_pair(v1.clone(), v2.clone());
        pair.forward_request = Some(Arc::new(|_value: serde_json::Value| {
            Box::pin(async move { Err(anyhow::anyhow!("boom")) })
        }));
        engine.register(pair).unwrap();

        let all = vec![v1.clone(), v2.clone()];
        let original = serde_json::json!({"orig": true});
        let opts = TransformOptions { timeout: None, fallback_on_error: true };
        let outcome = engine.transform_request(original.clone(), &v1, &v2, &all, &opts).await;
        assert_eq!(outcome.data, original);
        assert_eq!(outcome.error.unwrap().code(), "TRANSFORMER_FAILED");
    }
}
