//! Integration facade: stateless glue that drives resolve → record-hit →
//! transform-in → (host handler) → transform-out for a single request.
//!
//! Everything else in this crate is a component with its own state; this
//! module owns none beyond `Arc` handles to those components.

use crate::error::TimescapeError;
use crate::metrics::MetricsSink;
use crate::registry::VersionRegistry;
use crate::resolver::{Resolution, Source, VersionResolver};
use crate::rid::Rid;
use crate::transformer::{TransformOptions, TransformerEngine};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

/// JSON body shape for a resolution failure.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// A resolution failure paired with the HTTP status Integration maps it to.
#[derive(Debug, Clone)]
pub struct ResolutionFailure {
    pub status: u16,
    pub body: ErrorResponse,
}

/// Everything `finish_response` needs to run the reverse leg of a
/// transform once the host handler has produced a response body.
pub struct RequestContext {
    pub resolution: Resolution,
    pub handler_version: Rid,
    pub path: String,
    pub transformed_body: serde_json::Value,
    pub transform_error: Option<TimescapeError>,
}

impl RequestContext {
    /// Resolution metadata the host attaches to its own per-request
    /// context under a well-known key. This crate has no opinion on what
    /// that context type looks like, so it hands back the data rather
    /// than attaching it anywhere itself.
    pub fn resolution(&self) -> &Resolution {
        &self.resolution
    }
}

/// Drives the per-request flow across the Resolver, Registry, and
/// Transformer Engine.
pub struct Integration {
    registry: Arc<VersionRegistry>,
    resolver: Arc<VersionResolver>,
    transformer: Arc<TransformerEngine>,
    metrics: Arc<dyn MetricsSink>,
    transforms_enabled: bool,
}

impl Integration {
    pub fn new(
        registry: Arc<VersionRegistry>,
        resolver: Arc<VersionResolver>,
        transformer: Arc<TransformerEngine>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        Self { registry, resolver, transformer, metrics, transforms_enabled: true }
    }

    pub fn with_transforms_enabled(mut self, enabled: bool) -> Self {
        self.transforms_enabled = enabled;
        self
    }

    /// Steps 1-4: resolve the caller's revision, record the hit and emit
    /// a version-request metric, then — if the resolved revision differs
    /// from the handler's and transforms are enabled — translate the
    /// request body into the handler's shape.
    pub async fn begin_request(
        &self,
        path: &str,
        query: &HashMap<String, Vec<String>>,
        headers: &HashMap<String, Vec<String>>,
        handler_version: Option<&Rid>,
        now_ms: i64,
        body: serde_json::Value,
    ) -> Result<RequestContext, ResolutionFailure> {
        let handler_version = handler_version.ok_or_else(|| ResolutionFailure {
            status: 404,
            body: ErrorResponse { error: "no handler registered for path".to_string() },
        })?;

        let resolution = match self.resolver.resolve(&self.registry, path, query, headers) {
            Ok(resolution) => resolution,
            Err(e) => {
                self.metrics.increment_counter(
                    "version.request",
                    &[("path", path), ("status", "error"), ("code", e.code())],
                );
                return Err(ResolutionFailure {
                    status: e.status_code(),
                    body: ErrorResponse { error: e.to_string() },
                });
            }
        };

        // Recording a hit against an unknown RID is a silent no-op; this
        // never happens in practice since the resolver only ever returns
        // RIDs it confirmed against the registry, but the registry's own
        // contract stands regardless.
        let _ = self.registry.record_request(&resolution.rid, now_ms);
        self.metrics.increment_counter(
            "version.request",
            &[("path", path), ("status", "resolved"), ("source", source_label(resolution.source))],
        );

        let mut transformed_body = body;
        let mut transform_error = None;

        if self.transforms_enabled && resolution.rid != *handler_version {
            let all_versions = self.registry.versions_for_path(path);
            let started = Instant::now();
            let outcome = self
                .transformer
                .transform_request(
                    transformed_body,
                    &resolution.rid,
                    handler_version,
                    &all_versions,
                    &TransformOptions::default(),
                )
                .await;
            self.metrics.record_duration(
                "transformer.request.duration",
                started.elapsed(),
                &[("path", path)],
            );
            self.metrics.increment_counter(
                "transformer.request.count",
                &[("path", path), ("success", outcome.is_success().to_string().as_str())],
            );
            transformed_body = outcome.data;
            transform_error = outcome.error;
        }

        Ok(RequestContext {
            resolution,
            handler_version: handler_version.clone(),
            path: path.to_string(),
            transformed_body,
            transform_error,
        })
    }

    /// Step 6: translate the handler's response body back to the
    /// caller's revision, the reverse direction of `begin_request`'s
    /// transform.
    pub async fn finish_response(&self, ctx: &RequestContext, response_body: serde_json::Value) -> serde_json::Value {
        if !self.transforms_enabled || ctx.resolution.rid == ctx.handler_version {
            return response_body;
        }
        let all_versions = self.registry.versions_for_path(&ctx.path);
        let started = Instant::now();
        let outcome = self
            .transformer
            .transform_response(
                response_body,
                &ctx.handler_version,
                &ctx.resolution.rid,
                &all_versions,
                &TransformOptions::default(),
            )
            .await;
        self.metrics.record_duration(
            "transformer.response.duration",
            started.elapsed(),
            &[("path", ctx.path.as_str())],
        );
        self.metrics.increment_counter(
            "transformer.response.count",
            &[("path", ctx.path.as_str()), ("success", outcome.is_success().to_string().as_str())],
        );
        outcome.data
    }
}

fn source_label(source: Source) -> &'static str {
    match source {
        Source::Latest => "latest",
        Source::Query => "query",
        Source::Header => "header",
        Source::Timestamp => "timestamp",
        Source::Tag => "tag",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::NoopMetricsSink;
    use crate::resolver::VersionResolver;

    fn rid(secs: u64, slug: &str, counter: u64) -> Rid {
        Rid::new(secs, slug, counter)
    }

    fn integration() -> (Integration, Arc<VersionRegistry>) {
        let registry = Arc::new(VersionRegistry::new());
        let resolver = Arc::new(VersionResolver::new());
        let transformer = Arc::new(TransformerEngine::new());
        let metrics: Arc<dyn MetricsSink> = Arc::new(NoopMetricsSink);
        (Integration::new(registry.clone(), resolver, transformer, metrics), registry)
    }

    #[tokio::test]
    async fn missing_handler_is_404() {
        let (integration, _registry) = integration();
        let err = integration
            .begin_request("/api/users", &HashMap::new(), &HashMap::new(), None, 0, serde_json::json!({}))
            .await
            .unwrap_err();
        assert_eq!(err.status, 404);
    }

    #[tokio::test]
    async fn resolution_error_maps_to_400() {
        let (integration, _registry) = integration();
        let v1 = rid(1, "a", 0);
        let mut query = HashMap::new();
        query.insert("version".to_string(), vec!["tsv:bad".to_string()]);
        let err = integration
            .begin_request("/api/users", &query, &HashMap::new(), Some(&v1), 0, serde_json::json!({}))
            .await
            .unwrap_err();
        assert_eq!(err.status, 400);
    }

    #[tokio::test]
    async fn same_version_skips_transform_and_records_hit() {
        let (integration, registry) = integration();
        let v1 = rid(1, "a", 0);
        registry.register("/api/users", v1.clone(), "h1", None, 0).unwrap();

        let ctx = integration
            .begin_request("/api/users", &HashMap::new(), &HashMap::new(), Some(&v1), 0, serde_json::json!({"x": 1}))
            .await
            .unwrap();
        assert_eq!(ctx.transformed_body, serde_json::json!({"x": 1}));
        assert!(ctx.transform_error.is_none());
        assert_eq!(registry.get_record(&v1).unwrap().request_count, 1);

        let out = integration.finish_response(&ctx, serde_json::json!({"y": 2})).await;
        assert_eq!(out, serde_json::json!({"y": 2}));
    }

    #[tokio::test]
    async fn differing_version_runs_transform_chain() {
        let registry = Arc::new(VersionRegistry::new());
        let resolver = Arc::new(VersionResolver::new());
        let transformer = Arc::new(TransformerEngine::new());
        let v1 = rid(1, "a", 0);
        let v2 = rid(2, "a", 0);
        registry.register("/api/users", v1.clone(), "h1", None, 0).unwrap();
        registry.register("/api/users", v2.clone(), "h2", None, 0).unwrap();

        let pair = crate::transformer::TransformerPair {
            from: v1.clone(),
            to: v2.clone(),
            forward_request: Some(Arc::new(|value: serde_json::Value| {
                Box::pin(async move {
                    let mut obj = value.as_object().cloned().unwrap_or_default();
                    obj.insert("upgraded".into(), serde_json::Value::Bool(true));
                    Ok(serde_json::Value::Object(obj))
                })
            })),
            forward_response: None,
            backward_request: None,
            backward_response: None,
            immutable: true,
            created_at_ms: 0,
            created_by: None,
        };
        transformer.register(pair).unwrap();

        let metrics: Arc<dyn MetricsSink> = Arc::new(NoopMetricsSink);
        let integration = Integration::new(registry.clone(), resolver, transformer, metrics);

        let mut query = HashMap::new();
        query.insert("version".to_string(), vec![v1.as_str().to_string()]);
        let ctx = integration
            .begin_request("/api/users", &query, &HashMap::new(), Some(&v2), 0, serde_json::json!({}))
            .await
            .unwrap();
        assert_eq!(ctx.transformed_body["upgraded"], serde_json::Value::Bool(true));
    }
}
