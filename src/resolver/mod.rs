//! Version Resolver: turns a request's version preference into a
//! concrete revision, backed by a bounded FIFO cache.

pub mod cache;

use crate::error::{Result, TimescapeError};
use crate::registry::VersionRegistry;
use crate::rid::{looks_like_timestamp, Rid};
use cache::FifoCache;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;

/// Where a resolved revision came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Latest,
    Query,
    Header,
    Timestamp,
    Tag,
}

/// A successfully resolved revision. Kept as its own struct rather than
/// folded into a shared "maybe-error" type, per the tagged-variant
/// resolution-result design: the `Result<Resolution, TimescapeError>`
/// this is always wrapped in already is the sum type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub rid: Rid,
    pub source: Source,
}

#[derive(Debug, Clone)]
pub struct ResolverConfig {
    pub cache_capacity: usize,
    pub query_params: Vec<String>,
    pub header_names: Vec<String>,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            cache_capacity: 1000,
            query_params: vec!["version".to_string(), "v".to_string()],
            header_names: vec!["x-gati-version".to_string(), "x-api-version".to_string()],
        }
    }
}

impl ResolverConfig {
    pub fn with_cache_capacity(mut self, capacity: usize) -> Self {
        self.cache_capacity = capacity;
        self
    }

    pub fn with_query_params(mut self, params: Vec<String>) -> Self {
        self.query_params = params;
        self
    }

    pub fn with_header_names(mut self, names: Vec<String>) -> Self {
        self.header_names = names;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.cache_capacity == 0 {
            return Err(TimescapeError::InvalidFormat("cache_capacity must be > 0".to_string()));
        }
        if self.query_params.is_empty() || self.header_names.is_empty() {
            return Err(TimescapeError::InvalidFormat(
                "query_params and header_names must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Clone)]
struct CachedOutcome(std::result::Result<Resolution, TimescapeError>);

/// Resolves a request's version preference against a `VersionRegistry`.
/// Stateless beyond its own cache: the registry is passed in at call
/// time rather than owned, keeping component wiring explicit in the
/// integration facade.
pub struct VersionResolver {
    config: ResolverConfig,
    cache: Mutex<FifoCache<(String, String, String), CachedOutcome>>,
    cached_generation: Mutex<Option<u64>>,
}

impl VersionResolver {
    pub fn new() -> Self {
        Self::with_config(ResolverConfig::default())
    }

    pub fn with_config(config: ResolverConfig) -> Self {
        let cache = Mutex::new(FifoCache::new(config.cache_capacity));
        Self { config, cache, cached_generation: Mutex::new(None) }
    }

    /// Pick the first non-empty value from `values`' slots named in
    /// `names`, in order. Array-valued inputs use element 0; empty or
    /// whitespace-only strings are treated as absent.
    fn extract<'a>(names: &[String], values: &'a HashMap<String, Vec<String>>) -> Option<&'a str> {
        for name in names {
            if let Some(candidates) = values.get(name) {
                if let Some(first) = candidates.first() {
                    if !first.trim().is_empty() {
                        return Some(first.as_str());
                    }
                }
            }
        }
        None
    }

    fn invalidate_if_stale(&self, registry: &VersionRegistry) {
        let current = registry.generation();
        let mut cached = self.cached_generation.lock().expect("resolver lock poisoned");
        if *cached != Some(current) {
            self.cache.lock().expect("resolver lock poisoned").clear();
            *cached = Some(current);
        }
    }

    pub fn resolve(
        &self,
        registry: &VersionRegistry,
        path: &str,
        query: &HashMap<String, Vec<String>>,
        headers: &HashMap<String, Vec<String>>,
    ) -> Result<Resolution> {
        self.invalidate_if_stale(registry);

        let query_value = Self::extract(&self.config.query_params, query);
        let header_value = Self::extract(&self.config.header_names, headers);

        let key = (path.to_string(), query_value.unwrap_or("").to_string(), header_value.unwrap_or("").to_string());
        if let Some(hit) = self.cache.lock().expect("resolver lock poisoned").get(&key) {
            return hit.0.clone();
        }

        let outcome = self.resolve_uncached(registry, path, query_value, header_value);
        self.cache
            .lock()
            .expect("resolver lock poisoned")
            .insert(key, CachedOutcome(outcome.clone()));
        outcome
    }

    fn resolve_uncached(
        &self,
        registry: &VersionRegistry,
        path: &str,
        query_value: Option<&str>,
        header_value: Option<&str>,
    ) -> Result<Resolution> {
        let (value, source_if_rid) = match (query_value, header_value) {
            (Some(v), _) => (v, Source::Query),
            (None, Some(v)) => (v, Source::Header),
            (None, None) => {
                let rid = registry
                    .get_latest(path)
                    .ok_or_else(|| TimescapeError::VersionNotFound(path.to_string()))?;
                return Ok(Resolution { rid, source: Source::Latest });
            }
        };

        Self::parse_and_resolve(registry, path, value, source_if_rid)
    }

    fn parse_and_resolve(
        registry: &VersionRegistry,
        path: &str,
        value: &str,
        source_if_rid: Source,
    ) -> Result<Resolution> {
        if let Some(rid) = Rid::parse(value) {
            if registry.get_record(&rid).is_some() {
                return Ok(Resolution { rid, source: source_if_rid });
            }
            return Err(TimescapeError::VersionNotFound(value.to_string()));
        }
        if value.starts_with("tsv:") {
            return Err(TimescapeError::InvalidFormat(value.to_string()));
        }

        if looks_like_timestamp(value) {
            let seconds = parse_timestamp(value)?;
            let rid = registry
                .get_at(path, seconds)
                .ok_or_else(|| TimescapeError::VersionNotFound(value.to_string()))?;
            return Ok(Resolution { rid, source: Source::Timestamp });
        }

        // An unrecognized tag label is, from the resolver's perspective, an
        // unparseable version specifier rather than a registry lookup
        // miss: it surfaces as INVALID_FORMAT, not TAG_NOT_FOUND.
        let rid = registry
            .get_by_tag(value)
            .map_err(|_| TimescapeError::InvalidFormat(value.to_string()))?;
        Ok(Resolution { rid, source: Source::Tag })
    }
}

fn parse_timestamp(value: &str) -> Result<u64> {
    if value.contains('T') {
        let parsed = chrono::DateTime::parse_from_rfc3339(value)
            .map_err(|_| TimescapeError::InvalidTimestamp(value.to_string()))?;
        let seconds = parsed.timestamp();
        return u64::try_from(seconds).map_err(|_| TimescapeError::InvalidTimestamp(value.to_string()));
    }

    let n: u64 = value.parse().map_err(|_| TimescapeError::InvalidTimestamp(value.to_string()))?;
    match value.len() {
        10 => Ok(n),
        13 => Ok(n / 1000),
        _ => Err(TimescapeError::InvalidTimestamp(value.to_string())),
    }
}

impl Default for VersionResolver {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rid(secs: u64, slug: &str, counter: u64) -> Rid {
        Rid::new(secs, slug, counter)
    }

    fn values(pairs: &[(&str, &str)]) -> HashMap<String, Vec<String>> {
        pairs.iter().map(|(k, v)| (k.to_string(), vec![v.to_string()])).collect()
    }

    #[test]
    fn defaults_to_latest_when_no_preference() {
        let registry = VersionRegistry::new();
        let v1 = rid(100, "users", 1);
        registry.register("/api/users", v1.clone(), "h1", None, 0).unwrap();

        let resolver = VersionResolver::new();
        let resolution = resolver.resolve(&registry, "/api/users", &HashMap::new(), &HashMap::new()).unwrap();
        assert_eq!(resolution.rid, v1);
        assert_eq!(resolution.source, Source::Latest);
    }

    #[test]
    fn resolves_timestamp_to_floor() {
        let registry = VersionRegistry::new();
        let v1 = rid(1732186200, "users", 1);
        let v2 = rid(1732186300, "users", 2);
        registry.register("/api/users", v1.clone(), "h1", None, 0).unwrap();
        registry.register("/api/users", v2.clone(), "h2", None, 0).unwrap();

        let resolver = VersionResolver::new();
        let query = values(&[("version", "1732186250")]);
        let resolution = resolver.resolve(&registry, "/api/users", &query, &HashMap::new()).unwrap();
        assert_eq!(resolution.rid, v1);
        assert_eq!(resolution.source, Source::Timestamp);
    }

    #[test]
    fn query_wins_over_header() {
        let registry = VersionRegistry::new();
        let v1 = rid(100, "users", 1);
        let v2 = rid(200, "users", 2);
        registry.register("/api/users", v1.clone(), "h1", None, 0).unwrap();
        registry.register("/api/users", v2.clone(), "h2", None, 0).unwrap();
        registry.tag(&v2, "stable", None, 0).unwrap();
        registry.tag(&v1, "v1.0.0", None, 0).unwrap();

        let resolver = VersionResolver::new();
        let query = values(&[("version", "stable")]);
        let headers = values(&[("x-gati-version", "v1.0.0")]);
        let resolution = resolver.resolve(&registry, "/api/users", &query, &headers).unwrap();
        assert_eq!(resolution.rid, v2);
        assert_eq!(resolution.source, Source::Query);
    }

    #[test]
    fn thirteen_digit_timestamp_is_milliseconds() {
        let registry = VersionRegistry::new();
        let v1 = rid(1732186200, "users", 1);
        registry.register("/api/users", v1.clone(), "h1", None, 0).unwrap();

        let resolver = VersionResolver::new();
        let query = values(&[("version", "1732186200500")]);
        let resolution = resolver.resolve(&registry, "/api/users", &query, &HashMap::new()).unwrap();
        assert_eq!(resolution.rid, v1);
    }

    #[test]
    fn unrecognized_tag_is_invalid_format() {
        let registry = VersionRegistry::new();
        let resolver = VersionResolver::new();
        let query = values(&[("version", "nope")]);
        let err = resolver.resolve(&registry, "/api/users", &query, &HashMap::new()).unwrap_err();
        assert_eq!(err.code(), "INVALID_FORMAT");
    }

    #[test]
    fn malformed_tsv_prefix_is_invalid_format() {
        let registry = VersionRegistry::new();
        let resolver = VersionResolver::new();
        let query = values(&[("version", "tsv:abc")]);
        let err = resolver.resolve(&registry, "/api/users", &query, &HashMap::new()).unwrap_err();
        assert_eq!(err.code(), "INVALID_FORMAT");
    }

    #[test]
    fn cache_invalidates_on_registry_mutation() {
        let registry = VersionRegistry::new();
        let resolver = VersionResolver::new();
        let v1 = rid(100, "users", 1);
        registry.register("/api/users", v1.clone(), "h1", None, 0).unwrap();

        let first = resolver.resolve(&registry, "/api/users", &HashMap::new(), &HashMap::new()).unwrap();
        assert_eq!(first.rid, v1);

        let v2 = rid(200, "users", 2);
        registry.register("/api/users", v2.clone(), "h2", None, 0).unwrap();

        let second = resolver.resolve(&registry, "/api/users", &HashMap::new(), &HashMap::new()).unwrap();
        assert_eq!(second.rid, v2);
    }
}
