//! Shared application state and authentication extractors.

use crate::keycache::KeyCache;
use crate::rate_limit::SlidingWindowLimiter;
use axum::http::HeaderMap;
use hs_08_command_queue::CommandService;
use hs_telemetry::LatencyTracker;
use sha2::{Digest, Sha256};
use shared_bus::MessageBus;
use shared_store::Store;
use shared_types::config::IngestConfig;
use shared_types::{Actor, Authorize, CoreError, KeyId, SiteId, COLLECTOR_KEY_PREFIX};
use std::collections::HashMap;
use std::sync::Arc;

/// Who a collector key authenticates as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectorIdentity {
    pub key_id: KeyId,
    pub site_id: SiteId,
}

/// Session resolution seam. The session/auth UI is an external
/// collaborator; the core only needs "token in, actor out".
pub trait SessionAuth: Send + Sync {
    /// Resolve a bearer token to an actor, if the session is valid.
    fn resolve(&self, token: &str) -> Option<Actor>;
}

/// Fixed token table; what single-node deployments and tests use.
#[derive(Default)]
pub struct StaticSessionAuth {
    tokens: HashMap<String, Actor>,
}

impl StaticSessionAuth {
    /// Empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a token for an actor.
    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>, actor: Actor) -> Self {
        self.tokens.insert(token.into(), actor);
        self
    }
}

impl SessionAuth for StaticSessionAuth {
    fn resolve(&self, token: &str) -> Option<Actor> {
        self.tokens.get(token).cloned()
    }
}

/// Everything the routes need, cheap to clone.
#[derive(Clone)]
pub struct AppState {
    pub store: Store,
    pub bus: Arc<MessageBus>,
    pub commands: Arc<CommandService>,
    pub key_cache: Arc<KeyCache>,
    pub limiter: Arc<SlidingWindowLimiter>,
    pub sessions: Arc<dyn SessionAuth>,
    pub authorizer: Arc<dyn Authorize>,
    pub config: IngestConfig,
    pub latency: Arc<LatencyTracker>,
}

impl AppState {
    /// Assemble the state. The limiter is derived from the config.
    #[must_use]
    pub fn new(
        store: Store,
        bus: Arc<MessageBus>,
        commands: Arc<CommandService>,
        sessions: Arc<dyn SessionAuth>,
        authorizer: Arc<dyn Authorize>,
        config: IngestConfig,
    ) -> Self {
        let limiter = Arc::new(SlidingWindowLimiter::new(
            config.max_request_rate,
            config.rate_window,
        ));
        Self {
            key_cache: Arc::new(KeyCache::new(store.clone())),
            store,
            bus,
            commands,
            limiter,
            sessions,
            authorizer,
            config,
            latency: Arc::new(LatencyTracker::default()),
        }
    }

    /// Authenticate a collector request from its `X-Collector-Key` header.
    ///
    /// The stored lookup key is `SHA-256(header value)`, so the plaintext
    /// token never exists server-side beyond this stack frame.
    pub fn authenticate_collector(
        &self,
        headers: &HeaderMap,
    ) -> Result<CollectorIdentity, CoreError> {
        let presented = headers
            .get("X-Collector-Key")
            .and_then(|v| v.to_str().ok())
            .ok_or(CoreError::Unauthorized)?;
        if !presented.starts_with(COLLECTOR_KEY_PREFIX) {
            return Err(CoreError::Unauthorized);
        }

        let hash = hex::encode(Sha256::digest(presented.as_bytes()));
        match self.key_cache.lookup(&hash) {
            Some(cached) if cached.active => Ok(CollectorIdentity {
                key_id: cached.key_id,
                site_id: cached.site_id,
            }),
            _ => Err(CoreError::Unauthorized),
        }
    }

    /// Resolve the session actor from an `Authorization: Bearer` header.
    pub fn session_actor(&self, headers: &HeaderMap) -> Result<Actor, CoreError> {
        let token = headers
            .get("Authorization")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .ok_or(CoreError::Unauthorized)?;
        self.sessions.resolve(token).ok_or(CoreError::Unauthorized)
    }
}
