//! Identity resolution and backend selection at startup.
//!
//! [`bootstrap`] waits a bounded time for an [`IdentityProvider`] to
//! produce an identity, then picks the backend once: a durable identity
//! with a configured store URL talks to the remote store, everything else
//! uses the local file. A remote connect failure falls back to the local
//! file; the session starts either way.

use std::path::PathBuf;
use std::time::Duration;

use tokio::time::Instant;

use crate::backend::local::LocalBackend;
use crate::backend::remote::RemoteBackend;
use crate::backend::{Backend, BackendError};

/// Actor id used when no identity is configured.
pub const LOCAL_ACTOR_ID: &str = "local-user";

/// Who is using the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    /// Stable actor id; namespaces every stored document.
    pub actor_id: String,
    /// Whether this session is backed by a remote account.
    pub durable: bool,
}

impl Identity {
    /// The sentinel identity for sessions without an identity system.
    #[must_use]
    pub fn local() -> Self {
        Self {
            actor_id: LOCAL_ACTOR_ID.to_string(),
            durable: false,
        }
    }

    /// A durable identity for `actor_id`.
    pub fn durable(actor_id: impl Into<String>) -> Self {
        Self {
            actor_id: actor_id.into(),
            durable: true,
        }
    }
}

/// Source of the current identity.
///
/// `resolve` is polled until it returns `Some` or the bootstrap budget runs
/// out, so implementations backed by a slow sign-in can return `None`
/// while they are still working.
pub trait IdentityProvider: Send + Sync {
    /// The identity, if known yet.
    fn resolve(&self) -> Option<Identity>;
}

/// Provider that always returns the same answer.
#[derive(Debug, Clone)]
pub struct StaticIdentity(Option<Identity>);

impl StaticIdentity {
    /// Provider that resolves to `identity`.
    #[must_use]
    pub const fn new(identity: Identity) -> Self {
        Self(Some(identity))
    }

    /// Provider that never resolves.
    #[must_use]
    pub const fn unresolved() -> Self {
        Self(None)
    }

    /// Durable identity from a configured actor id, local otherwise.
    #[must_use]
    pub fn from_config(actor_id: Option<&str>) -> Self {
        Self::new(actor_id.map_or_else(Identity::local, Identity::durable))
    }
}

impl IdentityProvider for StaticIdentity {
    fn resolve(&self) -> Option<Identity> {
        self.0.clone()
    }
}

/// Settings for [`bootstrap`].
#[derive(Debug, Clone)]
pub struct BootstrapConfig {
    /// Total budget for identity resolution plus remote connect.
    pub timeout: Duration,
    /// Delay between identity polls.
    pub poll_interval: Duration,
    /// Remote store URL; `None` disables the remote backend.
    pub store_url: Option<String>,
    /// Per-request timeout of the remote backend once connected.
    pub request_timeout: Duration,
    /// Directory of the local blob.
    pub data_dir: PathBuf,
    /// Local blob name, without extension.
    pub blob_name: String,
}

/// Resolves the identity and opens the backend for it.
///
/// # Errors
///
/// Returns [`BackendError`] only if the local file itself cannot be opened;
/// identity timeouts and remote failures fall back to the local file.
pub async fn bootstrap(
    provider: &impl IdentityProvider,
    config: &BootstrapConfig,
) -> Result<(Identity, Backend), BackendError> {
    let deadline = Instant::now() + config.timeout;
    let identity = match wait_for_identity(provider, config.poll_interval, deadline).await {
        Some(identity) => identity,
        None => {
            tracing::warn!(
                timeout = ?config.timeout,
                "identity not resolved in time, using local identity"
            );
            Identity::local()
        }
    };

    if identity.durable
        && let Some(url) = config.store_url.as_deref()
    {
        let remaining = deadline.saturating_duration_since(Instant::now());
        let connect = RemoteBackend::connect(url, &identity.actor_id, config.request_timeout);
        match tokio::time::timeout(remaining, connect).await {
            Ok(Ok(remote)) => {
                tracing::info!(actor_id = %identity.actor_id, url, "using remote store");
                return Ok((identity, Backend::Remote(remote)));
            }
            Ok(Err(e)) => {
                tracing::warn!(url, error = %e, "remote store unavailable, falling back to local file");
            }
            Err(_) => {
                tracing::warn!(url, "remote store connect timed out, falling back to local file");
            }
        }
    }

    let local = LocalBackend::open(&config.data_dir, &config.blob_name).await?;
    tracing::info!(
        actor_id = %identity.actor_id,
        path = %local.path().display(),
        "using local store"
    );
    Ok((identity, Backend::Local(local)))
}

async fn wait_for_identity(
    provider: &impl IdentityProvider,
    poll_interval: Duration,
    deadline: Instant,
) -> Option<Identity> {
    loop {
        if let Some(identity) = provider.resolve() {
            return Some(identity);
        }
        let now = Instant::now();
        if now >= deadline {
            return None;
        }
        tokio::time::sleep(poll_interval.min(deadline - now)).await;
    }
}
