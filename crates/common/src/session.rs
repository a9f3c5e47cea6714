//! Per-context remote sessions
//!
//! The remote clients are not meant to be shared between concurrent callers,
//! so every execution context (a worker of the operation dispatcher) gets a
//! session of its own. Sessions are built lazily on first use and live as
//! long as the pool.

use std::fmt;
use std::sync::Arc;

use moka::sync::Cache;
use parking_lot::RwLock;

use crate::drive::ListingClient;
use crate::http::Transport;

/// Stable identity of an execution context, e.g. a worker index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContextId(pub u64);

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ctx-{}", self.0)
    }
}

/// Stream cookie handed out by the video-info endpoint.
///
/// Stream URLs resolved in one context are read from others, so the jar is
/// shared by every session of a pool.
#[derive(Debug, Clone, Default)]
pub struct CookieJar(Arc<RwLock<Option<String>>>);

impl CookieJar {
    pub fn get(&self) -> Option<String> {
        self.0.read().clone()
    }

    pub fn set(&self, cookie: Option<String>) {
        if cookie.is_some() {
            *self.0.write() = cookie;
        }
    }
}

/// Authenticated clients owned by one execution context.
#[derive(Debug)]
pub struct Session {
    listing: Arc<dyn ListingClient>,
    transport: Arc<dyn Transport>,
    cookies: CookieJar,
}

impl Session {
    pub fn new(listing: Arc<dyn ListingClient>, transport: Arc<dyn Transport>) -> Self {
        Self {
            listing,
            transport,
            cookies: CookieJar::default(),
        }
    }

    pub fn with_cookies(mut self, cookies: CookieJar) -> Self {
        self.cookies = cookies;
        self
    }

    pub fn listing(&self) -> &dyn ListingClient {
        self.listing.as_ref()
    }

    pub fn transport(&self) -> &dyn Transport {
        self.transport.as_ref()
    }

    pub fn cookies(&self) -> &CookieJar {
        &self.cookies
    }
}

#[derive(thiserror::Error, Debug, Clone)]
pub enum SessionError {
    #[error("credentials unavailable: {0}")]
    Credentials(String),
    #[error("failed to build remote client: {0}")]
    Client(String),
}

/// Supplies freshly authenticated sessions.
///
/// May block for out-of-band authorization the first time it is called.
pub trait SessionProvider: Send + Sync {
    fn build_session(&self) -> Result<Session, SessionError>;
}

/// The caller's identity and session, passed to every tree, resolver and
/// stream operation.
#[derive(Debug, Clone)]
pub struct Context {
    id: ContextId,
    session: Arc<Session>,
}

impl Context {
    pub fn new(id: ContextId, session: Arc<Session>) -> Self {
        Self { id, session }
    }

    pub fn id(&self) -> ContextId {
        self.id
    }

    pub fn session(&self) -> &Session {
        &self.session
    }
}

/// Lazily built, never evicted sessions keyed by context.
pub struct SessionPool {
    provider: Arc<dyn SessionProvider>,
    sessions: Cache<ContextId, Arc<Session>>,
    cookies: CookieJar,
}

impl SessionPool {
    pub fn new(provider: Arc<dyn SessionProvider>) -> Self {
        Self {
            provider,
            // No capacity or TTL: a session lives as long as its context
            sessions: Cache::builder().build(),
            cookies: CookieJar::default(),
        }
    }

    /// Get the session of `id`, building it on first use.
    ///
    /// Concurrent first calls for the same context build exactly one session.
    pub fn session(&self, id: ContextId) -> Result<Arc<Session>, SessionError> {
        self.sessions
            .try_get_with(id, || {
                tracing::debug!(context = %id, "building session");
                self.provider
                    .build_session()
                    .map(|session| Arc::new(session.with_cookies(self.cookies.clone())))
            })
            .map_err(|e| (*e).clone())
    }

    pub fn context(&self, id: ContextId) -> Result<Context, SessionError> {
        Ok(Context::new(id, self.session(id)?))
    }

    /// Most recent stream cookie seen by any session of the pool.
    pub fn cookie(&self) -> Option<String> {
        self.cookies.get()
    }

    pub fn session_count(&self) -> u64 {
        self.sessions.run_pending_tasks();
        self.sessions.entry_count()
    }
}

impl fmt::Debug for SessionPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionPool")
            .field("sessions", &self.sessions.entry_count())
            .finish()
    }
}
