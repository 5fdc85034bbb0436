//! Session Holder: owns the one authenticated session of a login target.
//!
//! ```text
//!            refresh()                      logout()
//!   ┌──────────────────────────┐   ┌───────────────────────────┐
//!   │ session? ─▶ ConnectionLost │   │ session? ─▶ api.logout()  │
//!   │ login(host, user, secret)  │   │          ─▶ ConnectionLost│
//!   │   ok  ─▶ NewConnection     │   │ none    ─▶ no event       │
//!   │   err ─▶ log guidance      │   └───────────────────────────┘
//!   └──────────────────────────┘
//!                 │ broadcast::Sender<SessionEvent>
//!        ┌────────┼────────┐
//!        ▼        ▼        ▼
//!    consumer  consumer  consumer   (attach() = snapshot + receiver)
//! ```
//!
//! Refresh and logout are serialized, and every event is sent while the
//! current-session slot is locked. A consumer attaching through
//! [`SessionHolder::attach`] therefore sees either the session in its
//! snapshot or the event that installs it, never both and never neither.
//! A loss announcement always precedes the next `NewConnection`.

use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::client::{ApiSession, Authenticator};
use crate::config::ConnectionConfig;
use crate::guidance::matchers::SOURCE_LOGIN;
use crate::guidance::{Audience, GuidanceRegistry};


/// Buffered lifecycle events per receiver before it lags.
const EVENT_CAPACITY: usize = 64;

const DEFAULT_LOGIN_GUIDANCE: &str = "Unable to log in";

/// A live authenticated session.
///
/// Cheap to clone; every clone refers to the same underlying API session.
#[derive(Clone)]
pub struct Session {
    id: Uuid,
    holder_id: String,
    established_at: DateTime<Utc>,
    api: Arc<dyn ApiSession>,
}

impl Session {
    pub fn new(holder_id: impl Into<String>, api: Arc<dyn ApiSession>) -> Self {
        Self {
            id: Uuid::now_v7(),
            holder_id: holder_id.into(),
            established_at: Utc::now(),
            api,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn holder_id(&self) -> &str {
        &self.holder_id
    }

    pub fn established_at(&self) -> DateTime<Utc> {
        self.established_at
    }

    pub fn api(&self) -> &dyn ApiSession {
        self.api.as_ref()
    }
}

impl PartialEq for Session {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("holder_id", &self.holder_id)
            .field("instance_url", &self.api.instance_url())
            .field("established_at", &self.established_at)
            .finish()
    }
}

/// Lifecycle announcement fanned out to consumers.
#[derive(Clone, Debug, PartialEq)]
pub enum SessionEvent {
    NewConnection(Session),
    /// The session is gone. Carries it when the loss came from a logout;
    /// `None` when a refresh discarded it.
    ConnectionLost(Option<Session>),
}

/// Owns the session for one login target and announces its lifecycle.
pub struct SessionHolder {
    id: String,
    login_url: String,
    username: String,
    secret: String,
    authenticator: Arc<dyn Authenticator>,
    guidance: Arc<GuidanceRegistry>,
    current: Mutex<Option<Session>>,
    lifecycle: tokio::sync::Mutex<()>,
    events: broadcast::Sender<SessionEvent>,
}

impl SessionHolder {
    /// Builds a holder without logging in.
    pub fn new(
        config: &ConnectionConfig,
        authenticator: Arc<dyn Authenticator>,
        guidance: Arc<GuidanceRegistry>,
    ) -> Arc<Self> {
        let resolved = config.resolved();
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        Arc::new(Self {
            id: resolved.id.clone(),
            login_url: normalize_host(&resolved.host),
            username: resolved.username.clone(),
            secret: resolved.secret(),
            authenticator,
            guidance,
            current: Mutex::new(None),
            lifecycle: tokio::sync::Mutex::new(()),
            events,
        })
    }

    /// Builds a holder and performs the first login.
    pub async fn initialize(
        config: &ConnectionConfig,
        authenticator: Arc<dyn Authenticator>,
        guidance: Arc<GuidanceRegistry>,
    ) -> Arc<Self> {
        let holder = Self::new(config, authenticator, guidance);
        holder.refresh().await;
        holder
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Login URL, always carrying the `https://` scheme (empty if unset).
    pub fn login_url(&self) -> &str {
        &self.login_url
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn current(&self) -> Option<Session> {
        self.slot().clone()
    }

    pub fn is_connected(&self) -> bool {
        self.slot().is_some()
    }

    /// Receiver for future lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Current session plus a receiver for everything that happens after it.
    pub fn attach(&self) -> (Option<Session>, broadcast::Receiver<SessionEvent>) {
        let slot = self.slot();
        (slot.clone(), self.events.subscribe())
    }

    pub fn consumer_count(&self) -> usize {
        self.events.receiver_count()
    }

    /// Discards any current session and logs in again.
    ///
    /// Login failures are logged with developer guidance and leave the
    /// holder without a session; they are never retried here. Returns the
    /// new session on success.
    pub async fn refresh(&self) -> Option<Session> {
        let _serial = self.lifecycle.lock().await;

        {
            let mut slot = self.slot();
            if slot.take().is_some() {
                debug!(holder = %self.id, "Discarding session before refresh");
                let _ = self.events.send(SessionEvent::ConnectionLost(None));
            }
        }

        if self.login_url.is_empty() {
            error!(holder = %self.id, "Cannot log in: no host configured");
            return None;
        }

        info!(holder = %self.id, host = %self.login_url, user = %self.username, "Logging in");

        match self
            .authenticator
            .login(&self.login_url, &self.username, &self.secret)
            .await
        {
            Ok(api) => {
                let session = Session::new(self.id.clone(), api);
                let mut slot = self.slot();
                *slot = Some(session.clone());
                let _ = self.events.send(SessionEvent::NewConnection(session.clone()));
                info!(
                    holder = %self.id,
                    session = %session.id(),
                    instance = %session.api().instance_url(),
                    "Session established"
                );
                Some(session)
            }
            Err(err) => {
                let guidance = self.guidance.guidance_string(
                    SOURCE_LOGIN,
                    &err,
                    Audience::Developer,
                    DEFAULT_LOGIN_GUIDANCE,
                );
                error!(
                    holder = %self.id,
                    host = %self.login_url,
                    error = %err,
                    "Login failed: {}",
                    guidance
                );
                None
            }
        }
    }

    /// Ends the current session. A no-op when there is none.
    pub async fn logout(&self) {
        let _serial = self.lifecycle.lock().await;

        let Some(session) = self.current() else {
            debug!(holder = %self.id, "Logout requested without a session");
            return;
        };

        if let Err(err) = session.api().logout().await {
            warn!(holder = %self.id, error = %err, "Remote logout failed");
        }

        let mut slot = self.slot();
        *slot = None;
        let _ = self
            .events
            .send(SessionEvent::ConnectionLost(Some(session.clone())));
        info!(holder = %self.id, session = %session.id(), "Logged out");
    }

    fn slot(&self) -> MutexGuard<'_, Option<Session>> {
        self.current.lock().unwrap_or_else(|p| p.into_inner())
    }
}

impl fmt::Debug for SessionHolder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionHolder")
            .field("id", &self.id)
            .field("login_url", &self.login_url)
            .field("username", &self.username)
            .field("connected", &self.is_connected())
            .finish()
    }
}

/// Prefixes `https://` unless already present. Empty stays empty.
pub fn normalize_host(host: &str) -> String {
    let host = host.trim();
    if host.is_empty() || host.starts_with("https://") {
        host.to_string()
    } else {
        format!("https://{}", host)
    }
}
