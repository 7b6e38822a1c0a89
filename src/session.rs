//! Session state machine.
//!
//! ```text
//! Unauthenticated --login--> Authenticated --401 + refresh token--> Refreshing
//!        ^                                                            |
//!        +------------------- refresh failed -------------------------+
//!                             refresh ok --> Authenticated
//! ```
//!
//! State is published on a watch channel; lifecycle transitions are also
//! broadcast as [`SessionEvent`]s so a front end can send the user back to
//! the login screen on [`SessionEvent::LoggedOut`].

use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tracing::{info, warn};

use crate::error::ClientError;
use crate::jwt::{self, User};
use crate::storage::{TokenPair, TokenStore};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Unauthenticated,
    Authenticated(User),
    Refreshing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogoutReason {
    UserInitiated,
    /// The refresh endpoint itself answered 401.
    RefreshRejected,
    NoRefreshToken,
    RefreshFailed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    LoggedIn(User),
    Refreshed,
    LoggedOut(LogoutReason),
}

pub struct SessionManager {
    store: Arc<dyn TokenStore>,
    state: watch::Sender<SessionState>,
    events: broadcast::Sender<SessionEvent>,
}

impl SessionManager {
    pub fn new(store: Arc<dyn TokenStore>) -> Self {
        let (state, _) = watch::channel(SessionState::Unauthenticated);
        let (events, _) = broadcast::channel(16);
        Self {
            store,
            state,
            events,
        }
    }

    /// Derive the initial state from whatever the store holds. An expired
    /// access token leaves the session unauthenticated but keeps the refresh
    /// token for a later refresh. A stored pair that no longer parses is
    /// cleared.
    pub fn restore(&self) -> Result<SessionState, ClientError> {
        let stored = match self.store.load() {
            Ok(stored) => stored,
            Err(ClientError::Json(e)) => {
                warn!(error = %e, "stored session is unreadable, discarding it");
                self.store.clear()?;
                None
            }
            Err(e) => return Err(e),
        };
        let state = match stored {
            Some(pair) if jwt::is_token_valid(&pair.access_token) => jwt::decode(&pair.access_token)
                .map(|c| SessionState::Authenticated(c.user()))
                .unwrap_or(SessionState::Unauthenticated),
            _ => SessionState::Unauthenticated,
        };
        self.state.send_replace(state.clone());
        Ok(state)
    }

    pub fn tokens(&self) -> Result<Option<TokenPair>, ClientError> {
        self.store.load()
    }

    pub fn access_token(&self) -> Result<Option<String>, ClientError> {
        Ok(self.store.load()?.map(|p| p.access_token))
    }

    pub fn refresh_token(&self) -> Result<Option<String>, ClientError> {
        Ok(self.store.load()?.and_then(|p| p.refresh_token))
    }

    /// Store a freshly issued pair after login.
    pub fn establish(&self, pair: TokenPair) -> Result<User, ClientError> {
        let user = Self::user_from(&pair.access_token)?;
        self.store.save(&pair)?;
        self.state.send_replace(SessionState::Authenticated(user.clone()));
        let _ = self.events.send(SessionEvent::LoggedIn(user.clone()));
        info!(user_id = %user.id, "session established");
        Ok(user)
    }

    pub fn begin_refresh(&self) {
        self.state.send_replace(SessionState::Refreshing);
    }

    /// Store a refreshed pair. Servers that do not rotate refresh tokens
    /// omit it, in which case the previous one is kept.
    pub fn complete_refresh(&self, mut pair: TokenPair) -> Result<User, ClientError> {
        let user = Self::user_from(&pair.access_token)?;
        if pair.refresh_token.is_none() {
            pair.refresh_token = self.refresh_token()?;
        }
        self.store.save(&pair)?;
        self.state.send_replace(SessionState::Authenticated(user.clone()));
        let _ = self.events.send(SessionEvent::Refreshed);
        info!(user_id = %user.id, "session refreshed");
        Ok(user)
    }

    /// Clear stored tokens and drop to `Unauthenticated`.
    pub fn end(&self, reason: LogoutReason) {
        if let Err(e) = self.store.clear() {
            warn!(error = %e, "failed to clear token store");
        }
        self.state.send_replace(SessionState::Unauthenticated);
        let _ = self.events.send(SessionEvent::LoggedOut(reason));
        info!(reason = ?reason, "session ended");
    }

    pub fn state(&self) -> SessionState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub fn events(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// The user behind the stored access token, only while it is unexpired.
    pub fn current_user(&self) -> Option<User> {
        let token = self.access_token().ok()??;
        if !jwt::is_token_valid(&token) {
            return None;
        }
        jwt::decode(&token).map(|c| c.user())
    }

    pub fn is_authenticated(&self) -> bool {
        self.current_user().is_some()
    }

    fn user_from(access_token: &str) -> Result<User, ClientError> {
        let claims = jwt::decode(access_token)
            .ok_or_else(|| ClientError::InvalidToken("access token is not a decodable JWT".into()))?;
        if !jwt::is_token_valid(access_token) {
            return Err(ClientError::InvalidToken("access token is expired".into()));
        }
        Ok(claims.user())
    }
}
