//! Authenticated API client.
//!
//! Every request goes through [`AuthClient::send`], which attaches the stored
//! access token and recovers from a 401 by refreshing at most once before
//! retrying the original request a single time.

use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::{broadcast, watch, Mutex};
use tracing::{debug, info, warn};

use crate::config::{AuthEndpoints, Config};
use crate::error::ClientError;
use crate::jwt::{self, User};
use crate::session::{LogoutReason, SessionEvent, SessionManager, SessionState};
use crate::storage::{TokenPair, TokenStore};
use crate::transport::{ApiRequest, ApiResponse, ReqwestTransport, Transport};

#[derive(Clone)]
pub struct AuthClient {
    inner: Arc<Inner>,
}

struct Inner {
    transport: Arc<dyn Transport>,
    session: SessionManager,
    endpoints: AuthEndpoints,
    // Serialises refreshes so concurrent 401s trigger a single refresh call.
    refresh_lock: Mutex<()>,
}

impl AuthClient {
    pub fn new(
        transport: Arc<dyn Transport>,
        store: Arc<dyn TokenStore>,
        endpoints: AuthEndpoints,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                transport,
                session: SessionManager::new(store),
                endpoints,
                refresh_lock: Mutex::new(()),
            }),
        }
    }

    /// Build a client talking HTTP to the configured backend.
    pub fn from_config(config: &Config) -> Result<Self, ClientError> {
        let transport = ReqwestTransport::new(&config.api.base_url, config.api.timeout())?;
        Ok(Self::new(
            Arc::new(transport),
            config.storage.open(),
            config.auth.clone(),
        ))
    }

    pub fn session(&self) -> &SessionManager {
        &self.inner.session
    }

    pub fn current_user(&self) -> Option<User> {
        self.inner.session.current_user()
    }

    pub fn is_authenticated(&self) -> bool {
        self.inner.session.is_authenticated()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.inner.session.subscribe()
    }

    pub fn events(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.session.events()
    }

    /// Send a request with the stored bearer token, refreshing once on 401.
    pub async fn send(&self, request: ApiRequest) -> Result<ApiResponse, ClientError> {
        let token = self.inner.session.access_token()?;
        let response = self
            .inner
            .transport
            .send(request.clone().with_bearer(token.clone()))
            .await?;

        if response.status != StatusCode::UNAUTHORIZED {
            return response.error_for_status();
        }

        if same_endpoint(&request.path, &self.inner.endpoints.refresh) {
            warn!("refresh endpoint rejected the session");
            self.inner.session.end(LogoutReason::RefreshRejected);
            return Err(ClientError::SessionExpired);
        }

        let original = response.into_error();
        debug!(path = %request.path, "request unauthorized, attempting refresh");
        let Some(fresh) = self.refresh_after_unauthorized(token.as_deref()).await else {
            return Err(original);
        };

        // The retry's outcome is final: a second 401 is not refreshed again.
        self.inner
            .transport
            .send(request.with_bearer(Some(fresh)))
            .await?
            .error_for_status()
    }

    pub async fn send_json<T: DeserializeOwned>(&self, request: ApiRequest) -> Result<T, ClientError> {
        let response = self.send(request).await?;
        Ok(serde_json::from_value(response.body)?)
    }

    pub async fn get_json(&self, path: &str) -> Result<Value, ClientError> {
        Ok(self.send(ApiRequest::get(path)).await?.body)
    }

    pub async fn post_json(&self, path: &str, body: Value) -> Result<Value, ClientError> {
        Ok(self.send(ApiRequest::post(path, body)).await?.body)
    }

    pub async fn delete(&self, path: &str) -> Result<(), ClientError> {
        self.send(ApiRequest::delete(path)).await?;
        Ok(())
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<User, ClientError> {
        let request = ApiRequest::post(
            &self.inner.endpoints.login,
            json!({ "email": email, "password": password }),
        );
        let response = self.inner.transport.send(request).await?;
        if !response.status.is_success() {
            warn!(status = response.status.as_u16(), "login rejected");
            return Err(response.into_error());
        }
        let pair: TokenPair = serde_json::from_value(response.body)?;
        self.inner.session.establish(pair)
    }

    /// Exchange the stored refresh token for a new access token. Failure ends
    /// the session.
    pub async fn refresh(&self) -> Result<User, ClientError> {
        let _guard = self.inner.refresh_lock.lock().await;
        let Some(refresh_token) = self.inner.session.refresh_token()? else {
            return Err(ClientError::NotAuthenticated);
        };
        match self.exchange_refresh_token(&refresh_token).await {
            Ok(_) => self
                .inner
                .session
                .current_user()
                .ok_or(ClientError::NotAuthenticated),
            Err(e) => {
                warn!(error = %e, "token refresh failed");
                self.inner.session.end(logout_reason(&e));
                Err(e)
            }
        }
    }

    pub async fn verify(&self) -> Result<Value, ClientError> {
        self.get_json(&self.inner.endpoints.verify).await
    }

    /// Tell the backend (best effort) and clear the local session regardless.
    pub async fn logout(&self) {
        if let Ok(Some(pair)) = self.inner.session.tokens() {
            let request = ApiRequest::post(
                &self.inner.endpoints.logout,
                json!({ "refresh_token": pair.refresh_token }),
            )
            .with_bearer(Some(pair.access_token));
            match self.inner.transport.send(request).await {
                Ok(r) if r.status.is_success() => debug!("server session revoked"),
                Ok(r) => warn!(status = r.status.as_u16(), "logout request rejected"),
                Err(e) => warn!(error = %e, "logout request failed"),
            }
        }
        self.inner.session.end(LogoutReason::UserInitiated);
    }

    /// Restore a persisted session, refreshing up front when the access
    /// token has expired but a refresh token survives.
    pub async fn restore(&self) -> Result<SessionState, ClientError> {
        let state = self.inner.session.restore()?;
        if state != SessionState::Unauthenticated || self.inner.session.refresh_token()?.is_none() {
            return Ok(state);
        }
        info!("stored access token expired, refreshing");
        match self.refresh().await {
            Ok(user) => Ok(SessionState::Authenticated(user)),
            Err(_) => Ok(SessionState::Unauthenticated),
        }
    }

    /// Returns the token to retry with, or `None` once the session is gone.
    async fn refresh_after_unauthorized(&self, stale: Option<&str>) -> Option<String> {
        let _guard = self.inner.refresh_lock.lock().await;
        let session = &self.inner.session;

        let current = match session.tokens() {
            Ok(t) => t,
            Err(e) => {
                warn!(error = %e, "token store unreadable during refresh");
                session.end(LogoutReason::RefreshFailed);
                return None;
            }
        };

        if let Some(pair) = &current {
            if Some(pair.access_token.as_str()) != stale && jwt::is_token_valid(&pair.access_token) {
                debug!("access token already refreshed by a concurrent request");
                return Some(pair.access_token.clone());
            }
        }

        let Some(refresh_token) = current.and_then(|p| p.refresh_token) else {
            info!("no refresh token available, ending session");
            session.end(LogoutReason::NoRefreshToken);
            return None;
        };

        match self.exchange_refresh_token(&refresh_token).await {
            Ok(access) => Some(access),
            Err(e) => {
                warn!(error = %e, "token refresh failed");
                session.end(logout_reason(&e));
                None
            }
        }
    }

    // Callers hold `refresh_lock`.
    async fn exchange_refresh_token(&self, refresh_token: &str) -> Result<String, ClientError> {
        self.inner.session.begin_refresh();
        info!("refreshing access token");

        let request = ApiRequest::post(
            &self.inner.endpoints.refresh,
            json!({ "refresh_token": refresh_token }),
        );
        let response = self.inner.transport.send(request).await?;
        if response.status == StatusCode::UNAUTHORIZED {
            return Err(ClientError::SessionExpired);
        }
        let response = response.error_for_status()?;
        let pair: TokenPair = serde_json::from_value(response.body)?;
        let access = pair.access_token.clone();
        self.inner.session.complete_refresh(pair)?;
        Ok(access)
    }
}

// "auth/refresh", "/auth/refresh" and "/auth/refresh?x=1" name the same endpoint.
fn same_endpoint(a: &str, b: &str) -> bool {
    fn normalize(path: &str) -> &str {
        let path = path.split(['?', '#']).next().unwrap_or(path);
        path.trim_start_matches('/').trim_end_matches('/')
    }
    normalize(a) == normalize(b)
}

fn logout_reason(err: &ClientError) -> LogoutReason {
    match err {
        ClientError::SessionExpired => LogoutReason::RefreshRejected,
        _ => LogoutReason::RefreshFailed,
    }
}
