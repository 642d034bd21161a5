//! Per-service authorization broker
//!
//! Each service id owns a slot with its own lock:
//!
//! - **Unauthorized**: nothing cached
//! - **Pending**: one authorize exchange in flight, shared by every caller
//! - **Authorized**: token cached until `expires_at - refresh_margin`
//!
//! A refused, failed or rejected authorization removes the slot, so the map
//! only holds services with a token or an exchange in flight. The in-flight
//! exchange is a shared future bounded by `authorize_timeout`, so a caller
//! that gives up never strands the others.

use chrono::{DateTime, Utc};
use corelex_types::{ApiErrorResponse, ApiResponse, AuthTokenGrant};
use dashmap::DashMap;
use futures_util::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::claim::{AuthorizationClaim, NonceSource};
use crate::config::{
    DEFAULT_AUTHORIZE_TIMEOUT, DEFAULT_TOKEN_REFRESH_MARGIN, DEFAULT_TOKEN_TTL, MAX_TOKEN_TTL,
};
use crate::envelope::seal;
use crate::error::{ClientError, Result};
use crate::signer::RequestSigner;
use crate::transport::{HttpMethod, Transport};

pub const AUTHORIZE_PATH: &str = "/services/authorize";

/// `now + lifetime`, with the lifetime capped at `MAX_TOKEN_TTL`
fn expiry_after(now: DateTime<Utc>, lifetime: Duration) -> Option<DateTime<Utc>> {
    let lifetime = chrono::Duration::from_std(lifetime.min(MAX_TOKEN_TTL)).ok()?;
    now.checked_add_signed(lifetime)
}

#[derive(Debug, Clone)]
pub struct BrokerConfig {
    pub authorize_timeout: Duration,
    pub default_token_ttl: Duration,
    pub refresh_margin: Duration,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            authorize_timeout: DEFAULT_AUTHORIZE_TIMEOUT,
            default_token_ttl: DEFAULT_TOKEN_TTL,
            refresh_margin: DEFAULT_TOKEN_REFRESH_MARGIN,
        }
    }
}

/// Token granted for one service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthToken {
    pub service_id: String,
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

impl AuthToken {
    pub fn from_grant(service_id: &str, grant: AuthTokenGrant, default_ttl: Duration) -> Self {
        let now = Utc::now();

        let from_timestamp = grant.expires_at.as_deref().and_then(|raw| {
            DateTime::parse_from_rfc3339(raw)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|e| {
                    log::warn!("[Broker] Ignoring unparsable expires_at '{}': {}", raw, e);
                })
                .ok()
        });
        let from_lifetime = grant
            .expires_in
            .and_then(|secs| expiry_after(now, Duration::from_secs(secs)));

        // both inputs are clamped, so the last fallback only covers a clock at the end of time
        let expires_at = from_timestamp
            .or(from_lifetime)
            .or_else(|| expiry_after(now, default_ttl))
            .unwrap_or(now);

        Self {
            service_id: service_id.to_string(),
            token: grant.auth_token,
            expires_at,
        }
    }

    pub fn is_valid_at(&self, now: DateTime<Utc>, margin: Duration) -> bool {
        chrono::Duration::from_std(margin)
            .ok()
            .and_then(|margin| self.expires_at.checked_sub_signed(margin))
            .is_some_and(|stale_at| stale_at > now)
    }

    pub fn to_grant(&self) -> AuthTokenGrant {
        AuthTokenGrant {
            auth_token: self.token.clone(),
            expires_at: Some(self.expires_at.to_rfc3339()),
            expires_in: None,
        }
    }

    /// Token prefix safe for logs
    pub fn redacted(&self) -> String {
        let prefix: String = self.token.chars().take(6).collect();
        format!("{}…", prefix)
    }
}

/// Result of one authorize exchange that reached the server
#[derive(Debug, Clone)]
pub enum AuthOutcome {
    Granted(AuthToken),
    Refused(ApiErrorResponse),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    Unauthorized,
    Pending,
    Authorized,
    /// Still cached but past `expires_at - refresh_margin`
    Expired,
}

type AuthorizeFuture = Shared<BoxFuture<'static, Result<AuthOutcome>>>;

enum SlotState {
    Unauthorized,
    Pending {
        generation: u64,
        request: AuthorizeFuture,
    },
    Authorized(AuthToken),
    /// Removed from the map; callers holding it must look the slot up again
    Retired,
}

struct ServiceSlot {
    state: Mutex<SlotState>,
}

impl Default for ServiceSlot {
    fn default() -> Self {
        Self {
            state: Mutex::new(SlotState::Unauthorized),
        }
    }
}

pub struct AuthorizationBroker {
    signer: Arc<dyn RequestSigner>,
    transport: Arc<dyn Transport>,
    config: BrokerConfig,
    slots: DashMap<String, Arc<ServiceSlot>>,
    nonces: NonceSource,
    generations: AtomicU64,
}

impl AuthorizationBroker {
    pub fn new(
        signer: Arc<dyn RequestSigner>,
        transport: Arc<dyn Transport>,
        config: BrokerConfig,
    ) -> Self {
        Self {
            signer,
            transport,
            config,
            slots: DashMap::new(),
            nonces: NonceSource::new(),
            generations: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    /// Return a valid token for `service_id`, authorizing first if needed.
    ///
    /// A server refusal becomes `ClientError::Authorization`.
    pub async fn ensure_authorized(&self, service_id: &str) -> Result<AuthToken> {
        match self.join_or_start(service_id, false).await? {
            AuthOutcome::Granted(token) => Ok(token),
            AuthOutcome::Refused(err) => Err(ClientError::authorization(service_id, err.error)),
        }
    }

    /// Exchange a fresh claim even if a token is cached. Joins an exchange
    /// that is already in flight instead of starting a second one.
    pub async fn reauthorize(&self, service_id: &str) -> Result<AuthOutcome> {
        self.join_or_start(service_id, true).await
    }

    /// Drop the cached token if it is still `token`. A newer token is kept.
    pub fn invalidate(&self, service_id: &str, token: &str) -> bool {
        let Some(slot) = self.existing_slot(service_id) else {
            return false;
        };
        let mut state = slot.state.lock();
        let matches = matches!(&*state, SlotState::Authorized(current) if current.token == token);
        if matches {
            log::warn!("[Broker] Token for service {} rejected, dropping it", service_id);
            self.retire(service_id, &slot, &mut state);
        }
        matches
    }

    pub fn state(&self, service_id: &str) -> AuthState {
        let Some(slot) = self.existing_slot(service_id) else {
            return AuthState::Unauthorized;
        };
        let state = slot.state.lock();
        match &*state {
            SlotState::Unauthorized | SlotState::Retired => AuthState::Unauthorized,
            SlotState::Pending { .. } => AuthState::Pending,
            SlotState::Authorized(token) if token.is_valid_at(Utc::now(), self.config.refresh_margin) => {
                AuthState::Authorized
            }
            SlotState::Authorized(_) => AuthState::Expired,
        }
    }

    /// Cached token, only while still valid
    pub fn cached_token(&self, service_id: &str) -> Option<AuthToken> {
        let slot = self.existing_slot(service_id)?;
        let state = slot.state.lock();
        match &*state {
            SlotState::Authorized(token) if token.is_valid_at(Utc::now(), self.config.refresh_margin) => {
                Some(token.clone())
            }
            _ => None,
        }
    }

    /// Forget every service. In-flight exchanges still finish for their waiters.
    pub fn clear(&self) {
        self.slots.clear();
    }

    fn existing_slot(&self, service_id: &str) -> Option<Arc<ServiceSlot>> {
        self.slots.get(service_id).map(|slot| slot.value().clone())
    }

    fn slot(&self, service_id: &str) -> Arc<ServiceSlot> {
        self.slots
            .entry(service_id.to_string())
            .or_default()
            .value()
            .clone()
    }

    async fn join_or_start(&self, service_id: &str, force: bool) -> Result<AuthOutcome> {
        if service_id.trim().is_empty() {
            return Err(ClientError::authorization(service_id, "service id is empty"));
        }

        let (slot, generation, request) = loop {
            let slot = self.slot(service_id);
            let in_flight = {
                let mut state = slot.state.lock();
                if matches!(&*state, SlotState::Retired) {
                    None
                } else {
                    let joined = match &*state {
                        SlotState::Authorized(token)
                            if !force && token.is_valid_at(Utc::now(), self.config.refresh_margin) =>
                        {
                            log::debug!(
                                "[Broker] Reusing token {} for service {}",
                                token.redacted(),
                                service_id
                            );
                            return Ok(AuthOutcome::Granted(token.clone()));
                        }
                        SlotState::Pending { generation, request } => {
                            log::debug!("[Broker] Joining in-flight authorization for {}", service_id);
                            Some((*generation, request.clone()))
                        }
                        _ => None,
                    };

                    Some(match joined {
                        Some(in_flight) => in_flight,
                        None => {
                            let request = match self.start_authorization(service_id) {
                                Ok(request) => request,
                                Err(e) => {
                                    self.retire(service_id, &slot, &mut state);
                                    return Err(e);
                                }
                            };
                            let generation = self.generations.fetch_add(1, Ordering::Relaxed) + 1;
                            *state = SlotState::Pending {
                                generation,
                                request: request.clone(),
                            };
                            (generation, request)
                        }
                    })
                }
            };

            if let Some((generation, request)) = in_flight {
                break (slot, generation, request);
            }
        };

        let outcome = request.await;
        self.settle(&slot, service_id, generation, &outcome);
        outcome
    }

    /// Build, sign and launch one authorize exchange. Nothing is sent until
    /// the returned future is first polled.
    fn start_authorization(&self, service_id: &str) -> Result<AuthorizeFuture> {
        let claim = AuthorizationClaim::new(service_id, self.signer.identity(), self.nonces.next());
        let authorization = claim.sign(self.signer.as_ref())?;
        let body = serde_json::to_value(&authorization)
            .map_err(|e| ClientError::Encoding(format!("Failed to serialize authorization: {}", e)))?;
        let request = seal(Some(&body), self.signer.as_ref())?.to_request(HttpMethod::Post, AUTHORIZE_PATH)?;

        log::info!(
            "[Broker] Requesting authorization for service {} (nonce {})",
            service_id,
            authorization.nonce
        );

        let transport = self.transport.clone();
        let service_id = service_id.to_string();
        let default_ttl = self.config.default_token_ttl;
        let timeout = self.config.authorize_timeout;

        let exchange = async move {
            let response = match tokio::time::timeout(timeout, transport.send(request)).await {
                Ok(sent) => sent?,
                Err(_) => {
                    return Err(ClientError::authorization(
                        &service_id,
                        format!("authorization timed out after {:?}", timeout),
                    ))
                }
            };

            Ok::<_, ClientError>(match response.decode::<AuthTokenGrant>()? {
                ApiResponse::Success(grant) => {
                    AuthOutcome::Granted(AuthToken::from_grant(&service_id, grant, default_ttl))
                }
                ApiResponse::Error(err) => AuthOutcome::Refused(err),
            })
        };

        Ok(exchange.boxed().shared())
    }

    /// Record the outcome, unless the slot has already moved on
    fn settle(&self, slot: &Arc<ServiceSlot>, service_id: &str, generation: u64, outcome: &Result<AuthOutcome>) {
        let mut state = slot.state.lock();
        let current = matches!(&*state, SlotState::Pending { generation: g, .. } if *g == generation);
        if !current {
            return;
        }

        match outcome {
            Ok(AuthOutcome::Granted(token)) => {
                log::info!(
                    "[Broker] Service {} authorized with token {} until {}",
                    service_id,
                    token.redacted(),
                    token.expires_at
                );
                *state = SlotState::Authorized(token.clone());
            }
            Ok(AuthOutcome::Refused(err)) => {
                log::warn!("[Broker] Service {} refused authorization: {}", service_id, err.error);
                self.retire(service_id, slot, &mut state);
            }
            Err(e) => {
                log::warn!("[Broker] Authorization for service {} failed: {}", service_id, e);
                self.retire(service_id, slot, &mut state);
            }
        }
    }

    /// Drop an unauthorized slot from the map. Must be called with the slot locked.
    fn retire(&self, service_id: &str, slot: &Arc<ServiceSlot>, state: &mut SlotState) {
        *state = SlotState::Retired;
        self.slots
            .remove_if(service_id, |_, current| Arc::ptr_eq(current, slot));
    }
}
