//! Typed client for the CoreLex marketplace API.
//!
//! Every operation signs its body through the envelope builder. Calls to
//! paid services (agent inference and service invocation) carry an auth
//! token from the broker and retry once if the server rejects it.

use corelex_types::*;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;

use crate::auth::{AuthOutcome, AuthorizationBroker, BrokerConfig};
use crate::config::ClientConfig;
use crate::envelope::{Envelope, EnvelopeBuilder};
use crate::error::{ClientError, Result};
use crate::signer::{create_signer, RequestSigner};
use crate::transport::{HttpMethod, HttpTransport, Transport, TransportResponse};

pub struct CoreLexClient {
    signer: Arc<dyn RequestSigner>,
    transport: Arc<dyn Transport>,
    broker: Arc<AuthorizationBroker>,
    envelopes: EnvelopeBuilder,
}

impl CoreLexClient {
    pub fn new(config: ClientConfig) -> Result<Self> {
        config.validate()?;
        let signer = create_signer(config.key_scheme, &config.private_key)?;
        let transport = Arc::new(HttpTransport::new(&config.base_url, config.request_timeout)?);

        log::info!(
            "[CoreLex] Client ready for {} as {}",
            transport.base_url(),
            signer.identity()
        );

        Ok(Self::with_parts(signer, transport, config.broker_config()))
    }

    /// Build from CORELEX_* environment variables
    pub fn from_env() -> Result<Self> {
        Self::new(ClientConfig::from_env()?)
    }

    /// Assemble a client from an existing signer and transport
    pub fn with_parts(
        signer: Arc<dyn RequestSigner>,
        transport: Arc<dyn Transport>,
        broker_config: BrokerConfig,
    ) -> Self {
        let broker = Arc::new(AuthorizationBroker::new(
            signer.clone(),
            transport.clone(),
            broker_config,
        ));
        let envelopes = EnvelopeBuilder::new(signer.clone(), broker.clone());
        Self {
            signer,
            transport,
            broker,
            envelopes,
        }
    }

    /// Requester identity sent with every signed request
    pub fn identity(&self) -> String {
        self.signer.identity()
    }

    pub fn broker(&self) -> &Arc<AuthorizationBroker> {
        &self.broker
    }

    // =====================================================
    // Agent Operations
    // =====================================================

    pub async fn create_agent(&self, agent: &Agent) -> Result<ApiResponse<Agent>> {
        self.call(HttpMethod::Post, "/agents", Some(to_body(agent)?)).await
    }

    pub async fn get_agent(&self, agent_id: &str) -> Result<ApiResponse<Agent>> {
        let path = format!("/agents/{}", path_segment(agent_id)?);
        self.call(HttpMethod::Get, &path, None).await
    }

    pub async fn update_agent(&self, agent_id: &str, update: &AgentUpdate) -> Result<ApiResponse<Agent>> {
        let path = format!("/agents/{}", path_segment(agent_id)?);
        self.call(HttpMethod::Patch, &path, Some(to_body(update)?)).await
    }

    /// Succeeds on an empty body or `{"data": null}`
    pub async fn delete_agent(&self, agent_id: &str) -> Result<ApiResponse<()>> {
        let path = format!("/agents/{}", path_segment(agent_id)?);
        let envelope = self.envelopes.build(None, None).await?;
        self.send(&envelope, HttpMethod::Delete, &path).await?.decode_ack()
    }

    pub async fn list_my_agents(&self, params: Option<&PaginationParams>) -> Result<ApiResponse<AgentList>> {
        let pairs = params.map(PaginationParams::query_pairs).unwrap_or_default();
        self.call(HttpMethod::Get, &with_query("/agents", &pairs), None).await
    }

    /// Ask the server to draft an agent from a natural-language description
    pub async fn generate_agent_config(&self, specification: &str) -> Result<ApiResponse<GeneratedAgentConfig>> {
        let body = to_body(&GenerateConfigRequest {
            specification: specification.to_string(),
        })?;
        self.call(HttpMethod::Post, "/agents/config", Some(body)).await
    }

    /// Paid: the agent id doubles as the service id being authorized
    pub async fn infer_agent(
        &self,
        agent_id: &str,
        input: &str,
        thread_id: &str,
    ) -> Result<ApiResponse<AgentInferenceResponse>> {
        let path = format!("/agents/{}/infer", path_segment(agent_id)?);
        let body = to_body(&InferenceRequest {
            input: input.to_string(),
            thread_id: thread_id.to_string(),
        })?;
        self.paid_call(agent_id, HttpMethod::Post, &path, body).await
    }

    // =====================================================
    // Service Operations
    // =====================================================

    pub async fn create_service(&self, service: &Service) -> Result<ApiResponse<Service>> {
        self.call(HttpMethod::Post, "/services", Some(to_body(service)?)).await
    }

    pub async fn get_service(&self, service_id: &str) -> Result<ApiResponse<Service>> {
        let path = format!("/services/{}", path_segment(service_id)?);
        self.call(HttpMethod::Get, &path, None).await
    }

    pub async fn update_service(&self, service_id: &str, update: &ServiceUpdate) -> Result<ApiResponse<Service>> {
        let path = format!("/services/{}", path_segment(service_id)?);
        self.call(HttpMethod::Patch, &path, Some(to_body(update)?)).await
    }

    pub async fn search_services(&self, params: Option<&ServiceSearchParams>) -> Result<ApiResponse<ServiceList>> {
        let pairs = params.map(ServiceSearchParams::query_pairs).unwrap_or_default();
        self.call(HttpMethod::Get, &with_query("/services", &pairs), None).await
    }

    // =====================================================
    // Authorization
    // =====================================================

    /// Exchange a fresh signed claim for `service_id` and cache the grant.
    ///
    /// A refusal comes back as `ApiResponse::Error`, not as `Err`.
    pub async fn authorize_service(&self, service_id: &str) -> Result<ApiResponse<AuthTokenGrant>> {
        Ok(match self.broker.reauthorize(service_id).await? {
            AuthOutcome::Granted(token) => ApiResponse::Success(token.to_grant()),
            AuthOutcome::Refused(err) => ApiResponse::Error(err),
        })
    }

    /// Paid: call a marketplace service with an arbitrary JSON input
    pub async fn invoke_service(&self, service_id: &str, input: &Value) -> Result<ApiResponse<Value>> {
        let path = format!("/services/{}/invoke", path_segment(service_id)?);
        self.paid_call(service_id, HttpMethod::Post, &path, input.clone()).await
    }

    // =====================================================
    // Helpers
    // =====================================================

    async fn call<T: DeserializeOwned>(
        &self,
        method: HttpMethod,
        path: &str,
        body: Option<Value>,
    ) -> Result<ApiResponse<T>> {
        let envelope = self.envelopes.build(body.as_ref(), None).await?;
        self.send(&envelope, method, path).await?.decode()
    }

    /// Send with a service token. A rejected token is dropped and the call
    /// is repeated once with a fresh authorization; a second rejection is
    /// an authorization error.
    async fn paid_call<T: DeserializeOwned>(
        &self,
        service_id: &str,
        method: HttpMethod,
        path: &str,
        body: Value,
    ) -> Result<ApiResponse<T>> {
        let mut retried = false;
        loop {
            let envelope = self.envelopes.build(Some(&body), Some(service_id)).await?;
            let response = self.send(&envelope, method, path).await?;

            if !is_token_rejection(&response) {
                return response.decode();
            }

            let reason = response
                .error_message()
                .unwrap_or_else(|| format!("HTTP {}", response.status));
            if let Some(token) = envelope.auth_token() {
                self.broker.invalidate(service_id, token);
            }

            if retried {
                log::warn!(
                    "[CoreLex] Token for {} rejected again after re-authorization: {}",
                    service_id,
                    reason
                );
                return Err(ClientError::authorization(
                    service_id,
                    format!("token rejected after re-authorization: {}", reason),
                ));
            }

            log::warn!(
                "[CoreLex] Token for {} rejected ({}), re-authorizing once",
                service_id,
                reason
            );
            retried = true;
        }
    }

    async fn send(&self, envelope: &Envelope, method: HttpMethod, path: &str) -> Result<TransportResponse> {
        let request = envelope.to_request(method, path)?;
        log::debug!("[CoreLex] {} {}", method, path);
        self.transport.send(request).await
    }
}

/// 401, or a 403 whose message blames the token
fn is_token_rejection(response: &TransportResponse) -> bool {
    match response.status {
        401 => true,
        403 => response
            .error_message()
            .map(|msg| msg.to_ascii_lowercase().contains("token"))
            .unwrap_or(false),
        _ => false,
    }
}

fn to_body<T: Serialize>(value: &T) -> Result<Value> {
    serde_json::to_value(value)
        .map_err(|e| ClientError::Encoding(format!("Failed to serialize request body: {}", e)))
}

fn path_segment(id: &str) -> Result<String> {
    if id.trim().is_empty() {
        return Err(ClientError::Encoding("resource id must not be empty".to_string()));
    }
    Ok(urlencoding::encode(id).into_owned())
}

fn with_query(path: &str, pairs: &[(&'static str, String)]) -> String {
    if pairs.is_empty() {
        return path.to_string();
    }
    let query = pairs
        .iter()
        .map(|(key, value)| format!("{}={}", key, urlencoding::encode(value)))
        .collect::<Vec<_>>()
        .join("&");
    format!("{}?{}", path, query)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_segment_escapes() {
        assert_eq!(path_segment("a/b c").unwrap(), "a%2Fb%20c");
        assert!(path_segment("  ").is_err());
    }

    #[test]
    fn test_with_query() {
        assert_eq!(with_query("/agents", &[]), "/agents");
        assert_eq!(
            with_query("/services", &[("q", "image gen".to_string()), ("page", "2".to_string())]),
            "/services?q=image%20gen&page=2"
        );
    }

    #[test]
    fn test_token_rejection_rules() {
        let resp = |status: u16, body: &str| TransportResponse {
            status,
            body: body.as_bytes().to_vec(),
        };
        assert!(is_token_rejection(&resp(401, "")));
        assert!(is_token_rejection(&resp(403, r#"{"error":{"error":"Invalid auth token"}}"#)));
        assert!(!is_token_rejection(&resp(403, r#"{"error":{"error":"not owner"}}"#)));
        assert!(!is_token_rejection(&resp(402, r#"{"error":{"error":"token budget"}}"#)));
    }
}
