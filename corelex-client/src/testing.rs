//! Scripted in-memory transport for tests

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use crate::error::{ClientError, Result};
use crate::signer::Ed25519Signer;
use crate::transport::{HttpMethod, Transport, TransportRequest, TransportResponse};

#[derive(Debug, Clone)]
enum MockReply {
    Status(u16, Value),
    Network(String),
}

#[derive(Default)]
struct Route {
    replies: VecDeque<MockReply>,
    delay: Option<Duration>,
}

/// Replies are matched on method + path (query ignored). Queued replies are
/// consumed in order; the last one keeps answering.
#[derive(Default)]
pub struct MockTransport {
    routes: Mutex<HashMap<(HttpMethod, String), Route>>,
    requests: Mutex<Vec<TransportRequest>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(&self, method: HttpMethod, path: &str, status: u16, body: Value) {
        self.push(method, path, MockReply::Status(status, body));
    }

    pub fn fail(&self, method: HttpMethod, path: &str, message: &str) {
        self.push(method, path, MockReply::Network(message.to_string()));
    }

    pub fn delay(&self, method: HttpMethod, path: &str, delay: Duration) {
        self.routes
            .lock()
            .entry((method, path.to_string()))
            .or_default()
            .delay = Some(delay);
    }

    fn push(&self, method: HttpMethod, path: &str, reply: MockReply) {
        self.routes
            .lock()
            .entry((method, path.to_string()))
            .or_default()
            .replies
            .push_back(reply);
    }

    pub fn requests(&self) -> Vec<TransportRequest> {
        self.requests.lock().clone()
    }

    pub fn requests_to(&self, method: HttpMethod, path: &str) -> Vec<TransportRequest> {
        self.requests
            .lock()
            .iter()
            .filter(|r| r.method == method && strip_query(&r.path) == path)
            .cloned()
            .collect()
    }

    pub fn calls(&self, method: HttpMethod, path: &str) -> usize {
        self.requests_to(method, path).len()
    }
}

fn strip_query(path: &str) -> &str {
    path.split('?').next().unwrap_or(path)
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse> {
        let key = (request.method, strip_query(&request.path).to_string());
        self.requests.lock().push(request);

        let (reply, delay) = {
            let mut routes = self.routes.lock();
            match routes.get_mut(&key) {
                Some(route) => {
                    let reply = if route.replies.len() > 1 {
                        route.replies.pop_front()
                    } else {
                        route.replies.front().cloned()
                    };
                    (reply, route.delay)
                }
                None => (None, None),
            }
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        match reply {
            Some(MockReply::Status(status, body)) => Ok(TransportResponse {
                status,
                body: serde_json::to_vec(&body).unwrap_or_default(),
            }),
            Some(MockReply::Network(message)) => Err(ClientError::Transport(message)),
            None => Ok(TransportResponse {
                status: 404,
                body: br#"{"error":{"error":"no mock route"}}"#.to_vec(),
            }),
        }
    }
}

pub fn test_signer() -> Ed25519Signer {
    Ed25519Signer::from_seed([7u8; 32])
}

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}
