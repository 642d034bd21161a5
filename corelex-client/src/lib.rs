//! Signed request pipeline for the CoreLex agent and service marketplace.
//!
//! Requests are canonically encoded, signed with the caller's key and, for
//! paid services, carry a per-service auth token obtained by the broker.

pub mod auth;
pub mod canonical;
pub mod client;
pub mod config;
pub mod envelope;
pub mod error;
pub mod signer;
pub mod transport;

#[cfg(test)]
mod testing;

pub use auth::{AuthState, AuthToken, AuthorizationBroker, BrokerConfig};
pub use client::CoreLexClient;
pub use config::ClientConfig;
pub use envelope::{Envelope, EnvelopeBuilder};
pub use error::{ClientError, Result};
pub use signer::{create_signer, RequestSigner, Signature, SignatureScheme};
pub use transport::{HttpMethod, HttpTransport, Transport, TransportRequest, TransportResponse};

pub use corelex_types as types;
