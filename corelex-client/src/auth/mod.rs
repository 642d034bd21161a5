//! Service authorization: signed claims and the per-service token broker

mod broker;
mod claim;

pub use broker::{AuthOutcome, AuthState, AuthToken, AuthorizationBroker, BrokerConfig, AUTHORIZE_PATH};
pub use claim::{AuthorizationClaim, NonceSource};
