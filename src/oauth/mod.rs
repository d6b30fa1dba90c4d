//! OAuth 2.0 authorization code flow
//!
//! - [`state`]: encodes and decodes the correlation token carried in `state`
//! - [`provider`]: per-provider authorization URLs and token exchange
//! - [`flow`]: drives a connect attempt from initiate to stored credential

pub mod flow;
pub mod provider;
pub mod state;

pub use flow::{CallbackOutcome, CallbackParams, ConnectFlow, FlowStage, Initiated};
pub use provider::{AuthStyle, BodyEncoding, Provider, ProviderAdapter, ProviderConfig, TokenGrant};
pub use state::PendingAuthorization;
