//! Client side of the proxy gateway plus the host block list that decides
//! when to use it.

pub mod blocklist;
pub mod client;
pub mod error;

pub use blocklist::BlockList;
pub use client::{GatewayRequest, GatewayResponse, GatewayScope, ProxyCredential, ProxyGateway};
pub use error::GatewayError;
