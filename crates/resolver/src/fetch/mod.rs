pub mod client;
pub mod config;
pub mod error;

pub use client::{FetchClient, FetchRequest, FetchResponse, FetchStream, create_client, limit_body};
pub use config::{DEFAULT_USER_AGENT, FetchConfig, RedirectPolicy};
pub use error::FetchError;
