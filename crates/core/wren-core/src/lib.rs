//! Wren core
//!
//! Shared foundation for the Wren agent adaptors: the error taxonomy,
//! environment/configuration helpers, tracing setup, and the chat-gateway
//! collaborator client.

pub mod config;
pub mod error;
pub mod gateway;
pub mod logging;

pub use config::{
    get_env_float, get_env_int, get_env_or, load_env, load_env_from_path, require_credential,
    resolve_credential,
};
pub use error::{Result, WrenError};
pub use gateway::ChatGateway;
pub use logging::init_tracing;
