pub mod client;
pub mod config;
pub mod gateway;
pub mod judge;
pub mod types;

pub use client::BackendClient;
pub use config::{BackendConfig, JudgeConfig, RetryPolicy};
pub use gateway::{GatewayError, GatewayResult, RagGateway};
pub use judge::JudgeClient;
pub use types::{AskExchange, UploadOutcome};

pub mod prelude {
    pub use crate::client::*;
    pub use crate::config::*;
    pub use crate::gateway::*;
    pub use crate::judge::*;
    pub use crate::types::*;
}
