pub mod api;
pub mod config;
pub mod error;
pub mod hooks;
pub mod hub;
pub mod retention;
pub mod storage;
pub mod store;
pub mod types;

pub use config::Config;
pub use error::{AgentError, AgentResult};
pub use store::AgentStore;
pub use types::*;
