pub mod error;
pub mod handlers;
pub mod hooks;
pub mod server;
pub mod ws;

pub use error::ApiError;
pub use server::{create_router, serve, AppState};
