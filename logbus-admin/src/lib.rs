pub mod handlers;
pub mod middleware;
pub mod server;

pub use server::{session_router, shuttle_router, AppState};
