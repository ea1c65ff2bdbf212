pub mod config;
pub mod envelope;
pub mod error;
pub mod humanize;
pub mod parse;
pub mod route;
pub mod session;

pub use config::BusConfig;
pub use envelope::{LogEnvelope, LogSpec, Process};
pub use error::BusError;
pub use route::Route;
pub use session::LogSession;
