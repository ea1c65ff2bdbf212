pub mod drain;
pub mod http;
pub mod pool;
pub mod registry;

pub use drain::{Drain, DrainStats};
pub use http::HttpDrain;
pub use pool::SyslogDrain;
pub use registry::DrainRegistry;
