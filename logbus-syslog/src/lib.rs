pub mod conn;
pub mod packet;

pub use conn::{Connection, Transport};
pub use packet::{Facility, Packet, Severity};

/// Hard cap on one syslog frame; anything longer is truncated.
pub const MAX_LOG_SIZE: usize = 99_990;
