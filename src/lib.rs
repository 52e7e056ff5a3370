//! STK500 over TCP to AVR ISP bridge.

pub mod bus;
pub mod config;
pub mod constants;
pub mod device;
pub mod flashing;
pub mod isp;
pub mod protocol;
pub mod server;
pub mod session;
pub mod transport;

#[cfg(test)]
pub(crate) mod mock;

pub use self::bus::Bus;
pub use self::config::Config;
pub use self::device::DeviceParameters;
pub use self::isp::{AvrIsp, Outcome};
pub use self::protocol::{Command, MemoryType};
pub use self::server::Server;
pub use self::session::{Session, SessionState};
pub use self::transport::Transport;
