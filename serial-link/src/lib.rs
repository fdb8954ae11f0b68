//! Serial port session management.
//!
//! Opens a serial device, drains it on a dedicated reader task, and infers
//! link health from how recently bytes arrived. See [`session::Session`] for
//! the entry point.

pub mod config;
pub mod error;
pub mod listener;
pub mod liveness;
pub mod reader;
pub mod session;
pub mod tracing;
pub mod transport;

pub use config::{Config, PortConfig, SessionConfig};
pub use error::{Error, OpenError, Result};
pub use listener::{ConnectionListener, LinkEvent, ReadCallback};
pub use liveness::LinkStatus;
pub use reader::ReaderState;
pub use session::Session;
pub use transport::{Connector, PortMode, SerialConnector};
