//! The reliable transport layer: connection multiplexing over the packet
//! service, stop-and-wait data transfer, and graceful teardown (§4.2, §4.3).

mod connection;
mod key;
mod multiplexer;

pub use connection::{CloseNotify, Connection, RetryPolicy, SendFn, State};
pub use key::ConnectionKey;
pub use multiplexer::Multiplexer;
