//! Session Glue
//!
//! The codec and routing a consumer transport calls into. The transport
//! itself (sockets, framing) lives outside this crate.

pub mod fanout;
pub mod messages;
pub mod router;

pub use fanout::FanoutDispatcher;
pub use messages::{ClientMessage, ServerMessage};
pub use router::{ConsumerSession, SessionRouter};
