//! # Adapters Layer (Hexagonal Architecture)
//!
//! Implements the outbound ports: provider adapters and update dispatchers.

mod dispatch;
mod router;
mod simulated;

pub use dispatch::{BroadcastDispatcher, DispatcherSet, MemoryDispatcher};
pub use router::{ProtocolRouter, RoutedHandle};
pub use simulated::{ChannelLimits, SimHandle, SimulatedProvider};
