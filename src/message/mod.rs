//! A minimal distributed message-passing API.
//!
//! This module exports a minimal message-passing API, encapsulated by the
//! [`comm::Communicator`] trait. Implementors only need to write `gather`,
//! `broadcast`, `isend`, `recv`, and `abort` for a given transport layer (a
//! pure-Rust TCP example is included in [`tcp::TcpCommunicator`]). The trait
//! then provides a default implementation of `all_gather`, the collective
//! the router's descriptor exchange uses.

pub mod comm;
#[cfg(test)]
pub mod loopback;
#[cfg(feature = "mpi")]
pub mod mpi;
pub mod null;
pub mod tcp;
mod util;

pub use comm::{Communicator, PendingSend};
#[cfg(test)]
pub use loopback::LoopbackCommunicator;
#[cfg(feature = "mpi")]
pub use mpi::MpiCommunicator;
pub use null::NullCommunicator;
pub use tcp::TcpCommunicator;
