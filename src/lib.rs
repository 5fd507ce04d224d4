pub mod config;
pub mod engine;
pub mod error;
pub mod mapping;
pub mod message;
#[cfg(feature = "mpi")]
pub mod mpi;
pub mod router;
pub mod tile;
pub mod transfer;
pub mod weights;
