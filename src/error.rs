//! The coupler's error taxonomy (`spec.md` §7). Every fatal condition is a
//! `CouplerError`; the library never recovers from one locally. The single
//! top-level handler — [`crate::engine::Engine::run_or_abort`] — is the only
//! place a `CouplerError` is ever turned into a process abort, per the
//! propagation policy in `spec.md` §7: "a silent divergence between ranks is
//! worse than a crash."
//!
//! Numerical errors (category 3 in `spec.md` §7) have no variant here by
//! design: NaN or overflow in weighted accumulation is not detected by the
//! core, matching the original behavior.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CouplerError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Category 2 in `spec.md` §7: Put after Get (or vice versa) within one
    /// Transfer, End with nothing registered, Finalize with a Transfer
    /// open, or Put/Get outside a Transfer.
    #[error("protocol state error: {0}")]
    ProtocolState(String),

    /// Category 4 in `spec.md` §7: the message-passing substrate reported a
    /// non-success status. No retry.
    #[error("substrate error: {0}")]
    Substrate(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {path}")]
    MissingConfigFile { path: String },

    #[error("remapping weights file not found: {path}")]
    MissingWeightsFile { path: String },

    #[error("malformed config file {path}: {source}")]
    Malformed {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("malformed remapping weights file {path}: {reason}")]
    MalformedWeights { path: String, reason: String },

    #[error(
        "duplicate mapping entry: (source_grid = {source}, destination_grid = {destination}) \
         occurs more than once"
    )]
    DuplicateMapping { source: String, destination: String },

    #[error("grid size mismatch: declared {declared} points, box implies {computed}")]
    GridSizeMismatch { declared: i64, computed: i64 },

    #[error("field '{field}' is not permitted on the edge to/from grid '{grid}'")]
    UnknownField { field: String, grid: String },

    #[error("'{grid}' is not a peer grid of this worker's grid")]
    UnknownPeerGrid { grid: String },
}

impl CouplerError {
    pub fn grid_size_mismatch(declared: i64, computed: i64) -> Self {
        CouplerError::Config(ConfigError::GridSizeMismatch { declared, computed })
    }

    pub fn unknown_field(field: impl Into<String>, grid: impl Into<String>) -> Self {
        CouplerError::Config(ConfigError::UnknownField {
            field: field.into(),
            grid: grid.into(),
        })
    }

    pub fn unknown_peer_grid(grid: impl Into<String>) -> Self {
        CouplerError::Config(ConfigError::UnknownPeerGrid { grid: grid.into() })
    }

    pub fn protocol_state(message: impl Into<String>) -> Self {
        CouplerError::ProtocolState(message.into())
    }
}
