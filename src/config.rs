//! The coupling configuration: this worker's declarative view of which peer
//! grids it sends to and receives from, and which fields each edge permits
//! (`spec.md` §3, §6).

use crate::error::ConfigError;
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::path::Path;

/// The `config.yaml` schema, deserialized directly (`spec.md` §6).
#[derive(Debug, Deserialize)]
struct RawConfig {
    mappings: Vec<RawMapping>,
    #[serde(default)]
    grid_sizes: HashMap<String, i64>,
}

#[derive(Debug, Deserialize)]
struct RawMapping {
    source_grid: String,
    destination_grid: String,
    fields: Vec<String>,
}

/// This worker's immutable view of the declarative config: which peer grids
/// its own grid sends to / receives from, and which fields are allowed on
/// each edge. Two grids may appear in both `send_grids` and `recv_grids`
/// (`spec.md` §3).
#[derive(Debug, Clone)]
pub struct Config {
    my_grid: String,
    send_fields: HashMap<String, HashSet<String>>,
    recv_fields: HashMap<String, HashSet<String>>,
    grid_sizes: HashMap<String, i64>,
}

impl Config {
    /// Parses `<config_dir>/config.yaml` and narrows it to the edges that
    /// touch `my_grid`. A `(source_grid, destination_grid)` pair occurring
    /// more than once anywhere in the file is a fatal `DuplicateMapping`
    /// error, even if neither grid is `my_grid` — the whole file must be
    /// internally consistent, mirroring `parse_config`'s duplicate check in
    /// `examples/original_source/lib/config.cc`.
    pub fn load(config_dir: &Path, my_grid: &str) -> Result<Self, ConfigError> {
        let path = config_dir.join("config.yaml");
        let text = std::fs::read_to_string(&path).map_err(|_| ConfigError::MissingConfigFile {
            path: path.display().to_string(),
        })?;
        let raw: RawConfig = serde_yaml::from_str(&text).map_err(|source| ConfigError::Malformed {
            path: path.display().to_string(),
            source,
        })?;

        let mut seen = HashSet::new();
        let mut send_fields: HashMap<String, HashSet<String>> = HashMap::new();
        let mut recv_fields: HashMap<String, HashSet<String>> = HashMap::new();

        for m in raw.mappings {
            if !seen.insert((m.source_grid.clone(), m.destination_grid.clone())) {
                return Err(ConfigError::DuplicateMapping {
                    source: m.source_grid,
                    destination: m.destination_grid,
                });
            }
            if m.source_grid == my_grid {
                send_fields
                    .entry(m.destination_grid.clone())
                    .or_default()
                    .extend(m.fields.iter().cloned());
            }
            if m.destination_grid == my_grid {
                recv_fields
                    .entry(m.source_grid.clone())
                    .or_default()
                    .extend(m.fields.iter().cloned());
            }
        }

        Ok(Self {
            my_grid: my_grid.to_string(),
            send_fields,
            recv_fields,
            grid_sizes: raw.grid_sizes,
        })
    }

    pub fn my_grid(&self) -> &str {
        &self.my_grid
    }

    /// The declared global point count for `grid`, if `config.yaml`'s
    /// optional `grid_sizes` table lists one (`spec.md` §4.4.1). Absent
    /// when the caller doesn't want the mismatch check for that grid.
    pub fn declared_grid_size(&self, grid: &str) -> Option<i64> {
        self.grid_sizes.get(grid).copied()
    }

    pub fn send_grids(&self) -> impl Iterator<Item = &str> {
        self.send_fields.keys().map(String::as_str)
    }

    pub fn recv_grids(&self) -> impl Iterator<Item = &str> {
        self.recv_fields.keys().map(String::as_str)
    }

    pub fn is_send_grid(&self, grid: &str) -> bool {
        self.send_fields.contains_key(grid)
    }

    pub fn is_recv_grid(&self, grid: &str) -> bool {
        self.recv_fields.contains_key(grid)
    }

    /// True if `grid` is either a send or receive peer of this worker's grid
    /// — the set of grids the Router creates candidate tiles for.
    pub fn is_peer_grid(&self, grid: &str) -> bool {
        self.is_send_grid(grid) || self.is_recv_grid(grid)
    }

    /// Whether `field` is permitted on the send edge to `peer_grid`.
    /// `Err(UnknownPeerGrid)` if there's no send edge to that grid at all,
    /// `Err(UnknownField)` if the edge exists but doesn't list `field`.
    pub fn check_send(&self, field: &str, peer_grid: &str) -> Result<(), ConfigError> {
        let allowed = self
            .send_fields
            .get(peer_grid)
            .ok_or_else(|| ConfigError::UnknownPeerGrid {
                grid: peer_grid.to_string(),
            })?;
        if allowed.contains(field) {
            Ok(())
        } else {
            Err(ConfigError::UnknownField {
                field: field.to_string(),
                grid: peer_grid.to_string(),
            })
        }
    }

    /// Whether `field` is permitted on the receive edge from `peer_grid`.
    pub fn check_recv(&self, field: &str, peer_grid: &str) -> Result<(), ConfigError> {
        let allowed = self
            .recv_fields
            .get(peer_grid)
            .ok_or_else(|| ConfigError::UnknownPeerGrid {
                grid: peer_grid.to_string(),
            })?;
        if allowed.contains(field) {
            Ok(())
        } else {
            Err(ConfigError::UnknownField {
                field: field.to_string(),
                grid: peer_grid.to_string(),
            })
        }
    }
}
