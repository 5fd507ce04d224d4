//! The remapping weight table abstraction (`spec.md` §4.3, §6): three
//! aligned streams of source points, destination points, and weights, that
//! can be read and sorted by either key.

use crate::error::ConfigError;
use crate::tile::GlobalPoint;
use std::fs;
use std::path::Path;

/// Weights at or below this magnitude are logically absent (`spec.md`
/// §4.3). The original C++ implementation defined this threshold as `1e12`
/// and tested `weight > threshold`, which never fires for real ESMF weights
/// in `[0, 1]` — an evident off-by-orders-of-magnitude bug
/// (`examples/original_source/lib/router.cc`). This crate follows
/// `spec.md`, not that bug.
pub const WEIGHT_THRESHOLD: f64 = 1e-12;

/// Which column becomes the monotonically non-decreasing key after sorting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortKey {
    Source,
    Destination,
}

/// Three aligned streams read from one remapping weights file: aligned-index
/// triples `(src[i], dst[i], wgt[i])` remain meaningful after sorting.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WeightStreams {
    pub src: Vec<GlobalPoint>,
    pub dst: Vec<GlobalPoint>,
    pub wgt: Vec<f64>,
}

impl WeightStreams {
    pub fn len(&self) -> usize {
        self.src.len()
    }

    pub fn is_empty(&self) -> bool {
        self.src.is_empty()
    }

    /// Sorts all three streams in lockstep by the chosen key, so that
    /// `(src[i], dst[i], wgt[i])` triples survive the sort.
    pub fn sort_by(&mut self, key: SortKey) {
        let mut perm: Vec<usize> = (0..self.len()).collect();
        match key {
            SortKey::Source => perm.sort_by_key(|&i| self.src[i]),
            SortKey::Destination => perm.sort_by_key(|&i| self.dst[i]),
        }
        self.src = perm.iter().map(|&i| self.src[i]).collect();
        self.dst = perm.iter().map(|&i| self.dst[i]).collect();
        self.wgt = perm.iter().map(|&i| self.wgt[i]).collect();
    }
}

/// Reads the three aligned streams for a directed grid pair, sorted by the
/// requested key. The producer of this data (an ESMF/NetCDF-style weight
/// generator) is an external collaborator per `spec.md` §1/§6; this trait
/// is the seam the router depends on.
pub trait WeightsSource {
    fn read(
        &self,
        src_grid: &str,
        dst_grid: &str,
        sort_by: SortKey,
    ) -> Result<WeightStreams, ConfigError>;
}

/// Reads a remapping weights file from `<config_dir>/<src>_to_<dst>_rmp.nc`.
///
/// True NetCDF/ESMF ingestion is an out-of-scope external collaborator
/// (`spec.md` §1); this reader instead uses a small self-contained columnar
/// binary layout with the same three variables the spec describes (`col`,
/// `row`, `S`): a little-endian `u32` point count `n`, then `n` `u32`
/// source points, `n` `u32` destination points, `n` `f64` weights.
pub struct RmpFile {
    config_dir: std::path::PathBuf,
}

impl RmpFile {
    pub fn new(config_dir: impl Into<std::path::PathBuf>) -> Self {
        Self {
            config_dir: config_dir.into(),
        }
    }

    fn path_for(&self, src_grid: &str, dst_grid: &str) -> std::path::PathBuf {
        self.config_dir
            .join(format!("{src_grid}_to_{dst_grid}_rmp.nc"))
    }

    /// Serializes streams to this reader's binary layout. Used by tests and
    /// by tooling that synthesizes fixture weight files; the production
    /// weight generator (out of scope) would instead emit real NetCDF.
    pub fn write(path: &Path, streams: &WeightStreams) -> std::io::Result<()> {
        let mut buf = Vec::with_capacity(4 + streams.len() * (4 + 4 + 8));
        buf.extend_from_slice(&(streams.len() as u32).to_le_bytes());
        for &s in &streams.src {
            buf.extend_from_slice(&s.to_le_bytes());
        }
        for &d in &streams.dst {
            buf.extend_from_slice(&d.to_le_bytes());
        }
        for &w in &streams.wgt {
            buf.extend_from_slice(&w.to_le_bytes());
        }
        fs::write(path, buf)
    }
}

impl WeightsSource for RmpFile {
    fn read(
        &self,
        src_grid: &str,
        dst_grid: &str,
        sort_by: SortKey,
    ) -> Result<WeightStreams, ConfigError> {
        let path = self.path_for(src_grid, dst_grid);
        let bytes = fs::read(&path).map_err(|_| ConfigError::MissingWeightsFile {
            path: path.display().to_string(),
        })?;
        let malformed = |reason: &str| ConfigError::MalformedWeights {
            path: path.display().to_string(),
            reason: reason.to_string(),
        };
        if bytes.len() < 4 {
            return Err(malformed("truncated header"));
        }
        let n = u32::from_le_bytes(bytes[0..4].try_into().unwrap()) as usize;
        let want = 4 + n * 4 + n * 4 + n * 8;
        if bytes.len() != want {
            return Err(malformed("length does not match declared point count"));
        }
        let mut off = 4;
        let src: Vec<GlobalPoint> = bytes[off..off + n * 4]
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes(c.try_into().unwrap()))
            .collect();
        off += n * 4;
        let dst: Vec<GlobalPoint> = bytes[off..off + n * 4]
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes(c.try_into().unwrap()))
            .collect();
        off += n * 4;
        let wgt: Vec<f64> = bytes[off..off + n * 8]
            .chunks_exact(8)
            .map(|c| f64::from_le_bytes(c.try_into().unwrap()))
            .collect();

        let mut streams = WeightStreams { src, dst, wgt };
        streams.sort_by(sort_by);
        Ok(streams)
    }
}
