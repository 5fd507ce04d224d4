//! Per-worker orchestrator: gathers tile descriptors from the fleet,
//! constructs the candidate mapping graph, scans the weight tables to
//! populate it, and prunes empty mappings (`spec.md` §4.4).

use crate::config::Config;
use crate::error::CouplerError;
use crate::mapping::{Direction, Mapping};
use crate::message::Communicator;
use crate::tile::{GlobalPoint, Tile, RECORD_LEN};
use crate::weights::{SortKey, WeightStreams, WeightsSource, WEIGHT_THRESHOLD};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

/// Capacity, in 4-byte slots, of the grid-name field of a descriptor
/// record (`spec.md` §6). Names longer than this are a configuration error
/// a caller should catch before construction.
pub const MAX_GRID_NAME: usize = 32;

/// Total size, in 4-byte integers, of one packed descriptor.
const DESCRIPTOR_LEN: usize = MAX_GRID_NAME + RECORD_LEN;

/// Packs a grid name and tile descriptor into the fixed wire record used by
/// the all-gather collective: `MAX_GRID_NAME` name-byte slots (one `i32`
/// per byte, zero-extended, null-padded), then the 9-integer tile record.
/// Hand-rolled little-endian packing, matching the style of
/// `gridiron::message::util`'s byte-array helpers rather than a generic
/// serialization format — this is a small, fixed, hot collective.
fn pack_descriptor(grid_name: &str, tile: &Tile) -> Vec<u8> {
    assert!(
        grid_name.len() <= MAX_GRID_NAME,
        "grid name '{grid_name}' exceeds MAX_GRID_NAME ({MAX_GRID_NAME})"
    );
    let mut out = Vec::with_capacity(DESCRIPTOR_LEN * 4);
    let name_bytes = grid_name.as_bytes();
    for slot in 0..MAX_GRID_NAME {
        let b = name_bytes.get(slot).copied().unwrap_or(0) as i32;
        out.extend_from_slice(&b.to_le_bytes());
    }
    for field in tile.pack() {
        out.extend_from_slice(&field.to_le_bytes());
    }
    out
}

/// Inverse of [`pack_descriptor`].
fn unpack_descriptor(record: &[u8]) -> (String, Tile) {
    assert_eq!(record.len(), DESCRIPTOR_LEN * 4);
    let mut name_bytes = Vec::with_capacity(MAX_GRID_NAME);
    for slot in 0..MAX_GRID_NAME {
        let off = slot * 4;
        let v = i32::from_le_bytes(record[off..off + 4].try_into().unwrap());
        if v == 0 {
            break;
        }
        name_bytes.push(v as u8);
    }
    let grid_name = String::from_utf8(name_bytes).expect("grid name is not valid UTF-8");

    let mut tile_record = [0i32; RECORD_LEN];
    let base = MAX_GRID_NAME * 4;
    for (i, slot) in tile_record.iter_mut().enumerate() {
        let off = base + i * 4;
        *slot = i32::from_le_bytes(record[off..off + 4].try_into().unwrap());
    }
    (grid_name, Tile::unpack(tile_record))
}

/// Per-worker routing state: the local tile and the send/receive mapping
/// lists, keyed by peer grid name (`spec.md` §3).
pub struct Router {
    local_tile: Tile,
    send_mappings: HashMap<String, Vec<Mapping>>,
    recv_mappings: HashMap<String, Vec<Mapping>>,
}

impl Router {
    /// Runs the full construction sequence: descriptor exchange, candidate
    /// mapping graph, weight-table scan, prune. `communicator` is used only
    /// for the one all-gather collective; all weight scanning is local.
    pub fn build(
        config: &Config,
        communicator: &dyn Communicator,
        local_tile: Tile,
        weights: &dyn WeightsSource,
    ) -> Result<Self, CouplerError> {
        if let Some(declared) = config.declared_grid_size(config.my_grid()) {
            local_tile.assert_grid_size(declared)?;
        }
        let candidates = Self::exchange_descriptors(config, communicator, &local_tile)?;

        let mut send_mappings: HashMap<String, Vec<Mapping>> = HashMap::new();
        for (grid, tiles) in &candidates.send {
            send_mappings.insert(
                grid.clone(),
                tiles
                    .iter()
                    .map(|t| Mapping::new(Arc::clone(t), Direction::Send))
                    .collect(),
            );
        }
        let mut recv_mappings: HashMap<String, Vec<Mapping>> = HashMap::new();
        for (grid, tiles) in &candidates.recv {
            recv_mappings.insert(
                grid.clone(),
                tiles
                    .iter()
                    .map(|t| Mapping::new(Arc::clone(t), Direction::Recv))
                    .collect(),
            );
        }

        for grid in config.send_grids() {
            let mut streams = weights.read(config.my_grid(), grid, SortKey::Source)?;
            drop_below_threshold(&mut streams);
            if let Some(mappings) = send_mappings.get_mut(grid) {
                match_send_grid(&local_tile, mappings, &streams);
            }
        }
        for grid in config.recv_grids() {
            let mut streams = weights.read(grid, config.my_grid(), SortKey::Destination)?;
            drop_below_threshold(&mut streams);
            if let Some(mappings) = recv_mappings.get_mut(grid) {
                match_recv_grid(&local_tile, mappings, &streams);
            }
        }

        for mappings in send_mappings.values_mut() {
            mappings.retain(|m| !m.is_empty());
        }
        for mappings in recv_mappings.values_mut() {
            mappings.retain(|m| !m.is_empty());
        }

        Ok(Self {
            local_tile,
            send_mappings,
            recv_mappings,
        })
    }

    fn exchange_descriptors(
        config: &Config,
        communicator: &dyn Communicator,
        local_tile: &Tile,
    ) -> Result<CandidateTiles, CouplerError> {
        let own_record = pack_descriptor(config.my_grid(), local_tile);
        let all = communicator.all_gather(&own_record);
        let record_bytes = DESCRIPTOR_LEN * 4;
        if all.len() % record_bytes != 0 {
            return Err(CouplerError::Substrate(
                "all-gather returned a buffer not a multiple of the descriptor record size"
                    .to_string(),
            ));
        }

        // The gather orders chunks by rank, so the own-descriptor skip uses
        // rank position rather than matching `tile_id` back against the
        // local tile — `tile_id` is only unique within one grid, and two
        // different grids' tiles could otherwise collide.
        let own_rank = communicator.rank();
        let mut candidates = CandidateTiles::default();
        for (rank, chunk) in all.chunks_exact(record_bytes).enumerate() {
            if rank == own_rank {
                continue;
            }
            let (grid_name, tile) = unpack_descriptor(chunk);
            if !config.is_peer_grid(&grid_name) {
                continue;
            }
            let tile = Arc::new(tile);
            if config.is_send_grid(&grid_name) {
                candidates
                    .send
                    .entry(grid_name.clone())
                    .or_default()
                    .push(Arc::clone(&tile));
            }
            if config.is_recv_grid(&grid_name) {
                candidates.recv.entry(grid_name).or_default().push(tile);
            }
        }
        Ok(candidates)
    }

    pub fn local_tile(&self) -> &Tile {
        &self.local_tile
    }

    pub fn send_mappings(&self, peer_grid: &str) -> &[Mapping] {
        self.send_mappings
            .get(peer_grid)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn recv_mappings(&self, peer_grid: &str) -> &[Mapping] {
        self.recv_mappings
            .get(peer_grid)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

#[derive(Default)]
struct CandidateTiles {
    send: HashMap<String, Vec<Arc<Tile>>>,
    recv: HashMap<String, Vec<Arc<Tile>>>,
}

fn drop_below_threshold(streams: &mut WeightStreams) {
    let mut i = 0;
    while i < streams.wgt.len() {
        if streams.wgt[i].abs() <= WEIGHT_THRESHOLD {
            streams.src.remove(i);
            streams.dst.remove(i);
            streams.wgt.remove(i);
        } else {
            i += 1;
        }
    }
}

/// Finds the one candidate tile owning `point`, if any. Candidates on a
/// grid are assumed pairwise disjoint (`spec.md` §4.4.2), so a linear scan
/// terminates at the first match.
fn find_owner<'a>(candidates: &'a [Mapping], point: GlobalPoint) -> Option<&'a Arc<Tile>> {
    candidates
        .iter()
        .map(Mapping::remote_tile)
        .find(|t| t.has_point(point))
}

fn find_owner_mut<'a>(
    candidates: &'a mut [Mapping],
    point: GlobalPoint,
) -> Option<&'a mut Mapping> {
    candidates.iter_mut().find(|m| m.remote_tile().has_point(point))
}

/// The two-pointer sorted-merge match for a send grid (`spec.md` §4.4.3,
/// step 1): weight streams sorted by source, matched against the local
/// tile's sorted points. A-side is the remote tile, B-side the local tile.
pub fn match_send_grid(local: &Tile, mappings: &mut [Mapping], streams: &WeightStreams) {
    let mut cursor = 0usize;
    for &p in local.points() {
        while cursor < streams.src.len() && streams.src[cursor] < p {
            cursor += 1;
        }
        let mut k = cursor;
        while k < streams.src.len() && streams.src[k] == p {
            let dst = streams.dst[k];
            let w = streams.wgt[k];
            match find_owner_mut(mappings, dst) {
                Some(mapping) => {
                    let a = mapping.remote_tile().local_of(dst);
                    let b = local.local_of(p);
                    mapping.add_link(a, b, w);
                }
                None => warn!(
                    destination_point = dst,
                    "remapping weight references a destination point with no owning tile on a declared peer grid; dropping"
                ),
            }
            k += 1;
        }
        if k < streams.src.len() && streams.src[k] > p {
            cursor = k;
        }
    }
}

/// The two-pointer sorted-merge match for a receive grid (`spec.md` §4.4.3,
/// step 2): weight streams sorted by destination, matched against the
/// local tile's sorted points. A-side is the local tile, B-side the
/// remote tile holding the source point.
pub fn match_recv_grid(local: &Tile, mappings: &mut [Mapping], streams: &WeightStreams) {
    let mut cursor = 0usize;
    for &p in local.points() {
        while cursor < streams.dst.len() && streams.dst[cursor] < p {
            cursor += 1;
        }
        let mut k = cursor;
        while k < streams.dst.len() && streams.dst[k] == p {
            let src = streams.src[k];
            let w = streams.wgt[k];
            match find_owner(mappings, src) {
                Some(remote) => {
                    let remote = Arc::clone(remote);
                    let b = remote.local_of(src);
                    let a = local.local_of(p);
                    let mapping = mappings
                        .iter_mut()
                        .find(|m| Arc::ptr_eq(m.remote_tile(), &remote))
                        .expect("owner tile must back some candidate mapping");
                    mapping.add_link(a, b, w);
                }
                None => warn!(
                    source_point = src,
                    "remapping weight references a source point with no owning tile on a declared peer grid; dropping"
                ),
            }
            k += 1;
        }
        if k < streams.dst.len() && streams.dst[k] > p {
            cursor = k;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::LoopbackCommunicator;
    use std::thread;

    fn grid4x4(tile_id: i32, lis: i32, lie: i32, ljs: i32, lje: i32) -> Tile {
        Tile::new(tile_id, lis, lie, ljs, lje, 0, 4, 0, 4)
    }

    #[test]
    fn descriptor_round_trips_through_pack_unpack() {
        let tile = grid4x4(3, 0, 2, 0, 2);
        let packed = pack_descriptor("atmos", &tile);
        let (name, round) = unpack_descriptor(&packed);
        assert_eq!(name, "atmos");
        assert_eq!(round, tile);
    }

    #[test]
    fn match_send_grid_builds_identity_remap() {
        // Local tile is the left half of a 2x2 grid (points 1,3 by the
        // row-major formula); remote tile is a single-tile "ocean" grid
        // covering the same 2x2 domain with matching point ids.
        let local = Tile::new(0, 0, 2, 0, 1, 0, 2, 0, 2);
        let remote = Arc::new(Tile::new(1, 0, 2, 0, 2, 0, 2, 0, 2));
        let mut mappings = vec![Mapping::new(Arc::clone(&remote), Direction::Send)];
        let streams = WeightStreams {
            src: local.points().to_vec(),
            dst: local.points().to_vec(),
            wgt: vec![1.0; local.points().len()],
        };
        match_send_grid(&local, &mut mappings, &streams);
        assert!(!mappings[0].is_empty());
        assert_eq!(mappings[0].a_point_count(), local.points().len());
    }

    #[test]
    fn match_recv_grid_builds_identity_remap() {
        let local = Tile::new(0, 0, 2, 0, 1, 0, 2, 0, 2);
        let remote = Arc::new(Tile::new(1, 0, 2, 0, 2, 0, 2, 0, 2));
        let mut mappings = vec![Mapping::new(Arc::clone(&remote), Direction::Recv)];
        let streams = WeightStreams {
            src: local.points().to_vec(),
            dst: local.points().to_vec(),
            wgt: vec![1.0; local.points().len()],
        };
        match_recv_grid(&local, &mut mappings, &streams);
        assert!(!mappings[0].is_empty());
        assert_eq!(mappings[0].a_point_count(), local.points().len());
    }

    #[test]
    fn weight_at_or_below_threshold_is_dropped_before_matching() {
        let mut streams = WeightStreams {
            src: vec![1, 2, 3],
            dst: vec![1, 2, 3],
            wgt: vec![1.0, WEIGHT_THRESHOLD, 1e-20],
        };
        drop_below_threshold(&mut streams);
        assert_eq!(streams.src, vec![1]);
    }

    struct FixtureWeights {
        send: WeightStreams,
        recv: WeightStreams,
    }

    impl WeightsSource for FixtureWeights {
        fn read(
            &self,
            _src_grid: &str,
            _dst_grid: &str,
            sort_by: SortKey,
        ) -> Result<WeightStreams, crate::error::ConfigError> {
            let mut s = match sort_by {
                SortKey::Source => self.send.clone(),
                SortKey::Destination => self.recv.clone(),
            };
            s.sort_by(sort_by);
            Ok(s)
        }
    }

    /// Seed scenario 6 (`spec.md` §8): two workers, one "atmos" tile and
    /// one "ocean" tile over the same 2x2 grid, a one-to-one identity
    /// remap in both directions, exchanged over a real two-party
    /// communicator rather than a single-rank stub.
    #[test]
    fn two_worker_descriptor_exchange_builds_mappings_on_both_sides() {
        let (a, b) = LoopbackCommunicator::pair();

        let atmos_thread = thread::spawn(move || {
            let mut cfg_yaml_dir = std::env::temp_dir();
            cfg_yaml_dir.push(format!("fc-router-test-atmos-{}", std::process::id()));
            std::fs::create_dir_all(&cfg_yaml_dir).unwrap();
            std::fs::write(
                cfg_yaml_dir.join("config.yaml"),
                "mappings:\n  - source_grid: atmos\n    destination_grid: ocean\n    fields: [t]\n",
            )
            .unwrap();
            let config = Config::load(&cfg_yaml_dir, "atmos").unwrap();
            let local = Tile::new(0, 0, 2, 0, 2, 0, 2, 0, 2);
            let weights = FixtureWeights {
                send: WeightStreams {
                    src: local.points().to_vec(),
                    dst: local.points().to_vec(),
                    wgt: vec![1.0; local.points().len()],
                },
                recv: WeightStreams::default(),
            };
            let router = Router::build(&config, &a, local, &weights).unwrap();
            std::fs::remove_dir_all(&cfg_yaml_dir).ok();
            router.send_mappings("ocean").len()
        });

        let ocean_thread = thread::spawn(move || {
            let mut cfg_yaml_dir = std::env::temp_dir();
            cfg_yaml_dir.push(format!("fc-router-test-ocean-{}", std::process::id()));
            std::fs::create_dir_all(&cfg_yaml_dir).unwrap();
            std::fs::write(
                cfg_yaml_dir.join("config.yaml"),
                "mappings:\n  - source_grid: atmos\n    destination_grid: ocean\n    fields: [t]\n",
            )
            .unwrap();
            let config = Config::load(&cfg_yaml_dir, "ocean").unwrap();
            let local = Tile::new(1, 0, 2, 0, 2, 0, 2, 0, 2);
            let weights = FixtureWeights {
                send: WeightStreams::default(),
                recv: WeightStreams {
                    src: local.points().to_vec(),
                    dst: local.points().to_vec(),
                    wgt: vec![1.0; local.points().len()],
                },
            };
            let router = Router::build(&config, &b, local, &weights).unwrap();
            std::fs::remove_dir_all(&cfg_yaml_dir).ok();
            router.recv_mappings("atmos").len()
        });

        assert_eq!(atmos_thread.join().unwrap(), 1);
        assert_eq!(ocean_thread.join().unwrap(), 1);
    }

    /// Seed scenario 4 (`spec.md` §8): a `config.yaml`-declared grid size
    /// that disagrees with the local tile's own `(gie-gis)*(gje-gjs)`
    /// extent aborts Router construction before any descriptor exchange.
    #[test]
    fn declared_grid_size_mismatch_is_fatal() {
        let dir = std::env::temp_dir().join(format!(
            "fc-router-test-grid-size-mismatch-{}",
            std::process::id()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join("config.yaml"),
            "mappings:\n  - source_grid: atmos\n    destination_grid: ocean\n    fields: [t]\n\
             grid_sizes:\n  atmos: 64\n",
        )
        .unwrap();
        let config = Config::load(&dir, "atmos").unwrap();
        let local = grid4x4(0, 0, 4, 0, 4);
        let weights = FixtureWeights {
            send: WeightStreams::default(),
            recv: WeightStreams::default(),
        };
        let communicator = LoopbackCommunicator::fleet(1).remove(0);
        let err = Router::build(&config, &communicator, local, &weights).unwrap_err();
        assert!(matches!(
            err,
            CouplerError::Config(crate::error::ConfigError::GridSizeMismatch { .. })
        ));
        std::fs::remove_dir_all(&dir).ok();
    }
}
