//! The public API surface (`spec.md` §6): `init`, `begin_transfer`,
//! `end_transfer`, `finalize`, bundled into a single owned value per the
//! Module-level state design note in `spec.md` §9 ("bundle these into a
//! single engine value created by `init`").

use crate::config::Config;
use crate::error::CouplerError;
use crate::message::{Communicator, PendingSend};
use crate::router::Router;
use crate::tile::Tile;
use crate::transfer::Transfer;
use crate::weights::WeightsSource;
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info};

/// Owns the Router, the Config, the substrate communicator, and any
/// send handles still outstanding from the previous cycle. There is one
/// `Engine` per worker process; the design note explicitly does not
/// require reentrancy. The communicator is `Arc`-shared rather than
/// uniquely owned so that [`run_or_abort`] can keep a handle to it for the
/// collective abort path even after handing one off to build the `Engine`.
pub struct Engine {
    config: Arc<Config>,
    router: Router,
    communicator: Arc<dyn Communicator>,
    pending_sends: Vec<Box<dyn PendingSend>>,
}

impl Engine {
    /// Constructs the Config and Router for this worker (`spec.md` §6's
    /// `init`). Collective: performs the descriptor-exchange all-gather.
    pub fn init(
        config_dir: &Path,
        grid_name: &str,
        lis: i32,
        lie: i32,
        ljs: i32,
        lje: i32,
        gis: i32,
        gie: i32,
        gjs: i32,
        gje: i32,
        communicator: Arc<dyn Communicator>,
        weights: &dyn WeightsSource,
    ) -> Result<Self, CouplerError> {
        let config = Arc::new(Config::load(config_dir, grid_name)?);
        let tile_id = communicator.rank() as i32;
        let local_tile = Tile::new(tile_id, lis, lie, ljs, lje, gis, gie, gjs, gje);
        let router = Router::build(&config, communicator.as_ref(), local_tile, weights)?;
        Ok(Self {
            config,
            router,
            communicator,
            pending_sends: Vec::new(),
        })
    }

    /// Opens a new exchange cycle with `peer_grid`, draining any unfinished
    /// non-blocking sends left over from the previous cycle first
    /// (`spec.md` §4.5's `Begin`).
    pub fn begin_transfer(
        &mut self,
        time: i64,
        peer_grid: &str,
    ) -> Result<Transfer<'_>, CouplerError> {
        if !self.config.is_peer_grid(peer_grid) {
            return Err(CouplerError::unknown_peer_grid(peer_grid));
        }
        for pending in self.pending_sends.drain(..) {
            pending.wait();
        }
        Ok(Transfer::new(
            peer_grid.to_string(),
            time,
            Arc::clone(&self.config),
            self.router.send_mappings(peer_grid).to_vec(),
            self.router.recv_mappings(peer_grid).to_vec(),
        ))
    }

    /// Whether `field_name` is permitted on the send edge to `peer_grid`.
    /// A pre-flight query for callers picking a direction (see
    /// `src/bin/smoke.rs`); [`Transfer::put`](crate::transfer::Transfer::put)
    /// enforces the same check itself, so calling this first is optional.
    pub fn check_send(&self, field_name: &str, peer_grid: &str) -> Result<(), CouplerError> {
        self.config.check_send(field_name, peer_grid).map_err(CouplerError::Config)
    }

    /// Whether `field_name` is permitted on the receive edge from
    /// `peer_grid`. [`Transfer::get`](crate::transfer::Transfer::get)
    /// enforces the same check itself, so calling this first is optional.
    pub fn check_recv(&self, field_name: &str, peer_grid: &str) -> Result<(), CouplerError> {
        self.config.check_recv(field_name, peer_grid).map_err(CouplerError::Config)
    }

    /// Executes a Transfer obtained from [`Engine::begin_transfer`],
    /// retaining any still-outstanding send handles for the next cycle
    /// (`spec.md` §4.5's `End`).
    pub fn end_transfer(&mut self, transfer: Transfer<'_>) -> Result<(), CouplerError> {
        let pending = transfer.end(self.communicator.as_ref())?;
        self.pending_sends.extend(pending);
        Ok(())
    }

    /// Drains outstanding sends and releases the Router (`spec.md` §4.6).
    /// Taking `self` by value makes "Finalize while a Transfer is open"
    /// unrepresentable: an open `Transfer` does not borrow from `Engine`,
    /// but a caller mid-cycle holds the only `Transfer` value and hasn't
    /// called `end_transfer` yet, so `Engine` itself is still free to move
    /// here — the invariant holds by construction rather than by a runtime
    /// check.
    pub fn finalize(mut self) {
        for pending in self.pending_sends.drain(..) {
            pending.wait();
        }
        info!(grid = self.config.my_grid(), "finalized coupler engine");
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn router(&self) -> &Router {
        &self.router
    }
}

/// Runs `body`, and on any `CouplerError`, logs it and aborts the world
/// communicator — the single top-level handler the error taxonomy in
/// `spec.md` §7 calls for ("a silent divergence between ranks is worse
/// than a crash"). `body` receives its own clone of the `Arc` so it can
/// build the `Engine`; this function keeps a clone for the abort path.
pub fn run_or_abort<F>(communicator: Arc<dyn Communicator>, body: F) -> !
where
    F: FnOnce(Arc<dyn Communicator>) -> Result<(), CouplerError>,
{
    let abort_handle = Arc::clone(&communicator);
    match body(communicator) {
        Ok(()) => std::process::exit(0),
        Err(err) => {
            error!(error = %err, "fatal coupler error");
            abort_handle.abort(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::LoopbackCommunicator;
    use crate::weights::{SortKey, WeightStreams, WeightsSource};
    use std::thread;

    struct IdentityWeights;

    impl WeightsSource for IdentityWeights {
        fn read(
            &self,
            _src_grid: &str,
            _dst_grid: &str,
            _sort_by: SortKey,
        ) -> Result<WeightStreams, crate::error::ConfigError> {
            let points: Vec<u32> = (1..=16).collect();
            Ok(WeightStreams {
                src: points.clone(),
                dst: points.clone(),
                wgt: vec![1.0; points.len()],
            })
        }
    }

    fn write_bidirectional_config(dir: &std::path::Path) {
        std::fs::create_dir_all(dir).unwrap();
        std::fs::write(
            dir.join("config.yaml"),
            "mappings:\n  \
             - source_grid: ocean\n    destination_grid: ice\n    fields: [sst]\n  \
             - source_grid: ice\n    destination_grid: ocean\n    fields: [sst]\n",
        )
        .unwrap();
    }

    /// Seed scenario 1 (`spec.md` §8): two workers, identity remap on
    /// matched 4x4 grids; the literal `sst` payload arrives unchanged and
    /// in the same order on the receiving side.
    #[test]
    fn seed_scenario_1_identity_remap_round_trip() {
        let (a, b) = LoopbackCommunicator::pair();
        let sst = [
            292.1, 295.7, 290.5, 287.9, 291.3, 294.3, 291.8, 290.0, 292.1, 295.2, 290.8, 284.7,
            293.3, 290.1, 297.8, 293.4,
        ];

        let sender = {
            let sst = sst;
            thread::spawn(move || {
                let dir = std::env::temp_dir()
                    .join(format!("fc-engine-test-ocean-{}", std::process::id()));
                write_bidirectional_config(&dir);
                let mut engine = Engine::init(
                    &dir,
                    "ocean",
                    0,
                    4,
                    0,
                    4,
                    0,
                    4,
                    0,
                    4,
                    Arc::new(a),
                    &IdentityWeights,
                )
                .unwrap();
                let mut transfer = engine.begin_transfer(0, "ice").unwrap();
                transfer.put("sst", &sst).unwrap();
                engine.end_transfer(transfer).unwrap();
                engine.finalize();
                std::fs::remove_dir_all(&dir).ok();
            })
        };

        let receiver = thread::spawn(move || {
            let dir =
                std::env::temp_dir().join(format!("fc-engine-test-ice-{}", std::process::id()));
            write_bidirectional_config(&dir);
            let mut engine = Engine::init(
                &dir, "ice", 0, 4, 0, 4, 0, 4, 0, 4, Arc::new(b), &IdentityWeights,
            )
            .unwrap();
            let mut recv_buf = [0.0; 16];
            let mut transfer = engine.begin_transfer(0, "ocean").unwrap();
            transfer.get("sst", &mut recv_buf).unwrap();
            engine.end_transfer(transfer).unwrap();
            engine.finalize();
            std::fs::remove_dir_all(&dir).ok();
            recv_buf
        });

        sender.join().unwrap();
        let received = receiver.join().unwrap();
        assert_eq!(received, sst);
    }

    /// Seed scenario 5 (`spec.md` §8): Put then Get in one Transfer is a
    /// protocol-state error, surfaced through the full `Engine` API.
    #[test]
    fn seed_scenario_5_put_then_get_is_a_protocol_error() {
        let dir =
            std::env::temp_dir().join(format!("fc-engine-test-protocol-{}", std::process::id()));
        write_bidirectional_config(&dir);
        let mut engine = Engine::init(
            &dir,
            "ocean",
            0,
            4,
            0,
            4,
            0,
            4,
            0,
            4,
            Arc::new(crate::message::NullCommunicator::new()),
            &IdentityWeights,
        )
        .unwrap();
        let mut transfer = engine.begin_transfer(0, "ice").unwrap();
        transfer.put("sst", &[0.0; 16]).unwrap();
        let mut buf = [0.0; 16];
        let err = transfer.get("sst", &mut buf).unwrap_err();
        assert!(matches!(err, CouplerError::ProtocolState(_)));
        std::fs::remove_dir_all(&dir).ok();
    }
}
