//! A minimal end-to-end run over real MPI: two ranks, two grids, one
//! transfer cycle each direction. Demonstrates the exit-code contract from
//! `spec.md` §6 (0 on clean `finalize`, 1 on any fatal error) rather than
//! serving as a test harness — run under `mpirun -n 2` with a `config.yaml`
//! and matching `*_rmp.nc` weight files in the directory given as `argv[1]`.

use fieldcoupler::engine::{run_or_abort, Engine};
use fieldcoupler::message::MpiCommunicator;
use fieldcoupler::weights::RmpFile;
use std::env;
use std::path::PathBuf;
use std::sync::Arc;

fn main() {
    let config_dir = PathBuf::from(env::args().nth(1).expect("usage: smoke <config_dir>"));
    let communicator: Arc<dyn fieldcoupler::message::Communicator> =
        Arc::new(MpiCommunicator::new());

    run_or_abort(communicator, move |communicator| {
        let grid_name = if communicator.rank() == 0 { "atmos" } else { "ocean" };
        let peer_grid = if communicator.rank() == 0 { "ocean" } else { "atmos" };
        let weights = RmpFile::new(&config_dir);

        let mut engine = Engine::init(
            &config_dir,
            grid_name,
            0,
            2,
            0,
            2,
            0,
            2,
            0,
            2,
            Arc::clone(&communicator),
            &weights,
        )?;

        let send_buf = [1.0, 2.0, 3.0, 4.0];
        let mut recv_buf = [0.0; 4];

        if engine.check_send("t", peer_grid).is_ok() {
            let mut transfer = engine.begin_transfer(0, peer_grid)?;
            transfer.put("t", &send_buf)?;
            engine.end_transfer(transfer)?;
        } else if engine.check_recv("t", peer_grid).is_ok() {
            let mut transfer = engine.begin_transfer(0, peer_grid)?;
            transfer.get("t", &mut recv_buf)?;
            engine.end_transfer(transfer)?;
        }

        engine.finalize();
        Ok(())
    })
}
