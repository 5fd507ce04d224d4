//! Provides a single-rank communicator for the serial, non-distributed case.
//!
//! Useful for tests and for running a single coupled component with no
//! peers. `gather`/`broadcast` are identities (there is only one rank to
//! gather from or broadcast to); `isend`/`recv` have no possible peer and
//! are `unimplemented`.

use super::comm::{Communicator, PendingSend};

pub struct NullCommunicator {}

impl NullCommunicator {
    pub fn new() -> Self {
        Self {}
    }
}

impl Communicator for NullCommunicator {
    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn gather(&self, send_buf: &[u8], _root: usize) -> Vec<u8> {
        send_buf.to_vec()
    }

    fn broadcast(&self, _buf: &mut Vec<u8>, _root: usize) {}

    fn isend(&self, _dest: usize, _tag: i32, _data: Vec<u8>) -> Box<dyn PendingSend> {
        unimplemented!("cannot send on a null communicator: there is no peer rank")
    }

    fn recv(&self, _source: usize, _tag: i32) -> Vec<u8> {
        unimplemented!("cannot recv on a null communicator: there is no peer rank")
    }

    fn abort(&self, code: i32) -> ! {
        std::process::exit(code)
    }
}

impl Default for NullCommunicator {
    fn default() -> Self {
        Self::new()
    }
}
