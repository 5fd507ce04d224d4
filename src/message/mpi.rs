#![cfg(feature = "mpi")]
//! A [`Communicator`] backed by the MPI shim in [`crate::mpi`].

use crate::message::comm::{Communicator, PendingSend};
use crate::mpi;
use std::os::raw::c_void;

/// Owns the MPI init/finalize lifecycle: constructing one calls
/// `MPI_Init_thread`, dropping it calls `MPI_Finalize`. Exactly one instance
/// should exist per process, for its whole lifetime.
pub struct MpiCommunicator {
    rank: usize,
    size: usize,
}

impl MpiCommunicator {
    pub fn new() -> Self {
        let code = unsafe { mpi::fc_mpi_init() };
        assert_eq!(code, 0, "MPI_Init_thread failed");
        let rank = unsafe { mpi::fc_mpi_comm_rank() } as usize;
        let size = unsafe { mpi::fc_mpi_comm_size() } as usize;
        Self { rank, size }
    }
}

impl Default for MpiCommunicator {
    fn default() -> Self {
        Self::new()
    }
}

impl Communicator for MpiCommunicator {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn gather(&self, send_buf: &[u8], root: usize) -> Vec<u8> {
        let mut recv_buf = if self.rank == root {
            vec![0u8; send_buf.len() * self.size]
        } else {
            Vec::new()
        };
        unsafe {
            mpi::fc_mpi_gather(
                send_buf.as_ptr(),
                send_buf.len() as i32,
                recv_buf.as_mut_ptr(),
                root as i32,
            );
        }
        recv_buf
    }

    fn broadcast(&self, buf: &mut Vec<u8>, root: usize) {
        // `buf` is only sized correctly on `root`; broadcast its length first
        // so every other rank can resize before the payload `MPI_Bcast`,
        // which requires matching counts on all ranks.
        let mut len = buf.len() as i32;
        unsafe {
            mpi::fc_mpi_bcast(
                &mut len as *mut i32 as *mut u8,
                std::mem::size_of::<i32>() as i32,
                root as i32,
            );
        }
        if self.rank != root {
            buf.resize(len as usize, 0);
        }
        unsafe {
            mpi::fc_mpi_bcast(buf.as_mut_ptr(), buf.len() as i32, root as i32);
        }
    }

    fn isend(&self, dest: usize, tag: i32, data: Vec<u8>) -> Box<dyn PendingSend> {
        let request =
            unsafe { mpi::fc_mpi_isend(data.as_ptr(), data.len() as i32, dest as i32, tag) };
        Box::new(MpiPendingSend {
            request,
            // Keeps `data` alive until the request completes; MPI reads
            // directly from this buffer for as long as the send is in flight.
            _buffer: data,
        })
    }

    fn recv(&self, source: usize, tag: i32) -> Vec<u8> {
        let count = unsafe { mpi::fc_mpi_probe_count(source as i32, tag) };
        let mut buffer = vec![0u8; count as usize];
        unsafe {
            mpi::fc_mpi_recv(buffer.as_mut_ptr(), count, source as i32, tag);
        }
        buffer
    }

    fn abort(&self, code: i32) -> ! {
        unsafe { mpi::fc_mpi_abort(code) }
    }
}

impl Drop for MpiCommunicator {
    fn drop(&mut self) {
        unsafe { mpi::fc_mpi_finalize() }
    }
}

struct MpiPendingSend {
    request: *mut c_void,
    _buffer: Vec<u8>,
}

// Only ever touched from the single thread that owns the `MpiCommunicator`;
// the engine never shares a `PendingSend` across threads.
unsafe impl Send for MpiPendingSend {}

impl PendingSend for MpiPendingSend {
    fn wait(self: Box<Self>) {
        unsafe { mpi::fc_mpi_wait(self.request) }
    }
}
