//! Raw FFI bindings to the thin C shim in `src/mpi/shim.c`. Nothing in this
//! module is safe to call outside of `message::mpi::MpiCommunicator`, which
//! owns the init/finalize lifecycle and upholds MPI's single-threaded-caller
//! requirement.

use std::os::raw::{c_int, c_void};

extern "C" {
    pub fn fc_mpi_init() -> c_int;
    pub fn fc_mpi_finalize();
    pub fn fc_mpi_comm_rank() -> c_int;
    pub fn fc_mpi_comm_size() -> c_int;
    pub fn fc_mpi_abort(code: c_int) -> !;
    pub fn fc_mpi_gather(send_buf: *const u8, send_count: c_int, recv_buf: *mut u8, root: c_int);
    pub fn fc_mpi_bcast(buf: *mut u8, count: c_int, root: c_int);
    pub fn fc_mpi_isend(buf: *const u8, count: c_int, dest: c_int, tag: c_int) -> *mut c_void;
    pub fn fc_mpi_wait(request: *mut c_void);
    pub fn fc_mpi_probe_count(source: c_int, tag: c_int) -> c_int;
    pub fn fc_mpi_recv(buf: *mut u8, count: c_int, source: c_int, tag: c_int);
}

/// MPI's wildcard source, exposed so callers don't have to hardcode `-1`.
pub const ANY_SOURCE: c_int = -1;
