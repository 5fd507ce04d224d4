//! The backend-agnostic transport trait. Implementors only need to provide
//! `gather`, `broadcast`, `isend`, `recv`, and `abort`; the trait supplies a
//! default `all_gather` built from `gather` + `broadcast`, which is the
//! descriptor-exchange collective the router uses (see `spec.md` §4.4.2: a
//! deliberate gather-to-root-then-broadcast instead of a single all-gather
//! primitive, so every worker ends up computing its own routing rules from
//! the same fleet directory).

/// A handle to an in-flight non-blocking send. Dropping it without calling
/// [`PendingSend::wait`] is a caller error (the backing buffer or request
/// object may be leaked or, for the MPI backend, the process may hang at
/// finalize); the transfer engine always calls `wait` at drain time.
pub trait PendingSend {
    /// Block until the send completes.
    fn wait(self: Box<Self>);
}

/// A minimal distributed message-passing API, sufficient for the router's
/// descriptor exchange and the transfer engine's field exchange.
pub trait Communicator {
    /// This worker's rank in the world communicator.
    fn rank(&self) -> usize;

    /// The number of workers in the world communicator.
    fn size(&self) -> usize;

    /// Gathers `send_buf` from every rank into one buffer on `root`, ranks
    /// concatenated in ascending order. Returns an empty `Vec` on every
    /// non-root rank.
    fn gather(&self, send_buf: &[u8], root: usize) -> Vec<u8>;

    /// Broadcasts `buf` from `root` to every rank. On `root`, `buf` is left
    /// unchanged (aside from being sent); on every other rank, `buf` is
    /// replaced with `root`'s content.
    fn broadcast(&self, buf: &mut Vec<u8>, root: usize);

    /// Starts a non-blocking send of `data` to `dest`, tagged `tag`. Returns
    /// immediately; completion must be observed via the returned handle.
    fn isend(&self, dest: usize, tag: i32, data: Vec<u8>) -> Box<dyn PendingSend>;

    /// Blocking receive of a message tagged `tag` from `source`.
    fn recv(&self, source: usize, tag: i32) -> Vec<u8>;

    /// Aborts the entire world communicator with the given exit code. Never
    /// returns.
    fn abort(&self, code: i32) -> !;

    /// Gathers `send_buf` from every rank to every rank (semantically an
    /// all-gather), implemented as a gather-to-root followed by a
    /// broadcast. This is the collective pair the router's descriptor
    /// exchange uses.
    fn all_gather(&self, send_buf: &[u8]) -> Vec<u8> {
        let mut buf = self.gather(send_buf, 0);
        self.broadcast(&mut buf, 0);
        buf
    }
}
