//! An in-process [`Communicator`] for tests: a fleet of handles wired
//! together with channels instead of sockets, so the full router → transfer
//! path (seed scenarios 1, 2, and 6 in `spec.md` §8) can run inside one test
//! process without an MPI environment. Modeled on
//! [`crate::message::tcp::TcpCommunicator`]'s connection-pool pattern, minus
//! the sockets.

use super::comm::{Communicator, PendingSend};
use std::cell::RefCell;
use std::sync::mpsc;

type Envelope = (usize, i32, Vec<u8>);

struct LoopbackPendingSend;

impl PendingSend for LoopbackPendingSend {
    fn wait(self: Box<Self>) {}
}

pub struct LoopbackCommunicator {
    rank: usize,
    outboxes: Vec<mpsc::Sender<Envelope>>,
    inbox: mpsc::Receiver<Envelope>,
    undelivered: RefCell<Vec<Envelope>>,
}

impl LoopbackCommunicator {
    /// Builds `size` communicators, each able to exchange messages with any
    /// other by rank.
    pub fn fleet(size: usize) -> Vec<Self> {
        let mut senders = Vec::with_capacity(size);
        let mut receivers = Vec::with_capacity(size);
        for _ in 0..size {
            let (s, r) = mpsc::channel();
            senders.push(s);
            receivers.push(r);
        }
        receivers
            .into_iter()
            .enumerate()
            .map(|(rank, inbox)| Self {
                rank,
                outboxes: senders.clone(),
                inbox,
                undelivered: RefCell::new(Vec::new()),
            })
            .collect()
    }

    /// Convenience constructor for the two-worker seed scenarios.
    pub fn pair() -> (Self, Self) {
        let mut fleet = Self::fleet(2);
        let b = fleet.pop().unwrap();
        let a = fleet.pop().unwrap();
        (a, b)
    }

    fn recv_matching(&self, source: usize, tag: i32) -> Vec<u8> {
        let mut undelivered = self.undelivered.borrow_mut();
        if let Some(index) = undelivered.iter().position(|(r, t, _)| *r == source && *t == tag) {
            return undelivered.remove(index).2;
        }
        loop {
            let (r, t, message) = self.inbox.recv().expect("peer communicator dropped");
            if r == source && t == tag {
                return message;
            }
            undelivered.push((r, t, message));
        }
    }
}

impl Communicator for LoopbackCommunicator {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.outboxes.len()
    }

    fn gather(&self, send_buf: &[u8], root: usize) -> Vec<u8> {
        const GATHER_TAG: i32 = -1;
        if self.rank != root {
            self.outboxes[root]
                .send((self.rank, GATHER_TAG, send_buf.to_vec()))
                .unwrap();
            return Vec::new();
        }
        let mut recv_buf = vec![0u8; send_buf.len() * self.size()];
        recv_buf[send_buf.len() * root..send_buf.len() * (root + 1)].copy_from_slice(send_buf);
        for rank in (0..self.size()).filter(|&r| r != root) {
            let piece = self.recv_matching(rank, GATHER_TAG);
            recv_buf[send_buf.len() * rank..send_buf.len() * (rank + 1)].copy_from_slice(&piece);
        }
        recv_buf
    }

    fn broadcast(&self, buf: &mut Vec<u8>, root: usize) {
        const BCAST_TAG: i32 = -2;
        if self.rank == root {
            for rank in (0..self.size()).filter(|&r| r != root) {
                self.outboxes[rank]
                    .send((root, BCAST_TAG, buf.clone()))
                    .unwrap();
            }
        } else {
            *buf = self.recv_matching(root, BCAST_TAG);
        }
    }

    fn isend(&self, dest: usize, tag: i32, data: Vec<u8>) -> Box<dyn PendingSend> {
        self.outboxes[dest].send((self.rank, tag, data)).unwrap();
        Box::new(LoopbackPendingSend)
    }

    fn recv(&self, source: usize, tag: i32) -> Vec<u8> {
        self.recv_matching(source, tag)
    }

    fn abort(&self, code: i32) -> ! {
        panic!("loopback communicator abort (code {code})")
    }
}
