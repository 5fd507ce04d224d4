//! Provides a message-passing communicator based on TCP sockets.
//!
//! TCP is a connection-oriented protocol, which means that a connection must
//! be established between the sending and receiving ends of the socket in
//! order to read from or write to a stream. This backend is the pure-Rust
//! alternative to [`crate::message::mpi::MpiCommunicator`] for development
//! and testing off a real MPI installation; it implements the same
//! [`Communicator`] trait the router and transfer engine are written
//! against, so either backend drops in unchanged.

use super::comm::{Communicator, PendingSend};
use super::util;
use std::cell::RefCell;
use std::collections::HashMap;
use std::io::Write;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    mpsc, Arc,
};
use std::thread;
use std::time::Duration;

const READ_TIMEOUT: Duration = Duration::from_nanos(100);

/// One wire message: the sender's rank, a tag, and the payload.
type Envelope = (usize, i32, Vec<u8>);
type SendS = mpsc::Sender<(SocketAddr, Envelope)>;
type SendR = mpsc::Receiver<(SocketAddr, Envelope)>;
type RecvS = mpsc::Sender<Envelope>;
type RecvR = mpsc::Receiver<Envelope>;

/// Maintains a cache of ingoing and outgoing TCP connections.
///
/// This object facilitates non-blocking sends and blocking receives from any
/// peer. Communicating with a remote peer only opens a new connection on the
/// first call; subsequent communications with that peer reuse the cached
/// connection. It also facilitates receiving a message from any of the open
/// connections. When no message can be read from one of the cached
/// connections, it will try to accept an incoming connection on a short
/// timeout.
pub struct ConnectionPool {
    alive: Arc<AtomicBool>,
    send_s: Option<SendS>,
    recv_r: Option<RecvR>,
    send_thread: Option<thread::JoinHandle<()>>,
    recv_thread: Option<thread::JoinHandle<()>>,
}

impl ConnectionPool {
    fn poll(stream: &mut TcpStream) -> Option<Envelope> {
        util::read_usize_non_blocking(stream).map(|rank| {
            let tag = util::read_usize(stream);
            let len = util::read_usize(stream);
            (rank, tag as i32, util::read_bytes_vec(stream, len))
        })
    }

    /// Creates a `ConnectionPool` from a `TcpListener`. The listener is
    /// placed in a non-blocking accept mode, so the pre-existing blocking
    /// mode is overwritten.
    pub fn from_listener(listener: TcpListener) -> Self {
        let (send_s, send_r): (SendS, SendR) = mpsc::channel();
        let (recv_s, recv_r): (RecvS, RecvR) = mpsc::channel();
        let alive = Arc::new(AtomicBool::new(true));
        let keep_receiving = alive.clone();

        // This thread takes the receiving end of the message sender channel.
        let send_thread = thread::spawn(move || {
            let mut streams = HashMap::new();
            for (address, (rank, tag, message)) in send_r {
                let stream = streams
                    .entry(address)
                    .or_insert_with(|| TcpStream::connect(address).unwrap());
                stream.write_all(&rank.to_le_bytes()).unwrap();
                stream.write_all(&(tag as usize).to_le_bytes()).unwrap();
                stream.write_all(&message.len().to_le_bytes()).unwrap();
                stream.write_all(&message).unwrap();
            }
        });
        listener.set_nonblocking(true).unwrap();

        // This thread takes the sending end of the message receiving channel.
        let recv_thread = thread::spawn(move || {
            let mut streams = Vec::new();
            while keep_receiving.load(Ordering::Relaxed) {
                for stream in &mut streams {
                    if let Some(envelope) = Self::poll(stream) {
                        recv_s.send(envelope).unwrap();
                    }
                }
                if let Ok((stream, _)) = listener.accept() {
                    stream.set_read_timeout(Some(READ_TIMEOUT)).unwrap();
                    streams.push(stream)
                }
            }
        });

        Self {
            alive,
            send_s: Some(send_s),
            recv_r: Some(recv_r),
            send_thread: Some(send_thread),
            recv_thread: Some(recv_thread),
        }
    }

    /// Initiates a blocking receive from any peer.
    pub fn recv(&mut self) -> Envelope {
        self.recv_r.as_ref().unwrap().recv().unwrap()
    }

    /// Hands a message off to the background sender thread.
    pub fn send(&mut self, peer: SocketAddr, envelope: Envelope) {
        self.send_s.as_ref().unwrap().send((peer, envelope)).unwrap()
    }
}

impl Drop for ConnectionPool {
    fn drop(&mut self) {
        self.alive.swap(false, Ordering::Relaxed);
        self.send_s.take().unwrap();
        self.send_thread.take().unwrap().join().unwrap();
        self.recv_thread.take().unwrap().join().unwrap();
    }
}

/// A send that has already been fully handed off to the background sender
/// thread by the time this handle is returned; `wait` is therefore a no-op.
/// The buffer has already been copied into the channel message, so there's
/// no aliasing concern for the caller once `isend` returns.
struct TcpPendingSend;

impl PendingSend for TcpPendingSend {
    fn wait(self: Box<Self>) {}
}

pub struct TcpCommunicator {
    rank: usize,
    peers: Vec<SocketAddr>,
    connections: RefCell<ConnectionPool>,
    undelivered: RefCell<Vec<Envelope>>,
}

impl TcpCommunicator {
    pub fn new(rank: usize, peers: Vec<SocketAddr>) -> Self {
        let listener = TcpListener::bind(peers[rank]).unwrap();
        let connections = RefCell::new(ConnectionPool::from_listener(listener));
        Self {
            rank,
            peers,
            connections,
            undelivered: RefCell::new(Vec::new()),
        }
    }

    fn recv_matching(&self, source: usize, tag: i32) -> Vec<u8> {
        let mut connections = self.connections.borrow_mut();
        let mut undelivered = self.undelivered.borrow_mut();
        match undelivered
            .iter()
            .position(|(r, t, _)| *r == source && *t == tag)
        {
            Some(index) => undelivered.remove(index).2,
            None => loop {
                let (r, t, message) = connections.recv();
                if r == source && t == tag {
                    return message;
                }
                undelivered.push((r, t, message))
            },
        }
    }
}

impl Communicator for TcpCommunicator {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.peers.len()
    }

    fn gather(&self, send_buf: &[u8], root: usize) -> Vec<u8> {
        const GATHER_TAG: i32 = -1;
        if self.rank != root {
            self.connections
                .borrow_mut()
                .send(self.peers[root], (self.rank, GATHER_TAG, send_buf.to_vec()));
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
                self.connections
                    .borrow_mut()
                    .send(self.peers[rank], (root, BCAST_TAG, buf.clone()));
            }
        } else {
            *buf = self.recv_matching(root, BCAST_TAG);
        }
    }

    fn isend(&self, dest: usize, tag: i32, data: Vec<u8>) -> Box<dyn PendingSend> {
        self.connections
            .borrow_mut()
            .send(self.peers[dest], (self.rank, tag, data));
        Box::new(TcpPendingSend)
    }

    fn recv(&self, source: usize, tag: i32) -> Vec<u8> {
        self.recv_matching(source, tag)
    }

    fn abort(&self, code: i32) -> ! {
        std::process::exit(code)
    }
}
