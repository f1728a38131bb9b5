//! A TCP connection to the other party, multiplexed into logical channels.
//!
//! Every connection owns a send thread and a receive thread. Messages are
//! written as frames `(channel id: u8, length: u64 LE, payload)`; the receive
//! thread dispatches incoming frames to one queue per channel id. A frame on
//! [`ADMIN_CHANNEL`] tells the peer's receive thread to stop.
use std::{
    fmt,
    io::{self, BufReader, BufWriter, Read, Write},
    net::{Shutdown, TcpStream},
    sync::{
        Mutex,
        mpsc::{self, Receiver, RecvTimeoutError, Sender},
    },
    thread::JoinHandle,
    time::Duration,
};

use serde::{Serialize, de::DeserializeOwned};
use thiserror::Error;
use tracing::{debug, trace, warn};

/// Reserved for connection shutdown.
pub const ADMIN_CHANNEL: u8 = 255;
/// Used for the base OTs.
pub const OT_ADMIN_CHANNEL: u8 = 254;
/// Used for the online phase of a circuit.
pub const ABY_PARTY_CHANNEL: u8 = 253;
/// Used for bulk transfers of the setup phase (garbled tables).
pub const ABY_SETUP_CHANNEL: u8 = 252;
/// OT extension where the server acts as OT sender.
pub const OT_SERVER_SENDS_CHANNEL: u8 = 0;
/// OT extension where the client acts as OT sender.
pub const OT_CLIENT_SENDS_CHANNEL: u8 = 1;

const FRAME_HEADER: usize = 9;
/// Largest payload accepted from the peer; a longer frame closes the connection.
pub const MAX_FRAME_LEN: u64 = 1 << 32;

/// Errors related to sending / receiving / (de-)serializing messages.
#[derive(Debug, Error)]
#[error("{reason} (during {phase})")]
pub struct ConnectionError {
    /// The protocol phase during which the error occurred.
    pub phase: String,
    /// The specific error that was raised.
    pub reason: ErrorKind,
}

/// The specific error that occurred when trying to send / receive a message.
#[derive(Debug, Error)]
pub enum ErrorKind {
    /// The socket could not be set up.
    #[error("I/O error: {0}")]
    Io(String),
    /// The peer could not be reached after the given number of attempts.
    #[error("connection refused after {0} attempts")]
    Refused(u32),
    /// The connection has been closed.
    #[error("connection closed")]
    Closed,
    /// No message was received before the timeout.
    #[error("timeout elapsed")]
    TimeoutElapsed,
    /// The message could not be (de-)serialized.
    #[error("serialization error: {0}")]
    SerdeError(String),
    /// The message does not have the expected length.
    #[error("expected {expected} bytes, got {actual}")]
    InvalidLength {
        /// Length the protocol requires.
        expected: usize,
        /// Length of the received message.
        actual: usize,
    },
}

impl ConnectionError {
    pub(crate) fn new(phase: &str, reason: ErrorKind) -> Self {
        Self {
            phase: phase.to_string(),
            reason,
        }
    }

    pub(crate) fn io(phase: &str, e: io::Error) -> Self {
        Self::new(phase, ErrorKind::Io(e.to_string()))
    }
}

type Frame = (u8, Vec<u8>);

/// The sending half of a [`Channel`].
#[derive(Clone)]
pub(crate) struct SendHalf {
    id: u8,
    out: Sender<Frame>,
}

impl SendHalf {
    /// Queues `msg` for sending. Messages on one channel arrive in order.
    pub(crate) fn send(&self, phase: &str, msg: Vec<u8>) -> Result<(), ConnectionError> {
        trace!(channel = self.id, bytes = msg.len(), phase, "send");
        self.out
            .send((self.id, msg))
            .map_err(|_| ConnectionError::new(phase, ErrorKind::Closed))
    }
}

/// The receiving half of a [`Channel`].
pub(crate) struct RecvHalf {
    id: u8,
    inbox: Receiver<Vec<u8>>,
    timeout: Duration,
}

impl RecvHalf {
    /// Waits for the next message on this channel.
    pub(crate) fn recv(&self, phase: &str) -> Result<Vec<u8>, ConnectionError> {
        match self.inbox.recv_timeout(self.timeout) {
            Ok(msg) => {
                trace!(channel = self.id, bytes = msg.len(), phase, "recv");
                Ok(msg)
            }
            Err(RecvTimeoutError::Timeout) => {
                Err(ConnectionError::new(phase, ErrorKind::TimeoutElapsed))
            }
            Err(RecvTimeoutError::Disconnected) => {
                Err(ConnectionError::new(phase, ErrorKind::Closed))
            }
        }
    }

    /// Waits for the next message and checks that it is `len` bytes long.
    pub(crate) fn recv_exact(&self, phase: &str, len: usize) -> Result<Vec<u8>, ConnectionError> {
        let msg = self.recv(phase)?;
        if msg.len() == len {
            Ok(msg)
        } else {
            Err(ConnectionError::new(
                phase,
                ErrorKind::InvalidLength {
                    expected: len,
                    actual: msg.len(),
                },
            ))
        }
    }
}

/// A logical, ordered, bidirectional channel to the other party.
pub(crate) struct Channel {
    tx: SendHalf,
    rx: RecvHalf,
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Channel({})", self.tx.id)
    }
}

impl Channel {
    /// The id of this channel.
    pub(crate) fn id(&self) -> u8 {
        self.tx.id
    }

    /// Splits the channel so that sending and receiving can happen on different threads.
    pub(crate) fn split(self) -> (SendHalf, RecvHalf) {
        (self.tx, self.rx)
    }

    /// Sends raw bytes.
    pub(crate) fn send(&self, phase: &str, msg: Vec<u8>) -> Result<(), ConnectionError> {
        self.tx.send(phase, msg)
    }

    /// Receives raw bytes.
    pub(crate) fn recv(&self, phase: &str) -> Result<Vec<u8>, ConnectionError> {
        self.rx.recv(phase)
    }

    /// Receives exactly `len` raw bytes.
    pub(crate) fn recv_exact(&self, phase: &str, len: usize) -> Result<Vec<u8>, ConnectionError> {
        self.rx.recv_exact(phase, len)
    }

    /// Serializes and sends a message to the other party.
    pub(crate) fn send_msg(&self, phase: &str, msg: &impl Serialize) -> Result<(), ConnectionError> {
        let msg = bincode::serialize(msg).map_err(|e| {
            ConnectionError::new(&format!("sending {phase}"), ErrorKind::SerdeError(format!("{e:?}")))
        })?;
        self.send(phase, msg)
    }

    /// Receives and deserializes a message from the other party.
    pub(crate) fn recv_msg<T: DeserializeOwned>(&self, phase: &str) -> Result<T, ConnectionError> {
        let msg = self.recv(phase)?;
        bincode::deserialize(&msg).map_err(|e| {
            ConnectionError::new(
                &format!("receiving {phase}"),
                ErrorKind::SerdeError(format!("{e:?}")),
            )
        })
    }

    /// Receives and deserializes a Vec from the other party (while checking the length).
    pub(crate) fn recv_vec<T: DeserializeOwned>(
        &self,
        phase: &str,
        len: usize,
    ) -> Result<Vec<T>, ConnectionError> {
        let v: Vec<T> = self.recv_msg(phase)?;
        if v.len() == len {
            Ok(v)
        } else {
            Err(ConnectionError::new(
                phase,
                ErrorKind::InvalidLength {
                    expected: len,
                    actual: v.len(),
                },
            ))
        }
    }
}

/// A TCP connection with its send and receive threads.
pub(crate) struct Connection {
    out: Option<Sender<Frame>>,
    inboxes: Mutex<Vec<Option<Receiver<Vec<u8>>>>>,
    stream: TcpStream,
    snd_thread: Option<JoinHandle<()>>,
    rcv_thread: Option<JoinHandle<()>>,
    timeout: Duration,
}

impl Connection {
    /// Starts the send and receive threads on an established stream.
    pub(crate) fn new(stream: TcpStream, timeout: Duration) -> Result<Self, ConnectionError> {
        let phase = "starting connection";
        stream
            .set_nodelay(true)
            .map_err(|e| ConnectionError::io(phase, e))?;
        let write_half = stream.try_clone().map_err(|e| ConnectionError::io(phase, e))?;
        let read_half = stream.try_clone().map_err(|e| ConnectionError::io(phase, e))?;

        let mut queues = Vec::with_capacity(256);
        let mut inboxes = Vec::with_capacity(256);
        for _ in 0..=u8::MAX {
            let (s, r) = mpsc::channel();
            queues.push(s);
            inboxes.push(Some(r));
        }

        let (out, frames) = mpsc::channel::<Frame>();
        let snd_thread = std::thread::Builder::new()
            .name("snd-thread".into())
            .spawn(move || send_loop(write_half, frames))
            .map_err(|e| ConnectionError::io(phase, e))?;
        let rcv_thread = std::thread::Builder::new()
            .name("rcv-thread".into())
            .spawn(move || receive_loop(read_half, queues))
            .map_err(|e| ConnectionError::io(phase, e))?;

        Ok(Self {
            out: Some(out),
            inboxes: Mutex::new(inboxes),
            stream,
            snd_thread: Some(snd_thread),
            rcv_thread: Some(rcv_thread),
            timeout,
        })
    }

    /// Opens the logical channel `id`. Every id can be opened once.
    pub(crate) fn channel(&self, id: u8) -> Result<Channel, ConnectionError> {
        let phase = format!("opening channel {id}");
        if id == ADMIN_CHANNEL {
            return Err(ConnectionError::new(
                &phase,
                ErrorKind::Io("the admin channel is reserved".into()),
            ));
        }
        let out = self
            .out
            .clone()
            .ok_or_else(|| ConnectionError::new(&phase, ErrorKind::Closed))?;
        let inbox = self
            .inboxes
            .lock()
            .map_err(|_| ConnectionError::new(&phase, ErrorKind::Closed))?[id as usize]
            .take()
            .ok_or_else(|| ConnectionError::new(&phase, ErrorKind::Io("channel already open".into())))?;
        Ok(Channel {
            tx: SendHalf { id, out },
            rx: RecvHalf {
                id,
                inbox,
                timeout: self.timeout,
            },
        })
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        // The send thread exits (and notifies the peer) once every sender is gone.
        self.out.take();
        if let Some(t) = self.snd_thread.take() {
            let _ = t.join();
        }
        let _ = self.stream.shutdown(Shutdown::Read);
        if let Some(t) = self.rcv_thread.take() {
            let _ = t.join();
        }
        debug!("connection closed");
    }
}

fn write_frame(w: &mut impl Write, id: u8, payload: &[u8]) -> io::Result<()> {
    let mut header = [0; FRAME_HEADER];
    header[0] = id;
    header[1..].copy_from_slice(&(payload.len() as u64).to_le_bytes());
    w.write_all(&header)?;
    w.write_all(payload)
}

fn send_loop(stream: TcpStream, frames: Receiver<Frame>) {
    let mut w = BufWriter::new(stream);
    let result = (|| -> io::Result<()> {
        while let Ok((id, payload)) = frames.recv() {
            write_frame(&mut w, id, &payload)?;
            // keep batching while more frames are already queued
            while let Ok((id, payload)) = frames.try_recv() {
                write_frame(&mut w, id, &payload)?;
            }
            w.flush()?;
        }
        write_frame(&mut w, ADMIN_CHANNEL, &[])?;
        w.flush()?;
        w.get_ref().shutdown(Shutdown::Write)
    })();
    if let Err(e) = result {
        warn!("send thread stopped: {e}");
    }
}

fn receive_loop(stream: TcpStream, queues: Vec<Sender<Vec<u8>>>) {
    let mut r = BufReader::new(stream);
    let mut header = [0; FRAME_HEADER];
    loop {
        if let Err(e) = r.read_exact(&mut header) {
            if e.kind() != io::ErrorKind::UnexpectedEof {
                warn!("receive thread stopped: {e}");
            }
            return;
        }
        let id = header[0];
        let mut len = [0; 8];
        len.copy_from_slice(&header[1..]);
        let len = u64::from_le_bytes(len);
        if id == ADMIN_CHANNEL {
            debug!("peer closed the connection");
            return;
        }
        let Some(len) = usize::try_from(len).ok().filter(|_| len <= MAX_FRAME_LEN) else {
            warn!("peer announced a frame of {len} bytes on channel {id}, closing the connection");
            return;
        };
        let mut payload = vec![0; len];
        if let Err(e) = r.read_exact(&mut payload) {
            warn!("receive thread stopped mid-frame: {e}");
            return;
        }
        // a dropped inbox means nobody listens on this channel any more
        let _ = queues[id as usize].send(payload);
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::net::TcpListener;

    use super::*;

    /// Two connections linked over loopback TCP.
    pub(crate) fn connection_pair() -> (Connection, Connection) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = std::thread::spawn(move || TcpStream::connect(addr).unwrap());
        let (server, _) = listener.accept().unwrap();
        let client = client.join().unwrap();
        let timeout = Duration::from_secs(30);
        (
            Connection::new(server, timeout).unwrap(),
            Connection::new(client, timeout).unwrap(),
        )
    }

    #[test]
    fn test_channels_are_independent_and_ordered() {
        let (a, b) = connection_pair();
        let a0 = a.channel(0).unwrap();
        let a1 = a.channel(1).unwrap();
        let b0 = b.channel(0).unwrap();
        let b1 = b.channel(1).unwrap();
        a1.send("t", vec![1]).unwrap();
        a0.send("t", vec![0; 100_000]).unwrap();
        a0.send("t", vec![]).unwrap();
        assert_eq!(vec![1], b1.recv("t").unwrap());
        assert_eq!(100_000, b0.recv("t").unwrap().len());
        assert!(b0.recv("t").unwrap().is_empty());
    }

    #[test]
    fn test_typed_messages() {
        let (a, b) = connection_pair();
        let ca = a.channel(5).unwrap();
        let cb = b.channel(5).unwrap();
        ca.send_msg("t", &vec![(1_u32, true), (2, false)]).unwrap();
        let v: Vec<(u32, bool)> = cb.recv_vec("t", 2).unwrap();
        assert_eq!(vec![(1, true), (2, false)], v);
        ca.send_msg("t", &vec![1_u8]).unwrap();
        assert!(matches!(
            cb.recv_vec::<u8>("t", 2),
            Err(ConnectionError {
                reason: ErrorKind::InvalidLength { .. },
                ..
            })
        ));
    }

    #[test]
    fn test_recv_exact_checks_length() {
        let (a, b) = connection_pair();
        let ca = a.channel(3).unwrap();
        let cb = b.channel(3).unwrap();
        ca.send("t", vec![1, 2, 3]).unwrap();
        let err = cb.recv_exact("t", 4).unwrap_err();
        assert!(matches!(err.reason, ErrorKind::InvalidLength { expected: 4, actual: 3 }));
    }

    #[test]
    fn test_channel_opens_once() {
        let (a, _b) = connection_pair();
        let _c = a.channel(7).unwrap();
        assert!(a.channel(7).is_err());
        assert!(a.channel(ADMIN_CHANNEL).is_err());
    }

    #[test]
    fn test_peer_drop_closes_channel() {
        let (a, b) = connection_pair();
        let cb = b.channel(2).unwrap();
        drop(a);
        let err = cb.recv("t").unwrap_err();
        assert!(matches!(err.reason, ErrorKind::Closed));
    }

    #[test]
    fn test_oversized_frame_closes_connection() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let peer = std::thread::spawn(move || TcpStream::connect(addr).unwrap());
        let (server, _) = listener.accept().unwrap();
        let mut peer = peer.join().unwrap();
        let conn = Connection::new(server, Duration::from_secs(5)).unwrap();
        let c = conn.channel(3).unwrap();
        let mut header = vec![3];
        header.extend_from_slice(&(MAX_FRAME_LEN + 1).to_le_bytes());
        peer.write_all(&header).unwrap();
        peer.flush().unwrap();
        assert!(matches!(c.recv("t").unwrap_err().reason, ErrorKind::Closed));
    }

    #[test]
    fn test_timeout() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = std::thread::spawn(move || TcpStream::connect(addr).unwrap());
        let (server, _) = listener.accept().unwrap();
        let _client = Connection::new(client.join().unwrap(), Duration::from_secs(5)).unwrap();
        let server = Connection::new(server, Duration::from_millis(50)).unwrap();
        let c = server.channel(0).unwrap();
        assert!(matches!(c.recv("t").unwrap_err().reason, ErrorKind::TimeoutElapsed));
    }
}
