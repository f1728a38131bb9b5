//! One party of a two-party computation.
//!
//! A [`Party`] owns the connection to the peer, the circuit both parties
//! build and the three sharings evaluating it. [`Party::exec_circuit`] runs
//! the setup phase (OTs and garbling) followed by the online phase, one
//! communication round per circuit layer.
use std::{
    fmt,
    net::{TcpListener, TcpStream},
    sync::mpsc::{self, Receiver, Sender},
    thread::{self, JoinHandle},
};

use tracing::{Level, debug, info, instrument, warn};

use crate::{
    channel::{ABY_PARTY_CHANNEL, Connection, ConnectionError, ErrorKind},
    circuit::{Circuits, Context, GateKind, Role},
    config::PartyConfig,
    crypto::Crypto,
    error::Error,
    ot::OtExtConfig,
    setup::Setup,
    sharing::{ArithSharing, BoolSharing, Sharing, YaoClientSharing, YaoServerSharing},
};

/// Order in which the sharings register their OT tasks. Both parties must
/// agree on it, see [`Setup`].
const SETUP_ORDER: [Context; 3] = [Context::Bool, Context::Arith, Context::Yao];

/// The long-lived send and receive threads of the online phase.
///
/// Every layer hands one job to each thread and waits for both results.
/// Dropping the job queues stops the threads.
struct Helpers {
    send_jobs: Option<Sender<Vec<u8>>>,
    recv_jobs: Option<Sender<usize>>,
    sent: Receiver<Result<(), ConnectionError>>,
    received: Receiver<Result<Vec<u8>, ConnectionError>>,
    threads: Vec<JoinHandle<()>>,
}

impl Helpers {
    fn start(conn: &Connection) -> Result<Self, Error> {
        let phase = "starting helper threads";
        let (tx, rx) = conn.channel(ABY_PARTY_CHANNEL)?.split();
        let (send_jobs, send_inbox) = mpsc::channel::<Vec<u8>>();
        let (recv_jobs, recv_inbox) = mpsc::channel::<usize>();
        let (sent_out, sent) = mpsc::channel();
        let (received_out, received) = mpsc::channel();
        let sender = thread::Builder::new()
            .name("aby-send".into())
            .spawn(move || {
                for msg in send_inbox {
                    if sent_out.send(tx.send("online layer", msg)).is_err() {
                        break;
                    }
                }
            })
            .map_err(|e| ConnectionError::io(phase, e))?;
        let receiver = thread::Builder::new()
            .name("aby-recv".into())
            .spawn(move || {
                for _ in recv_inbox {
                    if received_out.send(rx.recv("online layer")).is_err() {
                        break;
                    }
                }
            })
            .map_err(|e| ConnectionError::io(phase, e))?;
        Ok(Self {
            send_jobs: Some(send_jobs),
            recv_jobs: Some(recv_jobs),
            sent,
            received,
            threads: vec![sender, receiver],
        })
    }

    /// Sends `msg` (if not empty) and receives `len` bytes (if not zero) in parallel.
    ///
    /// Both results are collected before an error is returned, so no stale
    /// result is left behind for the next call.
    fn exchange(&self, msg: Vec<u8>, len: usize) -> Result<Vec<u8>, Error> {
        let phase = "online layer";
        let closed = || ConnectionError::new(phase, ErrorKind::Closed);
        let sending = !msg.is_empty();
        let send_queued = sending && self.send_jobs.as_ref().is_some_and(|jobs| jobs.send(msg).is_ok());
        let recv_queued = len > 0 && self.recv_jobs.as_ref().is_some_and(|jobs| jobs.send(len).is_ok());
        let sent = match (sending, send_queued) {
            (_, true) => self.sent.recv().map_err(|_| closed()).and_then(|r| r),
            (true, false) => Err(closed()),
            (false, false) => Ok(()),
        };
        let received = match (len > 0, recv_queued) {
            (_, true) => self.received.recv().map_err(|_| closed()).and_then(|r| r),
            (true, false) => Err(closed()),
            (false, false) => Ok(vec![]),
        };
        sent?;
        let received = received?;
        if received.len() != len {
            return Err(Error::violation(format!(
                "received {} bytes in an online layer, expected {len}",
                received.len()
            )));
        }
        Ok(received)
    }
}

impl Drop for Helpers {
    fn drop(&mut self) {
        self.send_jobs.take();
        self.recv_jobs.take();
        for t in self.threads.drain(..) {
            let _ = t.join();
        }
    }
}

/// A server or client executing circuits with its peer.
pub struct Party {
    role: Role,
    config: PartyConfig,
    crypto: Crypto,
    circuits: Circuits,
    /// Indexed by [`Context::index`].
    sharings: [Box<dyn Sharing>; 3],
    executed: bool,
    /// Set when an execution failed after the parties started exchanging
    /// data; the connection may then hold unread frames.
    poisoned: bool,
    helpers: Helpers,
    setup: Setup,
    // dropped last, after every channel opened on it
    _conn: Connection,
}

impl fmt::Debug for Party {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Party")
            .field("role", &self.role)
            .field("config", &self.config)
            .field("gates", &self.circuits.num_gates())
            .field("setup", &self.setup)
            .finish_non_exhaustive()
    }
}

impl Party {
    /// Connects to the peer: the server listens on the configured address,
    /// the client connects to it, retrying with a fixed backoff.
    #[instrument(level = Level::DEBUG, skip(config), err)]
    pub fn connect(role: Role, config: PartyConfig) -> Result<Self, Error> {
        config.validate()?;
        let addr = config.socket_addr();
        let stream = match role {
            Role::Server => {
                let phase = "accepting connection";
                let listener = TcpListener::bind(&addr).map_err(|e| ConnectionError::io(phase, e))?;
                info!("listening on {addr}");
                let (stream, peer) = listener.accept().map_err(|e| ConnectionError::io(phase, e))?;
                info!("client connected from {peer}");
                stream
            }
            Role::Client => connect_with_retries(&addr, &config)?,
        };
        Self::from_stream(role, stream, config)
    }

    /// Runs a party over an already established connection.
    pub fn from_stream(role: Role, stream: TcpStream, config: PartyConfig) -> Result<Self, Error> {
        config.validate()?;
        let conn = Connection::new(stream, config.recv_timeout)?;
        let mut crypto = Crypto::from_entropy(config.seclvl);
        let mut rng = crypto.fork_rng();
        let ot_config = OtExtConfig {
            num_threads: config.num_ot_threads,
            verify: config.verify_ot,
        };
        let setup = Setup::new(&conn, role, config.seclvl, ot_config, &mut rng)?;
        let yao: Box<dyn Sharing> = match role {
            Role::Server => Box::new(YaoServerSharing::new(crypto.fork_rng())),
            Role::Client => Box::new(YaoClientSharing::new(crypto.fork_rng())),
        };
        let sharings: [Box<dyn Sharing>; 3] = [
            Box::new(BoolSharing::new(role, crypto.fork_rng())),
            yao,
            Box::new(ArithSharing::new(role, config.arith_bitlen, crypto.fork_rng())),
        ];
        let helpers = Helpers::start(&conn)?;
        debug!(%role, "party ready");
        Ok(Self {
            role,
            circuits: Circuits::new(role, config.arith_bitlen),
            config,
            crypto,
            sharings,
            executed: false,
            poisoned: false,
            helpers,
            setup,
            _conn: conn,
        })
    }

    /// Whether this is the server or the client.
    pub fn role(&self) -> Role {
        self.role
    }

    /// The settings this party runs with.
    pub fn config(&self) -> &PartyConfig {
        &self.config
    }

    /// The cryptographic context of this party.
    pub fn crypto(&mut self) -> &mut Crypto {
        &mut self.crypto
    }

    /// The circuit, with its evaluated outputs after [`Party::exec_circuit`].
    pub fn circuits(&self) -> &Circuits {
        &self.circuits
    }

    /// Access to the gate builders.
    pub fn circuits_mut(&mut self) -> &mut Circuits {
        &mut self.circuits
    }

    /// Evaluates the circuit together with the peer, which must have built
    /// the same circuit.
    ///
    /// Runs once per circuit; call [`Party::reset`] before building the next
    /// one. A circuit mismatch leaves the party usable after a reset. Any
    /// other error poisons it: the peers may be out of step, so every later
    /// execution fails until both parties reconnect.
    #[instrument(level = Level::DEBUG, skip_all, fields(role = %self.role), err)]
    pub fn exec_circuit(&mut self) -> Result<(), Error> {
        if self.poisoned {
            return Err(Error::violation(
                "an earlier execution failed mid-protocol, reconnect the parties",
            ));
        }
        if self.executed {
            return Err(Error::violation("the circuit was already executed, reset the party first"));
        }
        self.executed = true;
        let same = self.check_circuit().inspect_err(|_| self.poisoned = true)?;
        if !same {
            return Err(Error::violation("the parties built different circuits"));
        }
        let result = self.run_setup_phase().and_then(|()| self.run_online_phase());
        if result.is_err() {
            warn!(role = %self.role, "execution failed mid-protocol, the party needs a new connection");
            self.poisoned = true;
        }
        result
    }

    /// Whether an earlier failure left the connection unusable.
    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    /// Drops the circuit and all per-execution state. The connection and the
    /// base OTs are kept.
    pub fn reset(&mut self) {
        self.circuits.reset();
        for sharing in &mut self.sharings {
            sharing.reset();
        }
        self.setup.reset();
        self.executed = false;
    }

    /// Both parties must evaluate the same gates in the same order.
    fn check_circuit(&self) -> Result<bool, Error> {
        let mine = fingerprint(&self.circuits);
        let theirs = self.helpers.exchange(mine.as_bytes().to_vec(), blake3::OUT_LEN)?;
        Ok(theirs.as_slice() == mine.as_bytes())
    }

    #[instrument(level = Level::DEBUG, skip_all, err)]
    fn run_setup_phase(&mut self) -> Result<(), Error> {
        for context in SETUP_ORDER {
            self.sharings[context.index()].prepare_setup_phase(&self.circuits, &mut self.setup)?;
        }
        self.setup.perform_ots()?;
        for context in SETUP_ORDER {
            self.sharings[context.index()].perform_setup_phase(&self.circuits, &mut self.setup)?;
        }
        for context in SETUP_ORDER {
            self.sharings[context.index()].finish_setup_phase(&self.circuits, &mut self.setup)?;
        }
        Ok(())
    }

    #[instrument(level = Level::DEBUG, skip_all, err)]
    fn run_online_phase(&mut self) -> Result<(), Error> {
        for sharing in &mut self.sharings {
            sharing.prepare_online_phase(&self.circuits)?;
        }
        let layers = self.circuits.num_layers();
        let mut rounds = 0;
        for depth in 0..layers {
            let mut msg = vec![];
            let mut lens = [0; 3];
            for (sharing, len) in self.sharings.iter_mut().zip(&mut lens) {
                sharing.evaluate_local_operations(&mut self.circuits, depth)?;
                sharing.evaluate_interactive_operations(&mut self.circuits, depth)?;
                msg.extend(sharing.data_to_send());
                *len = sharing.bytes_to_receive();
            }
            let total: usize = lens.iter().sum();
            let received = if msg.is_empty() && total == 0 {
                vec![]
            } else {
                rounds += 1;
                self.helpers.exchange(msg, total)?
            };
            let mut rest = received.as_slice();
            for (sharing, len) in self.sharings.iter_mut().zip(lens) {
                let (mine, tail) = rest.split_at(len);
                sharing.finish_circuit_layer(&mut self.circuits, depth, mine)?;
                rest = tail;
            }
        }
        info!(layers, rounds, "circuit evaluated");
        Ok(())
    }
}

fn connect_with_retries(addr: &str, config: &PartyConfig) -> Result<TcpStream, Error> {
    for attempt in 1..=config.connect_retries {
        match TcpStream::connect(addr) {
            Ok(stream) => return Ok(stream),
            Err(e) => {
                warn!("could not reach the server at {addr} (attempt {attempt}): {e}");
                if attempt < config.connect_retries {
                    thread::sleep(config.retry_backoff);
                }
            }
        }
    }
    Err(ConnectionError::new(
        "connecting to the server",
        ErrorKind::Refused(config.connect_retries),
    )
    .into())
}

/// Hash of everything both parties must agree on: the gates, their wiring
/// and the public parameters, but not the private inputs.
fn fingerprint(circuits: &Circuits) -> blake3::Hash {
    let mut hasher = blake3::Hasher::new();
    hasher.update(&(circuits.arith_bitlen() as u64).to_le_bytes());
    for gate in circuits.gates() {
        let kind = match gate.kind() {
            GateKind::Input { owner, .. } => format!("input {owner}"),
            kind => format!("{kind:?}"),
        };
        hasher.update(kind.as_bytes());
        hasher.update(&[gate.context().index() as u8]);
        hasher.update(&(gate.nvals() as u64).to_le_bytes());
        for p in gate.parents() {
            hasher.update(&(p.index() as u64).to_le_bytes());
        }
        hasher.update(b";");
    }
    hasher.finalize()
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use super::*;
    use crate::circuit::Circuit;

    #[test]
    fn test_fingerprint_ignores_private_inputs() {
        let mut a = Circuits::new(Role::Server, 16);
        let x = a.boolean().put_in_gate(5, 8, Role::Server).unwrap();
        a.boolean().put_out_gate(&x, crate::circuit::Recipients::All).unwrap();
        let mut b = Circuits::new(Role::Client, 16);
        let x = b.boolean().put_dummy_in_gate(1, 8, Role::Server).unwrap();
        b.boolean().put_out_gate(&x, crate::circuit::Recipients::All).unwrap();
        assert_eq!(fingerprint(&a), fingerprint(&b));

        b.boolean().put_inv_gate(&x).unwrap();
        assert_ne!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    fn test_connect_gives_up() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        let config = PartyConfig {
            port,
            connect_retries: 3,
            retry_backoff: Duration::from_millis(10),
            ..Default::default()
        };
        let start = Instant::now();
        let err = Party::connect(Role::Client, config).unwrap_err();
        assert!(start.elapsed() >= Duration::from_millis(20));
        assert!(matches!(
            err,
            Error::Connection(ConnectionError {
                reason: ErrorKind::Refused(3),
                ..
            })
        ));
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let config = PartyConfig {
            arith_bitlen: 12,
            ..Default::default()
        };
        assert!(matches!(
            Party::connect(Role::Server, config),
            Err(Error::InvalidConfig(_))
        ));
    }
}
