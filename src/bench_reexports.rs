//! Reexports of private internals for benchmarking - DO NOT USE!
//!
//! This module requires the internal `__bench` feature to be enabled.
//! We use it to reexport some otherwise private functions as public,
//! in order to benchmark them with criterion. Criterion can currently
//! only benchmark public functions, as it is used from a `benches/` file
//! which are compiled as separate crates.
//!
//! If you're a user of aby, do not enable the `__bench` feature or use
//! these APIs exposed here.
#![allow(missing_docs)]
use std::{
    net::{TcpListener, TcpStream},
    sync::Arc,
    thread,
    time::Duration,
};

use crate::{
    bitvec::BitVector,
    channel::{Connection, ConnectionError},
    circuit::Role,
    crypto::{AesRng, SecLevel},
    error::Error,
    ot::{OtExtConfig, OtTask, XorMasking},
    setup::Setup,
};

pub use crate::ot::OtFlavor;

pub fn eklundh_transpose(buf: &mut [u8], rows: usize, cols: usize) {
    crate::transpose::eklundh_transpose(buf, rows, cols)
}

/// Both sides of the OT extension over loopback TCP, with base OTs done.
pub struct OtPair {
    server: Setup,
    client: Setup,
    rng: AesRng,
    _conns: (Connection, Connection),
}

impl OtPair {
    pub fn new(seclvl: SecLevel, num_threads: usize) -> Result<Self, Error> {
        let phase = "bench connection";
        let listener = TcpListener::bind("127.0.0.1:0").map_err(|e| ConnectionError::io(phase, e))?;
        let addr = listener.local_addr().map_err(|e| ConnectionError::io(phase, e))?;
        let stream = TcpStream::connect(addr).map_err(|e| ConnectionError::io(phase, e))?;
        let (accepted, _) = listener.accept().map_err(|e| ConnectionError::io(phase, e))?;
        let timeout = Duration::from_secs(60);
        let conns = (Connection::new(accepted, timeout)?, Connection::new(stream, timeout)?);
        let config = OtExtConfig {
            num_threads,
            verify: false,
        };
        let (server, client) = thread::scope(|s| {
            let server = s.spawn(|| Setup::new(&conns.0, Role::Server, seclvl, config, &mut AesRng::new()));
            let client = Setup::new(&conns.1, Role::Client, seclvl, config, &mut AesRng::new());
            let server = server
                .join()
                .map_err(|_| Error::violation("server setup panicked"))?;
            Ok::<_, Error>((server?, client?))
        })?;
        Ok(Self {
            server,
            client,
            rng: AesRng::new(),
            _conns: conns,
        })
    }

    /// Runs `num_ots` OTs of `bitlen` bits with the server as sender.
    pub fn run(&mut self, flavor: OtFlavor, num_ots: usize, bitlen: usize) -> Result<(), Error> {
        let delta = BitVector::random(bitlen, &mut self.rng);
        let masking = Arc::new(XorMasking::new(bitlen, delta.as_bytes()));
        let messages = (flavor == OtFlavor::General).then(|| {
            (
                BitVector::random(num_ots * bitlen, &mut self.rng),
                BitVector::random(num_ots * bitlen, &mut self.rng),
            )
        });
        let choices = BitVector::random(num_ots, &mut self.rng);
        self.server
            .add_ot_task(OtTask::sender(flavor, num_ots, bitlen, masking.clone(), messages));
        self.client
            .add_ot_task(OtTask::receiver(flavor, num_ots, bitlen, masking, choices));
        let Self { server, client, .. } = self;
        let result = thread::scope(|s| {
            let sending = s.spawn(|| server.perform_ots());
            let received = client.perform_ots();
            let sent = sending
                .join()
                .map_err(|_| Error::violation("OT sender panicked"))?;
            sent.and(received)
        });
        self.server.reset();
        self.client.reset();
        result
    }
}
