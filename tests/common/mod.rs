use std::{
    net::{TcpListener, TcpStream},
    thread,
};

use aby::{
    circuit::{Circuit, Circuits, Role, Share},
    config::PartyConfig,
    error::Error,
    party::Party,
};
use tracing_subscriber::EnvFilter;

/// A server and a client connected over loopback TCP.
pub struct Pair {
    pub server: Party,
    pub client: Party,
}

/// The revealed outputs of both parties; empty where an output is not
/// revealed to the party.
pub type Outputs = (Vec<Vec<u64>>, Vec<Vec<u64>>);

impl Pair {
    pub fn new(config: PartyConfig) -> Self {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client_config = config.clone();
        let client = thread::spawn(move || {
            let stream = TcpStream::connect(addr).unwrap();
            Party::from_stream(Role::Client, stream, client_config).unwrap()
        });
        let (stream, _) = listener.accept().unwrap();
        let server = Party::from_stream(Role::Server, stream, config).unwrap();
        Self {
            server,
            client: client.join().unwrap(),
        }
    }

    /// Resets both parties, lets `build` construct the circuit at each of
    /// them and executes it.
    pub fn run<F>(&mut self, build: F) -> Result<Outputs, Error>
    where
        F: Fn(&mut Circuits, Role) -> Result<Vec<Share>, Error> + Sync,
    {
        let Self { server, client } = self;
        let build = &build;
        thread::scope(|s| {
            let server = s.spawn(move || run_party(server, build));
            let client = run_party(client, build);
            Ok((server.join().unwrap()?, client?))
        })
    }
}

fn run_party<F>(party: &mut Party, build: &F) -> Result<Vec<Vec<u64>>, Error>
where
    F: Fn(&mut Circuits, Role) -> Result<Vec<Share>, Error>,
{
    party.reset();
    let role = party.role();
    let outputs = build(party.circuits_mut(), role)?;
    party.exec_circuit()?;
    Ok(outputs
        .iter()
        .map(|out| out.clear_values(party.circuits()).unwrap_or_default())
        .collect())
}

/// Runs `build` once on a fresh pair with the default configuration.
pub fn simulate<F>(build: F) -> Result<Outputs, Error>
where
    F: Fn(&mut Circuits, Role) -> Result<Vec<Share>, Error> + Sync,
{
    Pair::new(PartyConfig::default()).run(build)
}

/// An input of `owner`: the real value at the owner, a placeholder at the peer.
pub fn input(
    builder: &mut impl Circuit,
    value: u64,
    bitlen: usize,
    owner: Role,
    role: Role,
) -> Result<Share, Error> {
    if role == owner {
        builder.put_in_gate(value, bitlen, owner)
    } else {
        builder.put_dummy_in_gate(1, bitlen, owner)
    }
}

/// A SIMD input of `owner` with one value per entry of `values`.
pub fn simd_input(builder: &mut impl Circuit, values: &[u64], owner: Role, role: Role) -> Result<Share, Error> {
    if role == owner {
        builder.put_simd_in_gate(values, 16, owner)
    } else {
        builder.put_dummy_in_gate(values.len(), 16, owner)
    }
}
