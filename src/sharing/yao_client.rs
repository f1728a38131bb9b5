//! The evaluator.
use std::sync::Arc;

use tracing::{Level, debug, instrument};

use crate::{
    bitvec::BitVector,
    block::Block,
    circuit::{Circuits, Context, GateId, GateKind, GateValue, Role},
    crypto::AesRng,
    error::Error,
    ot::{OtData, OtFlavor, OtTask, XorMasking},
    setup::{OtHandle, Setup},
    sharing::{
        Sharing, evaluate_simd, finish_gate, pack_bits,
        yao::{block_at, gates_in_order, hash, num_client_output_bits, num_ot_values, own_bits},
    },
    utils::ByteReader,
};

#[derive(Debug)]
enum Step {
    /// The server's active keys of its inputs.
    ServerKeys,
    /// Both OT-masked keys `m0, m1` of every value; the client unmasks `m_v`.
    MaskedKeys { bits: BitVector, ot: usize },
}

/// Yao sharing at the client.
#[derive(Debug)]
pub(crate) struct YaoClientSharing {
    rng: AesRng,
    tables: Vec<Block>,
    table_pos: usize,
    decode: BitVector,
    decode_pos: usize,
    tweak: u64,
    ot: Option<OtHandle>,
    choices: BitVector,
    pads: BitVector,
    ot_pos: usize,
    send: Vec<u8>,
    recv_len: usize,
    active: Vec<(GateId, Step)>,
    /// Gates waiting for the second round of their key transfer.
    pending: Vec<(GateId, Step)>,
}

impl YaoClientSharing {
    pub(crate) fn new(rng: AesRng) -> Self {
        Self {
            rng,
            tables: vec![],
            table_pos: 0,
            decode: BitVector::default(),
            decode_pos: 0,
            tweak: 0,
            ot: None,
            choices: BitVector::default(),
            pads: BitVector::default(),
            ot_pos: 0,
            send: vec![],
            recv_len: 0,
            active: vec![],
            pending: vec![],
        }
    }

    /// Evaluates an AND gate with the next half-gate ciphertexts.
    fn evaluate_and(&mut self, a: &[Block], b: &[Block]) -> Result<Vec<Block>, Error> {
        if self.table_pos + 2 * a.len() > self.tables.len() {
            return Err(Error::violation("garbled circuit has too few tables"));
        }
        let mut out = Vec::with_capacity(a.len());
        for (&wa, &wb) in a.iter().zip(b) {
            let (tg, te) = (self.tables[self.table_pos], self.tables[self.table_pos + 1]);
            self.table_pos += 2;
            let (j0, j1) = (self.tweak, self.tweak + 1);
            self.tweak += 2;
            let wg = hash(wa, j0) ^ tg.const_mul(wa.lsb());
            let we = hash(wb, j1) ^ (te ^ wa).const_mul(wb.lsb());
            out.push(wg ^ we);
        }
        Ok(out)
    }

    fn keys_of(circ: &Circuits, id: GateId, k: usize) -> Result<&[Block], Error> {
        circ.gate(circ.gate(id).parents()[k]).yao_value()
    }
}

impl Sharing for YaoClientSharing {
    fn context(&self) -> Context {
        Context::Yao
    }

    fn reset(&mut self) {
        self.tables.clear();
        self.table_pos = 0;
        self.decode = BitVector::default();
        self.decode_pos = 0;
        self.tweak = 0;
        self.ot = None;
        self.choices = BitVector::default();
        self.pads = BitVector::default();
        self.ot_pos = 0;
        self.send.clear();
        self.recv_len = 0;
        self.active.clear();
        self.pending.clear();
    }

    fn prepare_setup_phase(&mut self, circ: &Circuits, setup: &mut Setup) -> Result<(), Error> {
        let n = num_ot_values(circ);
        if n > 0 {
            let masking = Arc::new(XorMasking::uncorrelated(Block::BITS));
            self.choices = BitVector::random(n, &mut self.rng);
            let task = OtTask::receiver(OtFlavor::Random, n, Block::BITS, masking, self.choices.clone());
            self.ot = Some(setup.add_ot_task(task));
        }
        Ok(())
    }

    fn perform_setup_phase(&mut self, _circ: &Circuits, _setup: &mut Setup) -> Result<(), Error> {
        Ok(())
    }

    /// Receives the garbled tables and the decoding bits of the client's outputs.
    #[instrument(level = Level::DEBUG, skip_all, err)]
    fn finish_setup_phase(&mut self, circ: &Circuits, setup: &mut Setup) -> Result<(), Error> {
        if let Some(handle) = self.ot.take() {
            let OtData::Receiver { output, .. } = setup.take_ot_task(handle)?.data else {
                return Err(Error::violation("Yao key transfer from a sender OT task"));
            };
            self.pads = output;
        }
        if gates_in_order(circ).is_empty() {
            return Ok(());
        }
        let table_bytes = 2 * Block::BYTES * circ.queues(Context::Yao).num_non_linear();
        let decode_bits = num_client_output_bits(circ);
        let data = setup.receive(table_bytes + decode_bits.div_ceil(8))?;
        let (tables, decode) = data.split_at(table_bytes);
        self.tables = Block::vec_from_bytes(tables);
        self.decode = BitVector::attach(decode.to_vec(), decode_bits);
        debug!(tables = self.tables.len() / 2, decode_bits, "received garbled circuit");
        Ok(())
    }

    fn prepare_online_phase(&mut self, _circ: &Circuits) -> Result<(), Error> {
        self.table_pos = 0;
        self.decode_pos = 0;
        self.tweak = 0;
        self.ot_pos = 0;
        self.send.clear();
        self.recv_len = 0;
        self.active.clear();
        self.pending.clear();
        Ok(())
    }

    fn evaluate_local_operations(&mut self, circ: &mut Circuits, depth: usize) -> Result<(), Error> {
        for id in circ.queues(Context::Yao).local(depth).to_vec() {
            let gate = circ.gate(id);
            let keys = match gate.kind() {
                GateKind::Linear => {
                    let (a, b) = (Self::keys_of(circ, id, 0)?, Self::keys_of(circ, id, 1)?);
                    a.iter().zip(b).map(|(a, b)| *a ^ *b).collect()
                }
                GateKind::NonLinear => {
                    let (a, b) = (Self::keys_of(circ, id, 0)?, Self::keys_of(circ, id, 1)?);
                    self.evaluate_and(a, b)?
                }
                GateKind::Inv => Self::keys_of(circ, id, 0)?.to_vec(),
                GateKind::Constant { values } => vec![Block::ZERO; values.len()],
                kind if kind.is_simd() => {
                    evaluate_simd(circ, id)?;
                    continue;
                }
                kind => return Err(Error::unsupported(kind.name(), Context::Yao)),
            };
            finish_gate(circ, id, GateValue::Yao(keys));
        }
        Ok(())
    }

    fn evaluate_interactive_operations(&mut self, circ: &mut Circuits, depth: usize) -> Result<(), Error> {
        for (id, step) in std::mem::take(&mut self.pending) {
            self.recv_len += 2 * Block::BYTES * circ.gate(id).nvals();
            self.active.push((id, step));
        }
        for id in circ.queues(Context::Yao).interactive(depth).to_vec() {
            let gate = circ.gate(id);
            let nvals = gate.nvals();
            match gate.kind() {
                GateKind::Output { dst } => {
                    let lsbs: BitVector = Self::keys_of(circ, id, 0)?.iter().map(Block::lsb).collect();
                    if dst.includes(Role::Server) {
                        self.send.extend(pack_bits(lsbs.iter()));
                    }
                    let value = if dst.includes(Role::Client) {
                        if self.decode_pos + nvals > self.decode.len() {
                            return Err(Error::violation("not enough output decoding bits"));
                        }
                        let values = lsbs
                            .iter()
                            .enumerate()
                            .map(|(k, lsb)| u64::from(lsb ^ self.decode.get_bit(self.decode_pos + k)))
                            .collect();
                        self.decode_pos += nvals;
                        values
                    } else {
                        vec![]
                    };
                    finish_gate(circ, id, GateValue::Clear(value));
                }
                // client inputs, B2Y and the client's bits of A2Y: send e = v ^ c
                _ if gate.rounds() == 2 => {
                    let ot = self.ot_pos;
                    if ot + nvals > self.choices.len() {
                        return Err(Error::violation("not enough random OTs for Yao key transfer"));
                    }
                    let bits = own_bits(circ, id)?;
                    let e = bits
                        .iter()
                        .enumerate()
                        .map(|(k, v)| v ^ self.choices.get_bit(ot + k));
                    self.send.extend(pack_bits(e));
                    self.ot_pos += nvals;
                    self.pending.push((id, Step::MaskedKeys { bits, ot }));
                }
                GateKind::Input { .. } | GateKind::Conversion { .. } => {
                    self.recv_len += Block::BYTES * nvals;
                    self.active.push((id, Step::ServerKeys));
                }
                kind => {
                    return Err(Error::violation(format!(
                        "{} gate in the interactive queue of the Yao sharing",
                        kind.name()
                    )));
                }
            }
        }
        Ok(())
    }

    fn data_to_send(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.send)
    }

    fn bytes_to_receive(&self) -> usize {
        self.recv_len
    }

    fn finish_circuit_layer(&mut self, circ: &mut Circuits, _depth: usize, received: &[u8]) -> Result<(), Error> {
        let mut reader = ByteReader::new(received);
        for (id, step) in std::mem::take(&mut self.active) {
            let nvals = circ.gate(id).nvals();
            let keys = match step {
                Step::ServerKeys => Block::vec_from_bytes(reader.take(Block::BYTES * nvals)?),
                Step::MaskedKeys { bits, ot } => {
                    let masked = Block::vec_from_bytes(reader.take(2 * Block::BYTES * nvals)?);
                    masked
                        .chunks_exact(2)
                        .enumerate()
                        .map(|(k, m)| m[usize::from(bits.get_bit(k))] ^ block_at(&self.pads, ot + k))
                        .collect()
                }
            };
            finish_gate(circ, id, GateValue::Yao(keys));
        }
        self.recv_len = 0;
        Ok(())
    }
}
