//! The garbler.
//!
//! The whole Yao circuit is garbled in the setup phase, before any input is
//! known. Online, the server only transfers input keys and decodes outputs.
use std::sync::Arc;

use rand::Rng;
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
        Sharing, finish_gate, pack_bits, unpack_bits,
        yao::{block_at, gates_in_order, hash, num_ot_values, own_bits},
    },
    utils::ByteReader,
};

#[derive(Debug)]
enum Step {
    /// The client's choice corrections for keys sent by random OT.
    OtCorrections { ot: usize },
    /// The client's permutation bits of an output.
    Output,
}

/// Yao sharing at the server.
#[derive(Debug)]
pub(crate) struct YaoServerSharing {
    rng: AesRng,
    /// The global offset `R`.
    delta: Block,
    /// Zero keys of all Yao gates, indexed by gate.
    keys: Vec<Vec<Block>>,
    ot: Option<OtHandle>,
    pads: [BitVector; 2],
    ot_pos: usize,
    send: Vec<u8>,
    recv_len: usize,
    active: Vec<(GateId, Step)>,
    /// Second-round messages for the next layer.
    pending: Vec<u8>,
}

impl YaoServerSharing {
    pub(crate) fn new(rng: AesRng) -> Self {
        Self {
            rng,
            delta: Block::ONE,
            keys: vec![],
            ot: None,
            pads: Default::default(),
            ot_pos: 0,
            send: vec![],
            recv_len: 0,
            active: vec![],
            pending: vec![],
        }
    }

    fn random_keys(&mut self, n: usize) -> Vec<Block> {
        (0..n).map(|_| self.rng.random()).collect()
    }

    /// Garbles an AND gate with half gates, appending `TG, TE` per value to `tables`.
    fn garble_and(&self, a: &[Block], b: &[Block], tweak: &mut u64, tables: &mut Vec<u8>) -> Vec<Block> {
        let r = self.delta;
        a.iter()
            .zip(b)
            .map(|(&a0, &b0)| {
                let (j0, j1) = (*tweak, *tweak + 1);
                *tweak += 2;
                let (pa, pb) = (a0.lsb(), b0.lsb());
                let (ha0, ha1) = (hash(a0, j0), hash(a0 ^ r, j0));
                let (hb0, hb1) = (hash(b0, j1), hash(b0 ^ r, j1));
                let tg = ha0 ^ ha1 ^ r.const_mul(pb);
                let wg0 = ha0 ^ tg.const_mul(pa);
                let te = hb0 ^ hb1 ^ a0;
                let we0 = hb0 ^ (te ^ a0).const_mul(pb);
                tables.extend_from_slice(tg.as_bytes());
                tables.extend_from_slice(te.as_bytes());
                wg0 ^ we0
            })
            .collect()
    }

    fn parent_keys(&self, circ: &Circuits, id: GateId, k: usize) -> &[Block] {
        &self.keys[circ.gate(id).parents()[k].index()]
    }

    /// Sends `W0 ^ v * R` for the server's own bits.
    fn send_active_keys(&mut self, id: GateId, bits: &BitVector) {
        for (w0, v) in self.keys[id.index()].iter().zip(bits.iter()) {
            self.send.extend_from_slice((*w0 ^ self.delta.const_mul(v)).as_bytes());
        }
    }
}

impl Sharing for YaoServerSharing {
    fn context(&self) -> Context {
        Context::Yao
    }

    fn reset(&mut self) {
        self.keys.clear();
        self.ot = None;
        self.pads = Default::default();
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
            self.ot = Some(setup.add_ot_task(OtTask::sender(OtFlavor::Random, n, Block::BITS, masking, None)));
        }
        Ok(())
    }

    /// Garbles the circuit and sends the garbled tables followed by the
    /// decoding bits of the client's outputs.
    #[instrument(level = Level::DEBUG, skip_all, err)]
    fn perform_setup_phase(&mut self, circ: &Circuits, setup: &mut Setup) -> Result<(), Error> {
        let order = gates_in_order(circ);
        if order.is_empty() {
            return Ok(());
        }
        let mut delta: Block = self.rng.random();
        delta.as_mut_bytes()[0] |= 1;
        self.delta = delta;
        self.keys = vec![vec![]; circ.num_gates()];
        let mut tables = Vec::with_capacity(2 * Block::BYTES * circ.queues(Context::Yao).num_non_linear());
        let mut decode = vec![];
        let mut tweak = 0;
        for id in order {
            let gate = circ.gate(id);
            let nvals = gate.nvals();
            let keys = match gate.kind() {
                GateKind::Input { .. } | GateKind::Conversion { .. } => self.random_keys(nvals),
                GateKind::Linear => {
                    let (a, b) = (self.parent_keys(circ, id, 0), self.parent_keys(circ, id, 1));
                    a.iter().zip(b).map(|(a, b)| *a ^ *b).collect()
                }
                GateKind::NonLinear => {
                    let (a, b) = (self.parent_keys(circ, id, 0), self.parent_keys(circ, id, 1));
                    self.garble_and(a, b, &mut tweak, &mut tables)
                }
                GateKind::Inv => self
                    .parent_keys(circ, id, 0)
                    .iter()
                    .map(|k| *k ^ self.delta)
                    .collect(),
                GateKind::Constant { values } => values
                    .iter()
                    .map(|v| self.delta.const_mul(v & 1 == 1))
                    .collect(),
                GateKind::Output { dst } => {
                    if dst.includes(Role::Client) {
                        decode.extend(self.parent_keys(circ, id, 0).iter().map(Block::lsb));
                    }
                    vec![]
                }
                kind if kind.is_simd() => {
                    let parents: Vec<GateValue> = gate
                        .parents()
                        .iter()
                        .map(|p| GateValue::Yao(self.keys[p.index()].clone()))
                        .collect();
                    let parent_nvals: Vec<usize> = gate.parents().iter().map(|p| circ.gate(*p).nvals()).collect();
                    let sources = kind.sources(&parent_nvals, nvals);
                    match GateValue::gather(&parents.iter().collect::<Vec<_>>(), &sources)? {
                        GateValue::Yao(keys) => keys,
                        _ => return Err(Error::violation("SIMD gate on non-Yao keys")),
                    }
                }
                kind => return Err(Error::unsupported(kind.name(), Context::Yao)),
            };
            self.keys[id.index()] = keys;
        }
        debug!(
            table_bytes = tables.len(),
            decode_bits = decode.len(),
            "garbled circuit"
        );
        tables.extend(pack_bits(decode));
        setup.send(tables)
    }

    fn finish_setup_phase(&mut self, _circ: &Circuits, setup: &mut Setup) -> Result<(), Error> {
        if let Some(handle) = self.ot.take() {
            let OtData::Sender { x0, x1 } = setup.take_ot_task(handle)?.data else {
                return Err(Error::violation("Yao key transfer from a receiver OT task"));
            };
            self.pads = [x0, x1];
        }
        Ok(())
    }

    fn prepare_online_phase(&mut self, _circ: &Circuits) -> Result<(), Error> {
        self.ot_pos = 0;
        self.send.clear();
        self.recv_len = 0;
        self.active.clear();
        self.pending.clear();
        Ok(())
    }

    fn evaluate_local_operations(&mut self, circ: &mut Circuits, depth: usize) -> Result<(), Error> {
        for id in circ.queues(Context::Yao).local(depth).to_vec() {
            let keys = self.keys[id.index()].clone();
            finish_gate(circ, id, GateValue::Yao(keys));
        }
        Ok(())
    }

    fn evaluate_interactive_operations(&mut self, circ: &mut Circuits, depth: usize) -> Result<(), Error> {
        self.send.append(&mut self.pending);
        for id in circ.queues(Context::Yao).interactive(depth).to_vec() {
            let gate = circ.gate(id);
            let nvals = gate.nvals();
            match gate.kind() {
                GateKind::Output { dst } => {
                    if dst.includes(Role::Server) {
                        self.recv_len += nvals.div_ceil(8);
                        self.active.push((id, Step::Output));
                    } else {
                        finish_gate(circ, id, GateValue::Clear(vec![]));
                    }
                }
                _ if gate.rounds() == 2 => {
                    self.recv_len += nvals.div_ceil(8);
                    self.active.push((id, Step::OtCorrections { ot: self.ot_pos }));
                    self.ot_pos += nvals;
                }
                // server inputs and the server's bits of A2Y conversions
                GateKind::Input { .. } | GateKind::Conversion { .. } => {
                    let bits = own_bits(circ, id)?;
                    self.send_active_keys(id, &bits);
                    let keys = self.keys[id.index()].clone();
                    finish_gate(circ, id, GateValue::Yao(keys));
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

    /// Decodes outputs and answers the client's OT corrections with
    /// `m_b = W_b ^ x_{b ^ e}`, sent in the next layer.
    fn finish_circuit_layer(&mut self, circ: &mut Circuits, _depth: usize, received: &[u8]) -> Result<(), Error> {
        let mut reader = ByteReader::new(received);
        for (id, step) in std::mem::take(&mut self.active) {
            let nvals = circ.gate(id).nvals();
            match step {
                Step::Output => {
                    let lsbs = unpack_bits(&mut reader, nvals)?;
                    let parent = circ.gate(id).parents()[0];
                    let values = circ
                        .gate(parent)
                        .yao_value()?
                        .iter()
                        .zip(lsbs.iter())
                        .map(|(w0, lsb)| u64::from(w0.lsb() ^ lsb))
                        .collect();
                    finish_gate(circ, id, GateValue::Clear(values));
                }
                Step::OtCorrections { ot } => {
                    let e = unpack_bits(&mut reader, nvals)?;
                    // for B2Y the server's own share flips the key the client gets
                    let flip = match circ.gate(id).kind() {
                        GateKind::Conversion { .. }
                            if circ.gate(circ.gate(id).parents()[0]).context() == Context::Bool =>
                        {
                            own_bits(circ, id)?
                        }
                        _ => BitVector::new(nvals),
                    };
                    if ot + nvals > self.pads[0].len() / Block::BITS {
                        return Err(Error::violation("not enough random OTs for Yao key transfer"));
                    }
                    for (k, w0) in self.keys[id.index()].iter().enumerate() {
                        for b in [false, true] {
                            let key = *w0 ^ self.delta.const_mul(b ^ flip.get_bit(k));
                            let pad = block_at(&self.pads[usize::from(b ^ e.get_bit(k))], ot + k);
                            self.pending.extend_from_slice((key ^ pad).as_bytes());
                        }
                    }
                    let keys = self.keys[id.index()].clone();
                    finish_gate(circ, id, GateValue::Yao(keys));
                }
            }
        }
        self.recv_len = 0;
        Ok(())
    }
}
