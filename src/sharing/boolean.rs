//! GMW: XOR shares of bits, AND gates via Beaver multiplication triples.
use std::sync::Arc;

use tracing::{Level, debug, instrument};

use crate::{
    bitvec::BitVector,
    circuit::{Circuits, Context, GateId, GateKind, GateValue, Recipients, Role},
    crypto::AesRng,
    error::Error,
    ot::{OtData, OtFlavor, OtTask, XorMasking},
    setup::{OtHandle, Setup},
    sharing::{BitReader, Sharing, bit_slice, bits_to_words, evaluate_simd, finish_gate},
};

/// Boolean multiplication triples `c = a & b`, one bit per AND value.
#[derive(Debug, Default)]
struct Triples {
    a: BitVector,
    b: BitVector,
    c: BitVector,
}

/// What an interactive gate waits for at the end of the layer.
#[derive(Debug)]
enum Step {
    /// The owner's random mask.
    Input,
    /// The peer's share, if this party learns the output.
    Output(Recipients),
    /// The peer's `d = x ^ a` and `e = y ^ b`.
    And { mt: usize, d: BitVector, e: BitVector },
}

/// Evaluation of Boolean (GMW) gates.
#[derive(Debug)]
pub(crate) struct BoolSharing {
    role: Role,
    rng: AesRng,
    ots: Option<(OtHandle, OtHandle)>,
    triples: Triples,
    mt_pos: usize,
    send: BitVector,
    recv_bits: usize,
    active: Vec<(GateId, Step)>,
}

impl BoolSharing {
    pub(crate) fn new(role: Role, rng: AesRng) -> Self {
        Self {
            role,
            rng,
            ots: None,
            triples: Triples::default(),
            mt_pos: 0,
            send: BitVector::default(),
            recv_bits: 0,
            active: vec![],
        }
    }

    fn ones(nvals: usize) -> BitVector {
        std::iter::repeat_n(true, nvals).collect()
    }
}

impl Sharing for BoolSharing {
    fn context(&self) -> Context {
        Context::Bool
    }

    fn reset(&mut self) {
        self.ots = None;
        self.triples = Triples::default();
        self.mt_pos = 0;
        self.send = BitVector::default();
        self.recv_bits = 0;
        self.active.clear();
    }

    /// Two random OTs per AND value, one in each direction.
    fn prepare_setup_phase(&mut self, circ: &Circuits, setup: &mut Setup) -> Result<(), Error> {
        let n = self.num_non_linear_operations(circ);
        if n == 0 {
            return Ok(());
        }
        let masking = Arc::new(XorMasking::uncorrelated(1));
        let a = BitVector::random(n, &mut self.rng);
        let send = setup.add_ot_task(OtTask::sender(OtFlavor::Random, n, 1, masking.clone(), None));
        let receive = setup.add_ot_task(OtTask::receiver(OtFlavor::Random, n, 1, masking, a));
        self.ots = Some((send, receive));
        Ok(())
    }

    fn perform_setup_phase(&mut self, _circ: &Circuits, _setup: &mut Setup) -> Result<(), Error> {
        Ok(())
    }

    /// With `(x0, x1)` from our sender task and `x_a` from our receiver task,
    /// `b = x0 ^ x1` and `c = a & b ^ x0 ^ x_a`.
    #[instrument(level = Level::DEBUG, skip_all, err)]
    fn finish_setup_phase(&mut self, _circ: &Circuits, setup: &mut Setup) -> Result<(), Error> {
        let Some((send, receive)) = self.ots.take() else {
            return Ok(());
        };
        let (OtData::Sender { x0, x1 }, OtData::Receiver { choices, output }) =
            (setup.take_ot_task(send)?.data, setup.take_ot_task(receive)?.data)
        else {
            return Err(Error::violation("Boolean triples from mismatched OT tasks"));
        };
        let mut b = x0.clone();
        b.xor(&x1);
        let mut c = choices.clone();
        c.and(&b);
        c.xor(&x0);
        c.xor(&output);
        debug!(triples = choices.len(), "Boolean triples ready");
        self.triples = Triples { a: choices, b, c };
        Ok(())
    }

    fn prepare_online_phase(&mut self, _circ: &Circuits) -> Result<(), Error> {
        self.mt_pos = 0;
        self.send = BitVector::default();
        self.recv_bits = 0;
        self.active.clear();
        Ok(())
    }

    fn evaluate_local_operations(&mut self, circ: &mut Circuits, depth: usize) -> Result<(), Error> {
        for id in circ.queues(Context::Bool).local(depth).to_vec() {
            let gate = circ.gate(id);
            let nvals = gate.nvals();
            let value = match gate.kind() {
                GateKind::Linear => {
                    let mut x = circ.gate(gate.parents()[0]).bool_value()?.clone();
                    x.xor(circ.gate(gate.parents()[1]).bool_value()?);
                    GateValue::Bool(x)
                }
                GateKind::Inv => {
                    let mut x = circ.gate(gate.parents()[0]).bool_value()?.clone();
                    if self.role == Role::Server {
                        x.xor(&Self::ones(nvals));
                    }
                    GateValue::Bool(x)
                }
                GateKind::Constant { values } => match self.role {
                    Role::Server => GateValue::Bool(values.iter().map(|v| v & 1 == 1).collect()),
                    Role::Client => GateValue::Bool(BitVector::new(nvals)),
                },
                GateKind::SharedOutput => {
                    GateValue::Clear(bits_to_words(circ.gate(gate.parents()[0]).bool_value()?))
                }
                kind if kind.is_simd() => {
                    evaluate_simd(circ, id)?;
                    continue;
                }
                kind => {
                    return Err(Error::violation(format!(
                        "{} gate in the local queue of the Boolean sharing",
                        kind.name()
                    )));
                }
            };
            finish_gate(circ, id, value);
        }
        Ok(())
    }

    fn evaluate_interactive_operations(&mut self, circ: &mut Circuits, depth: usize) -> Result<(), Error> {
        for id in circ.queues(Context::Bool).interactive(depth).to_vec() {
            let gate = circ.gate(id);
            let nvals = gate.nvals();
            match gate.kind() {
                GateKind::Input { owner, plaintext } if *owner == self.role => {
                    let Some(plaintext) = plaintext else {
                        return Err(Error::violation(format!("input {id} has no value")));
                    };
                    let r = BitVector::random(nvals, &mut self.rng);
                    let mut share: BitVector = plaintext.iter().map(|v| v & 1 == 1).collect();
                    share.xor(&r);
                    self.send.append(&r);
                    finish_gate(circ, id, GateValue::Bool(share));
                }
                GateKind::Input { .. } => {
                    self.recv_bits += nvals;
                    self.active.push((id, Step::Input));
                }
                GateKind::Output { dst } => {
                    let dst = *dst;
                    if dst.includes(self.role.other()) {
                        self.send.append(circ.gate(gate.parents()[0]).bool_value()?);
                    }
                    if dst.includes(self.role) {
                        self.recv_bits += nvals;
                    }
                    self.active.push((id, Step::Output(dst)));
                }
                GateKind::NonLinear => {
                    let mt = self.mt_pos;
                    if mt + nvals > self.triples.a.len() {
                        return Err(Error::violation("not enough Boolean multiplication triples"));
                    }
                    let mut d = circ.gate(gate.parents()[0]).bool_value()?.clone();
                    d.xor(&bit_slice(&self.triples.a, mt, nvals));
                    let mut e = circ.gate(gate.parents()[1]).bool_value()?.clone();
                    e.xor(&bit_slice(&self.triples.b, mt, nvals));
                    self.send.append(&d);
                    self.send.append(&e);
                    self.recv_bits += 2 * nvals;
                    self.mt_pos += nvals;
                    self.active.push((id, Step::And { mt, d, e }));
                }
                // Y2B: the permutation bits of the wire keys are XOR shares of the value.
                GateKind::Conversion { .. } => {
                    let keys = circ.gate(gate.parents()[0]).yao_value()?;
                    let bits = keys.iter().map(|k| k.lsb()).collect();
                    finish_gate(circ, id, GateValue::Bool(bits));
                }
                kind => {
                    return Err(Error::violation(format!(
                        "{} gate in the interactive queue of the Boolean sharing",
                        kind.name()
                    )));
                }
            }
        }
        Ok(())
    }

    fn data_to_send(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.send).as_bytes().to_vec()
    }

    fn bytes_to_receive(&self) -> usize {
        self.recv_bits.div_ceil(8)
    }

    fn finish_circuit_layer(&mut self, circ: &mut Circuits, _depth: usize, received: &[u8]) -> Result<(), Error> {
        let mut reader = BitReader::new(received);
        for (id, step) in std::mem::take(&mut self.active) {
            let gate = circ.gate(id);
            let nvals = gate.nvals();
            let value = match step {
                Step::Input => GateValue::Bool(reader.take(nvals)?),
                Step::Output(dst) if dst.includes(self.role) => {
                    let mut v = reader.take(nvals)?;
                    v.xor(circ.gate(gate.parents()[0]).bool_value()?);
                    GateValue::Clear(bits_to_words(&v))
                }
                Step::Output(_) => GateValue::Clear(vec![]),
                Step::And { mt, mut d, mut e } => {
                    d.xor(&reader.take(nvals)?);
                    e.xor(&reader.take(nvals)?);
                    let mut z = bit_slice(&self.triples.c, mt, nvals);
                    let mut db = bit_slice(&self.triples.b, mt, nvals);
                    db.and(&d);
                    z.xor(&db);
                    let mut ea = bit_slice(&self.triples.a, mt, nvals);
                    ea.and(&e);
                    z.xor(&ea);
                    if self.role == Role::Server {
                        d.and(&e);
                        z.xor(&d);
                    }
                    GateValue::Bool(z)
                }
            };
            finish_gate(circ, id, value);
        }
        self.recv_bits = 0;
        Ok(())
    }
}
