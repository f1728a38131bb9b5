//! Additive sharing modulo `2^l`.
//!
//! Multiplication triples come from correlated OTs with [`ArithMtMasking`]:
//! one OT per bit of the receiver's `a`, so that the chosen messages sum up
//! to a share of `a * b`. B2A conversions transfer one random OT per bit.
use std::sync::Arc;

use rand::Rng;
use tracing::{Level, debug, instrument};

use crate::{
    bitvec::BitVector,
    circuit::{Circuits, Context, GateId, GateKind, GateValue, Recipients, Role},
    crypto::AesRng,
    error::Error,
    ot::{ArithMtMasking, OtData, OtFlavor, OtTask, XorMasking},
    setup::{OtHandle, Setup},
    sharing::{Sharing, evaluate_simd, finish_gate, pack_bits, unpack_bits},
    utils::{ByteReader, mask_bits},
};

#[derive(Debug, Default)]
struct Triples {
    a: Vec<u64>,
    b: Vec<u64>,
    c: Vec<u64>,
}

#[derive(Debug)]
enum Step {
    Input,
    Output(Recipients),
    Mul { mt: usize, d: Vec<u64>, e: Vec<u64> },
    /// Server: the client's choice corrections of a B2A conversion.
    B2aCorrections { ot: usize },
    /// Client: the server's masked messages `y0, y1` for every bit.
    B2aMessages { bits: BitVector, ot: usize },
}

/// The random OTs of the B2A conversions.
#[derive(Debug, Default)]
enum B2aPads {
    #[default]
    None,
    Sender([BitVector; 2]),
    Receiver { choices: BitVector, output: BitVector },
}

/// Evaluation of arithmetic gates.
#[derive(Debug)]
pub(crate) struct ArithSharing {
    role: Role,
    bitlen: usize,
    rng: AesRng,
    mt_ots: Option<(OtHandle, OtHandle)>,
    mt_inputs: (Vec<u64>, Vec<u64>),
    triples: Triples,
    mt_pos: usize,
    b2a_ot: Option<OtHandle>,
    b2a: B2aPads,
    b2a_pos: usize,
    send: Vec<u8>,
    recv_len: usize,
    active: Vec<(GateId, Step)>,
    /// Server: second-round messages for the next layer.
    pending_send: Vec<u8>,
    /// Client: gates waiting for a second-round message.
    pending: Vec<(GateId, Step)>,
}

impl ArithSharing {
    pub(crate) fn new(role: Role, bitlen: usize, rng: AesRng) -> Self {
        Self {
            role,
            bitlen,
            rng,
            mt_ots: None,
            mt_inputs: Default::default(),
            triples: Triples::default(),
            mt_pos: 0,
            b2a_ot: None,
            b2a: B2aPads::None,
            b2a_pos: 0,
            send: vec![],
            recv_len: 0,
            active: vec![],
            pending_send: vec![],
            pending: vec![],
        }
    }

    fn value_bytes(&self) -> usize {
        self.bitlen / 8
    }

    fn mask(&self, v: u64) -> u64 {
        mask_bits(v, self.bitlen)
    }

    fn random_values(&mut self, n: usize) -> Vec<u64> {
        (0..n).map(|_| mask_bits(self.rng.random(), self.bitlen)).collect()
    }

    fn put(&mut self, values: &[u64]) {
        let n = self.value_bytes();
        for v in values {
            self.send.extend_from_slice(&v.to_le_bytes()[..n]);
        }
    }

    fn take(&self, reader: &mut ByteReader<'_>, n: usize) -> Result<Vec<u64>, Error> {
        let len = self.value_bytes();
        Ok(reader
            .take(n * len)?
            .chunks_exact(len)
            .map(|c| {
                let mut bytes = [0; 8];
                bytes[..len].copy_from_slice(c);
                u64::from_le_bytes(bytes)
            })
            .collect())
    }

    fn value_of(circ: &Circuits, id: GateId, k: usize) -> Result<&[u64], Error> {
        circ.gate(circ.gate(id).parents()[k]).arith_value()
    }

    /// The Boolean shares of a B2A gate: bit `j` of value `k` at `k * m + j`.
    fn b2a_bits(circ: &Circuits, id: GateId) -> Result<BitVector, Error> {
        let gate = circ.gate(id);
        let m = gate.parents().len();
        let mut bits = BitVector::new(gate.nvals() * m);
        for (j, p) in gate.parents().iter().enumerate() {
            for (k, bit) in circ.gate(*p).bool_value()?.iter().enumerate() {
                bits.set_bit(k * m + j, bit);
            }
        }
        Ok(bits)
    }

    fn num_b2a_ots(circ: &Circuits) -> usize {
        let queues = circ.queues(Context::Arith);
        (0..queues.num_layers())
            .flat_map(|d| queues.interactive(d))
            .map(|id| circ.gate(*id))
            .filter(|g| matches!(g.kind(), GateKind::Conversion { .. }))
            .map(|g| g.nvals() * g.parents().len())
            .sum()
    }

    fn ot_int(&self, buf: &BitVector, i: usize) -> u64 {
        buf.get_int(i * self.bitlen, self.bitlen)
    }
}

impl Sharing for ArithSharing {
    fn context(&self) -> Context {
        Context::Arith
    }

    fn reset(&mut self) {
        self.mt_ots = None;
        self.mt_inputs = Default::default();
        self.triples = Triples::default();
        self.mt_pos = 0;
        self.b2a_ot = None;
        self.b2a = B2aPads::None;
        self.b2a_pos = 0;
        self.send.clear();
        self.recv_len = 0;
        self.active.clear();
        self.pending_send.clear();
        self.pending.clear();
    }

    /// Registers `n * l` correlated OTs per direction for `n` multiplications,
    /// then the random OTs of the B2A conversions (server sends).
    fn prepare_setup_phase(&mut self, circ: &Circuits, setup: &mut Setup) -> Result<(), Error> {
        let l = self.bitlen;
        let n = self.num_non_linear_operations(circ);
        if n > 0 {
            let a = self.random_values(n);
            let b = self.random_values(n);
            let mut choices = BitVector::new(n * l);
            for (k, v) in a.iter().enumerate() {
                choices.set_int(*v, k * l, l);
            }
            let send = setup.add_ot_task(OtTask::sender(
                OtFlavor::Correlated,
                n * l,
                l,
                Arc::new(ArithMtMasking::new(l, b.clone())),
                None,
            ));
            let receive = setup.add_ot_task(OtTask::receiver(
                OtFlavor::Correlated,
                n * l,
                l,
                Arc::new(XorMasking::uncorrelated(l)),
                choices,
            ));
            self.mt_ots = Some((send, receive));
            self.mt_inputs = (a, b);
        }

        let n = Self::num_b2a_ots(circ);
        if n > 0 {
            let masking = Arc::new(XorMasking::uncorrelated(l));
            let task = match self.role {
                Role::Server => OtTask::sender(OtFlavor::Random, n, l, masking, None),
                Role::Client => {
                    let choices = BitVector::random(n, &mut self.rng);
                    OtTask::receiver(OtFlavor::Random, n, l, masking, choices)
                }
            };
            self.b2a_ot = Some(setup.add_ot_task(task));
        }
        Ok(())
    }

    fn perform_setup_phase(&mut self, _circ: &Circuits, _setup: &mut Setup) -> Result<(), Error> {
        Ok(())
    }

    /// `c = a * b - sum(x0) + sum(x_a)`, summing over the `l` OTs of a triple.
    #[instrument(level = Level::DEBUG, skip_all, err)]
    fn finish_setup_phase(&mut self, _circ: &Circuits, setup: &mut Setup) -> Result<(), Error> {
        let l = self.bitlen;
        if let Some((send, receive)) = self.mt_ots.take() {
            let (OtData::Sender { x0, .. }, OtData::Receiver { output, .. }) =
                (setup.take_ot_task(send)?.data, setup.take_ot_task(receive)?.data)
            else {
                return Err(Error::violation("arithmetic triples from mismatched OT tasks"));
            };
            let (a, b) = std::mem::take(&mut self.mt_inputs);
            let c = a
                .iter()
                .zip(&b)
                .enumerate()
                .map(|(k, (a, b))| {
                    let mut c = a.wrapping_mul(*b);
                    for j in 0..l {
                        c = c
                            .wrapping_sub(self.ot_int(&x0, k * l + j))
                            .wrapping_add(self.ot_int(&output, k * l + j));
                    }
                    self.mask(c)
                })
                .collect();
            debug!(triples = a.len(), bitlen = l, "arithmetic triples ready");
            self.triples = Triples { a, b, c };
        }
        if let Some(handle) = self.b2a_ot.take() {
            self.b2a = match setup.take_ot_task(handle)?.data {
                OtData::Sender { x0, x1 } => B2aPads::Sender([x0, x1]),
                OtData::Receiver { choices, output } => B2aPads::Receiver { choices, output },
            };
        }
        Ok(())
    }

    fn prepare_online_phase(&mut self, _circ: &Circuits) -> Result<(), Error> {
        self.mt_pos = 0;
        self.b2a_pos = 0;
        self.send.clear();
        self.recv_len = 0;
        self.active.clear();
        self.pending_send.clear();
        self.pending.clear();
        Ok(())
    }

    fn evaluate_local_operations(&mut self, circ: &mut Circuits, depth: usize) -> Result<(), Error> {
        for id in circ.queues(Context::Arith).local(depth).to_vec() {
            let gate = circ.gate(id);
            let value = match gate.kind() {
                GateKind::Linear => {
                    let (x, y) = (Self::value_of(circ, id, 0)?, Self::value_of(circ, id, 1)?);
                    GateValue::Arith(x.iter().zip(y).map(|(x, y)| self.mask(x.wrapping_add(*y))).collect())
                }
                GateKind::Inv => GateValue::Arith(
                    Self::value_of(circ, id, 0)?
                        .iter()
                        .map(|x| self.mask(x.wrapping_neg()))
                        .collect(),
                ),
                GateKind::MulConst { constant } => GateValue::Arith(
                    Self::value_of(circ, id, 0)?
                        .iter()
                        .map(|x| self.mask(x.wrapping_mul(*constant)))
                        .collect(),
                ),
                GateKind::Constant { values } => match self.role {
                    Role::Server => GateValue::Arith(values.iter().map(|v| self.mask(*v)).collect()),
                    Role::Client => GateValue::Arith(vec![0; values.len()]),
                },
                GateKind::SharedOutput => GateValue::Clear(Self::value_of(circ, id, 0)?.to_vec()),
                kind if kind.is_simd() => {
                    evaluate_simd(circ, id)?;
                    continue;
                }
                kind => {
                    return Err(Error::violation(format!(
                        "{} gate in the local queue of the arithmetic sharing",
                        kind.name()
                    )));
                }
            };
            finish_gate(circ, id, value);
        }
        Ok(())
    }

    fn evaluate_interactive_operations(&mut self, circ: &mut Circuits, depth: usize) -> Result<(), Error> {
        self.send.append(&mut self.pending_send);
        for (id, step) in std::mem::take(&mut self.pending) {
            let gate = circ.gate(id);
            self.recv_len += 2 * self.value_bytes() * gate.nvals() * gate.parents().len();
            self.active.push((id, step));
        }
        for id in circ.queues(Context::Arith).interactive(depth).to_vec() {
            let gate = circ.gate(id);
            let nvals = gate.nvals();
            match gate.kind() {
                GateKind::Input { owner, plaintext } if *owner == self.role => {
                    let Some(plaintext) = plaintext.clone() else {
                        return Err(Error::violation(format!("input {id} has no value")));
                    };
                    let r = self.random_values(nvals);
                    let share = plaintext
                        .iter()
                        .zip(&r)
                        .map(|(v, r)| self.mask(v.wrapping_sub(*r)))
                        .collect();
                    self.put(&r);
                    finish_gate(circ, id, GateValue::Arith(share));
                }
                GateKind::Input { .. } => {
                    self.recv_len += nvals * self.value_bytes();
                    self.active.push((id, Step::Input));
                }
                GateKind::Output { dst } => {
                    let dst = *dst;
                    if dst.includes(self.role.other()) {
                        let mine = Self::value_of(circ, id, 0)?.to_vec();
                        self.put(&mine);
                    }
                    if dst.includes(self.role) {
                        self.recv_len += nvals * self.value_bytes();
                    }
                    self.active.push((id, Step::Output(dst)));
                }
                GateKind::NonLinear => {
                    let mt = self.mt_pos;
                    if mt + nvals > self.triples.a.len() {
                        return Err(Error::violation("not enough arithmetic multiplication triples"));
                    }
                    let (x, y) = (Self::value_of(circ, id, 0)?, Self::value_of(circ, id, 1)?);
                    let d: Vec<u64> = x
                        .iter()
                        .zip(&self.triples.a[mt..])
                        .map(|(x, a)| self.mask(x.wrapping_sub(*a)))
                        .collect();
                    let e: Vec<u64> = y
                        .iter()
                        .zip(&self.triples.b[mt..])
                        .map(|(y, b)| self.mask(y.wrapping_sub(*b)))
                        .collect();
                    self.put(&d);
                    self.put(&e);
                    self.recv_len += 2 * nvals * self.value_bytes();
                    self.mt_pos += nvals;
                    self.active.push((id, Step::Mul { mt, d, e }));
                }
                GateKind::Conversion { .. } => {
                    let n = nvals * gate.parents().len();
                    let ot = self.b2a_pos;
                    self.b2a_pos += n;
                    match (&self.b2a, self.role) {
                        (B2aPads::Receiver { choices, .. }, Role::Client) if ot + n <= choices.len() => {
                            let bits = Self::b2a_bits(circ, id)?;
                            let e = bits.iter().enumerate().map(|(i, t)| t ^ choices.get_bit(ot + i));
                            self.send.extend(pack_bits(e));
                            self.pending.push((id, Step::B2aMessages { bits, ot }));
                        }
                        (B2aPads::Sender(pads), Role::Server) if (ot + n) * self.bitlen <= pads[0].len() => {
                            self.recv_len += n.div_ceil(8);
                            self.active.push((id, Step::B2aCorrections { ot }));
                        }
                        _ => return Err(Error::violation("not enough random OTs for B2A")),
                    }
                }
                kind => {
                    return Err(Error::violation(format!(
                        "{} gate in the interactive queue of the arithmetic sharing",
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
        let l = self.bitlen;
        for (id, step) in std::mem::take(&mut self.active) {
            let gate = circ.gate(id);
            let nvals = gate.nvals();
            let value = match step {
                Step::Input => GateValue::Arith(self.take(&mut reader, nvals)?),
                Step::Output(dst) if dst.includes(self.role) => {
                    let theirs = self.take(&mut reader, nvals)?;
                    let mine = Self::value_of(circ, id, 0)?;
                    GateValue::Clear(mine.iter().zip(theirs).map(|(m, t)| self.mask(m.wrapping_add(t))).collect())
                }
                Step::Output(_) => GateValue::Clear(vec![]),
                // z = a * E + b * D + c (+ D * E at the server)
                Step::Mul { mt, d, e } => {
                    let d_theirs = self.take(&mut reader, nvals)?;
                    let e_theirs = self.take(&mut reader, nvals)?;
                    let t = &self.triples;
                    let z = (0..nvals)
                        .map(|k| {
                            let d = d[k].wrapping_add(d_theirs[k]);
                            let e = e[k].wrapping_add(e_theirs[k]);
                            let mut z = t.a[mt + k]
                                .wrapping_mul(e)
                                .wrapping_add(t.b[mt + k].wrapping_mul(d))
                                .wrapping_add(t.c[mt + k]);
                            if self.role == Role::Server {
                                z = z.wrapping_add(d.wrapping_mul(e));
                            }
                            self.mask(z)
                        })
                        .collect();
                    GateValue::Arith(z)
                }
                // y_b = -r + ((s ^ b) << j) + x_{b ^ e}; the server keeps the sum of the r
                Step::B2aCorrections { ot } => {
                    let B2aPads::Sender(pads) = &self.b2a else {
                        return Err(Error::violation("B2A without random OTs"));
                    };
                    let m = gate.parents().len();
                    let e = unpack_bits(&mut reader, nvals * m)?;
                    let s = Self::b2a_bits(circ, id)?;
                    let mut shares = vec![0_u64; nvals];
                    let mut msgs = Vec::with_capacity(2 * nvals * m);
                    for (k, share) in shares.iter_mut().enumerate() {
                        for j in 0..m {
                            let i = k * m + j;
                            let rnd: u64 = mask_bits(self.rng.random(), l);
                            *share = share.wrapping_add(rnd);
                            for b in [false, true] {
                                let plain = u64::from(s.get_bit(i) ^ b) << j;
                                let pad = self.ot_int(&pads[usize::from(b ^ e.get_bit(i))], ot + i);
                                msgs.push(mask_bits(plain.wrapping_sub(rnd).wrapping_add(pad), l));
                            }
                        }
                    }
                    for v in msgs {
                        self.pending_send.extend_from_slice(&v.to_le_bytes()[..l / 8]);
                    }
                    GateValue::Arith(shares.into_iter().map(|v| self.mask(v)).collect())
                }
                // the client's share is the sum of y_t - x_c
                Step::B2aMessages { bits, ot } => {
                    let B2aPads::Receiver { output, .. } = &self.b2a else {
                        return Err(Error::violation("B2A without random OTs"));
                    };
                    let m = gate.parents().len();
                    let y = self.take(&mut reader, 2 * nvals * m)?;
                    let shares = (0..nvals)
                        .map(|k| {
                            let share = (0..m).fold(0_u64, |acc, j| {
                                let i = k * m + j;
                                let chosen = y[2 * i + usize::from(bits.get_bit(i))];
                                acc.wrapping_add(chosen.wrapping_sub(self.ot_int(output, ot + i)))
                            });
                            self.mask(share)
                        })
                        .collect();
                    GateValue::Arith(shares)
                }
            };
            finish_gate(circ, id, value);
        }
        self.recv_len = 0;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_encoding() {
        let mut s = ArithSharing::new(Role::Server, 16, AesRng::new());
        s.put(&[0x1234, 0xffff]);
        assert_eq!(vec![0x34, 0x12, 0xff, 0xff], s.send);
        let data = s.data_to_send();
        let mut reader = ByteReader::new(&data);
        assert_eq!(vec![0x1234, 0xffff], s.take(&mut reader, 2).unwrap());
        assert!(s.take(&mut reader, 1).is_err());
    }
}
