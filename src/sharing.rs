//! The evaluation side of the three sharings.
//!
//! Every sharing implements [`Sharing`]. The party drives all sharings
//! through the same sequence of calls: the setup phase (`prepare`, OTs,
//! `perform`, `finish`), then for every layer local gates, interactive gates,
//! one message exchange and [`Sharing::finish_circuit_layer`].
//!
//! Messages of one layer are the concatenation of the messages of all
//! sharings in the order of [`Context::ALL`]. Within a sharing, gates are
//! handled in queue order, which is the same at both parties.
use crate::{
    bitvec::BitVector,
    circuit::{Circuits, Context, GateId, GateValue},
    error::Error,
    setup::Setup,
    utils::ByteReader,
};

mod arithmetic;
mod boolean;
mod yao;
mod yao_client;
mod yao_server;

pub(crate) use arithmetic::ArithSharing;
pub(crate) use boolean::BoolSharing;
pub(crate) use yao_client::YaoClientSharing;
pub(crate) use yao_server::YaoServerSharing;

/// Evaluation of the gates of one sharing.
pub(crate) trait Sharing: Send {
    /// The sharing whose gates this evaluates.
    fn context(&self) -> Context;

    /// Drops all state of the last execution.
    fn reset(&mut self);

    /// Registers OT tasks and samples the randomness of the setup phase.
    fn prepare_setup_phase(&mut self, circ: &Circuits, setup: &mut Setup) -> Result<(), Error>;

    /// Runs after the OTs: transfers bulk setup data (garbled tables).
    fn perform_setup_phase(&mut self, circ: &Circuits, setup: &mut Setup) -> Result<(), Error>;

    /// Collects the OT results (multiplication triples, pads).
    fn finish_setup_phase(&mut self, circ: &Circuits, setup: &mut Setup) -> Result<(), Error>;

    /// Resets the per-execution counters of the online phase.
    fn prepare_online_phase(&mut self, circ: &Circuits) -> Result<(), Error>;

    /// Evaluates the gates of layer `depth` that need no communication.
    fn evaluate_local_operations(&mut self, circ: &mut Circuits, depth: usize) -> Result<(), Error>;

    /// Starts the interactive gates of layer `depth` and queues their messages.
    fn evaluate_interactive_operations(&mut self, circ: &mut Circuits, depth: usize) -> Result<(), Error>;

    /// The message of this layer. Empties the send buffer.
    fn data_to_send(&mut self) -> Vec<u8>;

    /// Length of the peer's message of this layer.
    fn bytes_to_receive(&self) -> usize;

    /// Completes the interactive gates of layer `depth` with the peer's message.
    fn finish_circuit_layer(&mut self, circ: &mut Circuits, depth: usize, received: &[u8]) -> Result<(), Error>;

    /// Number of non-linear operations, counting every SIMD value.
    fn num_non_linear_operations(&self, circ: &Circuits) -> usize {
        circ.queues(self.context()).num_non_linear()
    }
}

/// Evaluates a gate that only rearranges the values of its parents.
pub(crate) fn evaluate_simd(circ: &mut Circuits, id: GateId) -> Result<(), Error> {
    let gate = circ.gate(id);
    let parent_nvals: Vec<usize> = gate.parents().iter().map(|p| circ.gate(*p).nvals()).collect();
    let sources = gate.kind().sources(&parent_nvals, gate.nvals());
    let value = GateValue::gather(&circ.parent_values(id), &sources)?;
    finish_gate(circ, id, value);
    Ok(())
}

/// Stores the value of an evaluated gate and releases its parents.
pub(crate) fn finish_gate(circ: &mut Circuits, id: GateId, value: GateValue) {
    circ.set_value(id, value);
    circ.release_parents(id);
}

/// Copies `len` bits starting at `pos`.
pub(crate) fn bit_slice(v: &BitVector, pos: usize, len: usize) -> BitVector {
    let mut out = BitVector::new(len);
    v.get_bits(out.buffer_mut(), pos, len);
    out.clear_padding();
    out
}

/// Reads consecutive bit strings from a received message.
pub(crate) struct BitReader {
    bits: BitVector,
    pos: usize,
}

impl BitReader {
    pub(crate) fn new(received: &[u8]) -> Self {
        Self {
            bits: BitVector::attach(received.to_vec(), received.len() * 8),
            pos: 0,
        }
    }

    pub(crate) fn take(&mut self, len: usize) -> Result<BitVector, Error> {
        if self.pos + len > self.bits.len() {
            return Err(Error::violation(format!(
                "message too short: needed {} bits, got {}",
                self.pos + len,
                self.bits.len()
            )));
        }
        let out = bit_slice(&self.bits, self.pos, len);
        self.pos += len;
        Ok(out)
    }
}

/// Packs one bit per value into `ceil(n / 8)` bytes.
pub(crate) fn pack_bits(bits: impl IntoIterator<Item = bool>) -> Vec<u8> {
    let v: BitVector = bits.into_iter().collect();
    v.as_bytes().to_vec()
}

/// Unpacks `n` bits packed by [`pack_bits`].
pub(crate) fn unpack_bits(reader: &mut ByteReader<'_>, n: usize) -> Result<BitVector, Error> {
    let bytes = reader.take(n.div_ceil(8))?;
    Ok(BitVector::attach(bytes.to_vec(), n))
}

/// The plaintext bits (least significant first) of a Boolean value.
pub(crate) fn bits_to_words(v: &BitVector) -> Vec<u64> {
    v.iter().map(u64::from).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bit_reader() {
        let mut r = BitReader::new(&[0b1011_0110, 0b1]);
        assert_eq!(
            [false, true, true].into_iter().collect::<BitVector>(),
            r.take(3).unwrap()
        );
        assert_eq!(
            [false, true, true, false, true, true].into_iter().collect::<BitVector>(),
            r.take(6).unwrap()
        );
        assert!(r.take(8).is_err());
    }

    #[test]
    fn test_pack_bits() {
        let bytes = pack_bits([true, false, false, true, true, false, false, false, true]);
        assert_eq!(vec![0b1_1001, 1], bytes);
        let mut r = ByteReader::new(&bytes);
        let v = unpack_bits(&mut r, 9).unwrap();
        assert_eq!(vec![1, 0, 0, 1, 1, 0, 0, 0, 1], bits_to_words(&v));
    }
}
