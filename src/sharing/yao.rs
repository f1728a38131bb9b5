//! Pieces shared by the garbler and the evaluator.
//!
//! Wire keys are 128-bit [`Block`]s with free XOR: the server holds the zero
//! key `W0` of every wire and the offset `R` (with `lsb(R) = 1`), the client
//! holds the active key `W0 ^ v * R`. AND gates are garbled with half gates,
//! two ciphertexts per value.
use crate::{
    bitvec::BitVector,
    block::Block,
    circuit::{Circuits, Context, GateId, GateKind, Role},
    crypto::FIXED_KEY_HASH,
    error::Error,
};

/// `H(x, tweak)`: the tweakable circular correlation robust hash.
pub(crate) fn hash(x: Block, tweak: u64) -> Block {
    FIXED_KEY_HASH.tccr_hash_block(Block::from(tweak), x)
}

/// The Yao gates in garbling order: every layer's local gates, then its
/// interactive gates.
pub(crate) fn gates_in_order(circ: &Circuits) -> Vec<GateId> {
    let queues = circ.queues(Context::Yao);
    (0..queues.num_layers())
        .flat_map(|d| queues.local(d).iter().chain(queues.interactive(d)).copied())
        .collect()
}

/// Number of values whose key is transferred by random OT: client inputs,
/// B2Y conversions and the client's bits of A2Y conversions.
pub(crate) fn num_ot_values(circ: &Circuits) -> usize {
    let queues = circ.queues(Context::Yao);
    (0..queues.num_layers())
        .flat_map(|d| queues.interactive(d))
        .map(|id| circ.gate(*id))
        .filter(|g| g.rounds() == 2)
        .map(|g| g.nvals())
        .sum()
}

/// Number of output bits the client decodes with the garbler's decode bits.
pub(crate) fn num_client_output_bits(circ: &Circuits) -> usize {
    circ.gates()
        .iter()
        .filter(|g| g.context() == Context::Yao)
        .filter(|g| matches!(g.kind(), GateKind::Output { dst } if dst.includes(Role::Client)))
        .map(|g| g.nvals())
        .sum()
}

/// The bits this party feeds into an input or conversion gate: the plaintext
/// of its own input, its Boolean share for B2Y, or bit `pos / 2` of its
/// arithmetic share for A2Y.
pub(crate) fn own_bits(circ: &Circuits, id: GateId) -> Result<BitVector, Error> {
    let gate = circ.gate(id);
    match gate.kind() {
        GateKind::Input {
            plaintext: Some(values),
            ..
        } => Ok(values.iter().map(|v| v & 1 == 1).collect()),
        GateKind::Input { plaintext: None, .. } => Err(Error::violation(format!("input {id} has no value"))),
        GateKind::Conversion { pos } => {
            let parent = circ.gate(gate.parents()[0]);
            match parent.context() {
                Context::Bool => Ok(parent.bool_value()?.clone()),
                Context::Arith => Ok(parent
                    .arith_value()?
                    .iter()
                    .map(|v| (v >> (pos / 2)) & 1 == 1)
                    .collect()),
                Context::Yao => Err(Error::violation(format!("conversion {id} from Yao into Yao"))),
            }
        }
        kind => Err(Error::violation(format!("{} gate {id} has no input bits", kind.name()))),
    }
}

/// The 128-bit OT message `i` of a random OT output.
pub(crate) fn block_at(buf: &BitVector, i: usize) -> Block {
    Block::from_prefix(&buf.as_bytes()[i * Block::BYTES..])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit::Circuit;

    #[test]
    fn test_hash_depends_on_tweak() {
        let x = Block::from(42_u128);
        assert_ne!(hash(x, 0), hash(x, 1));
        assert_eq!(hash(x, 7), hash(x, 7));
    }

    #[test]
    fn test_ot_values_and_garbling_order() {
        let mut c = Circuits::new(Role::Server, 8);
        let mut y = c.yao();
        let a = y.put_in_gate(3, 4, Role::Server).unwrap();
        let b = y.put_in_gate(5, 4, Role::Client).unwrap();
        y.put_and_gate(&a, &b).unwrap();
        let bits = c.boolean().put_in_gate(1, 2, Role::Client).unwrap();
        c.yao().put_b2y_gate(&bits).unwrap();
        assert_eq!(4 + 2, num_ot_values(&c));
        let order = gates_in_order(&c);
        assert_eq!(4 + 4 + 4 + 2, order.len());
        for (i, id) in order.iter().enumerate() {
            for p in c.gate(*id).parents() {
                if c.gate(*p).context() == Context::Yao {
                    assert!(order[..i].contains(p));
                }
            }
        }
    }
}
