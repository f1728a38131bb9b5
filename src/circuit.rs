//! Building circuits that mix Boolean, Yao and arithmetic sharing.
//!
//! All gates of a party live in one arena, [`Circuits`]. Gates are created
//! through the builders returned by [`Circuits::boolean`], [`Circuits::yao`]
//! and [`Circuits::arithmetic`], which all implement the [`Circuit`] trait and
//! hand out [`Share`]s: lists of gate ids, never the gates themselves.
//!
//! Both parties have to build exactly the same circuit. Input values are only
//! used by the party owning the input, the other party may pass anything (or
//! use [`Circuit::put_dummy_in_gate`]).
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::Error;

mod arena;
mod arithmetic;
mod boolean;
pub mod bristol;
mod gate;
mod share;

pub use arena::{CircuitQueues, Circuits};
pub use arithmetic::ArithmeticCircuit;
pub use boolean::BooleanCircuit;
pub use gate::{Gate, GateId, GateKind, GateValue};
pub use share::{Share, ShareKind};

/// One of the two parties.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    /// The party that garbles Yao circuits and listens for the connection.
    Server,
    /// The party that evaluates Yao circuits and connects to the server.
    Client,
}

impl Role {
    /// The other party.
    pub fn other(self) -> Role {
        match self {
            Role::Server => Role::Client,
            Role::Client => Role::Server,
        }
    }

    pub(crate) fn index(self) -> usize {
        match self {
            Role::Server => 0,
            Role::Client => 1,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Server => f.write_str("server"),
            Role::Client => f.write_str("client"),
        }
    }
}

/// Who learns the value of an output gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Recipients {
    /// Only the server.
    Server,
    /// Only the client.
    Client,
    /// Both parties.
    All,
}

impl Recipients {
    /// Whether `role` learns the output.
    pub fn includes(self, role: Role) -> bool {
        match self {
            Recipients::Server => role == Role::Server,
            Recipients::Client => role == Role::Client,
            Recipients::All => true,
        }
    }
}

/// The sharing a gate is evaluated in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Context {
    /// GMW with XOR shares.
    Bool,
    /// Garbled circuits.
    Yao,
    /// Additive shares modulo `2^l`.
    Arith,
}

impl Context {
    /// All sharings in the order they are evaluated in every layer.
    pub const ALL: [Context; 3] = [Context::Bool, Context::Yao, Context::Arith];

    pub(crate) fn index(self) -> usize {
        match self {
            Context::Bool => 0,
            Context::Yao => 1,
            Context::Arith => 2,
        }
    }
}

impl fmt::Display for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Context::Bool => f.write_str("Boolean"),
            Context::Yao => f.write_str("Yao"),
            Context::Arith => f.write_str("arithmetic"),
        }
    }
}

/// The gate-building interface shared by all sharings.
///
/// Operations a sharing cannot evaluate return
/// [`Error::UnsupportedOperation`]. Binary operations on shares of different
/// widths return [`Error::ProtocolViolation`].
pub trait Circuit {
    /// The sharing of the gates created by this builder.
    fn context(&self) -> Context;

    /// The arena the gates are added to.
    fn circuits(&mut self) -> &mut Circuits;

    /// A `bitlen`-bit input with one SIMD value per entry of `values`.
    fn put_simd_in_gate(&mut self, values: &[u64], bitlen: usize, owner: Role) -> Result<Share, Error>;

    /// A `bitlen`-bit input of `owner`.
    fn put_in_gate(&mut self, value: u64, bitlen: usize, owner: Role) -> Result<Share, Error> {
        self.put_simd_in_gate(&[value], bitlen, owner)
    }

    /// The other party's view of an input of `owner` with `nvals` values.
    fn put_dummy_in_gate(&mut self, nvals: usize, bitlen: usize, owner: Role) -> Result<Share, Error>;

    /// A public `bitlen`-bit constant with one SIMD value per entry of `values`.
    fn put_simd_cons_gate(&mut self, values: &[u64], bitlen: usize) -> Result<Share, Error>;

    /// A public `bitlen`-bit constant.
    fn put_cons_gate(&mut self, value: u64, bitlen: usize) -> Result<Share, Error> {
        self.put_simd_cons_gate(&[value], bitlen)
    }

    /// Reveals `s` to `dst`.
    fn put_out_gate(&mut self, s: &Share, dst: Recipients) -> Result<Share, Error> {
        self.map_wires(s, &GateKind::Output { dst })
    }

    /// Reveals this party's share of `s` to this party only.
    fn put_shared_out_gate(&mut self, s: &Share) -> Result<Share, Error> {
        self.map_wires(s, &GateKind::SharedOutput)
    }

    /// Bitwise inversion (Boolean/Yao) or negation (arithmetic).
    fn put_inv_gate(&mut self, s: &Share) -> Result<Share, Error> {
        self.map_wires(s, &GateKind::Inv)
    }

    /// Addition modulo `2^bitlen`.
    fn put_add_gate(&mut self, a: &Share, b: &Share) -> Result<Share, Error>;

    /// Subtraction modulo `2^bitlen`.
    fn put_sub_gate(&mut self, a: &Share, b: &Share) -> Result<Share, Error>;

    /// Multiplication modulo `2^bitlen`.
    fn put_mul_gate(&mut self, a: &Share, b: &Share) -> Result<Share, Error>;

    /// Bitwise XOR.
    fn put_xor_gate(&mut self, _a: &Share, _b: &Share) -> Result<Share, Error> {
        Err(Error::unsupported("XOR", self.context()))
    }

    /// Bitwise AND.
    fn put_and_gate(&mut self, _a: &Share, _b: &Share) -> Result<Share, Error> {
        Err(Error::unsupported("AND", self.context()))
    }

    /// Bitwise OR.
    fn put_or_gate(&mut self, _a: &Share, _b: &Share) -> Result<Share, Error> {
        Err(Error::unsupported("OR", self.context()))
    }

    /// One bit: `a > b` as unsigned integers.
    fn put_gt_gate(&mut self, _a: &Share, _b: &Share) -> Result<Share, Error> {
        Err(Error::unsupported("GT", self.context()))
    }

    /// One bit: `a == b`.
    fn put_eq_gate(&mut self, _a: &Share, _b: &Share) -> Result<Share, Error> {
        Err(Error::unsupported("EQ", self.context()))
    }

    /// `sel ? a : b` with a one-bit selector.
    fn put_mux_gate(&mut self, _a: &Share, _b: &Share, _sel: &Share) -> Result<Share, Error> {
        Err(Error::unsupported("MUX", self.context()))
    }

    /// Converts a Boolean share into this (Yao) sharing.
    fn put_b2y_gate(&mut self, _s: &Share) -> Result<Share, Error> {
        Err(Error::unsupported("B2Y", self.context()))
    }

    /// Converts a Yao share into this (Boolean) sharing.
    fn put_y2b_gate(&mut self, _s: &Share) -> Result<Share, Error> {
        Err(Error::unsupported("Y2B", self.context()))
    }

    /// Converts an arithmetic share into this (Yao) sharing.
    fn put_a2y_gate(&mut self, _s: &Share) -> Result<Share, Error> {
        Err(Error::unsupported("A2Y", self.context()))
    }

    /// Converts a Boolean share into this (arithmetic) sharing.
    fn put_b2a_gate(&mut self, _s: &Share) -> Result<Share, Error> {
        Err(Error::unsupported("B2A", self.context()))
    }

    /// Converts a Yao share into this (arithmetic) sharing via Boolean sharing.
    fn put_y2a_gate(&mut self, _s: &Share) -> Result<Share, Error> {
        Err(Error::unsupported("Y2A", self.context()))
    }

    /// Converts an arithmetic share into this (Boolean) sharing via Yao sharing.
    fn put_a2b_gate(&mut self, _s: &Share) -> Result<Share, Error> {
        Err(Error::unsupported("A2B", self.context()))
    }

    /// Combines the values of all wires of `s` into a single wire.
    fn put_combiner_gate(&mut self, s: &Share) -> Result<Share, Error> {
        let id = self.add(GateKind::Combine, s.wires().to_vec(), 0)?;
        Ok(self.share(vec![id]))
    }

    /// Splits every value of the single wire of `s` into its own wire.
    fn put_splitter_gate(&mut self, s: &Share) -> Result<Share, Error> {
        let [wire] = s.wires() else {
            return Err(Error::violation("splitter gates take a single wire"));
        };
        let nvals = self.circuits().gate(*wire).nvals();
        let wires = (0..nvals)
            .map(|pos| self.add(GateKind::Split { pos }, vec![*wire], 0))
            .collect::<Result<_, _>>()?;
        Ok(self.share(wires))
    }

    /// Repeats the single value of every wire `nvals` times.
    fn put_repeater_gate(&mut self, s: &Share, nvals: usize) -> Result<Share, Error> {
        let wires = s
            .wires()
            .iter()
            .map(|w| self.add(GateKind::Repeat, vec![*w], nvals))
            .collect::<Result<_, _>>()?;
        Ok(self.share(wires))
    }

    /// Selects the values at `positions` of every wire.
    fn put_subset_gate(&mut self, s: &Share, positions: &[usize]) -> Result<Share, Error> {
        self.map_wires(s, &GateKind::Subset {
            positions: positions.to_vec(),
        })
    }

    /// Reorders the values of every wire; `positions` must be a permutation.
    fn put_permutation_gate(&mut self, s: &Share, positions: &[usize]) -> Result<Share, Error> {
        self.map_wires(s, &GateKind::Permute {
            positions: positions.to_vec(),
        })
    }

    /// A single wire holding value `pos` of every wire of `s`.
    fn put_combine_at_pos_gate(&mut self, s: &Share, pos: usize) -> Result<Share, Error> {
        let id = self.add(GateKind::CombineAtPos { pos }, s.wires().to_vec(), 0)?;
        Ok(self.share(vec![id]))
    }

    /// A single wire of `nvals` values taken round-robin from the wires of `s`,
    /// starting at value `start` and advancing by `incr` per round.
    fn put_struct_combiner_gate(
        &mut self,
        s: &Share,
        start: usize,
        incr: usize,
        nvals: usize,
    ) -> Result<Share, Error> {
        let id = self.add(GateKind::StructCombine { start, incr }, s.wires().to_vec(), nvals)?;
        Ok(self.share(vec![id]))
    }

    /// Adds one gate of this builder's sharing.
    #[doc(hidden)]
    fn add(&mut self, kind: GateKind, parents: Vec<GateId>, nvals: usize) -> Result<GateId, Error> {
        let context = self.context();
        self.circuits().add_gate(context, kind, parents, nvals)
    }

    /// Wraps wires of this builder's sharing into a share.
    #[doc(hidden)]
    fn share(&mut self, wires: Vec<GateId>) -> Share {
        match self.context() {
            Context::Arith => {
                let bitlen = self.circuits().arith_bitlen();
                Share::new(wires, ShareKind::Arith, bitlen)
            }
            Context::Bool | Context::Yao => {
                let bitlen = wires.len();
                Share::new(wires, ShareKind::Bool, bitlen)
            }
        }
    }

    /// Applies a unary gate to every wire of `s`.
    #[doc(hidden)]
    fn map_wires(&mut self, s: &Share, kind: &GateKind) -> Result<Share, Error> {
        let wires = s
            .wires()
            .iter()
            .map(|w| self.add(kind.clone(), vec![*w], 0))
            .collect::<Result<_, _>>()?;
        Ok(self.share(wires))
    }
}
