//! Gates of the circuit arena.
use std::fmt;

use crate::{
    bitvec::BitVector,
    block::Block,
    circuit::{Context, Recipients, Role},
    error::Error,
};

/// Index of a gate in the arena of a [`Circuits`](crate::circuit::Circuits) instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GateId(pub(crate) usize);

impl GateId {
    /// The position of the gate in the arena.
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for GateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// What a gate computes.
///
/// The meaning of `Linear` and `NonLinear` depends on the sharing: XOR/AND in
/// Boolean and Yao sharing, ADD/MUL in arithmetic sharing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateKind {
    /// XOR or ADD of two parents.
    Linear,
    /// AND or MUL of two parents.
    NonLinear,
    /// Multiplication with a public constant (arithmetic sharing).
    MulConst {
        /// The constant factor.
        constant: u64,
    },
    /// A private input of `owner`. Only the owner knows the plaintext.
    Input {
        /// The party providing the input.
        owner: Role,
        /// The plaintext, one entry per SIMD value; `None` at the other party.
        plaintext: Option<Vec<u64>>,
    },
    /// Reveals the parent to `dst`.
    Output {
        /// Who learns the value.
        dst: Recipients,
    },
    /// Copies this party's share of the parent out of the circuit.
    SharedOutput,
    /// Bitwise inversion or arithmetic negation.
    Inv,
    /// A public constant, one entry per SIMD value.
    Constant {
        /// The values.
        values: Vec<u64>,
    },
    /// Conversion from the sharing of the parents into the sharing of this gate.
    ///
    /// For A2Y, `pos = 2i` is the server's and `pos = 2i + 1` the client's bit `i`
    /// of the arithmetic share.
    Conversion {
        /// Which part of the parent is converted.
        pos: usize,
    },
    /// Concatenates the values of all parents.
    Combine,
    /// Takes value `pos` of the parent.
    Split {
        /// Index of the value.
        pos: usize,
    },
    /// Repeats the single value of the parent.
    Repeat,
    /// Reorders the values of the parent; `positions` is a permutation.
    Permute {
        /// Source index of every output value.
        positions: Vec<usize>,
    },
    /// Selects arbitrary values of the parent.
    Subset {
        /// Source index of every output value.
        positions: Vec<usize>,
    },
    /// Takes value `pos` of every parent.
    CombineAtPos {
        /// Index of the value in each parent.
        pos: usize,
    },
    /// Output `k` is value `start + (k / n) * incr` of parent `k % n` for `n` parents.
    StructCombine {
        /// Position of the first value.
        start: usize,
        /// Distance between values taken from the same parent.
        incr: usize,
    },
}

impl GateKind {
    /// Short name for logs and error messages.
    pub fn name(&self) -> &'static str {
        match self {
            GateKind::Linear => "linear",
            GateKind::NonLinear => "non-linear",
            GateKind::MulConst { .. } => "mulconst",
            GateKind::Input { .. } => "input",
            GateKind::Output { .. } => "output",
            GateKind::SharedOutput => "shared output",
            GateKind::Inv => "inv",
            GateKind::Constant { .. } => "constant",
            GateKind::Conversion { .. } => "conversion",
            GateKind::Combine => "combine",
            GateKind::Split { .. } => "split",
            GateKind::Repeat => "repeat",
            GateKind::Permute { .. } => "permute",
            GateKind::Subset { .. } => "subset",
            GateKind::CombineAtPos { .. } => "combine-at-pos",
            GateKind::StructCombine { .. } => "struct-combine",
        }
    }

    /// Whether the gate reveals a value and ends the circuit.
    pub fn is_output(&self) -> bool {
        matches!(self, GateKind::Output { .. } | GateKind::SharedOutput)
    }

    /// Whether the gate only rearranges the SIMD values of its parents.
    pub fn is_simd(&self) -> bool {
        matches!(
            self,
            GateKind::Combine
                | GateKind::Split { .. }
                | GateKind::Repeat
                | GateKind::Permute { .. }
                | GateKind::Subset { .. }
                | GateKind::CombineAtPos { .. }
                | GateKind::StructCombine { .. }
        )
    }

    /// Whether evaluating the gate needs a communication round in `context`.
    pub fn is_interactive(&self, context: Context) -> bool {
        match self {
            GateKind::Input { .. } | GateKind::Output { .. } | GateKind::Conversion { .. } => true,
            GateKind::NonLinear => context != Context::Yao,
            _ => false,
        }
    }

    /// For every output value, the `(parent, value)` it is copied from.
    pub(crate) fn sources(&self, parent_nvals: &[usize], nvals: usize) -> Vec<(usize, usize)> {
        match self {
            GateKind::Combine => parent_nvals
                .iter()
                .enumerate()
                .flat_map(|(p, &n)| (0..n).map(move |k| (p, k)))
                .collect(),
            GateKind::Split { pos } => vec![(0, *pos)],
            GateKind::Repeat => vec![(0, 0); nvals],
            GateKind::Permute { positions } | GateKind::Subset { positions } => {
                positions.iter().map(|&k| (0, k)).collect()
            }
            GateKind::CombineAtPos { pos } => (0..parent_nvals.len()).map(|p| (p, *pos)).collect(),
            GateKind::StructCombine { start, incr } => {
                let n = parent_nvals.len();
                (0..nvals).map(|k| (k % n, start + (k / n) * incr)).collect()
            }
            _ => vec![],
        }
    }
}

/// The evaluated content of a wire.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum GateValue {
    /// Not evaluated yet, or already released.
    #[default]
    Empty,
    /// XOR shares of one bit per SIMD value.
    Bool(BitVector),
    /// One wire key per SIMD value: the zero key at the server, the active key at the client.
    Yao(Vec<Block>),
    /// Additive shares modulo `2^l`.
    Arith(Vec<u64>),
    /// Plaintext of an output gate; empty if the output was not meant for this party.
    Clear(Vec<u64>),
}

impl GateValue {
    /// Copies the selected values of `parents` into a new value of the same kind.
    pub(crate) fn gather(parents: &[&GateValue], sources: &[(usize, usize)]) -> Result<GateValue, Error> {
        let out_of_range = |p: usize, k: usize| {
            Error::violation(format!("SIMD gate reads value {k} of parent {p} which does not exist"))
        };
        match parents.first() {
            Some(GateValue::Bool(_)) => {
                let mut out = BitVector::new(sources.len());
                for (i, &(p, k)) in sources.iter().enumerate() {
                    let GateValue::Bool(v) = parents[p] else {
                        return Err(Error::violation("SIMD gate mixes value kinds"));
                    };
                    if k >= v.len() {
                        return Err(out_of_range(p, k));
                    }
                    out.set_bit(i, v.get_bit(k));
                }
                Ok(GateValue::Bool(out))
            }
            Some(GateValue::Yao(_)) => sources
                .iter()
                .map(|&(p, k)| match parents[p] {
                    GateValue::Yao(v) => v.get(k).copied().ok_or_else(|| out_of_range(p, k)),
                    _ => Err(Error::violation("SIMD gate mixes value kinds")),
                })
                .collect::<Result<_, _>>()
                .map(GateValue::Yao),
            Some(GateValue::Arith(_)) => sources
                .iter()
                .map(|&(p, k)| match parents[p] {
                    GateValue::Arith(v) => v.get(k).copied().ok_or_else(|| out_of_range(p, k)),
                    _ => Err(Error::violation("SIMD gate mixes value kinds")),
                })
                .collect::<Result<_, _>>()
                .map(GateValue::Arith),
            _ => Err(Error::violation("SIMD gate on an unevaluated parent")),
        }
    }
}

/// A node of the circuit.
#[derive(Debug, Clone)]
pub struct Gate {
    pub(crate) kind: GateKind,
    pub(crate) context: Context,
    pub(crate) parents: Vec<GateId>,
    pub(crate) depth: usize,
    pub(crate) rounds: usize,
    pub(crate) nvals: usize,
    pub(crate) bitlen: usize,
    pub(crate) nused: usize,
    pub(crate) value: GateValue,
}

impl Gate {
    /// What the gate computes.
    pub fn kind(&self) -> &GateKind {
        &self.kind
    }

    /// The sharing the gate is evaluated in.
    pub fn context(&self) -> Context {
        self.context
    }

    /// The gates this gate reads from.
    pub fn parents(&self) -> &[GateId] {
        &self.parents
    }

    /// The layer in which the gate is evaluated.
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Communication rounds the gate needs: 0 for local gates, 2 for gates
    /// whose result depends on an answer to the first message.
    pub fn rounds(&self) -> usize {
        self.rounds
    }

    /// Number of SIMD values on the wire.
    pub fn nvals(&self) -> usize {
        self.nvals
    }

    /// Bit length of every value (1 for Boolean and Yao sharing).
    pub fn bitlen(&self) -> usize {
        self.bitlen
    }

    /// The current content of the wire.
    pub fn value(&self) -> &GateValue {
        &self.value
    }

    /// Number of layers between this gate and its earliest child.
    pub(crate) fn layers(&self) -> usize {
        self.rounds.max(1)
    }

    pub(crate) fn bool_value(&self) -> Result<&BitVector, Error> {
        match &self.value {
            GateValue::Bool(v) => Ok(v),
            other => Err(self.missing("Boolean", other)),
        }
    }

    pub(crate) fn yao_value(&self) -> Result<&[Block], Error> {
        match &self.value {
            GateValue::Yao(v) => Ok(v),
            other => Err(self.missing("Yao", other)),
        }
    }

    pub(crate) fn arith_value(&self) -> Result<&[u64], Error> {
        match &self.value {
            GateValue::Arith(v) => Ok(v),
            other => Err(self.missing("arithmetic", other)),
        }
    }

    fn missing(&self, expected: &str, found: &GateValue) -> Error {
        Error::violation(format!(
            "{} gate at depth {} has no {expected} value ({found:?})",
            self.kind.name(),
            self.depth
        ))
    }
}
