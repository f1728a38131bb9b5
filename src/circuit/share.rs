//! Shares: views on the wires carrying one secret value.
use crate::{
    circuit::{Circuits, GateId, GateValue},
    error::Error,
};

/// How the wires of a share encode a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShareKind {
    /// One wire per bit, least significant bit first (Boolean and Yao sharing).
    Bool,
    /// One wire per value (arithmetic sharing).
    Arith,
}

/// An ordered list of wires of a [`Circuits`] arena.
///
/// A share does not own its gates and is only meaningful for the arena that
/// created it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Share {
    wires: Vec<GateId>,
    kind: ShareKind,
    bitlen: usize,
}

impl Share {
    pub(crate) fn new(wires: Vec<GateId>, kind: ShareKind, bitlen: usize) -> Self {
        Self { wires, kind, bitlen }
    }

    /// Creates a Boolean share from wires, e.g. to regroup the bits of other shares.
    pub fn from_wires(wires: Vec<GateId>) -> Self {
        let bitlen = wires.len();
        Self::new(wires, ShareKind::Bool, bitlen)
    }

    /// The wires of this share.
    pub fn wires(&self) -> &[GateId] {
        &self.wires
    }

    /// The encoding of this share.
    pub fn kind(&self) -> ShareKind {
        self.kind
    }

    /// Bit length of the shared value.
    pub fn bitlen(&self) -> usize {
        self.bitlen
    }

    /// Number of SIMD values carried by the first wire.
    pub fn nvals(&self, circuits: &Circuits) -> usize {
        self.wires
            .first()
            .and_then(|w| circuits.try_gate(*w).ok())
            .map_or(0, |g| g.nvals())
    }

    /// The first revealed value of an output share.
    pub fn clear_value(&self, circuits: &Circuits) -> Result<u64, Error> {
        self.clear_values(circuits)?
            .first()
            .copied()
            .ok_or_else(|| Error::violation("share without values"))
    }

    /// All revealed SIMD values of an output share.
    ///
    /// Fails if the circuit was not evaluated or the output was not revealed
    /// to this party.
    pub fn clear_values(&self, circuits: &Circuits) -> Result<Vec<u64>, Error> {
        let mut wires = Vec::with_capacity(self.wires.len());
        for w in &self.wires {
            match circuits.try_gate(*w)?.value() {
                GateValue::Clear(v) if !v.is_empty() => wires.push(v.as_slice()),
                GateValue::Clear(_) => {
                    return Err(Error::violation(format!(
                        "output {w} is not revealed to the {}",
                        circuits.role()
                    )));
                }
                _ => return Err(Error::violation(format!("gate {w} is not an evaluated output"))),
            }
        }
        match self.kind {
            ShareKind::Arith => Ok(wires.concat()),
            ShareKind::Bool => {
                if wires.len() > 64 {
                    return Err(Error::violation(format!(
                        "{} bits do not fit into an integer",
                        wires.len()
                    )));
                }
                let nvals = wires.first().map_or(0, |w| w.len());
                Ok((0..nvals)
                    .map(|k| {
                        wires
                            .iter()
                            .enumerate()
                            .fold(0, |acc, (i, bits)| acc | ((bits.get(k).copied().unwrap_or(0) & 1) << i))
                    })
                    .collect())
            }
        }
    }
}
