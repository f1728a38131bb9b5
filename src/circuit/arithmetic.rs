//! Builder for arithmetic circuits over `Z_{2^l}`.
use crate::{
    circuit::{BooleanCircuit, Circuit, Circuits, Context, GateKind, Role, Share, ShareKind},
    error::Error,
};

/// Gate builder for the arithmetic sharing.
///
/// Every share has exactly one wire per value; SIMD values live on the same
/// wire. All operations are modulo `2^l` where `l` is
/// [`Circuits::arith_bitlen`].
#[derive(Debug)]
pub struct ArithmeticCircuit<'a> {
    circ: &'a mut Circuits,
}

impl<'a> ArithmeticCircuit<'a> {
    pub(crate) fn new(circ: &'a mut Circuits) -> Self {
        Self { circ }
    }

    fn mask(&self) -> u64 {
        match self.circ.arith_bitlen() {
            64 => u64::MAX,
            l => (1 << l) - 1,
        }
    }

    fn check_bitlen(&self, bitlen: usize) -> Result<(), Error> {
        let l = self.circ.arith_bitlen();
        if (1..=l).contains(&bitlen) {
            Ok(())
        } else {
            Err(Error::violation(format!("{bitlen}-bit value in {l}-bit arithmetic sharing")))
        }
    }

    fn binary(&mut self, kind: GateKind, a: &Share, b: &Share) -> Result<Share, Error> {
        let ([x], [y]) = (a.wires(), b.wires()) else {
            return Err(Error::violation(format!(
                "arithmetic {} on shares with {} and {} wires",
                kind.name(),
                a.wires().len(),
                b.wires().len()
            )));
        };
        let id = self.add(kind, vec![*x, *y], 0)?;
        Ok(self.share(vec![id]))
    }

    /// Multiplication with a public constant, without communication.
    pub fn put_mul_const_gate(&mut self, s: &Share, constant: u64) -> Result<Share, Error> {
        let constant = constant & self.mask();
        self.map_wires(s, &GateKind::MulConst { constant })
    }
}

impl Circuit for ArithmeticCircuit<'_> {
    fn context(&self) -> Context {
        Context::Arith
    }

    fn circuits(&mut self) -> &mut Circuits {
        self.circ
    }

    fn put_simd_in_gate(&mut self, values: &[u64], bitlen: usize, owner: Role) -> Result<Share, Error> {
        self.check_bitlen(bitlen)?;
        let mask = self.mask();
        let plaintext = (self.circ.role() == owner).then(|| values.iter().map(|v| v & mask).collect());
        let id = self.add(GateKind::Input { owner, plaintext }, vec![], values.len())?;
        Ok(self.share(vec![id]))
    }

    fn put_dummy_in_gate(&mut self, nvals: usize, bitlen: usize, owner: Role) -> Result<Share, Error> {
        self.check_bitlen(bitlen)?;
        let id = self.add(GateKind::Input { owner, plaintext: None }, vec![], nvals)?;
        Ok(self.share(vec![id]))
    }

    fn put_simd_cons_gate(&mut self, values: &[u64], bitlen: usize) -> Result<Share, Error> {
        self.check_bitlen(bitlen)?;
        let mask = self.mask();
        let values = values.iter().map(|v| v & mask).collect();
        let id = self.add(GateKind::Constant { values }, vec![], 0)?;
        Ok(self.share(vec![id]))
    }

    fn put_add_gate(&mut self, a: &Share, b: &Share) -> Result<Share, Error> {
        self.binary(GateKind::Linear, a, b)
    }

    fn put_sub_gate(&mut self, a: &Share, b: &Share) -> Result<Share, Error> {
        let neg = self.put_inv_gate(b)?;
        self.binary(GateKind::Linear, a, &neg)
    }

    fn put_mul_gate(&mut self, a: &Share, b: &Share) -> Result<Share, Error> {
        self.binary(GateKind::NonLinear, a, b)
    }

    /// Interprets the Boolean wires of `s` (least significant bit first) as
    /// an unsigned integer.
    fn put_b2a_gate(&mut self, s: &Share) -> Result<Share, Error> {
        if s.kind() != ShareKind::Bool || s.wires().is_empty() {
            return Err(Error::violation("B2A takes a non-empty Boolean share"));
        }
        // every bit is shifted into a u64 share
        if s.wires().len() > u64::BITS as usize {
            return Err(Error::violation(format!("B2A of {} bits exceeds 64 bits", s.wires().len())));
        }
        let id = self.add(GateKind::Conversion { pos: 0 }, s.wires().to_vec(), 0)?;
        Ok(self.share(vec![id]))
    }

    fn put_y2a_gate(&mut self, s: &Share) -> Result<Share, Error> {
        let bits = BooleanCircuit::new(&mut *self.circ, Context::Bool).put_y2b_gate(s)?;
        self.put_b2a_gate(&bits)
    }
}
