//! Builder for Boolean and Yao circuits, including the standard composite
//! circuits (adders, comparators, multiplexers).
use crate::{
    circuit::{Circuit, Circuits, Context, GateId, GateKind, Role, Share, ShareKind},
    error::Error,
};

/// Gate builder for the Boolean (GMW) or the Yao sharing.
///
/// Integers are encoded least significant bit first; all arithmetic is
/// modulo `2^n` for `n`-bit shares.
#[derive(Debug)]
pub struct BooleanCircuit<'a> {
    circ: &'a mut Circuits,
    context: Context,
}

impl<'a> BooleanCircuit<'a> {
    pub(crate) fn new(circ: &'a mut Circuits, context: Context) -> Self {
        debug_assert_ne!(context, Context::Arith);
        Self { circ, context }
    }

    fn gate(&mut self, kind: GateKind, parents: Vec<GateId>) -> Result<GateId, Error> {
        self.circ.add_gate(self.context, kind, parents, 0)
    }

    fn xor(&mut self, a: GateId, b: GateId) -> Result<GateId, Error> {
        self.gate(GateKind::Linear, vec![a, b])
    }

    fn and(&mut self, a: GateId, b: GateId) -> Result<GateId, Error> {
        self.gate(GateKind::NonLinear, vec![a, b])
    }

    fn inv(&mut self, a: GateId) -> Result<GateId, Error> {
        self.gate(GateKind::Inv, vec![a])
    }

    fn same_width(&self, op: &str, a: &Share, b: &Share) -> Result<(), Error> {
        if a.wires().len() == b.wires().len() && !a.wires().is_empty() {
            Ok(())
        } else {
            Err(Error::violation(format!(
                "{op} of shares with {} and {} bits",
                a.wires().len(),
                b.wires().len()
            )))
        }
    }

    fn bitwise(
        &mut self,
        a: &Share,
        b: &Share,
        op: fn(&mut Self, GateId, GateId) -> Result<GateId, Error>,
    ) -> Result<Vec<GateId>, Error> {
        a.wires()
            .iter()
            .zip(b.wires())
            .map(|(x, y)| op(self, *x, *y))
            .collect()
    }

    /// Full adder chain; the carry out of the top bit is dropped.
    ///
    /// `c' = c ^ ((a ^ c) & (b ^ c))` needs one AND per bit.
    fn ripple_add(&mut self, a: &[GateId], b: &[GateId]) -> Result<Vec<GateId>, Error> {
        let mut sum = Vec::with_capacity(a.len());
        let mut carry: Option<GateId> = None;
        for (i, (&x, &y)) in a.iter().zip(b).enumerate() {
            let last = i + 1 == a.len();
            match carry {
                None => {
                    sum.push(self.xor(x, y)?);
                    if !last {
                        carry = Some(self.and(x, y)?);
                    }
                }
                Some(c) => {
                    let xc = self.xor(x, c)?;
                    sum.push(self.xor(xc, y)?);
                    if !last {
                        let yc = self.xor(y, c)?;
                        let t = self.and(xc, yc)?;
                        carry = Some(self.xor(c, t)?);
                    }
                }
            }
        }
        Ok(sum)
    }

    /// Borrow chain computing `a - b`; the borrow is the majority of `!a`, `b`
    /// and the incoming borrow.
    fn ripple_sub(&mut self, a: &[GateId], b: &[GateId]) -> Result<Vec<GateId>, Error> {
        let mut diff = Vec::with_capacity(a.len());
        let mut borrow: Option<GateId> = None;
        for (i, (&x, &y)) in a.iter().zip(b).enumerate() {
            let last = i + 1 == a.len();
            let xy = self.xor(x, y)?;
            let nx = self.inv(x)?;
            match borrow {
                None => {
                    diff.push(xy);
                    if !last {
                        borrow = Some(self.and(nx, y)?);
                    }
                }
                Some(br) => {
                    diff.push(self.xor(xy, br)?);
                    if !last {
                        let xb = self.xor(nx, br)?;
                        let yb = self.xor(y, br)?;
                        let t = self.and(xb, yb)?;
                        borrow = Some(self.xor(br, t)?);
                    }
                }
            }
        }
        Ok(diff)
    }

    /// The carry of `a + !b`, which is set exactly if `a > b`.
    fn greater_than(&mut self, a: &[GateId], b: &[GateId]) -> Result<GateId, Error> {
        let nb0 = self.inv(b[0])?;
        let mut carry = self.and(a[0], nb0)?;
        for (&x, &y) in a.iter().zip(b).skip(1) {
            let ny = self.inv(y)?;
            let xc = self.xor(x, carry)?;
            let yc = self.xor(ny, carry)?;
            let t = self.and(xc, yc)?;
            carry = self.xor(carry, t)?;
        }
        Ok(carry)
    }

    /// AND of all wires as a balanced tree.
    fn and_tree(&mut self, mut wires: Vec<GateId>) -> Result<GateId, Error> {
        while wires.len() > 1 {
            let mut next = Vec::with_capacity(wires.len().div_ceil(2));
            for pair in wires.chunks(2) {
                match pair {
                    [x, y] => next.push(self.and(*x, *y)?),
                    [x] => next.push(*x),
                    _ => unreachable!("chunks of two"),
                }
            }
            wires = next;
        }
        wires
            .pop()
            .ok_or_else(|| Error::violation("comparison of empty shares"))
    }

    /// `a >= b` as one bit.
    pub fn put_ge_gate(&mut self, a: &Share, b: &Share) -> Result<Share, Error> {
        let gt = self.put_gt_gate(b, a)?;
        self.put_inv_gate(&gt)
    }
}

impl Circuit for BooleanCircuit<'_> {
    fn context(&self) -> Context {
        self.context
    }

    fn circuits(&mut self) -> &mut Circuits {
        self.circ
    }

    fn put_simd_in_gate(&mut self, values: &[u64], bitlen: usize, owner: Role) -> Result<Share, Error> {
        if !(1..=64).contains(&bitlen) {
            return Err(Error::violation(format!("{bitlen}-bit Boolean input")));
        }
        let known = self.circ.role() == owner;
        let wires = (0..bitlen)
            .map(|i| {
                let plaintext = known.then(|| values.iter().map(|v| (v >> i) & 1).collect());
                self.circ
                    .add_gate(self.context, GateKind::Input { owner, plaintext }, vec![], values.len())
            })
            .collect::<Result<_, _>>()?;
        Ok(self.share(wires))
    }

    fn put_dummy_in_gate(&mut self, nvals: usize, bitlen: usize, owner: Role) -> Result<Share, Error> {
        let wires = (0..bitlen)
            .map(|_| {
                self.circ.add_gate(
                    self.context,
                    GateKind::Input { owner, plaintext: None },
                    vec![],
                    nvals,
                )
            })
            .collect::<Result<_, _>>()?;
        Ok(self.share(wires))
    }

    fn put_simd_cons_gate(&mut self, values: &[u64], bitlen: usize) -> Result<Share, Error> {
        let wires = (0..bitlen)
            .map(|i| {
                let values = values.iter().map(|v| (v >> i) & 1).collect();
                self.gate(GateKind::Constant { values }, vec![])
            })
            .collect::<Result<_, _>>()?;
        Ok(self.share(wires))
    }

    fn put_shared_out_gate(&mut self, s: &Share) -> Result<Share, Error> {
        if self.context == Context::Yao {
            return Err(Error::unsupported("shared output", self.context));
        }
        self.map_wires(s, &GateKind::SharedOutput)
    }

    fn put_add_gate(&mut self, a: &Share, b: &Share) -> Result<Share, Error> {
        self.same_width("ADD", a, b)?;
        let sum = self.ripple_add(a.wires(), b.wires())?;
        Ok(self.share(sum))
    }

    fn put_sub_gate(&mut self, a: &Share, b: &Share) -> Result<Share, Error> {
        self.same_width("SUB", a, b)?;
        let diff = self.ripple_sub(a.wires(), b.wires())?;
        Ok(self.share(diff))
    }

    /// Shift-and-add multiplier keeping the low `n` bits.
    fn put_mul_gate(&mut self, a: &Share, b: &Share) -> Result<Share, Error> {
        self.same_width("MUL", a, b)?;
        let (a, b) = (a.wires(), b.wires());
        let n = a.len();
        let mut acc = a
            .iter()
            .map(|&x| self.and(x, b[0]))
            .collect::<Result<Vec<_>, _>>()?;
        for j in 1..n {
            let partial = a[..n - j]
                .iter()
                .map(|&x| self.and(x, b[j]))
                .collect::<Result<Vec<_>, _>>()?;
            let high = self.ripple_add(&acc[j..], &partial)?;
            acc.truncate(j);
            acc.extend(high);
        }
        Ok(self.share(acc))
    }

    fn put_xor_gate(&mut self, a: &Share, b: &Share) -> Result<Share, Error> {
        self.same_width("XOR", a, b)?;
        let wires = self.bitwise(a, b, Self::xor)?;
        Ok(self.share(wires))
    }

    fn put_and_gate(&mut self, a: &Share, b: &Share) -> Result<Share, Error> {
        self.same_width("AND", a, b)?;
        let wires = self.bitwise(a, b, Self::and)?;
        Ok(self.share(wires))
    }

    fn put_or_gate(&mut self, a: &Share, b: &Share) -> Result<Share, Error> {
        self.same_width("OR", a, b)?;
        let wires = self.bitwise(a, b, |c, x, y| {
            let xy = c.xor(x, y)?;
            let both = c.and(x, y)?;
            c.xor(xy, both)
        })?;
        Ok(self.share(wires))
    }

    fn put_gt_gate(&mut self, a: &Share, b: &Share) -> Result<Share, Error> {
        self.same_width("GT", a, b)?;
        let gt = self.greater_than(a.wires(), b.wires())?;
        Ok(self.share(vec![gt]))
    }

    fn put_eq_gate(&mut self, a: &Share, b: &Share) -> Result<Share, Error> {
        self.same_width("EQ", a, b)?;
        let same = self.bitwise(a, b, |c, x, y| {
            let diff = c.xor(x, y)?;
            c.inv(diff)
        })?;
        let eq = self.and_tree(same)?;
        Ok(self.share(vec![eq]))
    }

    fn put_mux_gate(&mut self, a: &Share, b: &Share, sel: &Share) -> Result<Share, Error> {
        self.same_width("MUX", a, b)?;
        let [s] = sel.wires() else {
            return Err(Error::violation("MUX selector must be a single bit"));
        };
        let wires = a
            .wires()
            .iter()
            .zip(b.wires())
            .map(|(&x, &y)| {
                let xy = self.xor(x, y)?;
                let t = self.and(*s, xy)?;
                self.xor(y, t)
            })
            .collect::<Result<_, _>>()?;
        Ok(self.share(wires))
    }

    fn put_b2y_gate(&mut self, s: &Share) -> Result<Share, Error> {
        if self.context != Context::Yao {
            return Err(Error::unsupported("B2Y", self.context));
        }
        self.map_wires(s, &GateKind::Conversion { pos: 0 })
    }

    fn put_y2b_gate(&mut self, s: &Share) -> Result<Share, Error> {
        if self.context != Context::Bool {
            return Err(Error::unsupported("Y2B", self.context));
        }
        self.map_wires(s, &GateKind::Conversion { pos: 0 })
    }

    /// Both parties feed their additive share bit by bit into a Yao adder.
    fn put_a2y_gate(&mut self, s: &Share) -> Result<Share, Error> {
        if self.context != Context::Yao {
            return Err(Error::unsupported("A2Y", self.context));
        }
        let ([wire], ShareKind::Arith) = (s.wires(), s.kind()) else {
            return Err(Error::violation("A2Y takes a single arithmetic wire"));
        };
        let l = self.circ.arith_bitlen();
        let mut server = Vec::with_capacity(l);
        let mut client = Vec::with_capacity(l);
        for i in 0..l {
            server.push(self.gate(GateKind::Conversion { pos: 2 * i }, vec![*wire])?);
            client.push(self.gate(GateKind::Conversion { pos: 2 * i + 1 }, vec![*wire])?);
        }
        let sum = self.ripple_add(&server, &client)?;
        Ok(self.share(sum))
    }

    fn put_a2b_gate(&mut self, s: &Share) -> Result<Share, Error> {
        if self.context != Context::Bool {
            return Err(Error::unsupported("A2B", self.context));
        }
        let yao = BooleanCircuit::new(&mut *self.circ, Context::Yao).put_a2y_gate(s)?;
        self.put_y2b_gate(&yao)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit::Recipients;

    #[test]
    fn test_width_mismatch_is_rejected() {
        let mut c = Circuits::new(Role::Server, 32);
        let mut b = c.boolean();
        let x = b.put_in_gate(1, 8, Role::Server).unwrap();
        let y = b.put_in_gate(1, 4, Role::Client).unwrap();
        assert!(matches!(b.put_add_gate(&x, &y), Err(Error::ProtocolViolation(_))));
        assert!(matches!(b.put_xor_gate(&x, &y), Err(Error::ProtocolViolation(_))));
    }

    #[test]
    fn test_composite_gate_counts() {
        let mut c = Circuits::new(Role::Client, 32);
        let mut b = c.boolean();
        let x = b.put_in_gate(0, 8, Role::Server).unwrap();
        let y = b.put_in_gate(0, 8, Role::Client).unwrap();
        b.put_gt_gate(&x, &y).unwrap();
        assert_eq!(8, c.queues(Context::Bool).num_non_linear());
        let mut b = c.boolean();
        b.put_add_gate(&x, &y).unwrap();
        assert_eq!(8 + 7, c.queues(Context::Bool).num_non_linear());
    }

    #[test]
    fn test_unsupported_conversions() {
        let mut c = Circuits::new(Role::Server, 32);
        let mut b = c.boolean();
        let x = b.put_in_gate(1, 8, Role::Server).unwrap();
        assert!(matches!(b.put_b2y_gate(&x), Err(Error::UnsupportedOperation(_))));
        assert!(matches!(b.put_b2a_gate(&x), Err(Error::UnsupportedOperation(_))));
        let mut y = c.yao();
        assert!(matches!(y.put_shared_out_gate(&x), Err(Error::UnsupportedOperation(_))));
    }

    #[test]
    fn test_a2y_layout() {
        let mut c = Circuits::new(Role::Server, 8);
        let a = c.arithmetic().put_in_gate(3, 8, Role::Server).unwrap();
        let y = c.yao().put_a2y_gate(&a).unwrap();
        assert_eq!(8, y.bitlen());
        let q = c.queues(Context::Yao);
        assert_eq!(16, q.interactive(1).len());
        assert_eq!(16, q.num_conversions());
        let out = c.yao().put_out_gate(&y, Recipients::All).unwrap();
        assert_eq!(8, out.wires().len());
    }
}
