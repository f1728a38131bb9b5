//! The gate arena shared by all sharings and the per-sharing work queues.
use tracing::trace;

use crate::{
    circuit::{
        ArithmeticCircuit, BooleanCircuit, Context, Recipients, Role,
        gate::{Gate, GateId, GateKind, GateValue},
    },
    error::Error,
};

/// The gates of one sharing, sorted into layers.
#[derive(Debug, Clone, Default)]
pub struct CircuitQueues {
    local: Vec<Vec<GateId>>,
    interactive: Vec<Vec<GateId>>,
    inputs: [Vec<GateId>; 2],
    outputs: [Vec<GateId>; 2],
    input_bits: [usize; 2],
    output_bits: [usize; 2],
    num_non_linear: usize,
    num_conversions: usize,
    max_depth: usize,
    max_rounds: usize,
    num_layers: usize,
}

impl CircuitQueues {
    /// Gates that are evaluated without communication in layer `depth`.
    pub fn local(&self, depth: usize) -> &[GateId] {
        self.local.get(depth).map_or(&[], Vec::as_slice)
    }

    /// Gates that send or receive data in layer `depth`.
    pub fn interactive(&self, depth: usize) -> &[GateId] {
        self.interactive.get(depth).map_or(&[], Vec::as_slice)
    }

    /// Input gates owned by `role`.
    pub fn input_gates(&self, role: Role) -> &[GateId] {
        &self.inputs[role.index()]
    }

    /// Output gates revealed to `role`.
    pub fn output_gates(&self, role: Role) -> &[GateId] {
        &self.outputs[role.index()]
    }

    /// Number of input bits provided by `role`.
    pub fn input_bits(&self, role: Role) -> usize {
        self.input_bits[role.index()]
    }

    /// Number of output bits revealed to `role`.
    pub fn output_bits(&self, role: Role) -> usize {
        self.output_bits[role.index()]
    }

    /// Number of AND (or MUL) operations, counting every SIMD value.
    pub fn num_non_linear(&self) -> usize {
        self.num_non_linear
    }

    /// Number of converted values.
    pub fn num_conversions(&self) -> usize {
        self.num_conversions
    }

    /// The deepest layer containing a gate.
    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// `max(depth + rounds)` over all interactive gates.
    pub fn max_communication_rounds(&self) -> usize {
        self.max_rounds
    }

    /// Number of layers the scheduler has to run for this sharing.
    pub fn num_layers(&self) -> usize {
        self.num_layers
    }

    fn enqueue(&mut self, id: GateId, gate: &Gate) {
        let queue = if gate.kind.is_interactive(gate.context) {
            self.max_rounds = self.max_rounds.max(gate.depth + gate.rounds);
            &mut self.interactive
        } else {
            &mut self.local
        };
        if queue.len() <= gate.depth {
            queue.resize_with(gate.depth + 1, Vec::new);
        }
        queue[gate.depth].push(id);
        self.max_depth = self.max_depth.max(gate.depth);
        self.num_layers = self.num_layers.max(gate.depth + gate.layers());

        let bits = gate.nvals * gate.bitlen;
        match &gate.kind {
            GateKind::Input { owner, .. } => {
                self.inputs[owner.index()].push(id);
                self.input_bits[owner.index()] += bits;
            }
            GateKind::Output { dst } => {
                for role in [Role::Server, Role::Client] {
                    if dst.includes(role) {
                        self.outputs[role.index()].push(id);
                        self.output_bits[role.index()] += bits;
                    }
                }
            }
            GateKind::NonLinear => self.num_non_linear += gate.nvals,
            GateKind::Conversion { .. } => self.num_conversions += gate.nvals,
            _ => {}
        }
    }
}

/// The arena holding the gates of all sharings of one party.
///
/// Both parties build the same circuit; gates are referenced by [`GateId`]
/// only. The sharing-specific builders are obtained via [`Circuits::boolean`],
/// [`Circuits::yao`] and [`Circuits::arithmetic`].
#[derive(Debug, Clone)]
pub struct Circuits {
    role: Role,
    arith_bitlen: usize,
    gates: Vec<Gate>,
    queues: [CircuitQueues; 3],
}

impl Circuits {
    /// Creates an empty circuit for `role` with `arith_bitlen`-bit arithmetic shares.
    pub fn new(role: Role, arith_bitlen: usize) -> Self {
        Self {
            role,
            arith_bitlen,
            gates: vec![],
            queues: Default::default(),
        }
    }

    /// The party this circuit belongs to.
    pub fn role(&self) -> Role {
        self.role
    }

    /// Bit length of arithmetic shares.
    pub fn arith_bitlen(&self) -> usize {
        self.arith_bitlen
    }

    /// Builder for Boolean (GMW) gates.
    pub fn boolean(&mut self) -> BooleanCircuit<'_> {
        BooleanCircuit::new(self, Context::Bool)
    }

    /// Builder for Yao gates.
    pub fn yao(&mut self) -> BooleanCircuit<'_> {
        BooleanCircuit::new(self, Context::Yao)
    }

    /// Builder for arithmetic gates.
    pub fn arithmetic(&mut self) -> ArithmeticCircuit<'_> {
        ArithmeticCircuit::new(self)
    }

    /// Returns the gate `id`.
    ///
    /// # Panics
    /// If `id` was not created by this arena (or the arena was reset since).
    pub fn gate(&self, id: GateId) -> &Gate {
        &self.gates[id.0]
    }

    /// Returns the gate `id`, or an error if this arena does not hold it.
    pub fn try_gate(&self, id: GateId) -> Result<&Gate, Error> {
        self.gates
            .get(id.0)
            .ok_or_else(|| Error::violation(format!("gate {id} does not exist, was the circuit reset?")))
    }

    /// All gates in creation order.
    pub fn gates(&self) -> &[Gate] {
        &self.gates
    }

    /// Number of gates.
    pub fn num_gates(&self) -> usize {
        self.gates.len()
    }

    /// The queues of one sharing.
    pub fn queues(&self, context: Context) -> &CircuitQueues {
        &self.queues[context.index()]
    }

    /// Number of layers of the whole circuit.
    pub fn num_layers(&self) -> usize {
        self.queues.iter().map(CircuitQueues::num_layers).max().unwrap_or(0)
    }

    /// Number of communication rounds of the whole circuit.
    pub fn max_communication_rounds(&self) -> usize {
        self.queues
            .iter()
            .map(CircuitQueues::max_communication_rounds)
            .max()
            .unwrap_or(0)
    }

    /// Removes all gates so that a new circuit can be built.
    pub fn reset(&mut self) {
        self.gates.clear();
        self.queues = Default::default();
    }

    fn bitlen_of(&self, context: Context) -> usize {
        match context {
            Context::Arith => self.arith_bitlen,
            Context::Bool | Context::Yao => 1,
        }
    }

    /// Adds a gate, computes its depth and sorts it into the queues.
    ///
    /// `nvals` is only used by gates whose width does not follow from their
    /// parents (inputs, repeaters, struct combiners).
    pub(crate) fn add_gate(
        &mut self,
        context: Context,
        kind: GateKind,
        parents: Vec<GateId>,
        nvals: usize,
    ) -> Result<GateId, Error> {
        for p in &parents {
            let Some(parent) = self.gates.get(p.0) else {
                return Err(Error::violation(format!("unknown parent gate {p}")));
            };
            if parent.kind.is_output() {
                return Err(Error::violation(format!(
                    "output gate {p} cannot be used as an input of a {} gate",
                    kind.name()
                )));
            }
        }
        self.check_contexts(context, &kind, &parents)?;
        let nvals = self.derive_nvals(&kind, &parents, nvals)?;
        if nvals == 0 {
            return Err(Error::violation(format!("{} gate without values", kind.name())));
        }
        let rounds = self.rounds_of(context, &kind, &parents);
        let depth = parents
            .iter()
            .map(|p| self.gates[p.0].depth + self.gates[p.0].layers())
            .max()
            .unwrap_or(0);
        for p in &parents {
            self.gates[p.0].nused += 1;
        }

        let gate = Gate {
            kind,
            context,
            parents,
            depth,
            rounds,
            nvals,
            bitlen: self.bitlen_of(context),
            nused: 0,
            value: GateValue::Empty,
        };
        let id = GateId(self.gates.len());
        trace!(%id, kind = gate.kind.name(), %context, depth, nvals, "gate");
        self.queues[context.index()].enqueue(id, &gate);
        self.gates.push(gate);
        Ok(id)
    }

    fn check_contexts(&self, context: Context, kind: &GateKind, parents: &[GateId]) -> Result<(), Error> {
        let parent_contexts: Vec<Context> = parents.iter().map(|p| self.gates[p.0].context).collect();
        if let GateKind::Conversion { .. } = kind {
            let Some(&from) = parent_contexts.first() else {
                return Err(Error::violation("conversion without parent"));
            };
            if parent_contexts.iter().any(|c| *c != from) {
                return Err(Error::violation("conversion parents in different sharings"));
            }
            return match (from, context) {
                (Context::Yao, Context::Bool) => {
                    let parent = &self.gates[parents[0].0];
                    if matches!(parent.kind, GateKind::Input { .. }) {
                        Err(Error::violation(
                            "Y2B directly on a Yao input gate; add a gate in between",
                        ))
                    } else {
                        Ok(())
                    }
                }
                (Context::Bool, Context::Yao) | (Context::Arith, Context::Yao) => Ok(()),
                (Context::Bool, Context::Arith) if parents.len() <= self.arith_bitlen => Ok(()),
                (Context::Bool, Context::Arith) => Err(Error::violation(format!(
                    "B2A of {} bits into {}-bit shares",
                    parents.len(),
                    self.arith_bitlen
                ))),
                (from, to) => Err(Error::unsupported(&format!("conversion from {from}"), to)),
            };
        }
        if let Some(c) = parent_contexts.iter().find(|c| **c != context) {
            return Err(Error::violation(format!(
                "{} gate in {context} sharing has a parent in {c} sharing",
                kind.name()
            )));
        }
        Ok(())
    }

    fn derive_nvals(&self, kind: &GateKind, parents: &[GateId], requested: usize) -> Result<usize, Error> {
        let parent_nvals: Vec<usize> = parents.iter().map(|p| self.gates[p.0].nvals).collect();
        let arity = |n: usize| {
            if parents.len() == n {
                Ok(())
            } else {
                Err(Error::violation(format!(
                    "{} gate needs {n} parents, got {}",
                    kind.name(),
                    parents.len()
                )))
            }
        };
        let equal_widths = || {
            if parent_nvals.windows(2).all(|w| w[0] == w[1]) {
                Ok(parent_nvals.first().copied().unwrap_or(0))
            } else {
                Err(Error::violation(format!(
                    "{} gate on parents with different SIMD widths {parent_nvals:?}",
                    kind.name()
                )))
            }
        };
        let out_of_range = |pos: usize, n: usize| {
            Error::violation(format!("{} gate reads value {pos} of a {n}-value wire", kind.name()))
        };
        match kind {
            GateKind::Linear | GateKind::NonLinear => {
                arity(2)?;
                equal_widths()
            }
            GateKind::Input { plaintext, .. } => {
                arity(0)?;
                match plaintext {
                    Some(v) if v.len() != requested => Err(Error::violation(format!(
                        "{} input values for a {requested}-value gate",
                        v.len()
                    ))),
                    _ => Ok(requested),
                }
            }
            GateKind::Constant { values } => {
                arity(0)?;
                Ok(values.len())
            }
            GateKind::MulConst { .. }
            | GateKind::Inv
            | GateKind::Output { .. }
            | GateKind::SharedOutput => {
                arity(1)?;
                Ok(parent_nvals[0])
            }
            GateKind::Conversion { .. } => equal_widths(),
            GateKind::Combine => Ok(parent_nvals.iter().sum()),
            GateKind::Split { pos } => {
                arity(1)?;
                if *pos < parent_nvals[0] {
                    Ok(1)
                } else {
                    Err(out_of_range(*pos, parent_nvals[0]))
                }
            }
            GateKind::Repeat => {
                arity(1)?;
                if parent_nvals[0] == 1 {
                    Ok(requested)
                } else {
                    Err(Error::violation("repeater gates need a single-value parent"))
                }
            }
            GateKind::Permute { positions } => {
                arity(1)?;
                let mut seen = vec![false; parent_nvals[0]];
                for &k in positions {
                    if k >= seen.len() || std::mem::replace(&mut seen[k], true) {
                        return Err(Error::violation(format!("{positions:?} is not a permutation")));
                    }
                }
                if seen.iter().all(|s| *s) {
                    Ok(positions.len())
                } else {
                    Err(Error::violation(format!("{positions:?} is not a permutation")))
                }
            }
            GateKind::Subset { positions } => {
                arity(1)?;
                match positions.iter().find(|&&k| k >= parent_nvals[0]) {
                    Some(&k) => Err(out_of_range(k, parent_nvals[0])),
                    None => Ok(positions.len()),
                }
            }
            GateKind::CombineAtPos { pos } => match parent_nvals.iter().find(|&&n| *pos >= n) {
                Some(&n) => Err(out_of_range(*pos, n)),
                None => Ok(parents.len()),
            },
            GateKind::StructCombine { start, incr } => {
                if parents.is_empty() {
                    return Err(Error::violation(format!(
                        "struct combiner (start {start}, incr {incr}) without parents"
                    )));
                }
                let sources = kind.sources(&parent_nvals, requested);
                match sources.iter().find(|&&(p, k)| k >= parent_nvals[p]) {
                    Some(&(p, k)) => Err(out_of_range(k, parent_nvals[p])),
                    None => Ok(requested),
                }
            }
        }
    }

    fn rounds_of(&self, context: Context, kind: &GateKind, parents: &[GateId]) -> usize {
        if !kind.is_interactive(context) {
            return 0;
        }
        let from = parents.first().map(|p| self.gates[p.0].context);
        match (context, kind, from) {
            (Context::Yao, GateKind::Input { owner: Role::Client, .. }, _) => 2,
            (Context::Yao, GateKind::Conversion { .. }, Some(Context::Bool)) => 2,
            (Context::Yao, GateKind::Conversion { pos }, Some(Context::Arith)) if pos % 2 == 1 => 2,
            (Context::Arith, GateKind::Conversion { .. }, _) => 2,
            _ => 1,
        }
    }

    pub(crate) fn set_value(&mut self, id: GateId, value: GateValue) {
        self.gates[id.0].value = value;
    }

    /// The values of the parents of `id`, in order.
    pub(crate) fn parent_values(&self, id: GateId) -> Vec<&GateValue> {
        self.gates[id.0]
            .parents
            .iter()
            .map(|p| &self.gates[p.0].value)
            .collect()
    }

    /// Marks the gate as evaluated: parents without remaining children drop
    /// their values. Output values are kept for the caller.
    pub(crate) fn release_parents(&mut self, id: GateId) {
        for i in 0..self.gates[id.0].parents.len() {
            let p = self.gates[id.0].parents[i].0;
            let parent = &mut self.gates[p];
            parent.nused = parent.nused.saturating_sub(1);
            if parent.nused == 0 && !parent.kind.is_output() {
                parent.value = GateValue::Empty;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(c: &mut Circuits, ctx: Context, owner: Role) -> GateId {
        c.add_gate(ctx, GateKind::Input { owner, plaintext: None }, vec![], 1)
            .unwrap()
    }

    #[test]
    fn test_share_of_reset_circuit_is_rejected() {
        let mut c = Circuits::new(Role::Server, 32);
        let a = input(&mut c, Context::Bool, Role::Server);
        let o = c
            .add_gate(Context::Bool, GateKind::Output { dst: Recipients::All }, vec![a], 0)
            .unwrap();
        let out = crate::circuit::Share::from_wires(vec![o]);
        assert_eq!(1, out.nvals(&c));
        c.reset();
        assert!(matches!(c.try_gate(o), Err(Error::ProtocolViolation(_))));
        assert!(matches!(out.clear_values(&c), Err(Error::ProtocolViolation(_))));
        assert_eq!(0, out.nvals(&c));
    }

    #[test]
    fn test_depth_and_queues() {
        let mut c = Circuits::new(Role::Server, 32);
        let a = input(&mut c, Context::Bool, Role::Server);
        let b = input(&mut c, Context::Bool, Role::Client);
        let x = c.add_gate(Context::Bool, GateKind::Linear, vec![a, b], 0).unwrap();
        let y = c.add_gate(Context::Bool, GateKind::NonLinear, vec![x, a], 0).unwrap();
        let o = c
            .add_gate(Context::Bool, GateKind::Output { dst: Recipients::All }, vec![y], 0)
            .unwrap();
        assert_eq!([0, 0, 1, 2, 3], [a, b, x, y, o].map(|g| c.gate(g).depth()));
        let q = c.queues(Context::Bool);
        assert_eq!(&[a, b], q.interactive(0));
        assert_eq!(&[x], q.local(1));
        assert_eq!(&[y], q.interactive(2));
        assert_eq!(1, q.num_non_linear());
        assert_eq!(&[o], q.output_gates(Role::Client));
        assert_eq!(4, c.max_communication_rounds());
        assert_eq!(4, c.num_layers());
        for g in c.gates() {
            for p in g.parents() {
                assert!(g.depth() > c.gate(*p).depth());
            }
        }
    }

    #[test]
    fn test_two_round_gates_delay_children() {
        let mut c = Circuits::new(Role::Client, 32);
        let a = input(&mut c, Context::Yao, Role::Client);
        let b = input(&mut c, Context::Yao, Role::Server);
        assert_eq!(2, c.gate(a).rounds());
        assert_eq!(1, c.gate(b).rounds());
        let x = c.add_gate(Context::Yao, GateKind::NonLinear, vec![a, b], 0).unwrap();
        assert_eq!(0, c.gate(x).rounds());
        assert_eq!(2, c.gate(x).depth());
        assert_eq!(&[x], c.queues(Context::Yao).local(2));
        assert_eq!(2, c.max_communication_rounds());
    }

    #[test]
    fn test_simd_width_mismatch() {
        let mut c = Circuits::new(Role::Server, 32);
        let a = input(&mut c, Context::Bool, Role::Server);
        let b = c
            .add_gate(Context::Bool, GateKind::Input { owner: Role::Server, plaintext: None }, vec![], 3)
            .unwrap();
        assert!(matches!(
            c.add_gate(Context::Bool, GateKind::Linear, vec![a, b], 0),
            Err(Error::ProtocolViolation(_))
        ));
    }

    #[test]
    fn test_output_cannot_be_parent() {
        let mut c = Circuits::new(Role::Server, 32);
        let a = input(&mut c, Context::Arith, Role::Server);
        let o = c
            .add_gate(Context::Arith, GateKind::Output { dst: Recipients::Server }, vec![a], 0)
            .unwrap();
        assert!(c.add_gate(Context::Arith, GateKind::Inv, vec![o], 0).is_err());
    }

    #[test]
    fn test_y2b_on_yao_input_is_rejected() {
        let mut c = Circuits::new(Role::Server, 32);
        let a = input(&mut c, Context::Yao, Role::Server);
        assert!(matches!(
            c.add_gate(Context::Bool, GateKind::Conversion { pos: 0 }, vec![a], 0),
            Err(Error::ProtocolViolation(_))
        ));
        let inv = c.add_gate(Context::Yao, GateKind::Inv, vec![a], 0).unwrap();
        assert!(c.add_gate(Context::Bool, GateKind::Conversion { pos: 0 }, vec![inv], 0).is_ok());
    }

    #[test]
    fn test_release_parents() {
        let mut c = Circuits::new(Role::Server, 32);
        let a = input(&mut c, Context::Arith, Role::Server);
        let x = c.add_gate(Context::Arith, GateKind::Linear, vec![a, a], 0).unwrap();
        c.set_value(a, GateValue::Arith(vec![1]));
        c.release_parents(x);
        assert_eq!(&GateValue::Empty, c.gate(a).value());
    }

    #[test]
    fn test_reset() {
        let mut c = Circuits::new(Role::Server, 32);
        input(&mut c, Context::Arith, Role::Server);
        c.reset();
        assert_eq!(0, c.num_gates());
        assert_eq!(0, c.num_layers());
        assert!(c.queues(Context::Arith).input_gates(Role::Server).is_empty());
    }
}
