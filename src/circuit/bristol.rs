//! Export of Boolean circuits in Bristol Fashion.
//!
//! Only circuits made of XOR, AND and INV gates with a single value per wire
//! can be exported. The exported circuit has two inputs (the server's and the
//! client's wires, in that order) and one output. Wires are numbered so that
//! inputs come first and outputs last, as the format requires.
use std::{
    collections::{HashMap, HashSet},
    io::Write,
};

use tracing::debug;

use crate::{
    circuit::{Circuits, Context, GateId, GateKind, Share},
    error::Error,
};

enum Line {
    Xor(usize, usize, usize),
    And(usize, usize, usize),
    Inv(usize, usize),
}

impl Line {
    fn write(&self, w: &mut impl Write) -> Result<(), Error> {
        match self {
            Line::Xor(a, b, z) => writeln!(w, "2 1 {a} {b} {z} XOR")?,
            Line::And(a, b, z) => writeln!(w, "2 1 {a} {b} {z} AND")?,
            Line::Inv(a, z) => writeln!(w, "1 1 {a} {z} INV")?,
        }
        Ok(())
    }
}

/// Writes the part of `circuits` computing `out` from `server_in` and
/// `client_in` as a Bristol Fashion circuit.
///
/// Output shares may consist of output gates or of the gates they reveal.
pub fn export(
    circuits: &Circuits,
    server_in: &[Share],
    client_in: &[Share],
    out: &[Share],
    mut writer: impl Write,
) -> Result<(), Error> {
    let mut wire_of: HashMap<GateId, usize> = HashMap::new();
    let mut num_inputs = [0, 0];
    for (party, shares) in [server_in, client_in].into_iter().enumerate() {
        for id in shares.iter().flat_map(Share::wires) {
            let gate = circuits.gate(*id);
            if !matches!(gate.kind(), GateKind::Input { .. }) {
                return Err(Error::violation(format!("{id} is not an input gate")));
            }
            let next = wire_of.len();
            if wire_of.insert(*id, next).is_some() {
                return Err(Error::violation(format!("input {id} is listed twice")));
            }
            num_inputs[party] += 1;
        }
    }

    let mut outputs = Vec::new();
    for id in out.iter().flat_map(Share::wires) {
        let gate = circuits.gate(*id);
        match gate.kind() {
            GateKind::Output { .. } | GateKind::SharedOutput => outputs.push(gate.parents()[0]),
            _ => outputs.push(*id),
        }
    }

    let gates = reachable(circuits, &outputs)?;
    let mut children: HashMap<GateId, usize> = HashMap::new();
    for id in &gates {
        for p in circuits.gate(*id).parents() {
            *children.entry(*p).or_default() += 1;
        }
    }
    // A leaf gate that is output exactly once can produce its output wire
    // directly; all other outputs are copied with two inversions.
    let mut uses: HashMap<GateId, usize> = HashMap::new();
    for id in &outputs {
        *uses.entry(*id).or_default() += 1;
    }
    let direct: HashSet<GateId> = outputs
        .iter()
        .filter(|id| !wire_of.contains_key(*id) && !children.contains_key(*id) && uses[*id] == 1)
        .copied()
        .collect();

    let mut next = wire_of.len();
    let mut body = vec![];
    for id in &gates {
        if wire_of.contains_key(id) || direct.contains(id) {
            continue;
        }
        body.push(line(circuits, *id, &wire_of, next)?);
        wire_of.insert(*id, next);
        next += 1;
    }
    let mut copies = HashMap::new();
    for id in outputs.iter().filter(|id| !direct.contains(*id)) {
        body.push(Line::Inv(wire_of[id], next));
        copies.entry(*id).or_insert_with(Vec::new).push(next);
        next += 1;
    }
    let first_output = next;
    for id in &outputs {
        if direct.contains(id) {
            body.push(line(circuits, *id, &wire_of, next)?);
        } else {
            let copy = copies
                .get_mut(id)
                .and_then(|c| (!c.is_empty()).then(|| c.remove(0)))
                .ok_or_else(|| Error::violation(format!("missing copy of output {id}")))?;
            body.push(Line::Inv(copy, next));
        }
        next += 1;
    }
    debug!(gates = body.len(), wires = next, "bristol export");

    writeln!(writer, "{} {next}", body.len())?;
    writeln!(writer, "2 {} {}", num_inputs[0], num_inputs[1])?;
    writeln!(writer, "1 {}", next - first_output)?;
    writeln!(writer)?;
    for l in &body {
        l.write(&mut writer)?;
    }
    Ok(())
}

/// All gates the outputs depend on, in creation order.
fn reachable(circuits: &Circuits, outputs: &[GateId]) -> Result<Vec<GateId>, Error> {
    let mut seen = vec![false; circuits.num_gates()];
    let mut stack = outputs.to_vec();
    while let Some(id) = stack.pop() {
        if std::mem::replace(&mut seen[id.index()], true) {
            continue;
        }
        let gate = circuits.gate(id);
        if gate.context() == Context::Arith || gate.nvals() != 1 {
            return Err(Error::unsupported(
                &format!("exporting {} gate {id} with {} values", gate.kind().name(), gate.nvals()),
                gate.context(),
            ));
        }
        stack.extend_from_slice(gate.parents());
    }
    Ok(seen
        .iter()
        .enumerate()
        .filter(|(_, s)| **s)
        .map(|(i, _)| GateId(i))
        .collect())
}

fn line(circuits: &Circuits, id: GateId, wire_of: &HashMap<GateId, usize>, z: usize) -> Result<Line, Error> {
    let gate = circuits.gate(id);
    let wire = |k: usize| {
        wire_of
            .get(&gate.parents()[k])
            .copied()
            .ok_or_else(|| Error::violation(format!("{} is not an exported input", gate.parents()[k])))
    };
    match gate.kind() {
        GateKind::Linear => Ok(Line::Xor(wire(0)?, wire(1)?, z)),
        GateKind::NonLinear => Ok(Line::And(wire(0)?, wire(1)?, z)),
        GateKind::Inv => Ok(Line::Inv(wire(0)?, z)),
        GateKind::Input { .. } => Err(Error::violation(format!("input {id} is not exported"))),
        kind => Err(Error::unsupported(
            &format!("exporting {} gates", kind.name()),
            gate.context(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit::{Circuit, Recipients, Role};

    #[test]
    fn test_export_and() {
        let mut c = Circuits::new(Role::Server, 32);
        let mut b = c.boolean();
        let x = b.put_in_gate(1, 1, Role::Server).unwrap();
        let y = b.put_in_gate(1, 1, Role::Client).unwrap();
        let z = b.put_and_gate(&x, &y).unwrap();
        let o = b.put_out_gate(&z, Recipients::All).unwrap();
        let mut buf = vec![];
        export(&c, &[x], &[y], &[o], &mut buf).unwrap();
        assert_eq!("1 3\n2 1 1\n1 1\n\n2 1 0 1 2 AND\n", String::from_utf8(buf).unwrap());
    }

    #[test]
    fn test_export_copies_inner_outputs() {
        let mut c = Circuits::new(Role::Client, 32);
        let mut b = c.boolean();
        let x = b.put_in_gate(0, 2, Role::Server).unwrap();
        let y = b.put_in_gate(0, 2, Role::Client).unwrap();
        let sum = b.put_add_gate(&x, &y).unwrap();
        let mut buf = vec![];
        export(&c, &[x.clone()], &[y.clone()], &[sum, x], &mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();
        let mut lines = text.lines();
        let header: Vec<usize> = lines
            .next()
            .unwrap()
            .split(' ')
            .map(|n| n.parse().unwrap())
            .collect();
        assert_eq!(Some("2 2 2"), lines.next());
        assert_eq!(Some("1 4"), lines.next());
        let body: Vec<&str> = lines.skip(1).collect();
        assert_eq!(vec![8, 12], header);
        assert_eq!(8, body.len());
        let targets: Vec<&str> = body[4..]
            .iter()
            .map(|l| l.split(' ').rev().nth(1).unwrap())
            .collect();
        assert_eq!(vec!["8", "9", "10", "11"], targets);
        assert_eq!("2 1 0 2 8 XOR", body[4]);
        assert_eq!("1 1 6 10 INV", body[6]);
    }

    #[test]
    fn test_export_rejects_simd() {
        let mut c = Circuits::new(Role::Server, 32);
        let mut b = c.boolean();
        let x = b.put_simd_in_gate(&[1, 0], 1, Role::Server).unwrap();
        let y = b.put_inv_gate(&x).unwrap();
        assert!(export(&c, &[x], &[], &[y], std::io::sink()).is_err());
    }
}
