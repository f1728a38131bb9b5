use aby::{
    circuit::{Circuit, Circuits, Recipients, Role, Share},
    config::PartyConfig,
    crypto::SecLevel,
    error::Error,
};
use common::{Pair, input, simd_input, simulate};

mod common;

#[test]
fn millionaires_problem_in_gmw() -> Result<(), Error> {
    let (server, client) = simulate(|circ, role| {
        let mut b = circ.boolean();
        let s = input(&mut b, 500, 32, Role::Server, role)?;
        let c = input(&mut b, 300, 32, Role::Client, role)?;
        let gt = b.put_gt_gate(&s, &c)?;
        Ok(vec![b.put_out_gate(&gt, Recipients::All)?])
    })?;
    assert_eq!(vec![vec![1]], server);
    assert_eq!(vec![vec![1]], client);
    Ok(())
}

#[test]
fn gmw_gates() -> Result<(), Error> {
    let (server, client) = simulate(|circ, role| {
        let mut b = circ.boolean();
        let s = input(&mut b, 0b1100_1010, 8, Role::Server, role)?;
        let c = input(&mut b, 0b1010_0110, 8, Role::Client, role)?;
        let sel = input(&mut b, 1, 1, Role::Client, role)?;
        let outputs = [
            b.put_and_gate(&s, &c)?,
            b.put_or_gate(&s, &c)?,
            b.put_xor_gate(&s, &c)?,
            b.put_inv_gate(&s)?,
            b.put_add_gate(&s, &c)?,
            b.put_sub_gate(&s, &c)?,
            b.put_mul_gate(&s, &c)?,
            b.put_eq_gate(&s, &s)?,
            b.put_mux_gate(&s, &c, &sel)?,
        ];
        outputs.iter().map(|o| b.put_out_gate(o, Recipients::All)).collect()
    })?;
    let (x, y) = (0b1100_1010_u64, 0b1010_0110_u64);
    let expected = vec![
        vec![x & y],
        vec![x | y],
        vec![x ^ y],
        vec![!x & 0xff],
        vec![(x + y) & 0xff],
        vec![x.wrapping_sub(y) & 0xff],
        vec![(x * y) & 0xff],
        vec![1],
        vec![x],
    ];
    assert_eq!(expected, server);
    assert_eq!(expected, client);
    Ok(())
}

#[test]
fn yao_gates_and_one_sided_outputs() -> Result<(), Error> {
    let (server, client) = simulate(|circ, role| {
        let mut y = circ.yao();
        let s = input(&mut y, 100, 8, Role::Server, role)?;
        let c = input(&mut y, 55, 8, Role::Client, role)?;
        let sum = y.put_add_gate(&s, &c)?;
        let gt = y.put_gt_gate(&c, &s)?;
        let and = y.put_and_gate(&s, &c)?;
        let max = y.put_mux_gate(&c, &s, &gt)?;
        Ok(vec![
            y.put_out_gate(&sum, Recipients::All)?,
            y.put_out_gate(&gt, Recipients::Server)?,
            y.put_out_gate(&and, Recipients::Client)?,
            y.put_out_gate(&max, Recipients::All)?,
        ])
    })?;
    assert_eq!(vec![vec![155], vec![0], vec![], vec![100]], server);
    assert_eq!(vec![vec![155], vec![], vec![100 & 55], vec![100]], client);
    Ok(())
}

#[test]
fn arithmetic_add_and_mul() -> Result<(), Error> {
    let (server, client) = simulate(|circ, role| {
        let mut a = circ.arithmetic();
        let s = input(&mut a, 10, 32, Role::Server, role)?;
        let c = input(&mut a, 20, 32, Role::Client, role)?;
        let sum = a.put_add_gate(&s, &c)?;
        let prod = a.put_mul_gate(&s, &c)?;
        let diff = a.put_sub_gate(&s, &c)?;
        let scaled = a.put_mul_const_gate(&sum, 7)?;
        let squared = a.put_mul_gate(&sum, &sum)?;
        [sum, prod, diff, scaled, squared]
            .iter()
            .map(|o| a.put_out_gate(o, Recipients::All))
            .collect()
    })?;
    let expected: Vec<Vec<u64>> = vec![vec![30], vec![200], vec![(1 << 32) - 10], vec![210], vec![900]];
    assert_eq!(expected, server);
    assert_eq!(expected, client);
    Ok(())
}

#[test]
fn simd_gates() -> Result<(), Error> {
    let xs = [1, 2, 3, 40_000];
    let ys = [7, 100, 65_535, 30_000];
    let (server, client) = simulate(|circ, role| {
        let bx = simd_input(&mut circ.boolean(), &xs, Role::Server, role)?;
        let by = simd_input(&mut circ.boolean(), &ys, Role::Client, role)?;
        let ax = simd_input(&mut circ.arithmetic(), &xs, Role::Server, role)?;
        let ay = simd_input(&mut circ.arithmetic(), &ys, Role::Client, role)?;
        let mut b = circ.boolean();
        let sum = b.put_add_gate(&bx, &by)?;
        let bool_out = b.put_out_gate(&sum, Recipients::All)?;
        let mut a = circ.arithmetic();
        let prod = a.put_mul_gate(&ax, &ay)?;
        let arith_out = a.put_out_gate(&prod, Recipients::All)?;
        Ok(vec![bool_out, arith_out])
    })?;
    let sums: Vec<u64> = xs.iter().zip(ys).map(|(x, y)| (x + y) & 0xffff).collect();
    let prods: Vec<u64> = xs.iter().zip(ys).map(|(x, y)| (x * y) & 0xffff_ffff).collect();
    assert_eq!(vec![sums.clone(), prods.clone()], server);
    assert_eq!(vec![sums, prods], client);
    Ok(())
}

fn rearrange(c: &mut impl Circuit, role: Role) -> Result<Vec<Share>, Error> {
    let x = input(c, 0b1011, 4, Role::Server, role)?;
    let combined = c.put_combiner_gate(&x)?;
    let reversed = c.put_permutation_gate(&combined, &[3, 2, 1, 0])?;
    let split = c.put_splitter_gate(&reversed)?;
    let ends = c.put_subset_gate(&combined, &[0, 3])?;
    let repeated = c.put_repeater_gate(&x, 3)?;
    let middle = c.put_combine_at_pos_gate(&repeated, 1)?;
    let interleaved = c.put_struct_combiner_gate(&repeated, 0, 1, 8)?;
    [split, ends, repeated, middle, interleaved]
        .iter()
        .map(|s| c.put_out_gate(s, Recipients::All))
        .collect()
}

#[test]
fn simd_rearranging_gates() -> Result<(), Error> {
    let expected: Vec<Vec<u64>> = vec![
        vec![0b1101],
        vec![1, 1],
        vec![11, 11, 11],
        vec![1, 1, 0, 1],
        vec![1, 1, 0, 1, 1, 1, 0, 1],
    ];
    let (server, client) = simulate(|circ, role| rearrange(&mut circ.boolean(), role))?;
    assert_eq!(expected, server);
    assert_eq!(expected, client);
    let (server, client) = simulate(|circ, role| rearrange(&mut circ.yao(), role))?;
    assert_eq!(expected, server);
    assert_eq!(expected, client);
    Ok(())
}

#[test]
fn many_and_gates() -> Result<(), Error> {
    let width = 3000;
    let (server, _) = simulate(|circ, role| {
        let mut b = circ.boolean();
        let values: Vec<u64> = (0..width as u64).map(|i| i % 3).collect();
        let x = if role == Role::Server {
            b.put_simd_in_gate(&values, 2, Role::Server)?
        } else {
            b.put_dummy_in_gate(width, 2, Role::Server)?
        };
        let y = b.put_simd_cons_gate(&vec![0b10; width], 2)?;
        let and = b.put_and_gate(&x, &y)?;
        Ok(vec![b.put_out_gate(&and, Recipients::Server)?])
    })?;
    let expected: Vec<u64> = (0..width as u64).map(|i| (i % 3) & 0b10).collect();
    assert_eq!(vec![expected], server);
    Ok(())
}

#[test]
fn b2y_and_y2b_round_trip() -> Result<(), Error> {
    let (server, client) = simulate(|circ, role| {
        let bits = input(&mut circ.boolean(), 0xa5, 8, Role::Client, role)?;
        let mut y = circ.yao();
        let garbled = y.put_b2y_gate(&bits)?;
        let mask = input(&mut y, 0x0f, 8, Role::Server, role)?;
        let masked = y.put_xor_gate(&garbled, &mask)?;
        let mut b = circ.boolean();
        let back = b.put_y2b_gate(&masked)?;
        let inverted = b.put_inv_gate(&back)?;
        Ok(vec![b.put_out_gate(&inverted, Recipients::All)?])
    })?;
    assert_eq!(vec![vec![!(0xa5 ^ 0x0f) & 0xff]], server);
    assert_eq!(server, client);
    Ok(())
}

#[test]
fn a2y_and_y2a_round_trip() -> Result<(), Error> {
    let (server, client) = simulate(|circ, role| {
        let mut a = circ.arithmetic();
        let s = input(&mut a, 12_345, 32, Role::Server, role)?;
        let c = input(&mut a, 1_000, 32, Role::Client, role)?;
        let sum = a.put_add_gate(&s, &c)?;
        let mut y = circ.yao();
        let garbled = y.put_a2y_gate(&sum)?;
        let five = y.put_cons_gate(5, 32)?;
        let plus_five = y.put_add_gate(&garbled, &five)?;
        let mut a = circ.arithmetic();
        let back = a.put_y2a_gate(&plus_five)?;
        let doubled = a.put_mul_const_gate(&back, 2)?;
        Ok(vec![a.put_out_gate(&doubled, Recipients::All)?])
    })?;
    assert_eq!(vec![vec![2 * (12_345 + 1_000 + 5)]], server);
    assert_eq!(server, client);
    Ok(())
}

#[test]
fn b2a_and_a2b() -> Result<(), Error> {
    let (server, client) = simulate(|circ, role| {
        let bits = input(&mut circ.boolean(), 200, 8, Role::Client, role)?;
        let mut a = circ.arithmetic();
        let converted = a.put_b2a_gate(&bits)?;
        let s = input(&mut a, 1_000, 32, Role::Server, role)?;
        let sum = a.put_add_gate(&converted, &s)?;
        let sum_out = a.put_out_gate(&sum, Recipients::All)?;

        let mut b = circ.boolean();
        let back = b.put_a2b_gate(&sum)?;
        let three = b.put_cons_gate(3, 32)?;
        let plus_three = b.put_add_gate(&back, &three)?;
        let bool_out = b.put_out_gate(&plus_three, Recipients::Client)?;
        Ok(vec![sum_out, bool_out])
    })?;
    assert_eq!(vec![vec![1_200], vec![]], server);
    assert_eq!(vec![vec![1_200], vec![1_203]], client);
    Ok(())
}

#[test]
fn shared_outputs_recombine() -> Result<(), Error> {
    let (server, client) = simulate(|circ, role| {
        let mut b = circ.boolean();
        let x = input(&mut b, 0x5a, 8, Role::Server, role)?;
        let bits = b.put_shared_out_gate(&x)?;
        let mut a = circ.arithmetic();
        let v = input(&mut a, 4_000_000_000, 32, Role::Client, role)?;
        let share = a.put_shared_out_gate(&v)?;
        Ok(vec![bits, share])
    })?;
    assert_eq!(0x5a, server[0][0] ^ client[0][0]);
    assert_eq!(4_000_000_000, (server[1][0] + client[1][0]) & 0xffff_ffff);
    Ok(())
}

#[test]
fn reset_is_idempotent() -> Result<(), Error> {
    let mut pair = Pair::new(PartyConfig::default());
    let mixed = |circ: &mut Circuits, role: Role| -> Result<Vec<Share>, Error> {
        let mut a = circ.arithmetic();
        let s = input(&mut a, 6, 32, Role::Server, role)?;
        let c = input(&mut a, 7, 32, Role::Client, role)?;
        let prod = a.put_mul_gate(&s, &c)?;
        let mut y = circ.yao();
        let garbled = y.put_a2y_gate(&prod)?;
        let forty = y.put_cons_gate(40, 32)?;
        let gt = y.put_gt_gate(&garbled, &forty)?;
        Ok(vec![y.put_out_gate(&gt, Recipients::All)?])
    };
    let first = pair.run(mixed)?;
    let second = pair.run(mixed)?;
    assert_eq!((vec![vec![1]], vec![vec![1]]), first);
    assert_eq!(first, second);

    let other = pair.run(|circ, role| {
        let mut b = circ.boolean();
        let s = input(&mut b, 9, 4, Role::Server, role)?;
        let c = input(&mut b, 9, 4, Role::Client, role)?;
        let eq = b.put_eq_gate(&s, &c)?;
        Ok(vec![b.put_out_gate(&eq, Recipients::All)?])
    })?;
    assert_eq!((vec![vec![1]], vec![vec![1]]), other);
    Ok(())
}

#[test]
fn executing_twice_requires_reset() -> Result<(), Error> {
    let mut pair = Pair::new(PartyConfig::default());
    pair.run(|circ, role| {
        let mut b = circ.boolean();
        let x = input(&mut b, 1, 1, Role::Server, role)?;
        Ok(vec![b.put_out_gate(&x, Recipients::All)?])
    })?;
    assert!(matches!(pair.server.exec_circuit(), Err(Error::ProtocolViolation(_))));
    Ok(())
}

#[test]
fn mismatching_circuits_are_detected() -> Result<(), Error> {
    let mut pair = Pair::new(PartyConfig::default());
    let result = pair.run(|circ, role| {
        let mut b = circ.boolean();
        let x = input(&mut b, 3, 8, Role::Server, role)?;
        let x = if role == Role::Server { b.put_inv_gate(&x)? } else { x };
        Ok(vec![b.put_out_gate(&x, Recipients::All)?])
    });
    assert!(matches!(result, Err(Error::ProtocolViolation(_))));

    let (server, _) = pair.run(|circ, role| {
        let mut b = circ.boolean();
        let x = input(&mut b, 3, 8, Role::Server, role)?;
        Ok(vec![b.put_out_gate(&x, Recipients::All)?])
    })?;
    assert_eq!(vec![vec![3]], server);
    assert!(!pair.server.is_poisoned() && !pair.client.is_poisoned());
    Ok(())
}

#[test]
fn party_refuses_to_run_after_mid_protocol_failure() {
    let Pair { mut server, client } = Pair::new(PartyConfig::default());
    drop(client);
    assert!(server.exec_circuit().is_err());
    assert!(server.is_poisoned());

    server.reset();
    let err = server.exec_circuit().unwrap_err();
    assert!(matches!(err, Error::ProtocolViolation(msg) if msg.contains("reconnect")));
}

#[test]
fn short_term_security_with_verified_ots() -> Result<(), Error> {
    let config = PartyConfig {
        seclvl: SecLevel::ST,
        arith_bitlen: 16,
        num_ot_threads: 1,
        verify_ot: true,
        ..Default::default()
    };
    let (server, client) = Pair::new(config).run(|circ, role| {
        let mut a = circ.arithmetic();
        let s = input(&mut a, 300, 16, Role::Server, role)?;
        let c = input(&mut a, 300, 16, Role::Client, role)?;
        let prod = a.put_mul_gate(&s, &c)?;
        let prod_out = a.put_out_gate(&prod, Recipients::All)?;
        let mut y = circ.yao();
        let ys = input(&mut y, 0b0110, 4, Role::Server, role)?;
        let yc = input(&mut y, 0b0011, 4, Role::Client, role)?;
        let and = y.put_and_gate(&ys, &yc)?;
        let and_out = y.put_out_gate(&and, Recipients::All)?;
        Ok(vec![prod_out, and_out])
    })?;
    assert_eq!(vec![vec![(300 * 300) % 65_536], vec![0b0010]], server);
    assert_eq!(server, client);
    Ok(())
}

#[test]
fn long_term_security_with_64_bit_shares() -> Result<(), Error> {
    let config = PartyConfig {
        seclvl: SecLevel::XLT,
        arith_bitlen: 64,
        ..Default::default()
    };
    let big = u64::MAX - 1;
    let (server, client) = Pair::new(config).run(|circ, role| {
        let mut a = circ.arithmetic();
        let s = input(&mut a, big, 64, Role::Server, role)?;
        let c = input(&mut a, 3, 64, Role::Client, role)?;
        let prod = a.put_mul_gate(&s, &c)?;
        Ok(vec![a.put_out_gate(&prod, Recipients::All)?])
    })?;
    assert_eq!(vec![vec![big.wrapping_mul(3)]], server);
    assert_eq!(server, client);
    Ok(())
}
