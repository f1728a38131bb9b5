//! Chou-Orlandi base OT (cf. <https://eprint.iacr.org/2015/267>).
//!
//! This implementation uses the Ristretto prime order elliptic curve group from
//! the `curve25519-dalek` library. Messages can have any length: the pads are
//! drawn from the extendable output of a keyed BLAKE3 hash.
//!
//! The OT index `i` is hashed into the key derivation; without it all OTs of
//! one batch would derive the same keys.
use curve25519_dalek::{
    constants::RISTRETTO_BASEPOINT_TABLE,
    ristretto::{CompressedRistretto, RistrettoBasepointTable, RistrettoPoint},
    scalar::Scalar,
};
use rand::{CryptoRng, Rng};

use crate::{channel::Channel, error::Error, utils::RngCompat};

fn hash_pt(tweak: u128, pt: &RistrettoPoint, out_len: usize) -> Vec<u8> {
    let mut hasher = blake3::Hasher::new_keyed(pt.compress().as_bytes());
    hasher.update(&tweak.to_le_bytes());
    let mut out = vec![0; out_len];
    hasher.finalize_xof().fill(&mut out);
    out
}

fn decode_point(data: &[u8]) -> Result<RistrettoPoint, Error> {
    let invalid = || Error::violation("invalid base OT point");
    CompressedRistretto::from_slice(data)
        .map_err(|_| invalid())?
        .decompress()
        .ok_or_else(invalid)
}

fn xor(a: &[u8], b: &[u8]) -> Vec<u8> {
    a.iter().zip(b).map(|(a, b)| a ^ b).collect()
}

/// Base OT sender.
pub(crate) struct BaseOtSender {
    y: Scalar,
    s: RistrettoPoint,
    counter: u128,
}

impl BaseOtSender {
    /// Sends the sender's public point to the receiver.
    pub(crate) fn init<R: CryptoRng + Rng>(channel: &Channel, rng: &mut R) -> Result<Self, Error> {
        let y = Scalar::random(&mut RngCompat(rng));
        let s = &y * RISTRETTO_BASEPOINT_TABLE;
        channel.send("CO_OT_s", s.compress().as_bytes().to_vec())?;
        Ok(Self { y, s, counter: 0 })
    }

    /// Obliviously sends one message of every pair. Both messages of a pair
    /// must have the same length.
    pub(crate) fn send(&mut self, channel: &Channel, inputs: &[(Vec<u8>, Vec<u8>)]) -> Result<(), Error> {
        let ys = self.y * self.s;
        let rs: Vec<Vec<u8>> = channel.recv_vec("CO_OT_r", inputs.len())?;

        let mut c0c1 = Vec::with_capacity(inputs.len());
        for (i, (r, (m0, m1))) in rs.iter().zip(inputs).enumerate() {
            if m0.len() != m1.len() {
                return Err(Error::Crypto("base OT messages differ in length".into()));
            }
            let yr = self.y * decode_point(r)?;
            let tweak = self.counter + i as u128;
            let k0 = hash_pt(tweak, &yr, m0.len());
            let k1 = hash_pt(tweak, &(yr - ys), m1.len());
            c0c1.push((xor(&k0, m0), xor(&k1, m1)));
        }
        self.counter += inputs.len() as u128;
        channel.send_msg("CO_OT_c0c1", &c0c1)?;
        Ok(())
    }
}

/// Base OT receiver.
pub(crate) struct BaseOtReceiver {
    s: RistrettoBasepointTable,
    counter: u128,
}

impl BaseOtReceiver {
    /// Receives the sender's public point.
    pub(crate) fn init(channel: &Channel) -> Result<Self, Error> {
        let s = decode_point(&channel.recv_exact("CO_OT_s", 32)?)?;
        Ok(Self {
            s: RistrettoBasepointTable::create(&s),
            counter: 0,
        })
    }

    /// Receives the message selected by each choice bit.
    pub(crate) fn receive<R: CryptoRng + Rng>(
        &mut self,
        channel: &Channel,
        choices: &[bool],
        rng: &mut R,
    ) -> Result<Vec<Vec<u8>>, Error> {
        let zero = &Scalar::ZERO * &self.s;
        let one = &Scalar::ONE * &self.s;
        let mut rng = RngCompat(rng);

        let mut rs = Vec::with_capacity(choices.len());
        let mut ks = Vec::with_capacity(choices.len());
        for b in choices {
            let x = Scalar::random(&mut rng);
            let c = if *b { one } else { zero };
            let r = c + &x * RISTRETTO_BASEPOINT_TABLE;
            rs.push(r.compress().as_bytes().to_vec());
            ks.push(&x * &self.s);
        }
        channel.send_msg("CO_OT_r", &rs)?;

        let c0c1: Vec<(Vec<u8>, Vec<u8>)> = channel.recv_vec("CO_OT_c0c1", choices.len())?;
        let mut result = Vec::with_capacity(choices.len());
        for (i, ((b, k), (c0, c1))) in choices.iter().zip(ks).zip(c0c1).enumerate() {
            let c = if *b { c1 } else { c0 };
            let pad = hash_pt(self.counter + i as u128, &k, c.len());
            result.push(xor(&pad, &c));
        }
        self.counter += choices.len() as u128;
        Ok(result)
    }
}
