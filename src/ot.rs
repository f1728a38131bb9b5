//! Oblivious transfer extension in the style of Asharov-Lindell-Schneider-Zohner.
//!
//! A handful of public-key base OTs ([`base`]) are extended to millions of
//! OTs with symmetric crypto only. The work is split into fixed-size blocks
//! that are processed by scoped worker threads, while the calling thread does
//! all network I/O. The sender and receiver of one direction share a running
//! OT counter so that the PRG stream and hash inputs never repeat.
use std::{
    collections::VecDeque,
    fmt,
    sync::{Arc, Condvar, Mutex},
};

use crate::{
    bitvec::BitVector,
    block::Block,
    crypto::{FIXED_KEY_HASH, HashFunction},
    error::Error,
};

pub(crate) mod base;
pub(crate) mod masking;
mod receiver;
mod sender;

pub(crate) use masking::{ArithMtMasking, MaskingFunction, XorMasking};
pub(crate) use receiver::OtExtReceiver;
pub(crate) use sender::OtExtSender;

/// Number of OTs processed as one unit of work. Must be a multiple of 128.
///
/// The block layout only depends on the number of OTs, never on the number of
/// threads, so both parties always agree on it.
pub(crate) const OTS_PER_BLOCK: usize = 8192;

/// Size of the `(block id, processed OTs)` header of every block message.
const BLOCK_HEADER: usize = 8;

/// The kind of OT.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OtFlavor {
    /// The sender chooses both messages.
    General,
    /// The sender chooses a correlation, the messages are `x0` and `f(x0)`.
    Correlated,
    /// Both messages are random.
    Random,
}

/// The inputs and outputs of one side of a batch of OTs.
pub(crate) enum OtData {
    /// The sender's messages; inputs for general OT, outputs otherwise.
    Sender { x0: BitVector, x1: BitVector },
    /// The receiver's choice bits and the chosen messages.
    Receiver { choices: BitVector, output: BitVector },
}

/// A batch of OTs requested by a sharing during setup.
pub(crate) struct OtTask {
    pub(crate) flavor: OtFlavor,
    pub(crate) num_ots: usize,
    pub(crate) bitlen: usize,
    pub(crate) masking: Arc<dyn MaskingFunction>,
    pub(crate) data: OtData,
}

impl fmt::Debug for OtTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let side = match self.data {
            OtData::Sender { .. } => "sender",
            OtData::Receiver { .. } => "receiver",
        };
        write!(
            f,
            "OtTask({side}, {:?}, {} OTs of {} bits)",
            self.flavor, self.num_ots, self.bitlen
        )
    }
}

impl OtTask {
    /// A sender task. For general OT `x0`/`x1` are the messages, otherwise
    /// they are overwritten.
    pub(crate) fn sender(
        flavor: OtFlavor,
        num_ots: usize,
        bitlen: usize,
        masking: Arc<dyn MaskingFunction>,
        messages: Option<(BitVector, BitVector)>,
    ) -> Self {
        let (x0, x1) = messages
            .unwrap_or_else(|| (BitVector::new(num_ots * bitlen), BitVector::new(num_ots * bitlen)));
        Self {
            flavor,
            num_ots,
            bitlen,
            masking,
            data: OtData::Sender { x0, x1 },
        }
    }

    /// A receiver task with the given choice bits.
    pub(crate) fn receiver(
        flavor: OtFlavor,
        num_ots: usize,
        bitlen: usize,
        masking: Arc<dyn MaskingFunction>,
        choices: BitVector,
    ) -> Self {
        Self {
            flavor,
            num_ots,
            bitlen,
            masking,
            data: OtData::Receiver {
                choices,
                output: BitVector::new(num_ots * bitlen),
            },
        }
    }
}

/// Tuning knobs of the OT extension.
#[derive(Debug, Clone, Copy)]
pub(crate) struct OtExtConfig {
    pub(crate) num_threads: usize,
    pub(crate) verify: bool,
}

/// The block structure of one batch of OTs.
#[derive(Debug, Clone, Copy)]
struct Layout {
    /// Counter value of the first OT of the batch.
    first: u64,
    num_ots: usize,
    padded: usize,
    bitlen: usize,
    /// Number of base OTs.
    rows: usize,
    /// Base OTs rounded up to the transpose granularity.
    rows_pad: usize,
    num_blocks: usize,
}

impl Layout {
    /// Lays out `num_ots` OTs whose ids start at the running counter `first`.
    fn new(first: u64, num_ots: usize, bitlen: usize, rows: usize) -> Self {
        let padded = num_ots.div_ceil(Block::BITS) * Block::BITS;
        Self {
            first,
            num_ots,
            padded,
            bitlen,
            rows,
            rows_pad: rows.div_ceil(64) * 64,
            num_blocks: padded.div_ceil(OTS_PER_BLOCK),
        }
    }

    fn block_start(&self, block: usize) -> usize {
        block * OTS_PER_BLOCK
    }

    /// Number of OTs of the block including padding (a multiple of 128).
    fn block_len(&self, block: usize) -> usize {
        OTS_PER_BLOCK.min(self.padded - self.block_start(block))
    }

    /// Number of OTs of the block that were actually requested.
    fn block_real(&self, block: usize) -> usize {
        OTS_PER_BLOCK.min(self.num_ots - self.block_start(block))
    }

    /// Bytes of the per-OT message buffers occupied by one full block.
    fn block_bytes(&self) -> usize {
        OTS_PER_BLOCK * self.bitlen / 8
    }

    /// Length of the matrix message `u` of a block.
    fn matrix_msg_len(&self, block: usize) -> usize {
        BLOCK_HEADER + self.rows * self.block_len(block) / 8
    }

    /// The worker responsible for `block` when `workers` threads share the blocks.
    fn worker_of(&self, block: usize, workers: usize) -> usize {
        block / self.num_blocks.div_ceil(workers)
    }

    fn blocks_of(&self, worker: usize, workers: usize) -> std::ops::Range<usize> {
        let per = self.num_blocks.div_ceil(workers);
        (worker * per).min(self.num_blocks)..((worker + 1) * per).min(self.num_blocks)
    }

    /// Keystream position (in AES blocks) of `block`.
    fn prg_counter(&self, block: usize) -> u128 {
        (u128::from(self.first) + self.block_start(block) as u128) / Block::BITS as u128
    }

    /// Global id of OT `i` of the run, fed into the row hash.
    fn ot_id(&self, i: usize) -> u64 {
        self.first + i as u64
    }
}

fn block_header(block: usize, processed: usize) -> Vec<u8> {
    let mut msg = Vec::with_capacity(BLOCK_HEADER);
    msg.extend_from_slice(&(block as u32).to_le_bytes());
    msg.extend_from_slice(&(processed as u32).to_le_bytes());
    msg
}

/// Splits a block message into `(block id, processed OTs, payload)`.
fn parse_block(msg: &[u8]) -> Result<(usize, usize, &[u8]), Error> {
    if msg.len() < BLOCK_HEADER {
        return Err(Error::violation("OT block message without header"));
    }
    let mut id = [0; 4];
    id.copy_from_slice(&msg[..4]);
    let mut processed = [0; 4];
    processed.copy_from_slice(&msg[4..8]);
    Ok((
        u32::from_le_bytes(id) as usize,
        u32::from_le_bytes(processed) as usize,
        &msg[BLOCK_HEADER..],
    ))
}

/// Hashes the row of OT `id` (the first `rows` bits of `row`) into a pad seed.
///
/// 128-bit rows use fixed-key AES, all other sizes the hash function of the
/// security level.
fn hash_row(hash: HashFunction, rows: usize, id: u64, row: &[u8]) -> Block {
    let row = &row[..rows / 8];
    if rows == Block::BITS {
        FIXED_KEY_HASH.cr_hash_with_id(id, Block::from_prefix(row))
    } else {
        Block::from_prefix(&hash.hash_ctr(id, row))
    }
}

/// A queue of finished block messages, filled by the workers and drained by
/// the I/O thread.
struct BlockQueue {
    items: Mutex<VecDeque<Result<Vec<u8>, Error>>>,
    ready: Condvar,
}

impl BlockQueue {
    fn new() -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            ready: Condvar::new(),
        }
    }

    fn push(&self, item: Result<Vec<u8>, Error>) {
        if let Ok(mut items) = self.items.lock() {
            items.push_back(item);
            self.ready.notify_one();
        }
    }

    fn pop(&self) -> Result<Vec<u8>, Error> {
        let poisoned = || Error::Crypto("OT worker thread panicked".into());
        let mut items = self.items.lock().map_err(|_| poisoned())?;
        loop {
            if let Some(item) = items.pop_front() {
                return item;
            }
            items = self.ready.wait(items).map_err(|_| poisoned())?;
        }
    }
}

fn worker_count(config: &OtExtConfig, layout: &Layout) -> usize {
    config.num_threads.clamp(1, layout.num_blocks.max(1))
}

#[cfg(test)]
mod tests {
    use std::thread;

    use rand::{SeedableRng, rngs::StdRng};

    use super::*;
    use crate::{
        channel::{Connection, OT_ADMIN_CHANNEL, tests::connection_pair},
        crypto::{AesRng, SecLevel},
    };

    fn ot_pair(a: &Connection, b: &Connection, seclvl: SecLevel, threads: usize) -> (OtExtSender, OtExtReceiver) {
        let config = OtExtConfig {
            num_threads: threads,
            verify: true,
        };
        let (base_a, ext_a) = (a.channel(OT_ADMIN_CHANNEL).unwrap(), a.channel(0).unwrap());
        let (base_b, ext_b) = (b.channel(OT_ADMIN_CHANNEL).unwrap(), b.channel(0).unwrap());
        let sender = thread::spawn(move || {
            let mut rng = AesRng::from_seed_at(Block::from(1_u128), 0);
            OtExtSender::setup(&base_a, ext_a, seclvl, config, &mut rng).unwrap()
        });
        let mut rng = AesRng::from_seed_at(Block::from(2_u128), 0);
        let receiver = OtExtReceiver::setup(&base_b, ext_b, seclvl, config, &mut rng).unwrap();
        (sender.join().unwrap(), receiver)
    }

    fn run(
        s: &mut OtExtSender,
        r: &mut OtExtReceiver,
        flavor: OtFlavor,
        num_ots: usize,
        bitlen: usize,
    ) {
        let mut rng = StdRng::seed_from_u64((num_ots * 1000 + bitlen) as u64);
        let delta = BitVector::random(bitlen, &mut rng);
        let masking: Arc<dyn MaskingFunction> = Arc::new(XorMasking::new(bitlen, delta.as_bytes()));
        let messages = (flavor == OtFlavor::General).then(|| {
            (
                BitVector::random(num_ots * bitlen, &mut rng),
                BitVector::random(num_ots * bitlen, &mut rng),
            )
        });
        let choices = BitVector::random(num_ots, &mut rng);

        let mut s_task = OtTask::sender(flavor, num_ots, bitlen, masking.clone(), messages);
        let mut r_task = OtTask::receiver(flavor, num_ots, bitlen, masking, choices);
        thread::scope(|scope| {
            let h = scope.spawn(|| s.run(&mut s_task));
            r.run(&mut r_task).unwrap();
            h.join().unwrap().unwrap();
        });

        let (OtData::Sender { x0, x1 }, OtData::Receiver { choices, output }) =
            (&s_task.data, &r_task.data)
        else {
            unreachable!()
        };
        for i in 0..num_ots {
            let expected = if choices.get_bit(i) { x1 } else { x0 };
            for b in 0..bitlen {
                assert_eq!(
                    expected.get_bit(i * bitlen + b),
                    output.get_bit(i * bitlen + b),
                    "{flavor:?} OT {i} bit {b} ({num_ots} OTs of {bitlen} bits)"
                );
            }
            if flavor == OtFlavor::Correlated {
                for b in 0..bitlen {
                    assert_eq!(x0.get_bit(i * bitlen + b) ^ delta.get_bit(b), x1.get_bit(i * bitlen + b));
                }
            }
        }
    }

    #[test]
    fn test_ot_extension_correctness() {
        let (a, b) = connection_pair();
        let (mut s, mut r) = ot_pair(&a, &b, SecLevel::LT, 2);
        for flavor in [OtFlavor::General, OtFlavor::Correlated, OtFlavor::Random] {
            for num_ots in [1, 127, 1024] {
                for bitlen in [8, 128, 512] {
                    run(&mut s, &mut r, flavor, num_ots, bitlen);
                }
            }
        }
    }

    #[test]
    fn test_ot_extension_other_levels_and_many_blocks() {
        for seclvl in [SecLevel::ST, SecLevel::XXLT] {
            let (a, b) = connection_pair();
            let (mut s, mut r) = ot_pair(&a, &b, seclvl, 3);
            run(&mut s, &mut r, OtFlavor::Correlated, 3 * OTS_PER_BLOCK + 5, 1);
            run(&mut s, &mut r, OtFlavor::General, 300, 64);
        }
    }

    #[test]
    fn test_counter_increments_by_padded_count() {
        let (a, b) = connection_pair();
        let (mut s, mut r) = ot_pair(&a, &b, SecLevel::LT, 1);
        assert_eq!(0, s.counter());
        run(&mut s, &mut r, OtFlavor::Random, 1, 8);
        assert_eq!(128, s.counter());
        assert_eq!(128, r.counter());
        run(&mut s, &mut r, OtFlavor::Random, 129, 8);
        assert_eq!(128 + 256, s.counter());
        assert_eq!(s.counter(), r.counter());
    }

    #[test]
    fn test_failed_run_still_consumes_counter() {
        let masking: Arc<dyn MaskingFunction> = Arc::new(XorMasking::uncorrelated(8));

        let (a, b) = connection_pair();
        let (mut s, mut r) = ot_pair(&a, &b, SecLevel::LT, 1);
        run(&mut s, &mut r, OtFlavor::Random, 1, 8);
        drop(r);
        drop(b);
        let mut task = OtTask::sender(OtFlavor::Random, 200, 8, masking.clone(), None);
        assert!(s.run(&mut task).is_err());
        assert_eq!(128 + 256, s.counter());

        let (a, b) = connection_pair();
        let (s, mut r) = ot_pair(&a, &b, SecLevel::LT, 1);
        drop(s);
        drop(a);
        let choices = BitVector::random(5, &mut rand::rng());
        let mut task = OtTask::receiver(OtFlavor::Random, 5, 8, masking, choices);
        assert!(r.run(&mut task).is_err());
        assert_eq!(128, r.counter());
    }

    #[test]
    fn test_random_ots_do_not_repeat() {
        let (a, b) = connection_pair();
        let (mut s, mut r) = ot_pair(&a, &b, SecLevel::LT, 1);
        let masking: Arc<dyn MaskingFunction> = Arc::new(XorMasking::uncorrelated(128));
        let mut firsts = vec![];
        for _ in 0..2 {
            let mut s_task = OtTask::sender(OtFlavor::Random, 4, 128, masking.clone(), None);
            let choices = BitVector::random(4, &mut rand::rng());
            let mut r_task = OtTask::receiver(OtFlavor::Random, 4, 128, masking.clone(), choices);
            thread::scope(|scope| {
                let h = scope.spawn(|| s.run(&mut s_task));
                r.run(&mut r_task).unwrap();
                h.join().unwrap().unwrap();
            });
            let OtData::Sender { x0, .. } = s_task.data else {
                unreachable!()
            };
            firsts.push(x0.as_bytes()[..16].to_vec());
        }
        assert_ne!(firsts[0], firsts[1]);
    }

    #[test]
    fn test_layout() {
        let l = Layout::new(0, 2 * OTS_PER_BLOCK + 1, 3, 80);
        assert_eq!(2 * OTS_PER_BLOCK + 128, l.padded);
        assert_eq!(3, l.num_blocks);
        assert_eq!(128, l.block_len(2));
        assert_eq!(1, l.block_real(2));
        assert_eq!(128, l.rows_pad);
        assert_eq!(0..2, l.blocks_of(0, 2));
        assert_eq!(2..3, l.blocks_of(1, 2));
        assert_eq!(1, l.worker_of(2, 2));
    }
}
