//! Sender side of the OT extension.
use std::{
    sync::mpsc::{self, Receiver, Sender},
    thread,
};

use rand::{CryptoRng, Rng};
use tracing::{Level, debug, instrument};

use super::{
    BlockQueue, Layout, OtData, OtExtConfig, OtTask, block_header, hash_row, masking, parse_block,
    worker_count,
};
use crate::{
    bitvec::BitVector,
    channel::Channel,
    crypto::{HashFunction, Mode, SecLevel, SymCipher},
    error::Error,
    ot::{MaskingFunction, OtFlavor, base::BaseOtReceiver},
    utils::xor_bytes_inplace,
};

/// Extends base OTs where this party provides the messages.
pub(crate) struct OtExtSender {
    channel: Channel,
    config: OtExtConfig,
    state: Columns,
}

/// The secret selection `s` and the base OT keys `k_{s_j}`.
struct Columns {
    s: BitVector,
    keys: Vec<SymCipher>,
    rows: usize,
    hash: HashFunction,
    counter: u64,
}

/// The message buffers of one block: `(block id, x0 chunk, x1 chunk)`.
type BlockBufs<'a> = (usize, &'a mut [u8], &'a mut [u8]);

impl OtExtSender {
    /// Runs the base OTs on `base` and prepares the extension on `channel`.
    #[instrument(level = Level::DEBUG, skip_all, err)]
    pub(crate) fn setup<R: CryptoRng + Rng>(
        base: &Channel,
        channel: Channel,
        seclvl: SecLevel,
        config: OtExtConfig,
        rng: &mut R,
    ) -> Result<Self, Error> {
        let rows = seclvl.num_base_ots();
        let s = BitVector::random(rows, rng);
        let choices: Vec<bool> = s.iter().collect();
        let mut base_ot = BaseOtReceiver::init(base)?;
        let keys = base_ot
            .receive(base, &choices, rng)?
            .iter()
            .map(|k| SymCipher::new(k, Mode::Ecb))
            .collect::<Result<_, _>>()?;
        debug!(rows, channel = channel.id(), "OT extension sender ready");
        Ok(Self {
            channel,
            config,
            state: Columns {
                s,
                keys,
                rows,
                hash: HashFunction::for_level(&seclvl),
                counter: 0,
            },
        })
    }

    /// Number of OTs (including padding) performed so far.
    pub(crate) fn counter(&self) -> u64 {
        self.state.counter
    }

    /// Performs all OTs of `task`.
    ///
    /// For general OT the task's messages are sent; for correlated and random
    /// OT they are filled in.
    #[instrument(level = Level::DEBUG, skip_all, fields(ots = task.num_ots, bitlen = task.bitlen), err)]
    pub(crate) fn run(&mut self, task: &mut OtTask) -> Result<(), Error> {
        let OtData::Sender { x0, x1 } = &mut task.data else {
            return Err(Error::violation("OT sender got a receiver task"));
        };
        if task.num_ots == 0 {
            return Ok(());
        }
        let bits = task.num_ots * task.bitlen;
        if x0.len() != bits || x1.len() != bits {
            return Err(Error::violation(format!(
                "OT messages of {} and {} bits, expected {bits}",
                x0.len(),
                x1.len()
            )));
        }
        // the id range is consumed even if the run fails, so a retry never reuses pads
        let layout = Layout::new(self.state.counter, task.num_ots, task.bitlen, self.state.rows);
        self.state.counter += layout.padded as u64;
        let workers = worker_count(&self.config, &layout);
        let queue = BlockQueue::new();
        let flavor = task.flavor;
        let masking = &*task.masking;

        let block_bytes = layout.block_bytes();
        let mut bufs: Vec<BlockBufs> = x0
            .buffer_mut()
            .chunks_mut(block_bytes)
            .zip(x1.buffer_mut().chunks_mut(block_bytes))
            .take(layout.num_blocks)
            .enumerate()
            .map(|(b, (c0, c1))| (b, c0, c1))
            .collect();

        thread::scope(|scope| -> Result<(), Error> {
            let mut inboxes: Vec<Sender<Vec<u8>>> = Vec::with_capacity(workers);
            for w in (0..workers).rev() {
                let range = layout.blocks_of(w, workers);
                let mine = bufs.split_off(range.start.min(bufs.len()));
                let (tx, rx) = mpsc::channel();
                inboxes.push(tx);
                let queue = &queue;
                let cols = &self.state;
                let layout = &layout;
                scope.spawn(move || cols.mask_blocks(layout, flavor, masking, mine, rx, queue));
            }
            inboxes.reverse();

            let mut seen = vec![false; layout.num_blocks];
            for _ in 0..layout.num_blocks {
                let msg = self.channel.recv("OT matrix")?;
                let (block, _, payload) = parse_block(&msg)?;
                if block >= layout.num_blocks
                    || std::mem::replace(&mut seen[block], true)
                    || msg.len() != layout.matrix_msg_len(block)
                    || payload.len() != self.state.rows * layout.block_len(block) / 8
                {
                    return Err(Error::violation(format!("malformed OT matrix for block {block}")));
                }
                inboxes[layout.worker_of(block, workers)]
                    .send(msg)
                    .map_err(|_| Error::Crypto("OT worker thread stopped".into()))?;
            }
            drop(inboxes);

            if flavor != OtFlavor::Random {
                for _ in 0..layout.num_blocks {
                    let msg = queue.pop()?;
                    self.channel.send("OT correction", msg)?;
                }
            }
            Ok(())
        })?;

        x0.clear_padding();
        x1.clear_padding();
        if self.config.verify {
            let mut msg = x0.as_bytes().to_vec();
            msg.extend_from_slice(x1.as_bytes());
            self.channel.send("OT verification", msg)?;
            let ok = self.channel.recv_exact("OT verification result", 1)?;
            if ok[0] != 1 {
                return Err(Error::violation("OT verification failed"));
            }
        }
        Ok(())
    }
}

impl Columns {
    /// Processes the matrix messages of the blocks in `bufs` as they arrive.
    fn mask_blocks(
        &self,
        layout: &Layout,
        flavor: OtFlavor,
        masking: &dyn MaskingFunction,
        mut bufs: Vec<BlockBufs>,
        inbox: Receiver<Vec<u8>>,
        queue: &BlockQueue,
    ) {
        while let Ok(msg) = inbox.recv() {
            let result = parse_block(&msg).and_then(|(block, _, u)| {
                let idx = bufs
                    .iter()
                    .position(|(b, _, _)| *b == block)
                    .ok_or_else(|| Error::violation(format!("duplicate OT matrix for block {block}")))?;
                let (_, x0, x1) = bufs.swap_remove(idx);
                let [p0, p1] = self.pads(layout, block, u);
                let real = layout.block_real(block);
                let correction = masking.mask(
                    flavor,
                    layout.block_start(block),
                    real,
                    layout.bitlen,
                    [p0.as_slice(), p1.as_slice()],
                    x0,
                    x1,
                );
                let mut msg = block_header(block, real);
                msg.extend_from_slice(&correction);
                Ok(msg)
            });
            if flavor != OtFlavor::Random || result.is_err() {
                queue.push(result);
            }
        }
    }

    /// Derives both pads of every OT of a block from the receiver's matrix `u`.
    fn pads(&self, layout: &Layout, block: usize, u: &[u8]) -> [Vec<u8>; 2] {
        let cols = layout.block_len(block);
        let row_bytes = cols / 8;
        let ctr = layout.prg_counter(block);

        let mut q = vec![0; layout.rows_pad * row_bytes];
        for (j, key) in self.keys.iter().enumerate() {
            let q_j = &mut q[j * row_bytes..(j + 1) * row_bytes];
            key.fill_ctr(ctr, q_j);
            if self.s.get_bit(j) {
                xor_bytes_inplace(q_j, &u[j * row_bytes..(j + 1) * row_bytes]);
            }
        }
        crate::transpose::eklundh_transpose(&mut q, layout.rows_pad, cols);

        let stride = layout.rows_pad / 8;
        let real = layout.block_real(block);
        let first = layout.block_start(block);
        let nbytes = (real * layout.bitlen).div_ceil(8);
        let (mut p0, mut p1) = (vec![0; nbytes], vec![0; nbytes]);
        let mut row = vec![0; stride];
        for i in 0..real {
            let id = layout.ot_id(first + i);
            row.copy_from_slice(&q[i * stride..(i + 1) * stride]);
            let seed0 = hash_row(self.hash, self.rows, id, &row);
            xor_bytes_inplace(&mut row, self.s.as_bytes());
            let seed1 = hash_row(self.hash, self.rows, id, &row);
            masking::expand(seed0, layout.bitlen, &mut p0, i * layout.bitlen);
            masking::expand(seed1, layout.bitlen, &mut p1, i * layout.bitlen);
        }
        [p0, p1]
    }
}
