//! Receiver side of the OT extension.
use std::thread;

use rand::{CryptoRng, Rng};
use tracing::{Level, debug, instrument};

use super::{BlockQueue, Layout, OtData, OtExtConfig, OtTask, block_header, hash_row, parse_block, worker_count};
use crate::{
    bitvec::get_bit,
    channel::Channel,
    crypto::{HashFunction, Mode, SecLevel, SymCipher},
    error::Error,
    ot::{OtFlavor, base::BaseOtSender},
    utils::xor_bytes_inplace,
};

/// Extends base OTs where this party chooses.
///
/// During setup the roles of the base OTs are swapped: the extension receiver
/// sends a random key pair for every row of the OT matrix.
pub(crate) struct OtExtReceiver {
    channel: Channel,
    config: OtExtConfig,
    state: Rows,
}

/// The base OT keys; shared read-only with the worker threads.
struct Rows {
    keys: Vec<[SymCipher; 2]>,
    rows: usize,
    hash: HashFunction,
    counter: u64,
}

impl OtExtReceiver {
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
        let key_bytes = seclvl.aes_key_bytes();
        let mut pairs = Vec::with_capacity(rows);
        for _ in 0..rows {
            let mut k0 = vec![0; key_bytes];
            let mut k1 = vec![0; key_bytes];
            rng.fill_bytes(&mut k0);
            rng.fill_bytes(&mut k1);
            pairs.push((k0, k1));
        }
        let mut base_ot = BaseOtSender::init(base, rng)?;
        base_ot.send(base, &pairs)?;
        let keys = pairs
            .iter()
            .map(|(k0, k1)| Ok([SymCipher::new(k0, Mode::Ecb)?, SymCipher::new(k1, Mode::Ecb)?]))
            .collect::<Result<_, Error>>()?;
        debug!(rows, channel = channel.id(), "OT extension receiver ready");
        Ok(Self {
            channel,
            config,
            state: Rows {
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

    /// Performs all OTs of `task` and writes the chosen messages into its output.
    #[instrument(level = Level::DEBUG, skip_all, fields(ots = task.num_ots, bitlen = task.bitlen), err)]
    pub(crate) fn run(&mut self, task: &mut OtTask) -> Result<(), Error> {
        let OtData::Receiver { choices, output } = &mut task.data else {
            return Err(Error::violation("OT receiver got a sender task"));
        };
        if task.num_ots == 0 {
            return Ok(());
        }
        if choices.len() != task.num_ots {
            return Err(Error::violation(format!(
                "{} choice bits for {} OTs",
                choices.len(),
                task.num_ots
            )));
        }
        // the id range is consumed even if the run fails, so a retry never reuses pads
        let layout = Layout::new(self.state.counter, task.num_ots, task.bitlen, self.state.rows);
        self.state.counter += layout.padded as u64;
        let workers = worker_count(&self.config, &layout);
        let queue = BlockQueue::new();
        let choice_bytes = choices.buffer();

        let pads = thread::scope(|scope| -> Result<Vec<Vec<u8>>, Error> {
            let handles: Vec<_> = (0..workers)
                .map(|w| {
                    let queue = &queue;
                    let rows = &self.state;
                    let layout = &layout;
                    scope.spawn(move || {
                        let mut pads = vec![];
                        for block in layout.blocks_of(w, workers) {
                            let (msg, pad) = rows.expand_block(layout, block, choice_bytes);
                            queue.push(Ok(msg));
                            pads.push(pad);
                        }
                        pads
                    })
                })
                .collect();
            for _ in 0..layout.num_blocks {
                let msg = queue.pop()?;
                self.channel.send("OT matrix", msg)?;
            }
            let mut pads = Vec::with_capacity(layout.num_blocks);
            for h in handles {
                let worker_pads = h
                    .join()
                    .map_err(|_| Error::Crypto("OT worker thread panicked".into()))?;
                pads.extend(worker_pads);
            }
            Ok(pads)
        })?;

        let out = output.buffer_mut();
        let block_bytes = layout.block_bytes();
        if task.flavor == OtFlavor::Random {
            for (block, pad) in pads.iter().enumerate() {
                let nbytes = (layout.block_real(block) * task.bitlen).div_ceil(8);
                let start = block * block_bytes;
                out[start..start + nbytes].copy_from_slice(&pad[..nbytes]);
            }
        } else {
            for _ in 0..layout.num_blocks {
                let msg = self.channel.recv("OT correction")?;
                let (block, processed, payload) = parse_block(&msg)?;
                if block >= layout.num_blocks || processed != layout.block_real(block) {
                    return Err(Error::violation(format!(
                        "unexpected OT correction for block {block} ({processed} OTs)"
                    )));
                }
                let first = layout.block_start(block);
                task.masking.unmask(
                    task.flavor,
                    processed,
                    task.bitlen,
                    &choice_bytes[first / 8..],
                    &pads[block],
                    payload,
                    &mut out[block * block_bytes..],
                )?;
            }
        }
        output.clear_padding();

        if self.config.verify {
            self.verify(task)?;
        }
        Ok(())
    }

    fn verify(&self, task: &OtTask) -> Result<(), Error> {
        let OtData::Receiver { choices, output } = &task.data else {
            return Ok(());
        };
        let nbytes = (task.num_ots * task.bitlen).div_ceil(8);
        let msg = self.channel.recv_exact("OT verification", 2 * nbytes)?;
        let (x0, x1) = msg.split_at(nbytes);
        let mut ok = true;
        for i in 0..task.num_ots {
            let x = if choices.get_bit(i) { x1 } else { x0 };
            for b in i * task.bitlen..(i + 1) * task.bitlen {
                ok &= get_bit(x, b) == output.get_bit(b);
            }
        }
        self.channel.send("OT verification result", vec![u8::from(ok)])?;
        if ok {
            Ok(())
        } else {
            Err(Error::violation("OT verification failed"))
        }
    }
}

impl Rows {
    /// Computes the matrix message `u` of one block and the receiver's pads.
    fn expand_block(&self, layout: &Layout, block: usize, choices: &[u8]) -> (Vec<u8>, Vec<u8>) {
        let cols = layout.block_len(block);
        let row_bytes = cols / 8;
        let first = layout.block_start(block);
        let r = &choices[first / 8..first / 8 + row_bytes];
        let ctr = layout.prg_counter(block);

        let mut msg = block_header(block, layout.block_real(block));
        msg.reserve(self.rows * row_bytes);
        let mut t = vec![0; layout.rows_pad * row_bytes];
        let mut g1 = vec![0; row_bytes];
        for (j, [k0, k1]) in self.keys.iter().enumerate() {
            let t_j = &mut t[j * row_bytes..(j + 1) * row_bytes];
            k0.fill_ctr(ctr, t_j);
            k1.fill_ctr(ctr, &mut g1);
            xor_bytes_inplace(&mut g1, t_j);
            xor_bytes_inplace(&mut g1, r);
            msg.extend_from_slice(&g1);
        }

        crate::transpose::eklundh_transpose(&mut t, layout.rows_pad, cols);
        let stride = layout.rows_pad / 8;
        let real = layout.block_real(block);
        let mut pad = vec![0; (real * layout.bitlen).div_ceil(8)];
        for i in 0..real {
            let id = layout.ot_id(first + i);
            let seed = hash_row(self.hash, self.rows, id, &t[i * stride..(i + 1) * stride]);
            super::masking::expand(seed, layout.bitlen, &mut pad, i * layout.bitlen);
        }
        (msg, pad)
    }
}
