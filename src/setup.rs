//! The input-independent setup phase.
//!
//! Each party runs an OT extension sender and an OT extension receiver: on
//! channel [`OT_SERVER_SENDS_CHANNEL`] the server is the sender, on
//! [`OT_CLIENT_SENDS_CHANNEL`] the client. The sharings register the OTs they
//! need as [`OtTask`]s, which are then executed in registration order, both
//! directions in parallel.
use std::thread;

use rand::{CryptoRng, Rng};
use tracing::{Level, debug, instrument};

use crate::{
    channel::{
        ABY_SETUP_CHANNEL, Channel, Connection, OT_ADMIN_CHANNEL, OT_CLIENT_SENDS_CHANNEL,
        OT_SERVER_SENDS_CHANNEL,
    },
    circuit::Role,
    crypto::SecLevel,
    error::Error,
    ot::{OtData, OtExtConfig, OtExtReceiver, OtExtSender, OtTask},
};

/// Refers to an OT task registered with [`Setup::add_ot_task`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum OtHandle {
    Send(usize),
    Receive(usize),
}

/// OT extension in both directions plus a channel for bulk setup data.
pub(crate) struct Setup {
    role: Role,
    channel: Channel,
    sender: OtExtSender,
    receiver: OtExtReceiver,
    send_tasks: Vec<Option<OtTask>>,
    recv_tasks: Vec<Option<OtTask>>,
}

impl std::fmt::Debug for Setup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Setup")
            .field("role", &self.role)
            .field("send_tasks", &self.send_tasks.len())
            .field("recv_tasks", &self.recv_tasks.len())
            .finish_non_exhaustive()
    }
}

impl Setup {
    /// Runs the base OTs for both directions.
    #[instrument(level = Level::DEBUG, skip_all, fields(%role), err)]
    pub(crate) fn new<R: CryptoRng + Rng>(
        conn: &Connection,
        role: Role,
        seclvl: SecLevel,
        config: OtExtConfig,
        rng: &mut R,
    ) -> Result<Self, Error> {
        let base = conn.channel(OT_ADMIN_CHANNEL)?;
        let server_sends = conn.channel(OT_SERVER_SENDS_CHANNEL)?;
        let client_sends = conn.channel(OT_CLIENT_SENDS_CHANNEL)?;
        let (sender, receiver) = match role {
            Role::Server => {
                let sender = OtExtSender::setup(&base, server_sends, seclvl, config, rng)?;
                let receiver = OtExtReceiver::setup(&base, client_sends, seclvl, config, rng)?;
                (sender, receiver)
            }
            Role::Client => {
                let receiver = OtExtReceiver::setup(&base, server_sends, seclvl, config, rng)?;
                let sender = OtExtSender::setup(&base, client_sends, seclvl, config, rng)?;
                (sender, receiver)
            }
        };
        Ok(Self {
            role,
            channel: conn.channel(ABY_SETUP_CHANNEL)?,
            sender,
            receiver,
            send_tasks: vec![],
            recv_tasks: vec![],
        })
    }

    /// Queues a batch of OTs. The peer must register the matching task of the
    /// other side at the same position.
    pub(crate) fn add_ot_task(&mut self, task: OtTask) -> OtHandle {
        match task.data {
            OtData::Sender { .. } => {
                self.send_tasks.push(Some(task));
                OtHandle::Send(self.send_tasks.len() - 1)
            }
            OtData::Receiver { .. } => {
                self.recv_tasks.push(Some(task));
                OtHandle::Receive(self.recv_tasks.len() - 1)
            }
        }
    }

    /// Runs all queued OT tasks.
    #[instrument(level = Level::DEBUG, skip_all, err)]
    pub(crate) fn perform_ots(&mut self) -> Result<(), Error> {
        let Self {
            sender,
            receiver,
            send_tasks,
            recv_tasks,
            ..
        } = self;
        debug!(send = send_tasks.len(), receive = recv_tasks.len(), "running OT tasks");
        thread::scope(|scope| {
            let sending = scope.spawn(move || -> Result<(), Error> {
                for task in send_tasks.iter_mut().flatten() {
                    sender.run(task)?;
                }
                Ok(())
            });
            let receiving = scope.spawn(move || -> Result<(), Error> {
                for task in recv_tasks.iter_mut().flatten() {
                    receiver.run(task)?;
                }
                Ok(())
            });
            let sent = sending
                .join()
                .map_err(|_| Error::violation("OT sender thread panicked"))?;
            let received = receiving
                .join()
                .map_err(|_| Error::violation("OT receiver thread panicked"))?;
            sent.and(received)
        })
    }

    /// Takes the results of a finished task.
    pub(crate) fn take_ot_task(&mut self, handle: OtHandle) -> Result<OtTask, Error> {
        let slot = match handle {
            OtHandle::Send(i) => self.send_tasks.get_mut(i),
            OtHandle::Receive(i) => self.recv_tasks.get_mut(i),
        };
        slot.and_then(Option::take)
            .ok_or_else(|| Error::violation(format!("no OT task {handle:?}")))
    }

    /// Sends bulk setup data to the peer.
    pub(crate) fn send(&self, data: Vec<u8>) -> Result<(), Error> {
        Ok(self.channel.send("setup data", data)?)
    }

    /// Receives `len` bytes of setup data.
    pub(crate) fn receive(&self, len: usize) -> Result<Vec<u8>, Error> {
        let data = self.channel.recv("setup data")?;
        if data.len() == len {
            Ok(data)
        } else {
            Err(Error::violation(format!(
                "received {} bytes of setup data, expected {len}",
                data.len()
            )))
        }
    }

    /// Drops all tasks, keeping the OT extension state.
    pub(crate) fn reset(&mut self) {
        self.send_tasks.clear();
        self.recv_tasks.clear();
    }
}
