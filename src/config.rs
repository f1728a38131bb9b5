//! Settings of a [`crate::party::Party`].
use std::{fmt, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{crypto::SecLevel, error::Error};

/// How the arithmetic sharing generates its multiplication triples.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MtAlgorithm {
    /// Two correlated OT batches per triple (Gilboa).
    #[default]
    Ot,
    /// Additively homomorphic encryption with Paillier.
    Paillier,
    /// Additively homomorphic encryption with DGK.
    Dgk,
}

impl fmt::Display for MtAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Ot => "OT",
            Self::Paillier => "Paillier",
            Self::Dgk => "DGK",
        };
        f.write_str(name)
    }
}

/// Everything needed to connect a party and run circuits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PartyConfig {
    /// Security parameters of the base OTs, the OT extension and the hashes.
    pub seclvl: SecLevel,
    /// Bit length `l` of arithmetic shares, one of 8, 16, 32 or 64.
    pub arith_bitlen: usize,
    /// Number of worker threads per OT extension direction.
    pub num_ot_threads: usize,
    /// The server listens on this address, the client connects to it.
    pub address: String,
    /// TCP port of the server.
    pub port: u16,
    /// How often the client tries to reach the server.
    pub connect_retries: u32,
    /// Pause between two connection attempts.
    pub retry_backoff: Duration,
    /// How long to wait for a message of the peer.
    pub recv_timeout: Duration,
    /// Checks every OT batch against the sender's messages. Leaks both
    /// messages to the receiver, for debugging only.
    pub verify_ot: bool,
    /// Generator of the arithmetic multiplication triples. Only
    /// [`MtAlgorithm::Ot`] is implemented.
    pub mt_algorithm: MtAlgorithm,
}

impl Default for PartyConfig {
    fn default() -> Self {
        Self {
            seclvl: SecLevel::LT,
            arith_bitlen: 32,
            num_ot_threads: 2,
            address: "127.0.0.1".into(),
            port: 7766,
            connect_retries: 10,
            retry_backoff: Duration::from_millis(500),
            recv_timeout: Duration::from_secs(600),
            verify_ot: false,
            mt_algorithm: MtAlgorithm::Ot,
        }
    }
}

impl PartyConfig {
    /// Rejects settings the protocols cannot run with.
    pub fn validate(&self) -> Result<(), Error> {
        if !matches!(self.arith_bitlen, 8 | 16 | 32 | 64) {
            return Err(Error::InvalidConfig(format!(
                "arithmetic bit length must be 8, 16, 32 or 64, not {}",
                self.arith_bitlen
            )));
        }
        if self.num_ot_threads == 0 {
            return Err(Error::InvalidConfig("at least one OT thread is required".into()));
        }
        if self.seclvl.symbits < 80 || self.seclvl.symbits % 8 != 0 {
            return Err(Error::InvalidConfig(format!(
                "unsupported symmetric security of {} bits",
                self.seclvl.symbits
            )));
        }
        if self.recv_timeout.is_zero() {
            return Err(Error::InvalidConfig("the receive timeout must not be zero".into()));
        }
        if self.mt_algorithm != MtAlgorithm::Ot {
            return Err(Error::UnsupportedOperation(format!(
                "{} multiplication triple generation is not implemented",
                self.mt_algorithm
            )));
        }
        Ok(())
    }

    /// `address:port` of the server.
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        PartyConfig::default().validate().unwrap();
    }

    #[test]
    fn test_invalid_settings() {
        let bitlen = PartyConfig {
            arith_bitlen: 24,
            ..Default::default()
        };
        assert!(matches!(bitlen.validate(), Err(Error::InvalidConfig(_))));
        let threads = PartyConfig {
            num_ot_threads: 0,
            ..Default::default()
        };
        assert!(matches!(threads.validate(), Err(Error::InvalidConfig(_))));
        let timeout = PartyConfig {
            recv_timeout: Duration::ZERO,
            ..Default::default()
        };
        assert!(matches!(timeout.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_only_ot_triples_are_available() {
        for mt_algorithm in [MtAlgorithm::Paillier, MtAlgorithm::Dgk] {
            let config = PartyConfig {
                mt_algorithm,
                ..Default::default()
            };
            let err = config.validate().unwrap_err();
            assert!(matches!(&err, Error::UnsupportedOperation(msg) if msg.contains(&mt_algorithm.to_string())));
        }
        let bytes = bincode::serialize(&PartyConfig::default()).unwrap();
        let config: PartyConfig = bincode::deserialize(&bytes).unwrap();
        assert_eq!(MtAlgorithm::Ot, config.mt_algorithm);
    }

    #[test]
    fn test_config_survives_bincode() {
        let bytes = bincode::serialize(&PartyConfig {
            port: 1234,
            ..Default::default()
        })
        .unwrap();
        let config: PartyConfig = bincode::deserialize(&bytes).unwrap();
        assert_eq!(1234, config.port);
        assert_eq!("127.0.0.1:1234", config.socket_addr());
    }
}
