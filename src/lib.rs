//! A Rust implementation of mixed-protocol secure two-party computation in the style of [ABY: A
//! Framework for Efficient Mixed-Protocol Secure Two-Party
//! Computation](https://www.ndss-symposium.org/ndss2015/aby---framework-efficient-mixed-protocol-secure-two-party-computation).
//!
//! A server and a client jointly evaluate a circuit on their private inputs, revealing only the
//! outputs. Every gate of the circuit lives in one of three sharings, and conversion gates move
//! values between them:
//!
//! - **Boolean sharing** (GMW): bits are XOR-shared, AND gates use multiplication triples.
//! - **Yao sharing**: the server garbles the circuit (free XOR and half gates), the client
//!   evaluates it without interaction.
//! - **Arithmetic sharing**: values are additively shared modulo `2^l`, multiplications use
//!   arithmetic triples.
//!
//! All triples and key transfers are derived from an IKNP-style OT extension, which is run in an
//! input-independent setup phase.
//!
//! ## Main Components
//!
//! * [`party`]: The [`party::Party`], which connects to the peer and executes circuits.
//! * [`circuit`]: The gate arena and the builders for the three sharings.
//! * [`config`]: Settings of a party, such as the security level and the arithmetic bit length.
//! * [`crypto`]: Security levels, the PRG, hashing and AES.
//!
//! ## Example
//!
//! Both parties build the same circuit, but only the owner of an input knows its value:
//!
//! ```no_run
//! use aby::{
//!     circuit::{Circuit, Recipients, Role},
//!     config::PartyConfig,
//!     party::Party,
//! };
//!
//! # fn example() -> Result<(), aby::error::Error> {
//! let mut party = Party::connect(Role::Server, PartyConfig::default())?;
//! let circ = party.circuits_mut();
//! let mut gmw = circ.boolean();
//! let mine = gmw.put_in_gate(500, 32, Role::Server)?;
//! let theirs = gmw.put_dummy_in_gate(1, 32, Role::Client)?;
//! let gt = gmw.put_gt_gate(&mine, &theirs)?;
//! let out = gmw.put_out_gate(&gt, Recipients::All)?;
//! party.exec_circuit()?;
//! println!("server is richer: {}", out.clear_value(party.circuits())? == 1);
//! # Ok(())
//! # }
//! ```
//!
//! ## Security Properties
//!
//! The protocols are secure against semi-honest adversaries only: a party that deviates from the
//! protocol may learn the other party's inputs.
#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

pub mod bitvec;
pub mod block;
pub mod channel;
pub mod circuit;
pub mod config;
pub mod crypto;
pub mod error;
pub mod party;

mod ot;
mod setup;
mod sharing;
mod transpose;
mod utils;

#[cfg(feature = "__bench")]
#[doc(hidden)]
pub mod bench_reexports;
