//! `secretfriend` pairs participants of a secret friend exchange and relays
//! mail between partners without revealing their addresses.
//!
//! The core is the pairing store:
//! - a line-oriented record file holding every pair and at most one pending slot
//! - advisory `flock` locking so independent processes can share it
//! - a resolver that answers "who is my partner?" and registers newcomers
//!
//! Around it sit the mail pieces used by the `secretfriend` binary.

/// Error taxonomy of the pairing store.
pub mod error;
/// Random ids for generated `Message-Id` headers.
pub mod id;
/// Shared/exclusive advisory locks on the store file.
pub mod lock;
/// Header parsing and address rewriting.
pub mod mail;
/// Welcome and match notification templates.
pub mod notify;
/// Store line format and the pairing index.
pub mod record;
/// Per-message relay pipeline.
pub mod relay;
/// Partner resolution.
pub mod resolver;
/// Delivery through the local MTA.
pub mod sendmail;
/// The store file and its mutations.
pub mod store;

pub use error::StoreError;
pub use resolver::{resolve, Resolution};
