//! TLS bootstrap for package runtimes.
//!
//! One root CA lives in a well-known secret; every function gets a server
//! leaf (DNS names = its service FQDNs) and every provider additionally a
//! client leaf (DNS name = its revision). Generation is idempotent: a leaf
//! secret is only written when one of its required keys is missing, and the
//! CA is only minted when its secret is absent or incomplete. Certificates
//! are never rotated unless a key is removed explicitly.

mod bootstrap;
mod error;

pub use bootstrap::{CertificateAuthority, LeafUsage, TlsBootstrap};
pub use error::TlsError;
