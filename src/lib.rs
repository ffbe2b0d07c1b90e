//! Passwordless account authentication with passkeys, plus a time-limited
//! emergency-recovery path for re-establishing a credential when all
//! passkeys are lost.
//!
//! The crate is the protocol engine only: challenge issuance and storage,
//! credential verification (registration and assertion), replay protection
//! via monotonic signature counters, step-up reauthentication, and expiring
//! single-use recovery tokens. The web transport, session cookie handling,
//! and email delivery plug in through the [`session::SessionStore`],
//! [`store`] and [`notify::RecoveryNotifier`] boundaries.

pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod notify;
pub mod policy;
pub mod services;
pub mod session;
pub mod store;
pub mod webauthn;

pub use config::Config;
pub use error::{Error, Result};
