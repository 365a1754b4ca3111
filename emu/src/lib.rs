// SPDX-License-Identifier: MIT
#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![allow(
    clippy::cast_possible_truncation,
    clippy::doc_markdown,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions,
    clippy::similar_names,
    clippy::struct_excessive_bools,
    clippy::too_many_lines
)]

//! A software TPM 1.2.
//!
//! The crate implements the command-dispatch engine of a v1.2 Trusted
//! Platform Module: one [`Tpm::execute`] call consumes a framed request and
//! produces the framed response, mutating the persistent state aggregate in
//! between. The host supplies three capabilities at construction time:
//! [`Crypto`] for the raw primitives, [`NvStore`] for the durable blobs and
//! [`Platform`] for physical presence, locality and GPIO.
//!
//! The model is single-threaded and cooperative; callers serialize commands.

mod admin;
pub mod buffer;
mod crypto;
mod dispatch;
pub mod key;
mod maint;
mod nvram;
mod nvstore;
pub mod pcr;
mod platform;
mod session;
mod state;
mod storage;
pub mod types;

pub use crypto::{Crypto, RsaKeyMaterial, RsaPrivate, RsaPublic, Sha1Ctx, SoftCrypto};
pub use nvstore::{FileNvStore, MemNvStore, NvKey, NvStore, NvStoreError};
pub use platform::{FixedPlatform, Platform};
pub use state::{Tpm, TpmOptions};
pub use types::{Ordinal, TpmRc, TpmResult};

/// Largest request or response frame the emulator accepts.
pub const MAX_COMMAND_SIZE: usize = 4096;

/// Number of platform configuration registers.
pub const NUM_PCRS: usize = 24;

/// Concurrent authorization session slots.
pub const MAX_AUTH_SESSIONS: usize = 16;

/// Loaded transient key slots.
pub const MAX_KEY_SLOTS: usize = 16;

/// Defined-space budget for the NV index table, measured over its
/// serialization.
pub const MAX_NV_SPACE: usize = 10 * 1024;

/// NV-mutating commands permitted before an owner is installed.
pub const MAX_NV_WRITE_NOOWNER: u32 = 64;

/// PC Client platform profile: admits the PC purview NV sub-range and the
/// GPIO window.
pub const PC_CLIENT_PROFILE: bool = true;

/// First GPIO NV index (PC Client). Accesses are delegated to [`Platform`].
pub const NV_INDEX_GPIO_START: u32 = 0x0001_1600;
/// Last GPIO NV index.
pub const NV_INDEX_GPIO_END: u32 = 0x0001_16FF;
