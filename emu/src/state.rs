// SPDX-License-Identifier: MIT

//! The persistent and volatile state aggregate, its three serialized blobs,
//! and the lifecycle transitions shared by the admin ordinals.

use log::{error, info};

use crate::buffer::{Cursor, StoreBuffer};
use crate::crypto::Sha1Ctx;
use crate::key::{Key, KeyStore, PubKey};
use crate::nvram::NvIndexTable;
use crate::nvstore::NvKey;
use crate::pcr::PcrBank;
use crate::session::AuthSessionTable;
use crate::types::{Digest, KeyFlags, Secret, TpmRc, TpmResult, DIGEST_SIZE};
use crate::{Crypto, NvStore, Platform};

use bitflags::bitflags;

/// Container tag of the `permanent` blob.
const TAG_PERMANENT_V1: u16 = 0x7001;
/// Container tag of the NV index table section.
const TAG_NVSTATE_NV_V2: u16 = 0x7002;
/// Container tag of the session-table section of `volatile`.
const TAG_SESSIONS_V1: u16 = 0x7003;
/// Container tag of the NV volatile-bit section of `volatile`.
const TAG_NV_INDEX_ENTRIES_VOLATILE_V1: u16 = 0x7004;
/// Container tag of the `savestate` blob.
const TAG_SAVESTATE_V1: u16 = 0x7005;

bitflags! {
    /// `TPM_PERMANENT_FLAGS`, bit-packed for NV parity.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
    pub struct PermanentFlags: u32 {
        const DISABLE = 0x0000_0001;
        const OWNERSHIP = 0x0000_0002;
        const DEACTIVATED = 0x0000_0004;
        const READ_PUBEK = 0x0000_0008;
        const DISABLE_OWNER_CLEAR = 0x0000_0010;
        const ALLOW_MAINTENANCE = 0x0000_0020;
        const PHYS_PRES_LIFETIME_LOCK = 0x0000_0040;
        const PHYS_PRES_HW_ENABLE = 0x0000_0080;
        const PHYS_PRES_CMD_ENABLE = 0x0000_0100;
        const CEKP_USED = 0x0000_0200;
        const TPM_POST = 0x0000_0400;
        const TPM_POST_LOCK = 0x0000_0800;
        const FIPS = 0x0000_1000;
        const OPERATOR = 0x0000_2000;
        const ENABLE_REVOKE_EK = 0x0000_4000;
        const NV_LOCKED = 0x0000_8000;
        const READ_SRK_PUB = 0x0001_0000;
        const TPM_ESTABLISHED = 0x0002_0000;
        const MAINTENANCE_DONE = 0x0004_0000;
    }
}

/// `TPM_PERMANENT_DATA`.
pub(crate) struct PermanentData {
    /// Binds non-migratable keys and sealed blobs to this TPM. Never leaves
    /// the device.
    pub tpm_proof: Secret,
    pub owner_auth: Secret,
    pub ek: Option<Key>,
    pub srk: Option<Key>,
    pub manu_maint_pub: Option<PubKey>,
    pub no_owner_nv_write: u32,
    pub auth_dir: Digest,
    pub allow_load_maint_pub: bool,
    pub owner_installed: bool,
    /// Ordinals folded into the audit digest.
    pub ordinal_audit: Vec<u32>,
}

impl PermanentData {
    fn fresh() -> Self {
        PermanentData {
            tpm_proof: Secret::zero(),
            owner_auth: Secret::zero(),
            ek: None,
            srk: None,
            manu_maint_pub: None,
            no_owner_nv_write: 0,
            auth_dir: [0u8; DIGEST_SIZE],
            allow_load_maint_pub: true,
            owner_installed: false,
            ordinal_audit: Vec::new(),
        }
    }

    fn store(&self, out: &mut StoreBuffer) -> TpmResult<()> {
        out.store_bytes(&self.tpm_proof.0)?;
        out.store_bytes(&self.owner_auth.0)?;
        match &self.ek {
            None => out.store_bool(false)?,
            Some(key) => {
                out.store_bool(true)?;
                key.store_internal(out)?;
            }
        }
        match &self.srk {
            None => out.store_bool(false)?,
            Some(key) => {
                out.store_bool(true)?;
                key.store_internal(out)?;
            }
        }
        match &self.manu_maint_pub {
            None => out.store_bool(false)?,
            Some(pubkey) => {
                out.store_bool(true)?;
                pubkey.store(out)?;
            }
        }
        out.store_u32(self.no_owner_nv_write)?;
        out.store_bytes(&self.auth_dir)?;
        out.store_bool(self.allow_load_maint_pub)?;
        out.store_bool(self.owner_installed)?;
        out.store_u32(self.ordinal_audit.len() as u32)?;
        for ord in &self.ordinal_audit {
            out.store_u32(*ord)?;
        }
        Ok(())
    }

    fn load(cur: &mut Cursor) -> TpmResult<Self> {
        let tpm_proof = cur.load_secret()?;
        let owner_auth = cur.load_secret()?;
        let ek = if cur.load_bool().map_err(|_| TpmRc::Fail)? {
            Some(Key::load_internal(cur)?)
        } else {
            None
        };
        let srk = if cur.load_bool().map_err(|_| TpmRc::Fail)? {
            Some(Key::load_internal(cur)?)
        } else {
            None
        };
        let manu_maint_pub = if cur.load_bool().map_err(|_| TpmRc::Fail)? {
            Some(PubKey::load(cur)?)
        } else {
            None
        };
        let no_owner_nv_write = cur.load_u32()?;
        let auth_dir = cur.load_digest()?;
        let allow_load_maint_pub = cur.load_bool().map_err(|_| TpmRc::Fail)?;
        let owner_installed = cur.load_bool().map_err(|_| TpmRc::Fail)?;
        let count = cur.load_u32()? as usize;
        let mut ordinal_audit = Vec::with_capacity(count.min(256));
        for _ in 0..count {
            ordinal_audit.push(cur.load_u32()?);
        }
        Ok(PermanentData {
            tpm_proof,
            owner_auth,
            ek,
            srk,
            manu_maint_pub,
            no_owner_nv_write,
            auth_dir,
            allow_load_maint_pub,
            owner_installed,
            ordinal_audit,
        })
    }
}

/// `TPM_STCLEAR_FLAGS`.
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct StClearFlags {
    pub deactivated: bool,
    pub disable_force_clear: bool,
    pub physical_presence: bool,
    pub global_lock: bool,
}

/// Volatile dictionary-attack bookkeeping.
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct StClearData {
    pub auth_failures: u32,
    pub defend_count: u32,
}

/// `TPM_STANY_FLAGS`.
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct StAnyFlags {
    pub locality_modifier: u8,
}

/// `TPM_STANY_DATA`.
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct StAnyData {
    pub audit_digest: Digest,
}

/// Self-test outcome; a failure latches until the next reset.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum TestState {
    Passed,
    Failure,
}

/// Construction-time options.
#[derive(Clone, Copy, Debug, Default)]
pub struct TpmOptions {
    /// Start with the FIPS flag set, tightening key-property checks.
    pub fips: bool,
}

/// The emulator: one instance is one TPM.
pub struct Tpm {
    pub(crate) crypto: Box<dyn Crypto>,
    pub(crate) nvstore: Box<dyn NvStore>,
    pub(crate) platform: Box<dyn Platform>,
    pub(crate) permanent_flags: PermanentFlags,
    pub(crate) permanent: PermanentData,
    pub(crate) stclear_flags: StClearFlags,
    pub(crate) stclear: StClearData,
    pub(crate) stany_flags: StAnyFlags,
    pub(crate) stany: StAnyData,
    pub(crate) pcrs: PcrBank,
    pub(crate) keys: KeyStore,
    pub(crate) sessions: AuthSessionTable,
    pub(crate) nv: NvIndexTable,
    pub(crate) sha1_thread: Option<Sha1Ctx>,
    pub(crate) test_state: TestState,
    pub(crate) post_init: bool,
}

impl Tpm {
    /// Power-on construction: load the permanent blob (or initialize a
    /// fresh device) and wait for `TPM_Startup`.
    pub fn new(
        crypto: Box<dyn Crypto>,
        nvstore: Box<dyn NvStore>,
        platform: Box<dyn Platform>,
        options: TpmOptions,
    ) -> TpmResult<Tpm> {
        let mut tpm = Tpm {
            crypto,
            nvstore,
            platform,
            permanent_flags: Self::default_flags(options),
            permanent: PermanentData::fresh(),
            stclear_flags: StClearFlags::default(),
            stclear: StClearData::default(),
            stany_flags: StAnyFlags::default(),
            stany: StAnyData::default(),
            pcrs: PcrBank::new(),
            keys: KeyStore::new(),
            sessions: AuthSessionTable::new(),
            nv: NvIndexTable::new(),
            sha1_thread: None,
            test_state: TestState::Passed,
            post_init: true,
        };
        tpm.init()?;
        Ok(tpm)
    }

    fn default_flags(options: TpmOptions) -> PermanentFlags {
        let mut flags =
            PermanentFlags::OWNERSHIP | PermanentFlags::READ_PUBEK | PermanentFlags::ALLOW_MAINTENANCE;
        if options.fips {
            flags.insert(PermanentFlags::FIPS);
        }
        flags
    }

    /// Power cycle: reload the permanent blob and reset all volatile state.
    /// The next command must be `TPM_Startup`.
    pub fn init(&mut self) -> TpmResult<()> {
        match self.nvstore.read(NvKey::Permanent) {
            Ok(Some(blob)) => self.load_permanent_blob(&blob)?,
            Ok(None) => info!("init: no permanent state, fresh device"),
            Err(e) => {
                error!("init: {e}");
                return Err(TpmRc::IoError);
            }
        }
        self.volatile_reset();
        self.run_self_test();
        self.post_init = true;
        Ok(())
    }

    /// Known-answer check of the hash core; a miss latches the failure
    /// state.
    pub(crate) fn run_self_test(&mut self) {
        let digest = self.crypto.sha1(&[b"abc"]);
        let expected: Digest = [
            0xa9, 0x99, 0x3e, 0x36, 0x47, 0x06, 0x81, 0x6a, 0xba, 0x3e, 0x25, 0x71, 0x78, 0x50,
            0xc2, 0x6c, 0x9c, 0xd0, 0xd8, 0x9d,
        ];
        self.test_state = if digest == expected {
            TestState::Passed
        } else {
            error!("self test: SHA-1 known answer mismatch");
            TestState::Failure
        };
    }

    /// Reset everything outside the permanent blob.
    pub(crate) fn volatile_reset(&mut self) {
        self.stclear_flags = StClearFlags {
            deactivated: self.permanent_flags.contains(PermanentFlags::DEACTIVATED),
            ..StClearFlags::default()
        };
        self.stclear = StClearData::default();
        self.stany_flags = StAnyFlags::default();
        self.stany = StAnyData::default();
        self.pcrs.reset();
        self.keys.clear();
        self.sessions.clear();
        self.nv.clear_volatile();
        self.sha1_thread = None;
    }

    pub(crate) fn serialize_permanent(&self) -> TpmResult<Vec<u8>> {
        let mut out = StoreBuffer::new();
        out.store_u16(TAG_PERMANENT_V1)?;
        out.store_u32(self.permanent_flags.bits())?;
        self.permanent.store(&mut out)?;
        out.store_u16(TAG_NVSTATE_NV_V2)?;
        self.nv.store(&mut out)?;
        Ok(out.into_vec())
    }

    pub(crate) fn load_permanent_blob(&mut self, blob: &[u8]) -> TpmResult<()> {
        let mut cur = Cursor::new(blob);
        cur.load_tag(TAG_PERMANENT_V1).map_err(|_| TpmRc::Fail)?;
        let flags = PermanentFlags::from_bits_retain(cur.load_u32()?);
        let permanent = PermanentData::load(&mut cur)?;
        cur.load_tag(TAG_NVSTATE_NV_V2).map_err(|_| TpmRc::Fail)?;
        let nv = NvIndexTable::load(&mut cur)?;
        cur.expect_end().map_err(|_| TpmRc::Fail)?;
        self.permanent_flags = flags;
        self.permanent = permanent;
        self.nv = nv;
        Ok(())
    }

    /// Durably commit permanent flags, data and the NV table. Success of a
    /// mutating ordinal implies this has happened.
    pub(crate) fn flush_permanent(&mut self) -> TpmResult<()> {
        let blob = self.serialize_permanent()?;
        self.nvstore.write(NvKey::Permanent, &blob).map_err(|e| {
            error!("flush_permanent: {e}");
            TpmRc::Fail
        })
    }

    pub(crate) fn serialize_volatile(&self) -> TpmResult<Vec<u8>> {
        let mut out = StoreBuffer::new();
        out.store_u16(TAG_SESSIONS_V1)?;
        self.sessions.store(&mut out)?;
        out.store_u16(TAG_NV_INDEX_ENTRIES_VOLATILE_V1)?;
        self.nv.store_volatile(&mut out)?;
        Ok(out.into_vec())
    }

    pub(crate) fn load_volatile_blob(&mut self, blob: &[u8]) -> TpmResult<()> {
        let mut cur = Cursor::new(blob);
        cur.load_tag(TAG_SESSIONS_V1).map_err(|_| TpmRc::Fail)?;
        self.sessions = AuthSessionTable::load(&mut cur)?;
        cur.load_tag(TAG_NV_INDEX_ENTRIES_VOLATILE_V1)
            .map_err(|_| TpmRc::Fail)?;
        self.nv.load_volatile(&mut cur)?;
        cur.expect_end().map_err(|_| TpmRc::Fail)
    }

    pub(crate) fn serialize_savestate(&self) -> TpmResult<Vec<u8>> {
        let mut out = StoreBuffer::new();
        out.store_u16(TAG_SAVESTATE_V1)?;
        out.store_bool(self.stclear_flags.deactivated)?;
        out.store_bool(self.stclear_flags.disable_force_clear)?;
        out.store_bool(self.stclear_flags.physical_presence)?;
        out.store_bool(self.stclear_flags.global_lock)?;
        out.store_u32(self.stclear.auth_failures)?;
        out.store_u32(self.stclear.defend_count)?;
        out.store_u8(self.stany_flags.locality_modifier)?;
        out.store_bytes(&self.stany.audit_digest)?;
        match &self.sha1_thread {
            None => out.store_bool(false)?,
            Some(ctx) => {
                out.store_bool(true)?;
                ctx.save(&mut out)?;
            }
        }
        for i in 0..crate::NUM_PCRS {
            out.store_bytes(&self.pcrs.read(i as u32)?)?;
        }
        let volatile_keys: Vec<_> = self
            .keys
            .entries()
            .filter(|e| e.key.flags.contains(KeyFlags::VOLATILE))
            .collect();
        out.store_u32(volatile_keys.len() as u32)?;
        for entry in volatile_keys {
            out.store_u32(entry.handle)?;
            out.store_bool(entry.parent_pcr_status)?;
            entry.key.store_internal(&mut out)?;
        }
        Ok(out.into_vec())
    }

    pub(crate) fn load_savestate_blob(&mut self, blob: &[u8]) -> TpmResult<()> {
        let mut cur = Cursor::new(blob);
        cur.load_tag(TAG_SAVESTATE_V1).map_err(|_| TpmRc::Fail)?;
        self.stclear_flags.deactivated = cur.load_bool().map_err(|_| TpmRc::Fail)?;
        self.stclear_flags.disable_force_clear = cur.load_bool().map_err(|_| TpmRc::Fail)?;
        self.stclear_flags.physical_presence = cur.load_bool().map_err(|_| TpmRc::Fail)?;
        self.stclear_flags.global_lock = cur.load_bool().map_err(|_| TpmRc::Fail)?;
        self.stclear.auth_failures = cur.load_u32()?;
        self.stclear.defend_count = cur.load_u32()?;
        self.stany_flags.locality_modifier = cur.load_u8()?;
        self.stany.audit_digest = cur.load_digest()?;
        self.sha1_thread = if cur.load_bool().map_err(|_| TpmRc::Fail)? {
            Some(Sha1Ctx::restore(&mut cur)?)
        } else {
            None
        };
        let mut bank = PcrBank::new();
        for i in 0..crate::NUM_PCRS {
            let value = cur.load_digest()?;
            bank.set(i, value);
        }
        self.pcrs = bank;
        let count = cur.load_u32()? as usize;
        if count > crate::MAX_KEY_SLOTS {
            return Err(TpmRc::Fail);
        }
        self.keys.clear();
        for _ in 0..count {
            let handle = cur.load_u32()?;
            let parent_pcr_status = cur.load_bool().map_err(|_| TpmRc::Fail)?;
            let key = Key::load_internal(&mut cur)?;
            self.keys.restore(handle, key, parent_pcr_status);
        }
        cur.expect_end().map_err(|_| TpmRc::Fail)
    }

    /// Common path shared by `TPM_OwnerClear` and the maintenance-archive
    /// load: wipe the owner, the storage hierarchy root and the proof.
    pub(crate) fn owner_clear_common(&mut self, delete_d_indexes: bool) {
        info!("owner clear");
        self.permanent.owner_installed = false;
        self.permanent.owner_auth = Secret::zero();
        self.permanent.srk = None;
        self.permanent.tpm_proof = Secret::from_slice(&self.crypto.rand(DIGEST_SIZE));
        self.permanent.auth_dir = [0u8; DIGEST_SIZE];
        self.permanent.no_owner_nv_write = 0;
        self.permanent_flags.remove(
            PermanentFlags::DISABLE_OWNER_CLEAR | PermanentFlags::READ_SRK_PUB,
        );
        self.permanent_flags.insert(PermanentFlags::READ_PUBEK);
        self.keys.clear();
        self.sessions.clear();
        self.nv.delete_owner_authorized(delete_d_indexes);
    }

    pub(crate) fn audit_enabled(&self, ordinal: u32) -> bool {
        self.permanent.ordinal_audit.contains(&ordinal)
    }

    /// Running audit digest over all audited commands this cycle.
    #[must_use]
    pub fn audit_digest(&self) -> Digest {
        self.stany.audit_digest
    }

    /// Whether a TPM owner is installed.
    #[must_use]
    pub fn owner_installed(&self) -> bool {
        self.permanent.owner_installed
    }
}
