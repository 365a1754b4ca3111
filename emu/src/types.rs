// SPDX-License-Identifier: MIT

//! TPM 1.2 protocol constants.
//!
//! Numeric values follow the TPM 1.2 Structures specification rev 103 and
//! must stay bit-exact for host interoperability.

use bitflags::bitflags;
use core::fmt;
use strum_macros::FromRepr;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// SHA-1 output, also the size of every nonce and secret.
pub const DIGEST_SIZE: usize = 20;

/// A SHA-1 digest.
pub type Digest = [u8; DIGEST_SIZE];

/// A rolling-protocol nonce.
pub type Nonce = [u8; DIGEST_SIZE];

/// A 20-byte authorization value. Backing memory is wiped on drop.
#[derive(Clone, Default, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct Secret(pub [u8; DIGEST_SIZE]);

impl Secret {
    #[must_use]
    pub fn zero() -> Self {
        Secret([0u8; DIGEST_SIZE])
    }

    #[must_use]
    pub fn from_slice(bytes: &[u8]) -> Self {
        let mut s = Secret::zero();
        s.0.copy_from_slice(bytes);
        s
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Secret(..)")
    }
}

/// Result alias used by every handler; the error is the wire return code.
pub type TpmResult<T> = Result<T, TpmRc>;

/// `TPM_TAG_RQU_COMMAND`
pub const TAG_RQU_COMMAND: u16 = 0x00C1;
/// `TPM_TAG_RQU_AUTH1_COMMAND`
pub const TAG_RQU_AUTH1_COMMAND: u16 = 0x00C2;
/// `TPM_TAG_RQU_AUTH2_COMMAND`
pub const TAG_RQU_AUTH2_COMMAND: u16 = 0x00C3;
/// `TPM_TAG_RSP_COMMAND`
pub const TAG_RSP_COMMAND: u16 = 0x00C4;
/// `TPM_TAG_RSP_AUTH1_COMMAND`
pub const TAG_RSP_AUTH1_COMMAND: u16 = 0x00C5;
/// `TPM_TAG_RSP_AUTH2_COMMAND`
pub const TAG_RSP_AUTH2_COMMAND: u16 = 0x00C6;

/// Request tag, carrying the number of trailing authorization blocks.
#[derive(FromRepr, Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u16)]
pub enum RequestTag {
    /// `TPM_TAG_RQU_COMMAND`
    Command = TAG_RQU_COMMAND,
    /// `TPM_TAG_RQU_AUTH1_COMMAND`
    Auth1 = TAG_RQU_AUTH1_COMMAND,
    /// `TPM_TAG_RQU_AUTH2_COMMAND`
    Auth2 = TAG_RQU_AUTH2_COMMAND,
}

impl RequestTag {
    /// Number of authorization blocks the tag announces.
    #[must_use]
    pub fn auth_count(self) -> usize {
        match self {
            RequestTag::Command => 0,
            RequestTag::Auth1 => 1,
            RequestTag::Auth2 => 2,
        }
    }

    /// Matching response tag.
    #[must_use]
    pub fn response_tag(self) -> u16 {
        match self {
            RequestTag::Command => TAG_RSP_COMMAND,
            RequestTag::Auth1 => TAG_RSP_AUTH1_COMMAND,
            RequestTag::Auth2 => TAG_RSP_AUTH2_COMMAND,
        }
    }
}

/// `TPM_TAG_PCR_INFO_LONG`
pub const TAG_PCR_INFO_LONG: u16 = 0x0006;
/// `TPM_TAG_STORED_DATA12`
pub const TAG_STORED_DATA12: u16 = 0x0016;
/// `TPM_TAG_NV_ATTRIBUTES`
pub const TAG_NV_ATTRIBUTES: u16 = 0x0017;
/// `TPM_TAG_NV_DATA_PUBLIC`
pub const TAG_NV_DATA_PUBLIC: u16 = 0x0018;
/// `TPM_TAG_NV_DATA_SENSITIVE`
pub const TAG_NV_DATA_SENSITIVE: u16 = 0x0019;
/// `TPM_TAG_KEY12`
pub const TAG_KEY12: u16 = 0x0028;

/// Enumeration of the `TPM_ORD` values in scope.
///
/// The possible values for `TPM_ORD` are described in section 17 of the
/// TPM 1.2 Structures specification.
#[derive(FromRepr, Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum Ordinal {
    /// `TPM_ORD_OIAP`
    Oiap = 0x0000_000A,
    /// `TPM_ORD_OSAP`
    Osap = 0x0000_000B,
    /// `TPM_ORD_TakeOwnership`
    TakeOwnership = 0x0000_000D,
    /// `TPM_ORD_ChangeAuthOwner`
    ChangeAuthOwner = 0x0000_0010,
    /// `TPM_ORD_Extend`
    Extend = 0x0000_0014,
    /// `TPM_ORD_PcrRead`
    PcrRead = 0x0000_0015,
    /// `TPM_ORD_Seal`
    Seal = 0x0000_0017,
    /// `TPM_ORD_Unseal`
    Unseal = 0x0000_0018,
    /// `TPM_ORD_DirWriteAuth`
    DirWriteAuth = 0x0000_0019,
    /// `TPM_ORD_DirRead`
    DirRead = 0x0000_001A,
    /// `TPM_ORD_UnBind`
    UnBind = 0x0000_001E,
    /// `TPM_ORD_CreateWrapKey`
    CreateWrapKey = 0x0000_001F,
    /// `TPM_ORD_LoadKey`
    LoadKey = 0x0000_0020,
    /// `TPM_ORD_GetPubKey`
    GetPubKey = 0x0000_0021,
    /// `TPM_ORD_EvictKey`
    EvictKey = 0x0000_0022,
    /// `TPM_ORD_CreateMaintenanceArchive`
    CreateMaintenanceArchive = 0x0000_002C,
    /// `TPM_ORD_LoadMaintenanceArchive`
    LoadMaintenanceArchive = 0x0000_002D,
    /// `TPM_ORD_KillMaintenanceFeature`
    KillMaintenanceFeature = 0x0000_002E,
    /// `TPM_ORD_LoadManuMaintPub`
    LoadManuMaintPub = 0x0000_002F,
    /// `TPM_ORD_ReadManuMaintPub`
    ReadManuMaintPub = 0x0000_0030,
    /// `TPM_ORD_Sealx`
    Sealx = 0x0000_003D,
    /// `TPM_ORD_LoadKey2`
    LoadKey2 = 0x0000_0041,
    /// `TPM_ORD_GetRandom`
    GetRandom = 0x0000_0046,
    /// `TPM_ORD_SelfTestFull`
    SelfTestFull = 0x0000_0050,
    /// `TPM_ORD_ContinueSelfTest`
    ContinueSelfTest = 0x0000_0053,
    /// `TPM_ORD_GetTestResult`
    GetTestResult = 0x0000_0054,
    /// `TPM_ORD_OwnerClear`
    OwnerClear = 0x0000_005B,
    /// `TPM_ORD_GetCapability`
    GetCapability = 0x0000_0065,
    /// `TPM_ORD_CreateEndorsementKeyPair`
    CreateEndorsementKeyPair = 0x0000_0078,
    /// `TPM_ORD_ReadPubek`
    ReadPubek = 0x0000_007C,
    /// `TPM_ORD_SetOrdinalAuditStatus`
    SetOrdinalAuditStatus = 0x0000_008D,
    /// `TPM_ORD_Terminate_Handle`
    TerminateHandle = 0x0000_0096,
    /// `TPM_ORD_SaveState`
    SaveState = 0x0000_0098,
    /// `TPM_ORD_Startup`
    Startup = 0x0000_0099,
    /// `TPM_ORD_SHA1Start`
    Sha1Start = 0x0000_00A0,
    /// `TPM_ORD_SHA1Update`
    Sha1Update = 0x0000_00A1,
    /// `TPM_ORD_SHA1Complete`
    Sha1Complete = 0x0000_00A2,
    /// `TPM_ORD_SHA1CompleteExtend`
    Sha1CompleteExtend = 0x0000_00A3,
    /// `TPM_ORD_FlushSpecific`
    FlushSpecific = 0x0000_00BA,
    /// `TPM_ORD_NV_DefineSpace`
    NvDefineSpace = 0x0000_00CC,
    /// `TPM_ORD_NV_WriteValue`
    NvWriteValue = 0x0000_00CD,
    /// `TPM_ORD_NV_WriteValueAuth`
    NvWriteValueAuth = 0x0000_00CE,
    /// `TPM_ORD_NV_ReadValue`
    NvReadValue = 0x0000_00CF,
    /// `TPM_ORD_NV_ReadValueAuth`
    NvReadValueAuth = 0x0000_00D0,
}

/// Start of the non-fatal return-code band.
pub const RC_NON_FATAL: u32 = 0x0000_0800;

/// Enumeration of the `TPM_RESULT` values.
///
/// The possible values are described in section 16 of the TPM 1.2 Structures
/// specification.
#[derive(FromRepr, Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum TpmRc {
    /// `TPM_SUCCESS`
    Success = 0x00,
    /// `TPM_AUTHFAIL`
    AuthFail = 0x01,
    /// `TPM_BADINDEX`
    BadIndex = 0x02,
    /// `TPM_BAD_PARAMETER`
    BadParameter = 0x03,
    /// `TPM_AUDITFAILURE`
    AuditFailure = 0x04,
    /// `TPM_CLEAR_DISABLED`
    ClearDisabled = 0x05,
    /// `TPM_DEACTIVATED`
    Deactivated = 0x06,
    /// `TPM_DISABLED`
    Disabled = 0x07,
    /// `TPM_DISABLED_CMD`
    DisabledCmd = 0x08,
    /// `TPM_FAIL`
    Fail = 0x09,
    /// `TPM_BAD_ORDINAL`
    BadOrdinal = 0x0A,
    /// `TPM_INSTALL_DISABLED`
    InstallDisabled = 0x0B,
    /// `TPM_INVALID_KEYHANDLE`
    InvalidKeyHandle = 0x0C,
    /// `TPM_KEYNOTFOUND`
    KeyNotFound = 0x0D,
    /// `TPM_INAPPROPRIATE_ENC`
    InappropriateEnc = 0x0E,
    /// `TPM_MIGRATEFAIL`
    MigrateFail = 0x0F,
    /// `TPM_INVALID_PCR_INFO`
    InvalidPcrInfo = 0x10,
    /// `TPM_NOSPACE`
    NoSpace = 0x11,
    /// `TPM_NOSRK`
    NoSrk = 0x12,
    /// `TPM_NOTSEALED_BLOB`
    NotSealedBlob = 0x13,
    /// `TPM_OWNER_SET`
    OwnerSet = 0x14,
    /// `TPM_RESOURCES`
    Resources = 0x15,
    /// `TPM_SHORTRANDOM`
    ShortRandom = 0x16,
    /// `TPM_SIZE`
    Size = 0x17,
    /// `TPM_WRONGPCRVAL`
    WrongPcrVal = 0x18,
    /// `TPM_BAD_PARAM_SIZE`
    BadParamSize = 0x19,
    /// `TPM_SHA_THREAD`
    ShaThread = 0x1A,
    /// `TPM_SHA_ERROR`
    ShaError = 0x1B,
    /// `TPM_FAILEDSELFTEST`
    FailedSelfTest = 0x1C,
    /// `TPM_AUTH2FAIL`
    Auth2Fail = 0x1D,
    /// `TPM_BADTAG`
    BadTag = 0x1E,
    /// `TPM_IOERROR`
    IoError = 0x1F,
    /// `TPM_ENCRYPT_ERROR`
    EncryptError = 0x20,
    /// `TPM_DECRYPT_ERROR`
    DecryptError = 0x21,
    /// `TPM_INVALID_AUTHHANDLE`
    InvalidAuthHandle = 0x22,
    /// `TPM_NO_ENDORSEMENT`
    NoEndorsement = 0x23,
    /// `TPM_INVALID_KEYUSAGE`
    InvalidKeyUsage = 0x24,
    /// `TPM_WRONG_ENTITYTYPE`
    WrongEntityType = 0x25,
    /// `TPM_INVALID_POSTINIT`
    InvalidPostInit = 0x26,
    /// `TPM_INAPPROPRIATE_SIG`
    InappropriateSig = 0x27,
    /// `TPM_BAD_KEY_PROPERTY`
    BadKeyProperty = 0x28,
    /// `TPM_BAD_MIGRATION`
    BadMigration = 0x29,
    /// `TPM_BAD_SCHEME`
    BadScheme = 0x2A,
    /// `TPM_BAD_DATASIZE`
    BadDataSize = 0x2B,
    /// `TPM_BAD_MODE`
    BadMode = 0x2C,
    /// `TPM_BAD_PRESENCE`
    BadPresence = 0x2D,
    /// `TPM_BAD_VERSION`
    BadVersion = 0x2E,
    /// `TPM_NOTFIPS`
    NotFips = 0x36,
    /// `TPM_NO_NV_PERMISSION`
    NoNvPermission = 0x38,
    /// `TPM_AUTH_CONFLICT`
    AuthConflict = 0x3B,
    /// `TPM_AREA_LOCKED`
    AreaLocked = 0x3C,
    /// `TPM_BAD_LOCALITY`
    BadLocality = 0x3D,
    /// `TPM_READ_ONLY`
    ReadOnly = 0x3E,
    /// `TPM_PER_NOWRITE`
    PerNoWrite = 0x3F,
    /// `TPM_BAD_ATTRIBUTES`
    BadAttributes = 0x42,
    /// `TPM_INVALID_STRUCTURE`
    InvalidStructure = 0x43,
    /// `TPM_BAD_COUNTER`
    BadCounter = 0x45,
    /// `TPM_NOT_FULLWRITE`
    NotFullWrite = 0x46,
    /// `TPM_MAXNVWRITES`
    MaxNvWrites = 0x48,
    /// `TPM_BAD_SIGNATURE`
    BadSignature = 0x62,
    /// `TPM_RETRY`
    Retry = RC_NON_FATAL,
    /// `TPM_NEEDS_SELFTEST`
    NeedsSelfTest = RC_NON_FATAL + 0x1,
    /// `TPM_DOING_SELFTEST`
    DoingSelfTest = RC_NON_FATAL + 0x2,
    /// `TPM_DEFEND_LOCK_RUNNING`
    DefendLockRunning = RC_NON_FATAL + 0x3,
}

impl fmt::Display for TpmRc {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            Self::Success => "TPM_SUCCESS",
            Self::AuthFail => "TPM_AUTHFAIL",
            Self::BadIndex => "TPM_BADINDEX",
            Self::BadParameter => "TPM_BAD_PARAMETER",
            Self::AuditFailure => "TPM_AUDITFAILURE",
            Self::ClearDisabled => "TPM_CLEAR_DISABLED",
            Self::Deactivated => "TPM_DEACTIVATED",
            Self::Disabled => "TPM_DISABLED",
            Self::DisabledCmd => "TPM_DISABLED_CMD",
            Self::Fail => "TPM_FAIL",
            Self::BadOrdinal => "TPM_BAD_ORDINAL",
            Self::InstallDisabled => "TPM_INSTALL_DISABLED",
            Self::InvalidKeyHandle => "TPM_INVALID_KEYHANDLE",
            Self::KeyNotFound => "TPM_KEYNOTFOUND",
            Self::InappropriateEnc => "TPM_INAPPROPRIATE_ENC",
            Self::MigrateFail => "TPM_MIGRATEFAIL",
            Self::InvalidPcrInfo => "TPM_INVALID_PCR_INFO",
            Self::NoSpace => "TPM_NOSPACE",
            Self::NoSrk => "TPM_NOSRK",
            Self::NotSealedBlob => "TPM_NOTSEALED_BLOB",
            Self::OwnerSet => "TPM_OWNER_SET",
            Self::Resources => "TPM_RESOURCES",
            Self::ShortRandom => "TPM_SHORTRANDOM",
            Self::Size => "TPM_SIZE",
            Self::WrongPcrVal => "TPM_WRONGPCRVAL",
            Self::BadParamSize => "TPM_BAD_PARAM_SIZE",
            Self::ShaThread => "TPM_SHA_THREAD",
            Self::ShaError => "TPM_SHA_ERROR",
            Self::FailedSelfTest => "TPM_FAILEDSELFTEST",
            Self::Auth2Fail => "TPM_AUTH2FAIL",
            Self::BadTag => "TPM_BADTAG",
            Self::IoError => "TPM_IOERROR",
            Self::EncryptError => "TPM_ENCRYPT_ERROR",
            Self::DecryptError => "TPM_DECRYPT_ERROR",
            Self::InvalidAuthHandle => "TPM_INVALID_AUTHHANDLE",
            Self::NoEndorsement => "TPM_NO_ENDORSEMENT",
            Self::InvalidKeyUsage => "TPM_INVALID_KEYUSAGE",
            Self::WrongEntityType => "TPM_WRONG_ENTITYTYPE",
            Self::InvalidPostInit => "TPM_INVALID_POSTINIT",
            Self::InappropriateSig => "TPM_INAPPROPRIATE_SIG",
            Self::BadKeyProperty => "TPM_BAD_KEY_PROPERTY",
            Self::BadMigration => "TPM_BAD_MIGRATION",
            Self::BadScheme => "TPM_BAD_SCHEME",
            Self::BadDataSize => "TPM_BAD_DATASIZE",
            Self::BadMode => "TPM_BAD_MODE",
            Self::BadPresence => "TPM_BAD_PRESENCE",
            Self::BadVersion => "TPM_BAD_VERSION",
            Self::NotFips => "TPM_NOTFIPS",
            Self::NoNvPermission => "TPM_NO_NV_PERMISSION",
            Self::AuthConflict => "TPM_AUTH_CONFLICT",
            Self::AreaLocked => "TPM_AREA_LOCKED",
            Self::BadLocality => "TPM_BAD_LOCALITY",
            Self::ReadOnly => "TPM_READ_ONLY",
            Self::PerNoWrite => "TPM_PER_NOWRITE",
            Self::BadAttributes => "TPM_BAD_ATTRIBUTES",
            Self::InvalidStructure => "TPM_INVALID_STRUCTURE",
            Self::BadCounter => "TPM_BAD_COUNTER",
            Self::NotFullWrite => "TPM_NOT_FULLWRITE",
            Self::MaxNvWrites => "TPM_MAXNVWRITES",
            Self::BadSignature => "TPM_BAD_SIGNATURE",
            Self::Retry => "TPM_RETRY",
            Self::NeedsSelfTest => "TPM_NEEDS_SELFTEST",
            Self::DoingSelfTest => "TPM_DOING_SELFTEST",
            Self::DefendLockRunning => "TPM_DEFEND_LOCK_RUNNING",
        };
        write!(f, "{name}")
    }
}

/// Authorization session protocols (`TPM_PROTOCOL_ID`).
#[derive(FromRepr, Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u16)]
pub enum ProtocolId {
    /// `TPM_PID_OIAP`
    Oiap = 0x0001,
    /// `TPM_PID_OSAP`
    Osap = 0x0002,
    /// `TPM_PID_ADIP`
    Adip = 0x0003,
    /// `TPM_PID_ADCP`
    Adcp = 0x0004,
    /// `TPM_PID_OWNER`
    Owner = 0x0005,
    /// `TPM_PID_DSAP`
    Dsap = 0x0006,
    /// `TPM_PID_TRANSPORT`
    Transport = 0x0007,
}

/// `TPM_ET_KEYHANDLE`
pub const ET_KEYHANDLE: u8 = 0x01;
/// `TPM_ET_OWNER`
pub const ET_OWNER: u8 = 0x02;
/// `TPM_ET_DATA`
pub const ET_DATA: u8 = 0x03;
/// `TPM_ET_SRK`
pub const ET_SRK: u8 = 0x04;
/// `TPM_ET_KEY`
pub const ET_KEY: u8 = 0x05;
/// `TPM_ET_NV`
pub const ET_NV: u8 = 0x0B;

/// ADIP encryption schemes, carried in the MSB of the OSAP entity type.
#[derive(FromRepr, Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum AdipScheme {
    /// `TPM_ET_XOR`
    Xor = 0x00,
    /// `TPM_ET_AES128_CTR`
    Aes128Ctr = 0x06,
}

/// `TPM_PT_ASYM`
pub const PT_ASYM: u8 = 0x01;
/// `TPM_PT_BIND`
pub const PT_BIND: u8 = 0x02;
/// `TPM_PT_MIGRATE`
pub const PT_MIGRATE: u8 = 0x03;
/// `TPM_PT_MAINT`
pub const PT_MAINT: u8 = 0x04;
/// `TPM_PT_SEAL`
pub const PT_SEAL: u8 = 0x05;

/// `TPM_KEY_SIGNING`
pub const KEY_USAGE_SIGNING: u16 = 0x0010;
/// `TPM_KEY_STORAGE`
pub const KEY_USAGE_STORAGE: u16 = 0x0011;
/// `TPM_KEY_IDENTITY`
pub const KEY_USAGE_IDENTITY: u16 = 0x0012;
/// `TPM_KEY_AUTHCHANGE`
pub const KEY_USAGE_AUTHCHANGE: u16 = 0x0013;
/// `TPM_KEY_BIND`
pub const KEY_USAGE_BIND: u16 = 0x0014;
/// `TPM_KEY_LEGACY`
pub const KEY_USAGE_LEGACY: u16 = 0x0015;
/// `TPM_KEY_MIGRATE`
pub const KEY_USAGE_MIGRATE: u16 = 0x0016;

bitflags! {
    /// `TPM_KEY_FLAGS`
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
    pub struct KeyFlags: u32 {
        /// `TPM_REDIRECTION`
        const REDIRECTION = 0x0000_0001;
        /// `TPM_MIGRATABLE`
        const MIGRATABLE = 0x0000_0002;
        /// `TPM_ISVOLATILE`
        const VOLATILE = 0x0000_0004;
        /// `TPM_PCRIGNOREDONREAD`
        const PCR_IGNORED_ON_READ = 0x0000_0008;
        /// `TPM_MIGRATEAUTHORITY`
        const MIGRATE_AUTHORITY = 0x0000_0010;
    }
}

/// `TPM_AUTH_NEVER`
pub const AUTH_NEVER: u8 = 0x00;
/// `TPM_AUTH_ALWAYS`
pub const AUTH_ALWAYS: u8 = 0x01;
/// `TPM_NO_READ_PUBKEY_AUTH`
pub const AUTH_PRIV_USE_ONLY: u8 = 0x03;

/// `TPM_ALG_RSA`
pub const ALG_RSA: u32 = 0x0000_0001;
/// `TPM_ALG_SHA`
pub const ALG_SHA: u32 = 0x0000_0004;
/// `TPM_ALG_HMAC`
pub const ALG_HMAC: u32 = 0x0000_0005;
/// `TPM_ALG_AES128`
pub const ALG_AES128: u32 = 0x0000_0006;
/// `TPM_ALG_MGF1`
pub const ALG_MGF1: u32 = 0x0000_0007;
/// `TPM_ALG_XOR`
pub const ALG_XOR: u32 = 0x0000_000A;

/// `TPM_ES_NONE`
pub const ES_NONE: u16 = 0x0001;
/// `TPM_ES_RSAESPKCSv15`
pub const ES_RSAESPKCSV15: u16 = 0x0002;
/// `TPM_ES_RSAESOAEP_SHA1_MGF1`
pub const ES_RSAESOAEP_SHA1_MGF1: u16 = 0x0003;
/// `TPM_ES_SYM_CTR`
pub const ES_SYM_CTR: u16 = 0x0004;
/// `TPM_ES_SYM_OFB`
pub const ES_SYM_OFB: u16 = 0x0005;

/// `TPM_SS_NONE`
pub const SS_NONE: u16 = 0x0001;
/// `TPM_SS_RSASSAPKCS1v15_SHA1`
pub const SS_RSASSAPKCS1V15_SHA1: u16 = 0x0002;
/// `TPM_SS_RSASSAPKCS1v15_DER`
pub const SS_RSASSAPKCS1V15_DER: u16 = 0x0003;
/// `TPM_SS_RSASSAPKCS1v15_INFO`
pub const SS_RSASSAPKCS1V15_INFO: u16 = 0x0004;

/// `TPM_KH_SRK`
pub const KH_SRK: u32 = 0x4000_0000;
/// `TPM_KH_OWNER`
pub const KH_OWNER: u32 = 0x4000_0001;
/// `TPM_KH_REVOKE`
pub const KH_REVOKE: u32 = 0x4000_0002;
/// `TPM_KH_TRANSPORT`
pub const KH_TRANSPORT: u32 = 0x4000_0003;
/// `TPM_KH_OPERATOR`
pub const KH_OPERATOR: u32 = 0x4000_0004;
/// `TPM_KH_ADMIN`
pub const KH_ADMIN: u32 = 0x4000_0005;
/// `TPM_KH_EK`
pub const KH_EK: u32 = 0x4000_0006;

/// `TPM_RT_KEY`
pub const RT_KEY: u32 = 0x0000_0001;
/// `TPM_RT_AUTH`
pub const RT_AUTH: u32 = 0x0000_0002;
/// `TPM_RT_TRANS`
pub const RT_TRANS: u32 = 0x0000_0004;

/// Handle range for loaded transient keys.
pub const HR_KEY_BASE: u32 = 0x0100_0000;
/// Handle range for authorization sessions.
pub const HR_AUTH_BASE: u32 = 0x0200_0000;

/// `TPM_NV_INDEX_LOCK`
pub const NV_INDEX_LOCK: u32 = 0xFFFF_FFFF;
/// `TPM_NV_INDEX0`
pub const NV_INDEX0: u32 = 0x0000_0000;
/// `TPM_NV_INDEX_DIR`
pub const NV_INDEX_DIR: u32 = 0x1000_0001;
/// `TPM_NV_INDEX_TRIAL`
pub const NV_INDEX_TRIAL: u32 = 0x0000_F004;
/// Reserved bit of an NV index.
pub const NV_INDEX_RESVD: u32 = 0x8000_0000;
/// The "D" (defined permanently) bit of an NV index.
pub const NV_INDEX_D_BIT: u32 = 0x1000_0000;
/// Purview field mask of an NV index.
pub const NV_INDEX_PURVIEW_MASK: u32 = 0x00FF_0000;
/// Purview field shift of an NV index.
pub const NV_INDEX_PURVIEW_BIT: u32 = 16;
/// `TPM_PC` platform purview.
pub const PURVIEW_PC: u32 = 0x0001;

bitflags! {
    /// `TPM_NV_ATTRIBUTES` permission bits (`TPM_NV_PER_*`).
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
    pub struct NvPermission: u32 {
        /// `TPM_NV_PER_READ_STCLEAR`
        const READ_STCLEAR = 0x8000_0000;
        /// `TPM_NV_PER_AUTHREAD`
        const AUTHREAD = 0x0004_0000;
        /// `TPM_NV_PER_OWNERREAD`
        const OWNERREAD = 0x0002_0000;
        /// `TPM_NV_PER_PPREAD`
        const PPREAD = 0x0001_0000;
        /// `TPM_NV_PER_GLOBALLOCK`
        const GLOBALLOCK = 0x0000_8000;
        /// `TPM_NV_PER_WRITE_STCLEAR`
        const WRITE_STCLEAR = 0x0000_4000;
        /// `TPM_NV_PER_WRITEDEFINE`
        const WRITEDEFINE = 0x0000_2000;
        /// `TPM_NV_PER_WRITEALL`
        const WRITEALL = 0x0000_1000;
        /// `TPM_NV_PER_AUTHWRITE`
        const AUTHWRITE = 0x0000_0004;
        /// `TPM_NV_PER_OWNERWRITE`
        const OWNERWRITE = 0x0000_0002;
        /// `TPM_NV_PER_PPWRITE`
        const PPWRITE = 0x0000_0001;
    }
}

/// `TPM_ST_CLEAR`
pub const STARTUP_CLEAR: u16 = 0x0001;
/// `TPM_ST_STATE`
pub const STARTUP_STATE: u16 = 0x0002;
/// `TPM_ST_DEACTIVATED`
pub const STARTUP_DEACTIVATED: u16 = 0x0003;

bitflags! {
    /// `TPM_LOCALITY_SELECTION`
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
    pub struct LocalitySelection: u8 {
        /// `TPM_LOC_ZERO`
        const ZERO = 0x01;
        /// `TPM_LOC_ONE`
        const ONE = 0x02;
        /// `TPM_LOC_TWO`
        const TWO = 0x04;
        /// `TPM_LOC_THREE`
        const THREE = 0x08;
        /// `TPM_LOC_FOUR`
        const FOUR = 0x10;
    }
}

impl LocalitySelection {
    /// All five localities.
    pub const ALL: LocalitySelection = LocalitySelection::all();

    /// The selection bit for a locality modifier.
    #[must_use]
    pub fn from_modifier(modifier: u8) -> Option<LocalitySelection> {
        LocalitySelection::from_bits(1u8.checked_shl(u32::from(modifier))?)
    }
}

/// `TPM_CAP_ORD`
pub const CAP_ORD: u32 = 0x0000_0001;
/// `TPM_CAP_PROPERTY`
pub const CAP_PROPERTY: u32 = 0x0000_0005;
/// `TPM_CAP_VERSION`
pub const CAP_VERSION: u32 = 0x0000_0006;
/// `TPM_CAP_NV_LIST`
pub const CAP_NV_LIST: u32 = 0x0000_000D;
/// `TPM_CAP_PROP_PCR`
pub const CAP_PROP_PCR: u32 = 0x0000_0101;
/// `TPM_CAP_PROP_MANUFACTURER`
pub const CAP_PROP_MANUFACTURER: u32 = 0x0000_0103;

/// Manufacturer identifier returned by `TPM_CAP_PROP_MANUFACTURER`.
pub const MANUFACTURER: [u8; 4] = *b"SWTM";

/// `TPM_STRUCT_VER` 1.1.0.0, the version header of 1.1-era structures.
pub const STRUCT_VER_11: [u8; 4] = [0x01, 0x01, 0x00, 0x00];
