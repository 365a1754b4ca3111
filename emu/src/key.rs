// SPDX-License-Identifier: MIT

//! Asymmetric keys: the `TPM_KEY`/`TPM_KEY12` internal form, the sensitive
//! `TPM_STORE_ASYMKEY` half, property validation, generation and the fixed
//! table of loaded keys.

use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::buffer::{Cursor, StoreBuffer};
use crate::pcr::{PcrInfo, PcrInfoLong};
use crate::state::Tpm;
use crate::types::{
    Digest, KeyFlags, LocalitySelection, Secret, TpmRc, TpmResult, ALG_RSA, AUTH_NEVER,
    ES_NONE, ES_RSAESOAEP_SHA1_MGF1, ES_RSAESPKCSV15, HR_KEY_BASE, KEY_USAGE_AUTHCHANGE,
    KEY_USAGE_BIND, KEY_USAGE_IDENTITY, KEY_USAGE_LEGACY, KEY_USAGE_MIGRATE, KEY_USAGE_SIGNING,
    KEY_USAGE_STORAGE, KH_EK, KH_SRK, PT_ASYM, SS_NONE, SS_RSASSAPKCS1V15_DER,
    SS_RSASSAPKCS1V15_INFO, SS_RSASSAPKCS1V15_SHA1, STRUCT_VER_11, TAG_KEY12,
};
use crate::MAX_KEY_SLOTS;

/// Prime count of every RSA key this TPM produces or loads.
pub const RSA_NUM_PRIMES: u32 = 2;

/// Structure generation of a key.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KeyVersion {
    V11,
    V12,
}

/// RSA parameter block of `TPM_KEY_PARMS.parms`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RsaParms {
    pub key_bits: u32,
    pub num_primes: u32,
    /// Big-endian public exponent; empty selects the default.
    pub exponent: Vec<u8>,
}

impl RsaParms {
    pub fn load(cur: &mut Cursor) -> TpmResult<Self> {
        let key_bits = cur.load_u32()?;
        let num_primes = cur.load_u32()?;
        let exponent = cur.load_sized()?.to_vec();
        Ok(RsaParms {
            key_bits,
            num_primes,
            exponent,
        })
    }

    pub fn store(&self, out: &mut StoreBuffer) -> TpmResult<()> {
        out.store_u32(self.key_bits)?;
        out.store_u32(self.num_primes)?;
        out.store_sized(&self.exponent)
    }
}

/// `TPM_KEY_PARMS`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyParms {
    pub algorithm: u32,
    pub enc_scheme: u16,
    pub sig_scheme: u16,
    /// Raw algorithm parameter bytes.
    pub parms: Vec<u8>,
}

impl KeyParms {
    /// RSA parameters with the default exponent and two primes.
    pub fn rsa(key_bits: u32, enc_scheme: u16, sig_scheme: u16) -> TpmResult<Self> {
        let rsa = RsaParms {
            key_bits,
            num_primes: RSA_NUM_PRIMES,
            exponent: Vec::new(),
        };
        let mut parms = StoreBuffer::new();
        rsa.store(&mut parms)?;
        Ok(KeyParms {
            algorithm: ALG_RSA,
            enc_scheme,
            sig_scheme,
            parms: parms.into_vec(),
        })
    }

    pub fn load(cur: &mut Cursor) -> TpmResult<Self> {
        Ok(KeyParms {
            algorithm: cur.load_u32()?,
            enc_scheme: cur.load_u16()?,
            sig_scheme: cur.load_u16()?,
            parms: cur.load_sized()?.to_vec(),
        })
    }

    pub fn store(&self, out: &mut StoreBuffer) -> TpmResult<()> {
        out.store_u32(self.algorithm)?;
        out.store_u16(self.enc_scheme)?;
        out.store_u16(self.sig_scheme)?;
        out.store_sized(&self.parms)
    }

    /// Parse the parameter bytes as RSA parameters.
    pub fn rsa_parms(&self) -> TpmResult<RsaParms> {
        if self.algorithm != ALG_RSA {
            return Err(TpmRc::BadKeyProperty);
        }
        let mut cur = Cursor::new(&self.parms);
        let parms = RsaParms::load(&mut cur).map_err(|_| TpmRc::BadKeyProperty)?;
        cur.expect_end().map_err(|_| TpmRc::BadKeyProperty)?;
        Ok(parms)
    }
}

/// A public key as returned on the wire (`TPM_PUBKEY`).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PubKey {
    pub parms: KeyParms,
    pub modulus: Vec<u8>,
}

impl PubKey {
    pub fn load(cur: &mut Cursor) -> TpmResult<Self> {
        Ok(PubKey {
            parms: KeyParms::load(cur)?,
            modulus: cur.load_sized()?.to_vec(),
        })
    }

    pub fn store(&self, out: &mut StoreBuffer) -> TpmResult<()> {
        self.parms.store(out)?;
        out.store_sized(&self.modulus)
    }

    pub fn to_bytes(&self) -> TpmResult<Vec<u8>> {
        let mut out = StoreBuffer::new();
        self.store(&mut out)?;
        Ok(out.into_vec())
    }
}

/// The sensitive half of a key (`TPM_STORE_ASYMKEY`): auth values, the
/// public-data digest binding, and one prime factor.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct StoreAsymkey {
    pub payload: u8,
    pub usage_auth: Secret,
    pub migration_auth: Secret,
    pub pub_data_digest: Digest,
    pub prime: Vec<u8>,
}

impl StoreAsymkey {
    pub fn load(cur: &mut Cursor) -> TpmResult<Self> {
        Ok(StoreAsymkey {
            payload: cur.load_u8()?,
            usage_auth: cur.load_secret()?,
            migration_auth: cur.load_secret()?,
            pub_data_digest: cur.load_digest()?,
            prime: cur.load_sized()?.to_vec(),
        })
    }

    pub fn store(&self, out: &mut StoreBuffer) -> TpmResult<()> {
        out.store_u8(self.payload)?;
        out.store_bytes(&self.usage_auth.0)?;
        out.store_bytes(&self.migration_auth.0)?;
        out.store_bytes(&self.pub_data_digest)?;
        out.store_sized(&self.prime)
    }

    pub fn to_bytes(&self) -> TpmResult<Vec<u8>> {
        let mut out = StoreBuffer::new();
        self.store(&mut out)?;
        Ok(out.into_vec())
    }
}

/// PCR binding carried by a key.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum KeyPcrInfo {
    #[default]
    None,
    Info(PcrInfo),
    Long(PcrInfoLong),
}

/// A loaded asymmetric key: `TPM_KEY` (1.1) or `TPM_KEY12`.
#[derive(Clone)]
pub struct Key {
    pub version: KeyVersion,
    pub usage: u16,
    pub flags: KeyFlags,
    pub auth_data_usage: u8,
    pub parms: KeyParms,
    pub pcr_info: KeyPcrInfo,
    pub modulus: Vec<u8>,
    pub enc_data: Vec<u8>,
    /// Present when the private half is available in clear.
    pub asym: Option<StoreAsymkey>,
}

impl Key {
    pub fn load(cur: &mut Cursor) -> TpmResult<Self> {
        let mut probe = *cur;
        let version = if probe.load_u8()? == 0x01 {
            let ver = cur.load_bytes(4)?;
            if ver != STRUCT_VER_11.as_slice() {
                return Err(TpmRc::BadVersion);
            }
            KeyVersion::V11
        } else {
            if cur.load_u16()? != TAG_KEY12 {
                return Err(TpmRc::BadVersion);
            }
            if cur.load_u16()? != 0x0000 {
                return Err(TpmRc::BadVersion);
            }
            KeyVersion::V12
        };
        let usage = cur.load_u16()?;
        let flags = KeyFlags::from_bits_retain(cur.load_u32()?);
        let auth_data_usage = cur.load_u8()?;
        let parms = KeyParms::load(cur)?;
        let pcr_bytes = cur.load_sized()?;
        let pcr_info = if pcr_bytes.is_empty() {
            KeyPcrInfo::None
        } else {
            let mut sub = Cursor::new(pcr_bytes);
            let info = match version {
                KeyVersion::V11 => KeyPcrInfo::Info(PcrInfo::load(&mut sub)?),
                KeyVersion::V12 => KeyPcrInfo::Long(PcrInfoLong::load(&mut sub)?),
            };
            sub.expect_end().map_err(|_| TpmRc::InvalidStructure)?;
            info
        };
        let modulus = cur.load_sized()?.to_vec();
        let enc_data = cur.load_sized()?.to_vec();
        Ok(Key {
            version,
            usage,
            flags,
            auth_data_usage,
            parms,
            pcr_info,
            modulus,
            enc_data,
            asym: None,
        })
    }

    /// Serialize everything but the `encData` sized buffer.
    pub fn store_pub_data(&self, out: &mut StoreBuffer) -> TpmResult<()> {
        match self.version {
            KeyVersion::V11 => out.store_bytes(&STRUCT_VER_11)?,
            KeyVersion::V12 => {
                out.store_u16(TAG_KEY12)?;
                out.store_u16(0x0000)?;
            }
        }
        out.store_u16(self.usage)?;
        out.store_u32(self.flags.bits())?;
        out.store_u8(self.auth_data_usage)?;
        self.parms.store(out)?;
        let mut pcr = StoreBuffer::new();
        match &self.pcr_info {
            KeyPcrInfo::None => {}
            KeyPcrInfo::Info(info) => info.store(&mut pcr)?,
            KeyPcrInfo::Long(info) => info.store(&mut pcr)?,
        }
        out.store_sized(pcr.as_slice())?;
        out.store_sized(&self.modulus)
    }

    pub fn store(&self, out: &mut StoreBuffer) -> TpmResult<()> {
        self.store_pub_data(out)?;
        out.store_sized(&self.enc_data)
    }

    pub fn to_bytes(&self) -> TpmResult<Vec<u8>> {
        let mut out = StoreBuffer::new();
        self.store(&mut out)?;
        Ok(out.into_vec())
    }

    /// Digest over the public fields, bound into `TPM_STORE_ASYMKEY`.
    pub fn pub_data_digest(&self, tpm_crypto: &dyn crate::Crypto) -> TpmResult<Digest> {
        let mut out = StoreBuffer::new();
        self.store_pub_data(&mut out)?;
        Ok(tpm_crypto.sha1(&[out.as_slice()]))
    }

    /// Persistent form: the wire key followed by the sensitive half.
    pub fn store_internal(&self, out: &mut StoreBuffer) -> TpmResult<()> {
        self.store(out)?;
        match &self.asym {
            None => out.store_bool(false),
            Some(asym) => {
                out.store_bool(true)?;
                asym.store(out)
            }
        }
    }

    pub fn load_internal(cur: &mut Cursor) -> TpmResult<Self> {
        let mut key = Key::load(cur)?;
        if cur.load_bool().map_err(|_| TpmRc::Fail)? {
            key.asym = Some(StoreAsymkey::load(cur)?);
        }
        Ok(key)
    }

    pub fn usage_auth(&self) -> TpmResult<&Secret> {
        self.asym
            .as_ref()
            .map(|a| &a.usage_auth)
            .ok_or(TpmRc::Fail)
    }

    pub fn asymkey(&self) -> TpmResult<&StoreAsymkey> {
        self.asym.as_ref().ok_or(TpmRc::Fail)
    }

    /// Whether the key names any PCR in its release selection.
    #[must_use]
    pub fn pcr_usage(&self) -> bool {
        match &self.pcr_info {
            KeyPcrInfo::None => false,
            KeyPcrInfo::Info(info) => !info.selection.is_empty(),
            KeyPcrInfo::Long(info) => !info.release_selection.is_empty(),
        }
    }

    #[must_use]
    pub fn to_pubkey(&self) -> PubKey {
        PubKey {
            parms: self.parms.clone(),
            modulus: self.modulus.clone(),
        }
    }

    fn rsa_exponent(&self) -> Vec<u8> {
        match self.parms.rsa_parms() {
            Ok(parms) => parms.exponent,
            Err(_) => Vec::new(),
        }
    }

    #[must_use]
    pub fn rsa_public(&self) -> crate::RsaPublic {
        crate::RsaPublic {
            modulus: self.modulus.clone(),
            exponent: self.rsa_exponent(),
        }
    }

    pub fn rsa_private(&self) -> TpmResult<crate::RsaPrivate> {
        let asym = self.asymkey()?;
        Ok(crate::RsaPrivate {
            modulus: self.modulus.clone(),
            exponent: self.rsa_exponent(),
            prime: asym.prime.clone(),
        })
    }

    /// Enforce the per-usage algorithm and scheme invariants, with the FIPS
    /// tightening when the flag is set.
    pub fn check_properties(&self, fips: bool) -> TpmResult<()> {
        let rsa = self.parms.rsa_parms()?;
        if rsa.num_primes != RSA_NUM_PRIMES {
            return Err(TpmRc::BadKeyProperty);
        }
        if fips {
            if rsa.key_bits < 1024 {
                return Err(TpmRc::NotFips);
            }
            if self.auth_data_usage == AUTH_NEVER {
                return Err(TpmRc::NotFips);
            }
            if self.usage == KEY_USAGE_LEGACY {
                return Err(TpmRc::NotFips);
            }
        }
        let es = self.parms.enc_scheme;
        let ss = self.parms.sig_scheme;
        let ok = match self.usage {
            KEY_USAGE_SIGNING => {
                es == ES_NONE
                    && matches!(
                        ss,
                        SS_RSASSAPKCS1V15_SHA1 | SS_RSASSAPKCS1V15_DER | SS_RSASSAPKCS1V15_INFO
                    )
            }
            KEY_USAGE_STORAGE | KEY_USAGE_MIGRATE => {
                es == ES_RSAESOAEP_SHA1_MGF1
                    && ss == SS_NONE
                    && rsa.key_bits == 2048
                    && rsa.exponent.is_empty()
            }
            KEY_USAGE_IDENTITY => {
                es == ES_NONE
                    && ss == SS_RSASSAPKCS1V15_SHA1
                    && rsa.key_bits == 2048
                    && rsa.exponent.is_empty()
            }
            KEY_USAGE_AUTHCHANGE => es == ES_RSAESOAEP_SHA1_MGF1 && ss == SS_NONE,
            KEY_USAGE_BIND => {
                matches!(es, ES_RSAESOAEP_SHA1_MGF1 | ES_RSAESPKCSV15) && ss == SS_NONE
            }
            KEY_USAGE_LEGACY => {
                matches!(es, ES_RSAESOAEP_SHA1_MGF1 | ES_RSAESPKCSV15)
                    && matches!(ss, SS_RSASSAPKCS1V15_SHA1 | SS_RSASSAPKCS1V15_DER)
            }
            _ => return Err(TpmRc::InvalidKeyUsage),
        };
        if ok {
            Ok(())
        } else {
            Err(TpmRc::InvalidKeyUsage)
        }
    }
}

/// Generate an RSA key pair in the shape requested by `keyInfo`, filling the
/// creation-time PCR fields from the current bank.
pub(crate) fn generate_rsa_key(
    tpm: &Tpm,
    version: KeyVersion,
    usage: u16,
    flags: KeyFlags,
    auth_data_usage: u8,
    parms: KeyParms,
    pcr_info: KeyPcrInfo,
) -> TpmResult<Key> {
    let rsa = parms.rsa_parms()?;
    let material = tpm.crypto.rsa_gen(rsa.key_bits, &rsa.exponent)?;
    let pcr_info = match pcr_info {
        KeyPcrInfo::None => KeyPcrInfo::None,
        KeyPcrInfo::Info(mut info) => {
            info.digest_at_creation = tpm.pcrs.composite(tpm.crypto.as_ref(), &info.selection)?;
            KeyPcrInfo::Info(info)
        }
        KeyPcrInfo::Long(mut info) => {
            info.digest_at_creation = tpm
                .pcrs
                .composite(tpm.crypto.as_ref(), &info.creation_selection)?;
            info.locality_at_creation =
                LocalitySelection::from_modifier(tpm.stany_flags.locality_modifier)
                    .ok_or(TpmRc::BadLocality)?;
            KeyPcrInfo::Long(info)
        }
    };
    let mut key = Key {
        version,
        usage,
        flags,
        auth_data_usage,
        parms,
        pcr_info,
        modulus: material.modulus.clone(),
        enc_data: Vec::new(),
        asym: None,
    };
    let digest = key.pub_data_digest(tpm.crypto.as_ref())?;
    key.asym = Some(StoreAsymkey {
        payload: PT_ASYM,
        usage_auth: Secret::zero(),
        migration_auth: Secret::zero(),
        pub_data_digest: digest,
        prime: material.p.clone(),
    });
    Ok(key)
}

/// One slot of the loaded-key table.
#[derive(Clone)]
pub(crate) struct KeyEntry {
    pub handle: u32,
    pub key: Key,
    pub parent_pcr_status: bool,
}

/// The fixed-capacity table of loaded transient keys.
pub(crate) struct KeyStore {
    entries: Vec<KeyEntry>,
    next_handle: u32,
}

impl Default for KeyStore {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyStore {
    pub fn new() -> Self {
        KeyStore {
            entries: Vec::new(),
            next_handle: 1,
        }
    }

    pub fn add(&mut self, key: Key, parent_pcr_status: bool) -> TpmResult<u32> {
        if self.entries.len() >= MAX_KEY_SLOTS {
            return Err(TpmRc::NoSpace);
        }
        let mut handle = HR_KEY_BASE | (self.next_handle & 0x00FF_FFFF);
        while self.find(handle).is_some() {
            self.next_handle = self.next_handle.wrapping_add(1);
            handle = HR_KEY_BASE | (self.next_handle & 0x00FF_FFFF);
        }
        self.next_handle = self.next_handle.wrapping_add(1);
        self.entries.push(KeyEntry {
            handle,
            key,
            parent_pcr_status,
        });
        Ok(handle)
    }

    fn find(&self, handle: u32) -> Option<usize> {
        self.entries.iter().position(|e| e.handle == handle)
    }

    pub fn get(&self, handle: u32) -> Option<&KeyEntry> {
        self.find(handle).map(|i| &self.entries[i])
    }

    pub fn remove(&mut self, handle: u32) -> TpmResult<()> {
        let i = self.find(handle).ok_or(TpmRc::InvalidKeyHandle)?;
        self.entries.swap_remove(i);
        Ok(())
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Re-seat an entry under its original handle when reloading saved
    /// state.
    pub fn restore(&mut self, handle: u32, key: Key, parent_pcr_status: bool) {
        self.entries.retain(|e| e.handle != handle);
        if self.entries.len() < MAX_KEY_SLOTS {
            self.entries.push(KeyEntry {
                handle,
                key,
                parent_pcr_status,
            });
        }
    }

    pub fn entries(&self) -> impl Iterator<Item = &KeyEntry> {
        self.entries.iter()
    }
}

impl Tpm {
    /// Resolve a key handle, gating on the key's PCR binding.
    ///
    /// A read-only use skips the gate when the key carries
    /// `pcrIgnoredOnRead`. The endorsement key resolves only where a caller
    /// explicitly allows it.
    pub(crate) fn get_key(
        &self,
        handle: u32,
        read_only: bool,
        allow_ek: bool,
    ) -> TpmResult<(Key, bool)> {
        let (key, parent_pcr_status) = match handle {
            KH_SRK => {
                let srk = self.permanent.srk.as_ref().ok_or(TpmRc::NoSrk)?;
                (srk.clone(), false)
            }
            KH_EK => {
                if !allow_ek {
                    return Err(TpmRc::InvalidKeyHandle);
                }
                let ek = self.permanent.ek.as_ref().ok_or(TpmRc::NoEndorsement)?;
                (ek.clone(), false)
            }
            _ => {
                let entry = self.keys.get(handle).ok_or(TpmRc::InvalidKeyHandle)?;
                (entry.key.clone(), entry.parent_pcr_status)
            }
        };
        let skip_pcr_check = read_only && key.flags.contains(KeyFlags::PCR_IGNORED_ON_READ);
        if !skip_pcr_check {
            match &key.pcr_info {
                KeyPcrInfo::None => {}
                KeyPcrInfo::Info(info) => info.check_digest(self)?,
                KeyPcrInfo::Long(info) => info.check_digest(self)?,
            }
        }
        Ok((key, parent_pcr_status))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn storage_key_v12() -> Key {
        Key {
            version: KeyVersion::V12,
            usage: KEY_USAGE_STORAGE,
            flags: KeyFlags::empty(),
            auth_data_usage: crate::types::AUTH_ALWAYS,
            parms: KeyParms::rsa(2048, ES_RSAESOAEP_SHA1_MGF1, SS_NONE).unwrap(),
            pcr_info: KeyPcrInfo::None,
            modulus: vec![0xAB; 256],
            enc_data: vec![0xCD; 256],
            asym: None,
        }
    }

    #[test]
    fn key12_wire_round_trip() {
        let key = storage_key_v12();
        let bytes = key.to_bytes().unwrap();
        let loaded = Key::load(&mut Cursor::new(&bytes)).unwrap();
        assert_eq!(loaded.version, KeyVersion::V12);
        assert_eq!(loaded.usage, KEY_USAGE_STORAGE);
        assert_eq!(loaded.modulus, key.modulus);
        assert_eq!(loaded.to_bytes().unwrap(), bytes);
    }

    #[test]
    fn key11_wire_round_trip() {
        let mut key = storage_key_v12();
        key.version = KeyVersion::V11;
        let bytes = key.to_bytes().unwrap();
        assert_eq!(bytes[0], 0x01);
        let loaded = Key::load(&mut Cursor::new(&bytes)).unwrap();
        assert_eq!(loaded.version, KeyVersion::V11);
        assert_eq!(loaded.to_bytes().unwrap(), bytes);
    }

    #[test]
    fn check_properties_enforces_storage_shape() {
        let mut key = storage_key_v12();
        key.check_properties(false).unwrap();
        key.parms = KeyParms::rsa(1024, ES_RSAESOAEP_SHA1_MGF1, SS_NONE).unwrap();
        assert_eq!(key.check_properties(false), Err(TpmRc::InvalidKeyUsage));
        key.parms = KeyParms::rsa(2048, ES_RSAESPKCSV15, SS_NONE).unwrap();
        assert_eq!(key.check_properties(false), Err(TpmRc::InvalidKeyUsage));
    }

    #[test]
    fn check_properties_fips() {
        let mut key = storage_key_v12();
        key.auth_data_usage = AUTH_NEVER;
        assert_eq!(key.check_properties(true), Err(TpmRc::NotFips));
        key.auth_data_usage = crate::types::AUTH_ALWAYS;
        key.check_properties(true).unwrap();
    }

    #[test]
    fn key_store_capacity_and_handles() {
        let mut store = KeyStore::new();
        let mut handles = Vec::new();
        for _ in 0..MAX_KEY_SLOTS {
            handles.push(store.add(storage_key_v12(), false).unwrap());
        }
        assert_eq!(
            store.add(storage_key_v12(), false).err(),
            Some(TpmRc::NoSpace)
        );
        for h in &handles {
            assert_eq!(*h & 0xFF00_0000, HR_KEY_BASE);
            assert!(store.get(*h).is_some());
        }
        store.remove(handles[0]).unwrap();
        assert!(store.get(handles[0]).is_none());
        assert_eq!(store.remove(handles[0]).err(), Some(TpmRc::InvalidKeyHandle));
    }

    #[test]
    fn internal_form_keeps_sensitive_half() {
        let mut key = storage_key_v12();
        key.asym = Some(StoreAsymkey {
            payload: PT_ASYM,
            usage_auth: Secret::from_slice(&[1u8; 20]),
            migration_auth: Secret::from_slice(&[2u8; 20]),
            pub_data_digest: [3u8; 20],
            prime: vec![5u8; 128],
        });
        let mut out = StoreBuffer::new();
        key.store_internal(&mut out).unwrap();
        let bytes = out.into_vec();
        let loaded = Key::load_internal(&mut Cursor::new(&bytes)).unwrap();
        let asym = loaded.asym.unwrap();
        assert_eq!(asym.usage_auth.0, [1u8; 20]);
        assert_eq!(asym.prime, vec![5u8; 128]);
    }
}
