// SPDX-License-Identifier: MIT

//! Sealed storage: the `TPM_STORED_DATA`/`TPM_SEALED_DATA`/`TPM_BOUND_DATA`
//! envelopes and the storage ordinals built over the key hierarchy.

use log::{debug, trace};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::buffer::{Cursor, StoreBuffer};
use crate::dispatch::CommandCtx;
use crate::key::{generate_rsa_key, Key, KeyPcrInfo, StoreAsymkey};
use crate::pcr::{PcrInfo, PcrInfoLong};
use crate::session::AuthCtx;
use crate::state::{PermanentFlags, Tpm};
use crate::types::{
    AdipScheme, Digest, KeyFlags, LocalitySelection, ProtocolId, RequestTag, Secret, TpmRc,
    TpmResult, DIGEST_SIZE, ES_RSAESOAEP_SHA1_MGF1, ES_RSAESPKCSV15, ET_KEY, ET_KEYHANDLE,
    KEY_USAGE_AUTHCHANGE, KEY_USAGE_BIND, KEY_USAGE_IDENTITY, KEY_USAGE_LEGACY, KEY_USAGE_STORAGE,
    KH_EK, KH_SRK, PT_BIND, PT_SEAL, STRUCT_VER_11, TAG_STORED_DATA12,
};

/// Bytes of OAEP overhead under SHA-1.
const OAEP_OVERHEAD: usize = 2 * DIGEST_SIZE + 2;

/// A sealed or bound blob container, v1.1 (`TPM_STORED_DATA`) or v1.2
/// (`TPM_STORED_DATA12`).
#[derive(Clone)]
pub(crate) enum StoredData {
    V11 {
        seal_info: Option<PcrInfo>,
        enc_data: Vec<u8>,
    },
    V12 {
        et: u16,
        seal_info: Option<PcrInfoLong>,
        enc_data: Vec<u8>,
    },
}

impl StoredData {
    pub fn load(cur: &mut Cursor) -> TpmResult<Self> {
        let mut probe = *cur;
        if probe.load_u8()? == 0x01 {
            let ver = cur.load_bytes(4)?;
            if ver != STRUCT_VER_11.as_slice() {
                return Err(TpmRc::BadVersion);
            }
            let seal_info_raw = cur.load_sized()?;
            let seal_info = if seal_info_raw.is_empty() {
                None
            } else {
                let mut sub = Cursor::new(seal_info_raw);
                let info = PcrInfo::load(&mut sub)?;
                sub.expect_end().map_err(|_| TpmRc::InvalidStructure)?;
                Some(info)
            };
            let enc_data = cur.load_sized()?.to_vec();
            Ok(StoredData::V11 {
                seal_info,
                enc_data,
            })
        } else {
            if cur.load_u16()? != TAG_STORED_DATA12 {
                return Err(TpmRc::BadVersion);
            }
            let et = cur.load_u16()?;
            let seal_info_raw = cur.load_sized()?;
            let seal_info = if seal_info_raw.is_empty() {
                None
            } else {
                let mut sub = Cursor::new(seal_info_raw);
                let info = PcrInfoLong::load(&mut sub)?;
                sub.expect_end().map_err(|_| TpmRc::InvalidStructure)?;
                Some(info)
            };
            let enc_data = cur.load_sized()?.to_vec();
            Ok(StoredData::V12 {
                et,
                seal_info,
                enc_data,
            })
        }
    }

    /// Serialize everything but `encData`; the sealed blob's inner digest
    /// covers exactly these bytes.
    pub fn store_clear(&self, out: &mut StoreBuffer) -> TpmResult<()> {
        match self {
            StoredData::V11 { seal_info, .. } => {
                out.store_bytes(&STRUCT_VER_11)?;
                let mut sub = StoreBuffer::new();
                if let Some(info) = seal_info {
                    info.store(&mut sub)?;
                }
                out.store_sized(sub.as_slice())
            }
            StoredData::V12 { et, seal_info, .. } => {
                out.store_u16(TAG_STORED_DATA12)?;
                out.store_u16(*et)?;
                let mut sub = StoreBuffer::new();
                if let Some(info) = seal_info {
                    info.store(&mut sub)?;
                }
                out.store_sized(sub.as_slice())
            }
        }
    }

    pub fn store(&self, out: &mut StoreBuffer) -> TpmResult<()> {
        self.store_clear(out)?;
        let enc_data = match self {
            StoredData::V11 { enc_data, .. } | StoredData::V12 { enc_data, .. } => enc_data,
        };
        out.store_sized(enc_data)
    }

    pub fn set_enc_data(&mut self, data: Vec<u8>) {
        match self {
            StoredData::V11 { enc_data, .. } | StoredData::V12 { enc_data, .. } => {
                *enc_data = data;
            }
        }
    }

    pub fn enc_data(&self) -> &[u8] {
        match self {
            StoredData::V11 { enc_data, .. } | StoredData::V12 { enc_data, .. } => enc_data,
        }
    }

    pub fn clear_digest(&self, tpm_crypto: &dyn crate::Crypto) -> TpmResult<Digest> {
        let mut out = StoreBuffer::new();
        self.store_clear(&mut out)?;
        Ok(tpm_crypto.sha1(&[out.as_slice()]))
    }
}

/// Cleartext of a sealed blob's `encData`.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub(crate) struct SealedData {
    pub payload: u8,
    pub auth_data: Secret,
    pub tpm_proof: Secret,
    pub stored_digest: Digest,
    pub data: Vec<u8>,
}

impl SealedData {
    pub fn to_bytes(&self) -> TpmResult<Vec<u8>> {
        let mut out = StoreBuffer::new();
        out.store_u8(self.payload)?;
        out.store_bytes(&self.auth_data.0)?;
        out.store_bytes(&self.tpm_proof.0)?;
        out.store_bytes(&self.stored_digest)?;
        out.store_sized(&self.data)?;
        Ok(out.into_vec())
    }

    pub fn from_bytes(bytes: &[u8]) -> TpmResult<Self> {
        let mut cur = Cursor::new(bytes);
        let sealed = SealedData {
            payload: cur.load_u8()?,
            auth_data: cur.load_secret()?,
            tpm_proof: cur.load_secret()?,
            stored_digest: cur.load_digest()?,
            data: cur.load_sized()?.to_vec(),
        };
        cur.expect_end()?;
        Ok(sealed)
    }
}

/// Shared Seal/Sealx body; `sealx` narrows the container to v1.2 and
/// transforms the inbound data under the session's ADIP scheme.
fn seal_common(tpm: &mut Tpm, ctx: &mut CommandCtx, sealx: bool) -> TpmResult<()> {
    let key_handle = ctx.params.load_u32()?;
    let enc_auth = ctx.params.load_digest()?;
    let pcr_info_raw = ctx.params.load_sized()?.to_vec();
    let in_data = ctx.params.load_sized()?.to_vec();
    ctx.finish_params(tpm)?;

    let (key, _) = tpm.get_key(key_handle, false, false)?;
    let key_digest = key.asymkey()?.pub_data_digest;
    let block = ctx.auth1.clone().ok_or(TpmRc::AuthFail)?;
    let auth = tpm.auth_get(
        block.handle,
        Some(ProtocolId::Osap),
        ET_KEYHANDLE,
        Some(&key_digest),
        None,
    )?;
    tpm.auth_check(&auth, &ctx.in_digest, &block, false, false)?;

    if in_data.is_empty() {
        return Err(TpmRc::BadParameter);
    }
    if key.usage != KEY_USAGE_STORAGE {
        return Err(TpmRc::InvalidKeyUsage);
    }
    if key.flags.contains(KeyFlags::MIGRATABLE) {
        return Err(TpmRc::InvalidKeyUsage);
    }

    // container version follows the shape of pcrInfo
    let long = if pcr_info_raw.is_empty() {
        sealx
    } else {
        let mut probe = Cursor::new(&pcr_info_raw);
        let tagged_long =
            probe.load_u16().map_err(|_| TpmRc::BadIndex)? == crate::types::TAG_PCR_INFO_LONG;
        if sealx && !tagged_long {
            return Err(TpmRc::BadIndex);
        }
        tagged_long
    };

    let mut stored = if long {
        let seal_info = if pcr_info_raw.is_empty() {
            None
        } else {
            let mut sub = Cursor::new(&pcr_info_raw);
            let mut info = PcrInfoLong::load(&mut sub).map_err(|_| TpmRc::BadIndex)?;
            sub.expect_end().map_err(|_| TpmRc::BadIndex)?;
            info.digest_at_creation = tpm
                .pcrs
                .composite(tpm.crypto.as_ref(), &info.creation_selection)?;
            info.locality_at_creation =
                LocalitySelection::from_modifier(tpm.stany_flags.locality_modifier)
                    .ok_or(TpmRc::BadLocality)?;
            Some(info)
        };
        let et = if sealx {
            match AdipScheme::from_repr(auth.adip).ok_or(TpmRc::InappropriateEnc)? {
                AdipScheme::Xor => u16::from(ET_KEY),
                AdipScheme::Aes128Ctr => u16::from(auth.adip) << 8,
            }
        } else {
            0x0000
        };
        StoredData::V12 {
            et,
            seal_info,
            enc_data: Vec::new(),
        }
    } else {
        let seal_info = if pcr_info_raw.is_empty() {
            None
        } else {
            let mut sub = Cursor::new(&pcr_info_raw);
            let mut info = PcrInfo::load(&mut sub).map_err(|_| TpmRc::BadIndex)?;
            sub.expect_end().map_err(|_| TpmRc::BadIndex)?;
            info.digest_at_creation =
                tpm.pcrs.composite(tpm.crypto.as_ref(), &info.selection)?;
            Some(info)
        };
        StoredData::V11 {
            seal_info,
            enc_data: Vec::new(),
        }
    };

    let a1 = tpm.adip_decrypt(&auth, &enc_auth, &block.nonce_odd, false)?;
    // well-known authorization values, including all zeros, are legal

    let data = if sealx {
        tpm.adip_crypt_data(
            auth.adip,
            &auth.shared_secret,
            &auth.nonce_even,
            &block.nonce_odd,
            &in_data,
        )?
    } else {
        in_data
    };

    let sealed = SealedData {
        payload: PT_SEAL,
        auth_data: a1,
        tpm_proof: tpm.permanent.tpm_proof.clone(),
        stored_digest: stored.clear_digest(tpm.crypto.as_ref())?,
        data,
    };
    let sealed_bytes = sealed.to_bytes()?;
    if sealed_bytes.len() + OAEP_OVERHEAD > key.modulus.len() {
        return Err(TpmRc::BadDataSize);
    }
    let enc = tpm
        .crypto
        .rsa_pub_encrypt_oaep(&key.rsa_public(), &sealed_bytes)?;
    stored.set_enc_data(enc);

    ctx.push_resp_auth(&auth, &block, false);
    stored.store(&mut ctx.out)
}

/// `TPM_Seal`
pub(crate) fn seal(tpm: &mut Tpm, ctx: &mut CommandCtx) -> TpmResult<()> {
    seal_common(tpm, ctx, false)
}

/// `TPM_Sealx`
pub(crate) fn sealx(tpm: &mut Tpm, ctx: &mut CommandCtx) -> TpmResult<()> {
    seal_common(tpm, ctx, true)
}

/// `TPM_Unseal`
pub(crate) fn unseal(tpm: &mut Tpm, ctx: &mut CommandCtx) -> TpmResult<()> {
    let parent_handle = ctx.params.load_u32()?;
    let stored = StoredData::load(&mut ctx.params)?;
    ctx.finish_params(tpm)?;

    let (parent, _) = tpm.get_key(parent_handle, false, false)?;
    let mut parent_auth: Option<(AuthCtx, crate::dispatch::AuthBlock)> = None;
    if ctx.tag == RequestTag::Auth2 {
        let block = ctx.auth1.clone().ok_or(TpmRc::AuthFail)?;
        let parent_digest = parent.asymkey()?.pub_data_digest;
        let usage_auth = parent.usage_auth()?.clone();
        let auth = tpm.auth_get(
            block.handle,
            None,
            ET_KEYHANDLE,
            Some(&parent_digest),
            Some(&usage_auth),
        )?;
        tpm.auth_check(&auth, &ctx.in_digest, &block, false, false)?;
        parent_auth = Some((auth, block));
    } else if parent.auth_data_usage != crate::types::AUTH_NEVER {
        return Err(TpmRc::AuthFail);
    }

    if parent.usage != KEY_USAGE_STORAGE {
        return Err(TpmRc::InvalidKeyUsage);
    }
    if parent.flags.contains(KeyFlags::MIGRATABLE) {
        return Err(TpmRc::InvalidKeyUsage);
    }

    // any failure decrypting or validating the envelope is reported as a
    // blob problem
    let sealed = (|| -> TpmResult<SealedData> {
        let clear = tpm
            .crypto
            .rsa_priv_decrypt_oaep(&parent.rsa_private()?, stored.enc_data())?;
        let sealed = SealedData::from_bytes(&clear)?;
        if sealed.tpm_proof != tpm.permanent.tpm_proof {
            return Err(TpmRc::NotSealedBlob);
        }
        if sealed.stored_digest != stored.clear_digest(tpm.crypto.as_ref())? {
            return Err(TpmRc::NotSealedBlob);
        }
        if sealed.payload != PT_SEAL {
            return Err(TpmRc::NotSealedBlob);
        }
        Ok(sealed)
    })()
    .map_err(|_| TpmRc::NotSealedBlob)?;

    match &stored {
        StoredData::V11 {
            seal_info: Some(info),
            ..
        } => info.check_digest(tpm)?,
        StoredData::V12 {
            seal_info: Some(info),
            ..
        } => info.check_digest(tpm)?,
        _ => {}
    }

    let data_block = if ctx.tag == RequestTag::Auth2 {
        ctx.auth2.clone()
    } else {
        ctx.auth1.clone()
    }
    .ok_or(TpmRc::AuthFail)?;
    let data_auth = tpm.auth_get(
        data_block.handle,
        Some(ProtocolId::Oiap),
        0,
        None,
        Some(&sealed.auth_data),
    )?;
    tpm.auth_check(&data_auth, &ctx.in_digest, &data_block, false, true)?;

    let et = match &stored {
        StoredData::V12 { et, .. } => *et,
        StoredData::V11 { .. } => 0,
    };
    let secret;
    if et != 0 {
        // sealed with transport encryption: the parent session re-encrypts
        // the output and must then die
        let (auth, block) = parent_auth.as_mut().ok_or(TpmRc::AuthFail)?;
        if !matches!(auth.protocol, ProtocolId::Osap | ProtocolId::Dsap) {
            return Err(TpmRc::BadMode);
        }
        let scheme = (et >> 8) as u8;
        secret = tpm.adip_crypt_data(
            scheme,
            &auth.shared_secret,
            &auth.nonce_even,
            &block.nonce_odd,
            &sealed.data,
        )?;
        block.continue_auth = false;
    } else {
        secret = sealed.data.clone();
    }

    if let Some((auth, block)) = parent_auth {
        ctx.push_resp_auth(&auth, &block, block.continue_auth);
    }
    ctx.push_resp_auth(&data_auth, &data_block, data_block.continue_auth);
    ctx.out.store_sized(&secret)
}

/// `TPM_UnBind`
pub(crate) fn unbind(tpm: &mut Tpm, ctx: &mut CommandCtx) -> TpmResult<()> {
    let key_handle = ctx.params.load_u32()?;
    let in_data = ctx.params.load_sized()?.to_vec();
    ctx.finish_params(tpm)?;

    let (key, _) = tpm.get_key(key_handle, false, false)?;
    let key_digest = key.asymkey()?.pub_data_digest;
    let usage_auth = key.usage_auth()?.clone();
    let block = ctx.auth1.clone().ok_or(TpmRc::AuthFail)?;
    let auth = tpm.auth_get(
        block.handle,
        None,
        ET_KEYHANDLE,
        Some(&key_digest),
        Some(&usage_auth),
    )?;
    tpm.auth_check(&auth, &ctx.in_digest, &block, false, false)?;

    if key.usage != KEY_USAGE_BIND && key.usage != KEY_USAGE_LEGACY {
        return Err(TpmRc::InvalidKeyUsage);
    }
    let private = key.rsa_private()?;
    let clear = match key.parms.enc_scheme {
        ES_RSAESOAEP_SHA1_MGF1 => tpm.crypto.rsa_priv_decrypt_oaep(&private, &in_data)?,
        ES_RSAESPKCSV15 => tpm.crypto.rsa_priv_decrypt_pkcs1(&private, &in_data)?,
        _ => return Err(TpmRc::InappropriateEnc),
    };

    let payload = if key.usage == KEY_USAGE_LEGACY && key.parms.enc_scheme == ES_RSAESPKCSV15 {
        // legacy PKCS#1 blobs carry no inner structure
        clear
    } else {
        let mut cur = Cursor::new(&clear);
        let ver = cur.load_bytes(4).map_err(|_| TpmRc::DecryptError)?;
        if ver != STRUCT_VER_11.as_slice() {
            return Err(TpmRc::BadVersion);
        }
        let payload_type = cur.load_u8().map_err(|_| TpmRc::DecryptError)?;
        if payload_type != PT_BIND {
            return Err(TpmRc::DecryptError);
        }
        cur.load_bytes(cur.len())?.to_vec()
    };

    ctx.push_resp_auth(&auth, &block, block.continue_auth);
    ctx.out.store_sized(&payload)
}

/// `TPM_CreateWrapKey`
pub(crate) fn create_wrap_key(tpm: &mut Tpm, ctx: &mut CommandCtx) -> TpmResult<()> {
    let parent_handle = ctx.params.load_u32()?;
    let data_usage_auth = ctx.params.load_digest()?;
    let data_migration_auth = ctx.params.load_digest()?;
    let key_info = Key::load(&mut ctx.params)?;
    ctx.finish_params(tpm)?;

    let (parent, _) = tpm.get_key(parent_handle, false, false)?;
    let parent_digest = parent.asymkey()?.pub_data_digest;
    let block = ctx.auth1.clone().ok_or(TpmRc::AuthFail)?;
    let auth = tpm.auth_get(
        block.handle,
        Some(ProtocolId::Osap),
        ET_KEYHANDLE,
        Some(&parent_digest),
        None,
    )?;
    tpm.auth_check(&auth, &ctx.in_digest, &block, false, false)?;

    key_info.check_properties(tpm.permanent_flags.contains(PermanentFlags::FIPS))?;
    if parent.usage != KEY_USAGE_STORAGE {
        return Err(TpmRc::InvalidKeyUsage);
    }
    if parent.flags.contains(KeyFlags::MIGRATABLE)
        && !key_info.flags.contains(KeyFlags::MIGRATABLE)
    {
        return Err(TpmRc::InvalidKeyUsage);
    }
    if key_info.usage == KEY_USAGE_IDENTITY || key_info.usage == KEY_USAGE_AUTHCHANGE {
        return Err(TpmRc::InvalidKeyUsage);
    }
    if key_info.flags.contains(KeyFlags::MIGRATE_AUTHORITY) {
        return Err(TpmRc::InvalidKeyUsage);
    }

    let (du1, dm1) = {
        let du1 = tpm.adip_decrypt(&auth, &data_usage_auth, &block.nonce_odd, false)?;
        let dm1 = tpm.adip_decrypt(&auth, &data_migration_auth, &block.nonce_odd, true)?;
        (du1, dm1)
    };

    debug!("create_wrap_key: generating {} bit key", {
        key_info.parms.rsa_parms().map_or(0, |p| p.key_bits)
    });
    let mut wrapped = generate_rsa_key(
        tpm,
        key_info.version,
        key_info.usage,
        key_info.flags,
        key_info.auth_data_usage,
        key_info.parms.clone(),
        key_info.pcr_info.clone(),
    )?;
    {
        let asym = wrapped.asym.as_mut().ok_or(TpmRc::Fail)?;
        asym.usage_auth = du1;
        asym.migration_auth = if wrapped.flags.contains(KeyFlags::MIGRATABLE) {
            dm1
        } else {
            tpm.permanent.tpm_proof.clone()
        };
    }
    let asym_bytes = wrapped.asym.as_ref().ok_or(TpmRc::Fail)?.to_bytes()?;
    if asym_bytes.len() + OAEP_OVERHEAD > parent.modulus.len() {
        return Err(TpmRc::BadDataSize);
    }
    wrapped.enc_data = tpm
        .crypto
        .rsa_pub_encrypt_oaep(&parent.rsa_public(), &asym_bytes)?;

    ctx.push_resp_auth(&auth, &block, false);
    wrapped.store(&mut ctx.out)
}

/// Shared load path of `TPM_LoadKey` and `TPM_LoadKey2`.
fn load_key_common(tpm: &mut Tpm, ctx: &mut CommandCtx) -> TpmResult<u32> {
    let parent_handle = ctx.params.load_u32()?;
    let mut in_key = Key::load(&mut ctx.params)?;
    ctx.finish_params(tpm)?;

    let (parent, parent_pcr_status) = tpm.get_key(parent_handle, false, false)?;
    if ctx.tag == RequestTag::Command {
        if parent.auth_data_usage != crate::types::AUTH_NEVER {
            return Err(TpmRc::AuthFail);
        }
    } else {
        let parent_digest = parent.asymkey()?.pub_data_digest;
        let usage_auth = parent.usage_auth()?.clone();
        let block = ctx.auth1.clone().ok_or(TpmRc::AuthFail)?;
        let auth = tpm.auth_get(
            block.handle,
            None,
            ET_KEYHANDLE,
            Some(&parent_digest),
            Some(&usage_auth),
        )?;
        tpm.auth_check(&auth, &ctx.in_digest, &block, false, false)?;
        ctx.push_resp_auth(&auth, &block, block.continue_auth);
    }

    if parent.usage != KEY_USAGE_STORAGE {
        return Err(TpmRc::InvalidKeyUsage);
    }
    in_key.check_properties(tpm.permanent_flags.contains(PermanentFlags::FIPS))?;

    let clear = tpm
        .crypto
        .rsa_priv_decrypt_oaep(&parent.rsa_private()?, &in_key.enc_data)?;
    let asym = {
        let mut cur = Cursor::new(&clear);
        let asym = StoreAsymkey::load(&mut cur).map_err(|_| TpmRc::DecryptError)?;
        cur.expect_end().map_err(|_| TpmRc::DecryptError)?;
        asym
    };

    // integrity: the sensitive half names the public half it belongs to
    if asym.pub_data_digest != in_key.pub_data_digest(tpm.crypto.as_ref())? {
        return Err(TpmRc::BadParameter);
    }
    if in_key.usage == KEY_USAGE_IDENTITY && in_key.flags.contains(KeyFlags::MIGRATABLE) {
        return Err(TpmRc::InvalidKeyUsage);
    }
    if in_key.usage == KEY_USAGE_AUTHCHANGE {
        return Err(TpmRc::InvalidKeyUsage);
    }
    if !in_key.flags.contains(KeyFlags::MIGRATABLE)
        && asym.migration_auth != tpm.permanent.tpm_proof
    {
        return Err(TpmRc::InvalidKeyUsage);
    }
    in_key.asym = Some(asym);

    let child_pcr_status = parent_pcr_status || parent.pcr_usage();
    let handle = tpm.keys.add(in_key, child_pcr_status)?;
    trace!("load_key: handle {handle:08x}");
    Ok(handle)
}

/// `TPM_LoadKey`
pub(crate) fn load_key(tpm: &mut Tpm, ctx: &mut CommandCtx) -> TpmResult<()> {
    let handle = load_key_common(tpm, ctx)?;
    ctx.out.store_u32(handle)
}

/// `TPM_LoadKey2`
pub(crate) fn load_key2(tpm: &mut Tpm, ctx: &mut CommandCtx) -> TpmResult<()> {
    let handle = load_key_common(tpm, ctx)?;
    // the handle is returned but excluded from the response HMAC so
    // management software may virtualize it
    ctx.exclude_out_from_digest = true;
    ctx.out.store_u32(handle)
}

/// `TPM_GetPubKey`
pub(crate) fn get_pub_key(tpm: &mut Tpm, ctx: &mut CommandCtx) -> TpmResult<()> {
    let key_handle = ctx.params.load_u32()?;
    ctx.finish_params(tpm)?;

    if key_handle == KH_EK {
        return Err(TpmRc::InvalidKeyHandle);
    }
    if key_handle == KH_SRK && !tpm.permanent_flags.contains(PermanentFlags::READ_SRK_PUB) {
        return Err(TpmRc::InvalidKeyHandle);
    }
    let (key, _) = tpm.get_key(key_handle, true, false)?;

    if ctx.tag == RequestTag::Auth1 {
        let key_digest = key.asymkey()?.pub_data_digest;
        let usage_auth = key.usage_auth()?.clone();
        let block = ctx.auth1.clone().ok_or(TpmRc::AuthFail)?;
        let auth = tpm.auth_get(
            block.handle,
            None,
            ET_KEYHANDLE,
            Some(&key_digest),
            Some(&usage_auth),
        )?;
        tpm.auth_check(&auth, &ctx.in_digest, &block, false, false)?;
        ctx.push_resp_auth(&auth, &block, block.continue_auth);
    } else if key.auth_data_usage == crate::types::AUTH_ALWAYS {
        return Err(TpmRc::AuthFail);
    }

    key.to_pubkey().store(&mut ctx.out)
}

/// `TPM_EvictKey`
pub(crate) fn evict_key(tpm: &mut Tpm, ctx: &mut CommandCtx) -> TpmResult<()> {
    let key_handle = ctx.params.load_u32()?;
    ctx.finish_params(tpm)?;
    if key_handle == KH_SRK || key_handle == KH_EK {
        return Err(TpmRc::InvalidKeyHandle);
    }
    tpm.keys.remove(key_handle)
}
