// SPDX-License-Identifier: MIT

//! Lifecycle and ownership: startup variants, state saving, self-test,
//! endorsement and owner installation, owner-auth change, and the
//! capability queries.

use log::info;

use crate::dispatch::CommandCtx;
use crate::key::{generate_rsa_key, Key, KeyParms, KeyPcrInfo, PubKey};
use crate::nvstore::NvKey;
use crate::state::{PermanentFlags, TestState, Tpm};
use crate::types::{
    KeyFlags, ProtocolId, Secret, TpmRc, TpmResult, ALG_RSA, AUTH_NEVER, CAP_NV_LIST,
    CAP_ORD, CAP_PROPERTY, CAP_PROP_MANUFACTURER, CAP_PROP_PCR, CAP_VERSION, DIGEST_SIZE,
    ES_RSAESOAEP_SHA1_MGF1, ET_OWNER, ET_SRK, KEY_USAGE_STORAGE, MANUFACTURER, STARTUP_CLEAR,
    STARTUP_DEACTIVATED, STARTUP_STATE, STRUCT_VER_11,
};
use crate::{Ordinal, NUM_PCRS};

/// Upper bound on one `TPM_GetRandom` response.
const RANDOM_MAX: u32 = 1024;

/// `TPM_Startup`
pub(crate) fn startup(tpm: &mut Tpm, ctx: &mut CommandCtx) -> TpmResult<()> {
    let startup_type = ctx.params.load_u16()?;
    ctx.finish_params(tpm)?;

    match startup_type {
        STARTUP_CLEAR => {
            info!("startup: ST_CLEAR");
            tpm.volatile_reset();
            tpm.nvstore
                .truncate(NvKey::SaveState)
                .map_err(|_| TpmRc::Fail)?;
            tpm.nvstore
                .truncate(NvKey::Volatile)
                .map_err(|_| TpmRc::Fail)?;
        }
        STARTUP_STATE => {
            info!("startup: ST_STATE");
            let saved = tpm
                .nvstore
                .read(NvKey::SaveState)
                .map_err(|_| TpmRc::Fail)?
                .ok_or(TpmRc::Fail)?;
            let volatile = tpm
                .nvstore
                .read(NvKey::Volatile)
                .map_err(|_| TpmRc::Fail)?
                .ok_or(TpmRc::Fail)?;
            tpm.load_savestate_blob(&saved)?;
            tpm.load_volatile_blob(&volatile)?;
        }
        STARTUP_DEACTIVATED => {
            info!("startup: ST_DEACTIVATED");
            tpm.volatile_reset();
            tpm.stclear_flags.deactivated = true;
        }
        _ => return Err(TpmRc::BadParameter),
    }
    tpm.post_init = false;
    Ok(())
}

/// `TPM_SaveState`
pub(crate) fn save_state(tpm: &mut Tpm, ctx: &mut CommandCtx) -> TpmResult<()> {
    ctx.finish_params(tpm)?;
    let saved = tpm.serialize_savestate()?;
    let volatile = tpm.serialize_volatile()?;
    tpm.nvstore
        .write(NvKey::SaveState, &saved)
        .map_err(|_| TpmRc::Fail)?;
    tpm.nvstore
        .write(NvKey::Volatile, &volatile)
        .map_err(|_| TpmRc::Fail)
}

/// `TPM_SelfTestFull`
pub(crate) fn self_test_full(tpm: &mut Tpm, ctx: &mut CommandCtx) -> TpmResult<()> {
    ctx.finish_params(tpm)?;
    tpm.run_self_test();
    if tpm.test_state == TestState::Failure {
        Err(TpmRc::FailedSelfTest)
    } else {
        Ok(())
    }
}

/// `TPM_ContinueSelfTest`
pub(crate) fn continue_self_test(tpm: &mut Tpm, ctx: &mut CommandCtx) -> TpmResult<()> {
    ctx.finish_params(tpm)?;
    tpm.run_self_test();
    if tpm.test_state == TestState::Failure {
        Err(TpmRc::FailedSelfTest)
    } else {
        Ok(())
    }
}

/// `TPM_GetTestResult`
pub(crate) fn get_test_result(tpm: &mut Tpm, ctx: &mut CommandCtx) -> TpmResult<()> {
    ctx.finish_params(tpm)?;
    let result: u32 = match tpm.test_state {
        TestState::Passed => 0,
        TestState::Failure => 1,
    };
    ctx.out.store_sized(&result.to_be_bytes())
}

/// `TPM_GetRandom`
pub(crate) fn get_random(tpm: &mut Tpm, ctx: &mut CommandCtx) -> TpmResult<()> {
    let bytes_requested = ctx.params.load_u32()?;
    ctx.finish_params(tpm)?;
    let n = bytes_requested.min(RANDOM_MAX) as usize;
    let random = tpm.crypto.rand(n);
    ctx.out.store_sized(&random)
}

/// `TPM_GetCapability`
pub(crate) fn get_capability(tpm: &mut Tpm, ctx: &mut CommandCtx) -> TpmResult<()> {
    let cap_area = ctx.params.load_u32()?;
    let sub_cap = ctx.params.load_sized()?.to_vec();
    ctx.finish_params(tpm)?;

    let mut sub = crate::buffer::Cursor::new(&sub_cap);
    let resp: Vec<u8> = match cap_area {
        CAP_ORD => {
            let ordinal = sub.load_u32()?;
            vec![u8::from(Ordinal::from_repr(ordinal).is_some())]
        }
        CAP_PROPERTY => match sub.load_u32()? {
            CAP_PROP_PCR => (NUM_PCRS as u32).to_be_bytes().to_vec(),
            CAP_PROP_MANUFACTURER => MANUFACTURER.to_vec(),
            _ => return Err(TpmRc::BadMode),
        },
        CAP_VERSION => STRUCT_VER_11.to_vec(),
        CAP_NV_LIST => {
            let mut out = Vec::new();
            for index in tpm.nv.indexes() {
                out.extend_from_slice(&index.to_be_bytes());
            }
            out
        }
        _ => return Err(TpmRc::BadMode),
    };
    ctx.out.store_sized(&resp)
}

/// `TPM_SetOrdinalAuditStatus`
pub(crate) fn set_ordinal_audit_status(tpm: &mut Tpm, ctx: &mut CommandCtx) -> TpmResult<()> {
    let ordinal_to_audit = ctx.params.load_u32()?;
    let audit_state = ctx.params.load_bool()?;
    ctx.finish_params(tpm)?;

    let block = ctx.auth1.clone().ok_or(TpmRc::AuthFail)?;
    let owner_auth = tpm.permanent.owner_auth.clone();
    let auth = tpm.auth_get(block.handle, None, ET_OWNER, None, Some(&owner_auth))?;
    tpm.auth_check(&auth, &ctx.in_digest, &block, true, false)?;
    ctx.push_resp_auth(&auth, &block, block.continue_auth);

    if Ordinal::from_repr(ordinal_to_audit).is_none() {
        return Err(TpmRc::BadOrdinal);
    }
    tpm.permanent.ordinal_audit.retain(|&o| o != ordinal_to_audit);
    if audit_state {
        tpm.permanent.ordinal_audit.push(ordinal_to_audit);
        tpm.permanent.ordinal_audit.sort_unstable();
    }
    tpm.flush_permanent()
}

/// `TPM_CreateEndorsementKeyPair`
pub(crate) fn create_endorsement_key_pair(tpm: &mut Tpm, ctx: &mut CommandCtx) -> TpmResult<()> {
    let anti_replay = ctx.params.load_digest()?;
    let key_info = KeyParms::load(&mut ctx.params)?;
    ctx.finish_params(tpm)?;

    if tpm.permanent.ek.is_some() {
        return Err(TpmRc::DisabledCmd);
    }
    if key_info.algorithm != ALG_RSA || key_info.enc_scheme != ES_RSAESOAEP_SHA1_MGF1 {
        return Err(TpmRc::BadKeyProperty);
    }
    let rsa = key_info.rsa_parms()?;
    if rsa.key_bits < 1024 {
        return Err(TpmRc::BadKeyProperty);
    }

    info!("creating endorsement key ({} bits)", rsa.key_bits);
    let ek = generate_rsa_key(
        tpm,
        crate::key::KeyVersion::V12,
        KEY_USAGE_STORAGE,
        KeyFlags::empty(),
        AUTH_NEVER,
        key_info,
        KeyPcrInfo::None,
    )?;
    let pubkey = ek.to_pubkey();
    tpm.permanent.ek = Some(ek);
    tpm.flush_permanent()?;

    let pub_bytes = pubkey.to_bytes()?;
    let checksum = tpm.crypto.sha1(&[&pub_bytes, &anti_replay]);
    pubkey.store(&mut ctx.out)?;
    ctx.out.store_bytes(&checksum)
}

/// `TPM_ReadPubek`
pub(crate) fn read_pubek(tpm: &mut Tpm, ctx: &mut CommandCtx) -> TpmResult<()> {
    let anti_replay = ctx.params.load_digest()?;
    ctx.finish_params(tpm)?;

    if !tpm.permanent_flags.contains(PermanentFlags::READ_PUBEK) {
        return Err(TpmRc::DisabledCmd);
    }
    let ek = tpm.permanent.ek.as_ref().ok_or(TpmRc::NoEndorsement)?;
    let pubkey = ek.to_pubkey();
    let pub_bytes = pubkey.to_bytes()?;
    let checksum = tpm.crypto.sha1(&[&pub_bytes, &anti_replay]);
    pubkey.store(&mut ctx.out)?;
    ctx.out.store_bytes(&checksum)
}

/// `TPM_TakeOwnership`
pub(crate) fn take_ownership(tpm: &mut Tpm, ctx: &mut CommandCtx) -> TpmResult<()> {
    let protocol_id = ctx.params.load_u16()?;
    let enc_owner_auth = ctx.params.load_sized()?.to_vec();
    let enc_srk_auth = ctx.params.load_sized()?.to_vec();
    let srk_params = Key::load(&mut ctx.params)?;
    ctx.finish_params(tpm)?;

    if protocol_id != ProtocolId::Owner as u16 {
        return Err(TpmRc::BadParameter);
    }
    if !tpm.permanent_flags.contains(PermanentFlags::OWNERSHIP) {
        return Err(TpmRc::InstallDisabled);
    }
    if tpm.permanent.owner_installed {
        return Err(TpmRc::OwnerSet);
    }
    let ek = tpm
        .permanent
        .ek
        .as_ref()
        .ok_or(TpmRc::NoEndorsement)?
        .clone();

    let owner_auth_clear = tpm
        .crypto
        .rsa_priv_decrypt_oaep(&ek.rsa_private()?, &enc_owner_auth)?;
    if owner_auth_clear.len() != DIGEST_SIZE {
        return Err(TpmRc::BadParameter);
    }
    let owner_auth = Secret::from_slice(&owner_auth_clear);

    let block = ctx.auth1.clone().ok_or(TpmRc::AuthFail)?;
    let auth = tpm.auth_get(
        block.handle,
        Some(ProtocolId::Oiap),
        ET_OWNER,
        None,
        Some(&owner_auth),
    )?;
    tpm.auth_check(&auth, &ctx.in_digest, &block, false, false)?;
    ctx.push_resp_auth(&auth, &block, block.continue_auth);

    let srk_auth_clear = tpm
        .crypto
        .rsa_priv_decrypt_oaep(&ek.rsa_private()?, &enc_srk_auth)?;
    if srk_auth_clear.len() != DIGEST_SIZE {
        return Err(TpmRc::BadParameter);
    }
    let srk_auth = Secret::from_slice(&srk_auth_clear);

    if srk_params.usage != KEY_USAGE_STORAGE {
        return Err(TpmRc::InvalidKeyUsage);
    }
    if srk_params.flags.contains(KeyFlags::MIGRATABLE) {
        return Err(TpmRc::InvalidKeyUsage);
    }
    if srk_params.pcr_info != KeyPcrInfo::None {
        return Err(TpmRc::BadParameter);
    }
    srk_params.check_properties(tpm.permanent_flags.contains(PermanentFlags::FIPS))?;

    let new_proof = Secret::from_slice(&tpm.crypto.rand(DIGEST_SIZE));
    info!("take ownership: generating SRK");
    let mut srk = generate_rsa_key(
        tpm,
        srk_params.version,
        KEY_USAGE_STORAGE,
        srk_params.flags,
        srk_params.auth_data_usage,
        srk_params.parms.clone(),
        KeyPcrInfo::None,
    )?;
    {
        let asym = srk.asym.as_mut().ok_or(TpmRc::Fail)?;
        asym.usage_auth = srk_auth;
        asym.migration_auth = new_proof.clone();
    }
    let srk_pub = Key {
        enc_data: Vec::new(),
        asym: None,
        ..srk.clone()
    };

    tpm.permanent.tpm_proof = new_proof;
    tpm.permanent.owner_auth = owner_auth;
    tpm.permanent.srk = Some(srk);
    tpm.permanent.owner_installed = true;
    // a fresh owner re-arms maintenance
    tpm.permanent_flags.insert(PermanentFlags::ALLOW_MAINTENANCE);
    tpm.flush_permanent()?;

    srk_pub.store(&mut ctx.out)
}

/// `TPM_OwnerClear`
pub(crate) fn owner_clear(tpm: &mut Tpm, ctx: &mut CommandCtx) -> TpmResult<()> {
    ctx.finish_params(tpm)?;
    if tpm
        .permanent_flags
        .contains(PermanentFlags::DISABLE_OWNER_CLEAR)
    {
        return Err(TpmRc::ClearDisabled);
    }
    let block = ctx.auth1.clone().ok_or(TpmRc::AuthFail)?;
    let owner_auth = tpm.permanent.owner_auth.clone();
    let auth = tpm.auth_get(block.handle, None, ET_OWNER, None, Some(&owner_auth))?;
    tpm.auth_check(&auth, &ctx.in_digest, &block, true, false)?;
    ctx.push_resp_auth(&auth, &block, false);

    tpm.owner_clear_common(true);
    tpm.flush_permanent()
}

/// `TPM_ChangeAuthOwner`
pub(crate) fn change_auth_owner(tpm: &mut Tpm, ctx: &mut CommandCtx) -> TpmResult<()> {
    let protocol_id = ctx.params.load_u16()?;
    let new_auth_enc = ctx.params.load_digest()?;
    let entity_type = ctx.params.load_u16()?;
    ctx.finish_params(tpm)?;

    if protocol_id != ProtocolId::Adcp as u16 {
        return Err(TpmRc::BadParameter);
    }
    let block = ctx.auth1.clone().ok_or(TpmRc::AuthFail)?;
    let auth = tpm.auth_get(block.handle, Some(ProtocolId::Osap), ET_OWNER, None, None)?;
    tpm.auth_check(&auth, &ctx.in_digest, &block, true, false)?;
    ctx.push_resp_auth(&auth, &block, false);

    let new_auth = tpm.adip_decrypt(&auth, &new_auth_enc, &block.nonce_odd, false)?;
    match (entity_type & 0x00FF) as u8 {
        ET_OWNER => {
            info!("owner authorization changed");
            tpm.permanent.owner_auth = new_auth;
            tpm.stclear.auth_failures = 0;
            tpm.stclear.defend_count = 0;
            tpm.sessions
                .terminate_entity(ET_OWNER, None, Some(block.handle));
        }
        ET_SRK => {
            let srk = tpm.permanent.srk.as_mut().ok_or(TpmRc::NoSrk)?;
            let digest = srk.asym.as_ref().ok_or(TpmRc::Fail)?.pub_data_digest;
            srk.asym.as_mut().ok_or(TpmRc::Fail)?.usage_auth = new_auth;
            tpm.sessions
                .terminate_entity(ET_SRK, Some(&digest), Some(block.handle));
        }
        _ => return Err(TpmRc::WrongEntityType),
    }
    tpm.flush_permanent()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::StoreBuffer;

    #[test]
    fn random_cap() {
        assert!(RANDOM_MAX as usize + 16 < crate::MAX_COMMAND_SIZE);
    }

    #[test]
    fn capability_version_bytes() {
        let mut out = StoreBuffer::new();
        out.store_bytes(&STRUCT_VER_11).unwrap();
        assert_eq!(out.as_slice(), &[0x01, 0x01, 0x00, 0x00]);
    }
}
