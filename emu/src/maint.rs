// SPDX-License-Identifier: MIT

//! The maintenance archive: owner-auth or random inner wrap over an
//! OAEP-encoded copy of the SRK's sensitive half, outer-wrapped to the
//! manufacturer public key, and the ordinals that manage the feature.

use log::info;
use zeroize::Zeroize;

use crate::buffer::{Cursor, StoreBuffer};
use crate::crypto::{oaep_seed_decode, oaep_seed_encode};
use crate::dispatch::CommandCtx;
use crate::key::{Key, PubKey, StoreAsymkey};
use crate::state::{PermanentFlags, Tpm};
use crate::types::{
    Secret, TpmRc, TpmResult, ALG_RSA, DIGEST_SIZE, ES_RSAESOAEP_SHA1_MGF1, ET_OWNER, PT_ASYM,
    PT_MAINT,
};

/// `TPM_MIGRATE_ASYMKEY` body carried inside the archive.
struct MigrateAsymkey {
    payload: u8,
    usage_auth: Secret,
    pub_data_digest: [u8; DIGEST_SIZE],
    part_priv_key: Vec<u8>,
}

impl MigrateAsymkey {
    fn to_bytes(&self) -> TpmResult<Vec<u8>> {
        let mut out = StoreBuffer::new();
        out.store_u8(self.payload)?;
        out.store_bytes(&self.usage_auth.0)?;
        out.store_bytes(&self.pub_data_digest)?;
        out.store_sized(&self.part_priv_key)?;
        Ok(out.into_vec())
    }

    fn from_bytes(bytes: &[u8]) -> TpmResult<Self> {
        let mut cur = Cursor::new(bytes);
        let m = MigrateAsymkey {
            payload: cur.load_u8()?,
            usage_auth: cur.load_secret()?,
            pub_data_digest: cur.load_digest()?,
            part_priv_key: cur.load_sized()?.to_vec(),
        };
        cur.expect_end()?;
        Ok(m)
    }
}

fn owner_auth_block(tpm: &mut Tpm, ctx: &mut CommandCtx) -> TpmResult<crate::session::AuthCtx> {
    let block = ctx.auth1.clone().ok_or(TpmRc::AuthFail)?;
    let owner_auth = tpm.permanent.owner_auth.clone();
    let auth = tpm.auth_get(block.handle, None, ET_OWNER, None, Some(&owner_auth))?;
    tpm.auth_check(&auth, &ctx.in_digest, &block, true, false)?;
    ctx.push_resp_auth(&auth, &block, block.continue_auth);
    Ok(auth)
}

/// `TPM_CreateMaintenanceArchive`
pub(crate) fn create_maintenance_archive(tpm: &mut Tpm, ctx: &mut CommandCtx) -> TpmResult<()> {
    let generate_random = ctx.params.load_bool()?;
    ctx.finish_params(tpm)?;

    if !tpm.permanent_flags.contains(PermanentFlags::ALLOW_MAINTENANCE) {
        return Err(TpmRc::DisabledCmd);
    }
    owner_auth_block(tpm, ctx)?;
    let manu = tpm
        .permanent
        .manu_maint_pub
        .clone()
        .ok_or(TpmRc::KeyNotFound)?;
    let srk = tpm.permanent.srk.clone().ok_or(TpmRc::NoSrk)?;
    let srk_asym = srk.asymkey()?;

    // the private prime, in its serialized element form, splits into the
    // OAEP seed and the carried remainder
    let mut priv_element = StoreBuffer::new();
    priv_element.store_sized(&srk_asym.prime)?;
    let mut priv_element = priv_element.into_vec();
    let (k1, k2) = priv_element.split_at(DIGEST_SIZE);

    let m1 = MigrateAsymkey {
        payload: PT_MAINT,
        usage_auth: tpm.permanent.tpm_proof.clone(),
        pub_data_digest: srk_asym.pub_data_digest,
        part_priv_key: k2.to_vec(),
    };
    let mut o1 = oaep_seed_encode(&m1.to_bytes()?, &tpm.permanent.owner_auth.0, k1);

    let (r1, random_out) = if generate_random {
        let r1 = tpm.crypto.rand(o1.len());
        (r1.clone(), r1)
    } else {
        (
            tpm.crypto.mgf1(&[&tpm.permanent.owner_auth.0], o1.len()),
            Vec::new(),
        )
    };
    let x1: Vec<u8> = o1.iter().zip(r1.iter()).map(|(o, r)| o ^ r).collect();
    o1.zeroize();
    priv_element.zeroize();

    let mut archive = Key {
        enc_data: Vec::new(),
        asym: None,
        ..srk.clone()
    };
    let manu_exponent = match manu.parms.rsa_parms() {
        Ok(parms) => parms.exponent,
        Err(_) => Vec::new(),
    };
    archive.enc_data = tpm.crypto.rsa_pub_encrypt_oaep(
        &crate::RsaPublic {
            modulus: manu.modulus.clone(),
            exponent: manu_exponent,
        },
        &x1,
    )?;

    tpm.permanent_flags.insert(PermanentFlags::MAINTENANCE_DONE);
    tpm.flush_permanent()?;
    info!("maintenance archive created");

    ctx.out.store_sized(&random_out)?;
    ctx.out.store_sized(&archive.to_bytes()?)
}

/// `TPM_LoadMaintenanceArchive`
pub(crate) fn load_maintenance_archive(tpm: &mut Tpm, ctx: &mut CommandCtx) -> TpmResult<()> {
    let archive_raw = ctx.params.load_sized()?.to_vec();
    ctx.finish_params(tpm)?;

    if !tpm.permanent_flags.contains(PermanentFlags::ALLOW_MAINTENANCE) {
        return Err(TpmRc::DisabledCmd);
    }
    owner_auth_block(tpm, ctx)?;

    let mut new_srk = {
        let mut cur = Cursor::new(&archive_raw);
        let key = Key::load(&mut cur)?;
        cur.expect_end()?;
        key
    };
    let srk = tpm.permanent.srk.as_ref().ok_or(TpmRc::NoSrk)?;
    let x1 = tpm
        .crypto
        .rsa_priv_decrypt_oaep(&srk.rsa_private()?, &new_srk.enc_data)?;
    let r1 = tpm
        .crypto
        .mgf1(&[&tpm.permanent.owner_auth.0], x1.len());
    let mut o1: Vec<u8> = x1.iter().zip(r1.iter()).map(|(x, r)| x ^ r).collect();
    let (phash, seed, m1_bytes) = oaep_seed_decode(&o1)?;
    o1.zeroize();
    let m1 = MigrateAsymkey::from_bytes(&m1_bytes)?;
    if m1.payload != PT_MAINT {
        return Err(TpmRc::DecryptError);
    }

    // rebuild the private element from the seed and the carried remainder
    let mut priv_element = Vec::with_capacity(DIGEST_SIZE + m1.part_priv_key.len());
    priv_element.extend_from_slice(&seed);
    priv_element.extend_from_slice(&m1.part_priv_key);
    let prime = {
        let mut cur = Cursor::new(&priv_element);
        let prime = cur.load_sized().map_err(|_| TpmRc::DecryptError)?.to_vec();
        cur.expect_end().map_err(|_| TpmRc::DecryptError)?;
        prime
    };
    priv_element.zeroize();

    // the source owner secret arrives as the OAEP pHash, the source proof
    // as the carried usage auth
    let source_owner_auth = phash;
    let source_tpm_proof = m1.usage_auth.clone();

    tpm.owner_clear_common(false);

    let asym = StoreAsymkey {
        payload: PT_ASYM,
        usage_auth: source_owner_auth.clone(),
        migration_auth: source_owner_auth.clone(),
        pub_data_digest: m1.pub_data_digest,
        prime,
    };
    new_srk.enc_data = asym.to_bytes()?;
    new_srk.asym = Some(asym);

    tpm.permanent.srk = Some(new_srk);
    tpm.permanent.tpm_proof = source_tpm_proof;
    tpm.permanent.owner_auth = source_owner_auth;
    tpm.permanent.owner_installed = true;
    tpm.permanent_flags.insert(PermanentFlags::MAINTENANCE_DONE);
    tpm.flush_permanent()?;
    info!("maintenance archive loaded, owner migrated");
    Ok(())
}

/// `TPM_KillMaintenanceFeature`
pub(crate) fn kill_maintenance_feature(tpm: &mut Tpm, ctx: &mut CommandCtx) -> TpmResult<()> {
    ctx.finish_params(tpm)?;
    owner_auth_block(tpm, ctx)?;
    tpm.permanent_flags.remove(PermanentFlags::ALLOW_MAINTENANCE);
    tpm.flush_permanent()?;
    info!("maintenance feature disabled");
    Ok(())
}

/// `TPM_LoadManuMaintPub`
pub(crate) fn load_manu_maint_pub(tpm: &mut Tpm, ctx: &mut CommandCtx) -> TpmResult<()> {
    let anti_replay = ctx.params.load_digest()?;
    let pub_key = PubKey::load(&mut ctx.params)?;
    ctx.finish_params(tpm)?;

    if !tpm.permanent.allow_load_maint_pub {
        return Err(TpmRc::DisabledCmd);
    }
    if pub_key.parms.algorithm != ALG_RSA
        || pub_key.parms.enc_scheme != ES_RSAESOAEP_SHA1_MGF1
    {
        return Err(TpmRc::BadKeyProperty);
    }
    pub_key.parms.rsa_parms()?;

    let checksum = tpm
        .crypto
        .sha1(&[&pub_key.to_bytes()?, &anti_replay]);
    tpm.permanent.manu_maint_pub = Some(pub_key);
    tpm.permanent.allow_load_maint_pub = false;
    tpm.flush_permanent()?;
    info!("manufacturer maintenance key loaded");
    ctx.out.store_bytes(&checksum)
}

/// `TPM_ReadManuMaintPub`
pub(crate) fn read_manu_maint_pub(tpm: &mut Tpm, ctx: &mut CommandCtx) -> TpmResult<()> {
    let anti_replay = ctx.params.load_digest()?;
    ctx.finish_params(tpm)?;

    let manu = tpm
        .permanent
        .manu_maint_pub
        .as_ref()
        .ok_or(TpmRc::KeyNotFound)?;
    let checksum = tpm.crypto.sha1(&[&manu.to_bytes()?, &anti_replay]);
    ctx.out.store_bytes(&checksum)
}
