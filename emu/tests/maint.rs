// SPDX-License-Identifier: MIT

//! Maintenance archive cycle: manufacturer key installation, archive
//! creation and reload, and the kill switch.

mod common;

use common::*;
use tpm12_emu::{Crypto, Ordinal, RsaPrivate, RsaPublic, TpmRc};

const OWNER_AUTH: Auth = [0x0A; 20];
const SRK_AUTH: Auth = [0x0B; 20];
const BLOB_AUTH: Auth = [0x22; 20];

fn manu_pubkey_bytes(modulus: &[u8]) -> Vec<u8> {
    let mut out = key_parms(ES_RSAESOAEP_SHA1_MGF1, SS_NONE, 2048);
    out.extend_from_slice(&(modulus.len() as u32).to_be_bytes());
    out.extend_from_slice(modulus);
    out
}

fn load_manu_maint_pub(h: &mut Host, modulus: &[u8], anti_replay: &Auth) -> (u32, Vec<u8>) {
    let mut params = Vec::new();
    params.extend_from_slice(anti_replay);
    params.extend_from_slice(&manu_pubkey_bytes(modulus));
    let reply = call(
        &mut h.tpm,
        TAG_RQU_COMMAND,
        Ordinal::LoadManuMaintPub as u32,
        &params,
        &[],
    );
    (reply.rc, reply.out)
}

fn create_archive(h: &mut Host, owner_auth: &Auth, generate_random: bool) -> (u32, Vec<u8>, Vec<u8>) {
    let params = [u8::from(generate_random)];
    let mut sess = oiap(h);
    let nonce_odd = nonce(h);
    let reply = authed_call(
        h,
        Ordinal::CreateMaintenanceArchive as u32,
        &params,
        &mut [SessUse {
            sess: &mut sess,
            key: *owner_auth,
            continue_auth: false,
            nonce_odd,
        }],
        false,
    );
    if reply.rc != 0 {
        return (reply.rc, Vec::new(), Vec::new());
    }
    let random_len = be32(&reply.out[0..4]) as usize;
    let random = reply.out[4..4 + random_len].to_vec();
    let at = 4 + random_len;
    let archive_len = be32(&reply.out[at..at + 4]) as usize;
    let archive = reply.out[at + 4..at + 4 + archive_len].to_vec();
    (reply.rc, random, archive)
}

#[test]
fn maintenance_archive_cycle() {
    let mut h = host();

    // the manufacturer key is installed exactly once
    let manu = h.crypto.rsa_gen(2048, &[]).unwrap();
    let anti_replay: Auth = [0x5A; 20];
    let (rc_load, checksum) = load_manu_maint_pub(&mut h, &manu.modulus, &anti_replay);
    assert_eq!(rc_load, 0);
    let expected = h
        .crypto
        .sha1(&[&manu_pubkey_bytes(&manu.modulus), &anti_replay]);
    assert_eq!(checksum, expected);

    let (rc_again, _) = load_manu_maint_pub(&mut h, &manu.modulus, &anti_replay);
    assert_eq!(rc_again, rc(TpmRc::DisabledCmd));

    // the read ordinal republishes the checksum for a fresh nonce
    let anti_replay2: Auth = [0xA5; 20];
    let reply = call(
        &mut h.tpm,
        TAG_RQU_COMMAND,
        Ordinal::ReadManuMaintPub as u32,
        &anti_replay2,
        &[],
    );
    assert_eq!(reply.rc, 0);
    let expected = h
        .crypto
        .sha1(&[&manu_pubkey_bytes(&manu.modulus), &anti_replay2]);
    assert_eq!(reply.out, expected);

    let srk_modulus = take_ownership(&mut h, &OWNER_AUTH, &SRK_AUTH);

    // a blob sealed before the archive survives the maintenance reload
    let mut sess = osap(&mut h, ET_KEYHANDLE, KH_SRK, &SRK_AUTH);
    let shared = sess.shared.unwrap();
    let nonce_odd = nonce(&h);
    let enc_auth = xor20(
        &BLOB_AUTH,
        &adip_xor_even(&h, &shared, &sess.nonce_even, &nonce_odd),
    );
    let mut params = Vec::new();
    params.extend_from_slice(&KH_SRK.to_be_bytes());
    params.extend_from_slice(&enc_auth);
    params.extend_from_slice(&0u32.to_be_bytes());
    params.extend_from_slice(&6u32.to_be_bytes());
    params.extend_from_slice(b"legacy");
    let reply = authed_call(
        &mut h,
        Ordinal::Seal as u32,
        &params,
        &mut [SessUse {
            sess: &mut sess,
            key: shared,
            continue_auth: true,
            nonce_odd,
        }],
        false,
    );
    assert_eq!(reply.rc, 0);
    let sealed = reply.out;

    let (rc_archive, random, archive) = create_archive(&mut h, &OWNER_AUTH, false);
    assert_eq!(rc_archive, 0);
    assert!(random.is_empty());
    // the archive is a v1.2 key blob
    assert_eq!(&archive[0..2], &[0x00, 0x28]);

    // the manufacturer massages the blob: outer unwrap with the
    // manufacturer private key, rewrap to the destination SRK
    let enc_len = be32(&archive[archive.len() - 260..archive.len() - 256]) as usize;
    assert_eq!(enc_len, 256);
    let manu_priv = RsaPrivate {
        modulus: manu.modulus.clone(),
        exponent: vec![],
        prime: manu.p.clone(),
    };
    let x1 = h
        .crypto
        .rsa_priv_decrypt_oaep(&manu_priv, &archive[archive.len() - 256..])
        .unwrap();
    assert_eq!(x1.len(), 198);
    let rewrapped = h
        .crypto
        .rsa_pub_encrypt_oaep(
            &RsaPublic {
                modulus: srk_modulus,
                exponent: vec![],
            },
            &x1,
        )
        .unwrap();
    let mut massaged = archive.clone();
    let at = massaged.len() - 256;
    massaged[at..].copy_from_slice(&rewrapped);

    let mut params = Vec::new();
    params.extend_from_slice(&(massaged.len() as u32).to_be_bytes());
    params.extend_from_slice(&massaged);
    let mut sess = oiap(&mut h);
    let nonce_odd = nonce(&h);
    let reply = authed_call(
        &mut h,
        Ordinal::LoadMaintenanceArchive as u32,
        &params,
        &mut [SessUse {
            sess: &mut sess,
            key: OWNER_AUTH,
            continue_auth: false,
            nonce_odd,
        }],
        false,
    );
    assert_eq!(reply.rc, 0, "load archive failed: {:#x}", reply.rc);
    assert!(h.tpm.owner_installed());

    // after the reload the SRK usage auth is the source owner secret, and
    // the proof still matches the old sealed blob
    let mut params = Vec::new();
    params.extend_from_slice(&KH_SRK.to_be_bytes());
    params.extend_from_slice(&sealed);
    let mut parent = oiap(&mut h);
    let mut data = oiap(&mut h);
    let parent_nonce = nonce(&h);
    let data_nonce = nonce(&h);
    let reply = authed_call(
        &mut h,
        Ordinal::Unseal as u32,
        &params,
        &mut [
            SessUse {
                sess: &mut parent,
                key: OWNER_AUTH,
                continue_auth: false,
                nonce_odd: parent_nonce,
            },
            SessUse {
                sess: &mut data,
                key: BLOB_AUTH,
                continue_auth: false,
                nonce_odd: data_nonce,
            },
        ],
        false,
    );
    assert_eq!(reply.rc, 0, "post-maintenance unseal failed: {:#x}", reply.rc);
    let len = be32(&reply.out[0..4]) as usize;
    assert_eq!(&reply.out[4..4 + len], b"legacy");
}

#[test]
fn kill_switch_disables_archives() {
    let mut h = host();
    let manu = h.crypto.rsa_gen(2048, &[]).unwrap();
    let (rc_load, _) = load_manu_maint_pub(&mut h, &manu.modulus, &[0u8; 20]);
    assert_eq!(rc_load, 0);
    take_ownership(&mut h, &OWNER_AUTH, &SRK_AUTH);

    let (rc_archive, random, _) = create_archive(&mut h, &OWNER_AUTH, true);
    assert_eq!(rc_archive, 0);
    // generateRandom returns the inner wrap string
    assert_eq!(random.len(), 198);

    let mut sess = oiap(&mut h);
    let nonce_odd = nonce(&h);
    let reply = authed_call(
        &mut h,
        Ordinal::KillMaintenanceFeature as u32,
        &[],
        &mut [SessUse {
            sess: &mut sess,
            key: OWNER_AUTH,
            continue_auth: false,
            nonce_odd,
        }],
        false,
    );
    assert_eq!(reply.rc, 0);

    let (rc_after, _, _) = create_archive(&mut h, &OWNER_AUTH, false);
    assert_eq!(rc_after, rc(TpmRc::DisabledCmd));
}

#[test]
fn archive_requires_manufacturer_key() {
    let mut h = host();
    take_ownership(&mut h, &OWNER_AUTH, &SRK_AUTH);
    let (rc_archive, _, _) = create_archive(&mut h, &OWNER_AUTH, false);
    assert_eq!(rc_archive, rc(TpmRc::KeyNotFound));
}

#[test]
fn read_manu_maint_pub_without_key() {
    let mut h = host();
    let reply = call(
        &mut h.tpm,
        TAG_RQU_COMMAND,
        Ordinal::ReadManuMaintPub as u32,
        &[0u8; 20],
        &[],
    );
    assert_eq!(reply.rc, rc(TpmRc::KeyNotFound));
}
