// SPDX-License-Identifier: MIT

//! Seal/Unseal round trips: plain sealing, PCR-bound rejection, and the
//! Sealx transport-encrypted variant.

mod common;

use common::*;
use tpm12_emu::{Crypto, Ordinal, TpmRc};

const OWNER_AUTH: Auth = [0x0A; 20];
const SRK_AUTH: Auth = [0x0B; 20];
const KEY_AUTH: Auth = [0x11; 20];
const BLOB_AUTH: Auth = [0x22; 20];

fn seal_under(
    h: &mut Host,
    key_handle: u32,
    key_auth: &Auth,
    blob_auth: &Auth,
    pcr_info: &[u8],
    data: &[u8],
) -> (u32, Vec<u8>) {
    let mut sess = osap(h, ET_KEYHANDLE, key_handle, key_auth);
    let shared = sess.shared.unwrap();
    let nonce_odd = nonce(h);
    let enc_auth = xor20(
        blob_auth,
        &adip_xor_even(h, &shared, &sess.nonce_even, &nonce_odd),
    );
    let mut params = Vec::new();
    params.extend_from_slice(&key_handle.to_be_bytes());
    params.extend_from_slice(&enc_auth);
    params.extend_from_slice(&(pcr_info.len() as u32).to_be_bytes());
    params.extend_from_slice(pcr_info);
    params.extend_from_slice(&(data.len() as u32).to_be_bytes());
    params.extend_from_slice(data);
    let reply = authed_call(
        h,
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
    if reply.rc == 0 {
        // the seal operation always consumes its session
        assert!(!reply.trailers[0].continue_auth);
    }
    (reply.rc, reply.out)
}

fn unseal_under(
    h: &mut Host,
    key_handle: u32,
    key_auth: &Auth,
    blob_auth: &Auth,
    sealed: &[u8],
) -> (u32, Vec<u8>) {
    let mut params = Vec::new();
    params.extend_from_slice(&key_handle.to_be_bytes());
    params.extend_from_slice(sealed);
    let mut parent = oiap(h);
    let mut data = oiap(h);
    let parent_nonce = nonce(h);
    let data_nonce = nonce(h);
    let reply = authed_call(
        h,
        Ordinal::Unseal as u32,
        &params,
        &mut [
            SessUse {
                sess: &mut parent,
                key: *key_auth,
                continue_auth: false,
                nonce_odd: parent_nonce,
            },
            SessUse {
                sess: &mut data,
                key: *blob_auth,
                continue_auth: false,
                nonce_odd: data_nonce,
            },
        ],
        false,
    );
    if reply.rc != 0 {
        return (reply.rc, Vec::new());
    }
    let len = be32(&reply.out[0..4]) as usize;
    (reply.rc, reply.out[4..4 + len].to_vec())
}

#[test]
fn seal_unseal_round_trip() {
    let mut h = host();
    take_ownership(&mut h, &OWNER_AUTH, &SRK_AUTH);

    let template = key12_template(
        KEY_USAGE_STORAGE,
        0,
        0x01,
        ES_RSAESOAEP_SHA1_MGF1,
        SS_NONE,
        2048,
    );
    let wrapped = create_wrap_key(&mut h, &SRK_AUTH, &KEY_AUTH, &template);
    let created_modulus = parse_key_modulus(&wrapped);
    let handle = load_key2(&mut h, &SRK_AUTH, &wrapped);

    // the loaded key's public half matches what creation produced
    let mut sess = oiap(&mut h);
    let n = nonce(&h);
    let reply = authed_call(
        &mut h,
        Ordinal::GetPubKey as u32,
        &handle.to_be_bytes(),
        &mut [SessUse {
            sess: &mut sess,
            key: KEY_AUTH,
            continue_auth: false,
            nonce_odd: n,
        }],
        false,
    );
    assert_eq!(reply.rc, 0);
    assert_eq!(parse_pubkey_modulus(&reply.out), created_modulus);

    let (rc_seal, sealed) = seal_under(&mut h, handle, &KEY_AUTH, &BLOB_AUTH, &[], b"hello");
    assert_eq!(rc_seal, 0);
    let (rc_unseal, secret) = unseal_under(&mut h, handle, &KEY_AUTH, &BLOB_AUTH, &sealed);
    assert_eq!(rc_unseal, 0);
    assert_eq!(secret, b"hello");
}

#[test]
fn unseal_rejects_wrong_blob_auth() {
    let mut h = host();
    take_ownership(&mut h, &OWNER_AUTH, &SRK_AUTH);
    let (rc_seal, sealed) = seal_under(&mut h, KH_SRK, &SRK_AUTH, &BLOB_AUTH, &[], b"secret");
    assert_eq!(rc_seal, 0);
    let wrong: Auth = [0x99; 20];
    let (rc_unseal, _) = unseal_under(&mut h, KH_SRK, &SRK_AUTH, &wrong, &sealed);
    assert_eq!(rc_unseal, rc(TpmRc::Auth2Fail));
}

#[test]
fn pcr_binding_rejects_changed_state() {
    let mut h = host();
    take_ownership(&mut h, &OWNER_AUTH, &SRK_AUTH);

    let digest_x = h.crypto.sha1(&[b"x"]);
    extend(&mut h, 0, &digest_x);

    // TPM_PCR_INFO naming PCR 0 with its current composite as the release
    // digest
    let selection: &[u8] = &[0x00, 0x03, 0x01, 0x00, 0x00];
    let pcr0 = {
        let reply = call(
            &mut h.tpm,
            TAG_RQU_COMMAND,
            Ordinal::PcrRead as u32,
            &0u32.to_be_bytes(),
            &[],
        );
        assert_eq!(reply.rc, 0);
        reply.out
    };
    let composite = h
        .crypto
        .sha1(&[selection, &20u32.to_be_bytes(), &pcr0]);
    let mut pcr_info = Vec::new();
    pcr_info.extend_from_slice(selection);
    pcr_info.extend_from_slice(&composite);
    pcr_info.extend_from_slice(&[0u8; 20]);

    let (rc_seal, sealed) =
        seal_under(&mut h, KH_SRK, &SRK_AUTH, &BLOB_AUTH, &pcr_info, b"bound");
    assert_eq!(rc_seal, 0);

    // matching state releases the secret
    let (rc_ok, secret) = unseal_under(&mut h, KH_SRK, &SRK_AUTH, &BLOB_AUTH, &sealed);
    assert_eq!(rc_ok, 0);
    assert_eq!(secret, b"bound");

    // a further extend changes the composite
    let digest_y = h.crypto.sha1(&[b"y"]);
    extend(&mut h, 0, &digest_y);
    let (rc_bad, _) = unseal_under(&mut h, KH_SRK, &SRK_AUTH, &BLOB_AUTH, &sealed);
    assert_eq!(rc_bad, rc(TpmRc::WrongPcrVal));
}

#[test]
fn sealx_round_trip_with_transport_encryption() {
    let mut h = host();
    take_ownership(&mut h, &OWNER_AUTH, &SRK_AUTH);
    let data = b"sealx payload, longer than one mask block to cover mgf1".to_vec();

    // seal: input arrives ADIP-encrypted under the OSAP session
    let mut sess = osap(&mut h, ET_KEYHANDLE, KH_SRK, &SRK_AUTH);
    let shared = sess.shared.unwrap();
    let nonce_odd = nonce(&h);
    let enc_auth = xor20(
        &BLOB_AUTH,
        &adip_xor_even(&h, &shared, &sess.nonce_even, &nonce_odd),
    );
    let mask = h
        .crypto
        .mgf1(&[&shared, &sess.nonce_even, &nonce_odd, b"XOR"], data.len());
    let enc_data: Vec<u8> = data.iter().zip(mask.iter()).map(|(d, m)| d ^ m).collect();

    let mut params = Vec::new();
    params.extend_from_slice(&KH_SRK.to_be_bytes());
    params.extend_from_slice(&enc_auth);
    params.extend_from_slice(&0u32.to_be_bytes());
    params.extend_from_slice(&(enc_data.len() as u32).to_be_bytes());
    params.extend_from_slice(&enc_data);
    let reply = authed_call(
        &mut h,
        Ordinal::Sealx as u32,
        &params,
        &mut [SessUse {
            sess: &mut sess,
            key: shared,
            continue_auth: true,
            nonce_odd,
        }],
        false,
    );
    assert_eq!(reply.rc, 0, "sealx failed: {:#x}", reply.rc);
    let sealed = reply.out;
    // v1.2 container with a non-zero entity type marker
    assert_eq!(&sealed[0..2], &[0x00, 0x16]);
    assert_ne!(&sealed[2..4], &[0x00, 0x00]);

    // unseal: the parent session must be OSAP and the output comes back
    // re-encrypted under it
    let mut parent = osap(&mut h, ET_KEYHANDLE, KH_SRK, &SRK_AUTH);
    let parent_shared = parent.shared.unwrap();
    let parent_nonce_even = parent.nonce_even;
    let mut data_sess = oiap(&mut h);
    let parent_nonce = nonce(&h);
    let data_nonce = nonce(&h);
    let mut params = Vec::new();
    params.extend_from_slice(&KH_SRK.to_be_bytes());
    params.extend_from_slice(&sealed);
    let reply = authed_call(
        &mut h,
        Ordinal::Unseal as u32,
        &params,
        &mut [
            SessUse {
                sess: &mut parent,
                key: parent_shared,
                continue_auth: true,
                nonce_odd: parent_nonce,
            },
            SessUse {
                sess: &mut data_sess,
                key: BLOB_AUTH,
                continue_auth: false,
                nonce_odd: data_nonce,
            },
        ],
        false,
    );
    assert_eq!(reply.rc, 0, "unseal failed: {:#x}", reply.rc);
    // the parent session is forced closed
    assert!(!reply.trailers[0].continue_auth);

    let len = be32(&reply.out[0..4]) as usize;
    let enc_secret = &reply.out[4..4 + len];
    let mask = h.crypto.mgf1(
        &[&parent_shared, &parent_nonce_even, &parent_nonce, b"XOR"],
        enc_secret.len(),
    );
    let secret: Vec<u8> = enc_secret
        .iter()
        .zip(mask.iter())
        .map(|(d, m)| d ^ m)
        .collect();
    assert_eq!(secret, data);
}

#[test]
fn seal_rejects_migratable_parent_usage() {
    let mut h = host();
    take_ownership(&mut h, &OWNER_AUTH, &SRK_AUTH);

    // a bind key is not a storage key
    let template = key12_template(
        KEY_USAGE_BIND,
        0,
        0x01,
        ES_RSAESOAEP_SHA1_MGF1,
        SS_NONE,
        2048,
    );
    let wrapped = create_wrap_key(&mut h, &SRK_AUTH, &KEY_AUTH, &template);
    let handle = load_key2(&mut h, &SRK_AUTH, &wrapped);
    let (rc_seal, _) = seal_under(&mut h, handle, &KEY_AUTH, &BLOB_AUTH, &[], b"x");
    assert_eq!(rc_seal, rc(TpmRc::InvalidKeyUsage));
}

#[test]
fn unbind_round_trip() {
    let mut h = host();
    take_ownership(&mut h, &OWNER_AUTH, &SRK_AUTH);

    let template = key12_template(
        KEY_USAGE_BIND,
        0,
        0x01,
        ES_RSAESOAEP_SHA1_MGF1,
        SS_NONE,
        2048,
    );
    let wrapped = create_wrap_key(&mut h, &SRK_AUTH, &KEY_AUTH, &template);
    let modulus = parse_key_modulus(&wrapped);
    let handle = load_key2(&mut h, &SRK_AUTH, &wrapped);

    // host-side Tspi_Data_Bind: TPM_BOUND_DATA under the bind public key
    let mut bound = Vec::new();
    bound.extend_from_slice(&[0x01, 0x01, 0x00, 0x00]);
    bound.push(0x02); // TPM_PT_BIND
    bound.extend_from_slice(b"bound payload");
    let blob = h
        .crypto
        .rsa_pub_encrypt_oaep(
            &tpm12_emu::RsaPublic {
                modulus,
                exponent: vec![],
            },
            &bound,
        )
        .unwrap();

    let mut params = Vec::new();
    params.extend_from_slice(&handle.to_be_bytes());
    params.extend_from_slice(&(blob.len() as u32).to_be_bytes());
    params.extend_from_slice(&blob);
    let mut sess = oiap(&mut h);
    let n = nonce(&h);
    let reply = authed_call(
        &mut h,
        Ordinal::UnBind as u32,
        &params,
        &mut [SessUse {
            sess: &mut sess,
            key: KEY_AUTH,
            continue_auth: false,
            nonce_odd: n,
        }],
        false,
    );
    assert_eq!(reply.rc, 0, "unbind failed: {:#x}", reply.rc);
    let len = be32(&reply.out[0..4]) as usize;
    assert_eq!(&reply.out[4..4 + len], b"bound payload");
}
