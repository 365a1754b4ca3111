// SPDX-License-Identifier: MIT

//! Authorization protocol behavior: ADIP owner-auth change under both
//! encryption schemes, session consumption on failure, entity binding, and
//! the dictionary-attack lockout.

mod common;

use common::*;
use tpm12_emu::{Crypto, Ordinal, TpmRc};

const OWNER_AUTH: Auth = [0x11; 20];
const NEW_OWNER_AUTH: Auth = [0x33; 20];
const SRK_AUTH: Auth = [0x0B; 20];

/// An owner-authorized no-op: enable auditing of `TPM_Extend`.
fn owner_probe(h: &mut Host, owner_auth: &Auth) -> u32 {
    let mut params = Vec::new();
    params.extend_from_slice(&(Ordinal::Extend as u32).to_be_bytes());
    params.push(1);
    let mut sess = oiap(h);
    let nonce_odd = nonce(h);
    authed_call(
        h,
        Ordinal::SetOrdinalAuditStatus as u32,
        &params,
        &mut [SessUse {
            sess: &mut sess,
            key: *owner_auth,
            continue_auth: false,
            nonce_odd,
        }],
        false,
    )
    .rc
}

fn change_auth_owner_aes(h: &mut Host, owner_auth: &Auth, new_auth: &Auth) -> u32 {
    let mut sess = osap(h, ET_OWNER | ET_ADIP_AES128_CTR, KH_OWNER, owner_auth);
    let shared = sess.shared.unwrap();
    let nonce_odd = nonce(h);
    let iv = h.crypto.sha1(&[&sess.nonce_even, &nonce_odd]);
    let enc_new = h
        .crypto
        .aes128_ctr_tpm(&shared[..16], &iv, new_auth)
        .unwrap();

    let mut params = Vec::new();
    params.extend_from_slice(&0x0004u16.to_be_bytes()); // TPM_PID_ADCP
    params.extend_from_slice(&enc_new);
    params.extend_from_slice(&ET_OWNER.to_be_bytes());
    authed_call(
        h,
        Ordinal::ChangeAuthOwner as u32,
        &params,
        &mut [SessUse {
            sess: &mut sess,
            key: shared,
            continue_auth: true,
            nonce_odd,
        }],
        false,
    )
    .rc
}

#[test]
fn change_auth_owner_with_aes_ctr_adip() {
    let mut h = host();
    take_ownership(&mut h, &OWNER_AUTH, &SRK_AUTH);

    assert_eq!(owner_probe(&mut h, &OWNER_AUTH), 0);
    assert_eq!(change_auth_owner_aes(&mut h, &OWNER_AUTH, &NEW_OWNER_AUTH), 0);

    // the old secret no longer authorizes, the new one does
    assert_eq!(owner_probe(&mut h, &OWNER_AUTH), rc(TpmRc::AuthFail));
    assert_eq!(owner_probe(&mut h, &NEW_OWNER_AUTH), 0);
}

#[test]
fn change_auth_owner_with_xor_adip() {
    let mut h = host();
    take_ownership(&mut h, &OWNER_AUTH, &SRK_AUTH);

    let mut sess = osap(&mut h, ET_OWNER, KH_OWNER, &OWNER_AUTH);
    let shared = sess.shared.unwrap();
    let nonce_odd = nonce(&h);
    let enc_new = xor20(
        &NEW_OWNER_AUTH,
        &adip_xor_even(&h, &shared, &sess.nonce_even, &nonce_odd),
    );
    let mut params = Vec::new();
    params.extend_from_slice(&0x0004u16.to_be_bytes());
    params.extend_from_slice(&enc_new);
    params.extend_from_slice(&ET_OWNER.to_be_bytes());
    let reply = authed_call(
        &mut h,
        Ordinal::ChangeAuthOwner as u32,
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
    // continueAuthSession is forced off
    assert!(!reply.trailers[0].continue_auth);
    assert_eq!(owner_probe(&mut h, &NEW_OWNER_AUTH), 0);
}

#[test]
fn failed_auth_consumes_the_session() {
    let mut h = host();
    take_ownership(&mut h, &OWNER_AUTH, &SRK_AUTH);

    let mut sess = oiap(&mut h);
    let handle = sess.handle;
    let bad_key: Auth = [0xFF; 20];
    let mut params = Vec::new();
    params.extend_from_slice(&(Ordinal::Extend as u32).to_be_bytes());
    params.push(1);
    let nonce_odd = nonce(&h);
    let reply = authed_call(
        &mut h,
        Ordinal::SetOrdinalAuditStatus as u32,
        &params,
        &mut [SessUse {
            sess: &mut sess,
            key: bad_key,
            continue_auth: true,
            nonce_odd,
        }],
        false,
    );
    assert_eq!(reply.rc, rc(TpmRc::AuthFail));

    // the handle is gone: terminating it again reports an invalid handle
    let reply = call(
        &mut h.tpm,
        TAG_RQU_COMMAND,
        Ordinal::TerminateHandle as u32,
        &handle.to_be_bytes(),
        &[],
    );
    assert_eq!(reply.rc, rc(TpmRc::InvalidAuthHandle));
}

#[test]
fn successful_use_rolls_the_nonce() {
    let mut h = host();
    take_ownership(&mut h, &OWNER_AUTH, &SRK_AUTH);

    let mut sess = oiap(&mut h);
    let first_even = sess.nonce_even;
    let mut params = Vec::new();
    params.extend_from_slice(&(Ordinal::Extend as u32).to_be_bytes());
    params.push(1);
    let nonce_odd = nonce(&h);
    let reply = authed_call(
        &mut h,
        Ordinal::SetOrdinalAuditStatus as u32,
        &params,
        &mut [SessUse {
            sess: &mut sess,
            key: OWNER_AUTH,
            continue_auth: true,
            nonce_odd,
        }],
        false,
    );
    assert_eq!(reply.rc, 0);
    assert_ne!(sess.nonce_even, first_even);

    // the rolled nonce keeps the session usable
    let mut params = Vec::new();
    params.extend_from_slice(&(Ordinal::Extend as u32).to_be_bytes());
    params.push(0);
    let nonce_odd = nonce(&h);
    let reply = authed_call(
        &mut h,
        Ordinal::SetOrdinalAuditStatus as u32,
        &params,
        &mut [SessUse {
            sess: &mut sess,
            key: OWNER_AUTH,
            continue_auth: false,
            nonce_odd,
        }],
        false,
    );
    assert_eq!(reply.rc, 0);
}

#[test]
fn osap_session_is_bound_to_its_entity() {
    let mut h = host();
    take_ownership(&mut h, &OWNER_AUTH, &SRK_AUTH);

    // an owner-bound OSAP session cannot authorize a key-bound ordinal
    let mut sess = osap(&mut h, ET_OWNER, KH_OWNER, &OWNER_AUTH);
    let shared = sess.shared.unwrap();
    let nonce_odd = nonce(&h);
    let enc_auth = xor20(
        &[0x22; 20],
        &adip_xor_even(&h, &shared, &sess.nonce_even, &nonce_odd),
    );
    let mut params = Vec::new();
    params.extend_from_slice(&KH_SRK.to_be_bytes());
    params.extend_from_slice(&enc_auth);
    params.extend_from_slice(&0u32.to_be_bytes());
    params.extend_from_slice(&5u32.to_be_bytes());
    params.extend_from_slice(b"hello");
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
    assert_eq!(reply.rc, rc(TpmRc::AuthFail));
}

#[test]
fn repeated_owner_failures_arm_the_lockout() {
    let mut h = host();
    take_ownership(&mut h, &OWNER_AUTH, &SRK_AUTH);

    let bad: Auth = [0xEE; 20];
    for _ in 0..5 {
        assert_eq!(owner_probe(&mut h, &bad), rc(TpmRc::AuthFail));
    }
    // the next gated command trips the running lock without consuming the
    // session
    let mut sess = oiap(&mut h);
    let handle = sess.handle;
    let mut params = Vec::new();
    params.extend_from_slice(&(Ordinal::Extend as u32).to_be_bytes());
    params.push(1);
    let nonce_odd = nonce(&h);
    let reply = authed_call(
        &mut h,
        Ordinal::SetOrdinalAuditStatus as u32,
        &params,
        &mut [SessUse {
            sess: &mut sess,
            key: OWNER_AUTH,
            continue_auth: true,
            nonce_odd,
        }],
        false,
    );
    assert_eq!(reply.rc, rc(TpmRc::DefendLockRunning));

    // the session survived the transient
    let reply = call(
        &mut h.tpm,
        TAG_RQU_COMMAND,
        Ordinal::TerminateHandle as u32,
        &handle.to_be_bytes(),
        &[],
    );
    assert_eq!(reply.rc, 0);
}

#[test]
fn session_table_exhaustion() {
    let mut h = host();
    for _ in 0..16 {
        oiap(&mut h);
    }
    let reply = call(&mut h.tpm, TAG_RQU_COMMAND, Ordinal::Oiap as u32, &[], &[]);
    assert_eq!(reply.rc, rc(TpmRc::Resources));
}

#[test]
fn flush_specific_releases_sessions_and_keys() {
    let mut h = host();
    take_ownership(&mut h, &OWNER_AUTH, &SRK_AUTH);

    let sess = oiap(&mut h);
    let mut params = Vec::new();
    params.extend_from_slice(&sess.handle.to_be_bytes());
    params.extend_from_slice(&2u32.to_be_bytes()); // TPM_RT_AUTH
    let reply = call(
        &mut h.tpm,
        TAG_RQU_COMMAND,
        Ordinal::FlushSpecific as u32,
        &params,
        &[],
    );
    assert_eq!(reply.rc, 0);

    // flushing the SRK is refused
    let mut params = Vec::new();
    params.extend_from_slice(&KH_SRK.to_be_bytes());
    params.extend_from_slice(&1u32.to_be_bytes()); // TPM_RT_KEY
    let reply = call(
        &mut h.tpm,
        TAG_RQU_COMMAND,
        Ordinal::FlushSpecific as u32,
        &params,
        &[],
    );
    assert_eq!(reply.rc, rc(TpmRc::InvalidKeyHandle));
}

#[test]
fn get_random_returns_requested_bytes() {
    let mut h = host();
    let reply = call(
        &mut h.tpm,
        TAG_RQU_COMMAND,
        Ordinal::GetRandom as u32,
        &32u32.to_be_bytes(),
        &[],
    );
    assert_eq!(reply.rc, 0);
    assert_eq!(be32(&reply.out[0..4]), 32);
    assert_ne!(&reply.out[4..36], &[0u8; 32]);
}
