// SPDX-License-Identifier: MIT
#![allow(dead_code)]

//! Wire-level test client: frames commands, drives OIAP/OSAP sessions with
//! rolling nonces, computes ADIP encryptions, and verifies every response
//! HMAC against the published output parameters.

use std::rc::Rc;

use tpm12_emu::{
    Crypto, FixedPlatform, MemNvStore, NvStore, Ordinal, RsaPublic, SoftCrypto, Tpm, TpmOptions,
    TpmRc,
};

pub const TAG_RQU_COMMAND: u16 = 0x00C1;
pub const TAG_RQU_AUTH1_COMMAND: u16 = 0x00C2;
pub const TAG_RQU_AUTH2_COMMAND: u16 = 0x00C3;

pub const STARTUP_CLEAR: u16 = 0x0001;
pub const STARTUP_STATE: u16 = 0x0002;

pub const KH_SRK: u32 = 0x4000_0000;
pub const KH_OWNER: u32 = 0x4000_0001;

pub const ET_KEYHANDLE: u16 = 0x0001;
pub const ET_OWNER: u16 = 0x0002;
pub const ET_NV: u16 = 0x000B;
pub const ET_ADIP_AES128_CTR: u16 = 0x0600;

pub const KEY_USAGE_STORAGE: u16 = 0x0011;
pub const KEY_USAGE_BIND: u16 = 0x0014;
pub const ES_NONE: u16 = 0x0001;
pub const ES_RSAESOAEP_SHA1_MGF1: u16 = 0x0003;
pub const SS_NONE: u16 = 0x0001;

pub const NV_INDEX_LOCK: u32 = 0xFFFF_FFFF;
pub const LOC_ALL: u8 = 0x1F;

pub type Auth = [u8; 20];

pub struct Host {
    pub tpm: Tpm,
    pub platform: Rc<FixedPlatform>,
    pub crypto: SoftCrypto,
}

pub fn host_with_store(store: Box<dyn NvStore>) -> Host {
    let platform = Rc::new(FixedPlatform::new());
    let tpm = Tpm::new(
        Box::new(SoftCrypto),
        store,
        Box::new(Rc::clone(&platform)),
        TpmOptions::default(),
    )
    .unwrap();
    Host {
        tpm,
        platform,
        crypto: SoftCrypto,
    }
}

/// A powered-on TPM that has processed `TPM_Startup(ST_CLEAR)`.
pub fn host() -> Host {
    let mut h = host_with_store(Box::new(MemNvStore::new()));
    startup(&mut h, STARTUP_CLEAR);
    h
}

pub fn startup(h: &mut Host, startup_type: u16) {
    let reply = call(
        &mut h.tpm,
        TAG_RQU_COMMAND,
        Ordinal::Startup as u32,
        &startup_type.to_be_bytes(),
        &[],
    );
    assert_eq!(reply.rc, 0, "startup failed: {:#x}", reply.rc);
}

pub fn be32(bytes: &[u8]) -> u32 {
    u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

pub struct AuthReq {
    pub handle: u32,
    pub nonce_odd: Auth,
    pub continue_auth: bool,
    pub auth: Auth,
}

pub struct Trailer {
    pub nonce_even: Auth,
    pub continue_auth: bool,
    pub auth: Auth,
}

pub struct Reply {
    pub rc: u32,
    pub out: Vec<u8>,
    pub trailers: Vec<Trailer>,
}

pub fn call(tpm: &mut Tpm, tag: u16, ordinal: u32, params: &[u8], auths: &[AuthReq]) -> Reply {
    let total = 10 + params.len() + auths.len() * 45;
    let mut frame = Vec::with_capacity(total);
    frame.extend_from_slice(&tag.to_be_bytes());
    frame.extend_from_slice(&(total as u32).to_be_bytes());
    frame.extend_from_slice(&ordinal.to_be_bytes());
    frame.extend_from_slice(params);
    for auth in auths {
        frame.extend_from_slice(&auth.handle.to_be_bytes());
        frame.extend_from_slice(&auth.nonce_odd);
        frame.push(u8::from(auth.continue_auth));
        frame.extend_from_slice(&auth.auth);
    }

    let resp = tpm.execute(&frame);
    assert!(resp.len() >= 10, "short response");
    let size = be32(&resp[2..6]) as usize;
    assert_eq!(size, resp.len(), "response paramSize mismatch");
    let rc = be32(&resp[6..10]);

    if rc != 0 {
        assert_eq!(resp.len(), 10, "error response carries parameters");
        return Reply {
            rc,
            out: Vec::new(),
            trailers: Vec::new(),
        };
    }
    let trailer_len = auths.len() * 41;
    assert!(resp.len() >= 10 + trailer_len);
    let out = resp[10..resp.len() - trailer_len].to_vec();
    let mut trailers = Vec::new();
    let mut at = resp.len() - trailer_len;
    for _ in 0..auths.len() {
        let mut nonce_even = [0u8; 20];
        nonce_even.copy_from_slice(&resp[at..at + 20]);
        let continue_auth = resp[at + 20] == 1;
        let mut auth = [0u8; 20];
        auth.copy_from_slice(&resp[at + 21..at + 41]);
        trailers.push(Trailer {
            nonce_even,
            continue_auth,
            auth,
        });
        at += 41;
    }
    Reply { rc, out, trailers }
}

/// Client side of an authorization session.
pub struct Sess {
    pub handle: u32,
    pub nonce_even: Auth,
    pub shared: Option<Auth>,
}

pub fn oiap(h: &mut Host) -> Sess {
    let reply = call(&mut h.tpm, TAG_RQU_COMMAND, Ordinal::Oiap as u32, &[], &[]);
    assert_eq!(reply.rc, 0);
    let mut nonce_even = [0u8; 20];
    nonce_even.copy_from_slice(&reply.out[4..24]);
    Sess {
        handle: be32(&reply.out[0..4]),
        nonce_even,
        shared: None,
    }
}

pub fn osap(h: &mut Host, entity_type: u16, entity_value: u32, entity_auth: &Auth) -> Sess {
    let nonce_odd_osap: Auth = {
        let mut n = [0u8; 20];
        n.copy_from_slice(&h.crypto.rand(20));
        n
    };
    let mut params = Vec::new();
    params.extend_from_slice(&entity_type.to_be_bytes());
    params.extend_from_slice(&entity_value.to_be_bytes());
    params.extend_from_slice(&nonce_odd_osap);
    let reply = call(
        &mut h.tpm,
        TAG_RQU_COMMAND,
        Ordinal::Osap as u32,
        &params,
        &[],
    );
    assert_eq!(reply.rc, 0, "osap failed: {:#x}", reply.rc);
    let mut nonce_even = [0u8; 20];
    nonce_even.copy_from_slice(&reply.out[4..24]);
    let mut nonce_even_osap = [0u8; 20];
    nonce_even_osap.copy_from_slice(&reply.out[24..44]);
    let shared = h
        .crypto
        .hmac_sha1(entity_auth, &[&nonce_odd_osap, &nonce_even_osap]);
    Sess {
        handle: be32(&reply.out[0..4]),
        nonce_even,
        shared: Some(shared),
    }
}

/// One session's contribution to an authorized call.
pub struct SessUse<'a> {
    pub sess: &'a mut Sess,
    /// HMAC key: the entity usage auth for OIAP, the shared secret for OSAP.
    pub key: Auth,
    pub continue_auth: bool,
    pub nonce_odd: Auth,
}

pub fn nonce(h: &Host) -> Auth {
    let mut n = [0u8; 20];
    n.copy_from_slice(&h.crypto.rand(20));
    n
}

/// Run an authorized command, verifying every returned HMAC over the
/// published output parameters and rolling the session nonces.
pub fn authed_call(
    h: &mut Host,
    ordinal: u32,
    params: &[u8],
    sessions: &mut [SessUse],
    exclude_out_from_digest: bool,
) -> Reply {
    let in_digest = h.crypto.sha1(&[&ordinal.to_be_bytes(), params]);
    let auths: Vec<AuthReq> = sessions
        .iter()
        .map(|s| AuthReq {
            handle: s.sess.handle,
            nonce_odd: s.nonce_odd,
            continue_auth: s.continue_auth,
            auth: h.crypto.hmac_sha1(
                &s.key,
                &[
                    &in_digest,
                    &s.sess.nonce_even,
                    &s.nonce_odd,
                    &[u8::from(s.continue_auth)],
                ],
            ),
        })
        .collect();
    let tag = match sessions.len() {
        1 => TAG_RQU_AUTH1_COMMAND,
        2 => TAG_RQU_AUTH2_COMMAND,
        _ => TAG_RQU_COMMAND,
    };
    let reply = call(&mut h.tpm, tag, ordinal, params, &auths);
    if reply.rc == 0 {
        let out: &[u8] = if exclude_out_from_digest {
            &[]
        } else {
            &reply.out
        };
        let out_digest = h
            .crypto
            .sha1(&[&0u32.to_be_bytes(), &ordinal.to_be_bytes(), out]);
        for (s, trailer) in sessions.iter_mut().zip(reply.trailers.iter()) {
            let expected = h.crypto.hmac_sha1(
                &s.key,
                &[
                    &out_digest,
                    &trailer.nonce_even,
                    &s.nonce_odd,
                    &[u8::from(trailer.continue_auth)],
                ],
            );
            assert_eq!(expected, trailer.auth, "response HMAC mismatch");
            s.sess.nonce_even = trailer.nonce_even;
        }
    }
    reply
}

/// ADIP mask for the first `EncAuth` of a command (XOR scheme).
pub fn adip_xor_even(h: &Host, shared: &Auth, nonce_even: &Auth, nonce_odd: &Auth) -> Auth {
    let mask = h
        .crypto
        .mgf1(&[shared, nonce_even, nonce_odd, b"XOR"], 20);
    let mut out = [0u8; 20];
    out.copy_from_slice(&mask);
    out
}

/// ADIP mask for the second `EncAuth` (swapped nonce order).
pub fn adip_xor_odd(h: &Host, shared: &Auth, nonce_even: &Auth, nonce_odd: &Auth) -> Auth {
    let mask = h
        .crypto
        .mgf1(&[shared, nonce_odd, nonce_even, b"XOR"], 20);
    let mut out = [0u8; 20];
    out.copy_from_slice(&mask);
    out
}

pub fn xor20(a: &Auth, b: &Auth) -> Auth {
    let mut out = [0u8; 20];
    for i in 0..20 {
        out[i] = a[i] ^ b[i];
    }
    out
}

/// Wire form of a `TPM_KEY12` template with empty pubKey/encData.
pub fn key12_template(
    usage: u16,
    flags: u32,
    auth_data_usage: u8,
    enc_scheme: u16,
    sig_scheme: u16,
    key_bits: u32,
) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&0x0028u16.to_be_bytes()); // TPM_TAG_KEY12
    out.extend_from_slice(&0x0000u16.to_be_bytes());
    out.extend_from_slice(&usage.to_be_bytes());
    out.extend_from_slice(&flags.to_be_bytes());
    out.push(auth_data_usage);
    out.extend_from_slice(&key_parms(enc_scheme, sig_scheme, key_bits));
    out.extend_from_slice(&0u32.to_be_bytes()); // pcrInfo
    out.extend_from_slice(&0u32.to_be_bytes()); // pubKey
    out.extend_from_slice(&0u32.to_be_bytes()); // encData
    out
}

/// Wire form of RSA `TPM_KEY_PARMS`.
pub fn key_parms(enc_scheme: u16, sig_scheme: u16, key_bits: u32) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&1u32.to_be_bytes()); // TPM_ALG_RSA
    out.extend_from_slice(&enc_scheme.to_be_bytes());
    out.extend_from_slice(&sig_scheme.to_be_bytes());
    out.extend_from_slice(&12u32.to_be_bytes());
    out.extend_from_slice(&key_bits.to_be_bytes());
    out.extend_from_slice(&2u32.to_be_bytes());
    out.extend_from_slice(&0u32.to_be_bytes());
    out
}

/// `TPM_CreateEndorsementKeyPair`; returns the EK modulus.
pub fn create_ek(h: &mut Host) -> Vec<u8> {
    let mut params = vec![0u8; 20]; // antiReplay
    params.extend_from_slice(&key_parms(ES_RSAESOAEP_SHA1_MGF1, SS_NONE, 2048));
    let reply = call(
        &mut h.tpm,
        TAG_RQU_COMMAND,
        Ordinal::CreateEndorsementKeyPair as u32,
        &params,
        &[],
    );
    assert_eq!(reply.rc, 0, "create EK failed: {:#x}", reply.rc);
    parse_pubkey_modulus(&reply.out)
}

/// Pull the modulus out of a `TPM_PUBKEY`.
pub fn parse_pubkey_modulus(out: &[u8]) -> Vec<u8> {
    // algorithmID(4) encScheme(2) sigScheme(2) parmSize(4)
    let parm_size = be32(&out[8..12]) as usize;
    let at = 12 + parm_size;
    let key_len = be32(&out[at..at + 4]) as usize;
    out[at + 4..at + 4 + key_len].to_vec()
}

/// Install an owner: create the EK if needed, then `TPM_TakeOwnership`.
/// Returns the SRK public modulus from the response.
pub fn take_ownership(h: &mut Host, owner_auth: &Auth, srk_auth: &Auth) -> Vec<u8> {
    let ek_modulus = create_ek(h);
    let ek_pub = RsaPublic {
        modulus: ek_modulus,
        exponent: vec![],
    };
    let enc_owner = h.crypto.rsa_pub_encrypt_oaep(&ek_pub, owner_auth).unwrap();
    let enc_srk = h.crypto.rsa_pub_encrypt_oaep(&ek_pub, srk_auth).unwrap();

    let mut params = Vec::new();
    params.extend_from_slice(&0x0005u16.to_be_bytes()); // TPM_PID_OWNER
    params.extend_from_slice(&(enc_owner.len() as u32).to_be_bytes());
    params.extend_from_slice(&enc_owner);
    params.extend_from_slice(&(enc_srk.len() as u32).to_be_bytes());
    params.extend_from_slice(&enc_srk);
    params.extend_from_slice(&key12_template(
        KEY_USAGE_STORAGE,
        0,
        0x01,
        ES_RSAESOAEP_SHA1_MGF1,
        SS_NONE,
        2048,
    ));

    let mut sess = oiap(h);
    let nonce_odd = nonce(h);
    let reply = authed_call(
        h,
        Ordinal::TakeOwnership as u32,
        &params,
        &mut [SessUse {
            sess: &mut sess,
            key: *owner_auth,
            continue_auth: false,
            nonce_odd,
        }],
        false,
    );
    assert_eq!(reply.rc, 0, "take ownership failed: {:#x}", reply.rc);
    assert!(h.tpm.owner_installed());
    parse_key_modulus(&reply.out)
}

/// Pull the modulus out of a wire `TPM_KEY12` with an empty PCR info.
pub fn parse_key_modulus(key: &[u8]) -> Vec<u8> {
    // tag(2) fill(2) usage(2) flags(4) authDataUsage(1) = 11
    let parm_size = be32(&key[19..23]) as usize;
    let at = 23 + parm_size; // pcrInfoSize
    let pcr_size = be32(&key[at..at + 4]) as usize;
    let at = at + 4 + pcr_size;
    let key_len = be32(&key[at..at + 4]) as usize;
    key[at + 4..at + 4 + key_len].to_vec()
}

/// `TPM_CreateWrapKey` under the SRK; returns the wrapped key blob.
pub fn create_wrap_key(
    h: &mut Host,
    srk_auth: &Auth,
    usage_auth: &Auth,
    template: &[u8],
) -> Vec<u8> {
    let mut sess = osap(h, ET_KEYHANDLE, KH_SRK, srk_auth);
    let shared = sess.shared.unwrap();
    let nonce_odd = nonce(h);
    let du1 = xor20(usage_auth, &adip_xor_even(h, &shared, &sess.nonce_even, &nonce_odd));
    let dm1 = xor20(usage_auth, &adip_xor_odd(h, &shared, &sess.nonce_even, &nonce_odd));

    let mut params = Vec::new();
    params.extend_from_slice(&KH_SRK.to_be_bytes());
    params.extend_from_slice(&du1);
    params.extend_from_slice(&dm1);
    params.extend_from_slice(template);

    let reply = authed_call(
        h,
        Ordinal::CreateWrapKey as u32,
        &params,
        &mut [SessUse {
            sess: &mut sess,
            key: shared,
            continue_auth: true,
            nonce_odd,
        }],
        false,
    );
    assert_eq!(reply.rc, 0, "create wrap key failed: {:#x}", reply.rc);
    reply.out
}

/// `TPM_LoadKey2` under the SRK; returns the new key handle.
pub fn load_key2(h: &mut Host, srk_auth: &Auth, wrapped: &[u8]) -> u32 {
    let mut params = Vec::new();
    params.extend_from_slice(&KH_SRK.to_be_bytes());
    params.extend_from_slice(wrapped);
    let mut sess = oiap(h);
    let nonce_odd = nonce(h);
    let reply = authed_call(
        h,
        Ordinal::LoadKey2 as u32,
        &params,
        &mut [SessUse {
            sess: &mut sess,
            key: *srk_auth,
            continue_auth: false,
            nonce_odd,
        }],
        true, // the handle is excluded from the response HMAC
    );
    assert_eq!(reply.rc, 0, "load key failed: {:#x}", reply.rc);
    be32(&reply.out[0..4])
}

/// Wire form of `TPM_NV_DATA_PUBLIC` with open PCR gates.
pub fn nv_data_public(nv_index: u32, attributes: u32, data_size: u32) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&0x0018u16.to_be_bytes()); // TPM_TAG_NV_DATA_PUBLIC
    out.extend_from_slice(&nv_index.to_be_bytes());
    for _ in 0..2 {
        // pcrInfoRead / pcrInfoWrite: empty selection, all localities
        out.extend_from_slice(&3u16.to_be_bytes());
        out.extend_from_slice(&[0, 0, 0]);
        out.push(LOC_ALL);
        out.extend_from_slice(&[0u8; 20]);
    }
    out.extend_from_slice(&0x0017u16.to_be_bytes()); // TPM_TAG_NV_ATTRIBUTES
    out.extend_from_slice(&attributes.to_be_bytes());
    out.extend_from_slice(&[0, 0, 0]); // bReadSTClear, bWriteSTClear, bWriteDefine
    out.extend_from_slice(&data_size.to_be_bytes());
    out
}

/// `TPM_NV_DefineSpace` with owner OSAP authorization.
pub fn nv_define_space(
    h: &mut Host,
    owner_auth: &Auth,
    nv_index: u32,
    attributes: u32,
    data_size: u32,
    area_auth: &Auth,
) -> u32 {
    let mut sess = osap(h, ET_OWNER, KH_OWNER, owner_auth);
    let shared = sess.shared.unwrap();
    let nonce_odd = nonce(h);
    let enc_auth = xor20(
        area_auth,
        &adip_xor_even(h, &shared, &sess.nonce_even, &nonce_odd),
    );
    let mut params = nv_data_public(nv_index, attributes, data_size);
    params.extend_from_slice(&enc_auth);
    let reply = authed_call(
        h,
        Ordinal::NvDefineSpace as u32,
        &params,
        &mut [SessUse {
            sess: &mut sess,
            key: shared,
            continue_auth: true,
            nonce_odd,
        }],
        false,
    );
    reply.rc
}

/// Flip `nvLocked` by defining the lock index with no authorization.
pub fn nv_lock(h: &mut Host) {
    let mut params = nv_data_public(NV_INDEX_LOCK, 0, 0);
    params.extend_from_slice(&[0u8; 20]);
    let reply = call(
        &mut h.tpm,
        TAG_RQU_COMMAND,
        Ordinal::NvDefineSpace as u32,
        &params,
        &[],
    );
    assert_eq!(reply.rc, 0, "nv lock failed: {:#x}", reply.rc);
}

/// `TPM_NV_WriteValue` under owner OIAP authorization.
pub fn nv_write_owner(
    h: &mut Host,
    owner_auth: &Auth,
    nv_index: u32,
    offset: u32,
    data: &[u8],
) -> u32 {
    let mut params = Vec::new();
    params.extend_from_slice(&nv_index.to_be_bytes());
    params.extend_from_slice(&offset.to_be_bytes());
    params.extend_from_slice(&(data.len() as u32).to_be_bytes());
    params.extend_from_slice(data);
    let mut sess = oiap(h);
    let nonce_odd = nonce(h);
    authed_call(
        h,
        Ordinal::NvWriteValue as u32,
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

/// `TPM_NV_ReadValue` under owner OIAP authorization.
pub fn nv_read_owner(
    h: &mut Host,
    owner_auth: &Auth,
    nv_index: u32,
    offset: u32,
    size: u32,
) -> (u32, Vec<u8>) {
    let mut params = Vec::new();
    params.extend_from_slice(&nv_index.to_be_bytes());
    params.extend_from_slice(&offset.to_be_bytes());
    params.extend_from_slice(&size.to_be_bytes());
    let mut sess = oiap(h);
    let nonce_odd = nonce(h);
    let reply = authed_call(
        h,
        Ordinal::NvReadValue as u32,
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
        return (reply.rc, Vec::new());
    }
    let len = be32(&reply.out[0..4]) as usize;
    (reply.rc, reply.out[4..4 + len].to_vec())
}

/// `TPM_Extend`.
pub fn extend(h: &mut Host, pcr: u32, digest: &Auth) -> Auth {
    let mut params = Vec::new();
    params.extend_from_slice(&pcr.to_be_bytes());
    params.extend_from_slice(digest);
    let reply = call(
        &mut h.tpm,
        TAG_RQU_COMMAND,
        Ordinal::Extend as u32,
        &params,
        &[],
    );
    assert_eq!(reply.rc, 0);
    let mut out = [0u8; 20];
    out.copy_from_slice(&reply.out[0..20]);
    out
}

pub fn rc(code: TpmRc) -> u32 {
    code as u32
}
