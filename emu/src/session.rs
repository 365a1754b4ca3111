// SPDX-License-Identifier: MIT

//! Authorization sessions: the fixed-capacity table with rolling nonces,
//! the HMAC check/emit contract used by every authorized ordinal, ADIP
//! decryption, and the session-management ordinals.

use log::{trace, warn};

use crate::buffer::{Cursor, StoreBuffer};
use crate::dispatch::CommandCtx;
use crate::state::Tpm;
use crate::types::{
    AdipScheme, Digest, Nonce, ProtocolId, Secret, TpmRc, TpmResult, DIGEST_SIZE, ET_KEYHANDLE,
    ET_NV, ET_OWNER, ET_SRK, HR_AUTH_BASE, KH_EK, KH_SRK, RT_AUTH, RT_KEY,
};
use crate::MAX_AUTH_SESSIONS;

/// Owner-auth failures tolerated before the lockout arms.
const DEFEND_LOCK_THRESHOLD: u32 = 5;

/// Ceiling of the armed lockout count.
const DEFEND_LOCK_MAX: u32 = 4096;

/// One active authorization session.
#[derive(Clone)]
pub(crate) struct AuthSession {
    pub handle: u32,
    pub protocol: ProtocolId,
    /// Bound entity type (OSAP/DSAP).
    pub entity_type: u8,
    /// Raw ADIP scheme byte from the OSAP entity type MSB.
    pub adip: u8,
    pub nonce_even: Nonce,
    pub shared_secret: Secret,
    pub entity_digest: Digest,
}

impl AuthSession {
    fn store(&self, out: &mut StoreBuffer) -> TpmResult<()> {
        out.store_u32(self.handle)?;
        out.store_u16(self.protocol as u16)?;
        out.store_u8(self.entity_type)?;
        out.store_u8(self.adip)?;
        out.store_bytes(&self.nonce_even)?;
        out.store_bytes(&self.shared_secret.0)?;
        out.store_bytes(&self.entity_digest)
    }

    fn load(cur: &mut Cursor) -> TpmResult<Self> {
        Ok(AuthSession {
            handle: cur.load_u32()?,
            protocol: ProtocolId::from_repr(cur.load_u16()?).ok_or(TpmRc::Fail)?,
            entity_type: cur.load_u8()?,
            adip: cur.load_u8()?,
            nonce_even: cur.load_digest()?,
            shared_secret: cur.load_secret()?,
            entity_digest: cur.load_digest()?,
        })
    }
}

/// `TPM_ET_SRK` bindings are reachable through the reserved key handle too.
fn entity_type_compatible(a: u8, b: u8) -> bool {
    let norm = |t| if t == ET_SRK { ET_KEYHANDLE } else { t };
    norm(a) == norm(b)
}

/// The active-session table.
pub(crate) struct AuthSessionTable {
    sessions: Vec<AuthSession>,
    next_handle: u32,
}

impl Default for AuthSessionTable {
    fn default() -> Self {
        Self::new()
    }
}

impl AuthSessionTable {
    pub fn new() -> Self {
        AuthSessionTable {
            sessions: Vec::new(),
            next_handle: 1,
        }
    }

    pub fn insert(&mut self, mut session: AuthSession) -> TpmResult<u32> {
        if self.sessions.len() >= MAX_AUTH_SESSIONS {
            return Err(TpmRc::Resources);
        }
        let mut handle = HR_AUTH_BASE | (self.next_handle & 0x00FF_FFFF);
        while self.get(handle).is_some() {
            self.next_handle = self.next_handle.wrapping_add(1);
            handle = HR_AUTH_BASE | (self.next_handle & 0x00FF_FFFF);
        }
        self.next_handle = self.next_handle.wrapping_add(1);
        session.handle = handle;
        self.sessions.push(session);
        Ok(handle)
    }

    pub fn get(&self, handle: u32) -> Option<&AuthSession> {
        self.sessions.iter().find(|s| s.handle == handle)
    }

    pub fn get_mut(&mut self, handle: u32) -> Option<&mut AuthSession> {
        self.sessions.iter_mut().find(|s| s.handle == handle)
    }

    pub fn terminate(&mut self, handle: u32) -> bool {
        let before = self.sessions.len();
        self.sessions.retain(|s| s.handle != handle);
        self.sessions.len() != before
    }

    /// Remove every OSAP/DSAP session bound to the entity. A session named
    /// by `keep` is left in place; the return value tells the caller it was
    /// affected so the continue flag can be forced off instead.
    pub fn terminate_entity(
        &mut self,
        entity_type: u8,
        entity_digest: Option<&Digest>,
        keep: Option<u32>,
    ) -> bool {
        let mut kept_affected = false;
        self.sessions.retain(|s| {
            if !matches!(s.protocol, ProtocolId::Osap | ProtocolId::Dsap) {
                return true;
            }
            if !entity_type_compatible(s.entity_type, entity_type) {
                return true;
            }
            if let Some(digest) = entity_digest {
                if &s.entity_digest != digest {
                    return true;
                }
            }
            if keep == Some(s.handle) {
                kept_affected = true;
                return true;
            }
            false
        });
        kept_affected
    }

    pub fn clear(&mut self) {
        self.sessions.clear();
    }

    pub fn store(&self, out: &mut StoreBuffer) -> TpmResult<()> {
        out.store_u32(self.sessions.len() as u32)?;
        for s in &self.sessions {
            s.store(out)?;
        }
        out.store_u32(self.next_handle)
    }

    pub fn load(cur: &mut Cursor) -> TpmResult<Self> {
        let count = cur.load_u32()? as usize;
        if count > MAX_AUTH_SESSIONS {
            return Err(TpmRc::Fail);
        }
        let mut sessions = Vec::with_capacity(count);
        for _ in 0..count {
            sessions.push(AuthSession::load(cur)?);
        }
        let next_handle = cur.load_u32()?;
        Ok(AuthSessionTable {
            sessions,
            next_handle,
        })
    }
}

/// Snapshot of a session taken at lookup time, carrying the HMAC key the
/// ordinal authorizes with.
pub(crate) struct AuthCtx {
    pub handle: u32,
    pub protocol: ProtocolId,
    pub adip: u8,
    pub hmac_key: Secret,
    pub nonce_even: Nonce,
    pub shared_secret: Secret,
}

impl Tpm {
    /// Look up a session and derive the ordinal's HMAC key.
    ///
    /// `required` pins the protocol (OSAP admits DSAP). For OSAP the session
    /// must be bound to the expected entity; for OIAP the caller supplies
    /// the entity's usage auth.
    pub(crate) fn auth_get(
        &self,
        handle: u32,
        required: Option<ProtocolId>,
        entity_type: u8,
        entity_digest: Option<&Digest>,
        oiap_secret: Option<&Secret>,
    ) -> TpmResult<AuthCtx> {
        let session = self
            .sessions
            .get(handle)
            .ok_or(TpmRc::InvalidAuthHandle)?;
        match required {
            Some(ProtocolId::Oiap) if session.protocol != ProtocolId::Oiap => {
                return Err(TpmRc::AuthFail)
            }
            Some(ProtocolId::Osap)
                if !matches!(session.protocol, ProtocolId::Osap | ProtocolId::Dsap) =>
            {
                return Err(TpmRc::AuthFail)
            }
            _ => {}
        }
        let hmac_key = match session.protocol {
            ProtocolId::Oiap => oiap_secret.ok_or(TpmRc::AuthFail)?.clone(),
            ProtocolId::Osap | ProtocolId::Dsap => {
                if !entity_type_compatible(session.entity_type, entity_type) {
                    return Err(TpmRc::AuthFail);
                }
                if let Some(digest) = entity_digest {
                    if &session.entity_digest != digest {
                        return Err(TpmRc::AuthFail);
                    }
                }
                session.shared_secret.clone()
            }
            _ => return Err(TpmRc::InvalidAuthHandle),
        };
        Ok(AuthCtx {
            handle: session.handle,
            protocol: session.protocol,
            adip: session.adip,
            hmac_key,
            nonce_even: session.nonce_even,
            shared_secret: session.shared_secret.clone(),
        })
    }

    /// Verify a request authorization block:
    /// `HMAC(key, H_in ∥ nonceEven ∥ nonceOdd ∥ continueAuthSession)`.
    pub(crate) fn auth_check(
        &mut self,
        auth: &AuthCtx,
        in_digest: &Digest,
        block: &crate::dispatch::AuthBlock,
        owner: bool,
        second: bool,
    ) -> TpmResult<()> {
        let expected = self.crypto.hmac_sha1(
            &auth.hmac_key.0,
            &[
                in_digest,
                &auth.nonce_even,
                &block.nonce_odd,
                &[u8::from(block.continue_auth)],
            ],
        );
        if expected != block.auth {
            warn!("auth_check: HMAC mismatch on handle {:08x}", auth.handle);
            if owner {
                self.defend_register_failure();
            }
            return Err(if second { TpmRc::Auth2Fail } else { TpmRc::AuthFail });
        }
        if owner {
            self.stclear.auth_failures = 0;
        }
        Ok(())
    }

    fn defend_register_failure(&mut self) {
        self.stclear.auth_failures = self.stclear.auth_failures.saturating_add(1);
        if self.stclear.auth_failures >= DEFEND_LOCK_THRESHOLD {
            let shift = (self.stclear.auth_failures - DEFEND_LOCK_THRESHOLD + 1).min(12);
            self.stclear.defend_count = (1u32 << shift).min(DEFEND_LOCK_MAX);
            warn!(
                "owner authorization lockout armed for {} commands",
                self.stclear.defend_count
            );
        }
    }

    /// Decrypt one `EncAuth` under the session's ADIP scheme. The second
    /// value of a two-`EncAuth` ordinal swaps the nonce order.
    pub(crate) fn adip_decrypt(
        &self,
        auth: &AuthCtx,
        enc_auth: &Digest,
        nonce_odd: &Nonce,
        odd_variant: bool,
    ) -> TpmResult<Secret> {
        let (first, second): (&[u8], &[u8]) = if odd_variant {
            (nonce_odd, &auth.nonce_even)
        } else {
            (&auth.nonce_even, nonce_odd)
        };
        let scheme = AdipScheme::from_repr(auth.adip).ok_or(TpmRc::InappropriateEnc)?;
        let mut clear = [0u8; DIGEST_SIZE];
        match scheme {
            AdipScheme::Xor => {
                let mask = self.crypto.mgf1(
                    &[&auth.shared_secret.0, first, second, b"XOR"],
                    DIGEST_SIZE,
                );
                for (i, (e, m)) in enc_auth.iter().zip(mask.iter()).enumerate() {
                    clear[i] = e ^ m;
                }
            }
            AdipScheme::Aes128Ctr => {
                let iv = self.crypto.sha1(&[first, second]);
                let out = self
                    .crypto
                    .aes128_ctr_tpm(&auth.shared_secret.0[..16], &iv, enc_auth)?;
                clear.copy_from_slice(&out);
            }
        }
        Ok(Secret(clear))
    }

    /// Symmetric transform of a data payload under the session's ADIP
    /// scheme, as used by `TPM_Sealx` input and `TPM_Unseal` output.
    pub(crate) fn adip_crypt_data(
        &self,
        adip: u8,
        shared_secret: &Secret,
        nonce_even: &Nonce,
        nonce_odd: &Nonce,
        data: &[u8],
    ) -> TpmResult<Vec<u8>> {
        let scheme = AdipScheme::from_repr(adip).ok_or(TpmRc::InappropriateEnc)?;
        match scheme {
            AdipScheme::Xor => {
                let mask = self.crypto.mgf1(
                    &[&shared_secret.0, nonce_even, nonce_odd, b"XOR"],
                    data.len(),
                );
                Ok(data.iter().zip(mask.iter()).map(|(d, m)| d ^ m).collect())
            }
            AdipScheme::Aes128Ctr => {
                let iv = self.crypto.sha1(&[nonce_even, nonce_odd]);
                self.crypto
                    .aes128_ctr_tpm(&shared_secret.0[..16], &iv, data)
            }
        }
    }

    /// Resolve the secret and binding digest of an OSAP entity.
    fn osap_entity(&self, entity_type: u8, entity_value: u32) -> TpmResult<(Secret, Digest)> {
        match entity_type {
            ET_OWNER => {
                if !self.permanent.owner_installed {
                    return Err(TpmRc::AuthFail);
                }
                Ok((self.permanent.owner_auth.clone(), [0u8; DIGEST_SIZE]))
            }
            ET_SRK => {
                let srk = self.permanent.srk.as_ref().ok_or(TpmRc::NoSrk)?;
                let asym = srk.asymkey()?;
                Ok((asym.usage_auth.clone(), asym.pub_data_digest))
            }
            ET_KEYHANDLE => {
                if entity_value == KH_SRK {
                    return self.osap_entity(ET_SRK, entity_value);
                }
                if entity_value == KH_EK {
                    return Err(TpmRc::InvalidKeyHandle);
                }
                let entry = self
                    .keys
                    .get(entity_value)
                    .ok_or(TpmRc::InvalidKeyHandle)?;
                let asym = entry.key.asymkey()?;
                Ok((asym.usage_auth.clone(), asym.pub_data_digest))
            }
            ET_NV => {
                let entry = self.nv.get(entity_value)?;
                Ok((entry.auth_value.clone(), entry.digest))
            }
            _ => Err(TpmRc::WrongEntityType),
        }
    }
}

/// `TPM_OIAP`
pub(crate) fn oiap(tpm: &mut Tpm, ctx: &mut CommandCtx) -> TpmResult<()> {
    ctx.finish_params(tpm)?;
    let mut nonce_even = [0u8; DIGEST_SIZE];
    nonce_even.copy_from_slice(&tpm.crypto.rand(DIGEST_SIZE));
    let handle = tpm.sessions.insert(AuthSession {
        handle: 0,
        protocol: ProtocolId::Oiap,
        entity_type: 0,
        adip: 0,
        nonce_even,
        shared_secret: Secret::zero(),
        entity_digest: [0u8; DIGEST_SIZE],
    })?;
    trace!("oiap: handle {handle:08x}");
    ctx.out.store_u32(handle)?;
    ctx.out.store_bytes(&nonce_even)
}

/// `TPM_OSAP`
pub(crate) fn osap(tpm: &mut Tpm, ctx: &mut CommandCtx) -> TpmResult<()> {
    let entity_type = ctx.params.load_u16()?;
    let entity_value = ctx.params.load_u32()?;
    let nonce_odd_osap = ctx.params.load_digest()?;
    ctx.finish_params(tpm)?;

    let et_low = (entity_type & 0x00FF) as u8;
    let adip = (entity_type >> 8) as u8;
    let (entity_secret, entity_digest) = tpm.osap_entity(et_low, entity_value)?;

    let mut nonce_even = [0u8; DIGEST_SIZE];
    nonce_even.copy_from_slice(&tpm.crypto.rand(DIGEST_SIZE));
    let mut nonce_even_osap = [0u8; DIGEST_SIZE];
    nonce_even_osap.copy_from_slice(&tpm.crypto.rand(DIGEST_SIZE));

    let shared_secret = Secret(tpm.crypto.hmac_sha1(
        &entity_secret.0,
        &[&nonce_odd_osap, &nonce_even_osap],
    ));

    let handle = tpm.sessions.insert(AuthSession {
        handle: 0,
        protocol: ProtocolId::Osap,
        entity_type: et_low,
        adip,
        nonce_even,
        shared_secret,
        entity_digest,
    })?;
    trace!("osap: handle {handle:08x} entity {entity_type:04x}/{entity_value:08x}");
    ctx.out.store_u32(handle)?;
    ctx.out.store_bytes(&nonce_even)?;
    ctx.out.store_bytes(&nonce_even_osap)
}

/// `TPM_Terminate_Handle`
pub(crate) fn terminate_handle(tpm: &mut Tpm, ctx: &mut CommandCtx) -> TpmResult<()> {
    let handle = ctx.params.load_u32()?;
    ctx.finish_params(tpm)?;
    if tpm.sessions.terminate(handle) {
        Ok(())
    } else {
        Err(TpmRc::InvalidAuthHandle)
    }
}

/// `TPM_FlushSpecific`
pub(crate) fn flush_specific(tpm: &mut Tpm, ctx: &mut CommandCtx) -> TpmResult<()> {
    let handle = ctx.params.load_u32()?;
    let resource_type = ctx.params.load_u32()?;
    ctx.finish_params(tpm)?;
    match resource_type {
        RT_KEY => {
            if handle == KH_SRK || handle == KH_EK {
                return Err(TpmRc::InvalidKeyHandle);
            }
            tpm.keys.remove(handle)
        }
        RT_AUTH => {
            if tpm.sessions.terminate(handle) {
                Ok(())
            } else {
                Err(TpmRc::InvalidAuthHandle)
            }
        }
        _ => Err(TpmRc::BadParameter),
    }
}
