// SPDX-License-Identifier: MIT

//! The command dispatcher: one call per host-delivered frame.
//!
//! The dispatcher parses the outer frame, selects the handler, computes the
//! input-parameter digest, parses the trailing authorization blocks, and
//! after the handler runs assembles the response with refreshed nonces,
//! folds the audit digest, and applies the session-termination rules.

use bitflags::bitflags;
use log::{debug, trace};

use crate::buffer::{Cursor, StoreBuffer};
use crate::session::AuthCtx;
use crate::state::{PermanentFlags, TestState, Tpm};
use crate::types::{
    Digest, Nonce, Ordinal, RequestTag, Secret, TpmRc, TpmResult, DIGEST_SIZE, TAG_RSP_COMMAND,
};
use crate::{admin, maint, nvram, pcr, session, storage, MAX_COMMAND_SIZE};

/// Wire size of one request authorization block.
const AUTH_BLOCK_LEN: usize = 4 + DIGEST_SIZE + 1 + DIGEST_SIZE;

/// One parsed request authorization block.
#[derive(Clone, Debug)]
pub(crate) struct AuthBlock {
    pub handle: u32,
    pub nonce_odd: Nonce,
    pub continue_auth: bool,
    pub auth: Digest,
}

impl AuthBlock {
    fn load(cur: &mut Cursor) -> TpmResult<Self> {
        Ok(AuthBlock {
            handle: cur.load_u32()?,
            nonce_odd: cur.load_digest()?,
            continue_auth: cur.load_bool()?,
            auth: cur.load_digest()?,
        })
    }
}

/// A response authorization trailer queued by the handler; the dispatcher
/// rolls the nonce and computes the HMAC once the output digest is known.
pub(crate) struct RespAuth {
    pub handle: u32,
    pub hmac_key: Secret,
    pub nonce_odd: Nonce,
    pub continue_auth: bool,
}

/// Which request tags an ordinal accepts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum TagPolicy {
    NoAuth,
    Auth1,
    Auth1OrNone,
    Auth2OrAuth1,
}

impl TagPolicy {
    fn allows(self, tag: RequestTag) -> bool {
        match self {
            TagPolicy::NoAuth => tag == RequestTag::Command,
            TagPolicy::Auth1 => tag == RequestTag::Auth1,
            TagPolicy::Auth1OrNone => matches!(tag, RequestTag::Command | RequestTag::Auth1),
            TagPolicy::Auth2OrAuth1 => matches!(tag, RequestTag::Auth1 | RequestTag::Auth2),
        }
    }
}

bitflags! {
    /// Dispatcher-level state checks an ordinal is subject to.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    struct Checks: u8 {
        /// Fail with `TPM_DISABLED` while the disable flag is set.
        const ENABLED = 0x01;
        /// Fail with `TPM_DEACTIVATED` while deactivated.
        const ACTIVATED = 0x02;
        /// Metered by the dictionary-attack lockout.
        const LOCKOUT_GATED = 0x04;
    }
}

const CHECK_NONE: Checks = Checks::empty();
const CHECK_ALL: Checks = Checks::all();
const CHECK_ENABLED_ACTIVATED: Checks = Checks::ENABLED.union(Checks::ACTIVATED);

fn ordinal_policy(ordinal: Ordinal) -> (TagPolicy, Checks) {
    use Ordinal as O;
    match ordinal {
        O::Oiap
        | O::Osap
        | O::TerminateHandle
        | O::FlushSpecific
        | O::Startup
        | O::SaveState
        | O::SelfTestFull
        | O::ContinueSelfTest
        | O::GetTestResult
        | O::GetCapability
        | O::Extend => (TagPolicy::NoAuth, CHECK_NONE),
        O::PcrRead
        | O::DirRead
        | O::GetRandom
        | O::EvictKey
        | O::LoadManuMaintPub
        | O::ReadManuMaintPub
        | O::CreateEndorsementKeyPair
        | O::ReadPubek
        | O::Sha1Start
        | O::Sha1Update
        | O::Sha1Complete
        | O::Sha1CompleteExtend => (TagPolicy::NoAuth, CHECK_ENABLED_ACTIVATED),
        O::Seal | O::Sealx | O::UnBind | O::CreateWrapKey | O::DirWriteAuth => {
            (TagPolicy::Auth1, CHECK_ALL)
        }
        O::Unseal => (TagPolicy::Auth2OrAuth1, CHECK_ALL),
        O::LoadKey | O::LoadKey2 | O::GetPubKey => (TagPolicy::Auth1OrNone, CHECK_ALL),
        O::TakeOwnership
        | O::ChangeAuthOwner
        | O::OwnerClear
        | O::SetOrdinalAuditStatus
        | O::CreateMaintenanceArchive
        | O::LoadMaintenanceArchive
        | O::KillMaintenanceFeature => (TagPolicy::Auth1, CHECK_ALL),
        // NV ordinals defer the enable/activate decision to the per-index
        // attribute checks
        O::NvDefineSpace | O::NvWriteValue | O::NvReadValue => {
            (TagPolicy::Auth1OrNone, Checks::LOCKOUT_GATED)
        }
        O::NvWriteValueAuth | O::NvReadValueAuth => (TagPolicy::Auth1, CHECK_NONE),
    }
}

/// Per-command context handed to the ordinal handler.
pub(crate) struct CommandCtx<'a> {
    pub tag: RequestTag,
    pub ordinal: Ordinal,
    /// Input parameters, auth blocks stripped.
    pub params: Cursor<'a>,
    /// `SHA-1(ordinal ∥ paramsWithoutAuth)`.
    pub in_digest: Digest,
    pub auth1: Option<AuthBlock>,
    pub auth2: Option<AuthBlock>,
    /// Output parameters, above the auth trailers.
    pub out: StoreBuffer,
    pub resp_auth: Vec<RespAuth>,
    /// Keep the output parameters out of the response HMAC.
    pub exclude_out_from_digest: bool,
    parse_complete: bool,
}

impl CommandCtx<'_> {
    /// Close the input-parameter phase: leftover bytes, state policy and
    /// tag policy are all checked here, in that order.
    pub fn finish_params(&mut self, tpm: &mut Tpm) -> TpmResult<()> {
        self.params.expect_end()?;
        let (tags, checks) = ordinal_policy(self.ordinal);
        tpm.check_state(checks)?;
        if !tags.allows(self.tag) {
            return Err(TpmRc::BadTag);
        }
        self.parse_complete = true;
        Ok(())
    }

    pub fn push_resp_auth(&mut self, auth: &AuthCtx, block: &AuthBlock, continue_auth: bool) {
        self.resp_auth.push(RespAuth {
            handle: auth.handle,
            hmac_key: auth.hmac_key.clone(),
            nonce_odd: block.nonce_odd,
            continue_auth,
        });
    }
}

fn error_frame(rc: TpmRc) -> Vec<u8> {
    let mut out = Vec::with_capacity(10);
    out.extend_from_slice(&TAG_RSP_COMMAND.to_be_bytes());
    out.extend_from_slice(&10u32.to_be_bytes());
    out.extend_from_slice(&(rc as u32).to_be_bytes());
    out
}

impl Tpm {
    fn check_state(&mut self, checks: Checks) -> TpmResult<()> {
        if checks.contains(Checks::LOCKOUT_GATED) && self.stclear.defend_count > 0 {
            self.stclear.defend_count -= 1;
            return Err(TpmRc::DefendLockRunning);
        }
        if checks.contains(Checks::ENABLED)
            && self.permanent_flags.contains(PermanentFlags::DISABLE)
        {
            return Err(TpmRc::Disabled);
        }
        if checks.contains(Checks::ACTIVATED) && self.stclear_flags.deactivated {
            return Err(TpmRc::Deactivated);
        }
        Ok(())
    }

    fn invoke(&mut self, ctx: &mut CommandCtx) -> TpmResult<()> {
        use Ordinal as O;
        match ctx.ordinal {
            O::Oiap => session::oiap(self, ctx),
            O::Osap => session::osap(self, ctx),
            O::TerminateHandle => session::terminate_handle(self, ctx),
            O::FlushSpecific => session::flush_specific(self, ctx),
            O::Startup => admin::startup(self, ctx),
            O::SaveState => admin::save_state(self, ctx),
            O::SelfTestFull => admin::self_test_full(self, ctx),
            O::ContinueSelfTest => admin::continue_self_test(self, ctx),
            O::GetTestResult => admin::get_test_result(self, ctx),
            O::GetCapability => admin::get_capability(self, ctx),
            O::GetRandom => admin::get_random(self, ctx),
            O::SetOrdinalAuditStatus => admin::set_ordinal_audit_status(self, ctx),
            O::CreateEndorsementKeyPair => admin::create_endorsement_key_pair(self, ctx),
            O::ReadPubek => admin::read_pubek(self, ctx),
            O::TakeOwnership => admin::take_ownership(self, ctx),
            O::OwnerClear => admin::owner_clear(self, ctx),
            O::ChangeAuthOwner => admin::change_auth_owner(self, ctx),
            O::Extend => pcr::extend(self, ctx),
            O::PcrRead => pcr::pcr_read(self, ctx),
            O::Sha1Start => pcr::sha1_start(self, ctx),
            O::Sha1Update => pcr::sha1_update(self, ctx),
            O::Sha1Complete => pcr::sha1_complete(self, ctx),
            O::Sha1CompleteExtend => pcr::sha1_complete_extend(self, ctx),
            O::Seal => storage::seal(self, ctx),
            O::Sealx => storage::sealx(self, ctx),
            O::Unseal => storage::unseal(self, ctx),
            O::UnBind => storage::unbind(self, ctx),
            O::CreateWrapKey => storage::create_wrap_key(self, ctx),
            O::LoadKey => storage::load_key(self, ctx),
            O::LoadKey2 => storage::load_key2(self, ctx),
            O::GetPubKey => storage::get_pub_key(self, ctx),
            O::EvictKey => storage::evict_key(self, ctx),
            O::NvDefineSpace => nvram::nv_define_space(self, ctx),
            O::NvReadValue => nvram::nv_read_value(self, ctx),
            O::NvReadValueAuth => nvram::nv_read_value_auth(self, ctx),
            O::NvWriteValue => nvram::nv_write_value(self, ctx),
            O::NvWriteValueAuth => nvram::nv_write_value_auth(self, ctx),
            O::CreateMaintenanceArchive => maint::create_maintenance_archive(self, ctx),
            O::LoadMaintenanceArchive => maint::load_maintenance_archive(self, ctx),
            O::KillMaintenanceFeature => maint::kill_maintenance_feature(self, ctx),
            O::LoadManuMaintPub => maint::load_manu_maint_pub(self, ctx),
            O::ReadManuMaintPub => maint::read_manu_maint_pub(self, ctx),
            O::DirWriteAuth => nvram::dir_write_auth(self, ctx),
            O::DirRead => nvram::dir_read(self, ctx),
        }
    }

    /// Process one framed request and produce the framed response.
    ///
    /// The response is always a valid frame; on failure it carries exactly
    /// `(tag, paramSize, returnCode)`.
    pub fn execute(&mut self, request: &[u8]) -> Vec<u8> {
        self.stany_flags.locality_modifier = self.platform.locality_modifier().min(4);

        if request.len() > MAX_COMMAND_SIZE {
            return error_frame(TpmRc::Size);
        }
        let mut cur = Cursor::new(request);
        let (Ok(tag_raw), Ok(param_size), Ok(ordinal_raw)) =
            (cur.load_u16(), cur.load_u32(), cur.load_u32())
        else {
            return error_frame(TpmRc::BadParamSize);
        };
        let Some(tag) = RequestTag::from_repr(tag_raw) else {
            return error_frame(TpmRc::BadTag);
        };
        if param_size as usize != request.len() {
            return error_frame(TpmRc::BadParamSize);
        }
        let Some(ordinal) = Ordinal::from_repr(ordinal_raw) else {
            debug!("execute: unknown ordinal {ordinal_raw:08x}");
            return error_frame(TpmRc::BadOrdinal);
        };
        trace!("execute: {ordinal:?} tag {tag_raw:04x}");

        if self.test_state == TestState::Failure {
            if ordinal != Ordinal::GetTestResult {
                return error_frame(TpmRc::FailedSelfTest);
            }
        } else if self.post_init != (ordinal == Ordinal::Startup) {
            return error_frame(TpmRc::InvalidPostInit);
        }

        // any other ordinal invalidates an open SHA-1 thread; the state
        // save/restore pair carries it across a power interruption
        if !matches!(
            ordinal,
            Ordinal::Sha1Update
                | Ordinal::Sha1Complete
                | Ordinal::Sha1CompleteExtend
                | Ordinal::SaveState
                | Ordinal::Startup
        ) {
            self.sha1_thread = None;
        }

        let payload = match cur.load_bytes(cur.len()) {
            Ok(bytes) => bytes,
            Err(_) => return error_frame(TpmRc::BadParamSize),
        };
        let auth_len = AUTH_BLOCK_LEN * tag.auth_count();
        if payload.len() < auth_len {
            return error_frame(TpmRc::BadParamSize);
        }
        let (params, auth_area) = payload.split_at(payload.len() - auth_len);
        let in_digest = self
            .crypto
            .sha1(&[&ordinal_raw.to_be_bytes(), params]);

        let mut auth_cur = Cursor::new(auth_area);
        let mut load_block = || AuthBlock::load(&mut auth_cur);
        let (auth1, auth2) = match tag.auth_count() {
            1 => match load_block() {
                Ok(b) => (Some(b), None),
                Err(rc) => return error_frame(rc),
            },
            2 => match (load_block(), load_block()) {
                (Ok(a), Ok(b)) => (Some(a), Some(b)),
                (Err(rc), _) | (_, Err(rc)) => return error_frame(rc),
            },
            _ => (None, None),
        };

        let mut ctx = CommandCtx {
            tag,
            ordinal,
            params: Cursor::new(params),
            in_digest,
            auth1,
            auth2,
            out: StoreBuffer::new(),
            resp_auth: Vec::new(),
            exclude_out_from_digest: false,
            parse_complete: false,
        };

        let rc = match self.invoke(&mut ctx) {
            Ok(()) => TpmRc::Success,
            Err(rc) => rc,
        };
        debug!("execute: {ordinal:?} -> {rc}");
        if rc == TpmRc::Fail {
            self.test_state = TestState::Failure;
        }

        let response = match self.build_response(&ctx, rc, ordinal_raw) {
            Ok(frame) => frame,
            Err(fatal) => {
                self.test_state = TestState::Failure;
                return error_frame(fatal);
            }
        };

        // failed commands consume their sessions, except for the lockout
        // transient
        if rc == TpmRc::Success {
            for ra in &ctx.resp_auth {
                if !ra.continue_auth {
                    self.sessions.terminate(ra.handle);
                }
            }
        } else if ctx.parse_complete && rc != TpmRc::DefendLockRunning {
            for block in ctx.auth1.iter().chain(ctx.auth2.iter()) {
                self.sessions.terminate(block.handle);
            }
        }

        if response.len() > MAX_COMMAND_SIZE {
            return error_frame(TpmRc::Size);
        }
        response
    }

    fn build_response(
        &mut self,
        ctx: &CommandCtx,
        rc: TpmRc,
        ordinal_raw: u32,
    ) -> TpmResult<Vec<u8>> {
        let mut resp = StoreBuffer::new();
        resp.store_initial_response(ctx.tag.response_tag(), rc)?;
        if rc != TpmRc::Success {
            resp.store_final_response(rc);
            return Ok(resp.into_vec());
        }

        resp.store_bytes(ctx.out.as_slice())?;
        let out_for_digest: &[u8] = if ctx.exclude_out_from_digest {
            &[]
        } else {
            ctx.out.as_slice()
        };
        let out_digest = self.crypto.sha1(&[
            &(rc as u32).to_be_bytes(),
            &ordinal_raw.to_be_bytes(),
            out_for_digest,
        ]);

        for ra in &ctx.resp_auth {
            let mut nonce_even = [0u8; DIGEST_SIZE];
            nonce_even.copy_from_slice(&self.crypto.rand(DIGEST_SIZE));
            if let Some(session) = self.sessions.get_mut(ra.handle) {
                session.nonce_even = nonce_even;
            }
            let hmac = self.crypto.hmac_sha1(
                &ra.hmac_key.0,
                &[
                    &out_digest,
                    &nonce_even,
                    &ra.nonce_odd,
                    &[u8::from(ra.continue_auth)],
                ],
            );
            resp.store_bytes(&nonce_even)?;
            resp.store_bool(ra.continue_auth)?;
            resp.store_bytes(&hmac)?;
        }
        resp.store_final_response(rc);

        if self.audit_enabled(ordinal_raw) {
            self.stany.audit_digest = self.crypto.sha1(&[
                &self.stany.audit_digest,
                &ctx.in_digest,
                &ordinal_raw.to_be_bytes(),
                &(rc as u32).to_be_bytes(),
                &out_digest,
            ]);
        }
        Ok(resp.into_vec())
    }
}
