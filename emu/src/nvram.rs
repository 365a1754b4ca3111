// SPDX-License-Identifier: MIT

//! NV defined space: per-index attribute bits, write counters, PCR and
//! locality gating, the global and startup-clear locks, and the DIR
//! register, plus the NV and DIR ordinals.

use log::{debug, info, trace};

use crate::buffer::{Cursor, StoreBuffer};
use crate::dispatch::CommandCtx;
use crate::pcr::PcrInfoShort;
use crate::state::{PermanentFlags, Tpm};
use crate::types::{
    Digest, LocalitySelection, NvPermission, ProtocolId, RequestTag, Secret, TpmRc, TpmResult,
    DIGEST_SIZE, ET_NV, ET_OWNER, NV_INDEX0, NV_INDEX_DIR, NV_INDEX_D_BIT, NV_INDEX_LOCK,
    NV_INDEX_PURVIEW_BIT, NV_INDEX_PURVIEW_MASK, NV_INDEX_RESVD, NV_INDEX_TRIAL, PURVIEW_PC,
    TAG_NV_ATTRIBUTES, TAG_NV_DATA_PUBLIC, TAG_NV_DATA_SENSITIVE,
};
use crate::{
    MAX_NV_SPACE, MAX_NV_WRITE_NOOWNER, NV_INDEX_GPIO_END, NV_INDEX_GPIO_START, PC_CLIENT_PROFILE,
};

/// Public description of one NV index (`TPM_NV_DATA_PUBLIC`).
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct NvDataPublic {
    pub nv_index: u32,
    pub pcr_info_read: PcrInfoShort,
    pub pcr_info_write: PcrInfoShort,
    pub permission: NvPermission,
    pub read_st_clear: bool,
    pub write_st_clear: bool,
    pub write_define: bool,
    pub data_size: u32,
}

impl NvDataPublic {
    pub fn load(cur: &mut Cursor) -> TpmResult<Self> {
        cur.load_tag(TAG_NV_DATA_PUBLIC)?;
        let nv_index = cur.load_u32()?;
        let pcr_info_read = PcrInfoShort::load(cur)?;
        let pcr_info_write = PcrInfoShort::load(cur)?;
        cur.load_tag(TAG_NV_ATTRIBUTES)?;
        let permission = NvPermission::from_bits_retain(cur.load_u32()?);
        let read_st_clear = cur.load_bool()?;
        let write_st_clear = cur.load_bool()?;
        let write_define = cur.load_bool()?;
        let data_size = cur.load_u32()?;
        Ok(NvDataPublic {
            nv_index,
            pcr_info_read,
            pcr_info_write,
            permission,
            read_st_clear,
            write_st_clear,
            write_define,
            data_size,
        })
    }

    pub fn store(&self, out: &mut StoreBuffer) -> TpmResult<()> {
        out.store_u16(TAG_NV_DATA_PUBLIC)?;
        out.store_u32(self.nv_index)?;
        self.pcr_info_read.store(out)?;
        self.pcr_info_write.store(out)?;
        out.store_u16(TAG_NV_ATTRIBUTES)?;
        out.store_u32(self.permission.bits())?;
        out.store_bool(self.read_st_clear)?;
        out.store_bool(self.write_st_clear)?;
        out.store_bool(self.write_define)?;
        out.store_u32(self.data_size)
    }
}

/// One defined index with its secret material and data body.
#[derive(Clone)]
pub(crate) struct NvIndexEntry {
    pub public: NvDataPublic,
    pub auth_value: Secret,
    /// `SHA-1(nvIndex ∥ authValue)`, the OSAP binding digest.
    pub digest: Digest,
    /// Data body; empty for GPIO-mapped indexes.
    pub data: Vec<u8>,
}

impl NvIndexEntry {
    fn store(&self, out: &mut StoreBuffer) -> TpmResult<()> {
        out.store_u16(TAG_NV_DATA_SENSITIVE)?;
        self.public.store(out)?;
        out.store_bytes(&self.auth_value.0)?;
        out.store_bytes(&self.digest)?;
        out.store_sized(&self.data)
    }

    fn load(cur: &mut Cursor) -> TpmResult<Self> {
        cur.load_tag(TAG_NV_DATA_SENSITIVE)?;
        Ok(NvIndexEntry {
            public: NvDataPublic::load(cur)?,
            auth_value: cur.load_secret()?,
            digest: cur.load_digest()?,
            data: cur.load_sized()?.to_vec(),
        })
    }
}

/// The sparse table of defined indexes.
pub(crate) struct NvIndexTable {
    entries: Vec<NvIndexEntry>,
}

impl Default for NvIndexTable {
    fn default() -> Self {
        Self::new()
    }
}

impl NvIndexTable {
    pub fn new() -> Self {
        NvIndexTable {
            entries: Vec::new(),
        }
    }

    pub fn find(&self, nv_index: u32) -> Option<usize> {
        self.entries
            .iter()
            .position(|e| e.public.nv_index == nv_index)
    }

    pub fn get(&self, nv_index: u32) -> TpmResult<&NvIndexEntry> {
        self.find(nv_index)
            .map(|i| &self.entries[i])
            .ok_or(TpmRc::BadIndex)
    }

    pub fn get_mut(&mut self, nv_index: u32) -> TpmResult<&mut NvIndexEntry> {
        let i = self.find(nv_index).ok_or(TpmRc::BadIndex)?;
        Ok(&mut self.entries[i])
    }

    pub fn remove(&mut self, nv_index: u32) {
        self.entries.retain(|e| e.public.nv_index != nv_index);
    }

    pub fn insert(&mut self, entry: NvIndexEntry) {
        self.remove(entry.public.nv_index);
        self.entries.push(entry);
    }

    pub fn indexes(&self) -> Vec<u32> {
        self.entries.iter().map(|e| e.public.nv_index).collect()
    }

    /// Serialized size of the whole table; the defined-space budget is
    /// measured over this value.
    pub fn serialized_size(&self) -> TpmResult<usize> {
        let mut out = StoreBuffer::new();
        self.store(&mut out)?;
        Ok(out.len())
    }

    pub fn store(&self, out: &mut StoreBuffer) -> TpmResult<()> {
        out.store_u32(self.entries.len() as u32)?;
        for e in &self.entries {
            e.store(out)?;
        }
        Ok(())
    }

    pub fn load(cur: &mut Cursor) -> TpmResult<Self> {
        let count = cur.load_u32()? as usize;
        let mut entries = Vec::with_capacity(count.min(64));
        for _ in 0..count {
            entries.push(NvIndexEntry::load(cur)?);
        }
        Ok(NvIndexTable { entries })
    }

    /// Volatile read/write latch bits, persisted in the `volatile` blob.
    pub fn store_volatile(&self, out: &mut StoreBuffer) -> TpmResult<()> {
        out.store_u32(self.entries.len() as u32)?;
        for e in &self.entries {
            out.store_u32(e.public.nv_index)?;
            out.store_bool(e.public.read_st_clear)?;
            out.store_bool(e.public.write_st_clear)?;
        }
        Ok(())
    }

    pub fn load_volatile(&mut self, cur: &mut Cursor) -> TpmResult<()> {
        let count = cur.load_u32()? as usize;
        for _ in 0..count {
            let nv_index = cur.load_u32()?;
            let read_st_clear = cur.load_bool().map_err(|_| TpmRc::Fail)?;
            let write_st_clear = cur.load_bool().map_err(|_| TpmRc::Fail)?;
            if let Some(i) = self.find(nv_index) {
                self.entries[i].public.read_st_clear = read_st_clear;
                self.entries[i].public.write_st_clear = write_st_clear;
            }
        }
        Ok(())
    }

    /// Startup(ST_CLEAR) wipes the volatile latches.
    pub fn clear_volatile(&mut self) {
        for e in &mut self.entries {
            e.public.read_st_clear = false;
            e.public.write_st_clear = false;
        }
    }

    /// Owner-clear path: drop owner-authorized indexes, preserving D-bit
    /// indexes unless a full wipe is requested.
    pub fn delete_owner_authorized(&mut self, delete_d_indexes: bool) {
        self.entries.retain(|e| {
            let owner = e
                .public
                .permission
                .intersects(NvPermission::OWNERWRITE | NvPermission::OWNERREAD);
            if !owner {
                return true;
            }
            if e.public.nv_index & NV_INDEX_D_BIT != 0 && !delete_d_indexes {
                return true;
            }
            false
        });
    }
}

/// Whether the index sits in the GPIO window; an error when the platform
/// profile has no GPIO.
pub(crate) fn is_gpio(nv_index: u32) -> TpmResult<bool> {
    if (NV_INDEX_GPIO_START..=NV_INDEX_GPIO_END).contains(&nv_index) {
        if PC_CLIENT_PROFILE {
            Ok(true)
        } else {
            Err(TpmRc::BadIndex)
        }
    } else {
        Ok(false)
    }
}

/// The define-time valid-index predicate.
fn is_valid_index(nv_index: u32) -> TpmResult<()> {
    if nv_index == NV_INDEX_LOCK || nv_index == NV_INDEX0 || nv_index == NV_INDEX_DIR {
        return Err(TpmRc::BadIndex);
    }
    if nv_index & NV_INDEX_RESVD != 0 {
        return Err(TpmRc::BadIndex);
    }
    let purview = (nv_index & NV_INDEX_PURVIEW_MASK) >> NV_INDEX_PURVIEW_BIT;
    if !PC_CLIENT_PROFILE && purview == PURVIEW_PC {
        return Err(TpmRc::BadIndex);
    }
    is_gpio(nv_index)?;
    Ok(())
}

/// `TPM_NV_DefineSpace`
pub(crate) fn nv_define_space(tpm: &mut Tpm, ctx: &mut CommandCtx) -> TpmResult<()> {
    let pub_info = NvDataPublic::load(&mut ctx.params)?;
    let enc_auth = ctx.params.load_digest()?;
    ctx.finish_params(tpm)?;

    let mut done = false;
    let mut write_all = false;
    let new_index = pub_info.nv_index;

    // defining the lock index flips nvLocked, one-shot and idempotent
    if new_index == NV_INDEX_LOCK && ctx.tag == RequestTag::Command {
        if pub_info.data_size != 0 {
            return Err(TpmRc::BadIndex);
        }
        if !tpm.permanent_flags.contains(PermanentFlags::NV_LOCKED) {
            info!("nv_define_space: setting nvLocked");
            tpm.permanent_flags.insert(PermanentFlags::NV_LOCKED);
            write_all = true;
        }
        done = true;
    }

    let ignore_auth = !tpm.permanent_flags.contains(PermanentFlags::NV_LOCKED);

    if !done && new_index == NV_INDEX0 {
        return Err(TpmRc::BadIndex);
    }
    if !done && !ignore_auth && new_index & NV_INDEX_D_BIT != 0 {
        return Err(TpmRc::BadIndex);
    }

    let mut a1 = Secret::from_slice(&enc_auth);
    let mut nv1_incremented = None;
    if ctx.tag == RequestTag::Auth1 {
        let block = ctx.auth1.clone().ok_or(TpmRc::AuthFail)?;
        let auth = tpm.auth_get(block.handle, Some(ProtocolId::Osap), ET_OWNER, None, None)?;
        if !done {
            tpm.auth_check(&auth, &ctx.in_digest, &block, true, false)?;
            a1 = tpm.adip_decrypt(&auth, &enc_auth, &block.nonce_odd, false)?;
        }
        ctx.push_resp_auth(&auth, &block, false);
    } else if !done {
        if !ignore_auth {
            if !tpm.platform.physical_presence() {
                return Err(TpmRc::BadPresence);
            }
            if tpm.permanent.owner_installed {
                return Err(TpmRc::OwnerSet);
            }
            if pub_info.data_size == 0 {
                return Err(TpmRc::BadDataSize);
            }
        }
        let nv1 = tpm.permanent.no_owner_nv_write + 1;
        if nv1 > MAX_NV_WRITE_NOOWNER {
            return Err(TpmRc::MaxNvWrites);
        }
        nv1_incremented = Some(nv1);
    }

    if !done {
        if let Some(i) = tpm.nv.find(new_index) {
            let old = &tpm.nv.entries[i];
            if !ignore_auth {
                if old.public.permission.contains(NvPermission::GLOBALLOCK)
                    && tpm.stclear_flags.global_lock
                {
                    return Err(TpmRc::AreaLocked);
                }
                if old.public.permission.contains(NvPermission::WRITE_STCLEAR)
                    && old.public.write_st_clear
                {
                    return Err(TpmRc::AreaLocked);
                }
            }
            // sessions bound to the old index die with it
            let old_digest = old.digest;
            let keep = ctx.auth1.as_ref().map(|b| b.handle);
            if tpm.sessions.terminate_entity(ET_NV, Some(&old_digest), keep) {
                if let Some(last) = ctx.resp_auth.last_mut() {
                    last.continue_auth = false;
                }
            }
            debug!("nv_define_space: deleting index {new_index:08x}");
            tpm.nv.remove(new_index);
            write_all = true;
            if pub_info.data_size == 0 {
                done = true;
            }
        }
    }

    if !done {
        // the original consults the read locality set here
        let write_localities = pub_info.pcr_info_read.locality_at_release != LocalitySelection::ALL;
        if pub_info
            .permission
            .contains(NvPermission::OWNERWRITE | NvPermission::AUTHWRITE)
        {
            return Err(TpmRc::AuthConflict);
        }
        if pub_info
            .permission
            .contains(NvPermission::OWNERREAD | NvPermission::AUTHREAD)
        {
            return Err(TpmRc::AuthConflict);
        }
        if !pub_info.permission.intersects(
            NvPermission::OWNERWRITE
                | NvPermission::AUTHWRITE
                | NvPermission::WRITEDEFINE
                | NvPermission::PPWRITE,
        ) && !write_localities
        {
            return Err(TpmRc::PerNoWrite);
        }
        is_valid_index(new_index)?;
        if pub_info.data_size == 0 {
            return Err(TpmRc::BadParamSize);
        }

        let gpio = is_gpio(new_index)?;
        let mut public = pub_info.clone();
        public.read_st_clear = false;
        public.write_st_clear = false;
        public.write_define = false;
        let mut index_bytes = [0u8; 4];
        index_bytes.copy_from_slice(&new_index.to_be_bytes());
        let digest = tpm.crypto.sha1(&[&index_bytes, &a1.0]);
        let entry = NvIndexEntry {
            public,
            auth_value: a1.clone(),
            digest,
            data: if gpio {
                Vec::new()
            } else {
                vec![0xFF; pub_info.data_size as usize]
            },
        };

        tpm.nv.insert(entry);
        if tpm.nv.serialized_size()? > MAX_NV_SPACE {
            tpm.nv.remove(new_index);
            return Err(TpmRc::NoSpace);
        }
        if new_index == NV_INDEX_TRIAL {
            tpm.nv.remove(new_index);
        } else {
            info!("nv_define_space: defined index {new_index:08x}");
            write_all = true;
        }
    }

    if let Some(nv1) = nv1_incremented {
        if write_all {
            tpm.permanent.no_owner_nv_write = nv1;
        }
    }
    if write_all {
        tpm.flush_permanent()?;
    }
    Ok(())
}

struct NvAccess {
    ignore_auth: bool,
    dir: bool,
    gpio: bool,
}

fn nv_locate(tpm: &Tpm, nv_index: u32) -> TpmResult<NvAccess> {
    let ignore_auth = !tpm.permanent_flags.contains(PermanentFlags::NV_LOCKED);
    let gpio = is_gpio(nv_index)?;
    let dir = nv_index == NV_INDEX_DIR;
    if !dir && nv_index != NV_INDEX0 {
        tpm.nv.get(nv_index)?;
    }
    Ok(NvAccess {
        ignore_auth,
        dir,
        gpio,
    })
}

/// disable/deactivated gate applied to owner-readable/writable indexes
/// once nvLocked is set.
fn nv_check_disabled(tpm: &Tpm, owner_attr: bool) -> TpmResult<()> {
    if !tpm.permanent_flags.contains(PermanentFlags::NV_LOCKED) {
        return Ok(());
    }
    if owner_attr {
        if tpm.permanent_flags.contains(PermanentFlags::DISABLE) {
            return Err(TpmRc::Disabled);
        }
        if tpm.stclear_flags.deactivated {
            return Err(TpmRc::Deactivated);
        }
    }
    Ok(())
}

/// `TPM_NV_ReadValue`
pub(crate) fn nv_read_value(tpm: &mut Tpm, ctx: &mut CommandCtx) -> TpmResult<()> {
    let nv_index = ctx.params.load_u32()?;
    let offset = ctx.params.load_u32()? as usize;
    let data_size = ctx.params.load_u32()? as usize;
    ctx.finish_params(tpm)?;
    trace!("nv_read_value: index {nv_index:08x} offset {offset} size {data_size}");

    let access = nv_locate(tpm, nv_index)?;
    if nv_index == NV_INDEX0 {
        return Err(TpmRc::BadIndex);
    }

    if !access.dir {
        let entry = tpm.nv.get(nv_index)?;
        nv_check_disabled(tpm, entry.public.permission.contains(NvPermission::OWNERREAD))?;
        if ctx.tag == RequestTag::Auth1
            && !entry.public.permission.contains(NvPermission::OWNERREAD)
        {
            return Err(TpmRc::AuthConflict);
        }
    }

    if ctx.tag == RequestTag::Auth1 {
        let block = ctx.auth1.clone().ok_or(TpmRc::AuthFail)?;
        let owner_auth = tpm.permanent.owner_auth.clone();
        let auth = tpm.auth_get(block.handle, None, ET_OWNER, None, Some(&owner_auth))?;
        if !access.ignore_auth {
            tpm.auth_check(&auth, &ctx.in_digest, &block, true, false)?;
        }
        ctx.push_resp_auth(&auth, &block, block.continue_auth);
    }

    if !access.dir {
        let entry = tpm.nv.get(nv_index)?;
        if ctx.tag == RequestTag::Command {
            if entry.public.permission.contains(NvPermission::AUTHREAD) {
                return Err(TpmRc::AuthConflict);
            }
            if !access.ignore_auth
                && entry.public.permission.contains(NvPermission::OWNERREAD)
            {
                return Err(TpmRc::AuthConflict);
            }
        }
        if !access.ignore_auth {
            if entry.public.permission.contains(NvPermission::PPREAD)
                && !tpm.platform.physical_presence()
            {
                return Err(TpmRc::BadPresence);
            }
            if entry.public.permission.contains(NvPermission::READ_STCLEAR)
                && entry.public.read_st_clear
            {
                return Err(TpmRc::DisabledCmd);
            }
            entry.public.pcr_info_read.check_digest(tpm)?;
        }
    }

    let data = if access.dir {
        if offset + data_size > DIGEST_SIZE {
            return Err(TpmRc::NoSpace);
        }
        tpm.permanent.auth_dir[offset..offset + data_size].to_vec()
    } else if data_size == 0 {
        // a zero-length read latches the read lock
        let entry = tpm.nv.get_mut(nv_index)?;
        entry.public.read_st_clear = true;
        Vec::new()
    } else {
        let entry = tpm.nv.get(nv_index)?;
        if offset + data_size > entry.public.data_size as usize {
            return Err(TpmRc::NoSpace);
        }
        if access.gpio {
            tpm.platform.gpio_read(nv_index, data_size)?
        } else {
            entry.data[offset..offset + data_size].to_vec()
        }
    };
    ctx.out.store_sized(&data)
}

/// `TPM_NV_ReadValueAuth`
pub(crate) fn nv_read_value_auth(tpm: &mut Tpm, ctx: &mut CommandCtx) -> TpmResult<()> {
    let nv_index = ctx.params.load_u32()?;
    let offset = ctx.params.load_u32()? as usize;
    let data_size = ctx.params.load_u32()? as usize;
    ctx.finish_params(tpm)?;

    let access = nv_locate(tpm, nv_index)?;
    if access.dir || nv_index == NV_INDEX0 {
        return Err(TpmRc::BadIndex);
    }
    let (permission, entry_digest, entry_auth) = {
        let entry = tpm.nv.get(nv_index)?;
        (
            entry.public.permission,
            entry.digest,
            entry.auth_value.clone(),
        )
    };
    if !permission.contains(NvPermission::AUTHREAD) {
        return Err(TpmRc::AuthConflict);
    }
    nv_check_disabled(tpm, permission.contains(NvPermission::OWNERREAD))?;

    let block = ctx.auth1.clone().ok_or(TpmRc::AuthFail)?;
    let auth = tpm.auth_get(
        block.handle,
        None,
        ET_NV,
        Some(&entry_digest),
        Some(&entry_auth),
    )?;
    tpm.auth_check(&auth, &ctx.in_digest, &block, false, false)?;
    ctx.push_resp_auth(&auth, &block, block.continue_auth);

    if !access.ignore_auth {
        let entry = tpm.nv.get(nv_index)?;
        if permission.contains(NvPermission::PPREAD) && !tpm.platform.physical_presence() {
            return Err(TpmRc::BadPresence);
        }
        if permission.contains(NvPermission::READ_STCLEAR) && entry.public.read_st_clear {
            return Err(TpmRc::DisabledCmd);
        }
        entry.public.pcr_info_read.check_digest(tpm)?;
    }

    let data = if data_size == 0 {
        let entry = tpm.nv.get_mut(nv_index)?;
        entry.public.read_st_clear = true;
        Vec::new()
    } else {
        let entry = tpm.nv.get(nv_index)?;
        if offset + data_size > entry.public.data_size as usize {
            return Err(TpmRc::NoSpace);
        }
        if access.gpio {
            tpm.platform.gpio_read(nv_index, data_size)?
        } else {
            entry.data[offset..offset + data_size].to_vec()
        }
    };
    ctx.out.store_sized(&data)
}

/// Write-side gates applied once nvLocked is set; callers pass the
/// pre-fetched permission word.
fn nv_write_locks(tpm: &Tpm, nv_index: u32, permission: NvPermission) -> TpmResult<()> {
    let entry = tpm.nv.get(nv_index)?;
    if permission.contains(NvPermission::PPWRITE) && !tpm.platform.physical_presence() {
        return Err(TpmRc::BadPresence);
    }
    if permission.contains(NvPermission::WRITEDEFINE) && entry.public.write_define {
        return Err(TpmRc::AreaLocked);
    }
    if permission.contains(NvPermission::GLOBALLOCK) && tpm.stclear_flags.global_lock {
        return Err(TpmRc::AreaLocked);
    }
    if permission.contains(NvPermission::WRITE_STCLEAR) && entry.public.write_st_clear {
        return Err(TpmRc::AreaLocked);
    }
    entry.public.pcr_info_write.check_digest(tpm)
}

/// Common data-write tail: latches on zero-length writes, bounds and
/// full-write enforcement, GPIO delegation and wearout avoidance.
fn nv_write_tail(
    tpm: &mut Tpm,
    nv_index: u32,
    offset: usize,
    data: &[u8],
    gpio: bool,
    write_all: &mut bool,
) -> TpmResult<()> {
    if data.is_empty() {
        let entry = tpm.nv.get_mut(nv_index)?;
        trace!("nv_write_tail: latching write locks on {nv_index:08x}");
        entry.public.write_st_clear = true;
        if !entry.public.write_define {
            entry.public.write_define = true;
            *write_all = true;
        }
    } else {
        let entry = tpm.nv.get(nv_index)?;
        if offset + data.len() > entry.public.data_size as usize {
            return Err(TpmRc::NoSpace);
        }
        if entry.public.permission.contains(NvPermission::WRITEALL)
            && data.len() != entry.public.data_size as usize
        {
            return Err(TpmRc::NotFullWrite);
        }
        if gpio {
            tpm.platform.gpio_write(nv_index, data)?;
        } else {
            let entry = tpm.nv.get_mut(nv_index)?;
            if entry.data[offset..offset + data.len()] != *data {
                entry.data[offset..offset + data.len()].copy_from_slice(data);
                *write_all = true;
            }
        }
    }
    let entry = tpm.nv.get_mut(nv_index)?;
    // a successful write reopens reads
    entry.public.read_st_clear = false;
    Ok(())
}

/// `TPM_NV_WriteValue`
pub(crate) fn nv_write_value(tpm: &mut Tpm, ctx: &mut CommandCtx) -> TpmResult<()> {
    let nv_index = ctx.params.load_u32()?;
    let offset = ctx.params.load_u32()? as usize;
    let data = ctx.params.load_sized()?.to_vec();
    ctx.finish_params(tpm)?;
    trace!(
        "nv_write_value: index {nv_index:08x} offset {offset} size {}",
        data.len()
    );

    let index0 = nv_index == NV_INDEX0;
    let ignore_auth = !tpm.permanent_flags.contains(PermanentFlags::NV_LOCKED);
    let gpio = is_gpio(nv_index)?;
    let dir = nv_index == NV_INDEX_DIR;
    let mut write_all = false;

    if !index0 && !dir {
        tpm.nv.get(nv_index)?;
    }
    if !index0 {
        let owner_attr = dir
            || tpm
                .nv
                .get(nv_index)?
                .public
                .permission
                .contains(NvPermission::OWNERWRITE);
        nv_check_disabled(tpm, owner_attr)?;
    }

    if ctx.tag == RequestTag::Auth1 {
        if !dir && !index0 {
            let entry = tpm.nv.get(nv_index)?;
            if !entry.public.permission.contains(NvPermission::OWNERWRITE) {
                return Err(TpmRc::AuthConflict);
            }
        }
        let block = ctx.auth1.clone().ok_or(TpmRc::AuthFail)?;
        let owner_auth = tpm.permanent.owner_auth.clone();
        let auth = tpm.auth_get(block.handle, None, ET_OWNER, None, Some(&owner_auth))?;
        tpm.auth_check(&auth, &ctx.in_digest, &block, true, false)?;
        ctx.push_resp_auth(&auth, &block, block.continue_auth);
    }

    let mut nv1_incremented = None;
    if ctx.tag == RequestTag::Command {
        if !ignore_auth && !index0 {
            let owner_attr = dir
                || tpm
                    .nv
                    .get(nv_index)?
                    .public
                    .permission
                    .contains(NvPermission::OWNERWRITE);
            if owner_attr {
                return Err(TpmRc::AuthConflict);
            }
        }
        if !index0 {
            let nv1 = tpm.permanent.no_owner_nv_write + 1;
            if nv1 > MAX_NV_WRITE_NOOWNER {
                return Err(TpmRc::MaxNvWrites);
            }
            nv1_incremented = Some(nv1);
        }
    }

    if index0 {
        if !data.is_empty() {
            return Err(TpmRc::BadIndex);
        }
        info!("nv_write_value: index 0, setting bGlobalLock");
        tpm.stclear_flags.global_lock = true;
        return Ok(());
    }

    if dir {
        // the DIR register implies owner write and full writes
        if !data.is_empty() {
            if offset != 0 || data.len() != DIGEST_SIZE {
                return Err(TpmRc::NotFullWrite);
            }
            tpm.permanent.auth_dir.copy_from_slice(&data);
            write_all = true;
        }
    } else {
        let permission = tpm.nv.get(nv_index)?.public.permission;
        if permission.contains(NvPermission::AUTHWRITE) {
            return Err(TpmRc::AuthConflict);
        }
        if !ignore_auth {
            nv_write_locks(tpm, nv_index, permission)?;
        }
        nv_write_tail(tpm, nv_index, offset, &data, gpio, &mut write_all)?;
    }

    if write_all {
        if let Some(nv1) = nv1_incremented {
            tpm.permanent.no_owner_nv_write = nv1;
        }
        tpm.flush_permanent()?;
    }
    Ok(())
}

/// `TPM_NV_WriteValueAuth`
pub(crate) fn nv_write_value_auth(tpm: &mut Tpm, ctx: &mut CommandCtx) -> TpmResult<()> {
    let nv_index = ctx.params.load_u32()?;
    let offset = ctx.params.load_u32()? as usize;
    let data = ctx.params.load_sized()?.to_vec();
    ctx.finish_params(tpm)?;

    let gpio = is_gpio(nv_index)?;
    if nv_index == NV_INDEX_DIR || nv_index == NV_INDEX0 {
        return Err(TpmRc::BadIndex);
    }
    let ignore_auth = !tpm.permanent_flags.contains(PermanentFlags::NV_LOCKED);
    let (permission, entry_digest, entry_auth) = {
        let entry = tpm.nv.get(nv_index)?;
        (
            entry.public.permission,
            entry.digest,
            entry.auth_value.clone(),
        )
    };
    if !permission.contains(NvPermission::AUTHWRITE) {
        return Err(TpmRc::AuthConflict);
    }
    nv_check_disabled(tpm, permission.contains(NvPermission::OWNERWRITE))?;

    let block = ctx.auth1.clone().ok_or(TpmRc::AuthFail)?;
    let auth = tpm.auth_get(
        block.handle,
        None,
        ET_NV,
        Some(&entry_digest),
        Some(&entry_auth),
    )?;
    tpm.auth_check(&auth, &ctx.in_digest, &block, false, false)?;
    ctx.push_resp_auth(&auth, &block, block.continue_auth);

    let mut write_all = false;
    if !ignore_auth {
        nv_write_locks(tpm, nv_index, permission)?;
    }
    nv_write_tail(tpm, nv_index, offset, &data, gpio, &mut write_all)?;
    if write_all {
        tpm.flush_permanent()?;
    }
    Ok(())
}

/// `TPM_DirWriteAuth`
pub(crate) fn dir_write_auth(tpm: &mut Tpm, ctx: &mut CommandCtx) -> TpmResult<()> {
    let dir_index = ctx.params.load_u32()?;
    let new_contents = ctx.params.load_digest()?;
    ctx.finish_params(tpm)?;

    if dir_index != 0 {
        return Err(TpmRc::BadIndex);
    }
    let block = ctx.auth1.clone().ok_or(TpmRc::AuthFail)?;
    let owner_auth = tpm.permanent.owner_auth.clone();
    let auth = tpm.auth_get(block.handle, None, ET_OWNER, None, Some(&owner_auth))?;
    tpm.auth_check(&auth, &ctx.in_digest, &block, true, false)?;
    ctx.push_resp_auth(&auth, &block, block.continue_auth);

    tpm.permanent.auth_dir = new_contents;
    tpm.flush_permanent()
}

/// `TPM_DirRead`
pub(crate) fn dir_read(tpm: &mut Tpm, ctx: &mut CommandCtx) -> TpmResult<()> {
    let dir_index = ctx.params.load_u32()?;
    ctx.finish_params(tpm)?;
    if dir_index != 0 {
        return Err(TpmRc::BadIndex);
    }
    let value = tpm.permanent.auth_dir;
    ctx.out.store_bytes(&value)
}
