// SPDX-License-Identifier: MIT

//! Platform configuration registers, selection maps and the composite-hash
//! gating structures, plus the PCR and multi-command SHA-1 ordinals.

use log::trace;

use crate::buffer::{Cursor, StoreBuffer};
use crate::crypto::Sha1Ctx;
use crate::dispatch::CommandCtx;
use crate::state::Tpm;
use crate::types::{
    Digest, LocalitySelection, TpmRc, TpmResult, DIGEST_SIZE, TAG_PCR_INFO_LONG,
};
use crate::NUM_PCRS;

/// Largest `sizeOfSelect` the register count admits.
const MAX_SELECT_SIZE: usize = NUM_PCRS / 8;

/// Host buffer granted to a SHA-1 thread per update.
const SHA1_MAX_NUM_BYTES: u32 = 2048;

/// A `TPM_PCR_SELECTION` bitmap.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PcrSelection {
    select: Vec<u8>,
}

impl PcrSelection {
    #[must_use]
    pub fn empty() -> Self {
        PcrSelection {
            select: vec![0; MAX_SELECT_SIZE],
        }
    }

    /// Selection with exactly the given registers.
    pub fn with_pcrs(pcrs: &[usize]) -> TpmResult<Self> {
        let mut sel = PcrSelection::empty();
        for &i in pcrs {
            if i >= NUM_PCRS {
                return Err(TpmRc::InvalidPcrInfo);
            }
            sel.select[i / 8] |= 1 << (i % 8);
        }
        Ok(sel)
    }

    pub fn load(cur: &mut Cursor) -> TpmResult<Self> {
        let size = cur.load_u16()? as usize;
        if size > MAX_SELECT_SIZE {
            return Err(TpmRc::InvalidPcrInfo);
        }
        Ok(PcrSelection {
            select: cur.load_bytes(size)?.to_vec(),
        })
    }

    pub fn store(&self, out: &mut StoreBuffer) -> TpmResult<()> {
        out.store_u16(self.select.len() as u16)?;
        out.store_bytes(&self.select)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.select.iter().all(|&b| b == 0)
    }

    #[must_use]
    pub fn selected(&self) -> Vec<usize> {
        let mut out = Vec::new();
        for i in 0..self.select.len() * 8 {
            if self.select[i / 8] & (1 << (i % 8)) != 0 {
                out.push(i);
            }
        }
        out
    }
}

/// The PCR bank.
#[derive(Clone, Debug)]
pub struct PcrBank {
    regs: Vec<Digest>,
}

impl Default for PcrBank {
    fn default() -> Self {
        Self::new()
    }
}

impl PcrBank {
    #[must_use]
    pub fn new() -> Self {
        let mut bank = PcrBank {
            regs: vec![[0u8; DIGEST_SIZE]; NUM_PCRS],
        };
        bank.reset();
        bank
    }

    /// Power-on values: the resettable debug/locality registers read back
    /// all ones until reset by an authorized party.
    pub fn reset(&mut self) {
        for (i, reg) in self.regs.iter_mut().enumerate() {
            *reg = if (17..=22).contains(&i) {
                [0xFF; DIGEST_SIZE]
            } else {
                [0u8; DIGEST_SIZE]
            };
        }
    }

    /// Direct register restore, used when reloading saved state.
    pub fn set(&mut self, index: usize, value: Digest) {
        if let Some(reg) = self.regs.get_mut(index) {
            *reg = value;
        }
    }

    pub fn read(&self, index: u32) -> TpmResult<Digest> {
        self.regs
            .get(index as usize)
            .copied()
            .ok_or(TpmRc::BadIndex)
    }

    pub fn extend(&mut self, tpm_crypto: &dyn crate::Crypto, index: u32, digest: &Digest) -> TpmResult<Digest> {
        let reg = self
            .regs
            .get_mut(index as usize)
            .ok_or(TpmRc::BadIndex)?;
        *reg = tpm_crypto.sha1(&[reg.as_slice(), digest.as_slice()]);
        Ok(*reg)
    }

    /// Composite hash over the selected registers:
    /// `SHA-1(selection ∥ u32(valueSize) ∥ concat(values))`.
    pub fn composite(
        &self,
        tpm_crypto: &dyn crate::Crypto,
        selection: &PcrSelection,
    ) -> TpmResult<Digest> {
        let indices = selection.selected();
        let mut sel = StoreBuffer::new();
        selection.store(&mut sel)?;
        let mut values = Vec::with_capacity(indices.len() * DIGEST_SIZE);
        for i in &indices {
            if *i >= NUM_PCRS {
                return Err(TpmRc::InvalidPcrInfo);
            }
            values.extend_from_slice(&self.regs[*i]);
        }
        let size = (values.len() as u32).to_be_bytes();
        Ok(tpm_crypto.sha1(&[sel.as_slice(), &size, &values]))
    }
}

fn load_locality(cur: &mut Cursor) -> TpmResult<LocalitySelection> {
    let bits = cur.load_u8()?;
    let sel = LocalitySelection::from_bits(bits).ok_or(TpmRc::InvalidStructure)?;
    if sel.is_empty() {
        return Err(TpmRc::InvalidStructure);
    }
    Ok(sel)
}

/// `TPM_PCR_INFO` (1.1).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PcrInfo {
    pub selection: PcrSelection,
    pub digest_at_release: Digest,
    pub digest_at_creation: Digest,
}

impl PcrInfo {
    pub fn load(cur: &mut Cursor) -> TpmResult<Self> {
        Ok(PcrInfo {
            selection: PcrSelection::load(cur)?,
            digest_at_release: cur.load_digest()?,
            digest_at_creation: cur.load_digest()?,
        })
    }

    pub fn store(&self, out: &mut StoreBuffer) -> TpmResult<()> {
        self.selection.store(out)?;
        out.store_bytes(&self.digest_at_release)?;
        out.store_bytes(&self.digest_at_creation)
    }

    /// Gate on the recorded composite. An empty selection passes.
    pub fn check_digest(&self, tpm: &Tpm) -> TpmResult<()> {
        if self.selection.is_empty() {
            return Ok(());
        }
        let composite = tpm.pcrs.composite(tpm.crypto.as_ref(), &self.selection)?;
        if composite == self.digest_at_release {
            Ok(())
        } else {
            Err(TpmRc::WrongPcrVal)
        }
    }
}

/// `TPM_PCR_INFO_LONG` (1.2).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PcrInfoLong {
    pub locality_at_creation: LocalitySelection,
    pub locality_at_release: LocalitySelection,
    pub creation_selection: PcrSelection,
    pub release_selection: PcrSelection,
    pub digest_at_creation: Digest,
    pub digest_at_release: Digest,
}

impl PcrInfoLong {
    pub fn load(cur: &mut Cursor) -> TpmResult<Self> {
        cur.load_tag(TAG_PCR_INFO_LONG)?;
        Ok(PcrInfoLong {
            locality_at_creation: load_locality(cur)?,
            locality_at_release: load_locality(cur)?,
            creation_selection: PcrSelection::load(cur)?,
            release_selection: PcrSelection::load(cur)?,
            digest_at_creation: cur.load_digest()?,
            digest_at_release: cur.load_digest()?,
        })
    }

    pub fn store(&self, out: &mut StoreBuffer) -> TpmResult<()> {
        out.store_u16(TAG_PCR_INFO_LONG)?;
        out.store_u8(self.locality_at_creation.bits())?;
        out.store_u8(self.locality_at_release.bits())?;
        self.creation_selection.store(out)?;
        self.release_selection.store(out)?;
        out.store_bytes(&self.digest_at_creation)?;
        out.store_bytes(&self.digest_at_release)
    }

    /// Gate on release composite and release locality.
    pub fn check_digest(&self, tpm: &Tpm) -> TpmResult<()> {
        let here = LocalitySelection::from_modifier(tpm.stany_flags.locality_modifier)
            .ok_or(TpmRc::BadLocality)?;
        if !self.locality_at_release.contains(here) {
            return Err(TpmRc::BadLocality);
        }
        if self.release_selection.is_empty() {
            return Ok(());
        }
        let composite = tpm
            .pcrs
            .composite(tpm.crypto.as_ref(), &self.release_selection)?;
        if composite == self.digest_at_release {
            Ok(())
        } else {
            Err(TpmRc::WrongPcrVal)
        }
    }
}

/// `TPM_PCR_INFO_SHORT`, the gate carried by NV indexes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PcrInfoShort {
    pub selection: PcrSelection,
    pub locality_at_release: LocalitySelection,
    pub digest_at_release: Digest,
}

impl Default for PcrInfoShort {
    fn default() -> Self {
        PcrInfoShort {
            selection: PcrSelection::empty(),
            locality_at_release: LocalitySelection::ALL,
            digest_at_release: [0u8; DIGEST_SIZE],
        }
    }
}

impl PcrInfoShort {
    pub fn load(cur: &mut Cursor) -> TpmResult<Self> {
        Ok(PcrInfoShort {
            selection: PcrSelection::load(cur)?,
            locality_at_release: load_locality(cur)?,
            digest_at_release: cur.load_digest()?,
        })
    }

    pub fn store(&self, out: &mut StoreBuffer) -> TpmResult<()> {
        self.selection.store(out)?;
        out.store_u8(self.locality_at_release.bits())?;
        out.store_bytes(&self.digest_at_release)
    }

    pub fn check_digest(&self, tpm: &Tpm) -> TpmResult<()> {
        let here = LocalitySelection::from_modifier(tpm.stany_flags.locality_modifier)
            .ok_or(TpmRc::BadLocality)?;
        if !self.locality_at_release.contains(here) {
            return Err(TpmRc::BadLocality);
        }
        if self.selection.is_empty() {
            return Ok(());
        }
        let composite = tpm.pcrs.composite(tpm.crypto.as_ref(), &self.selection)?;
        if composite == self.digest_at_release {
            Ok(())
        } else {
            Err(TpmRc::WrongPcrVal)
        }
    }
}

/// `TPM_Extend`
pub(crate) fn extend(tpm: &mut Tpm, ctx: &mut CommandCtx) -> TpmResult<()> {
    let pcr_num = ctx.params.load_u32()?;
    let in_digest = ctx.params.load_digest()?;
    ctx.finish_params(tpm)?;

    let new_value = tpm.pcrs.extend(tpm.crypto.as_ref(), pcr_num, &in_digest)?;
    tpm.platform.notify_pcr_extend(pcr_num, &new_value);
    trace!("extend: pcr {pcr_num}");

    // while disabled or deactivated the extend happens but the value is
    // not disclosed
    if tpm.permanent_flags.contains(crate::state::PermanentFlags::DISABLE)
        || tpm.stclear_flags.deactivated
    {
        ctx.out.store_bytes(&[0u8; DIGEST_SIZE])
    } else {
        ctx.out.store_bytes(&new_value)
    }
}

/// `TPM_PCRRead`
pub(crate) fn pcr_read(tpm: &mut Tpm, ctx: &mut CommandCtx) -> TpmResult<()> {
    let pcr_index = ctx.params.load_u32()?;
    ctx.finish_params(tpm)?;
    let value = tpm.pcrs.read(pcr_index)?;
    ctx.out.store_bytes(&value)
}

/// `TPM_SHA1Start`
pub(crate) fn sha1_start(tpm: &mut Tpm, ctx: &mut CommandCtx) -> TpmResult<()> {
    ctx.finish_params(tpm)?;
    tpm.sha1_thread = Some(Sha1Ctx::new());
    ctx.out.store_u32(SHA1_MAX_NUM_BYTES)
}

/// `TPM_SHA1Update`
pub(crate) fn sha1_update(tpm: &mut Tpm, ctx: &mut CommandCtx) -> TpmResult<()> {
    let data = ctx.params.load_sized()?;
    ctx.finish_params(tpm)?;
    if data.len() % 64 != 0 || data.len() > SHA1_MAX_NUM_BYTES as usize {
        return Err(TpmRc::ShaError);
    }
    let thread = tpm.sha1_thread.as_mut().ok_or(TpmRc::ShaThread)?;
    thread.update(data);
    Ok(())
}

/// `TPM_SHA1Complete`
pub(crate) fn sha1_complete(tpm: &mut Tpm, ctx: &mut CommandCtx) -> TpmResult<()> {
    let data = ctx.params.load_sized()?;
    ctx.finish_params(tpm)?;
    if data.len() > 64 {
        return Err(TpmRc::ShaError);
    }
    let mut thread = tpm.sha1_thread.take().ok_or(TpmRc::ShaThread)?;
    thread.update(data);
    ctx.out.store_bytes(&thread.finalize())
}

/// `TPM_SHA1CompleteExtend`
pub(crate) fn sha1_complete_extend(tpm: &mut Tpm, ctx: &mut CommandCtx) -> TpmResult<()> {
    let pcr_num = ctx.params.load_u32()?;
    let data = ctx.params.load_sized()?;
    ctx.finish_params(tpm)?;
    if data.len() > 64 {
        return Err(TpmRc::ShaError);
    }
    if pcr_num as usize >= NUM_PCRS {
        return Err(TpmRc::BadIndex);
    }
    let mut thread = tpm.sha1_thread.take().ok_or(TpmRc::ShaThread)?;
    thread.update(data);
    let hash_value = thread.finalize();
    let out_digest = tpm.pcrs.extend(tpm.crypto.as_ref(), pcr_num, &hash_value)?;
    tpm.platform.notify_pcr_extend(pcr_num, &out_digest);
    ctx.out.store_bytes(&hash_value)?;
    ctx.out.store_bytes(&out_digest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::SoftCrypto;
    use crate::Crypto;

    #[test]
    fn selection_round_trip() {
        let sel = PcrSelection::with_pcrs(&[0, 9, 23]).unwrap();
        let mut out = StoreBuffer::new();
        sel.store(&mut out).unwrap();
        let bytes = out.into_vec();
        let loaded = PcrSelection::load(&mut Cursor::new(&bytes)).unwrap();
        assert_eq!(loaded.selected(), vec![0, 9, 23]);
        assert!(PcrSelection::with_pcrs(&[24]).is_err());
    }

    #[test]
    fn composite_changes_with_registers() {
        let c = SoftCrypto;
        let mut bank = PcrBank::new();
        let sel = PcrSelection::with_pcrs(&[0]).unwrap();
        let before = bank.composite(&c, &sel).unwrap();
        bank.extend(&c, 0, &c.sha1(&[b"x"])).unwrap();
        let after = bank.composite(&c, &sel).unwrap();
        assert_ne!(before, after);

        // untouched registers leave the composite alone
        let sel1 = PcrSelection::with_pcrs(&[1]).unwrap();
        let a = bank.composite(&c, &sel1).unwrap();
        bank.extend(&c, 0, &c.sha1(&[b"y"])).unwrap();
        assert_eq!(bank.composite(&c, &sel1).unwrap(), a);
    }

    #[test]
    fn reset_values() {
        let bank = PcrBank::new();
        assert_eq!(bank.read(0).unwrap(), [0u8; DIGEST_SIZE]);
        assert_eq!(bank.read(17).unwrap(), [0xFF; DIGEST_SIZE]);
        assert_eq!(bank.read(23).unwrap(), [0u8; DIGEST_SIZE]);
        assert_eq!(bank.read(24).err(), Some(TpmRc::BadIndex));
    }

    #[test]
    fn locality_byte_must_be_legal() {
        let mut cur = Cursor::new(&[0x20]);
        assert!(load_locality(&mut cur).is_err());
        let mut cur = Cursor::new(&[0x00]);
        assert!(load_locality(&mut cur).is_err());
        let mut cur = Cursor::new(&[0x1F]);
        assert_eq!(load_locality(&mut cur).unwrap(), LocalitySelection::ALL);
    }

    #[test]
    fn pcr_info_short_round_trip() {
        let info = PcrInfoShort {
            selection: PcrSelection::with_pcrs(&[4]).unwrap(),
            locality_at_release: LocalitySelection::ZERO | LocalitySelection::THREE,
            digest_at_release: [7u8; DIGEST_SIZE],
        };
        let mut out = StoreBuffer::new();
        info.store(&mut out).unwrap();
        let bytes = out.into_vec();
        let loaded = PcrInfoShort::load(&mut Cursor::new(&bytes)).unwrap();
        assert_eq!(loaded, info);
    }
}
