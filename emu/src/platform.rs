// SPDX-License-Identifier: MIT

//! Platform inputs: physical presence, locality, and the GPIO window that
//! some NV indexes map onto.

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::rc::Rc;

use crate::types::{Digest, TpmResult};

/// Host-platform capability.
///
/// Methods take `&self`; implementations use interior mutability where they
/// carry state, which keeps shared handles (`Rc<FixedPlatform>`) usable from
/// both the emulator and a test harness.
pub trait Platform {
    /// Whether physical presence is currently asserted.
    fn physical_presence(&self) -> bool;

    /// Current locality modifier, 0..=4.
    fn locality_modifier(&self) -> u8;

    /// Read `len` bytes from a GPIO-mapped NV index.
    fn gpio_read(&self, nv_index: u32, len: usize) -> TpmResult<Vec<u8>>;

    /// Write bytes to a GPIO-mapped NV index.
    fn gpio_write(&self, nv_index: u32, data: &[u8]) -> TpmResult<()>;

    /// Observation hook for PCR extends.
    fn notify_pcr_extend(&self, _pcr_index: u32, _digest: &Digest) {}
}

/// A platform with host-settable presence and locality and memory-backed
/// GPIO ports.
#[derive(Debug, Default)]
pub struct FixedPlatform {
    pub presence: Cell<bool>,
    pub locality: Cell<u8>,
    gpio: RefCell<BTreeMap<u32, Vec<u8>>>,
}

impl FixedPlatform {
    #[must_use]
    pub fn new() -> Self {
        FixedPlatform::default()
    }
}

impl Platform for FixedPlatform {
    fn physical_presence(&self) -> bool {
        self.presence.get()
    }

    fn locality_modifier(&self) -> u8 {
        self.locality.get().min(4)
    }

    fn gpio_read(&self, nv_index: u32, len: usize) -> TpmResult<Vec<u8>> {
        let gpio = self.gpio.borrow();
        let port = gpio.get(&nv_index).map_or(&[] as &[u8], Vec::as_slice);
        let mut out = vec![0u8; len];
        let n = len.min(port.len());
        out[..n].copy_from_slice(&port[..n]);
        Ok(out)
    }

    fn gpio_write(&self, nv_index: u32, data: &[u8]) -> TpmResult<()> {
        self.gpio.borrow_mut().insert(nv_index, data.to_vec());
        Ok(())
    }
}

impl<P: Platform + ?Sized> Platform for Rc<P> {
    fn physical_presence(&self) -> bool {
        (**self).physical_presence()
    }

    fn locality_modifier(&self) -> u8 {
        (**self).locality_modifier()
    }

    fn gpio_read(&self, nv_index: u32, len: usize) -> TpmResult<Vec<u8>> {
        (**self).gpio_read(nv_index, len)
    }

    fn gpio_write(&self, nv_index: u32, data: &[u8]) -> TpmResult<()> {
        (**self).gpio_write(nv_index, data)
    }

    fn notify_pcr_extend(&self, pcr_index: u32, digest: &Digest) {
        (**self).notify_pcr_extend(pcr_index, digest);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gpio_ports_are_independent() {
        let p = FixedPlatform::new();
        p.gpio_write(0x0001_1600, b"abc").unwrap();
        assert_eq!(p.gpio_read(0x0001_1600, 3).unwrap(), b"abc");
        assert_eq!(p.gpio_read(0x0001_1601, 2).unwrap(), vec![0, 0]);
        // short port reads back zero-filled
        assert_eq!(p.gpio_read(0x0001_1600, 5).unwrap(), b"abc\0\0");
    }

    #[test]
    fn shared_handle_tracks_host_changes() {
        let p = Rc::new(FixedPlatform::new());
        let tpm_side: Rc<FixedPlatform> = Rc::clone(&p);
        assert!(!tpm_side.physical_presence());
        p.presence.set(true);
        assert!(tpm_side.physical_presence());
        p.locality.set(9);
        assert_eq!(tpm_side.locality_modifier(), 4);
    }
}
