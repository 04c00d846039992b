//! Register storage
//!
//! [`RegisterStore`] maps each [`DeviceAddress`] to a [`RegisterFile`],
//! creating a zero-filled file the first time an unseen device is touched.
//! A store either lives in this process's memory ([`RegisterStore::new`]) or
//! in a mapped file shared with every process that opens the same path
//! ([`RegisterStore::open`]).
//!
//! Each register file sits behind its own lock, so writers to different
//! devices never contend, while a block read and a block write on the same
//! device are fully serialized (no torn reads).

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use mockpi_protocol::DeviceAddress;
use tracing::debug;

use crate::error::{BusError, Result};
use crate::mapped::MappedRegisters;

/// Default number of registers per device
pub const DEFAULT_REGISTERS: usize = 64;

/// One device's register bytes
///
/// Single-register access is bounds-checked. Block writes past the end grow
/// the file; block reads past the end are zero-padded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterFile {
    bytes: Vec<u8>,
}

impl RegisterFile {
    /// Create a zero-filled register file
    pub fn new(len: usize) -> Self {
        Self {
            bytes: vec![0; len],
        }
    }

    pub(crate) fn from_bytes(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    /// Number of registers
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether the file has no registers
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Raw register bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Read one register
    pub fn get(&self, register: usize) -> Option<u8> {
        self.bytes.get(register).copied()
    }

    /// Write one register, returning `false` if it is out of range
    pub fn set(&mut self, register: usize, value: u8) -> bool {
        match self.bytes.get_mut(register) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }

    /// Read exactly `length` registers starting at `start`, zero-padding
    /// whatever lies past the end of the file
    pub fn read_block(&self, start: usize, length: usize) -> Vec<u8> {
        let mut out = vec![0; length];
        if start < self.bytes.len() {
            let end = self.bytes.len().min(start + length);
            out[..end - start].copy_from_slice(&self.bytes[start..end]);
        }
        out
    }

    /// Write `data` starting at `start`, growing the file if needed
    ///
    /// Registers outside `start..start + data.len()` are never modified.
    pub fn write_block(&mut self, start: usize, data: &[u8]) {
        let end = start + data.len();
        if end > self.bytes.len() {
            self.bytes.resize(end, 0);
        }
        self.bytes[start..end].copy_from_slice(data);
    }
}

/// Map of device address to register file
///
/// Clone the surrounding `Arc` to hand the same store to every local bus in
/// this process; open the same path to share it with other processes.
#[derive(Debug)]
pub struct RegisterStore {
    registers: usize,
    backing: Backing,
}

#[derive(Debug)]
enum Backing {
    Memory(RwLock<HashMap<DeviceAddress, Arc<Mutex<RegisterFile>>>>),
    Mapped(MappedRegisters),
}

impl RegisterStore {
    /// Create an empty in-memory store whose register files have
    /// `registers` entries
    pub fn new(registers: usize) -> Self {
        Self {
            registers,
            backing: Backing::Memory(RwLock::new(HashMap::new())),
        }
    }

    /// Create an empty in-memory store wrapped for sharing
    pub fn shared(registers: usize) -> Arc<Self> {
        Arc::new(Self::new(registers))
    }

    /// Open the process-shared store at `path`, creating it if needed
    pub fn open(path: &Path, registers: usize) -> Result<Arc<Self>> {
        let mapped = MappedRegisters::open(path, registers)?;
        Ok(Arc::new(Self {
            registers: mapped.registers(),
            backing: Backing::Mapped(mapped),
        }))
    }

    /// Register file length for newly created devices
    pub fn registers(&self) -> usize {
        self.registers
    }

    /// Backing file, for a process-shared store
    pub fn path(&self) -> Option<&Path> {
        match &self.backing {
            Backing::Memory(_) => None,
            Backing::Mapped(mapped) => Some(mapped.path()),
        }
    }

    /// Read one register
    pub fn get(&self, address: DeviceAddress, register: usize) -> Result<u8> {
        let (value, len) = self.with_file(address, |file| (file.get(register), file.len()))?;
        value.ok_or(BusError::OutOfRange {
            address,
            register,
            len,
        })
    }

    /// Write one register
    pub fn set(&self, address: DeviceAddress, register: usize, value: u8) -> Result<()> {
        let (written, len) = self.with_file(address, |file| (file.set(register, value), file.len()))?;
        if written {
            Ok(())
        } else {
            Err(BusError::OutOfRange {
                address,
                register,
                len,
            })
        }
    }

    /// Read exactly `length` registers, zero-padded past the end of the file
    pub fn get_block(&self, address: DeviceAddress, start: usize, length: usize) -> Result<Vec<u8>> {
        self.with_file(address, |file| file.read_block(start, length))
    }

    /// Write `data` starting at `start`, growing the file if needed
    pub fn set_block(&self, address: DeviceAddress, start: usize, data: &[u8]) -> Result<()> {
        self.with_file(address, |file| file.write_block(start, data))
    }

    /// Copy of a device's register file, if the device has been touched
    pub fn snapshot(&self, address: DeviceAddress) -> Result<Option<RegisterFile>> {
        match &self.backing {
            Backing::Memory(devices) => {
                let devices = devices.read().unwrap_or_else(PoisonError::into_inner);
                Ok(devices.get(&address).map(|file| lock(file).clone()))
            }
            Backing::Mapped(mapped) => mapped.load(address),
        }
    }

    /// Every device touched so far, in ascending address order
    pub fn devices(&self) -> Result<Vec<DeviceAddress>> {
        match &self.backing {
            Backing::Memory(devices) => {
                let devices = devices.read().unwrap_or_else(PoisonError::into_inner);
                let mut addresses: Vec<_> = devices.keys().copied().collect();
                addresses.sort();
                Ok(addresses)
            }
            Backing::Mapped(mapped) => mapped.devices(),
        }
    }

    /// Run `f` on the register file for `address` under its lock
    fn with_file<T>(&self, address: DeviceAddress, f: impl FnOnce(&mut RegisterFile) -> T) -> Result<T> {
        match &self.backing {
            Backing::Memory(devices) => {
                let file = self.memory_file(devices, address);
                let mut file = lock(&file);
                Ok(f(&mut file))
            }
            Backing::Mapped(mapped) => mapped.update(address, f),
        }
    }

    /// Get the in-memory register file for `address`, creating it on first touch
    fn memory_file(
        &self,
        devices: &RwLock<HashMap<DeviceAddress, Arc<Mutex<RegisterFile>>>>,
        address: DeviceAddress,
    ) -> Arc<Mutex<RegisterFile>> {
        {
            let devices = devices.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(file) = devices.get(&address) {
                return Arc::clone(file);
            }
        }

        let mut devices = devices.write().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(devices.entry(address).or_insert_with(|| {
            debug!("Creating register file for device {}", address);
            Arc::new(Mutex::new(RegisterFile::new(self.registers)))
        }))
    }
}

impl Default for RegisterStore {
    fn default() -> Self {
        Self::new(DEFAULT_REGISTERS)
    }
}

// Every mutation is a single slice copy, so a poisoned file is never torn.
fn lock(file: &Mutex<RegisterFile>) -> MutexGuard<'_, RegisterFile> {
    file.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;

    const DEV: DeviceAddress = DeviceAddress(0x3a);

    #[test]
    fn test_unseen_device_reads_zero() {
        let store = RegisterStore::default();
        assert!(store.snapshot(DEV).unwrap().is_none());
        assert_eq!(store.get(DEV, 0).unwrap(), 0);
        assert_eq!(store.snapshot(DEV).unwrap().unwrap().len(), DEFAULT_REGISTERS);
    }

    #[test]
    fn test_get_out_of_range() {
        let store = RegisterStore::new(8);
        assert!(matches!(
            store.get(DEV, 8),
            Err(BusError::OutOfRange {
                register: 8,
                len: 8,
                ..
            })
        ));
        assert!(store.set(DEV, 8, 1).is_err());
        assert!(store.set(DEV, 7, 1).is_ok());
    }

    #[test]
    fn test_set_then_get() {
        let store = RegisterStore::default();
        store.set(DEV, 5, 0xf).unwrap();
        assert_eq!(store.get(DEV, 5).unwrap(), 0xf);
        assert_eq!(store.get(DEV, 4).unwrap(), 0);
    }

    #[test]
    fn test_block_padding() {
        let store = RegisterStore::default();
        assert_eq!(store.get_block(DEV, 0, 5).unwrap(), vec![0; 5]);

        store.set_block(DEV, 0, &[1, 2, 3]).unwrap();
        assert_eq!(store.get_block(DEV, 0, 5).unwrap(), vec![1, 2, 3, 0, 0]);
    }

    #[test]
    fn test_short_file_read_is_padded() {
        let store = RegisterStore::new(4);
        store.set_block(DEV, 2, &[7, 8]).unwrap();
        assert_eq!(store.get_block(DEV, 2, 6).unwrap(), vec![7, 8, 0, 0, 0, 0]);
        assert_eq!(store.get_block(DEV, 10, 3).unwrap(), vec![0, 0, 0]);
    }

    #[test]
    fn test_set_block_keeps_surrounding_registers() {
        let store = RegisterStore::new(8);
        store.set_block(DEV, 0, &[9; 8]).unwrap();
        store.set_block(DEV, 3, &[1, 2]).unwrap();
        assert_eq!(
            store.snapshot(DEV).unwrap().unwrap().as_bytes(),
            &[9, 9, 9, 1, 2, 9, 9, 9]
        );
    }

    #[test]
    fn test_set_block_extends() {
        let store = RegisterStore::new(4);
        store.set_block(DEV, 3, &[1, 2, 3]).unwrap();
        let file = store.snapshot(DEV).unwrap().unwrap();
        assert_eq!(file.as_bytes(), &[0, 0, 0, 1, 2, 3]);
        assert_eq!(store.get(DEV, 5).unwrap(), 3);
    }

    #[test]
    fn test_devices_listed_in_order() {
        let store = RegisterStore::default();
        store.set(DeviceAddress(9), 0, 1).unwrap();
        store.set(DeviceAddress(2), 0, 1).unwrap();
        assert_eq!(store.devices().unwrap(), vec![DeviceAddress(2), DeviceAddress(9)]);
    }

    // ========================================================================
    // Process-shared store
    // ========================================================================

    #[test]
    fn test_handles_on_same_path_share_registers() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("registers");
        let driver = RegisterStore::open(&path, 8).unwrap();
        let simulator = RegisterStore::open(&path, 8).unwrap();
        assert_eq!(driver.path(), Some(path.as_path()));

        driver.set(DEV, 0, 5).unwrap();
        assert_eq!(simulator.get(DEV, 0).unwrap(), 5);

        simulator.set_block(DEV, 2, &[1, 2, 3]).unwrap();
        assert_eq!(driver.get_block(DEV, 0, 6).unwrap(), vec![5, 0, 1, 2, 3, 0]);
        assert!(matches!(
            driver.get(DEV, 8),
            Err(BusError::OutOfRange { len: 8, .. })
        ));
        assert_eq!(driver.devices().unwrap(), vec![DEV]);
    }

    #[test]
    fn test_shared_set_block_extends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("registers");
        let a = RegisterStore::open(&path, 4).unwrap();
        let b = RegisterStore::open(&path, 4).unwrap();

        a.set_block(DEV, 3, &[1, 2, 3]).unwrap();
        assert_eq!(b.snapshot(DEV).unwrap().unwrap().as_bytes(), &[0, 0, 0, 1, 2, 3]);
        assert_eq!(b.get(DEV, 5).unwrap(), 3);
    }

    #[test]
    fn test_shared_handles_never_tear() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("registers");

        let writers: Vec<_> = (1..=3u8)
            .map(|v| {
                let store = RegisterStore::open(&path, 16).unwrap();
                thread::spawn(move || {
                    for _ in 0..200 {
                        store.set_block(DEV, 0, &[v; 16]).unwrap();
                    }
                })
            })
            .collect();

        let reader = RegisterStore::open(&path, 16).unwrap();
        for _ in 0..500 {
            let block = reader.get_block(DEV, 0, 16).unwrap();
            assert!(block.iter().all(|&b| b == block[0]), "torn read: {block:?}");
        }

        for w in writers {
            w.join().unwrap();
        }
    }
}
