//! Process-shared register storage
//!
//! Every process that opens the same path maps the same file, so a write
//! made through one handle is visible to the next read through any other.
//! The file is a header followed by one fixed slot per device address:
//!
//! ```text
//! header   "MOCKPI01", u32 LE registers per new device, zero padding to 64 bytes
//! slot[a]  u8 in-use flag, u8 unused, u16 LE length, SLOT_CAPACITY data bytes
//! ```
//!
//! Each slot is guarded by its own lock file in a sibling `<name>.locks`
//! directory. The lock is an `flock`, which also excludes other handles on
//! the same path within one process.

use std::collections::HashMap;
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use fd_lock::RwLock as FileLock;
use memmap2::MmapRaw;
use mockpi_protocol::DeviceAddress;
use tracing::{debug, info, warn};

use crate::error::{BusError, Result};
use crate::store::RegisterFile;

/// Largest register file one device slot can hold
pub const SLOT_CAPACITY: usize = 512;

const MAGIC: &[u8; 8] = b"MOCKPI01";
const HEADER_LEN: usize = 64;
const SLOT_HEADER_LEN: usize = 4;
const SLOT_LEN: usize = SLOT_HEADER_LEN + SLOT_CAPACITY;
const FILE_LEN: usize = HEADER_LEN + 256 * SLOT_LEN;

type DeviceLock = Arc<Mutex<FileLock<File>>>;

/// Register files kept in a memory-mapped file
pub struct MappedRegisters {
    path: PathBuf,
    lock_dir: PathBuf,
    registers: usize,
    map: MmapRaw,
    locks: Mutex<HashMap<DeviceAddress, DeviceLock>>,
}

impl MappedRegisters {
    /// Map the store at `path`, creating it if it does not exist
    ///
    /// `registers` only applies when the file is created; an existing store
    /// keeps the length it was created with.
    pub fn open(path: &Path, registers: usize) -> Result<Self> {
        if registers > SLOT_CAPACITY {
            return Err(BusError::Storage(format!(
                "{registers} registers per device exceeds the slot capacity of {SLOT_CAPACITY}"
            )));
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let lock_dir = lock_dir(path);
        fs::create_dir_all(&lock_dir)?;

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        // Held while sizing the file and writing the header, so processes
        // racing to create the store agree on its contents.
        let mut setup = FileLock::new(file);
        let file = setup.write()?;

        match file.metadata()?.len() {
            0 => file.set_len(FILE_LEN as u64)?,
            len if len == FILE_LEN as u64 => {}
            len => {
                return Err(BusError::Storage(format!(
                    "{} is {len} bytes, expected {FILE_LEN}",
                    path.display()
                )))
            }
        }

        let map = MmapRaw::map_raw(&*file)?;
        if map.len() < FILE_LEN {
            return Err(BusError::Storage(format!(
                "{} mapped short ({} bytes)",
                path.display(),
                map.len()
            )));
        }

        // SAFETY: the mapping covers at least FILE_LEN bytes and the setup
        // lock keeps every other handle away from the header.
        let header = unsafe { std::slice::from_raw_parts_mut(map.as_mut_ptr(), HEADER_LEN) };
        let registers = if header[..MAGIC.len()] == MAGIC[..] {
            let stored = u32::from_le_bytes([header[8], header[9], header[10], header[11]]) as usize;
            if stored > SLOT_CAPACITY {
                return Err(BusError::Storage(format!(
                    "{} claims {stored} registers per device",
                    path.display()
                )));
            }
            if stored != registers {
                warn!(
                    "{} keeps {} registers per device; ignoring {}",
                    path.display(),
                    stored,
                    registers
                );
            }
            stored
        } else if header.iter().all(|&b| b == 0) {
            header[..MAGIC.len()].copy_from_slice(MAGIC);
            header[8..12].copy_from_slice(&(registers as u32).to_le_bytes());
            info!("Created register store at {}", path.display());
            registers
        } else {
            return Err(BusError::Storage(format!(
                "{} is not a register store",
                path.display()
            )));
        };
        drop(file);

        debug!("Mapped register store {}", path.display());
        Ok(Self {
            path: path.to_path_buf(),
            lock_dir,
            registers,
            map,
            locks: Mutex::new(HashMap::new()),
        })
    }

    /// Path of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Register file length for newly created devices
    pub fn registers(&self) -> usize {
        self.registers
    }

    /// Copy of a device's register file, if any handle has touched it
    pub fn load(&self, address: DeviceAddress) -> Result<Option<RegisterFile>> {
        self.with_slot(address, |slot| in_use(slot).then(|| read_file(slot)))
    }

    /// Run `f` on a device's register file and store the result
    ///
    /// The file is created zero-filled on first touch. If `f` grows it past
    /// [`SLOT_CAPACITY`] nothing is stored.
    pub fn update<T>(&self, address: DeviceAddress, f: impl FnOnce(&mut RegisterFile) -> T) -> Result<T> {
        let registers = self.registers;
        self.with_slot(address, |slot| {
            let mut file = if in_use(slot) {
                read_file(slot)
            } else {
                debug!("Creating register file for device {}", address);
                RegisterFile::new(registers)
            };
            let out = f(&mut file);
            if file.len() > SLOT_CAPACITY {
                return Err(BusError::OutOfRange {
                    address,
                    register: file.len() - 1,
                    len: SLOT_CAPACITY,
                });
            }
            write_file(slot, &file);
            Ok(out)
        })?
    }

    /// Every device touched so far, in ascending address order
    pub fn devices(&self) -> Result<Vec<DeviceAddress>> {
        let mut devices = Vec::new();
        for entry in fs::read_dir(&self.lock_dir)? {
            let name = entry?.file_name();
            let Some(address) = name.to_str().and_then(parse_lock_name) else {
                continue;
            };
            if self.with_slot(address, |slot| in_use(slot))? {
                devices.push(address);
            }
        }
        devices.sort();
        Ok(devices)
    }

    /// Run `f` on a device's raw slot while holding its lock
    fn with_slot<T>(&self, address: DeviceAddress, f: impl FnOnce(&mut [u8]) -> T) -> Result<T> {
        let device = self.device_lock(address)?;
        let mut held = device.lock().unwrap_or_else(PoisonError::into_inner);
        let _guard = held.write()?;

        let offset = HEADER_LEN + usize::from(address.as_u8()) * SLOT_LEN;
        // SAFETY: offset + SLOT_LEN <= FILE_LEN, which open() checked against
        // the mapping. The device lock is held, so no other thread or process
        // is reading or writing this slot.
        let slot = unsafe { std::slice::from_raw_parts_mut(self.map.as_mut_ptr().add(offset), SLOT_LEN) };
        Ok(f(slot))
    }

    fn device_lock(&self, address: DeviceAddress) -> Result<DeviceLock> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(lock) = locks.get(&address) {
            return Ok(Arc::clone(lock));
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(self.lock_dir.join(lock_name(address)))?;
        let lock = Arc::new(Mutex::new(FileLock::new(file)));
        locks.insert(address, Arc::clone(&lock));
        Ok(lock)
    }
}

impl fmt::Debug for MappedRegisters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MappedRegisters")
            .field("path", &self.path)
            .field("registers", &self.registers)
            .finish_non_exhaustive()
    }
}

fn lock_dir(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".locks");
    path.with_file_name(name)
}

fn lock_name(address: DeviceAddress) -> String {
    format!("{:02x}.lock", address.as_u8())
}

fn parse_lock_name(name: &str) -> Option<DeviceAddress> {
    let hex = name.strip_suffix(".lock")?;
    u8::from_str_radix(hex, 16).ok().map(DeviceAddress)
}

fn in_use(slot: &[u8]) -> bool {
    slot[0] != 0
}

fn read_file(slot: &[u8]) -> RegisterFile {
    let len = usize::from(u16::from_le_bytes([slot[2], slot[3]])).min(SLOT_CAPACITY);
    RegisterFile::from_bytes(slot[SLOT_HEADER_LEN..SLOT_HEADER_LEN + len].to_vec())
}

fn write_file(slot: &mut [u8], file: &RegisterFile) {
    let bytes = file.as_bytes();
    slot[0] = 1;
    slot[2..SLOT_HEADER_LEN].copy_from_slice(&(bytes.len() as u16).to_le_bytes());
    slot[SLOT_HEADER_LEN..SLOT_HEADER_LEN + bytes.len()].copy_from_slice(bytes);
}
