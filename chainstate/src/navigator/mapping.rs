//! The storage region behind a navigator.
//!
//! A region holds the fixed header, a number of banks of variable-sized
//! patch slots and the tag tree. Slots are addressed by [`Offset`]
//! (bank in the high 32 bits, slot in the low 32 bits) and freed slots are
//! reused. Every byte handed out, plus a fixed cost per tag, is charged
//! against the configured capacity.
//!
//! ## Storage Layout
//! The whole region is persisted as one bincode image written alternately
//! to `<path>.0` and `<path>.1`, each carrying a sequence number. Reload
//! picks the newest image that decodes, so a torn write only loses the last
//! flush.
//!
//! Slices returned by [`MappedFile::get`] borrow the region; they must be
//! looked up again after any allocating call.

use std::collections::HashSet;
use std::fmt;
use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use super::error::NavigatorError;
use super::tags::TagTree;
use crate::def::{MAPPING_MAGIC, MAPPING_SLOTS, MAPPING_VERSION, TAG_RECORD_SIZE};

/// Host-defined layout of a region, fixed when the region is created.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct MappingDefs {
    /// Number of independent slot banks
    pub banks: u32,
    /// Size of the fixed header in bytes
    pub fixed_hdr_size: usize,
}

impl Default for MappingDefs {
    fn default() -> Self {
        Self {
            banks: 1,
            fixed_hdr_size: 0,
        }
    }
}

/// Handle of a slot in the region.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Offset(pub u64);

impl Offset {
    pub fn new(bank: u32, slot: u32) -> Self {
        Offset(((bank as u64) << 32) | slot as u64)
    }

    pub fn bank(&self) -> u32 {
        (self.0 >> 32) as u32
    }

    pub fn slot(&self) -> u32 {
        self.0 as u32
    }
}

impl fmt::Display for Offset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.bank(), self.slot())
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
struct Bank {
    slots: Vec<Option<Vec<u8>>>,
    free: Vec<u32>,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
struct Image {
    magic: u64,
    version: u32,
    seq: u64,
    defs: MappingDefs,
    fixed_hdr: Vec<u8>,
    banks: Vec<Bank>,
    tags: TagTree,
}

impl Image {
    fn new(defs: MappingDefs) -> Self {
        Self {
            magic: MAPPING_MAGIC,
            version: MAPPING_VERSION,
            seq: 0,
            defs,
            fixed_hdr: vec![0u8; defs.fixed_hdr_size],
            banks: vec![Bank::default(); defs.banks as usize],
            tags: TagTree::new(),
        }
    }

    // bytes charged against the capacity
    fn used_bytes(&self) -> usize {
        let slots: usize = self
            .banks
            .iter()
            .flat_map(|b| b.slots.iter())
            .map(|s| s.as_ref().map_or(0, |v| v.len()))
            .sum();
        slots + self.tags.len().saturating_sub(1) * TAG_RECORD_SIZE
    }
}

fn slot_file_name(path: &str, slot: u64) -> String {
    format!("{}.{}", path, slot)
}

pub struct MappedFile {
    path: String,
    capacity: usize,
    used: usize,
    image: Image,
    // every offset owned by some tag, derived from the tag tree on open
    committed: HashSet<Offset>,
}

impl MappedFile {
    /// Opens the region stored at `path`, or initializes an empty one.
    ///
    /// # Arguments
    /// * `path` - Base path of the image files
    /// * `capacity` - Byte budget of the region
    /// * `defs` - Layout the host expects
    ///
    /// # Errors
    /// `Corrupt` if image files exist but none decodes, or if the stored
    /// magic, version or layout differ from what is expected. IO errors are
    /// passed through.
    pub fn open(path: &str, capacity: usize, defs: MappingDefs) -> Result<Self, NavigatorError> {
        let image = match Self::reload(path)? {
            None => {
                info!("Initializing navigator region {}", path);
                Image::new(defs)
            }
            Some(image) => {
                if image.magic != MAPPING_MAGIC || image.version != MAPPING_VERSION {
                    return Err(NavigatorError::Corrupt(format!(
                        "bad image header in {}: magic {:#x} version {}",
                        path, image.magic, image.version
                    )));
                }
                if image.defs != defs {
                    return Err(NavigatorError::Corrupt(format!(
                        "layout mismatch in {}: stored {:?}, expected {:?}",
                        path, image.defs, defs
                    )));
                }
                info!("Reloaded navigator region {} at seq {}", path, image.seq);
                image
            }
        };
        let used = image.used_bytes();
        if used > capacity {
            warn!(
                "Region {} holds {} bytes, above its capacity {}",
                path, used, capacity
            );
        }
        let committed = image
            .tags
            .iter()
            .flat_map(|(_, node)| node.patches.iter().copied())
            .collect();
        Ok(Self {
            path: path.to_string(),
            capacity,
            used,
            image,
            committed,
        })
    }

    fn reload(path: &str) -> Result<Option<Image>, NavigatorError> {
        let mut best: Option<Image> = None;
        let mut found_any = false;
        for slot in 0..MAPPING_SLOTS {
            let name = slot_file_name(path, slot);
            if !Path::new(&name).exists() {
                continue;
            }
            found_any = true;
            let bz = fs::read(&name)?;
            match bincode::deserialize::<Image>(&bz[..]) {
                Ok(image) => {
                    // pick the latest one
                    if best.as_ref().map_or(true, |b| image.seq > b.seq) {
                        best = Some(image);
                    }
                }
                Err(_) => warn!("Failed to deserialize {}, ignore it", name),
            }
        }
        if found_any && best.is_none() {
            return Err(NavigatorError::Corrupt(format!(
                "no readable image for {}",
                path
            )));
        }
        Ok(best)
    }

    /// Writes the region image to the older of the two slot files.
    ///
    /// The whole image is serialized and synced on every call.
    pub fn flush(&mut self) -> Result<(), NavigatorError> {
        self.image.seq += 1;
        let name = slot_file_name(&self.path, self.image.seq % MAPPING_SLOTS);
        let bz = bincode::serialize(&self.image)?;
        let mut file = File::create(&name)?;
        file.write_all(&bz)?;
        file.sync_all()?;
        debug!(
            "Wrote {} bytes to {} at seq {}",
            bz.len(),
            name,
            self.image.seq
        );
        Ok(())
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn defs(&self) -> MappingDefs {
        self.image.defs
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes currently charged against the capacity.
    pub fn used(&self) -> usize {
        self.used
    }

    /// Sequence number of the last written image.
    pub fn seq(&self) -> u64 {
        self.image.seq
    }

    pub fn fixed_hdr(&self) -> &[u8] {
        &self.image.fixed_hdr
    }

    pub fn tags(&self) -> &TagTree {
        &self.image.tags
    }

    pub(super) fn tags_mut(&mut self) -> &mut TagTree {
        &mut self.image.tags
    }

    /// Number of allocated slots over all banks.
    pub fn live_slots(&self) -> usize {
        self.image
            .banks
            .iter()
            .map(|b| b.slots.len() - b.free.len())
            .sum()
    }

    /// Whether `off` belongs to a tag.
    pub fn is_committed(&self, off: Offset) -> bool {
        self.committed.contains(&off)
    }

    pub(super) fn mark_committed(&mut self, off: Offset) {
        self.committed.insert(off);
    }

    pub(super) fn unmark_committed(&mut self, off: Offset) {
        self.committed.remove(&off);
    }

    fn check_space(&self, requested: usize) -> Result<(), NavigatorError> {
        let available = self.capacity.saturating_sub(self.used);
        if requested > available {
            return Err(NavigatorError::OutOfSpace {
                requested,
                available,
            });
        }
        Ok(())
    }

    /// Charges `bytes` of bookkeeping against the capacity.
    pub(super) fn reserve(&mut self, bytes: usize) -> Result<(), NavigatorError> {
        self.check_space(bytes)?;
        self.used += bytes;
        Ok(())
    }

    pub(super) fn release(&mut self, bytes: usize) {
        self.used -= bytes;
    }

    /// Allocates a zeroed slot of `size` bytes in `bank`.
    ///
    /// # Errors
    /// `InvalidBank` for a bank beyond the layout, `OutOfSpace` if the
    /// capacity would be exceeded. The region is unchanged on error.
    pub fn allocate(&mut self, bank: u32, size: usize) -> Result<Offset, NavigatorError> {
        if bank >= self.image.defs.banks {
            return Err(NavigatorError::InvalidBank(bank));
        }
        self.check_space(size)?;
        let b = &mut self.image.banks[bank as usize];
        let slot = match b.free.pop() {
            Some(slot) => {
                b.slots[slot as usize] = Some(vec![0u8; size]);
                slot
            }
            None => {
                b.slots.push(Some(vec![0u8; size]));
                (b.slots.len() - 1) as u32
            }
        };
        self.used += size;
        Ok(Offset::new(bank, slot))
    }

    /// Returns a slot to its bank.
    pub fn free(&mut self, off: Offset) -> Result<(), NavigatorError> {
        let b = self
            .image
            .banks
            .get_mut(off.bank() as usize)
            .ok_or(NavigatorError::InvalidPatch(off))?;
        let data = b
            .slots
            .get_mut(off.slot() as usize)
            .and_then(Option::take)
            .ok_or(NavigatorError::InvalidPatch(off))?;
        b.free.push(off.slot());
        self.used -= data.len();
        Ok(())
    }

    pub fn get(&self, off: Offset) -> Result<&[u8], NavigatorError> {
        self.image
            .banks
            .get(off.bank() as usize)
            .and_then(|b| b.slots.get(off.slot() as usize))
            .and_then(|s| s.as_deref())
            .ok_or(NavigatorError::InvalidPatch(off))
    }

    pub fn get_mut(&mut self, off: Offset) -> Result<&mut [u8], NavigatorError> {
        self.image
            .banks
            .get_mut(off.bank() as usize)
            .and_then(|b| b.slots.get_mut(off.slot() as usize))
            .and_then(|s| s.as_deref_mut())
            .ok_or(NavigatorError::InvalidPatch(off))
    }

    /// The fixed header together with one patch, for applying it.
    pub(super) fn hdr_and_patch(&mut self, off: Offset) -> Result<(&mut [u8], &[u8]), NavigatorError> {
        let Image {
            fixed_hdr, banks, ..
        } = &mut self.image;
        let patch = banks
            .get(off.bank() as usize)
            .and_then(|b| b.slots.get(off.slot() as usize))
            .and_then(|s| s.as_deref())
            .ok_or(NavigatorError::InvalidPatch(off))?;
        Ok((fixed_hdr.as_mut_slice(), patch))
    }

    /// Structural validation of the whole region.
    ///
    /// # Errors
    /// `Corrupt` describing the first violation found
    pub fn check_valid(&self) -> Result<(), NavigatorError> {
        let corrupt = |msg: String| -> Result<(), NavigatorError> { Err(NavigatorError::Corrupt(msg)) };
        let defs = self.image.defs;
        if self.image.fixed_hdr.len() != defs.fixed_hdr_size {
            return corrupt(format!(
                "header is {} bytes, layout says {}",
                self.image.fixed_hdr.len(),
                defs.fixed_hdr_size
            ));
        }
        if self.image.banks.len() != defs.banks as usize {
            return corrupt(format!(
                "{} banks, layout says {}",
                self.image.banks.len(),
                defs.banks
            ));
        }
        for (i, b) in self.image.banks.iter().enumerate() {
            let mut free = HashSet::new();
            for &slot in &b.free {
                let vacant = matches!(b.slots.get(slot as usize), Some(None));
                if !vacant || !free.insert(slot) {
                    return corrupt(format!("bad free slot {} in bank {}", slot, i));
                }
            }
            let vacant = b.slots.iter().filter(|s| s.is_none()).count();
            if vacant != free.len() {
                return corrupt(format!("bank {} leaks {} slots", i, vacant - free.len()));
            }
        }
        if let Err(msg) = self.image.tags.check() {
            return corrupt(msg);
        }
        let mut committed = HashSet::new();
        for (id, node) in self.image.tags.iter() {
            for &off in &node.patches {
                if self.get(off).is_err() {
                    return corrupt(format!("tag {} refers to dead patch {}", id, off));
                }
                if !committed.insert(off) {
                    return corrupt(format!("patch {} committed twice", off));
                }
            }
        }
        if committed != self.committed {
            return corrupt(format!(
                "{} patches owned by tags, {} recorded as committed",
                committed.len(),
                self.committed.len()
            ));
        }
        let used = self.image.used_bytes();
        if used != self.used {
            return corrupt(format!("accounted {} bytes, holds {}", self.used, used));
        }
        Ok(())
    }
}
