//! The `TargetBridge` capability: a structured register file plus an
//! ordered collection of non-overlapping memory regions, with
//! byte-granular read/write and placeholder run/step operations.
//!
//! The reference implementation keeps this as an intrusive singly
//! linked list with manual allocation; here it's a `Vec` of owned
//! region records, looked up with a linear scan. Region counts in a
//! post-mortem dump are small (typically well under ten), so the scan
//! is not a bottleneck; an interval tree would only be worth it if
//! that assumption stopped holding, and the `TargetBridge` trait hides
//! the choice from the dispatcher either way.

use crate::libs::error::RspError;

/// Maximum number of bytes a single `m`/`M`/`X` command may move.
/// Requests for more are rejected rather than truncated.
pub const MAX_TRANSFER: usize = 64;

/// The Xtensa register set this stub exposes to RSP. Field order here
/// carries no meaning; the RSP register-index projection is fixed
/// separately in [`register_slot`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RegisterFile {
    pub pc: u32,
    pub ps: u32,
    pub sar: u32,
    pub litbase: u32,
    pub sr176: u32,
    pub a: [u32; 16],
}

/// A contiguous, byte-addressable span of target memory. Regions are
/// non-overlapping; `data.len() == size as usize` is an invariant
/// maintained at construction and never violated by in-place writes.
#[derive(Debug, Clone)]
pub struct MemoryRegion {
    pub base: u32,
    pub size: u32,
    pub data: Vec<u8>,
}

impl MemoryRegion {
    pub fn new(base: u32, data: Vec<u8>) -> Self {
        let size = data.len() as u32;
        MemoryRegion { base, size, data }
    }

    fn contains(&self, addr: u32) -> bool {
        let end = self.base as u64 + self.size as u64;
        (addr as u64) >= self.base as u64 && (addr as u64) < end
    }

    fn contains_range(&self, addr: u32, len: usize) -> bool {
        let end = self.base as u64 + self.size as u64;
        let req_end = addr as u64 + len as u64;
        (addr as u64) >= self.base as u64 && req_end <= end
    }
}

/// The one piece of state a post-mortem session owns: a register file
/// and an ordered, non-overlapping set of memory regions. Populated by
/// ingestion before the dispatcher starts; never shared across
/// concurrent sessions.
#[derive(Debug, Default, Clone)]
pub struct DebugState {
    pub registers: RegisterFile,
    pub regions: Vec<MemoryRegion>,
}

impl DebugState {
    pub fn new(registers: RegisterFile) -> Self {
        DebugState {
            registers,
            regions: Vec::new(),
        }
    }

    pub fn add_region(&mut self, region: MemoryRegion) {
        self.regions.push(region);
    }

    fn region_index_for(&self, addr: u32) -> Option<usize> {
        self.regions.iter().position(|r| r.contains(addr))
    }

    fn region_index_for_range(&self, addr: u32, len: usize) -> Option<usize> {
        self.regions.iter().position(|r| r.contains_range(addr, len))
    }
}

/// The capability the `CommandDispatcher` consumes: byte-granular
/// memory access, the register file, and run/step placeholders. The
/// reference client never observes anything beyond this trait, which
/// is what lets the dispatcher stay agnostic to how target state is
/// actually stored.
pub trait TargetBridge {
    fn read_byte(&self, addr: u32) -> Result<u8, RspError>;
    fn write_byte(&mut self, addr: u32, value: u8) -> Result<(), RspError>;
    fn registers(&self) -> &RegisterFile;
    fn registers_mut(&mut self) -> &mut RegisterFile;

    /// Placeholder: this is a post-mortem bridge, there is no live
    /// target to resume. Dispatching `c` still succeeds (matching the
    /// distilled spec's command table) but does not execute anything.
    fn cont(&mut self) -> Result<(), RspError> {
        Ok(())
    }

    /// Placeholder counterpart to [`TargetBridge::cont`] for `s`.
    fn step(&mut self) -> Result<(), RspError> {
        Ok(())
    }

    /// Reads `len` bytes starting at `addr`. `len` must fit within
    /// [`MAX_TRANSFER`] and within a single region.
    fn read_range(&self, addr: u32, len: usize) -> Result<Vec<u8>, RspError> {
        if len > MAX_TRANSFER {
            return Err(RspError::BadRequest("transfer exceeds maximum length".into()));
        }
        let mut out = Vec::with_capacity(len);
        for offset in 0..len as u32 {
            out.push(self.read_byte(addr.wrapping_add(offset))?);
        }
        Ok(out)
    }

    /// Writes `data` starting at `addr`. `data.len()` must fit within
    /// [`MAX_TRANSFER`] and within a single region.
    fn write_range(&mut self, addr: u32, data: &[u8]) -> Result<(), RspError> {
        if data.len() > MAX_TRANSFER {
            return Err(RspError::BadRequest("transfer exceeds maximum length".into()));
        }
        for (offset, &byte) in data.iter().enumerate() {
            self.write_byte(addr.wrapping_add(offset as u32), byte)?;
        }
        Ok(())
    }
}

impl TargetBridge for DebugState {
    fn read_byte(&self, addr: u32) -> Result<u8, RspError> {
        let idx = self.region_index_for(addr).ok_or(RspError::NoMapping)?;
        let region = &self.regions[idx];
        Ok(region.data[(addr - region.base) as usize])
    }

    fn write_byte(&mut self, addr: u32, value: u8) -> Result<(), RspError> {
        let idx = self.region_index_for(addr).ok_or(RspError::NoMapping)?;
        let region = &mut self.regions[idx];
        region.data[(addr - region.base) as usize] = value;
        Ok(())
    }

    fn registers(&self) -> &RegisterFile {
        &self.registers
    }

    fn registers_mut(&mut self) -> &mut RegisterFile {
        &mut self.registers
    }

    fn read_range(&self, addr: u32, len: usize) -> Result<Vec<u8>, RspError> {
        if len > MAX_TRANSFER {
            return Err(RspError::BadRequest("transfer exceeds maximum length".into()));
        }
        let idx = self
            .region_index_for_range(addr, len)
            .ok_or(RspError::NoMapping)?;
        let region = &self.regions[idx];
        let start = (addr - region.base) as usize;
        Ok(region.data[start..start + len].to_vec())
    }

    fn write_range(&mut self, addr: u32, data: &[u8]) -> Result<(), RspError> {
        if data.len() > MAX_TRANSFER {
            return Err(RspError::BadRequest("transfer exceeds maximum length".into()));
        }
        let idx = self
            .region_index_for_range(addr, data.len())
            .ok_or(RspError::NoMapping)?;
        let region = &mut self.regions[idx];
        let start = (addr - region.base) as usize;
        region.data[start..start + data.len()].copy_from_slice(data);
        Ok(())
    }
}

/// The one named register a slot maps to, for the `p`/`g`/`G` register
/// index projection described in the distilled spec's §4.5.
pub enum RegisterSlot {
    Pc,
    Sar,
    Litbase,
    Sr176,
    Ps,
    A(usize),
}

/// Total number of register slots in the `g`/`G` image (indices
/// `0..113`). Indices not covered by [`register_slot`] are unmapped:
/// `p`/`g` report them as literal `x` repeats, and `G`/`P` writes to
/// them are silently ignored.
pub const REGISTER_COUNT: usize = 113;

/// Maps an RSP register index to the `RegisterFile` field it
/// addresses, or `None` if the index is unmapped.
pub fn register_slot(index: u32) -> Option<RegisterSlot> {
    match index {
        0 => Some(RegisterSlot::Pc),
        36 => Some(RegisterSlot::Sar),
        37 => Some(RegisterSlot::Litbase),
        40 => Some(RegisterSlot::Sr176),
        42 => Some(RegisterSlot::Ps),
        97..=112 => Some(RegisterSlot::A((index - 97) as usize)),
        _ => None,
    }
}

pub fn read_slot(registers: &RegisterFile, slot: &RegisterSlot) -> u32 {
    match slot {
        RegisterSlot::Pc => registers.pc,
        RegisterSlot::Sar => registers.sar,
        RegisterSlot::Litbase => registers.litbase,
        RegisterSlot::Sr176 => registers.sr176,
        RegisterSlot::Ps => registers.ps,
        RegisterSlot::A(i) => registers.a[*i],
    }
}

pub fn write_slot(registers: &mut RegisterFile, slot: &RegisterSlot, value: u32) {
    match slot {
        RegisterSlot::Pc => registers.pc = value,
        RegisterSlot::Sar => registers.sar = value,
        RegisterSlot::Litbase => registers.litbase = value,
        RegisterSlot::Sr176 => registers.sr176 = value,
        RegisterSlot::Ps => registers.ps = value,
        RegisterSlot::A(i) => registers.a[*i] = value,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_state() -> DebugState {
        let mut regs = RegisterFile::default();
        regs.pc = 0x40100ABC;
        let mut state = DebugState::new(regs);
        let mut data = vec![0u8; 0x18000];
        data[0x10] = 0xAB;
        state.add_region(MemoryRegion::new(0x3FFE8000, data));
        state
    }

    #[test]
    fn read_byte_in_region() {
        let state = sample_state();
        assert_eq!(state.read_byte(0x3FFE8010).unwrap(), 0xAB);
    }

    #[test]
    fn read_byte_unmapped_fails() {
        let state = sample_state();
        assert!(matches!(state.read_byte(0x40000000), Err(RspError::NoMapping)));
    }

    #[test]
    fn write_then_read_back() {
        let mut state = sample_state();
        state.write_range(0x3FFE8000, &[0xde, 0xad]).unwrap();
        assert_eq!(state.read_range(0x3FFE8000, 2).unwrap(), vec![0xde, 0xad]);
    }

    #[test]
    fn range_straddling_regions_fails() {
        let mut state = DebugState::new(RegisterFile::default());
        state.add_region(MemoryRegion::new(0x1000, vec![0u8; 4]));
        state.add_region(MemoryRegion::new(0x1004, vec![0u8; 4]));
        assert!(matches!(
            state.read_range(0x1002, 4),
            Err(RspError::NoMapping)
        ));
    }

    #[test]
    fn transfer_over_max_is_rejected() {
        let state = sample_state();
        assert!(state.read_range(0x3FFE8000, MAX_TRANSFER + 1).is_err());
    }

    #[test]
    fn register_slot_mapping_matches_spec_table() {
        assert!(matches!(register_slot(0), Some(RegisterSlot::Pc)));
        assert!(matches!(register_slot(36), Some(RegisterSlot::Sar)));
        assert!(matches!(register_slot(37), Some(RegisterSlot::Litbase)));
        assert!(matches!(register_slot(40), Some(RegisterSlot::Sr176)));
        assert!(matches!(register_slot(42), Some(RegisterSlot::Ps)));
        assert!(matches!(register_slot(97), Some(RegisterSlot::A(0))));
        assert!(matches!(register_slot(112), Some(RegisterSlot::A(15))));
        assert!(register_slot(1).is_none());
        assert!(register_slot(112 + 1).is_none());
    }
}
