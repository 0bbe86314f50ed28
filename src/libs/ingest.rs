//! Builds a [`DebugState`] from the two files a post-mortem session
//! starts from: a text crash log (registers plus a RAM hex dump) and,
//! optionally, an ELF image whose loadable segments become additional
//! memory regions.
//!
//! Parsing the log's key/value register lines uses `regex`, the same
//! crate the teacher reaches for to pull fields out of text (see
//! `common::validate_nfp_bdf`); the ELF side uses `object`, kept from
//! the teacher's dependency table even though none of its call sites
//! survived retrieval.

use std::collections::HashMap;

use object::{Object, ObjectSegment};
use regex::Regex;

use crate::libs::error::RspError;
use crate::libs::target::{DebugState, MemoryRegion, RegisterFile};

/// Base address of the RAM region described by a log's hex dump.
pub const LOG_RAM_BASE: u32 = 0x3FFE_8000;

const REGISTERS_MARKER: &str = "REGISTERS";
const MEMORY_MARKER_PREFIX: &str = "MEMORY";

/// Register log keys this crate understands. `VPRI` and `SR208` are
/// recognized but discarded: the distilled register set has no field
/// for them.
const IGNORED_KEYS: [&str; 2] = ["VPRI", "SR208"];

/// Parses a crash log's text form into a [`RegisterFile`] and an
/// optional RAM [`MemoryRegion`].
///
/// The log is line-oriented: a `REGISTERS` marker line, followed by
/// `KEY value` lines (whitespace-separated, value in hex without a
/// `0x` prefix) until a `MEMORY <base>` marker line, followed by
/// hex-digit lines (whitespace is ignored) making up the RAM dump.
/// Either section may be absent; an absent `MEMORY` section yields no
/// RAM region.
pub fn parse_log(text: &str) -> Result<(RegisterFile, Option<MemoryRegion>), RspError> {
    let kv_line = Regex::new(r"^([A-Za-z0-9]+)\s+([0-9a-fA-F]+)$").unwrap();
    let memory_marker = Regex::new(r"^MEMORY\s+([0-9a-fA-F]+)$").unwrap();

    let mut fields: HashMap<String, u32> = HashMap::new();
    let mut in_registers = false;
    let mut mem_base: Option<u32> = None;
    let mut mem_hex = String::new();

    for raw_line in text.lines() {
        let line = raw_line.trim();
        if line.is_empty() {
            continue;
        }

        if line == REGISTERS_MARKER {
            in_registers = true;
            continue;
        }

        if let Some(caps) = memory_marker.captures(line) {
            in_registers = false;
            let base = u32::from_str_radix(&caps[1], 16)
                .map_err(|_| RspError::BadRequest("bad MEMORY marker address".into()))?;
            mem_base = Some(base);
            continue;
        }

        if line.starts_with(MEMORY_MARKER_PREFIX) {
            return Err(RspError::BadRequest("malformed MEMORY marker".into()));
        }

        if in_registers {
            let caps = kv_line
                .captures(line)
                .ok_or_else(|| RspError::BadRequest(format!("malformed register line {:?}", line)))?;
            let key = caps[1].to_ascii_uppercase();
            if IGNORED_KEYS.contains(&key.as_str()) {
                continue;
            }
            let value = u32::from_str_radix(&caps[2], 16)
                .map_err(|_| RspError::BadRequest(format!("bad hex value for {}", key)))?;
            fields.insert(key, value);
        } else if mem_base.is_some() {
            mem_hex.push_str(line);
        }
    }

    let registers = registers_from_fields(&fields)?;

    let region = match mem_base {
        Some(base) => {
            let data = crate::libs::hex::decode_hex_vec(mem_hex.as_bytes())?;
            Some(MemoryRegion::new(base, data))
        }
        None => None,
    };

    Ok((registers, region))
}

fn registers_from_fields(fields: &HashMap<String, u32>) -> Result<RegisterFile, RspError> {
    let mut regs = RegisterFile::default();
    for (key, value) in fields {
        match key.as_str() {
            "PC" => regs.pc = *value,
            "PS" => regs.ps = *value,
            "SAR" => regs.sar = *value,
            "LITBASE" => regs.litbase = *value,
            "SR176" => regs.sr176 = *value,
            other if other.len() >= 2 && other.as_bytes()[0] == b'A' => {
                let index: usize = other[1..]
                    .parse()
                    .map_err(|_| RspError::BadRequest(format!("unrecognized register key {:?}", key)))?;
                if index >= regs.a.len() {
                    return Err(RspError::BadRequest(format!("register index out of range: {:?}", key)));
                }
                regs.a[index] = *value;
            }
            other => return Err(RspError::BadRequest(format!("unrecognized register key {:?}", other))),
        }
    }
    Ok(regs)
}

/// Reads an ELF image's loadable segments (nonzero virtual address)
/// into one [`MemoryRegion`] per segment, in the order the segments
/// appear in the program header table.
pub fn load_elf_regions(elf_bytes: &[u8]) -> Result<Vec<MemoryRegion>, RspError> {
    let file = object::File::parse(elf_bytes)
        .map_err(|e| RspError::BadRequest(format!("unreadable ELF image: {}", e)))?;

    let mut regions = Vec::new();
    for segment in file.segments() {
        if segment.address() == 0 {
            continue;
        }
        let base = segment.address() as u32;
        let data = segment
            .data()
            .map_err(|e| RspError::BadRequest(format!("unreadable ELF segment: {}", e)))?
            .to_vec();
        regions.push(MemoryRegion::new(base, data));
    }
    Ok(regions)
}

/// Builds a [`DebugState`] from the already-read contents of a log file
/// and, optionally, an ELF image. The RAM region from the log (if any)
/// is added before the ELF's segments, so a `TargetBridge` lookup finds
/// the log's RAM first and falls back to the ELF's regions for
/// addresses the log didn't cover.
pub fn build_debug_state(log_text: &str, elf_bytes: Option<&[u8]>) -> Result<DebugState, RspError> {
    let (registers, ram) = parse_log(log_text)?;
    let mut state = DebugState::new(registers);

    if let Some(region) = ram {
        state.add_region(region);
    }

    if let Some(bytes) = elf_bytes {
        for region in load_elf_regions(bytes)? {
            state.add_region(region);
        }
    }

    Ok(state)
}
