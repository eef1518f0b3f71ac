//! ELF32 executable header and program header parsing.
//!
//! Only the fields the loader checks are decoded. Parsing never fails;
//! `validate` decides whether the image is acceptable.
//!
//! ## What we support
//!
//! - ELF32, little-endian, i386, ET_EXEC
//! - PT_LOAD segments; PT_NULL, PT_NOTE, PT_PHDR, PT_STACK and unknown
//!   types are skipped
//!
//! ## What we refuse
//!
//! - PT_DYNAMIC, PT_INTERP and PT_SHLIB (no dynamic linking)

use core::fmt;

use bitflags::bitflags;

use crate::mm::address::{round_up, PAGE_MASK, PAGE_SIZE};
use crate::mm::VirtAddr;

use super::LoadError;

/// Size of the ELF32 file header.
pub const EHDR_SIZE: usize = 52;
/// Size of one ELF32 program header.
pub const PHDR_SIZE: usize = 32;

/// Magic, 32-bit class, little-endian data, version 1.
const ELF_IDENT: [u8; 7] = [0x7F, b'E', b'L', b'F', 1, 1, 1];
const ET_EXEC: u16 = 2;
const EM_386: u16 = 3;
const EV_CURRENT: u32 = 1;

// Values for p_type.
const PT_NULL: u32 = 0;
const PT_LOAD: u32 = 1;
const PT_DYNAMIC: u32 = 2;
const PT_INTERP: u32 = 3;
const PT_NOTE: u32 = 4;
const PT_SHLIB: u32 = 5;
const PT_PHDR: u32 = 6;
const PT_STACK: u32 = 0x6474_E551;

#[inline]
fn u16_at(bytes: &[u8], off: usize) -> u16 {
    u16::from_le_bytes([bytes[off], bytes[off + 1]])
}

#[inline]
fn u32_at(bytes: &[u8], off: usize) -> u32 {
    u32::from_le_bytes([bytes[off], bytes[off + 1], bytes[off + 2], bytes[off + 3]])
}

/// The fields of the ELF32 file header the loader cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ElfHeader {
    pub ident: [u8; 16],
    pub e_type: u16,
    pub machine: u16,
    pub version: u32,
    pub entry: u32,
    pub phoff: u32,
    pub phentsize: u16,
    pub phnum: u16,
}

impl ElfHeader {
    pub fn parse(raw: &[u8; EHDR_SIZE]) -> Self {
        let mut ident = [0u8; 16];
        ident.copy_from_slice(&raw[..16]);
        Self {
            ident,
            e_type: u16_at(raw, 16),
            machine: u16_at(raw, 18),
            version: u32_at(raw, 20),
            entry: u32_at(raw, 24),
            phoff: u32_at(raw, 28),
            phentsize: u16_at(raw, 42),
            phnum: u16_at(raw, 44),
        }
    }

    /// Check every field against the one format we execute.
    pub fn validate(&self, max_phnum: u16) -> Result<(), LoadError> {
        if self.ident[..ELF_IDENT.len()] != ELF_IDENT
            || self.e_type != ET_EXEC
            || self.machine != EM_386
            || self.version != EV_CURRENT
            || usize::from(self.phentsize) != PHDR_SIZE
            || self.phnum > max_phnum
        {
            return Err(LoadError::BadHeader);
        }
        Ok(())
    }
}

/// Program header type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentType {
    Null,
    Load,
    Dynamic,
    Interp,
    Note,
    Shlib,
    Phdr,
    Stack,
    Other(u32),
}

impl From<u32> for SegmentType {
    fn from(p_type: u32) -> Self {
        match p_type {
            PT_NULL => Self::Null,
            PT_LOAD => Self::Load,
            PT_DYNAMIC => Self::Dynamic,
            PT_INTERP => Self::Interp,
            PT_NOTE => Self::Note,
            PT_SHLIB => Self::Shlib,
            PT_PHDR => Self::Phdr,
            PT_STACK => Self::Stack,
            other => Self::Other(other),
        }
    }
}

impl SegmentType {
    /// Types that need a dynamic linker.
    pub const fn is_unsupported(self) -> bool {
        matches!(self, Self::Dynamic | Self::Interp | Self::Shlib)
    }
}

bitflags! {
    /// Segment permission flags (p_flags).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SegmentFlags: u32 {
        const X = 1;
        const W = 2;
        const R = 4;
    }
}

/// Why a loadable segment was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentError {
    /// File offset and virtual address differ in page offset.
    Misaligned,
    /// File offset past the end of the file.
    OffsetPastEnd,
    /// Memory size smaller than file size.
    Truncated,
    /// Zero memory size.
    Empty,
    /// Start or end outside user space.
    NotUser,
    /// Range wraps around the address space.
    Wraps,
    /// Range touches page zero.
    PageZero,
}

impl fmt::Display for SegmentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Misaligned => write!(f, "file and memory page offsets differ"),
            Self::OffsetPastEnd => write!(f, "offset beyond end of file"),
            Self::Truncated => write!(f, "memory size smaller than file size"),
            Self::Empty => write!(f, "empty segment"),
            Self::NotUser => write!(f, "segment outside user space"),
            Self::Wraps => write!(f, "segment wraps around"),
            Self::PageZero => write!(f, "segment maps page zero"),
        }
    }
}

/// One ELF32 program header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgramHeader {
    pub p_type: u32,
    pub offset: u32,
    pub vaddr: u32,
    pub filesz: u32,
    pub memsz: u32,
    pub flags: SegmentFlags,
}

/// Page-granular copy plan for one loadable segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentPlan {
    /// Page-aligned file offset to start reading at.
    pub file_page: u32,
    /// Page-aligned user address of the first page.
    pub upage: VirtAddr,
    /// Bytes read from the file.
    pub read_bytes: u32,
    /// Bytes zero-filled after them.
    pub zero_bytes: u32,
    pub writable: bool,
}

impl SegmentPlan {
    /// Number of pages the segment covers.
    pub const fn pages(&self) -> u32 {
        (self.read_bytes + self.zero_bytes) / PAGE_SIZE as u32
    }
}

impl ProgramHeader {
    pub fn parse(raw: &[u8; PHDR_SIZE]) -> Self {
        Self {
            p_type: u32_at(raw, 0),
            offset: u32_at(raw, 4),
            vaddr: u32_at(raw, 8),
            filesz: u32_at(raw, 16),
            memsz: u32_at(raw, 20),
            flags: SegmentFlags::from_bits_truncate(u32_at(raw, 24)),
        }
    }

    pub fn kind(&self) -> SegmentType {
        SegmentType::from(self.p_type)
    }

    /// Check that this describes a loadable segment of a file of
    /// `file_len` bytes.
    pub fn validate(&self, file_len: u32) -> Result<(), SegmentError> {
        if self.offset & PAGE_MASK != self.vaddr & PAGE_MASK {
            return Err(SegmentError::Misaligned);
        }
        if self.offset > file_len {
            return Err(SegmentError::OffsetPastEnd);
        }
        if self.memsz < self.filesz {
            return Err(SegmentError::Truncated);
        }
        if self.memsz == 0 {
            return Err(SegmentError::Empty);
        }

        let start = VirtAddr::new(self.vaddr);
        let end = VirtAddr::new(self.vaddr.wrapping_add(self.memsz));
        if !start.is_user() || !end.is_user() {
            return Err(SegmentError::NotUser);
        }
        if end < start {
            return Err(SegmentError::Wraps);
        }
        // Mapping page 0 would let a null user pointer reach real memory.
        if self.vaddr < PAGE_SIZE as u32 {
            return Err(SegmentError::PageZero);
        }
        Ok(())
    }

    /// Page plan for a validated segment.
    pub fn plan(&self) -> SegmentPlan {
        let page_offset = self.vaddr & PAGE_MASK;
        let (read_bytes, zero_bytes) = if self.filesz > 0 {
            // Normal segment: read the initial part, zero the rest.
            let read = page_offset + self.filesz;
            (read, round_up(page_offset + self.memsz) - read)
        } else {
            // Entirely zero: nothing comes from the file.
            (0, round_up(page_offset + self.memsz))
        };

        SegmentPlan {
            file_page: self.offset & !PAGE_MASK,
            upage: VirtAddr::new(self.vaddr & !PAGE_MASK),
            read_bytes,
            zero_bytes,
            writable: self.flags.contains(SegmentFlags::W),
        }
    }
}
