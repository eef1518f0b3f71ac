//! Executable loader
//!
//! Opens the program named by the first word of a command line, maps its
//! loadable segments into a fresh user address space and builds the
//! initial stack with the program's arguments.
//!
//! # Security Considerations
//! - Every header field is checked before it is used
//! - Segments can never map kernel addresses or page zero
//! - The executable stays write-protected while the process runs

pub mod elf;
pub mod stack;

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::fmt;

use log::{debug, trace};

use crate::fs::File;
use crate::kernel::Kernel;
use crate::mm::address::{PAGE_MASK, PHYS_BASE};
use crate::mm::{MappingError, UserSpace, VirtAddr, PAGE_SIZE};

use elf::{ElfHeader, ProgramHeader, SegmentError, SegmentPlan, SegmentType, EHDR_SIZE, PHDR_SIZE};

/// Why an executable could not be loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadError {
    /// The command line has no program name.
    EmptyCommand,
    /// The executable could not be opened.
    Open,
    /// Missing or malformed ELF header.
    BadHeader,
    /// A segment type that needs dynamic linking.
    UnsupportedSegment(SegmentType),
    /// A loadable segment failed validation.
    BadSegment(SegmentError),
    /// Short read from the executable.
    Read,
    /// A page could not be allocated or installed.
    Mapping(MappingError),
    /// The arguments do not fit on the stack page.
    StackOverflow,
}

impl fmt::Display for LoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyCommand => write!(f, "empty command line"),
            Self::Open => write!(f, "open failed"),
            Self::BadHeader => write!(f, "bad ELF header"),
            Self::UnsupportedSegment(kind) => write!(f, "unsupported segment {:?}", kind),
            Self::BadSegment(err) => write!(f, "bad segment: {}", err),
            Self::Read => write!(f, "short read"),
            Self::Mapping(err) => write!(f, "mapping failed: {}", err),
            Self::StackOverflow => write!(f, "arguments overflow the stack page"),
        }
    }
}

impl From<MappingError> for LoadError {
    fn from(err: MappingError) -> Self {
        Self::Mapping(err)
    }
}

impl From<SegmentError> for LoadError {
    fn from(err: SegmentError) -> Self {
        Self::BadSegment(err)
    }
}

/// A successfully loaded program, ready to enter user mode.
pub struct LoadedImage {
    pub entry: VirtAddr,
    pub esp: VirtAddr,
    pub space: UserSpace,
    /// The open, write-protected executable.
    pub executable: Box<dyn File>,
}

impl fmt::Debug for LoadedImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadedImage")
            .field("entry", &self.entry)
            .field("esp", &self.esp)
            .field("space", &self.space)
            .finish()
    }
}

/// Load the program named by `cmdline` into a new address space.
///
/// On failure nothing built so far survives: the executable is closed
/// and every mapped frame goes back to the pool.
pub fn load(kernel: &Kernel, cmdline: &str) -> Result<LoadedImage, LoadError> {
    let args: Vec<&str> = cmdline.split_ascii_whitespace().collect();
    let path = *args.first().ok_or(LoadError::EmptyCommand)?;
    let gate = kernel.fs();

    let mut file = match gate.with_fs(|fs| fs.open(path)) {
        Some(file) => file,
        None => {
            kernel.print(format_args!("load: {}: open failed\n", path));
            return Err(LoadError::Open);
        }
    };

    let mut space = UserSpace::new();
    match load_image(kernel, file.as_mut(), &mut space, &args) {
        Ok((entry, esp)) => {
            gate.locked(|| file.deny_write());
            debug!(
                "loaded {}: entry {}, esp {}, {} pages",
                path,
                entry,
                esp,
                space.mapped_pages()
            );
            Ok(LoadedImage {
                entry,
                esp,
                space,
                executable: file,
            })
        }
        Err(err) => {
            if err == LoadError::BadHeader {
                kernel.print(format_args!("load: {}: error loading executable\n", path));
            }
            debug!("load {} failed: {}", path, err);
            gate.close(file);
            Err(err)
        }
    }
}

fn load_image(
    kernel: &Kernel,
    file: &mut dyn File,
    space: &mut UserSpace,
    args: &[&str],
) -> Result<(VirtAddr, VirtAddr), LoadError> {
    let gate = kernel.fs();

    let mut raw = [0u8; EHDR_SIZE];
    if gate.locked(|| file.read(&mut raw)) != EHDR_SIZE {
        return Err(LoadError::BadHeader);
    }
    let ehdr = ElfHeader::parse(&raw);
    ehdr.validate(kernel.config().max_program_headers)?;

    let file_len = gate.locked(|| file.length());
    let mut file_ofs = ehdr.phoff;
    for _ in 0..ehdr.phnum {
        if file_ofs > file_len {
            return Err(LoadError::Read);
        }
        let mut raw = [0u8; PHDR_SIZE];
        let n = gate.locked(|| {
            file.seek(file_ofs);
            file.read(&mut raw)
        });
        if n != PHDR_SIZE {
            return Err(LoadError::Read);
        }
        file_ofs = file_ofs
            .checked_add(PHDR_SIZE as u32)
            .ok_or(LoadError::Read)?;

        let phdr = ProgramHeader::parse(&raw);
        match phdr.kind() {
            SegmentType::Load => {
                phdr.validate(file_len)?;
                load_segment(kernel, file, space, &phdr.plan())?;
            }
            kind if kind.is_unsupported() => return Err(LoadError::UnsupportedSegment(kind)),
            kind => trace!("skipping {:?} segment", kind),
        }
    }

    let esp = setup_stack(kernel, space, args)?;
    Ok((VirtAddr::new(ehdr.entry), esp))
}

/// Copy one segment into freshly allocated pages.
fn load_segment(
    kernel: &Kernel,
    file: &mut dyn File,
    space: &mut UserSpace,
    plan: &SegmentPlan,
) -> Result<(), LoadError> {
    assert!(
        (plan.read_bytes + plan.zero_bytes) & PAGE_MASK == 0,
        "segment size not page aligned"
    );
    assert!(plan.upage.is_aligned(), "segment address not page aligned");
    assert!(plan.file_page & PAGE_MASK == 0, "segment offset not page aligned");

    trace!(
        "segment at {}: {} bytes from file, {} zeroed",
        plan.upage,
        plan.read_bytes,
        plan.zero_bytes
    );

    let gate = kernel.fs();
    gate.locked(|| file.seek(plan.file_page));

    let mut remaining = plan.read_bytes as usize;
    for page in 0..plan.pages() {
        // Validated segments end below PHYS_BASE, so this cannot overflow.
        let upage = VirtAddr::new(plan.upage.as_u32() + page * PAGE_SIZE as u32);
        let page_read = remaining.min(PAGE_SIZE);

        let mut frame = kernel
            .frames()
            .alloc()
            .ok_or(LoadError::Mapping(MappingError::OutOfMemory))?;
        let buf = &mut frame.bytes_mut()[..page_read];
        if gate.locked(|| file.read(buf)) != page_read {
            return Err(LoadError::Read);
        }
        // The rest of the frame is already zero.
        space.install(upage, frame, plan.writable)?;
        remaining -= page_read;
    }
    Ok(())
}

/// Map the stack page and write the argument block onto it.
fn setup_stack(
    kernel: &Kernel,
    space: &mut UserSpace,
    args: &[&str],
) -> Result<VirtAddr, LoadError> {
    let frame = kernel
        .frames()
        .alloc()
        .ok_or(LoadError::Mapping(MappingError::OutOfMemory))?;
    space.install(VirtAddr::new(PHYS_BASE - PAGE_SIZE as u32), frame, true)?;

    let block = stack::layout(args, PHYS_BASE).map_err(|overflow| {
        debug!("argument block needs {} bytes", overflow.needed);
        LoadError::StackOverflow
    })?;
    let esp = VirtAddr::new(block.esp);
    space.write(esp, &block.bytes)?;
    Ok(esp)
}
