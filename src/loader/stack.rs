//! Initial user stack layout.
//!
//! `layout` is pure: it computes the bytes of the argument block and where
//! they land below `top`, without touching any address space.
//!
//! From `top` downward:
//!
//! ```text
//! argv[0] .. argv[argc-1]   NUL-terminated strings, argv[0] highest
//! padding                   zeros to a 4-byte boundary
//! argv[argc]                null pointer
//! argv[argc-1] .. argv[0]   string pointers, so argv reads forward
//! argv                      pointer to argv[0]
//! argc
//! return address            zero                       <- esp
//! ```

use alloc::vec;
use alloc::vec::Vec;

use crate::mm::PAGE_SIZE;

const WORD: usize = core::mem::size_of::<u32>();

/// Words below the pointer array: fake return address, argc, argv.
const FRAME_WORDS: usize = 3;

/// The argument block does not fit in one stack page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackOverflow {
    /// Bytes the block would need.
    pub needed: usize,
}

/// A computed argument block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackLayout {
    /// Initial stack pointer; also the address of `bytes[0]`.
    pub esp: u32,
    /// Block contents, `bytes[i]` lives at `esp + i`.
    pub bytes: Vec<u8>,
    pub argc: u32,
    /// Address of `argv[0]`.
    pub argv: u32,
    /// Address of each argument string, in argument order.
    pub strings: Vec<u32>,
}

impl StackLayout {
    /// Bytes used below `top`.
    pub fn size(&self) -> usize {
        self.bytes.len()
    }

    fn put_word(&mut self, offset: usize, value: u32) {
        self.bytes[offset..offset + WORD].copy_from_slice(&value.to_le_bytes());
    }
}

/// Lay out `args` immediately below `top`.
///
/// Fails if the block would exceed one page.
pub fn layout(args: &[&str], top: u32) -> Result<StackLayout, StackOverflow> {
    let strings_len: usize = args.iter().map(|arg| arg.len() + 1).sum();
    let padding = (WORD - strings_len % WORD) % WORD;
    let pointers = (args.len() + 1) * WORD;
    let size = strings_len + padding + pointers + FRAME_WORDS * WORD;

    if size > PAGE_SIZE {
        return Err(StackOverflow { needed: size });
    }

    // size <= PAGE_SIZE, so these casts cannot truncate.
    let esp = top - size as u32;
    let argv = esp + (FRAME_WORDS * WORD) as u32;

    let mut block = StackLayout {
        esp,
        bytes: vec![0u8; size],
        argc: args.len() as u32,
        argv,
        strings: Vec::with_capacity(args.len()),
    };

    // Strings, packed downward from the top in argument order.
    let mut cursor = size;
    for arg in args {
        cursor -= arg.len() + 1;
        block.bytes[cursor..cursor + arg.len()].copy_from_slice(arg.as_bytes());
        block.strings.push(esp + cursor as u32);
    }

    // Pointer array; the padding and argv[argc] are already zero.
    for i in 0..args.len() {
        let addr = block.strings[i];
        block.put_word((FRAME_WORDS + i) * WORD, addr);
    }

    block.put_word(2 * WORD, argv);
    block.put_word(WORD, block.argc);
    block.put_word(0, 0);

    Ok(block)
}
