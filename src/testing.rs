//! Host test doubles
//!
//! Thread scheduler on std threads, in-memory filesystem, buffered console,
//! recording MMU and a scripted user-mode CPU, plus builders for ELF
//! images and a wired-up kernel.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, Weak};
use std::time::{Duration, Instant};

use crate::config::KernelConfig;
use crate::console::Console;
use crate::fs::{File, FileSystem};
use crate::kernel::{Kernel, Platform};
use crate::mm::{Mmu, UserSpace, VirtAddr, PAGE_SIZE, PHYS_BASE};
use crate::process::{Pid, Process};
use crate::sched::{Scheduler, Semaphore, SpawnError, ThreadBody};
use crate::trap::{Trap, TrapFrame, UserMode};

/// Start of the scratch area scripted calls place their data in.
pub const SCRATCH: u32 = PHYS_BASE - PAGE_SIZE as u32 + 0x100;
/// Stack pointer for scripted calls.
pub const CALL_ESP: u32 = PHYS_BASE - PAGE_SIZE as u32 + 0x800;
/// Entry point of `program_image`.
pub const ENTRY: u32 = 0x0804_8000;

const TIMEOUT: Duration = Duration::from_secs(10);

/// Poll `cond` until it holds or the timeout passes.
pub fn wait_until(cond: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + TIMEOUT;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    cond()
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

struct CondvarSemaphore {
    count: Mutex<u32>,
    cond: Condvar,
}

impl Semaphore for CondvarSemaphore {
    fn up(&self) {
        *self.count.lock().unwrap() += 1;
        self.cond.notify_one();
    }

    fn down(&self) {
        let mut count = self.count.lock().unwrap();
        while *count == 0 {
            count = self.cond.wait(count).unwrap();
        }
        *count -= 1;
    }
}

/// Kernel threads as std threads.
#[derive(Default)]
pub struct ThreadScheduler {
    pub fail_spawn: AtomicBool,
    halted: AtomicBool,
    spawned: AtomicUsize,
}

impl ThreadScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn halted(&self) -> bool {
        self.halted.load(Ordering::SeqCst)
    }

    pub fn spawned(&self) -> usize {
        self.spawned.load(Ordering::SeqCst)
    }
}

impl Scheduler for ThreadScheduler {
    fn spawn(&self, name: &str, body: ThreadBody) -> Result<(), SpawnError> {
        if self.fail_spawn.load(Ordering::SeqCst) {
            return Err(SpawnError::OutOfMemory);
        }
        self.spawned.fetch_add(1, Ordering::SeqCst);
        std::thread::Builder::new()
            .name(name.into())
            .spawn(body)
            .map(|_| ())
            .map_err(|_| SpawnError::Unavailable)
    }

    fn semaphore(&self) -> Box<dyn Semaphore> {
        Box::new(CondvarSemaphore {
            count: Mutex::new(0),
            cond: Condvar::new(),
        })
    }

    fn power_off(&self) -> ! {
        self.halted.store(true, Ordering::SeqCst);
        loop {
            std::thread::park();
        }
    }
}

// ---------------------------------------------------------------------------
// Filesystem
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Inode {
    data: Vec<u8>,
    deny_write: usize,
}

/// Flat in-memory filesystem. Files never grow past their created size.
#[derive(Default)]
pub struct MemFs {
    files: Mutex<HashMap<String, Arc<Mutex<Inode>>>>,
    open: Arc<AtomicUsize>,
}

impl MemFs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace `path` with `bytes`.
    pub fn install(&self, path: &str, bytes: Vec<u8>) {
        let inode = Inode {
            data: bytes,
            deny_write: 0,
        };
        self.files
            .lock()
            .unwrap()
            .insert(path.into(), Arc::new(Mutex::new(inode)));
    }

    pub fn contents(&self, path: &str) -> Option<Vec<u8>> {
        let files = self.files.lock().unwrap();
        files.get(path).map(|inode| inode.lock().unwrap().data.clone())
    }

    pub fn write_denied(&self, path: &str) -> bool {
        let files = self.files.lock().unwrap();
        files
            .get(path)
            .is_some_and(|inode| inode.lock().unwrap().deny_write > 0)
    }

    /// Handles not yet closed.
    pub fn open_handles(&self) -> usize {
        self.open.load(Ordering::SeqCst)
    }
}

struct MemFile {
    inode: Arc<Mutex<Inode>>,
    pos: u32,
    denied: bool,
    open: Arc<AtomicUsize>,
}

impl File for MemFile {
    fn read(&mut self, buf: &mut [u8]) -> usize {
        let inode = self.inode.lock().unwrap();
        let start = (self.pos as usize).min(inode.data.len());
        let n = buf.len().min(inode.data.len() - start);
        buf[..n].copy_from_slice(&inode.data[start..start + n]);
        self.pos += n as u32;
        n
    }

    fn write(&mut self, buf: &[u8]) -> usize {
        let mut inode = self.inode.lock().unwrap();
        if inode.deny_write > 0 {
            return 0;
        }
        let start = (self.pos as usize).min(inode.data.len());
        let n = buf.len().min(inode.data.len() - start);
        inode.data[start..start + n].copy_from_slice(&buf[..n]);
        self.pos += n as u32;
        n
    }

    fn seek(&mut self, pos: u32) {
        self.pos = pos;
    }

    fn tell(&self) -> u32 {
        self.pos
    }

    fn length(&self) -> u32 {
        self.inode.lock().unwrap().data.len() as u32
    }

    fn deny_write(&mut self) {
        if !self.denied {
            self.denied = true;
            self.inode.lock().unwrap().deny_write += 1;
        }
    }
}

impl Drop for MemFile {
    fn drop(&mut self) {
        if self.denied {
            self.inode.lock().unwrap().deny_write -= 1;
        }
        self.open.fetch_sub(1, Ordering::SeqCst);
    }
}

impl FileSystem for MemFs {
    fn open(&self, path: &str) -> Option<Box<dyn File>> {
        let inode = Arc::clone(self.files.lock().unwrap().get(path)?);
        self.open.fetch_add(1, Ordering::SeqCst);
        Some(Box::new(MemFile {
            inode,
            pos: 0,
            denied: false,
            open: Arc::clone(&self.open),
        }))
    }

    fn create(&self, path: &str, initial_size: u32) -> bool {
        let mut files = self.files.lock().unwrap();
        if files.contains_key(path) {
            return false;
        }
        let inode = Inode {
            data: vec![0; initial_size as usize],
            deny_write: 0,
        };
        files.insert(path.into(), Arc::new(Mutex::new(inode)));
        true
    }

    fn remove(&self, path: &str) -> bool {
        self.files.lock().unwrap().remove(path).is_some()
    }
}

// ---------------------------------------------------------------------------
// Console
// ---------------------------------------------------------------------------

/// Captures output; input is queued by the test.
#[derive(Default)]
pub struct BufferConsole {
    out: Mutex<Vec<u8>>,
    writes: AtomicUsize,
    input: Mutex<VecDeque<u8>>,
    ready: Condvar,
}

impl BufferConsole {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn output(&self) -> String {
        String::from_utf8_lossy(&self.out.lock().unwrap()).into_owned()
    }

    /// Number of `put_bytes` calls.
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn push_input(&self, bytes: &[u8]) {
        self.input.lock().unwrap().extend(bytes);
        self.ready.notify_all();
    }

    /// Block until `needle` appears in the output.
    pub fn wait_for(&self, needle: &str) -> bool {
        wait_until(|| self.output().contains(needle))
    }
}

impl Console for BufferConsole {
    fn put_bytes(&self, bytes: &[u8]) {
        self.writes.fetch_add(1, Ordering::SeqCst);
        // Byte at a time, so unserialized writers would interleave.
        for &byte in bytes {
            self.out.lock().unwrap().push(byte);
            std::thread::yield_now();
        }
    }

    fn get_byte(&self) -> u8 {
        let mut input = self.input.lock().unwrap();
        loop {
            if let Some(byte) = input.pop_front() {
                return byte;
            }
            input = self.ready.wait(input).unwrap();
        }
    }
}

// ---------------------------------------------------------------------------
// MMU
// ---------------------------------------------------------------------------

/// Records each activation as the mapped page count, or `None`.
#[derive(Default)]
pub struct RecordingMmu {
    log: Mutex<Vec<Option<usize>>>,
}

impl RecordingMmu {
    pub fn activations(&self) -> Vec<Option<usize>> {
        self.log.lock().unwrap().clone()
    }

    pub fn deactivations(&self) -> usize {
        self.log.lock().unwrap().iter().filter(|a| a.is_none()).count()
    }
}

impl Mmu for RecordingMmu {
    fn activate(&self, space: Option<&UserSpace>) {
        self.log
            .lock()
            .unwrap()
            .push(space.map(UserSpace::mapped_pages));
    }
}

// ---------------------------------------------------------------------------
// Scripted user mode
// ---------------------------------------------------------------------------

/// A system call argument.
#[derive(Debug, Clone)]
pub enum Arg {
    Word(u32),
    Int(i32),
    /// NUL-terminated string placed in the scratch area.
    Str(String),
    /// Bytes placed in the scratch area.
    Bytes(Vec<u8>),
    /// Output buffer of this many bytes; its contents are captured after
    /// the call.
    Out(u32),
}

/// One step of a scripted program.
#[derive(Debug, Clone)]
pub enum Op {
    Call(u32, Vec<Arg>),
    /// Trap with `esp` pointing anywhere.
    CallAt(u32),
    /// Hardware exception.
    Fault,
}

pub fn call(number: u32, args: Vec<Arg>) -> Op {
    Op::Call(number, args)
}

pub fn exit(status: i32) -> Op {
    call(crate::syscall::numbers::SYS_EXIT, vec![Arg::Int(status)])
}

/// What a scripted process observed.
#[derive(Debug, Clone, Default)]
pub struct Trace {
    /// Arguments found on the initial stack.
    pub argv: Vec<String>,
    /// Return value of each call that returned.
    pub returns: Vec<i32>,
    /// Captured `Arg::Out` buffers.
    pub outputs: Vec<Vec<u8>>,
}

struct Running {
    ops: VecDeque<Op>,
    returned: bool,
    pending_out: Option<(u32, u32)>,
}

/// Runs per-program scripts of system calls instead of machine code.
#[derive(Default)]
pub struct ScriptedUser {
    programs: Mutex<HashMap<String, Vec<Op>>>,
    running: Mutex<HashMap<Pid, Running>>,
    traces: Mutex<HashMap<Pid, Trace>>,
}

impl ScriptedUser {
    pub fn program(&self, name: &str, ops: Vec<Op>) {
        self.programs.lock().unwrap().insert(name.into(), ops);
    }

    pub fn trace(&self, pid: Pid) -> Trace {
        self.traces
            .lock()
            .unwrap()
            .get(&pid)
            .cloned()
            .unwrap_or_default()
    }

    fn read_word(space: &UserSpace, addr: u32) -> u32 {
        let mut word = [0u8; 4];
        let _ = space.read(VirtAddr::new(addr), &mut word);
        u32::from_le_bytes(word)
    }

    fn read_c_str(space: &UserSpace, addr: u32) -> String {
        let mut bytes = Vec::new();
        let mut byte = [0u8; 1];
        let mut cursor = addr;
        while space.read(VirtAddr::new(cursor), &mut byte).is_ok() && byte[0] != 0 {
            bytes.push(byte[0]);
            cursor += 1;
        }
        String::from_utf8_lossy(&bytes).into_owned()
    }

    fn argv(space: &UserSpace, esp: u32) -> Vec<String> {
        let argc = Self::read_word(space, esp + 4);
        let argv = Self::read_word(space, esp + 8);
        (0..argc)
            .map(|i| Self::read_c_str(space, Self::read_word(space, argv + 4 * i)))
            .collect()
    }

    /// Lay out a call frame on the stack page.
    fn stage(space: &mut UserSpace, number: u32, args: &[Arg]) -> Option<(u32, u32)> {
        let mut words = vec![number];
        let mut cursor = SCRATCH;
        let mut out = None;
        for arg in args {
            match arg {
                Arg::Word(w) => words.push(*w),
                Arg::Int(i) => words.push(*i as u32),
                Arg::Str(s) => {
                    let mut bytes = s.clone().into_bytes();
                    bytes.push(0);
                    let _ = space.write(VirtAddr::new(cursor), &bytes);
                    words.push(cursor);
                    cursor += (bytes.len() as u32 + 3) & !3;
                }
                Arg::Bytes(bytes) => {
                    let _ = space.write(VirtAddr::new(cursor), bytes);
                    words.push(cursor);
                    cursor += (bytes.len() as u32 + 3) & !3;
                }
                Arg::Out(len) => {
                    let _ = space.write(VirtAddr::new(cursor), &vec![0; *len as usize]);
                    words.push(cursor);
                    out = Some((cursor, *len));
                    cursor += (*len + 3) & !3;
                }
            }
        }
        let bytes: Vec<u8> = words.iter().flat_map(|w| w.to_le_bytes()).collect();
        let _ = space.write(VirtAddr::new(CALL_ESP), &bytes);
        out
    }
}

impl UserMode for ScriptedUser {
    fn resume(&self, process: &Process, frame: &mut TrapFrame) -> Trap {
        let pid = process.pid();
        let mut guard = process.space();
        let Some(space) = guard.as_mut() else {
            return Trap::Fault {
                addr: VirtAddr::NULL,
            };
        };

        let mut running = self.running.lock().unwrap();
        let state = running.entry(pid).or_insert_with(|| {
            let ops = self
                .programs
                .lock()
                .unwrap()
                .get(process.name())
                .cloned()
                .unwrap_or_default();
            let argv = Self::argv(space, frame.esp.as_u32());
            self.traces.lock().unwrap().entry(pid).or_default().argv = argv;
            Running {
                ops: ops.into(),
                returned: false,
                pending_out: None,
            }
        });

        if state.returned {
            let mut traces = self.traces.lock().unwrap();
            let trace = traces.entry(pid).or_default();
            trace.returns.push(frame.return_value());
            if let Some((addr, len)) = state.pending_out.take() {
                let mut buf = vec![0u8; len as usize];
                let _ = space.read(VirtAddr::new(addr), &mut buf);
                trace.outputs.push(buf);
            }
        }

        match state.ops.pop_front() {
            Some(Op::Call(number, args)) => {
                state.pending_out = Self::stage(space, number, &args);
                state.returned = true;
                frame.esp = VirtAddr::new(CALL_ESP);
                Trap::Syscall
            }
            Some(Op::CallAt(esp)) => {
                state.returned = true;
                frame.esp = VirtAddr::new(esp);
                Trap::Syscall
            }
            Some(Op::Fault) | None => Trap::Fault {
                addr: VirtAddr::NULL,
            },
        }
    }
}

// ---------------------------------------------------------------------------
// ELF images
// ---------------------------------------------------------------------------

struct Segment {
    p_type: u32,
    vaddr: u32,
    data: Vec<u8>,
    memsz: u32,
    flags: u32,
}

/// Builds ELF32 i386 executables.
pub struct ElfBuilder {
    entry: u32,
    segments: Vec<Segment>,
}

impl ElfBuilder {
    pub fn new(entry: u32) -> Self {
        Self {
            entry,
            segments: Vec::new(),
        }
    }

    /// A PT_LOAD segment; its file offset matches `vaddr`'s page offset.
    pub fn segment(mut self, vaddr: u32, data: &[u8], memsz: u32, writable: bool) -> Self {
        self.segments.push(Segment {
            p_type: 1,
            vaddr,
            data: data.to_vec(),
            memsz,
            flags: if writable { 4 | 2 } else { 4 | 1 },
        });
        self
    }

    /// An empty program header of any type.
    pub fn raw_segment(mut self, p_type: u32) -> Self {
        self.segments.push(Segment {
            p_type,
            vaddr: 0,
            data: Vec::new(),
            memsz: 0,
            flags: 0,
        });
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let phnum = self.segments.len();
        let mut image = vec![0u8; 52 + 32 * phnum];

        image[..7].copy_from_slice(&[0x7F, b'E', b'L', b'F', 1, 1, 1]);
        put16(&mut image, 16, 2);
        put16(&mut image, 18, 3);
        put32(&mut image, 20, 1);
        put32(&mut image, 24, self.entry);
        put32(&mut image, 28, 52);
        put16(&mut image, 40, 52);
        put16(&mut image, 42, 32);
        put16(&mut image, 44, phnum as u16);

        for (i, seg) in self.segments.iter().enumerate() {
            let mut offset = 0;
            if seg.p_type == 1 {
                let base = (image.len() as u32 + 0xFFF) & !0xFFF;
                offset = base + (seg.vaddr & 0xFFF);
                image.resize(offset as usize, 0);
                image.extend_from_slice(&seg.data);
            }
            let at = 52 + 32 * i;
            put32(&mut image, at, seg.p_type);
            put32(&mut image, at + 4, offset);
            put32(&mut image, at + 8, seg.vaddr);
            put32(&mut image, at + 12, seg.vaddr);
            put32(&mut image, at + 16, seg.data.len() as u32);
            put32(&mut image, at + 20, seg.memsz);
            put32(&mut image, at + 24, seg.flags);
            put32(&mut image, at + 28, PAGE_SIZE as u32);
        }
        image
    }
}

fn put16(image: &mut [u8], at: usize, value: u16) {
    image[at..at + 2].copy_from_slice(&value.to_le_bytes());
}

fn put32(image: &mut [u8], at: usize, value: u32) {
    image[at..at + 4].copy_from_slice(&value.to_le_bytes());
}

/// A minimal executable: one read-only code page at `ENTRY`.
pub fn program_image() -> Vec<u8> {
    ElfBuilder::new(ENTRY)
        .segment(ENTRY, &[0x90; 16], 16, false)
        .build()
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

/// A kernel wired to the doubles above.
pub struct Harness {
    pub kernel: Arc<Kernel>,
    pub sched: Arc<ThreadScheduler>,
    pub fs: Arc<MemFs>,
    pub console: Arc<BufferConsole>,
    pub mmu: Arc<RecordingMmu>,
    pub user: Arc<ScriptedUser>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(KernelConfig::default())
    }

    pub fn with_pages(user_pages: usize) -> Self {
        Self::with_config(KernelConfig {
            user_pages,
            ..KernelConfig::default()
        })
    }

    pub fn with_config(config: KernelConfig) -> Self {
        let sched = Arc::new(ThreadScheduler::new());
        let fs = Arc::new(MemFs::new());
        let console = Arc::new(BufferConsole::new());
        let mmu = Arc::new(RecordingMmu::default());
        let user = Arc::new(ScriptedUser::default());
        let kernel = Kernel::new(
            Platform {
                scheduler: sched.clone(),
                mmu: mmu.clone(),
                user: user.clone(),
                console: console.clone(),
                fs: fs.clone(),
            },
            config,
        );
        Self {
            kernel,
            sched,
            fs,
            console,
            mmu,
            user,
        }
    }

    /// The boot process, pid 1 on a fresh harness.
    pub fn boot(&self) -> Arc<Process> {
        self.kernel.boot_process("main")
    }

    /// Install an executable named `name` that runs `ops`.
    pub fn program(&self, name: &str, ops: Vec<Op>) {
        self.fs.install(name, program_image());
        self.user.program(name, ops);
    }

    /// A process record with only a writable stack page, never run.
    pub fn bare_process(&self, name: &str) -> Arc<Process> {
        let process = Process::spawned(
            self.kernel.allocate_pid(),
            name.into(),
            Weak::new(),
            self.kernel.scheduler(),
        );
        let mut space = UserSpace::new();
        let frame = self.kernel.frames().alloc().unwrap();
        space
            .install(VirtAddr::new(PHYS_BASE - PAGE_SIZE as u32), frame, true)
            .unwrap();
        *process.space() = Some(space);
        Arc::new(process)
    }

    pub fn trace(&self, pid: Pid) -> Trace {
        self.user.trace(pid)
    }
}
