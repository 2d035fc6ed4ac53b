//! Execution tracers.
//!
//! Four producers feed fixed-size stores while the guest runs; nothing is
//! formatted until a dump is requested (end of run, abort, or assertion
//! failure). Dumps render the newest entry with a `-->` marker.
//!
//! - instruction trace: raw `{pc, snpc, inst}` words, re-disassembled at
//!   dump time;
//! - exception trace: trap entries and returns with decoded cause names;
//! - function trace: calls and returns resolved against the ELF symbol
//!   table, with a bounded shadow stack for depth bookkeeping.
//!
//! (The memory and device access rings live with the bus that produces
//! them; their dumps are driven from here.)

use format_elf::SymbolTable;
use rv32_cpu::{disassemble, exception_name};
use sim_core::RingBuf;

use crate::bus::SystemBus;

/// Instructions kept for post-mortem display.
pub const IRINGBUF_SIZE: usize = 16;
/// Exception entries kept.
pub const ETRACE_BUF_SIZE: usize = 16;
/// Shadow call stack depth limit.
pub const FTRACE_STACK_MAX: usize = 64;
/// Function-trace entries kept before the log silently truncates.
pub const FTRACE_LOG_SIZE: usize = 4096;

/// Raw itrace entry; formatting happens at dump time.
#[derive(Debug, Clone, Copy)]
pub struct InstRecord {
    pub pc: u32,
    pub snpc: u32,
    pub inst: u32,
}

/// Format one instruction the way the dumps and single-step echo show it:
/// address, raw bytes most-significant first, then the disassembly.
#[must_use]
pub fn format_inst(rec: &InstRecord) -> String {
    let bytes = rec.inst.to_le_bytes();
    let mut line = format!("{:#010x}:", rec.pc);
    for b in bytes.iter().rev() {
        line.push_str(&format!(" {b:02x}"));
    }
    line.push(' ');
    match disassemble(rec.pc, &bytes) {
        Some(text) => line.push_str(&text),
        None => line.push_str("???"),
    }
    line
}

/// The instruction ring buffer.
pub struct InstTrace {
    ring: RingBuf<InstRecord>,
}

impl InstTrace {
    #[must_use]
    pub fn new() -> Self {
        Self {
            ring: RingBuf::new(IRINGBUF_SIZE),
        }
    }

    pub fn push(&mut self, rec: InstRecord) {
        self.ring.push(rec);
    }

    pub fn dump(&self) {
        if self.ring.is_empty() {
            return;
        }
        log::info!("Last {IRINGBUF_SIZE} instructions:");
        let count = self.ring.len();
        for (idx, rec) in self.ring.iter().enumerate() {
            let marker = if idx == count - 1 { "-->" } else { "   " };
            log::info!("{marker} {}", format_inst(rec));
        }
    }
}

impl Default for InstTrace {
    fn default() -> Self {
        Self::new()
    }
}

/// Kind of an exception-trace entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExcKind {
    /// Exception entered ('E').
    Enter,
    /// Returned from a handler ('R').
    Return,
}

#[derive(Debug, Clone, Copy)]
pub struct ExcRecord {
    pub kind: ExcKind,
    pub cause: u32,
    pub epc: u32,
    pub handler: u32,
}

/// The exception/interrupt ring buffer.
pub struct ExcTrace {
    ring: RingBuf<ExcRecord>,
}

impl ExcTrace {
    #[must_use]
    pub fn new() -> Self {
        Self {
            ring: RingBuf::new(ETRACE_BUF_SIZE),
        }
    }

    pub fn push_enter(&mut self, cause: u32, epc: u32, handler: u32) {
        self.ring.push(ExcRecord {
            kind: ExcKind::Enter,
            cause,
            epc,
            handler,
        });
    }

    pub fn push_return(&mut self, cause: u32, epc: u32) {
        self.ring.push(ExcRecord {
            kind: ExcKind::Return,
            cause,
            epc,
            handler: 0,
        });
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.ring.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ExcRecord> {
        self.ring.iter()
    }

    pub fn dump(&self) {
        if self.ring.is_empty() {
            return;
        }
        log::info!("Last {ETRACE_BUF_SIZE} exceptions/interrupts:");
        let count = self.ring.len();
        for (idx, rec) in self.ring.iter().enumerate() {
            let marker = if idx == count - 1 { "-->" } else { "   " };
            match rec.kind {
                ExcKind::Return => {
                    log::info!(
                        "{marker} R epc={:#010x} (return from exception/interrupt)",
                        rec.epc
                    );
                }
                ExcKind::Enter => {
                    log::info!(
                        "{marker} E cause={} ({}) epc={:#010x} handler={:#010x}",
                        rec.cause,
                        exception_name(rec.cause),
                        rec.epc,
                        rec.handler
                    );
                }
            }
        }
    }
}

impl Default for ExcTrace {
    fn default() -> Self {
        Self::new()
    }
}

/// A shadow-stack frame: the callee's name (if resolved) and the call target.
struct CallFrame {
    name: Option<String>,
    #[allow(dead_code)]
    target: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FtraceKind {
    Call,
    Ret,
}

struct FtraceEntry {
    kind: FtraceKind,
    pc: u32,
    target: u32,
    depth: usize,
    name: String,
}

/// Function-call tracer.
///
/// Without a symbol table every lookup resolves to `"???"` but the call
/// depth bookkeeping still works. The log is append-only up to
/// [`FTRACE_LOG_SIZE`] entries, then silently truncates (it is a history,
/// not a ring).
pub struct Ftrace {
    symbols: Option<SymbolTable>,
    stack: Vec<CallFrame>,
    log: Vec<FtraceEntry>,
}

impl Ftrace {
    #[must_use]
    pub fn new(symbols: Option<SymbolTable>) -> Self {
        Self {
            symbols,
            stack: Vec::new(),
            log: Vec::new(),
        }
    }

    fn resolve(&self, addr: u32) -> Option<String> {
        self.symbols
            .as_ref()
            .and_then(|t| t.find(addr))
            .map(|f| f.name.clone())
    }

    fn log_entry(&mut self, entry: FtraceEntry) {
        if self.log.len() < FTRACE_LOG_SIZE {
            self.log.push(entry);
        }
    }

    /// Record a call: log it, and push a shadow frame unless the stack is
    /// already at its depth limit.
    pub fn call(&mut self, pc: u32, target: u32) {
        let name = self.resolve(target);
        self.log_entry(FtraceEntry {
            kind: FtraceKind::Call,
            pc,
            target,
            depth: self.stack.len(),
            name: name.clone().unwrap_or_else(|| "???".to_string()),
        });
        if self.stack.len() < FTRACE_STACK_MAX {
            self.stack.push(CallFrame { name, target });
        }
    }

    /// Record a return: pop the shadow frame (if any) and log the name of
    /// the function being returned from.
    pub fn ret(&mut self, pc: u32) {
        let frame = self.stack.pop();
        let name = frame
            .and_then(|f| f.name)
            .unwrap_or_else(|| "???".to_string());
        self.log_entry(FtraceEntry {
            kind: FtraceKind::Ret,
            pc,
            target: 0,
            depth: self.stack.len(),
            name,
        });
    }

    /// Current shadow stack depth.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    /// Number of logged entries.
    #[must_use]
    pub fn log_len(&self) -> usize {
        self.log.len()
    }

    /// Logged entries as `(kind, name, depth)` triples, oldest first.
    /// `kind` is `'C'` for calls and `'R'` for returns.
    pub fn entries(&self) -> impl Iterator<Item = (char, &str, usize)> {
        self.log.iter().map(|e| {
            let kind = match e.kind {
                FtraceKind::Call => 'C',
                FtraceKind::Ret => 'R',
            };
            (kind, e.name.as_str(), e.depth)
        })
    }

    pub fn dump(&self) {
        if self.log.is_empty() {
            return;
        }
        log::info!("Function trace ({} entries):", self.log.len());
        for entry in &self.log {
            let pad = (entry.depth * 2).min(2 * FTRACE_STACK_MAX);
            let indent = " ".repeat(pad);
            match entry.kind {
                FtraceKind::Call => {
                    log::info!(
                        "{:#010x}: {indent}call [{}@{:#010x}]",
                        entry.pc,
                        entry.name,
                        entry.target
                    );
                }
                FtraceKind::Ret => {
                    log::info!("{:#010x}: {indent}ret  [{}]", entry.pc, entry.name);
                }
            }
        }
    }
}

/// Dump the memory and device access rings owned by the bus.
pub fn dump_bus_traces(bus: &SystemBus) {
    if !bus.mtrace.is_empty() {
        log::info!("Last {} memory accesses:", bus.mtrace.capacity());
        let count = bus.mtrace.len();
        for (idx, acc) in bus.mtrace.iter().enumerate() {
            let marker = if idx == count - 1 { "-->" } else { "   " };
            let rw = if acc.is_write { "W" } else { "R" };
            log::info!(
                "{marker} {rw} addr={:#010x} len={} value={:#010x}",
                acc.addr,
                acc.len,
                acc.value
            );
        }
    }
    if !bus.dtrace.is_empty() {
        log::info!("Last {} device accesses:", bus.dtrace.capacity());
        let count = bus.dtrace.len();
        for (idx, acc) in bus.dtrace.iter().enumerate() {
            let marker = if idx == count - 1 { "-->" } else { "   " };
            let rw = if acc.is_write { "W" } else { "R" };
            log::info!(
                "{marker} {rw} device={} offset={:#x} len={}",
                acc.name,
                acc.offset,
                acc.len
            );
        }
    }
}
