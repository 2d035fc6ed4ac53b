//! The machine: CPU + bus + tracers + watchpoints, and the execution loop.

use std::time::Instant;

use rv32_cpu::{Event, Registers, Rv32Cpu};

use crate::bus::SystemBus;
use crate::config::MachineConfig;
use crate::expr;
use crate::keyboard::Key;
use crate::trace::{self, ExcTrace, Ftrace, InstRecord, InstTrace};
use crate::vga::Frame;
use crate::watchpoint::WatchpointPool;

/// Below this step count, each retired instruction is echoed to the log
/// (useful with `si`).
pub const MAX_INST_TO_PRINT: u64 = 10;

/// Simulation run state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Running,
    /// Paused (step budget exhausted or a watchpoint fired); resumable.
    Stop,
    /// The guest executed `ebreak`; `halt_ret` holds its exit code.
    End,
    /// A host-level failure; not resumable.
    Abort,
    /// The user quit the debugger.
    Quit,
}

/// A complete simulated machine.
///
/// Owns every piece of mutable simulation state; tests instantiate as many
/// machines side by side as they like.
pub struct Machine {
    pub cpu: Rv32Cpu,
    pub bus: SystemBus,
    pub state: RunState,
    pub halt_pc: u32,
    pub halt_ret: u32,
    pub watchpoints: WatchpointPool,
    itrace: InstTrace,
    etrace: ExcTrace,
    ftrace: Ftrace,
    /// Retired instruction count.
    nr_inst: u64,
    /// Accumulated host time spent executing, in microseconds.
    timer_us: u64,
}

impl Machine {
    /// Build a machine and load the guest image at the reset vector.
    pub fn new(config: MachineConfig) -> Result<Self, String> {
        let mut bus = if config.silent_serial {
            SystemBus::silent()
        } else {
            SystemBus::new()
        };
        bus.load_image(&config.img)?;

        Ok(Self {
            cpu: Rv32Cpu::new(),
            bus,
            state: RunState::Stop,
            halt_pc: 0,
            halt_ret: 0,
            watchpoints: WatchpointPool::new(),
            itrace: InstTrace::new(),
            etrace: ExcTrace::new(),
            ftrace: Ftrace::new(config.symbols),
            nr_inst: 0,
            timer_us: 0,
        })
    }

    /// Run up to `n` instructions.
    ///
    /// Handles the full state machine: refuses to run a finished machine,
    /// accumulates timing, prints the end-of-run banner and dumps traces on
    /// END/ABORT, and parks a still-running machine in STOP when the step
    /// budget runs out.
    pub fn cpu_exec(&mut self, n: u64) {
        match self.state {
            RunState::End | RunState::Abort | RunState::Quit => {
                println!(
                    "Program execution has ended. To restart the program, exit and run again."
                );
                return;
            }
            RunState::Running | RunState::Stop => self.state = RunState::Running,
        }

        let start = Instant::now();
        self.execute(n);
        self.timer_us += start.elapsed().as_micros() as u64;

        match self.state {
            RunState::Running => self.state = RunState::Stop,
            RunState::Stop => {}
            RunState::End | RunState::Abort => {
                let banner = if self.state == RunState::Abort {
                    "ABORT"
                } else if self.halt_ret == 0 {
                    "HIT GOOD TRAP"
                } else {
                    "HIT BAD TRAP"
                };
                log::info!("emu-rv32: {banner} at pc = {:#010x}", self.halt_pc);
                self.dump_traces();
                self.statistic();
            }
            RunState::Quit => self.statistic(),
        }
    }

    /// The inner step loop: execute, trace, watch, repeat.
    fn execute(&mut self, n: u64) {
        let print_step = n < MAX_INST_TO_PRINT;
        for _ in 0..n {
            let info = match self.cpu.step(&mut self.bus) {
                Ok(info) => info,
                Err(msg) => {
                    log::error!("{msg}");
                    self.halt_pc = self.cpu.pc();
                    self.state = RunState::Abort;
                    break;
                }
            };

            if let Some(word) = info.inst {
                let rec = InstRecord {
                    pc: info.pc,
                    snpc: info.snpc,
                    inst: word,
                };
                if print_step {
                    log::info!("{}", trace::format_inst(&rec));
                }
                self.itrace.push(rec);
            }

            self.nr_inst += 1;
            self.cpu.csr.mcycle += 1;

            match info.event {
                Event::None => {}
                Event::Call { target } => self.ftrace.call(info.pc, target),
                Event::Return => self.ftrace.ret(info.pc),
                Event::Trap {
                    cause,
                    epc,
                    handler,
                } => self.etrace.push_enter(cause, epc, handler),
                Event::TrapReturn { epc } => {
                    self.etrace.push_return(self.cpu.csr.mcause, epc);
                }
                Event::Halt { code } => {
                    self.halt_pc = info.pc;
                    self.halt_ret = code;
                    self.state = RunState::End;
                }
            }

            self.check_watchpoints();

            if self.state != RunState::Running {
                break;
            }
            self.bus.device_update();
        }
    }

    /// Re-evaluate every live watchpoint against the post-step state.
    ///
    /// All watchpoints are scanned before the state transition so several
    /// can trigger on the same instruction.
    fn check_watchpoints(&mut self) {
        if self.watchpoints.is_empty() {
            return;
        }
        let snapshot: Vec<(usize, String, u32)> = self
            .watchpoints
            .iter()
            .map(|(id, wp)| (id, wp.expr.clone(), wp.last_value))
            .collect();

        let mut triggered = false;
        for (id, expr_text, last) in snapshot {
            match expr::eval(&expr_text, self) {
                Err(msg) => {
                    println!("watchpoint {id} expression evaluation failed: {msg}");
                }
                Ok(value) if value != last => {
                    println!("watchpoint {id} triggered: {expr_text}");
                    println!("old value = {last:#010x}, new value = {value:#010x}");
                    self.watchpoints.set_value(id, value);
                    triggered = true;
                }
                Ok(_) => {}
            }
        }
        if triggered && self.state == RunState::Running {
            self.state = RunState::Stop;
        }
    }

    /// Set a watchpoint on an expression. Evaluates it once to establish
    /// the baseline.
    pub fn add_watchpoint(&mut self, expr_text: &str) -> Result<(usize, u32), String> {
        let value = expr::eval(expr_text, self)?;
        match self.watchpoints.add(expr_text, value) {
            Some(id) => Ok((id, value)),
            None => Err("watchpoint pool is full".to_string()),
        }
    }

    /// Dump every trace store. Called on END/ABORT and from the abort path.
    pub fn dump_traces(&self) {
        self.itrace.dump();
        trace::dump_bus_traces(&self.bus);
        self.ftrace.dump();
        self.etrace.dump();
    }

    /// Log the run statistics.
    pub fn statistic(&self) {
        log::info!("host time spent = {} us", self.timer_us);
        log::info!("total guest instructions = {}", self.nr_inst);
        if self.timer_us > 0 {
            log::info!(
                "simulation frequency = {} inst/s",
                self.nr_inst.saturating_mul(1_000_000) / self.timer_us
            );
        } else {
            log::info!(
                "Finish running in less than 1 us and can not calculate the simulation frequency"
            );
        }
    }

    /// Print the register file (the `info r` command).
    pub fn reg_display(&self) {
        for i in 0..32 {
            println!("{}:\t{:#010x}", Registers::name(i), self.cpu.regs.read(i as u8));
        }
        println!("pc:\t{:#010x}", self.cpu.regs.pc);
    }

    /// Retired instruction count.
    #[must_use]
    pub fn nr_inst(&self) -> u64 {
        self.nr_inst
    }

    /// Shadow call stack depth (ftrace).
    #[must_use]
    pub fn call_depth(&self) -> usize {
        self.ftrace.depth()
    }

    /// Number of function-trace log entries.
    #[must_use]
    pub fn ftrace_log_len(&self) -> usize {
        self.ftrace.log_len()
    }

    /// Function-trace entries as `(kind, name, depth)`, oldest first.
    pub fn ftrace_entries(&self) -> impl Iterator<Item = (char, &str, usize)> {
        self.ftrace.entries()
    }

    /// Exception-trace entries, oldest first.
    pub fn etrace_entries(&self) -> impl Iterator<Item = &crate::trace::ExcRecord> {
        self.etrace.iter()
    }

    /// Forward a host key event to the keyboard device.
    pub fn key_event(&mut self, key: Key, down: bool) {
        self.bus.key_event(key, down);
    }

    /// Take the most recent VGA frame, if the guest synced one.
    pub fn take_frame(&mut self) -> Option<Frame> {
        self.bus.frames.take()
    }

    /// The process exit code for the current state.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        match self.state {
            RunState::End => {
                if self.halt_ret == 0 {
                    0
                } else {
                    1
                }
            }
            RunState::Abort => 2,
            _ => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EBREAK: u32 = 0x0010_0073;

    fn machine_with(words: &[u32]) -> Machine {
        Machine::new(MachineConfig::for_tests(words)).expect("machine")
    }

    #[test]
    fn run_to_good_trap() {
        let mut m = machine_with(&[0x0050_0093, EBREAK]); // addi x1, x0, 5
        m.cpu_exec(u64::MAX);
        assert_eq!(m.state, RunState::End);
        assert_eq!(m.halt_ret, 0);
        assert_eq!(m.cpu.regs.read(1), 5);
        assert_eq!(m.exit_code(), 0);
    }

    #[test]
    fn bad_trap_exit_code() {
        // addi a0, x0, 1; ebreak
        let mut m = machine_with(&[0x0010_0513, EBREAK]);
        m.cpu_exec(u64::MAX);
        assert_eq!(m.state, RunState::End);
        assert_eq!(m.halt_ret, 1);
        assert_eq!(m.exit_code(), 1);
    }

    #[test]
    fn step_budget_parks_in_stop() {
        // An infinite loop: jal x0, 0
        let mut m = machine_with(&[0x0000_006f]);
        m.cpu_exec(100);
        assert_eq!(m.state, RunState::Stop);
        assert_eq!(m.nr_inst(), 100);
        // Resumable.
        m.cpu_exec(50);
        assert_eq!(m.nr_inst(), 150);
    }

    #[test]
    fn finished_machine_refuses_to_run() {
        let mut m = machine_with(&[EBREAK]);
        m.cpu_exec(u64::MAX);
        let retired = m.nr_inst();
        m.cpu_exec(10);
        assert_eq!(m.nr_inst(), retired, "no further instructions retired");
    }

    #[test]
    fn out_of_map_access_aborts() {
        // lw a0, 0(x0) reads address 0
        let mut m = machine_with(&[0x0000_2503]);
        m.cpu_exec(u64::MAX);
        assert_eq!(m.state, RunState::Abort);
        assert_eq!(m.exit_code(), 2);
        assert_eq!(m.halt_pc, 0x8000_0000);
    }

    #[test]
    fn mcycle_counts_retired_instructions() {
        let mut m = machine_with(&[0x0050_0093, 0x00a0_0113, EBREAK]);
        m.cpu_exec(u64::MAX);
        assert_eq!(m.cpu.csr.mcycle, 3);
    }

    #[test]
    fn pc_moves_only_on_control_transfer_or_trap() {
        // addi x1, x0, 5 retires and pc advances by 4.
        let mut m = machine_with(&[0x0050_0093, EBREAK]);
        m.cpu_exec(1);
        assert_eq!(m.cpu.pc(), 0x8000_0004);
    }

    #[test]
    fn watchpoint_full_pool_reports() {
        let mut m = machine_with(&[EBREAK]);
        for _ in 0..crate::watchpoint::NR_WP {
            m.add_watchpoint("1").expect("add");
        }
        assert!(m.add_watchpoint("1").is_err());
    }
}
