//! The interactive debugger REPL.
//!
//! Reads commands from stdin, one per line. An empty line repeats the
//! previous command (handy for `si`). Dispatch is an exact-name match
//! against the command table; anything else reports and keeps going.

use std::io::{self, BufRead, Write};

use sim_core::Bus;

use crate::expr;
use crate::machine::{Machine, RunState};

/// What a command handler wants the loop to do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CmdResult {
    Continue,
    Exit,
}

type Handler = fn(&mut Machine, Option<&str>) -> CmdResult;

struct Command {
    name: &'static str,
    description: &'static str,
    handler: Handler,
}

const COMMANDS: &[Command] = &[
    Command {
        name: "help",
        description: "Display information about all supported commands",
        handler: cmd_help,
    },
    Command {
        name: "c",
        description: "Continue the execution of the program",
        handler: cmd_c,
    },
    Command {
        name: "q",
        description: "Exit the simulator",
        handler: cmd_q,
    },
    Command {
        name: "si",
        description: "Step one instruction (or N with 'si N')",
        handler: cmd_si,
    },
    Command {
        name: "info",
        description: "Display program state: 'info r' registers, 'info w' watchpoints",
        handler: cmd_info,
    },
    Command {
        name: "x",
        description: "View memory: 'x N EXPR' prints N words starting at EXPR",
        handler: cmd_x,
    },
    Command {
        name: "p",
        description: "Print the value of an expression: 'p EXPR'",
        handler: cmd_p,
    },
    Command {
        name: "w",
        description: "Set a watchpoint on an expression: 'w EXPR'",
        handler: cmd_w,
    },
    Command {
        name: "d",
        description: "Delete a watchpoint: 'd N'",
        handler: cmd_d,
    },
];

fn cmd_help(_m: &mut Machine, args: Option<&str>) -> CmdResult {
    match args {
        None => {
            for cmd in COMMANDS {
                println!("{} - {}", cmd.name, cmd.description);
            }
        }
        Some(name) => match COMMANDS.iter().find(|c| c.name == name) {
            Some(cmd) => println!("{} - {}", cmd.name, cmd.description),
            None => println!("Unknown command '{name}'"),
        },
    }
    CmdResult::Continue
}

fn cmd_c(m: &mut Machine, _args: Option<&str>) -> CmdResult {
    m.cpu_exec(u64::MAX);
    CmdResult::Continue
}

fn cmd_q(m: &mut Machine, _args: Option<&str>) -> CmdResult {
    // A finished run keeps its state so the exit code reflects the guest's
    // halt value; quitting mid-run exits 0.
    if matches!(m.state, RunState::Running | RunState::Stop) {
        m.state = RunState::Quit;
    }
    CmdResult::Exit
}

fn cmd_si(m: &mut Machine, args: Option<&str>) -> CmdResult {
    let steps = match args {
        None => 1,
        Some(s) => match s.trim().parse::<u64>() {
            Ok(n) if n > 0 => n,
            _ => {
                println!("invalid number of steps: {s}");
                return CmdResult::Continue;
            }
        },
    };
    m.cpu_exec(steps);
    CmdResult::Continue
}

fn cmd_info(m: &mut Machine, args: Option<&str>) -> CmdResult {
    match args {
        Some("r") => m.reg_display(),
        Some("w") => {
            if m.watchpoints.is_empty() {
                println!("no watchpoints");
            } else {
                println!("Num\tExpr\tValue");
                for (id, wp) in m.watchpoints.iter() {
                    println!("{id}\t{}\t{:#010x}", wp.expr, wp.last_value);
                }
            }
        }
        Some(other) => println!("Unknown subcommand '{other}'"),
        None => println!("usage: info r | info w"),
    }
    CmdResult::Continue
}

fn cmd_x(m: &mut Machine, args: Option<&str>) -> CmdResult {
    let usage = || println!("usage: x N EXPR");
    let Some(args) = args else {
        usage();
        return CmdResult::Continue;
    };
    let Some((n_str, expr_str)) = args.trim().split_once(char::is_whitespace) else {
        usage();
        return CmdResult::Continue;
    };
    let n = match n_str.parse::<u32>() {
        Ok(n) if n > 0 => n,
        _ => {
            println!("invalid number of words: {n_str}");
            return CmdResult::Continue;
        }
    };

    let addr = match expr::eval(expr_str, m) {
        Ok(v) => v,
        Err(msg) => {
            println!("expression evaluation failed: {msg}");
            return CmdResult::Continue;
        }
    };

    for i in 0..n {
        let cur = addr.wrapping_add(i * 4);
        match m.bus.read(cur, 4) {
            Ok(value) => println!("{cur:#010x}: {value:#010x}"),
            Err(msg) => {
                println!("{msg}");
                break;
            }
        }
    }
    CmdResult::Continue
}

fn cmd_p(m: &mut Machine, args: Option<&str>) -> CmdResult {
    let Some(expr_str) = args else {
        println!("usage: p EXPR");
        return CmdResult::Continue;
    };
    match expr::eval(expr_str, m) {
        Ok(value) => println!("{value:#010x}"),
        Err(msg) => println!("expression evaluation failed: {msg}"),
    }
    CmdResult::Continue
}

fn cmd_w(m: &mut Machine, args: Option<&str>) -> CmdResult {
    let Some(expr_str) = args else {
        println!("usage: w EXPR");
        return CmdResult::Continue;
    };
    match m.add_watchpoint(expr_str) {
        Ok((id, value)) => {
            println!("watchpoint {id}: {expr_str}");
            println!("current value = {value:#010x}");
        }
        Err(msg) => println!("watchpoint not set: {msg}"),
    }
    CmdResult::Continue
}

fn cmd_d(m: &mut Machine, args: Option<&str>) -> CmdResult {
    let Some(id_str) = args else {
        println!("usage: d N");
        return CmdResult::Continue;
    };
    let Ok(id) = id_str.trim().parse::<usize>() else {
        println!("invalid watchpoint id: {id_str}");
        return CmdResult::Continue;
    };
    if m.watchpoints.delete(id) {
        println!("watchpoint {id} deleted");
    } else {
        println!("watchpoint {id} not found");
    }
    CmdResult::Continue
}

/// The debugger shell.
pub struct Sdb {
    last_cmd: String,
}

impl Sdb {
    #[must_use]
    pub fn new() -> Self {
        Self {
            last_cmd: String::new(),
        }
    }

    /// Dispatch one command line. Returns false when the loop should exit.
    pub fn dispatch(&mut self, machine: &mut Machine, line: &str) -> bool {
        let line = if line.trim().is_empty() {
            if self.last_cmd.is_empty() {
                return true;
            }
            self.last_cmd.clone()
        } else {
            line.trim().to_string()
        };

        let (name, args) = match line.split_once(char::is_whitespace) {
            Some((name, rest)) => {
                let rest = rest.trim();
                (name, if rest.is_empty() { None } else { Some(rest) })
            }
            None => (line.as_str(), None),
        };

        let Some(cmd) = COMMANDS.iter().find(|c| c.name == name) else {
            println!("Unknown command '{name}'");
            return true;
        };

        self.last_cmd = line.clone();
        (cmd.handler)(machine, args) == CmdResult::Continue
    }

    /// The interactive loop: prompt, read, dispatch, repeat until `q` or EOF.
    pub fn mainloop(&mut self, machine: &mut Machine) {
        let stdin = io::stdin();
        loop {
            print!("(emu-rv32) ");
            let _ = io::stdout().flush();

            let mut line = String::new();
            match stdin.lock().read_line(&mut line) {
                Ok(0) | Err(_) => break, // EOF
                Ok(_) => {}
            }
            if !self.dispatch(machine, &line) {
                break;
            }
        }
    }
}

impl Default for Sdb {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MachineConfig;

    const EBREAK: u32 = 0x0010_0073;

    fn make_machine(words: &[u32]) -> Machine {
        Machine::new(MachineConfig::for_tests(words)).expect("machine")
    }

    #[test]
    fn si_steps_one_instruction_by_default() {
        let mut m = make_machine(&[0x0050_0093, EBREAK]);
        let mut sdb = Sdb::new();
        assert!(sdb.dispatch(&mut m, "si"));
        assert_eq!(m.nr_inst(), 1);
        assert_eq!(m.cpu.regs.read(1), 5);
    }

    #[test]
    fn si_takes_a_count() {
        let mut m = make_machine(&[0x0000_006f]); // infinite loop
        let mut sdb = Sdb::new();
        assert!(sdb.dispatch(&mut m, "si 5"));
        assert_eq!(m.nr_inst(), 5);
    }

    #[test]
    fn empty_line_repeats_last_command() {
        let mut m = make_machine(&[0x0000_006f]);
        let mut sdb = Sdb::new();
        sdb.dispatch(&mut m, "si");
        sdb.dispatch(&mut m, "");
        sdb.dispatch(&mut m, "\n");
        assert_eq!(m.nr_inst(), 3);
    }

    #[test]
    fn empty_line_with_no_history_is_a_no_op() {
        let mut m = make_machine(&[0x0000_006f]);
        let mut sdb = Sdb::new();
        assert!(sdb.dispatch(&mut m, ""));
        assert_eq!(m.nr_inst(), 0);
    }

    #[test]
    fn c_runs_to_completion() {
        let mut m = make_machine(&[0x0050_0093, EBREAK]);
        let mut sdb = Sdb::new();
        assert!(sdb.dispatch(&mut m, "c"));
        assert_eq!(m.state, RunState::End);
    }

    #[test]
    fn q_exits_with_quit_state() {
        let mut m = make_machine(&[EBREAK]);
        let mut sdb = Sdb::new();
        assert!(!sdb.dispatch(&mut m, "q"));
        assert_eq!(m.state, RunState::Quit);
        assert_eq!(m.exit_code(), 0);
    }

    #[test]
    fn unknown_command_continues() {
        let mut m = make_machine(&[EBREAK]);
        let mut sdb = Sdb::new();
        assert!(sdb.dispatch(&mut m, "frobnicate"));
        assert_eq!(m.nr_inst(), 0);
    }

    #[test]
    fn w_and_d_manage_watchpoints() {
        let mut m = make_machine(&[EBREAK]);
        let mut sdb = Sdb::new();
        assert!(sdb.dispatch(&mut m, "w $t0"));
        assert!(!m.watchpoints.is_empty());
        assert!(sdb.dispatch(&mut m, "d 0"));
        assert!(m.watchpoints.is_empty());
    }

    #[test]
    fn invalid_si_count_does_not_step() {
        let mut m = make_machine(&[0x0000_006f]);
        let mut sdb = Sdb::new();
        assert!(sdb.dispatch(&mut m, "si nope"));
        assert!(sdb.dispatch(&mut m, "si 0"));
        assert_eq!(m.nr_inst(), 0);
    }
}
