//! RV32 simulator binary.
//!
//! Loads a raw guest image at the reset vector, optionally its ELF
//! companion for function tracing, then runs in one of three modes:
//! interactive debugger (default), batch (`-b`), or windowed (`--vga`,
//! batch-like with the VGA framebuffer on screen).

use std::path::{Path, PathBuf};
use std::process;

use emu_rv32::{Machine, MachineConfig, Sdb};
use format_elf::SymbolTable;

/// Built-in image used when no file is given: write a byte, read it back,
/// halt with a0 = 0.
const DEFAULT_IMG: [u32; 5] = [
    0x8000_02b7, // lui t0, 0x80000
    0x0002_8823, // sb zero, 16(t0)
    0x0102_c503, // lbu a0, 16(t0)
    0x0010_0073, // ebreak
    0xdead_beef,
];

struct CliArgs {
    batch: bool,
    log_path: Option<PathBuf>,
    diff_ref: Option<String>,
    gdb_port: Option<String>,
    img_path: Option<PathBuf>,
    vga: bool,
    screenshot_path: Option<PathBuf>,
}

fn usage() -> ! {
    eprintln!("Usage: emu-rv32 [OPTIONS] [IMG]");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  -b, --batch          Run non-interactively (continue, then quit)");
    eprintln!("  -l <file>            Write the log to <file> instead of stdout");
    eprintln!("  -d <ref>             Differential testing against <ref> (not built in)");
    eprintln!("  -p <port>            Remote debug port (not built in)");
    eprintln!("  --vga                Open a window showing the VGA framebuffer");
    eprintln!("  --screenshot <file>  Save a PNG of the framebuffer after the run");
    eprintln!("  <IMG>                Raw guest image, loaded at 0x80000000;");
    eprintln!("                       its .elf companion enables function tracing");
    process::exit(0);
}

fn parse_args() -> CliArgs {
    let args: Vec<String> = std::env::args().collect();
    let mut cli = CliArgs {
        batch: false,
        log_path: None,
        diff_ref: None,
        gdb_port: None,
        img_path: None,
        vga: false,
        screenshot_path: None,
    };

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "-b" | "--batch" => cli.batch = true,
            "-l" => {
                i += 1;
                cli.log_path = args.get(i).map(PathBuf::from);
            }
            "-d" => {
                i += 1;
                cli.diff_ref = args.get(i).cloned();
            }
            "-p" => {
                i += 1;
                cli.gdb_port = args.get(i).cloned();
            }
            "--vga" => cli.vga = true,
            "--screenshot" => {
                i += 1;
                cli.screenshot_path = args.get(i).map(PathBuf::from);
            }
            "--help" | "-h" => usage(),
            other if !other.starts_with('-') => cli.img_path = Some(PathBuf::from(other)),
            other => {
                eprintln!("Unknown argument: {other}");
                process::exit(1);
            }
        }
        i += 1;
    }

    cli
}

/// The ELF companion of an image: the last three characters of the path
/// are rewritten to `elf` (`prog.bin` -> `prog.elf`).
fn elf_companion(img: &Path) -> Result<PathBuf, String> {
    let s = img.to_string_lossy();
    if s.len() < 4 || !s.is_char_boundary(s.len() - 3) {
        return Err(format!(
            "cannot derive an ELF companion from '{s}': expected a 3-character extension"
        ));
    }
    Ok(PathBuf::from(format!("{}elf", &s[..s.len() - 3])))
}

fn load_symbols(img_path: &Path) -> Option<SymbolTable> {
    let elf_path = match elf_companion(img_path) {
        Ok(p) => p,
        Err(msg) => {
            log::warn!("{msg}; function tracing disabled");
            return None;
        }
    };
    let data = match std::fs::read(&elf_path) {
        Ok(d) => d,
        Err(e) => {
            log::warn!(
                "cannot read ELF companion {}: {e}; function tracing disabled",
                elf_path.display()
            );
            return None;
        }
    };
    match SymbolTable::parse(&data) {
        Ok(table) => {
            if table.is_empty() {
                log::warn!("no function symbols in {}", elf_path.display());
            } else {
                log::info!(
                    "loaded {} function symbols from {}",
                    table.len(),
                    elf_path.display()
                );
            }
            Some(table)
        }
        Err(msg) => {
            log::warn!(
                "cannot parse {}: {msg}; function tracing disabled",
                elf_path.display()
            );
            None
        }
    }
}

fn main() {
    let cli = parse_args();

    if let Err(msg) = emu_rv32::init_logger(cli.log_path.as_deref()) {
        eprintln!("{msg}");
        process::exit(2);
    }

    if let Some(ref r) = cli.diff_ref {
        log::warn!("differential testing against '{r}' is not built in; ignoring -d");
    }
    if let Some(ref p) = cli.gdb_port {
        log::warn!("remote debugging on port '{p}' is not built in; ignoring -p");
    }

    let (img, symbols) = match cli.img_path {
        Some(ref path) => {
            let img = match std::fs::read(path) {
                Ok(data) => data,
                Err(e) => {
                    eprintln!("Failed to read image {}: {e}", path.display());
                    process::exit(2);
                }
            };
            log::info!("image: {} ({} bytes)", path.display(), img.len());
            (img, load_symbols(path))
        }
        None => {
            log::info!("no image given, using the built-in default");
            let mut img = Vec::with_capacity(DEFAULT_IMG.len() * 4);
            for w in &DEFAULT_IMG {
                img.extend_from_slice(&w.to_le_bytes());
            }
            (img, None)
        }
    };

    let mut config = MachineConfig::new(img);
    if let Some(symbols) = symbols {
        config = config.with_symbols(symbols);
    }

    let machine = match Machine::new(config) {
        Ok(m) => m,
        Err(msg) => {
            eprintln!("{msg}");
            process::exit(2);
        }
    };

    let machine = run(machine, &cli);

    #[cfg(feature = "native")]
    if let Some(ref path) = cli.screenshot_path {
        let frame = machine.bus.framebuffer();
        if let Err(e) = emu_rv32::capture::save_screenshot(&frame, path) {
            eprintln!("Screenshot error: {e}");
        } else {
            eprintln!("Screenshot saved to {}", path.display());
        }
    }
    #[cfg(not(feature = "native"))]
    if cli.screenshot_path.is_some() {
        eprintln!("this build has no screenshot support (native feature disabled)");
    }

    process::exit(machine.exit_code());
}

fn run(mut machine: Machine, cli: &CliArgs) -> Machine {
    #[cfg(feature = "native")]
    if cli.vga {
        return emu_rv32::window::run(machine);
    }
    #[cfg(not(feature = "native"))]
    if cli.vga {
        eprintln!("this build has no window support (native feature disabled)");
        process::exit(1);
    }

    if cli.batch {
        machine.cpu_exec(u64::MAX);
        return machine;
    }

    let mut sdb = Sdb::new();
    sdb.mainloop(&mut machine);
    machine
}
