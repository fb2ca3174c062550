//! chip8-emu: CHIP-8 / Super-CHIP-48 interpreter and disassembler
//!
//! Headless command-line front end: print a disassembly listing of a ROM,
//! or batch-run it for a bounded number of steps and dump machine state.
//! Interactive execution and rendering are a separate front end's job; this
//! binary only drives the library surface.

use std::env;

use chip8_emu::config::Config;
use chip8_emu::emu::Interpreter;
use chip8_emu::machine::arch::PROG_START;

fn main() -> anyhow::Result<()> {
    // Initialize logging
    env_logger::init();

    let args: Vec<String> = env::args().collect();

    let mut dasm = false;
    let mut dump_state = false;
    let mut super_chip = false;
    let mut steps: Option<u64> = None;
    let mut path = None;

    let mut iter = args[1..].iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--dasm" | "-d" => dasm = true,
            "--dump-state" => dump_state = true,
            "--super" | "-s" => super_chip = true,
            "--steps" => {
                let value = iter
                    .next()
                    .ok_or_else(|| anyhow::anyhow!("--steps needs a count"))?;
                steps = Some(value.parse()?);
            }
            _ if !arg.starts_with('-') => path = Some(arg.as_str()),
            _ => anyhow::bail!("unknown option: {}", arg),
        }
    }

    let path = match path {
        Some(p) => p,
        None => {
            print_usage();
            return Ok(());
        }
    };

    let config = Config::get();

    let rom = std::fs::read(path)?;
    println!("Loading: {} ({} bytes)", path, rom.len());

    let mut interp = Interpreter::new();
    interp.machine.screen.set_super_chip(super_chip || config.super_chip());
    interp.load_program(&rom);

    match steps {
        // Running requires an explicit budget; --dasm wins if both are given.
        Some(count) if !dasm => run_batch(&mut interp, count, config, dump_state),
        _ => print_listing(&interp, rom.len()),
    }
}

fn print_usage() {
    println!("usage: chip8-emu <rom> [options]");
    println!();
    println!("options:");
    println!("  --dasm, -d     print a disassembly listing (default)");
    println!("  --steps N      execute up to N instructions headless");
    println!("  --dump-state   print machine state after running");
    println!("  --super, -s    enable the Super-CHIP-48 extension");
}

/// Print a disassembly listing of the loaded program.
fn print_listing(interp: &Interpreter, rom_len: usize) -> anyhow::Result<()> {
    let start = PROG_START;
    let end = (PROG_START as usize + rom_len).min(0x1000) as u16;

    for addr in (start..end).step_by(2) {
        println!("{:03X} : {}", addr, interp.disassemble(addr)?);
    }
    Ok(())
}

/// Run up to `max_steps` instructions, ticking the timers at the configured
/// ratio, and report how the program stopped.
fn run_batch(
    interp: &mut Interpreter,
    max_steps: u64,
    config: &Config,
    dump_state: bool,
) -> anyhow::Result<()> {
    // Interleave timer ticks at clock_hz / timer_hz steps per tick.
    let steps_per_tick = (config.clock_hz() / config.timer_hz()).max(1) as u64;

    let mut executed = 0;
    let mut stopped = None;
    while executed < max_steps {
        match interp.step() {
            Ok(true) => executed += 1,
            Ok(false) => {
                executed += 1;
                stopped = Some("program halted".to_string());
                break;
            }
            Err(e) => {
                stopped = Some(format!("fault at {:#05X}: {}", interp.machine.pc(), e));
                break;
            }
        }
        if executed % steps_per_tick == 0 {
            interp.tick();
        }
    }

    println!("Executed {} instruction(s)", executed);
    if let Some(reason) = stopped {
        println!("Stopped: {}", reason);
    }

    if dump_state {
        println!();
        print_state(interp);
    }
    Ok(())
}

/// Print registers, pointers, and the framebuffer.
fn print_state(interp: &Interpreter) {
    let m = &interp.machine;

    println!("Machine State");
    println!("=============");
    println!(
        "PC={:03X} SP={} I={:03X} DT={:02X} ST={:02X} steps={}",
        m.pc(),
        m.sp(),
        m.i_reg(),
        m.dt(),
        m.st(),
        interp.steps()
    );

    for row in 0..4u8 {
        let regs: Vec<String> = (0..4u8)
            .map(|col| {
                let reg = row * 4 + col;
                format!("V{:X}={:02X}", reg, m.v(reg).unwrap_or(0))
            })
            .collect();
        println!("  {}", regs.join("  "));
    }

    if let Some(inst) = interp.last_instruction() {
        println!("last: {}", inst);
    }

    println!();
    println!(
        "Screen ({}x{}, {})",
        interp.screen_width(),
        interp.screen_height(),
        if m.screen.high_res() {
            "high res"
        } else {
            "low res"
        }
    );
    let width = interp.screen_width();
    for (i, chunk) in m.screen.buffer().chunks(width).enumerate() {
        let line: String = chunk
            .iter()
            .map(|&p| if p != 0 { '#' } else { '.' })
            .collect();
        println!("{:2} {}", i, line);
    }
}
