//! Fetch-decode-execute engine.
//!
//! One call to [`Interpreter::step`] executes exactly one instruction: fetch
//! the two bytes at PC, advance PC (so skip and call logic already sees the
//! next instruction's address), decode, execute. The exception is a pending
//! blocking key read, during which `step` only polls the key latch and
//! leaves PC alone.
//!
//! The engine is synchronous and single-threaded; it never blocks, spawns,
//! or performs I/O. Pacing is the driver's job: call `step` at the machine's
//! nominal instruction rate and [`Interpreter::tick`] at 60 Hz.
//!
//! Faults (invalid opcode, stack imbalance, out-of-range access) surface as
//! [`StepError`] so the host can report and halt gracefully; the faulting
//! instruction is not retried and PC has already moved past it.

use log::trace;
use thiserror::Error;

use super::instruction::{Instruction, InstructionKind};
use crate::machine::arch::{FONT_ADDR, FONT_GLYPH_HEIGHT, PC_MAX};
use crate::machine::{Machine, MachineError};

/// Fault raised by [`Interpreter::step`].
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum StepError {
    /// Opcode/operand combination not in the decode table.
    #[error("invalid opcode {0:#06X}")]
    InvalidOpcode(u16),

    /// Super-CHIP instruction executed while the extension is disabled.
    #[error("Super-CHIP opcode {0:#06X} executed with the extension disabled")]
    SuperChipDisabled(u16),

    /// Range fault from the machine model.
    #[error(transparent)]
    Machine(#[from] MachineError),
}

/// The interpreter: machine state plus the execution engine.
pub struct Interpreter {
    /// The machine being interpreted.
    pub machine: Machine,
    /// Instructions retired since creation or the last reset.
    steps: u64,
    /// Most recently executed instruction, for state dumps.
    last_instruction: Option<Instruction>,
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new()
    }
}

impl Interpreter {
    /// Create an interpreter in the post-reset state.
    pub fn new() -> Self {
        Self {
            machine: Machine::new(),
            steps: 0,
            last_instruction: None,
        }
    }

    /// Create an interpreter with the Super-CHIP extension enabled.
    pub fn new_super_chip() -> Self {
        let mut interp = Self::new();
        interp.machine.screen.set_super_chip(true);
        interp
    }

    /// Reinitialize the machine. See [`Machine::reset`].
    pub fn reset(&mut self, clear_memory: bool) {
        self.machine.reset(clear_memory);
        self.steps = 0;
        self.last_instruction = None;
    }

    /// Load a raw ROM image at 0x200. See [`Machine::load_program`].
    pub fn load_program(&mut self, image: &[u8]) {
        self.machine.load_program(image);
    }

    /// Instructions retired so far.
    #[inline]
    pub fn steps(&self) -> u64 {
        self.steps
    }

    /// Most recently executed instruction, if any.
    #[inline]
    pub fn last_instruction(&self) -> Option<Instruction> {
        self.last_instruction
    }

    /// Decrement both timers. The driver calls this at 60 Hz, independent
    /// of the instruction rate.
    pub fn tick(&mut self) {
        self.machine.tick_timers();
    }

    /// Forward a key press/release from the driver.
    pub fn set_key(&mut self, key: u8, pressed: bool) -> Result<(), MachineError> {
        self.machine.set_key(key, pressed)
    }

    /// Whether a key is currently held.
    pub fn is_key(&self, key: u8) -> Result<bool, MachineError> {
        self.machine.is_key(key)
    }

    /// Active display width in pixels.
    pub fn screen_width(&self) -> usize {
        self.machine.screen.width()
    }

    /// Active display height in pixels.
    pub fn screen_height(&self) -> usize {
        self.machine.screen.height()
    }

    /// Read one pixel (0 or 1) of the active framebuffer.
    pub fn pixel(&self, index: usize) -> Option<u8> {
        self.machine.screen.pixel(index)
    }

    /// Disassemble the instruction at `addr`.
    pub fn disassemble(&self, addr: u16) -> Result<String, MachineError> {
        let hi = self.machine.read_mem(addr)?;
        let lo = self.machine.read_mem(addr.wrapping_add(1))?;
        Ok(Instruction::decode(hi, lo).disassemble())
    }

    /// Disassemble the instruction PC points at.
    pub fn disassemble_current(&self) -> Result<String, MachineError> {
        self.disassemble(self.machine.pc())
    }

    /// Execute one instruction.
    ///
    /// Returns `Ok(false)` when the program executed the historical all-zero
    /// no-op or the Super-CHIP EXIT instruction, signalling the driver that
    /// it may stop stepping. A pending key wait makes this a latch poll that
    /// fetches nothing.
    pub fn step(&mut self) -> Result<bool, StepError> {
        if let Some(reg) = self.machine.key_wait() {
            if let Some(key) = self.machine.key_latch() {
                self.machine.set_v(reg, key)?;
                self.machine.clear_key_wait();
            }
            return Ok(true);
        }

        let pc = self.machine.pc();
        if pc > PC_MAX {
            return Err(MachineError::PcOutOfRange(pc).into());
        }
        let hi = self.machine.read_mem(pc)?;
        let lo = self.machine.read_mem(pc + 1)?;
        self.machine.advance_pc();

        let inst = Instruction::decode(hi, lo);
        trace!("{:03X}: {}", pc, inst);

        if inst.kind.is_super_only() && !self.machine.screen.super_chip() {
            return Err(StepError::SuperChipDisabled(inst.raw));
        }

        let continuing = self.execute(inst)?;
        self.steps += 1;
        self.last_instruction = Some(inst);
        Ok(continuing)
    }

    /// Run up to `max_steps` instructions, stopping early on a halt.
    ///
    /// Returns the number of instructions executed.
    pub fn run(&mut self, max_steps: u64) -> Result<u64, StepError> {
        let start = self.steps;
        for _ in 0..max_steps {
            if !self.step()? {
                break;
            }
        }
        Ok(self.steps - start)
    }

    /// Execute a decoded instruction. PC already points past it.
    fn execute(&mut self, inst: Instruction) -> Result<bool, StepError> {
        use InstructionKind::*;

        let m = &mut self.machine;

        match inst.kind {
            Nop => return Ok(false),

            Cls => m.screen.clear(),

            Ret => {
                let addr = m.pop()?;
                m.set_pc(addr)?;
            }

            ScrollDown { n } => m.screen.scroll_down(n as usize),

            ScrollRight => {
                let n = if m.screen.high_res() { 4 } else { 2 };
                m.screen.scroll_right(n);
            }

            ScrollLeft => {
                let n = if m.screen.high_res() { 4 } else { 2 };
                m.screen.scroll_left(n);
            }

            Exit => return Ok(false),

            LowRes => m.screen.set_high_res(false),

            HighRes => m.screen.set_high_res(true),

            // The legacy machine-code call degenerates to a jump; the PC
            // range check rejects targets below the program window.
            Sys { addr } | Jump { addr } => m.set_pc(addr)?,

            Call { addr } => {
                let ret = m.pc();
                m.push(ret)?;
                m.set_pc(addr)?;
            }

            SkipEqImm { x, value } => {
                if m.v(x)? == value {
                    m.advance_pc();
                }
            }

            SkipNeImm { x, value } => {
                if m.v(x)? != value {
                    m.advance_pc();
                }
            }

            SkipEqReg { x, y } => {
                if m.v(x)? == m.v(y)? {
                    m.advance_pc();
                }
            }

            LoadImm { x, value } => m.set_v(x, value)?,

            AddImm { x, value } => {
                let sum = m.v(x)?.wrapping_add(value);
                m.set_v(x, sum)?;
            }

            Move { x, y } => {
                let value = m.v(y)?;
                m.set_v(x, value)?;
            }

            Or { x, y } => {
                let value = m.v(x)? | m.v(y)?;
                m.set_v(x, value)?;
            }

            And { x, y } => {
                let value = m.v(x)? & m.v(y)?;
                m.set_v(x, value)?;
            }

            Xor { x, y } => {
                let value = m.v(x)? ^ m.v(y)?;
                m.set_v(x, value)?;
            }

            Add { x, y } => {
                let (sum, carry) = m.v(x)?.overflowing_add(m.v(y)?);
                m.set_v(x, sum)?;
                m.set_flag(carry as u8);
            }

            Sub { x, y } => {
                let (a, b) = (m.v(x)?, m.v(y)?);
                m.set_v(x, a.wrapping_sub(b))?;
                m.set_flag((a >= b) as u8);
            }

            Shr { x, .. } => {
                let a = m.v(x)?;
                m.set_v(x, a >> 1)?;
                m.set_flag(a & 1);
            }

            SubN { x, y } => {
                let (a, b) = (m.v(x)?, m.v(y)?);
                m.set_v(x, b.wrapping_sub(a))?;
                m.set_flag((b >= a) as u8);
            }

            Shl { x, .. } => {
                let a = m.v(x)?;
                m.set_v(x, a << 1)?;
                m.set_flag(a >> 7);
            }

            SkipNeReg { x, y } => {
                if m.v(x)? != m.v(y)? {
                    m.advance_pc();
                }
            }

            LoadI { addr } => {
                m.set_i(addr);
            }

            JumpV0 { addr } => {
                let target = addr + m.v(0)? as u16;
                m.set_pc(target)?;
            }

            Random { x, mask } => {
                m.set_v(x, rand::random::<u8>() & mask)?;
            }

            Draw { x, y, height } => {
                let (px, py) = (m.v(x)?, m.v(y)?);
                let mut rows = [0u8; 16];
                let len = height as usize;
                rows[..len].copy_from_slice(m.read_mem_slice(m.i_reg(), len)?);
                let hit = m.screen.draw_sprite(&rows[..len], px, py);
                m.set_flag(hit);
            }

            SkipKey { x } => {
                if m.is_key(m.v(x)?)? {
                    m.advance_pc();
                }
            }

            SkipNoKey { x } => {
                if !m.is_key(m.v(x)?)? {
                    m.advance_pc();
                }
            }

            LoadDelay { x } => {
                let dt = m.dt();
                m.set_v(x, dt)?;
            }

            WaitKey { x } => m.arm_key_wait(x),

            SetDelay { x } => {
                let value = m.v(x)?;
                m.set_dt(value);
            }

            SetSound { x } => {
                let value = m.v(x)?;
                m.set_st(value);
            }

            AddI { x } => {
                let sum = m.i_reg() + m.v(x)? as u16;
                let clamped = m.set_i(sum);
                m.set_flag(clamped as u8);
            }

            LoadFont { x } => {
                let digit = m.v(x)? as u16;
                m.set_i(FONT_ADDR + digit * FONT_GLYPH_HEIGHT);
            }

            // The 10-row high font is never populated; the lookup is
            // accepted and does nothing, as on the original interpreter.
            LoadHighFont { .. } => {}

            StoreBcd { x } => {
                let value = m.v(x)?;
                let i = m.i_reg();
                m.write_mem(i, value / 100)?;
                m.write_mem(i + 1, (value % 100) / 10)?;
                m.write_mem(i + 2, value % 10)?;
            }

            StoreRegs { x } => {
                let i = m.i_reg();
                for reg in 0..=x {
                    let value = m.v(reg)?;
                    m.write_mem(i + reg as u16, value)?;
                }
            }

            LoadRegs { x } => {
                let i = m.i_reg();
                for reg in 0..=x {
                    let value = m.read_mem(i + reg as u16)?;
                    m.set_v(reg, value)?;
                }
            }

            StoreFlags { x } => {
                for reg in 0..=x {
                    let value = m.v(reg)?;
                    m.set_r(reg, value)?;
                }
            }

            LoadFlags { x } => {
                for reg in 0..=x {
                    let value = m.r(reg)?;
                    m.set_v(reg, value)?;
                }
            }

            Unknown { raw } => return Err(StepError::InvalidOpcode(raw)),
        }

        Ok(true)
    }
}
