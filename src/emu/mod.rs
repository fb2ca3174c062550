//! Execution engine for the CHIP-8 / Super-CHIP-48 machine.
//!
//! This module provides:
//! - Instruction decoding and disassembly, sharing one table
//! - The fetch-decode-execute engine with recoverable step faults
//!
//! # Architecture
//!
//! The interpreter is driven from outside: a host calls
//! [`Interpreter::step`] at the machine's nominal instruction rate
//! (around 500 Hz historically) and [`Interpreter::tick`] at 60 Hz for the
//! timers. The core neither paces itself nor performs I/O.
//!
//! # Example
//!
//! ```
//! use chip8_emu::emu::Interpreter;
//!
//! let mut interp = Interpreter::new();
//! interp.load_program(&[0x6A, 0x02]); // LD VA, 2
//! interp.step().unwrap();
//! assert_eq!(interp.machine.v(0xA).unwrap(), 2);
//! ```

pub mod core;
pub mod instruction;

pub use core::{Interpreter, StepError};
pub use instruction::{Instruction, InstructionKind};
