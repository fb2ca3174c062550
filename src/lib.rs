//! chip8-emu library
//!
//! Interpreter core for the CHIP-8 / Super-CHIP-48 virtual instruction set,
//! with a disassembler sharing the same decode table.

pub mod config;
pub mod emu;
pub mod machine;
