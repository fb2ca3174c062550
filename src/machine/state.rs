//! Monolithic machine state and range-checked accessors.
//!
//! One [`Machine`] value owns everything the interpreter mutates: memory,
//! registers, stack, timers, keypad, the wait-for-key latch, and the
//! [`Screen`]. There is exactly one instance per session and every operation
//! takes it by reference; no global state.
//!
//! Accessors that take an index or address validate it and return a
//! [`MachineError`] on out-of-range input. The execute engine relies on this
//! to surface ROM bugs as recoverable step failures.

use log::debug;

use super::arch::{
    FLAG_REG, FONT, FONT_ADDR, MEM_END, MEM_SIZE, NUM_KEYS, NUM_REGS, PC_MAX, PROG_START,
    STACK_SIZE,
};
use super::display::Screen;
use super::MachineError;

/// Complete CHIP-8 / Super-CHIP-48 machine state.
pub struct Machine {
    /// 4 KB of byte-addressable memory.
    memory: [u8; MEM_SIZE],
    /// General-purpose registers V0..VF. VF doubles as the flag register.
    v: [u8; NUM_REGS],
    /// Super-CHIP persistent registers R0..RF. Survive `reset`.
    r: [u8; NUM_REGS],
    /// Address register, 12 bits.
    i: u16,
    /// Program counter, confined to the program window.
    pc: u16,
    /// Call stack depth.
    sp: u8,
    /// Return addresses.
    stack: [u16; STACK_SIZE],
    /// Delay timer, decremented by `tick`.
    dt: u8,
    /// Sound timer, decremented by `tick`. Nonzero means the buzzer is on;
    /// driving a speaker is the host's job.
    st: u8,
    /// Keypad lines, pressed = true.
    keys: [bool; NUM_KEYS],
    /// Last key to go from released to pressed, if any.
    key_latch: Option<u8>,
    /// Target register of a pending blocking key read.
    wait_reg: Option<u8>,
    /// Framebuffers and display mode flags.
    pub screen: Screen,
}

impl Default for Machine {
    fn default() -> Self {
        Self::new()
    }
}

impl Machine {
    /// Create a machine in the post-reset state (memory cleared, font
    /// loaded, PC at the program start).
    pub fn new() -> Self {
        let mut machine = Self {
            memory: [0; MEM_SIZE],
            v: [0; NUM_REGS],
            r: [0; NUM_REGS],
            i: 0,
            pc: PROG_START,
            sp: 0,
            stack: [0; STACK_SIZE],
            dt: 0,
            st: 0,
            keys: [false; NUM_KEYS],
            key_latch: None,
            wait_reg: None,
            screen: Screen::new(),
        };
        machine.write_font();
        machine
    }

    /// Reinitialize all volatile state: registers, timers, stack, keypad,
    /// display, and any pending key wait. The font is always rewritten.
    ///
    /// The persistent R bank and the display mode flags are left alone, as
    /// on the original hardware.
    pub fn reset(&mut self, clear_memory: bool) {
        if clear_memory {
            self.memory = [0; MEM_SIZE];
        }
        self.write_font();

        self.v = [0; NUM_REGS];
        self.i = 0;
        self.dt = 0;
        self.st = 0;
        self.pc = PROG_START;
        self.sp = 0;
        self.stack = [0; STACK_SIZE];
        self.keys = [false; NUM_KEYS];
        self.key_latch = None;
        self.wait_reg = None;
        self.screen.clear();

        debug!("machine reset (clear_memory={})", clear_memory);
    }

    fn write_font(&mut self) {
        let base = FONT_ADDR as usize;
        self.memory[base..base + FONT.len()].copy_from_slice(&FONT);
    }

    /// Copy a raw program image into memory starting at 0x200.
    ///
    /// Bytes that would fall past the end of memory are silently truncated;
    /// a short or oversized ROM is not an error.
    pub fn load_program(&mut self, image: &[u8]) {
        let start = PROG_START as usize;
        let len = image.len().min(MEM_SIZE - start);
        self.memory[start..start + len].copy_from_slice(&image[..len]);
        if len < image.len() {
            debug!("program truncated: {} of {} bytes loaded", len, image.len());
        } else {
            debug!("program loaded: {} bytes at {:#05X}", len, PROG_START);
        }
    }

    // ------------------------------------------------------------------
    // Program counter and stack
    // ------------------------------------------------------------------

    /// Current program counter.
    #[inline]
    pub fn pc(&self) -> u16 {
        self.pc
    }

    /// Set the program counter, validating the program window.
    pub fn set_pc(&mut self, pc: u16) -> Result<(), MachineError> {
        if !(PROG_START..=PC_MAX).contains(&pc) {
            return Err(MachineError::PcOutOfRange(pc));
        }
        self.pc = pc;
        Ok(())
    }

    /// Advance past the current instruction. The next fetch validates the
    /// resulting address, so skipping at the end of memory faults there.
    #[inline]
    pub fn advance_pc(&mut self) {
        self.pc += 2;
    }

    /// Current call depth.
    #[inline]
    pub fn sp(&self) -> u8 {
        self.sp
    }

    /// Push a return address.
    pub fn push(&mut self, addr: u16) -> Result<(), MachineError> {
        if self.sp as usize >= STACK_SIZE {
            return Err(MachineError::StackOverflow);
        }
        self.stack[self.sp as usize] = addr;
        self.sp += 1;
        Ok(())
    }

    /// Pop a return address.
    pub fn pop(&mut self) -> Result<u16, MachineError> {
        if self.sp == 0 {
            return Err(MachineError::StackUnderflow);
        }
        self.sp -= 1;
        Ok(self.stack[self.sp as usize])
    }

    // ------------------------------------------------------------------
    // Registers
    // ------------------------------------------------------------------

    /// Read a V register.
    pub fn v(&self, index: u8) -> Result<u8, MachineError> {
        self.v
            .get(index as usize)
            .copied()
            .ok_or(MachineError::RegisterOutOfRange(index))
    }

    /// Write a V register.
    pub fn set_v(&mut self, index: u8, value: u8) -> Result<(), MachineError> {
        *self
            .v
            .get_mut(index as usize)
            .ok_or(MachineError::RegisterOutOfRange(index))? = value;
        Ok(())
    }

    /// Write the flag register VF. Instructions that produce a carry,
    /// borrow, shift, or collision flag write it here, clobbering whatever
    /// the program stored.
    #[inline]
    pub fn set_flag(&mut self, value: u8) {
        self.v[FLAG_REG] = value;
    }

    /// Read a persistent R register.
    pub fn r(&self, index: u8) -> Result<u8, MachineError> {
        self.r
            .get(index as usize)
            .copied()
            .ok_or(MachineError::RegisterOutOfRange(index))
    }

    /// Write a persistent R register.
    pub fn set_r(&mut self, index: u8, value: u8) -> Result<(), MachineError> {
        *self
            .r
            .get_mut(index as usize)
            .ok_or(MachineError::RegisterOutOfRange(index))? = value;
        Ok(())
    }

    /// Address register I.
    #[inline]
    pub fn i_reg(&self) -> u16 {
        self.i
    }

    /// Set I, masked to 12 bits. Returns true when the unmasked value was
    /// out of range; `ADD I, Vx` turns that into the VF overflow flag.
    pub fn set_i(&mut self, value: u16) -> bool {
        let clamped = value > MEM_END;
        self.i = value & MEM_END;
        clamped
    }

    /// Delay timer value.
    #[inline]
    pub fn dt(&self) -> u8 {
        self.dt
    }

    /// Set the delay timer.
    #[inline]
    pub fn set_dt(&mut self, value: u8) {
        self.dt = value;
    }

    /// Sound timer value.
    #[inline]
    pub fn st(&self) -> u8 {
        self.st
    }

    /// Set the sound timer.
    #[inline]
    pub fn set_st(&mut self, value: u8) {
        self.st = value;
    }

    /// Decrement both timers toward zero. Called by the driver at 60 Hz.
    pub fn tick_timers(&mut self) {
        self.dt = self.dt.saturating_sub(1);
        self.st = self.st.saturating_sub(1);
    }

    // ------------------------------------------------------------------
    // Memory
    // ------------------------------------------------------------------

    /// Read one byte. Reads anywhere in the 4 KB window are legal,
    /// including the font area.
    pub fn read_mem(&self, addr: u16) -> Result<u8, MachineError> {
        self.memory
            .get(addr as usize)
            .copied()
            .ok_or(MachineError::AddressOutOfRange(addr))
    }

    /// Read `len` consecutive bytes (sprite rows, register block loads).
    pub fn read_mem_slice(&self, addr: u16, len: usize) -> Result<&[u8], MachineError> {
        let start = addr as usize;
        let end = start + len;
        if end > MEM_SIZE {
            return Err(MachineError::AddressOutOfRange(addr));
        }
        Ok(&self.memory[start..end])
    }

    /// Write one byte on behalf of a program instruction. The
    /// interpreter-reserved area below 0x200 rejects writes.
    pub fn write_mem(&mut self, addr: u16, value: u8) -> Result<(), MachineError> {
        if addr < PROG_START {
            return Err(MachineError::ReservedWrite(addr));
        }
        if addr > MEM_END {
            return Err(MachineError::AddressOutOfRange(addr));
        }
        self.memory[addr as usize] = value;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Keypad and key-wait state
    // ------------------------------------------------------------------

    /// Whether a key is currently held.
    pub fn is_key(&self, key: u8) -> Result<bool, MachineError> {
        self.keys
            .get(key as usize)
            .copied()
            .ok_or(MachineError::KeyOutOfRange(key))
    }

    /// Update one key line from the host.
    ///
    /// Only a released-to-pressed transition updates the last-pressed
    /// latch; holding a key does not re-trigger a pending blocking read.
    pub fn set_key(&mut self, key: u8, pressed: bool) -> Result<(), MachineError> {
        let line = self
            .keys
            .get_mut(key as usize)
            .ok_or(MachineError::KeyOutOfRange(key))?;
        if pressed && !*line {
            self.key_latch = Some(key);
        }
        *line = pressed;
        Ok(())
    }

    /// Key recorded by the latch since it was last cleared.
    #[inline]
    pub fn key_latch(&self) -> Option<u8> {
        self.key_latch
    }

    /// Arm a blocking key read targeting register `reg`, clearing any
    /// stale latch so only presses from this point on count.
    pub fn arm_key_wait(&mut self, reg: u8) {
        self.key_latch = None;
        self.wait_reg = Some(reg);
    }

    /// Target register of the pending key wait, if one is armed.
    #[inline]
    pub fn key_wait(&self) -> Option<u8> {
        self.wait_reg
    }

    /// Disarm the key wait and clear the latch.
    pub fn clear_key_wait(&mut self) {
        self.key_latch = None;
        self.wait_reg = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reset_state() {
        let mut machine = Machine::new();
        machine.set_v(3, 0x42).unwrap();
        machine.set_i(0x234);
        machine.set_dt(10);
        machine.set_st(20);
        machine.push(0x300).unwrap();
        machine.set_key(5, true).unwrap();

        machine.reset(true);

        assert_eq!(machine.read_mem_slice(0, 80).unwrap(), &FONT[..]);
        for reg in 0..16 {
            assert_eq!(machine.v(reg).unwrap(), 0);
        }
        assert_eq!(machine.i_reg(), 0);
        assert_eq!(machine.dt(), 0);
        assert_eq!(machine.st(), 0);
        assert_eq!(machine.sp(), 0);
        assert_eq!(machine.pc(), 0x200);
        assert!(!machine.is_key(5).unwrap());
    }

    #[test]
    fn test_reset_preserves_r_bank() {
        let mut machine = Machine::new();
        machine.set_r(7, 0x99).unwrap();
        machine.reset(true);
        assert_eq!(machine.r(7).unwrap(), 0x99);
    }

    #[test]
    fn test_reset_without_memory_clear_keeps_program() {
        let mut machine = Machine::new();
        machine.load_program(&[0x6A, 0x02]);
        machine.reset(false);
        assert_eq!(machine.read_mem(0x200).unwrap(), 0x6A);
        assert_eq!(machine.read_mem(0x201).unwrap(), 0x02);
    }

    #[test]
    fn test_load_program_truncates() {
        let mut machine = Machine::new();
        let image = vec![0xAB; MEM_SIZE]; // larger than program space
        machine.load_program(&image);
        assert_eq!(machine.read_mem(0xFFF).unwrap(), 0xAB);
        // Reserved area untouched.
        assert_eq!(machine.read_mem(0x1FF).unwrap(), 0);
    }

    #[test]
    fn test_pc_range_checked() {
        let mut machine = Machine::new();
        assert_eq!(
            machine.set_pc(0x100),
            Err(MachineError::PcOutOfRange(0x100))
        );
        assert_eq!(
            machine.set_pc(0xFFF),
            Err(MachineError::PcOutOfRange(0xFFF))
        );
        assert!(machine.set_pc(0xFFE).is_ok());
    }

    #[test]
    fn test_stack_limits() {
        let mut machine = Machine::new();
        for n in 0..16 {
            machine.push(0x200 + n).unwrap();
        }
        assert_eq!(machine.push(0x300), Err(MachineError::StackOverflow));

        for n in (0..16).rev() {
            assert_eq!(machine.pop().unwrap(), 0x200 + n);
        }
        assert_eq!(machine.pop(), Err(MachineError::StackUnderflow));
    }

    #[test]
    fn test_set_i_clamps_to_12_bits() {
        let mut machine = Machine::new();
        assert!(!machine.set_i(0xFFF));
        assert_eq!(machine.i_reg(), 0xFFF);
        assert!(machine.set_i(0x1002));
        assert_eq!(machine.i_reg(), 0x002);
    }

    #[test]
    fn test_reserved_memory_rejects_program_writes() {
        let mut machine = Machine::new();
        assert_eq!(
            machine.write_mem(0x1FF, 1),
            Err(MachineError::ReservedWrite(0x1FF))
        );
        assert!(machine.write_mem(0x200, 1).is_ok());
        // Reads below 0x200 stay legal (font lookups need them).
        assert_eq!(machine.read_mem(0x000).unwrap(), FONT[0]);
    }

    #[test]
    fn test_register_index_checked() {
        let mut machine = Machine::new();
        assert_eq!(machine.v(16), Err(MachineError::RegisterOutOfRange(16)));
        assert_eq!(
            machine.set_v(16, 0),
            Err(MachineError::RegisterOutOfRange(16))
        );
    }

    #[test]
    fn test_key_latch_records_transitions_only() {
        let mut machine = Machine::new();
        machine.arm_key_wait(4);
        assert_eq!(machine.key_latch(), None);

        machine.set_key(9, true).unwrap();
        assert_eq!(machine.key_latch(), Some(9));

        // Holding the key is not a new transition.
        machine.arm_key_wait(4);
        machine.set_key(9, true).unwrap();
        assert_eq!(machine.key_latch(), None);

        machine.set_key(9, false).unwrap();
        machine.set_key(9, true).unwrap();
        assert_eq!(machine.key_latch(), Some(9));
    }

    #[test]
    fn test_timers_floor_at_zero() {
        let mut machine = Machine::new();
        machine.set_dt(2);
        machine.set_st(1);
        machine.tick_timers();
        machine.tick_timers();
        machine.tick_timers();
        assert_eq!(machine.dt(), 0);
        assert_eq!(machine.st(), 0);
    }
}
