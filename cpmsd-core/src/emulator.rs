//! CP/M Emulator - integrates Z80 CPU with BDOS handling.

use std::num::NonZeroU16;

use z80emu::host::TsCounter;
use z80emu::{Clock, Cpu, Io, Memory, Reg8, StkReg16, Z80NMOS};

use crate::bdos::{addr, Bdos, BdosContext, BdosOutcome, BdosRegs, Fcb};
use crate::config::{DiskParams, EmulatorConfig};
use crate::console::CpmConsole;
use crate::error::CpmResult;
use crate::memory::{GuestMemory, MEMORY_SIZE};
use crate::{CpmExitInfo, ExitReason};

/// Type alias for the clock.
type TsClock = TsCounter<i32>;

/// IOBYTE after a cold start: CON:=CRT:, RDR:=PTR:, PUN:=PTP:, LST:=LPT:.
const DEFAULT_IOBYTE: u8 = 0x3D;

/// Size of the phoney allocation vector area.
const ALV_AREA: usize = 0x0200;

/// Number of CBIOS jump table entries.
const CBIOS_ENTRIES: u16 = 17;

/// CP/M Emulator bus - memory only; I/O ports float.
struct Bus<'a> {
    memory: &'a mut [u8; MEMORY_SIZE],
}

impl Memory for Bus<'_> {
    type Timestamp = i32;

    fn read_debug(&self, addr: u16) -> u8 {
        self.memory[addr as usize]
    }

    fn read_mem(&self, addr: u16, _ts: Self::Timestamp) -> u8 {
        self.memory[addr as usize]
    }

    fn write_mem(&mut self, addr: u16, value: u8, _ts: Self::Timestamp) {
        self.memory[addr as usize] = value;
    }
}

impl Io for Bus<'_> {
    type Timestamp = i32;
    type WrIoBreak = ();
    type RetiBreak = ();

    fn read_io(&mut self, _port: u16, _ts: Self::Timestamp) -> (u8, Option<NonZeroU16>) {
        (0xFF, None)
    }

    fn write_io(
        &mut self,
        _port: u16,
        _value: u8,
        _ts: Self::Timestamp,
    ) -> (Option<Self::WrIoBreak>, Option<NonZeroU16>) {
        (None, None)
    }
}

/// CP/M Emulator state.
pub struct CpmEmulator<C: CpmConsole> {
    /// Z80 CPU.
    cpu: Z80NMOS,
    /// Clock/T-state counter.
    clock: TsClock,
    /// 64KB memory.
    memory: Box<[u8; MEMORY_SIZE]>,
    /// Console for I/O.
    console: C,
    /// Disk system.
    bdos: Bdos,
    /// Geometry reported through function 31.
    dpb: DiskParams,
    /// Shell binary for warm boot reload.
    shell_binary: Option<Vec<u8>>,
    /// Shell load address.
    shell_address: u16,
}

impl<C: CpmConsole> CpmEmulator<C> {
    /// Create an emulator over the drive tree described by `config`.
    ///
    /// Loads the configured CCP, if any, as the warm boot shell.
    pub fn new(console: C, config: &EmulatorConfig) -> CpmResult<Self> {
        let mut emu = Self {
            cpu: Z80NMOS::default(),
            clock: TsClock::default(),
            memory: Box::new([0; MEMORY_SIZE]),
            console,
            bdos: Bdos::new(config)?,
            dpb: config.dpb,
            shell_binary: None,
            shell_address: config.ccp_address,
        };
        emu.memory[addr::IOBYTE as usize] = DEFAULT_IOBYTE;
        emu.init_memory();

        if let Some(path) = &config.ccp {
            let shell = std::fs::read(path)?;
            log::debug!("loaded CCP {} ({} bytes)", path.display(), shell.len());
            emu.set_shell(&shell, config.ccp_address);
        }
        Ok(emu)
    }

    /// Initialize memory with CP/M system vectors and disk tables.
    fn init_memory(&mut self) {
        let mem = &mut *self.memory;

        // JP to the CBIOS warm boot entry at 0x0000
        mem.write_byte(0x0000, 0xC3);
        mem.write_word(0x0001, addr::CBIOS + 3);

        // Current drive/user at 0x0004
        let session = self.bdos.session();
        mem.write_byte(
            addr::CDISK,
            (session.current_user << 4) | (session.current_drive & 0x0F),
        );

        // JP BDOS at 0x0005
        mem.write_byte(0x0005, 0xC3);
        mem.write_word(0x0006, addr::BDOS);

        // BDOS entry - RET (we intercept before this)
        mem.write_byte(addr::BDOS, 0xC9);

        // CBIOS entry points - all RET
        for i in 0..CBIOS_ENTRIES {
            mem.write_byte(addr::CBIOS + i * 3, 0xC9);
        }

        mem.write_block(addr::DPB, &self.dpb.to_bytes());

        // Directory blocks are the only allocated ones.
        let mut alv = vec![0u8; self.dpb.alv_size().min(ALV_AREA)];
        if let Some(first) = alv.first_mut() {
            *first = self.dpb.al0;
        }
        if let Some(second) = alv.get_mut(1) {
            *second = self.dpb.al1;
        }
        mem.write_block(addr::ALV, &alv);
    }

    /// Get console reference.
    pub fn console(&self) -> &C {
        &self.console
    }

    /// Get mutable console reference.
    pub fn console_mut(&mut self) -> &mut C {
        &mut self.console
    }

    pub fn bdos(&self) -> &Bdos {
        &self.bdos
    }

    pub fn bdos_mut(&mut self) -> &mut Bdos {
        &mut self.bdos
    }

    /// Guest memory.
    pub fn memory(&self) -> &[u8; MEMORY_SIZE] {
        &self.memory
    }

    pub fn memory_mut(&mut self) -> &mut [u8; MEMORY_SIZE] {
        &mut self.memory
    }

    /// Load a COM file into memory at TPA (0x0100).
    pub fn load_com(&mut self, data: &[u8]) {
        self.load_at(addr::TPA, data);
    }

    /// Load binary data into memory at a specific address.
    pub fn load_at(&mut self, address: u16, data: &[u8]) {
        let start = address as usize;
        let end = (start + data.len()).min(MEMORY_SIZE);
        self.memory[start..end].copy_from_slice(&data[..end - start]);
    }

    /// Set the shell binary for warm boot reload.
    /// When a program exits via warm boot, the shell will be reloaded and execution continues.
    pub fn set_shell(&mut self, data: &[u8], address: u16) {
        self.shell_binary = Some(data.to_vec());
        self.shell_address = address;
        self.load_at(address, data);
    }

    /// Set the program counter (where execution starts).
    pub fn set_pc(&mut self, address: u16) {
        self.cpu.set_pc(address);
    }

    /// Set command line arguments.
    ///
    /// The tail goes to 0x0080 (length byte + text) and the first two
    /// words are parsed into the default FCBs at 0x005C and 0x006C.
    pub fn set_args(&mut self, args: &str) {
        let args_upper = args.trim().to_uppercase();
        let tail = if args_upper.is_empty() {
            String::new()
        } else {
            format!(" {}", args_upper)
        };
        let bytes = tail.as_bytes();
        let len = bytes.len().min(127);

        let mem = &mut *self.memory;
        mem.write_byte(addr::CMDLINE, len as u8);
        mem.write_block(addr::CMDLINE + 1, &bytes[..len]);

        let mut words = args_upper.split_whitespace();
        let fcb1 = words.next().map(Fcb::parse).unwrap_or_default();
        let fcb2 = words.next().map(Fcb::parse).unwrap_or_default();
        fcb1.write_to(&mut *mem, addr::FCB1);
        // The second FCB only gets its first 16 bytes; the rest is FCB1's tail.
        mem.write_block(addr::FCB2, &fcb2.to_bytes()[..16]);
    }

    /// Run until program exits, starting at TPA (0x0100).
    pub fn run(&mut self) -> CpmResult<CpmExitInfo> {
        self.run_from(addr::TPA)
    }

    /// Run until program exits, starting at the specified address.
    /// If a shell is set, warm boot reloads the shell and continues.
    /// Otherwise, warm boot exits.
    pub fn run_from(&mut self, start_address: u16) -> CpmResult<CpmExitInfo> {
        self.cpu.reset();
        self.cpu.set_pc(start_address);

        // Set SP to just below BDOS
        self.cpu.set_sp(addr::BDOS - 2);

        loop {
            let pc = self.cpu.get_pc();

            // Check for BDOS/CBIOS intercept BEFORE executing
            let exit = match pc {
                addr::BDOS => Some(self.handle_bdos()),
                _ if pc >= addr::CBIOS => Some(self.handle_cbios()),
                0x0000 => Some(Some(self.exit_info(ExitReason::WarmBoot))),
                _ => None,
            };

            match exit {
                Some(Some(info)) => {
                    if info.reason == ExitReason::WarmBoot && self.shell_binary.is_some() {
                        self.warm_boot_reload();
                        continue;
                    }
                    self.bdos.reset_files();
                    return Ok(info);
                }
                Some(None) => {
                    // Return from BDOS/CBIOS call
                    let ret_addr = self.pop16();
                    self.cpu.set_pc(ret_addr);
                    continue;
                }
                None => {}
            }

            let mut bus = Bus {
                memory: &mut self.memory,
            };
            let _result =
                self.cpu
                    .execute_next(&mut bus, &mut self.clock, None::<fn(z80emu::CpuDebug)>);

            if self.cpu.is_halt() {
                self.bdos.reset_files();
                return Ok(self.exit_info(ExitReason::Halt));
            }
        }
    }

    fn exit_info(&self, reason: ExitReason) -> CpmExitInfo {
        CpmExitInfo {
            reason,
            t_states: self.clock.as_timestamp() as u64,
            pc: self.cpu.get_pc(),
        }
    }

    /// Reload shell after warm boot.
    fn warm_boot_reload(&mut self) {
        log::debug!("warm boot");
        self.bdos.reset_files();
        self.bdos.session_mut().dma = addr::DEFAULT_DMA;

        if let Some(shell) = self.shell_binary.take() {
            self.load_at(self.shell_address, &shell);
            self.shell_binary = Some(shell);
        }
        self.init_memory();

        self.cpu.reset();
        self.cpu.set_pc(self.shell_address);
        self.cpu.set_sp(addr::BDOS - 2);

        // Clear command line
        self.memory[addr::CMDLINE as usize] = 0;
    }

    /// Pop 16-bit value from stack.
    fn pop16(&mut self) -> u16 {
        let sp = self.cpu.get_sp();
        let value = self.memory.read_word(sp);
        self.cpu.set_sp(sp.wrapping_add(2));
        value
    }

    /// Handle BDOS call. Returns Some(exit_info) if program should exit.
    fn handle_bdos(&mut self) -> Option<CpmExitInfo> {
        let e = self.cpu.get_reg(Reg8::E, None);
        let regs = BdosRegs {
            c: self.cpu.get_reg(Reg8::C, None),
            e,
            de: self.cpu.get_reg16(StkReg16::DE),
        };

        let mut ctx = BdosContext {
            mem: &mut *self.memory,
            console: &mut self.console,
            regs,
        };
        match self.bdos.call(&mut ctx) {
            BdosOutcome::Return(hl) => {
                self.cpu.set_reg16(StkReg16::HL, hl);
                self.cpu.set_reg(Reg8::A, None, hl as u8);
                self.cpu.set_reg(Reg8::B, None, (hl >> 8) as u8);
                self.cpu.set_reg(Reg8::C, None, e);
                None
            }
            BdosOutcome::WarmBoot => Some(self.exit_info(ExitReason::WarmBoot)),
        }
    }

    /// Handle CBIOS call.
    fn handle_cbios(&mut self) -> Option<CpmExitInfo> {
        let pc = self.cpu.get_pc();
        let func = (pc - addr::CBIOS) / 3;
        log::trace!("CBIOS function {}", func);

        match func {
            0 | 1 => {
                // BOOT/WBOOT
                return Some(self.exit_info(ExitReason::WarmBoot));
            }
            2 => {
                // CONST - console status
                let status = if self.console.has_key() { 0xFF } else { 0 };
                self.cpu.set_reg(Reg8::A, None, status);
            }
            3 => {
                // CONIN - console input
                let ch = self.console.wait_for_key();
                self.cpu.set_reg(Reg8::A, None, ch);
            }
            4 => {
                // CONOUT - console output
                let c = self.cpu.get_reg(Reg8::C, None);
                self.console.write(c);
            }
            5 => {
                // LIST
                let c = self.cpu.get_reg(Reg8::C, None);
                self.console.print(c);
            }
            7 => {
                // READER
                self.cpu.set_reg(Reg8::A, None, 0x1A);
            }
            _ => {}
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::console::HeadlessConsole;

    fn temp_config(name: &str) -> EmulatorConfig {
        let base = std::env::temp_dir().join("cpmsd_emulator_tests").join(name);
        let _ = std::fs::remove_dir_all(&base);
        std::fs::create_dir_all(base.join("A").join("0")).unwrap();
        EmulatorConfig::with_base(base)
    }

    #[test]
    fn test_emulator_creation() {
        let emu = CpmEmulator::new(HeadlessConsole::new(), &temp_config("create")).unwrap();
        let mem = emu.memory();

        // Check BDOS vector at 0x0005
        assert_eq!(mem[0x0005], 0xC3); // JP
        assert_eq!(mem[0x0006], 0x00); // Low byte of BDOS
        assert_eq!(mem[0x0007], 0xFE); // High byte of BDOS

        assert_eq!(mem[addr::IOBYTE as usize], DEFAULT_IOBYTE);
        assert_eq!(mem[addr::DPB as usize], 64); // SPT low byte
        assert_eq!(mem[addr::ALV as usize], 0xFF);
    }

    #[test]
    fn test_hello_world() {
        // Simple program: LD C,2; LD E,'H'; CALL 5; JP 0
        let program = [
            0x0E, 0x02, // LD C, 2 (console output)
            0x1E, b'H', // LD E, 'H'
            0xCD, 0x05, 0x00, // CALL 0x0005 (BDOS)
            0x1E, b'i', // LD E, 'i'
            0xCD, 0x05, 0x00, // CALL 0x0005
            0xC3, 0x00, 0x00, // JP 0x0000 (warm boot)
        ];

        let mut emu = CpmEmulator::new(HeadlessConsole::new(), &temp_config("hello")).unwrap();
        emu.load_com(&program);

        let result = emu.run().unwrap();

        assert_eq!(result.reason, ExitReason::WarmBoot);
        assert_eq!(emu.console().output_string(), "Hi");
    }

    #[test]
    fn test_set_args_fills_fcbs() {
        let mut emu = CpmEmulator::new(HeadlessConsole::new(), &temp_config("args")).unwrap();
        emu.set_args("b:input.txt out.*");
        let mem = emu.memory();

        assert_eq!(mem[0x80] as usize, " B:INPUT.TXT OUT.*".len());
        assert_eq!(&mem[0x81..0x8D], b" B:INPUT.TXT");
        assert_eq!(mem[0x5C], 2);
        assert_eq!(&mem[0x5D..0x68], b"INPUT   TXT");
        assert_eq!(mem[0x6C], 0);
        assert_eq!(&mem[0x6D..0x78], b"OUT     ???");
    }
}
