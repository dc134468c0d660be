//! Character I/O and session calls.

use super::{addr, Bdos, BdosAbort, BdosContext, CallResult};

/// Byte returned when the reader has nothing to give (^Z).
const READER_EOF: u16 = 0x1A;

const CTRL_C: u8 = 0x03;
const CTRL_E: u8 = 0x05;
const CTRL_U: u8 = 0x15;
const CTRL_X: u8 = 0x18;

impl Bdos {
    /// 1: wait for a key and echo it.
    pub(super) fn console_input(&mut self, ctx: &mut BdosContext<'_>) -> CallResult {
        let ch = ctx.console.wait_for_key();
        if ch >= 0x20 || matches!(ch, b'\r' | b'\n' | 0x08 | b'\t') {
            ctx.console.write(ch);
        }
        Ok(ch as u16)
    }

    pub(super) fn console_output(&mut self, ctx: &mut BdosContext<'_>) -> CallResult {
        ctx.console.write(ctx.regs.e);
        Ok(0)
    }

    pub(super) fn reader_input(&mut self, _ctx: &mut BdosContext<'_>) -> CallResult {
        Ok(READER_EOF)
    }

    pub(super) fn list_output(&mut self, ctx: &mut BdosContext<'_>) -> CallResult {
        ctx.console.print(ctx.regs.e);
        Ok(0)
    }

    /// 6: E=FF polls for input, FE reports status, FD waits, anything else
    /// is written out.
    pub(super) fn direct_console_io(&mut self, ctx: &mut BdosContext<'_>) -> CallResult {
        let value = match ctx.regs.e {
            0xFF => ctx.console.get_key().unwrap_or(0),
            0xFE => {
                if ctx.console.has_key() {
                    0xFF
                } else {
                    0
                }
            }
            0xFD => ctx.console.wait_for_key(),
            ch => {
                ctx.console.write(ch);
                0
            }
        };
        Ok(value as u16)
    }

    pub(super) fn get_iobyte(&mut self, ctx: &mut BdosContext<'_>) -> CallResult {
        Ok(ctx.mem.read_byte(addr::IOBYTE) as u16)
    }

    pub(super) fn set_iobyte(&mut self, ctx: &mut BdosContext<'_>) -> CallResult {
        ctx.mem.write_byte(addr::IOBYTE, ctx.regs.e);
        Ok(0)
    }

    /// 9: print the `$`-terminated string at DE.
    pub(super) fn print_string(&mut self, ctx: &mut BdosContext<'_>) -> CallResult {
        let mut at = ctx.regs.de;
        // Bounded so a missing terminator cannot spin forever.
        for _ in 0..0x10000 {
            let ch = ctx.mem.read_byte(at);
            if ch == b'$' {
                break;
            }
            ctx.console.write(ch);
            at = at.wrapping_add(1);
        }
        Ok(0)
    }

    /// 10: read an edited line into the buffer at DE.
    ///
    /// DE[0] = capacity, DE[1] = length read, DE[2..] = characters.
    pub(super) fn read_console_buffer(&mut self, ctx: &mut BdosContext<'_>) -> CallResult {
        let buf = ctx.regs.de;
        let max_len = ctx.mem.read_byte(buf) as u16;
        let mut len: u16 = 0;

        while len < max_len {
            let ch = ctx.console.wait_for_key();
            match ch {
                b'\r' | b'\n' => break,
                CTRL_C if len == 0 => {
                    ctx.console.write(b'^');
                    ctx.console.write(b'C');
                    return Err(BdosAbort::Reset);
                }
                CTRL_E => {
                    ctx.console.write(b'\r');
                    ctx.console.write(b'\n');
                }
                0x08 | 0x7F => {
                    if len > 0 {
                        len -= 1;
                        erase(ctx, 1);
                    }
                }
                CTRL_U | CTRL_X => {
                    erase(ctx, len);
                    len = 0;
                }
                0x20..=0x7E => {
                    ctx.mem.write_byte(buf.wrapping_add(2 + len), ch);
                    ctx.console.write(ch);
                    len += 1;
                }
                _ => {}
            }
        }

        ctx.mem.write_byte(buf.wrapping_add(1), len as u8);
        ctx.console.write(b'\r');
        Ok(len)
    }

    pub(super) fn console_status(&mut self, ctx: &mut BdosContext<'_>) -> CallResult {
        Ok(if ctx.console.has_key() { 0xFF } else { 0 })
    }

    /// 13: back to boot state. Returns FF when a batch file is waiting.
    pub(super) fn reset_disk_system(&mut self, ctx: &mut BdosContext<'_>) -> CallResult {
        self.drive.close_all();
        self.session.login_vector = 0;
        self.session.ro_vector = self.boot_ro_vector;
        self.session.current_drive = 0;
        self.session.dma = addr::DEFAULT_DMA;
        self.update_cdisk(ctx);

        if !self.drive.select(&mut self.session, 0) {
            log::warn!("drive A: has no host directory");
            return Ok(0);
        }
        if self.drive.has_batch_file(0, self.session.current_user) {
            Ok(0xFF)
        } else {
            Ok(0)
        }
    }

    pub(super) fn select_disk(&mut self, ctx: &mut BdosContext<'_>) -> CallResult {
        let drive = self.select_index(ctx.regs.e)?;
        self.session.current_drive = drive;
        self.update_cdisk(ctx);
        Ok(0)
    }

    pub(super) fn set_dma(&mut self, ctx: &mut BdosContext<'_>) -> CallResult {
        self.session.dma = ctx.regs.de;
        Ok(0)
    }

    /// 28: write-protect the current drive until the next disk reset.
    pub(super) fn write_protect_disk(&mut self, _ctx: &mut BdosContext<'_>) -> CallResult {
        self.session.ro_vector |= 1 << self.session.current_drive;
        Ok(0)
    }

    /// 32: E=FF returns the user number, otherwise sets it.
    pub(super) fn user_code(&mut self, ctx: &mut BdosContext<'_>) -> CallResult {
        if ctx.regs.e == 0xFF {
            return Ok(self.session.current_user as u16);
        }
        let user = ctx.regs.e & 0x0F;
        self.session.current_user = user;
        self.update_cdisk(ctx);
        if let Err(e) = self.drive.make_user_dir(self.session.current_drive, user) {
            log::warn!("cannot create user area {}: {}", user, e);
        }
        Ok(0)
    }

    /// 37: log out and unprotect the drives set in DE.
    pub(super) fn reset_drive(&mut self, ctx: &mut BdosContext<'_>) -> CallResult {
        let mask = ctx.regs.de;
        self.session.login_vector &= !mask;
        self.session.ro_vector &= !mask;
        self.drive.close_all();
        Ok(0)
    }
}

fn erase(ctx: &mut BdosContext<'_>, count: u16) {
    for _ in 0..count {
        ctx.console.write(0x08);
        ctx.console.write(b' ');
        ctx.console.write(0x08);
    }
}

#[cfg(test)]
mod tests {
    use crate::bdos::{Bdos, BdosContext, BdosOutcome, BdosRegs};
    use crate::config::EmulatorConfig;
    use crate::console::HeadlessConsole;
    use crate::memory::{GuestMemory, MEMORY_SIZE};

    fn bdos() -> Bdos {
        let base = std::env::temp_dir().join("cpmsd_chario_tests");
        std::fs::create_dir_all(base.join("A").join("0")).unwrap();
        Bdos::new(&EmulatorConfig::with_base(base)).unwrap()
    }

    fn call(
        bdos: &mut Bdos,
        mem: &mut [u8; MEMORY_SIZE],
        console: &mut HeadlessConsole,
        c: u8,
        de: u16,
    ) -> BdosOutcome {
        let mut ctx = BdosContext {
            mem,
            console,
            regs: BdosRegs { c, e: de as u8, de },
        };
        bdos.call(&mut ctx)
    }

    #[test]
    fn test_print_string() {
        let mut bdos = bdos();
        let mut mem = Box::new([0u8; MEMORY_SIZE]);
        let mut console = HeadlessConsole::new();
        mem.write_block(0x0200, b"Hello, CP/M!$ignored");

        call(&mut bdos, &mut mem, &mut console, 9, 0x0200);
        assert_eq!(console.output_string(), "Hello, CP/M!");
    }

    #[test]
    fn test_read_console_buffer_edits() {
        let mut bdos = bdos();
        let mut mem = Box::new([0u8; MEMORY_SIZE]);
        let mut console = HeadlessConsole::with_input(b"DIX\x08R\r");
        mem[0x0300] = 20;

        let outcome = call(&mut bdos, &mut mem, &mut console, 10, 0x0300);
        assert_eq!(outcome, BdosOutcome::Return(3));
        assert_eq!(mem[0x0301], 3);
        assert_eq!(&mem[0x0302..0x0305], b"DIR");
    }

    #[test]
    fn test_read_console_buffer_stops_at_capacity() {
        let mut bdos = bdos();
        let mut mem = Box::new([0u8; MEMORY_SIZE]);
        let mut console = HeadlessConsole::with_input(b"ABCDEF\r");
        mem[0x0300] = 4;

        call(&mut bdos, &mut mem, &mut console, 10, 0x0300);
        assert_eq!(mem[0x0301], 4);
        assert_eq!(&mem[0x0302..0x0306], b"ABCD");
    }

    #[test]
    fn test_ctrl_c_on_empty_line_warm_boots() {
        let mut bdos = bdos();
        let mut mem = Box::new([0u8; MEMORY_SIZE]);
        let mut console = HeadlessConsole::with_input(b"\x03");
        mem[0x0300] = 10;

        let outcome = call(&mut bdos, &mut mem, &mut console, 10, 0x0300);
        assert_eq!(outcome, BdosOutcome::WarmBoot);
    }

    #[test]
    fn test_direct_console_io() {
        let mut bdos = bdos();
        let mut mem = Box::new([0u8; MEMORY_SIZE]);
        let mut console = HeadlessConsole::with_input(b"k");

        assert_eq!(call(&mut bdos, &mut mem, &mut console, 6, 0xFE), BdosOutcome::Return(0xFF));
        assert_eq!(call(&mut bdos, &mut mem, &mut console, 6, 0xFF), BdosOutcome::Return(b'k' as u16));
        assert_eq!(call(&mut bdos, &mut mem, &mut console, 6, 0xFF), BdosOutcome::Return(0));
        call(&mut bdos, &mut mem, &mut console, 6, b'Z' as u16);
        assert_eq!(console.output_string(), "Z");
    }

    #[test]
    fn test_iobyte() {
        let mut bdos = bdos();
        let mut mem = Box::new([0u8; MEMORY_SIZE]);
        let mut console = HeadlessConsole::new();

        call(&mut bdos, &mut mem, &mut console, 8, 0x3D);
        assert_eq!(call(&mut bdos, &mut mem, &mut console, 7, 0), BdosOutcome::Return(0x3D));
        assert_eq!(call(&mut bdos, &mut mem, &mut console, 3, 0), BdosOutcome::Return(0x1A));
    }

    #[test]
    fn test_list_output_goes_to_list_device() {
        let mut bdos = bdos();
        let mut mem = Box::new([0u8; MEMORY_SIZE]);
        let mut console = HeadlessConsole::new();

        call(&mut bdos, &mut mem, &mut console, 5, b'L' as u16);
        assert_eq!(console.list_output(), b"L");
        assert!(console.output().is_empty());
    }

    #[test]
    fn test_select_disk_rejects_codes_past_p() {
        let mut bdos = bdos();
        let mut mem = Box::new([0u8; MEMORY_SIZE]);
        let mut console = HeadlessConsole::new();

        assert_eq!(call(&mut bdos, &mut mem, &mut console, 14, 0xFF), BdosOutcome::WarmBoot);
        assert_eq!(call(&mut bdos, &mut mem, &mut console, 14, 0x3E), BdosOutcome::WarmBoot);
        assert_eq!(console.output_string().matches("Bdos Err On ?: Select").count(), 2);
        assert_eq!(call(&mut bdos, &mut mem, &mut console, 14, 0), BdosOutcome::Return(0));
    }
}
