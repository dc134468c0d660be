//! BDOS (Basic Disk Operating System) implementation.
//!
//! This module handles CP/M 2.2 system calls. Each function code maps to a
//! handler through [`BdosFunction::handler`]; the [`Bdos`] dispatcher owns
//! the session state and the host drive and runs one call to completion.

mod chario;
pub mod dirent;
pub mod extent;
pub mod fcb;
mod files;

pub use dirent::DirEntry;
pub use extent::{SeqPosition, RECORD_SIZE};
pub use fcb::Fcb;

use crate::config::EmulatorConfig;
use crate::console::CpmConsole;
use crate::drive::{drive_letter, DriveMap, HostDrive, MAX_DRIVES};
use crate::error::CpmResult;
use crate::memory::GuestMemory;

/// CP/M 2.2 BDOS function numbers.
#[derive(Debug, Clone, Copy, PartialEq)]
#[repr(u8)]
pub enum BdosFunction {
    /// 0: System reset / warm boot
    SystemReset = 0,
    /// 1: Console input (blocking)
    ConsoleInput = 1,
    /// 2: Console output
    ConsoleOutput = 2,
    /// 3: Reader input
    ReaderInput = 3,
    /// 4: Punch output
    PunchOutput = 4,
    /// 5: List output
    ListOutput = 5,
    /// 6: Direct console I/O
    DirectConsoleIO = 6,
    /// 7: Get IOBYTE
    GetIOByte = 7,
    /// 8: Set IOBYTE
    SetIOByte = 8,
    /// 9: Print string ($ terminated)
    PrintString = 9,
    /// 10: Read console buffer
    ReadConsoleBuffer = 10,
    /// 11: Get console status
    ConsoleStatus = 11,
    /// 12: Return version number
    ReturnVersion = 12,
    /// 13: Reset disk system
    ResetDiskSystem = 13,
    /// 14: Select disk
    SelectDisk = 14,
    /// 15: Open file
    OpenFile = 15,
    /// 16: Close file
    CloseFile = 16,
    /// 17: Search for first
    SearchFirst = 17,
    /// 18: Search for next
    SearchNext = 18,
    /// 19: Delete file
    DeleteFile = 19,
    /// 20: Read sequential
    ReadSequential = 20,
    /// 21: Write sequential
    WriteSequential = 21,
    /// 22: Make file (create)
    MakeFile = 22,
    /// 23: Rename file
    RenameFile = 23,
    /// 24: Return login vector
    ReturnLoginVector = 24,
    /// 25: Return current disk
    ReturnCurrentDisk = 25,
    /// 26: Set DMA address
    SetDmaAddress = 26,
    /// 27: Get allocation vector
    GetAllocationVector = 27,
    /// 28: Write protect disk
    WriteProtectDisk = 28,
    /// 29: Get R/O vector
    GetReadOnlyVector = 29,
    /// 30: Set file attributes
    SetFileAttributes = 30,
    /// 31: Get disk parameters
    GetDiskParameters = 31,
    /// 32: Get/set user code
    UserCode = 32,
    /// 33: Read random
    ReadRandom = 33,
    /// 34: Write random
    WriteRandom = 34,
    /// 35: Compute file size
    ComputeFileSize = 35,
    /// 36: Set random record
    SetRandomRecord = 36,
    /// 37: Reset drive
    ResetDrive = 37,
    /// 40: Write random with zero fill
    WriteRandomZeroFill = 40,
}

impl TryFrom<u8> for BdosFunction {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::SystemReset),
            1 => Ok(Self::ConsoleInput),
            2 => Ok(Self::ConsoleOutput),
            3 => Ok(Self::ReaderInput),
            4 => Ok(Self::PunchOutput),
            5 => Ok(Self::ListOutput),
            6 => Ok(Self::DirectConsoleIO),
            7 => Ok(Self::GetIOByte),
            8 => Ok(Self::SetIOByte),
            9 => Ok(Self::PrintString),
            10 => Ok(Self::ReadConsoleBuffer),
            11 => Ok(Self::ConsoleStatus),
            12 => Ok(Self::ReturnVersion),
            13 => Ok(Self::ResetDiskSystem),
            14 => Ok(Self::SelectDisk),
            15 => Ok(Self::OpenFile),
            16 => Ok(Self::CloseFile),
            17 => Ok(Self::SearchFirst),
            18 => Ok(Self::SearchNext),
            19 => Ok(Self::DeleteFile),
            20 => Ok(Self::ReadSequential),
            21 => Ok(Self::WriteSequential),
            22 => Ok(Self::MakeFile),
            23 => Ok(Self::RenameFile),
            24 => Ok(Self::ReturnLoginVector),
            25 => Ok(Self::ReturnCurrentDisk),
            26 => Ok(Self::SetDmaAddress),
            27 => Ok(Self::GetAllocationVector),
            28 => Ok(Self::WriteProtectDisk),
            29 => Ok(Self::GetReadOnlyVector),
            30 => Ok(Self::SetFileAttributes),
            31 => Ok(Self::GetDiskParameters),
            32 => Ok(Self::UserCode),
            33 => Ok(Self::ReadRandom),
            34 => Ok(Self::WriteRandom),
            35 => Ok(Self::ComputeFileSize),
            36 => Ok(Self::SetRandomRecord),
            37 => Ok(Self::ResetDrive),
            40 => Ok(Self::WriteRandomZeroFill),
            _ => Err(value),
        }
    }
}

/// Handler signature shared by every function code.
pub type Handler = fn(&mut Bdos, &mut BdosContext<'_>) -> CallResult;

impl BdosFunction {
    /// Handler for this function code.
    pub fn handler(self) -> Handler {
        use BdosFunction::*;

        match self {
            SystemReset => |_, _| Err(BdosAbort::Reset),
            ConsoleInput => Bdos::console_input,
            ConsoleOutput => Bdos::console_output,
            ReaderInput => Bdos::reader_input,
            PunchOutput => |_, _| Ok(0),
            ListOutput => Bdos::list_output,
            DirectConsoleIO => Bdos::direct_console_io,
            GetIOByte => Bdos::get_iobyte,
            SetIOByte => Bdos::set_iobyte,
            PrintString => Bdos::print_string,
            ReadConsoleBuffer => Bdos::read_console_buffer,
            ConsoleStatus => Bdos::console_status,
            ReturnVersion => |_, _| Ok(VERSION),
            ResetDiskSystem => Bdos::reset_disk_system,
            SelectDisk => Bdos::select_disk,
            OpenFile => Bdos::open_file,
            CloseFile => Bdos::close_file,
            SearchFirst => Bdos::search_first,
            SearchNext => Bdos::search_next,
            DeleteFile => Bdos::delete_file,
            ReadSequential => Bdos::read_sequential,
            WriteSequential => Bdos::write_sequential,
            MakeFile => Bdos::make_file,
            RenameFile => Bdos::rename_file,
            ReturnLoginVector => |bdos, _| Ok(bdos.session.login_vector),
            ReturnCurrentDisk => |bdos, _| Ok(bdos.session.current_drive as u16),
            SetDmaAddress => Bdos::set_dma,
            GetAllocationVector => |_, _| Ok(addr::ALV),
            WriteProtectDisk => Bdos::write_protect_disk,
            GetReadOnlyVector => |bdos, _| Ok(bdos.session.ro_vector),
            SetFileAttributes => |_, _| Ok(0),
            GetDiskParameters => |_, _| Ok(addr::DPB),
            UserCode => Bdos::user_code,
            ReadRandom => Bdos::read_random,
            WriteRandom => Bdos::write_random,
            ComputeFileSize => Bdos::compute_file_size,
            SetRandomRecord => Bdos::set_random_record,
            ResetDrive => Bdos::reset_drive,
            WriteRandomZeroFill => Bdos::write_random_zero_fill,
        }
    }
}

/// Version number returned by function 12 (CP/M 2.2).
pub const VERSION: u16 = 0x0022;

/// Memory addresses for CP/M system.
pub mod addr {
    /// IOBYTE
    pub const IOBYTE: u16 = 0x0003;
    /// Current drive (low nibble) and user (high nibble)
    pub const CDISK: u16 = 0x0004;
    /// Transient Program Area - where .COM files load
    pub const TPA: u16 = 0x0100;
    /// Console Command Processor area
    pub const CCP: u16 = 0xDC00;
    /// Phoney allocation vector (512 bytes)
    pub const ALV: u16 = 0xFC00;
    /// BDOS entry point
    pub const BDOS: u16 = 0xFE00;
    /// CBIOS entry points
    pub const CBIOS: u16 = 0xFF00;
    /// Disk parameter block
    pub const DPB: u16 = 0xFF80;
    /// Default DMA buffer
    pub const DEFAULT_DMA: u16 = 0x0080;
    /// File Control Block 1
    pub const FCB1: u16 = 0x005C;
    /// File Control Block 2
    pub const FCB2: u16 = 0x006C;
    /// Command line tail
    pub const CMDLINE: u16 = 0x0080;
}

/// Per-session disk state shared by all BDOS calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskSessionState {
    /// Current drive (0 = A).
    pub current_drive: u8,
    /// Current user area (0..15).
    pub current_user: u8,
    /// Guest buffer for record transfers.
    pub dma: u16,
    /// Drives selected since the last disk reset.
    pub login_vector: u16,
    /// Write-protected drives.
    pub ro_vector: u16,
}

impl Default for DiskSessionState {
    fn default() -> Self {
        Self {
            current_drive: 0,
            current_user: 0,
            dma: addr::DEFAULT_DMA,
            login_vector: 0,
            ro_vector: 0,
        }
    }
}

impl DiskSessionState {
    pub fn is_read_only(&self, drive: u8) -> bool {
        self.ro_vector & (1 << (drive & 0x0F)) != 0
    }
}

/// Register values a BDOS call reads.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BdosRegs {
    /// Function code.
    pub c: u8,
    /// Byte parameter.
    pub e: u8,
    /// Word parameter (usually an FCB or buffer address).
    pub de: u16,
}

/// Everything a handler may touch besides the dispatcher itself.
pub struct BdosContext<'a> {
    pub mem: &'a mut dyn GuestMemory,
    pub console: &'a mut dyn CpmConsole,
    pub regs: BdosRegs,
}

/// Conditions that end the running program instead of returning to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BdosAbort {
    /// Function 0 or ^C at the start of a line.
    Reset,
    /// A drive with no host directory was selected.
    Select(u8),
}

/// Value for HL, or an abort.
pub type CallResult = Result<u16, BdosAbort>;

/// What the CPU should do once a call completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BdosOutcome {
    /// Return to the caller with HL set (A = L, B = H).
    Return(u16),
    /// Abandon the program and warm boot.
    WarmBoot,
}

/// A BDOS function implementation.
pub trait BdosCall {
    fn call(&self, bdos: &mut Bdos, ctx: &mut BdosContext<'_>) -> CallResult;
}

impl<F> BdosCall for F
where
    F: Fn(&mut Bdos, &mut BdosContext<'_>) -> CallResult,
{
    fn call(&self, bdos: &mut Bdos, ctx: &mut BdosContext<'_>) -> CallResult {
        self(bdos, ctx)
    }
}

/// The BDOS: session state plus the host drive.
pub struct Bdos {
    session: DiskSessionState,
    drive: HostDrive,
    boot_ro_vector: u16,
    batch_fcb: Option<u16>,
}

impl Bdos {
    pub fn new(config: &EmulatorConfig) -> CpmResult<Self> {
        config.validate()?;
        let boot_ro_vector = config.read_only_vector()?;
        Ok(Self {
            session: DiskSessionState {
                ro_vector: boot_ro_vector,
                ..DiskSessionState::default()
            },
            drive: HostDrive::new(&config.base_dir, config.dpb),
            boot_ro_vector,
            batch_fcb: config.batch_fcb,
        })
    }

    pub fn session(&self) -> &DiskSessionState {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut DiskSessionState {
        &mut self.session
    }

    pub fn drive(&self) -> &HostDrive {
        &self.drive
    }

    /// Close every cached host file and drop the active search.
    pub fn reset_files(&mut self) {
        self.drive.close_all();
    }

    /// Run one BDOS call.
    pub fn call(&mut self, ctx: &mut BdosContext<'_>) -> BdosOutcome {
        let regs = ctx.regs;
        log::trace!("BDOS function {} (E={:#04X}, DE={:#06X})", regs.c, regs.e, regs.de);

        let result = match BdosFunction::try_from(regs.c) {
            Ok(func) => BdosCall::call(&func.handler(), self, ctx),
            Err(code) => {
                log::debug!("unknown BDOS function {}", code);
                Ok(0)
            }
        };

        match result {
            Ok(hl) => BdosOutcome::Return(hl),
            Err(BdosAbort::Reset) => {
                self.reset_files();
                BdosOutcome::WarmBoot
            }
            Err(BdosAbort::Select(drive)) => {
                let letter = if drive < MAX_DRIVES { drive_letter(drive) } else { '?' };
                log::error!("select failed on drive {}:", letter);
                ctx.console
                    .write_str(&format!("\r\nBdos Err On {}: Select\r\n", letter));
                self.reset_files();
                self.session.current_drive = 0;
                self.update_cdisk(ctx);
                BdosOutcome::WarmBoot
            }
        }
    }

    /// Select the drive an FCB drive byte names, aborting if it is missing.
    fn select(&mut self, field: u8) -> Result<u8, BdosAbort> {
        let drive = DriveMap::resolve(field, self.session.current_drive)
            .map_err(|_| BdosAbort::Select(field.wrapping_sub(1)))?;
        self.select_index(drive)
    }

    /// Select a 0-based drive, aborting if it is out of range or missing.
    fn select_index(&mut self, drive: u8) -> Result<u8, BdosAbort> {
        if drive < MAX_DRIVES && self.drive.select(&mut self.session, drive) {
            Ok(drive)
        } else {
            Err(BdosAbort::Select(drive))
        }
    }

    fn update_cdisk(&self, ctx: &mut BdosContext<'_>) {
        let value = (self.session.current_user << 4) | (self.session.current_drive & 0x0F);
        ctx.mem.write_byte(addr::CDISK, value);
    }
}
