//! CP/M 2.2 BDOS disk emulation over a host directory tree.
//!
//! This crate lets unmodified CP/M programs use a plain directory tree as
//! their disks:
//! - BDOS (Basic Disk Operating System) syscall handling
//! - Host drive mapping: `<base>/<DRIVE>/<USER>/<NAME>.<TYP>`
//! - Console I/O abstraction
//!
//! # Architecture
//!
//! The emulator uses a layered design:
//! - `CpmName`, `DriveMap`: guest names and drive/user areas on the host
//! - `FileHandleCache`: the one open host file, with position tracking
//! - `DirectoryEnumerator`: wildcard search over synthesized directory entries
//! - `Bdos`: function-code dispatch over FCBs in guest memory
//! - `CpmEmulator`: Integrates Z80 CPU with BDOS handling

pub mod bdos;
pub mod config;
pub mod console;
pub mod drive;
pub mod emulator;
pub mod error;
pub mod memory;

pub use bdos::{Bdos, BdosContext, BdosOutcome, BdosRegs, DiskSessionState, Fcb};
pub use config::{DiskParams, EmulatorConfig};
pub use console::{CpmConsole, HeadlessConsole};
pub use drive::{CpmName, DirectoryEnumerator, DriveMap, FileHandleCache, HostDrive};
pub use emulator::CpmEmulator;
pub use error::{CpmError, CpmResult, DiskError};
pub use memory::{GuestMemory, MEMORY_SIZE};

/// Reason for program exit.
#[derive(Debug, Clone, PartialEq)]
pub enum ExitReason {
    /// Warm boot (JP 0 or BDOS function 0)
    WarmBoot,
    /// CPU halted
    Halt,
    /// Error occurred
    Error(String),
}

/// Information about program exit.
#[derive(Debug, Clone)]
pub struct CpmExitInfo {
    pub reason: ExitReason,
    pub t_states: u64,
    pub pc: u16,
}
