//! File calls: everything that takes an FCB.

use std::path::PathBuf;

use super::extent::{records_for, records_in_extent, SeqPosition, MAX_RECORDS, RECORD_SIZE};
use super::fcb::{Fcb, DRIVE_WILDCARD, S2_UNMODIFIED};
use super::{Bdos, BdosContext, CallResult};
use crate::drive::{CpmName, Record, SearchMatch, UserScope, SENTINEL};
use crate::error::{status, DiskError};

/// Offset of the new name in a rename FCB.
const RENAME_OFFSET: u16 = 16;

/// Sequential or random addressing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Access {
    Sequential,
    Random,
}

impl Bdos {
    pub(super) fn open_file(&mut self, ctx: &mut BdosContext<'_>) -> CallResult {
        let mut fcb = Fcb::read_from(&*ctx.mem, ctx.regs.de);
        let drive = self.select(fcb.drive)?;
        let user = self.session.current_user;
        let Ok(name) = legal_name(&fcb, true) else {
            return Ok(status::NOT_FOUND as u16);
        };

        let path = if name.is_ambiguous() {
            match self.drive.find_first(drive, UserScope::One(user), &name) {
                Some(found) => {
                    fcb.set_file_name(&found.entry.name);
                    found.path
                }
                None => return Ok(status::NOT_FOUND as u16),
            }
        } else {
            self.drive.path(drive, user, &name)
        };

        let Some(size) = self.drive.file_size(&path) else {
            log::debug!("open: {} not found", path.display());
            return Ok(status::NOT_FOUND as u16);
        };

        fcb.ex = 0;
        fcb.s1 = 0;
        fcb.s2 = S2_UNMODIFIED;
        fcb.rc = records_in_extent(size, 0);
        fcb.al = [0; 16];
        fcb.write_to(&mut *ctx.mem, ctx.regs.de);
        Ok(status::OK as u16)
    }

    pub(super) fn close_file(&mut self, ctx: &mut BdosContext<'_>) -> CallResult {
        let fcb = Fcb::read_from(&*ctx.mem, ctx.regs.de);
        let drive = self.select(fcb.drive)?;
        if fcb.is_unmodified() {
            return Ok(status::OK as u16);
        }
        if self.session.is_read_only(drive) {
            return Ok(status::READ_ONLY as u16);
        }

        let path = match self.fcb_path(drive, &fcb) {
            Ok(path) => path,
            Err(e) => return Ok(e.code() as u16),
        };
        if self.drive.file_size(&path).is_none() {
            return Ok(status::NOT_FOUND as u16);
        }
        if self.batch_fcb == Some(ctx.regs.de) {
            let records = fcb.extent_number() * 128 + fcb.rc as u32;
            if let Err(e) = self.drive.truncate(&path, records) {
                return Ok(e.code() as u16);
            }
        }
        self.drive.close(&path);
        Ok(status::OK as u16)
    }

    pub(super) fn search_first(&mut self, ctx: &mut BdosContext<'_>) -> CallResult {
        let fcb = Fcb::read_from(&*ctx.mem, ctx.regs.de);
        let found = if fcb.drive == DRIVE_WILDCARD {
            let drive = self.select(0)?;
            self.drive.find_first(drive, UserScope::All, &CpmName::ALL)
        } else {
            let drive = self.select(fcb.drive)?;
            let user = self.session.current_user;
            match legal_name(&fcb, true) {
                Ok(pattern) => self.drive.find_first(drive, UserScope::One(user), &pattern),
                Err(_) => None,
            }
        };
        Ok(self.report_match(ctx, found))
    }

    pub(super) fn search_next(&mut self, ctx: &mut BdosContext<'_>) -> CallResult {
        let found = self.drive.find_next();
        Ok(self.report_match(ctx, found))
    }

    /// 19: remove every match. Succeeds even when nothing matched.
    pub(super) fn delete_file(&mut self, ctx: &mut BdosContext<'_>) -> CallResult {
        let fcb = Fcb::read_from(&*ctx.mem, ctx.regs.de);
        let drive = self.select(fcb.drive)?;
        if self.session.is_read_only(drive) {
            return Ok(status::READ_ONLY as u16);
        }
        let user = self.session.current_user;
        let Ok(pattern) = legal_name(&fcb, true) else {
            return Ok(status::NOT_FOUND as u16);
        };
        for path in self.drive.matching_files(drive, UserScope::One(user), &pattern) {
            if self.drive.remove(&path).is_ok() {
                log::debug!("deleted {}", path.display());
            }
        }
        Ok(status::OK as u16)
    }

    pub(super) fn read_sequential(&mut self, ctx: &mut BdosContext<'_>) -> CallResult {
        self.read_record(ctx, Access::Sequential)
    }

    pub(super) fn write_sequential(&mut self, ctx: &mut BdosContext<'_>) -> CallResult {
        self.write_record(ctx, Access::Sequential, SENTINEL)
    }

    /// 22: create a file, or empty an existing one when EX/S2 name extent 0.
    pub(super) fn make_file(&mut self, ctx: &mut BdosContext<'_>) -> CallResult {
        let mut fcb = Fcb::read_from(&*ctx.mem, ctx.regs.de);
        let drive = self.select(fcb.drive)?;
        if self.session.is_read_only(drive) {
            return Ok(status::READ_ONLY as u16);
        }
        let user = self.session.current_user;
        if let Err(e) = self.drive.make_user_dir(drive, user) {
            log::warn!("cannot create user area {}: {}", user, e);
        }

        let Ok(name) = legal_name(&fcb, false) else {
            return Ok(status::NOT_FOUND as u16);
        };
        let path = self.drive.path(drive, user, &name);
        if self.drive.create(&path, fcb.extent_number() == 0).is_err() {
            return Ok(status::NOT_FOUND as u16);
        }

        fcb.s1 = 0;
        fcb.s2 = S2_UNMODIFIED | fcb.module();
        fcb.rc = 0;
        fcb.al = [0; 16];
        fcb.write_to(&mut *ctx.mem, ctx.regs.de);
        Ok(status::OK as u16)
    }

    /// 23: old name at DE, new name at DE+16, same drive.
    pub(super) fn rename_file(&mut self, ctx: &mut BdosContext<'_>) -> CallResult {
        let old = Fcb::read_from(&*ctx.mem, ctx.regs.de);
        let new = Fcb::read_from(&*ctx.mem, ctx.regs.de.wrapping_add(RENAME_OFFSET));
        let drive = self.select(old.drive)?;
        if new.drive != 0 && new.drive != old.drive {
            return Ok(status::NOT_FOUND as u16);
        }
        if self.session.is_read_only(drive) {
            return Ok(status::READ_ONLY as u16);
        }

        let (from, to) = match (self.fcb_path(drive, &old), self.fcb_path(drive, &new)) {
            (Ok(from), Ok(to)) => (from, to),
            (Err(e), _) | (_, Err(e)) => return Ok(e.code() as u16),
        };
        match self.drive.rename(&from, &to) {
            Ok(()) => Ok(status::OK as u16),
            Err(e) => Ok(e.code() as u16),
        }
    }

    pub(super) fn read_random(&mut self, ctx: &mut BdosContext<'_>) -> CallResult {
        self.read_record(ctx, Access::Random)
    }

    pub(super) fn write_random(&mut self, ctx: &mut BdosContext<'_>) -> CallResult {
        self.write_record(ctx, Access::Random, SENTINEL)
    }

    pub(super) fn write_random_zero_fill(&mut self, ctx: &mut BdosContext<'_>) -> CallResult {
        self.write_record(ctx, Access::Random, 0)
    }

    /// 35: set R0..R2 to the file size in records.
    pub(super) fn compute_file_size(&mut self, ctx: &mut BdosContext<'_>) -> CallResult {
        let mut fcb = Fcb::read_from(&*ctx.mem, ctx.regs.de);
        let drive = self.select(fcb.drive)?;
        let Ok(path) = self.fcb_path(drive, &fcb) else {
            return Ok(status::NOT_FOUND as u16);
        };
        let Some(size) = self.drive.file_size(&path) else {
            return Ok(status::NOT_FOUND as u16);
        };
        fcb.set_random_record(records_for(size).min(MAX_RECORDS));
        fcb.write_to(&mut *ctx.mem, ctx.regs.de);
        Ok(status::OK as u16)
    }

    /// 36: set R0..R2 from the sequential position.
    pub(super) fn set_random_record(&mut self, ctx: &mut BdosContext<'_>) -> CallResult {
        let mut fcb = Fcb::read_from(&*ctx.mem, ctx.regs.de);
        let record = match fcb.seq_position() {
            Ok(pos) => pos.record(),
            Err(e) => return Ok(e.code() as u16),
        };
        fcb.set_random_record(record);
        fcb.write_to(&mut *ctx.mem, ctx.regs.de);
        Ok(status::OK as u16)
    }

    /// Host path of the unambiguous file an FCB names.
    fn fcb_path(&self, drive: u8, fcb: &Fcb) -> Result<PathBuf, DiskError> {
        let name = legal_name(fcb, false)?;
        Ok(self.drive.path(drive, self.session.current_user, &name))
    }

    /// Record an access targets and the sequential position after it.
    /// Random access also moves the sequential fields onto that record.
    fn target(fcb: &mut Fcb, access: Access) -> Result<(SeqPosition, SeqPosition), DiskError> {
        let pos = match access {
            Access::Sequential => fcb.seq_position()?.normalized()?,
            Access::Random => {
                let pos = SeqPosition::from_record(fcb.random_record())?;
                fcb.set_seq_position(pos);
                pos
            }
        };
        Ok((pos, pos.advance()?))
    }

    fn read_record(&mut self, ctx: &mut BdosContext<'_>, access: Access) -> CallResult {
        let mut fcb = Fcb::read_from(&*ctx.mem, ctx.regs.de);
        let drive = self.select(fcb.drive)?;
        let path = match self.fcb_path(drive, &fcb) {
            Ok(path) => path,
            Err(e) => return Ok(e.code() as u16),
        };
        let (pos, next) = match Self::target(&mut fcb, access) {
            Ok(target) => target,
            Err(e) => return Ok(e.code() as u16),
        };

        let result = match self.drive.read(&path, pos.offset()) {
            Ok(block) => {
                ctx.mem.write_block(self.session.dma, &block.data);
                fcb.rc = records_in_extent(block.file_len, pos.extent_number());
                if access == Access::Sequential {
                    fcb.set_seq_position(next);
                }
                if block.live < RECORD_SIZE {
                    status::UNWRITTEN_DATA
                } else {
                    status::OK
                }
            }
            Err(DiskError::UnwrittenExtent) if access == Access::Sequential => {
                status::UNWRITTEN_DATA
            }
            Err(e) => e.code(),
        };
        fcb.write_to(&mut *ctx.mem, ctx.regs.de);
        Ok(result as u16)
    }

    fn write_record(&mut self, ctx: &mut BdosContext<'_>, access: Access, fill: u8) -> CallResult {
        let mut fcb = Fcb::read_from(&*ctx.mem, ctx.regs.de);
        let drive = self.select(fcb.drive)?;
        if self.session.is_read_only(drive) {
            return Ok(status::READ_ONLY as u16);
        }
        let path = match self.fcb_path(drive, &fcb) {
            Ok(path) => path,
            Err(e) => return Ok(e.code() as u16),
        };
        let (pos, next) = match Self::target(&mut fcb, access) {
            Ok(target) => target,
            Err(e) => return Ok(e.code() as u16),
        };

        let mut data: Record = [0; RECORD_SIZE];
        ctx.mem.read_block(self.session.dma, &mut data);

        let result = match self.drive.write(&path, pos.offset(), &data, fill) {
            Ok(file_len) => {
                fcb.rc = records_in_extent(file_len, pos.extent_number());
                fcb.set_unmodified(false);
                if access == Access::Sequential {
                    fcb.set_seq_position(next);
                }
                status::OK
            }
            Err(e) => e.code(),
        };
        fcb.write_to(&mut *ctx.mem, ctx.regs.de);
        Ok(result as u16)
    }

    /// Copy a search hit into the DMA buffer as a directory record.
    fn report_match(&self, ctx: &mut BdosContext<'_>, found: Option<SearchMatch>) -> u16 {
        match found {
            Some(found) => {
                ctx.mem.write_block(self.session.dma, &found.entry.to_record());
                status::OK as u16
            }
            None => status::NOT_FOUND as u16,
        }
    }
}

/// Name an FCB carries, refused when it could not be a file in the user
/// directory. `?` is accepted only for lookups that take patterns.
fn legal_name(fcb: &Fcb, wildcards: bool) -> Result<CpmName, DiskError> {
    let name = fcb.file_name();
    if name.is_legal(wildcards) {
        Ok(name)
    } else {
        log::debug!("rejected file name {:?}", name);
        Err(DiskError::NotFound)
    }
}
