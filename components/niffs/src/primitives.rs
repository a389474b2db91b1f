//! Page level operations, the only places that program page headers.

use crate::error::{Error, Result};
use crate::fs::Niffs;
use crate::hal::Hal;
use crate::page::{Flag, MoveFlag, PageHdr, PageId, PageIx, SectorHdr, OFFS_FLAG, OFFS_ID, PAGE_HDR_SIZE};

/// Erase counts below this are considered freshly wrapped.
pub(crate) const ERA_CNT_MIN_OF_LIMIT: u32 = u32::MAX / 4 + 1;
/// Erase counts above this are considered about to wrap.
pub(crate) const ERA_CNT_MAX_OF_LIMIT: u32 = u32::MAX - ERA_CNT_MIN_OF_LIMIT + 1;

/// Bytes to program behind a page header.
#[derive(Clone, Copy, Debug)]
pub(crate) enum Payload<'a> {
    /// `write_page`: nothing. `move_page`: whatever the source page carries.
    Keep,
    Bytes(&'a [u8]),
    /// A range of the working buffer.
    Buf { offs: usize, len: usize },
}

impl<H: Hal, const BUF: usize, const FDS: usize> Niffs<H, BUF, FDS> {
    fn write_payload(&mut self, addr: u32, payload: Payload<'_>) -> Result<()> {
        match payload {
            Payload::Keep => Ok(()),
            Payload::Bytes(data) => self.hal.write(addr, data),
            Payload::Buf { offs, len } => self.hal.write(addr, &self.buf[offs..offs + len]),
        }
    }

    /// Programs a free page: flag first, then payload, the id last.
    pub(crate) fn write_page(&mut self, pix: PageIx, phdr: PageHdr, payload: Payload<'_>) -> Result<()> {
        let cur = self.read_phdr(pix)?;
        if !phdr.id.is_valid() {
            bail!(Error::WrPhdrBadId);
        }
        if !cur.is_free_clean() {
            bail!(Error::WrPhdrUnfreePage);
        }
        trace!("write : pix {:04x} id {:?} flag {:?}", pix, phdr.id, phdr.flag);
        let addr = self.geo.pix_addr(pix);
        if phdr.flag != Flag::Clean {
            self.write_word(addr + OFFS_FLAG, phdr.flag.raw())?;
        }
        self.write_payload(addr + PAGE_HDR_SIZE, payload)?;
        self.write_word(addr + OFFS_ID, phdr.id.raw())
    }

    pub(crate) fn delete_page(&mut self, pix: PageIx) -> Result<()> {
        let phdr = self.read_phdr(pix)?;
        if phdr.id.is_free() {
            bail!(Error::DeletingFreePage);
        }
        if phdr.id.is_deleted() {
            bail!(Error::DeletingDeletedPage);
        }
        trace!("dele  : pix {:04x} id {:?}", pix, phdr.id);
        self.write_word(self.geo.pix_addr(pix) + OFFS_ID, PageId::DELETED.raw())?;
        self.dele_pages += 1;
        self.inform_page_delete(pix);
        Ok(())
    }

    /// Clears the id of a page in whatever state, without bookkeeping.
    pub(crate) fn wipe_page(&mut self, pix: PageIx) -> Result<()> {
        debug!("wipe  : pix {:04x}", pix);
        self.write_word(self.geo.pix_addr(pix) + OFFS_ID, PageId::DELETED.raw())
    }

    /// Copies page `src` to the free page `dst` and deletes `src`.
    ///
    /// The source is flagged `MOVING` before anything else happens, so an
    /// interrupted move always leaves a page that the checker can finish or
    /// roll back.
    pub(crate) fn move_page(
        &mut self,
        src: PageIx,
        dst: PageIx,
        payload: Payload<'_>,
        flag: MoveFlag,
    ) -> Result<()> {
        if src == dst {
            bail!(Error::MovingToSamePage);
        }
        let src_hdr = self.read_phdr(src)?;
        let dst_hdr = self.read_phdr(dst)?;
        if !src_hdr.flag.is_valid() || !dst_hdr.flag.is_valid() {
            bail!(Error::MovingBadFlag);
        }
        if src_hdr.id.is_free() {
            bail!(Error::MovingFreePage);
        }
        if src_hdr.id.is_deleted() {
            bail!(Error::MovingDeletedPage);
        }
        if !dst_hdr.is_free_clean() {
            bail!(Error::MovingToUnfreePage);
        }
        trace!("move  : pix {:04x} -> {:04x} id {:?}", src, dst, src_hdr.id);

        let src_addr = self.geo.pix_addr(src);
        let dst_addr = self.geo.pix_addr(dst);
        if src_hdr.flag != Flag::Moving {
            self.write_word(src_addr + OFFS_FLAG, Flag::Moving.raw())?;
        }

        let dst_flag = match flag {
            MoveFlag::Keep => match src_hdr.flag {
                Flag::Clean => Flag::Clean,
                Flag::Moving => Flag::Moving,
                _ => Flag::Written,
            },
            MoveFlag::Force(flag) => flag,
        };
        if dst_flag != Flag::Clean {
            self.write_word(dst_addr + OFFS_FLAG, dst_flag.raw())?;
        }
        self.free_pages = self.free_pages.saturating_sub(1);

        match payload {
            Payload::Keep => {
                if src_hdr.flag != Flag::Clean || src_hdr.id.spix() == 0 {
                    let len = self.geo.page_size - PAGE_HDR_SIZE;
                    self.copy_flash(src_addr + PAGE_HDR_SIZE, dst_addr + PAGE_HDR_SIZE, len)?;
                }
            }
            payload => self.write_payload(dst_addr + PAGE_HDR_SIZE, payload)?,
        }
        self.write_word(dst_addr + OFFS_ID, src_hdr.id.raw())?;

        self.inform_page_movement(src, dst);
        self.delete_page(src)
    }

    /// Erases a paged sector and stamps it with a fresh sector header.
    ///
    /// Sectors that were formatted before carry on their erase count, others
    /// start at the highest count known.
    pub(crate) fn erase_sector(&mut self, sector: u32) -> Result<()> {
        let magic = self.geo.magic();
        let old = self.read_sector_hdr(sector)?;
        let era_cnt = if old.magic == magic {
            let era_cnt = old.era_cnt.wrapping_add(1);
            if era_cnt < old.era_cnt && self.max_era > ERA_CNT_MAX_OF_LIMIT {
                // wrapped
                self.max_era = era_cnt;
            } else if self.max_era < ERA_CNT_MIN_OF_LIMIT && era_cnt > ERA_CNT_MAX_OF_LIMIT {
                // a laggard, the maximum already wrapped
            } else {
                self.max_era = self.max_era.max(era_cnt);
            }
            era_cnt
        } else {
            self.max_era
        };
        debug!("erase : sector {} era_cnt {}", sector, era_cnt);
        let addr = self.geo.sector_addr(sector);
        self.hal.erase(addr, self.geo.sector_size)?;
        self.hal.write(addr, &SectorHdr { era_cnt, magic }.encode())
    }
}
