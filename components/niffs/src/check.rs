//! Mount time bookkeeping and the consistency checker.
//!
//! Every operation leaves a distinct trail when interrupted by power loss:
//!
//! | found on flash                              | meaning                        | fix             |
//! |---------------------------------------------|--------------------------------|-----------------|
//! | free id, flag or payload programmed         | page write not finished        | wipe            |
//! | id programmed, flag still clean             | page allocated, never finished | wipe            |
//! | data page without object header             | object removed or never made   | delete          |
//! | object header with zero length              | remove not finished            | delete          |
//! | `MOVING` data page with `WRITTEN` twin      | move done, source left over    | delete source   |
//! | `MOVING` data page alone                    | move not started               | mark `WRITTEN`  |
//! | two headers with the same id                | header move not finished       | keep the first  |
//! | `MOVING` header                             | append/truncate not finished   | trim and rehome |
//! | data page beyond the length of its file     | truncate not finished          | delete          |

use core::ops::ControlFlow;

use crate::error::{Error, Result};
use crate::fs::Niffs;
use crate::hal::Hal;
use crate::page::{
    FileType, Flag, LinearFileHdr, MoveFlag, ObjId, PageIx, LIN_HDR_SIZE, PAGE_HDR_SIZE, UNDEF_LEN,
};
use crate::primitives::{Payload, ERA_CNT_MAX_OF_LIMIT, ERA_CNT_MIN_OF_LIMIT};
use crate::traverse::Visit;

impl<H: Hal, const BUF: usize, const FDS: usize> Niffs<H, BUF, FDS> {
    /// Rebuilds the in-memory counters from flash, reformatting at most one
    /// sector with a bad header (an erase that was cut short).
    pub(crate) fn setup(&mut self) -> Result<()> {
        self.free_pages = 0;
        self.dele_pages = 0;
        self.max_era = 0;
        let magic = self.geo.magic();

        let mut bad_sectors = 0;
        let mut era_min = u32::MAX;
        let mut era_max = 0;
        for sector in 0..self.geo.sectors {
            let shdr = self.read_sector_hdr(sector)?;
            if shdr.magic != magic {
                bad_sectors += 1;
                continue;
            }
            era_min = era_min.min(shdr.era_cnt);
            era_max = era_max.max(shdr.era_cnt);
        }
        self.max_era = if era_min < ERA_CNT_MIN_OF_LIMIT && era_max > ERA_CNT_MAX_OF_LIMIT {
            // counters wrapped, the small ones are the newest
            era_min
        } else {
            era_max
        };
        if bad_sectors > 1 {
            error!("setup : {} sectors with bad magic", bad_sectors);
            bail!(Error::NotAFilesystem);
        }

        let pps = self.geo.pages_per_sector;
        for sector in 0..self.geo.sectors {
            if self.read_sector_hdr(sector)?.magic != magic {
                warn!("setup : sector {} has bad magic, erasing", sector);
                self.erase_sector(sector)?;
            }
            let first = self.geo.sector_to_pix(sector);
            for pix in first..first + pps {
                let phdr = self.read_phdr(pix)?;
                if phdr.id.is_free() {
                    self.free_pages += 1;
                } else if phdr.id.is_deleted() || !phdr.flag.is_valid() {
                    self.dele_pages += 1;
                }
            }
        }
        debug!(
            "setup : free {} dele {} max_era {}",
            self.free_pages, self.dele_pages, self.max_era
        );
        Ok(())
    }

    /// Runs all checker passes, the filesystem must not be mounted.
    pub(crate) fn check(&mut self) -> Result<()> {
        self.setup()?;
        info!("check : orphans, aborted removes, bad flags, dirty pages");
        self.check_orphans_and_dirt()?;
        info!("check : unfinished data page moves");
        self.check_moving_pages()?;
        info!("check : duplicate object headers");
        self.check_duplicate_headers()?;
        info!("check : unfinished object header moves");
        self.check_moving_headers()?;
        info!("check : spans beyond file lengths");
        self.check_overlong_objects()?;

        self.setup()?;
        if self.free_pages < self.geo.pages_per_sector {
            info!("check : free {} below a sector, collecting", self.free_pages);
            match self.gc(false) {
                Err(Error::NoGcCandidate) => bail!(Error::Overflow),
                res => {
                    res?;
                }
            }
        }
        Ok(())
    }

    fn check_orphans_and_dirt(&mut self) -> Result<()> {
        // ids owning a complete object header, clean headers get wiped below
        self.bitmap_clear();
        self.traverse(0, 0, |fs, _pix, hdr| -> Visit {
            let phdr = hdr.phdr();
            if let Some(ohdr) = hdr.object() {
                if matches!(phdr.flag, Flag::Written | Flag::Moving)
                    && ohdr.len != UNDEF_LEN
                    && ohdr.len > 0
                    && ohdr.ftype != FileType::Linear
                {
                    fs.bitmap_set(usize::from(phdr.id.obj_id()) - 1);
                }
            }
            Ok(ControlFlow::Continue(()))
        })?;

        let page_size = self.geo.page_size;
        let max_len = u64::from(self.geo.sector_size) * u64::from(self.geo.sectors - 1);
        self.traverse(0, 0, |fs, pix, hdr| -> Visit {
            let phdr = *hdr.phdr();
            let bad_flag = !phdr.id.is_deleted()
                && (!phdr.flag.is_valid()
                    || (phdr.id.is_free() && matches!(phdr.flag, Flag::Written | Flag::Moving))
                    || (!phdr.id.is_free() && phdr.flag == Flag::Clean));
            if bad_flag {
                debug!("check : pix {:04x} bad flag {:?} id {:?}", pix, phdr.flag, phdr.id);
                fs.wipe_page(pix)?;
            } else if phdr.is_used() {
                let orphan = phdr.id.spix() > 0
                    && !usize::from(phdr.id.obj_id())
                        .checked_sub(1)
                        .map_or(false, |bit| fs.bitmap_get(bit));
                let dropped = match hdr.object() {
                    Some(ohdr) if ohdr.len == 0 => true,
                    Some(ohdr) if ohdr.ftype != FileType::Linear => {
                        (ohdr.len != UNDEF_LEN
                            && u64::from(ohdr.len) > (1u64 << 16) * u64::from(page_size))
                            || u64::from(ohdr.len) > max_len
                    }
                    _ => false,
                };
                if orphan || dropped {
                    debug!("check : pix {:04x} id {:?} orphaned or dropped", pix, phdr.id);
                    fs.delete_page(pix)?;
                }
            } else if phdr.is_free_clean() {
                let addr = fs.geo.pix_addr(pix);
                if !fs.is_blank(addr, page_size)? {
                    debug!("check : pix {:04x} free but dirty", pix);
                    fs.wipe_page(pix)?;
                }
            }
            Ok(ControlFlow::Continue(()))
        })?;
        Ok(())
    }

    fn check_moving_pages(&mut self) -> Result<()> {
        self.traverse(0, 0, |fs, pix, hdr| -> Visit {
            let phdr = *hdr.phdr();
            if !phdr.is_used() || phdr.flag != Flag::Moving || phdr.id.spix() == 0 {
                return Ok(ControlFlow::Continue(()));
            }
            let twin = fs.traverse(pix, pix, |_, _, other| -> Visit {
                let other = other.phdr();
                if other.is_used() && other.flag == Flag::Written && other.id == phdr.id {
                    return Ok(ControlFlow::Break(()));
                }
                Ok(ControlFlow::Continue(()))
            })?;
            if twin.is_some() {
                debug!("check : pix {:04x} moved already, deleting source", pix);
                fs.delete_page(pix)?;
                return Ok(ControlFlow::Continue(()));
            }
            match fs.find_free_page(None) {
                Ok(dst) => {
                    debug!("check : pix {:04x} move not started, rehoming", pix);
                    fs.move_page(pix, dst, Payload::Keep, MoveFlag::Force(Flag::Written))?;
                }
                Err(Error::NoFreePage) => {
                    warn!("check : pix {:04x} left moving, no free page", pix);
                }
                Err(err) => return Err(err),
            }
            Ok(ControlFlow::Continue(()))
        })?;
        Ok(())
    }

    fn check_duplicate_headers(&mut self) -> Result<()> {
        self.bitmap_clear();
        self.traverse(0, 0, |fs, pix, hdr| -> Visit {
            let phdr = hdr.phdr();
            let Some(ohdr) = hdr.object() else {
                return Ok(ControlFlow::Continue(()));
            };
            if !phdr.flag.is_valid() || ohdr.len == UNDEF_LEN || ohdr.len == 0 {
                return Ok(ControlFlow::Continue(()));
            }
            let bit = usize::from(phdr.id.obj_id()) - 1;
            if fs.bitmap_get(bit) {
                debug!("check : pix {:04x} duplicate header {:?}", pix, phdr.id);
                fs.delete_page(pix)?;
            } else {
                fs.bitmap_set(bit);
            }
            Ok(ControlFlow::Continue(()))
        })?;
        Ok(())
    }

    /// Drops data pages left behind the length of finished objects, as an
    /// interrupted truncate does.
    fn check_overlong_objects(&mut self) -> Result<()> {
        let mut pix = 0;
        while pix < self.geo.total_pages() {
            if let Some(ohdr) = self.read_header(pix)?.object() {
                let phdr = ohdr.phdr;
                if phdr.flag == Flag::Written
                    && ohdr.ftype == FileType::File
                    && ohdr.len != UNDEF_LEN
                    && ohdr.len > 0
                {
                    self.drop_spans_beyond(phdr.id.obj_id(), ohdr.len)?;
                }
            }
            pix += 1;
        }
        Ok(())
    }

    /// Deletes the data pages of `obj_id` not needed for `flen` bytes.
    fn drop_spans_beyond(&mut self, obj_id: ObjId, flen: u32) -> Result<()> {
        let mut last_spix = self.geo.offs_to_spix(flen);
        if self.geo.offs_to_pdata_offs(flen) == 0 && last_spix > 0 {
            last_spix -= 1;
        }
        self.traverse(0, 0, |fs, pix, hdr| -> Visit {
            let phdr = hdr.phdr();
            let spix = u32::from(phdr.id.spix());
            if phdr.flag.is_valid()
                && phdr.is_used()
                && phdr.id.obj_id() == obj_id
                && spix > last_spix
            {
                debug!("check : pix {:04x} span {} beyond {} bytes", pix, spix, flen);
                fs.delete_page(pix)?;
            }
            Ok(ControlFlow::Continue(()))
        })?;
        Ok(())
    }

    /// Collects `MOVING` headers in batches as large as the working buffer
    /// allows and tidies each of them.
    fn check_moving_headers(&mut self) -> Result<()> {
        let capacity = BUF / 4;
        let mut start = 0;
        loop {
            self.buf.fill(0);
            let mut count = 0usize;
            let last = self.traverse(start, 0, |fs, pix, hdr| -> Visit<PageIx> {
                let phdr = hdr.phdr();
                if hdr.object().is_some() && phdr.flag == Flag::Moving {
                    fs.buf[count * 4..count * 4 + 4].copy_from_slice(&pix.to_le_bytes());
                    count += 1;
                    if count == capacity {
                        return Ok(ControlFlow::Break(pix));
                    }
                }
                Ok(ControlFlow::Continue(()))
            })?;

            for ix in 0..count {
                let pix = crate::page::le_u32(&self.buf, (ix * 4) as u32);
                self.tidy_moving_header(pix)?;
            }
            match last {
                Some(pix) => start = pix + 1,
                None => return Ok(()),
            }
        }
    }

    /// Finishes an interrupted operation on the object whose header at `pix`
    /// is flagged `MOVING`: pages beyond the recorded length are dropped and
    /// the header is rewritten as `WRITTEN`.
    ///
    /// Returns the new header position, `pix` if there was no room to move
    /// it, or `None` if the header turned out to be unusable and was deleted.
    pub(crate) fn tidy_moving_header(&mut self, pix: PageIx) -> Result<Option<PageIx>> {
        let ohdr = self.read_object_hdr(pix)?;
        let flen = ohdr.file_len();
        let obj_id = ohdr.phdr.id.obj_id();

        if ohdr.ftype != FileType::Linear {
            self.drop_spans_beyond(obj_id, flen)?;
        }

        let dst = match self.find_free_page(None) {
            Ok(dst) => dst,
            Err(Error::NoFreePage) => {
                warn!("tidy  : pix {:04x} no free page, left moving", pix);
                return Ok(Some(pix));
            }
            Err(err) => return Err(err),
        };

        if ohdr.ftype != FileType::Linear {
            self.move_page(pix, dst, Payload::Keep, MoveFlag::Force(Flag::Written))?;
            return Ok(Some(dst));
        }

        let lhdr = self.read_linear_hdr(pix)?;
        let ss = self.geo.sector_size;
        let sector = lhdr.start_sector + flen / ss;
        let lin_start = self.geo.sectors;
        let lin_end = lin_start + self.geo.lin_sectors;
        if lhdr.start_sector < lin_start || sector > lin_end || (sector == lin_end && flen % ss != 0) {
            warn!("tidy  : pix {:04x} linear file out of bounds, deleting", pix);
            self.delete_page(pix)?;
            return Ok(None);
        }
        // data may have been appended behind the recorded length, only a
        // partially filled sector is known to be erased beyond it
        let last = if sector < lin_end && flen % ss != 0 {
            self.last_programmed(self.geo.sector_addr(sector), flen % ss, ss)?
        } else {
            None
        };
        let new_len = match last {
            Some(last) => flen - flen % ss + last + 1,
            None => flen,
        };
        debug!("tidy  : pix {:04x} linear length {} -> {}", pix, flen, new_len);
        let mut raw = [0xff; LIN_HDR_SIZE as usize];
        LinearFileHdr {
            ohdr: crate::page::ObjectHdr {
                len: new_len,
                ..lhdr.ohdr
            },
            ..lhdr
        }
        .encode(&mut raw);
        self.move_page(
            pix,
            dst,
            Payload::Bytes(&raw[PAGE_HDR_SIZE as usize..]),
            MoveFlag::Force(Flag::Written),
        )?;
        Ok(Some(dst))
    }

    /// Offset of the last non-erased byte in `[from, to)` of the sector at
    /// `addr`.
    fn last_programmed(&mut self, addr: u32, from: u32, to: u32) -> Result<Option<u32>> {
        let mut chunk = [0u8; 32];
        let mut last = None;
        let mut offs = from;
        while offs < to {
            let n = core::cmp::min(to - offs, chunk.len() as u32);
            let part = &mut chunk[..n as usize];
            self.hal.read(addr + offs, part)?;
            if let Some(ix) = part.iter().rposition(|&b| b != 0xff) {
                last = Some(offs + ix as u32);
            }
            offs += n;
        }
        Ok(last)
    }
}
