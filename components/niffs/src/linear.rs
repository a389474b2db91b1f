use core::ops::ControlFlow;

use crate::error::{Error, Result};
use crate::file::Fd;
use crate::fs::Niffs;
use crate::hal::Hal;
use crate::page::FileType;
use crate::traverse::Visit;

/// Usage of the linear area.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct LinearUsage {
    pub used: u32,
    pub max_free_run: u32,
}

impl<H: Hal, const BUF: usize, const FDS: usize> Niffs<H, BUF, FDS> {
    /// Marks the linear sectors claimed by live linear files in the working
    /// buffer, one bit per sector. Headers claiming more than the area are
    /// deleted.
    pub(crate) fn linear_map(&mut self) -> Result<()> {
        self.bitmap_clear();
        let ss = self.geo.sector_size;
        let lin_start = self.geo.sectors;
        let lin_sectors = self.geo.lin_sectors;
        self.traverse(0, 0, |fs, pix, hdr| -> Visit {
            let Some(lhdr) = hdr.linear() else {
                return Ok(ControlFlow::Continue(()));
            };
            if !hdr.phdr().flag.is_valid() {
                return Ok(ControlFlow::Continue(()));
            }
            let sectors = lhdr
                .resv_sectors
                .max(lhdr.ohdr.file_len().div_ceil(ss))
                .max(1);
            let fits = lhdr.start_sector >= lin_start
                && sectors <= lin_sectors
                && lhdr.start_sector - lin_start <= lin_sectors - sectors;
            if !fits {
                debug!("linear: pix {:04x} claims too much, deleting", pix);
                fs.delete_page(pix)?;
                return Ok(ControlFlow::Continue(()));
            }
            let first = (lhdr.start_sector - lin_start) as usize;
            for bit in first..first + sectors as usize {
                fs.bitmap_set(bit);
            }
            Ok(ControlFlow::Continue(()))
        })?;
        Ok(())
    }

    /// First fit for `sectors` consecutive free linear sectors, returns the
    /// absolute index of the first one.
    pub(crate) fn linear_find_space(&mut self, sectors: u32) -> Result<u32> {
        self.linear_map()?;
        let wanted = sectors.max(1);
        let mut run_start = 0;
        let mut run_len = 0;
        for lsix in 0..self.geo.lin_sectors {
            if self.bitmap_get(lsix as usize) {
                run_len = 0;
                continue;
            }
            if run_len == 0 {
                run_start = lsix;
            }
            run_len += 1;
            if run_len == wanted {
                return Ok(self.geo.sectors + run_start);
            }
        }
        bail!(Error::LinearNoSpace);
    }

    /// Sectors the linear file may grow into: up to the start of the next
    /// linear file, or the end of the area.
    pub(crate) fn linear_avail_size(&mut self, fd: Fd) -> Result<u32> {
        let desc = self.desc(fd)?;
        if desc.ftype != FileType::Linear {
            bail!(Error::FiledescBad);
        }
        let lhdr = self.read_linear_hdr(desc.obj_pix)?;
        Self::check_coherent(&lhdr.ohdr.phdr, desc.obj_id)?;

        let start = lhdr.start_sector;
        let mut nearest: Option<u32> = None;
        self.traverse(0, 0, |_, _, hdr| -> Visit {
            if let Some(other) = hdr.linear() {
                if hdr.phdr().flag.is_valid()
                    && other.start_sector > start
                    && nearest.map_or(true, |n| other.start_sector < n)
                {
                    nearest = Some(other.start_sector);
                }
            }
            Ok(ControlFlow::Continue(()))
        })?;
        let end = nearest.unwrap_or(self.geo.sectors + self.geo.lin_sectors);
        Ok(end.saturating_sub(start))
    }

    /// Counts used sectors and the longest run of free ones.
    pub(crate) fn linear_usage(&mut self) -> Result<LinearUsage> {
        self.linear_map()?;
        let mut usage = LinearUsage::default();
        let mut run = 0;
        for lsix in 0..self.geo.lin_sectors {
            if self.bitmap_get(lsix as usize) {
                usage.used += 1;
                run = 0;
            } else {
                run += 1;
                usage.max_free_run = usage.max_free_run.max(run);
            }
        }
        Ok(usage)
    }
}
