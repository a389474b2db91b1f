use core::fmt::Write;

use crate::error::Result;
use crate::fs::Niffs;
use crate::hal::Hal;
use crate::page::{Flag, Header, PageHdr};

/// Page counts as found on flash, see [`Niffs::page_stats`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PageStats {
    pub free: u32,
    pub deleted: u32,
    pub busy: u32,
}

impl PageStats {
    pub fn total(&self) -> u32 {
        self.free + self.deleted + self.busy
    }

    fn count(&mut self, phdr: &PageHdr) {
        if phdr.id.is_free() {
            self.free += 1;
        } else if phdr.id.is_deleted() || !phdr.flag.is_valid() {
            self.deleted += 1;
        } else {
            self.busy += 1;
        }
    }
}

fn flag_marker(flag: Flag) -> &'static str {
    match flag {
        Flag::Clean => "CL",
        Flag::Written => "WR",
        Flag::Moving => "MO",
        Flag::Bad(_) => "BAD",
    }
}

impl<H: Hal, const BUF: usize, const FDS: usize> Niffs<H, BUF, FDS> {
    /// Counts free, deleted and busy pages by scanning the flash.
    ///
    /// On a healthy filesystem this agrees with the counters kept in memory.
    pub fn page_stats(&mut self) -> Result<PageStats> {
        let mut stats = PageStats::default();
        for pix in 0..self.geo.total_pages() {
            let phdr = self.read_phdr(pix)?;
            stats.count(&phdr);
        }
        Ok(stats)
    }

    /// Writes a human readable picture of all sectors and pages to `out`.
    pub fn dump<W: Write>(&mut self, out: &mut W) -> Result<()> {
        let geo = self.geo;
        let magic = geo.magic();
        writeln!(
            out,
            "NIFFS sectors:{} sector_size:{} page_size:{} pages/sector:{} linear:{}",
            geo.sectors, geo.sector_size, geo.page_size, geo.pages_per_sector, geo.lin_sectors
        )?;
        writeln!(
            out,
            "      free:{} dele:{} max_era:{} mounted:{}",
            self.free_pages, self.dele_pages, self.max_era, self.mounted
        )?;

        let mut stats = PageStats::default();
        for sector in 0..geo.sectors {
            let shdr = self.read_sector_hdr(sector)?;
            writeln!(
                out,
                "sector {:4} @ {:08x} era:{:08x} magic:{:08x} {}",
                sector,
                geo.sector_addr(sector),
                shdr.era_cnt,
                shdr.magic,
                if shdr.magic == magic { "OK" } else { "BAD" }
            )?;
            let first = geo.sector_to_pix(sector);
            for pix in first..first + geo.pages_per_sector {
                let hdr = self.read_header(pix)?;
                let phdr = *hdr.phdr();
                stats.count(&phdr);
                write!(out, "  {:04x} {:08x} ", pix, phdr.id.raw())?;
                if phdr.id.is_free() {
                    write!(out, "FR")?;
                    if phdr.flag != Flag::Clean {
                        write!(out, " {}", flag_marker(phdr.flag))?;
                    }
                } else if phdr.id.is_deleted() {
                    write!(out, "DE")?;
                } else {
                    write!(out, "{:?} {}", phdr.id, flag_marker(phdr.flag))?;
                }
                match hdr {
                    Header::Linear(lhdr) if !phdr.id.is_deleted() => write!(
                        out,
                        " LIN '{}' len:{:08x} start:{} resv:{}",
                        lhdr.ohdr.name, lhdr.ohdr.len, lhdr.start_sector, lhdr.resv_sectors
                    )?,
                    Header::Object(ohdr) if !phdr.id.is_deleted() => write!(
                        out,
                        " OBJ '{}' len:{:08x} type:{:02x}",
                        ohdr.name,
                        ohdr.len,
                        ohdr.ftype.raw()
                    )?,
                    _ => {}
                }
                writeln!(out)?;
            }
        }

        if geo.has_linear_area() {
            let usage = self.linear_usage()?;
            writeln!(
                out,
                "linear sectors:{} used:{} max free run:{}",
                geo.lin_sectors, usage.used, usage.max_free_run
            )?;
        }

        writeln!(
            out,
            "pages free:{} dele:{} busy:{}",
            stats.free, stats.deleted, stats.busy
        )?;
        if stats.free != self.free_pages {
            writeln!(out, "FATAL free pages {} != {} counted", self.free_pages, stats.free)?;
        }
        if stats.deleted != self.dele_pages {
            writeln!(
                out,
                "FATAL dele pages {} != {} counted",
                self.dele_pages, stats.deleted
            )?;
        }
        if stats.total() != geo.total_pages() {
            writeln!(
                out,
                "FATAL {} pages counted, {} expected",
                stats.total(),
                geo.total_pages()
            )?;
        }
        Ok(())
    }
}
