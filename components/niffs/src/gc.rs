use crate::error::{Error, Result};
use crate::fs::Niffs;
use crate::hal::Hal;
use crate::page::MoveFlag;
use crate::primitives::Payload;

#[derive(Clone, Copy, Debug)]
struct Candidate {
    sector: u32,
    free: u32,
    dele: u32,
    busy: u32,
}

impl<H: Hal, const BUF: usize, const FDS: usize> Niffs<H, BUF, FDS> {
    /// Makes sure `pages` pages can be allocated while still keeping one
    /// sector worth of free pages for the garbage collector.
    pub(crate) fn ensure_free_pages(&mut self, pages: u32) -> Result<()> {
        let pps = self.geo.pages_per_sector;
        let mut run = 1u32;
        let mut idle_runs = 0u32;

        while self.free_pages < pps {
            if self.dele_pages < pps - self.free_pages {
                bail!(Error::Overflow);
            }
            debug!("gc    : refill, free {} dele {}", self.free_pages, self.dele_pages);
            self.gc(false)?;
            run += 1;
        }

        if pages > self.dele_pages + self.free_pages - pps {
            bail!(Error::Full);
        }

        while pages > self.free_pages || self.free_pages - pages < pps {
            let freed = self.gc((run - 1) % 4 == 0)?;
            run += 1;
            idle_runs = if freed == 0 { idle_runs + 1 } else { 0 };
            if idle_runs > 4 * self.geo.sectors {
                warn!("gc    : no progress after {} runs", idle_runs);
                bail!(Error::Full);
            }
        }
        Ok(())
    }

    fn gc_find_candidate(&mut self, allow_full: bool) -> Result<Candidate> {
        let magic = self.geo.magic();
        let pps = self.geo.pages_per_sector;
        let mut best: Option<(i32, Candidate)> = None;

        for sector in 0..self.geo.sectors {
            let shdr = self.read_sector_hdr(sector)?;
            if shdr.magic != magic {
                continue;
            }
            let (mut free, mut dele, mut busy) = (0, 0, 0);
            let first = self.geo.sector_to_pix(sector);
            for pix in first..first + pps {
                let phdr = self.read_phdr(pix)?;
                if phdr.is_free_clean() {
                    free += 1;
                } else if phdr.id.is_deleted() || !phdr.flag.is_valid() {
                    dele += 1;
                } else {
                    busy += 1;
                }
            }

            let era_diff = self.max_era.wrapping_sub(shdr.era_cnt);
            trace!(
                "gc    : sector {} era {} free {} dele {} busy {}",
                sector, shdr.era_cnt, free, dele, busy
            );
            if free == pps {
                continue;
            }
            // busy pages must fit into the free pages of other sectors
            if busy > self.free_pages.saturating_sub(free) {
                continue;
            }
            if self.free_pages > 0 && free == self.free_pages {
                continue;
            }
            if busy == pps && !allow_full {
                continue;
            }

            let score = self
                .weights
                .score(era_diff, 100 * free / pps, 100 * dele / pps, 100 * busy / pps);
            if best.map_or(true, |(best_score, _)| score > best_score) {
                best = Some((
                    score,
                    Candidate {
                        sector,
                        free,
                        dele,
                        busy,
                    },
                ));
            }
        }

        match best {
            Some((score, cand)) => {
                debug!("gc    : candidate sector {} score {}", cand.sector, score);
                Ok(cand)
            }
            None => bail!(Error::NoGcCandidate),
        }
    }

    /// Reclaims the best scoring sector and returns the number of deleted
    /// pages freed by it.
    pub(crate) fn gc(&mut self, allow_full: bool) -> Result<u32> {
        if self.in_gc {
            bail!(Error::GcReentered);
        }
        self.in_gc = true;
        let res = self.gc_sector(allow_full);
        self.in_gc = false;
        res
    }

    fn gc_sector(&mut self, allow_full: bool) -> Result<u32> {
        let cand = self.gc_find_candidate(allow_full)?;
        let pps = self.geo.pages_per_sector;
        let first = self.geo.sector_to_pix(cand.sector);

        for pix in first..first + pps {
            let phdr = self.read_phdr(pix)?;
            if phdr.flag.is_valid() && phdr.is_used() {
                let dst = self.find_free_page(Some(cand.sector))?;
                self.move_page(pix, dst, Payload::Keep, MoveFlag::Keep)?;
            }
        }
        self.erase_sector(cand.sector)?;

        if self.geo.pix_to_sector(self.last_free_pix) == cand.sector {
            let next = (cand.sector + 1) % self.geo.sectors;
            self.last_free_pix = self.geo.sector_to_pix(next);
        }

        let reclaimed = cand.dele + cand.busy;
        self.dele_pages = self.dele_pages.saturating_sub(reclaimed);
        self.free_pages += reclaimed;
        debug!(
            "gc    : sector {} reclaimed, free {} dele {} (was free {})",
            cand.sector, self.free_pages, self.dele_pages, cand.free
        );
        Ok(cand.dele)
    }
}
