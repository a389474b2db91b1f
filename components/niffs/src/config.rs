use crate::error::{Error, Result};
use crate::geometry::Geometry;
use crate::page::{LIN_HDR_SIZE, SECTOR_HDR_SIZE, WORD_ALIGN};

/// Weights of the garbage collector's sector score.
///
/// Every paged sector is scored as
/// `erase_diff * erase_cnt_diff + free% * free + deleted% * deleted + busy% * busy`
/// where `erase_diff` is the distance of the sector's erase count to the
/// highest one in the filesystem. The highest scoring sector is reclaimed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GcWeights {
    pub erase_cnt_diff: i32,
    pub free: i32,
    pub deleted: i32,
    pub busy: i32,
}

impl GcWeights {
    pub const DEFAULT: Self = Self {
        erase_cnt_diff: 100,
        free: -4,
        deleted: 2,
        busy: -2,
    };

    pub const fn score(&self, erase_diff: u32, free_pct: u32, dele_pct: u32, busy_pct: u32) -> i32 {
        (erase_diff as i32)
            .wrapping_mul(self.erase_cnt_diff)
            .wrapping_add((free_pct as i32).wrapping_mul(self.free))
            .wrapping_add((dele_pct as i32).wrapping_mul(self.deleted))
            .wrapping_add((busy_pct as i32).wrapping_mul(self.busy))
    }
}

impl Default for GcWeights {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Filesystem layout as requested by the user.
///
/// The page size is a wish: it is shrunk until the sector header fits next to
/// the pages and then aligned down to a word.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Config {
    pub sectors: u32,
    pub sector_size: u32,
    pub page_size: u32,
    /// Sectors reserved for linear files, following the paged sectors.
    pub lin_sectors: u32,
    pub gc_weights: GcWeights,
}

impl Config {
    pub const fn new(sectors: u32, sector_size: u32, page_size: u32) -> Self {
        Self {
            sectors,
            sector_size,
            page_size,
            lin_sectors: 0,
            gc_weights: GcWeights::DEFAULT,
        }
    }

    pub const fn with_linear_sectors(mut self, lin_sectors: u32) -> Self {
        self.lin_sectors = lin_sectors;
        self
    }

    pub const fn with_gc_weights(mut self, gc_weights: GcWeights) -> Self {
        self.gc_weights = gc_weights;
        self
    }

    /// Derives the effective layout for a working buffer of `buf_len` bytes.
    pub fn geometry(&self, buf_len: usize) -> Result<Geometry> {
        let Config {
            sectors,
            sector_size,
            page_size,
            lin_sectors,
            ..
        } = *self;
        if sectors == 0 || sector_size == 0 || page_size == 0 {
            bail!(Error::BadConf);
        }
        let pages_per_sector = sector_size / page_size;
        if pages_per_sector == 0 {
            bail!(Error::BadConf);
        }

        let mut eff_page_size = page_size;
        if sector_size % page_size < SECTOR_HDR_SIZE {
            let shrink = SECTOR_HDR_SIZE / pages_per_sector
                + u32::from(SECTOR_HDR_SIZE % pages_per_sector != 0);
            eff_page_size = eff_page_size.saturating_sub(shrink);
        }
        eff_page_size &= !(WORD_ALIGN - 1);

        if eff_page_size == 0 || eff_page_size > sector_size / 2 {
            bail!(Error::BadConf);
        }
        // room for a full linear header plus at least one word of payload
        if eff_page_size <= LIN_HDR_SIZE {
            bail!(Error::BadConf);
        }
        let total_pages =
            u64::from((sector_size - SECTOR_HDR_SIZE) / eff_page_size) * u64::from(sectors);
        if total_pages > 1 << 16 {
            bail!(Error::BadConf);
        }
        let bitmap_len = (u64::from(sector_size) * u64::from(sectors) / u64::from(page_size) + 7) / 8;
        if (buf_len as u64) < u64::from(page_size) || (buf_len as u64) < bitmap_len {
            bail!(Error::BadConf);
        }
        if u64::from(lin_sectors) > buf_len as u64 * 8 {
            bail!(Error::BadConf);
        }
        let flash_bytes = u64::from(sectors + lin_sectors) * u64::from(sector_size);
        if flash_bytes > u64::from(u32::MAX) {
            bail!(Error::BadConf);
        }

        let geo = Geometry {
            sectors,
            sector_size,
            page_size: eff_page_size,
            pages_per_sector,
            lin_sectors,
        };
        info!(
            "config: {} sectors of {} bytes, {} pages per sector of {} bytes, {} linear sectors",
            sectors, sector_size, pages_per_sector, eff_page_size, lin_sectors
        );
        Ok(geo)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_size_makes_room_for_sector_header() {
        let geo = Config::new(16, 1024, 128).geometry(256).unwrap();
        assert_eq!(geo.page_size(), 124);
        assert_eq!(geo.pages_per_sector(), 8);

        // 1024 % 100 leaves enough room already
        let geo = Config::new(16, 1024, 100).geometry(256).unwrap();
        assert_eq!(geo.page_size(), 100);
        assert_eq!(geo.pages_per_sector(), 10);

        let geo = Config::new(4, 256, 128).geometry(128).unwrap();
        assert_eq!(geo.page_size(), 124);
        assert_eq!(geo.pages_per_sector(), 2);
    }

    #[test]
    fn bad_configs() {
        // pages larger than half a sector
        assert_eq!(Config::new(4, 256, 256).geometry(512), Err(Error::BadConf));
        // pages too small for a header
        assert_eq!(Config::new(4, 256, 32).geometry(512), Err(Error::BadConf));
        // buffer smaller than a page
        assert_eq!(Config::new(16, 1024, 128).geometry(64), Err(Error::BadConf));
        // buffer smaller than the page bitmap
        assert_eq!(Config::new(512, 4096, 128).geometry(128), Err(Error::BadConf));
        // too many pages to tell apart
        assert_eq!(Config::new(1024, 65536, 64).geometry(1 << 20), Err(Error::BadConf));
        // linear bitmap larger than the buffer
        assert_eq!(
            Config::new(16, 1024, 128).with_linear_sectors(2049).geometry(256),
            Err(Error::BadConf)
        );
        assert_eq!(Config::new(0, 1024, 128).geometry(256), Err(Error::BadConf));
    }

    #[test]
    fn default_score() {
        let w = GcWeights::default();
        assert_eq!(w.score(0, 0, 100, 0), 200);
        assert_eq!(w.score(1, 50, 0, 50), 100 - 200 - 100);
    }
}
