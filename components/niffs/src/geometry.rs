use crate::page::{PageIx, OBJ_HDR_SIZE, PAGE_HDR_SIZE, SECTOR_HDR_SIZE};

const MAGIC_CLASSIC: u32 = 0xfee1_c001;
const MAGIC_LINEAR_TAG: u32 = 0xe1;

/// Validated flash layout, see [`Config`](crate::Config).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Geometry {
    pub(crate) sectors: u32,
    pub(crate) sector_size: u32,
    pub(crate) page_size: u32,
    pub(crate) pages_per_sector: u32,
    pub(crate) lin_sectors: u32,
}

impl Geometry {
    pub const fn sectors(&self) -> u32 {
        self.sectors
    }

    pub const fn sector_size(&self) -> u32 {
        self.sector_size
    }

    /// Effective page size, possibly smaller than configured.
    pub const fn page_size(&self) -> u32 {
        self.page_size
    }

    pub const fn pages_per_sector(&self) -> u32 {
        self.pages_per_sector
    }

    pub const fn lin_sectors(&self) -> u32 {
        self.lin_sectors
    }

    pub const fn has_linear_area(&self) -> bool {
        self.lin_sectors > 0
    }

    pub const fn total_pages(&self) -> u32 {
        self.sectors * self.pages_per_sector
    }

    /// Bytes of flash covered, paged and linear area.
    pub const fn flash_size(&self) -> u32 {
        (self.sectors + self.lin_sectors) * self.sector_size
    }

    pub const fn sector_addr(&self, sector: u32) -> u32 {
        sector * self.sector_size
    }

    pub const fn pix_to_sector(&self, pix: PageIx) -> u32 {
        pix / self.pages_per_sector
    }

    pub const fn sector_to_pix(&self, sector: u32) -> PageIx {
        sector * self.pages_per_sector
    }

    pub const fn pix_addr(&self, pix: PageIx) -> u32 {
        self.sector_addr(self.pix_to_sector(pix))
            + SECTOR_HDR_SIZE
            + (pix % self.pages_per_sector) * self.page_size
    }

    /// Payload bytes carried by a page of the given span index.
    pub const fn pdata_len(&self, spix: u32) -> u32 {
        if spix == 0 {
            self.page_size - PAGE_HDR_SIZE - OBJ_HDR_SIZE
        } else {
            self.page_size - PAGE_HDR_SIZE
        }
    }

    /// Offset of the payload inside a page of the given span index.
    pub const fn pdata_start(&self, spix: u32) -> u32 {
        if spix == 0 {
            OBJ_HDR_SIZE
        } else {
            PAGE_HDR_SIZE
        }
    }

    pub const fn offs_to_spix(&self, offs: u32) -> u32 {
        let first = self.pdata_len(0);
        if offs < first {
            0
        } else {
            1 + (offs - first) / self.pdata_len(1)
        }
    }

    pub const fn offs_to_pdata_offs(&self, offs: u32) -> u32 {
        let first = self.pdata_len(0);
        if offs < first {
            offs
        } else {
            (offs - first) % self.pdata_len(1)
        }
    }

    pub const fn magic(&self) -> u32 {
        if self.has_linear_area() {
            (MAGIC_LINEAR_TAG << 24) | ((self.page_size & 0xfff) << 12) | (self.lin_sectors & 0xfff)
        } else {
            MAGIC_CLASSIC ^ self.page_size
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GEO: Geometry = Geometry {
        sectors: 16,
        sector_size: 1024,
        page_size: 124,
        pages_per_sector: 8,
        lin_sectors: 0,
    };

    fn span_start(spix: u32) -> u32 {
        if spix == 0 {
            0
        } else {
            GEO.pdata_len(0) + (spix - 1) * GEO.pdata_len(1)
        }
    }

    quickcheck::quickcheck! {
        fn offsets_split_into_span_and_page_offset(offs: u32) -> bool {
            let offs = offs % 0x0010_0000;
            let spix = GEO.offs_to_spix(offs);
            let pdata_offs = GEO.offs_to_pdata_offs(offs);
            span_start(spix) + pdata_offs == offs && pdata_offs < GEO.pdata_len(spix)
        }

        fn pages_stay_inside_their_sector(pix: u32) -> bool {
            let pix = pix % GEO.total_pages();
            let addr = GEO.pix_addr(pix);
            let sector = GEO.pix_to_sector(pix);
            addr >= GEO.sector_addr(sector) + SECTOR_HDR_SIZE
                && addr + GEO.page_size <= GEO.sector_addr(sector + 1)
        }
    }

    #[test]
    fn payload_sizes() {
        assert_eq!(GEO.pdata_len(0), 84);
        assert_eq!(GEO.pdata_len(1), 116);
        assert_eq!(GEO.pdata_len(7), 116);
        assert_eq!(GEO.offs_to_spix(83), 0);
        assert_eq!(GEO.offs_to_spix(84), 1);
        assert_eq!(GEO.offs_to_spix(200), 2);
        assert_eq!(GEO.offs_to_pdata_offs(200), 0);
    }

    #[test]
    fn addresses() {
        assert_eq!(GEO.pix_addr(0), 8);
        assert_eq!(GEO.pix_addr(1), 8 + 124);
        assert_eq!(GEO.pix_addr(8), 1024 + 8);
        assert_eq!(GEO.pix_to_sector(15), 1);
        assert_eq!(GEO.total_pages(), 128);
    }

    #[test]
    fn magics() {
        assert_eq!(GEO.magic(), 0xfee1_c001 ^ 124);
        let linear = Geometry {
            lin_sectors: 4,
            ..GEO
        };
        assert_eq!(linear.magic(), 0xe107_c004);
        assert_ne!(linear.magic(), GEO.magic());
    }
}
