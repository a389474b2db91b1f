use crate::config::{Config, GcWeights};
use crate::error::{Error, Result};
use crate::file::{Fd, FileDesc};
use crate::geometry::Geometry;
use crate::hal::Hal;
use crate::page::{
    Header, LinearFileHdr, ObjId, ObjectHdr, PageHdr, PageIx, SectorHdr, LIN_HDR_SIZE,
    PAGE_HDR_SIZE, SECTOR_HDR_SIZE,
};

/// A NIFFS instance on top of the flash behind `H`.
///
/// `BUF` is the size of the working buffer, it must hold at least one page
/// and one bit per page. `FDS` is the number of files that can be open at
/// the same time.
pub struct Niffs<H, const BUF: usize, const FDS: usize> {
    pub(crate) hal: H,
    pub(crate) geo: Geometry,
    pub(crate) weights: GcWeights,
    pub(crate) buf: [u8; BUF],
    pub(crate) descs: [Option<FileDesc>; FDS],
    pub(crate) free_pages: u32,
    pub(crate) dele_pages: u32,
    pub(crate) max_era: u32,
    pub(crate) last_free_pix: PageIx,
    pub(crate) mounted: bool,
    pub(crate) in_gc: bool,
}

impl<H: Hal, const BUF: usize, const FDS: usize> Niffs<H, BUF, FDS> {
    /// Validates `config` against the buffer size and sets up an unmounted
    /// instance. Nothing is read from flash yet.
    pub fn new(hal: H, config: Config) -> Result<Self> {
        let geo = config.geometry(BUF)?;
        Ok(Self {
            hal,
            geo,
            weights: config.gc_weights,
            buf: [0; BUF],
            descs: [None; FDS],
            free_pages: 0,
            dele_pages: 0,
            max_era: 0,
            last_free_pix: 0,
            mounted: false,
            in_gc: false,
        })
    }

    pub fn geometry(&self) -> &Geometry {
        &self.geo
    }

    pub fn is_mounted(&self) -> bool {
        self.mounted
    }

    pub fn hal(&self) -> &H {
        &self.hal
    }

    pub fn hal_mut(&mut self) -> &mut H {
        &mut self.hal
    }

    pub fn into_hal(self) -> H {
        self.hal
    }

    pub(crate) fn read_sector_hdr(&mut self, sector: u32) -> Result<SectorHdr> {
        let mut raw = [0u8; SECTOR_HDR_SIZE as usize];
        self.hal.read(self.geo.sector_addr(sector), &mut raw)?;
        Ok(SectorHdr::decode(&raw))
    }

    pub(crate) fn read_phdr(&mut self, pix: PageIx) -> Result<PageHdr> {
        let mut raw = [0u8; PAGE_HDR_SIZE as usize];
        self.hal.read(self.geo.pix_addr(pix), &mut raw)?;
        Ok(PageHdr::decode(&raw))
    }

    fn read_hdr_raw(&mut self, pix: PageIx) -> Result<[u8; LIN_HDR_SIZE as usize]> {
        let mut raw = [0u8; LIN_HDR_SIZE as usize];
        self.hal.read(self.geo.pix_addr(pix), &mut raw)?;
        Ok(raw)
    }

    pub(crate) fn read_header(&mut self, pix: PageIx) -> Result<Header> {
        Ok(Header::decode(&self.read_hdr_raw(pix)?))
    }

    /// Reads the page as object header, regardless of its id.
    pub(crate) fn read_object_hdr(&mut self, pix: PageIx) -> Result<ObjectHdr> {
        Ok(ObjectHdr::decode(&self.read_hdr_raw(pix)?))
    }

    pub(crate) fn read_linear_hdr(&mut self, pix: PageIx) -> Result<LinearFileHdr> {
        Ok(LinearFileHdr::decode(&self.read_hdr_raw(pix)?))
    }

    pub(crate) fn write_word(&mut self, addr: u32, value: u32) -> Result<()> {
        self.hal.write(addr, &value.to_le_bytes())
    }

    /// Copies flash contents through a small stack buffer.
    pub(crate) fn copy_flash(&mut self, src: u32, dst: u32, len: u32) -> Result<()> {
        let mut chunk = [0u8; 32];
        let mut done = 0;
        while done < len {
            let n = core::cmp::min(len - done, chunk.len() as u32);
            let part = &mut chunk[..n as usize];
            self.hal.read(src + done, part)?;
            self.hal.write(dst + done, part)?;
            done += n;
        }
        Ok(())
    }

    /// True if `len` bytes at `addr` are all erased.
    pub(crate) fn is_blank(&mut self, addr: u32, len: u32) -> Result<bool> {
        let mut chunk = [0u8; 32];
        let mut done = 0;
        while done < len {
            let n = core::cmp::min(len - done, chunk.len() as u32);
            let part = &mut chunk[..n as usize];
            self.hal.read(addr + done, part)?;
            if part.iter().any(|&b| b != 0xff) {
                return Ok(false);
            }
            done += n;
        }
        Ok(true)
    }

    pub(crate) fn desc(&self, fd: Fd) -> Result<FileDesc> {
        match self.descs.get(fd.index()) {
            None => bail!(Error::FiledescBad),
            Some(None) => bail!(Error::FiledescClosed),
            Some(Some(desc)) => Ok(*desc),
        }
    }

    pub(crate) fn desc_mut(&mut self, fd: Fd) -> Result<&mut FileDesc> {
        match self.descs.get_mut(fd.index()) {
            None => bail!(Error::FiledescBad),
            Some(None) => bail!(Error::FiledescClosed),
            Some(Some(desc)) => Ok(desc),
        }
    }

    /// Checks that the page at an object header position still belongs to
    /// `obj_id`.
    pub(crate) fn check_coherent(phdr: &PageHdr, obj_id: ObjId) -> Result<()> {
        if phdr.id.is_deleted() {
            bail!(Error::PageDeleted);
        }
        if phdr.id.is_free() {
            bail!(Error::PageFree);
        }
        if phdr.id.obj_id() != obj_id {
            bail!(Error::IncoherentId);
        }
        Ok(())
    }

    /// Follows a page to its new position in all open descriptors.
    pub(crate) fn inform_page_movement(&mut self, src: PageIx, dst: PageIx) {
        for desc in self.descs.iter_mut().flatten() {
            if desc.obj_pix == src {
                trace!("fd obj_pix {:04x} -> {:04x}", src, dst);
                desc.obj_pix = dst;
            }
            if desc.cur_pix == src {
                desc.cur_pix = dst;
            }
        }
    }

    /// Closes descriptors whose header went away, rewinds the ones that were
    /// positioned on the deleted page.
    pub(crate) fn inform_page_delete(&mut self, pix: PageIx) {
        for slot in self.descs.iter_mut() {
            if slot.as_ref().map_or(false, |desc| desc.obj_pix == pix) {
                trace!("fd closed, obj_pix {:04x} deleted", pix);
                *slot = None;
            } else if let Some(desc) = slot {
                if desc.cur_pix == pix {
                    desc.cur_pix = desc.obj_pix;
                    desc.offs = 0;
                }
            }
        }
    }

    pub(crate) fn bitmap_clear(&mut self) {
        self.buf.fill(0);
    }

    pub(crate) fn bitmap_set(&mut self, bit: usize) {
        if let Some(byte) = self.buf.get_mut(bit / 8) {
            *byte |= 1 << (bit % 8);
        }
    }

    pub(crate) fn bitmap_get(&self, bit: usize) -> bool {
        self.buf
            .get(bit / 8)
            .map_or(false, |byte| byte & (1 << (bit % 8)) != 0)
    }
}
