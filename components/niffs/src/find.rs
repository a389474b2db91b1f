use core::ops::ControlFlow;

use crate::error::{Error, Result};
use crate::fs::Niffs;
use crate::hal::Hal;
use crate::page::{Flag, ObjId, PageIx, SpanIx};
use crate::traverse::Visit;

impl<H: Hal, const BUF: usize, const FDS: usize> Niffs<H, BUF, FDS> {
    /// Lowest object id not used by any page.
    ///
    /// Fails with [`Error::NameConflict`] if an object header carrying
    /// `conflict_name` is met on the way.
    pub(crate) fn find_free_id(&mut self, conflict_name: Option<&str>) -> Result<ObjId> {
        self.bitmap_clear();
        self.traverse(0, 0, |fs, _pix, hdr| -> Visit {
            let phdr = hdr.phdr();
            if phdr.is_used() {
                if let Some(bit) = usize::from(phdr.id.obj_id()).checked_sub(1) {
                    fs.bitmap_set(bit);
                }
                if let (Some(name), Some(ohdr)) = (conflict_name, hdr.object()) {
                    if ohdr.name.matches(name) {
                        bail!(Error::NameConflict);
                    }
                }
            }
            Ok(ControlFlow::Continue(()))
        })?;

        let max_id = self.geo.total_pages().saturating_sub(2);
        (1..max_id)
            .find(|&id| !self.bitmap_get(id as usize - 1))
            .map(|id| id as ObjId)
            .ok_or(Error::NoFreeId)
    }

    /// Next free and clean page from the allocation cursor on, skipping
    /// `excl_sector`.
    pub(crate) fn find_free_page(&mut self, excl_sector: Option<u32>) -> Result<PageIx> {
        let start = self.last_free_pix;
        let found = self.traverse(start, start, |fs, pix, hdr| -> Visit<PageIx> {
            if excl_sector == Some(fs.geo.pix_to_sector(pix)) {
                return Ok(ControlFlow::Continue(()));
            }
            if hdr.phdr().is_free_clean() {
                return Ok(ControlFlow::Break(pix));
            }
            Ok(ControlFlow::Continue(()))
        })?;
        match found {
            Some(pix) => {
                self.last_free_pix = pix;
                Ok(pix)
            }
            None => bail!(Error::NoFreePage),
        }
    }

    /// Position of span `spix` of object `obj_id`, searching from `start`.
    ///
    /// A `MOVING` page only counts when nothing better exists, a stale one
    /// is deleted as soon as its replacement shows up.
    pub(crate) fn find_page(&mut self, obj_id: ObjId, spix: SpanIx, start: PageIx) -> Result<PageIx> {
        let mut moving: Option<PageIx> = None;
        let found = self.traverse(start, start, |fs, pix, hdr| -> Visit<PageIx> {
            let phdr = hdr.phdr();
            if !phdr.flag.is_valid()
                || !phdr.is_used()
                || phdr.id.obj_id() != obj_id
                || phdr.id.spix() != spix
            {
                return Ok(ControlFlow::Continue(()));
            }
            if let Some(stale) = moving.take() {
                debug!("find  : pix {:04x} deleting stale moving page", stale);
                fs.delete_page(stale)?;
            }
            if phdr.flag == Flag::Moving {
                moving = Some(pix);
                return Ok(ControlFlow::Continue(()));
            }
            Ok(ControlFlow::Break(pix))
        })?;
        match (found, moving) {
            (Some(pix), _) => Ok(pix),
            (None, Some(pix)) => {
                debug!("find  : {:04x}/{:04x} only moving page {:04x}", obj_id, spix, pix);
                Ok(pix)
            }
            (None, None) => bail!(Error::PageNotFound),
        }
    }
}
