use core::ops::ControlFlow;

use crate::error::Result;
use crate::fs::Niffs;
use crate::hal::Hal;
use crate::page::{Header, PageIx};

/// Outcome of a visitor call, `Break` ends the traversal with a value.
pub(crate) type Visit<B = ()> = Result<ControlFlow<B>>;

impl<H: Hal, const BUF: usize, const FDS: usize> Niffs<H, BUF, FDS> {
    /// Calls `visit` for every page from `start` up to, excluding, `end`,
    /// wrapping around at the last page. `start == end` visits all pages.
    ///
    /// Returns the value of the first `Break`, or `None` when the end was
    /// reached. Visitor errors abort the traversal.
    pub(crate) fn traverse<B, F>(&mut self, start: PageIx, end: PageIx, mut visit: F) -> Result<Option<B>>
    where
        F: FnMut(&mut Self, PageIx, &Header) -> Visit<B>,
    {
        let total = self.geo.total_pages();
        let mut pix = start;
        if pix >= total {
            pix = 0;
            if pix == end {
                return Ok(None);
            }
        }
        loop {
            let hdr = self.read_header(pix)?;
            if let ControlFlow::Break(found) = visit(self, pix, &hdr)? {
                return Ok(Some(found));
            }
            pix += 1;
            if pix >= total {
                pix = 0;
            }
            if pix == end {
                return Ok(None);
            }
        }
    }
}
