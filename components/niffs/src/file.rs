//! The file engine: objects made of pages, and descriptors on them.

use core::cmp::min;
use core::ops::ControlFlow;

use crate::error::{Error, Result};
use crate::fs::Niffs;
use crate::hal::Hal;
use crate::page::{
    put_le_u32, FileType, Flag, LinearFileHdr, MoveFlag, Name, ObjId, ObjectHdr, PageHdr, PageId,
    PageIx, SpanIx, LIN_HDR_SIZE, NAME_LEN, OBJ_HDR_SIZE, OFFS_FLAG, OFFS_LEN, OFFS_NAME,
    PAGE_HDR_SIZE, UNDEF_LEN,
};
use crate::primitives::Payload;
use crate::traverse::Visit;

bitflags::bitflags! {
    /// Flags given to [`Niffs::open`].
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct OpenFlags: u8 {
        /// Writes always go to the end of the file.
        const APPEND = 1 << 0;
        /// Throw away the contents of an existing file.
        const TRUNC = 1 << 1;
        /// Create the file if it does not exist.
        const CREAT = 1 << 2;
        const RDONLY = 1 << 3;
        const WRONLY = 1 << 4;
        const RDWR = Self::RDONLY.bits() | Self::WRONLY.bits();
        /// Accepted for compatibility, reads are always direct.
        const DIRECT = 1 << 5;
        /// Together with `CREAT`, fail if the file exists.
        const EXCL = 1 << 6;
        /// Open or create a linear file, implies `APPEND`.
        const LINEAR = 1 << 7;
    }
}

/// Handle of an open file.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Fd(usize);

impl Fd {
    pub const fn new(index: usize) -> Self {
        Self(index)
    }

    pub const fn index(self) -> usize {
        self.0
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SeekFrom {
    Start(u32),
    Current(i32),
    End(i32),
}

/// A readable range of flash, as handed out by [`Niffs::read_ptr`].
///
/// The address is relative to the filesystem region, use
/// [`Niffs::read_span`] to fetch the bytes through the HAL.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FlashSpan {
    pub(crate) addr: u32,
    pub(crate) len: u32,
}

impl FlashSpan {
    pub const fn addr(&self) -> u32 {
        self.addr
    }

    pub const fn len(&self) -> u32 {
        self.len
    }

    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct FileDesc {
    pub obj_id: ObjId,
    /// Position of the object header.
    pub obj_pix: PageIx,
    /// Position of the page holding `offs`, a hint only.
    pub cur_pix: PageIx,
    pub offs: u32,
    pub flags: OpenFlags,
    pub ftype: FileType,
}

/// Placement of a new linear file.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct LinearMeta {
    pub start_sector: u32,
    pub resv_sectors: u32,
}

/// Result of looking up an object header by name.
pub(crate) struct Lookup {
    pub found: Option<(PageIx, ObjId)>,
    /// Header left behind by an interrupted move, set if nothing else matched.
    pub moving: Option<(PageIx, ObjId)>,
    pub ftype: FileType,
}

impl Lookup {
    pub fn any(&self) -> Option<(PageIx, ObjId)> {
        self.found.or(self.moving)
    }
}

fn len_u32(data: &[u8]) -> Result<u32> {
    u32::try_from(data.len()).map_err(|_| Error::Full)
}

impl<H: Hal, const BUF: usize, const FDS: usize> Niffs<H, BUF, FDS> {
    /// Writes a new, clean object header.
    pub(crate) fn file_create(
        &mut self,
        name: &str,
        ftype: FileType,
        linear: Option<LinearMeta>,
    ) -> Result<()> {
        if ftype == FileType::Linear && !self.geo.has_linear_area() {
            bail!(Error::BadConf);
        }
        self.ensure_free_pages(1)?;
        let obj_id = self.find_free_id(Some(name))?;
        let pix = self.find_free_page(None)?;
        debug!("create: pix {:04x} oid {:04x} name {}", pix, obj_id, name);

        let ohdr = ObjectHdr {
            phdr: PageHdr {
                id: PageId::new(obj_id, 0),
                flag: Flag::Clean,
            },
            len: UNDEF_LEN,
            name: Name::new(name),
            ftype,
        };
        let mut raw = [0xff; LIN_HDR_SIZE as usize];
        let end = match ftype {
            FileType::File => {
                ohdr.encode(&mut raw);
                OBJ_HDR_SIZE
            }
            FileType::Linear => {
                let meta = match linear {
                    Some(meta) => meta,
                    None => LinearMeta {
                        start_sector: self.linear_find_space(1)?,
                        resv_sectors: 1,
                    },
                };
                LinearFileHdr {
                    ohdr,
                    start_sector: meta.start_sector,
                    resv_sectors: meta.resv_sectors,
                }
                .encode(&mut raw);
                LIN_HDR_SIZE
            }
            FileType::Other(_) => bail!(Error::BadConf),
        };
        self.write_page(
            pix,
            ohdr.phdr,
            Payload::Bytes(&raw[PAGE_HDR_SIZE as usize..end as usize]),
        )?;
        self.free_pages -= 1;
        Ok(())
    }

    /// Finds the live object header called `name`.
    ///
    /// Headers of objects being removed (length zero) do not count.
    pub(crate) fn lookup_name(&mut self, name: &str) -> Result<Lookup> {
        let mut moving: Option<(PageIx, ObjId)> = None;
        let mut ftype = FileType::File;
        let found = self.traverse(0, 0, |fs, pix, hdr| -> Visit<(PageIx, ObjId)> {
            let phdr = hdr.phdr();
            let ohdr = match hdr.object() {
                Some(ohdr) if phdr.flag.is_valid() && phdr.is_used() => ohdr,
                _ => return Ok(ControlFlow::Continue(())),
            };
            if ohdr.len == 0 || !ohdr.name.matches(name) {
                return Ok(ControlFlow::Continue(()));
            }
            if let Some((stale, _)) = moving.take() {
                debug!("open  : pix {:04x} deleting stale moving header", stale);
                fs.delete_page(stale)?;
            }
            ftype = ohdr.ftype;
            let entry = (pix, phdr.id.obj_id());
            if phdr.flag == Flag::Moving {
                moving = Some(entry);
                return Ok(ControlFlow::Continue(()));
            }
            Ok(ControlFlow::Break(entry))
        })?;
        Ok(Lookup {
            found,
            moving,
            ftype,
        })
    }

    pub(crate) fn file_open(&mut self, name: &str, flags: OpenFlags) -> Result<Fd> {
        let Some(slot) = self.descs.iter().position(Option::is_none) else {
            bail!(Error::OutOfFiledescs);
        };
        let lookup = self.lookup_name(name)?;
        let (pix, obj_id) = match (lookup.found, lookup.moving) {
            (Some(entry), _) => entry,
            (None, Some((pix, obj_id))) => {
                debug!("open  : pix {:04x} only found moving header", pix);
                match self.tidy_moving_header(pix)? {
                    Some(pix) => (pix, obj_id),
                    None => bail!(Error::FileNotFound),
                }
            }
            (None, None) => bail!(Error::FileNotFound),
        };
        debug!("open  : {} pix {:04x} oid {:04x} fd {}", name, pix, obj_id, slot);
        self.descs[slot] = Some(FileDesc {
            obj_id,
            obj_pix: pix,
            cur_pix: pix,
            offs: 0,
            flags,
            ftype: lookup.ftype,
        });
        Ok(Fd::new(slot))
    }

    /// Closing a closed descriptor is fine, an unknown one is not.
    pub(crate) fn file_close(&mut self, fd: Fd) -> Result<()> {
        match self.descs.get_mut(fd.index()) {
            Some(slot) => {
                *slot = None;
                Ok(())
            }
            None => bail!(Error::FiledescBad),
        }
    }

    /// Flash range holding the bytes at the descriptor's offset.
    pub(crate) fn file_read_ptr(&mut self, fd: Fd) -> Result<FlashSpan> {
        let desc = self.desc(fd)?;
        if !desc.flags.contains(OpenFlags::RDONLY) {
            bail!(Error::NotReadable);
        }
        let ohdr = self.read_object_hdr(desc.obj_pix)?;
        let flen = ohdr.file_len();
        if desc.offs >= flen {
            return Err(Error::EndOfFile);
        }
        Self::check_coherent(&ohdr.phdr, desc.obj_id)?;
        let rem_tot = flen - desc.offs;

        if desc.ftype == FileType::Linear {
            let lhdr = self.read_linear_hdr(desc.obj_pix)?;
            return Ok(FlashSpan {
                addr: self.geo.sector_addr(lhdr.start_sector) + desc.offs,
                len: rem_tot,
            });
        }

        let spix = self.geo.offs_to_spix(desc.offs);
        let mut pix = desc.cur_pix;
        let mut phdr = self.read_phdr(pix)?;
        if u32::from(phdr.id.spix()) != spix {
            pix = self.find_page(desc.obj_id, spix as SpanIx, desc.cur_pix)?;
            self.desc_mut(fd)?.cur_pix = pix;
            phdr = self.read_phdr(pix)?;
        }
        Self::check_coherent(&phdr, desc.obj_id)?;
        let pdata_offs = self.geo.offs_to_pdata_offs(desc.offs);
        Ok(FlashSpan {
            addr: self.geo.pix_addr(pix) + self.geo.pdata_start(spix) + pdata_offs,
            len: min(rem_tot, self.geo.pdata_len(spix) - pdata_offs),
        })
    }

    pub(crate) fn file_seek(&mut self, fd: Fd, pos: SeekFrom) -> Result<u32> {
        let desc = self.desc(fd)?;
        let flen = self.read_object_hdr(desc.obj_pix)?.file_len();
        let target = match pos {
            SeekFrom::Start(offs) => i64::from(offs),
            SeekFrom::Current(delta) => i64::from(desc.offs) + i64::from(delta),
            SeekFrom::End(delta) => i64::from(flen) + i64::from(delta),
        };
        let offs = target.clamp(0, i64::from(flen)) as u32;

        let spix = self.geo.offs_to_spix(offs);
        if desc.ftype != FileType::Linear
            && spix != self.geo.offs_to_spix(desc.offs)
            // no page behind the end of a file ending on a page boundary
            && !(offs == flen && self.geo.offs_to_pdata_offs(offs) == 0)
        {
            let pix = self.find_page(desc.obj_id, spix as SpanIx, desc.cur_pix)?;
            self.desc_mut(fd)?.cur_pix = pix;
        }
        self.desc_mut(fd)?.offs = offs;
        Ok(offs)
    }

    /// Number of pages an append of `len > 0` bytes to a file of `offs`
    /// bytes allocates, the final header move included.
    fn append_pages(&self, offs: u32, len: u32) -> u32 {
        let first = self.geo.offs_to_spix(offs);
        let last = self.geo.offs_to_spix(offs + len - 1);
        if offs == 0 {
            // the clean header takes span 0 in place
            last
        } else if first == 0 {
            // the header is rewritten along with span 0
            last + 1
        } else {
            last - first + 2
        }
    }

    /// Appends `data` to the end of the file.
    ///
    /// New data is written first, the object header is updated last, that
    /// makes the new length visible in a single step.
    pub(crate) fn file_append(&mut self, fd: Fd, data: &[u8]) -> Result<()> {
        let desc = self.desc(fd)?;
        if !desc.flags.contains(OpenFlags::WRONLY) {
            bail!(Error::NotWritable);
        }
        if data.is_empty() {
            return Ok(());
        }
        let len = len_u32(data)?;
        let ohdr = self.read_object_hdr(desc.obj_pix)?;
        if ohdr.phdr.id.obj_id() != desc.obj_id {
            bail!(Error::IncoherentId);
        }
        let file_offs = ohdr.file_len();
        let ss = self.geo.sector_size;
        // header to finalize in place, else the header is moved
        let mut dst_ohdr: Option<PageIx> = None;

        if desc.ftype == FileType::Linear {
            let avail_sectors = self
                .linear_avail_size(fd)?
                .saturating_sub(file_offs.div_ceil(ss));
            let free_in_cur = match file_offs % ss {
                0 => 0,
                rem => ss - rem,
            };
            if u64::from(len) > u64::from(avail_sectors) * u64::from(ss) + u64::from(free_in_cur) {
                bail!(Error::LinearNoSpace);
            }
            if file_offs == 0 {
                dst_ohdr = Some(desc.obj_pix);
            } else {
                self.ensure_free_pages(1)?;
            }
        } else if file_offs == 0 && self.geo.offs_to_spix(len - 1) == 0 {
            // fits into the clean header
        } else {
            self.ensure_free_pages(self.append_pages(file_offs, len))?;
        }

        // the header might have been moved by the garbage collector
        let desc = self.desc(fd)?;
        let obj_pix = desc.obj_pix;
        let phdr = self.read_phdr(obj_pix)?;
        if phdr.id.obj_id() != desc.obj_id {
            bail!(Error::IncoherentId);
        }
        if file_offs > 0 && phdr.flag == Flag::Written {
            self.write_word(self.geo.pix_addr(obj_pix) + OFFS_FLAG, Flag::Moving.raw())?;
        }
        debug!(
            "append: oid {:04x} pix {:04x} offs {} len {}",
            desc.obj_id, obj_pix, file_offs, len
        );

        if desc.ftype == FileType::Linear {
            self.append_linear(fd, obj_pix, file_offs, data)?;
        } else {
            self.append_paged(fd, file_offs, data, &mut dst_ohdr)?;
        }

        let new_len = file_offs + len;
        let obj_pix = self.desc(fd)?.obj_pix;
        match dst_ohdr {
            None => {
                let new_pix = self.find_free_page(None)?;
                let page_size = self.geo.page_size as usize;
                let addr = self.geo.pix_addr(obj_pix);
                self.hal.read(addr, &mut self.buf[..page_size])?;
                put_le_u32(&mut self.buf, OFFS_LEN, new_len);
                self.move_page(
                    obj_pix,
                    new_pix,
                    Payload::Buf {
                        offs: PAGE_HDR_SIZE as usize,
                        len: page_size - PAGE_HDR_SIZE as usize,
                    },
                    MoveFlag::Force(Flag::Written),
                )
            }
            Some(dst) => {
                let addr = self.geo.pix_addr(dst);
                self.write_word(addr + OFFS_LEN, new_len)?;
                self.write_word(addr + OFFS_FLAG, Flag::Written.raw())?;
                if dst != obj_pix {
                    self.inform_page_movement(obj_pix, dst);
                    self.delete_page(obj_pix)?;
                }
                Ok(())
            }
        }
    }

    fn append_linear(&mut self, fd: Fd, obj_pix: PageIx, file_offs: u32, data: &[u8]) -> Result<()> {
        let lhdr = self.read_linear_hdr(obj_pix)?;
        let ss = self.geo.sector_size;
        let base = self.geo.sector_addr(lhdr.start_sector);
        let mut written = 0usize;
        while written < data.len() {
            let pos = file_offs + written as u32;
            let avail = if pos % ss == 0 {
                // entering a sector, it may hold leftovers of an earlier file
                let sector = lhdr.start_sector + pos / ss;
                let addr = self.geo.sector_addr(sector);
                if !self.is_blank(addr, ss)? {
                    debug!("append: erasing linear sector {}", sector);
                    self.hal.erase(addr, ss)?;
                }
                ss
            } else {
                ss - pos % ss
            };
            let n = min(avail as usize, data.len() - written);
            self.hal.write(base + pos, &data[written..written + n])?;
            written += n;
            self.desc_mut(fd)?.offs += n as u32;
        }
        Ok(())
    }

    fn append_paged(
        &mut self,
        fd: Fd,
        file_offs: u32,
        data: &[u8],
        dst_ohdr: &mut Option<PageIx>,
    ) -> Result<()> {
        let obj_id = self.desc(fd)?.obj_id;
        let page_size = self.geo.page_size as usize;
        let pdata1 = self.geo.pdata_len(1) as usize;
        let mut written = 0usize;
        while written < data.len() {
            let pos = file_offs + written as u32;
            let spix = self.geo.offs_to_spix(pos);
            let pdata_offs = self.geo.offs_to_pdata_offs(pos) as usize;
            let rem = &data[written..];
            let avail;

            if pos == 0 {
                // fresh object, fill the clean header page
                avail = min(rem.len(), self.geo.pdata_len(0) as usize);
                let obj_pix = self.desc(fd)?.obj_pix;
                self.hal
                    .write(self.geo.pix_addr(obj_pix) + OBJ_HDR_SIZE, &rem[..avail])?;
                *dst_ohdr = Some(obj_pix);
            } else if pdata_offs == 0 {
                // new span
                avail = min(rem.len(), pdata1);
                let new_pix = self.find_free_page(None)?;
                let phdr = PageHdr {
                    id: PageId::new(obj_id, spix as SpanIx),
                    flag: Flag::Written,
                };
                self.write_page(new_pix, phdr, Payload::Bytes(&rem[..avail]))?;
                self.free_pages -= 1;
                self.desc_mut(fd)?.cur_pix = new_pix;
            } else if spix == 0 {
                // partially filled header page, rewrite it as a new clean
                // header which gets finalized at the end
                avail = min(rem.len(), self.geo.pdata_len(0) as usize - pdata_offs);
                let src_pix = self.desc(fd)?.obj_pix;
                let new_pix = self.find_free_page(None)?;
                let kept = OBJ_HDR_SIZE as usize + pdata_offs;
                let addr = self.geo.pix_addr(src_pix);
                self.hal.read(addr, &mut self.buf[..kept])?;
                self.buf[kept..kept + avail].copy_from_slice(&rem[..avail]);
                self.buf[kept + avail..page_size].fill(0xff);
                put_le_u32(&mut self.buf, OFFS_LEN, UNDEF_LEN);
                let phdr = PageHdr {
                    id: PageId::new(obj_id, 0),
                    flag: Flag::Clean,
                };
                self.write_page(
                    new_pix,
                    phdr,
                    Payload::Buf {
                        offs: PAGE_HDR_SIZE as usize,
                        len: pdata1,
                    },
                )?;
                self.free_pages -= 1;
                *dst_ohdr = Some(new_pix);
                self.desc_mut(fd)?.cur_pix = new_pix;
            } else {
                // partially filled data page, move it with the new data added
                avail = min(rem.len(), pdata1 - pdata_offs);
                let cur_pix = self.desc(fd)?.cur_pix;
                let src_pix = self.find_page(obj_id, spix as SpanIx, cur_pix)?;
                let new_pix = self.find_free_page(None)?;
                let addr = self.geo.pix_addr(src_pix) + PAGE_HDR_SIZE;
                self.hal.read(addr, &mut self.buf[..pdata_offs])?;
                self.buf[pdata_offs..pdata_offs + avail].copy_from_slice(&rem[..avail]);
                self.buf[pdata_offs + avail..pdata1].fill(0xff);
                self.move_page(
                    src_pix,
                    new_pix,
                    Payload::Buf {
                        offs: 0,
                        len: pdata1,
                    },
                    MoveFlag::Force(Flag::Written),
                )?;
                self.desc_mut(fd)?.cur_pix = new_pix;
            }

            written += avail;
            self.desc_mut(fd)?.offs += avail as u32;
        }
        Ok(())
    }

    /// Overwrites `data.len()` bytes at `offset`, the file does not grow.
    ///
    /// Every touched page is moved and committed on its own.
    pub(crate) fn file_modify(&mut self, fd: Fd, offset: u32, data: &[u8]) -> Result<()> {
        let desc = self.desc(fd)?;
        if !desc.flags.contains(OpenFlags::WRONLY) {
            bail!(Error::NotWritable);
        }
        if desc.ftype == FileType::Linear {
            bail!(Error::LinearFile);
        }
        if data.is_empty() {
            return Ok(());
        }
        let len = len_u32(data)?;
        let ohdr = self.read_object_hdr(desc.obj_pix)?;
        if ohdr.phdr.id.obj_id() != desc.obj_id {
            bail!(Error::IncoherentId);
        }
        if u64::from(offset) + u64::from(len) > u64::from(ohdr.file_len()) {
            bail!(Error::ModifyBeyondFile);
        }

        let first = self.geo.offs_to_spix(offset);
        let last = self.geo.offs_to_spix(offset + len - 1);
        self.ensure_free_pages(last - first + 1)?;
        let desc = self.desc(fd)?;
        let phdr = self.read_phdr(desc.obj_pix)?;
        if phdr.id.obj_id() != desc.obj_id {
            bail!(Error::IncoherentId);
        }
        debug!("modify: oid {:04x} offs {} len {}", desc.obj_id, offset, len);

        let meta = (OBJ_HDR_SIZE - PAGE_HDR_SIZE) as usize;
        let mut search_pix = desc.obj_pix;
        let mut written = 0usize;
        while written < data.len() {
            let pos = offset + written as u32;
            let spix = self.geo.offs_to_spix(pos);
            let pdata_len = self.geo.pdata_len(spix) as usize;
            let pdata_offs = self.geo.offs_to_pdata_offs(pos) as usize;
            let avail = min(data.len() - written, pdata_len - pdata_offs);
            let chunk = &data[written..written + avail];

            let orig_pix = self.find_page(desc.obj_id, spix as SpanIx, search_pix)?;
            search_pix = orig_pix;
            let new_pix = self.find_free_page(None)?;
            if spix == 0 || avail < pdata_len {
                // header page or partial page, splice into the old contents
                let skip = if spix == 0 { meta } else { 0 };
                let addr = self.geo.pix_addr(orig_pix) + PAGE_HDR_SIZE;
                self.hal.read(addr, &mut self.buf[..skip + pdata_len])?;
                self.buf[skip + pdata_offs..skip + pdata_offs + avail].copy_from_slice(chunk);
                self.move_page(
                    orig_pix,
                    new_pix,
                    Payload::Buf {
                        offs: 0,
                        len: skip + pdata_len,
                    },
                    MoveFlag::Force(Flag::Written),
                )?;
            } else {
                self.move_page(
                    orig_pix,
                    new_pix,
                    Payload::Bytes(chunk),
                    MoveFlag::Force(Flag::Written),
                )?;
            }

            written += avail;
            let desc = self.desc_mut(fd)?;
            desc.offs += avail as u32;
            desc.cur_pix = new_pix;
        }
        Ok(())
    }

    /// Shortens the file to `new_len` bytes, zero removes the file and
    /// closes the descriptor.
    pub(crate) fn file_truncate(&mut self, fd: Fd, new_len: u32) -> Result<()> {
        let desc = self.desc(fd)?;
        if !desc.flags.contains(OpenFlags::WRONLY) {
            bail!(Error::NotWritable);
        }
        if desc.ftype == FileType::Linear && new_len != 0 {
            bail!(Error::LinearFile);
        }
        let ohdr = self.read_object_hdr(desc.obj_pix)?;
        let flen = ohdr.file_len();
        if ohdr.phdr.id.obj_id() != desc.obj_id {
            bail!(Error::IncoherentId);
        }
        if new_len > flen {
            bail!(Error::TruncateBeyondFile);
        }
        if new_len != 0 && new_len == flen {
            return Ok(());
        }
        debug!("trunc : oid {:04x} {} -> {}", desc.obj_id, flen, new_len);

        if new_len > 0 {
            self.ensure_free_pages(1)?;
        }
        let desc = self.desc(fd)?;
        let obj_pix = desc.obj_pix;
        let addr = self.geo.pix_addr(obj_pix);
        let phdr = self.read_phdr(obj_pix)?;
        if phdr.id.obj_id() != desc.obj_id {
            bail!(Error::IncoherentId);
        }

        if new_len > 0 {
            self.write_word(addr + OFFS_FLAG, Flag::Moving.raw())?;
            let new_pix = self.find_free_page(None)?;
            let page_size = self.geo.page_size as usize;
            self.hal.read(addr, &mut self.buf[..page_size])?;
            put_le_u32(&mut self.buf, OFFS_LEN, new_len);
            self.move_page(
                obj_pix,
                new_pix,
                Payload::Buf {
                    offs: PAGE_HDR_SIZE as usize,
                    len: page_size - PAGE_HDR_SIZE as usize,
                },
                MoveFlag::Force(Flag::Written),
            )?;
        } else if desc.ftype == FileType::Linear {
            return self.delete_page(obj_pix);
        } else {
            // from here on the object is being removed
            self.write_word(addr + OFFS_LEN, 0)?;
        }

        let mut del_from = self.geo.offs_to_spix(new_len);
        if self.geo.offs_to_pdata_offs(new_len) != 0 || del_from == 0 {
            del_from += 1;
        }
        let obj_id = desc.obj_id;
        self.traverse(0, 0, |fs, pix, hdr| -> Visit {
            let phdr = hdr.phdr();
            if phdr.is_used() && phdr.id.obj_id() == obj_id && u32::from(phdr.id.spix()) >= del_from {
                fs.delete_page(pix)?;
            }
            Ok(ControlFlow::Continue(()))
        })?;

        if new_len == 0 {
            self.delete_page(obj_pix)?;
        }
        Ok(())
    }

    pub(crate) fn file_rename(&mut self, old: &str, new: &str) -> Result<()> {
        self.ensure_free_pages(1)?;
        let dst_pix = self.find_free_page(None)?;
        let Some((src_pix, _)) = self.lookup_name(old)?.any() else {
            bail!(Error::FileNotFound);
        };
        if self.lookup_name(new)?.any().is_some() {
            bail!(Error::NameConflict);
        }
        debug!("rename: pix {:04x} {} -> {}", src_pix, old, new);

        let page_size = self.geo.page_size as usize;
        let addr = self.geo.pix_addr(src_pix);
        self.hal.read(addr, &mut self.buf[..page_size])?;
        let name = OFFS_NAME as usize;
        self.buf[name..name + NAME_LEN].copy_from_slice(Name::new(new).raw());
        self.move_page(
            src_pix,
            dst_pix,
            Payload::Buf {
                offs: PAGE_HDR_SIZE as usize,
                len: self.geo.pdata_len(1) as usize,
            },
            MoveFlag::Keep,
        )
    }
}
