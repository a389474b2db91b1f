use core::cmp::min;
use core::ops::ControlFlow;

use crate::error::{Error, Result};
use crate::file::{Fd, FlashSpan, LinearMeta, OpenFlags, SeekFrom};
use crate::fs::Niffs;
use crate::hal::Hal;
use crate::page::{FileType, Name, ObjId, PageIx, UNDEF_LEN};
use crate::traverse::Visit;

/// Filesystem usage, see [`Niffs::info`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Info {
    /// Payload bytes storable when all but one sector are in use.
    pub total_bytes: u32,
    /// Payload bytes taken by busy pages.
    pub used_bytes: u32,
    /// Less than a sector worth of free pages, the filesystem needs a check.
    pub overflow: bool,
    pub lin_total_sectors: u32,
    pub lin_used_sectors: u32,
    /// Longest run of free linear sectors.
    pub lin_max_conseq_free: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Stat {
    pub obj_id: ObjId,
    pub size: u32,
    pub name: Name,
    pub ftype: FileType,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DirEntry {
    pub obj_id: ObjId,
    pub name: Name,
    pub size: u32,
    pub ftype: FileType,
    pub pix: PageIx,
}

/// Position of a directory listing.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Dir {
    pix: PageIx,
}

impl<H: Hal, const BUF: usize, const FDS: usize> Niffs<H, BUF, FDS> {
    fn ensure_mounted(&self) -> Result<()> {
        if !self.mounted {
            bail!(Error::NotMounted);
        }
        Ok(())
    }

    /// Erases all sectors and writes fresh sector headers.
    pub fn format(&mut self) -> Result<()> {
        if self.mounted {
            bail!(Error::Mounted);
        }
        info!("format: {} sectors", self.geo.sectors);
        let magic = self.geo.magic();
        for sector in 0..self.geo.sectors {
            self.erase_sector(sector)?;
            if self.read_sector_hdr(sector)?.magic != magic {
                error!("format: sector {} did not take", sector);
                bail!(Error::SectorUnformattable);
            }
        }
        let lin_start = self.geo.sectors;
        for sector in lin_start..lin_start + self.geo.lin_sectors {
            let addr = self.geo.sector_addr(sector);
            self.hal.erase(addr, self.geo.sector_size)?;
        }
        Ok(())
    }

    pub fn mount(&mut self) -> Result<()> {
        if self.mounted {
            bail!(Error::Mounted);
        }
        self.setup()?;
        self.mounted = true;
        info!("mount : free {} dele {}", self.free_pages, self.dele_pages);
        Ok(())
    }

    /// Closes all open files and unmounts.
    pub fn unmount(&mut self) -> Result<()> {
        self.ensure_mounted()?;
        self.descs = [None; FDS];
        self.mounted = false;
        Ok(())
    }

    /// Repairs whatever an interrupted operation left behind.
    ///
    /// Must run on an unmounted filesystem, typically before mounting after a
    /// reset. Running it again finds nothing to repair.
    pub fn chk(&mut self) -> Result<()> {
        if self.mounted {
            bail!(Error::Mounted);
        }
        self.check()
    }

    pub fn info(&mut self) -> Result<Info> {
        self.ensure_mounted()?;
        let pps = self.geo.pages_per_sector;
        let pdata = self.geo.pdata_len(1);
        let busy = self.geo.total_pages() - self.free_pages - self.dele_pages;
        let mut info = Info {
            total_bytes: (self.geo.sectors - 1) * pps * pdata,
            used_bytes: busy * pdata,
            overflow: self.free_pages < pps,
            lin_total_sectors: self.geo.lin_sectors,
            ..Info::default()
        };
        if self.geo.has_linear_area() {
            let usage = self.linear_usage()?;
            info.lin_used_sectors = usage.used;
            info.lin_max_conseq_free = usage.max_free_run;
        }
        Ok(info)
    }

    /// Creates an empty file.
    pub fn creat(&mut self, name: &str) -> Result<()> {
        self.ensure_mounted()?;
        self.file_create(name, FileType::File, None)
    }

    /// Opens `name`, see [`OpenFlags`] for creation and truncation.
    pub fn open(&mut self, name: &str, mut flags: OpenFlags) -> Result<Fd> {
        self.ensure_mounted()?;
        let ftype = if flags.contains(OpenFlags::LINEAR) {
            if !self.geo.has_linear_area() {
                bail!(Error::BadConf);
            }
            flags |= OpenFlags::APPEND;
            FileType::Linear
        } else {
            FileType::File
        };

        let fd = match self.file_open(name, flags) {
            Ok(fd) => {
                if flags.contains(OpenFlags::CREAT | OpenFlags::EXCL) {
                    self.file_close(fd)?;
                    bail!(Error::FileExists);
                }
                fd
            }
            Err(Error::FileNotFound) if flags.contains(OpenFlags::CREAT) => {
                self.file_create(name, ftype, None)?;
                self.file_open(name, flags)?
            }
            Err(err) => return Err(err),
        };

        if flags.contains(OpenFlags::TRUNC) {
            let obj_pix = self.desc(fd)?.obj_pix;
            if self.read_object_hdr(obj_pix)?.len != UNDEF_LEN {
                if let Err(err) = self.file_truncate(fd, 0) {
                    self.file_close(fd)?;
                    return Err(err);
                }
                self.file_create(name, ftype, None)?;
                return self.file_open(name, flags);
            }
        }
        Ok(fd)
    }

    /// Creates a linear file with room for at least `resv_size` bytes and
    /// opens it for reading and appending.
    pub fn mknod_linear(&mut self, name: &str, resv_size: u32) -> Result<Fd> {
        self.ensure_mounted()?;
        if !self.geo.has_linear_area() {
            bail!(Error::BadConf);
        }
        let flags = OpenFlags::LINEAR | OpenFlags::RDWR | OpenFlags::APPEND;
        let resv_sectors = resv_size.div_ceil(self.geo.sector_size);
        let start_sector = self.linear_find_space(resv_sectors)?;
        match self.file_open(name, flags) {
            Ok(fd) => {
                self.file_close(fd)?;
                bail!(Error::FileExists);
            }
            Err(Error::FileNotFound) => {}
            Err(err) => return Err(err),
        }
        self.file_create(
            name,
            FileType::Linear,
            Some(LinearMeta {
                start_sector,
                resv_sectors,
            }),
        )?;
        self.file_open(name, flags)
    }

    /// Flash range holding the next bytes of the file, without copying.
    ///
    /// The range ends at the end of the file or at the end of the page,
    /// whatever comes first. The descriptor offset is not advanced.
    pub fn read_ptr(&mut self, fd: Fd) -> Result<FlashSpan> {
        self.ensure_mounted()?;
        self.file_read_ptr(fd)
    }

    /// Copies the start of `span` into `buf`, returns the bytes copied.
    pub fn read_span(&mut self, span: &FlashSpan, buf: &mut [u8]) -> Result<usize> {
        self.ensure_mounted()?;
        let n = min(span.len() as usize, buf.len());
        self.hal.read(span.addr(), &mut buf[..n])?;
        Ok(n)
    }

    /// Reads up to `buf.len()` bytes, returns less at the end of the file.
    pub fn read(&mut self, fd: Fd, buf: &mut [u8]) -> Result<usize> {
        self.ensure_mounted()?;
        self.desc(fd)?;
        let mut done = 0;
        while done < buf.len() {
            let span = match self.file_read_ptr(fd) {
                Ok(span) if !span.is_empty() => span,
                Ok(_) | Err(Error::EndOfFile) => break,
                Err(err) => return Err(err),
            };
            let n = min(span.len() as usize, buf.len() - done);
            self.hal.read(span.addr(), &mut buf[done..done + n])?;
            done += n;
            let offs = self.desc(fd)?.offs;
            self.file_seek(fd, SeekFrom::Start(offs + n as u32))?;
        }
        Ok(done)
    }

    /// Writes `data` at the current offset, overwriting up to the end of the
    /// file and appending the rest. Descriptors opened with
    /// [`OpenFlags::APPEND`] always append.
    ///
    /// Overwritten pages are replaced one at a time. A power loss in the
    /// middle of an overwrite spanning several pages may leave some of them
    /// with the new contents and the rest with the old.
    pub fn write(&mut self, fd: Fd, data: &[u8]) -> Result<usize> {
        self.ensure_mounted()?;
        let desc = self.desc(fd)?;
        if desc.flags.contains(OpenFlags::APPEND) {
            self.file_append(fd, data)?;
            return Ok(data.len());
        }
        let flen = self.read_object_hdr(desc.obj_pix)?.file_len();
        let mod_len = min(flen.saturating_sub(desc.offs) as usize, data.len());
        if mod_len > 0 {
            self.file_modify(fd, desc.offs, &data[..mod_len])?;
        }
        if mod_len < data.len() {
            self.file_append(fd, &data[mod_len..])?;
        }
        Ok(data.len())
    }

    /// Moves the descriptor offset, the result is clamped to the file.
    pub fn lseek(&mut self, fd: Fd, pos: SeekFrom) -> Result<u32> {
        self.ensure_mounted()?;
        self.file_seek(fd, pos)
    }

    pub fn ftell(&mut self, fd: Fd) -> Result<u32> {
        self.ensure_mounted()?;
        Ok(self.desc(fd)?.offs)
    }

    /// Shortens an open file. Truncating to zero removes the file and
    /// closes the descriptor.
    pub fn ftruncate(&mut self, fd: Fd, len: u32) -> Result<()> {
        self.ensure_mounted()?;
        self.file_truncate(fd, len)
    }

    pub fn remove(&mut self, name: &str) -> Result<()> {
        self.ensure_mounted()?;
        let fd = self.file_open(name, OpenFlags::WRONLY)?;
        let res = self.file_truncate(fd, 0);
        self.file_close(fd)?;
        res
    }

    /// Removes the file behind an open descriptor, which gets closed.
    pub fn fremove(&mut self, fd: Fd) -> Result<()> {
        self.ensure_mounted()?;
        self.file_truncate(fd, 0)
    }

    /// Everything is written through, there is nothing to flush.
    pub fn fflush(&mut self, _fd: Fd) -> Result<()> {
        self.ensure_mounted()
    }

    pub fn close(&mut self, fd: Fd) -> Result<()> {
        self.ensure_mounted()?;
        self.file_close(fd)
    }

    pub fn rename(&mut self, old: &str, new: &str) -> Result<()> {
        self.ensure_mounted()?;
        self.file_rename(old, new)
    }

    pub fn stat(&mut self, name: &str) -> Result<Stat> {
        let fd = self.open(name, OpenFlags::empty())?;
        let res = self.fstat(fd);
        self.file_close(fd)?;
        res
    }

    pub fn fstat(&mut self, fd: Fd) -> Result<Stat> {
        self.ensure_mounted()?;
        let desc = self.desc(fd)?;
        let ohdr = self.read_object_hdr(desc.obj_pix)?;
        Ok(Stat {
            obj_id: desc.obj_id,
            size: ohdr.file_len(),
            name: ohdr.name,
            ftype: ohdr.ftype,
        })
    }

    pub fn opendir(&mut self) -> Result<Dir> {
        self.ensure_mounted()?;
        Ok(Dir::default())
    }

    /// Next object header after the directory position, `None` at the end.
    pub fn readdir(&mut self, dir: &mut Dir) -> Result<Option<DirEntry>> {
        self.ensure_mounted()?;
        let entry = self.traverse(dir.pix, 0, |_, pix, hdr| -> Visit<DirEntry> {
            let phdr = hdr.phdr();
            match hdr.object() {
                Some(ohdr) if phdr.flag.is_valid() => Ok(ControlFlow::Break(DirEntry {
                    obj_id: phdr.id.obj_id(),
                    name: ohdr.name,
                    size: ohdr.file_len(),
                    ftype: ohdr.ftype,
                    pix,
                })),
                _ => Ok(ControlFlow::Continue(())),
            }
        })?;
        if let Some(entry) = &entry {
            dir.pix = entry.pix + 1;
        }
        Ok(entry)
    }

    pub fn closedir(&mut self, _dir: Dir) -> Result<()> {
        self.ensure_mounted()
    }
}
