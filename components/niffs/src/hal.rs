use core::cmp::min;

use embedded_storage::nor_flash::{NorFlash, NorFlashError};

use crate::error::{Error, Result};

/// Access to the flash region holding the filesystem.
///
/// Addresses are byte offsets relative to the start of the region: the paged
/// sectors come first, the linear sectors follow.
pub trait Hal {
    /// Reads `buf.len()` bytes starting at `addr`.
    fn read(&mut self, addr: u32, buf: &mut [u8]) -> Result<()>;

    /// Programs `data` at `addr`. Programming may only clear bits, the
    /// filesystem never asks for anything else.
    fn write(&mut self, addr: u32, data: &[u8]) -> Result<()>;

    /// Erases `len` bytes starting at the sector aligned `addr` to `0xff`.
    fn erase(&mut self, addr: u32, len: u32) -> Result<()>;
}

impl<T: Hal + ?Sized> Hal for &mut T {
    fn read(&mut self, addr: u32, buf: &mut [u8]) -> Result<()> {
        (**self).read(addr, buf)
    }

    fn write(&mut self, addr: u32, data: &[u8]) -> Result<()> {
        (**self).write(addr, data)
    }

    fn erase(&mut self, addr: u32, len: u32) -> Result<()> {
        (**self).erase(addr, len)
    }
}

/// Largest read or write granularity [`NorFlashHal`] can pad for.
pub const MAX_ALIGN: usize = 64;

/// [`Hal`] on top of an `embedded-storage` NOR flash.
///
/// Unaligned writes are padded with `0xff`, which leaves the neighbouring
/// bytes untouched on NOR flash. Devices that do not allow programming a
/// word more than once are not supported.
pub struct NorFlashHal<F> {
    flash: F,
    base: u32,
}

impl<F: NorFlash> NorFlashHal<F> {
    pub fn new(flash: F) -> Self {
        Self::with_base(flash, 0)
    }

    /// Places the filesystem region at `base` within the device.
    pub fn with_base(flash: F, base: u32) -> Self {
        Self { flash, base }
    }

    pub fn into_inner(self) -> F {
        self.flash
    }
}

fn flash_error<E: NorFlashError>(err: E) -> Error {
    error!("flash error: {:?}", err.kind());
    Error::Hal
}

impl<F: NorFlash> Hal for NorFlashHal<F> {
    fn read(&mut self, addr: u32, buf: &mut [u8]) -> Result<()> {
        let align = F::READ_SIZE;
        if align > MAX_ALIGN {
            bail!(Error::Hal);
        }
        let mut addr = (self.base + addr) as usize;
        let mut done = 0;
        while done < buf.len() {
            let offs = addr % align;
            let left = buf.len() - done;
            if offs == 0 && left >= align {
                let n = left - left % align;
                self.flash
                    .read(addr as u32, &mut buf[done..done + n])
                    .map_err(flash_error)?;
                addr += n;
                done += n;
            } else {
                let n = min(align - offs, left);
                let mut chunk = [0xff; MAX_ALIGN];
                self.flash
                    .read((addr - offs) as u32, &mut chunk[..align])
                    .map_err(flash_error)?;
                buf[done..done + n].copy_from_slice(&chunk[offs..offs + n]);
                addr += n;
                done += n;
            }
        }
        Ok(())
    }

    fn write(&mut self, addr: u32, data: &[u8]) -> Result<()> {
        let align = F::WRITE_SIZE;
        if align > MAX_ALIGN {
            bail!(Error::Hal);
        }
        trace!("flash write {:x} {:x}", addr, data.len());
        let mut addr = (self.base + addr) as usize;
        let mut data = data;
        while !data.is_empty() {
            let offs = addr % align;
            if offs == 0 && data.len() >= align {
                let n = data.len() - data.len() % align;
                self.flash.write(addr as u32, &data[..n]).map_err(flash_error)?;
                addr += n;
                data = &data[n..];
            } else {
                let n = min(align - offs, data.len());
                let mut chunk = [0xff; MAX_ALIGN];
                chunk[offs..offs + n].copy_from_slice(&data[..n]);
                self.flash
                    .write((addr - offs) as u32, &chunk[..align])
                    .map_err(flash_error)?;
                addr += n;
                data = &data[n..];
            }
        }
        Ok(())
    }

    fn erase(&mut self, addr: u32, len: u32) -> Result<()> {
        trace!("flash erase {:x} {:x}", addr, len);
        let from = self.base + addr;
        self.flash.erase(from, from + len).map_err(flash_error)
    }
}
