use std::{
    fs::{File, OpenOptions},
    io::{self, Read as _, Seek as _, SeekFrom, Write as _},
    path::Path,
};

use niffs::{Error, Hal, Result};

/// A flash image kept in a host file.
///
/// Programming ANDs the new data into the image the way NOR flash clears
/// bits, erasing fills with `0xff`.
pub struct ImageFile {
    file: File,
    size: u64,
}

impl ImageFile {
    /// Creates a blank (erased) image of `size` bytes, replacing `path`.
    pub fn create(path: &Path, size: u64) -> io::Result<Self> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        let blank = vec![0xff; 4096];
        let mut left = size;
        while left > 0 {
            let n = left.min(blank.len() as u64) as usize;
            file.write_all(&blank[..n])?;
            left -= n as u64;
        }
        file.flush()?;
        Ok(Self { file, size })
    }

    /// Opens an existing image, which must hold at least `size` bytes.
    pub fn open(path: &Path, size: u64) -> io::Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let len = file.metadata()?.len();
        if len < size {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("image has {} bytes, layout needs {}", len, size),
            ));
        }
        Ok(Self { file, size })
    }

    fn check_range(&self, addr: u32, len: usize) -> Result<()> {
        if u64::from(addr) + len as u64 > self.size {
            log::error!("access {:#x}+{:#x} beyond image end {:#x}", addr, len, self.size);
            return Err(Error::Hal);
        }
        Ok(())
    }

    fn read_at(&mut self, addr: u32, buf: &mut [u8]) -> io::Result<()> {
        self.file.seek(SeekFrom::Start(addr.into()))?;
        self.file.read_exact(buf)
    }

    fn write_at(&mut self, addr: u32, data: &[u8]) -> io::Result<()> {
        self.file.seek(SeekFrom::Start(addr.into()))?;
        self.file.write_all(data)
    }
}

fn io_error(op: &str, addr: u32, err: io::Error) -> Error {
    log::error!("{} at {:#x} failed: {}", op, addr, err);
    Error::Hal
}

impl Hal for ImageFile {
    fn read(&mut self, addr: u32, buf: &mut [u8]) -> Result<()> {
        self.check_range(addr, buf.len())?;
        self.read_at(addr, buf).map_err(|err| io_error("read", addr, err))
    }

    fn write(&mut self, addr: u32, data: &[u8]) -> Result<()> {
        self.check_range(addr, data.len())?;
        let mut cells = vec![0; data.len()];
        self.read_at(addr, &mut cells)
            .map_err(|err| io_error("read", addr, err))?;
        for (cell, byte) in cells.iter_mut().zip(data) {
            *cell &= byte;
        }
        self.write_at(addr, &cells)
            .map_err(|err| io_error("write", addr, err))
    }

    fn erase(&mut self, addr: u32, len: u32) -> Result<()> {
        self.check_range(addr, len as usize)?;
        log::trace!("erase {:#x}+{:#x}", addr, len);
        self.write_at(addr, &vec![0xff; len as usize])
            .map_err(|err| io_error("erase", addr, err))
    }
}
