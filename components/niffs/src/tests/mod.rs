use std::collections::BTreeMap;

use crate::{Config, Error, Hal, Niffs, OpenFlags, Result};

mod api;
mod linear;

/// 4 sectors of 2 pages.
pub const TINY: Config = Config::new(4, 256, 128);
/// 16 sectors of 8 pages, 84 bytes in the header page and 116 in others.
pub const SMALL: Config = Config::new(16, 1024, 128);
/// 8 paged sectors followed by 4 linear ones.
pub const LINEAR: Config = Config::new(8, 1024, 128).with_linear_sectors(4);

pub type TestFs = Niffs<RamFlash, 256, 4>;

/// NOR flash in memory: programming ANDs, erasing sets to `0xff`.
///
/// A power cut can be scheduled after a number of programming and erase
/// operations. The operation hitting the cut does not happen, and nothing
/// is programmed or erased until power is restored.
#[derive(Clone)]
pub struct RamFlash {
    mem: Vec<u8>,
    budget: Option<usize>,
    tripped: bool,
    pub erases: usize,
    pub ops: usize,
}

impl RamFlash {
    pub fn new(size: usize) -> Self {
        Self {
            mem: vec![0xff; size],
            budget: None,
            tripped: false,
            erases: 0,
            ops: 0,
        }
    }

    pub fn for_config(config: &Config) -> Self {
        Self::new(((config.sectors + config.lin_sectors) * config.sector_size) as usize)
    }

    pub fn cut_after(&mut self, ops: usize) {
        self.budget = Some(ops);
    }

    pub fn restore_power(&mut self) {
        self.budget = None;
        self.tripped = false;
    }

    pub fn tripped(&self) -> bool {
        self.tripped
    }

    fn range(&self, addr: u32, len: usize) -> Result<core::ops::Range<usize>> {
        let start = addr as usize;
        if start + len > self.mem.len() {
            return Err(Error::Hal);
        }
        Ok(start..start + len)
    }

    fn consume(&mut self) -> Result<()> {
        if self.tripped {
            return Err(Error::Hal);
        }
        if let Some(budget) = self.budget.as_mut() {
            if *budget == 0 {
                self.tripped = true;
                return Err(Error::Hal);
            }
            *budget -= 1;
        }
        self.ops += 1;
        Ok(())
    }
}

impl Hal for RamFlash {
    fn read(&mut self, addr: u32, buf: &mut [u8]) -> Result<()> {
        let range = self.range(addr, buf.len())?;
        buf.copy_from_slice(&self.mem[range]);
        Ok(())
    }

    fn write(&mut self, addr: u32, data: &[u8]) -> Result<()> {
        let range = self.range(addr, data.len())?;
        self.consume()?;
        for (cell, byte) in self.mem[range].iter_mut().zip(data) {
            *cell &= byte;
        }
        Ok(())
    }

    fn erase(&mut self, addr: u32, len: u32) -> Result<()> {
        let range = self.range(addr, len as usize)?;
        self.consume()?;
        self.mem[range].fill(0xff);
        self.erases += 1;
        Ok(())
    }
}

/// A formatted and mounted filesystem on blank RAM flash.
pub fn fresh(config: Config) -> TestFs {
    let mut fs = TestFs::new(RamFlash::for_config(&config), config).unwrap();
    fs.format().unwrap();
    fs.mount().unwrap();
    fs
}

/// Simulates a reset: the in-memory state is lost, the flash is checked and
/// mounted again.
pub fn reboot(fs: TestFs, config: Config) -> TestFs {
    let mut flash = fs.into_hal();
    flash.restore_power();
    let mut fs = TestFs::new(flash, config).unwrap();
    fs.chk().unwrap();
    fs.mount().unwrap();
    fs
}

pub fn write_file(fs: &mut TestFs, name: &str, data: &[u8]) {
    let fd = fs
        .open(name, OpenFlags::CREAT | OpenFlags::RDWR | OpenFlags::APPEND)
        .unwrap();
    assert_eq!(fs.write(fd, data).unwrap(), data.len());
    fs.close(fd).unwrap();
}

pub fn read_file(fs: &mut TestFs, name: &str) -> Result<Vec<u8>> {
    let fd = fs.open(name, OpenFlags::RDONLY)?;
    let size = fs.fstat(fd)?.size as usize;
    let mut data = vec![0; size + 16];
    let n = fs.read(fd, &mut data)?;
    fs.close(fd)?;
    data.truncate(n);
    Ok(data)
}

/// All files and their contents.
pub fn snapshot(fs: &mut TestFs) -> BTreeMap<String, Vec<u8>> {
    let mut dir = fs.opendir().unwrap();
    let mut names = Vec::new();
    while let Some(entry) = fs.readdir(&mut dir).unwrap() {
        names.push(String::from(entry.name.as_str()));
    }
    fs.closedir(dir).unwrap();
    names
        .into_iter()
        .map(|name| {
            let data = read_file(fs, &name).unwrap();
            (name, data)
        })
        .collect()
}

/// The page counters agree with what is on flash.
pub fn assert_counters(fs: &mut TestFs) {
    let stats = fs.page_stats().unwrap();
    assert_eq!(stats.free, fs.free_pages, "free pages");
    assert_eq!(stats.deleted, fs.dele_pages, "deleted pages");
    assert_eq!(stats.total(), fs.geometry().total_pages());
}

pub fn pattern(len: usize, seed: u8) -> Vec<u8> {
    (0..len).map(|i| (i as u8).wrapping_mul(7).wrapping_add(seed)).collect()
}
