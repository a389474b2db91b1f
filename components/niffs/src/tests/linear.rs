use super::*;
use crate::page::OFFS_FLAG;
use crate::{FileType, SeekFrom};

fn linear_flags() -> OpenFlags {
    OpenFlags::LINEAR | OpenFlags::CREAT | OpenFlags::RDWR
}

#[test]
fn linear_round_trip() {
    let mut fs = fresh(LINEAR);
    let fd = fs.mknod_linear("log", 1500).unwrap();
    let data = pattern(1500, 1);
    fs.write(fd, &data).unwrap();

    // the whole file is one contiguous range
    fs.lseek(fd, SeekFrom::Start(100)).unwrap();
    let span = fs.read_ptr(fd).unwrap();
    assert_eq!(span.addr(), fs.geometry().sector_addr(8) + 100);
    assert_eq!(span.len(), 1400);
    fs.close(fd).unwrap();

    assert_eq!(read_file(&mut fs, "log").unwrap(), data);
    let stat = fs.stat("log").unwrap();
    assert_eq!(stat.ftype, FileType::Linear);
    assert_eq!(stat.size, 1500);

    let info = fs.info().unwrap();
    assert_eq!(info.lin_total_sectors, 4);
    assert_eq!(info.lin_used_sectors, 2);
    assert_eq!(info.lin_max_conseq_free, 2);
}

#[test]
fn entering_a_dirty_sector_erases_it() {
    let mut fs = fresh(LINEAR);
    let fd = fs.mknod_linear("e", 2048).unwrap();
    let mut expected = pattern(1024, 0);
    let erases = fs.hal().erases;
    fs.write(fd, &expected).unwrap();
    assert_eq!(fs.hal().erases, erases);

    let addr = fs.geometry().sector_addr(9) + 10;
    fs.hal_mut().write(addr, &[0]).unwrap();
    let chunk = pattern(10, 1);
    fs.write(fd, &chunk).unwrap();
    expected.extend_from_slice(&chunk);
    assert_eq!(fs.hal().erases, erases + 1);

    // crossing into a blank sector needs no erase
    let chunk = pattern(1100, 2);
    fs.write(fd, &chunk).unwrap();
    expected.extend_from_slice(&chunk);
    assert_eq!(fs.hal().erases, erases + 1);
    fs.close(fd).unwrap();

    assert_eq!(read_file(&mut fs, "e").unwrap(), expected);
    assert_counters(&mut fs);
}

#[test]
fn linear_files_do_not_overlap() {
    let mut fs = fresh(LINEAR);
    let a = fs.mknod_linear("a", 1024).unwrap();
    let b = fs.mknod_linear("b", 1024).unwrap();
    fs.write(a, &pattern(1024, 0)).unwrap();
    assert_eq!(fs.write(a, b"x"), Err(Error::LinearNoSpace));
    fs.write(b, b"b").unwrap();

    assert_eq!(fs.mknod_linear("c", 3 * 1024), Err(Error::LinearNoSpace));
    assert_eq!(fs.mknod_linear("a", 10), Err(Error::FileExists));

    let info = fs.info().unwrap();
    assert_eq!(info.lin_used_sectors, 2);
    assert_eq!(info.lin_max_conseq_free, 2);

    // only appending and removing is allowed
    assert_eq!(fs.ftruncate(a, 10), Err(Error::LinearFile));
    fs.close(a).unwrap();
    let fd = fs.open("a", OpenFlags::RDWR).unwrap();
    assert_eq!(fs.write(fd, b"y"), Err(Error::LinearFile));
    fs.close(fd).unwrap();

    fs.remove("a").unwrap();
    assert_eq!(fs.info().unwrap().lin_used_sectors, 1);

    // first fit skips the single free sector in front of "b"
    let c = fs.mknod_linear("c", 2048).unwrap();
    fs.write(c, b"c").unwrap();
    fs.lseek(c, SeekFrom::Start(0)).unwrap();
    assert_eq!(fs.read_ptr(c).unwrap().addr(), fs.geometry().sector_addr(10));

    // the sector "a" left behind is reused and erased on first write
    let d = fs.mknod_linear("d", 10).unwrap();
    let erases = fs.hal().erases;
    fs.write(d, b"hello").unwrap();
    assert_eq!(fs.hal().erases, erases + 1);
    fs.close(d).unwrap();
    assert_eq!(read_file(&mut fs, "d").unwrap(), b"hello");
    assert_eq!(read_file(&mut fs, "b").unwrap(), b"b");
}

#[test]
fn open_creates_linear_files() {
    let mut fs = fresh(LINEAR);
    let fd = fs.open("n", linear_flags()).unwrap();
    fs.write(fd, &pattern(300, 0)).unwrap();
    fs.write(fd, &pattern(300, 1)).unwrap();
    fs.close(fd).unwrap();
    let stat = fs.stat("n").unwrap();
    assert_eq!(stat.ftype, FileType::Linear);
    assert_eq!(stat.size, 600);
    assert_eq!(fs.info().unwrap().lin_used_sectors, 1);

    let mut flat = fresh(SMALL);
    assert_eq!(flat.open("n", linear_flags()), Err(Error::BadConf));
    assert_eq!(flat.mknod_linear("n", 10), Err(Error::BadConf));
}

#[test]
fn chk_recovers_appended_linear_data() {
    let mut fs = fresh(LINEAR);
    let fd = fs.mknod_linear("r", 1024).unwrap();
    let mut expected = pattern(100, 3);
    fs.write(fd, &expected).unwrap();
    fs.close(fd).unwrap();

    // an append cut short after the data went to flash
    let mut dir = fs.opendir().unwrap();
    let pix = fs.readdir(&mut dir).unwrap().unwrap().pix;
    let geo = *fs.geometry();
    fs.write_word(geo.pix_addr(pix) + OFFS_FLAG, 0).unwrap();
    fs.hal_mut().write(geo.sector_addr(8) + 100, &[0x55; 50]).unwrap();
    expected.extend_from_slice(&[0x55; 50]);

    fs.unmount().unwrap();
    fs.chk().unwrap();
    fs.mount().unwrap();
    assert_eq!(fs.stat("r").unwrap().size, 150);
    assert_eq!(read_file(&mut fs, "r").unwrap(), expected);
    assert_counters(&mut fs);
}

#[test]
fn chk_ignores_leftovers_in_next_sector() {
    let mut fs = fresh(LINEAR);
    let fd = fs.mknod_linear("old", 2048).unwrap();
    fs.write(fd, &pattern(2048, 1)).unwrap();
    fs.close(fd).unwrap();
    fs.remove("old").unwrap();

    // same sectors, the second one still holds the removed file's data
    let fd = fs.mknod_linear("r", 2048).unwrap();
    let expected = pattern(1024, 2);
    fs.write(fd, &expected).unwrap();
    fs.lseek(fd, SeekFrom::Start(0)).unwrap();
    assert_eq!(fs.read_ptr(fd).unwrap().addr(), fs.geometry().sector_addr(8));
    fs.close(fd).unwrap();

    // an append cut short before it got to erase the next sector
    let mut dir = fs.opendir().unwrap();
    let pix = fs.readdir(&mut dir).unwrap().unwrap().pix;
    let geo = *fs.geometry();
    fs.write_word(geo.pix_addr(pix) + OFFS_FLAG, 0).unwrap();

    fs.unmount().unwrap();
    fs.chk().unwrap();
    fs.mount().unwrap();
    assert_eq!(fs.stat("r").unwrap().size, 1024);
    assert_eq!(read_file(&mut fs, "r").unwrap(), expected);

    let fd = fs.open("r", OpenFlags::LINEAR | OpenFlags::RDWR).unwrap();
    fs.write(fd, b"tail").unwrap();
    fs.close(fd).unwrap();
    let mut full = expected.clone();
    full.extend_from_slice(b"tail");
    assert_eq!(read_file(&mut fs, "r").unwrap(), full);
    assert_counters(&mut fs);
}
