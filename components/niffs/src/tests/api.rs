use super::*;
use crate::{FileType, SeekFrom};

quickcheck::quickcheck! {
    fn write_then_read_back(data: Vec<u8>) -> bool {
        let mut fs = fresh(SMALL);
        write_file(&mut fs, "qc", &data);
        read_file(&mut fs, "qc").unwrap() == data
    }

    fn appends_concatenate(chunks: Vec<Vec<u8>>) -> bool {
        let mut fs = fresh(SMALL);
        fs.creat("qc").unwrap();
        let mut expected = Vec::new();
        for chunk in chunks.iter().take(20) {
            let chunk = &chunk[..chunk.len().min(200)];
            write_file(&mut fs, "qc", chunk);
            expected.extend_from_slice(chunk);
        }
        assert_counters(&mut fs);
        read_file(&mut fs, "qc").unwrap() == expected
    }
}

#[test]
fn created_file_reads_back_empty() {
    let mut fs = fresh(SMALL);
    assert_eq!(read_file(&mut fs, "e"), Err(Error::FileNotFound));
    fs.creat("e").unwrap();
    assert_eq!(read_file(&mut fs, "e").unwrap(), b"");
    write_file(&mut fs, "e", b"");
    assert_eq!(fs.stat("e").unwrap().size, 0);
    assert_counters(&mut fs);
}

#[test]
fn tiny_filesystem_round_trip() {
    let mut fs = fresh(TINY);
    assert_eq!(fs.geometry().pages_per_sector(), 2);

    fs.creat("a").unwrap();
    let fd = fs.open("a", OpenFlags::RDWR).unwrap();
    assert_eq!(fs.write(fd, b"x").unwrap(), 1);
    fs.close(fd).unwrap();

    let fd = fs.open("a", OpenFlags::RDONLY).unwrap();
    let mut buf = [0u8; 4];
    assert_eq!(fs.read(fd, &mut buf).unwrap(), 1);
    assert_eq!(buf[0], b'x');
    fs.close(fd).unwrap();

    let info = fs.info().unwrap();
    assert!(info.used_bytes > 0);
    assert!(!info.overflow);
}

#[test]
fn names_are_unique() {
    let mut fs = fresh(SMALL);
    fs.creat("a").unwrap();
    assert_eq!(fs.creat("a"), Err(Error::NameConflict));
    assert_eq!(
        fs.open("a", OpenFlags::CREAT | OpenFlags::EXCL | OpenFlags::RDWR),
        Err(Error::FileExists)
    );
    // without EXCL the existing file is opened
    let fd = fs.open("a", OpenFlags::CREAT | OpenFlags::RDWR).unwrap();
    fs.close(fd).unwrap();
    assert_eq!(fs.open("b", OpenFlags::RDWR), Err(Error::FileNotFound));
}

#[test]
fn long_names_are_cut() {
    let mut fs = fresh(SMALL);
    write_file(&mut fs, "a_rather_long_file_name", b"data");
    let stat = fs.stat("a_rather_long_fi").unwrap();
    assert_eq!(stat.name.as_str(), "a_rather_long_fi");
    assert_eq!(stat.size, 4);
    assert_eq!(stat.ftype, FileType::File);
    assert_eq!(read_file(&mut fs, "a_rather_long_file_name").unwrap(), b"data");
}

#[test]
fn overwrite_and_extend() {
    let mut fs = fresh(SMALL);
    let mut model = pattern(500, 1);
    write_file(&mut fs, "m", &model);

    let fd = fs.open("m", OpenFlags::RDWR).unwrap();
    assert_eq!(fs.lseek(fd, SeekFrom::Start(50)).unwrap(), 50);
    let patch = pattern(300, 99);
    assert_eq!(fs.write(fd, &patch).unwrap(), 300);
    model[50..350].copy_from_slice(&patch);
    assert_eq!(fs.ftell(fd).unwrap(), 350);

    // half overwrites, half appends
    fs.lseek(fd, SeekFrom::Start(450)).unwrap();
    let tail = pattern(100, 42);
    fs.write(fd, &tail).unwrap();
    model.truncate(450);
    model.extend_from_slice(&tail);
    assert_eq!(fs.fstat(fd).unwrap().size, 550);
    fs.close(fd).unwrap();

    assert_eq!(read_file(&mut fs, "m").unwrap(), model);
    assert_counters(&mut fs);
}

#[test]
fn truncate() {
    let mut fs = fresh(SMALL);
    let data = pattern(400, 3);
    write_file(&mut fs, "t", &data);

    let fd = fs.open("t", OpenFlags::RDWR).unwrap();
    assert_eq!(fs.ftruncate(fd, 1000), Err(Error::TruncateBeyondFile));
    fs.ftruncate(fd, 100).unwrap();
    assert_eq!(fs.fstat(fd).unwrap().size, 100);
    let mut buf = [0u8; 200];
    assert_eq!(fs.read(fd, &mut buf).unwrap(), 100);
    assert_eq!(&buf[..100], &data[..100]);
    // header and one data page left
    assert_eq!(fs.page_stats().unwrap().busy, 2);

    fs.ftruncate(fd, 0).unwrap();
    assert_eq!(fs.fstat(fd), Err(Error::FiledescClosed));
    assert_eq!(read_file(&mut fs, "t"), Err(Error::FileNotFound));
    assert_eq!(fs.page_stats().unwrap().busy, 0);
    assert_counters(&mut fs);
}

#[test]
fn open_with_trunc_starts_over() {
    let mut fs = fresh(SMALL);
    write_file(&mut fs, "t", &pattern(200, 0));
    let fd = fs.open("t", OpenFlags::TRUNC | OpenFlags::RDWR).unwrap();
    assert_eq!(fs.fstat(fd).unwrap().size, 0);
    fs.write(fd, b"abc").unwrap();
    fs.close(fd).unwrap();
    assert_eq!(read_file(&mut fs, "t").unwrap(), b"abc");
    assert_eq!(fs.page_stats().unwrap().busy, 1);
}

#[test]
fn remove_and_recreate() {
    let mut fs = fresh(SMALL);
    write_file(&mut fs, "r", &pattern(300, 5));
    fs.remove("r").unwrap();
    assert_eq!(read_file(&mut fs, "r"), Err(Error::FileNotFound));
    assert_eq!(fs.remove("r"), Err(Error::FileNotFound));
    assert_eq!(fs.page_stats().unwrap().busy, 0);

    write_file(&mut fs, "r", b"new");
    assert_eq!(read_file(&mut fs, "r").unwrap(), b"new");
    assert_eq!(fs.page_stats().unwrap().busy, 1);

    let fd = fs.open("r", OpenFlags::RDWR).unwrap();
    fs.fremove(fd).unwrap();
    assert_eq!(fs.close(fd), Ok(()));
    assert_eq!(fs.stat("r"), Err(Error::FileNotFound));
    assert_counters(&mut fs);
}

#[test]
fn seek_is_clamped() {
    let mut fs = fresh(SMALL);
    let data = pattern(300, 9);
    write_file(&mut fs, "s", &data);

    let fd = fs.open("s", OpenFlags::RDONLY).unwrap();
    assert_eq!(fs.lseek(fd, SeekFrom::End(-10)).unwrap(), 290);
    let mut buf = [0u8; 20];
    assert_eq!(fs.read(fd, &mut buf).unwrap(), 10);
    assert_eq!(&buf[..10], &data[290..]);
    assert_eq!(fs.read(fd, &mut buf).unwrap(), 0);

    assert_eq!(fs.lseek(fd, SeekFrom::Start(10_000)).unwrap(), 300);
    assert_eq!(fs.lseek(fd, SeekFrom::End(-10_000)).unwrap(), 0);
    assert_eq!(fs.lseek(fd, SeekFrom::Current(5)).unwrap(), 5);
    assert_eq!(fs.ftell(fd).unwrap(), 5);
    assert_eq!(fs.lseek(fd, SeekFrom::Current(-100)).unwrap(), 0);

    fs.lseek(fd, SeekFrom::Start(100)).unwrap();
    assert_eq!(fs.read(fd, &mut buf).unwrap(), 20);
    assert_eq!(&buf[..], &data[100..120]);
}

#[test]
fn read_ptr_stops_at_page_end() {
    let mut fs = fresh(SMALL);
    let data = pattern(300, 11);
    write_file(&mut fs, "p", &data);

    let fd = fs.open("p", OpenFlags::RDONLY).unwrap();
    let span = fs.read_ptr(fd).unwrap();
    assert_eq!(span.len(), 84);
    let mut buf = [0u8; 128];
    assert_eq!(fs.read_span(&span, &mut buf).unwrap(), 84);
    assert_eq!(&buf[..84], &data[..84]);
    // the offset did not move
    assert_eq!(fs.ftell(fd).unwrap(), 0);

    fs.lseek(fd, SeekFrom::Start(84)).unwrap();
    let span = fs.read_ptr(fd).unwrap();
    assert_eq!(span.len(), 116);
    assert_eq!(fs.read_span(&span, &mut buf[..10]).unwrap(), 10);
    assert_eq!(&buf[..10], &data[84..94]);

    fs.lseek(fd, SeekFrom::End(0)).unwrap();
    assert_eq!(fs.read_ptr(fd), Err(Error::EndOfFile));
}

#[test]
fn rename_and_list() {
    let mut fs = fresh(SMALL);
    write_file(&mut fs, "a", &pattern(10, 0));
    write_file(&mut fs, "b", &pattern(100, 1));
    write_file(&mut fs, "c", &pattern(5, 2));

    fs.rename("b", "d").unwrap();
    assert_eq!(fs.rename("a", "c"), Err(Error::NameConflict));
    assert_eq!(fs.rename("x", "y"), Err(Error::FileNotFound));

    let mut dir = fs.opendir().unwrap();
    let mut listed = Vec::new();
    while let Some(entry) = fs.readdir(&mut dir).unwrap() {
        assert_eq!(entry.ftype, FileType::File);
        listed.push((String::from(entry.name.as_str()), entry.size));
    }
    assert_eq!(fs.readdir(&mut dir).unwrap(), None);
    fs.closedir(dir).unwrap();
    listed.sort();
    assert_eq!(
        listed,
        [
            (String::from("a"), 10),
            (String::from("c"), 5),
            (String::from("d"), 100)
        ]
    );
    assert_eq!(read_file(&mut fs, "d").unwrap(), pattern(100, 1));
}

#[test]
fn descriptors_follow_moved_headers() {
    let mut fs = fresh(SMALL);
    write_file(&mut fs, "a", &pattern(10, 0));

    let writer = fs
        .open("a", OpenFlags::RDWR | OpenFlags::APPEND)
        .unwrap();
    let reader = fs.open("a", OpenFlags::RDONLY).unwrap();
    fs.write(writer, &pattern(60, 10)).unwrap();
    assert_eq!(fs.fstat(reader).unwrap().size, 70);

    let mut buf = [0u8; 100];
    assert_eq!(fs.read(reader, &mut buf).unwrap(), 70);
    assert_eq!(&buf[..10], &pattern(10, 0)[..]);
    assert_eq!(&buf[10..70], &pattern(60, 10)[..]);

    fs.rename("a", "e").unwrap();
    assert_eq!(fs.fstat(reader).unwrap().name.as_str(), "e");
    assert_eq!(fs.fstat(writer).unwrap().size, 70);
}

#[test]
fn descriptor_table_is_bounded() {
    let mut fs = fresh(SMALL);
    write_file(&mut fs, "a", b"a");
    let fds: Vec<_> = (0..4)
        .map(|_| fs.open("a", OpenFlags::RDONLY).unwrap())
        .collect();
    assert_eq!(fs.open("a", OpenFlags::RDONLY), Err(Error::OutOfFiledescs));
    fs.close(fds[2]).unwrap();
    assert_eq!(fs.open("a", OpenFlags::RDONLY).unwrap(), fds[2]);
    assert_eq!(fs.close(crate::Fd::new(9)), Err(Error::FiledescBad));
}

#[test]
fn access_modes_are_enforced() {
    let mut fs = fresh(SMALL);
    write_file(&mut fs, "a", b"0123456789");
    let mut buf = [0u8; 4];

    let fd = fs.open("a", OpenFlags::WRONLY).unwrap();
    assert_eq!(fs.read(fd, &mut buf), Err(Error::NotReadable));
    fs.close(fd).unwrap();

    let fd = fs.open("a", OpenFlags::RDONLY).unwrap();
    assert_eq!(fs.write(fd, b"x"), Err(Error::NotWritable));
    assert_eq!(fs.ftruncate(fd, 1), Err(Error::NotWritable));
    fs.close(fd).unwrap();

    let fd = fs.open("a", OpenFlags::RDONLY | OpenFlags::APPEND).unwrap();
    assert_eq!(fs.write(fd, b"x"), Err(Error::NotWritable));
    assert_eq!(fs.fflush(fd), Ok(()));
}

#[test]
fn mount_state_is_checked() {
    let mut fs = TestFs::new(RamFlash::for_config(&SMALL), SMALL).unwrap();
    assert_eq!(fs.mount(), Err(Error::NotAFilesystem));
    assert_eq!(fs.creat("a"), Err(Error::NotMounted));
    assert_eq!(fs.info(), Err(Error::NotMounted));
    assert_eq!(fs.opendir(), Err(Error::NotMounted));
    assert_eq!(fs.stat("a"), Err(Error::NotMounted));

    fs.format().unwrap();
    fs.mount().unwrap();
    assert!(fs.is_mounted());
    assert_eq!(fs.mount(), Err(Error::Mounted));
    assert_eq!(fs.format(), Err(Error::Mounted));
    assert_eq!(fs.chk(), Err(Error::Mounted));

    let fd = fs.open("a", OpenFlags::CREAT | OpenFlags::RDWR).unwrap();
    fs.unmount().unwrap();
    assert_eq!(fs.unmount(), Err(Error::NotMounted));
    fs.mount().unwrap();
    // unmounting closed everything
    assert_eq!(fs.fstat(fd), Err(Error::FiledescClosed));
}

#[test]
fn info_counts_busy_pages() {
    let mut fs = fresh(SMALL);
    let info = fs.info().unwrap();
    assert_eq!(info.total_bytes, 15 * 8 * 116);
    assert_eq!(info.used_bytes, 0);
    assert_eq!(info.lin_total_sectors, 0);

    write_file(&mut fs, "i", &pattern(200, 0));
    assert_eq!(fs.info().unwrap().used_bytes, 2 * 116);
}

#[test]
fn dump_cross_checks_counters() {
    let mut fs = fresh(SMALL);
    write_file(&mut fs, "d", &pattern(150, 0));

    let mut out = String::new();
    fs.dump(&mut out).unwrap();
    assert!(out.contains("OBJ 'd'"));
    assert!(out.contains(" OK"));
    assert!(!out.contains("FATAL"));

    fs.free_pages += 1;
    let mut out = String::new();
    fs.dump(&mut out).unwrap();
    assert!(out.contains("FATAL free pages"));
}
