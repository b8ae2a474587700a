use std::collections::BTreeSet;
use std::sync::Arc;
use std::thread;

use block_dev::RamDisk;
use index_fs::{BLOCK_SIZE, DiskInode, Error, FileSys, MAX_FILE_SIZE};

fn format(blocks: usize) -> FileSys {
    let _ = env_logger::builder().is_test(true).try_init();
    FileSys::init(Arc::new(RamDisk::new(blocks)), true).unwrap()
}

fn free_count(fs: &FileSys) -> usize {
    fs.free_map().lock().free_count().unwrap()
}

#[test]
fn translate_beyond_length() {
    let fs = format(64);
    fs.create("/f", "/", 700, false).unwrap();
    let inode = fs.open("/f", "/").unwrap();

    assert!(inode.byte_to_sector(0).is_some());
    assert!(inode.byte_to_sector(699).is_some());
    assert_eq!(inode.byte_to_sector(700), None);
    assert_ne!(inode.byte_to_sector(0), inode.byte_to_sector(512));

    fs.close(inode);
}

#[test]
fn grow_through_every_tier() {
    let fs = format(17_000);
    let before = free_count(&fs);
    fs.create("/big", "/", 0, false).unwrap();
    let inode = fs.open("/big", "/").unwrap();

    // 直接索引、一级索引、二级索引的首尾块
    let marks = [0, 122, 123, 250, 251, 379, 16_634];
    for &block in &marks {
        let pos = block * BLOCK_SIZE + 7;
        assert_eq!(inode.write_at(pos, &[block as u8 + 1]), Ok(1));
    }
    assert_eq!(inode.len(), 16_634 * BLOCK_SIZE + 8);

    inode.grow(MAX_FILE_SIZE).unwrap();
    assert_eq!(inode.len(), MAX_FILE_SIZE);
    assert_eq!(
        inode.stat().blocks,
        DiskInode::count_total_block(MAX_FILE_SIZE as u32)
    );

    let mut sectors = BTreeSet::new();
    for &block in &marks {
        let pos = block * BLOCK_SIZE + 7;
        let sector = inode.byte_to_sector(pos).unwrap();
        assert_ne!(sector, 0);
        assert!(sectors.insert(sector));

        let mut byte = [0];
        assert_eq!(inode.read_at(pos, &mut byte), 1);
        assert_eq!(byte[0], block as u8 + 1);
    }
    assert!(inode.byte_to_sector(MAX_FILE_SIZE - 1).is_some());
    assert_eq!(inode.byte_to_sector(MAX_FILE_SIZE), None);

    assert_eq!(inode.grow(MAX_FILE_SIZE + 1), Err(Error::FileTooLarge));
    assert_eq!(inode.write_at(MAX_FILE_SIZE, &[0]), Err(Error::FileTooLarge));

    inode.remove();
    fs.close(inode);
    // 目录项仍在，但 inode 与全部块都已回收
    assert_eq!(free_count(&fs), before);
}

#[test]
fn grow_failure_changes_nothing() {
    let fs = format(64);
    fs.create("/f", "/", 1000, false).unwrap();
    let inode = fs.open("/f", "/").unwrap();
    assert_eq!(inode.write_at(0, b"keep me"), Ok(7));

    let free = free_count(&fs);
    let first = inode.byte_to_sector(0);
    let stat = inode.stat();

    assert_eq!(inode.grow(200 * BLOCK_SIZE), Err(Error::OutOfSpace));
    assert_eq!(
        inode.write_at(150 * BLOCK_SIZE, b"x"),
        Err(Error::OutOfSpace)
    );

    assert_eq!(free_count(&fs), free);
    assert_eq!(inode.stat(), stat);
    assert_eq!(inode.byte_to_sector(0), first);
    assert_eq!(inode.byte_to_sector(1000), None);
    let mut buf = [0; 7];
    assert_eq!(inode.read_at(0, &mut buf), 7);
    assert_eq!(&buf, b"keep me");

    // 空间足够时照常扩容
    assert_eq!(inode.write_at(1000, &[9; 1000]), Ok(1000));
    assert_eq!(inode.len(), 2000);

    fs.close(inode);
}

#[test]
fn concurrent_open_shares_handle() {
    let fs = format(64);
    fs.create("/f", "/", 0, false).unwrap();

    let (a, b) = thread::scope(|s| {
        let a = s.spawn(|| fs.open("/f", "/").unwrap());
        let b = s.spawn(|| fs.open("/f", "/").unwrap());
        (a.join().unwrap(), b.join().unwrap())
    });

    assert!(Arc::ptr_eq(&a, &b));
    assert_eq!(a.open_count(), 2);
    assert_eq!(fs.inodes().len(), 1);

    fs.close(a);
    assert_eq!(b.open_count(), 1);
    assert!(!b.is_removed());
    fs.close(b);
    assert!(fs.inodes().is_empty());
}

#[test]
fn concurrent_writers_grow_one_file() {
    const WRITERS: usize = 8;
    const CHUNK: usize = 3 * BLOCK_SIZE + 100;

    let fs = format(512);
    fs.create("/shared", "/", 0, false).unwrap();

    thread::scope(|s| {
        for i in 0..WRITERS {
            let fs = &fs;
            s.spawn(move || {
                let inode = fs.open("/shared", "/").unwrap();
                let data = vec![i as u8 + 1; CHUNK];
                assert_eq!(inode.write_at(i * CHUNK, &data), Ok(CHUNK));
                fs.close(inode);
            });
        }
    });

    let inode = fs.open("/shared", "/").unwrap();
    assert_eq!(inode.len(), WRITERS * CHUNK);
    let mut buf = vec![0; WRITERS * CHUNK];
    assert_eq!(inode.read_at(0, &mut buf), buf.len());
    for (i, chunk) in buf.chunks(CHUNK).enumerate() {
        assert!(chunk.iter().all(|&b| b == i as u8 + 1));
    }
    fs.close(inode);
}

#[test]
fn concurrent_create_and_remove() {
    let fs = format(1024);
    let before = free_count(&fs);

    thread::scope(|s| {
        for i in 0..4 {
            let fs = &fs;
            s.spawn(move || {
                let dir = format!("/d{i}");
                fs.create(&dir, "/", 0, true).unwrap();
                for j in 0..10 {
                    let name = format!("f{j}");
                    fs.create(&name, &dir, 600, false).unwrap();
                    fs.remove(&name, &dir).unwrap();
                }
                fs.remove(&dir, "/").unwrap();
            });
        }
    });

    assert_eq!(free_count(&fs), before);
    assert!(fs.inodes().is_empty());
}

#[test]
fn remove_dir_while_creating_inside() {
    let fs = format(256);
    let before = free_count(&fs);

    thread::scope(|s| {
        s.spawn(|| {
            for _ in 0..300 {
                match fs.create("/d", "/", 0, true) {
                    Ok(()) | Err(Error::AlreadyExists) => {}
                    Err(err) => panic!("create /d: {err}"),
                }
                match fs.remove("/d", "/") {
                    Ok(()) | Err(Error::DirectoryNotEmpty) => {}
                    Err(err) => panic!("remove /d: {err}"),
                }
            }
        });
        s.spawn(|| {
            for _ in 0..300 {
                match fs.create("/d/x", "/", 600, false) {
                    Ok(()) => fs.remove("/d/x", "/").unwrap(),
                    Err(Error::NotFound) => {}
                    Err(err) => panic!("create /d/x: {err}"),
                }
            }
        });
        s.spawn(|| {
            for _ in 0..300 {
                match fs.open_dir("/d", "/") {
                    Ok(dir) => dir.close(fs.inodes()),
                    Err(Error::NotFound) => {}
                    Err(err) => panic!("open /d: {err}"),
                }
            }
        });
    });

    let _ = fs.remove("/d", "/");
    assert_eq!(free_count(&fs), before);
    assert!(fs.inodes().is_empty());
}

#[test]
fn release_free_block() {
    let fs = format(64);
    let before = free_count(&fs);
    let sector = fs.free_map().lock().allocate(1).unwrap();

    let mut free_map = fs.free_map().lock();
    free_map.release(sector, 1).unwrap();
    assert_eq!(free_map.release(sector, 1), Err(Error::CorruptRecord));
    assert_eq!(free_map.release(64, 1), Err(Error::CorruptRecord));
    drop(free_map);

    assert_eq!(free_count(&fs), before);
}
