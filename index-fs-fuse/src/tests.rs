use std::fs::{self, OpenOptions};
use std::path::Path;
use std::sync::Arc;

use block_dev::{BLOCK_SIZE, BlockDevice, Error};
use index_fs::FileSys;
use tempfile::TempDir;

use crate::{BlockFile, pack};

fn image(dir: &Path, blocks: usize) -> Arc<BlockFile> {
    let fd = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(dir.join("fs.img"))
        .unwrap();
    if fd.metadata().unwrap().len() == 0 {
        fd.set_len((blocks * BLOCK_SIZE) as u64).unwrap();
    }
    Arc::new(BlockFile::new(fd).unwrap())
}

#[test]
fn block_file() {
    let dir = TempDir::new().unwrap();
    let dev = image(dir.path(), 8);
    assert_eq!(dev.num_blocks(), 8);

    let data = [0x5a; BLOCK_SIZE];
    dev.write_block(7, &data).unwrap();
    let mut buf = [0; BLOCK_SIZE];
    dev.read_block(7, &mut buf).unwrap();
    assert_eq!(buf, data);

    assert_eq!(dev.read_block(8, &mut buf), Err(Error::OutOfRange));
    assert_eq!(dev.write_block(0, &data[1..]), Err(Error::BadBuffer));
}

#[test]
fn persist_across_remount() {
    let dir = TempDir::new().unwrap();

    let fs = FileSys::init(image(dir.path(), 1024), true).unwrap();
    fs.create("/hello", "/", 0, false).unwrap();
    let inode = fs.open("/hello", "/").unwrap();
    assert_eq!(inode.write_at(0, b"hello, image"), Ok(12));
    fs.close(inode);
    fs.done();

    let fs = FileSys::init(image(dir.path(), 1024), false).unwrap();
    let inode = fs.open("hello", "/").unwrap();
    let mut buf = [0; 12];
    assert_eq!(inode.read_at(0, &mut buf), 12);
    assert_eq!(&buf, b"hello, image");
    fs.close(inode);
}

#[test]
fn pack_tree() {
    let source = TempDir::new().unwrap();
    fs::write(source.path().join("a.txt"), b"alpha").unwrap();
    fs::create_dir(source.path().join("sub")).unwrap();
    fs::write(source.path().join("sub").join("b"), vec![7; 3000]).unwrap();
    fs::write(source.path().join("much_too_long_name"), b"skipped").unwrap();

    let out = TempDir::new().unwrap();
    let fs = FileSys::init(image(out.path(), 1024), true).unwrap();
    pack(&fs, source.path(), "/").unwrap();

    let mut root = fs.open_dir("/", "/").unwrap();
    let mut names: Vec<_> = root.entries().collect();
    names.sort();
    assert_eq!(names, ["a.txt", "sub"]);
    root.close(fs.inodes());

    let b = fs.open("/sub/b", "/").unwrap();
    assert_eq!(b.len(), 3000);
    let mut buf = vec![0; 3000];
    assert_eq!(b.read_at(0, &mut buf), 3000);
    assert!(buf.iter().all(|&byte| byte == 7));
    fs.close(b);
}
