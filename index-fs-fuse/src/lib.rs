#[cfg(test)]
mod tests;

use std::fs::{self, File};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use block_dev::{BLOCK_SIZE, BlockDevice, Error};
use index_fs::{FileSys, NAME_MAX};

/// 以宿主机上的普通文件充当块设备
#[derive(Debug)]
pub struct BlockFile {
    file: Mutex<File>,
    blocks: usize,
}

impl BlockFile {
    /// 块数由文件长度决定，不足一块的尾部忽略
    pub fn new(file: File) -> io::Result<Self> {
        let blocks = file.metadata()?.len() as usize / BLOCK_SIZE;
        Ok(Self {
            file: Mutex::new(file),
            blocks,
        })
    }

    fn seek_to(&self, block_id: usize, buf_len: usize) -> Result<MutexGuard<'_, File>, Error> {
        if block_id >= self.blocks {
            return Err(Error::OutOfRange);
        }
        if buf_len != BLOCK_SIZE {
            return Err(Error::BadBuffer);
        }

        let mut file = self.file.lock().map_err(|_| Error::Io)?;
        file.seek(SeekFrom::Start((block_id * BLOCK_SIZE) as u64))
            .map_err(|err| {
                log::error!("seeking block {block_id}: {err}");
                Error::Io
            })?;
        Ok(file)
    }
}

impl BlockDevice for BlockFile {
    fn read_block(&self, block_id: usize, buf: &mut [u8]) -> Result<(), Error> {
        let mut file = self.seek_to(block_id, buf.len())?;
        file.read_exact(buf).map_err(|err| {
            log::error!("reading block {block_id}: {err}");
            Error::Io
        })
    }

    fn write_block(&self, block_id: usize, buf: &[u8]) -> Result<(), Error> {
        let mut file = self.seek_to(block_id, buf.len())?;
        file.write_all(buf).map_err(|err| {
            log::error!("writing block {block_id}: {err}");
            Error::Io
        })
    }

    fn num_blocks(&self) -> usize {
        self.blocks
    }
}

/// 把宿主机目录 `host` 下的文件与子目录递归复制到镜像中的目录 `dir`。
///
/// 名字超过 [`NAME_MAX`] 的项无法链接，跳过并警告。
pub fn pack(fs: &FileSys, host: &Path, dir: &str) -> io::Result<()> {
    for entry in fs::read_dir(host)? {
        let entry = entry?;
        let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
            log::warn!("skip non UTF-8 name {:?}", entry.file_name());
            continue;
        };
        if name.len() > NAME_MAX {
            log::warn!("skip {name:?}: name longer than {NAME_MAX} bytes");
            continue;
        }

        let path = if dir.ends_with('/') {
            format!("{dir}{name}")
        } else {
            format!("{dir}/{name}")
        };

        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            println!("dir: {path}");
            fs.create(&path, "/", 0, true).map_err(io::Error::other)?;
            pack(fs, &entry.path(), &path)?;
        } else if file_type.is_file() {
            println!("file: {path}");
            let data = fs::read(entry.path())?;
            fs.create(&path, "/", data.len(), false)
                .map_err(io::Error::other)?;

            let inode = fs.open(&path, "/").map_err(io::Error::other)?;
            let written = inode.write_at(0, &data);
            fs.close(inode);
            if written.map_err(io::Error::other)? != data.len() {
                return Err(io::Error::other(format!("short write to {path}")));
            }
        }
    }

    Ok(())
}
