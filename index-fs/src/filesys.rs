//! # 文件系统门面
//!
//! 以路径为参数的创建、打开、删除。相对路径总是相对调用者给出的当前目录，
//! 先由 [`path`](crate::path) 算出父目录与文件名，再自根目录逐级打开父目录。
//!
//! 多步操作要么全部完成，要么撤销已做的步骤。

use alloc::string::String;
use alloc::sync::Arc;

use block_dev::BlockDevice;
use enumflags2::BitFlags;
use spin::Mutex;

use crate::directory::Dir;
use crate::file::{File, OpenFlag};
use crate::free_map::FreeMap;
use crate::inode::{Inode, InodeTable};
use crate::path::{self, Components};
use crate::{Error, NAME_MAX, ROOT_DIR_ENTRIES, ROOT_SECTOR, Result};

pub struct FileSys {
    block_device: Arc<dyn BlockDevice>,
    free_map: Arc<Mutex<FreeMap>>,
    inodes: InodeTable,
}

impl FileSys {
    /// 挂载设备上的文件系统，`format` 为真时先格式化。
    ///
    /// 根目录记录损坏（包括从未格式化）时返回 [`Error::CorruptRecord`]。
    pub fn init(block_device: Arc<dyn BlockDevice>, format: bool) -> Result<Self> {
        log::info!(
            "initializing file system on {} blocks",
            block_device.num_blocks()
        );

        let free_map = if format {
            FreeMap::create(block_device.clone())?
        } else {
            FreeMap::open(block_device.clone())
        };
        let free_map = Arc::new(Mutex::new(free_map));
        let fs = Self {
            inodes: InodeTable::new(block_device.clone(), free_map.clone()),
            block_device,
            free_map,
        };

        if format {
            fs.format()?;
        }

        let root = Dir::open_root(&fs.inodes)?;
        root.close(&fs.inodes);

        log::info!("file system ready");
        Ok(fs)
    }

    /// 卸载前调用；位图直写，无需回写
    pub fn done(self) {
        let open = self.inodes.len();
        if open > 0 {
            log::warn!("file system shut down with {open} inode(s) still open");
        }
        log::info!("file system done");
    }

    #[inline]
    pub fn inodes(&self) -> &InodeTable {
        &self.inodes
    }

    #[inline]
    pub fn free_map(&self) -> &Arc<Mutex<FreeMap>> {
        &self.free_map
    }

    #[inline]
    pub fn block_device(&self) -> &Arc<dyn BlockDevice> {
        &self.block_device
    }

    /// 在 `path` 处创建文件或目录，同名项已存在时失败。
    ///
    /// 目录初始长度为0，`initial_size` 仅对文件有效。
    pub fn create(&self, path: &str, cwd: &str, initial_size: usize, is_dir: bool) -> Result<()> {
        let (parent, leaf) = path::split_parent_and_leaf(path, cwd)?;
        if leaf.len() > NAME_MAX {
            return Err(Error::NameTooLong);
        }
        if leaf.is_empty() {
            return Err(Error::InvalidName);
        }

        let dir = self.walk(&parent)?;
        let result = self.create_in(&dir, &parent, &leaf, initial_size, is_dir);
        dir.close(&self.inodes);

        if result.is_ok() {
            log::info!("create {parent}{leaf}");
        }
        result
    }

    /// 打开 `path` 处的 inode，根目录直接打开而不查任何目录项
    pub fn open(&self, path: &str, cwd: &str) -> Result<Arc<Inode>> {
        let mut absolute = String::new();
        let leaf = path::leaf_name(path, cwd, &mut absolute)?;
        if path::is_root(&absolute) {
            return self.inodes.open(ROOT_SECTOR);
        }

        let parent = &absolute[..absolute.len() - leaf.len()];
        let dir = self.walk(parent)?;
        let inode = dir.open_entry(&self.inodes, &leaf);
        dir.close(&self.inodes);
        inode
    }

    /// 解除 `path` 的链接；已打开者仍可继续读写，直到最后一次关闭
    pub fn remove(&self, path: &str, cwd: &str) -> Result<()> {
        let mut absolute = String::new();
        let leaf = path::leaf_name(path, cwd, &mut absolute)?;
        if path::is_root(&absolute) {
            return Err(Error::IsRoot);
        }

        let parent = &absolute[..absolute.len() - leaf.len()];
        let dir = self.walk(parent)?;
        let result = dir.remove(&self.inodes, &leaf);
        dir.close(&self.inodes);

        if result.is_ok() {
            log::info!("remove {absolute}");
        }
        result
    }

    #[inline]
    pub fn close(&self, inode: Arc<Inode>) {
        self.inodes.close(inode);
    }

    /// 打开 `path` 处的目录，途经的`.`与`..`按目录项解析
    pub fn open_dir(&self, path: &str, cwd: &str) -> Result<Dir> {
        let absolute = path::to_absolute(path, cwd)?;
        self.walk(&absolute)
    }

    /// 按 `flags` 打开文件
    pub fn open_file(&self, path: &str, cwd: &str, flags: BitFlags<OpenFlag>) -> Result<File> {
        let inode = match self.open(path, cwd) {
            Ok(inode) => inode,
            Err(Error::NotFound) if flags.contains(OpenFlag::CREATE) => {
                self.create(path, cwd, 0, false)?;
                self.open(path, cwd)?
            }
            Err(err) => return Err(err),
        };

        if flags.contains(OpenFlag::TRUNC) && !inode.is_dir() {
            if let Err(err) = inode.clear() {
                self.inodes.close(inode);
                return Err(err);
            }
        }

        Ok(File::new(inode))
    }

    /// 确认 `path` 是目录，返回规范化后的绝对路径作为新的当前目录
    pub fn chdir(&self, path: &str, cwd: &str) -> Result<String> {
        let absolute = path::to_absolute(path, cwd)?;
        self.walk(&absolute)?.close(&self.inodes);
        Ok(path::normalize(&absolute))
    }
}

impl FileSys {
    fn format(&self) -> Result<()> {
        log::info!("formatting file system...");

        Dir::create(&self.inodes, ROOT_SECTOR, ROOT_DIR_ENTRIES)?;
        let root = Dir::open_root(&self.inodes)?;
        let result = root
            .add(".", ROOT_SECTOR)
            .and_then(|()| root.add("..", ROOT_SECTOR));
        root.close(&self.inodes);
        result?;

        log::info!("formatting done");
        Ok(())
    }

    /// 自根目录沿绝对路径逐级打开目录
    fn walk(&self, absolute: &str) -> Result<Dir> {
        let mut dir = Dir::open_root(&self.inodes)?;

        for name in Components::new(absolute) {
            let inode = dir.open_entry(&self.inodes, name);
            dir.close(&self.inodes);
            dir = Dir::open(&self.inodes, inode?)?;
        }

        Ok(dir)
    }

    fn create_in(
        &self,
        dir: &Dir,
        parent: &str,
        leaf: &str,
        initial_size: usize,
        is_dir: bool,
    ) -> Result<()> {
        if dir.lookup(leaf).is_some() {
            return Err(Error::AlreadyExists);
        }

        let sector = self.free_map.lock().allocate(1)?;
        let created = if is_dir {
            Dir::create(&self.inodes, sector, 0)
        } else {
            self.inodes.create(sector, initial_size, false)
        };
        if let Err(err) = created {
            if let Err(err) = self.free_map.lock().release(sector, 1) {
                log::warn!("failed to release sector {sector}: {err}");
            }
            return Err(err);
        }

        if let Err(err) = dir.add(leaf, sector) {
            self.discard(sector);
            return Err(err);
        }

        if is_dir {
            let mut absolute = String::from(parent);
            absolute.push_str(leaf);
            if let Err(err) = self.link_dots(&absolute, sector, dir.inode().inumber()) {
                // 从父目录解除后，新目录随最后一次关闭一并回收
                if let Err(err) = dir.remove(&self.inodes, leaf) {
                    log::warn!("failed to unlink {absolute}: {err}");
                }
                return Err(err);
            }
        }

        Ok(())
    }

    fn link_dots(&self, absolute: &str, sector: u32, parent_sector: u32) -> Result<()> {
        let new_dir = self.walk(absolute)?;
        let result = new_dir
            .add(".", sector)
            .and_then(|()| new_dir.add("..", parent_sector));
        new_dir.close(&self.inodes);
        result
    }

    /// 回收尚未链接的 inode，连同其块与所在扇区
    fn discard(&self, sector: u32) {
        match self.inodes.open(sector) {
            Ok(inode) => {
                inode.remove();
                self.inodes.close(inode);
            }
            Err(err) => log::warn!("failed to discard inode {sector}: {err}"),
        }
    }
}
