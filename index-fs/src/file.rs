use alloc::sync::Arc;

use enumflags2::bitflags;

use crate::inode::{Inode, InodeTable, Stat};
use crate::Result;

/// 打开的文件，自带读写位置
pub struct File {
    inode: Arc<Inode>,
    /// **文件**内的偏移量
    pos: usize,
    /// 此打开者是否拒绝了写入
    deny_write: bool,
}

#[rustfmt::skip]
#[allow(clippy::upper_case_acronyms)]
#[bitflags]
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenFlag {
    /// 文件不存在时创建
    CREATE = 0b0010_0000_0000,
    /// 先清空文件，再交给用户
    TRUNC  = 0b0100_0000_0000,
}

impl File {
    /// 接管一次 inode 的打开
    #[inline]
    pub fn new(inode: Arc<Inode>) -> Self {
        Self {
            inode,
            pos: 0,
            deny_write: false,
        }
    }

    /// 同一 inode 的新文件对象，读写位置从头开始
    pub fn reopen(&self) -> Self {
        Self::new(self.inode.reopen())
    }

    /// 关闭前撤销本对象的拒绝写入
    pub fn close(mut self, inodes: &InodeTable) {
        self.allow_write();
        inodes.close(self.inode);
    }

    #[inline]
    pub fn inode(&self) -> &Arc<Inode> {
        &self.inode
    }

    pub fn read(&mut self, buf: &mut [u8]) -> usize {
        let read_size = self.inode.read_at(self.pos, buf);
        self.pos += read_size;
        read_size
    }

    /// 不移动读写位置
    #[inline]
    pub fn read_at(&self, buf: &mut [u8], offset: usize) -> usize {
        self.inode.read_at(offset, buf)
    }

    pub fn write(&mut self, buf: &[u8]) -> Result<usize> {
        let write_size = self.inode.write_at(self.pos, buf)?;
        self.pos += write_size;
        Ok(write_size)
    }

    /// 不移动读写位置
    #[inline]
    pub fn write_at(&self, buf: &[u8], offset: usize) -> Result<usize> {
        self.inode.write_at(offset, buf)
    }

    /// 拒绝任何打开者写入，直到本对象调用 [`File::allow_write`] 或关闭
    pub fn deny_write(&mut self) {
        if !self.deny_write {
            self.deny_write = true;
            self.inode.deny_write();
        }
    }

    pub fn allow_write(&mut self) {
        if self.deny_write {
            self.deny_write = false;
            self.inode.allow_write();
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.inode.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.inode.is_empty()
    }

    /// 位置可以越过文件末尾，其后的写入会扩容
    #[inline]
    pub fn seek(&mut self, pos: usize) {
        self.pos = pos;
    }

    #[inline]
    pub fn tell(&self) -> usize {
        self.pos
    }

    #[inline]
    pub fn stat(&self) -> Stat {
        self.inode.stat()
    }
}
