//! # 块设备接口层
//!
//! 块设备是以**块**为单位存储数据的设备，例如磁盘、光盘、U盘等；
//! [`BlockDevice`] 就是对读写块设备的抽象，
//! 实现了此特质的类型称为**块设备驱动**。
//!
//! 每次读写恰好一个 [`BLOCK_SIZE`] 字节的块，块编号从0开始连续。

#![no_std]

extern crate alloc;

mod ram_disk;

use core::any::Any;

pub use self::ram_disk::RamDisk;

/// 块大小(字节)
pub const BLOCK_SIZE: usize = 512;

/// 块设备驱动特质
pub trait BlockDevice: Send + Sync + Any {
    fn read_block(&self, block_id: usize, buf: &mut [u8]) -> Result<(), Error>;

    fn write_block(&self, block_id: usize, buf: &[u8]) -> Result<(), Error>;

    /// 设备总块数
    fn num_blocks(&self) -> usize;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// 块编号超出设备容量
    OutOfRange,
    /// 缓冲区不是一个完整的块
    BadBuffer,
    /// 底层介质读写失败
    Io,
}
