//! # 空闲块管理
//!
//! 整个设备的每一块对应位图中的一位，位图本身紧随根目录 inode 存放。

use alloc::sync::Arc;
use core::fmt;

use block_dev::BlockDevice;

use crate::layout::Bitmap;
use crate::{Error, FREE_MAP_START, ROOT_SECTOR, Result};

pub struct FreeMap {
    block_device: Arc<dyn BlockDevice>,
    bitmap: Bitmap,
}

impl fmt::Debug for FreeMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FreeMap")
            .field("bitmap", &self.bitmap)
            .finish_non_exhaustive()
    }
}

impl FreeMap {
    /// 在设备上建立全新的位图，根目录 inode 与位图自身所占的块预先标记为已用
    pub fn create(block_device: Arc<dyn BlockDevice>) -> Result<Self> {
        let free_map = Self::open(block_device);
        let reserved = FREE_MAP_START as usize + free_map.bitmap.blocks();
        if reserved >= free_map.bitmap.capacity() {
            return Err(Error::OutOfSpace);
        }

        free_map.bitmap.reset(&free_map.block_device)?;
        free_map
            .bitmap
            .set_range(ROOT_SECTOR as usize, 1, true, &free_map.block_device)?;
        free_map.bitmap.set_range(
            FREE_MAP_START as usize,
            free_map.bitmap.blocks(),
            true,
            &free_map.block_device,
        )?;

        Ok(free_map)
    }

    /// 沿用设备上已有的位图
    pub fn open(block_device: Arc<dyn BlockDevice>) -> Self {
        let bitmap = Bitmap::new(FREE_MAP_START as usize, block_device.num_blocks());
        Self {
            block_device,
            bitmap,
        }
    }

    /// 分配连续 `count` 块，返回首块编号
    pub fn allocate(&mut self, count: usize) -> Result<u32> {
        let start = self
            .bitmap
            .find(count, &self.block_device)?
            .ok_or(Error::OutOfSpace)?;
        self.bitmap.set_range(start, count, true, &self.block_device)?;
        Ok(start as u32)
    }

    pub fn release(&mut self, sector: u32, count: usize) -> Result<()> {
        self.bitmap
            .set_range(sector as usize, count, false, &self.block_device)
    }

    pub fn is_free(&self, sector: u32) -> Result<bool> {
        Ok(!self.bitmap.test(sector as usize, &self.block_device)?)
    }

    /// 剩余空闲块数
    pub fn free_count(&self) -> Result<usize> {
        Ok(self.bitmap.capacity() - self.bitmap.count_ones(&self.block_device)?)
    }
}
