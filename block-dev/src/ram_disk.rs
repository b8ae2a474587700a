use alloc::vec;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicUsize, Ordering};

use spin::Mutex;

use crate::{BLOCK_SIZE, BlockDevice, Error};

type Block = [u8; BLOCK_SIZE];

/// 内存上的块设备，供测试与临时文件系统使用
#[derive(Debug)]
pub struct RamDisk {
    blocks: Mutex<Vec<Block>>,
    /// 已完成的块读取次数
    reads: AtomicUsize,
    /// 已完成的块写入次数
    writes: AtomicUsize,
}

impl RamDisk {
    pub fn new(num_blocks: usize) -> Self {
        Self {
            blocks: Mutex::new(vec![[0; BLOCK_SIZE]; num_blocks]),
            reads: AtomicUsize::new(0),
            writes: AtomicUsize::new(0),
        }
    }

    #[inline]
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::Relaxed)
    }
}

impl BlockDevice for RamDisk {
    fn read_block(&self, block_id: usize, buf: &mut [u8]) -> Result<(), Error> {
        if buf.len() != BLOCK_SIZE {
            return Err(Error::BadBuffer);
        }
        let blocks = self.blocks.lock();
        let block = blocks.get(block_id).ok_or(Error::OutOfRange)?;
        buf.copy_from_slice(block);
        self.reads.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn write_block(&self, block_id: usize, buf: &[u8]) -> Result<(), Error> {
        if buf.len() != BLOCK_SIZE {
            return Err(Error::BadBuffer);
        }
        let mut blocks = self.blocks.lock();
        let block = blocks.get_mut(block_id).ok_or(Error::OutOfRange)?;
        block.copy_from_slice(buf);
        self.writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    #[inline]
    fn num_blocks(&self) -> usize {
        self.blocks.lock().len()
    }
}
