//! 磁盘 inode 与间接索引块
//!
//! - 直接索引：inode 内 123 个**块编号**，每个编号指向一个**数据块**
//! - 一级索引：整个块连续存储 128 个块编号，每个编号都指向一个数据块
//! - 二级索引：整个块连续存储 128 个块编号，每个编号都指向一个一级索引块
//!
//! 块编号为0表示尚未分配。
//!
//! ## 块索引编码
//!
//! - 剔去低级索引的容量后，除以一级索引块的**可编号数量**，可得二级索引块内的位置
//! - 取模一级索引块的可编号数量，可得一级索引块内的位置

use alloc::sync::Arc;
use alloc::vec::Vec;

use block_dev::BlockDevice;

use crate::{BLOCK_SIZE, DataBlock, Error, MAGIC, Result};

/// 间接索引块的编号容量
const INDIRECT_COUNT: usize = BLOCK_SIZE / 4;
/// 间接索引块
type IndirectBlock = [u32; INDIRECT_COUNT];

/// 直接索引块可编号数量
const DIRECT_COUNT: usize = 123;
/// 一级索引块可编号数量
const INDIRECT1_COUNT: usize = INDIRECT_COUNT;
/// 二级索引块可编号数量
const INDIRECT2_COUNT: usize = INDIRECT_COUNT.pow(2);
/// 直接索引时的编号容量
const DIRECT_CAP: usize = DIRECT_COUNT;
/// 用上一级索引时的编号容量
const INDIRECT1_CAP: usize = DIRECT_CAP + INDIRECT1_COUNT;
/// 用上二级索引时的编号容量
const INDIRECT2_CAP: usize = INDIRECT1_CAP + INDIRECT2_COUNT;

/// 单个 inode 最多可索引的数据块数
pub const MAX_BLOCKS: usize = INDIRECT2_CAP;

// 磁盘上各字段的字节偏移
const LENGTH_OFFSET: usize = 0;
const MAGIC_OFFSET: usize = 4;
const KIND_OFFSET: usize = 8;
const DIRECT_OFFSET: usize = 12;
const INDIRECT1_OFFSET: usize = DIRECT_OFFSET + DIRECT_COUNT * 4;
const INDIRECT2_OFFSET: usize = INDIRECT1_OFFSET + 4;

// inode 恰好占据一个块
const _: () = assert!(INDIRECT2_OFFSET + 4 == BLOCK_SIZE);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskInode {
    /// 文件大小(字节)，不用usize是为了严控布局
    pub length: u32,
    pub is_directory: bool,
    /// 直接索引块，包含 DIRECT_COUNT 个块编号，
    /// 存储容量：DIRECT_CAP * BLOCK_SIZE 字节
    direct: [u32; DIRECT_COUNT],
    /// 指向一个一级索引块
    indirect1: u32,
    /// 指向一个二级索引块
    indirect2: u32,
}

impl DiskInode {
    #[inline]
    pub fn new(is_directory: bool) -> Self {
        Self {
            length: 0,
            is_directory,
            direct: [0; DIRECT_COUNT],
            indirect1: 0,
            indirect2: 0,
        }
    }

    /// 从磁盘块解码，魔数不符即视为损坏
    pub fn decode(block: &DataBlock) -> Result<Self> {
        if read_u32(block, MAGIC_OFFSET) != MAGIC {
            return Err(Error::CorruptRecord);
        }

        let mut direct = [0; DIRECT_COUNT];
        for (i, id) in direct.iter_mut().enumerate() {
            *id = read_u32(block, DIRECT_OFFSET + i * 4);
        }

        Ok(Self {
            length: read_u32(block, LENGTH_OFFSET),
            is_directory: read_u32(block, KIND_OFFSET) != 0,
            direct,
            indirect1: read_u32(block, INDIRECT1_OFFSET),
            indirect2: read_u32(block, INDIRECT2_OFFSET),
        })
    }

    pub fn encode(&self) -> DataBlock {
        let mut block = [0; BLOCK_SIZE];
        write_u32(&mut block, LENGTH_OFFSET, self.length);
        write_u32(&mut block, MAGIC_OFFSET, MAGIC);
        write_u32(&mut block, KIND_OFFSET, self.is_directory as u32);
        for (i, &id) in self.direct.iter().enumerate() {
            write_u32(&mut block, DIRECT_OFFSET + i * 4, id);
        }
        write_u32(&mut block, INDIRECT1_OFFSET, self.indirect1);
        write_u32(&mut block, INDIRECT2_OFFSET, self.indirect2);
        block
    }

    /// 逻辑上 inode 指向一系列数据块，此处传入的是这些数据块的索引（逻辑索引），
    /// 然后返回其在块设备上的ID。
    ///
    /// 途经未分配的索引块时直接返回0，绝不读取0号块。
    pub fn block_id(&self, block_index: usize, block_device: &Arc<dyn BlockDevice>) -> Result<u32> {
        if block_index < DIRECT_CAP {
            Ok(self.direct[block_index])
        } else if block_index < INDIRECT1_CAP {
            if self.indirect1 == 0 {
                return Ok(0);
            }
            // 剔去直接索引的部分
            let indirect1 = read_indirect(self.indirect1, block_device)?;
            Ok(indirect1[block_index - DIRECT_CAP])
        } else if block_index < INDIRECT2_CAP {
            if self.indirect2 == 0 {
                return Ok(0);
            }
            // 剔去使用了一级索引的部分
            let index = block_index - INDIRECT1_CAP;

            // 数量上二级索引有128个INDIRECT1_COUNT
            let indirect1 = read_indirect(self.indirect2, block_device)?[index / INDIRECT1_COUNT];
            if indirect1 == 0 {
                return Ok(0);
            }
            Ok(read_indirect(indirect1, block_device)?[index % INDIRECT1_COUNT])
        } else {
            Err(Error::FileTooLarge)
        }
    }

    /// 把一批已清零的新块挂到索引上，使其能容纳 `larger_size` 字节。
    ///
    /// `new_blocks` 的个数必须恰为 [`DiskInode::count_total_block`] 之差；
    /// 不修改 `length`，由调用者在成功后提交。
    pub fn expand_to(
        &mut self,
        larger_size: u32,
        new_blocks: Vec<u32>,
        block_device: &Arc<dyn BlockDevice>,
    ) -> Result<()> {
        let mut block_index = Self::count_data_block(self.length);
        let new_total_blocks = Self::count_data_block(larger_size);
        if new_total_blocks > MAX_BLOCKS {
            return Err(Error::FileTooLarge);
        }
        let mut new_blocks = new_blocks.into_iter();
        let mut next = || new_blocks.next().ok_or(Error::OutOfSpace);

        /******************** 直接索引 ********************/
        while block_index < new_total_blocks.min(DIRECT_CAP) {
            self.direct[block_index] = next()?;
            block_index += 1;
        }
        /******************** END ********************/

        if block_index == new_total_blocks {
            return Ok(());
        }

        /******************** 一级索引 ********************/
        if block_index < INDIRECT1_CAP {
            // 这次size的增加经过了DIRECT_CAP，创建一级索引
            let mut indirect1 = if block_index == DIRECT_CAP {
                self.indirect1 = next()?;
                [0; INDIRECT_COUNT]
            } else {
                read_indirect(self.indirect1, block_device)?
            };

            while block_index < new_total_blocks.min(INDIRECT1_CAP) {
                indirect1[block_index - DIRECT_CAP] = next()?;
                block_index += 1;
            }
            write_indirect(self.indirect1, &indirect1, block_device)?;
        }
        /******************** END ********************/

        if block_index == new_total_blocks {
            return Ok(());
        }

        /******************** 二级索引 ********************/
        // 这次size的增加经过了INDIRECT1_CAP，创建二级索引
        let mut indirect2 = if block_index == INDIRECT1_CAP {
            self.indirect2 = next()?;
            [0; INDIRECT_COUNT]
        } else {
            read_indirect(self.indirect2, block_device)?
        };

        while block_index < new_total_blocks {
            let index2 = (block_index - INDIRECT1_CAP) / INDIRECT1_COUNT;

            // 子块索引为0表示进入新的一级索引块
            let mut indirect1 = if (block_index - INDIRECT1_CAP) % INDIRECT1_COUNT == 0 {
                indirect2[index2] = next()?;
                [0; INDIRECT_COUNT]
            } else {
                read_indirect(indirect2[index2], block_device)?
            };

            while block_index < new_total_blocks
                && (block_index - INDIRECT1_CAP) / INDIRECT1_COUNT == index2
            {
                indirect1[(block_index - INDIRECT1_CAP) % INDIRECT1_COUNT] = next()?;
                block_index += 1;
            }
            write_indirect(indirect2[index2], &indirect1, block_device)?;
        }
        write_indirect(self.indirect2, &indirect2, block_device)?;
        /******************** END ********************/

        Ok(())
    }

    /// 清空索引，返回原先占用的全部数据块与索引块
    pub fn clear(&mut self, block_device: &Arc<dyn BlockDevice>) -> Result<Vec<u32>> {
        let mut drop_blocks: Vec<u32> = Vec::with_capacity(Self::count_total_block(self.length));
        let mut data_blocks = Self::count_data_block(self.length);

        /******************** 直接索引 ********************/
        drop_blocks.extend_from_slice(&self.direct[..data_blocks.min(DIRECT_CAP)]);
        /******************** END ********************/

        if data_blocks > DIRECT_COUNT {
            /******************** 一级索引 ********************/
            data_blocks -= DIRECT_COUNT;
            let indirect1 = read_indirect(self.indirect1, block_device)?;
            drop_blocks.extend_from_slice(&indirect1[..data_blocks.min(INDIRECT1_COUNT)]);
            drop_blocks.push(self.indirect1);
            /******************** END ********************/
        }

        if data_blocks > INDIRECT1_COUNT {
            /******************** 二级索引 ********************/
            data_blocks -= INDIRECT1_COUNT;
            let indirect2 = read_indirect(self.indirect2, block_device)?;
            for (index2, &block) in indirect2
                .iter()
                .take(data_blocks.div_ceil(INDIRECT1_COUNT))
                .enumerate()
            {
                // 最后一块一级索引可能只用了一部分
                let used = (data_blocks - index2 * INDIRECT1_COUNT).min(INDIRECT1_COUNT);
                let indirect1 = read_indirect(block, block_device)?;
                drop_blocks.extend_from_slice(&indirect1[..used]);
                drop_blocks.push(block);
            }
            drop_blocks.push(self.indirect2);
            /******************** END ********************/
        }

        self.length = 0;
        self.direct.fill(0);
        self.indirect1 = 0;
        self.indirect2 = 0;

        Ok(drop_blocks)
    }

    /// 计算容纳指定数据量需要多少个**数据块**
    #[inline]
    pub fn count_data_block(size: u32) -> usize {
        (size as usize).div_ceil(BLOCK_SIZE)
    }

    /// 计算容纳指定数据量需要多少个 **数据块** 和 **索引块**(`IndirectBlock`)
    pub fn count_total_block(size: u32) -> usize {
        let data_blocks = Self::count_data_block(size);
        let mut total = data_blocks;

        // 超出直接索引，使用一级索引块，
        if data_blocks > DIRECT_CAP {
            total += 1;
        }

        // 超出一级索引，使用二级索引块及其下的一级索引块
        if data_blocks > INDIRECT1_CAP {
            total += 1 + (data_blocks - INDIRECT1_CAP).div_ceil(INDIRECT_COUNT);
        }

        total
    }
}

fn read_indirect(block_id: u32, block_device: &Arc<dyn BlockDevice>) -> Result<IndirectBlock> {
    let mut data = [0; BLOCK_SIZE];
    block_device.read_block(block_id as usize, &mut data)?;

    let mut indirect = [0; INDIRECT_COUNT];
    for (i, id) in indirect.iter_mut().enumerate() {
        *id = read_u32(&data, i * 4);
    }
    Ok(indirect)
}

fn write_indirect(
    block_id: u32,
    indirect: &IndirectBlock,
    block_device: &Arc<dyn BlockDevice>,
) -> Result<()> {
    let mut data = [0; BLOCK_SIZE];
    for (i, &id) in indirect.iter().enumerate() {
        write_u32(&mut data, i * 4, id);
    }
    block_device.write_block(block_id as usize, &data)?;
    Ok(())
}

#[inline]
fn read_u32(block: &DataBlock, offset: usize) -> u32 {
    let mut bytes = [0; 4];
    bytes.copy_from_slice(&block[offset..offset + 4]);
    u32::from_le_bytes(bytes)
}

#[inline]
fn write_u32(block: &mut DataBlock, offset: usize, value: u32) {
    block[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}
