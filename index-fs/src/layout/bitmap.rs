use alloc::sync::Arc;

use block_dev::BlockDevice;

use crate::{BLOCK_BITS, BLOCK_SIZE, DataBlock, Error, Result};

/// 位图区域内块的结构
type BitmapBlock = [u64; BLOCK_BITS / 64];

/// 位图区域，记录其指示区域的块分配情况
#[derive(Debug)]
pub struct Bitmap {
    /// 位图的起始块
    start_block_id: usize,
    /// 位图占用块数
    blocks: usize,
    /// 有效位数，其余位永不分配
    bits: usize,
}

/// 位编号
struct BitID(usize);

impl Bitmap {
    #[inline]
    pub fn new(start_block_id: usize, bits: usize) -> Self {
        Self {
            start_block_id,
            blocks: bits.div_ceil(BLOCK_BITS),
            bits,
        }
    }

    /// 位图本身占用的块数
    #[inline]
    pub fn blocks(&self) -> usize {
        self.blocks
    }

    /// 位图所指示区域的总块数
    #[inline]
    pub fn capacity(&self) -> usize {
        self.bits
    }

    /// 清空整个位图
    pub fn reset(&self, block_device: &Arc<dyn BlockDevice>) -> Result<()> {
        let zero = [0; BLOCK_SIZE];
        for block_index in 0..self.blocks {
            block_device.write_block(self.start_block_id + block_index, &zero)?;
        }
        Ok(())
    }

    /// 寻找连续 `count` 个空闲位，返回首位编号。
    /// 若位图的空间用尽，则返回空。
    pub fn find(&self, count: usize, block_device: &Arc<dyn BlockDevice>) -> Result<Option<usize>> {
        let mut run_start = 0;
        let mut run_len = 0;

        for block_index in 0..self.blocks {
            let bitmap_block = self.load(block_index, block_device)?;

            // 整块已满，连续段就此中断
            if bitmap_block.iter().all(|&bits| bits == u64::MAX) {
                run_len = 0;
                continue;
            }

            for (group_index, &bits) in bitmap_block.iter().enumerate() {
                if bits == u64::MAX {
                    run_len = 0;
                    continue;
                }

                for ingroup_index in 0..64 {
                    let bit = BitID::encode(block_index, group_index, ingroup_index).0;
                    if bit >= self.bits {
                        return Ok(None);
                    }

                    if bits & (1 << ingroup_index) != 0 {
                        run_len = 0;
                        continue;
                    }

                    if run_len == 0 {
                        run_start = bit;
                    }
                    run_len += 1;
                    if run_len == count {
                        return Ok(Some(run_start));
                    }
                }
            }
        }

        Ok(None)
    }

    /// 把 `[start, start + count)` 的位全部置为 `value`。
    ///
    /// 越界或已有位等于 `value` 时返回 [`Error::CorruptRecord`]，位图不作任何改动。
    pub fn set_range(
        &self,
        start: usize,
        count: usize,
        value: bool,
        block_device: &Arc<dyn BlockDevice>,
    ) -> Result<()> {
        if start.checked_add(count).is_none_or(|end| end > self.bits) {
            log::error!("bits [{start}, +{count}) out of bitmap range {}", self.bits);
            return Err(Error::CorruptRecord);
        }

        // 先逐块检查，确认每一位都会翻转后再写回
        for write in [false, true] {
            let mut bit = start;
            while bit < start + count {
                let (block_index, _, _) = BitID(bit).decode();
                let mut bitmap_block = self.load(block_index, block_device)?;

                // 同一块内的位一次改完
                while bit < start + count && BitID(bit).decode().0 == block_index {
                    let (_, group_index, ingroup_index) = BitID(bit).decode();
                    if (bitmap_block[group_index] & (1 << ingroup_index) != 0) == value {
                        log::error!("bit {bit} is already {value}");
                        return Err(Error::CorruptRecord);
                    }
                    bitmap_block[group_index] ^= 1 << ingroup_index;
                    bit += 1;
                }

                if write {
                    self.store(block_index, &bitmap_block, block_device)?;
                }
            }
        }

        Ok(())
    }

    pub fn test(&self, bit: usize, block_device: &Arc<dyn BlockDevice>) -> Result<bool> {
        let (block_index, group_index, ingroup_index) = BitID(bit).decode();
        let bitmap_block = self.load(block_index, block_device)?;
        Ok(bitmap_block[group_index] & (1 << ingroup_index) != 0)
    }

    /// 已置位的个数
    pub fn count_ones(&self, block_device: &Arc<dyn BlockDevice>) -> Result<usize> {
        let mut ones = 0;
        for block_index in 0..self.blocks {
            ones += self
                .load(block_index, block_device)?
                .iter()
                .map(|bits| bits.count_ones() as usize)
                .sum::<usize>();
        }
        Ok(ones)
    }
}

impl Bitmap {
    fn load(&self, block_index: usize, block_device: &Arc<dyn BlockDevice>) -> Result<BitmapBlock> {
        let mut data: DataBlock = [0; BLOCK_SIZE];
        block_device.read_block(self.start_block_id + block_index, &mut data)?;

        let mut bitmap_block = [0; BLOCK_BITS / 64];
        for (bits, chunk) in bitmap_block.iter_mut().zip(data.chunks_exact(8)) {
            let mut bytes = [0; 8];
            bytes.copy_from_slice(chunk);
            *bits = u64::from_le_bytes(bytes);
        }
        Ok(bitmap_block)
    }

    fn store(
        &self,
        block_index: usize,
        bitmap_block: &BitmapBlock,
        block_device: &Arc<dyn BlockDevice>,
    ) -> Result<()> {
        let mut data: DataBlock = [0; BLOCK_SIZE];
        for (chunk, bits) in data.chunks_exact_mut(8).zip(bitmap_block) {
            chunk.copy_from_slice(&bits.to_le_bytes());
        }
        block_device.write_block(self.start_block_id + block_index, &data)?;
        Ok(())
    }
}

impl BitID {
    /// 线性映射编码得到位编号
    #[inline]
    fn encode(block_index: usize, group_index: usize, ingroup_index: usize) -> Self {
        Self(block_index * BLOCK_BITS + group_index * 64 + ingroup_index)
    }

    fn decode(self) -> (usize, usize, usize) {
        let mut bit = self.0;

        let block_index = bit / BLOCK_BITS;
        bit %= BLOCK_BITS;
        (block_index, bit / 64, bit % 64)
    }
}
