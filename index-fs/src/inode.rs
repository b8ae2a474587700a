//! # 索引节点层
//!
//! 位于内存的 inode 句柄，确立了文件内容的读写逻辑。
//!
//! 同一扇区上的 inode 在内存中只有一个句柄 [`Inode`]，
//! 由 [`InodeTable`] 登记并以引用计数共享；
//! 被删除的 inode 在最后一个打开者关闭时才真正释放空间。

use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use alloc::vec::Vec;

use block_dev::BlockDevice;
use enumflags2::bitflags;
use spin::{Mutex, MutexGuard};

use crate::layout::DiskInode;
use crate::{BLOCK_SIZE, DataBlock, Error, FreeMap, MAX_FILE_SIZE, Result};

/// 已打开 inode 的登记表
pub struct InodeTable {
    open_inodes: Mutex<BTreeMap<u32, Arc<Inode>>>,
    block_device: Arc<dyn BlockDevice>,
    free_map: Arc<Mutex<FreeMap>>,
}

pub struct Inode {
    /// inode所在扇区，同时也是 inode 编号
    sector: u32,
    block_device: Arc<dyn BlockDevice>,
    free_map: Arc<Mutex<FreeMap>>,
    /// 目录项的查改互斥，先于其余任何锁获取
    entries_lock: Mutex<()>,
    inner: Mutex<InodeInner>,
}

struct InodeInner {
    /// 打开者个数
    open_count: usize,
    /// 已从目录中删除，最后一次关闭时释放
    removed: bool,
    /// 大于0时拒绝写入
    deny_write_count: usize,
    disk_inode: DiskInode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stat {
    pub inumber: u32,
    pub kind: StatKind,
    /// 文件大小(字节)
    pub size: usize,
    /// 占用块数，包括索引块
    pub blocks: usize,
}

#[allow(clippy::upper_case_acronyms)]
#[bitflags]
#[repr(u32)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StatKind {
    DIR = 0o040000,
    #[default]
    FILE = 0o100000,
}

impl InodeTable {
    pub fn new(block_device: Arc<dyn BlockDevice>, free_map: Arc<Mutex<FreeMap>>) -> Self {
        Self {
            open_inodes: Mutex::new(BTreeMap::new()),
            block_device,
            free_map,
        }
    }

    /// 在 `sector` 上写入一个新 inode，并预先分配能容纳 `length` 字节的块。
    ///
    /// 分配失败时已分配的块全部归还，不写入任何记录。
    pub fn create(&self, sector: u32, length: usize, is_directory: bool) -> Result<()> {
        if length > MAX_FILE_SIZE {
            return Err(Error::FileTooLarge);
        }

        let mut disk_inode = DiskInode::new(is_directory);
        let mut free_map = self.free_map.lock();
        let new_blocks = alloc_blocks(
            DiskInode::count_total_block(length as u32),
            &mut free_map,
            &self.block_device,
        )?;

        let result = disk_inode
            .expand_to(length as u32, new_blocks.clone(), &self.block_device)
            .and_then(|()| {
                disk_inode.length = length as u32;
                self.block_device
                    .write_block(sector as usize, &disk_inode.encode())
                    .map_err(Error::from)
            });
        if let Err(err) = result {
            let _ = release_blocks(&new_blocks, &mut free_map);
            return Err(err);
        }

        log::debug!("create inode {sector}: length={length}, dir={is_directory}");
        Ok(())
    }

    /// 打开 `sector` 上的 inode；已打开则共享同一句柄
    pub fn open(&self, sector: u32) -> Result<Arc<Inode>> {
        let mut open_inodes = self.open_inodes.lock();

        if let Some(inode) = open_inodes.get(&sector) {
            inode.inner.lock().open_count += 1;
            return Ok(Arc::clone(inode));
        }

        let mut block: DataBlock = [0; BLOCK_SIZE];
        self.block_device.read_block(sector as usize, &mut block)?;
        let disk_inode = DiskInode::decode(&block).inspect_err(|_| {
            log::error!("inode {sector} is corrupt");
        })?;

        let inode = Arc::new(Inode {
            sector,
            block_device: self.block_device.clone(),
            free_map: self.free_map.clone(),
            entries_lock: Mutex::new(()),
            inner: Mutex::new(InodeInner {
                open_count: 1,
                removed: false,
                deny_write_count: 0,
                disk_inode,
            }),
        });
        open_inodes.insert(sector, inode.clone());

        log::debug!("open inode {sector}");
        Ok(inode)
    }

    /// 关闭一次句柄；最后一个打开者关闭时注销，若已删除则释放其全部块
    pub fn close(&self, inode: Arc<Inode>) {
        let mut open_inodes = self.open_inodes.lock();
        let mut inner = inode.inner.lock();

        assert!(inner.open_count > 0, "inode {} closed too often", inode.sector);
        inner.open_count -= 1;
        if inner.open_count > 0 {
            return;
        }

        open_inodes.remove(&inode.sector);
        if inner.removed {
            log::debug!("release removed inode {}", inode.sector);
            if let Err(err) = inode.release(&mut inner) {
                log::warn!("failed to release inode {}: {err}", inode.sector);
            }
        }
    }

    /// 当前登记的句柄个数
    pub fn len(&self) -> usize {
        self.open_inodes.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.open_inodes.lock().is_empty()
    }
}

impl Inode {
    /// 再打开一次已持有的句柄
    pub fn reopen(self: &Arc<Self>) -> Arc<Self> {
        self.inner.lock().open_count += 1;
        Arc::clone(self)
    }

    #[inline]
    pub fn inumber(&self) -> u32 {
        self.sector
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.inner.lock().disk_inode.length as usize
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn is_dir(&self) -> bool {
        self.inner.lock().disk_inode.is_directory
    }

    #[inline]
    pub fn is_removed(&self) -> bool {
        self.inner.lock().removed
    }

    #[inline]
    pub fn open_count(&self) -> usize {
        self.inner.lock().open_count
    }

    /// 锁住目录的全部目录项，直到守卫释放
    #[inline]
    pub(crate) fn lock_entries(&self) -> MutexGuard<'_, ()> {
        self.entries_lock.lock()
    }

    /// 标记为已删除，空间在最后一次关闭时回收
    pub fn remove(&self) {
        self.inner.lock().removed = true;
        log::debug!("inode {} marked removed", self.sector);
    }

    /// 字节偏移所在的块编号；超出文件长度时为空
    pub fn byte_to_sector(&self, pos: usize) -> Option<u32> {
        let inner = self.inner.lock();
        if pos >= inner.disk_inode.length as usize {
            return None;
        }

        inner
            .disk_inode
            .block_id(pos / BLOCK_SIZE, &self.block_device)
            .inspect_err(|err| log::warn!("inode {}: {err}", self.sector))
            .ok()
    }

    /// 扩容至 `target` 字节，全部块分配成功后才提交新长度
    pub fn grow(&self, target: usize) -> Result<()> {
        let mut inner = self.inner.lock();
        self.grow_locked(&mut inner, target)
    }

    /// 从指定位置(字节偏移)读出数据填充`buf`，返回实际读取的字节数。
    ///
    /// 遇到文件末尾或设备错误时提前结束。
    pub fn read_at(&self, offset: usize, buf: &mut [u8]) -> usize {
        let inner = self.inner.lock();
        let disk_inode = &inner.disk_inode;
        let length = disk_inode.length as usize;

        let mut bounce: DataBlock = [0; BLOCK_SIZE];
        let mut offset = offset;
        let mut read_size = 0;

        while read_size < buf.len() && offset < length {
            // 文件剩余、块内剩余、请求剩余，三者取最小
            let block_offset = offset % BLOCK_SIZE;
            let chunk_size = (buf.len() - read_size)
                .min(length - offset)
                .min(BLOCK_SIZE - block_offset);
            let dest = &mut buf[read_size..read_size + chunk_size];

            let result = disk_inode
                .block_id(offset / BLOCK_SIZE, &self.block_device)
                .and_then(|block_id| {
                    if block_id == 0 {
                        // 未分配区域读出零
                        dest.fill(0);
                    } else if chunk_size == BLOCK_SIZE {
                        // 整块直接读入调用者的缓冲区
                        self.block_device.read_block(block_id as usize, dest)?;
                    } else {
                        self.block_device
                            .read_block(block_id as usize, &mut bounce)?;
                        dest.copy_from_slice(&bounce[block_offset..block_offset + chunk_size]);
                    }
                    Ok(())
                });
            if let Err(err) = result {
                log::warn!("inode {}: short read at {offset}: {err}", self.sector);
                break;
            }

            offset += chunk_size;
            read_size += chunk_size;
        }

        read_size
    }

    /// 从指定位置写入`buf`，超出文件末尾时先扩容。
    ///
    /// 扩容失败时一个字节也不写；设备错误时返回已写入的字节数。
    pub fn write_at(&self, offset: usize, buf: &[u8]) -> Result<usize> {
        let mut inner = self.inner.lock();
        if inner.deny_write_count > 0 {
            return Err(Error::WriteDenied);
        }
        if buf.is_empty() {
            return Ok(0);
        }

        let end = offset.checked_add(buf.len()).ok_or(Error::FileTooLarge)?;
        if end > inner.disk_inode.length as usize {
            self.grow_locked(&mut inner, end)?;
        }

        let disk_inode = &inner.disk_inode;
        let length = disk_inode.length as usize;

        let mut bounce: DataBlock = [0; BLOCK_SIZE];
        let mut offset = offset;
        let mut written_size = 0;

        while written_size < buf.len() {
            let block_offset = offset % BLOCK_SIZE;
            let chunk_size = (buf.len() - written_size)
                .min(length - offset)
                .min(BLOCK_SIZE - block_offset);
            let src = &buf[written_size..written_size + chunk_size];

            let result = disk_inode
                .block_id(offset / BLOCK_SIZE, &self.block_device)
                .and_then(|block_id| {
                    if block_id == 0 {
                        return Err(Error::CorruptRecord);
                    }

                    if chunk_size == BLOCK_SIZE {
                        self.block_device.write_block(block_id as usize, src)?;
                        return Ok(());
                    }

                    // 块内在此段之前或之后还有有效数据时先读出原块；
                    // 文件末尾之后的字节恒为零
                    if block_offset > 0 || offset + chunk_size < length {
                        self.block_device
                            .read_block(block_id as usize, &mut bounce)?;
                    } else {
                        bounce.fill(0);
                    }
                    bounce[block_offset..block_offset + chunk_size].copy_from_slice(src);
                    self.block_device.write_block(block_id as usize, &bounce)?;
                    Ok(())
                });
            if let Err(err) = result {
                log::warn!("inode {}: short write at {offset}: {err}", self.sector);
                break;
            }

            offset += chunk_size;
            written_size += chunk_size;
        }

        Ok(written_size)
    }

    /// 清空文件内容，归还全部块
    pub fn clear(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.deny_write_count > 0 {
            return Err(Error::WriteDenied);
        }

        let mut disk_inode = inner.disk_inode.clone();
        let blocks = disk_inode.clear(&self.block_device)?;
        self.block_device
            .write_block(self.sector as usize, &disk_inode.encode())?;
        inner.disk_inode = disk_inode;

        release_blocks(&blocks, &mut self.free_map.lock())
    }

    /// 拒绝写入，每个打开者至多调用一次
    pub fn deny_write(&self) {
        let mut inner = self.inner.lock();
        inner.deny_write_count += 1;
        assert!(inner.deny_write_count <= inner.open_count);
    }

    /// 恢复写入，须由调用过 [`Inode::deny_write`] 的打开者在关闭前调用
    pub fn allow_write(&self) {
        let mut inner = self.inner.lock();
        assert!(inner.deny_write_count > 0);
        assert!(inner.deny_write_count <= inner.open_count);
        inner.deny_write_count -= 1;
    }

    pub fn stat(&self) -> Stat {
        let inner = self.inner.lock();
        let disk_inode = &inner.disk_inode;
        Stat {
            inumber: self.sector,
            kind: if disk_inode.is_directory {
                StatKind::DIR
            } else {
                StatKind::FILE
            },
            size: disk_inode.length as usize,
            blocks: DiskInode::count_total_block(disk_inode.length),
        }
    }
}

impl Inode {
    fn grow_locked(&self, inner: &mut InodeInner, target: usize) -> Result<()> {
        if target > MAX_FILE_SIZE {
            return Err(Error::FileTooLarge);
        }
        let disk_inode = &mut inner.disk_inode;
        let target = target as u32;
        if target <= disk_inode.length {
            return Ok(());
        }

        let mut free_map = self.free_map.lock();
        let new_blocks = alloc_blocks(
            DiskInode::count_total_block(target) - DiskInode::count_total_block(disk_inode.length),
            &mut free_map,
            &self.block_device,
        )?;

        // 在副本上挂接新块，失败时原索引保持不变
        let mut expanded = disk_inode.clone();
        let result = expanded
            .expand_to(target, new_blocks.clone(), &self.block_device)
            .and_then(|()| {
                expanded.length = target;
                self.block_device
                    .write_block(self.sector as usize, &expanded.encode())
                    .map_err(Error::from)
            });
        if let Err(err) = result {
            let _ = release_blocks(&new_blocks, &mut free_map);
            return Err(err);
        }

        log::debug!(
            "inode {} grows from {} to {target} bytes",
            self.sector,
            disk_inode.length
        );
        *disk_inode = expanded;
        Ok(())
    }

    /// 归还内容所占的块以及 inode 自身所在的扇区
    fn release(&self, inner: &mut InodeInner) -> Result<()> {
        let blocks = inner.disk_inode.clear(&self.block_device)?;
        let mut free_map = self.free_map.lock();
        let result = release_blocks(&blocks, &mut free_map);
        free_map.release(self.sector, 1).and(result)
    }
}

/// 逐块分配并清零，任一步失败则归还本次已分配的块
fn alloc_blocks(
    count: usize,
    free_map: &mut FreeMap,
    block_device: &Arc<dyn BlockDevice>,
) -> Result<Vec<u32>> {
    let mut blocks = Vec::with_capacity(count);
    if let Err(err) = try_alloc_blocks(count, &mut blocks, free_map, block_device) {
        let _ = release_blocks(&blocks, free_map);
        return Err(err);
    }
    Ok(blocks)
}

fn try_alloc_blocks(
    count: usize,
    blocks: &mut Vec<u32>,
    free_map: &mut FreeMap,
    block_device: &Arc<dyn BlockDevice>,
) -> Result<()> {
    let zero: DataBlock = [0; BLOCK_SIZE];
    for _ in 0..count {
        let block = free_map.allocate(1)?;
        blocks.push(block);
        block_device.write_block(block as usize, &zero)?;
    }
    Ok(())
}

/// 逐块归还，出错也继续；返回遇到的第一个错误
fn release_blocks(blocks: &[u32], free_map: &mut FreeMap) -> Result<()> {
    let mut result = Ok(());
    for &block in blocks {
        if let Err(err) = free_map.release(block, 1) {
            log::warn!("failed to release block {block}: {err}");
            result = result.and(Err(err));
        }
    }
    result
}
