#![no_std]

extern crate alloc;

/* index-fs 的整体架构，自上而下 */

// 文件系统门面：创建、打开、删除与格式化
mod filesys;

// 文件对象：带读写位置的打开文件
mod file;

// 目录层：目录项的查找、链接与遍历
mod directory;

// 索引节点层：打开句柄表、按字节读写、按需扩容
mod inode;

// 空闲块管理
mod free_map;

// 磁盘数据结构层
mod layout;

mod error;
pub mod path;

pub use block_dev::{BLOCK_SIZE, BlockDevice};

pub use self::{
    directory::{Dir, Entries},
    error::Error,
    file::{File, OpenFlag},
    filesys::FileSys,
    free_map::FreeMap,
    inode::{Inode, InodeTable, Stat, StatKind},
    layout::{DirEntry, DiskInode},
};

pub const MAGIC: u32 = 0x494e_4f44;
pub const BLOCK_BITS: usize = BLOCK_SIZE * 8;

/// 文件名的最大长度(字节)
pub const NAME_MAX: usize = 14;
/// 绝对路径的最大长度(字节)
pub const PATH_MAX: usize = 255;

/// 根目录 inode 所在扇区
pub const ROOT_SECTOR: u32 = 0;
/// 空闲块位图的起始扇区
pub const FREE_MAP_START: u32 = 1;
/// 根目录初始可容纳的目录项个数
pub const ROOT_DIR_ENTRIES: usize = 16;

pub const MAX_FILE_SIZE: usize = layout::MAX_BLOCKS * BLOCK_SIZE;

pub type Result<T> = core::result::Result<T, Error>;

type DataBlock = [u8; BLOCK_SIZE];
