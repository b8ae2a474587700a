//! # 磁盘数据结构层
//!
//! index-fs 的磁盘布局：
//! 根目录 inode | 空闲块位图 | 其余块(inode、数据块、索引块混杂，按需分配)

mod bitmap;
pub use bitmap::Bitmap;

mod inode;
pub use inode::{DiskInode, MAX_BLOCKS};

/// 文件项，也属于磁盘文件系统数据结构
mod dir_entry;
pub use dir_entry::DirEntry;
