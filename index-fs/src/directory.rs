//! # 目录层
//!
//! 目录是内容为 [`DirEntry`] 数组的 inode。删除的目录项只腾出槽位，
//! 新目录项优先复用空槽，没有空槽时追加到末尾。

use alloc::string::String;
use alloc::sync::Arc;

use crate::inode::{Inode, InodeTable};
use crate::layout::DirEntry;
use crate::{Error, NAME_MAX, ROOT_SECTOR, Result};

/// 打开的目录，自带遍历位置
pub struct Dir {
    inode: Arc<Inode>,
    pos: usize,
}

impl Dir {
    /// 在 `sector` 上建立可容纳 `entry_cnt` 个目录项的空目录
    pub fn create(inodes: &InodeTable, sector: u32, entry_cnt: usize) -> Result<()> {
        inodes.create(sector, entry_cnt * DirEntry::SIZE, true)
    }

    /// 以目录方式使用已打开的 inode；不是目录时关闭它
    pub fn open(inodes: &InodeTable, inode: Arc<Inode>) -> Result<Self> {
        if !inode.is_dir() {
            inodes.close(inode);
            return Err(Error::NotADirectory);
        }
        Ok(Self { inode, pos: 0 })
    }

    pub fn open_root(inodes: &InodeTable) -> Result<Self> {
        Self::open(inodes, inodes.open(ROOT_SECTOR)?)
    }

    /// 同一目录的新句柄，遍历位置从头开始
    pub fn reopen(&self) -> Self {
        Self {
            inode: self.inode.reopen(),
            pos: 0,
        }
    }

    pub fn close(self, inodes: &InodeTable) {
        inodes.close(self.inode);
    }

    #[inline]
    pub fn inode(&self) -> &Arc<Inode> {
        &self.inode
    }

    /// 按名字查找，返回目录项指向的 inode 编号
    pub fn lookup(&self, name: &str) -> Option<u32> {
        find(&self.inode, name).map(|(_, entry)| entry.inode_sector())
    }

    /// 按名字查找并打开目录项指向的 inode。
    ///
    /// 查找与打开之间持有目录项锁，期间该项不会被删除，其扇区也就不会被回收。
    pub fn open_entry(&self, inodes: &InodeTable, name: &str) -> Result<Arc<Inode>> {
        let _entries = self.inode.lock_entries();
        let (_, entry) = find(&self.inode, name).ok_or(Error::NotFound)?;
        inodes.open(entry.inode_sector())
    }

    /// 链接名为 `name` 的目录项，指向 `sector` 上的 inode
    pub fn add(&self, name: &str, sector: u32) -> Result<()> {
        if name.is_empty() {
            return Err(Error::InvalidName);
        }
        if name.len() > NAME_MAX {
            return Err(Error::NameTooLong);
        }
        let _entries = self.inode.lock_entries();
        // 已删除的目录不再接受新项
        if self.inode.is_removed() {
            return Err(Error::NotFound);
        }
        if find(&self.inode, name).is_some() {
            return Err(Error::AlreadyExists);
        }

        let mut offset = 0;
        while let Some(entry) = read_entry(&self.inode, offset) {
            if !entry.in_use() {
                break;
            }
            offset += DirEntry::SIZE;
        }

        write_entry(&self.inode, offset, &DirEntry::new(name, sector))?;
        log::debug!("link {name} -> inode {sector} in dir {}", self.inode.inumber());
        Ok(())
    }

    /// 解除名为 `name` 的目录项，并标记其 inode 为已删除。
    ///
    /// 非空目录不可删除。
    pub fn remove(&self, inodes: &InodeTable, name: &str) -> Result<()> {
        if name == "." || name == ".." {
            return Err(Error::InvalidName);
        }
        let _entries = self.inode.lock_entries();
        let (offset, mut entry) = find(&self.inode, name).ok_or(Error::NotFound)?;

        let inode = inodes.open(entry.inode_sector())?;
        let result = {
            // 子目录在检查与删除之间不得新增目录项
            let _children = inode.is_dir().then(|| inode.lock_entries());
            if inode.is_dir() && has_children(&inode) {
                Err(Error::DirectoryNotEmpty)
            } else {
                entry.release();
                write_entry(&self.inode, offset, &entry).map(|()| inode.remove())
            }
        };
        inodes.close(inode);
        result?;
        log::debug!("unlink {name} in dir {}", self.inode.inumber());
        Ok(())
    }

    /// 除`.`与`..`外是否没有目录项
    pub fn is_empty(&self) -> bool {
        !has_children(&self.inode)
    }

    /// 读出下一个目录项的名字，跳过`.`与`..`
    pub fn read_next(&mut self) -> Option<String> {
        while let Some(entry) = read_entry(&self.inode, self.pos) {
            self.pos += DirEntry::SIZE;
            if entry.in_use() && !is_dot(entry.name()) {
                return Some(String::from(entry.name()));
            }
        }
        None
    }

    /// 从当前遍历位置起迭代目录项的名字
    pub fn entries(&mut self) -> Entries<'_> {
        Entries(self)
    }
}

pub struct Entries<'a>(&'a mut Dir);

impl Iterator for Entries<'_> {
    type Item = String;

    fn next(&mut self) -> Option<Self::Item> {
        self.0.read_next()
    }
}

#[inline]
fn is_dot(name: &str) -> bool {
    name == "." || name == ".."
}

fn read_entry(inode: &Inode, offset: usize) -> Option<DirEntry> {
    let mut bytes = [0; DirEntry::SIZE];
    if inode.read_at(offset, &mut bytes) != DirEntry::SIZE {
        return None;
    }
    Some(DirEntry::from_bytes(&bytes))
}

fn write_entry(inode: &Inode, offset: usize, entry: &DirEntry) -> Result<()> {
    if inode.write_at(offset, &entry.to_bytes())? != DirEntry::SIZE {
        return Err(Error::Device(block_dev::Error::Io));
    }
    Ok(())
}

fn find(inode: &Inode, name: &str) -> Option<(usize, DirEntry)> {
    let mut offset = 0;
    while let Some(entry) = read_entry(inode, offset) {
        if entry.in_use() && entry.name() == name {
            return Some((offset, entry));
        }
        offset += DirEntry::SIZE;
    }
    None
}

fn has_children(inode: &Inode) -> bool {
    let mut offset = 0;
    while let Some(entry) = read_entry(inode, offset) {
        if entry.in_use() && !is_dot(entry.name()) {
            return true;
        }
        offset += DirEntry::SIZE;
    }
    false
}

#[cfg(test)]
mod tests {
    use alloc::vec::Vec;

    use block_dev::{BlockDevice, RamDisk};
    use spin::Mutex;

    use super::*;
    use crate::FreeMap;

    fn setup() -> (InodeTable, Arc<Mutex<FreeMap>>) {
        let dev: Arc<dyn BlockDevice> = Arc::new(RamDisk::new(256));
        let free_map = Arc::new(Mutex::new(FreeMap::create(dev.clone()).unwrap()));
        let inodes = InodeTable::new(dev, free_map.clone());
        Dir::create(&inodes, ROOT_SECTOR, 2).unwrap();
        (inodes, free_map)
    }

    fn new_file(inodes: &InodeTable, free_map: &Mutex<FreeMap>) -> u32 {
        let sector = free_map.lock().allocate(1).unwrap();
        inodes.create(sector, 0, false).unwrap();
        sector
    }

    #[test]
    fn add_and_lookup() {
        let (inodes, free_map) = setup();
        let root = Dir::open_root(&inodes).unwrap();
        let sector = new_file(&inodes, &free_map);

        root.add("a", sector).unwrap();
        assert_eq!(root.lookup("a"), Some(sector));
        assert_eq!(root.lookup("b"), None);
        let inode = root.open_entry(&inodes, "a").unwrap();
        assert_eq!(inode.inumber(), sector);
        inodes.close(inode);
        assert!(matches!(root.open_entry(&inodes, "b"), Err(Error::NotFound)));
        assert_eq!(root.add("a", sector), Err(Error::AlreadyExists));
        assert_eq!(root.add("", sector), Err(Error::InvalidName));
        assert_eq!(root.add("abcdefghijklmno", sector), Err(Error::NameTooLong));
        root.add("abcdefghijklmn", sector).unwrap();

        root.close(&inodes);
        assert!(inodes.is_empty());
    }

    #[test]
    fn reuse_free_slot() {
        let (inodes, free_map) = setup();
        let root = Dir::open_root(&inodes).unwrap();
        for name in ["a", "b", "c"] {
            root.add(name, new_file(&inodes, &free_map)).unwrap();
        }
        let len = root.inode().len();
        assert_eq!(len, 3 * DirEntry::SIZE);

        root.remove(&inodes, "b").unwrap();
        root.add("d", new_file(&inodes, &free_map)).unwrap();
        assert_eq!(root.inode().len(), len);

        root.close(&inodes);
    }

    #[test]
    fn read_entries() {
        let (inodes, free_map) = setup();
        let mut root = Dir::open_root(&inodes).unwrap();
        root.add(".", ROOT_SECTOR).unwrap();
        root.add("..", ROOT_SECTOR).unwrap();
        assert!(root.is_empty());

        for name in ["x", "y"] {
            root.add(name, new_file(&inodes, &free_map)).unwrap();
        }
        root.remove(&inodes, "x").unwrap();
        assert_eq!(root.remove(&inodes, "x"), Err(Error::NotFound));
        assert_eq!(root.remove(&inodes, ".."), Err(Error::InvalidName));

        let names: Vec<_> = root.entries().collect();
        assert_eq!(names, ["y"]);
        assert_eq!(root.read_next(), None);

        root.close(&inodes);
    }

    #[test]
    fn refuse_non_empty() {
        let (inodes, free_map) = setup();
        let root = Dir::open_root(&inodes).unwrap();

        let sub_sector = free_map.lock().allocate(1).unwrap();
        Dir::create(&inodes, sub_sector, 0).unwrap();
        root.add("sub", sub_sector).unwrap();

        let sub = Dir::open(&inodes, inodes.open(sub_sector).unwrap()).unwrap();
        sub.add("f", new_file(&inodes, &free_map)).unwrap();
        assert_eq!(root.remove(&inodes, "sub"), Err(Error::DirectoryNotEmpty));

        sub.remove(&inodes, "f").unwrap();
        root.remove(&inodes, "sub").unwrap();
        assert!(sub.inode().is_removed());
        assert_eq!(sub.add("g", ROOT_SECTOR), Err(Error::NotFound));

        // 最后一个打开者关闭后才回收扇区
        assert!(!free_map.lock().is_free(sub_sector).unwrap());
        sub.close(&inodes);
        assert!(free_map.lock().is_free(sub_sector).unwrap());

        root.close(&inodes);
    }

    #[test]
    fn open_file_as_dir() {
        let (inodes, free_map) = setup();
        let sector = new_file(&inodes, &free_map);
        let inode = inodes.open(sector).unwrap();
        assert!(matches!(
            Dir::open(&inodes, inode),
            Err(Error::NotADirectory)
        ));
        assert!(inodes.is_empty());
    }
}
