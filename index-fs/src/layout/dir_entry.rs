use crate::NAME_MAX;

/// 文件系统项的元信息
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DirEntry {
    inode_sector: u32,
    // 最后一字节留给 \0
    name: [u8; NAME_MAX + 1],
    in_use: bool,
}

impl DirEntry {
    /// 元信息大小恒为20字节
    pub const SIZE: usize = 4 + NAME_MAX + 1 + 1;

    /// 调用者须保证名字不超过 [`NAME_MAX`]
    #[inline]
    pub fn new(name: &str, inode_sector: u32) -> Self {
        let bytes = name.as_bytes();
        let mut name = [0; NAME_MAX + 1];
        name[..bytes.len()].copy_from_slice(bytes);

        Self {
            inode_sector,
            name,
            in_use: true,
        }
    }

    /// 名字不是合法 UTF-8 时视为空
    pub fn name(&self) -> &str {
        let len = self
            .name
            .iter()
            .position(|&c| c == 0)
            .unwrap_or(NAME_MAX);
        core::str::from_utf8(&self.name[..len]).unwrap_or_default()
    }

    #[inline]
    pub fn inode_sector(&self) -> u32 {
        self.inode_sector
    }

    #[inline]
    pub fn in_use(&self) -> bool {
        self.in_use
    }

    /// 腾出槽位
    #[inline]
    pub fn release(&mut self) {
        self.in_use = false;
    }

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut bytes = [0; Self::SIZE];
        bytes[..4].copy_from_slice(&self.inode_sector.to_le_bytes());
        bytes[4..4 + NAME_MAX + 1].copy_from_slice(&self.name);
        bytes[Self::SIZE - 1] = self.in_use as u8;
        bytes
    }

    pub fn from_bytes(bytes: &[u8; Self::SIZE]) -> Self {
        let mut sector = [0; 4];
        sector.copy_from_slice(&bytes[..4]);
        let mut name = [0; NAME_MAX + 1];
        name.copy_from_slice(&bytes[4..4 + NAME_MAX + 1]);

        Self {
            inode_sector: u32::from_le_bytes(sector),
            name,
            in_use: bytes[Self::SIZE - 1] != 0,
        }
    }
}
