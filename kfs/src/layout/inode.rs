//! 磁盘上的 inode 与它的索引表
//!
//! 索引表共 `NDIRECT + 2` 项：
//! - 前 NDIRECT 项：直接索引，每个编号都指向一个**数据块**
//! - 一级间接索引：整个块连续存储**块编号**，每个编号都指向一个数据块
//! - 二级间接索引：整个块连续存储**块编号**，每个编号都指向一个一级索引块
//!
//! 编号为 0 表示尚未分配，首次写入时才分配。

use crate::{MAX_FILE, NDIRECT, NINDIRECT};

/// 一级间接索引在索引表中的位置
pub const INDIRECT: usize = NDIRECT;
/// 二级间接索引在索引表中的位置
pub const DOUBLE_INDIRECT: usize = NDIRECT + 1;

/// 间接索引块
pub type IndirectBlock = [u32; NINDIRECT];

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum InodeType {
    /// 空闲的 inode
    #[default]
    Free = 0,
    Directory = 1,
    File = 2,
    Device = 3,
    SymLink = 4,
}

impl InodeType {
    #[inline]
    pub fn from_raw(raw: u16) -> Option<Self> {
        Some(match raw {
            0 => Self::Free,
            1 => Self::Directory,
            2 => Self::File,
            3 => Self::Device,
            4 => Self::SymLink,
            _ => return None,
        })
    }
}

impl From<InodeType> for vfs::FileType {
    fn from(kind: InodeType) -> Self {
        match kind {
            InodeType::Directory => Self::Directory,
            InodeType::Device => Self::Device,
            InodeType::SymLink => Self::SymLink,
            InodeType::File | InodeType::Free => Self::Regular,
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub struct DiskInode {
    /// 类型，见 [`InodeType`]；以原始值存放，避免从磁盘读出非法的枚举值
    kind: u16,
    /// 主设备号，仅设备文件有意义
    pub major: u16,
    /// 次设备号，仅设备文件有意义
    pub minor: u16,
    /// 硬链接个数，即引用它的目录项数
    pub nlink: u16,
    // 不用usize是为了严控布局
    pub size: u32,
    pub addrs: [u32; NDIRECT + 2],
}

impl DiskInode {
    #[inline]
    pub fn init(&mut self, kind: InodeType) {
        *self = Self {
            kind: kind as u16,
            ..Default::default()
        }
    }

    /// 无法识别的类型视为损坏
    #[inline]
    pub fn kind(&self) -> Option<InodeType> {
        InodeType::from_raw(self.kind)
    }

    #[inline]
    pub fn set_kind(&mut self, kind: InodeType) {
        self.kind = kind as u16;
    }

    #[inline]
    pub fn is_free(&self) -> bool {
        self.kind == InodeType::Free as u16
    }
}

/// 文件内逻辑块在索引链上的位置
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockLocator {
    /// 直接索引表内的下标
    Direct(usize),
    /// 一级索引块内的下标
    Indirect(usize),
    /// 二级索引块内的下标，以及所指一级索引块内的下标
    DoubleIndirect(usize, usize),
}

impl BlockLocator {
    /// 把文件内第 `block_index` 个块翻译为索引链上的位置，超出文件上限时为空
    pub fn new(block_index: usize) -> Option<Self> {
        if block_index < NDIRECT {
            return Some(Self::Direct(block_index));
        }

        // 剔去直接索引的部分
        let index = block_index - NDIRECT;
        if index < NINDIRECT {
            return Some(Self::Indirect(index));
        }

        // 剔去使用了一级索引的部分
        let index = index - NINDIRECT;
        (block_index < MAX_FILE)
            .then_some(Self::DoubleIndirect(index / NINDIRECT, index % NINDIRECT))
    }

    /// 在 inode 索引表中的根位置
    #[inline]
    pub fn root(&self) -> usize {
        match *self {
            Self::Direct(index) => index,
            Self::Indirect(_) => INDIRECT,
            Self::DoubleIndirect(..) => DOUBLE_INDIRECT,
        }
    }

    /// 从根出发，依次经过的间接索引块内的下标
    pub fn path(self) -> impl Iterator<Item = usize> {
        let (first, second) = match self {
            Self::Direct(_) => (None, None),
            Self::Indirect(index) => (Some(index), None),
            Self::DoubleIndirect(outer, inner) => (Some(outer), Some(inner)),
        };
        first.into_iter().chain(second)
    }
}

#[cfg(test)]
mod tests {
    use alloc::vec::Vec;

    use super::*;

    #[test]
    fn locator_boundaries() {
        assert_eq!(BlockLocator::new(0), Some(BlockLocator::Direct(0)));
        assert_eq!(
            BlockLocator::new(NDIRECT - 1),
            Some(BlockLocator::Direct(NDIRECT - 1))
        );
        assert_eq!(
            BlockLocator::new(NDIRECT),
            Some(BlockLocator::Indirect(0))
        );
        assert_eq!(
            BlockLocator::new(NDIRECT + NINDIRECT - 1),
            Some(BlockLocator::Indirect(NINDIRECT - 1))
        );
        assert_eq!(
            BlockLocator::new(NDIRECT + NINDIRECT),
            Some(BlockLocator::DoubleIndirect(0, 0))
        );
        assert_eq!(
            BlockLocator::new(NDIRECT + NINDIRECT + NINDIRECT + 1),
            Some(BlockLocator::DoubleIndirect(1, 1))
        );
        assert_eq!(
            BlockLocator::new(MAX_FILE - 1),
            Some(BlockLocator::DoubleIndirect(NINDIRECT - 1, NINDIRECT - 1))
        );
        assert_eq!(BlockLocator::new(MAX_FILE), None);
    }

    #[test]
    fn locator_path() {
        let path: Vec<_> = BlockLocator::new(3).unwrap().path().collect();
        assert!(path.is_empty());

        let loc = BlockLocator::new(NDIRECT + NINDIRECT + 2 * NINDIRECT + 5).unwrap();
        assert_eq!(loc.root(), DOUBLE_INDIRECT);
        assert_eq!(loc.path().collect::<Vec<_>>(), [2, 5]);
    }

    #[test]
    fn max_file_size() {
        assert_eq!(MAX_FILE, 11 + 128 + 128 * 128);
    }
}
