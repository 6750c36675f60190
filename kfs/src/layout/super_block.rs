use crate::fs::INODES_PER_BLOCK;
use crate::{BLOCK_BITS, MAGIC};

/// 超级块，位于 1 号块：
/// - 提供文件系统合法性校验；
/// - 定位其它连续区域
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub struct SuperBlock {
    /// 魔数：用于校验文件系统合法性
    magic: u32,
    /// 文件系统占据块数
    pub size: u32,
    /// 数据块数
    pub nblocks: u32,
    /// inode 个数
    pub ninodes: u32,
    /// 日志块数
    pub nlog: u32,
    pub log_start: u32,
    pub inode_start: u32,
    pub bmap_start: u32,
}

impl SuperBlock {
    /// 超级块所在的块号
    pub const BLOCK_ID: u32 = 1;

    #[inline]
    pub fn new(
        size: u32,
        nblocks: u32,
        ninodes: u32,
        nlog: u32,
        log_start: u32,
        inode_start: u32,
        bmap_start: u32,
    ) -> Self {
        Self {
            magic: MAGIC,
            size,
            nblocks,
            ninodes,
            nlog,
            log_start,
            inode_start,
            bmap_start,
        }
    }

    /// 魔数正确，且各区域按 引导|超级块|日志|inode|位图|数据 的顺序互不重叠
    pub fn is_valid(&self) -> bool {
        self.magic == MAGIC
            && self.nblocks < self.size
            && self.log_start == Self::BLOCK_ID + 1
            && self
                .log_start
                .checked_add(self.nlog)
                .is_some_and(|log_end| log_end <= self.inode_start)
            && self.inode_start < self.bmap_start
            && (self.inode_start as usize + self.ninodes as usize / INODES_PER_BLOCK)
                < self.bmap_start as usize
            && self.bmap_start < self.data_start()
            && self.data_start() as usize >= self.bmap_start as usize + self.bitmap_blocks()
    }

    /// 数据区的起始块号
    #[inline]
    pub fn data_start(&self) -> u32 {
        self.size - self.nblocks
    }

    /// 位图所占块数：每一位对应整个卷上的一块
    #[inline]
    pub fn bitmap_blocks(&self) -> usize {
        (self.size as usize).div_ceil(BLOCK_BITS)
    }

    /// 块号是否落在数据区内
    #[inline]
    pub fn is_data_block(&self, block_id: u32) -> bool {
        (self.data_start()..self.size).contains(&block_id)
    }
}
