//! # 磁盘数据结构层
//!
//! kfs 的磁盘布局：
//! 引导块 | 超级块 | 日志区域 | 索引节点区域 | 空闲位图 | 数据块区域

mod super_block;
pub use super_block::SuperBlock;

mod bitmap;
pub use bitmap::Bitmap;

mod inode;
pub use inode::{BlockLocator, DOUBLE_INDIRECT, DiskInode, INDIRECT, IndirectBlock, InodeType};

/// 目录项，也属于磁盘文件系统数据结构
mod dir_entry;
pub use dir_entry::DirEntry;
