#![no_std]

extern crate alloc;

/* kfs 的整体架构，自上而下 */

// 系统调用层：以调用者上下文（当前目录、文件描述符表）执行路径操作
mod syscall;

// 文件描述符层：打开的文件与描述符表
mod file;

// 符号链接层：有界深度地解析符号链接
mod symlink;

// 目录层：目录项的查找、链接，以及路径解析
mod dir;
mod path;

// 索引节点层：inode 缓存与文件读写
mod inode;

// 磁盘块管理器层：格式化、挂载与块/inode的分配
mod fs;

// 事务边界：日志只以 begin/end 契约出现
mod journal;

// 磁盘数据结构层：表示磁盘文件系统的数据结构
mod layout;

// 块缓存层：内存上的磁盘块数据缓存
mod block_cache;

#[cfg(test)]
mod ramdisk;

pub use self::{
    block_cache::{BlockCache, Buf},
    file::{CharDevice, FdTable, File, OpenFlag},
    fs::{FileSystem, MkfsConfig},
    inode::{Inode, InodeGuard},
    journal::{Journal, Op, WriteThrough},
    layout::{BlockLocator, DirEntry, DiskInode, InodeType, SuperBlock},
    syscall::*,
};
pub use block_dev::BlockDevice;
pub use vfs::{Error, Result, Stat};

pub const MAGIC: u32 = 0x10203040;
pub const BLOCK_SIZE: usize = 512;
pub const BLOCK_BITS: usize = BLOCK_SIZE * 8;

/// 直接索引的个数
pub const NDIRECT: usize = 11;
/// 一个间接索引块可容纳的块号个数
pub const NINDIRECT: usize = BLOCK_SIZE / core::mem::size_of::<u32>();
/// 二级索引可编号的块数
pub const NDINDIRECT: usize = NINDIRECT * NINDIRECT;
/// 单个文件最多占用的数据块数
pub const MAX_FILE: usize = NDIRECT + NINDIRECT + NDINDIRECT;

/// 目录项内文件名的最大长度
pub const DIRSIZ: usize = 14;
/// 路径的最大长度
pub const MAXPATH: usize = 128;
/// 符号链接的最大解析深度
pub const MAX_SYMLINK_DEPTH: usize = 10;

/// 块缓存的默认容量
pub const NBUF: usize = 30;
/// 内存中同时存在的 inode 上限
pub const NINODE: usize = 50;
/// 每个上下文可打开的文件数
pub const NOFILE: usize = 16;
/// 主设备号上限
pub const NDEV: usize = 10;
/// 单个事务最多写入的块数
pub const MAX_OP_BLOCKS: usize = 10;

pub const ROOTDEV: u32 = 1;
/// 根目录的 inode 编号
pub const ROOTINO: u32 = 1;

type DataBlock = [u8; BLOCK_SIZE];
