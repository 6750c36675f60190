//! # 索引节点层
//!
//! 内存中的 inode 缓存保证同一 `(设备, inode 编号)` 至多一份句柄数据。
//!
//! - [`Inode`] 是带引用计数的句柄：克隆即增加引用，析构即释放引用；
//!   最后一个引用消失且链接数为零时，inode 及其全部数据块被回收。
//!   释放可能写盘，因此句柄应在事务内析构。
//! - [`InodeGuard`] 是加锁后的视图，读写元数据与内容都要经过它。
//!   引用计数决定 inode 是否存在，锁决定谁能访问其内容，二者互不相干。

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt;

use log::{debug, warn};
use spin::{Mutex, MutexGuard};
use vfs::{Error, Result, Stat};

use crate::layout::{BlockLocator, DiskInode, InodeType};
use crate::layout::{DOUBLE_INDIRECT, INDIRECT, IndirectBlock};
use crate::{BLOCK_SIZE, DataBlock, FileSystem, MAX_FILE, NDIRECT};

/// inode 缓存，由所属的 [`FileSystem`] 独占
pub(crate) struct InodeCache {
    meta: Mutex<Vec<InodeMeta>>,
    data: Vec<Mutex<InodeData>>,
}

#[derive(Debug, Default, Clone, Copy)]
struct InodeMeta {
    inum: u32,
    refs: usize,
}

#[derive(Debug, Default)]
pub(crate) struct InodeData {
    /// 是否已从磁盘读入
    valid: bool,
    dinode: DiskInode,
}

/// 引用计数的 inode 句柄
pub struct Inode {
    fs: Arc<FileSystem>,
    inum: u32,
    /// 在缓存中的槽位
    index: usize,
}

/// 加锁的 inode
pub struct InodeGuard<'a> {
    inode: &'a Inode,
    data: MutexGuard<'a, InodeData>,
}

impl InodeCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            meta: Mutex::new(alloc::vec![InodeMeta::default(); capacity]),
            data: (0..capacity)
                .map(|_| Mutex::new(InodeData::default()))
                .collect(),
        }
    }
}

impl FileSystem {
    /// 返回编号为 `inum` 的 inode 句柄，不读盘也不加锁
    ///
    /// # Panics
    ///
    /// 缓存中所有槽位都被引用时 panic。
    pub fn iget(self: &Arc<Self>, inum: u32) -> Inode {
        let mut meta = self.icache.meta.lock();

        let mut empty = None;
        for (index, slot) in meta.iter_mut().enumerate() {
            if slot.refs > 0 && slot.inum == inum {
                slot.refs += 1;
                return Inode {
                    fs: self.clone(),
                    inum,
                    index,
                };
            }
            if empty.is_none() && slot.refs == 0 {
                empty = Some(index);
            }
        }

        let index = empty.unwrap_or_else(|| panic!("iget: all {} inodes in use", meta.len()));
        meta[index] = InodeMeta { inum, refs: 1 };
        // 闲置槽位的锁无人持有
        self.icache.data[index].lock().valid = false;

        Inode {
            fs: self.clone(),
            inum,
            index,
        }
    }

    fn idup(&self, inode: &Inode) {
        self.icache.meta.lock()[inode.index].refs += 1;
    }

    fn iput(&self, inode: &Inode) {
        let mut meta = self.icache.meta.lock();
        let index = inode.index;

        if meta[index].refs == 1 {
            // 引用计数为 1，没有别人能持有这把锁
            let data = self.icache.data[index].lock();
            if data.valid && data.dinode.nlink == 0 {
                // 没有目录项引用它，也没有其他句柄：回收。
                // 截断期间引用计数保持为 1，槽位不会被挪作他用。
                drop(meta);

                let mut guard = InodeGuard { inode, data };
                if let Err(err) = guard.truncate() {
                    warn!("iput: inode {}: {err}", inode.inum);
                }
                guard.data.dinode.set_kind(InodeType::Free);
                guard.update();
                guard.data.valid = false;
                drop(guard);
                debug!("iput: freed inode {}", inode.inum);

                meta = self.icache.meta.lock();
            }
        }

        meta[index].refs -= 1;
    }
}

impl Inode {
    #[inline]
    pub fn inum(&self) -> u32 {
        self.inum
    }

    #[inline]
    pub fn dev(&self) -> u32 {
        self.fs.dev()
    }

    #[inline]
    pub fn fs(&self) -> &Arc<FileSystem> {
        &self.fs
    }

    /// 加锁，首次访问时从磁盘读入
    ///
    /// # Panics
    ///
    /// 锁住一个空闲的 inode 说明有目录项指向了已回收的 inode。
    pub fn lock(&self) -> InodeGuard<'_> {
        let mut data = self.fs.icache.data[self.index].lock();

        if !data.valid {
            let (block_id, offset) = self.fs.inode_pos(self.inum);
            data.dinode = self
                .fs
                .cache()
                .bread(self.dev(), block_id)
                .map(offset, |dinode: &DiskInode| *dinode);
            data.valid = true;

            match data.dinode.kind() {
                None | Some(InodeType::Free) => panic!("ilock: inode {} has no type", self.inum),
                Some(_) => (),
            }
        }

        InodeGuard { inode: self, data }
    }
}

impl Clone for Inode {
    fn clone(&self) -> Self {
        self.fs.idup(self);
        Self {
            fs: self.fs.clone(),
            inum: self.inum,
            index: self.index,
        }
    }
}

impl Drop for Inode {
    fn drop(&mut self) {
        self.fs.iput(self);
    }
}

impl fmt::Debug for Inode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Inode")
            .field("dev", &self.dev())
            .field("inum", &self.inum)
            .finish()
    }
}

/* 元数据 */
impl InodeGuard<'_> {
    #[inline]
    pub fn inode(&self) -> &Inode {
        self.inode
    }

    #[inline]
    pub fn inum(&self) -> u32 {
        self.inode.inum
    }

    #[inline]
    pub fn kind(&self) -> InodeType {
        self.data.dinode.kind().unwrap_or_default()
    }

    #[inline]
    pub fn is_dir(&self) -> bool {
        self.kind() == InodeType::Directory
    }

    #[inline]
    pub fn size(&self) -> u32 {
        self.data.dinode.size
    }

    #[inline]
    pub fn nlink(&self) -> u16 {
        self.data.dinode.nlink
    }

    #[inline]
    pub fn set_nlink(&mut self, nlink: u16) {
        self.data.dinode.nlink = nlink;
    }

    #[inline]
    pub fn inc_nlink(&mut self) {
        self.data.dinode.nlink += 1;
    }

    /// # Panics
    ///
    /// 链接数本就为零。
    pub fn dec_nlink(&mut self) {
        let nlink = &mut self.data.dinode.nlink;
        assert!(*nlink >= 1, "inode {}: nlink < 1", self.inode.inum);
        *nlink -= 1;
    }

    #[inline]
    pub fn device(&self) -> (u16, u16) {
        (self.data.dinode.major, self.data.dinode.minor)
    }

    #[inline]
    pub fn set_device(&mut self, major: u16, minor: u16) {
        self.data.dinode.major = major;
        self.data.dinode.minor = minor;
    }

    /// 磁盘 inode 的拷贝
    #[inline]
    pub fn disk_inode(&self) -> DiskInode {
        self.data.dinode
    }

    pub fn stat(&self) -> Stat {
        Stat {
            dev: self.inode.dev(),
            ino: self.inode.inum,
            kind: self.kind().into(),
            nlink: self.nlink(),
            size: self.size() as u64,
        }
    }

    /// 把内存中的元数据写回所在的块，调用者须处于事务中
    pub fn update(&mut self) {
        let fs = &self.inode.fs;
        let (block_id, offset) = fs.inode_pos(self.inode.inum);

        let mut buf = fs.cache().bread(fs.dev(), block_id);
        buf.map_mut(offset, |dinode: &mut DiskInode| *dinode = self.data.dinode);
        fs.journal().write(&mut buf);
    }
}

/* 内容 */
impl InodeGuard<'_> {
    /// 从 `offset` 处读出数据填充 `buf`，返回读到的字节数，在文件末尾截止
    pub fn read_at(&mut self, offset: usize, buf: &mut [u8]) -> Result<usize> {
        let size = self.size() as usize;
        if offset > size {
            return Err(Error::OutOfRange);
        }
        let end = offset
            .checked_add(buf.len())
            .ok_or(Error::OutOfRange)?
            .min(size);

        let inode = self.inode;
        let fs = &inode.fs;
        let mut start = offset;
        // 已读取多少字节
        let mut read_size = 0;
        while start < end {
            let block_index = start / BLOCK_SIZE;
            // 当前块的末地址(字节)
            let current_block_end = ((block_index + 1) * BLOCK_SIZE).min(end);
            let block_read_size = current_block_end - start;
            let dest = &mut buf[read_size..read_size + block_read_size];
            let in_block = start % BLOCK_SIZE;

            match self.bmap(block_index, false)? {
                Some(block_id) => fs.cache().bread(fs.dev(), block_id).map(
                    0,
                    |data_block: &DataBlock| {
                        dest.copy_from_slice(&data_block[in_block..in_block + block_read_size])
                    },
                ),
                // 未分配的块读作零
                None => dest.fill(0),
            }

            read_size += block_read_size;
            start = current_block_end;
        }

        Ok(read_size)
    }

    /// 把 `buf` 写到 `offset` 处，按需分配数据块，越过文件末尾时扩大文件。
    ///
    /// 写到一半空间耗尽时返回已写入的字节数；一个字节也没写入则返回错误。
    /// 调用者须处于事务中。
    pub fn write_at(&mut self, offset: usize, buf: &[u8]) -> Result<usize> {
        let size = self.size() as usize;
        if offset > size {
            return Err(Error::OutOfRange);
        }
        let end = offset
            .checked_add(buf.len())
            .filter(|&end| end <= MAX_FILE * BLOCK_SIZE)
            .ok_or(Error::FileTooLarge)?;

        let inode = self.inode;
        let fs = &inode.fs;
        let mut start = offset;
        let mut written_size = 0;
        let mut failure = None;
        while start < end {
            let block_index = start / BLOCK_SIZE;
            let current_block_end = ((block_index + 1) * BLOCK_SIZE).min(end);
            let block_write_size = current_block_end - start;
            let in_block = start % BLOCK_SIZE;

            let block_id = match self
                .bmap(block_index, true)
                .and_then(|block_id| block_id.ok_or(Error::Corrupted))
            {
                Ok(block_id) => block_id,
                Err(err) => {
                    failure = Some(err);
                    break;
                }
            };

            let mut data_block = fs.cache().bread(fs.dev(), block_id);
            data_block.as_bytes_mut()[in_block..in_block + block_write_size]
                .copy_from_slice(&buf[written_size..written_size + block_write_size]);
            fs.journal().write(&mut data_block);

            written_size += block_write_size;
            start = current_block_end;
        }

        if offset + written_size > size {
            self.data.dinode.size = (offset + written_size) as u32;
        }
        // 即便没有扩大文件，索引表也可能因分配而改变
        self.update();

        match failure {
            Some(err) if written_size == 0 => Err(err),
            Some(err) => {
                warn!(
                    "inode {}: short write {written_size}/{}: {err}",
                    self.inode.inum,
                    buf.len()
                );
                Ok(written_size)
            }
            None => Ok(written_size),
        }
    }

    /// 释放索引链上的全部块，文件大小归零。调用者须处于事务中。
    ///
    /// 链上不在数据区内的块号不会被释放，最终报告为损坏。
    pub fn truncate(&mut self) -> Result<()> {
        let inode = self.inode;
        let fs = &inode.fs;
        let addrs = &mut self.data.dinode.addrs;
        let mut intact = true;

        /******************** 直接索引 ********************/
        for addr in addrs[..NDIRECT].iter_mut().filter(|addr| **addr != 0) {
            if fs.super_block().is_data_block(*addr) {
                fs.bfree(*addr);
            } else {
                intact = false;
            }
            *addr = 0;
        }
        /******************** END ********************/

        /******************** 间接索引 ********************/
        for (root, depth) in [(INDIRECT, 1), (DOUBLE_INDIRECT, 2)] {
            if addrs[root] != 0 {
                intact &= free_table(fs, addrs[root], depth);
                addrs[root] = 0;
            }
        }
        /******************** END ********************/

        self.data.dinode.size = 0;
        self.update();

        if intact {
            Ok(())
        } else {
            warn!("inode {}: corrupted block chain while truncating", inode.inum);
            Err(Error::Corrupted)
        }
    }

    /// 定位文件内第 `block_index` 个块的块号。
    ///
    /// 沿 [`BlockLocator`] 给出的索引链逐级查找，遇到 0 时：
    /// `alloc` 为真则分配新块并登记，否则返回空。
    fn bmap(&mut self, block_index: usize, alloc: bool) -> Result<Option<u32>> {
        let locator = BlockLocator::new(block_index).ok_or(Error::FileTooLarge)?;
        let inode = self.inode;
        let fs = &inode.fs;

        let root = &mut self.data.dinode.addrs[locator.root()];
        let mut block_id = match *root {
            0 if !alloc => return Ok(None),
            0 => {
                *root = fs.balloc()?;
                *root
            }
            block_id => check_block(fs, block_id)?,
        };

        for index in locator.path() {
            match table_entry(fs, block_id, index, alloc)? {
                Some(entry) => block_id = entry,
                None => return Ok(None),
            }
        }

        Ok(Some(block_id))
    }
}

/// 读取间接索引块 `table` 的第 `index` 项，必要时分配
fn table_entry(fs: &FileSystem, table: u32, index: usize, alloc: bool) -> Result<Option<u32>> {
    let mut buf = fs.cache().bread(fs.dev(), table);
    let entry = buf.map(0, |indirect: &IndirectBlock| indirect[index]);

    match entry {
        0 if !alloc => Ok(None),
        0 => {
            let block_id = fs.balloc()?;
            buf.map_mut(0, |indirect: &mut IndirectBlock| indirect[index] = block_id);
            fs.journal().write(&mut buf);
            Ok(Some(block_id))
        }
        entry => check_block(fs, entry).map(Some),
    }
}

/// 释放 `depth` 级间接索引块及其下的全部块，返回链上是否一切正常
fn free_table(fs: &FileSystem, table: u32, depth: usize) -> bool {
    if !fs.super_block().is_data_block(table) {
        return false;
    }

    // 先拷出块号，释放期间不占用该缓冲区
    let entries = fs
        .cache()
        .bread(fs.dev(), table)
        .map(0, |indirect: &IndirectBlock| *indirect);

    let mut intact = true;
    for &entry in entries.iter().filter(|&&entry| entry != 0) {
        if depth > 1 {
            intact &= free_table(fs, entry, depth - 1);
        } else if fs.super_block().is_data_block(entry) {
            fs.bfree(entry);
        } else {
            intact = false;
        }
    }
    fs.bfree(table);

    intact
}

#[inline]
fn check_block(fs: &FileSystem, block_id: u32) -> Result<u32> {
    if fs.super_block().is_data_block(block_id) {
        Ok(block_id)
    } else {
        warn!("bmap: block {block_id} outside data area");
        Err(Error::Corrupted)
    }
}
