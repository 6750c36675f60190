//! # 目录层
//!
//! 目录是内容为一串 [`DirEntry`] 的 inode。在此之上实现名字空间的修改：
//! 创建、硬链接与删除。修改名字空间的操作都须在事务中调用。

use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;

use log::debug;
use vfs::{Error, Result};

use crate::layout::{DirEntry, InodeType};
use crate::{FileSystem, Inode, InodeGuard};

/* 目录项操作 */
impl InodeGuard<'_> {
    /// 查找名为 `name` 的目录项，返回它指向的 inode 与该项在目录内的偏移
    pub fn dir_lookup(&mut self, name: &[u8]) -> Result<(Inode, u32)> {
        self.expect_dir()?;

        let mut dir_entry = DirEntry::empty();
        for offset in self.entry_offsets() {
            self.read_entry(offset, &mut dir_entry)?;
            if !dir_entry.is_empty() && dir_entry.matches(name) {
                let inode = self.inode().fs().iget(dir_entry.inum());
                return Ok((inode, offset as u32));
            }
        }

        Err(Error::NotFound)
    }

    /// 添加目录项 `name -> inum`，优先复用墓碑
    pub fn dir_link(&mut self, name: &[u8], inum: u32) -> Result<()> {
        if name.is_empty() {
            return Err(Error::InvalidArgument);
        }
        match self.dir_lookup(name) {
            Ok(_) => return Err(Error::AlreadyExists),
            Err(Error::NotFound) => (),
            Err(err) => return Err(err),
        }

        let mut dir_entry = DirEntry::empty();
        let mut slot = self.size() as usize;
        for offset in self.entry_offsets() {
            self.read_entry(offset, &mut dir_entry)?;
            if dir_entry.is_empty() {
                slot = offset;
                break;
            }
        }

        self.write_entry(slot, &DirEntry::new(name, inum))?;
        debug!("dir {}: link {:?} -> {inum}", self.inum(), String::from_utf8_lossy(name));

        Ok(())
    }

    /// 把偏移 `offset` 处的目录项置为墓碑
    pub fn dir_unlink_at(&mut self, offset: u32) -> Result<()> {
        self.expect_dir()?;
        self.write_entry(offset as usize, &DirEntry::empty())
    }

    /// 除 "." 与 ".." 外没有其他目录项
    pub fn is_dir_empty(&mut self) -> Result<bool> {
        self.expect_dir()?;

        let mut dir_entry = DirEntry::empty();
        for offset in self.entry_offsets().skip(2) {
            self.read_entry(offset, &mut dir_entry)?;
            if !dir_entry.is_empty() {
                return Ok(false);
            }
        }

        Ok(true)
    }

    /// 列出所有有效的目录项
    pub fn dir_entries(&mut self) -> Result<Vec<vfs::DirEntry>> {
        self.expect_dir()?;

        let mut entries = Vec::new();
        let mut dir_entry = DirEntry::empty();
        for offset in self.entry_offsets() {
            self.read_entry(offset, &mut dir_entry)?;
            if !dir_entry.is_empty() {
                entries.push(vfs::DirEntry {
                    inode: dir_entry.inum(),
                    name: String::from_utf8_lossy(dir_entry.name()).into_owned(),
                });
            }
        }

        Ok(entries)
    }

    #[inline]
    fn expect_dir(&self) -> Result<()> {
        if self.is_dir() {
            Ok(())
        } else {
            Err(Error::NotADirectory)
        }
    }

    #[inline]
    fn entry_offsets(&self) -> impl Iterator<Item = usize> + use<> {
        (0..self.size() as usize).step_by(DirEntry::SIZE)
    }

    fn read_entry(&mut self, offset: usize, dir_entry: &mut DirEntry) -> Result<()> {
        if self.read_at(offset, dir_entry.as_bytes_mut())? != DirEntry::SIZE {
            return Err(Error::Corrupted);
        }
        Ok(())
    }

    fn write_entry(&mut self, offset: usize, dir_entry: &DirEntry) -> Result<()> {
        // 目录项不跨块，要么整项写入，要么一个字节也没写
        if self.write_at(offset, dir_entry.as_bytes())? != DirEntry::SIZE {
            return Err(Error::Corrupted);
        }
        Ok(())
    }
}

/* 名字空间操作 */
impl FileSystem {
    /// 在 `path` 处创建类型为 `kind` 的 inode，返回未加锁的句柄。
    ///
    /// 创建普通文件时，已存在的普通文件或设备文件被原样返回；
    /// 其余情况下名字已存在即失败。中途失败时已做的修改全部撤销。
    pub fn create(
        self: &Arc<Self>,
        path: &str,
        cwd: &Inode,
        kind: InodeType,
        major: u16,
        minor: u16,
    ) -> Result<Inode> {
        self.create_with(path, cwd, kind, major, minor, |_| Ok(()))
    }

    /// 同 [`FileSystem::create`]，但新 inode 先经 `init` 写好内容，再挂进目录
    pub(crate) fn create_with(
        self: &Arc<Self>,
        path: &str,
        cwd: &Inode,
        kind: InodeType,
        major: u16,
        minor: u16,
        init: impl FnOnce(&mut InodeGuard<'_>) -> Result<()>,
    ) -> Result<Inode> {
        let (dir, name) = self.namei_parent(path, cwd)?;
        let mut dir_guard = dir.lock();

        match dir_guard.dir_lookup(name) {
            Ok((inode, _)) => {
                drop(dir_guard);
                let existing = inode.lock().kind();
                return match (kind, existing) {
                    (InodeType::File, InodeType::File | InodeType::Device) => Ok(inode),
                    _ => Err(Error::AlreadyExists),
                };
            }
            Err(Error::NotFound) => (),
            Err(err) => return Err(err),
        }

        let inode = self.ialloc(kind)?;
        let mut guard = inode.lock();
        guard.set_device(major, minor);
        guard.set_nlink(1);
        guard.update();

        let attached = init(&mut guard).and_then(|()| attach(&mut dir_guard, &mut guard, name));
        if let Err(err) = attached {
            // 链接数归零，新 inode 随句柄析构被回收
            guard.set_nlink(0);
            guard.update();
            return Err(err);
        }

        drop(guard);
        Ok(inode)
    }

    /// 为 `old` 所指的非目录 inode 在 `new` 处添加一个名字
    pub fn link(self: &Arc<Self>, old: &str, new: &str, cwd: &Inode) -> Result<()> {
        let inode = self.namei(old, cwd)?;
        {
            let mut guard = inode.lock();
            if guard.is_dir() {
                return Err(Error::IsADirectory);
            }
            guard.inc_nlink();
            guard.update();
        }

        let linked = self.namei_parent(new, cwd).and_then(|(dir, name)| {
            if dir.dev() != inode.dev() {
                return Err(Error::CrossDevice);
            }
            dir.lock().dir_link(name, inode.inum())
        });

        if let Err(err) = linked {
            let mut guard = inode.lock();
            guard.dec_nlink();
            guard.update();
            return Err(err);
        }

        Ok(())
    }

    /// 删除 `path` 这个名字。非空目录、"." 与 ".." 不可删除。
    ///
    /// 链接数归零的 inode 在最后一个句柄析构时才被回收。
    pub fn unlink(self: &Arc<Self>, path: &str, cwd: &Inode) -> Result<()> {
        let (dir, name) = self.namei_parent(path, cwd)?;
        if name == b"." || name == b".." {
            return Err(Error::InvalidArgument);
        }

        let mut dir_guard = dir.lock();
        let (inode, offset) = dir_guard.dir_lookup(name)?;
        let mut guard = inode.lock();
        assert!(guard.nlink() >= 1, "unlink: inode {} has no links", inode.inum());

        if guard.is_dir() && !guard.is_dir_empty()? {
            return Err(Error::DirectoryNotEmpty);
        }

        dir_guard.dir_unlink_at(offset)?;
        if guard.is_dir() {
            // 子目录的 ".." 不再指向父目录
            dir_guard.dec_nlink();
            dir_guard.update();
        }
        drop(dir_guard);

        guard.dec_nlink();
        guard.update();
        debug!("unlink: inode {} nlink {}", inode.inum(), guard.nlink());

        Ok(())
    }
}

/// 把新 inode 挂到父目录下；新目录还要写入 "." 与 ".."。
///
/// "." 不计入自身的链接数，".." 计入父目录的链接数。
fn attach(dir_guard: &mut InodeGuard<'_>, guard: &mut InodeGuard<'_>, name: &[u8]) -> Result<()> {
    let inum = guard.inum();

    if guard.is_dir() {
        dir_guard.inc_nlink();
        dir_guard.update();

        let dots = guard
            .dir_link(b".", inum)
            .and_then(|()| guard.dir_link(b"..", dir_guard.inum()));
        if let Err(err) = dots {
            dir_guard.dec_nlink();
            dir_guard.update();
            return Err(err);
        }
    }

    if let Err(err) = dir_guard.dir_link(name, inum) {
        if guard.is_dir() {
            dir_guard.dec_nlink();
            dir_guard.update();
        }
        return Err(err);
    }

    Ok(())
}
