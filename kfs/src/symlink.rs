//! # 符号链接层
//!
//! 符号链接的内容就是目标路径本身，不含结尾的 \0。
//! 跟随时最多经过 [`MAX_SYMLINK_DEPTH`] 个链接，以此截断链接环。

use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec;

use log::warn;
use vfs::{Error, Result};

use crate::layout::InodeType;
use crate::{FileSystem, Inode, MAX_SYMLINK_DEPTH};

impl FileSystem {
    /// 在 `path` 处创建指向 `target` 的符号链接，调用者须处于事务中。
    ///
    /// 目标不必存在。目标写入失败时名字不会出现。
    pub fn symlink(self: &Arc<Self>, target: &str, path: &str, cwd: &Inode) -> Result<()> {
        self.create_with(path, cwd, InodeType::SymLink, 0, 0, |guard| {
            if guard.write_at(0, target.as_bytes())? != target.len() {
                return Err(Error::NoFreeBlock);
            }
            Ok(())
        })
        .map(drop)
    }

    /// 读出符号链接的目标
    pub fn readlink(&self, inode: &Inode) -> Result<String> {
        let mut guard = inode.lock();
        if guard.kind() != InodeType::SymLink {
            return Err(Error::InvalidArgument);
        }

        let mut target = vec![0; guard.size() as usize];
        let len = guard.read_at(0, &mut target)?;
        target.truncate(len);

        String::from_utf8(target).map_err(|_| Error::Corrupted)
    }

    /// 从 `inode` 出发反复跟随符号链接，返回第一个不是符号链接的 inode。
    ///
    /// 目标不存在时失败；经过的链接超过 [`MAX_SYMLINK_DEPTH`] 个时报告链接过多。
    pub fn follow(self: &Arc<Self>, mut inode: Inode, cwd: &Inode) -> Result<Inode> {
        let mut depth = 0;

        loop {
            if inode.lock().kind() != InodeType::SymLink {
                return Ok(inode);
            }
            if depth == MAX_SYMLINK_DEPTH {
                warn!("follow: more than {MAX_SYMLINK_DEPTH} links at inode {}", inode.inum());
                return Err(Error::TooManyLinks);
            }
            depth += 1;

            let target = self.readlink(&inode)?;
            inode = self.namei(&target, cwd)?;
        }
    }
}
