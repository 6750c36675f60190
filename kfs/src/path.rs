//! 路径解析
//!
//! 以 '/' 开头的路径从根目录出发，否则从调用者的当前目录出发；
//! 连续的 '/' 视为一个。逐级查找时只锁住当前所在的目录，
//! 进入下一级之前先释放，因此 ".." 不会与父目录的锁形成环。

use alloc::sync::Arc;

use vfs::{Error, Result};

use crate::{FileSystem, Inode};

impl FileSystem {
    /// 解析 `path`，返回它最终指向的 inode。不跟随符号链接。
    pub fn namei(self: &Arc<Self>, path: &str, cwd: &Inode) -> Result<Inode> {
        self.namex(path, cwd, false).map(|(inode, _)| inode)
    }

    /// 解析 `path` 的父目录，同时返回最后一个分量（未解析）。
    ///
    /// 根目录没有父目录。
    pub fn namei_parent<'p>(self: &Arc<Self>, path: &'p str, cwd: &Inode) -> Result<(Inode, &'p [u8])> {
        let (dir, name) = self.namex(path, cwd, true)?;
        if name.is_empty() {
            return Err(Error::NotFound);
        }
        Ok((dir, name))
    }

    fn namex<'p>(self: &Arc<Self>, path: &'p str, cwd: &Inode, parent: bool) -> Result<(Inode, &'p [u8])> {
        if path.is_empty() {
            return Err(Error::NotFound);
        }

        let mut inode = if path.starts_with('/') {
            self.root()
        } else {
            cwd.clone()
        };

        let mut components = components(path).peekable();
        let mut last: &[u8] = &[];
        while let Some(name) = components.next() {
            let next = {
                let mut guard = inode.lock();
                if !guard.is_dir() {
                    return Err(Error::NotADirectory);
                }
                if parent && components.peek().is_none() {
                    last = name;
                    break;
                }
                guard.dir_lookup(name)?.0
            };
            inode = next;
        }

        Ok((inode, last))
    }
}

/// 路径分量，跳过空分量
fn components(path: &str) -> impl Iterator<Item = &[u8]> {
    path.split('/')
        .filter(|component| !component.is_empty())
        .map(str::as_bytes)
}
