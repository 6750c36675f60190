//! # 系统调用层
//!
//! [`Context`] 是调用者（进程）在文件系统眼中的全部状态：当前目录与描述符表。
//! 每个修改名字空间的调用都包在一个事务里，事务先于其中用到的句柄创建，
//! 因此句柄析构引发的回收也落在同一事务内。
//!
//! 底部的 `sys_*` 函数是面向系统调用分发的薄封装：成功返回非负值，失败返回 -1。

use alloc::sync::Arc;

use enumflags2::BitFlags;
use log::{debug, info};
use vfs::{Error, Result, Stat};

use crate::layout::InodeType;
use crate::{FdTable, File, FileSystem, Inode, MAXPATH, NDEV, OpenFlag};

/// 调用者的文件系统上下文
pub struct Context {
    fs: Arc<FileSystem>,
    /// 仅在析构时被取走
    cwd: Option<Inode>,
    files: FdTable,
}

impl Context {
    /// 以根目录为当前目录
    pub fn new(fs: &Arc<FileSystem>) -> Self {
        Self {
            fs: fs.clone(),
            cwd: Some(fs.root()),
            files: FdTable::new(),
        }
    }

    /// 复制出一个共享全部已打开文件的上下文
    pub fn fork(&self) -> Self {
        Self {
            fs: self.fs.clone(),
            cwd: self.cwd.clone(),
            files: self.files.clone(),
        }
    }

    #[inline]
    pub fn fs(&self) -> &Arc<FileSystem> {
        &self.fs
    }

    #[inline]
    pub fn cwd(&self) -> &Inode {
        self.cwd.as_ref().expect("context cwd taken outside drop")
    }

    #[inline]
    pub fn files(&self) -> &FdTable {
        &self.files
    }

    pub fn open(&mut self, path: &str, flags: BitFlags<OpenFlag>) -> Result<usize> {
        check_path(path)?;
        // 先确认有空槽，免得新建的文件无处安放
        if self.files.is_full() {
            return Err(Error::TooManyOpenFiles);
        }
        let fs = self.fs.clone();
        let _op = fs.begin_op();

        let inode = if flags.contains(OpenFlag::CREATE) {
            fs.create(path, self.cwd(), InodeType::File, 0, 0)?
        } else {
            fs.namei(path, self.cwd())?
        };
        let inode = if flags.contains(OpenFlag::NOFOLLOW) {
            inode
        } else {
            fs.follow(inode, self.cwd())?
        };

        let [readable, writable] = OpenFlag::access(flags);
        let major = {
            let mut guard = inode.lock();
            match guard.kind() {
                InodeType::Directory if writable => return Err(Error::IsADirectory),
                InodeType::Device => {
                    let (major, _) = guard.device();
                    if major as usize >= NDEV {
                        return Err(Error::BadDevice);
                    }
                    Some(major)
                }
                InodeType::File if flags.contains(OpenFlag::TRUNC) => {
                    guard.truncate()?;
                    None
                }
                _ => None,
            }
        };

        let file = Arc::new(File::new(inode, major, readable, writable));
        let fd = self.files.insert(file)?;
        debug!("open: {path:?} -> fd {fd}");

        Ok(fd)
    }

    pub fn mkdir(&mut self, path: &str) -> Result<()> {
        check_path(path)?;
        let _op = self.fs.begin_op();
        self.fs
            .create(path, self.cwd(), InodeType::Directory, 0, 0)
            .map(drop)
    }

    pub fn mknod(&mut self, path: &str, major: u16, minor: u16) -> Result<()> {
        check_path(path)?;
        let _op = self.fs.begin_op();
        self.fs
            .create(path, self.cwd(), InodeType::Device, major, minor)
            .map(drop)
    }

    pub fn link(&mut self, old: &str, new: &str) -> Result<()> {
        check_path(old)?;
        check_path(new)?;
        let _op = self.fs.begin_op();
        self.fs.link(old, new, self.cwd())
    }

    pub fn unlink(&mut self, path: &str) -> Result<()> {
        check_path(path)?;
        let _op = self.fs.begin_op();
        self.fs.unlink(path, self.cwd())
    }

    pub fn symlink(&mut self, target: &str, path: &str) -> Result<()> {
        check_path(target)?;
        check_path(path)?;
        let _op = self.fs.begin_op();
        self.fs.symlink(target, path, self.cwd())
    }

    pub fn chdir(&mut self, path: &str) -> Result<()> {
        check_path(path)?;
        let fs = self.fs.clone();
        let _op = fs.begin_op();

        let inode = fs.namei(path, self.cwd())?;
        if !inode.lock().is_dir() {
            return Err(Error::NotADirectory);
        }
        // 旧的当前目录在事务内释放
        self.cwd = Some(inode);

        Ok(())
    }

    pub fn read(&self, fd: usize, buf: &mut [u8]) -> Result<usize> {
        self.files.get(fd)?.read(buf)
    }

    pub fn write(&self, fd: usize, buf: &[u8]) -> Result<usize> {
        self.files.get(fd)?.write(buf)
    }

    pub fn close(&mut self, fd: usize) -> Result<()> {
        let fs = self.fs.clone();
        let _op = fs.begin_op();
        drop(self.files.remove(fd)?);
        Ok(())
    }

    /// 新描述符与 `fd` 共享同一个打开的文件
    pub fn dup(&mut self, fd: usize) -> Result<usize> {
        let file = self.files.get(fd)?;
        self.files.insert(file)
    }

    pub fn fstat(&self, fd: usize) -> Result<Stat> {
        Ok(self.files.get(fd)?.stat())
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        let fs = self.fs.clone();
        let _op = fs.begin_op();
        self.files.clear();
        self.cwd = None;
        info!("context on dev {} exited", fs.dev());
    }
}

#[inline]
fn check_path(path: &str) -> Result<()> {
    if path.len() >= MAXPATH {
        return Err(Error::NameTooLong);
    }
    Ok(())
}

/* 系统调用入口 */

#[inline]
fn status(result: Result<()>) -> isize {
    result.map_or_else(Error::errno, |()| 0)
}

#[inline]
fn count(result: Result<usize>) -> isize {
    result.map_or_else(Error::errno, |n| n as isize)
}

pub fn sys_open(ctx: &mut Context, path: &str, flags: u32) -> isize {
    let Ok(flags) = BitFlags::<OpenFlag>::from_bits(flags) else {
        return Error::InvalidArgument.errno();
    };
    count(ctx.open(path, flags))
}

pub fn sys_mkdir(ctx: &mut Context, path: &str) -> isize {
    status(ctx.mkdir(path))
}

pub fn sys_mknod(ctx: &mut Context, path: &str, major: u16, minor: u16) -> isize {
    status(ctx.mknod(path, major, minor))
}

pub fn sys_link(ctx: &mut Context, old: &str, new: &str) -> isize {
    status(ctx.link(old, new))
}

pub fn sys_unlink(ctx: &mut Context, path: &str) -> isize {
    status(ctx.unlink(path))
}

pub fn sys_symlink(ctx: &mut Context, target: &str, path: &str) -> isize {
    status(ctx.symlink(target, path))
}

pub fn sys_chdir(ctx: &mut Context, path: &str) -> isize {
    status(ctx.chdir(path))
}

pub fn sys_read(ctx: &Context, fd: usize, buf: &mut [u8]) -> isize {
    count(ctx.read(fd, buf))
}

pub fn sys_write(ctx: &Context, fd: usize, buf: &[u8]) -> isize {
    count(ctx.write(fd, buf))
}

pub fn sys_close(ctx: &mut Context, fd: usize) -> isize {
    status(ctx.close(fd))
}

pub fn sys_dup(ctx: &mut Context, fd: usize) -> isize {
    count(ctx.dup(fd))
}

pub fn sys_fstat(ctx: &Context, fd: usize, stat: &mut Stat) -> isize {
    status(ctx.fstat(fd).map(|st| *stat = st))
}
