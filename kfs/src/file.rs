//! # 文件描述符层
//!
//! [`File`] 是一次打开的结果：所指的 inode、读写权限与当前偏移。
//! 同一个 `File` 可被多个描述符共享（`dup`），它们共用偏移。

use alloc::sync::Arc;
use core::fmt;

use enumflags2::{BitFlags, bitflags};
use spin::Mutex;
use vfs::{Error, Result, Stat};

use crate::{BLOCK_SIZE, Inode, MAX_OP_BLOCKS, NOFILE};

/// 字符设备驱动，按主设备号登记到文件系统
pub trait CharDevice: Send + Sync {
    fn read(&self, buf: &mut [u8]) -> Result<usize>;

    fn write(&self, buf: &[u8]) -> Result<usize>;
}

#[rustfmt::skip]
#[allow(clippy::upper_case_acronyms)]
#[bitflags]
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenFlag {
    /// 只写
    WRONLY   = 0b0000_0000_0001,
    /// 读写兼备
    RDWR     = 0b0000_0000_0010,
    /// 不跟随符号链接，打开链接本身
    NOFOLLOW = 0b0000_0000_0100,
    /// 文件不存在则创建
    CREATE   = 0b0010_0000_0000,
    /// 先清空文件，再交给用户
    TRUNC    = 0b0100_0000_0000,
}

impl OpenFlag {
    // enumflags2拒绝值为0的标志
    /// 只读
    pub const RDONLY: u32 = 0b0000_0000_0000;

    #[inline]
    pub fn read_only() -> BitFlags<OpenFlag> {
        BitFlags::from_bits_truncate(Self::RDONLY)
    }

    /// 由打开标志得出 `[可读, 可写]`
    pub fn access(flags: BitFlags<OpenFlag>) -> [bool; 2] {
        if flags.contains(OpenFlag::WRONLY) {
            [false, true]
        } else if flags.contains(OpenFlag::RDWR) {
            [true, true]
        } else {
            [true, false]
        }
    }
}

/// 打开的文件
pub struct File {
    inode: Inode,
    /// 设备文件的主设备号
    major: Option<u16>,
    readable: bool,
    writable: bool,
    offset: Mutex<usize>,
}

impl File {
    pub(crate) fn new(inode: Inode, major: Option<u16>, readable: bool, writable: bool) -> Self {
        Self {
            inode,
            major,
            readable,
            writable,
            offset: Mutex::new(0),
        }
    }

    #[inline]
    pub fn inode(&self) -> &Inode {
        &self.inode
    }

    #[inline]
    pub fn readable(&self) -> bool {
        self.readable
    }

    #[inline]
    pub fn writable(&self) -> bool {
        self.writable
    }

    #[inline]
    pub fn offset(&self) -> usize {
        *self.offset.lock()
    }

    /// 从当前偏移处读，偏移随之前进；设备文件交给驱动
    pub fn read(&self, buf: &mut [u8]) -> Result<usize> {
        if !self.readable {
            return Err(Error::PermissionDenied);
        }
        if let Some(major) = self.major {
            return self.inode.fs().device(major)?.read(buf);
        }

        let mut offset = self.offset.lock();
        let read_size = match self.inode.lock().read_at(*offset, buf) {
            // 文件可能已被他人截短
            Err(Error::OutOfRange) => 0,
            result => result?,
        };
        *offset += read_size;

        Ok(read_size)
    }

    /// 在当前偏移处写，偏移随之前进。
    ///
    /// 大块写入被拆成多个事务，每个事务写入的块数不超过日志的承受能力。
    pub fn write(&self, buf: &[u8]) -> Result<usize> {
        if !self.writable {
            return Err(Error::PermissionDenied);
        }
        if let Some(major) = self.major {
            return self.inode.fs().device(major)?.write(buf);
        }

        // inode、间接块、两个位图块，再加上可能跨越边界的数据块
        const MAX_CHUNK: usize = (MAX_OP_BLOCKS - 1 - 1 - 2) / 2 * BLOCK_SIZE;

        let fs = self.inode.fs();
        let mut offset = self.offset.lock();
        let mut written_size = 0;
        while written_size < buf.len() {
            let chunk = &buf[written_size..buf.len().min(written_size + MAX_CHUNK)];

            let _op = fs.begin_op();
            let result = self.inode.lock().write_at(*offset, chunk);
            let chunk_written = match result {
                Ok(n) => n,
                Err(err) if written_size == 0 => return Err(err),
                Err(_) => break,
            };

            *offset += chunk_written;
            written_size += chunk_written;
            if chunk_written < chunk.len() {
                break;
            }
        }

        Ok(written_size)
    }

    pub fn stat(&self) -> Stat {
        self.inode.lock().stat()
    }
}

impl fmt::Debug for File {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("File")
            .field("inode", &self.inode)
            .field("major", &self.major)
            .field("readable", &self.readable)
            .field("writable", &self.writable)
            .field("offset", &self.offset())
            .finish()
    }
}

/// 描述符表，至多 [`NOFILE`] 个槽位，总是占用编号最小的空槽
#[derive(Debug, Default, Clone)]
pub struct FdTable([Option<Arc<File>>; NOFILE]);

impl FdTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// 插入新文件至空槽位，并返回槽位的索引
    pub fn insert(&mut self, file: Arc<File>) -> Result<usize> {
        let fd = self
            .0
            .iter()
            .position(Option::is_none)
            .ok_or(Error::TooManyOpenFiles)?;
        self.0[fd] = Some(file);
        Ok(fd)
    }

    pub fn get(&self, fd: usize) -> Result<Arc<File>> {
        self.0
            .get(fd)
            .and_then(Option::clone)
            .ok_or(Error::InvalidArgument)
    }

    pub fn remove(&mut self, fd: usize) -> Result<Arc<File>> {
        self.0
            .get_mut(fd)
            .and_then(Option::take)
            .ok_or(Error::InvalidArgument)
    }

    /// 已打开的描述符数
    pub fn len(&self) -> usize {
        self.0.iter().flatten().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        self.0.iter().all(Option::is_some)
    }

    pub fn clear(&mut self) {
        self.0.iter_mut().for_each(|slot| *slot = None);
    }
}
