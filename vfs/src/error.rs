use derive_more::Display;

pub type Result<T> = core::result::Result<T, Error>;

/// 可恢复的文件系统错误。
///
/// 磁盘结构被破坏、缓存被占满之类的不变量失效不在此列，
/// 它们会直接 panic。
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    #[display(fmt = "no such file or directory")]
    NotFound,
    #[display(fmt = "not a directory")]
    NotADirectory,
    #[display(fmt = "is a directory")]
    IsADirectory,
    /// 设备文件的主设备号越界或没有驱动
    #[display(fmt = "no such device")]
    BadDevice,
    #[display(fmt = "file exists")]
    AlreadyExists,
    #[display(fmt = "directory not empty")]
    DirectoryNotEmpty,
    /// 符号链接层数超过上限
    #[display(fmt = "too many levels of symbolic links")]
    TooManyLinks,
    #[display(fmt = "no free inode")]
    NoFreeInode,
    #[display(fmt = "no free data block")]
    NoFreeBlock,
    #[display(fmt = "too many open files")]
    TooManyOpenFiles,
    #[display(fmt = "file too large")]
    FileTooLarge,
    /// 偏移量越过文件末尾
    #[display(fmt = "offset out of range")]
    OutOfRange,
    #[display(fmt = "cross-device link")]
    CrossDevice,
    #[display(fmt = "invalid argument")]
    InvalidArgument,
    #[display(fmt = "file name too long")]
    NameTooLong,
    /// 文件描述符没有对应的读写权限
    #[display(fmt = "bad file descriptor")]
    PermissionDenied,
    /// 索引链上的块号不在数据区内，或超级块无效
    #[display(fmt = "corrupted file system structure")]
    Corrupted,
}

impl Error {
    /// 系统调用层统一以 -1 表示失败
    #[inline]
    pub const fn errno(self) -> isize {
        -1
    }
}
