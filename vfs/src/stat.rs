use crate::FileType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(C)]
pub struct Stat {
    /// 所在设备号
    pub dev: u32,
    /// Inode number
    pub ino: u32,
    pub kind: FileType,
    /// 硬链接个数
    pub nlink: u16,
    /// File size
    pub size: u64,
}
