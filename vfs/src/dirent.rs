use alloc::string::String;

/// 目录下的一项，已剔除墓碑项
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    /// Inode number
    pub inode: u32,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum FileType {
    Directory,
    /// 字符设备，由主设备号索引驱动
    Device,
    SymLink,
    #[default]
    Regular,
}
