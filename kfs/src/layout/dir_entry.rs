use core::{ptr, slice};

use crate::DIRSIZ;

/// 目录项：目录的内容就是一串连续的目录项。
///
/// inode 编号为 0 的项是墓碑，表示可复用的空槽位。
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub struct DirEntry {
    inum: u16,
    /// 不足 DIRSIZ 时以 \0 填充，恰好 DIRSIZ 时没有结尾的 \0
    name: [u8; DIRSIZ],
}

impl DirEntry {
    /// 元信息大小恒为16字节
    pub const SIZE: usize = 16;

    /// 名字超过 DIRSIZ 的部分被截断
    pub fn new(name: &[u8], inum: u32) -> Self {
        assert!(inum <= u16::MAX as u32, "inum {inum} too large for a dirent");

        let name = truncate(name);
        let mut buf = [0; DIRSIZ];
        buf[..name.len()].copy_from_slice(name);

        Self {
            inum: inum as u16,
            name: buf,
        }
    }

    /// 墓碑
    #[inline]
    pub fn empty() -> Self {
        Self::default()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.inum == 0
    }

    #[inline]
    pub fn inum(&self) -> u32 {
        self.inum as u32
    }

    pub fn name(&self) -> &[u8] {
        let len = self.name.iter().position(|&c| c == 0).unwrap_or(DIRSIZ);
        &self.name[..len]
    }

    /// 与给定的名字比较前 DIRSIZ 个字节
    #[inline]
    pub fn matches(&self, name: &[u8]) -> bool {
        self.name() == truncate(name)
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        unsafe { slice::from_raw_parts(ptr::from_ref(self).cast(), Self::SIZE) }
    }

    #[inline]
    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        unsafe { slice::from_raw_parts_mut(ptr::from_mut(self).cast(), Self::SIZE) }
    }
}

#[inline]
fn truncate(name: &[u8]) -> &[u8] {
    &name[..name.len().min(DIRSIZ)]
}
