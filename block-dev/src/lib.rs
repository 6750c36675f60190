//! # 块设备接口
//!
//! 文件系统眼中的磁盘只是一串定长的块：按块号整块读、整块写。
//! 驱动只登记到块缓存，文件系统的其余部分从不直接碰它。

#![no_std]

/// 块设备驱动
///
/// `buf` 的长度恒为一块的大小，读写都必须整块完成；
/// I/O 错误由驱动自行处理，文件系统不做恢复。
pub trait BlockDevice: Send + Sync {
    fn read_block(&self, block_id: usize, buf: &mut [u8]);

    fn write_block(&self, block_id: usize, buf: &[u8]);

    /// 设备的总块数，驱动不知道时为空
    fn num_blocks(&self) -> Option<usize> {
        None
    }
}
