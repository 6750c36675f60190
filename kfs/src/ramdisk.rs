//! 单元测试用的内存块设备，记录每一块被读写的次数

use alloc::vec;
use alloc::vec::Vec;

use block_dev::BlockDevice;
use spin::Mutex;

use crate::{DataBlock, BLOCK_SIZE};

pub struct RamDisk {
    inner: Mutex<RamDiskInner>,
}

struct RamDiskInner {
    blocks: Vec<DataBlock>,
    reads: Vec<usize>,
    writes: Vec<usize>,
}

impl RamDisk {
    pub fn new(blocks: usize) -> Self {
        Self {
            inner: Mutex::new(RamDiskInner {
                blocks: vec![[0; BLOCK_SIZE]; blocks],
                reads: vec![0; blocks],
                writes: vec![0; blocks],
            }),
        }
    }

    pub fn reads(&self, block_id: usize) -> usize {
        self.inner.lock().reads[block_id]
    }

    pub fn writes(&self, block_id: usize) -> usize {
        self.inner.lock().writes[block_id]
    }
}

impl BlockDevice for RamDisk {
    fn read_block(&self, block_id: usize, buf: &mut [u8]) {
        let mut inner = self.inner.lock();
        inner.reads[block_id] += 1;
        buf.copy_from_slice(&inner.blocks[block_id]);
    }

    fn write_block(&self, block_id: usize, buf: &[u8]) {
        let mut inner = self.inner.lock();
        inner.writes[block_id] += 1;
        inner.blocks[block_id].copy_from_slice(buf);
    }

    fn num_blocks(&self) -> Option<usize> {
        Some(self.inner.lock().blocks.len())
    }
}
