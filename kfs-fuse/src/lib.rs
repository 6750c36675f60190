
use std::fs::File;
use std::io::{Read, Write};
use std::io::{Seek, SeekFrom};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use block_dev::BlockDevice;
use kfs::BLOCK_SIZE;

/// 以宿主机上的文件为磁盘镜像
pub struct BlockFile(pub Mutex<File>);

impl BlockDevice for BlockFile {
    fn read_block(&self, block_id: usize, buf: &mut [u8]) {
        let mut file = self.0.lock().unwrap();
        file.seek(SeekFrom::Start((block_id * BLOCK_SIZE) as u64))
            .expect("seeking error");
        file.read_exact(buf).expect("not a complete block!");
    }

    fn write_block(&self, block_id: usize, buf: &[u8]) {
        let mut file = self.0.lock().unwrap();
        file.seek(SeekFrom::Start((block_id * BLOCK_SIZE) as u64))
            .expect("seeking error");
        file.write_all(buf).expect("not a complete block!");
    }

    fn num_blocks(&self) -> Option<usize> {
        let file = self.0.lock().unwrap();
        let len = file.metadata().ok()?.len();
        Some(len as usize / BLOCK_SIZE)
    }
}

/// 内存中的磁盘，统计读写次数
pub struct MemDisk {
    blocks: Mutex<Vec<[u8; BLOCK_SIZE]>>,
    reads: AtomicUsize,
    writes: AtomicUsize,
}

impl MemDisk {
    pub fn new(num_blocks: usize) -> Self {
        Self {
            blocks: Mutex::new(vec![[0; BLOCK_SIZE]; num_blocks]),
            reads: AtomicUsize::new(0),
            writes: AtomicUsize::new(0),
        }
    }

    /// 设备读的总次数
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::Relaxed)
    }

    /// 设备写的总次数
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::Relaxed)
    }

    /// 绕过缓存直接查看某块的内容
    pub fn block(&self, block_id: usize) -> [u8; BLOCK_SIZE] {
        self.blocks.lock().unwrap()[block_id]
    }
}

impl BlockDevice for MemDisk {
    fn read_block(&self, block_id: usize, buf: &mut [u8]) {
        self.reads.fetch_add(1, Ordering::Relaxed);
        buf.copy_from_slice(&self.blocks.lock().unwrap()[block_id]);
    }

    fn write_block(&self, block_id: usize, buf: &[u8]) {
        self.writes.fetch_add(1, Ordering::Relaxed);
        self.blocks.lock().unwrap()[block_id].copy_from_slice(buf);
    }

    fn num_blocks(&self) -> Option<usize> {
        Some(self.blocks.lock().unwrap().len())
    }
}
