//! # 块缓存层
//!
//! 块设备读写速度一般慢于内存读写速度，因此我们在内存中开辟固定数量的缓冲区，
//! 把即将操作的块复制到内存中，提高对块设备的操作效率。
//!
//! - 同一时刻，一个 `(设备号, 块号)` 至多对应一个缓冲区；
//! - 被引用（引用计数大于0）的缓冲区不会被换出；
//! - 每次获取缓冲区都会刷新它的时间戳，换出时挑选时间戳最小的闲置缓冲区（LRU）。
//!
//! 获取到的 [`Buf`] 独占其缓冲区，直到它被释放；
//! 其他想要同一块的调用者会等在该缓冲区的锁上，而不会得到另一份拷贝。

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::mem;
use core::mem::ManuallyDrop;
use core::sync::atomic::{AtomicBool, Ordering};

use block_dev::BlockDevice;
use log::trace;
use spin::{Mutex, MutexGuard};

use crate::{DataBlock, BLOCK_SIZE, NBUF};

/// 固定容量的块缓存，由挂载在其上的所有文件系统共享
pub struct BlockCache {
    /// 已登记的块设备
    devices: Mutex<Vec<(u32, Arc<dyn BlockDevice>)>>,
    /// 保护所有缓冲区的元信息：所缓存的块、引用计数与时间戳
    ctrl: Mutex<BufLru>,
    /// 缓冲区本体，锁住的是块数据，I/O 期间也一直持有
    bufs: Vec<BufInner>,
}

struct BufLru {
    slots: Vec<BufCtrl>,
    /// 单调递增的时钟，每次获取缓冲区都会前进一格
    ticks: u64,
}

#[derive(Default)]
struct BufCtrl {
    /// 所缓存的 `(设备号, 块号)`，从未使用过的缓冲区为空
    key: Option<(u32, u32)>,
    refcnt: usize,
    timestamp: u64,
}

struct BufInner {
    /// 数据是否已从磁盘读入
    valid: AtomicBool,
    data: Mutex<BufData>,
}

#[repr(C, align(8))]
pub struct BufData(DataBlock);

/// 被独占的缓冲区，离开作用域即释放
pub struct Buf<'a> {
    cache: &'a BlockCache,
    index: usize,
    dev: u32,
    blockno: u32,
    data: ManuallyDrop<MutexGuard<'a, BufData>>,
}

impl BlockCache {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "block cache needs at least one buffer");

        Self {
            devices: Mutex::new(Vec::new()),
            ctrl: Mutex::new(BufLru {
                slots: (0..capacity).map(|_| BufCtrl::default()).collect(),
                ticks: 0,
            }),
            bufs: (0..capacity)
                .map(|_| BufInner {
                    valid: AtomicBool::new(false),
                    data: Mutex::new(BufData([0; BLOCK_SIZE])),
                })
                .collect(),
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.bufs.len()
    }

    /// 登记设备号为 `dev` 的块设备，重复登记会替换旧的驱动
    pub fn attach(&self, dev: u32, device: Arc<dyn BlockDevice>) {
        let mut devices = self.devices.lock();
        match devices.iter_mut().find(|(id, _)| *id == dev) {
            Some((_, old)) => *old = device,
            None => devices.push((dev, device)),
        }
    }

    /// 返回装有指定块内容的缓冲区，必要时从设备读入
    pub fn bread(&self, dev: u32, blockno: u32) -> Buf<'_> {
        let mut buf = self.bget(dev, blockno);
        let inner = &self.bufs[buf.index];

        if !inner.valid.load(Ordering::Acquire) {
            trace!("bcache: read block {blockno} of dev {dev}");
            self.device(dev)
                .read_block(blockno as usize, &mut buf.data.0);
            inner.valid.store(true, Ordering::Release);
        }

        buf
    }

    /// 设备 `dev` 的总块数，驱动不知道时为空
    pub fn num_blocks(&self, dev: u32) -> Option<usize> {
        self.device(dev).num_blocks()
    }

    /// 该块此刻是否驻留在缓存中
    pub fn contains(&self, dev: u32, blockno: u32) -> bool {
        self.ctrl
            .lock()
            .slots
            .iter()
            .any(|b| b.key == Some((dev, blockno)))
    }

    fn device(&self, dev: u32) -> Arc<dyn BlockDevice> {
        self.devices
            .lock()
            .iter()
            .find_map(|(id, device)| (*id == dev).then(|| device.clone()))
            .unwrap_or_else(|| panic!("bcache: no block device {dev}"))
    }

    fn bget(&self, dev: u32, blockno: u32) -> Buf<'_> {
        let mut ctrl = self.ctrl.lock();
        ctrl.ticks += 1;
        let now = ctrl.ticks;

        // 已缓存：增加引用，随后在缓冲区锁上等待持有者释放
        let index = match ctrl
            .slots
            .iter()
            .position(|b| b.key == Some((dev, blockno)))
        {
            Some(index) => index,
            None => {
                // 回收时间戳最小的闲置缓冲区
                let index = ctrl
                    .slots
                    .iter()
                    .enumerate()
                    .filter(|(_, b)| b.refcnt == 0)
                    .min_by_key(|(_, b)| b.timestamp)
                    .map(|(index, _)| index)
                    .unwrap_or_else(|| panic!("bcache: all {} buffers pinned", self.capacity()));

                let victim = &mut ctrl.slots[index];
                if let Some((old_dev, old_blockno)) = victim.key {
                    trace!("bcache: evict block {old_blockno} of dev {old_dev}");
                }
                victim.key = Some((dev, blockno));
                self.bufs[index].valid.store(false, Ordering::Release);
                index
            }
        };

        let slot = &mut ctrl.slots[index];
        slot.refcnt += 1;
        slot.timestamp = now;
        drop(ctrl);

        Buf {
            cache: self,
            index,
            dev,
            blockno,
            data: ManuallyDrop::new(self.bufs[index].data.lock()),
        }
    }

    fn brelse(&self, index: usize) {
        let mut ctrl = self.ctrl.lock();
        let slot = &mut ctrl.slots[index];
        assert!(slot.refcnt > 0, "brelse: buffer not referenced");
        slot.refcnt -= 1;
    }
}

impl Default for BlockCache {
    fn default() -> Self {
        Self::new(NBUF)
    }
}

impl Buf<'_> {
    #[inline]
    pub fn dev(&self) -> u32 {
        self.dev
    }

    #[inline]
    pub fn blockno(&self) -> u32 {
        self.blockno
    }

    #[inline]
    pub fn as_bytes(&self) -> &DataBlock {
        &self.data.0
    }

    #[inline]
    pub fn as_bytes_mut(&mut self) -> &mut DataBlock {
        &mut self.data.0
    }

    /// 把缓冲区内容写回设备
    pub fn bwrite(&mut self) {
        trace!("bcache: write block {} of dev {}", self.blockno, self.dev);
        self.cache
            .device(self.dev)
            .write_block(self.blockno as usize, &self.data.0);
    }

    /// 额外持有一份引用，使缓冲区在本守卫释放后仍不被换出
    pub fn pin(&self) {
        self.cache.ctrl.lock().slots[self.index].refcnt += 1;
    }

    pub fn unpin(&self) {
        let mut ctrl = self.cache.ctrl.lock();
        let slot = &mut ctrl.slots[self.index];
        // 至少还有本守卫持有的那一份
        assert!(slot.refcnt > 1, "bunpin: buffer not pinned");
        slot.refcnt -= 1;
    }

    pub fn get<T: Sized>(&self, offset: usize) -> &T {
        Self::check::<T>(offset);
        let addr = self.data.0[offset..].as_ptr().cast::<T>();
        unsafe { &*addr }
    }

    pub fn get_mut<T: Sized>(&mut self, offset: usize) -> &mut T {
        Self::check::<T>(offset);
        let addr = self.data.0[offset..].as_mut_ptr().cast::<T>();
        unsafe { &mut *addr }
    }

    #[inline]
    pub fn map<T: Sized, V>(&self, offset: usize, f: impl FnOnce(&T) -> V) -> V {
        f(self.get(offset))
    }

    #[inline]
    pub fn map_mut<T: Sized, V>(&mut self, offset: usize, f: impl FnOnce(&mut T) -> V) -> V {
        f(self.get_mut(offset))
    }

    /// 块内的映射不得越界，且需满足类型的对齐要求（块本身按8字节对齐）
    fn check<T>(offset: usize) {
        assert!(mem::size_of::<T>() + offset <= BLOCK_SIZE);
        assert_eq!(offset % mem::align_of::<T>(), 0);
        assert!(mem::align_of::<T>() <= mem::align_of::<BufData>());
    }
}

impl Drop for Buf<'_> {
    fn drop(&mut self) {
        // 先放开数据锁，等待者才能在引用计数变化前拿到它
        unsafe { ManuallyDrop::drop(&mut self.data) };
        self.cache.brelse(self.index);
    }
}

#[cfg(test)]
mod tests {
    use alloc::sync::Arc;

    use super::*;
    use crate::ramdisk::RamDisk;

    fn cache(capacity: usize, blocks: usize) -> (BlockCache, Arc<RamDisk>) {
        let disk = Arc::new(RamDisk::new(blocks));
        let cache = BlockCache::new(capacity);
        cache.attach(1, disk.clone());
        (cache, disk)
    }

    #[test]
    fn read_once_per_residency() {
        let (cache, disk) = cache(4, 16);

        for _ in 0..5 {
            drop(cache.bread(1, 3));
        }
        assert_eq!(disk.reads(3), 1);
    }

    #[test]
    fn writes_go_to_the_shared_buffer() {
        let (cache, disk) = cache(4, 16);

        let mut buf = cache.bread(1, 2);
        buf.map_mut(8, |word: &mut u32| *word = 0xdead_beef);
        drop(buf);

        // 未写回，但再次获取得到的是同一个缓冲区
        assert_eq!(cache.bread(1, 2).map(8, |word: &u32| *word), 0xdead_beef);
        assert_eq!(disk.writes(2), 0);

        cache.bread(1, 2).bwrite();
        assert_eq!(disk.writes(2), 1);
    }

    #[test]
    fn evicts_least_recently_used() {
        let (cache, disk) = cache(3, 16);

        for blockno in [1, 2, 3] {
            drop(cache.bread(1, blockno));
        }
        // 触碰 1，使 2 成为最久未用
        drop(cache.bread(1, 1));
        drop(cache.bread(1, 4));

        assert!(!cache.contains(1, 2));
        assert!(cache.contains(1, 1));
        assert!(cache.contains(1, 3));

        drop(cache.bread(1, 1));
        assert_eq!(disk.reads(1), 1);
    }

    #[test]
    fn hot_block_survives_churn() {
        let (cache, disk) = cache(4, 64);

        for blockno in 10..60 {
            drop(cache.bread(1, 0));
            drop(cache.bread(1, blockno));
        }
        assert_eq!(disk.reads(0), 1);
    }

    #[test]
    fn pinned_buffer_is_never_evicted() {
        let (cache, _disk) = cache(2, 16);

        let held = cache.bread(1, 7);
        for blockno in 0..6 {
            drop(cache.bread(1, blockno));
        }
        assert!(cache.contains(1, 7));
        drop(held);

        let buf = cache.bread(1, 8);
        buf.pin();
        drop(buf);
        for blockno in 0..6 {
            drop(cache.bread(1, blockno));
        }
        assert!(cache.contains(1, 8));

        cache.bread(1, 8).unpin();
        drop(cache.bread(1, 0));
        drop(cache.bread(1, 1));
        assert!(!cache.contains(1, 8));
    }

    #[test]
    #[should_panic(expected = "pinned")]
    fn exhausted_cache_is_fatal() {
        let (cache, _disk) = cache(2, 16);

        let _a = cache.bread(1, 0);
        let _b = cache.bread(1, 1);
        let _c = cache.bread(1, 2);
    }
}
