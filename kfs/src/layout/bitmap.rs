use crate::{BLOCK_BITS, BlockCache, Journal};

/// 位图区域内块的结构
type BitmapBlock = [u64; BLOCK_BITS / 64];

/// 空闲位图，每一位对应卷上的一块：块 b 的位在 `b / BLOCK_BITS + 起始块` 中
#[derive(Debug, Clone, Copy)]
pub struct Bitmap {
    /// 位图的起始块
    start_block_id: u32,
    /// 位图所指示的总块数
    bits: usize,
}

/// 块编号
struct BlockID(u32);

impl Bitmap {
    #[inline]
    pub fn new(start_block_id: u32, bits: usize) -> Self {
        Self {
            start_block_id,
            bits,
        }
    }

    /// 位图占用块数
    #[inline]
    pub fn blocks(&self) -> usize {
        self.bits.div_ceil(BLOCK_BITS)
    }

    /// 在指示区域内分配新的块，返回其编号。
    /// 若位图的空间用尽，则返回空。
    pub fn alloc(&self, cache: &BlockCache, dev: u32, journal: &dyn Journal) -> Option<u32> {
        // 遍历位图区域内所有的块，寻找块内还有剩余空间的bit组(即还有0)
        for block_index in 0..self.blocks() {
            let mut buf = cache.bread(dev, self.start_block_id + block_index as u32);
            let total = self.bits;
            let found = buf.map_mut(0, |bitmap_block: &mut BitmapBlock| {
                let (group_index, ingroup_index) =
                    bitmap_block
                        .iter()
                        .enumerate()
                        .find_map(|(group_index, &bits)| {
                            (bits != u64::MAX).then_some((group_index, bits.trailing_ones()))
                        })?;

                // 位图最后一块的尾部没有对应的块
                let block_id = BlockID::encode(block_index, group_index, ingroup_index as usize);
                if block_id as usize >= total {
                    return None;
                }

                // 追加新位
                bitmap_block[group_index] |= 1 << ingroup_index;
                Some(block_id)
            });

            if let Some(block_id) = found {
                journal.write(&mut buf);
                return Some(block_id);
            }
        }

        None
    }

    /// # Panics
    ///
    /// 释放一个本就空闲的块说明磁盘结构已被破坏。
    pub fn dealloc(&self, cache: &BlockCache, dev: u32, journal: &dyn Journal, block_id: u32) {
        assert!((block_id as usize) < self.bits, "bfree: block {block_id} out of volume");

        let (block_index, group_index, ingroup_index) = BlockID(block_id).decode();
        let mut buf = cache.bread(dev, self.start_block_id + block_index as u32);
        buf.map_mut(0, |bitmap_block: &mut BitmapBlock| {
            // 编号一定得有对应的位
            assert_ne!(
                bitmap_block[group_index] & (1 << ingroup_index),
                0,
                "bfree: freeing free block {block_id}"
            );
            bitmap_block[group_index] &= !(1 << ingroup_index);
        });
        journal.write(&mut buf);
    }

    /// 直接置位，供格式化时标记元数据块
    pub fn mark_used(&self, cache: &BlockCache, dev: u32, journal: &dyn Journal, block_id: u32) {
        let (block_index, group_index, ingroup_index) = BlockID(block_id).decode();
        let mut buf = cache.bread(dev, self.start_block_id + block_index as u32);
        buf.map_mut(0, |bitmap_block: &mut BitmapBlock| {
            bitmap_block[group_index] |= 1 << ingroup_index;
        });
        journal.write(&mut buf);
    }

    /// 统计空闲块数
    pub fn count_free(&self, cache: &BlockCache, dev: u32) -> usize {
        let used: usize = (0..self.blocks())
            .map(|block_index| {
                cache
                    .bread(dev, self.start_block_id + block_index as u32)
                    .map(0, |bitmap_block: &BitmapBlock| {
                        bitmap_block
                            .iter()
                            .map(|bits| bits.count_ones() as usize)
                            .sum::<usize>()
                    })
            })
            .sum();
        self.bits - used
    }
}

impl BlockID {
    /// 线性映射编码得到块ID
    #[inline]
    fn encode(block_index: usize, group_index: usize, ingroup_index: usize) -> u32 {
        (block_index * BLOCK_BITS + group_index * 64 + ingroup_index) as u32
    }

    fn decode(self) -> (usize, usize, usize) {
        let mut block_id = self.0 as usize;

        let block_index = block_id / BLOCK_BITS;
        block_id %= BLOCK_BITS;
        (block_index, block_id / 64, block_id % 64)
    }
}
