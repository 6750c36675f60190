//! # 磁盘块管理器层
//!
//! 构建出磁盘的布局并使用：格式化、挂载，以及数据块与 inode 的分配回收。

use alloc::sync::Arc;
use core::mem;

use log::{debug, info, warn};
use spin::Mutex;
use vfs::{Error, Result};

use crate::file::CharDevice;
use crate::inode::InodeCache;
use crate::layout::{Bitmap, DiskInode, InodeType, SuperBlock};
use crate::{BLOCK_BITS, BLOCK_SIZE, DataBlock, NDEV, NINODE, ROOTINO};
use crate::{BlockCache, Inode, Journal, Op};

const INODE_SIZE: usize = mem::size_of::<DiskInode>();
/// 每块容纳的 inode 数
pub const INODES_PER_BLOCK: usize = BLOCK_SIZE / INODE_SIZE;

/// 格式化参数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MkfsConfig {
    /// 卷的总块数
    pub total_blocks: u32,
    pub ninodes: u32,
    /// 日志区域块数
    pub nlog: u32,
}

impl Default for MkfsConfig {
    fn default() -> Self {
        Self {
            total_blocks: 4096,
            ninodes: 200,
            nlog: 30,
        }
    }
}

/// 挂载在某个设备上的文件系统
pub struct FileSystem {
    dev: u32,
    sb: SuperBlock,
    bitmap: Bitmap,
    cache: Arc<BlockCache>,
    journal: Arc<dyn Journal>,
    pub(crate) icache: InodeCache,
    /// 按主设备号索引的字符设备驱动
    devsw: Mutex<[Option<Arc<dyn CharDevice>>; NDEV]>,
}

impl FileSystem {
    /// 在设备 `dev` 上建立空的文件系统并挂载之，设备须已登记到 `cache`。
    ///
    /// 格式化是离线操作，直接写回设备而不经过日志；
    /// 只有根目录的创建走正常的事务路径。
    pub fn format(
        cache: &Arc<BlockCache>,
        dev: u32,
        journal: Arc<dyn Journal>,
        config: MkfsConfig,
    ) -> Result<Arc<Self>> {
        let MkfsConfig {
            total_blocks,
            ninodes,
            nlog,
        } = config;

        let nbitmap = (total_blocks as usize).div_ceil(BLOCK_BITS) as u32;
        let ninode_blocks = ninodes / INODES_PER_BLOCK as u32 + 1;
        // 引导块 | 超级块 | 日志 | inode | 位图
        let nmeta = 2 + nlog + ninode_blocks + nbitmap;
        if ninodes <= ROOTINO || nmeta >= total_blocks || ninodes > u16::MAX as u32 {
            return Err(Error::InvalidArgument);
        }
        if cache
            .num_blocks(dev)
            .is_some_and(|capacity| capacity < total_blocks as usize)
        {
            warn!("mkfs: dev {dev} is smaller than {total_blocks} blocks");
            return Err(Error::InvalidArgument);
        }

        let sb = SuperBlock::new(
            total_blocks,
            total_blocks - nmeta,
            ninodes,
            nlog,
            2,
            2 + nlog,
            2 + nlog + ninode_blocks,
        );
        debug_assert!(sb.is_valid());
        info!(
            "mkfs: nmeta {nmeta} (boot, super, log {nlog}, inode {ninode_blocks}, bitmap {nbitmap}) \
             blocks {} total {total_blocks}",
            sb.nblocks
        );

        for block_id in 0..total_blocks {
            let mut buf = cache.bread(dev, block_id);
            buf.map_mut(0, |data_block: &mut DataBlock| data_block.fill(0));
            buf.bwrite();
        }

        let mut buf = cache.bread(dev, SuperBlock::BLOCK_ID);
        buf.map_mut(0, |super_block: &mut SuperBlock| *super_block = sb);
        buf.bwrite();
        drop(buf);

        let bitmap = Bitmap::new(sb.bmap_start, total_blocks as usize);
        for block_id in 0..nmeta {
            bitmap.mark_used(cache, dev, &crate::WriteThrough, block_id);
        }

        let fs = Self::mount(cache, dev, journal)?;
        {
            let _op = fs.begin_op();
            let root = fs.ialloc(InodeType::Directory)?;
            assert_eq!(root.inum(), ROOTINO, "mkfs: root is not the first inode");

            // 根目录的 ".." 指向自己
            let mut guard = root.lock();
            guard.set_nlink(1);
            guard.update();
            guard.dir_link(b".", ROOTINO)?;
            guard.dir_link(b"..", ROOTINO)?;
        }

        Ok(fs)
    }

    /// 读取并校验超级块
    pub fn mount(cache: &Arc<BlockCache>, dev: u32, journal: Arc<dyn Journal>) -> Result<Arc<Self>> {
        let sb = cache
            .bread(dev, SuperBlock::BLOCK_ID)
            .map(0, |super_block: &SuperBlock| *super_block);
        if !sb.is_valid() {
            warn!("mount: dev {dev} has no valid super block");
            return Err(Error::Corrupted);
        }
        info!("mount: dev {dev} {sb:?}");

        Ok(Arc::new(Self {
            dev,
            sb,
            bitmap: Bitmap::new(sb.bmap_start, sb.size as usize),
            cache: cache.clone(),
            journal,
            icache: InodeCache::new(NINODE),
            devsw: Mutex::new(Default::default()),
        }))
    }

    #[inline]
    pub fn dev(&self) -> u32 {
        self.dev
    }

    #[inline]
    pub fn super_block(&self) -> &SuperBlock {
        &self.sb
    }

    #[inline]
    pub fn cache(&self) -> &BlockCache {
        &self.cache
    }

    #[inline]
    pub fn journal(&self) -> &dyn Journal {
        &*self.journal
    }

    /// 开始一个事务，返回值离开作用域时结束
    #[inline]
    pub fn begin_op(&self) -> Op<'_> {
        Op::begin(&*self.journal)
    }

    #[inline]
    pub fn root(self: &Arc<Self>) -> Inode {
        self.iget(ROOTINO)
    }

    /// 分配一个清零的数据块
    pub fn balloc(&self) -> Result<u32> {
        let Some(block_id) = self.bitmap.alloc(&self.cache, self.dev, self.journal()) else {
            warn!("balloc: out of blocks on dev {}", self.dev);
            return Err(Error::NoFreeBlock);
        };
        assert!(
            self.sb.is_data_block(block_id),
            "balloc: metadata block {block_id} marked free"
        );

        let mut buf = self.cache.bread(self.dev, block_id);
        buf.map_mut(0, |data_block: &mut DataBlock| data_block.fill(0));
        self.journal.write(&mut buf);
        debug!("balloc: block {block_id}");

        Ok(block_id)
    }

    pub fn bfree(&self, block_id: u32) {
        assert!(
            self.sb.is_data_block(block_id),
            "bfree: block {block_id} is not a data block"
        );
        self.bitmap
            .dealloc(&self.cache, self.dev, self.journal(), block_id);
        debug!("bfree: block {block_id}");
    }

    /// 在 inode 区域寻找空闲的 inode，标记为 `kind` 并返回其句柄
    pub fn ialloc(self: &Arc<Self>, kind: InodeType) -> Result<Inode> {
        debug_assert_ne!(kind, InodeType::Free);

        for inum in ROOTINO..self.sb.ninodes {
            let (block_id, offset) = self.inode_pos(inum);
            let mut buf = self.cache.bread(self.dev, block_id);
            let claimed = buf.map_mut(offset, |disk_inode: &mut DiskInode| {
                if !disk_inode.is_free() {
                    return false;
                }
                disk_inode.init(kind);
                true
            });

            if claimed {
                self.journal.write(&mut buf);
                drop(buf);
                debug!("ialloc: inode {inum} as {kind:?}");
                return Ok(self.iget(inum));
            }
        }

        warn!("ialloc: no free inode on dev {}", self.dev);
        Err(Error::NoFreeInode)
    }

    /// 通过编号获取 inode 在磁盘上的位置：**块ID**以及**块内偏移**
    pub fn inode_pos(&self, inum: u32) -> (u32, usize) {
        let block_id = self.sb.inode_start + inum / INODES_PER_BLOCK as u32;
        let block_inoffset = inum as usize % INODES_PER_BLOCK * INODE_SIZE;

        (block_id, block_inoffset)
    }

    /// 空闲数据块数
    #[inline]
    pub fn free_blocks(&self) -> usize {
        self.bitmap.count_free(&self.cache, self.dev)
    }

    /// 空闲 inode 数
    pub fn free_inodes(&self) -> usize {
        (ROOTINO..self.sb.ninodes)
            .filter(|&inum| {
                let (block_id, offset) = self.inode_pos(inum);
                self.cache
                    .bread(self.dev, block_id)
                    .map(offset, |disk_inode: &DiskInode| disk_inode.is_free())
            })
            .count()
    }

    /// 为主设备号 `major` 登记字符设备驱动
    pub fn register_device(&self, major: u16, device: Arc<dyn CharDevice>) -> Result<()> {
        let mut devsw = self.devsw.lock();
        let slot = devsw
            .get_mut(major as usize)
            .ok_or(Error::BadDevice)?;
        *slot = Some(device);
        Ok(())
    }

    pub fn device(&self, major: u16) -> Result<Arc<dyn CharDevice>> {
        self.devsw
            .lock()
            .get(major as usize)
            .and_then(Option::clone)
            .ok_or(Error::BadDevice)
    }
}
