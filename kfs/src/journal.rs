//! # 事务边界
//!
//! 日志的实现（成组提交、重放）不属于本文件系统；这里只规定它的契约：
//! 在 `begin_op` 与 `end_op` 之间经 [`Journal::write`] 提交的块写入，
//! 恢复后要么全部生效，要么全部不生效。
//!
//! 所有修改磁盘的操作都以 [`Op`] 括起来，`Op` 离开作用域时结束事务，
//! 因此任何出错的提前返回也不会漏掉 `end_op`。

use log::trace;

use crate::Buf;

pub trait Journal: Send + Sync {
    /// 开始一个事务，可能阻塞直到日志有足够空间
    fn begin_op(&self);

    /// 结束事务，最后一个未结束的事务负责提交
    fn end_op(&self);

    /// 记录一个被修改的缓冲区，取代直接写回设备
    fn write(&self, buf: &mut Buf<'_>);
}

/// 进行中的事务，析构时调用 `end_op`
pub struct Op<'a> {
    journal: &'a dyn Journal,
}

impl<'a> Op<'a> {
    pub fn begin(journal: &'a dyn Journal) -> Self {
        journal.begin_op();
        trace!("journal: begin op");
        Self { journal }
    }
}

impl Drop for Op<'_> {
    fn drop(&mut self) {
        trace!("journal: end op");
        self.journal.end_op();
    }
}

/// 没有日志的事务：修改立即写回设备，不提供崩溃一致性。
///
/// 用于格式化工具与测试。
#[derive(Debug, Default, Clone, Copy)]
pub struct WriteThrough;

impl Journal for WriteThrough {
    fn begin_op(&self) {}

    fn end_op(&self) {}

    #[inline]
    fn write(&self, buf: &mut Buf<'_>) {
        buf.bwrite();
    }
}
