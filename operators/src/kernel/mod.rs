//! 组并行核函数的发射框架。
//!
//! 每个组处理一行，组内若干线程协作，通过组内共享的暂存区交换部分结果，
//! 并以组内同步分隔各个阶段。

mod slm;

pub use slm::Slm;

use crate::{shape_not_support, LaunchError, SchemeCacheSize, SchemeDiversity};
use digit_layout::{types as ty, DigitLayout};
use half::f16;
use log::{debug, trace};
use lru::LruCache;
use std::{ops::Range, sync::Mutex};

/// 暂存区数据部分的固定容量，以元素计。
pub const CAPACITY: usize = 8 * 1024;

/// 核函数支持的元素类型。
///
/// 统计量总是以 `f32` 累加，与元素精度无关。
pub trait Element: Copy + Default + Send + Sync + 'static {
    const LAYOUT: DigitLayout;

    fn to_f32(self) -> f32;
    fn from_f32(val: f32) -> Self;
}

impl Element for f32 {
    const LAYOUT: DigitLayout = ty::F32;

    #[inline(always)]
    fn to_f32(self) -> f32 {
        self
    }
    #[inline(always)]
    fn from_f32(val: f32) -> Self {
        val
    }
}

impl Element for f16 {
    const LAYOUT: DigitLayout = ty::F16;

    #[inline(always)]
    fn to_f32(self) -> f32 {
        f16::to_f32(self)
    }
    #[inline(always)]
    fn from_f32(val: f32) -> Self {
        f16::from_f32(val)
    }
}

/// 二维执行网格：`groups` 个组，每组 `lanes` 个线程。
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Grid {
    pub groups: usize,
    pub lanes: usize,
}

/// 行内的分块方案。
///
/// 一行分为 `nb` 块，每个线程分得 `sub_nb` 块，
/// 除不尽的 `rem_nb` 块由前 `rem_nb` 个线程各多分一块。
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct Partition {
    pub block: usize,
    pub nb: usize,
    pub sub_nb: usize,
    pub rem_nb: usize,
}

impl Partition {
    pub fn new(d: usize, block: usize, lanes: usize) -> Result<Self, LaunchError> {
        if block == 0 || d % block != 0 {
            return Err(shape_not_support(format!(
                "hidden size {d} must be multiple of block size {block}"
            )));
        }
        if d > CAPACITY {
            return Err(shape_not_support(format!(
                "hidden size {d} exceeds scratch capacity {CAPACITY}"
            )));
        }
        let nb = d / block;
        Ok(Self {
            block,
            nb,
            sub_nb: nb / lanes,
            rem_nb: nb % lanes,
        })
    }

    /// 线程 `lane` 负责的块号范围。
    #[inline]
    pub fn blocks(&self, lane: usize) -> Range<usize> {
        let start = self.sub_nb * lane + lane.min(self.rem_nb);
        let end = start + self.sub_nb + usize::from(lane < self.rem_nb);
        start..end
    }
}

/// 以组内同步分隔的多阶段核函数。
///
/// 任务队列保证：同一组中，所有线程执行完第 `k` 阶段之后，任何线程才开始第 `k + 1` 阶段。
pub trait GroupKernel: Sync {
    /// 暂存区数据部分的元素类型。
    type Item: Element;
    /// 阶段数，即组内同步次数加一。
    const STAGES: usize;
    /// 累加槽组数。
    const SLOT_SETS: usize;

    fn stage(&self, stage: usize, group: usize, lane: usize, slm: &mut Slm<Self::Item>);
}

/// 能够执行组并行核函数的任务队列。
pub trait GroupQueue {
    fn submit<K: GroupKernel>(&self, grid: Grid, kernel: &K);
}

/// 向队列提交一次核函数，`tag` 用于诊断。
pub(crate) fn launch<Q, K>(queue: &Q, grid: Grid, tag: &str, kernel: &K)
where
    Q: GroupQueue,
    K: GroupKernel,
{
    debug!(
        "submit {tag}: {} groups x {} lanes, {} stages",
        grid.groups,
        grid.lanes,
        K::STAGES,
    );
    queue.submit(grid, kernel)
}

/// 按隐藏维度缓存分块方案。
pub(crate) struct Plans<const BS: usize, const GS: usize>(Mutex<LruCache<usize, Partition>>);

impl<const BS: usize, const GS: usize> Plans<BS, GS> {
    pub fn new() -> Self {
        Self(SchemeCacheSize::default().new_cache(SchemeDiversity::Low))
    }

    pub fn get(&self, d: usize) -> Result<Partition, LaunchError> {
        let mut cache = self.0.lock().unwrap();
        cache
            .try_get_or_insert(d, || {
                let plan = Partition::new(d, BS, GS)?;
                trace!("plan for d = {d}: {plan:?}");
                Ok(plan)
            })
            .copied()
    }
}
