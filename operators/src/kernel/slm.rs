use super::{Element, CAPACITY};

/// 组内共享的暂存区。
///
/// 由两部分组成：
///
/// - 数据区：固定 [`CAPACITY`] 个元素，暂存本组负责的一行；
/// - 累加槽：`sets` 组、每组每线程一个 `f32` 槽，用于交换部分归约结果。
///
/// 第 `k` 组累加槽只能在第 `k` 个阶段写入，并且只能在第 `k + 1` 次同步之后读取。
pub struct Slm<T> {
    data: Box<[T]>,
    slots: Box<[f32]>,
    published: Box<[bool]>,
    lanes: usize,
    epoch: usize,
}

impl<T: Element> Slm<T> {
    pub fn new(sets: usize, lanes: usize) -> Self {
        Self {
            data: vec![T::default(); CAPACITY].into(),
            slots: vec![0.; sets * lanes].into(),
            published: vec![false; sets * lanes].into(),
            lanes,
            epoch: 0,
        }
    }

    /// 为下一组清空同步状态，数据区不需要清理。
    pub fn reset(&mut self) {
        self.published.fill(false);
        self.epoch = 0;
    }

    #[inline]
    pub fn lanes(&self) -> usize {
        self.lanes
    }

    /// 已经完成的组内同步次数。
    #[inline]
    pub fn epoch(&self) -> usize {
        self.epoch
    }

    /// 把一块数据写入数据区 `offset` 处。
    #[inline]
    pub fn store(&mut self, offset: usize, src: &[T]) {
        self.data[offset..][..src.len()].copy_from_slice(src)
    }

    /// 读取数据区 `offset` 处的 `len` 个元素。
    #[inline]
    pub fn load(&self, offset: usize, len: usize) -> &[T] {
        &self.data[offset..][..len]
    }

    /// 线程 `lane` 把部分结果写入第 `set` 组累加槽的自己的位置。
    #[inline]
    pub fn publish(&mut self, set: usize, lane: usize, val: f32) {
        debug_assert_eq!(
            self.epoch, set,
            "slot set {set} written after {} barriers",
            self.epoch
        );
        let i = set * self.lanes + lane;
        self.slots[i] = val;
        self.published[i] = true;
    }

    /// 汇总第 `set` 组所有线程的部分结果。
    ///
    /// 每个线程都各自重新求和，省去一次指定线程归约后的广播和同步。
    pub fn gather(&self, set: usize) -> f32 {
        let range = set * self.lanes..(set + 1) * self.lanes;
        debug_assert!(
            self.epoch > set,
            "slot set {set} read before the barrier"
        );
        debug_assert!(
            self.published[range.clone()].iter().all(|&p| p),
            "slot set {set} read before every lane published"
        );
        self.slots[range].iter().sum()
    }

    /// 组内同步：此前所有线程的写入对此后所有线程可见。
    #[inline]
    pub fn barrier(&mut self) {
        self.epoch += 1
    }
}
