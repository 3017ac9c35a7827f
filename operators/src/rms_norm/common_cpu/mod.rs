use super::{args::Meta, Args, RmsNorm};
use crate::{
    common_cpu::Cpu,
    kernel::{launch, Element, Grid, GroupKernel, Partition, Plans, Slm},
    LaunchError, QueueOf, SchemeError,
};
use half::f16;
use log::warn;
use std::slice::{from_raw_parts, from_raw_parts_mut};

/// 每组 `GS` 个线程、每块 `BS` 个元素的 RMS 归一化。
pub struct Operator<const BS: usize = 32, const GS: usize = 32>(Plans<BS, GS>);

impl<const BS: usize, const GS: usize> RmsNorm<Cpu> for Operator<BS, GS> {}

impl<const BS: usize, const GS: usize> crate::Operator for Operator<BS, GS> {
    type Hardware = Cpu;
    type Args = Args<Cpu>;

    #[inline]
    fn new(_node: &Self::Hardware) -> Self {
        Self(Plans::new())
    }

    fn scheme(&mut self, args: &Self::Args) -> Result<(), SchemeError> {
        let Meta { d, .. } = args.meta()?;
        self.0
            .get(d)
            .inspect_err(|e| warn!("rms norm rejected: {e}"))?;
        Ok(())
    }

    fn launch(
        &self,
        args: &Self::Args,
        queue: &QueueOf<Self::Hardware>,
    ) -> Result<(), LaunchError> {
        let Meta { dt, n, d, nsy, nsx } = args.meta()?;
        let plan = self
            .0
            .get(d)
            .unwrap_or_else(|e| panic!("rms norm launched out of contract: {e}"));

        macro_rules! calculate {
            ($ty:ty) => {
                launch(
                    queue,
                    Grid {
                        groups: n,
                        lanes: GS,
                    },
                    "rms norm",
                    &Scheme::<$ty> {
                        plan,
                        d,
                        nsy,
                        nsx,
                        y: args.y_base.cast(),
                        x: args.x_base.cast(),
                        w: args.w_base.cast(),
                        epsilon: args.epsilon as _,
                    },
                )
            };
        }

        use digit_layout::types as ty;
        match dt {
            ty::F16 => calculate!(f16),
            ty::F32 => calculate!(f32),
            _ => unreachable!(),
        }
        Ok(())
    }
}

struct Scheme<T> {
    plan: Partition,
    d: usize,
    nsy: isize,
    nsx: isize,
    y: *mut T,
    x: *const T,
    w: *const T,
    epsilon: f32,
}

unsafe impl<T> Send for Scheme<T> {}
unsafe impl<T> Sync for Scheme<T> {}

impl<T: Element> GroupKernel for Scheme<T> {
    type Item = T;
    const STAGES: usize = 2;
    const SLOT_SETS: usize = 1;

    fn stage(&self, stage: usize, row: usize, lane: usize, slm: &mut Slm<T>) {
        let bs = self.plan.block;
        let blocks = self.plan.blocks(lane);
        match stage {
            // 读入并暂存，累加平方和
            0 => {
                let x = unsafe { self.x.byte_offset(row as isize * self.nsx) };
                let mut acc = 0.;
                for i in blocks {
                    let xv = unsafe { from_raw_parts(x.add(i * bs), bs) };
                    slm.store(i * bs, xv);
                    acc += xv
                        .iter()
                        .map(|x| x.to_f32())
                        .map(|x| x * x)
                        .sum::<f32>();
                }
                slm.publish(0, lane, acc / self.d as f32)
            }
            // 归约均方，缩放并乘权重
            1 => {
                let mean = slm.gather(0);
                let k = (mean + self.epsilon).sqrt().recip();

                let y = unsafe { self.y.byte_offset(row as isize * self.nsy) };
                for i in blocks {
                    let yv = unsafe { from_raw_parts_mut(y.add(i * bs), bs) };
                    let wv = unsafe { from_raw_parts(self.w.add(i * bs), bs) };
                    let xv = slm.load(i * bs, bs);
                    for ((y, x), w) in yv.iter_mut().zip(xv).zip(wv) {
                        *y = T::from_f32(x.to_f32() * k * w.to_f32())
                    }
                }
            }
            _ => unreachable!(),
        }
    }
}
