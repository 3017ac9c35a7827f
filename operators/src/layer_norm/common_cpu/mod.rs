use super::{args::Meta, Args, LayerNorm};
use crate::{
    common_cpu::Cpu,
    kernel::{launch, Element, Grid, GroupKernel, Partition, Plans, Slm},
    LaunchError, QueueOf, SchemeError,
};
use half::f16;
use log::warn;
use std::slice::{from_raw_parts, from_raw_parts_mut};

/// 每组 `GS` 个线程、每块 `BS` 个元素的层归一化。
pub struct Operator<const BS: usize = 32, const GS: usize = 32>(Plans<BS, GS>);

impl<const BS: usize, const GS: usize> LayerNorm<Cpu> for Operator<BS, GS> {}

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
            .inspect_err(|e| warn!("layer norm rejected: {e}"))?;
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
            .unwrap_or_else(|e| panic!("layer norm launched out of contract: {e}"));

        macro_rules! calculate {
            ($ty:ty) => {
                launch(
                    queue,
                    Grid {
                        groups: n,
                        lanes: GS,
                    },
                    "layer norm",
                    &Scheme::<$ty> {
                        plan,
                        d,
                        nsy,
                        nsx,
                        y: args.y_base.cast(),
                        x: args.x_base.cast(),
                        s: args.scale.as_ref().map(|p| p.base.cast()),
                        b: args.bias.as_ref().map(|p| p.base.cast()),
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
    s: Option<*const T>,
    b: Option<*const T>,
    epsilon: f32,
}

unsafe impl<T> Send for Scheme<T> {}
unsafe impl<T> Sync for Scheme<T> {}

const MEAN: usize = 0;
const VAR: usize = 1;

impl<T: Element> GroupKernel for Scheme<T> {
    type Item = T;
    const STAGES: usize = 3;
    const SLOT_SETS: usize = 2;

    fn stage(&self, stage: usize, row: usize, lane: usize, slm: &mut Slm<T>) {
        let bs = self.plan.block;
        let blocks = self.plan.blocks(lane);
        let n = self.d as f32;
        match stage {
            // 读入并暂存，累加和
            0 => {
                let x = unsafe { self.x.byte_offset(row as isize * self.nsx) };
                let mut acc = 0.;
                for i in blocks {
                    let xv = unsafe { from_raw_parts(x.add(i * bs), bs) };
                    slm.store(i * bs, xv);
                    acc += xv.iter().map(|x| x.to_f32()).sum::<f32>();
                }
                slm.publish(MEAN, lane, acc / n)
            }
            // 归约均值，累加离差平方和
            1 => {
                let mean = slm.gather(MEAN);
                let mut acc = 0.;
                for i in blocks {
                    acc += slm
                        .load(i * bs, bs)
                        .iter()
                        .map(|x| x.to_f32() - mean)
                        .map(|x| x * x)
                        .sum::<f32>();
                }
                slm.publish(VAR, lane, acc / n)
            }
            // 归约方差，标准化后按需缩放和偏移
            2 => {
                // 均值槽在整个组的生命周期内保持不变
                let mean = slm.gather(MEAN);
                let var = slm.gather(VAR);
                let k = (var + self.epsilon).sqrt().recip();

                let y = unsafe { self.y.byte_offset(row as isize * self.nsy) };
                for i in blocks {
                    let yv = unsafe { from_raw_parts_mut(y.add(i * bs), bs) };
                    let sv = self.s.map(|s| unsafe { from_raw_parts(s.add(i * bs), bs) });
                    let bv = self.b.map(|b| unsafe { from_raw_parts(b.add(i * bs), bs) });
                    let xv = slm.load(i * bs, bs);
                    for (j, (y, x)) in yv.iter_mut().zip(xv).enumerate() {
                        let mut val = (x.to_f32() - mean) * k;
                        if let Some(sv) = sv {
                            val *= sv[j].to_f32()
                        }
                        if let Some(bv) = bv {
                            val += bv[j].to_f32()
                        }
                        *y = T::from_f32(val)
                    }
                }
            }
            _ => unreachable!(),
        }
    }
}

#[cfg(test)]
mod test {
    use super::{Args, Cpu, Operator};
    use crate::{
        common_cpu::ThisThread,
        layer_norm::Param,
        test_utils::{random, Diff, ErrorCollector},
        Hardware, LaunchErrorKind, Operator as _, TensorLayout,
    };
    use digit_layout::{
        types::{F16, F32, F64},
        DigitLayout,
    };
    use half::f16;
    use std::ptr::{null, null_mut};

    fn args<H: Hardware>(
        dt: DigitLayout,
        n: usize,
        d: usize,
        y_base: *mut H::Byte,
        x_base: *const H::Byte,
        s_base: Option<*const H::Byte>,
        b_base: Option<*const H::Byte>,
    ) -> Args<H> {
        let param = |base| Param {
            layout: TensorLayout::new_contiguous(dt, &[d]),
            base,
        };
        Args {
            y_layout: TensorLayout::new_contiguous(dt, &[n, d]),
            y_base,
            x_layout: TensorLayout::new_contiguous(dt, &[n, d]),
            x_base,
            scale: s_base.map(param),
            bias: b_base.map(param),
            epsilon: 1e-5,
        }
    }

    fn reference(x: &[f64], d: usize, s: Option<&[f64]>, b: Option<&[f64]>) -> Vec<f64> {
        let n = d as f64;
        x.chunks(d)
            .flat_map(|x| {
                let mean = x.iter().sum::<f64>() / n;
                let var = x.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n;
                let k = (var + 1e-5).sqrt().recip();
                x.iter().enumerate().map(move |(j, x)| {
                    let mut y = (x - mean) * k;
                    if let Some(s) = s {
                        y *= s[j]
                    }
                    if let Some(b) = b {
                        y += b[j]
                    }
                    y
                })
            })
            .collect()
    }

    fn launch<T: Copy>(
        op: &Operator,
        dt: DigitLayout,
        d: usize,
        x: &[T],
        s: Option<&[T]>,
        b: Option<&[T]>,
        zero: T,
    ) -> Vec<T> {
        let n = x.len() / d;
        let mut y = vec![zero; n * d];
        op.launch(
            &args(
                dt,
                n,
                d,
                y.as_mut_ptr().cast(),
                x.as_ptr().cast(),
                s.map(|s| s.as_ptr().cast()),
                b.map(|b| b.as_ptr().cast()),
            ),
            &ThisThread,
        )
        .unwrap();
        y
    }

    fn to_f32(x: Vec<f64>) -> Vec<f32> {
        x.into_iter().map(|x| x as f32).collect()
    }

    fn to_f64(x: &[f32]) -> Vec<f64> {
        x.iter().map(|&x| x as f64).collect()
    }

    #[test]
    fn test_compute_f32() {
        let mut op: Operator = Operator::new(&Cpu);
        let n = 5;
        for d in [32, 96, 1184, 4096, 8192] {
            let x = to_f32(random(n * d));
            let s = to_f32(random(d));
            let b = to_f32(random(d));

            let args = args::<Cpu>(F32, n, d, null_mut(), null(), Some(null()), Some(null()));
            op.scheme(&args).unwrap();
            let y = launch(&op, F32, d, &x, Some(&s[..]), Some(&b[..]), 0.);

            let ans = reference(&to_f64(&x), d, Some(&to_f64(&s)[..]), Some(&to_f64(&b)[..]));
            let mut ec = ErrorCollector::new(1e-5, 1e-4);
            for (a, b) in ans.into_iter().zip(y) {
                ec.push(Diff::new(a, b as f64))
            }
            println!("d = {d}: {ec}");

            let (out, _) = ec.summary();
            assert_eq!(out, 0);
        }
    }

    #[test]
    fn test_compute_f16() {
        let op: Operator = Operator::new(&Cpu);
        let n = 7;
        for k in 5..=13 {
            let d = 1 << k;
            let x = random(n * d)
                .into_iter()
                .map(f16::from_f64)
                .collect::<Vec<_>>();
            let s = random(d).into_iter().map(f16::from_f64).collect::<Vec<_>>();
            let y = launch(&op, F16, d, &x, Some(&s[..]), None, f16::ZERO);

            let x = x.iter().map(|x| x.to_f64()).collect::<Vec<_>>();
            let s = s.iter().map(|x| x.to_f64()).collect::<Vec<_>>();
            let mut ec = ErrorCollector::new(f16::EPSILON.to_f64(), 1e-3);
            for (a, b) in reference(&x, d, Some(&s[..]), None).into_iter().zip(y) {
                ec.push(Diff::new(a, b.to_f64()))
            }
            println!("d = {d}: {ec}");

            let (out, count) = ec.summary();
            assert!(out * 1000 <= count);
        }
    }

    #[test]
    fn test_standardized_row() {
        let op: Operator = Operator::new(&Cpu);
        let d = 64;
        let x = (0..d)
            .map(|i| if i % 2 == 0 { 1.0f32 } else { -1. })
            .collect::<Vec<_>>();
        let y = launch(&op, F32, d, &x, None, None, 0.);
        for (x, y) in x.iter().zip(&y) {
            assert!((x - y).abs() < 1e-4);
        }
    }

    #[test]
    fn test_constant_row() {
        let op: Operator<1, 3> = Operator::new(&Cpu);
        let x = [2.0f32; 4];
        let mut y = [f32::NAN; 4];
        op.launch(
            &args(F32, 1, 4, y.as_mut_ptr().cast(), x.as_ptr().cast(), None, None),
            &ThisThread,
        )
        .unwrap();
        assert_eq!(y, [0.0f32; 4]);
    }

    #[test]
    fn test_absent_params() {
        let op: Operator = Operator::new(&Cpu);
        let (n, d) = (3, 256);
        let x = to_f32(random(n * d));
        let ones = vec![1.0f32; d];
        let zeros = vec![0.0f32; d];

        let plain = launch(&op, F32, d, &x, None, None, 0.);
        assert_eq!(launch(&op, F32, d, &x, Some(&ones[..]), None, 0.), plain);
        assert_eq!(launch(&op, F32, d, &x, None, Some(&zeros[..]), 0.), plain);
        assert_eq!(launch(&op, F32, d, &x, Some(&ones[..]), Some(&zeros[..]), 0.), plain);

        // 只提供偏置时，偏置只平移结果
        let shift = vec![3.0f32; d];
        let shifted = launch(&op, F32, d, &x, None, Some(&shift[..]), 0.);
        for (a, b) in plain.iter().zip(&shifted) {
            assert!((a + 3. - b).abs() < 1e-5);
        }

        let ans = reference(&to_f64(&x), d, None, None);
        for (a, b) in ans.into_iter().zip(plain) {
            assert!((a - b as f64).abs() < 1e-4);
        }
    }

    #[test]
    #[should_panic(expected = "exceeds scratch capacity")]
    fn test_capacity_launch() {
        let op: Operator = Operator::new(&Cpu);
        let d = crate::CAPACITY + 32;
        let x = vec![0.0f32; d];
        launch(&op, F32, d, &x, None, None, 0.);
    }

    #[test]
    fn test_validate() {
        let mut op: Operator = Operator::new(&Cpu);
        let mut scheme = |args: &Args<Cpu>| op.scheme(args).unwrap_err().kind;
        let args = |dt| args::<Cpu>(dt, 2, 64, null_mut(), null(), Some(null()), Some(null()));

        assert_eq!(scheme(&args(F64)), LaunchErrorKind::TypeNotSupport);

        let mut a = args(F16);
        a.bias = Some(Param {
            layout: TensorLayout::new_contiguous(F32, &[64]),
            base: null(),
        });
        assert_eq!(scheme(&a), LaunchErrorKind::TypeMismatch);

        let mut a = args(F16);
        a.scale = Some(Param {
            layout: TensorLayout::new_contiguous(F16, &[32]),
            base: null(),
        });
        assert_eq!(scheme(&a), LaunchErrorKind::ShapeMismatch);

        let mut a = args(F16);
        a.bias = Some(Param {
            layout: TensorLayout::new_contiguous(F16, &[1, 64]),
            base: null(),
        });
        assert_eq!(scheme(&a), LaunchErrorKind::RankNotSupport);

        let mut a = args(F16);
        a.scale = Some(Param {
            layout: TensorLayout::new(F16, &[64], &[4]),
            base: null(),
        });
        assert_eq!(scheme(&a), LaunchErrorKind::StridesNotSupport);

        // 缺省的参数不参与类型与形状检查
        let mut a = args(F16);
        a.scale = None;
        a.bias = None;
        a.x_layout = TensorLayout::new_contiguous(F16, &[2, 96]);
        assert_eq!(scheme(&a), LaunchErrorKind::ShapeMismatch);
        a.y_layout = TensorLayout::new_contiguous(F16, &[2, 96]);
        assert!(op.scheme(&a).is_ok());
    }
}
