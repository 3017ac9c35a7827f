use crate::{
    kernel::{Element, Grid, GroupKernel, GroupQueue, Slm},
    layer_norm, rms_norm, shape_mismatch, shape_not_support, Hardware, LaunchError,
    TensorLayout,
};
use rayon::iter::{IntoParallelIterator, ParallelIterator};

#[derive(Clone, Copy, Debug)]
pub struct Cpu;

/// 提交即完成的任务队列。
///
/// 各组分发到 rayon 线程池上并行执行，组内线程按阶段锁步执行：
/// 一个阶段的所有线程完成之后才进入下一阶段，阶段之间即为组内同步。
#[derive(Clone, Copy, Debug)]
pub struct ThisThread;

impl Hardware for Cpu {
    type Byte = u8;
    type Queue<'ctx> = ThisThread;
}

impl GroupQueue for ThisThread {
    fn submit<K: GroupKernel>(&self, grid: Grid, kernel: &K) {
        let Grid { groups, lanes } = grid;
        (0..groups).into_par_iter().for_each_init(
            || Slm::new(K::SLOT_SETS, lanes),
            |slm, group| {
                slm.reset();
                for stage in 0..K::STAGES {
                    if stage > 0 {
                        slm.barrier()
                    }
                    for lane in 0..lanes {
                        kernel.stage(stage, group, lane, slm)
                    }
                }
            },
        )
    }
}

/// 对 `x` 的每一行做 RMS 归一化，`w` 的长度即隐藏维度。
pub fn rms_norm<T: Element>(x: &[T], w: &[T], epsilon: f64) -> Result<Vec<T>, LaunchError> {
    let d = w.len();
    let n = rows(x.len(), d)?;
    let mut y = vec![T::default(); x.len()];

    let op: rms_norm::common_cpu::Operator = crate::Operator::new(&Cpu);
    let args = rms_norm::Args::<Cpu> {
        y_layout: TensorLayout::new_contiguous(T::LAYOUT, &[n, d]),
        y_base: y.as_mut_ptr().cast(),
        x_layout: TensorLayout::new_contiguous(T::LAYOUT, &[n, d]),
        x_base: x.as_ptr().cast(),
        w_layout: TensorLayout::new_contiguous(T::LAYOUT, &[d]),
        w_base: w.as_ptr().cast(),
        epsilon,
    };
    crate::Operator::launch(&op, &args, &ThisThread)?;
    Ok(y)
}

/// 对 `x` 的每一行做层归一化，缩放和偏置都是可选的。
pub fn layer_norm<T: Element>(
    x: &[T],
    d: usize,
    scale: Option<&[T]>,
    bias: Option<&[T]>,
    epsilon: f64,
) -> Result<Vec<T>, LaunchError> {
    let n = rows(x.len(), d)?;
    let mut y = vec![T::default(); x.len()];

    let param = |v: &[T]| layer_norm::Param::<Cpu> {
        layout: TensorLayout::new_contiguous(T::LAYOUT, &[v.len()]),
        base: v.as_ptr().cast(),
    };
    let op: layer_norm::common_cpu::Operator = crate::Operator::new(&Cpu);
    let args = layer_norm::Args::<Cpu> {
        y_layout: TensorLayout::new_contiguous(T::LAYOUT, &[n, d]),
        y_base: y.as_mut_ptr().cast(),
        x_layout: TensorLayout::new_contiguous(T::LAYOUT, &[n, d]),
        x_base: x.as_ptr().cast(),
        scale: scale.map(param),
        bias: bias.map(param),
        epsilon,
    };
    crate::Operator::launch(&op, &args, &ThisThread)?;
    Ok(y)
}

fn rows(len: usize, d: usize) -> Result<usize, LaunchError> {
    if d == 0 {
        return Err(shape_not_support("hidden size must be positive"));
    }
    if len % d != 0 {
        return Err(shape_mismatch(format!(
            "{len} elements cannot be split into rows of {d}"
        )));
    }
    Ok(len / d)
}
