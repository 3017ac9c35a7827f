mod common;
mod handle;
mod kernel;

pub mod layer_norm;
pub mod rms_norm;

pub use common::*;
pub use kernel::{Element, Grid, GroupKernel, GroupQueue, Partition, Slm, CAPACITY};

#[cfg(any(use_cpu, test))]
pub use handle::common_cpu;

/// 算力硬件抽象。
///
/// 约定硬件如何存储和运行。
/// 这个特质应该由管理硬件的基本单元的映射类型实现，通常是**硬件上下文**。
pub trait Hardware {
    /// 硬件的存储单元类型。
    type Byte;
    /// 硬件的任务队列类型。
    type Queue<'ctx>;
}

pub type ByteOf<H> = <H as Hardware>::Byte;
pub type QueueOf<'ctx, H> = <H as Hardware>::Queue<'ctx>;
pub type ArgsOf<O> = <O as Operator>::Args;
pub(crate) type MutPtr<H> = *mut <H as Hardware>::Byte;
pub(crate) type ConstPtr<H> = *const <H as Hardware>::Byte;

/// 算子。
pub trait Operator {
    /// 执行算子的硬件。
    type Hardware: Hardware;
    /// 算子的参数类型。
    type Args;

    /// 在指定硬件上创建算子实例。
    fn new(node: &Self::Hardware) -> Self;

    /// 规划执行方案。
    ///
    /// 检查参数并缓存执行方案，使同一个形状的后续发射不必重复规划。
    /// 违反暂存区容量或分块约定的参数在这里以错误形式报告。
    fn scheme(&mut self, args: &Self::Args) -> Result<(), SchemeError>;

    /// 发射算子到任务队列。
    ///
    /// 参数检查在提交之前同步完成；一旦提交，算子内部不再报告错误。
    fn launch(&self, args: &Self::Args, queue: &QueueOf<Self::Hardware>)
        -> Result<(), LaunchError>;
}

macro_rules! op_trait {
    ($name:ident $($body:item)*) => {
        pub trait $name<H: $crate::Hardware>:
            $crate::Operator<
            Hardware = H,
            Args = Args<H>,
        >{$($body)*}
    };
}

pub(crate) use op_trait;
