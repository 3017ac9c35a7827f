mod diversity;
mod error;
mod tensor;

pub use diversity::{SchemeCacheSize, SchemeDiversity};
pub use error::{functions::*, LaunchError, LaunchErrorKind, SchemeError};
pub use tensor::TensorLayout;

pub(crate) mod utils {
    use super::{
        rank_not_support, shape_mismatch, strides_not_support, type_mismatch, type_not_support,
        LaunchError,
    };
    use digit_layout::{types as ty, DigitLayout};

    #[inline]
    pub(crate) fn type_distinct(pairs: &[DigitLayout]) -> Result<DigitLayout, LaunchError> {
        let [dt, tail @ ..] = pairs else {
            unreachable!("pairs empty");
        };
        if tail.iter().all(|it| it == dt) {
            Ok(*dt)
        } else {
            Err(type_mismatch(format!("{pairs:?} are not distinct")))
        }
    }

    /// 归一化算子只支持 32 位和 16 位浮点。
    #[inline]
    pub(crate) fn type_supported(dt: DigitLayout) -> Result<DigitLayout, LaunchError> {
        match dt {
            ty::F32 | ty::F16 => Ok(dt),
            _ => Err(type_not_support(format!(
                "{dt:?} not supported, only f32 and f16 are supported"
            ))),
        }
    }

    #[inline]
    pub(crate) fn rank_error(arg: &str, expected: usize, actual: usize) -> LaunchError {
        rank_not_support(format!("{arg}.ndim = {actual}, {expected} expected"))
    }

    #[inline]
    pub(crate) fn dim_distinct(args: &[usize]) -> Result<usize, LaunchError> {
        let (&ans, others) = args.split_first().unwrap();
        if others.iter().all(|&x| x == ans) {
            Ok(ans)
        } else {
            Err(shape_mismatch(format!("{args:?} are not distinct")))
        }
    }

    /// 检查行内元素连续。
    #[inline]
    pub(crate) fn contiguous(arg: &str, stride: isize, unit: usize) -> Result<(), LaunchError> {
        if stride == unit as isize {
            Ok(())
        } else {
            Err(strides_not_support(format!(
                "{arg} elements must be contiguous, stride = {stride}, {unit} expected"
            )))
        }
    }

    /// 检查输出的各行互不重叠，这样每组只写自己的行。
    #[inline]
    pub(crate) fn rows_disjoint(
        arg: &str,
        n: usize,
        stride: isize,
        row_bytes: usize,
    ) -> Result<(), LaunchError> {
        if n <= 1 || stride.unsigned_abs() >= row_bytes {
            Ok(())
        } else {
            Err(strides_not_support(format!(
                "{arg} rows overlap, stride = {stride}, row size = {row_bytes}"
            )))
        }
    }
}
