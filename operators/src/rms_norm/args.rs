use crate::{
    utils::{contiguous, dim_distinct, rank_error, rows_disjoint, type_distinct, type_supported},
    ConstPtr, Hardware, LaunchError, MutPtr, TensorLayout,
};
use digit_layout::DigitLayout;

pub struct Args<H: Hardware> {
    pub y_layout: TensorLayout,
    pub y_base: MutPtr<H>,
    pub x_layout: TensorLayout,
    pub x_base: ConstPtr<H>,
    pub w_layout: TensorLayout,
    pub w_base: ConstPtr<H>,
    pub epsilon: f64,
}

pub(super) struct Meta {
    pub dt: DigitLayout,
    pub n: usize,
    pub d: usize,
    pub nsy: isize,
    pub nsx: isize,
}

impl<H: Hardware> Args<H> {
    pub(super) fn meta(&self) -> Result<Meta, LaunchError> {
        let Self {
            y_layout: y,
            x_layout: x,
            w_layout: w,
            ..
        } = self;

        let &[ny, dy] = y.shape() else {
            return Err(rank_error("y", 2, y.ndim()));
        };
        let &[nx, dx] = x.shape() else {
            return Err(rank_error("x", 2, x.ndim()));
        };
        let &[dw] = w.shape() else {
            return Err(rank_error("w", 1, w.ndim()));
        };

        let dt = type_supported(type_distinct(&[y.dt(), x.dt(), w.dt()])?)?;
        let n = dim_distinct(&[ny, nx])?;
        let d = dim_distinct(&[dy, dx, dw])?;

        let &[nsy, dsy] = y.strides() else {
            unreachable!()
        };
        let &[nsx, dsx] = x.strides() else {
            unreachable!()
        };
        let &[dsw] = w.strides() else {
            unreachable!()
        };
        let unit = dt.nbytes();
        contiguous("y", dsy, unit)?;
        contiguous("x", dsx, unit)?;
        contiguous("w", dsw, unit)?;
        rows_disjoint("y", n, nsy, d * unit)?;

        Ok(Meta { dt, n, d, nsy, nsx })
    }
}
