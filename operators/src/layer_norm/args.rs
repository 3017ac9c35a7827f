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
    /// 缩放，缺省时不缩放。
    pub scale: Option<Param<H>>,
    /// 偏置，缺省时不偏移。
    pub bias: Option<Param<H>>,
    pub epsilon: f64,
}

/// 沿隐藏维度广播到每一行的参数向量。
pub struct Param<H: Hardware> {
    pub layout: TensorLayout,
    pub base: ConstPtr<H>,
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
            scale,
            bias,
            ..
        } = self;

        let &[ny, dy] = y.shape() else {
            return Err(rank_error("y", 2, y.ndim()));
        };
        let &[nx, dx] = x.shape() else {
            return Err(rank_error("x", 2, x.ndim()));
        };

        let mut dts = vec![y.dt(), x.dt()];
        let mut ds = vec![dy, dx];
        let params = [("scale", scale), ("bias", bias)];
        for (name, param) in params {
            if let Some(Param { layout, .. }) = param {
                let &[d] = layout.shape() else {
                    return Err(rank_error(name, 1, layout.ndim()));
                };
                dts.push(layout.dt());
                ds.push(d);
            }
        }

        let dt = type_supported(type_distinct(&dts)?)?;
        let n = dim_distinct(&[ny, nx])?;
        let d = dim_distinct(&ds)?;

        let &[nsy, dsy] = y.strides() else {
            unreachable!()
        };
        let &[nsx, dsx] = x.strides() else {
            unreachable!()
        };
        let unit = dt.nbytes();
        contiguous("y", dsy, unit)?;
        contiguous("x", dsx, unit)?;
        for (name, param) in params {
            if let Some(Param { layout, .. }) = param {
                let &[ds] = layout.strides() else {
                    unreachable!()
                };
                contiguous(name, ds, unit)?;
            }
        }
        rows_disjoint("y", n, nsy, d * unit)?;

        Ok(Meta { dt, n, d, nsy, nsx })
    }
}
