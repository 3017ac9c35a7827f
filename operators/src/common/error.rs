use std::{error::Error, fmt};

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum LaunchErrorKind {
    TypeNotSupport,
    TypeMismatch,
    RankNotSupport,
    ShapeNotSupport,
    ShapeMismatch,
    StridesNotSupport,
}

#[derive(Clone, Debug)]
pub struct LaunchError {
    pub kind: LaunchErrorKind,
    pub info: String,
}

/// 规划阶段与发射阶段共用同一套错误。
pub type SchemeError = LaunchError;

impl fmt::Display for LaunchError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.info)
    }
}

impl Error for LaunchError {}

pub(super) mod functions {
    use super::{LaunchError, LaunchErrorKind::*};

    macro_rules! builder {
        ($ty:ident: $name:ident $kind:expr) => {
            #[inline]
            pub fn $name(info: impl Into<String>) -> $ty {
                $ty {
                    kind: $kind,
                    info: info.into(),
                }
            }
        };
    }

    builder!(LaunchError: type_not_support    TypeNotSupport   );
    builder!(LaunchError: type_mismatch       TypeMismatch     );
    builder!(LaunchError: rank_not_support    RankNotSupport   );
    builder!(LaunchError: shape_not_support   ShapeNotSupport  );
    builder!(LaunchError: shape_mismatch      ShapeMismatch    );
    builder!(LaunchError: strides_not_support StridesNotSupport);
}
