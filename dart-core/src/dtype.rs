use std::fmt::Display;

/// Element type of a tensor. `Unknown` is the dtype of a freshly created op-node output before
/// shape/dtype inference has run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Dtype {
    Unknown,
    F32,
    F64,
    I8,
    I16,
    I32,
    I64,
    U8,
    Bool,
}

impl Dtype {
    /// Size in bytes of a single element. `Unknown` has no defined size; callers that need it
    /// (shape inference, byte-size computation) must have already resolved the dtype.
    pub fn size(self) -> usize {
        match self {
            Dtype::Unknown => 0,
            Dtype::F32 | Dtype::I32 => 4,
            Dtype::F64 | Dtype::I64 => 8,
            Dtype::I8 | Dtype::U8 | Dtype::Bool => 1,
            Dtype::I16 => 2,
        }
    }
}

impl Display for Dtype {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Dtype::Unknown => "unknown",
            Dtype::F32 => "f32",
            Dtype::F64 => "f64",
            Dtype::I8 => "i8",
            Dtype::I16 => "i16",
            Dtype::I32 => "i32",
            Dtype::I64 => "i64",
            Dtype::U8 => "u8",
            Dtype::Bool => "bool",
        };
        write!(f, "{name}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sizes_match_element_width() {
        assert_eq!(Dtype::F32.size(), 4);
        assert_eq!(Dtype::F64.size(), 8);
        assert_eq!(Dtype::Bool.size(), 1);
        assert_eq!(Dtype::Unknown.size(), 0);
    }
}
