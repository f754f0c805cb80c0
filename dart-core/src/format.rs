/// Device-side memory layout of a tensor's elements. Most tensors use `Default`/`Nd`
/// (row-major); the fractal/blocked formats exist for kernel libraries (e.g. Ascend-style NPUs)
/// that prefer tiled layouts for specific ops. The core never interprets these beyond passing
/// them through to the kernel library.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum MemoryFormat {
    #[default]
    DefaultFormat,
    Nd,
    FractalNz,
    Nc1Hwc0,
    FractalZ,
}
