use std::fmt;

use bytemuck::{Pod, Zeroable};
use serde::Serialize;

/// Number of independently blended colour attachments.
pub const MAX_DRAW_BUFFERS: usize = 16;

/// RGBA colour.
pub type Color4 = [f32; 4];

/// Integer rectangle spanning `[x0, x1) x [y0, y1)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct Rect2D {
    pub x0: i32,
    pub y0: i32,
    pub x1: i32,
    pub y1: i32,
}

impl Rect2D {
    /// Clip rectangle that never clips.
    pub const INFINITE: Rect2D = Rect2D {
        x0: i32::MIN / 2,
        y0: i32::MIN / 2,
        x1: i32::MAX / 2,
        y1: i32::MAX / 2,
    };

    pub const fn new(x0: i32, y0: i32, x1: i32, y1: i32) -> Self {
        Self { x0, y0, x1, y1 }
    }

    pub fn from_size(width: u32, height: u32) -> Self {
        Self::new(0, 0, width as i32, height as i32)
    }

    pub fn width(&self) -> i32 {
        self.x1 - self.x0
    }

    pub fn height(&self) -> i32 {
        self.y1 - self.y0
    }

    /// Mirrors the rectangle vertically inside a target `height` pixels tall.
    pub fn flipped(&self, height: i32) -> Self {
        Self::new(self.x0, height - self.y1, self.x1, height - self.y0)
    }
}

/// Column-major 4x4 matrix.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable, Serialize)]
pub struct Mat4 {
    pub cols: [[f32; 4]; 4],
}

impl Mat4 {
    pub const IDENTITY: Mat4 = Mat4 {
        cols: [
            [1.0, 0.0, 0.0, 0.0],
            [0.0, 1.0, 0.0, 0.0],
            [0.0, 0.0, 1.0, 0.0],
            [0.0, 0.0, 0.0, 1.0],
        ],
    };

    pub const fn from_cols(cols: [[f32; 4]; 4]) -> Self {
        Self { cols }
    }

    pub fn diagonal(x: f32, y: f32, z: f32, w: f32) -> Self {
        let mut m = Self::zeroed();
        m.cols[0][0] = x;
        m.cols[1][1] = y;
        m.cols[2][2] = z;
        m.cols[3][3] = w;
        m
    }

    pub fn translation(x: f32, y: f32, z: f32) -> Self {
        let mut m = Self::IDENTITY;
        m.cols[3] = [x, y, z, 1.0];
        m
    }

    /// Element at `row`, `col`.
    pub fn get(&self, row: usize, col: usize) -> f32 {
        self.cols[col][row]
    }

    pub fn mul(&self, rhs: &Mat4) -> Mat4 {
        let mut out = Mat4::zeroed();
        for col in 0..4 {
            for row in 0..4 {
                out.cols[col][row] = (0..4).map(|k| self.get(row, k) * rhs.get(k, col)).sum();
            }
        }
        out
    }

    /// Inverse of a rigid or affine transform (upper 3x3 plus translation).
    ///
    /// Returns `None` when the linear part is singular.
    pub fn affine_inverse(&self) -> Option<Mat4> {
        let a = |r: usize, c: usize| self.get(r, c);
        let det = a(0, 0) * (a(1, 1) * a(2, 2) - a(1, 2) * a(2, 1))
            - a(0, 1) * (a(1, 0) * a(2, 2) - a(1, 2) * a(2, 0))
            + a(0, 2) * (a(1, 0) * a(2, 1) - a(1, 1) * a(2, 0));
        if det.abs() <= f32::EPSILON {
            return None;
        }
        let inv_det = 1.0 / det;

        let mut inv = [[0.0f32; 3]; 3];
        inv[0][0] = (a(1, 1) * a(2, 2) - a(1, 2) * a(2, 1)) * inv_det;
        inv[0][1] = (a(0, 2) * a(2, 1) - a(0, 1) * a(2, 2)) * inv_det;
        inv[0][2] = (a(0, 1) * a(1, 2) - a(0, 2) * a(1, 1)) * inv_det;
        inv[1][0] = (a(1, 2) * a(2, 0) - a(1, 0) * a(2, 2)) * inv_det;
        inv[1][1] = (a(0, 0) * a(2, 2) - a(0, 2) * a(2, 0)) * inv_det;
        inv[1][2] = (a(0, 2) * a(1, 0) - a(0, 0) * a(1, 2)) * inv_det;
        inv[2][0] = (a(1, 0) * a(2, 1) - a(1, 1) * a(2, 0)) * inv_det;
        inv[2][1] = (a(0, 1) * a(2, 0) - a(0, 0) * a(2, 1)) * inv_det;
        inv[2][2] = (a(0, 0) * a(1, 1) - a(0, 1) * a(1, 0)) * inv_det;

        let t = [a(0, 3), a(1, 3), a(2, 3)];
        let mut out = Mat4::IDENTITY;
        for row in 0..3 {
            for col in 0..3 {
                out.cols[col][row] = inv[row][col];
            }
            out.cols[3][row] = -(0..3).map(|k| inv[row][k] * t[k]).sum::<f32>();
        }
        Some(out)
    }

    pub fn as_array(&self) -> &[f32; 16] {
        bytemuck::cast_ref(self)
    }
}

impl Default for Mat4 {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// Depth comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum DepthTest {
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    Equal,
    NotEqual,
    AlwaysPass,
    NeverPass,
}

/// Stencil comparison against the reference value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum StencilTest {
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    Equal,
    NotEqual,
    AlwaysPass,
    NeverPass,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum StencilOp {
    Keep,
    Zero,
    Replace,
    Invert,
    Increment,
    Decrement,
    IncrementWrap,
    DecrementWrap,
}

/// Fail, depth-fail and pass operations for one face.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct StencilOps {
    pub fail: StencilOp,
    pub zfail: StencilOp,
    pub zpass: StencilOp,
}

impl StencilOps {
    pub const KEEP: StencilOps = StencilOps {
        fail: StencilOp::Keep,
        zfail: StencilOp::Keep,
        zpass: StencilOp::Keep,
    };

    pub const fn new(fail: StencilOp, zfail: StencilOp, zpass: StencilOp) -> Self {
        Self { fail, zfail, zpass }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum BlendFunc {
    Zero,
    One,
    SrcColor,
    OneMinusSrcColor,
    DstColor,
    OneMinusDstColor,
    SrcAlpha,
    OneMinusSrcAlpha,
    DstAlpha,
    OneMinusDstAlpha,
    SrcAlphaSaturate,
    ConstantColor,
    OneMinusConstantColor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum BlendEq {
    Add,
    Subtract,
    ReverseSubtract,
    Min,
    Max,
}

/// Blend configuration of one draw buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct BlendState {
    pub src_rgb: BlendFunc,
    pub dst_rgb: BlendFunc,
    pub eq_rgb: BlendEq,
    pub src_alpha: BlendFunc,
    pub dst_alpha: BlendFunc,
    pub eq_alpha: BlendEq,
}

impl BlendState {
    /// `One/Zero/Add`, equivalent to blending being disabled.
    pub const DISABLED: BlendState = BlendState::uniform(BlendFunc::One, BlendFunc::Zero, BlendEq::Add);

    pub const ALPHA: BlendState =
        BlendState::uniform(BlendFunc::SrcAlpha, BlendFunc::OneMinusSrcAlpha, BlendEq::Add);

    /// Same function and equation for colour and alpha.
    pub const fn uniform(src: BlendFunc, dst: BlendFunc, eq: BlendEq) -> Self {
        Self {
            src_rgb: src,
            dst_rgb: dst,
            eq_rgb: eq,
            src_alpha: src,
            dst_alpha: dst,
            eq_alpha: eq,
        }
    }

    pub fn is_disabled(&self) -> bool {
        *self == Self::DISABLED
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum LogicOp {
    Clear,
    Set,
    Copy,
    CopyInverted,
    Noop,
    Invert,
    And,
    Nand,
    Or,
    Nor,
    Xor,
    Equiv,
    AndReverse,
    AndInverted,
    OrReverse,
    OrInverted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum CullFace {
    None,
    Front,
    Back,
    FrontAndBack,
}

impl CullFace {
    /// Front and back exchanged.
    pub fn swapped(self) -> Self {
        match self {
            CullFace::Front => CullFace::Back,
            CullFace::Back => CullFace::Front,
            other => other,
        }
    }
}

/// Polygon face selector for per-face state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Face {
    Front,
    Back,
}

impl Face {
    pub fn swapped(self) -> Self {
        match self {
            Face::Front => Face::Back,
            Face::Back => Face::Front,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum RenderMode {
    Solid,
    Wireframe,
    Points,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ShadeMode {
    Flat,
    Smooth,
}

/// Buffer selected for drawing or reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum DrawBuffer {
    None,
    Front,
    Back,
    Color(u8),
}

/// Which framebuffer binding point a call targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum FramebufferTarget {
    Draw,
    Read,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum TextureFormat {
    R8,
    Rgba8,
    Srgba8,
    Rgba16F,
    Rgba32F,
    R32F,
    Depth16,
    Depth24,
    Depth32F,
    Stencil8,
    Depth24Stencil8,
    Depth32FStencil8,
}

impl TextureFormat {
    pub fn has_depth(self) -> bool {
        matches!(
            self,
            TextureFormat::Depth16
                | TextureFormat::Depth24
                | TextureFormat::Depth32F
                | TextureFormat::Depth24Stencil8
                | TextureFormat::Depth32FStencil8
        )
    }

    pub fn has_stencil(self) -> bool {
        matches!(
            self,
            TextureFormat::Stencil8 | TextureFormat::Depth24Stencil8 | TextureFormat::Depth32FStencil8
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum TextureDimension {
    D2,
    D2Array,
    D3,
    Cube,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct TextureId(pub u32);

impl fmt::Display for TextureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "texture#{}", self.0)
    }
}

/// Description of a texture owned by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct TextureRef {
    pub id: TextureId,
    pub dimension: TextureDimension,
    pub format: TextureFormat,
    pub width: u32,
    pub height: u32,
    pub layers: u32,
    pub samples: u32,
}

impl TextureRef {
    pub fn new_2d(id: u32, format: TextureFormat, width: u32, height: u32) -> Self {
        Self {
            id: TextureId(id),
            dimension: TextureDimension::D2,
            format,
            width,
            height,
            layers: 1,
            samples: 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum CubeFace {
    PositiveX,
    NegativeX,
    PositiveY,
    NegativeY,
    PositiveZ,
    NegativeZ,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum PrimitiveType {
    Points,
    Lines,
    LineStrip,
    Triangles,
    TriangleStrip,
    TriangleFan,
}

impl PrimitiveType {
    /// Primitives assembled from `vertices` vertices.
    pub fn primitive_count(self, vertices: u32) -> u64 {
        let v = u64::from(vertices);
        match self {
            PrimitiveType::Points => v,
            PrimitiveType::Lines => v / 2,
            PrimitiveType::LineStrip => v.saturating_sub(1),
            PrimitiveType::Triangles => v / 3,
            PrimitiveType::TriangleStrip | PrimitiveType::TriangleFan => v.saturating_sub(2),
        }
    }
}
