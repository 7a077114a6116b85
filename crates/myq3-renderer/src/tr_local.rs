// tr_local.rs — renderer-local types shared by the image and light modules.

use bitflags::bitflags;
use myq3_common::q_shared::{Frustum, Mat4, CPlane, MATRIX_IDENTITY};
use thiserror::Error;

use crate::device::{BufferHandle, TexNum, TextureFilter};

// ============================================================
// Limits
// ============================================================

pub const IMAGE_FILE_HASH_SIZE: usize = 1024;
/// Image names longer than this abort the load.
pub const MAX_IMAGE_NAME: usize = 1024;

pub const FOG_TABLE_SIZE: usize = 256;

pub const DEFAULT_SIZE: usize = 128;
pub const MINIMAGE_SIZE: usize = 8;
pub const ATTENUATION_XY_SIZE: usize = 128;
pub const REF_CUBEMAP_SIZE: usize = 32;
pub const REF_COLORGRADEMAP_SIZE: usize = 16;
pub const MAX_SCRATCH_IMAGES: usize = 32;

// ============================================================
// Image content flags
// ============================================================

bitflags! {
    /// Content semantics of an image, set by callers and adjusted by the
    /// image program operators.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ImageBits: u32 {
        const NOPICMIP                 = 1 << 0;
        const NOCOMPRESSION            = 1 << 1;
        const ALPHA                    = 1 << 2;
        const DEPTH16                  = 1 << 3;
        const DEPTH24                  = 1 << 4;
        const DEPTH32                  = 1 << 5;
        const PACKED_DEPTH24_STENCIL8  = 1 << 6;
        const NORMALMAP                = 1 << 7;
        const RGBA16F                  = 1 << 8;
        const RGBA32F                  = 1 << 9;
        const TWOCOMP16F               = 1 << 10;
        const TWOCOMP32F               = 1 << 11;
        const ONECOMP16F               = 1 << 12;
        const ONECOMP32F               = 1 << 13;
        const RGBA16                   = 1 << 14;
        const RGBE                     = 1 << 15;
        const LIGHTMAP                 = 1 << 16;
        const ALPHATEST                = 1 << 17;
        const DISPLACEMAP              = 1 << 18;
        const NOLIGHTSCALE             = 1 << 19;
    }
}

impl ImageBits {
    pub fn any_depth(&self) -> bool {
        self.intersects(ImageBits::DEPTH16 | ImageBits::DEPTH24 | ImageBits::DEPTH32)
    }

    pub fn any_float(&self) -> bool {
        self.intersects(
            ImageBits::RGBA16F
                | ImageBits::RGBA32F
                | ImageBits::RGBA16
                | ImageBits::TWOCOMP16F
                | ImageBits::TWOCOMP32F
                | ImageBits::ONECOMP16F
                | ImageBits::ONECOMP32F,
        )
    }
}

// ============================================================
// Filter / wrap / type enums
// ============================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterType {
    /// Mipmapped, honors the global texture mode and anisotropy.
    Default,
    Linear,
    Nearest,
    /// Mipmapped cube/equirect images carrying the PBR specular chain.
    CubeMip,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WrapType {
    Repeat,
    Clamp,
    EdgeClamp,
    /// Clamp to an opaque white border.
    OneClamp,
    /// Clamp to an opaque black border.
    ZeroClamp,
    /// Clamp to a transparent black border.
    AlphaZeroClamp,
}

impl WrapType {
    pub fn needs_border(&self) -> bool {
        matches!(
            self,
            WrapType::OneClamp | WrapType::ZeroClamp | WrapType::AlphaZeroClamp
        )
    }
}

/// Per-axis wrap selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WrapMode {
    pub s: WrapType,
    pub t: WrapType,
}

impl From<WrapType> for WrapMode {
    fn from(w: WrapType) -> Self {
        Self { s: w, t: w }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextureType {
    TwoD,
    CubeMap,
    ThreeD,
}

/// GPU storage format chosen by the upload engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InternalFormat {
    Rgb8,
    Rgba8,
    Alpha8,
    Rgba16,
    Rgba16F,
    Rgba32F,
    Rg16F,
    Rg32F,
    R16F,
    R32F,
    Alpha16F,
    Alpha32F,
    LuminanceAlpha16F,
    LuminanceAlpha32F,
    CompressedRgbDxt1,
    CompressedRgbaDxt1,
    CompressedRgbaDxt3,
    CompressedRgbaDxt5,
    Depth16,
    Depth24,
    Depth32,
    Depth24Stencil8,
}

impl InternalFormat {
    /// Approximate storage cost per texel, used by the image listing.
    pub fn bytes_per_texel(&self) -> f32 {
        match self {
            InternalFormat::Rgb8 => 3.0,
            InternalFormat::Rgba8 => 4.0,
            InternalFormat::Alpha8 => 1.0,
            InternalFormat::Rgba16 => 8.0,
            InternalFormat::Rgba16F => 8.0,
            InternalFormat::Rgba32F => 16.0,
            InternalFormat::Rg16F => 4.0,
            InternalFormat::Rg32F => 8.0,
            InternalFormat::R16F => 2.0,
            InternalFormat::R32F => 4.0,
            InternalFormat::Alpha16F => 2.0,
            InternalFormat::Alpha32F => 4.0,
            InternalFormat::LuminanceAlpha16F => 4.0,
            InternalFormat::LuminanceAlpha32F => 8.0,
            InternalFormat::CompressedRgbDxt1 => 0.5,
            InternalFormat::CompressedRgbaDxt1 => 0.5,
            InternalFormat::CompressedRgbaDxt3 => 1.0,
            InternalFormat::CompressedRgbaDxt5 => 1.0,
            InternalFormat::Depth16 => 2.0,
            InternalFormat::Depth24 => 3.0,
            InternalFormat::Depth32 => 4.0,
            InternalFormat::Depth24Stencil8 => 4.0,
        }
    }

    pub fn is_depth(&self) -> bool {
        matches!(
            self,
            InternalFormat::Depth16
                | InternalFormat::Depth24
                | InternalFormat::Depth32
                | InternalFormat::Depth24Stencil8
        )
    }
}

// ============================================================
// Shadow modes
// ============================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ShadowMode {
    None,
    Blob,
    Esm16,
    Esm32,
    Vsm16,
    Vsm32,
    Evsm32,
}

impl ShadowMode {
    /// Shadow mapping active at all.
    pub fn shadow_mapping(&self) -> bool {
        *self >= ShadowMode::Esm16
    }
}

// ============================================================
// Render configuration
// ============================================================

/// Snapshot of the renderer tunables, taken once at startup.
#[derive(Debug, Clone)]
pub struct RenderConfig {
    // texture pipeline
    pub picmip: i32,
    pub round_images_down: bool,
    pub color_mip_levels: bool,
    pub simple_mipmaps: bool,
    pub gamma: f32,
    pub intensity: f32,
    pub overbright_bits: i32,
    pub map_overbright_bits: i32,
    pub texture_compression: bool,
    pub texture_anisotropy: f32,
    pub fullscreen: bool,
    pub color_bits: i32,

    // lights
    pub shadows: ShadowMode,
    pub no_shadow_pyramids: bool,
    pub shadow_lod_scale: f32,
    pub shadow_lod_bias: i32,
    pub no_light_frustums: bool,
    pub no_light_scissors: bool,
    pub no_interaction_sort: bool,
    /// Compute per-light scissors (skipped when hundreds of lights survive
    /// the PVS and the scissor cost outweighs the fill savings).
    pub dynamic_light_scissors: bool,
    pub no_cull: bool,

    // light grid
    pub force_ambient: f32,
    pub light_grid_mul_ambient: f32,
    pub light_grid_mul_directed: f32,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            picmip: 0,
            round_images_down: false,
            color_mip_levels: false,
            simple_mipmaps: true,
            gamma: 1.0,
            intensity: 1.0,
            overbright_bits: 1,
            map_overbright_bits: 2,
            texture_compression: false,
            texture_anisotropy: 1.0,
            fullscreen: false,
            color_bits: 24,

            shadows: ShadowMode::None,
            no_shadow_pyramids: false,
            shadow_lod_scale: 1.0,
            shadow_lod_bias: 0,
            no_light_frustums: false,
            no_light_scissors: false,
            no_interaction_sort: false,
            dynamic_light_scissors: true,
            no_cull: false,

            force_ambient: 0.0,
            light_grid_mul_ambient: 0.0,
            light_grid_mul_directed: 0.0,
        }
    }
}

// ============================================================
// View parameters
// ============================================================

/// Everything the light engine needs to know about the current view.
#[derive(Debug, Clone)]
pub struct ViewParms {
    pub viewport_x: i32,
    pub viewport_y: i32,
    pub viewport_width: i32,
    pub viewport_height: i32,
    pub view_matrix: Mat4,
    pub projection_matrix: Mat4,
    /// World-space view frustum, planes pointing inward.
    pub frustum: Frustum,
}

impl Default for ViewParms {
    fn default() -> Self {
        Self {
            viewport_x: 0,
            viewport_y: 0,
            viewport_width: 640,
            viewport_height: 480,
            view_matrix: MATRIX_IDENTITY,
            projection_matrix: MATRIX_IDENTITY,
            frustum: [CPlane::default(); 6],
        }
    }
}

/// Screen-space rectangle as (x1, y1, x2, y2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ScissorRect {
    pub coords: [i32; 4],
}

impl ScissorRect {
    pub fn width(&self) -> i32 {
        self.coords[2] - self.coords[0]
    }

    pub fn height(&self) -> i32 {
        self.coords[3] - self.coords[1]
    }
}

// ============================================================
// Performance counters
// ============================================================

#[derive(Debug, Clone, Copy, Default)]
pub struct PerfCounters {
    pub c_dlight_surfaces: u32,
    pub c_dlight_surfaces_culled: u32,
    pub c_slight_interactions: u32,
    pub c_dlight_interactions: u32,
    pub c_pyramid_tests: u32,
    pub c_pyramid_cull_ent_in: u32,
    pub c_pyramid_cull_ent_clip: u32,
    pub c_pyramid_cull_ent_out: u32,
}

// ============================================================
// Registry record
// ============================================================

/// Opaque handle into the image registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageHandle(pub usize);

/// A persistent GPU texture. Created on first resolve, destroyed only at
/// registry teardown.
#[derive(Debug, Clone)]
pub struct Image {
    pub name: String,
    pub ttype: TextureType,
    pub bits: ImageBits,
    pub filter_type: FilterType,
    pub wrap: WrapMode,
    /// Source dimensions as decoded.
    pub width: i32,
    pub height: i32,
    /// Dimensions actually uploaded after pow2/picmip/clamp adjustments.
    pub upload_width: i32,
    pub upload_height: i32,
    pub internal_format: InternalFormat,
    pub texnum: TexNum,
    pub frame_used: i32,
    /// Next image in the same hash bucket, -1 terminates the chain.
    pub next_hash: i32,
}

// ============================================================
// Builtin image handles
// ============================================================

#[derive(Debug, Clone, Default)]
pub struct BuiltinImages {
    pub default_image: Option<ImageHandle>,
    pub white_image: Option<ImageHandle>,
    pub black_image: Option<ImageHandle>,
    pub grey_image: Option<ImageHandle>,
    pub red_image: Option<ImageHandle>,
    pub green_image: Option<ImageHandle>,
    pub blue_image: Option<ImageHandle>,
    pub flat_image: Option<ImageHandle>,
    pub quadratic_image: Option<ImageHandle>,
    pub random_normals_image: Option<ImageHandle>,
    pub fog_image: Option<ImageHandle>,
    pub no_falloff_image: Option<ImageHandle>,
    pub attenuation_xy_image: Option<ImageHandle>,
    pub scratch_images: Vec<ImageHandle>,
    pub black_cube_image: Option<ImageHandle>,
    pub white_cube_image: Option<ImageHandle>,
    pub auto_cube_image: Option<ImageHandle>,
    pub color_grade_image: Option<ImageHandle>,
    pub brdf_lut_image: Option<ImageHandle>,
}

// ============================================================
// Render context
// ============================================================

/// Renderer state, constructed at init and passed explicitly to every
/// subsystem entry point. Torn down only at shutdown, never partially
/// reset.
pub struct RenderContext {
    pub config: RenderConfig,

    // brightness translation tables
    pub gamma_table: [u8; 256],
    pub intensity_table: [u8; 256],
    pub identity_light: f32,
    pub overbright_bits: i32,
    pub map_overbright_bits: i32,

    pub fog_table: [f32; FOG_TABLE_SIZE],

    // image registry
    pub images: Vec<Image>,
    pub image_hash_table: [i32; IMAGE_FILE_HASH_SIZE],
    pub builtins: BuiltinImages,

    // current global filter mode for FilterType::Default textures
    pub filter_min: TextureFilter,
    pub filter_max: TextureFilter,

    pub frame_count: i32,
    pub pc: PerfCounters,
}

impl RenderContext {
    pub fn new(config: RenderConfig) -> Self {
        Self {
            config,
            gamma_table: [0; 256],
            intensity_table: [0; 256],
            identity_light: 1.0,
            overbright_bits: 0,
            map_overbright_bits: 0,
            fog_table: [0.0; FOG_TABLE_SIZE],
            images: Vec::new(),
            image_hash_table: [-1; IMAGE_FILE_HASH_SIZE],
            builtins: BuiltinImages::default(),
            filter_min: TextureFilter::LinearMipmapNearest,
            filter_max: TextureFilter::Linear,
            frame_count: 0,
            pc: PerfCounters::default(),
        }
    }

    pub fn image(&self, handle: ImageHandle) -> &Image {
        &self.images[handle.0]
    }

    pub fn image_mut(&mut self, handle: ImageHandle) -> &mut Image {
        &mut self.images[handle.0]
    }
}

// ============================================================
// Static light frustum mesh
// ============================================================

/// World-space frustum geometry tessellated once for a static light and
/// kept in device buffers for the debug/volume passes.
#[derive(Debug, Clone, Default)]
pub struct LightFrustumMesh {
    pub verts: Vec<[f32; 3]>,
    pub indexes: Vec<u32>,
    pub vbo: Option<BufferHandle>,
    pub ibo: Option<BufferHandle>,
}

// ============================================================
// Error taxonomy
// ============================================================

/// Load-time failures. Everything except `ResourceExhaustion` is recovered
/// by substituting a fallback texture; `ResourceExhaustion` aborts the load.
#[derive(Debug, Error)]
pub enum TrError {
    #[error("decode failure: {0}")]
    DecodeFailure(String),
    #[error("dimension mismatch: {0}")]
    DimensionMismatch(String),
    #[error("unsupported keyword: {0}")]
    UnsupportedKeyword(String),
    #[error("resource exhaustion: {0}")]
    ResourceExhaustion(String),
}
