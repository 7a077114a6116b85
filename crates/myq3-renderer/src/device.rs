// device.rs — the opaque graphics device the renderer core drives.
//
// All real GPU work happens behind this trait; the core only issues the
// verbs below and never sees an API handle. Contract: every routine that
// binds a texture leaves the unit unbound again before returning, so
// callers never observe hidden binding changes.

use crate::tr_local::{InternalFormat, TextureType};

/// Opaque device texture handle.
pub type TexNum = u32;

/// Opaque device buffer handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferHandle(pub u32);

/// Min/mag filter selection, mirroring the classic GL filter matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextureFilter {
    Nearest,
    Linear,
    NearestMipmapNearest,
    LinearMipmapNearest,
    NearestMipmapLinear,
    LinearMipmapLinear,
}

/// Wrap behavior the device actually understands; the renderer-level
/// `WrapType` collapses onto these plus a border color.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceWrap {
    Repeat,
    ClampToEdge,
    ClampToBorder,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WrapAxis {
    S,
    T,
}

/// Destination of a 2D pixel upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadTarget {
    TwoD,
    /// One of the six cube faces, 0 = +X .. 5 = -Z.
    CubeFace(u8),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferKind {
    Vertex,
    Index,
}

/// Capabilities the upload engine and light engine key decisions off.
#[derive(Debug, Clone)]
pub struct DeviceCaps {
    pub max_texture_size: i32,
    pub max_cube_map_texture_size: i32,
    pub npot_available: bool,
    pub texture_float_available: bool,
    pub texture_rg_available: bool,
    pub compression_s3tc_available: bool,
    pub anisotropy_available: bool,
    pub max_anisotropy: f32,
    pub generate_mipmap_available: bool,
    pub occlusion_query_available: bool,
    pub gamma_ramp_available: bool,
}

impl Default for DeviceCaps {
    fn default() -> Self {
        Self {
            max_texture_size: 4096,
            max_cube_map_texture_size: 2048,
            npot_available: true,
            texture_float_available: true,
            texture_rg_available: true,
            compression_s3tc_available: false,
            anisotropy_available: true,
            max_anisotropy: 8.0,
            generate_mipmap_available: true,
            occlusion_query_available: true,
            gamma_ramp_available: false,
        }
    }
}

/// The verbs the renderer core issues. Parameter-setting calls apply to the
/// texture currently bound on the given target.
pub trait GpuDevice {
    fn caps(&self) -> &DeviceCaps;

    fn gen_texture(&mut self) -> TexNum;
    fn delete_texture(&mut self, texnum: TexNum);
    fn bind_texture(&mut self, ttype: TextureType, texnum: TexNum);
    fn unbind_texture(&mut self, ttype: TextureType);

    /// Upload one full mip level; `data` of None allocates storage only.
    fn tex_image_2d(
        &mut self,
        target: UploadTarget,
        level: i32,
        internal_format: InternalFormat,
        width: i32,
        height: i32,
        data: Option<&[u8]>,
    );

    /// Allocate storage for all slices of a 3D texture.
    fn alloc_image_3d(
        &mut self,
        internal_format: InternalFormat,
        width: i32,
        height: i32,
        depth: i32,
    );

    /// Upload one slice of a previously allocated 3D texture.
    fn tex_sub_image_3d(&mut self, level: i32, slice: i32, width: i32, height: i32, data: &[u8]);

    /// Hardware mipmap generation for the bound texture.
    fn generate_mipmaps(&mut self, ttype: TextureType);

    fn set_texture_filter(&mut self, ttype: TextureType, min: TextureFilter, mag: TextureFilter);
    fn set_texture_anisotropy(&mut self, ttype: TextureType, anisotropy: f32);
    fn set_texture_wrap(
        &mut self,
        ttype: TextureType,
        axis: WrapAxis,
        wrap: DeviceWrap,
        border_color: Option<[f32; 4]>,
    );

    fn create_static_buffer(&mut self, kind: BufferKind, data: &[u8]) -> BufferHandle;
    fn delete_buffer(&mut self, handle: BufferHandle);
}

// ============================================================
// Headless device
// ============================================================

/// Record of a single device call, kept by the headless device so tests and
/// tools can inspect exactly what the core asked the GPU to do.
#[derive(Debug, Clone)]
pub enum DeviceCall {
    GenTexture(TexNum),
    DeleteTexture(TexNum),
    Bind(TextureType, TexNum),
    Unbind(TextureType),
    TexImage2D {
        texnum: TexNum,
        target: UploadTarget,
        level: i32,
        internal_format: InternalFormat,
        width: i32,
        height: i32,
        data: Option<Vec<u8>>,
    },
    AllocImage3D {
        texnum: TexNum,
        internal_format: InternalFormat,
        width: i32,
        height: i32,
        depth: i32,
    },
    TexSubImage3D {
        texnum: TexNum,
        level: i32,
        slice: i32,
        width: i32,
        height: i32,
    },
    GenerateMipmaps(TexNum),
    SetFilter(TexNum, TextureFilter, TextureFilter),
    SetAnisotropy(TexNum, f32),
    SetWrap(TexNum, WrapAxis, DeviceWrap, Option<[f32; 4]>),
    CreateBuffer(BufferKind, usize),
    DeleteBuffer(BufferHandle),
}

/// A device that performs no GPU work but allocates handles, tracks binding
/// state and records every call. Used by the test suite and by headless
/// asset tools.
pub struct HeadlessDevice {
    caps: DeviceCaps,
    next_texnum: TexNum,
    next_buffer: u32,
    bound: [Option<TexNum>; 3],
    pub calls: Vec<DeviceCall>,
}

impl HeadlessDevice {
    pub fn new(caps: DeviceCaps) -> Self {
        Self {
            caps,
            next_texnum: 1,
            next_buffer: 1,
            bound: [None; 3],
            calls: Vec::new(),
        }
    }

    fn slot(ttype: TextureType) -> usize {
        match ttype {
            TextureType::TwoD => 0,
            TextureType::CubeMap => 1,
            TextureType::ThreeD => 2,
        }
    }

    /// The texture currently bound on a target, if any.
    pub fn bound_texture(&self, ttype: TextureType) -> Option<TexNum> {
        self.bound[Self::slot(ttype)]
    }

    /// True when no texture is bound on any target.
    pub fn all_unbound(&self) -> bool {
        self.bound.iter().all(|b| b.is_none())
    }

    /// Uploads recorded for a given texture, 2D and cube faces.
    pub fn uploads_for(&self, texnum: TexNum) -> Vec<&DeviceCall> {
        self.calls
            .iter()
            .filter(|c| matches!(c, DeviceCall::TexImage2D { texnum: t, .. } if *t == texnum))
            .collect()
    }
}

impl GpuDevice for HeadlessDevice {
    fn caps(&self) -> &DeviceCaps {
        &self.caps
    }

    fn gen_texture(&mut self) -> TexNum {
        let texnum = self.next_texnum;
        self.next_texnum += 1;
        self.calls.push(DeviceCall::GenTexture(texnum));
        texnum
    }

    fn delete_texture(&mut self, texnum: TexNum) {
        self.calls.push(DeviceCall::DeleteTexture(texnum));
    }

    fn bind_texture(&mut self, ttype: TextureType, texnum: TexNum) {
        self.bound[Self::slot(ttype)] = Some(texnum);
        self.calls.push(DeviceCall::Bind(ttype, texnum));
    }

    fn unbind_texture(&mut self, ttype: TextureType) {
        self.bound[Self::slot(ttype)] = None;
        self.calls.push(DeviceCall::Unbind(ttype));
    }

    fn tex_image_2d(
        &mut self,
        target: UploadTarget,
        level: i32,
        internal_format: InternalFormat,
        width: i32,
        height: i32,
        data: Option<&[u8]>,
    ) {
        let texnum = match target {
            UploadTarget::TwoD => self.bound_texture(TextureType::TwoD),
            UploadTarget::CubeFace(_) => self.bound_texture(TextureType::CubeMap),
        }
        .unwrap_or(0);
        self.calls.push(DeviceCall::TexImage2D {
            texnum,
            target,
            level,
            internal_format,
            width,
            height,
            data: data.map(|d| d.to_vec()),
        });
    }

    fn alloc_image_3d(
        &mut self,
        internal_format: InternalFormat,
        width: i32,
        height: i32,
        depth: i32,
    ) {
        let texnum = self.bound_texture(TextureType::ThreeD).unwrap_or(0);
        self.calls.push(DeviceCall::AllocImage3D {
            texnum,
            internal_format,
            width,
            height,
            depth,
        });
    }

    fn tex_sub_image_3d(&mut self, level: i32, slice: i32, width: i32, height: i32, _data: &[u8]) {
        let texnum = self.bound_texture(TextureType::ThreeD).unwrap_or(0);
        self.calls.push(DeviceCall::TexSubImage3D {
            texnum,
            level,
            slice,
            width,
            height,
        });
    }

    fn generate_mipmaps(&mut self, ttype: TextureType) {
        let texnum = self.bound_texture(ttype).unwrap_or(0);
        self.calls.push(DeviceCall::GenerateMipmaps(texnum));
    }

    fn set_texture_filter(&mut self, ttype: TextureType, min: TextureFilter, mag: TextureFilter) {
        let texnum = self.bound_texture(ttype).unwrap_or(0);
        self.calls.push(DeviceCall::SetFilter(texnum, min, mag));
    }

    fn set_texture_anisotropy(&mut self, ttype: TextureType, anisotropy: f32) {
        let texnum = self.bound_texture(ttype).unwrap_or(0);
        self.calls.push(DeviceCall::SetAnisotropy(texnum, anisotropy));
    }

    fn set_texture_wrap(
        &mut self,
        ttype: TextureType,
        axis: WrapAxis,
        wrap: DeviceWrap,
        border_color: Option<[f32; 4]>,
    ) {
        let texnum = self.bound_texture(ttype).unwrap_or(0);
        self.calls
            .push(DeviceCall::SetWrap(texnum, axis, wrap, border_color));
    }

    fn create_static_buffer(&mut self, kind: BufferKind, data: &[u8]) -> BufferHandle {
        let handle = BufferHandle(self.next_buffer);
        self.next_buffer += 1;
        self.calls.push(DeviceCall::CreateBuffer(kind, data.len()));
        handle
    }

    fn delete_buffer(&mut self, handle: BufferHandle) {
        self.calls.push(DeviceCall::DeleteBuffer(handle));
    }
}

impl Default for HeadlessDevice {
    fn default() -> Self {
        Self::new(DeviceCaps::default())
    }
}
