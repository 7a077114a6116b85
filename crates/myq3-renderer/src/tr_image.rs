// tr_image.rs — texture upload engine, image registry and builtin images.

use rayon::prelude::*;

use myq3_common::files::FileSystem;
use myq3_common::q_shared::{q_streq_nocase, vector_normalize, Vec3};

use crate::device::{
    DeviceCaps, DeviceWrap, GpuDevice, TextureFilter, UploadTarget, WrapAxis,
};
use crate::tr_image_program::{
    self, load_image_file, tex_byte_to_float, tex_float_to_byte, ProgramImage,
};
use crate::tr_local::{
    FilterType, Image, ImageBits, ImageHandle, InternalFormat, RenderContext, TextureType, TrError,
    WrapMode, WrapType, ATTENUATION_XY_SIZE, DEFAULT_SIZE, FOG_TABLE_SIZE, IMAGE_FILE_HASH_SIZE,
    MAX_IMAGE_NAME, MAX_SCRATCH_IMAGES, MINIMAGE_SIZE, REF_COLORGRADEMAP_SIZE, REF_CUBEMAP_SIZE,
};

// ============================================================
// Texture filter modes
// ============================================================

struct TextureMode {
    name: &'static str,
    minimize: TextureFilter,
    maximize: TextureFilter,
}

const TEXTURE_MODES: &[TextureMode] = &[
    TextureMode { name: "GL_NEAREST", minimize: TextureFilter::Nearest, maximize: TextureFilter::Nearest },
    TextureMode { name: "GL_LINEAR", minimize: TextureFilter::Linear, maximize: TextureFilter::Linear },
    TextureMode { name: "GL_NEAREST_MIPMAP_NEAREST", minimize: TextureFilter::NearestMipmapNearest, maximize: TextureFilter::Nearest },
    TextureMode { name: "GL_LINEAR_MIPMAP_NEAREST", minimize: TextureFilter::LinearMipmapNearest, maximize: TextureFilter::Linear },
    TextureMode { name: "GL_NEAREST_MIPMAP_LINEAR", minimize: TextureFilter::NearestMipmapLinear, maximize: TextureFilter::Nearest },
    TextureMode { name: "GL_LINEAR_MIPMAP_LINEAR", minimize: TextureFilter::LinearMipmapLinear, maximize: TextureFilter::Linear },
];

/// Select the global filter mode by name and re-filter every default-filtered
/// texture already uploaded.
pub fn texture_mode(ctx: &mut RenderContext, device: &mut dyn GpuDevice, mode_name: &str) {
    let Some(mode) = TEXTURE_MODES.iter().find(|m| q_streq_nocase(m.name, mode_name)) else {
        log::warn!("bad filter name");
        return;
    };

    ctx.filter_min = mode.minimize;
    ctx.filter_max = mode.maximize;

    // bound texture anisotropy
    if device.caps().anisotropy_available {
        let max = device.caps().max_anisotropy;
        ctx.config.texture_anisotropy = ctx.config.texture_anisotropy.clamp(1.0, max);
    }

    // change all the existing mipmap texture objects
    for i in 0..ctx.images.len() {
        let (ttype, texnum, filter_type) = {
            let image = &ctx.images[i];
            (image.ttype, image.texnum, image.filter_type)
        };
        if filter_type != FilterType::Default {
            continue;
        }
        device.bind_texture(ttype, texnum);
        device.set_texture_filter(ttype, ctx.filter_min, ctx.filter_max);
        if device.caps().anisotropy_available {
            device.set_texture_anisotropy(ttype, ctx.config.texture_anisotropy);
        }
        device.unbind_texture(ttype);
    }
}

// ============================================================
// Name hashing
// ============================================================

/// Hash an image path: lower-cased, backslashes folded to slashes, each
/// character weighted by its position.
pub fn generate_image_hash_value(name: &str) -> usize {
    let mut hash: i64 = 0;
    for (i, byte) in name.bytes().enumerate() {
        let mut letter = byte.to_ascii_lowercase();
        if letter == b'\\' {
            letter = b'/'; // damn path names
        }
        hash += letter as i64 * (i as i64 + 119);
    }
    (hash & (IMAGE_FILE_HASH_SIZE as i64 - 1)) as usize
}

fn find_image_in_hash(ctx: &RenderContext, name: &str) -> Option<ImageHandle> {
    let hash = generate_image_hash_value(name);
    let mut index = ctx.image_hash_table[hash];
    while index >= 0 {
        let image = &ctx.images[index as usize];
        if q_streq_nocase(&image.name, name) {
            return Some(ImageHandle(index as usize));
        }
        index = image.next_hash;
    }
    None
}

// ============================================================
// Gamma / intensity
// ============================================================

/// Apply the gamma ramp to a raw byte buffer (screenshots, video frames).
pub fn gamma_correct(ctx: &RenderContext, buffer: &mut [u8]) {
    for b in buffer.iter_mut() {
        *b = ctx.gamma_table[*b as usize];
    }
}

/// Scale up the pixel values in a texture to increase the lighting range.
pub fn light_scale_texture(
    ctx: &RenderContext,
    device_supports_gamma: bool,
    buffer: &mut [u8],
    only_gamma: bool,
) {
    if only_gamma {
        if !device_supports_gamma {
            for texel in buffer.chunks_exact_mut(4) {
                texel[0] = ctx.gamma_table[texel[0] as usize];
                texel[1] = ctx.gamma_table[texel[1] as usize];
                texel[2] = ctx.gamma_table[texel[2] as usize];
            }
        }
    } else if device_supports_gamma {
        if ctx.config.intensity != 1.0 {
            for texel in buffer.chunks_exact_mut(4) {
                texel[0] = ctx.intensity_table[texel[0] as usize];
                texel[1] = ctx.intensity_table[texel[1] as usize];
                texel[2] = ctx.intensity_table[texel[2] as usize];
            }
        }
    } else {
        for texel in buffer.chunks_exact_mut(4) {
            texel[0] = ctx.gamma_table[ctx.intensity_table[texel[0] as usize] as usize];
            texel[1] = ctx.gamma_table[ctx.intensity_table[texel[1] as usize] as usize];
            texel[2] = ctx.gamma_table[ctx.intensity_table[texel[2] as usize] as usize];
        }
    }
}

/// Build the brightness translation tables from the current configuration.
pub fn set_color_mappings(ctx: &mut RenderContext, device_supports_gamma: bool) {
    ctx.map_overbright_bits = ctx.config.map_overbright_bits;

    // setup the overbright lighting
    let mut overbright = ctx.config.overbright_bits;
    if !device_supports_gamma {
        overbright = 0; // need hardware gamma for overbright
    }
    // never overbright in windowed mode
    if !ctx.config.fullscreen {
        overbright = 0;
    }
    // allow 2 overbright bits in 24 bit, but only 1 in 16 bit
    if ctx.config.color_bits > 16 {
        overbright = overbright.min(2);
    } else {
        overbright = overbright.min(1);
    }
    ctx.overbright_bits = overbright.max(0);

    ctx.identity_light = 1.0 / (1 << ctx.overbright_bits) as f32;

    let intensity = ctx.config.intensity.max(1.0);
    ctx.config.intensity = intensity;
    let g = ctx.config.gamma.clamp(0.5, 3.0);
    ctx.config.gamma = g;

    let shift = ctx.overbright_bits;
    for i in 0..256 {
        let mut inf = if g == 1.0 {
            i as i32
        } else {
            (255.0 * (i as f32 / 255.0).powf(1.0 / g) + 0.5) as i32
        };
        inf <<= shift;
        ctx.gamma_table[i] = inf.clamp(0, 255) as u8;
    }

    for i in 0..256 {
        let j = (i as f32 * intensity) as i32;
        ctx.intensity_table[i] = j.min(255) as u8;
    }
}

// ============================================================
// Resampling
// ============================================================

/// Resample an RGBA image to a new size with a 2x2 box at fractional
/// offsets. Only filters properly when the new size is more than half the
/// old one; larger reductions go through the mipmap routines. Normal maps
/// average in vector space and renormalize.
pub fn resample_texture(
    input: &[u8],
    inwidth: i32,
    inheight: i32,
    outwidth: i32,
    outheight: i32,
    normal_map: bool,
) -> Vec<u8> {
    let mut out = vec![0u8; (outwidth * outheight * 4) as usize];

    let fracstep = (inwidth as u32).wrapping_mul(0x10000) / outwidth as u32;

    let mut p1 = vec![0usize; outwidth as usize];
    let mut p2 = vec![0usize; outwidth as usize];

    let mut frac = fracstep >> 2;
    for x in 0..outwidth as usize {
        p1[x] = 4 * (frac >> 16) as usize;
        frac = frac.wrapping_add(fracstep);
    }
    frac = 3 * (fracstep >> 2);
    for x in 0..outwidth as usize {
        p2[x] = 4 * (frac >> 16) as usize;
        frac = frac.wrapping_add(fracstep);
    }

    let row_bytes = (inwidth * 4) as usize;
    let mut dst = 0usize;

    for y in 0..outheight {
        let row1 = ((y as f32 + 0.25) * inheight as f32 / outheight as f32) as usize * row_bytes;
        let row2 = ((y as f32 + 0.75) * inheight as f32 / outheight as f32) as usize * row_bytes;

        for x in 0..outwidth as usize {
            let pix1 = &input[row1 + p1[x]..row1 + p1[x] + 4];
            let pix2 = &input[row1 + p2[x]..row1 + p2[x] + 4];
            let pix3 = &input[row2 + p1[x]..row2 + p1[x] + 4];
            let pix4 = &input[row2 + p2[x]..row2 + p2[x] + 4];

            if normal_map {
                let mut n: Vec3 = [0.0; 3];
                for pix in [pix1, pix2, pix3, pix4] {
                    n[0] += tex_byte_to_float(pix[0]);
                    n[1] += tex_byte_to_float(pix[1]);
                    n[2] += tex_byte_to_float(pix[2]);
                }
                if vector_normalize(&mut n) == 0.0 {
                    n = [0.0, 0.0, 1.0];
                }
                out[dst] = tex_float_to_byte(n[0]);
                out[dst + 1] = tex_float_to_byte(n[1]);
                out[dst + 2] = tex_float_to_byte(n[2]);
                out[dst + 3] = 255;
            } else {
                for c in 0..4 {
                    out[dst + c] = ((pix1[c] as u32
                        + pix2[c] as u32
                        + pix3[c] as u32
                        + pix4[c] as u32)
                        >> 2) as u8;
                }
            }
            dst += 4;
        }
    }

    out
}

// ============================================================
// Mipmap generation
// ============================================================

/// Quarter the texture in place with a straight 2x2 box filter.
fn mip_map_simple(buffer: &mut [u8], width: i32, height: i32) {
    if width == 1 && height == 1 {
        return;
    }

    let row = (width * 4) as usize;
    let out_width = width >> 1;
    let out_height = height >> 1;

    if out_width == 0 || out_height == 0 {
        // single row or column, average pairs along the remaining axis
        let count = (out_width + out_height) as usize;
        for i in 0..count {
            let src = i * 8;
            let dst = i * 4;
            for c in 0..4 {
                buffer[dst + c] = ((buffer[src + c] as u32 + buffer[src + 4 + c] as u32) >> 1) as u8;
            }
        }
        return;
    }

    let mut dst = 0usize;
    for y in 0..out_height as usize {
        let src_row = y * 2 * row;
        for x in 0..out_width as usize {
            let src = src_row + x * 8;
            for c in 0..4 {
                buffer[dst + c] = ((buffer[src + c] as u32
                    + buffer[src + 4 + c] as u32
                    + buffer[src + row + c] as u32
                    + buffer[src + row + 4 + c] as u32)
                    >> 2) as u8;
            }
            dst += 4;
        }
    }
}

/// Quarter the texture in place with a proper 4x4 linear kernel. Edges
/// wrap, so tiling textures stay seamless.
fn mip_map2(buffer: &mut [u8], in_width: i32, in_height: i32) {
    let out_width = (in_width >> 1) as usize;
    let out_height = (in_height >> 1) as usize;
    let mut temp = vec![0u8; out_width * out_height * 4];

    let in_width_mask = ((in_width << 2) - 1) as usize;
    let in_height_mask = (in_height - 1) as usize;
    let row_bytes = (in_width * 4) as usize;

    let row_at = |i: isize| -> usize { ((i as usize) & in_height_mask) * row_bytes };

    let mut outpix = 0usize;
    for out_y in 0..out_height {
        let i = (out_y * 2) as isize;
        let rows = [row_at(i - 1), row_at(i), row_at(i + 1), row_at(i + 2)];

        for out_x in 0..out_width {
            let j = out_x * 8;
            for k in j..j + 4 {
                let km1 = k.wrapping_sub(4) & in_width_mask;
                let kp1 = (k + 4) & in_width_mask;
                let kp2 = (k + 8) & in_width_mask;

                let mut total = 0u32;
                for (weight, row) in [(1u32, rows[0]), (2, rows[1]), (2, rows[2]), (1, rows[3])] {
                    total += weight * buffer[row + km1] as u32
                        + weight * 2 * buffer[row + k] as u32
                        + weight * 2 * buffer[row + kp1] as u32
                        + weight * buffer[row + kp2] as u32;
                }
                temp[outpix] = (total / 36) as u8;
                outpix += 1;
            }
        }
    }

    buffer[..temp.len()].copy_from_slice(&temp);
}

/// Quarter the texture in place.
pub fn mip_map(buffer: &mut [u8], width: i32, height: i32, simple: bool) {
    if !simple {
        if width > 1 && height > 1 {
            mip_map2(buffer, width, height);
        } else {
            mip_map_simple(buffer, width, height);
        }
        return;
    }
    mip_map_simple(buffer, width, height);
}

/// Quarter a normal map in place, renormalizing the averaged vectors.
pub fn mip_normal_map(buffer: &mut [u8], width: i32, height: i32) {
    if width == 1 && height == 1 {
        return;
    }

    let row = (width * 4) as usize;
    let out_height = (height >> 1).max(1);
    let pairs_per_row = ((width * 4) as usize / 8).max(1);

    let mut dst = 0usize;
    for y in 0..out_height as usize {
        let src_row = y * 2 * row;
        for p in 0..pairs_per_row {
            let src = src_row + p * 8;
            let below = if height > 1 { row } else { 0 };

            let mut n = [
                tex_byte_to_float(buffer[src])
                    + tex_byte_to_float(buffer[src + 4])
                    + tex_byte_to_float(buffer[src + below])
                    + tex_byte_to_float(buffer[src + below + 4]),
                tex_byte_to_float(buffer[src + 1])
                    + tex_byte_to_float(buffer[src + 5])
                    + tex_byte_to_float(buffer[src + below + 1])
                    + tex_byte_to_float(buffer[src + below + 5]),
                tex_byte_to_float(buffer[src + 2])
                    + tex_byte_to_float(buffer[src + 6])
                    + tex_byte_to_float(buffer[src + below + 2])
                    + tex_byte_to_float(buffer[src + below + 6]),
            ];
            let alpha = (buffer[src + 3] as u32
                + buffer[src + 7] as u32
                + buffer[src + below + 3] as u32
                + buffer[src + below + 7] as u32) as f32
                / 255.0;

            if vector_normalize(&mut n) == 0.0 {
                n = [0.0, 0.0, 1.0];
            }

            buffer[dst] = tex_float_to_byte(n[0]);
            buffer[dst + 1] = tex_float_to_byte(n[1]);
            buffer[dst + 2] = tex_float_to_byte(n[2]);
            buffer[dst + 3] = (alpha * 255.0 / 4.0) as u8;
            dst += 4;
        }
    }
}

// ============================================================
// PBR specular mip chain
// ============================================================

/// Van der Corput radical inverse.
fn radical_inverse_vdc(mut bits: u32) -> f32 {
    bits = (bits << 16) | (bits >> 16);
    bits = ((bits & 0x5555_5555) << 1) | ((bits & 0xAAAA_AAAA) >> 1);
    bits = ((bits & 0x3333_3333) << 2) | ((bits & 0xCCCC_CCCC) >> 2);
    bits = ((bits & 0x0F0F_0F0F) << 4) | ((bits & 0xF0F0_F0F0) >> 4);
    bits = ((bits & 0x00FF_00FF) << 8) | ((bits & 0xFF00_FF00) >> 8);
    bits as f32 * 2.328_306_4e-10
}

/// Sample i of a Hammersley point set with an incremental Y.
fn sample_hammersley(i: u32, num_samples: u32) -> [f32; 2] {
    [radical_inverse_vdc(i), i as f32 / num_samples as f32]
}

/// Spread a sample around (x, y) proportionally to the roughness; X wraps,
/// Y clamps to the border.
fn sample_with_roughness(
    rand_xy: [f32; 2],
    x: i32,
    y: i32,
    rough: f32,
    in_width: i32,
    in_height: i32,
) -> [usize; 2] {
    let scale_x = (rand_xy[0] - 0.5) * 0.5 * rough * rough;
    let scale_y = (rand_xy[1] - 0.5) * 0.5 * rough * rough;

    let offs_x = x as f32 + scale_x * in_width as f32;
    let offs_y = (y as f32 + scale_y * in_height as f32).clamp(0.0, (in_height - 1) as f32);

    [
        (offs_x.floor() as i64).rem_euclid(in_width as i64) as usize,
        offs_y.floor() as usize,
    ]
}

fn sample_weight(rand_xy: [f32; 2]) -> f32 {
    let scale_x = rand_xy[0] - 0.5;
    let scale_y = rand_xy[1] - 0.5;
    let t = 1.0 - scale_x.abs() * scale_y.abs();
    t * t
}

/// Build one level of the roughness-weighted specular mip chain by
/// importance sampling the base level. Roughness grows with the mip number
/// so deeper levels blur wider.
pub fn mip_map_pbr_spec(
    data: &[u8],
    out: &mut [u8],
    in_width: i32,
    in_height: i32,
    out_width: i32,
    out_height: i32,
    mip_num: i32,
) {
    const NUM_SAMPLES: u32 = 64;
    let factor = 1 << mip_num;
    let rough = mip_num as f32 / 5.0;

    for y in 0..out_height {
        for x in 0..out_width {
            let dst = ((y * out_width + x) * 4) as usize;
            let mid_x = x * factor;
            let mid_y = y * factor;

            let mut weight = 0.0f64;
            let mut color = [0.0f64; 3];

            for s in 0..NUM_SAMPLES {
                let rand_xy = sample_hammersley(s, NUM_SAMPLES);
                let [sx, sy] = sample_with_roughness(rand_xy, mid_x, mid_y, rough, in_width, in_height);
                let src = (sy * in_width as usize + sx) * 4;

                let w = sample_weight(rand_xy) as f64;
                weight += w;
                color[0] += data[src] as f64 * w;
                color[1] += data[src + 1] as f64 * w;
                color[2] += data[src + 2] as f64 * w;
            }

            out[dst] = (color[0] / weight) as u8;
            out[dst + 1] = (color[1] / weight) as u8;
            out[dst + 2] = (color[2] / weight) as u8;
            out[dst + 3] = 255;
        }
    }
}

// ============================================================
// BRDF lookup table
// ============================================================

fn importance_sample_ggx(xi: [f32; 2], roughness: f32, n: &Vec3) -> Vec3 {
    use myq3_common::q_shared::{cross_product, vector_add, vector_scale as vscale};

    let a = roughness * roughness;

    let phi = 2.0 * std::f32::consts::PI * xi[0];
    let cos_theta = ((1.0 - xi[1]) / (1.0 + (a * a - 1.0) * xi[1])).sqrt();
    let sin_theta = (1.0 - cos_theta * cos_theta).sqrt();

    // spherical to cartesian
    let h = [phi.cos() * sin_theta, phi.sin() * sin_theta, cos_theta];

    // tangent space to world space
    let up: Vec3 = if n[2].abs() < 0.999 {
        [0.0, 0.0, 1.0]
    } else {
        [1.0, 0.0, 0.0]
    };
    let mut tangent = cross_product(&up, n);
    vector_normalize(&mut tangent);
    let bitangent = cross_product(n, &tangent);

    let mut sample = vector_add(
        &vector_add(&vscale(&tangent, h[0]), &vscale(&bitangent, h[1])),
        &vscale(n, h[2]),
    );
    vector_normalize(&mut sample);
    sample
}

fn geometry_schlick_ggx(n_dot_v: f32, roughness: f32) -> f32 {
    let k = (roughness * roughness) / 2.0;
    n_dot_v / (n_dot_v * (1.0 - k) + k)
}

fn geometry_smith(roughness: f32, n_dot_v: f32, n_dot_l: f32) -> f32 {
    geometry_schlick_ggx(n_dot_v, roughness) * geometry_schlick_ggx(n_dot_l, roughness)
}

/// Split-sum approximation integral for one (NdotV, roughness) pair.
/// Returns the scale and bias applied to F0 at shading time.
pub fn integrate_brdf(n_dot_v: f32, roughness: f32, samples: u32) -> (f32, f32) {
    use myq3_common::q_shared::{dot_product as dot, vector_subtract as vsub, vector_scale as vscale};

    let v: Vec3 = [(1.0 - n_dot_v * n_dot_v).sqrt(), 0.0, n_dot_v];
    let n: Vec3 = [0.0, 0.0, 1.0];

    let mut a = 0.0f32;
    let mut b = 0.0f32;

    for i in 0..samples {
        let xi = sample_hammersley(i, samples);
        let h = importance_sample_ggx(xi, roughness, &n);
        let mut l = vsub(&vscale(&h, 2.0 * dot(&v, &h)), &v);
        vector_normalize(&mut l);

        let n_dot_l = l[2].max(0.0);
        let n_dot_h = h[2].max(0.0);
        let v_dot_h = dot(&v, &h).max(0.0);
        let n_dot_v = dot(&n, &v).max(0.0);

        if n_dot_l > 0.0 {
            let g = geometry_smith(roughness, n_dot_v, n_dot_l);
            let g_vis = (g * v_dot_h) / (n_dot_h * n_dot_v);
            let fc = (1.0 - v_dot_h).powi(5);

            a += (1.0 - fc) * g_vis;
            b += fc * g_vis;
        }
    }

    (a / samples as f32, b / samples as f32)
}

const LUT_IMAGE_SIZE: usize = 128;
const LUT_SAMPLES: u32 = 16;

/// Precomputed BRDF integral texture for the split-sum specular lookup,
/// two 16-bit channels over (roughness, NdotV).
fn create_brdf_lut_image(
    ctx: &mut RenderContext,
    device: &mut dyn GpuDevice,
) -> Result<ImageHandle, TrError> {
    let mut data = vec![0u8; LUT_IMAGE_SIZE * LUT_IMAGE_SIZE * 4];

    for y in 0..LUT_IMAGE_SIZE {
        for x in 0..LUT_IMAGE_SIZE {
            let n_dot_v = (y as f32 + 0.5) / LUT_IMAGE_SIZE as f32;
            let roughness = 1.0 - (x as f32 + 0.5) / LUT_IMAGE_SIZE as f32;
            let (a, b) = integrate_brdf(n_dot_v, roughness, LUT_SAMPLES);

            let a16 = (a * (256.0 * 256.0 - 1.0)) as u16;
            let b16 = (b * (256.0 * 256.0 - 1.0)) as u16;
            let i = (y * LUT_IMAGE_SIZE + x) * 4;
            data[i..i + 2].copy_from_slice(&a16.to_le_bytes());
            data[i + 2..i + 4].copy_from_slice(&b16.to_le_bytes());
        }
    }

    create_image(
        ctx,
        device,
        "_brdfLut",
        Some(&data),
        LUT_IMAGE_SIZE as i32,
        LUT_IMAGE_SIZE as i32,
        ImageBits::NOCOMPRESSION | ImageBits::NOPICMIP | ImageBits::TWOCOMP16F,
        FilterType::Linear,
        WrapType::EdgeClamp.into(),
    )
}

// ============================================================
// Mip level debug tinting
// ============================================================

/// Apply a color blend over a set of pixels.
fn blend_over_texture(data: &mut [u8], pixel_count: usize, blend: [u8; 4]) {
    let inverse_alpha = 255 - blend[3] as u32;
    let premult = [
        blend[0] as u32 * blend[3] as u32,
        blend[1] as u32 * blend[3] as u32,
        blend[2] as u32 * blend[3] as u32,
    ];

    for texel in data.chunks_exact_mut(4).take(pixel_count) {
        texel[0] = ((texel[0] as u32 * inverse_alpha + premult[0]) >> 9) as u8;
        texel[1] = ((texel[1] as u32 * inverse_alpha + premult[1]) >> 9) as u8;
        texel[2] = ((texel[2] as u32 * inverse_alpha + premult[2]) >> 9) as u8;
    }
}

const MIP_BLEND_COLORS: [[u8; 4]; 16] = [
    [0, 0, 0, 0],
    [255, 0, 0, 128],
    [0, 255, 0, 128],
    [0, 0, 255, 128],
    [255, 0, 0, 128],
    [0, 255, 0, 128],
    [0, 0, 255, 128],
    [255, 0, 0, 128],
    [0, 255, 0, 128],
    [0, 0, 255, 128],
    [255, 0, 0, 128],
    [0, 255, 0, 128],
    [0, 0, 255, 128],
    [255, 0, 0, 128],
    [0, 255, 0, 128],
    [0, 0, 255, 128],
];

// ============================================================
// Upload size / format selection
// ============================================================

pub fn next_power_of_two(n: i32) -> i32 {
    let mut scaled = 1i32;
    while scaled < n {
        scaled <<= 1;
    }
    scaled
}

/// Final on-device size for a source image: power-of-two rounding when the
/// device requires it, optional round-down, pic-mip reduction, and clamping
/// against the device limit with both axes halved together.
pub fn compute_upload_size(
    caps: &DeviceCaps,
    picmip: i32,
    round_images_down: bool,
    bits: ImageBits,
    ttype: TextureType,
    width: i32,
    height: i32,
) -> (i32, i32) {
    let (mut scaled_width, mut scaled_height) = if caps.npot_available {
        (width, height)
    } else {
        (next_power_of_two(width), next_power_of_two(height))
    };

    if round_images_down && scaled_width > width {
        scaled_width >>= 1;
    }
    if round_images_down && scaled_height > height {
        scaled_height >>= 1;
    }

    if !bits.contains(ImageBits::NOPICMIP) {
        let picmip = picmip.clamp(0, 2);
        scaled_width >>= picmip;
        scaled_height >>= picmip;
    }

    scaled_width = scaled_width.max(1);
    scaled_height = scaled_height.max(1);

    // scale both axes down equally so we don't have to deal with a half mip
    // resampling
    let limit = if ttype == TextureType::CubeMap {
        caps.max_cube_map_texture_size
    } else {
        caps.max_texture_size
    };
    while scaled_width > limit || scaled_height > limit {
        scaled_width >>= 1;
        scaled_height >>= 1;
    }

    (scaled_width.max(1), scaled_height.max(1))
}

/// Pick the GPU storage format: depth formats first, then float formats
/// (with two/one-component fallbacks when the device has no R/RG textures),
/// then the 8-bit paths decided by an alpha-channel scan and optional S3TC
/// substitution.
pub fn choose_internal_format(
    caps: &DeviceCaps,
    compression: bool,
    bits: ImageBits,
    data: Option<&[u8]>,
) -> InternalFormat {
    if bits.any_depth() {
        if bits.contains(ImageBits::DEPTH16) {
            return InternalFormat::Depth16;
        } else if bits.contains(ImageBits::DEPTH24) {
            return InternalFormat::Depth24;
        }
        return InternalFormat::Depth32;
    }

    if bits.contains(ImageBits::PACKED_DEPTH24_STENCIL8) {
        return InternalFormat::Depth24Stencil8;
    }

    if caps.texture_float_available && bits.any_float() {
        if bits.contains(ImageBits::RGBA16F) {
            return InternalFormat::Rgba16F;
        } else if bits.contains(ImageBits::RGBA32F) {
            return InternalFormat::Rgba32F;
        } else if bits.contains(ImageBits::TWOCOMP16F) {
            return if caps.texture_rg_available {
                InternalFormat::Rg16F
            } else {
                InternalFormat::LuminanceAlpha16F
            };
        } else if bits.contains(ImageBits::TWOCOMP32F) {
            return if caps.texture_rg_available {
                InternalFormat::Rg32F
            } else {
                InternalFormat::LuminanceAlpha32F
            };
        } else if bits.contains(ImageBits::RGBA16) {
            return InternalFormat::Rgba16;
        } else if bits.contains(ImageBits::ONECOMP16F) {
            return if caps.texture_rg_available {
                InternalFormat::R16F
            } else {
                InternalFormat::Alpha16F
            };
        }
        return if caps.texture_rg_available {
            InternalFormat::R32F
        } else {
            InternalFormat::Alpha32F
        };
    }

    if bits.contains(ImageBits::RGBE) {
        return InternalFormat::Rgba8;
    }

    let Some(data) = data else {
        return InternalFormat::Rgba8;
    };

    // scan the texture and verify if the alpha channel is being used or not
    let samples = if bits.contains(ImageBits::NORMALMAP) {
        // normal maps carry the displacement map in the alpha channel;
        // treating them as opaque would flatten the displacements
        if bits.intersects(ImageBits::DISPLACEMAP | ImageBits::ALPHATEST) {
            4
        } else {
            3
        }
    } else if bits.contains(ImageBits::LIGHTMAP) {
        3
    } else if data.chunks_exact(4).any(|texel| texel[3] != 255) {
        4
    } else {
        3
    };

    let use_s3tc =
        compression && caps.compression_s3tc_available && !bits.contains(ImageBits::NOCOMPRESSION);

    if samples == 3 {
        if use_s3tc {
            InternalFormat::CompressedRgbDxt1
        } else {
            InternalFormat::Rgb8
        }
    } else if bits.contains(ImageBits::ALPHA) {
        InternalFormat::Alpha8
    } else if use_s3tc {
        if bits.contains(ImageBits::DISPLACEMAP) {
            InternalFormat::CompressedRgbaDxt3
        } else if bits.contains(ImageBits::ALPHATEST) {
            InternalFormat::CompressedRgbaDxt1
        } else {
            InternalFormat::CompressedRgbaDxt5
        }
    } else {
        InternalFormat::Rgba8
    }
}

// ============================================================
// Upload engine
// ============================================================

fn slice_target(ttype: TextureType, face: usize) -> UploadTarget {
    match ttype {
        TextureType::CubeMap => UploadTarget::CubeFace(face as u8),
        _ => UploadTarget::TwoD,
    }
}

fn apply_wrap_axis(
    device: &mut dyn GpuDevice,
    ttype: TextureType,
    axis: WrapAxis,
    wrap: WrapType,
) {
    match wrap {
        WrapType::Repeat => device.set_texture_wrap(ttype, axis, DeviceWrap::Repeat, None),
        WrapType::Clamp | WrapType::EdgeClamp => {
            device.set_texture_wrap(ttype, axis, DeviceWrap::ClampToEdge, None)
        }
        WrapType::OneClamp => device.set_texture_wrap(
            ttype,
            axis,
            DeviceWrap::ClampToBorder,
            Some([1.0, 1.0, 1.0, 1.0]),
        ),
        WrapType::ZeroClamp => device.set_texture_wrap(
            ttype,
            axis,
            DeviceWrap::ClampToBorder,
            Some([0.0, 0.0, 0.0, 1.0]),
        ),
        WrapType::AlphaZeroClamp => device.set_texture_wrap(
            ttype,
            axis,
            DeviceWrap::ClampToBorder,
            Some([0.0, 0.0, 0.0, 0.0]),
        ),
    }
}

fn apply_wrap(device: &mut dyn GpuDevice, ttype: TextureType, wrap: WrapMode, name: &str) {
    if wrap.s != wrap.t && wrap.s.needs_border() && wrap.t.needs_border() {
        // both axes want a border color but disagree on which
        log::warn!("mismatched wrap types for image '{}'", name);
    }
    apply_wrap_axis(device, ttype, WrapAxis::S, wrap.s);
    apply_wrap_axis(device, ttype, WrapAxis::T, wrap.t);
}

/// Materialize a registry image on the device from one or more RGBA slices
/// (1 for 2D, 6 for cube maps, N for 3D stacks). Leaves the device binding
/// state neutral.
pub fn upload_image(
    ctx: &mut RenderContext,
    device: &mut dyn GpuDevice,
    slices: &[Option<&[u8]>],
    handle: ImageHandle,
) {
    let image = ctx.image(handle).clone();
    let caps = device.caps().clone();

    device.bind_texture(image.ttype, image.texnum);

    let (scaled_width, scaled_height) = compute_upload_size(
        &caps,
        ctx.config.picmip,
        ctx.config.round_images_down,
        image.bits,
        image.ttype,
        image.width,
        image.height,
    );

    let first_data = slices.first().copied().flatten();
    let internal_format = choose_internal_format(
        &caps,
        ctx.config.texture_compression,
        image.bits,
        first_data,
    );

    // 3D textures are uploaded in slices, so the storage has to be
    // allocated before the loop
    if image.ttype == TextureType::ThreeD {
        device.alloc_image_3d(internal_format, scaled_width, scaled_height, slices.len() as i32);
    }

    let mipmapped = matches!(image.filter_type, FilterType::Default | FilterType::CubeMip);
    let no_mip_formats = image.bits.any_depth() || image.bits.contains(ImageBits::PACKED_DEPTH24_STENCIL8);

    for (i, slice) in slices.iter().enumerate() {
        let mut scaled: Option<Vec<u8>> = slice.map(|data| {
            if scaled_width == image.width && scaled_height == image.height {
                data.to_vec()
            } else {
                resample_texture(
                    data,
                    image.width,
                    image.height,
                    scaled_width,
                    scaled_height,
                    image.bits.contains(ImageBits::NORMALMAP),
                )
            }
        });

        if let Some(buffer) = scaled.as_mut() {
            if !image.bits.intersects(
                ImageBits::NORMALMAP
                    | ImageBits::RGBA16F
                    | ImageBits::RGBA32F
                    | ImageBits::TWOCOMP16F
                    | ImageBits::TWOCOMP32F
                    | ImageBits::NOLIGHTSCALE,
            ) {
                light_scale_texture(
                    ctx,
                    caps.gamma_ramp_available,
                    buffer,
                    image.filter_type == FilterType::Default,
                );
            }
        }

        // the specular chain resamples the base level, which the in-place
        // mip loop below would otherwise destroy
        let spec_source = if image.filter_type == FilterType::CubeMip && !no_mip_formats {
            scaled.clone()
        } else {
            None
        };

        match image.ttype {
            TextureType::ThreeD => {
                device.tex_sub_image_3d(
                    0,
                    i as i32,
                    scaled_width,
                    scaled_height,
                    scaled.as_deref().unwrap_or(&[]),
                );
            }
            TextureType::CubeMap => {
                device.tex_image_2d(
                    UploadTarget::CubeFace(i as u8),
                    0,
                    internal_format,
                    scaled_width,
                    scaled_height,
                    scaled.as_deref(),
                );
            }
            TextureType::TwoD => {
                if image.bits.contains(ImageBits::PACKED_DEPTH24_STENCIL8) {
                    device.tex_image_2d(
                        UploadTarget::TwoD,
                        0,
                        internal_format,
                        scaled_width,
                        scaled_height,
                        None,
                    );
                } else {
                    device.tex_image_2d(
                        UploadTarget::TwoD,
                        0,
                        internal_format,
                        scaled_width,
                        scaled_height,
                        scaled.as_deref(),
                    );
                }
            }
        }

        // prefer hardware mipmap generation, once all cube faces are in
        let last_face = image.ttype != TextureType::CubeMap || i == 5;
        if mipmapped && last_face && caps.generate_mipmap_available {
            device.generate_mipmaps(image.ttype);
        }

        // manual chain when the hardware can't
        if mipmapped && !caps.generate_mipmap_available && !no_mip_formats {
            if let Some(buffer) = scaled.as_mut() {
                let mut mip_width = scaled_width;
                let mut mip_height = scaled_height;
                let mut mip_level = 0;

                while mip_width > 1 || mip_height > 1 {
                    if image.bits.contains(ImageBits::NORMALMAP) {
                        mip_normal_map(buffer, mip_width, mip_height);
                    } else {
                        mip_map(buffer, mip_width, mip_height, ctx.config.simple_mipmaps);
                    }

                    mip_width = (mip_width >> 1).max(1);
                    mip_height = (mip_height >> 1).max(1);
                    mip_level += 1;

                    if ctx.config.color_mip_levels && !image.bits.contains(ImageBits::NORMALMAP) {
                        blend_over_texture(
                            buffer,
                            (mip_width * mip_height) as usize,
                            MIP_BLEND_COLORS[(mip_level & 15) as usize],
                        );
                    }

                    device.tex_image_2d(
                        slice_target(image.ttype, i),
                        mip_level,
                        internal_format,
                        mip_width,
                        mip_height,
                        Some(&buffer[..(mip_width * mip_height * 4) as usize]),
                    );
                }
            }
        }

        // overwrite the mip levels with the roughness-weighted specular
        // chain used by the PBR reflection lookups
        if let Some(spec_src) = spec_source {
            let mut mip_width = scaled_width;
            let mut mip_height = scaled_height;
            let mut mip_level = 0;

            while mip_width > 2 || mip_height > 2 || mip_level <= 5 {
                mip_width = (mip_width >> 1).max(1);
                mip_height = (mip_height >> 1).max(1);
                mip_level += 1;

                let mut out = vec![0u8; (mip_width * mip_height * 4) as usize];
                mip_map_pbr_spec(
                    &spec_src,
                    &mut out,
                    scaled_width,
                    scaled_height,
                    mip_width,
                    mip_height,
                    mip_level,
                );
                device.tex_image_2d(
                    slice_target(image.ttype, i),
                    mip_level,
                    internal_format,
                    mip_width,
                    mip_height,
                    Some(&out),
                );
            }
        }
    }

    // set filter type
    match image.filter_type {
        FilterType::Default => {
            if caps.anisotropy_available {
                device.set_texture_anisotropy(image.ttype, ctx.config.texture_anisotropy);
            }
            device.set_texture_filter(image.ttype, ctx.filter_min, ctx.filter_max);
        }
        FilterType::CubeMip => {
            device.set_texture_filter(
                image.ttype,
                TextureFilter::LinearMipmapLinear,
                TextureFilter::Linear,
            );
        }
        FilterType::Linear => {
            device.set_texture_filter(image.ttype, TextureFilter::Linear, TextureFilter::Linear);
        }
        FilterType::Nearest => {
            device.set_texture_filter(image.ttype, TextureFilter::Nearest, TextureFilter::Nearest);
        }
    }

    apply_wrap(device, image.ttype, image.wrap, &image.name);

    device.unbind_texture(image.ttype);

    let record = ctx.image_mut(handle);
    record.upload_width = scaled_width;
    record.upload_height = scaled_height;
    record.internal_format = internal_format;
}

// ============================================================
// Registry
// ============================================================

/// Allocate a registry slot and a device texture handle for `name`.
pub fn alloc_image(
    ctx: &mut RenderContext,
    device: &mut dyn GpuDevice,
    name: &str,
    link_into_hash: bool,
) -> Result<ImageHandle, TrError> {
    if name.len() >= MAX_IMAGE_NAME {
        return Err(TrError::ResourceExhaustion(format!(
            "\"{}\" image name is too long",
            name
        )));
    }

    let texnum = device.gen_texture();
    let index = ctx.images.len();

    let mut image = Image {
        name: name.to_string(),
        ttype: TextureType::TwoD,
        bits: ImageBits::empty(),
        filter_type: FilterType::Default,
        wrap: WrapType::Repeat.into(),
        width: 0,
        height: 0,
        upload_width: 0,
        upload_height: 0,
        internal_format: InternalFormat::Rgba8,
        texnum,
        frame_used: 0,
        next_hash: -1,
    };

    if link_into_hash {
        let hash = generate_image_hash_value(name);
        image.next_hash = ctx.image_hash_table[hash];
        ctx.image_hash_table[hash] = index as i32;
    }

    ctx.images.push(image);
    Ok(ImageHandle(index))
}

/// Create and upload a 2D texture. `data` of None allocates storage only
/// (render targets).
pub fn create_image(
    ctx: &mut RenderContext,
    device: &mut dyn GpuDevice,
    name: &str,
    data: Option<&[u8]>,
    width: i32,
    height: i32,
    bits: ImageBits,
    filter_type: FilterType,
    wrap: WrapMode,
) -> Result<ImageHandle, TrError> {
    let handle = alloc_image(ctx, device, name, true)?;
    {
        let image = ctx.image_mut(handle);
        image.ttype = TextureType::TwoD;
        image.width = width;
        image.height = height;
        image.bits = bits;
        image.filter_type = filter_type;
        image.wrap = wrap;
    }
    upload_image(ctx, device, &[data], handle);
    Ok(handle)
}

/// Create and upload a cube map from six face slices.
pub fn create_cube_image(
    ctx: &mut RenderContext,
    device: &mut dyn GpuDevice,
    name: &str,
    faces: &[Option<&[u8]>; 6],
    width: i32,
    height: i32,
    bits: ImageBits,
    filter_type: FilterType,
    wrap: WrapMode,
) -> Result<ImageHandle, TrError> {
    let handle = alloc_image(ctx, device, name, true)?;
    {
        let image = ctx.image_mut(handle);
        image.ttype = TextureType::CubeMap;
        image.width = width;
        image.height = height;
        image.bits = bits;
        image.filter_type = filter_type;
        image.wrap = wrap;
    }
    upload_image(ctx, device, faces.as_slice(), handle);
    Ok(handle)
}

/// Create and upload a 3D texture from a packed slice stack.
pub fn create_3d_image(
    ctx: &mut RenderContext,
    device: &mut dyn GpuDevice,
    name: &str,
    data: &[u8],
    width: i32,
    height: i32,
    depth: i32,
    bits: ImageBits,
    filter_type: FilterType,
    wrap: WrapMode,
) -> Result<ImageHandle, TrError> {
    let handle = alloc_image(ctx, device, name, true)?;
    {
        let image = ctx.image_mut(handle);
        image.ttype = TextureType::ThreeD;
        image.width = width;
        image.height = height;
        image.bits = bits;
        image.filter_type = filter_type;
        image.wrap = wrap;
    }

    let slice_bytes = (width * height * 4) as usize;
    let slices: Vec<Option<&[u8]>> = data.chunks_exact(slice_bytes).take(depth as usize).map(Some).collect();
    upload_image(ctx, device, &slices, handle);
    Ok(handle)
}

/// Fast path for font glyphs: exact-size upload, linear filtering, edge
/// clamping, no mipmaps or gamma treatment.
pub fn create_glyph(
    ctx: &mut RenderContext,
    device: &mut dyn GpuDevice,
    name: &str,
    pic: &[u8],
    width: i32,
    height: i32,
) -> Result<ImageHandle, TrError> {
    let handle = alloc_image(ctx, device, name, true)?;
    {
        let image = ctx.image_mut(handle);
        image.ttype = TextureType::TwoD;
        image.width = width;
        image.height = height;
        image.bits = ImageBits::NOPICMIP;
        image.filter_type = FilterType::Linear;
        image.wrap = WrapType::Clamp.into();
        image.upload_width = width;
        image.upload_height = height;
        image.internal_format = InternalFormat::Rgba8;
    }

    let texnum = ctx.image(handle).texnum;
    device.bind_texture(TextureType::TwoD, texnum);
    device.tex_image_2d(UploadTarget::TwoD, 0, InternalFormat::Rgba8, width, height, Some(pic));
    device.set_texture_filter(TextureType::TwoD, TextureFilter::Linear, TextureFilter::Linear);
    device.set_texture_wrap(TextureType::TwoD, WrapAxis::S, DeviceWrap::ClampToEdge, None);
    device.set_texture_wrap(TextureType::TwoD, WrapAxis::T, DeviceWrap::ClampToEdge, None);
    device.unbind_texture(TextureType::TwoD);

    Ok(handle)
}

/// Find or load the given image. Ok(None) means the image could not be
/// loaded; the caller substitutes a fallback, never an error.
pub fn find_image_file(
    ctx: &mut RenderContext,
    device: &mut dyn GpuDevice,
    fs: &dyn FileSystem,
    image_name: &str,
    bits: ImageBits,
    filter_type: FilterType,
    wrap: WrapMode,
    material_name: Option<&str>,
) -> Result<Option<ImageHandle>, TrError> {
    if image_name.is_empty() {
        return Ok(None);
    }

    // see if the image is already loaded
    if let Some(handle) = find_image_in_hash(ctx, image_name) {
        let frame_count = ctx.frame_count;
        let image = ctx.image_mut(handle);
        // the white image can be used with any set of parms, but other
        // mismatches are worth a diagnostic
        if !q_streq_nocase(&image.name, "_white") {
            let diff = image.bits.symmetric_difference(bits);
            if diff.contains(ImageBits::NOPICMIP) {
                log::debug!(
                    "reused image '{}' with mixed allowPicmip parm for shader '{}'",
                    image_name,
                    material_name.unwrap_or("")
                );
            }
            if image.wrap != wrap {
                log::warn!(
                    "reused image '{}' with mixed glWrapType parm for shader '{}'",
                    image_name,
                    material_name.unwrap_or("")
                );
            }
        }
        image.frame_used = frame_count;
        return Ok(Some(handle));
    }

    // load the pic from disk
    let mut bits = bits;
    let (pic, _) = tr_image_program::load_image(fs, image_name, &mut bits, material_name);
    let Some(pic) = pic else {
        return Ok(None);
    };

    let handle = create_image(
        ctx,
        device,
        image_name,
        Some(&pic.pixels),
        pic.width as i32,
        pic.height as i32,
        bits,
        filter_type,
        wrap,
    )?;
    Ok(Some(handle))
}

// ============================================================
// Cube map loading
// ============================================================

fn flip_horizontal(pic: &mut [u8], width: i32, height: i32) {
    let w = width as usize;
    for y in 0..height as usize {
        let row = &mut pic[y * w * 4..(y + 1) * w * 4];
        for x in 0..w / 2 {
            let opposite = w - 1 - x;
            for c in 0..4 {
                row.swap(x * 4 + c, opposite * 4 + c);
            }
        }
    }
}

fn flip_vertical(pic: &mut [u8], width: i32, height: i32) {
    let row_bytes = width as usize * 4;
    let h = height as usize;
    for y in 0..h / 2 {
        let opposite = h - 1 - y;
        for i in 0..row_bytes {
            pic.swap(y * row_bytes + i, opposite * row_bytes + i);
        }
    }
}

fn rotate(pic: &mut [u8], width: i32, height: i32, degrees: i32) {
    if degrees == 0 {
        return;
    }
    let w = width as usize;
    let h = height as usize;
    let mut tmp = vec![0u8; w * h * 4];

    for y in 0..h {
        for x in 0..w {
            let (x2, y2) = if degrees == 90 {
                (y, h - 1 - x)
            } else {
                (w - 1 - y, x)
            };
            let src = (y * w + x) * 4;
            let dst = (y2 * w + x2) * 4;
            tmp[dst..dst + 4].copy_from_slice(&pic[src..src + 4]);
        }
    }

    pic.copy_from_slice(&tmp);
}

struct CubeConvention {
    suffixes: [&'static str; 6],
    flip_x: [bool; 6],
    flip_y: [bool; 6],
    rot: [i32; 6],
}

// Tried in order; the first convention yielding six square, equal-size
// faces wins. The latter two re-orient each face into +X..-Z order.
const CUBE_CONVENTIONS: &[CubeConvention] = &[
    CubeConvention {
        suffixes: ["px", "nx", "py", "ny", "pz", "nz"],
        flip_x: [false; 6],
        flip_y: [false; 6],
        rot: [0; 6],
    },
    CubeConvention {
        suffixes: ["forward", "back", "left", "right", "up", "down"],
        flip_x: [true, true, false, true, true, false],
        flip_y: [false, false, true, false, false, true],
        rot: [90, -90, 0, 0, 90, -90],
    },
    CubeConvention {
        suffixes: ["rt", "lf", "bk", "ft", "up", "dn"],
        flip_x: [true, true, false, true, true, false],
        flip_y: [false, false, true, false, false, true],
        rot: [90, -90, 0, 0, 90, -90],
    },
];

fn try_cube_convention(
    fs: &dyn FileSystem,
    base_name: &str,
    bits: ImageBits,
    convention: &CubeConvention,
    material_name: Option<&str>,
) -> Option<([ProgramImage; 6], i32)> {
    let mut faces: Vec<ProgramImage> = Vec::with_capacity(6);
    let mut size = 0i32;

    for i in 0..6 {
        let filename = format!("{}_{}", base_name, convention.suffixes[i]);
        let mut bits_ignore = bits;
        let (pic, _) =
            tr_image_program::load_image(fs, &filename, &mut bits_ignore, material_name);
        let mut pic = pic?;

        // every face must be square and match the first face
        if pic.width != pic.height {
            return None;
        }
        if i == 0 {
            size = pic.width as i32;
        } else if pic.width as i32 != size {
            return None;
        }

        if convention.flip_x[i] {
            flip_horizontal(&mut pic.pixels, size, size);
        }
        if convention.flip_y[i] {
            flip_vertical(&mut pic.pixels, size, size);
        }
        rotate(&mut pic.pixels, size, size, convention.rot[i]);

        faces.push(pic);
    }

    let faces: [ProgramImage; 6] = faces.try_into().ok()?;
    Some((faces, size))
}

/// Find or load a cube map, trying each face-naming convention in turn.
pub fn find_cube_image(
    ctx: &mut RenderContext,
    device: &mut dyn GpuDevice,
    fs: &dyn FileSystem,
    image_name: &str,
    bits: ImageBits,
    filter_type: FilterType,
    wrap: WrapMode,
    material_name: Option<&str>,
) -> Result<Option<ImageHandle>, TrError> {
    if image_name.is_empty() {
        return Ok(None);
    }

    if let Some(handle) = find_image_in_hash(ctx, image_name) {
        let frame_count = ctx.frame_count;
        ctx.image_mut(handle).frame_used = frame_count;
        return Ok(Some(handle));
    }

    for convention in CUBE_CONVENTIONS {
        let Some((faces, size)) =
            try_cube_convention(fs, image_name, bits, convention, material_name)
        else {
            continue;
        };

        let face_refs: [Option<&[u8]>; 6] = [
            Some(&faces[0].pixels),
            Some(&faces[1].pixels),
            Some(&faces[2].pixels),
            Some(&faces[3].pixels),
            Some(&faces[4].pixels),
            Some(&faces[5].pixels),
        ];
        let handle = create_cube_image(
            ctx, device, image_name, &face_refs, size, size, bits, filter_type, wrap,
        )?;
        return Ok(Some(handle));
    }

    Ok(None)
}

// ============================================================
// Sub-image copy
// ============================================================

/// Copy a smaller image into a region of a larger one (or back out of it).
pub fn sub_image_cpy(
    dest: &mut [u8],
    destx: usize,
    desty: usize,
    destw: usize,
    desth: usize,
    src: &[u8],
    srcw: usize,
    srch: usize,
    bytes: usize,
) {
    let s_row_bytes = srcw * bytes;
    let d_row_bytes = destw * bytes;

    for row in 0..srch {
        let d = (desty + row) * d_row_bytes + destx * bytes;
        if desty + row >= desth || d + s_row_bytes > dest.len() {
            break;
        }
        let s = row * s_row_bytes;
        dest[d..d + s_row_bytes].copy_from_slice(&src[s..s + s_row_bytes]);
    }
}

// ============================================================
// Fog table
// ============================================================

pub fn init_fog_table(ctx: &mut RenderContext) {
    let exp = 0.5f32;
    for i in 0..FOG_TABLE_SIZE {
        ctx.fog_table[i] = (i as f32 / (FOG_TABLE_SIZE - 1) as f32).powf(exp);
    }
}

/// Returns a 0.0 to 1.0 fog density value. Called for each texel of the fog
/// texture on startup and for each vertex of transparent shaders in fog
/// dynamically.
pub fn fog_factor(ctx: &RenderContext, s: f32, t: f32) -> f32 {
    let mut s = s - 1.0 / 512.0;

    if s < 0.0 {
        return 0.0;
    }
    if t < 1.0 / 32.0 {
        return 0.0;
    }
    if t < 31.0 / 32.0 {
        s *= (t - 1.0 / 32.0) / (30.0 / 32.0);
    }

    // we need to leave a lot of clamp range
    s *= 8.0;
    if s > 1.0 {
        s = 1.0;
    }

    ctx.fog_table[(s * (FOG_TABLE_SIZE - 1) as f32) as usize]
}

// ============================================================
// Builtin images
// ============================================================

fn fill_solid(data: &mut [u8], rgba: [u8; 4]) {
    for texel in data.chunks_exact_mut(4) {
        texel.copy_from_slice(&rgba);
    }
}

fn create_default_image(
    ctx: &mut RenderContext,
    device: &mut dyn GpuDevice,
) -> Result<ImageHandle, TrError> {
    // a box, so mapping coordinates are visible
    let mut data = vec![32u8; DEFAULT_SIZE * DEFAULT_SIZE * 4];
    for x in 0..DEFAULT_SIZE {
        for (px, py) in [
            (x, 0),
            (0, x),
            (x, DEFAULT_SIZE - 1),
            (DEFAULT_SIZE - 1, x),
        ] {
            let i = (py * DEFAULT_SIZE + px) * 4;
            data[i..i + 4].copy_from_slice(&[255; 4]);
        }
    }
    create_image(
        ctx,
        device,
        "_default",
        Some(&data),
        DEFAULT_SIZE as i32,
        DEFAULT_SIZE as i32,
        ImageBits::NOPICMIP,
        FilterType::Default,
        WrapType::Repeat.into(),
    )
}

fn create_random_normals_image(
    ctx: &mut RenderContext,
    device: &mut dyn GpuDevice,
) -> Result<ImageHandle, TrError> {
    use rand::Rng;
    let mut rng = rand::thread_rng();

    let mut data = vec![0u8; DEFAULT_SIZE * DEFAULT_SIZE * 4];
    for texel in data.chunks_exact_mut(4) {
        let r: f32 = rng.gen();
        let angle = 2.0 * std::f32::consts::PI * r;
        let mut n: Vec3 = [angle.cos(), angle.sin(), r];
        vector_normalize(&mut n);

        texel[0] = (128.0 + 127.0 * n[0]) as u8;
        texel[1] = (128.0 + 127.0 * n[1]) as u8;
        texel[2] = (128.0 + 127.0 * n[2]) as u8;
        texel[3] = 255;
    }
    create_image(
        ctx,
        device,
        "_randomNormals",
        Some(&data),
        DEFAULT_SIZE as i32,
        DEFAULT_SIZE as i32,
        ImageBits::NOPICMIP,
        FilterType::Default,
        WrapType::Repeat.into(),
    )
}

const FOG_S: usize = 256;
const FOG_T: usize = 32;

fn create_fog_image(
    ctx: &mut RenderContext,
    device: &mut dyn GpuDevice,
) -> Result<ImageHandle, TrError> {
    let mut data = vec![0u8; FOG_S * FOG_T * 4];

    // S is distance, T is depth
    let mut i = 0;
    for y in 0..FOG_T {
        for x in 0..FOG_S {
            let d = fog_factor(
                ctx,
                (x as f32 + 0.5) / FOG_S as f32,
                (y as f32 + 0.5) / FOG_T as f32,
            );
            data[i] = 255;
            data[i + 1] = 255;
            data[i + 2] = 255;
            data[i + 3] = (255.0 * d) as u8;
            i += 4;
        }
    }

    create_image(
        ctx,
        device,
        "_fog",
        Some(&data),
        FOG_S as i32,
        FOG_T as i32,
        ImageBits::NOPICMIP,
        FilterType::Linear,
        WrapType::Clamp.into(),
    )
}

fn create_attenuation_xy_image(
    ctx: &mut RenderContext,
    device: &mut dyn GpuDevice,
) -> Result<ImageHandle, TrError> {
    // a centered inverse-square falloff blob for dynamic lighting
    let mut data = vec![0u8; ATTENUATION_XY_SIZE * ATTENUATION_XY_SIZE * 4];
    let half = ATTENUATION_XY_SIZE as f32 / 2.0;

    let mut i = 0;
    for y in 0..ATTENUATION_XY_SIZE {
        for x in 0..ATTENUATION_XY_SIZE {
            let dx = half - 0.5 - x as f32;
            let dy = half - 0.5 - y as f32;
            let d = dx * dx + dy * dy;
            let mut b = (4000.0 / d) as i32;
            if b > 255 {
                b = 255;
            } else if b < 75 {
                b = 0;
            }
            data[i] = b as u8;
            data[i + 1] = b as u8;
            data[i + 2] = b as u8;
            data[i + 3] = 255;
            i += 4;
        }
    }

    create_image(
        ctx,
        device,
        "_attenuationXY",
        Some(&data),
        ATTENUATION_XY_SIZE as i32,
        ATTENUATION_XY_SIZE as i32,
        ImageBits::NOPICMIP,
        FilterType::Linear,
        WrapType::Clamp.into(),
    )
}

fn create_quadratic_image(
    ctx: &mut RenderContext,
    device: &mut dyn GpuDevice,
) -> Result<ImageHandle, TrError> {
    let mut data = vec![0u8; DEFAULT_SIZE * DEFAULT_SIZE * 4];

    let mut i = 0;
    for _y in 0..DEFAULT_SIZE {
        for x in 0..DEFAULT_SIZE {
            let mut s = (x as f32 + 0.5) * (2.0 / DEFAULT_SIZE as f32) - 1.0;
            s = s.abs() - 1.0 / DEFAULT_SIZE as f32;
            let value = 1.0 - s * 2.0 + s * s;
            let intensity = ((value * 255.0) as i32).clamp(0, 255) as u8;
            data[i] = intensity;
            data[i + 1] = intensity;
            data[i + 2] = intensity;
            data[i + 3] = intensity;
            i += 4;
        }
    }

    create_image(
        ctx,
        device,
        "_quadratic",
        Some(&data),
        DEFAULT_SIZE as i32,
        DEFAULT_SIZE as i32,
        ImageBits::NOPICMIP | ImageBits::NOCOMPRESSION,
        FilterType::Linear,
        WrapType::Clamp.into(),
    )
}

fn create_color_grade_image(
    ctx: &mut RenderContext,
    device: &mut dyn GpuDevice,
) -> Result<ImageHandle, TrError> {
    let size = REF_COLORGRADEMAP_SIZE;
    let depth = 4 * size;
    let mut data = Vec::with_capacity(size * size * depth * 4);

    // 255 is 15 * 17, so the identity ramp covers 0 to 255
    for _i in 0..4 {
        for b in 0..size {
            for g in 0..size {
                for r in 0..size {
                    data.push((r * 17) as u8);
                    data.push((g * 17) as u8);
                    data.push((b * 17) as u8);
                    data.push(255);
                }
            }
        }
    }

    create_3d_image(
        ctx,
        device,
        "_colorGrade",
        &data,
        size as i32,
        size as i32,
        depth as i32,
        ImageBits::NOPICMIP | ImageBits::NOCOMPRESSION | ImageBits::NOLIGHTSCALE,
        FilterType::Linear,
        WrapType::EdgeClamp.into(),
    )
}

/// Synthesize the builtin textures every material can rely on.
pub fn create_builtin_images(
    ctx: &mut RenderContext,
    device: &mut dyn GpuDevice,
) -> Result<(), TrError> {
    ctx.builtins.default_image = Some(create_default_image(ctx, device)?);

    let mini = MINIMAGE_SIZE as i32;
    let mut data = vec![0u8; MINIMAGE_SIZE * MINIMAGE_SIZE * 4];

    // we use a solid white image instead of disabling texturing
    fill_solid(&mut data, [255, 255, 255, 255]);
    ctx.builtins.white_image = Some(create_image(
        ctx, device, "_white", Some(&data), mini, mini,
        ImageBits::NOPICMIP, FilterType::Linear, WrapType::Repeat.into(),
    )?);

    fill_solid(&mut data, [0, 0, 0, 255]);
    ctx.builtins.black_image = Some(create_image(
        ctx, device, "_black", Some(&data), mini, mini,
        ImageBits::NOPICMIP, FilterType::Linear, WrapType::Repeat.into(),
    )?);

    fill_solid(&mut data, [128, 128, 128, 255]);
    ctx.builtins.grey_image = Some(create_image(
        ctx, device, "_grey", Some(&data), mini, mini,
        ImageBits::NOPICMIP, FilterType::Linear, WrapType::Repeat.into(),
    )?);

    fill_solid(&mut data, [255, 0, 0, 255]);
    ctx.builtins.red_image = Some(create_image(
        ctx, device, "_red", Some(&data), mini, mini,
        ImageBits::NOPICMIP, FilterType::Linear, WrapType::Repeat.into(),
    )?);

    fill_solid(&mut data, [0, 255, 0, 255]);
    ctx.builtins.green_image = Some(create_image(
        ctx, device, "_green", Some(&data), mini, mini,
        ImageBits::NOPICMIP, FilterType::Linear, WrapType::Repeat.into(),
    )?);

    fill_solid(&mut data, [0, 0, 255, 255]);
    ctx.builtins.blue_image = Some(create_image(
        ctx, device, "_blue", Some(&data), mini, mini,
        ImageBits::NOPICMIP, FilterType::Linear, WrapType::Repeat.into(),
    )?);

    // a default normalmap with a zero heightmap
    fill_solid(&mut data, [128, 128, 255, 255]);
    ctx.builtins.flat_image = Some(create_image(
        ctx, device, "_flat", Some(&data), mini, mini,
        ImageBits::NOPICMIP | ImageBits::NORMALMAP, FilterType::Linear, WrapType::Repeat.into(),
    )?);

    // scratch images are overwritten by cinematic frames
    let scratch = vec![0u8; DEFAULT_SIZE * DEFAULT_SIZE * 4];
    ctx.builtins.scratch_images.clear();
    for _ in 0..MAX_SCRATCH_IMAGES {
        let handle = create_image(
            ctx, device, "_scratch", Some(&scratch),
            DEFAULT_SIZE as i32, DEFAULT_SIZE as i32,
            ImageBits::empty(), FilterType::Linear, WrapType::Clamp.into(),
        )?;
        ctx.builtins.scratch_images.push(handle);
    }

    ctx.builtins.quadratic_image = Some(create_quadratic_image(ctx, device)?);
    ctx.builtins.random_normals_image = Some(create_random_normals_image(ctx, device)?);

    init_fog_table(ctx);
    ctx.builtins.fog_image = Some(create_fog_image(ctx, device)?);

    fill_solid(&mut data, [255, 255, 255, 255]);
    ctx.builtins.no_falloff_image = Some(create_image(
        ctx, device, "_noFalloff", Some(&data), mini, mini,
        ImageBits::NOPICMIP, FilterType::Linear, WrapType::EdgeClamp.into(),
    )?);

    ctx.builtins.attenuation_xy_image = Some(create_attenuation_xy_image(ctx, device)?);

    // cube placeholders
    let cube_face = vec![0u8; REF_CUBEMAP_SIZE * REF_CUBEMAP_SIZE * 4];
    let black_faces: [Option<&[u8]>; 6] = [Some(&cube_face); 6];
    let cube = REF_CUBEMAP_SIZE as i32;
    ctx.builtins.black_cube_image = Some(create_cube_image(
        ctx, device, "_blackCube", &black_faces, cube, cube,
        ImageBits::NOPICMIP, FilterType::Linear, WrapType::EdgeClamp.into(),
    )?);
    ctx.builtins.auto_cube_image = Some(create_cube_image(
        ctx, device, "_autoCube", &black_faces, cube, cube,
        ImageBits::NOPICMIP, FilterType::Linear, WrapType::EdgeClamp.into(),
    )?);

    let white_face = vec![255u8; REF_CUBEMAP_SIZE * REF_CUBEMAP_SIZE * 4];
    let white_faces: [Option<&[u8]>; 6] = [Some(&white_face); 6];
    ctx.builtins.white_cube_image = Some(create_cube_image(
        ctx, device, "_whiteCube", &white_faces, cube, cube,
        ImageBits::NOPICMIP, FilterType::Linear, WrapType::EdgeClamp.into(),
    )?);

    ctx.builtins.color_grade_image = Some(create_color_grade_image(ctx, device)?);
    ctx.builtins.brdf_lut_image = Some(create_brdf_lut_image(ctx, device)?);

    Ok(())
}

// ============================================================
// Init / shutdown
// ============================================================

pub fn init_images(ctx: &mut RenderContext, device: &mut dyn GpuDevice) -> Result<(), TrError> {
    log::debug!("------- init_images -------");

    ctx.images.clear();
    ctx.image_hash_table = [-1; IMAGE_FILE_HASH_SIZE];

    // build brightness translation tables
    let supports_gamma = device.caps().gamma_ramp_available;
    set_color_mappings(ctx, supports_gamma);

    create_builtin_images(ctx, device)
}

pub fn shutdown_images(ctx: &mut RenderContext, device: &mut dyn GpuDevice) {
    log::debug!("------- shutdown_images -------");

    for image in &ctx.images {
        device.delete_texture(image.texnum);
    }
    ctx.images.clear();
    ctx.image_hash_table = [-1; IMAGE_FILE_HASH_SIZE];
    ctx.builtins = Default::default();
}

// ============================================================
// Debug queries
// ============================================================

/// Total texels of all images touched this frame.
pub fn sum_of_used_images(ctx: &RenderContext) -> i32 {
    ctx.images
        .iter()
        .filter(|image| image.frame_used == ctx.frame_count)
        .map(|image| image.upload_width * image.upload_height)
        .sum()
}

pub fn get_texture_id(ctx: &RenderContext, name: &str) -> Option<usize> {
    ctx.images.iter().position(|image| image.name == name)
}

/// Formatted registry listing with per-format memory accounting.
pub fn image_list(ctx: &RenderContext) -> String {
    let mut out = String::new();
    out.push_str("\n      -w-- -h-- -type- -if-- wrap --name-------\n");

    let mut texels: i64 = 0;
    let mut data_size: i64 = 0;

    for (i, image) in ctx.images.iter().enumerate() {
        let face_count = if image.ttype == TextureType::CubeMap { 6 } else { 1 };
        let image_texels = image.upload_width as i64 * image.upload_height as i64 * face_count;
        texels += image_texels;
        data_size += (image_texels as f32 * image.internal_format.bytes_per_texel()) as i64;

        let type_str = match image.ttype {
            TextureType::TwoD => "2D  ",
            TextureType::CubeMap => "CUBE",
            TextureType::ThreeD => "3D  ",
        };

        out.push_str(&format!(
            "{:4}: {:4} {:4} {}   {:?} {:?}/{:?} {}\n",
            i,
            image.upload_width,
            image.upload_height,
            type_str,
            image.internal_format,
            image.wrap.s,
            image.wrap.t,
            image.name
        ));
    }

    out.push_str(" ---------\n");
    out.push_str(&format!(" {} total texels (not including mipmaps)\n", texels));
    out.push_str(&format!(
        " {}.{:02} MB total image memory\n",
        data_size / (1024 * 1024),
        (data_size % (1024 * 1024)) * 100 / (1024 * 1024)
    ));
    out.push_str(&format!(" {} total images\n\n", ctx.images.len()));
    out
}

// ============================================================
// Batch decoding
// ============================================================

/// Decode a list of image files in parallel. Results keep the input order;
/// failed loads come back as None. GPU upload stays on the caller's thread.
pub fn decode_image_files<F: FileSystem + Sync>(
    fs: &F,
    names: &[String],
    alpha_byte: u8,
) -> Vec<Option<ProgramImage>> {
    names
        .par_iter()
        .map(|name| load_image_file(fs, name, alpha_byte))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{DeviceCall, HeadlessDevice};
    use crate::tr_local::RenderConfig;
    use myq3_common::files::MemoryFileSystem;
    use std::io::Cursor;

    fn test_context() -> RenderContext {
        let mut ctx = RenderContext::new(RenderConfig::default());
        set_color_mappings(&mut ctx, false);
        init_fog_table(&mut ctx);
        ctx
    }

    fn solid_rgba(width: u32, height: u32, rgba: [u8; 4]) -> Vec<u8> {
        let mut data = vec![0u8; (width * height * 4) as usize];
        fill_solid(&mut data, rgba);
        data
    }

    fn png_bytes(width: u32, height: u32, rgba: [u8; 4]) -> Vec<u8> {
        let pixels = solid_rgba(width, height, rgba);
        let buf = image::RgbaImage::from_raw(width, height, pixels).unwrap();
        let mut out = Cursor::new(Vec::new());
        image::DynamicImage::ImageRgba8(buf)
            .write_to(&mut out, image::ImageFormat::Png)
            .unwrap();
        out.into_inner()
    }

    // ============================================================
    // Hashing
    // ============================================================

    #[test]
    fn test_hash_ignores_case_and_slashes() {
        let a = generate_image_hash_value("textures/base/wall");
        let b = generate_image_hash_value("TEXTURES\\base\\WALL");
        assert_eq!(a, b);
        assert!(a < IMAGE_FILE_HASH_SIZE);
    }

    #[test]
    fn test_hash_distinguishes_names() {
        let a = generate_image_hash_value("textures/base/wall1");
        let b = generate_image_hash_value("textures/base/wall2");
        assert_ne!(a, b);
    }

    // ============================================================
    // Upload size
    // ============================================================

    #[test]
    fn test_upload_size_npot_passthrough() {
        let caps = DeviceCaps::default();
        let (w, h) = compute_upload_size(&caps, 0, false, ImageBits::empty(), TextureType::TwoD, 100, 60);
        assert_eq!((w, h), (100, 60));
    }

    #[test]
    fn test_upload_size_pow2_rounding() {
        let caps = DeviceCaps { npot_available: false, ..DeviceCaps::default() };
        let (w, h) = compute_upload_size(&caps, 0, false, ImageBits::empty(), TextureType::TwoD, 100, 60);
        assert_eq!((w, h), (128, 64));
    }

    #[test]
    fn test_upload_size_round_down() {
        let caps = DeviceCaps { npot_available: false, ..DeviceCaps::default() };
        let (w, h) = compute_upload_size(&caps, 0, true, ImageBits::empty(), TextureType::TwoD, 100, 60);
        assert_eq!((w, h), (64, 32));
    }

    #[test]
    fn test_upload_size_picmip() {
        let caps = DeviceCaps::default();
        let (w, h) = compute_upload_size(&caps, 2, false, ImageBits::empty(), TextureType::TwoD, 256, 256);
        assert_eq!((w, h), (64, 64));

        // the flag wins over the config
        let (w, h) = compute_upload_size(&caps, 2, false, ImageBits::NOPICMIP, TextureType::TwoD, 256, 256);
        assert_eq!((w, h), (256, 256));
    }

    #[test]
    fn test_upload_size_picmip_clamped() {
        let caps = DeviceCaps::default();
        let (w, h) = compute_upload_size(&caps, 9, false, ImageBits::empty(), TextureType::TwoD, 256, 256);
        assert_eq!((w, h), (64, 64));
    }

    #[test]
    fn test_upload_size_clamps_to_device_limit_preserving_aspect() {
        let caps = DeviceCaps { max_texture_size: 512, ..DeviceCaps::default() };
        let (w, h) = compute_upload_size(&caps, 0, false, ImageBits::NOPICMIP, TextureType::TwoD, 2048, 1024);
        assert_eq!((w, h), (512, 256));
    }

    #[test]
    fn test_upload_size_cube_uses_cube_limit() {
        let caps = DeviceCaps { max_cube_map_texture_size: 256, ..DeviceCaps::default() };
        let (w, h) = compute_upload_size(&caps, 0, false, ImageBits::NOPICMIP, TextureType::CubeMap, 1024, 1024);
        assert_eq!((w, h), (256, 256));
    }

    #[test]
    fn test_upload_size_never_below_one() {
        let caps = DeviceCaps::default();
        let (w, h) = compute_upload_size(&caps, 2, false, ImageBits::empty(), TextureType::TwoD, 1, 1);
        assert_eq!((w, h), (1, 1));
    }

    // ============================================================
    // Format selection
    // ============================================================

    #[test]
    fn test_format_opaque_selects_rgb8() {
        let caps = DeviceCaps::default();
        let data = solid_rgba(4, 4, [10, 20, 30, 255]);
        let f = choose_internal_format(&caps, false, ImageBits::empty(), Some(&data));
        assert_eq!(f, InternalFormat::Rgb8);
    }

    #[test]
    fn test_format_translucent_selects_rgba8() {
        let caps = DeviceCaps::default();
        let data = solid_rgba(4, 4, [10, 20, 30, 200]);
        let f = choose_internal_format(&caps, false, ImageBits::empty(), Some(&data));
        assert_eq!(f, InternalFormat::Rgba8);
    }

    #[test]
    fn test_format_normalmap_skips_alpha_scan() {
        let caps = DeviceCaps::default();
        // translucent alpha bytes, but plain normal maps are three-sample
        let data = solid_rgba(4, 4, [128, 128, 255, 0]);
        let f = choose_internal_format(&caps, false, ImageBits::NORMALMAP, Some(&data));
        assert_eq!(f, InternalFormat::Rgb8);

        let f = choose_internal_format(
            &caps,
            false,
            ImageBits::NORMALMAP | ImageBits::DISPLACEMAP,
            Some(&data),
        );
        assert_eq!(f, InternalFormat::Rgba8);
    }

    #[test]
    fn test_format_depth_takes_priority() {
        let caps = DeviceCaps::default();
        let f = choose_internal_format(&caps, true, ImageBits::DEPTH24 | ImageBits::RGBA16F, None);
        assert_eq!(f, InternalFormat::Depth24);
    }

    #[test]
    fn test_format_float_rg_fallback() {
        let caps = DeviceCaps { texture_rg_available: false, ..DeviceCaps::default() };
        let f = choose_internal_format(&caps, false, ImageBits::TWOCOMP16F, None);
        assert_eq!(f, InternalFormat::LuminanceAlpha16F);

        let caps = DeviceCaps::default();
        let f = choose_internal_format(&caps, false, ImageBits::TWOCOMP16F, None);
        assert_eq!(f, InternalFormat::Rg16F);
    }

    #[test]
    fn test_format_compression_variants() {
        let caps = DeviceCaps { compression_s3tc_available: true, ..DeviceCaps::default() };

        let opaque = solid_rgba(4, 4, [1, 2, 3, 255]);
        assert_eq!(
            choose_internal_format(&caps, true, ImageBits::empty(), Some(&opaque)),
            InternalFormat::CompressedRgbDxt1
        );

        let translucent = solid_rgba(4, 4, [1, 2, 3, 100]);
        assert_eq!(
            choose_internal_format(&caps, true, ImageBits::empty(), Some(&translucent)),
            InternalFormat::CompressedRgbaDxt5
        );
        assert_eq!(
            choose_internal_format(&caps, true, ImageBits::ALPHATEST, Some(&translucent)),
            InternalFormat::CompressedRgbaDxt1
        );
        assert_eq!(
            choose_internal_format(
                &caps,
                true,
                ImageBits::NORMALMAP | ImageBits::DISPLACEMAP,
                Some(&translucent)
            ),
            InternalFormat::CompressedRgbaDxt3
        );

        // suppression flag wins
        assert_eq!(
            choose_internal_format(&caps, true, ImageBits::NOCOMPRESSION, Some(&opaque)),
            InternalFormat::Rgb8
        );
    }

    #[test]
    fn test_format_no_data_is_rgba8() {
        let caps = DeviceCaps::default();
        assert_eq!(
            choose_internal_format(&caps, false, ImageBits::empty(), None),
            InternalFormat::Rgba8
        );
    }

    // ============================================================
    // Resampling / mipmaps
    // ============================================================

    #[test]
    fn test_resample_upscale_solid_color() {
        let input = solid_rgba(2, 2, [40, 80, 120, 255]);
        let out = resample_texture(&input, 2, 2, 4, 4, false);
        assert_eq!(out.len(), 4 * 4 * 4);
        for texel in out.chunks_exact(4) {
            assert_eq!(texel, &[40, 80, 120, 255]);
        }
    }

    #[test]
    fn test_resample_bounds_sweep() {
        // degenerate and odd sizes must never index out of range
        for (inw, inh, outw, outh) in [
            (1, 1, 1, 1),
            (1, 1, 2, 2),
            (3, 5, 4, 4),
            (5, 3, 8, 2),
            (7, 7, 4, 4),
            (4096, 1, 2048, 1),
        ] {
            let input = solid_rgba(inw as u32, inh as u32, [1, 2, 3, 4]);
            let out = resample_texture(&input, inw, inh, outw, outh, false);
            assert_eq!(out.len(), (outw * outh * 4) as usize);
        }
    }

    #[test]
    fn test_resample_normal_map_stays_unit_length() {
        let mut input = solid_rgba(4, 4, [0, 0, 0, 255]);
        // alternate between +x and +z leaning normals
        for (i, texel) in input.chunks_exact_mut(4).enumerate() {
            if i % 2 == 0 {
                texel[0] = tex_float_to_byte(0.707);
                texel[1] = 128;
                texel[2] = tex_float_to_byte(0.707);
            } else {
                texel[0] = 128;
                texel[1] = 128;
                texel[2] = 255;
            }
        }
        let out = resample_texture(&input, 4, 4, 2, 2, true);
        for texel in out.chunks_exact(4) {
            let n = [
                tex_byte_to_float(texel[0]),
                tex_byte_to_float(texel[1]),
                tex_byte_to_float(texel[2]),
            ];
            let len = (n[0] * n[0] + n[1] * n[1] + n[2] * n[2]).sqrt();
            assert!((len - 1.0).abs() < 0.02);
            assert_eq!(texel[3], 255);
        }
    }

    #[test]
    fn test_mip_map_simple_average() {
        let mut data = vec![
            0u8, 0, 0, 255, 40, 40, 40, 255, //
            80, 80, 80, 255, 120, 120, 120, 255,
        ];
        mip_map(&mut data, 2, 2, true);
        assert_eq!(&data[..4], &[60, 60, 60, 255]);
    }

    #[test]
    fn test_mip_map_single_row() {
        let mut data = vec![0u8, 0, 0, 0, 100, 100, 100, 100, 50, 50, 50, 50, 150, 150, 150, 150];
        mip_map(&mut data, 4, 1, true);
        assert_eq!(&data[..4], &[50, 50, 50, 50]);
        assert_eq!(&data[4..8], &[100, 100, 100, 100]);
    }

    #[test]
    fn test_mip_map2_solid_color_stable() {
        let mut data = solid_rgba(4, 4, [90, 120, 150, 255]);
        mip_map(&mut data, 4, 4, false);
        assert_eq!(&data[..4], &[90, 120, 150, 255]);
    }

    #[test]
    fn test_mip_map_bounds_sweep() {
        for (w, h) in [(1, 1), (2, 2), (4, 1), (1, 4), (8, 2), (16, 16), (5, 3)] {
            let mut data = solid_rgba(w as u32, h as u32, [7, 7, 7, 7]);
            mip_map(&mut data, w, h, true);
            let mut data = solid_rgba(w as u32, h as u32, [7, 7, 7, 7]);
            mip_map(&mut data, w, h, false);
        }
    }

    #[test]
    fn test_mip_normal_map_renormalizes() {
        let mut data = solid_rgba(4, 4, [tex_float_to_byte(0.6), 128, tex_float_to_byte(0.8), 255]);
        mip_normal_map(&mut data, 4, 4);
        let texel = &data[..4];
        let n = [
            tex_byte_to_float(texel[0]),
            tex_byte_to_float(texel[1]),
            tex_byte_to_float(texel[2]),
        ];
        let len = (n[0] * n[0] + n[1] * n[1] + n[2] * n[2]).sqrt();
        assert!((len - 1.0).abs() < 0.02);
    }

    #[test]
    fn test_pbr_spec_mip_preserves_solid_color() {
        let data = solid_rgba(16, 16, [200, 100, 50, 255]);
        let mut out = vec![0u8; 8 * 8 * 4];
        mip_map_pbr_spec(&data, &mut out, 16, 16, 8, 8, 1);
        for texel in out.chunks_exact(4) {
            assert!((texel[0] as i32 - 200).abs() <= 1);
            assert!((texel[1] as i32 - 100).abs() <= 1);
            assert!((texel[2] as i32 - 50).abs() <= 1);
            assert_eq!(texel[3], 255);
        }
    }

    // ============================================================
    // Fog
    // ============================================================

    #[test]
    fn test_fog_factor_range() {
        let ctx = test_context();
        assert_eq!(fog_factor(&ctx, 0.0, 0.5), 0.0);
        assert_eq!(fog_factor(&ctx, 0.5, 0.01), 0.0);
        let d = fog_factor(&ctx, 0.9, 0.9);
        assert!(d > 0.0 && d <= 1.0);
    }

    #[test]
    fn test_fog_table_monotonic() {
        let ctx = test_context();
        for i in 1..FOG_TABLE_SIZE {
            assert!(ctx.fog_table[i] >= ctx.fog_table[i - 1]);
        }
    }

    // ============================================================
    // Color mappings
    // ============================================================

    #[test]
    fn test_color_mappings_identity_gamma() {
        let mut ctx = RenderContext::new(RenderConfig::default());
        set_color_mappings(&mut ctx, false);
        // windowed, no hardware gamma: no overbright shift
        assert_eq!(ctx.overbright_bits, 0);
        for i in 0..256 {
            assert_eq!(ctx.gamma_table[i], i as u8);
            assert_eq!(ctx.intensity_table[i], i as u8);
        }
        assert_eq!(ctx.identity_light, 1.0);
    }

    #[test]
    fn test_color_mappings_intensity() {
        let mut ctx = RenderContext::new(RenderConfig {
            intensity: 2.0,
            ..RenderConfig::default()
        });
        set_color_mappings(&mut ctx, false);
        assert_eq!(ctx.intensity_table[100], 200);
        assert_eq!(ctx.intensity_table[200], 255);
    }

    #[test]
    fn test_color_mappings_overbright_needs_fullscreen_and_gamma() {
        let mut ctx = RenderContext::new(RenderConfig {
            fullscreen: true,
            overbright_bits: 2,
            ..RenderConfig::default()
        });
        set_color_mappings(&mut ctx, true);
        assert_eq!(ctx.overbright_bits, 2);
        assert_eq!(ctx.identity_light, 0.25);

        let mut ctx = RenderContext::new(RenderConfig {
            fullscreen: false,
            overbright_bits: 2,
            ..RenderConfig::default()
        });
        set_color_mappings(&mut ctx, true);
        assert_eq!(ctx.overbright_bits, 0);
    }

    // ============================================================
    // Upload end-to-end
    // ============================================================

    #[test]
    fn test_create_image_opaque_4x4_nopicmip() {
        let mut ctx = test_context();
        let mut device = HeadlessDevice::default();

        let data = solid_rgba(4, 4, [10, 20, 30, 255]);
        let handle = create_image(
            &mut ctx, &mut device, "textures/test", Some(&data), 4, 4,
            ImageBits::NOPICMIP, FilterType::Default, WrapType::Repeat.into(),
        )
        .unwrap();

        let image = ctx.image(handle);
        assert_eq!(image.upload_width, 4);
        assert_eq!(image.upload_height, 4);
        assert_eq!(image.internal_format, InternalFormat::Rgb8);
        assert!(device.all_unbound());
    }

    #[test]
    fn test_upload_leaves_device_unbound() {
        let mut ctx = test_context();
        let mut device = HeadlessDevice::default();

        let data = solid_rgba(8, 8, [1, 2, 3, 128]);
        create_image(
            &mut ctx, &mut device, "a", Some(&data), 8, 8,
            ImageBits::empty(), FilterType::Linear, WrapType::OneClamp.into(),
        )
        .unwrap();
        let faces: [Option<&[u8]>; 6] = [Some(&data); 6];
        create_cube_image(
            &mut ctx, &mut device, "b", &faces, 8, 8,
            ImageBits::empty(), FilterType::Linear, WrapType::EdgeClamp.into(),
        )
        .unwrap();
        assert!(device.all_unbound());
    }

    #[test]
    fn test_manual_mip_chain_uploads_every_level() {
        let mut ctx = test_context();
        let caps = DeviceCaps { generate_mipmap_available: false, ..DeviceCaps::default() };
        let mut device = HeadlessDevice::new(caps);

        let data = solid_rgba(8, 8, [50, 50, 50, 255]);
        let handle = create_image(
            &mut ctx, &mut device, "mipped", Some(&data), 8, 8,
            ImageBits::NOPICMIP, FilterType::Default, WrapType::Repeat.into(),
        )
        .unwrap();

        // 8x8 base plus 4x4, 2x2, 1x1 levels
        let texnum = ctx.image(handle).texnum;
        let uploads = device.uploads_for(texnum);
        assert_eq!(uploads.len(), 4);
        let has_level = |level: i32, w: i32| {
            uploads.iter().any(|c| {
                matches!(c, DeviceCall::TexImage2D { level: l, width, .. } if *l == level && *width == w)
            })
        };
        assert!(has_level(0, 8));
        assert!(has_level(1, 4));
        assert!(has_level(2, 2));
        assert!(has_level(3, 1));
    }

    #[test]
    fn test_hardware_mipmaps_preferred() {
        let mut ctx = test_context();
        let mut device = HeadlessDevice::default();

        let data = solid_rgba(8, 8, [50, 50, 50, 255]);
        let handle = create_image(
            &mut ctx, &mut device, "mipped", Some(&data), 8, 8,
            ImageBits::NOPICMIP, FilterType::Default, WrapType::Repeat.into(),
        )
        .unwrap();

        let texnum = ctx.image(handle).texnum;
        assert_eq!(device.uploads_for(texnum).len(), 1);
        assert!(device
            .calls
            .iter()
            .any(|c| matches!(c, DeviceCall::GenerateMipmaps(t) if *t == texnum)));
    }

    #[test]
    fn test_cube_mip_filter_builds_spec_chain() {
        let mut ctx = test_context();
        let mut device = HeadlessDevice::default();

        let data = solid_rgba(16, 16, [200, 100, 50, 255]);
        let handle = create_image(
            &mut ctx, &mut device, "spec", Some(&data), 16, 16,
            ImageBits::NOPICMIP | ImageBits::NOLIGHTSCALE,
            FilterType::CubeMip, WrapType::EdgeClamp.into(),
        )
        .unwrap();

        // base level plus the roughness chain levels 1..=6
        let texnum = ctx.image(handle).texnum;
        let uploads = device.uploads_for(texnum);
        assert!(uploads.len() >= 6, "expected spec chain, got {}", uploads.len());
    }

    #[test]
    fn test_mismatched_border_wraps_apply_per_axis() {
        let mut ctx = test_context();
        let mut device = HeadlessDevice::default();

        let data = solid_rgba(4, 4, [1, 1, 1, 255]);
        create_image(
            &mut ctx, &mut device, "wrapped", Some(&data), 4, 4,
            ImageBits::NOPICMIP, FilterType::Linear,
            WrapMode { s: WrapType::OneClamp, t: WrapType::Repeat },
        )
        .unwrap();

        let wraps: Vec<_> = device
            .calls
            .iter()
            .filter_map(|c| match c {
                DeviceCall::SetWrap(_, axis, wrap, border) => Some((*axis, *wrap, *border)),
                _ => None,
            })
            .collect();
        assert!(wraps.contains(&(
            WrapAxis::S,
            DeviceWrap::ClampToBorder,
            Some([1.0, 1.0, 1.0, 1.0])
        )));
        assert!(wraps.contains(&(WrapAxis::T, DeviceWrap::Repeat, None)));
    }

    // ============================================================
    // Registry
    // ============================================================

    #[test]
    fn test_find_image_file_is_idempotent() {
        let mut ctx = test_context();
        let mut device = HeadlessDevice::default();
        let mut fs = MemoryFileSystem::new();
        fs.insert("textures/wall.png", png_bytes(4, 4, [9, 9, 9, 255]));

        let a = find_image_file(
            &mut ctx, &mut device, &fs, "textures/wall.png",
            ImageBits::empty(), FilterType::Default, WrapType::Repeat.into(), None,
        )
        .unwrap()
        .unwrap();
        let gen_count = device
            .calls
            .iter()
            .filter(|c| matches!(c, DeviceCall::GenTexture(_)))
            .count();

        let b = find_image_file(
            &mut ctx, &mut device, &fs, "textures/wall.png",
            ImageBits::empty(), FilterType::Default, WrapType::Repeat.into(), None,
        )
        .unwrap()
        .unwrap();

        assert_eq!(a, b);
        let gen_count_after = device
            .calls
            .iter()
            .filter(|c| matches!(c, DeviceCall::GenTexture(_)))
            .count();
        assert_eq!(gen_count, gen_count_after);
    }

    #[test]
    fn test_find_image_file_flag_mismatch_reuses() {
        let mut ctx = test_context();
        let mut device = HeadlessDevice::default();
        let mut fs = MemoryFileSystem::new();
        fs.insert("textures/wall.png", png_bytes(4, 4, [9, 9, 9, 255]));

        let a = find_image_file(
            &mut ctx, &mut device, &fs, "textures/wall.png",
            ImageBits::empty(), FilterType::Default, WrapType::Repeat.into(), None,
        )
        .unwrap()
        .unwrap();
        let b = find_image_file(
            &mut ctx, &mut device, &fs, "textures/wall.png",
            ImageBits::NOPICMIP, FilterType::Default, WrapType::Clamp.into(), Some("mat"),
        )
        .unwrap()
        .unwrap();

        assert_eq!(a, b);
        assert_eq!(ctx.images.len(), 1);
    }

    #[test]
    fn test_find_image_file_missing_returns_none() {
        let mut ctx = test_context();
        let mut device = HeadlessDevice::default();
        let fs = MemoryFileSystem::new();

        let result = find_image_file(
            &mut ctx, &mut device, &fs, "textures/nothere",
            ImageBits::empty(), FilterType::Default, WrapType::Repeat.into(), None,
        )
        .unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn test_too_long_name_is_fatal() {
        let mut ctx = test_context();
        let mut device = HeadlessDevice::default();
        let name = "x".repeat(MAX_IMAGE_NAME);
        let err = alloc_image(&mut ctx, &mut device, &name, true);
        assert!(matches!(err, Err(TrError::ResourceExhaustion(_))));
    }

    // ============================================================
    // Cube conventions
    // ============================================================

    fn insert_cube_faces(fs: &mut MemoryFileSystem, base: &str, suffixes: &[&str; 6], size: u32) {
        for suffix in suffixes {
            fs.insert(
                format!("{}_{}.png", base, suffix),
                png_bytes(size, size, [100, 100, 100, 255]),
            );
        }
    }

    #[test]
    fn test_find_cube_image_opengl_suffixes() {
        let mut ctx = test_context();
        let mut device = HeadlessDevice::default();
        let mut fs = MemoryFileSystem::new();
        insert_cube_faces(&mut fs, "env/sky", &["px", "nx", "py", "ny", "pz", "nz"], 8);

        let handle = find_cube_image(
            &mut ctx, &mut device, &fs, "env/sky",
            ImageBits::empty(), FilterType::Linear, WrapType::EdgeClamp.into(), None,
        )
        .unwrap()
        .unwrap();
        assert_eq!(ctx.image(handle).ttype, TextureType::CubeMap);
        assert_eq!(ctx.image(handle).width, 8);
    }

    #[test]
    fn test_find_cube_image_falls_through_to_quake_suffixes() {
        let mut ctx = test_context();
        let mut device = HeadlessDevice::default();
        let mut fs = MemoryFileSystem::new();
        insert_cube_faces(&mut fs, "env/sky", &["rt", "lf", "bk", "ft", "up", "dn"], 8);

        let handle = find_cube_image(
            &mut ctx, &mut device, &fs, "env/sky",
            ImageBits::empty(), FilterType::Linear, WrapType::EdgeClamp.into(), None,
        )
        .unwrap();
        assert!(handle.is_some());
    }

    #[test]
    fn test_find_cube_image_incomplete_set_fails() {
        let mut ctx = test_context();
        let mut device = HeadlessDevice::default();
        let mut fs = MemoryFileSystem::new();
        // five faces only
        for suffix in ["px", "nx", "py", "ny", "pz"] {
            fs.insert(
                format!("env/sky_{}.png", suffix),
                png_bytes(8, 8, [1, 1, 1, 255]),
            );
        }

        let handle = find_cube_image(
            &mut ctx, &mut device, &fs, "env/sky",
            ImageBits::empty(), FilterType::Linear, WrapType::EdgeClamp.into(), None,
        )
        .unwrap();
        assert!(handle.is_none());
    }

    #[test]
    fn test_find_cube_image_mismatched_face_size_fails() {
        let mut ctx = test_context();
        let mut device = HeadlessDevice::default();
        let mut fs = MemoryFileSystem::new();
        insert_cube_faces(&mut fs, "env/sky", &["px", "nx", "py", "ny", "pz", "nz"], 8);
        fs.insert("env/sky_nz.png", png_bytes(16, 16, [1, 1, 1, 255]));

        let handle = find_cube_image(
            &mut ctx, &mut device, &fs, "env/sky",
            ImageBits::empty(), FilterType::Linear, WrapType::EdgeClamp.into(), None,
        )
        .unwrap();
        assert!(handle.is_none());
    }

    // ============================================================
    // Flip / flop / rotate
    // ============================================================

    #[test]
    fn test_flip_horizontal() {
        let mut pic = vec![0u8; 2 * 2 * 4];
        pic[0] = 1; // (0,0)
        pic[4] = 2; // (1,0)
        flip_horizontal(&mut pic, 2, 2);
        assert_eq!(pic[0], 2);
        assert_eq!(pic[4], 1);
    }

    #[test]
    fn test_flip_vertical() {
        let mut pic = vec![0u8; 2 * 2 * 4];
        pic[0] = 1; // (0,0)
        pic[8] = 2; // (0,1)
        flip_vertical(&mut pic, 2, 2);
        assert_eq!(pic[0], 2);
        assert_eq!(pic[8], 1);
    }

    #[test]
    fn test_rotate_90_round_trip() {
        let mut pic: Vec<u8> = (0..2 * 2 * 4).map(|i| i as u8).collect();
        let original = pic.clone();
        rotate(&mut pic, 2, 2, 90);
        assert_ne!(pic, original);
        rotate(&mut pic, 2, 2, -90);
        assert_eq!(pic, original);
    }

    // ============================================================
    // Builtins
    // ============================================================

    #[test]
    fn test_builtin_images_registered() {
        let mut ctx = RenderContext::new(RenderConfig::default());
        let mut device = HeadlessDevice::default();
        init_images(&mut ctx, &mut device).unwrap();

        for name in [
            "_default", "_white", "_black", "_grey", "_red", "_green", "_blue",
            "_flat", "_quadratic", "_randomNormals", "_fog", "_noFalloff",
            "_attenuationXY", "_blackCube", "_whiteCube", "_autoCube", "_colorGrade",
            "_brdfLut",
        ] {
            assert!(get_texture_id(&ctx, name).is_some(), "{} missing", name);
        }
        assert_eq!(ctx.builtins.scratch_images.len(), MAX_SCRATCH_IMAGES);
        assert!(device.all_unbound());
    }

    #[test]
    fn test_white_image_tolerates_any_flags() {
        let mut ctx = RenderContext::new(RenderConfig::default());
        let mut device = HeadlessDevice::default();
        init_images(&mut ctx, &mut device).unwrap();
        let fs = MemoryFileSystem::new();

        let white = ctx.builtins.white_image.unwrap();
        let found = find_image_file(
            &mut ctx, &mut device, &fs, "_white",
            ImageBits::NOPICMIP | ImageBits::NORMALMAP | ImageBits::ALPHA,
            FilterType::Nearest, WrapType::AlphaZeroClamp.into(), Some("mat"),
        )
        .unwrap()
        .unwrap();
        assert_eq!(found, white);
    }

    #[test]
    fn test_shutdown_deletes_all_textures() {
        let mut ctx = RenderContext::new(RenderConfig::default());
        let mut device = HeadlessDevice::default();
        init_images(&mut ctx, &mut device).unwrap();

        let created = ctx.images.len();
        shutdown_images(&mut ctx, &mut device);
        let deleted = device
            .calls
            .iter()
            .filter(|c| matches!(c, DeviceCall::DeleteTexture(_)))
            .count();
        assert_eq!(created, deleted);
        assert!(ctx.images.is_empty());
    }

    #[test]
    fn test_image_list_mentions_names() {
        let mut ctx = RenderContext::new(RenderConfig::default());
        let mut device = HeadlessDevice::default();
        init_images(&mut ctx, &mut device).unwrap();

        let listing = image_list(&ctx);
        assert!(listing.contains("_white"));
        assert!(listing.contains("total images"));
    }

    #[test]
    fn test_texture_mode_refilters_default_images() {
        let mut ctx = test_context();
        let mut device = HeadlessDevice::default();
        let data = solid_rgba(4, 4, [5, 5, 5, 255]);
        create_image(
            &mut ctx, &mut device, "a", Some(&data), 4, 4,
            ImageBits::NOPICMIP, FilterType::Default, WrapType::Repeat.into(),
        )
        .unwrap();

        device.calls.clear();
        texture_mode(&mut ctx, &mut device, "GL_LINEAR_MIPMAP_LINEAR");
        assert_eq!(ctx.filter_min, TextureFilter::LinearMipmapLinear);
        assert!(device.calls.iter().any(|c| matches!(
            c,
            DeviceCall::SetFilter(_, TextureFilter::LinearMipmapLinear, TextureFilter::Linear)
        )));
        assert!(device.all_unbound());
    }

    // ============================================================
    // Misc helpers
    // ============================================================

    #[test]
    fn test_next_power_of_two() {
        assert_eq!(next_power_of_two(1), 1);
        assert_eq!(next_power_of_two(3), 4);
        assert_eq!(next_power_of_two(64), 64);
        assert_eq!(next_power_of_two(100), 128);
    }

    #[test]
    fn test_sub_image_cpy() {
        let mut dest = vec![0u8; 4 * 4];
        let src = vec![9u8; 2 * 2];
        sub_image_cpy(&mut dest, 0, 0, 4, 4, &src, 2, 2, 1);
        assert_eq!(dest[0], 9);
        assert_eq!(dest[1], 9);
        assert_eq!(dest[2], 0);
        assert_eq!(dest[4], 9);
        assert_eq!(dest[5], 9);
        assert_eq!(dest[8], 0);
    }

    #[test]
    fn test_integrate_brdf_in_range() {
        for (nv, r) in [(0.1, 0.1), (0.5, 0.5), (0.9, 0.2), (0.95, 0.95)] {
            let (a, b) = integrate_brdf(nv, r, 32);
            assert!((0.0..=1.0).contains(&a), "scale {} out of range", a);
            assert!((0.0..=1.0).contains(&b), "bias {} out of range", b);
            assert!(a + b <= 1.2, "energy {} too high", a + b);
        }
    }

    #[test]
    fn test_brdf_lut_is_two_component_float() {
        let mut ctx = RenderContext::new(RenderConfig::default());
        let mut device = HeadlessDevice::default();
        init_images(&mut ctx, &mut device).unwrap();

        let handle = ctx.builtins.brdf_lut_image.unwrap();
        assert_eq!(ctx.image(handle).internal_format, InternalFormat::Rg16F);
    }

    #[test]
    fn test_decode_image_files_preserves_order() {
        let mut fs = MemoryFileSystem::new();
        fs.insert("a.png", png_bytes(2, 2, [1, 0, 0, 255]));
        fs.insert("c.png", png_bytes(2, 2, [3, 0, 0, 255]));

        let names = vec!["a.png".to_string(), "b.png".to_string(), "c.png".to_string()];
        let decoded = decode_image_files(&fs, &names, 0xFF);
        assert!(decoded[0].is_some());
        assert!(decoded[1].is_none());
        assert!(decoded[2].is_some());
    }
}
