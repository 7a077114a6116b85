// tr_image_program.rs — image decoding and the procedural image program
// language used by material definitions:
//
//   heightMap(textures/base/wall_h, 4)
//   addNormals(textures/base/wall_n, heightMap(textures/base/wall_h, 2))
//
// Every operator produces a canonical 32-bit RGBA buffer. Failures are
// never fatal: a warning is logged (tagged with the owning material when
// known) and no image is produced; the caller substitutes a fallback.

use myq3_common::files::FileSystem;
use myq3_common::q_shared::{
    com_get_extension, com_parse_ext, com_strip_extension, q_streq_nocase, vector_normalize, Vec3,
};

use crate::tr_local::ImageBits;

// ============================================================
// Decoded image buffer
// ============================================================

/// A decoded or composited image, owned until consumed by the upload
/// engine. Pixels are row-major RGBA8, top-to-bottom.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramImage {
    pub pixels: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl ProgramImage {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            pixels: vec![0; (width * height * 4) as usize],
            width,
            height,
        }
    }

    pub fn texel_count(&self) -> usize {
        (self.width * self.height) as usize
    }
}

// ============================================================
// Byte <-> float texel mapping (normals centered on 128)
// ============================================================

pub fn tex_byte_to_float(v: u8) -> f32 {
    (v as i32 - 128) as f32 / 127.0
}

pub fn tex_float_to_byte(v: f32) -> u8 {
    (128 + (v * 127.0 + 0.5) as i32).clamp(0, 255) as u8
}

// ============================================================
// Codec dispatch
// ============================================================

struct ImageLoaderEntry {
    ext: &'static str,
    format: image::ImageFormat,
}

// The ordering is the order of preference when multiple formats exist for
// the same base name.
const IMAGE_LOADERS: &[ImageLoaderEntry] = &[
    ImageLoaderEntry { ext: "webp", format: image::ImageFormat::WebP },
    ImageLoaderEntry { ext: "png", format: image::ImageFormat::Png },
    ImageLoaderEntry { ext: "tga", format: image::ImageFormat::Tga },
    ImageLoaderEntry { ext: "jpg", format: image::ImageFormat::Jpeg },
    ImageLoaderEntry { ext: "jpeg", format: image::ImageFormat::Jpeg },
];

fn decode_bytes(raw: &[u8], format: image::ImageFormat, alpha_byte: u8) -> Option<ProgramImage> {
    let img = image::load_from_memory_with_format(raw, format).ok()?;
    let had_alpha = img.color().has_alpha();
    let rgba = img.to_rgba8();
    let width = rgba.width();
    let height = rgba.height();
    let mut pixels = rgba.into_raw();

    // sources without an alpha channel take the caller's default
    if !had_alpha && alpha_byte != 0xFF {
        for a in pixels.iter_mut().skip(3).step_by(4) {
            *a = alpha_byte;
        }
    }

    Some(ProgramImage { pixels, width, height })
}

/// Load a single image file, trying the name's own extension first and then
/// every supported format in preference order against the stripped name.
pub fn load_image_file(fs: &dyn FileSystem, name: &str, alpha_byte: u8) -> Option<ProgramImage> {
    let mut filename = name.to_string();
    let ext = com_get_extension(&filename);

    if !ext.is_empty() {
        if let Some(loader) = IMAGE_LOADERS.iter().find(|l| q_streq_nocase(l.ext, ext)) {
            if let Some(raw) = fs.load_file(&filename) {
                if let Some(pic) = decode_bytes(&raw, loader.format, alpha_byte) {
                    return Some(pic);
                }
            }
            // most likely the file isn't there; retry without the extension
            filename = com_strip_extension(name).to_string();
        }
    }

    for loader in IMAGE_LOADERS {
        let alt_name = format!("{}.{}", filename, loader.ext);
        if let Some(raw) = fs.load_file(&alt_name) {
            if let Some(pic) = decode_bytes(&raw, loader.format, alpha_byte) {
                return Some(pic);
            }
        }
    }

    None
}

// ============================================================
// Per-pixel operators
// ============================================================

/// Convert a greyscale height map into a normal map via a centered
/// finite-difference gradient. The alpha channel is zeroed; it is reserved
/// for a displacement map.
pub fn height_map_to_normal_map(img: &mut ProgramImage, scale: f32) {
    let width = img.width as usize;
    let height = img.height as usize;
    let row = 4 * width;
    let px = &mut img.pixels;

    for y in 0..height {
        for x in 0..width {
            let i = (y * width + x) * 4;

            let c = (px[i] as f32 + px[i + 1] as f32 + px[i + 2] as f32) / 255.0;

            // the texel to the right, not wrapping at the edge
            let cx = if x == width - 1 {
                c
            } else {
                (px[i + 4] as f32 + px[i + 5] as f32 + px[i + 6] as f32) / 255.0
            };

            // the texel one down, not wrapping at the edge
            let cy = if y == height - 1 {
                c
            } else {
                (px[i + row] as f32 + px[i + row + 1] as f32 + px[i + row + 2] as f32) / 255.0
            };

            let mut n: Vec3 = [scale * (c - cx), scale * (c - cy), 1.0];
            if vector_normalize(&mut n) == 0.0 {
                n = [0.0, 0.0, 1.0];
            }

            px[i] = tex_float_to_byte(n[0]);
            px[i + 1] = tex_float_to_byte(n[1]);
            px[i + 2] = tex_float_to_byte(n[2]);
            px[i + 3] = 0;
        }
    }
}

/// Write the second image's RGB average into the first's alpha channel.
pub fn displace_map(img: &mut ProgramImage, disp: &ProgramImage) {
    for (out, src) in img.pixels.chunks_exact_mut(4).zip(disp.pixels.chunks_exact(4)) {
        out[3] = ((src[0] as u32 + src[1] as u32 + src[2] as u32) / 3) as u8;
    }
}

/// Average a gloss map into the specular map's alpha channel.
pub fn add_gloss(img: &mut ProgramImage, gloss: &ProgramImage) {
    // separate gloss maps should always be greyscale, but average anyway
    for (out, src) in img.pixels.chunks_exact_mut(4).zip(gloss.pixels.chunks_exact(4)) {
        out[3] = ((src[0] as u32 + src[1] as u32 + src[2] as u32) / 3) as u8;
    }
}

/// Add two normal maps per-texel and renormalize; alphas add with clamp.
pub fn add_normals(img: &mut ProgramImage, other: &ProgramImage) {
    for (out, src) in img.pixels.chunks_exact_mut(4).zip(other.pixels.chunks_exact(4)) {
        let mut n: Vec3 = [
            tex_byte_to_float(out[0]) + tex_byte_to_float(src[0]),
            tex_byte_to_float(out[1]) + tex_byte_to_float(src[1]),
            tex_byte_to_float(out[2]) + tex_byte_to_float(src[2]),
        ];
        if vector_normalize(&mut n) == 0.0 {
            n = [0.0, 0.0, 1.0];
        }

        let a = out[3] as i32 + src[3] as i32;

        out[0] = tex_float_to_byte(n[0]);
        out[1] = tex_float_to_byte(n[1]);
        out[2] = tex_float_to_byte(n[2]);
        out[3] = a.clamp(0, 255) as u8;
    }
}

pub fn invert_alpha(img: &mut ProgramImage) {
    for texel in img.pixels.chunks_exact_mut(4) {
        texel[3] = 255 - texel[3];
    }
}

pub fn invert_color(img: &mut ProgramImage) {
    for texel in img.pixels.chunks_exact_mut(4) {
        texel[0] = 255 - texel[0];
        texel[1] = 255 - texel[1];
        texel[2] = 255 - texel[2];
    }
}

/// Broadcast the red channel into G, B and A.
pub fn make_intensity(img: &mut ProgramImage) {
    for texel in img.pixels.chunks_exact_mut(4) {
        let r = texel[0];
        texel[1] = r;
        texel[2] = r;
        texel[3] = r;
    }
}

/// Move the RGB average into alpha and force the color channels to white.
pub fn make_alpha(img: &mut ProgramImage) {
    for texel in img.pixels.chunks_exact_mut(4) {
        let avg = ((texel[0] as u32 + texel[1] as u32 + texel[2] as u32) / 3) as u8;
        texel[0] = 255;
        texel[1] = 255;
        texel[2] = 255;
        texel[3] = avg;
    }
}

// ============================================================
// Image program parser
// ============================================================

fn warn_material(material_name: Option<&str>, what: &str) {
    if let Some(name) = material_name.filter(|n| !n.is_empty()) {
        log::warn!("failed to parse {} expression for shader '{}'", what, name);
    }
}

type ParseResult<'a> = (Option<ProgramImage>, Option<&'a str>);

fn expect_token<'a>(text: &'a str, expected: &str, keyword: &str) -> (bool, Option<&'a str>) {
    let (token, rest) = com_parse_ext(text, false);
    if token != expected {
        log::warn!(
            "expecting '{}', found '{}' for {}",
            expected,
            token,
            keyword
        );
        return (false, rest);
    }
    (true, rest)
}

/// Parse the single-operand tail `(<map>)` and apply `op`.
fn parse_unary<'a>(
    fs: &dyn FileSystem,
    text: &'a str,
    bits: &mut ImageBits,
    material_name: Option<&str>,
    keyword: &str,
    op: impl FnOnce(&mut ProgramImage),
) -> ParseResult<'a> {
    let (ok, rest) = expect_token(text, "(", keyword);
    let Some(rest) = rest.filter(|_| ok) else {
        return (None, rest);
    };

    let (pic, rest) = load_image(fs, rest, bits, material_name);
    let Some(mut pic) = pic else {
        log::warn!("failed loading of image for {}", keyword);
        return (None, rest);
    };
    let Some(rest) = rest else {
        return (None, None);
    };

    let (ok, rest) = expect_token(rest, ")", keyword);
    if !ok {
        return (None, rest);
    }

    op(&mut pic);
    (Some(pic), rest)
}

/// Parse the two-operand tail `(<map>, <map>)` and apply `op`. A dimension
/// mismatch produces no image at all; both operands are dropped.
fn parse_binary<'a>(
    fs: &dyn FileSystem,
    text: &'a str,
    bits: &mut ImageBits,
    material_name: Option<&str>,
    keyword: &str,
    op: impl FnOnce(&mut ProgramImage, &ProgramImage),
) -> ParseResult<'a> {
    let (ok, rest) = expect_token(text, "(", keyword);
    let Some(rest) = rest.filter(|_| ok) else {
        return (None, rest);
    };

    let (pic, rest) = load_image(fs, rest, bits, material_name);
    let Some(mut pic) = pic else {
        log::warn!("failed loading of first image for {}", keyword);
        return (None, rest);
    };
    let Some(rest) = rest else {
        return (None, None);
    };

    let (ok, rest) = expect_token(rest, ",", keyword);
    let Some(rest) = rest.filter(|_| ok) else {
        return (None, rest);
    };

    let (pic2, rest) = load_image(fs, rest, bits, material_name);
    let Some(pic2) = pic2 else {
        log::warn!("failed loading of second image for {}", keyword);
        return (None, rest);
    };

    // a missing closing paren only warns
    let rest = match rest {
        Some(r) => expect_token(r, ")", keyword).1,
        None => None,
    };

    if pic.width != pic2.width || pic.height != pic2.height {
        log::warn!(
            "images for {} have different dimensions ({} x {} != {} x {})",
            keyword,
            pic.width,
            pic.height,
            pic2.width,
            pic2.height
        );
        return (None, rest);
    }

    op(&mut pic, &pic2);
    (Some(pic), rest)
}

fn parse_height_map<'a>(
    fs: &dyn FileSystem,
    text: &'a str,
    bits: &mut ImageBits,
    material_name: Option<&str>,
) -> ParseResult<'a> {
    let (ok, rest) = expect_token(text, "(", "heightMap");
    let Some(rest) = rest.filter(|_| ok) else {
        return (None, rest);
    };

    let (pic, rest) = load_image(fs, rest, bits, material_name);
    let Some(mut pic) = pic else {
        log::warn!("failed loading of image for heightMap");
        return (None, rest);
    };
    let Some(rest) = rest else {
        return (None, None);
    };

    let (ok, rest) = expect_token(rest, ",", "heightMap");
    let Some(rest) = rest.filter(|_| ok) else {
        return (None, rest);
    };

    let (token, rest) = com_parse_ext(rest, false);
    let scale: f32 = token.parse().unwrap_or(0.0);
    let Some(rest) = rest else {
        return (None, None);
    };

    let (ok, rest) = expect_token(rest, ")", "heightMap");
    if !ok {
        return (None, rest);
    }

    height_map_to_normal_map(&mut pic, scale);
    (Some(pic), rest)
}

/// Load one image expression from `text` into a canonical 32-bit RGBA
/// buffer, updating `bits` with the content semantics the operators imply.
/// Returns the image (None on failure) and the unconsumed remainder.
pub fn load_image<'a>(
    fs: &dyn FileSystem,
    text: &'a str,
    bits: &mut ImageBits,
    material_name: Option<&str>,
) -> ParseResult<'a> {
    let (token, rest) = com_parse_ext(text, false);

    if token.is_empty() {
        log::warn!("NULL parameter for image program");
        return (None, rest);
    }

    if q_streq_nocase(&token, "heightMap") {
        // heightMap(<map>, <float>)  Turns a grayscale height map into a
        // normal map. <float> varies the bumpiness.
        let (pic, rest) = parse_height_map(fs, rest.unwrap_or(""), bits, material_name);
        if pic.is_none() {
            warn_material(material_name, "heightMap(<map>, <float>)");
        } else {
            bits.remove(ImageBits::ALPHA);
            bits.insert(ImageBits::NORMALMAP);
        }
        (pic, rest)
    } else if q_streq_nocase(&token, "displaceMap") {
        // displaceMap(<map>, <map>)  Sets the alpha channel to an average
        // of the second image's RGB channels.
        let (pic, rest) = parse_binary(
            fs,
            rest.unwrap_or(""),
            bits,
            material_name,
            "displaceMap",
            displace_map,
        );
        if pic.is_none() {
            warn_material(material_name, "displaceMap(<map>, <map>)");
        } else {
            bits.remove(ImageBits::ALPHA);
            bits.insert(ImageBits::NORMALMAP | ImageBits::DISPLACEMAP);
        }
        (pic, rest)
    } else if q_streq_nocase(&token, "addNormals") {
        // addNormals(<map>, <map>)  Adds two normal maps together. Result
        // is normalized.
        let (pic, rest) = parse_binary(
            fs,
            rest.unwrap_or(""),
            bits,
            material_name,
            "addNormals",
            add_normals,
        );
        if pic.is_none() {
            warn_material(material_name, "addNormals(<map>, <map>)");
        } else {
            bits.remove(ImageBits::ALPHA);
            bits.insert(ImageBits::NORMALMAP);
        }
        (pic, rest)
    } else if q_streq_nocase(&token, "addGloss") {
        let (pic, rest) = parse_binary(
            fs,
            rest.unwrap_or(""),
            bits,
            material_name,
            "addGloss",
            add_gloss,
        );
        if pic.is_none() {
            warn_material(material_name, "addGloss(<map>, <map>)");
        } else {
            bits.remove(ImageBits::ALPHA);
        }
        (pic, rest)
    } else if q_streq_nocase(&token, "smoothNormals") {
        log::warn!("smoothNormals(<map>) keyword not supported");
        (None, rest)
    } else if q_streq_nocase(&token, "add") {
        log::warn!("add(<map>, <map>) keyword not supported");
        (None, rest)
    } else if q_streq_nocase(&token, "scale") {
        log::warn!("scale(<map>, <float> [,float] [,float] [,float]) keyword not supported");
        (None, rest)
    } else if q_streq_nocase(&token, "invertAlpha") {
        // invertAlpha(<map>)  Inverts the alpha channel (0 becomes 1, 1
        // becomes 0).
        let (pic, rest) = parse_unary(
            fs,
            rest.unwrap_or(""),
            bits,
            material_name,
            "invertAlpha",
            invert_alpha,
        );
        if pic.is_none() {
            warn_material(material_name, "invertAlpha(<map>)");
        }
        (pic, rest)
    } else if q_streq_nocase(&token, "invertColor") {
        // invertColor(<map>)  Inverts the R, G, and B channels.
        let (pic, rest) = parse_unary(
            fs,
            rest.unwrap_or(""),
            bits,
            material_name,
            "invertColor",
            invert_color,
        );
        if pic.is_none() {
            warn_material(material_name, "invertColor(<map>)");
        }
        (pic, rest)
    } else if q_streq_nocase(&token, "makeIntensity") {
        // makeIntensity(<map>)  Copies the red channel to the G, B, and A
        // channels.
        let (pic, rest) = parse_unary(
            fs,
            rest.unwrap_or(""),
            bits,
            material_name,
            "makeIntensity",
            make_intensity,
        );
        if pic.is_none() {
            warn_material(material_name, "makeIntensity(<map>)");
        } else {
            bits.remove(ImageBits::ALPHA);
            bits.remove(ImageBits::NORMALMAP);
        }
        (pic, rest)
    } else if q_streq_nocase(&token, "makeAlpha") {
        // makeAlpha(<map>)  Sets the alpha channel to an average of the RGB
        // channels. Sets the RGB channels to white.
        let (pic, rest) = parse_unary(
            fs,
            rest.unwrap_or(""),
            bits,
            material_name,
            "makeAlpha",
            make_alpha,
        );
        if pic.is_none() {
            warn_material(material_name, "makeAlpha(<map>)");
        } else {
            bits.remove(ImageBits::NORMALMAP);
            bits.insert(ImageBits::ALPHA);
        }
        (pic, rest)
    } else {
        // plain filename; normal maps keep a cleared alpha for displacement
        let alpha_byte = if bits.contains(ImageBits::NORMALMAP) {
            0x00
        } else {
            0xFF
        };
        (load_image_file(fs, &token, alpha_byte), rest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use myq3_common::files::MemoryFileSystem;
    use std::io::Cursor;

    fn solid_image(width: u32, height: u32, rgba: [u8; 4]) -> ProgramImage {
        let mut img = ProgramImage::new(width, height);
        for texel in img.pixels.chunks_exact_mut(4) {
            texel.copy_from_slice(&rgba);
        }
        img
    }

    fn encode(img: &ProgramImage, format: image::ImageFormat) -> Vec<u8> {
        let buf = image::RgbaImage::from_raw(img.width, img.height, img.pixels.clone()).unwrap();
        let mut out = Cursor::new(Vec::new());
        image::DynamicImage::ImageRgba8(buf)
            .write_to(&mut out, format)
            .unwrap();
        out.into_inner()
    }

    // ============================================================
    // Byte <-> float mapping
    // ============================================================

    #[test]
    fn test_byte_float_round_trip() {
        for v in [0u8, 2, 64, 128, 192, 255] {
            let f = tex_byte_to_float(v);
            let back = tex_float_to_byte(f);
            assert_eq!(back, v, "round trip failed for {}", v);
        }
    }

    #[test]
    fn test_byte_float_midpoint_is_zero() {
        assert_eq!(tex_byte_to_float(128), 0.0);
        assert_eq!(tex_float_to_byte(0.0), 128);
        assert_eq!(tex_float_to_byte(1.0), 255);
    }

    // ============================================================
    // Per-pixel operators
    // ============================================================

    #[test]
    fn test_invert_alpha_involution() {
        let mut img = solid_image(4, 4, [10, 20, 30, 40]);
        let original = img.clone();
        invert_alpha(&mut img);
        assert_eq!(img.pixels[3], 215);
        invert_alpha(&mut img);
        assert_eq!(img, original);
    }

    #[test]
    fn test_invert_color_leaves_alpha() {
        let mut img = solid_image(2, 2, [0, 128, 255, 77]);
        invert_color(&mut img);
        assert_eq!(&img.pixels[..4], &[255, 127, 0, 77]);
    }

    #[test]
    fn test_make_intensity_broadcasts_red() {
        let mut img = solid_image(2, 2, [99, 1, 2, 3]);
        make_intensity(&mut img);
        assert_eq!(&img.pixels[..4], &[99, 99, 99, 99]);
    }

    #[test]
    fn test_make_alpha_whitens_rgb() {
        let mut img = solid_image(2, 2, [30, 60, 90, 0]);
        make_alpha(&mut img);
        assert_eq!(&img.pixels[..4], &[255, 255, 255, 60]);
    }

    #[test]
    fn test_add_normals_unit_length() {
        // two arbitrary non-degenerate normal maps
        let a = solid_image(4, 4, [tex_float_to_byte(0.6), 128, tex_float_to_byte(0.8), 10]);
        let b = solid_image(4, 4, [128, tex_float_to_byte(0.5), tex_float_to_byte(0.866), 20]);

        let mut img = a.clone();
        add_normals(&mut img, &b);

        for texel in img.pixels.chunks_exact(4) {
            let n: Vec3 = [
                tex_byte_to_float(texel[0]),
                tex_byte_to_float(texel[1]),
                tex_byte_to_float(texel[2]),
            ];
            let len = (n[0] * n[0] + n[1] * n[1] + n[2] * n[2]).sqrt();
            assert!((len - 1.0).abs() < 0.02, "length {} out of tolerance", len);
            assert_eq!(texel[3], 30);
        }
    }

    #[test]
    fn test_add_normals_zero_sum_falls_back_to_up() {
        // x components cancel exactly, y and z are both zero
        let a = solid_image(1, 1, [200, 128, 128, 0]);
        let b = solid_image(1, 1, [56, 128, 128, 0]);

        let mut img = a.clone();
        add_normals(&mut img, &b);
        assert_eq!(&img.pixels[..3], &[128, 128, 255]);
    }

    #[test]
    fn test_add_normals_alpha_clamps() {
        let a = solid_image(1, 1, [255, 128, 128, 200]);
        let b = solid_image(1, 1, [128, 255, 128, 100]);
        let mut img = a.clone();
        add_normals(&mut img, &b);
        assert_eq!(img.pixels[3], 255);
    }

    #[test]
    fn test_height_map_flat_gives_up_normal() {
        let mut img = solid_image(4, 4, [100, 100, 100, 255]);
        height_map_to_normal_map(&mut img, 4.0);
        for texel in img.pixels.chunks_exact(4) {
            assert_eq!(texel, &[128, 128, 255, 0]);
        }
    }

    #[test]
    fn test_height_map_slope_tilts_normal() {
        // brightness ramps down to the right: dcx = scale * (c - cx) > 0
        let mut img = ProgramImage::new(4, 1);
        for x in 0..4u32 {
            let v = 200 - (x as u8) * 50;
            let i = (x * 4) as usize;
            img.pixels[i] = v;
            img.pixels[i + 1] = v;
            img.pixels[i + 2] = v;
            img.pixels[i + 3] = 255;
        }
        height_map_to_normal_map(&mut img, 5.0);

        // interior texel leans +x, stays unit length
        let texel = &img.pixels[4..8];
        assert!(texel[0] > 128);
        assert_eq!(texel[1], 128);
        let n: Vec3 = [
            tex_byte_to_float(texel[0]),
            tex_byte_to_float(texel[1]),
            tex_byte_to_float(texel[2]),
        ];
        let len = (n[0] * n[0] + n[1] * n[1] + n[2] * n[2]).sqrt();
        assert!((len - 1.0).abs() < 0.02);
    }

    #[test]
    fn test_displace_map_writes_alpha_only() {
        let mut img = solid_image(2, 2, [1, 2, 3, 4]);
        let disp = solid_image(2, 2, [30, 60, 90, 255]);
        displace_map(&mut img, &disp);
        assert_eq!(&img.pixels[..4], &[1, 2, 3, 60]);
    }

    // ============================================================
    // Codec dispatch
    // ============================================================

    #[test]
    fn test_decode_fills_default_alpha_for_opaque_sources() {
        // JPEG never carries alpha
        let src = solid_image(8, 8, [128, 128, 255, 255]);
        let raw = {
            let rgb = image::DynamicImage::ImageRgba8(
                image::RgbaImage::from_raw(src.width, src.height, src.pixels.clone()).unwrap(),
            )
            .to_rgb8();
            let mut out = Cursor::new(Vec::new());
            image::DynamicImage::ImageRgb8(rgb)
                .write_to(&mut out, image::ImageFormat::Jpeg)
                .unwrap();
            out.into_inner()
        };

        let pic = decode_bytes(&raw, image::ImageFormat::Jpeg, 0x00).unwrap();
        assert!(pic.pixels.iter().skip(3).step_by(4).all(|&a| a == 0));
    }

    #[test]
    fn test_load_prefers_png_over_tga() {
        let mut fs = MemoryFileSystem::new();
        let png = solid_image(2, 2, [255, 0, 0, 255]);
        let tga = solid_image(2, 2, [0, 255, 0, 255]);
        fs.insert("pics/test.png", encode(&png, image::ImageFormat::Png));
        fs.insert("pics/test.tga", encode(&tga, image::ImageFormat::Tga));

        let pic = load_image_file(&fs, "pics/test", 0xFF).unwrap();
        assert_eq!(&pic.pixels[..3], &[255, 0, 0]);
    }

    #[test]
    fn test_load_retries_without_missing_extension() {
        let mut fs = MemoryFileSystem::new();
        let tga = solid_image(2, 2, [0, 0, 255, 255]);
        fs.insert("pics/test.tga", encode(&tga, image::ImageFormat::Tga));

        // requested as .jpg, which doesn't exist
        let pic = load_image_file(&fs, "pics/test.jpg", 0xFF).unwrap();
        assert_eq!(&pic.pixels[..3], &[0, 0, 255]);
    }

    #[test]
    fn test_load_missing_file_fails() {
        let fs = MemoryFileSystem::new();
        assert!(load_image_file(&fs, "pics/nothere", 0xFF).is_none());
    }

    // ============================================================
    // Image program parsing
    // ============================================================

    #[test]
    fn test_program_plain_filename() {
        let mut fs = MemoryFileSystem::new();
        let png = solid_image(4, 4, [9, 8, 7, 255]);
        fs.insert("textures/t.png", encode(&png, image::ImageFormat::Png));

        let mut bits = ImageBits::empty();
        let (pic, _) = load_image(&fs, "textures/t", &mut bits, None);
        let pic = pic.unwrap();
        assert_eq!((pic.width, pic.height), (4, 4));
        assert_eq!(&pic.pixels[..3], &[9, 8, 7]);
    }

    #[test]
    fn test_program_height_map_sets_bits() {
        let mut fs = MemoryFileSystem::new();
        let png = solid_image(4, 4, [80, 80, 80, 255]);
        fs.insert("textures/h.png", encode(&png, image::ImageFormat::Png));

        let mut bits = ImageBits::ALPHA;
        let (pic, _) = load_image(&fs, "heightMap ( textures/h , 2.0 )", &mut bits, None);
        assert!(pic.is_some());
        assert!(bits.contains(ImageBits::NORMALMAP));
        assert!(!bits.contains(ImageBits::ALPHA));
    }

    #[test]
    fn test_program_displace_map_dimension_mismatch_fails() {
        let mut fs = MemoryFileSystem::new();
        let a = solid_image(8, 8, [1, 1, 1, 255]);
        let b = solid_image(4, 4, [2, 2, 2, 255]);
        fs.insert("a.png", encode(&a, image::ImageFormat::Png));
        fs.insert("b.png", encode(&b, image::ImageFormat::Png));

        let mut bits = ImageBits::empty();
        let (pic, _) = load_image(&fs, "displaceMap(a.png, b.png)", &mut bits, Some("mat"));
        assert!(pic.is_none());
        assert!(!bits.contains(ImageBits::DISPLACEMAP));
    }

    #[test]
    fn test_program_displace_map_sets_bits() {
        let mut fs = MemoryFileSystem::new();
        let a = solid_image(4, 4, [1, 1, 1, 255]);
        let b = solid_image(4, 4, [90, 90, 90, 255]);
        fs.insert("a.png", encode(&a, image::ImageFormat::Png));
        fs.insert("b.png", encode(&b, image::ImageFormat::Png));

        let mut bits = ImageBits::empty();
        let (pic, _) = load_image(&fs, "displaceMap(a.png, b.png)", &mut bits, None);
        let pic = pic.unwrap();
        assert_eq!(pic.pixels[3], 90);
        assert!(bits.contains(ImageBits::NORMALMAP | ImageBits::DISPLACEMAP));
    }

    #[test]
    fn test_program_unsupported_keywords_rejected() {
        let fs = MemoryFileSystem::new();
        for expr in ["smoothNormals(x)", "add(x, y)", "scale(x, 0.5)"] {
            let mut bits = ImageBits::empty();
            let (pic, _) = load_image(&fs, expr, &mut bits, None);
            assert!(pic.is_none(), "{} must not produce an image", expr);
        }
    }

    #[test]
    fn test_program_keywords_case_insensitive() {
        let mut fs = MemoryFileSystem::new();
        let png = solid_image(2, 2, [10, 20, 30, 40]);
        fs.insert("x.png", encode(&png, image::ImageFormat::Png));

        let mut bits = ImageBits::empty();
        let (pic, _) = load_image(&fs, "INVERTALPHA(x.png)", &mut bits, None);
        assert_eq!(pic.unwrap().pixels[3], 215);
    }

    #[test]
    fn test_program_nested_expression() {
        let mut fs = MemoryFileSystem::new();
        let n = solid_image(4, 4, [128, 128, 255, 0]);
        let h = solid_image(4, 4, [50, 50, 50, 255]);
        fs.insert("n.png", encode(&n, image::ImageFormat::Png));
        fs.insert("h.png", encode(&h, image::ImageFormat::Png));

        let mut bits = ImageBits::empty();
        let (pic, _) = load_image(
            &fs,
            "addNormals ( n.png, heightMap ( h.png, 1.0 ) )",
            &mut bits,
            None,
        );
        let pic = pic.unwrap();
        assert!(bits.contains(ImageBits::NORMALMAP));
        // flat height map + flat normal map stays straight up
        assert_eq!(&pic.pixels[..3], &[128, 128, 255]);
    }
}
