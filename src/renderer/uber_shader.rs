use std::fmt::Write as _;

use anyhow::Result;
use glam::{IVec2, Mat3, Vec2, Vec3};

use crate::{
    app::types::{Metric, Tonemap},
    color::{TURBO_ENTRIES, turbo_lut},
    raster::Image,
    renderer::tonemap::{
        FALSE_COLOR_BIAS, RELATIVE_EPSILON, apply_exposure_and_offset, apply_joint_relative_squared_error,
        apply_metric, apply_tonemap_over,
    },
};

pub const CHECKER_DARK: f32 = 0.5;
pub const CHECKER_LIGHT: f32 = 0.55;

pub const UNIFORM_BINDING: u32 = 0;
pub const IMAGE_TEXTURE_BINDING: u32 = 1;
pub const REFERENCE_TEXTURE_BINDING: u32 = 2;

const UBER_SHADER_TEMPLATE: &str = r#"
struct Uniforms {
    image_transform: mat3x3<f32>,
    reference_transform: mat3x3<f32>,
    bg_color: vec4<f32>,
    pixel_size: vec2<f32>,
    checker_size: vec2<f32>,
    exposure: f32,
    offset: f32,
    gamma: f32,
    tonemap: u32,
    metric: u32,
    has_image: u32,
    has_reference: u32,
    clamp_to_ldr: u32,
};

@group(0) @binding(__UNIFORM_BINDING__)
var<uniform> params: Uniforms;

@group(0) @binding(__IMAGE_TEXTURE_BINDING__)
var image_tex: texture_2d<f32>;

@group(0) @binding(__REFERENCE_TEXTURE_BINDING__)
var reference_tex: texture_2d<f32>;

const TONEMAP_SRGB: u32 = __TONEMAP_SRGB__u;
const TONEMAP_GAMMA: u32 = __TONEMAP_GAMMA__u;
const TONEMAP_FALSE_COLOR: u32 = __TONEMAP_FALSE_COLOR__u;

const METRIC_ERROR: u32 = __METRIC_ERROR__u;
const METRIC_ABSOLUTE_ERROR: u32 = __METRIC_ABSOLUTE_ERROR__u;
const METRIC_SQUARED_ERROR: u32 = __METRIC_SQUARED_ERROR__u;
const METRIC_RELATIVE_ABSOLUTE_ERROR: u32 = __METRIC_RELATIVE_ABSOLUTE_ERROR__u;
const METRIC_RELATIVE_SQUARED_ERROR: u32 = __METRIC_RELATIVE_SQUARED_ERROR__u;
const METRIC_RELATIVE_SQUARED_ERROR_2: u32 = __METRIC_RELATIVE_SQUARED_ERROR_2__u;
const METRIC_LOG_ABSOLUTE_ERROR: u32 = __METRIC_LOG_ABSOLUTE_ERROR__u;

const FALSE_COLOR_BIAS: f32 = __FALSE_COLOR_BIAS__;
const RELATIVE_EPSILON: f32 = __RELATIVE_EPSILON__;
const CHECKER_DARK: f32 = __CHECKER_DARK__;
const CHECKER_LIGHT: f32 = __CHECKER_LIGHT__;
const TURBO_ENTRIES: u32 = __TURBO_ENTRIES__u;

var<private> turbo: array<vec3<f32>, __TURBO_ENTRIES__> = array<vec3<f32>, __TURBO_ENTRIES__>(
__TURBO_LUT__);

struct VsOut {
    @builtin(position) position: vec4<f32>,
    @location(0) ndc: vec2<f32>,
};

@vertex
fn vs_main(@builtin(vertex_index) vertex_index: u32) -> VsOut {
    var positions = array<vec2<f32>, 3>(
        vec2<f32>(-1.0, -1.0),
        vec2<f32>(3.0, -1.0),
        vec2<f32>(-1.0, 3.0),
    );

    let pos = positions[vertex_index];

    var out: VsOut;
    out.position = vec4<f32>(pos, 0.0, 1.0);
    out.ndc = pos;
    return out;
}

fn sample_texture(tex: texture_2d<f32>, uv: vec2<f32>) -> vec4<f32> {
    if (uv.x < 0.0 || uv.x > 1.0 || uv.y < 0.0 || uv.y > 1.0) {
        return vec4<f32>(0.0);
    }

    let size = vec2<i32>(textureDimensions(tex));
    let texel = clamp(vec2<i32>(floor(uv * vec2<f32>(size))), vec2<i32>(0), size - vec2<i32>(1));
    var color = textureLoad(tex, texel, 0);
    if (params.clamp_to_ldr != 0u) {
        color = clamp(color, vec4<f32>(0.0), vec4<f32>(1.0));
    }
    return color;
}

fn mean3(v: vec3<f32>) -> f32 {
    return (v.x + v.y + v.z) / 3.0;
}

fn linear_to_srgb(x: f32) -> f32 {
    if (x <= 0.0031308) {
        return 12.92 * x;
    }
    return 1.055 * pow(x, 1.0 / 2.4) - 0.055;
}

fn srgb_to_linear(x: f32) -> f32 {
    if (x <= 0.04045) {
        return x / 12.92;
    }
    return pow((x + 0.055) / 1.055, 2.4);
}

fn false_color(v: f32) -> vec3<f32> {
    let c = clamp(v, 0.0, 1.0);
    let index = min(u32(c * f32(TURBO_ENTRIES)), TURBO_ENTRIES - 1u);
    return turbo[index];
}

fn false_color_coordinate(col: vec3<f32>) -> f32 {
    return log2(mean3(col) + FALSE_COLOR_BIAS) / 10.0 + 0.5;
}

fn apply_exposure_and_offset(col: vec3<f32>) -> vec3<f32> {
    return exp2(params.exposure) * col + vec3<f32>(params.offset);
}

fn apply_metric(image: vec3<f32>, reference: vec3<f32>) -> vec3<f32> {
    let diff = image - reference;
    if (params.metric == METRIC_ERROR) {
        return diff;
    } else if (params.metric == METRIC_ABSOLUTE_ERROR) {
        return abs(diff);
    } else if (params.metric == METRIC_SQUARED_ERROR) {
        return diff * diff;
    } else if (params.metric == METRIC_RELATIVE_ABSOLUTE_ERROR) {
        return abs(diff) / (reference + vec3<f32>(RELATIVE_EPSILON));
    } else if (params.metric == METRIC_RELATIVE_SQUARED_ERROR) {
        return diff * diff / (reference * reference + vec3<f32>(RELATIVE_EPSILON));
    } else if (params.metric == METRIC_RELATIVE_SQUARED_ERROR_2) {
        let reference_mean = mean3(reference);
        let sum = diff.x * diff.x + diff.y * diff.y + diff.z * diff.z;
        return vec3<f32>(sum / 3.0 / (reference_mean * reference_mean + RELATIVE_EPSILON));
    } else if (params.metric == METRIC_LOG_ABSOLUTE_ERROR) {
        return abs(log(vec3<f32>(1.0) + image) - log(vec3<f32>(1.0) + reference));
    }
    return vec3<f32>(0.0);
}

fn apply_tonemap(col: vec3<f32>, background: vec4<f32>) -> vec3<f32> {
    var out = vec3<f32>(0.0);
    if (params.tonemap == TONEMAP_SRGB) {
        let bg_linear = vec3<f32>(
            srgb_to_linear(background.r),
            srgb_to_linear(background.g),
            srgb_to_linear(background.b),
        );
        let blended = col + (bg_linear - vec3<f32>(params.offset)) * background.a;
        out = vec3<f32>(linear_to_srgb(blended.r), linear_to_srgb(blended.g), linear_to_srgb(blended.b));
    } else if (params.tonemap == TONEMAP_GAMMA) {
        let bg_gamma = pow(max(background.rgb, vec3<f32>(0.0)), vec3<f32>(params.gamma));
        let blended = col + (bg_gamma - vec3<f32>(params.offset)) * background.a;
        out = pow(max(blended, vec3<f32>(0.0)), vec3<f32>(1.0 / params.gamma));
    } else if (params.tonemap == TONEMAP_FALSE_COLOR) {
        let fc = false_color(false_color_coordinate(col));
        let fc_zero = false_color(false_color_coordinate(vec3<f32>(0.0)));
        out = fc + (background.rgb - fc_zero) * background.a;
    } else {
        let negative = -2.0 * mean3(min(col, vec3<f32>(0.0)));
        let positive = 2.0 * mean3(max(col, vec3<f32>(0.0)));
        out = vec3<f32>(negative, positive, 0.0) + background.rgb * background.a;
    }
    return clamp(out, vec3<f32>(0.0), vec3<f32>(1.0));
}

@fragment
fn fs_main(in: VsOut) -> @location(0) vec4<f32> {
    let checker_uv = in.ndc / (params.pixel_size * params.checker_size);
    let checker_index = i32(floor(checker_uv.x) + floor(checker_uv.y));
    let checker = select(CHECKER_LIGHT, CHECKER_DARK, checker_index % 2 == 0);
    let background = vec3<f32>(checker) * (1.0 - params.bg_color.a) + params.bg_color.rgb * params.bg_color.a;

    if (params.has_image == 0u) {
        return vec4<f32>(background, 1.0);
    }

    let image_uv = (params.image_transform * vec3<f32>(in.ndc, 1.0)).xy;
    let image_val = sample_texture(image_tex, image_uv);

    if (params.has_reference == 0u) {
        let col = apply_exposure_and_offset(image_val.rgb);
        return vec4<f32>(apply_tonemap(col, vec4<f32>(background, 1.0 - image_val.a)), 1.0);
    }

    let reference_uv = (params.reference_transform * vec3<f32>(in.ndc, 1.0)).xy;
    let reference_val = sample_texture(reference_tex, reference_uv);
    let alpha = (image_val.a + reference_val.a) * 0.5;
    let col = apply_exposure_and_offset(apply_metric(image_val.rgb, reference_val.rgb));
    return vec4<f32>(apply_tonemap(col, vec4<f32>(background, 1.0 - alpha)), 1.0);
}
"#;

/// Uniform block of the uber shader. Layout matches `Uniforms` in the WGSL
/// (mat3x3 columns padded to 16 bytes).
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct UberUniforms {
    pub image_transform: [[f32; 4]; 3],
    pub reference_transform: [[f32; 4]; 3],
    pub bg_color: [f32; 4],
    pub pixel_size: [f32; 2],
    pub checker_size: [f32; 2],
    pub exposure: f32,
    pub offset: f32,
    pub gamma: f32,
    pub tonemap: u32,
    pub metric: u32,
    pub has_image: u32,
    pub has_reference: u32,
    pub clamp_to_ldr: u32,
}

pub fn pack_mat3(m: Mat3) -> [[f32; 4]; 3] {
    let c = m.to_cols_array_2d();
    [
        [c[0][0], c[0][1], c[0][2], 0.0],
        [c[1][0], c[1][1], c[1][2], 0.0],
        [c[2][0], c[2][1], c[2][2], 0.0],
    ]
}

pub fn unpack_mat3(m: &[[f32; 4]; 3]) -> Mat3 {
    Mat3::from_cols(
        Vec3::new(m[0][0], m[0][1], m[0][2]),
        Vec3::new(m[1][0], m[1][1], m[1][2]),
        Vec3::new(m[2][0], m[2][1], m[2][2]),
    )
}

impl UberUniforms {
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::bytes_of(self)
    }

    pub fn tonemap(&self) -> Result<Tonemap> {
        Tonemap::try_from(self.tonemap)
    }

    pub fn metric(&self) -> Result<Metric> {
        Metric::try_from(self.metric)
    }
}

fn format_turbo_lut() -> String {
    let lut = turbo_lut();
    let mut out = String::with_capacity(TURBO_ENTRIES * 48);
    for entry in lut.chunks_exact(4) {
        let _ = writeln!(
            out,
            "    vec3<f32>({:.8}, {:.8}, {:.8}),",
            entry[0], entry[1], entry[2]
        );
    }
    out
}

/// WGSL source of the display shader with every constant injected from the
/// Rust definitions.
pub fn uber_shader_wgsl() -> String {
    UBER_SHADER_TEMPLATE
        .replace("__UNIFORM_BINDING__", &UNIFORM_BINDING.to_string())
        .replace("__IMAGE_TEXTURE_BINDING__", &IMAGE_TEXTURE_BINDING.to_string())
        .replace("__REFERENCE_TEXTURE_BINDING__", &REFERENCE_TEXTURE_BINDING.to_string())
        .replace("__TONEMAP_SRGB__", &Tonemap::Srgb.shader_code().to_string())
        .replace("__TONEMAP_GAMMA__", &Tonemap::Gamma.shader_code().to_string())
        .replace("__TONEMAP_FALSE_COLOR__", &Tonemap::FalseColor.shader_code().to_string())
        .replace("__METRIC_ERROR__", &Metric::Error.shader_code().to_string())
        .replace("__METRIC_ABSOLUTE_ERROR__", &Metric::AbsoluteError.shader_code().to_string())
        .replace("__METRIC_SQUARED_ERROR__", &Metric::SquaredError.shader_code().to_string())
        .replace(
            "__METRIC_RELATIVE_ABSOLUTE_ERROR__",
            &Metric::RelativeAbsoluteError.shader_code().to_string(),
        )
        .replace(
            "__METRIC_RELATIVE_SQUARED_ERROR_2__",
            &Metric::RelativeSquaredError2.shader_code().to_string(),
        )
        .replace(
            "__METRIC_RELATIVE_SQUARED_ERROR__",
            &Metric::RelativeSquaredError.shader_code().to_string(),
        )
        .replace(
            "__METRIC_LOG_ABSOLUTE_ERROR__",
            &Metric::LogAbsoluteError.shader_code().to_string(),
        )
        .replace("__FALSE_COLOR_BIAS__", &format!("{FALSE_COLOR_BIAS:?}"))
        .replace("__RELATIVE_EPSILON__", &format!("{RELATIVE_EPSILON:?}"))
        .replace("__CHECKER_DARK__", &format!("{CHECKER_DARK:?}"))
        .replace("__CHECKER_LIGHT__", &format!("{CHECKER_LIGHT:?}"))
        .replace("__TURBO_ENTRIES__", &TURBO_ENTRIES.to_string())
        .replace("__TURBO_LUT__", &format_turbo_lut())
}

/// Parse and validate the generated shader.
pub fn validate_uber_shader() -> Result<naga::Module> {
    crate::renderer::validation::validate_wgsl_module(&uber_shader_wgsl(), "uber shader")
}

/// Texels of a bound texture, RGBA interleaved, top row first.
#[derive(Clone, Debug, PartialEq)]
pub struct RgbaTexture {
    pub size: IVec2,
    pub texels: Vec<f32>,
}

impl RgbaTexture {
    pub fn from_image(image: &Image, group: &str) -> Self {
        Self {
            size: image.size(),
            texels: image.texture_rgba(group),
        }
    }

    fn load(&self, texel: IVec2) -> [f32; 4] {
        let i = (texel.y * self.size.x + texel.x) as usize * 4;
        [self.texels[i], self.texels[i + 1], self.texels[i + 2], self.texels[i + 3]]
    }
}

fn sample_texture(texture: Option<&RgbaTexture>, uv: Vec2, clamp_to_ldr: bool) -> [f32; 4] {
    let Some(texture) = texture else {
        return [0.0; 4];
    };
    if uv.x < 0.0 || uv.x > 1.0 || uv.y < 0.0 || uv.y > 1.0 || texture.size.cmple(IVec2::ZERO).any() {
        return [0.0; 4];
    }
    let texel = (uv * texture.size.as_vec2())
        .floor()
        .as_ivec2()
        .clamp(IVec2::ZERO, texture.size - IVec2::ONE);
    let mut color = texture.load(texel);
    if clamp_to_ldr {
        for v in &mut color {
            *v = v.clamp(0.0, 1.0);
        }
    }
    color
}

fn checker_background(u: &UberUniforms, ndc: Vec2) -> [f32; 3] {
    let pixel_size = Vec2::from(u.pixel_size);
    let checker_size = Vec2::from(u.checker_size);
    let checker_uv = ndc / (pixel_size * checker_size);
    let checker_index = (checker_uv.x.floor() + checker_uv.y.floor()) as i32;
    let checker = if checker_index % 2 == 0 { CHECKER_DARK } else { CHECKER_LIGHT };
    let bg = u.bg_color;
    std::array::from_fn(|i| checker * (1.0 - bg[3]) + bg[i] * bg[3])
}

/// CPU emulation of `fs_main` at an NDC position.
pub fn cpu_shade(
    u: &UberUniforms,
    ndc: Vec2,
    image: Option<&RgbaTexture>,
    reference: Option<&RgbaTexture>,
) -> Result<[f32; 4]> {
    let background = checker_background(u, ndc);
    if u.has_image == 0 {
        return Ok([background[0], background[1], background[2], 1.0]);
    }

    let tonemap = u.tonemap()?;
    let metric = u.metric()?;
    let clamp_to_ldr = u.clamp_to_ldr != 0;
    let expose = |v: f32| apply_exposure_and_offset(v, u.exposure, u.offset);

    let image_uv = unpack_mat3(&u.image_transform).transform_point2(ndc);
    let image_val = sample_texture(image, image_uv, clamp_to_ldr);

    let (col, alpha) = if u.has_reference == 0 {
        ([expose(image_val[0]), expose(image_val[1]), expose(image_val[2])], image_val[3])
    } else {
        let reference_uv = unpack_mat3(&u.reference_transform).transform_point2(ndc);
        let reference_val = sample_texture(reference, reference_uv, clamp_to_ldr);
        let alpha = (image_val[3] + reference_val[3]) * 0.5;
        let compared: [f32; 3] = if metric == Metric::RelativeSquaredError2 {
            let v = apply_joint_relative_squared_error(
                [image_val[0], image_val[1], image_val[2]],
                [reference_val[0], reference_val[1], reference_val[2]],
            );
            [v; 3]
        } else {
            std::array::from_fn(|i| apply_metric(image_val[i], reference_val[i], metric))
        };
        (compared.map(expose), alpha)
    };

    let rgb = apply_tonemap_over(
        col,
        u.gamma,
        tonemap,
        [background[0], background[1], background[2], 1.0 - alpha],
        u.offset,
    );
    Ok([rgb[0], rgb[1], rgb[2], 1.0])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uniform_block_is_160_bytes() {
        assert_eq!(std::mem::size_of::<UberUniforms>(), 160);
        assert_eq!(UberUniforms::default().as_bytes().len(), 160);
    }

    #[test]
    fn generated_wgsl_has_no_unreplaced_tokens() {
        let src = uber_shader_wgsl();
        assert!(!src.contains("__"), "unreplaced token in generated WGSL");
        assert!(src.contains("const RELATIVE_EPSILON: f32 = 0.01;"));
        assert!(src.contains("const FALSE_COLOR_BIAS: f32 = 0.03125;"));
    }

    #[test]
    fn generated_wgsl_validates() {
        validate_uber_shader().unwrap();
    }

    #[test]
    fn mat3_packing_roundtrips() {
        let m = Mat3::from_cols_array(&[1.0, 2.0, 0.0, 3.0, 4.0, 0.0, 5.0, 6.0, 1.0]);
        assert_eq!(unpack_mat3(&pack_mat3(m)), m);
    }

    #[test]
    fn no_image_shades_checkerboard() {
        let u = UberUniforms {
            pixel_size: [0.01, 0.01],
            checker_size: [8.0, 8.0],
            ..Default::default()
        };
        let a = cpu_shade(&u, Vec2::new(0.001, 0.001), None, None).unwrap();
        let b = cpu_shade(&u, Vec2::new(0.09, 0.001), None, None).unwrap();
        assert_eq!(a, [CHECKER_DARK, CHECKER_DARK, CHECKER_DARK, 1.0]);
        assert_eq!(b, [CHECKER_LIGHT, CHECKER_LIGHT, CHECKER_LIGHT, 1.0]);
    }

    #[test]
    fn invalid_codes_are_errors() {
        let u = UberUniforms {
            has_image: 1,
            tonemap: 9,
            ..Default::default()
        };
        assert!(cpu_shade(&u, Vec2::ZERO, None, None).is_err());
    }
}
