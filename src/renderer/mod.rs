pub mod tonemap;
pub mod uber_shader;
pub mod validation;

pub use tonemap::{
    apply_exposure_and_offset, apply_histogram_space, apply_joint_relative_squared_error, apply_metric,
    apply_tonemap,
};
pub use uber_shader::{UberUniforms, cpu_shade, uber_shader_wgsl};
pub use validation::{validate_wgsl, validate_wgsl_module};
