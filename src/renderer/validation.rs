//! WGSL validation using the naga library.

use anyhow::{Context, Result, anyhow};

/// Parse WGSL source with naga's frontend.
///
/// Catches syntax errors and the type errors naga reports while lowering.
pub fn validate_wgsl(source: &str) -> Result<naga::Module> {
    naga::front::wgsl::parse_str(source)
        .map_err(|e| anyhow!("WGSL validation failed:\n{}", format_naga_error(source, &e)))
}

/// Parse, then run naga's full validator (bindings, uniformity, entry point
/// interfaces). `context` names the shader in the error.
pub fn validate_wgsl_module(source: &str, context: &str) -> Result<naga::Module> {
    let module = validate_wgsl(source).with_context(|| format!("{context} generated invalid WGSL"))?;
    naga::valid::Validator::new(
        naga::valid::ValidationFlags::all(),
        naga::valid::Capabilities::all(),
    )
    .validate(&module)
    .map_err(|e| anyhow!("{context} failed naga validation: {e:?}"))?;
    Ok(module)
}

fn format_naga_error(source: &str, error: &naga::front::wgsl::ParseError) -> String {
    let mut output = format!("  {error}\n");
    output.push_str("\nGenerated WGSL:\n---\n");
    for (line_num, line) in source.lines().enumerate() {
        output.push_str(&format!("{:4} | {}\n", line_num + 1, line));
    }
    output.push_str("---\n");
    output
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_fullscreen_shader_passes() {
        let source = r#"
@vertex
fn vs_main(@builtin(vertex_index) i: u32) -> @builtin(position) vec4<f32> {
    return vec4<f32>(f32(i), 0.0, 0.0, 1.0);
}

@fragment
fn fs_main() -> @location(0) vec4<f32> {
    return vec4<f32>(1.0, 0.0, 0.0, 1.0);
}
"#;
        validate_wgsl_module(source, "test shader").unwrap();
    }

    #[test]
    fn syntax_error_is_reported() {
        assert!(validate_wgsl("fn invalid() -> { return vec4f(1.0); }").is_err());
    }

    #[test]
    fn type_error_is_reported() {
        let source = r#"
@fragment
fn fs_main() -> @location(0) vec4<f32> {
    let x: vec4<f32> = 1.0;
    return x;
}
"#;
        assert!(validate_wgsl(source).is_err());
    }

    #[test]
    fn context_is_included_in_error() {
        let err = validate_wgsl_module("invalid wgsl", "uber shader").unwrap_err();
        assert!(format!("{err:#}").contains("uber shader"));
    }
}
