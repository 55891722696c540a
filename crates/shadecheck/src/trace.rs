use anyhow::{Context, Result};
use halconfig::EngineConfig;
use rendercore::native::NativeCall;
use rendercore::shader::CacheStats;
use rendercore::types::{BlendState, DepthTest, PrimitiveType, TextureFormat, TextureRef};
use rendercore::{
    Args, AttachmentPoint, Framebuffer, RecordingDevice, RenderDevice, Shader, ShaderManager, StateStack,
    StateStats, UniformValue,
};
use serde::Serialize;
use shaderprep::ShaderStage;
use tracing::info;

use crate::cli::TraceArgs;

const TRACE_PIXEL: &str = "\
#version 330
uniform vec4 tint;
out vec4 color;
void main() { color = tint; }
";

#[derive(Debug, Serialize)]
struct TraceReport<'a> {
    surface: (u32, u32),
    calls: &'a [NativeCall],
    state: &'a StateStats,
    shaders: &'a CacheStats,
}

/// Draws one offscreen pass and one onscreen pass, printing every native
/// call the engine issued along with its counters.
pub fn trace(config: &EngineConfig, args: &TraceArgs) -> Result<()> {
    let (width, height) = args.size;
    let stack = StateStack::with_options(RecordingDevice::new(), width, height, config.stack_options());
    let shaders = ShaderManager::new(config.preprocess_options()).with_policy(config.shaders.failure_policy);
    let mut context = RenderDevice::from_parts(stack, shaders);

    let shader = context
        .shaders_mut()
        .load(Shader::from_strings("trace", [(ShaderStage::Pixel, TRACE_PIXEL)]));
    let mut offscreen = Framebuffer::new("offscreen");
    offscreen.set(
        AttachmentPoint::Color(0),
        Some(TextureRef::new_2d(1, TextureFormat::Rgba8, width, height)),
    );
    offscreen.set(
        AttachmentPoint::Depth,
        Some(TextureRef::new_2d(2, TextureFormat::Depth24, width, height)),
    );
    let offscreen = context.add_framebuffer(offscreen);

    let mut draw = Args::new();
    draw.set_uniform("tint", UniformValue::Vec4([1.0, 0.5, 0.25, 1.0]))
        .set_primitive(PrimitiveType::Triangles, 3);

    context.clear(true, true, false);
    context.push_state_with(offscreen);
    context.state_mut().set_blend_func(BlendState::ALPHA);
    context.state_mut().set_depth_test(DepthTest::LessEqual);
    context.clear(true, true, false);
    context.apply(shader, &draw).context("offscreen draw failed")?;
    context.apply(shader, &draw).context("repeated offscreen draw failed")?;
    context.pop_state();
    context.apply(shader, &draw).context("onscreen draw failed")?;

    let report = TraceReport {
        surface: (width, height),
        calls: context.device().calls(),
        state: context.state().stats(),
        shaders: context.shaders().stats(),
    };
    info!(
        calls = report.calls.len(),
        draws = report.state.draws,
        "traced scripted frame"
    );
    let json = if args.pretty {
        serde_json::to_string_pretty(&report)?
    } else {
        serde_json::to_string(&report)?
    };
    println!("{json}");
    Ok(())
}
