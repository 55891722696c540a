use std::fs;
use std::path::Path;

use shaderprep::{
    lexer, preprocess_stages, Diagnostics, IncludeOptions, PreprocessOptions, ShaderStage, StageSources,
};
use tempfile::TempDir;

fn write(dir: &Path, name: &str, body: &str) {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("create parent");
    }
    fs::write(path, body).expect("write file");
}

fn options(dir: &Path) -> PreprocessOptions {
    PreprocessOptions {
        include: IncludeOptions {
            search_paths: vec![dir.join("lib")],
            ..IncludeOptions::default()
        },
        engine_uniforms: false,
        ..PreprocessOptions::default()
    }
}

fn assemble_pixel(dir: &Path, macros: &[(&str, &str)]) -> (String, shaderprep::FileTable) {
    let sources = StageSources::from_files([dir.join("shade.pix")]).expect("sources");
    let options = options(dir);
    let loaded = preprocess_stages(&sources, &options);
    assert!(loaded.is_ok(), "{}", loaded.diagnostics);
    let pixel = loaded.stage(ShaderStage::Pixel).expect("pixel stage");
    let mut diagnostics = Diagnostics::new();
    let code = loaded
        .assemble(pixel, "", macros, &options, &mut diagnostics)
        .unwrap_or_else(|| panic!("assembly failed: {diagnostics}"));
    (code, loaded.files)
}

#[test]
fn every_original_line_is_recoverable() {
    let dir = TempDir::new().expect("tempdir");
    write(dir.path(), "lib/noise.glsl", "float hash(float x) {\n    return fract(x);\n}\n");
    write(dir.path(), "shade.pix", "#version 330 or 450\n#include <noise.glsl>\nout vec4 c;\n#foreach (ch) in (r), (g)\nfloat $(ch)_v;\n#endforeach\nvoid main() {}\n");

    let (code, files) = assemble_pixel(dir.path(), &[]);
    let lines = lexer::scan(&code);
    let locate = |text: &str| {
        let line = lines
            .iter()
            .find(|line| line.text == text)
            .unwrap_or_else(|| panic!("missing line {text:?}"));
        (files.display_name(line.location.file).to_string(), line.location.line)
    };

    let noise = dir.path().join("lib/noise.glsl").display().to_string();
    let shade = dir.path().join("shade.pix").display().to_string();
    assert_eq!(locate("    return fract(x);"), (noise, 2));
    assert_eq!(locate("out vec4 c;"), (shade.clone(), 3));
    assert_eq!(locate("float r_v;"), (shade.clone(), 5));
    assert_eq!(locate("float g_v;"), (shade.clone(), 5));
    assert_eq!(locate("void main() {}"), (shade, 7));
}

#[test]
fn include_expansion_is_deterministic() {
    let dir = TempDir::new().expect("tempdir");
    write(dir.path(), "lib/a.glsl", "#include \"b.glsl\"\nfloat a;\n");
    write(dir.path(), "lib/b.glsl", "float b;\n");
    write(dir.path(), "shade.pix", "#include <a.glsl>\n#include <b.glsl>\nvoid main() {}\n");

    let (first, _) = assemble_pixel(dir.path(), &[]);
    let (second, _) = assemble_pixel(dir.path(), &[]);
    assert_eq!(first, second);
    assert_eq!(first.matches("float b;").count(), 1);
}

#[test]
fn version_alternatives_follow_capability() {
    let dir = TempDir::new().expect("tempdir");
    write(dir.path(), "shade.pix", "#version 330 or 400 or 420\nvoid main() {}\n");
    let sources = StageSources::from_files([dir.path().join("shade.pix")]).expect("sources");
    let options = PreprocessOptions {
        glsl_capability: 410,
        ..options(dir.path())
    };
    let loaded = preprocess_stages(&sources, &options);
    let pixel = loaded.stage(ShaderStage::Pixel).expect("pixel stage");
    let no_macros: [(&str, &str); 0] = [];
    let mut diagnostics = Diagnostics::new();
    let code = loaded
        .assemble(pixel, "", no_macros.as_slice(), &options, &mut diagnostics)
        .expect("assembled");
    assert!(code.starts_with("#version 400\n"));
    assert_eq!(code.matches("#version").count(), 1);
}

#[test]
fn expect_guards_required_macros() {
    let dir = TempDir::new().expect("tempdir");
    write(dir.path(), "shade.pix", "#expect NUM_LIGHTS \"light count\"\nvoid main() {}\n");

    let (code, files) = assemble_pixel(dir.path(), &[]);
    assert!(code.contains("#ifndef NUM_LIGHTS\n#error Expected NUM_LIGHTS argument, light count\n#endif\n"));
    let error_line = lexer::scan(&code)
        .into_iter()
        .find(|line| line.is_directive("error"))
        .expect("error line");
    assert!(files.display_name(error_line.location.file).ends_with("shade.pix"));
    assert_eq!(error_line.location.line, 1);
}

#[test]
fn for_loops_unroll_with_macro_bounds() {
    let dir = TempDir::new().expect("tempdir");
    write(dir.path(), "shade.pix", "#for (int i = 0; i < COUNT; ++i)\nuniform vec4 light$(i);\n#endfor\nvoid main() {}\n");

    let (code, _) = assemble_pixel(dir.path(), &[("COUNT", "3")]);
    let lights: Vec<&str> = code.lines().filter(|line| line.starts_with("uniform vec4 light")).collect();
    assert_eq!(lights, vec!["uniform vec4 light0;", "uniform vec4 light1;", "uniform vec4 light2;"]);

    let (code, _) = assemble_pixel(dir.path(), &[]);
    assert!(code.contains("#error Ill-formed FOR pragma, unable to parse endValue (COUNT) into integer literal"));
}
