//! Build script compiling GLSL shaders to SPIR-V when `embedded` is enabled.

fn main() {
    // Rerun if shaders change
    println!("cargo:rerun-if-changed=shaders/");

    #[cfg(feature = "embedded")]
    embedded::compile_all();
}

#[cfg(feature = "embedded")]
mod embedded {
    use shaderc::{Compiler, ShaderKind};
    use std::env;
    use std::fs;
    use std::path::Path;

    pub fn compile_all() {
        let out_dir = env::var("OUT_DIR").expect("OUT_DIR is set by cargo");
        let shader_dir = Path::new("shaders");

        let compiler = Compiler::new().expect("Failed to create shader compiler");

        compile_shader(
            &compiler,
            &shader_dir.join("voxelize.comp"),
            &Path::new(&out_dir).join("voxelize.spv"),
            ShaderKind::Compute,
        );
    }

    fn compile_shader(compiler: &Compiler, input: &Path, output: &Path, kind: ShaderKind) {
        let source = fs::read_to_string(input)
            .unwrap_or_else(|e| panic!("Failed to read shader {}: {e}", input.display()));

        let file_name = input
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("shader");

        let mut options =
            shaderc::CompileOptions::new().expect("Failed to create compile options");
        options.set_target_env(
            shaderc::TargetEnv::Vulkan,
            shaderc::EnvVersion::Vulkan1_3 as u32,
        );
        options.set_target_spirv(shaderc::SpirvVersion::V1_6);
        options.set_optimization_level(shaderc::OptimizationLevel::Performance);

        let result = compiler
            .compile_into_spirv(&source, kind, file_name, "main", Some(&options))
            .unwrap_or_else(|e| panic!("Failed to compile shader {}: {e}", input.display()));

        if result.get_num_warnings() > 0 {
            println!(
                "cargo:warning=Shader warnings in {}: {}",
                input.display(),
                result.get_warning_messages()
            );
        }

        fs::write(output, result.as_binary_u8())
            .unwrap_or_else(|e| panic!("Failed to write shader {}: {e}", output.display()));
    }
}
