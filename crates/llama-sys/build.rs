//! Builds (or locates) llama.cpp and generates bindings for the chat API.
//!
//! Environment:
//! - `LLAMA_PREBUILT_DIR`: an install tree with `lib/` (or `lib64/`) and
//!   `include/`. Skips cmake.
//! - `LLAMA_CPP_DIR`: llama.cpp sources for the cmake build
//!   (default `<workspace>/vendor/llama.cpp`).
//! - `ROCM_PATH`, `AMDGPU_TARGETS`, `CUDA_PATH`: GPU toolchains.

use std::env;
use std::path::{Path, PathBuf};

/// GPU backends requested through crate features.
struct Gpu {
    cuda: bool,
    vulkan: bool,
    rocm: bool,
}

impl Gpu {
    fn from_features() -> Self {
        let on = |name: &str| env::var_os(format!("CARGO_FEATURE_{name}")).is_some();
        Self {
            cuda: on("CUDA"),
            vulkan: on("VULKAN"),
            rocm: on("ROCM"),
        }
    }
}

fn rocm_path() -> String {
    env::var("ROCM_PATH").unwrap_or_else(|_| "/opt/rocm".into())
}

/// `lib64` when the install produced one, else `lib`.
fn lib_dir_of(root: &Path) -> PathBuf {
    let lib64 = root.join("lib64");
    if lib64.exists() { lib64 } else { root.join("lib") }
}

fn main() {
    for var in ["LLAMA_PREBUILT_DIR", "LLAMA_CPP_DIR", "ROCM_PATH", "AMDGPU_TARGETS", "CUDA_PATH"] {
        println!("cargo:rerun-if-env-changed={var}");
    }
    println!("cargo:rerun-if-changed=wrapper.h");

    let manifest_dir = PathBuf::from(env::var("CARGO_MANIFEST_DIR").expect("set by cargo"));
    let source_dir = env::var("LLAMA_CPP_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| manifest_dir.join("../../vendor/llama.cpp"));
    let target_os = env::var("CARGO_CFG_TARGET_OS").unwrap_or_default();
    let gpu = Gpu::from_features();

    let install_root = match env::var("LLAMA_PREBUILT_DIR") {
        Ok(dir) => {
            let dir = PathBuf::from(dir);
            assert!(dir.exists(), "LLAMA_PREBUILT_DIR={} does not exist", dir.display());
            println!("cargo:warning=Linking prebuilt llama.cpp from {}", dir.display());
            dir
        }
        Err(_) => build_with_cmake(&source_dir, &gpu, &target_os),
    };

    let lib_dir = lib_dir_of(&install_root);
    link_libraries(&lib_dir, &gpu, &target_os);

    let mut include_dirs = vec![install_root.join("include")];
    let ggml_include = source_dir.join("ggml/include");
    if ggml_include.exists() {
        include_dirs.push(ggml_include);
    }
    generate_bindings(&include_dirs);
}

fn build_with_cmake(source_dir: &Path, gpu: &Gpu, target_os: &str) -> PathBuf {
    assert!(
        source_dir.join("CMakeLists.txt").exists(),
        "llama.cpp sources not found at {}; set LLAMA_CPP_DIR or LLAMA_PREBUILT_DIR",
        source_dir.display()
    );

    let mut cfg = cmake::Config::new(source_dir);
    cfg.define("BUILD_SHARED_LIBS", "OFF");
    for off in [
        "LLAMA_BUILD_SERVER",
        "LLAMA_BUILD_TESTS",
        "LLAMA_BUILD_EXAMPLES",
        "LLAMA_BUILD_TOOLS",
        "LLAMA_BUILD_COMMON",
        "LLAMA_CURL",
    ] {
        cfg.define(off, "OFF");
    }

    if gpu.cuda {
        cfg.define("GGML_CUDA", "ON");
    }
    if gpu.vulkan {
        cfg.define("GGML_VULKAN", "ON");
    }
    if gpu.rocm {
        let rocm = rocm_path();
        cfg.define("GGML_HIP", "ON")
            .define("CMAKE_HIP_COMPILER_ROCM_ROOT", &rocm)
            .define("CMAKE_HIP_FLAGS", format!("--rocm-path={rocm}"));
        if let Ok(targets) = env::var("AMDGPU_TARGETS") {
            cfg.define("AMDGPU_TARGETS", targets);
        }
    }
    if target_os == "macos" {
        cfg.define("GGML_METAL", "ON")
            .define("GGML_METAL_EMBED_LIBRARY", "ON");
    }

    cfg.build()
}

fn link_libraries(lib_dir: &Path, gpu: &Gpu, target_os: &str) {
    let has = |name: &str| lib_dir.join(format!("lib{name}.a")).exists();
    let link_static = |name: &str| println!("cargo:rustc-link-lib=static={name}");
    let link = |name: &str| println!("cargo:rustc-link-lib={name}");

    println!("cargo:rustc-link-search=native={}", lib_dir.display());
    link_static("llama");
    for name in ["ggml", "ggml-base", "ggml-cpu"] {
        if has(name) {
            link_static(name);
        }
    }

    if gpu.cuda && has("ggml-cuda") {
        link_static("ggml-cuda");
        if let Ok(cuda) = env::var("CUDA_PATH") {
            println!("cargo:rustc-link-search=native={}", lib_dir_of(Path::new(&cuda)).display());
        }
        ["cuda", "cublas", "culibos", "cudart"].into_iter().for_each(link);
    }
    if gpu.vulkan && has("ggml-vulkan") {
        link_static("ggml-vulkan");
        link("vulkan");
    }
    if gpu.rocm && has("ggml-hip") {
        link_static("ggml-hip");
        println!("cargo:rustc-link-search=native={}/lib", rocm_path());
        ["amdhip64", "hipblas", "hiprtc", "rocblas", "hsa-runtime64", "amd_comgr"]
            .into_iter()
            .for_each(link);
    }

    match target_os {
        "linux" => ["stdc++", "m", "pthread", "gomp"].into_iter().for_each(link),
        "macos" => {
            for name in ["ggml-metal", "ggml-blas"] {
                if has(name) {
                    link_static(name);
                }
            }
            for fw in ["Accelerate", "Metal", "MetalKit", "Foundation"] {
                println!("cargo:rustc-link-lib=framework={fw}");
            }
            link("c++");
        }
        "windows" => link("msvcrt"),
        _ => {}
    }
}

/// Bindings for the `llama_*` API and the ggml types it mentions.
fn generate_bindings(include_dirs: &[PathBuf]) {
    let builder = include_dirs.iter().fold(
        bindgen::Builder::default().header("wrapper.h"),
        |b, dir| b.clang_arg(format!("-I{}", dir.display())),
    );

    let bindings = builder
        .allowlist_function("llama_.*")
        .allowlist_type("llama_.*")
        .allowlist_type("ggml_log_level")
        .allowlist_var("LLAMA_.*")
        .derive_default(true)
        .size_t_is_usize(true)
        .generate()
        .expect("bindgen failed on wrapper.h");

    let out = PathBuf::from(env::var("OUT_DIR").expect("set by cargo"));
    bindings
        .write_to_file(out.join("bindings.rs"))
        .expect("could not write bindings.rs");
}
