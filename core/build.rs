//! Build script for tflite-bridge.
//!
//! Without the `tflite` feature nothing is linked and the crate runs on its
//! in-process reference engine.
//!
//! With the `tflite` feature the TensorFlow Lite C library
//! (`libtensorflowlite_c`) is linked, either prebuilt or built from source:
//!
//! # Environment Variables
//!
//! - `TFLITE_LIB_DIR`: Directory containing a prebuilt `libtensorflowlite_c`
//! - `TFLITE_SOURCE_DIR`: TensorFlow source checkout; `tensorflow/lite/c` is
//!   built with CMake when `TFLITE_LIB_DIR` is not set
//! - `TFLITE_SKIP_LINK`: Set to "1" to skip linking (for development)

fn main() {
    #[cfg(feature = "tflite")]
    native::link_tflite();
}

#[cfg(feature = "tflite")]
mod native {
    use std::env;
    use std::path::{Path, PathBuf};

    pub fn link_tflite() {
        println!("cargo:rerun-if-env-changed=TFLITE_LIB_DIR");
        println!("cargo:rerun-if-env-changed=TFLITE_SOURCE_DIR");
        println!("cargo:rerun-if-env-changed=TFLITE_SKIP_LINK");

        if env::var("TFLITE_SKIP_LINK")
            .map(|v| v == "1")
            .unwrap_or(false)
        {
            println!("cargo:warning=Skipping tensorflowlite_c link (TFLITE_SKIP_LINK=1)");
            return;
        }

        let lib_dir = if let Ok(dir) = env::var("TFLITE_LIB_DIR") {
            let dir = PathBuf::from(dir);
            if !dir.exists() {
                panic!(
                    "TFLITE_LIB_DIR does not exist: {}\n\
                     Point it at the directory containing libtensorflowlite_c.",
                    dir.display()
                );
            }
            dir
        } else if let Ok(src) = env::var("TFLITE_SOURCE_DIR") {
            build_from_source(Path::new(&src))
        } else {
            panic!(
                "Could not find TensorFlow Lite.\n\
                 \n\
                 To fix, either:\n\
                 1. Set TFLITE_LIB_DIR to a directory containing libtensorflowlite_c\n\
                 2. Set TFLITE_SOURCE_DIR to a TensorFlow checkout to build it with CMake\n\
                 3. Build without the tflite feature to use the reference engine"
            );
        };

        println!("cargo:rustc-link-search=native={}", lib_dir.display());
        println!("cargo:rustc-link-lib=dylib=tensorflowlite_c");

        // Use RPATH (not RUNPATH) so test binaries find the library too
        if cfg!(target_os = "linux") {
            println!("cargo:rustc-link-arg=-Wl,--disable-new-dtags");
            println!("cargo:rustc-link-arg=-Wl,-rpath,{}", lib_dir.display());
        } else if cfg!(target_os = "macos") {
            println!("cargo:rustc-link-arg=-Wl,-rpath,{}", lib_dir.display());
        }
    }

    fn build_from_source(src: &Path) -> PathBuf {
        let c_api_dir = src.join("tensorflow/lite/c");
        if !c_api_dir.join("CMakeLists.txt").exists() {
            panic!(
                "TFLITE_SOURCE_DIR does not look like a TensorFlow checkout: {}\n\
                 Expected tensorflow/lite/c/CMakeLists.txt.",
                src.display()
            );
        }
        println!("cargo:rerun-if-changed={}", c_api_dir.join("CMakeLists.txt").display());

        let profile = env::var("PROFILE").unwrap_or_else(|_| "debug".to_string());
        let build_type = if profile == "release" {
            "Release"
        } else {
            "Debug"
        };

        let dst = cmake::Config::new(&c_api_dir)
            .define("CMAKE_BUILD_TYPE", build_type)
            .define("TFLITE_ENABLE_XNNPACK", "ON")
            .build_target("tensorflowlite_c")
            .build();

        // build_target() skips the install step; the library stays in build/
        let lib_dir = dst.join("build");
        eprintln!("info: built tensorflowlite_c in {}", lib_dir.display());
        lib_dir
    }
}
