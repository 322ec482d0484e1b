//! Build script for the native call fixtures
//!
//! Compiles `native/callfixtures.c` into a shared library with the host C
//! compiler. Integration tests and benches find it through the
//! `DOWNCALL_FIXTURES` environment variable; when the compiler is missing
//! they skip the fixture cases.

use std::env;
use std::path::{Path, PathBuf};

const FIXTURE_SOURCE: &str = "native/callfixtures.c";

fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-changed={}", FIXTURE_SOURCE);

    let Some(out_dir) = env::var_os("OUT_DIR").map(PathBuf::from) else {
        println!("cargo:warning=OUT_DIR not set, skipping call fixtures");
        return;
    };
    let target = env::var("TARGET").unwrap_or_default();

    let library = out_dir.join(fixture_filename(&target));
    if compile_fixtures(&target, &library) {
        println!("cargo:rustc-env=DOWNCALL_FIXTURES={}", library.display());
    } else {
        println!("cargo:warning=Failed to build call fixtures, fixture tests will be skipped");
    }
}

/// Platform file name of the fixture library
fn fixture_filename(target: &str) -> &'static str {
    if target.contains("apple") {
        "libcallfixtures.dylib"
    } else if target.contains("windows") {
        "callfixtures.dll"
    } else {
        "libcallfixtures.so"
    }
}

/// Compile the fixture source into a shared library
fn compile_fixtures(target: &str, output: &Path) -> bool {
    if target.contains("windows") {
        // The fixtures use the unix shared-library flags only.
        return false;
    }

    let compiler = match cc::Build::new().opt_level(2).try_get_compiler() {
        Ok(compiler) => compiler,
        Err(e) => {
            eprintln!("Warning: no C compiler found: {}", e);
            return false;
        }
    };

    let mut cmd = compiler.to_command();
    cmd.args(["-shared", "-fPIC", "-o"]).arg(output).arg(FIXTURE_SOURCE);
    if target.contains("apple") {
        cmd.arg("-dynamiclib");
    }

    match cmd.status() {
        Ok(status) if status.success() => true,
        Ok(status) => {
            eprintln!("Warning: {} exited with {}", compiler.path().display(), status);
            false
        }
        Err(e) => {
            eprintln!("Warning: failed to run {}: {}", compiler.path().display(), e);
            false
        }
    }
}
