use std::env;
use std::fs;
use std::path::PathBuf;

fn main() {
    println!("cargo:rerun-if-changed=frontend/config-loader.js");
    println!("cargo:rerun-if-changed=frontend/fallback.css");

    let loader =
        fs::read_to_string("frontend/config-loader.js").expect("failed to read config-loader.js");
    let styles = fs::read_to_string("frontend/fallback.css").expect("failed to read fallback.css");

    for placeholder in [
        "{{ENDPOINT}}",
        "{{FALLBACK_CONFIG}}",
        "{{PREVIEW_SUFFIXES}}",
        "{{READY_TIMEOUT_MS}}",
    ] {
        assert!(
            loader.contains(placeholder),
            "config-loader.js is missing {placeholder}"
        );
    }

    let out_dir = PathBuf::from(env::var("OUT_DIR").expect("OUT_DIR missing"));
    fs::write(out_dir.join("config_loader.js"), loader.trim())
        .expect("failed to write bundled loader");
    fs::write(out_dir.join("fallback.css"), styles.trim())
        .expect("failed to write bundled stylesheet");
}
