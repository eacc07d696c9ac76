// build.rs

use std::collections::HashMap;
use std::env;
use std::ffi::OsString;
use std::fs;
use std::path::Path;

fn main() {
    const CONSTANT_PREFIX: &str = "METADATA_";
    let constant_map = HashMap::from([
        ("CARGO_CFG_TARGET_ARCH", "BUILD_ARCH"),
        ("TARGET", "BUILD_TARGET"),
        ("PROFILE", "PROFILE"),
    ]);
    let out_dir = env::var_os("OUT_DIR").unwrap();
    let dest_path = Path::new(&out_dir).join("metadata_constants.rs");
    let mut constants = String::new();
    for (key, value) in constant_map {
        let os_value = env_val(key);
        constants.push_str(&format!(
            "pub const {}{}: &str = \"{}\";\n",
            CONSTANT_PREFIX,
            value,
            os_value.to_string_lossy()
        ));
    }
    constants.push_str(&format!(
        "pub const {}COLLECTOR: &str = \"{}\";\n",
        CONSTANT_PREFIX,
        collector_feature()
    ));
    constants.push_str(&format!(
        "pub const {}VERSION: Option<&str> = option_env!(\"CARGO_PKG_VERSION\");\n",
        CONSTANT_PREFIX
    ));
    fs::write(&dest_path, constants).unwrap();
    println!("cargo:rerun-if-changed=build.rs");
}

fn collector_feature() -> &'static str {
    // Same precedence as the ConfiguredCollector alias.
    for (feature, name) in [
        ("CARGO_FEATURE_GC_STRICT_REFCOUNT", "strict-refcount"),
        ("CARGO_FEATURE_GC_REFCOUNT", "refcount"),
        ("CARGO_FEATURE_GC_PRECISE", "precise"),
    ] {
        if env::var_os(feature).is_some() {
            return name;
        }
    }
    "conservative"
}

fn env_val(name: &str) -> OsString {
    match env::var_os(name) {
        Some(val) => val,
        None => OsString::from(""),
    }
}
