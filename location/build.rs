//! Build script for pinpoint-location.
//!
//! Generates the swift-bridge glue for the CoreLocation bridge on Apple
//! targets. The Swift and Kotlin helper sources next to the bridge modules
//! are compiled by the host application's Xcode/Gradle build.

fn main() {
    let target_os = std::env::var("CARGO_CFG_TARGET_OS").unwrap();

    if target_os == "ios" || target_os == "macos" {
        build_apple_bridge(&["src/sys/apple/mod.rs"]);
    }
}

#[cfg(any(target_os = "ios", target_os = "macos"))]
fn build_apple_bridge(bridges: &[&str]) {
    let out_dir = std::path::PathBuf::from(std::env::var("OUT_DIR").unwrap());
    let pkg_name = std::env::var("CARGO_PKG_NAME").unwrap();

    for bridge in bridges {
        println!("cargo:rerun-if-changed={bridge}");
    }

    swift_bridge_build::parse_bridges(bridges.to_vec()).write_all_concatenated(out_dir, &pkg_name);
}

#[cfg(not(any(target_os = "ios", target_os = "macos")))]
fn build_apple_bridge(_bridges: &[&str]) {}
