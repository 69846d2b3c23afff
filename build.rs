// Build script embedding the crate version, with an optional patch override
// supplied by the release pipeline.

use std::env;

fn main() {
    let version = env::var("CARGO_PKG_VERSION").expect("CARGO_PKG_VERSION not set");

    let mut parts = version.splitn(3, '.');
    let (Some(major), Some(minor), Some(patch)) = (parts.next(), parts.next(), parts.next())
    else {
        panic!("Invalid version format in Cargo.toml: {}", version);
    };

    let patch = env::var("RECALL_PATCH_VERSION").unwrap_or_else(|_| patch.to_string());

    println!("cargo:rustc-env=RECALL_VERSION={}.{}.{}", major, minor, patch);
    println!("cargo:rerun-if-changed=Cargo.toml");
    println!("cargo:rerun-if-env-changed=RECALL_PATCH_VERSION");
}
