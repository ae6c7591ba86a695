extern crate cbindgen;

use std::env;

// Converters written in C include libreprinter.h to reach the shared status
// memory through the same offset arithmetic as the capture daemon.
fn main() {
    println!("cargo:rerun-if-changed=src/ffi.rs");
    println!("cargo:rerun-if-changed=src/converter_sync.rs");

    let crate_dir = env::var("CARGO_MANIFEST_DIR").unwrap();
    cbindgen::Builder::new()
        .with_crate(crate_dir)
        .with_language(cbindgen::Language::C)
        .with_include_guard("LIBREPRINTER_H")
        .with_header("/* Shared status memory access for libreprinter converters. */")
        .with_sys_include("stdbool.h")
        .generate()
        .map_or_else(
            |error| match error {
                cbindgen::Error::ParseSyntaxError { .. } => {}
                e => panic!("{:?}", e),
            },
            |bindings| {
                bindings.write_to_file("libreprinter.h");
            },
        );
}
