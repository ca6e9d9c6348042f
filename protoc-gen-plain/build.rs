//! Build script for protoc-gen-plain
//!
//! Compiles the plain options proto into Rust types and writes a file
//! descriptor set containing the options and the plugin protocol types, for
//! use with prost-reflect.

use std::env;
use std::fs;
use std::path::PathBuf;

use prost::Message;

const OPTIONS_PROTO: &str = "plain/options.proto";

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let out_dir = PathBuf::from(env::var("OUT_DIR")?);

    println!("cargo:rerun-if-changed=../proto/plain/options.proto");

    // protox bundles the google well-known types, plugin.proto included
    let fds = protox::compile(
        [OPTIONS_PROTO, "google/protobuf/compiler/plugin.proto"],
        ["../proto"],
    )?;

    fs::write(out_dir.join("file_descriptor_set.bin"), fds.encode_to_vec())?;

    // Only the options file gets Rust types; the google types come from prost-types
    let mut options_only = fds.clone();
    options_only
        .file
        .retain(|file| file.name.as_deref() == Some(OPTIONS_PROTO));

    prost_build::Config::new()
        .out_dir(&out_dir)
        .compile_fds(options_only)?;

    Ok(())
}
