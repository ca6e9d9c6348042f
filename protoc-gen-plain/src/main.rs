//! protoc-gen-plain
//!
//! Reads a CodeGeneratorRequest from stdin and writes the response to
//! stdout. Logs go to stderr, filtered by `RUST_LOG` (default `info`).
//!
//! Usage:
//!   protoc --plain_out=plain_suffix=Plain,enable_crf=true:./gen proto/*.proto

#![deny(warnings)]
#![deny(missing_docs)]

use std::io::{self, Read, Write};

use prost::Message;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(io::stderr)
        .with_ansi(false)
        .init();

    // Read the CodeGeneratorRequest from stdin
    let mut input = Vec::new();
    io::stdin().read_to_end(&mut input)?;

    let response = protoc_gen_plain::generate_from_bytes(&input)?;
    if let Some(error) = &response.error {
        tracing::error!(%error, "generation failed");
    }

    // Write the response to stdout
    let mut output = Vec::new();
    response.encode(&mut output)?;
    io::stdout().write_all(&output)?;

    Ok(())
}
