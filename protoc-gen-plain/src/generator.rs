//! Code generation orchestration
//!
//! Decodes the request, builds the IR once for the whole descriptor set and
//! emits, for every file to generate, the conversion contracts and the IR of
//! the file's messages.

use prost_reflect::DescriptorPool;
use prost_types::FileDescriptorSet;
use prost_types::compiler::code_generator_response::File;
use prost_types::compiler::{CodeGeneratorRequest, CodeGeneratorResponse};
use serde::Serialize;
use tracing::{debug, info};

use crate::apply::apply;
use crate::builder;
use crate::config::PluginConfig;
use crate::contract::{self, MessageContract};
use crate::descriptor::Schema;
use crate::error::GeneratorError;
use crate::ir::{Diagnostic, Ir, MessageIr};
use crate::options;
use crate::rename::RenameIndex;

/// FEATURE_PROTO3_OPTIONAL
const SUPPORTED_FEATURES: u64 = 1;

/// IR of the messages declared in one file
#[derive(Debug, Serialize)]
struct FileIr<'a> {
    file: &'a str,
    suffix: &'a str,
    messages: Vec<&'a MessageIr>,
    renames: &'a RenameIndex,
    diagnostics: &'a [Diagnostic],
}

fn error_response(message: String) -> CodeGeneratorResponse {
    CodeGeneratorResponse {
        error: Some(message),
        supported_features: Some(SUPPORTED_FEATURES),
        ..Default::default()
    }
}

/// Output path stem of a proto file: `a/b.proto` -> `a/b`
fn stem(file_name: &str) -> &str {
    file_name.strip_suffix(".proto").unwrap_or(file_name)
}

/// Generate from an already decoded request.
///
/// `pool` must hold the request's files with their option extensions.
/// Schema problems are reported through the response's `error` field;
/// only failures of the plugin itself are returned as errors.
pub fn generate(
    request: &CodeGeneratorRequest,
    pool: &DescriptorPool,
    config: &PluginConfig,
) -> Result<CodeGeneratorResponse, GeneratorError> {
    let schema = Schema::from_pool(pool, &request.file_to_generate)?;
    let ir = match builder::build(&schema, config) {
        Ok(ir) => ir,
        Err(err) => return Ok(error_response(err.to_string())),
    };

    // The Plain descriptor set must load on its own
    let plain_files = apply(&request.proto_file, &ir);
    DescriptorPool::from_file_descriptor_set(FileDescriptorSet { file: plain_files })?;

    let mut files = Vec::new();
    for file_name in &request.file_to_generate {
        if schema.file(file_name).is_none() {
            return Err(GeneratorError::CodeGenError(format!(
                "File descriptor not found: {}",
                file_name
            )));
        }
        files.extend(generate_file(file_name, &ir, config)?);
    }

    info!(files = files.len(), "generated plain output");
    Ok(CodeGeneratorResponse {
        file: files,
        error: None,
        supported_features: Some(SUPPORTED_FEATURES),
    })
}

fn generate_file(
    file_name: &str,
    ir: &Ir,
    config: &PluginConfig,
) -> Result<Vec<File>, GeneratorError> {
    let messages: Vec<&MessageIr> = ir.messages.iter().filter(|m| m.file == file_name).collect();
    let contracts: Vec<MessageContract> = messages
        .iter()
        .filter(|m| m.generate)
        .map(|m| MessageContract::from_ir(m, config.json_style))
        .collect();
    debug!(file = file_name, contracts = contracts.len(), "rendering file");

    let file_ir = FileIr {
        file: file_name,
        suffix: &ir.suffix,
        messages,
        renames: &ir.renames,
        diagnostics: &ir.diagnostics,
    };

    let stem = stem(file_name);
    let mut out = vec![File {
        name: Some(format!("{}.plain.ir.json", stem)),
        content: Some(serde_json::to_string_pretty(&file_ir)?),
        ..Default::default()
    }];
    if !contracts.is_empty() {
        out.push(File {
            name: Some(format!("{}.plain.rs", stem)),
            content: Some(contract::render_file(&contracts)?),
            ..Default::default()
        });
    }
    Ok(out)
}

/// Generate from raw CodeGeneratorRequest bytes
///
/// The bytes are decoded twice: once as the plain request, and once through
/// prost-reflect so the option extensions survive.
pub fn generate_from_bytes(bytes: &[u8]) -> Result<CodeGeneratorResponse, GeneratorError> {
    let (request, pool) = options::decode_request(bytes)?;
    let config = match request.parameter().parse::<PluginConfig>() {
        Ok(config) => config,
        Err(err) => return Ok(error_response(err.to_string())),
    };
    generate(&request, &pool, &config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;

    fn file<'a>(response: &'a CodeGeneratorResponse, name: &str) -> &'a str {
        response
            .file
            .iter()
            .find(|f| f.name() == name)
            .and_then(|f| f.content.as_deref())
            .unwrap_or_else(|| panic!("missing {}", name))
    }

    #[test]
    fn test_stem() {
        assert_eq!(stem("a/b.proto"), "a/b");
        assert_eq!(stem("plain"), "plain");
    }

    #[test]
    fn test_generates_contracts_and_ir() {
        let bytes = testing::request_bytes("embed.proto", "");
        let response = generate_from_bytes(&bytes).unwrap();
        assert_eq!(response.error, None);
        assert_eq!(response.supported_features, Some(1));
        assert_eq!(response.file.len(), 2);

        let code = file(&response, "embed.plain.rs");
        assert!(code.contains("pub trait ProfileIntoPlain"));
        assert!(code.contains("pub trait ProfilePlainIntoPb"));

        let json: serde_json::Value =
            serde_json::from_str(file(&response, "embed.plain.ir.json")).unwrap();
        assert_eq!(json["file"], "embed.proto");
        assert_eq!(json["suffix"], "Plain");
        let names: Vec<_> = json["messages"]
            .as_array()
            .unwrap()
            .iter()
            .map(|m| m["full_name"].as_str().unwrap())
            .collect();
        assert_eq!(names, vec![".embed.Geo", ".embed.Address", ".embed.Profile"]);
        assert_eq!(json["renames"]["messages"][".embed.Profile"], ".embed.ProfilePlain");
    }

    #[test]
    fn test_parameters_are_applied() {
        let bytes = testing::request_bytes("oneof.proto", "enable_crf=true,plain_suffix=Flat,json_jx");
        let response = generate_from_bytes(&bytes).unwrap();
        assert_eq!(response.error, None);

        let code = file(&response, "oneof.plain.rs");
        assert!(code.contains("pub trait PaymentFlatIntoPb"));
        assert!(code.contains("plain_runtime::JsonStyle::Jx"));
    }

    #[test]
    fn test_build_errors_go_in_the_response() {
        let bytes = testing::request_bytes("oneof.proto", "");
        let response = generate_from_bytes(&bytes).unwrap();
        assert!(response.file.is_empty());
        let error = response.error.unwrap();
        assert!(error.contains("card?oneof=method/number"), "{}", error);

        let bytes = testing::request_bytes("invalid.proto", "");
        let response = generate_from_bytes(&bytes).unwrap();
        assert!(response.error.unwrap().starts_with("invalid options: "));

        let bytes = testing::request_bytes("numbers.proto", "");
        let response = generate_from_bytes(&bytes).unwrap();
        assert!(response.file.is_empty());
        assert!(response.error.unwrap().starts_with("invalid field numbers: "));
    }

    #[test]
    fn test_bad_parameter_goes_in_the_response() {
        let bytes = testing::request_bytes("embed.proto", "mode=strict");
        let response = generate_from_bytes(&bytes).unwrap();
        assert!(response.error.unwrap().contains("unknown key"));
    }

    #[test]
    fn test_rename_across_files() {
        let bytes = testing::request_bytes("rename.proto", "");
        let response = generate_from_bytes(&bytes).unwrap();
        assert_eq!(response.error, None);
        // only the requested file is emitted
        assert!(response.file.iter().all(|f| f.name().starts_with("rename.")));
        let code = file(&response, "rename.plain.rs");
        assert!(code.contains("pub trait BasketIntoPlain"));
    }
}
