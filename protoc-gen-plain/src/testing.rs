//! Test helpers: compile fixture protos from `testdata/` with protox

use prost::Message;
use prost_reflect::DescriptorPool;
use prost_types::FileDescriptorProto;

use crate::builder;
use crate::config::PluginConfig;
use crate::descriptor::Schema;
use crate::error::BuildError;
use crate::ir::Ir;

const TESTDATA: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/testdata");
const PROTO_ROOT: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/../proto");

/// Encoded descriptor set of a fixture and its imports, options included
pub(crate) fn fixture_bytes(fixture: &str) -> Vec<u8> {
    let mut compiler = protox::Compiler::new([TESTDATA, PROTO_ROOT]).unwrap();
    compiler.include_imports(true);
    compiler.open_file(fixture).unwrap();
    compiler.encode_file_descriptor_set()
}

pub(crate) fn pool(fixture: &str) -> DescriptorPool {
    DescriptorPool::decode(fixture_bytes(fixture).as_slice()).unwrap()
}

pub(crate) fn schema(fixture: &str) -> Schema {
    Schema::from_pool(&pool(fixture), &[fixture.to_string()]).unwrap()
}

pub(crate) fn build(fixture: &str, config: &PluginConfig) -> Result<Ir, BuildError> {
    builder::build(&schema(fixture), config)
}

/// Descriptor protos of a fixture, as protoc would place them in a request
pub(crate) fn file_protos(fixture: &str) -> Vec<FileDescriptorProto> {
    pool(fixture).file_descriptor_protos().cloned().collect()
}

#[derive(Clone, PartialEq, prost::Message)]
struct RawFileSet {
    #[prost(bytes = "vec", repeated, tag = "1")]
    file: Vec<Vec<u8>>,
}

#[derive(Clone, PartialEq, prost::Message)]
struct RawRequest {
    #[prost(string, repeated, tag = "1")]
    file_to_generate: Vec<String>,
    #[prost(string, optional, tag = "2")]
    parameter: Option<String>,
    #[prost(bytes = "vec", repeated, tag = "15")]
    proto_file: Vec<Vec<u8>>,
}

/// A CodeGeneratorRequest for a fixture, with option bytes untouched
pub(crate) fn request_bytes(fixture: &str, parameter: &str) -> Vec<u8> {
    let set = RawFileSet::decode(fixture_bytes(fixture).as_slice()).unwrap();
    RawRequest {
        file_to_generate: vec![fixture.to_string()],
        parameter: Some(parameter.to_string()),
        proto_file: set.file,
    }
    .encode_to_vec()
}
