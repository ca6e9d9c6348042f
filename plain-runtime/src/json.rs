//! JSON codec for Plain messages
//!
//! Two styles are supported. [`JsonStyle::Protojson`] is the canonical
//! protobuf JSON mapping. [`JsonStyle::Jx`] keeps the declared field names and
//! writes 64-bit integers as JSON numbers, which matches hand-written JSON
//! structs. Both styles skip default values and ignore unknown fields when
//! decoding.

use std::str::FromStr;

use prost_reflect::{DeserializeOptions, DynamicMessage, MessageDescriptor, SerializeOptions};

use crate::RuntimeError;

/// JSON layout of Plain messages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JsonStyle {
    /// Canonical protobuf JSON: lowerCamel names, 64-bit integers as strings
    #[default]
    Protojson,
    /// Declared field names, native 64-bit numbers
    Jx,
}

impl FromStr for JsonStyle {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "protojson" | "proto" => Ok(JsonStyle::Protojson),
            "jx" => Ok(JsonStyle::Jx),
            _ => Err(format!("Unknown JSON style: {}", s)),
        }
    }
}

/// Encoder and decoder for one JSON style
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec {
    style: JsonStyle,
}

impl JsonCodec {
    /// Create a codec for the given style
    pub fn new(style: JsonStyle) -> Self {
        Self { style }
    }

    /// The configured style
    pub fn style(&self) -> JsonStyle {
        self.style
    }

    fn serialize_options(&self) -> SerializeOptions {
        let options = SerializeOptions::new().skip_default_fields(true);
        match self.style {
            JsonStyle::Protojson => options,
            JsonStyle::Jx => options
                .use_proto_field_name(true)
                .stringify_64_bit_integers(false),
        }
    }

    /// Encode a message as a JSON string
    pub fn encode(&self, msg: &DynamicMessage) -> Result<String, RuntimeError> {
        let mut serializer = serde_json::Serializer::new(Vec::new());
        msg.serialize_with_options(&mut serializer, &self.serialize_options())?;
        Ok(String::from_utf8(serializer.into_inner())?)
    }

    /// Decode a JSON string into a message of the given type
    pub fn decode(
        &self,
        descriptor: MessageDescriptor,
        json: &str,
    ) -> Result<DynamicMessage, RuntimeError> {
        let options = DeserializeOptions::new().deny_unknown_fields(false);
        let mut deserializer = serde_json::Deserializer::from_str(json);
        let msg = DynamicMessage::deserialize_with_options(descriptor, &mut deserializer, &options)?;
        deserializer.end()?;
        Ok(msg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crf::{CrfPath, PathSegment};
    use crate::path::{self, tests::pool};
    use prost_reflect::ReflectMessage;

    fn sample() -> DynamicMessage {
        let desc = pool().get_message_by_name("test.Inner").unwrap();
        let mut msg = DynamicMessage::new(desc);
        assert!(path::set(&mut msg, &["count"], 9_007_199_254_740_993i64));
        assert!(path::set(&mut msg, &["leaf", "flag"], true));
        msg
    }

    #[test]
    fn test_style_from_str() {
        assert_eq!("jx".parse::<JsonStyle>(), Ok(JsonStyle::Jx));
        assert_eq!("Protojson".parse::<JsonStyle>(), Ok(JsonStyle::Protojson));
        assert!("yaml".parse::<JsonStyle>().is_err());
    }

    #[test]
    fn test_protojson_stringifies_64_bit() {
        let json = JsonCodec::new(JsonStyle::Protojson).encode(&sample()).unwrap();
        assert!(json.contains(r#""count":"9007199254740993""#), "{}", json);
    }

    #[test]
    fn test_jx_keeps_numbers() {
        let json = JsonCodec::new(JsonStyle::Jx).encode(&sample()).unwrap();
        assert!(json.contains(r#""count":9007199254740993"#), "{}", json);
    }

    #[test]
    fn test_round_trip_both_styles() {
        let msg = sample();
        for style in [JsonStyle::Protojson, JsonStyle::Jx] {
            let codec = JsonCodec::new(style);
            let json = codec.encode(&msg).unwrap();
            let decoded = codec.decode(msg.descriptor(), &json).unwrap();
            assert_eq!(decoded, msg);
        }
    }

    #[test]
    fn test_crf_string_survives_json() {
        let desc = pool().get_message_by_name("test.Inner").unwrap();
        let crf = CrfPath::new(vec![
            PathSegment::new("card").with_marker("oneof", "pay/ment"),
            PathSegment::new("number"),
        ])
        .to_string();

        let mut msg = DynamicMessage::new(desc.clone());
        assert!(path::set(&mut msg, &["street"], crf.clone()));
        for style in [JsonStyle::Protojson, JsonStyle::Jx] {
            let codec = JsonCodec::new(style);
            let decoded = codec.decode(desc.clone(), &codec.encode(&msg).unwrap()).unwrap();
            assert_eq!(path::get::<String, _>(&decoded, &["street"]), Some(crf.clone()));
        }
    }

    #[test]
    fn test_decode_ignores_unknown_fields() {
        let desc = pool().get_message_by_name("test.Leaf").unwrap();
        let msg = JsonCodec::default()
            .decode(desc, r#"{"flag": true, "extra": 1}"#)
            .unwrap();
        assert_eq!(path::get::<bool, _>(&msg, &["flag"]), Some(true));
    }
}
