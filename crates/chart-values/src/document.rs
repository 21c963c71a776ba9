//! The textual values document edited in advanced mode.
//!
//! The document is plain YAML, the same format as a chart's `values.yaml`.
use std::io::Write;

use serde::Serialize;
use snafu::{ResultExt, Snafu};
use strum::Display;

use crate::{Tree, Value};

type Result<T, E = SerializeError> = std::result::Result<T, E>;

/// The document could not be turned into a values [`Tree`].
#[derive(Debug, Snafu)]
pub enum FormatError {
    #[snafu(display("failed to parse values document as YAML"))]
    ParseDocument { source: serde_yaml::Error },

    #[snafu(display("values document must be a mapping at the top level, found {found}"))]
    NotAMapping { found: ValueKind },
}

#[derive(Debug, Snafu)]
pub enum SerializeError {
    #[snafu(display("failed to serialize values document"))]
    SerializeYaml { source: serde_yaml::Error },

    #[snafu(display("failed to write YAML document separator"))]
    WriteDocumentSeparator { source: std::io::Error },

    #[snafu(display("failed to parse bytes as valid UTF-8 string"))]
    ParseUtf8Bytes { source: std::string::FromUtf8Error },
}

/// The variant of a [`Value`], used in error messages.
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq)]
#[strum(serialize_all = "lowercase")]
pub enum ValueKind {
    Null,
    Boolean,
    Number,
    String,
    Sequence,
    Mapping,
}

impl From<&Value> for ValueKind {
    fn from(value: &Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(_) => Self::Boolean,
            Value::Number(_) => Self::Number,
            Value::String(_) => Self::String,
            Value::Array(_) => Self::Sequence,
            Value::Object(_) => Self::Mapping,
        }
    }
}

/// Provides configurable options during document serialization.
#[derive(Clone, Copy, Debug, Default)]
pub struct SerializeOptions {
    /// Adds leading triple dashes (`---`) to the output string.
    pub explicit_document: bool,
}

/// Parses `input` into a values tree.
///
/// Fails if `input` is not valid YAML, contains more than one document, or
/// does not have a mapping at its top level. An empty document is not a
/// mapping either.
pub fn parse(input: &str) -> Result<Tree, FormatError> {
    let value: Value = serde_yaml::from_str(input).context(ParseDocumentSnafu)?;
    let found = ValueKind::from(&value);

    match value {
        Value::Object(tree) => Ok(tree),
        _ => NotAMappingSnafu { found }.fail(),
    }
}

/// Serializes `tree` into a YAML document using the default
/// [`SerializeOptions`].
///
/// ```
/// use serde_json::json;
/// use chart_values::document;
///
/// let tree = json!({"image": {"repository": "nginx"}, "replicaCount": 1});
/// let yaml = document::serialize(tree.as_object().unwrap()).unwrap();
///
/// assert_eq!(yaml, "image:\n  repository: nginx\nreplicaCount: 1\n");
/// ```
pub fn serialize(tree: &Tree) -> Result<String> {
    serialize_with(tree, SerializeOptions::default())
}

/// Serializes `tree` into a YAML document using the provided
/// [`SerializeOptions`].
pub fn serialize_with(tree: &Tree, options: SerializeOptions) -> Result<String> {
    let mut buffer = Vec::new();
    write_document(tree, &mut buffer, options)?;
    String::from_utf8(buffer).context(ParseUtf8BytesSnafu)
}

/// Serializes the given data structure and writes it to a [`Writer`](Write).
pub fn write_document<T, W>(value: &T, mut writer: W, options: SerializeOptions) -> Result<()>
where
    T: Serialize,
    W: Write,
{
    if options.explicit_document {
        writer
            .write_all(b"---\n")
            .context(WriteDocumentSeparatorSnafu)?;
    }

    let mut serializer = serde_yaml::Serializer::new(writer);
    value
        .serialize(&mut serializer)
        .context(SerializeYamlSnafu)?;

    Ok(())
}
