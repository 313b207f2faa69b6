use crate::codec::{parse_format, FormatDescriptor};
use crate::core::namespace::{
    MetaNamespace, DATATYPE_KEY, NUM_CHANNELS_KEY, SAMPLE_COUNT_KEY, SAMPLE_RATE_KEY,
    SAMPLE_START_KEY,
};
use crate::error::{Error, Result};
use serde_json::ser::PrettyFormatter;
use serde_json::{Map, Serializer, Value};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

/// In-memory form of a `.sigmf-meta` document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetadataFile {
    pub global: MetaNamespace,
    pub captures: Vec<MetaNamespace>,
    pub annotations: Vec<MetaNamespace>,
}

/// Byte offset of a 1-based line/column position reported by the JSON parser.
fn byte_offset(text: &str, line: usize, column: usize) -> usize {
    let line_start: usize = text
        .split_inclusive('\n')
        .take(line.saturating_sub(1))
        .map(str::len)
        .sum();
    (line_start + column.saturating_sub(1)).min(text.len())
}

fn namespace_list(root: &Map<String, Value>, field: &str) -> Result<Vec<MetaNamespace>> {
    match root.get(field) {
        Some(Value::Array(items)) => items.iter().map(MetaNamespace::from_json).collect(),
        Some(_) => Err(Error::type_mismatch(field, "array")),
        None => Err(Error::MissingField(field.to_string())),
    }
}

/// Parse a metadata document.
///
/// `global` and `captures` are required; a missing `annotations` array loads
/// as empty. Every capture needs `core:sample_start` and every annotation also
/// needs `core:sample_count`.
pub fn load<R: Read>(mut reader: R) -> Result<MetadataFile> {
    let mut text = String::new();
    reader.read_to_string(&mut text)?;

    let root: Value = serde_json::from_str(&text).map_err(|e| Error::ParseError {
        position: byte_offset(&text, e.line(), e.column()),
        message: e.to_string(),
    })?;
    let root = match root {
        Value::Object(map) => map,
        _ => {
            return Err(Error::ParseError {
                position: 0,
                message: "metadata root is not a JSON object".to_string(),
            })
        }
    };

    let global = match root.get("global") {
        Some(value) => MetaNamespace::from_json(value)?,
        None => return Err(Error::MissingField("global".to_string())),
    };
    let captures = namespace_list(&root, "captures")?;
    let annotations = match root.get("annotations") {
        Some(_) => namespace_list(&root, "annotations")?,
        None => Vec::new(),
    };

    for (i, capture) in captures.iter().enumerate() {
        if !capture.has(SAMPLE_START_KEY) {
            return Err(Error::MissingField(format!("captures[{i}].{SAMPLE_START_KEY}")));
        }
    }
    for (i, annotation) in annotations.iter().enumerate() {
        for key in [SAMPLE_START_KEY, SAMPLE_COUNT_KEY] {
            if !annotation.has(key) {
                return Err(Error::MissingField(format!("annotations[{i}].{key}")));
            }
        }
    }

    Ok(MetadataFile {
        global,
        captures,
        annotations,
    })
}

/// Serialize global, captures then annotations, with annotations stably
/// sorted by `core:sample_start`.
pub fn save<W: Write>(
    writer: W,
    global: &MetaNamespace,
    captures: &[MetaNamespace],
    annotations: &[MetaNamespace],
) -> Result<()> {
    let mut sorted: Vec<&MetaNamespace> = annotations.iter().collect();
    sorted.sort_by_key(|a| a.sample_start().unwrap_or(0));

    let mut root = Map::new();
    root.insert("global".to_string(), global.to_json());
    root.insert(
        "captures".to_string(),
        Value::Array(captures.iter().map(MetaNamespace::to_json).collect()),
    );
    root.insert(
        "annotations".to_string(),
        Value::Array(sorted.into_iter().map(MetaNamespace::to_json).collect()),
    );

    let mut writer = BufWriter::new(writer);
    let mut ser = Serializer::with_formatter(&mut writer, PrettyFormatter::with_indent(b"    "));
    serde::Serialize::serialize(&Value::Object(root), &mut ser).map_err(|e| Error::Io(e.into()))?;
    writer.write_all(b"\n")?;
    writer.flush()?;
    Ok(())
}

impl MetadataFile {
    /// Fresh document: global with datatype/version and one capture at 0.
    pub fn new(global: MetaNamespace) -> Self {
        Self {
            global,
            captures: vec![MetaNamespace::capture(0)],
            annotations: Vec::new(),
        }
    }

    pub fn load_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| Error::io_at(path, e))?;
        load(BufReader::new(file))
    }

    pub fn save<W: Write>(&self, writer: W) -> Result<()> {
        save(writer, &self.global, &self.captures, &self.annotations)
    }

    pub fn save_path(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let file = File::create(path).map_err(|e| Error::io_at(path, e))?;
        self.save(file)
    }

    pub fn datatype(&self) -> Result<FormatDescriptor> {
        parse_format(self.global.get_str(DATATYPE_KEY)?)
    }

    pub fn sample_rate(&self) -> Option<f64> {
        self.global.get(SAMPLE_RATE_KEY).and_then(|v| v.as_number().ok())
    }

    /// `core:num_channels`, defaulting to 1.
    pub fn num_channels(&self) -> Result<usize> {
        match self.global.get(NUM_CHANNELS_KEY) {
            None => Ok(1),
            Some(v) => match v.as_u64()? {
                0 => Err(Error::type_mismatch(NUM_CHANNELS_KEY, "positive integer")),
                n => Ok(n as usize),
            },
        }
    }

    /// Annotations in the order they are written to disk.
    pub fn sorted_annotations(&self) -> Vec<MetaNamespace> {
        let mut sorted = self.annotations.clone();
        sorted.sort_by_key(|a| a.sample_start().unwrap_or(0));
        sorted
    }
}
