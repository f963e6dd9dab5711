//! Canonical byte conversion for values handed to the write pipeline.
//!
//! The supported value kinds form a closed sum type with an exhaustive
//! match, so adding a kind is a compile error until every conversion site
//! handles it.  All text is UTF-8.

/// Delimiters used when flattening aggregate values to text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConvertFormat {
    pub list_delimiter:  String,
    pub kv_delimiter:    String,
    pub entry_delimiter: String,
}

impl Default for ConvertFormat {
    fn default() -> Self {
        Self {
            list_delimiter:  ", ".into(),
            kv_delimiter:    ": ".into(),
            entry_delimiter: ", ".into(),
        }
    }
}

/// A value the write pipeline knows how to render to bytes.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteData {
    Bytes(Vec<u8>),
    Text(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
    List(Vec<WriteData>),
    Map(Vec<(String, WriteData)>),
}

impl WriteData {
    /// Render to the canonical byte form.  `Bytes` passes through verbatim;
    /// everything else is UTF-8 text, aggregates flattened with the
    /// configured delimiters.
    pub fn to_bytes(&self, format: &ConvertFormat) -> Vec<u8> {
        match self {
            WriteData::Bytes(b) => b.clone(),
            _ => self.render(format).into_bytes(),
        }
    }

    fn render(&self, format: &ConvertFormat) -> String {
        match self {
            WriteData::Bytes(b)   => String::from_utf8_lossy(b).into_owned(),
            WriteData::Text(s)    => s.clone(),
            WriteData::Integer(i) => i.to_string(),
            WriteData::Float(f)   => f.to_string(),
            WriteData::Boolean(b) => b.to_string(),
            WriteData::List(items) => items
                .iter()
                .map(|item| item.render(format))
                .collect::<Vec<_>>()
                .join(&format.list_delimiter),
            WriteData::Map(entries) => entries
                .iter()
                .map(|(k, v)| format!("{k}{}{}", format.kv_delimiter, v.render(format)))
                .collect::<Vec<_>>()
                .join(&format.entry_delimiter),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            WriteData::Bytes(b)     => b.is_empty(),
            WriteData::Text(s)      => s.is_empty(),
            WriteData::List(items)  => items.is_empty(),
            WriteData::Map(entries) => entries.is_empty(),
            _                       => false,
        }
    }
}

impl From<Vec<u8>> for WriteData {
    fn from(b: Vec<u8>) -> Self {
        WriteData::Bytes(b)
    }
}

impl From<&[u8]> for WriteData {
    fn from(b: &[u8]) -> Self {
        WriteData::Bytes(b.to_vec())
    }
}

impl From<String> for WriteData {
    fn from(s: String) -> Self {
        WriteData::Text(s)
    }
}

impl From<&str> for WriteData {
    fn from(s: &str) -> Self {
        WriteData::Text(s.to_owned())
    }
}

impl From<i64> for WriteData {
    fn from(i: i64) -> Self {
        WriteData::Integer(i)
    }
}

impl From<f64> for WriteData {
    fn from(f: f64) -> Self {
        WriteData::Float(f)
    }
}

impl From<bool> for WriteData {
    fn from(b: bool) -> Self {
        WriteData::Boolean(b)
    }
}
