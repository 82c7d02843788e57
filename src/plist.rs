// src/plist.rs

//! Property-list metadata accessor
//!
//! Reads and writes single keys of the root dictionary of an XML property
//! list. The document is parsed structurally with `quick-xml`, recording the
//! byte span of every top-level value node. Writes splice only the targeted
//! span, so every other byte of the document (sibling keys, their order,
//! comments, indentation) survives untouched.
//!
//! # Example
//!
//! ```ignore
//! use bundleguard::plist::PlistDocument;
//!
//! let mut doc = PlistDocument::parse(bytes)?;
//! let id = doc.read_string("CFBundleIdentifier")?;
//! doc.write_string("CFBundleIdentifier", "com.acme.app.ext1")?;
//! let updated = doc.into_bytes();
//! ```

use quick_xml::escape::escape;
use quick_xml::events::Event;
use quick_xml::Reader;
use std::ops::Range;
use thiserror::Error;

/// Magic prefix of binary property lists
const BINARY_PLIST_MAGIC: &[u8] = b"bplist";

/// Metadata accessor errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MetadataError {
    #[error("Key not found: {0}")]
    KeyNotFound(String),

    #[error("Key {key} holds <{found}>, expected <string>")]
    WrongType { key: String, found: String },

    #[error("Binary property lists are not supported")]
    Binary,

    #[error("Document is not valid UTF-8")]
    NotUtf8,

    #[error("Malformed property list: {0}")]
    Malformed(String),
}

type Result<T> = std::result::Result<T, MetadataError>;

/// Type of a dictionary value, from its element name
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueKind {
    String,
    Integer,
    Real,
    Bool,
    Date,
    Data,
    Array,
    Dict,
    Other(String),
}

impl ValueKind {
    fn from_tag(tag: &[u8]) -> Self {
        match tag {
            b"string" => Self::String,
            b"integer" => Self::Integer,
            b"real" => Self::Real,
            b"true" | b"false" => Self::Bool,
            b"date" => Self::Date,
            b"data" => Self::Data,
            b"array" => Self::Array,
            b"dict" => Self::Dict,
            other => Self::Other(String::from_utf8_lossy(other).into_owned()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Real => "real",
            Self::Bool => "bool",
            Self::Date => "date",
            Self::Data => "data",
            Self::Array => "array",
            Self::Dict => "dict",
            Self::Other(tag) => tag,
        }
    }
}

/// One key/value pair of the root dictionary
#[derive(Debug, Clone)]
struct DictEntry {
    key: String,
    key_start: usize,
    value: Range<usize>,
    kind: ValueKind,
    /// Unescaped contents for `<string>` values
    text: Option<String>,
}

/// Location of the root `<dict>` in the source text
#[derive(Debug, Clone)]
enum RootDict {
    /// `<dict>...</dict>`: end of the open tag and start of the close tag
    Open { content_start: usize, close_start: usize },
    /// `<dict/>`
    Empty(Range<usize>),
}

/// A value node that has been opened but not yet closed
struct OpenValue {
    key: String,
    key_start: usize,
    start: usize,
    kind: ValueKind,
    text: String,
}

/// An XML property list with a dictionary root
#[derive(Debug, Clone)]
pub struct PlistDocument {
    text: String,
    entries: Vec<DictEntry>,
    root: RootDict,
}

impl PlistDocument {
    /// Parse a property list document
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.starts_with(BINARY_PLIST_MAGIC) {
            return Err(MetadataError::Binary);
        }
        let text = std::str::from_utf8(bytes).map_err(|_| MetadataError::NotUtf8)?;
        Self::parse_text(text.to_string())
    }

    fn parse_text(text: String) -> Result<Self> {
        let mut reader = Reader::from_str(&text);

        let mut stack: Vec<Vec<u8>> = Vec::new();
        let mut entries = Vec::new();
        let mut root: Option<RootDict> = None;
        let mut root_content_start = 0;
        let mut pending_key: Option<(String, usize)> = None;
        let mut open_key: Option<(String, usize)> = None;
        let mut open_value: Option<OpenValue> = None;

        loop {
            let start = reader.buffer_position();
            let event = reader
                .read_event()
                .map_err(|e| malformed(format!("at byte {}: {}", start, e)))?;
            let end = reader.buffer_position();

            match event {
                Event::Start(e) => {
                    let name = e.name().as_ref().to_vec();
                    match stack.len() {
                        0 if name != b"plist" => {
                            return Err(malformed("root element is not <plist>"));
                        }
                        1 => {
                            if root.is_some() {
                                return Err(malformed("more than one top-level value"));
                            }
                            if name != b"dict" {
                                return Err(malformed("top-level value is not a <dict>"));
                            }
                            root_content_start = end;
                        }
                        2 if name == b"key" => {
                            if let Some((key, _)) = &pending_key {
                                return Err(malformed(format!("key {} has no value", key)));
                            }
                            open_key = Some((String::new(), start));
                        }
                        2 => {
                            let (key, key_start) = pending_key
                                .take()
                                .ok_or_else(|| malformed("dictionary value without a key"))?;
                            open_value = Some(OpenValue {
                                key,
                                key_start,
                                start,
                                kind: ValueKind::from_tag(&name),
                                text: String::new(),
                            });
                        }
                        _ => {}
                    }
                    stack.push(name);
                }
                Event::Empty(e) => {
                    let name = e.name().as_ref().to_vec();
                    match stack.len() {
                        0 => return Err(malformed("document has no root dictionary")),
                        1 => {
                            if root.is_some() {
                                return Err(malformed("more than one top-level value"));
                            }
                            if name != b"dict" {
                                return Err(malformed("top-level value is not a <dict>"));
                            }
                            root = Some(RootDict::Empty(start..end));
                        }
                        2 if name == b"key" => {
                            if let Some((key, _)) = &pending_key {
                                return Err(malformed(format!("key {} has no value", key)));
                            }
                            pending_key = Some((String::new(), start));
                        }
                        2 => {
                            let (key, key_start) = pending_key
                                .take()
                                .ok_or_else(|| malformed("dictionary value without a key"))?;
                            let kind = ValueKind::from_tag(&name);
                            let text = (kind == ValueKind::String).then(String::new);
                            entries.push(DictEntry {
                                key,
                                key_start,
                                value: start..end,
                                kind,
                                text,
                            });
                        }
                        _ => {}
                    }
                }
                Event::Text(t) if stack.len() == 3 => {
                    let content = t
                        .unescape()
                        .map_err(|e| malformed(format!("at byte {}: {}", start, e)))?;
                    append_text(&mut open_key, &mut open_value, &content);
                }
                Event::CData(c) if stack.len() == 3 => {
                    let content = std::str::from_utf8(&c).map_err(|_| MetadataError::NotUtf8)?;
                    append_text(&mut open_key, &mut open_value, content);
                }
                Event::End(_) => {
                    stack.pop();
                    match stack.len() {
                        2 => {
                            if let Some(key) = open_key.take() {
                                pending_key = Some(key);
                            } else if let Some(value) = open_value.take() {
                                let text =
                                    (value.kind == ValueKind::String).then_some(value.text);
                                entries.push(DictEntry {
                                    key: value.key,
                                    key_start: value.key_start,
                                    value: value.start..end,
                                    kind: value.kind,
                                    text,
                                });
                            }
                        }
                        1 if root.is_none() => {
                            root = Some(RootDict::Open {
                                content_start: root_content_start,
                                close_start: start,
                            });
                        }
                        _ => {}
                    }
                }
                Event::Eof => break,
                _ => {}
            }
        }

        if !stack.is_empty() {
            return Err(malformed("unexpected end of document"));
        }
        if let Some((key, _)) = pending_key {
            return Err(malformed(format!("key {} has no value", key)));
        }
        let root = root.ok_or_else(|| malformed("document has no root dictionary"))?;

        Ok(Self {
            text,
            entries,
            root,
        })
    }

    /// Read a string value from the root dictionary
    pub fn read_string(&self, key: &str) -> Result<String> {
        let entry = self
            .find(key)
            .ok_or_else(|| MetadataError::KeyNotFound(key.to_string()))?;
        entry.text.clone().ok_or_else(|| MetadataError::WrongType {
            key: key.to_string(),
            found: entry.kind.as_str().to_string(),
        })
    }

    /// Write a string value, inserting the key if it does not exist yet
    ///
    /// An existing value node is replaced whatever its type; nothing outside
    /// that node changes.
    pub fn write_string(&mut self, key: &str, value: &str) -> Result<()> {
        let node = format!("<string>{}</string>", escape(value));

        let (range, replacement) = match self.find(key) {
            Some(entry) => (entry.value.clone(), node),
            None => self.insertion(key, &node),
        };

        let mut text = String::with_capacity(self.text.len() + replacement.len());
        text.push_str(&self.text[..range.start]);
        text.push_str(&replacement);
        text.push_str(&self.text[range.end..]);

        *self = Self::parse_text(text)?;
        Ok(())
    }

    /// Whether the root dictionary has `key`
    pub fn contains_key(&self, key: &str) -> bool {
        self.find(key).is_some()
    }

    /// Keys of the root dictionary in document order
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.key.as_str())
    }

    /// Type of the value stored under `key`
    pub fn kind(&self, key: &str) -> Option<&ValueKind> {
        self.find(key).map(|e| &e.kind)
    }

    /// Serialized `<key>` and value bytes for `key`, exactly as in the source
    pub fn raw_entry(&self, key: &str) -> Option<&str> {
        self.find(key)
            .map(|e| &self.text[e.key_start..e.value.end])
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.text.as_bytes().to_vec()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.text.into_bytes()
    }

    /// Last entry for `key`, matching how property-list readers resolve duplicates
    fn find(&self, key: &str) -> Option<&DictEntry> {
        self.entries.iter().rev().find(|e| e.key == key)
    }

    /// Range to replace and text to put there when appending a new key
    fn insertion(&self, key: &str, node: &str) -> (Range<usize>, String) {
        let key_node = format!("<key>{}</key>", escape(key));
        match &self.root {
            RootDict::Empty(span) => (
                span.clone(),
                format!("<dict>\n\t{}\n\t{}\n</dict>", key_node, node),
            ),
            RootDict::Open {
                content_start,
                close_start,
            } => {
                let (at, indent) = match (self.entries.first(), self.entries.last()) {
                    (Some(first), Some(last)) => {
                        (last.value.end, line_indent(&self.text, first.key_start))
                    }
                    _ => (
                        *content_start,
                        format!("{}\t", line_indent(&self.text, *close_start)),
                    ),
                };
                let mut inserted = format!("\n{indent}{key_node}\n{indent}{node}");
                if self.entries.is_empty() && !self.text[at..*close_start].contains('\n') {
                    inserted.push('\n');
                }
                (at..at, inserted)
            }
        }
    }
}

fn malformed(reason: impl Into<String>) -> MetadataError {
    MetadataError::Malformed(reason.into())
}

fn append_text(
    open_key: &mut Option<(String, usize)>,
    open_value: &mut Option<OpenValue>,
    content: &str,
) {
    if let Some((key, _)) = open_key {
        key.push_str(content);
    } else if let Some(value) = open_value {
        value.text.push_str(content);
    }
}

/// Whitespace between the start of the line containing `pos` and `pos`
fn line_indent(text: &str, pos: usize) -> String {
    let line_start = text[..pos].rfind('\n').map_or(0, |i| i + 1);
    let prefix = &text[line_start..pos];
    if prefix.chars().all(|c| c == ' ' || c == '\t') {
        prefix.to_string()
    } else {
        String::new()
    }
}
