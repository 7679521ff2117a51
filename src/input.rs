//! Decoding raw JSON text into documents
//!
//! Accepts an array of documents, a single document, or newline-delimited
//! JSON. Whole-buffer input is parsed with simd-json; line-delimited input
//! falls back to serde_json one line at a time.

use anyhow::{Context, Result};
use serde_json::Value;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

/// How to interpret the input text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InputFormat {
    /// Array-wrapped or single document, falling back to NDJSON
    #[default]
    Auto,
    /// One document per line
    Ndjson,
}

/// Read documents from any reader
pub fn read_documents<R: Read>(reader: R, format: InputFormat) -> Result<Vec<Value>> {
    let mut content = Vec::new();
    BufReader::new(reader)
        .read_to_end(&mut content)
        .context("Failed to read input")?;
    parse_documents(&content, format)
}

/// Read documents from a file, or stdin when no path is given
pub fn read_source(path: Option<&Path>, format: InputFormat) -> Result<Vec<Value>> {
    match path {
        Some(path) => {
            let file = File::open(path).with_context(|| format!("Failed to open input: {}", path.display()))?;
            read_documents(file, format).with_context(|| format!("Invalid input: {}", path.display()))
        }
        None => read_documents(std::io::stdin(), format),
    }
}

pub fn parse_documents(content: &[u8], format: InputFormat) -> Result<Vec<Value>> {
    if format == InputFormat::Ndjson {
        return parse_lines(content);
    }

    // simd-json parses in place and leaves the buffer unusable on failure
    let mut scratch = content.to_vec();
    match simd_json::serde::from_slice::<Value>(&mut scratch) {
        Ok(Value::Array(docs)) => Ok(docs),
        Ok(doc) => Ok(vec![doc]),
        Err(_) => parse_lines(content),
    }
}

fn parse_lines(content: &[u8]) -> Result<Vec<Value>> {
    let text = std::str::from_utf8(content).context("Input is not valid UTF-8")?;
    let mut docs = Vec::new();
    for (number, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let value: Value =
            serde_json::from_str(line).with_context(|| format!("Failed to parse JSON on line {}", number + 1))?;
        docs.push(value);
    }
    Ok(docs)
}
