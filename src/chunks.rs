//! Chunk file loading for `hrag index`.
//!
//! Accepts a JSON array of chunk objects, or an object wrapping that array
//! under `"chunks"`. Each object needs `text` (or `content`). `id` may be a
//! string or a number and defaults to the position in the file. A
//! `metadata` object is merged into the chunk metadata; any other scalar
//! field is lifted into metadata as-is, and scalars nested one level deep
//! are lifted under dotted keys (`{"source": {"file": "a.md"}}` becomes
//! `source.file`).

use anyhow::{bail, Context, Result};
use serde_json::{Map, Value};
use std::path::Path;

use hybrid_rag_core::models::Chunk;

pub fn load_chunks(path: &Path) -> Result<Vec<Chunk>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read chunk file: {}", path.display()))?;
    parse_chunks(&content).with_context(|| format!("Invalid chunk file: {}", path.display()))
}

pub fn parse_chunks(content: &str) -> Result<Vec<Chunk>> {
    let root: Value = serde_json::from_str(content)?;

    let items = match root {
        Value::Array(items) => items,
        Value::Object(mut obj) => match obj.remove("chunks") {
            Some(Value::Array(items)) => items,
            _ => bail!("expected a JSON array or an object with a \"chunks\" array"),
        },
        _ => bail!("expected a JSON array or an object with a \"chunks\" array"),
    };

    items
        .into_iter()
        .enumerate()
        .map(|(pos, item)| match item {
            Value::Object(obj) => chunk_from_object(pos, obj),
            _ => bail!("chunk {} is not an object", pos),
        })
        .collect()
}

fn chunk_from_object(pos: usize, mut obj: Map<String, Value>) -> Result<Chunk> {
    let text = match obj.remove("text").or_else(|| obj.remove("content")) {
        Some(Value::String(s)) => s,
        Some(_) => bail!("chunk {}: text must be a string", pos),
        None => bail!("chunk {}: missing \"text\" (or \"content\")", pos),
    };

    let id = match obj.remove("id") {
        Some(Value::String(s)) => s,
        Some(Value::Number(n)) => n.to_string(),
        Some(_) => bail!("chunk {}: id must be a string or number", pos),
        None => pos.to_string(),
    };

    let mut chunk = Chunk::new(id, text);

    if let Some(meta) = obj.remove("metadata") {
        match meta {
            Value::Object(m) => chunk.metadata.extend(m),
            Value::Null => {}
            _ => bail!("chunk {}: metadata must be an object", pos),
        }
    }

    for (key, value) in obj {
        match value {
            Value::Object(nested) => {
                for (sub, v) in nested {
                    if is_scalar(&v) {
                        chunk.metadata.insert(format!("{key}.{sub}"), v);
                    }
                }
            }
            v if is_scalar(&v) => {
                chunk.metadata.insert(key, v);
            }
            _ => {}
        }
    }

    Ok(chunk)
}

fn is_scalar(v: &Value) -> bool {
    matches!(v, Value::String(_) | Value::Number(_) | Value::Bool(_))
}
