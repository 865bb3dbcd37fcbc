//! Renders engine value descriptors into display strings.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};

use crate::dbgp::Property;
use crate::{BridgeError, Result};

/// Rendered in place of composite values nested deeper than the cap, or whose
/// children the engine did not send.
pub const TRUNCATION_MARKER: &str = "{…}";

pub const DEFAULT_MAX_DEPTH: usize = 4;

#[derive(Debug, Clone, Copy)]
pub struct ValueFormatter {
    max_depth: usize,
}

impl Default for ValueFormatter {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_DEPTH)
    }
}

impl ValueFormatter {
    pub fn new(max_depth: usize) -> Self {
        Self { max_depth }
    }

    pub fn format(&self, property: &Property) -> Result<String> {
        self.render(property, 0)
    }

    fn render(&self, property: &Property, depth: usize) -> Result<String> {
        let kind = property.kind.as_deref().ok_or_else(|| {
            BridgeError::format(format!(
                "property {} has no type",
                property.display_name()
            ))
        })?;

        match kind {
            "array" | "object" => self.render_composite(property, kind, depth),
            "string" => Ok(format!("\"{}\"", scalar_text(property)?)),
            "bool" => Ok(match scalar_text(property)?.trim() {
                "1" | "true" => "true".to_string(),
                _ => "false".to_string(),
            }),
            "null" => Ok("null".to_string()),
            "uninitialized" => Ok("uninitialized".to_string()),
            _ => {
                let text = scalar_text(property)?;
                if text.is_empty() {
                    Ok(kind.to_string())
                } else {
                    Ok(text)
                }
            }
        }
    }

    fn render_composite(&self, property: &Property, kind: &str, depth: usize) -> Result<String> {
        let head = match kind {
            "array" => format!(
                "array({})",
                property.num_children.unwrap_or(property.children.len())
            ),
            _ => property
                .classname
                .clone()
                .unwrap_or_else(|| "object".to_string()),
        };

        let has_unfetched_children =
            property.children.is_empty() && property.num_children.unwrap_or(0) > 0;
        if depth >= self.max_depth || has_unfetched_children {
            return Ok(format!("{head} {TRUNCATION_MARKER}"));
        }

        let entries = property
            .children
            .iter()
            .map(|child| {
                self.render(child, depth + 1)
                    .map(|value| format!("{} => {value}", child.display_name()))
            })
            .collect::<Result<Vec<_>>>()?;

        if entries.is_empty() {
            Ok(format!("{head} {{}}"))
        } else {
            Ok(format!("{head} {{ {} }}", entries.join(", ")))
        }
    }
}

fn scalar_text(property: &Property) -> Result<String> {
    match property.encoding.as_deref() {
        Some("base64") => {
            let bytes = BASE64.decode(property.value.trim())?;
            Ok(String::from_utf8_lossy(&bytes).into_owned())
        }
        Some("none") | None => Ok(property.value.clone()),
        Some(other) => Err(BridgeError::format(format!(
            "unsupported encoding {other} on {}",
            property.display_name()
        ))),
    }
}
