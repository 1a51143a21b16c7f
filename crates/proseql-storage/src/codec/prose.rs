//! The in-house "prose" line-oriented codec.
//!
//! A prose document is represented, for the purposes of this codec, as a
//! JSON object with two keys:
//!
//! ```json
//! { "template": "#{id} owns {name}, aged {age}", "records": [ {...}, ... ] }
//! ```
//!
//! `template` holds the text that follows `@prose ` on the directive line;
//! `records` holds one object per record line, in file order. This is the
//! stable value the rest of the database round-trips through the codec
//! registry; the textual file format itself is specified below.
//!
//! A text file begins with an optional preamble (arbitrary lines), then
//! exactly one `@prose <template>` directive at column 0 (the first
//! non-blank line starting with `@prose `; a missing or duplicated directive
//! is a hard error). Subsequent lines matching the template are records.
//! Continuation lines for overflow fields are indented two spaces; the first
//! non-space text continues the previous record's last field.
//!
//! Template placeholders are `{field}` (greedy on the last placeholder) and
//! `#{id}` (a numeric id marker); text between placeholders is matched
//! literally. Decoding coerces numeric and boolean strings and treats `~` as
//! null. Arrays encode as `[a, b, c]`, quoting elements that contain the
//! template's delimiter text.
//!
//! Encoding never preserves preamble text: it emits only the directive
//! followed by one line per record, so `decode(encode(decode(f))) =
//! decode(f)` even though `decode(encode(x)) = x` only holds modulo these
//! documented coercions.

use regex::Regex;

use crate::codec::Codec;
use crate::error::{StorageError, StorageResult};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Field(String),
    Id(String),
}

/// A parsed `@prose` template, compiled once and reused for every line.
struct Template {
    segments: Vec<Segment>,
    matcher: Regex,
    /// Field name for each capturing group, in group order.
    group_names: Vec<String>,
}

impl Template {
    fn parse(raw: &str) -> StorageResult<Self> {
        let mut segments = Vec::new();
        let chars: Vec<char> = raw.chars().collect();
        let mut i = 0;
        let mut literal = String::new();

        while i < chars.len() {
            if chars[i] == '#' && chars.get(i + 1) == Some(&'{') {
                if !literal.is_empty() {
                    segments.push(Segment::Literal(std::mem::take(&mut literal)));
                }
                let end = find_closing_brace(&chars, i + 2)?;
                let name: String = chars[i + 2..end].iter().collect();
                segments.push(Segment::Id(name));
                i = end + 1;
            } else if chars[i] == '{' {
                if !literal.is_empty() {
                    segments.push(Segment::Literal(std::mem::take(&mut literal)));
                }
                let end = find_closing_brace(&chars, i + 1)?;
                let name: String = chars[i + 1..end].iter().collect();
                segments.push(Segment::Field(name));
                i = end + 1;
            } else {
                literal.push(chars[i]);
                i += 1;
            }
        }
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        if segments.is_empty() {
            return Err(StorageError::ProseTemplate {
                message: "template has no placeholders or literal text".to_string(),
            });
        }

        let mut pattern = String::from("^");
        let mut group_names = Vec::new();
        let placeholder_count = segments
            .iter()
            .filter(|s| !matches!(s, Segment::Literal(_)))
            .count();
        let mut seen_placeholders = 0;

        for segment in &segments {
            match segment {
                Segment::Literal(text) => pattern.push_str(&regex::escape(text)),
                Segment::Id(name) => {
                    pattern.push_str(r"(\d+)");
                    group_names.push(name.clone());
                    seen_placeholders += 1;
                }
                Segment::Field(name) => {
                    seen_placeholders += 1;
                    let is_last = seen_placeholders == placeholder_count;
                    pattern.push_str(if is_last { "(.*)" } else { "(.*?)" });
                    group_names.push(name.clone());
                }
            }
        }
        pattern.push('$');

        let matcher = Regex::new(&pattern).map_err(|e| StorageError::ProseTemplate {
            message: format!("could not compile template: {e}"),
        })?;

        Ok(Template {
            segments,
            matcher,
            group_names,
        })
    }

    fn parse_line(&self, line: &str) -> Option<serde_json::Map<String, serde_json::Value>> {
        let captures = self.matcher.captures(line)?;
        let mut record = serde_json::Map::new();
        for (idx, name) in self.group_names.iter().enumerate() {
            let raw = captures.get(idx + 1).map(|m| m.as_str()).unwrap_or("");
            record.insert(name.clone(), decode_scalar(raw));
        }
        Some(record)
    }

    fn render_line(&self, record: &serde_json::Map<String, serde_json::Value>) -> String {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Id(name) | Segment::Field(name) => {
                    let value = record.get(name).unwrap_or(&serde_json::Value::Null);
                    out.push_str(&encode_scalar(value));
                }
            }
        }
        out
    }
}

fn find_closing_brace(chars: &[char], start: usize) -> StorageResult<usize> {
    chars[start..]
        .iter()
        .position(|&c| c == '}')
        .map(|offset| start + offset)
        .ok_or_else(|| StorageError::ProseTemplate {
            message: "unterminated placeholder".to_string(),
        })
}

fn decode_scalar(raw: &str) -> serde_json::Value {
    let trimmed = raw.trim();
    if trimmed == "~" {
        return serde_json::Value::Null;
    }
    if trimmed.starts_with('[') && trimmed.ends_with(']') {
        let inner = &trimmed[1..trimmed.len() - 1];
        let elements = split_unquoted_commas(inner)
            .into_iter()
            .map(|e| decode_scalar(e.trim().trim_matches('"')))
            .collect();
        return serde_json::Value::Array(elements);
    }
    if trimmed == "true" {
        return serde_json::Value::Bool(true);
    }
    if trimmed == "false" {
        return serde_json::Value::Bool(false);
    }
    if let Ok(n) = trimmed.parse::<i64>() {
        return serde_json::Value::Number(n.into());
    }
    if let Ok(f) = trimmed.parse::<f64>() {
        if let Some(n) = serde_json::Number::from_f64(f) {
            return serde_json::Value::Number(n);
        }
    }
    serde_json::Value::String(trimmed.to_string())
}

fn split_unquoted_commas(text: &str) -> Vec<&str> {
    if text.trim().is_empty() {
        return Vec::new();
    }
    text.split(',').collect()
}

fn encode_scalar(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Null => "~".to_string(),
        serde_json::Value::Bool(b) => b.to_string(),
        serde_json::Value::Number(n) => n.to_string(),
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Array(items) => {
            let rendered: Vec<String> = items
                .iter()
                .map(|item| {
                    let text = encode_scalar(item);
                    if text.contains(',') || text.contains('[') || text.contains(']') {
                        format!("\"{text}\"")
                    } else {
                        text
                    }
                })
                .collect();
            format!("[{}]", rendered.join(", "))
        }
        other => other.to_string(),
    }
}

/// The in-house prose codec.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProseCodec;

impl Codec for ProseCodec {
    fn name(&self) -> &'static str {
        "prose"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["prose"]
    }

    fn encode(&self, value: &serde_json::Value) -> StorageResult<Vec<u8>> {
        let obj = value.as_object().ok_or_else(|| StorageError::Serialization {
            codec: self.name().to_string(),
            message: "prose document must be an object with `template` and `records`".into(),
        })?;
        let template_str = obj
            .get("template")
            .and_then(|v| v.as_str())
            .ok_or_else(|| StorageError::Serialization {
                codec: self.name().to_string(),
                message: "missing string field `template`".into(),
            })?;
        let records = obj
            .get("records")
            .and_then(|v| v.as_array())
            .ok_or_else(|| StorageError::Serialization {
                codec: self.name().to_string(),
                message: "missing array field `records`".into(),
            })?;

        let template = Template::parse(template_str).map_err(|e| StorageError::Serialization {
            codec: self.name().to_string(),
            message: e.to_string(),
        })?;

        let mut out = String::new();
        out.push_str("@prose ");
        out.push_str(template_str);
        out.push('\n');
        for record in records {
            let obj = record.as_object().ok_or_else(|| StorageError::Serialization {
                codec: self.name().to_string(),
                message: "each record must be an object".into(),
            })?;
            out.push_str(&template.render_line(obj));
            out.push('\n');
        }
        Ok(out.into_bytes())
    }

    fn decode(&self, bytes: &[u8]) -> StorageResult<serde_json::Value> {
        let text = std::str::from_utf8(bytes).map_err(|e| StorageError::Deserialization {
            codec: self.name().to_string(),
            message: e.to_string(),
        })?;

        let mut directive: Option<String> = None;
        let mut directive_line_idx = None;
        let lines: Vec<&str> = text.lines().collect();
        for (idx, line) in lines.iter().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            if let Some(rest) = line.strip_prefix("@prose ") {
                if directive.is_some() {
                    return Err(StorageError::ProseTemplate {
                        message: "duplicate @prose directive".to_string(),
                    });
                }
                directive = Some(rest.to_string());
                directive_line_idx = Some(idx);
            }
        }

        let template_str = directive.ok_or_else(|| StorageError::ProseTemplate {
            message: "missing @prose directive".to_string(),
        })?;
        let template = Template::parse(&template_str)?;
        let start = directive_line_idx.unwrap() + 1;

        let mut records: Vec<serde_json::Map<String, serde_json::Value>> = Vec::new();
        for line in &lines[start..] {
            if line.starts_with("  ") {
                // Continuation line: append to the previous record's last field.
                if let Some(last) = records.last_mut() {
                    if let Some(Segment::Field(name) | Segment::Id(name)) =
                        template.segments.iter().rev().find(|s| !matches!(s, Segment::Literal(_)))
                    {
                        let continuation = line.trim_start();
                        if let Some(existing) = last.get_mut(name) {
                            if let serde_json::Value::String(s) = existing {
                                s.push('\n');
                                s.push_str(continuation);
                            }
                        }
                    }
                }
                continue;
            }
            if line.trim().is_empty() {
                continue;
            }
            if let Some(record) = template.parse_line(line) {
                records.push(record);
            }
        }

        let mut doc = serde_json::Map::new();
        doc.insert(
            "template".to_string(),
            serde_json::Value::String(template_str),
        );
        doc.insert(
            "records".to_string(),
            serde_json::Value::Array(records.into_iter().map(serde_json::Value::Object).collect()),
        );
        Ok(serde_json::Value::Object(doc))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decode_simple_document() {
        let codec = ProseCodec;
        let text = b"preamble line, ignored\n@prose #{id} owns {name}, aged {age}\n1 owns Alice, aged 30\n2 owns Bob, aged 42\n";
        let decoded = codec.decode(text).unwrap();
        assert_eq!(decoded["template"], "#{id} owns {name}, aged {age}");
        let records = decoded["records"].as_array().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0]["id"], 1);
        assert_eq!(records[0]["name"], "Alice");
        assert_eq!(records[0]["age"], 30);
        assert_eq!(records[1]["name"], "Bob");
    }

    #[test]
    fn missing_directive_is_error() {
        let codec = ProseCodec;
        let err = codec.decode(b"just text, no directive\n").unwrap_err();
        assert!(matches!(err, StorageError::ProseTemplate { .. }));
    }

    #[test]
    fn duplicate_directive_is_error() {
        let codec = ProseCodec;
        let text = b"@prose {a}\n@prose {b}\n";
        let err = codec.decode(text).unwrap_err();
        assert!(matches!(err, StorageError::ProseTemplate { .. }));
    }

    #[test]
    fn encode_drops_preamble_and_two_cycles_stabilize() {
        let codec = ProseCodec;
        let text = b"ignored preamble\n@prose #{id}: {name}\n1: Alice\n2: Bob\n";
        let first = codec.decode(text).unwrap();
        let encoded = codec.encode(&first).unwrap();
        let second = codec.decode(&encoded).unwrap();
        assert_eq!(first, second);
        assert!(!String::from_utf8(encoded).unwrap().contains("ignored preamble"));
    }

    #[test]
    fn null_and_boolean_coercion() {
        let codec = ProseCodec;
        let text = b"@prose {name} active={active} note={note}\nAlice active=true note=~\n";
        let decoded = codec.decode(text).unwrap();
        let record = &decoded["records"][0];
        assert_eq!(record["active"], true);
        assert_eq!(record["note"], serde_json::Value::Null);
    }

    #[test]
    fn array_field_roundtrip() {
        let codec = ProseCodec;
        let doc = json!({
            "template": "#{id} tags={tags}",
            "records": [{"id": 1, "tags": ["a", "b", "c"]}]
        });
        let encoded = codec.encode(&doc).unwrap();
        assert_eq!(
            String::from_utf8(encoded.clone()).unwrap(),
            "@prose #{id} tags={tags}\n1 tags=[a, b, c]\n"
        );
        let decoded = codec.decode(&encoded).unwrap();
        assert_eq!(decoded["records"][0]["tags"], json!(["a", "b", "c"]));
    }
}
