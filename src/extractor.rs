//! Sample test case extraction from problem statements
//!
//! A problem statement carries its examples as HTML lines labelled
//! `<strong>Input:</strong>` and `<strong>Output:</strong>`. Each input line is a
//! list of `name = value` assignments whose values are literals in the
//! problem's own notation (`9`, `[2,7,11,15]`, `[[1,2],[3,4]]`). The JSON
//! metadata blob declares the parameters in order together with type names,
//! which decide how nested lists are laid out on standard input.

use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("malformed problem metadata: {0}")]
    MalformedMetadata(#[from] serde_json::Error),
    #[error("unsupported input shape for `{param}`: {reason}")]
    UnsupportedInputShape { param: String, reason: String },
}

/// Parameter name with its declared type name, e.g. `nums: integer[]`
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ParamType {
    pub name: String,
    #[serde(rename = "type", default)]
    pub kind: String,
}

#[derive(Deserialize, Debug, Default)]
struct ProblemMetadata {
    #[serde(default)]
    params: Vec<ParamType>,
}

/// Ordered parameter name to raw literal mapping
///
/// Serialized as a JSON object whose key order is the parameter order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Inputs(Vec<(String, String)>);

impl Inputs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets `name` to `value`, keeping the position of an existing entry
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.0.iter_mut().find(|(n, _)| *n == name) {
            Some(entry) => entry.1 = value,
            None => self.0.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Inputs {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut inputs = Inputs::new();
        for (k, v) in iter {
            inputs.insert(k, v);
        }
        inputs
    }
}

impl Serialize for Inputs {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (name, value) in &self.0 {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for Inputs {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct InputsVisitor;

        impl<'de> Visitor<'de> for InputsVisitor {
            type Value = Inputs;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of parameter names to literals")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Inputs, A::Error> {
                let mut inputs = Inputs::new();
                while let Some((name, value)) =
                    access.next_entry::<String, serde_json::Value>()?
                {
                    // Edited cases may carry numbers or arrays instead of strings
                    let literal = match value {
                        serde_json::Value::String(s) => s,
                        other => other.to_string(),
                    };
                    inputs.insert(name, literal);
                }
                Ok(inputs)
            }
        }

        deserializer.deserialize_map(InputsVisitor)
    }
}

/// One sample test case of a problem
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TestCase {
    pub input: Inputs,
    pub output: String,
    #[serde(default)]
    pub input_format: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub types: Option<Vec<ParamType>>,
}

impl TestCase {
    /// Recomputes `input_format` from `input`, using `types` when present
    pub fn rederive_input_format(&mut self) -> Result<(), ExtractError> {
        let types = match &self.types {
            Some(types) => types.clone(),
            None => self
                .input
                .iter()
                .map(|(name, _)| ParamType {
                    name: name.to_string(),
                    kind: String::new(),
                })
                .collect(),
        };
        self.input_format = format_input(&self.input, &types)?;
        Ok(())
    }
}

fn input_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"<strong>\s*Input\s*:?\s*</strong>\s*:?([^\n]*)").expect("valid input regex")
    })
}

fn output_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"<strong>\s*Output\s*:?\s*</strong>\s*:?([^\n]*)")
            .expect("valid output regex")
    })
}

fn tag_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"<[^>]*>").expect("valid tag regex"))
}

/// Extracts the sample test cases of a problem in document order
///
/// The i-th "Input:" line pairs with the i-th "Output:" line; surplus lines of
/// either kind are dropped. A statement without examples yields no cases.
pub fn extract_test_cases(content: &str, metadata: &str) -> Result<Vec<TestCase>, ExtractError> {
    let metadata: ProblemMetadata = serde_json::from_str(metadata)?;

    let raw_inputs = scan_labelled_lines(input_regex(), content);
    let raw_outputs = scan_labelled_lines(output_regex(), content);
    if raw_inputs.len() != raw_outputs.len() {
        log::warn!(
            "Found {} inputs but {} outputs, pairing the first {}",
            raw_inputs.len(),
            raw_outputs.len(),
            raw_inputs.len().min(raw_outputs.len())
        );
    }

    let mut test_cases = Vec::with_capacity(raw_inputs.len().min(raw_outputs.len()));
    for (raw_input, output) in raw_inputs.iter().zip(raw_outputs) {
        let (input, types) = align_with_metadata(parse_assignments(raw_input), &metadata.params);
        let input_format = format_input(&input, &types)?;
        test_cases.push(TestCase {
            input,
            output,
            input_format,
            types: Some(types),
        });
    }

    log::debug!("Extracted {} test cases", test_cases.len());
    Ok(test_cases)
}

fn scan_labelled_lines(re: &Regex, content: &str) -> Vec<String> {
    re.captures_iter(content)
        .filter_map(|caps| caps.get(1))
        .map(|m| clean_literal(m.as_str()))
        .collect()
}

/// Drops inline markup and decodes the entities used in statements
fn clean_literal(raw: &str) -> String {
    let stripped = tag_regex().replace_all(raw, "");
    stripped
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
        .trim()
        .to_string()
}

/// Splits `a = 1, b = [1, 2]` into ordered assignments
///
/// A fragment without ` = ` continues the previous value, so commas followed
/// by a space inside a literal survive the split.
fn parse_assignments(raw: &str) -> Inputs {
    let mut pairs: Vec<(String, String)> = Vec::new();
    for fragment in raw.split(", ") {
        match fragment.split_once(" = ") {
            Some((name, value)) => pairs.push((name.trim().to_string(), value.trim().to_string())),
            None => match pairs.last_mut() {
                Some((_, value)) => {
                    value.push_str(", ");
                    value.push_str(fragment.trim());
                }
                None => pairs.push((String::new(), fragment.trim().to_string())),
            },
        }
    }
    Inputs(pairs)
}

/// Orders inputs by metadata declaration and attaches their type names
///
/// Parameters are matched by name; inputs whose name the metadata does not
/// declare fall back to the declaration at the same position, and unnamed
/// inputs take that declaration's name.
fn align_with_metadata(inputs: Inputs, params: &[ParamType]) -> (Inputs, Vec<ParamType>) {
    let mut entries: Vec<(Option<usize>, String, String, String)> = inputs
        .0
        .into_iter()
        .enumerate()
        .map(|(pos, (name, value))| match params.iter().position(|p| p.name == name) {
            Some(idx) => (Some(idx), name, params[idx].kind.clone(), value),
            None => {
                let fallback = params.get(pos);
                let name = match (name.is_empty(), fallback) {
                    (true, Some(p)) => p.name.clone(),
                    _ => name,
                };
                let kind = fallback.map(|p| p.kind.clone()).unwrap_or_default();
                (None, name, kind, value)
            }
        })
        .collect();

    // Stable: undeclared inputs keep their document order after declared ones
    entries.sort_by_key(|(idx, ..)| idx.unwrap_or(usize::MAX));

    let types = entries
        .iter()
        .map(|(_, name, kind, _)| ParamType {
            name: name.clone(),
            kind: kind.clone(),
        })
        .collect();
    let inputs = entries
        .into_iter()
        .map(|(_, name, _, value)| (name, value))
        .collect();
    (inputs, types)
}

/// Builds the stdin text for one test case by concatenating parameter blocks
///
/// Blocks follow the order of `types`. Inputs `types` does not name come
/// after them in their own order, typed by the declaration at their position
/// when no other input claimed it.
pub fn format_input(input: &Inputs, types: &[ParamType]) -> Result<String, ExtractError> {
    let entries: Vec<(&str, &str)> = input.iter().collect();
    let mut used = vec![false; entries.len()];
    let mut claimed = vec![false; types.len()];
    let mut text = String::new();

    for (t, param) in types.iter().enumerate() {
        let Some(idx) = entries.iter().position(|(name, _)| *name == param.name) else {
            continue;
        };
        if used[idx] {
            continue;
        }
        used[idx] = true;
        claimed[t] = true;
        text.push_str(&format_value(param, entries[idx].1)?);
    }

    for (pos, (name, value)) in entries.iter().enumerate() {
        if used[pos] {
            continue;
        }
        let kind = types
            .get(pos)
            .filter(|_| !claimed[pos])
            .map(|p| p.kind.clone())
            .unwrap_or_default();
        let param = ParamType {
            name: name.to_string(),
            kind,
        };
        text.push_str(&format_value(&param, value)?);
    }
    Ok(text)
}

/// Formats one literal for standard input according to its list nesting depth
///
/// - depth 0: the literal itself
/// - depth 1: element count, then the elements on one line
/// - depth 2: an optional header (`rows cols` for matrices and boards, `rows`
///   for trees and graphs), then one line per inner list
pub fn format_value(param: &ParamType, value: &str) -> Result<String, ExtractError> {
    let value = value.trim();
    let depth = value
        .chars()
        .filter(|c| !c.is_whitespace())
        .take_while(|c| *c == '[')
        .count();

    match depth {
        0 => Ok(format!("{value}\n")),
        1 => {
            let elements = list_elements(param, value)?;
            if let Some(nested) = elements.iter().find(|e| e.starts_with('[')) {
                return Err(unsupported(param, format!("mixed nesting at `{nested}`")));
            }
            Ok(format!("{}\n{}\n", elements.len(), elements.join(" ")))
        }
        2 => {
            let mut rows = Vec::new();
            for row in list_elements(param, value)? {
                if !row.starts_with('[') {
                    return Err(unsupported(param, format!("mixed nesting at `{row}`")));
                }
                let elements = list_elements(param, &row)?;
                if let Some(nested) = elements.iter().find(|e| e.starts_with('[')) {
                    return Err(unsupported(param, format!("mixed nesting at `{nested}`")));
                }
                rows.push(elements);
            }

            let hint = format!("{} {}", param.name, param.kind).to_lowercase();
            let mut text = String::new();
            if hint.contains("matrix") || hint.contains("board") {
                let cols = rows.first().map_or(0, |r| r.len());
                text.push_str(&format!("{} {}\n", rows.len(), cols));
            } else if hint.contains("tree") || hint.contains("graph") {
                text.push_str(&format!("{}\n", rows.len()));
            }
            for row in rows {
                text.push_str(&row.join(" "));
                text.push('\n');
            }
            Ok(text)
        }
        _ => Err(unsupported(param, format!("nesting depth {depth}"))),
    }
}

fn unsupported(param: &ParamType, reason: String) -> ExtractError {
    ExtractError::UnsupportedInputShape {
        param: param.name.clone(),
        reason,
    }
}

/// Top-level elements of a bracketed list literal
///
/// Commas inside nested brackets or string quotes do not split.
fn list_elements(param: &ParamType, literal: &str) -> Result<Vec<String>, ExtractError> {
    let literal = literal.trim();
    let inner = literal
        .strip_prefix('[')
        .and_then(|s| s.strip_suffix(']'))
        .ok_or_else(|| unsupported(param, format!("unbalanced brackets in `{literal}`")))?;

    let mut elements = Vec::new();
    let mut current = String::new();
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escaped = false;

    for c in inner.chars() {
        if in_string {
            current.push(c);
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => {
                in_string = true;
                current.push(c);
            }
            '[' => {
                depth += 1;
                current.push(c);
            }
            ']' => {
                depth -= 1;
                if depth < 0 {
                    return Err(unsupported(
                        param,
                        format!("unbalanced brackets in `{literal}`"),
                    ));
                }
                current.push(c);
            }
            ',' if depth == 0 => {
                elements.push(current.trim().to_string());
                current.clear();
            }
            _ => current.push(c),
        }
    }
    if depth != 0 || in_string {
        return Err(unsupported(
            param,
            format!("unbalanced brackets in `{literal}`"),
        ));
    }

    let last = current.trim();
    if !last.is_empty() || !elements.is_empty() {
        elements.push(last.to_string());
    }
    Ok(elements)
}
