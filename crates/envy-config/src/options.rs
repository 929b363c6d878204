//! Canonical option serialization.
//!
//! Options serialize to `{k=v,k=v,...}` with keys sorted lexicographically,
//! strings quoted (escaping `"` and `\`), numbers and booleans bare, and
//! nested tables recursing with the same rules. The serialization is the
//! input to canonical-key hashing, so two option tables that differ only in
//! insertion order must serialize identically.

use crate::{ConfigError, Result};
use std::collections::BTreeMap;
use std::fmt::Write as _;

/// An option value. Tables are ordered maps so serialization is canonical
/// by construction.
#[derive(Debug, Clone, PartialEq)]
pub enum OptValue {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Table(BTreeMap<String, OptValue>),
}

/// Serialize a (possibly empty) option table to its canonical form.
pub fn serialize_options(options: &BTreeMap<String, OptValue>) -> Result<String> {
    let mut out = String::new();
    write_table(&mut out, options)?;
    Ok(out)
}

fn write_table(out: &mut String, table: &BTreeMap<String, OptValue>) -> Result<()> {
    out.push('{');
    let mut first = true;
    for (key, value) in table {
        if key.is_empty() || key.chars().any(|c| matches!(c, '=' | ',' | '{' | '}' | '"')) {
            return Err(ConfigError::BadOptions(format!("invalid option key {key:?}")));
        }
        if !first {
            out.push(',');
        }
        first = false;
        out.push_str(key);
        out.push('=');
        write_value(out, value)?;
    }
    out.push('}');
    Ok(())
}

fn write_value(out: &mut String, value: &OptValue) -> Result<()> {
    match value {
        OptValue::Str(s) => {
            out.push('"');
            for c in s.chars() {
                match c {
                    '"' => out.push_str("\\\""),
                    '\\' => out.push_str("\\\\"),
                    other => out.push(other),
                }
            }
            out.push('"');
        }
        OptValue::Int(i) => {
            let _ = write!(out, "{i}");
        }
        OptValue::Float(f) => {
            // Keep a decimal point so floats stay floats on re-parse.
            if f.fract() == 0.0 && f.is_finite() {
                let _ = write!(out, "{f:.1}");
            } else {
                let _ = write!(out, "{f}");
            }
        }
        OptValue::Bool(b) => {
            let _ = write!(out, "{b}");
        }
        OptValue::Table(t) => write_table(out, t)?,
    }
    Ok(())
}

/// Parse a canonical option string back into a table. Inverse of
/// [`serialize_options`] for any valid table.
pub fn parse_options(input: &str) -> Result<BTreeMap<String, OptValue>> {
    let mut parser = Parser {
        input: input.as_bytes(),
        pos: 0,
    };
    let table = parser.table()?;
    if parser.pos != parser.input.len() {
        return Err(ConfigError::BadOptions(format!(
            "trailing characters after options table: {input:?}"
        )));
    }
    Ok(table)
}

struct Parser<'a> {
    input: &'a [u8],
    pos: usize,
}

impl Parser<'_> {
    fn peek(&self) -> Option<u8> {
        self.input.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<u8> {
        let c = self.peek()?;
        self.pos += 1;
        Some(c)
    }

    fn expect(&mut self, c: u8) -> Result<()> {
        match self.bump() {
            Some(got) if got == c => Ok(()),
            got => Err(ConfigError::BadOptions(format!(
                "expected {:?} at byte {}, got {:?}",
                c as char,
                self.pos,
                got.map(|g| g as char)
            ))),
        }
    }

    fn table(&mut self) -> Result<BTreeMap<String, OptValue>> {
        self.expect(b'{')?;
        let mut table = BTreeMap::new();
        if self.peek() == Some(b'}') {
            self.bump();
            return Ok(table);
        }
        loop {
            let key = self.key()?;
            self.expect(b'=')?;
            let value = self.value()?;
            table.insert(key, value);
            match self.bump() {
                Some(b',') => continue,
                Some(b'}') => return Ok(table),
                got => {
                    return Err(ConfigError::BadOptions(format!(
                        "expected ',' or '}}', got {:?}",
                        got.map(|g| g as char)
                    )))
                }
            }
        }
    }

    fn key(&mut self) -> Result<String> {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if matches!(c, b'=' | b',' | b'{' | b'}' | b'"') {
                break;
            }
            self.pos += 1;
        }
        if self.pos == start {
            return Err(ConfigError::BadOptions("empty option key".to_string()));
        }
        Ok(String::from_utf8_lossy(&self.input[start..self.pos]).into_owned())
    }

    fn value(&mut self) -> Result<OptValue> {
        match self.peek() {
            Some(b'{') => Ok(OptValue::Table(self.table()?)),
            Some(b'"') => self.string(),
            Some(_) => self.scalar(),
            None => Err(ConfigError::BadOptions("unterminated options table".into())),
        }
    }

    fn string(&mut self) -> Result<OptValue> {
        self.expect(b'"')?;
        let mut bytes = Vec::new();
        loop {
            match self.bump() {
                Some(b'"') => {
                    return String::from_utf8(bytes)
                        .map(OptValue::Str)
                        .map_err(|_| ConfigError::BadOptions("non-utf8 string".into()))
                }
                Some(b'\\') => match self.bump() {
                    Some(b'"') => bytes.push(b'"'),
                    Some(b'\\') => bytes.push(b'\\'),
                    other => {
                        return Err(ConfigError::BadOptions(format!(
                            "invalid escape {:?}",
                            other.map(|c| c as char)
                        )))
                    }
                },
                Some(c) => bytes.push(c),
                None => return Err(ConfigError::BadOptions("unterminated string".into())),
            }
        }
    }

    fn scalar(&mut self) -> Result<OptValue> {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if matches!(c, b',' | b'}') {
                break;
            }
            self.pos += 1;
        }
        let raw = std::str::from_utf8(&self.input[start..self.pos])
            .map_err(|_| ConfigError::BadOptions("non-utf8 scalar".into()))?;
        match raw {
            "true" => Ok(OptValue::Bool(true)),
            "false" => Ok(OptValue::Bool(false)),
            _ => {
                if raw.contains('.') || raw.contains('e') || raw.contains('E') {
                    raw.parse::<f64>()
                        .map(OptValue::Float)
                        .map_err(|_| ConfigError::BadOptions(format!("invalid number {raw:?}")))
                } else {
                    raw.parse::<i64>()
                        .map(OptValue::Int)
                        .map_err(|_| ConfigError::BadOptions(format!("invalid number {raw:?}")))
                }
            }
        }
    }
}

/// Convert a TOML table into an option table.
pub fn options_from_toml(table: &toml::Table) -> Result<BTreeMap<String, OptValue>> {
    let mut out = BTreeMap::new();
    for (key, value) in table {
        out.insert(key.clone(), opt_from_toml(value)?);
    }
    Ok(out)
}

fn opt_from_toml(value: &toml::Value) -> Result<OptValue> {
    match value {
        toml::Value::String(s) => Ok(OptValue::Str(s.clone())),
        toml::Value::Integer(i) => Ok(OptValue::Int(*i)),
        toml::Value::Float(f) => Ok(OptValue::Float(*f)),
        toml::Value::Boolean(b) => Ok(OptValue::Bool(*b)),
        toml::Value::Table(t) => Ok(OptValue::Table(options_from_toml(t)?)),
        other => Err(ConfigError::BadOptions(format!(
            "unsupported option value type: {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(pairs: &[(&str, OptValue)]) -> BTreeMap<String, OptValue> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn empty_table_serializes_to_braces() {
        assert_eq!(serialize_options(&BTreeMap::new()).unwrap(), "{}");
    }

    #[test]
    fn keys_are_sorted() {
        let opts = table(&[
            ("zeta", OptValue::Int(1)),
            ("alpha", OptValue::Int(2)),
            ("mid", OptValue::Int(3)),
        ]);
        assert_eq!(serialize_options(&opts).unwrap(), "{alpha=2,mid=3,zeta=1}");
    }

    #[test]
    fn strings_are_quoted_and_escaped() {
        let opts = table(&[("s", OptValue::Str("a\"b\\c".into()))]);
        assert_eq!(serialize_options(&opts).unwrap(), r#"{s="a\"b\\c"}"#);
    }

    #[test]
    fn scalars_are_bare() {
        let opts = table(&[
            ("b", OptValue::Bool(true)),
            ("f", OptValue::Float(1.5)),
            ("i", OptValue::Int(-7)),
        ]);
        assert_eq!(serialize_options(&opts).unwrap(), "{b=true,f=1.5,i=-7}");
    }

    #[test]
    fn whole_floats_keep_their_point() {
        let opts = table(&[("f", OptValue::Float(2.0))]);
        assert_eq!(serialize_options(&opts).unwrap(), "{f=2.0}");
    }

    #[test]
    fn nested_tables_recurse() {
        let inner = table(&[("y", OptValue::Int(1)), ("x", OptValue::Int(2))]);
        let opts = table(&[("outer", OptValue::Table(inner))]);
        assert_eq!(serialize_options(&opts).unwrap(), "{outer={x=2,y=1}}");
    }

    #[test]
    fn round_trip() {
        let inner = table(&[
            ("flag", OptValue::Bool(false)),
            ("name", OptValue::Str("va\\l\"ue".into())),
        ]);
        let opts = table(&[
            ("count", OptValue::Int(42)),
            ("nested", OptValue::Table(inner)),
            ("ratio", OptValue::Float(0.25)),
            ("whole", OptValue::Float(3.0)),
        ]);

        let serialized = serialize_options(&opts).unwrap();
        let parsed = parse_options(&serialized).unwrap();
        assert_eq!(parsed, opts);
        assert_eq!(serialize_options(&parsed).unwrap(), serialized);
    }

    #[test]
    fn parse_empty() {
        assert_eq!(parse_options("{}").unwrap(), BTreeMap::new());
    }

    #[test]
    fn parse_rejects_trailing_garbage() {
        assert!(parse_options("{}x").is_err());
        assert!(parse_options("{a=1").is_err());
        assert!(parse_options("{=1}").is_err());
    }

    #[test]
    fn bad_key_rejected_at_serialize() {
        let opts = table(&[("a=b", OptValue::Int(1))]);
        assert!(serialize_options(&opts).is_err());
    }

    #[test]
    fn insertion_order_is_irrelevant() {
        let mut a = BTreeMap::new();
        a.insert("x".to_string(), OptValue::Int(1));
        a.insert("a".to_string(), OptValue::Int(2));

        let mut b = BTreeMap::new();
        b.insert("a".to_string(), OptValue::Int(2));
        b.insert("x".to_string(), OptValue::Int(1));

        assert_eq!(
            serialize_options(&a).unwrap(),
            serialize_options(&b).unwrap()
        );
    }
}
