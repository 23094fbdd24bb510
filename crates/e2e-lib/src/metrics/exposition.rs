//! Parser for the Prometheus text exposition format
//!
//! Only the parts needed to read label sets are supported: comments and
//! blank lines are skipped, sample lines are `name{labels} value [timestamp]`.

use std::collections::BTreeMap;
use thiserror::Error;

/// One sample line
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub name: String,
    pub labels: BTreeMap<String, String>,
    pub value: f64,
}

impl Sample {
    pub fn label(&self, name: &str) -> Option<&str> {
        self.labels.get(name).map(String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("line does not start with a metric name")]
    MissingName,
    #[error("expected {expected:?}, found {found:?}")]
    Expected { expected: char, found: Option<char> },
    #[error("label value is not terminated")]
    UnterminatedLabelValue,
    #[error("unknown escape sequence \\{0}")]
    InvalidEscape(char),
    #[error("sample has no value")]
    MissingValue,
    #[error("invalid sample value {0:?}")]
    InvalidValue(String),
}

/// Parse a whole exposition, skipping lines that are not valid samples
pub fn parse(text: &str) -> Vec<Sample> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| parse_line(line).ok())
        .collect()
}

/// Parse a single sample line
pub fn parse_line(line: &str) -> Result<Sample, ParseError> {
    let mut cursor = Cursor { rest: line.trim() };

    let name = cursor.metric_name()?.to_string();
    cursor.skip_ws();

    let labels = if cursor.peek() == Some('{') {
        cursor.bump();
        cursor.labels()?
    } else {
        BTreeMap::new()
    };
    cursor.skip_ws();

    let raw = cursor.take_while(|c| !c.is_whitespace());
    if raw.is_empty() {
        return Err(ParseError::MissingValue);
    }
    let value = parse_value(raw)?;

    Ok(Sample {
        name,
        labels,
        value,
    })
}

fn parse_value(raw: &str) -> Result<f64, ParseError> {
    match raw {
        "+Inf" | "Inf" => Ok(f64::INFINITY),
        "-Inf" => Ok(f64::NEG_INFINITY),
        "NaN" => Ok(f64::NAN),
        _ => raw
            .parse()
            .map_err(|_| ParseError::InvalidValue(raw.to_string())),
    }
}

struct Cursor<'a> {
    rest: &'a str,
}

impl<'a> Cursor<'a> {
    fn peek(&self) -> Option<char> {
        self.rest.chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.rest = &self.rest[c.len_utf8()..];
        Some(c)
    }

    fn expect(&mut self, expected: char) -> Result<(), ParseError> {
        match self.bump() {
            Some(c) if c == expected => Ok(()),
            found => Err(ParseError::Expected { expected, found }),
        }
    }

    fn skip_ws(&mut self) {
        self.rest = self.rest.trim_start_matches([' ', '\t']);
    }

    fn take_while(&mut self, keep: impl Fn(char) -> bool) -> &'a str {
        let end = self.rest.find(|c| !keep(c)).unwrap_or(self.rest.len());
        let (head, tail) = self.rest.split_at(end);
        self.rest = tail;
        head
    }

    fn metric_name(&mut self) -> Result<&'a str, ParseError> {
        match self.peek() {
            Some(c) if c.is_ascii_alphabetic() || c == '_' || c == ':' => {}
            _ => return Err(ParseError::MissingName),
        }
        Ok(self.take_while(|c| c.is_ascii_alphanumeric() || c == '_' || c == ':'))
    }

    /// Label set after the opening brace, up to and including the closing one
    fn labels(&mut self) -> Result<BTreeMap<String, String>, ParseError> {
        let mut labels = BTreeMap::new();
        loop {
            self.skip_ws();
            if self.peek() == Some('}') {
                self.bump();
                return Ok(labels);
            }

            let name = self.take_while(|c| c.is_ascii_alphanumeric() || c == '_');
            if name.is_empty() {
                return Err(ParseError::Expected {
                    expected: '}',
                    found: self.peek(),
                });
            }
            self.skip_ws();
            self.expect('=')?;
            self.skip_ws();
            self.expect('"')?;
            let value = self.label_value()?;
            labels.insert(name.to_string(), value);

            self.skip_ws();
            match self.bump() {
                Some(',') => continue,
                Some('}') => return Ok(labels),
                found => {
                    return Err(ParseError::Expected {
                        expected: '}',
                        found,
                    })
                }
            }
        }
    }

    fn label_value(&mut self) -> Result<String, ParseError> {
        let mut value = String::new();
        loop {
            match self.bump() {
                None => return Err(ParseError::UnterminatedLabelValue),
                Some('"') => return Ok(value),
                Some('\\') => match self.bump() {
                    Some('\\') => value.push('\\'),
                    Some('"') => value.push('"'),
                    Some('n') => value.push('\n'),
                    Some(other) => return Err(ParseError::InvalidEscape(other)),
                    None => return Err(ParseError::UnterminatedLabelValue),
                },
                Some(c) => value.push(c),
            }
        }
    }
}
