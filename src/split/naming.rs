use std::fmt;
use std::str::FromStr;

use crate::error::{Result, SplitError};

/// Extension given to every output part.
pub const OUTPUT_EXTENSION: &str = "cbz";

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    /// `{n}`: 1-based part number
    Index,
    /// `{total}`: number of parts written
    Total,
    /// `{name}`: source file stem
    Name,
}

/// Output file name pattern.
///
/// Placeholders are `{n}`, `{total}` and `{name}`; `{{` and `}}` are
/// literal braces. A template without `{n}` gets `-part{n}` appended, so
/// every part has a distinct name. `.cbz` is appended unless the result
/// already ends in `.cbz` or `.zip`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamingTemplate {
    raw: String,
    segments: Vec<Segment>,
}

impl NamingTemplate {
    pub fn parse(template: &str) -> Result<Self> {
        let invalid = |reason| SplitError::InvalidTemplate {
            template: template.to_string(),
            reason,
        };

        if template.trim().is_empty() {
            return Err(invalid("template is empty"));
        }

        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut chars = template.chars().peekable();

        while let Some(c) = chars.next() {
            match c {
                '{' if chars.peek() == Some(&'{') => {
                    chars.next();
                    literal.push('{');
                }
                '}' if chars.peek() == Some(&'}') => {
                    chars.next();
                    literal.push('}');
                }
                '{' => {
                    let mut key = String::new();
                    loop {
                        match chars.next() {
                            Some('}') => break,
                            Some(k) => key.push(k),
                            None => return Err(invalid("unclosed `{`")),
                        }
                    }
                    let segment = match key.as_str() {
                        "n" => Segment::Index,
                        "total" => Segment::Total,
                        "name" => Segment::Name,
                        _ => return Err(invalid("unknown placeholder (use {n}, {total} or {name})")),
                    };
                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    segments.push(segment);
                }
                '}' => return Err(invalid("unmatched `}`")),
                '/' | '\\' => return Err(invalid("template must not contain path separators")),
                _ => literal.push(c),
            }
        }
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        if !segments.contains(&Segment::Index) {
            segments.push(Segment::Literal("-part".to_string()));
            segments.push(Segment::Index);
        }

        Ok(Self {
            raw: template.to_string(),
            segments,
        })
    }

    /// Default template: `<stem>-part{n}`.
    pub fn for_stem(stem: &str) -> Self {
        let stem = stem.replace(['/', '\\'], "_");
        Self {
            raw: format!("{}-part{{n}}", stem.replace('{', "{{").replace('}', "}}")),
            segments: vec![
                Segment::Literal(stem),
                Segment::Literal("-part".to_string()),
                Segment::Index,
            ],
        }
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// File name for part `index` (1-based) of `total`.
    pub fn render(&self, index: usize, total: usize, stem: &str) -> Result<String> {
        let mut name = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(s) => name.push_str(s),
                Segment::Index => name.push_str(&index.to_string()),
                Segment::Total => name.push_str(&total.to_string()),
                Segment::Name => name.push_str(stem),
            }
        }

        if name.contains(['/', '\\']) || matches!(name.trim(), "" | "." | "..") {
            return Err(SplitError::InvalidTemplate {
                template: self.raw.clone(),
                reason: "does not produce a usable file name",
            });
        }

        let lower = name.to_ascii_lowercase();
        if !lower.ends_with(".cbz") && !lower.ends_with(".zip") {
            name.push('.');
            name.push_str(OUTPUT_EXTENSION);
        }
        Ok(name)
    }
}

impl FromStr for NamingTemplate {
    type Err = SplitError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for NamingTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}
