use super::*;
use std::fmt;
use std::str::FromStr;

/// `prefix:name` at the start of a segment.
static SEGMENT_NAME: Lazy<Regex> =
    Lazy::new(|| match Regex::new(r"^(?:([A-Za-z_][\w.-]*):)?([A-Za-z_][\w.-]*)") {
        Ok(re) => re,
        Err(err) => panic!("invalid SEGMENT_NAME regex: {err}"),
    });

/// One `[key='value']` or anonymous `['value']` predicate.
static SEGMENT_KEY: Lazy<Regex> = Lazy::new(|| {
    match Regex::new(r#"^\[\s*(?:([A-Za-z_][\w.:-]*)\s*=\s*)?(?:'([^']*)'|"([^"]*)")\s*\]"#) {
        Ok(re) => re,
        Err(err) => panic!("invalid SEGMENT_KEY regex: {err}"),
    }
});

/// One step of a [`Path`]: an optionally module-qualified node name plus the
/// keys selecting a list entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Segment {
    pub prefix: Option<String>,
    pub name: String,
    /// `(key name, value)`; the name is `None` for anonymous keys.
    pub keys: Vec<(Option<String>, String)>,
}

impl Segment {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            prefix: None,
            name: name.into(),
            keys: Vec::new(),
        }
    }

    pub fn qualified(prefix: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            prefix: Some(prefix.into()),
            ..Self::new(name)
        }
    }

    /// Parses a JSON member name such as `openconfig-interfaces:interfaces`.
    pub fn from_member(member: &str) -> Self {
        match member.split_once(':') {
            Some((prefix, name)) => Self::qualified(prefix, name),
            None => Self::new(member),
        }
    }

    pub fn with_key(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.keys.push((Some(key.into()), value.into()));
        self
    }

    pub fn is_keyed(&self) -> bool {
        !self.keys.is_empty()
    }

    /// Value of the named key.
    pub fn key(&self, key: &str) -> Option<&str> {
        self.keys
            .iter()
            .find(|(name, _)| name.as_deref() == Some(key))
            .map(|(_, value)| value.as_str())
    }

    fn parse(text: &str, path: &str) -> Result<Self, DatastoreError> {
        let invalid = |reason: &str| DatastoreError::InvalidPath {
            path: path.to_string(),
            reason: format!("{reason} in segment '{text}'"),
        };
        let captures = SEGMENT_NAME
            .captures(text)
            .ok_or_else(|| invalid("missing node name"))?;
        let mut segment = Segment {
            prefix: captures.get(1).map(|m| m.as_str().to_string()),
            name: captures[2].to_string(),
            keys: Vec::new(),
        };

        let mut rest = &text[captures[0].len()..];
        while !rest.is_empty() {
            let key = SEGMENT_KEY
                .captures(rest)
                .ok_or_else(|| invalid("malformed key predicate"))?;
            let value = key
                .get(2)
                .or_else(|| key.get(3))
                .map_or("", |m| m.as_str());
            segment
                .keys
                .push((key.get(1).map(|m| m.as_str().to_string()), value.to_string()));
            rest = &rest[key[0].len()..];
        }
        Ok(segment)
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(prefix) = &self.prefix {
            write!(f, "{prefix}:")?;
        }
        write!(f, "{}", self.name)?;
        for (key, value) in &self.keys {
            match key {
                Some(key) => write!(f, "[{key}='{value}']")?,
                None => write!(f, "['{value}']")?,
            }
        }
        Ok(())
    }
}

/// Location in a structured tree, e.g.
/// `/openconfig-interfaces:interfaces/interface[name='0/2']/state`.
///
/// A path with keys is *keyed* and names one instance; without keys it is a
/// *schema path* naming every instance.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Path {
    segments: Vec<Segment>,
}

impl Path {
    pub fn root() -> Self {
        Self::default()
    }

    pub fn parse(text: &str) -> Result<Self, DatastoreError> {
        let trimmed = text.trim();
        let Some(body) = trimmed.strip_prefix('/') else {
            return Err(DatastoreError::InvalidPath {
                path: text.to_string(),
                reason: "must start with '/'".to_string(),
            });
        };
        let mut segments = Vec::new();
        for part in split_segments(body, text)? {
            segments.push(Segment::parse(part, text)?);
        }
        Ok(Self { segments })
    }

    pub fn from_segments(segments: Vec<Segment>) -> Self {
        Self { segments }
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn last(&self) -> Option<&Segment> {
        self.segments.last()
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn depth(&self) -> usize {
        self.segments.len()
    }

    pub fn parent(&self) -> Option<Path> {
        (!self.is_root()).then(|| Self {
            segments: self.segments[..self.segments.len() - 1].to_vec(),
        })
    }

    pub fn child(&self, segment: Segment) -> Path {
        let mut segments = self.segments.clone();
        segments.push(segment);
        Self { segments }
    }

    /// Schema form: the same nodes without any keys.
    pub fn unkeyed(&self) -> Path {
        Self {
            segments: self
                .segments
                .iter()
                .map(|segment| Segment {
                    keys: Vec::new(),
                    ..segment.clone()
                })
                .collect(),
        }
    }

    /// Drops module prefixes from every segment.
    pub fn strip_prefixes(&self) -> Path {
        Self {
            segments: self
                .segments
                .iter()
                .map(|segment| Segment {
                    prefix: None,
                    ..segment.clone()
                })
                .collect(),
        }
    }

    /// Module of the node: the closest prefix on or above it.
    pub fn module(&self) -> Option<&str> {
        self.segments
            .iter()
            .rev()
            .find_map(|segment| segment.prefix.as_deref())
    }

    /// `module:name` of the last node, as used for the wrapping member.
    pub fn qualified_name(&self) -> Option<String> {
        let last = self.last()?;
        Some(match self.module() {
            Some(module) => format!("{module}:{}", last.name),
            None => last.name.clone(),
        })
    }

    /// Instance prefix test, comparing keys and prefixes as written.
    pub fn starts_with(&self, prefix: &Path) -> bool {
        self.segments.starts_with(&prefix.segments)
    }

    /// True when both paths name the same schema node, ignoring prefixes and
    /// keys.
    pub fn schema_eq(&self, other: &Path) -> bool {
        self.depth() == other.depth() && self.schema_starts_with(other)
    }

    /// True when `ancestor` is this node or one of its schema ancestors,
    /// ignoring prefixes and keys.
    pub fn schema_starts_with(&self, ancestor: &Path) -> bool {
        ancestor.depth() <= self.depth()
            && ancestor
                .segments
                .iter()
                .zip(&self.segments)
                .all(|(a, b)| a.name == b.name)
    }

    /// Value of `key` on the first segment called `segment`.
    pub fn key(&self, segment: &str, key: &str) -> Option<&str> {
        self.segments
            .iter()
            .find(|s| s.name == segment)
            .and_then(|s| s.key(key))
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.segments.is_empty() {
            return write!(f, "/");
        }
        for segment in &self.segments {
            write!(f, "/{segment}")?;
        }
        Ok(())
    }
}

impl FromStr for Path {
    type Err = DatastoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Path::parse(s)
    }
}

/// Splits on `/` outside of key predicates, so `[name='0/1']` stays whole.
fn split_segments<'a>(body: &'a str, path: &str) -> Result<Vec<&'a str>, DatastoreError> {
    let mut parts = Vec::new();
    let mut quote: Option<char> = None;
    let mut in_predicate = false;
    let mut start = 0;
    for (idx, ch) in body.char_indices() {
        match (quote, ch) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '\'' | '"') if in_predicate => quote = Some(ch),
            (None, '[') => in_predicate = true,
            (None, ']') => in_predicate = false,
            (None, '/') if !in_predicate => {
                parts.push(&body[start..idx]);
                start = idx + 1;
            }
            _ => {}
        }
    }
    if quote.is_some() || in_predicate {
        return Err(DatastoreError::InvalidPath {
            path: path.to_string(),
            reason: "unterminated key predicate".to_string(),
        });
    }
    parts.push(&body[start..]);
    if parts.len() == 1 && parts[0].is_empty() {
        return Ok(Vec::new());
    }
    if parts.iter().any(|part| part.is_empty()) {
        return Err(DatastoreError::InvalidPath {
            path: path.to_string(),
            reason: "empty segment".to_string(),
        });
    }
    Ok(parts)
}
