//! Path expressions.
//!
//! A path expression addresses a node in the composition tree and, optionally,
//! navigates into the node's value:
//!
//! ```text
//! /workbench/menus          absolute
//! ./file  ../edit           relative to a current node
//! /workbench.title          member access on the node's value
//! ../@[key].items[0].name   '@' starts members with no further path
//! ```
//!
//! Path segments cannot contain `.`, `[` or `@`; the first of those characters
//! ends the path part of the expression. Whitespace around tokens is ignored.

use std::fmt;

use thiserror::Error;

/// Where a path starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathAnchor {
  /// No anchor, relative to the current node.
  None,
  /// `/`
  Root,
  /// `.`
  Current,
  /// `..`
  Parent,
}

/// The key inside an indexer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexKey {
  /// `[0]`
  Position(usize),
  /// `[key]`, `['key']` or `["key"]`
  Key(String),
}

impl fmt::Display for IndexKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      IndexKey::Position(index) => write!(f, "{}", index),
      IndexKey::Key(key) => write!(f, "{:?}", key),
    }
  }
}

/// One step of member navigation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Member {
  Field(String),
  Index(IndexKey),
}

impl fmt::Display for Member {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Member::Field(name) => write!(f, ".{}", name),
      Member::Index(key) => write!(f, "[{}]", key),
    }
  }
}

/// Errors from parsing a path expression.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PathError {
  #[error("path expression is empty")]
  Empty,

  #[error("invalid path expression '{expr}' at {offset}: {message}")]
  Malformed {
    expr: String,
    offset: usize,
    message: &'static str,
  },

  /// A segment that cannot identify a single node.
  #[error("ambiguous path segment '{segment}' in '{path}'")]
  AmbiguousSegment { path: String, segment: String },
}

/// A parsed path expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathExpr {
  pub anchor: PathAnchor,
  /// The node path, normalized (`/a/b`, `./a`, `..`, `a/b`, or empty).
  pub path: String,
  pub members: Vec<Member>,
}

impl PathExpr {
  /// Parse an expression.
  pub fn parse(expr: &str) -> Result<Self, PathError> {
    let chars: Vec<char> = expr.chars().collect();
    if chars.iter().all(|c| c.is_whitespace()) {
      return Err(PathError::Empty);
    }

    let mut parser = Parser {
      expr,
      chars: &chars,
      pos: 0,
    };
    let (anchor, path) = parser.path_part()?;
    let members = parser.members()?;

    Ok(Self {
      anchor,
      path,
      members,
    })
  }

  pub fn has_members(&self) -> bool {
    !self.members.is_empty()
  }
}

impl fmt::Display for PathExpr {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.path)?;
    let mut members = self.members.iter();
    if let Some(first) = members.next() {
      if self.path.is_empty() || self.path.ends_with('/') {
        f.write_str("@")?;
      } else if self.path == "." || self.path == ".." {
        f.write_str("/@")?;
      } else if let Member::Field(_) = first {
        f.write_str(".")?;
      }
      match first {
        Member::Field(name) => f.write_str(name)?,
        Member::Index(key) => write!(f, "[{}]", key)?,
      }
    }
    for member in members {
      write!(f, "{}", member)?;
    }
    Ok(())
  }
}

struct Parser<'a> {
  expr: &'a str,
  chars: &'a [char],
  pos: usize,
}

impl Parser<'_> {
  fn error(&self, message: &'static str) -> PathError {
    PathError::Malformed {
      expr: self.expr.to_string(),
      offset: self.pos,
      message,
    }
  }

  fn peek(&self) -> Option<char> {
    self.chars.get(self.pos).copied()
  }

  fn skip_whitespace(&mut self) {
    while self.peek().is_some_and(char::is_whitespace) {
      self.pos += 1;
    }
  }

  /// Reads the anchor and the `/`-separated segments up to the first member.
  fn path_part(&mut self) -> Result<(PathAnchor, String), PathError> {
    let mut raw = String::new();
    while let Some(c) = self.peek() {
      if c == '@' || c == '[' {
        break;
      }
      if c == '.' {
        // A leading '.' or '..' segment is an anchor, not a member.
        let segment_start = raw.trim_end().is_empty() || raw.trim_end().ends_with('/');
        let dots = self.chars[self.pos..].iter().take_while(|&&c| c == '.').count();
        let after = self.chars.get(self.pos + dots).copied();
        let ends_segment = after.is_none_or(|c| c == '/' || c == '@' || c.is_whitespace());
        if segment_start && dots <= 2 && ends_segment {
          raw.extend(std::iter::repeat_n('.', dots));
          self.pos += dots;
          continue;
        }
        break;
      }
      raw.push(c);
      self.pos += 1;
    }

    let segments: Vec<&str> = raw.split('/').map(str::trim).collect();
    let anchor = match segments.first().copied() {
      Some("") if segments.len() > 1 => PathAnchor::Root,
      Some(".") => PathAnchor::Current,
      Some("..") => PathAnchor::Parent,
      _ => PathAnchor::None,
    };

    let body: Vec<&str> = match anchor {
      PathAnchor::None => segments.clone(),
      _ => segments[1..].to_vec(),
    };
    let trailing_slash = body.last().is_some_and(|s| s.is_empty());
    let body: Vec<&str> = if trailing_slash {
      body[..body.len() - 1].to_vec()
    } else {
      body
    };
    if body.iter().any(|s| s.is_empty()) {
      return Err(self.error("empty path segment"));
    }
    for segment in &body {
      if *segment == "." || *segment == ".." {
        continue;
      }
      if segment.contains(['*', '?']) {
        return Err(PathError::AmbiguousSegment {
          path: raw.trim().to_string(),
          segment: segment.to_string(),
        });
      }
    }

    let joined = body.join("/");
    let path = match anchor {
      PathAnchor::None => joined,
      PathAnchor::Root => format!("/{}", joined),
      PathAnchor::Current if joined.is_empty() => ".".to_string(),
      PathAnchor::Current => format!("./{}", joined),
      PathAnchor::Parent if joined.is_empty() => "..".to_string(),
      PathAnchor::Parent => format!("../{}", joined),
    };
    Ok((anchor, path))
  }

  fn members(&mut self) -> Result<Vec<Member>, PathError> {
    let mut members = Vec::new();
    self.skip_whitespace();

    match self.peek() {
      None => return Ok(members),
      Some('@') => {
        self.pos += 1;
        self.skip_whitespace();
        if self.peek() == Some('[') {
          members.push(self.indexer()?);
        } else {
          members.push(Member::Field(self.identifier()?));
        }
      }
      Some('.') => {
        self.pos += 1;
        members.push(Member::Field(self.identifier()?));
      }
      Some('[') => members.push(self.indexer()?),
      Some(_) => return Err(self.error("unexpected character")),
    }

    loop {
      self.skip_whitespace();
      match self.peek() {
        None => break,
        Some('.') => {
          self.pos += 1;
          members.push(Member::Field(self.identifier()?));
        }
        Some('[') => members.push(self.indexer()?),
        Some(_) => return Err(self.error("expected '.' or '['")),
      }
    }
    Ok(members)
  }

  fn identifier(&mut self) -> Result<String, PathError> {
    self.skip_whitespace();
    let start = self.pos;
    while let Some(c) = self.peek() {
      if c.is_alphanumeric() || c == '_' || c == '-' {
        self.pos += 1;
      } else {
        break;
      }
    }
    if start == self.pos {
      return Err(self.error("expected member name"));
    }
    Ok(self.chars[start..self.pos].iter().collect())
  }

  fn indexer(&mut self) -> Result<Member, PathError> {
    // consume '['
    self.pos += 1;
    self.skip_whitespace();

    let key = match self.peek() {
      Some(quote @ ('\'' | '"')) => {
        self.pos += 1;
        let mut text = String::new();
        loop {
          match self.peek() {
            None => return Err(self.error("unterminated quoted key")),
            Some('\\') => {
              self.pos += 1;
              match self.peek() {
                Some(c) => text.push(c),
                None => return Err(self.error("dangling escape")),
              }
              self.pos += 1;
            }
            Some(c) if c == quote => {
              self.pos += 1;
              break;
            }
            Some(c) => {
              text.push(c);
              self.pos += 1;
            }
          }
        }
        IndexKey::Key(text)
      }
      _ => {
        let start = self.pos;
        while self.peek().is_some_and(|c| c != ']') {
          self.pos += 1;
        }
        let text: String = self.chars[start..self.pos].iter().collect();
        let text = text.trim();
        if text.is_empty() {
          return Err(self.error("empty indexer"));
        }
        match text.parse::<usize>() {
          Ok(index) => IndexKey::Position(index),
          Err(_) => IndexKey::Key(text.to_string()),
        }
      }
    };

    self.skip_whitespace();
    if self.peek() != Some(']') {
      return Err(self.error("expected ']'"));
    }
    self.pos += 1;
    Ok(Member::Index(key))
  }
}
