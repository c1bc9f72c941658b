//! Command template parsing and rendering.
//!
//! Toolchain command templates are argv vectors whose elements may contain
//! placeholders that are only filled in when an action runs.
//!
//! # Placeholder Formats
//!
//! List placeholders (one path per element):
//! - `$${srcs}` - the target's own sources
//! - `$${deps}` - upstream artifacts, in link order
//! - `$${libs}` - the toolchain's auxiliary libraries
//! - `$${inputs}` - all of the above, in declared input order
//! - `$${outs}` - every declared output
//!
//! Scalar placeholders:
//! - `$${out}` - the first declared output
//! - `$${out_dir}` - directory of the first declared output
//! - `$${name}`, `$${lang}`, `$${opt}`, `$${edition}`, `$${link}`, `$${triple}`
//!
//! A list placeholder that makes up a whole argument splices into one argument
//! per element; inside a larger argument the elements are joined with spaces.
//!
//! # Shell Variables
//!
//! Single `$` characters pass through unchanged, so `$HOME` in a `sh -c`
//! script works without escaping. Use `$$$` before `{` for a literal `$${`.

use std::collections::BTreeMap;

use thiserror::Error;

/// A list-valued placeholder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListVar {
  Srcs,
  Deps,
  Libs,
  Inputs,
  Outs,
}

/// A parsed placeholder reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Placeholder {
  List(ListVar),
  Out,
  OutDir,
  /// A scalar looked up in the action's variables (`name`, `opt`, ...).
  Var(String),
}

/// A segment of parsed text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
  Literal(String),
  Placeholder(Placeholder),
}

/// Scalar variables every action may reference.
pub const SCALAR_VARS: &[&str] = &["name", "lang", "opt", "edition", "link", "triple"];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
  #[error("unclosed placeholder at position {0}")]
  Unclosed(usize),

  #[error("unknown placeholder: {0}")]
  Unknown(String),

  #[error("placeholder '{0}' has no value for this action")]
  Unresolved(String),
}

/// Parse one template argument into segments.
pub fn parse(input: &str) -> Result<Vec<Segment>, TemplateError> {
  let mut segments = Vec::new();
  let mut literal = String::new();
  let mut chars = input.char_indices().peekable();

  while let Some((pos, ch)) = chars.next() {
    if ch != '$' {
      literal.push(ch);
      continue;
    }

    match chars.peek() {
      Some((_, '$')) => {
        chars.next();

        match chars.peek() {
          Some((_, '$')) => {
            chars.next();
            if let Some((_, '{')) = chars.peek() {
              // Escaped: $$${ -> $${
              literal.push_str("$${");
              chars.next();
            } else {
              literal.push_str("$$$");
            }
          }
          Some((_, '{')) => {
            chars.next();

            if !literal.is_empty() {
              segments.push(Segment::Literal(std::mem::take(&mut literal)));
            }

            let mut content = String::new();
            let mut found_close = false;
            for (_, c) in chars.by_ref() {
              if c == '}' {
                found_close = true;
                break;
              }
              content.push(c);
            }

            if !found_close {
              return Err(TemplateError::Unclosed(pos));
            }

            segments.push(Segment::Placeholder(parse_placeholder(content.trim())?));
          }
          _ => literal.push_str("$$"),
        }
      }
      _ => literal.push('$'),
    }
  }

  if !literal.is_empty() {
    segments.push(Segment::Literal(literal));
  }

  Ok(segments)
}

fn parse_placeholder(content: &str) -> Result<Placeholder, TemplateError> {
  let placeholder = match content {
    "srcs" => Placeholder::List(ListVar::Srcs),
    "deps" => Placeholder::List(ListVar::Deps),
    "libs" => Placeholder::List(ListVar::Libs),
    "inputs" => Placeholder::List(ListVar::Inputs),
    "outs" => Placeholder::List(ListVar::Outs),
    "out" => Placeholder::Out,
    "out_dir" => Placeholder::OutDir,
    var if SCALAR_VARS.contains(&var) => Placeholder::Var(var.to_string()),
    other => return Err(TemplateError::Unknown(other.to_string())),
  };
  Ok(placeholder)
}

/// Check that every argument of a template parses.
pub fn validate(args: &[String]) -> Result<(), TemplateError> {
  for arg in args {
    parse(arg)?;
  }
  Ok(())
}

/// Concrete values for one action.
#[derive(Debug, Default)]
pub struct RenderContext<'a> {
  pub srcs: Vec<String>,
  pub deps: Vec<String>,
  pub libs: Vec<String>,
  pub inputs: Vec<String>,
  pub outs: Vec<String>,
  pub out_dir: String,
  pub vars: Option<&'a BTreeMap<String, String>>,
}

impl RenderContext<'_> {
  fn list(&self, var: ListVar) -> &[String] {
    match var {
      ListVar::Srcs => &self.srcs,
      ListVar::Deps => &self.deps,
      ListVar::Libs => &self.libs,
      ListVar::Inputs => &self.inputs,
      ListVar::Outs => &self.outs,
    }
  }

  fn scalar(&self, placeholder: &Placeholder) -> Result<String, TemplateError> {
    match placeholder {
      Placeholder::List(var) => Ok(self.list(*var).join(" ")),
      Placeholder::Out => self
        .outs
        .first()
        .cloned()
        .ok_or_else(|| TemplateError::Unresolved("out".to_string())),
      Placeholder::OutDir => Ok(self.out_dir.clone()),
      Placeholder::Var(name) => Ok(
        self
          .vars
          .and_then(|vars| vars.get(name))
          .cloned()
          .unwrap_or_default(),
      ),
    }
  }
}

/// Render a template into concrete arguments.
pub fn render(args: &[String], ctx: &RenderContext<'_>) -> Result<Vec<String>, TemplateError> {
  let mut rendered = Vec::with_capacity(args.len());

  for arg in args {
    let segments = parse(arg)?;

    if let [Segment::Placeholder(Placeholder::List(var))] = segments.as_slice() {
      rendered.extend(ctx.list(*var).iter().cloned());
      continue;
    }

    let mut out = String::new();
    for segment in &segments {
      match segment {
        Segment::Literal(s) => out.push_str(s),
        Segment::Placeholder(p) => out.push_str(&ctx.scalar(p)?),
      }
    }
    rendered.push(out);
  }

  Ok(rendered)
}
