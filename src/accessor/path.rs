//! Path expression parser
//!
//! ```text
//! path     := step ('/' step)*
//! step     := modifier* [type ':'] operand
//! modifier := '?' | '!'
//! operand  := text | '(' text ')' | name '(' arg (',' arg)* ')'
//! ```
//!
//! `?` makes a failing step yield null. `!` treats the operand as a sub-path
//! resolved against the evaluation root before use. Parentheses group an
//! operand so it may contain `/`. Parsed paths are immutable and can be cached.

use std::fmt;
use std::str::FromStr;

use serde_json::Value;

use crate::core::{AccessorError, AccessorResult};

pub const DELIMITER: char = '/';

/// Kind of navigation a step performs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StepKind {
    /// Named attribute (`member`, `property`, `field`)
    Member,
    /// Position in an ordered container (`index`, `array`, `list`)
    Index,
    /// Entry of an associative container (`map`, `dict`, `object`, `json`)
    Map,
    /// Component attached to an entity
    Component,
    /// Child (or `..` parent) in the spatial hierarchy
    Transform,
    /// Asset resolved through the resource loader
    Resource,
    /// Read-only operation on the current value
    Method,
    /// Constant value
    Literal,
}

impl StepKind {
    pub fn from_name(name: &str) -> Option<Self> {
        let kind = match name.to_ascii_lowercase().as_str() {
            "member" | "property" | "field" => StepKind::Member,
            "index" | "array" | "list" => StepKind::Index,
            "map" | "dict" | "object" | "json" => StepKind::Map,
            "component" => StepKind::Component,
            "transform" => StepKind::Transform,
            "resource" => StepKind::Resource,
            "method" => StepKind::Method,
            "literal" => StepKind::Literal,
            _ => return None,
        };
        Some(kind)
    }

    pub fn name(&self) -> &'static str {
        match self {
            StepKind::Member => "member",
            StepKind::Index => "index",
            StepKind::Map => "map",
            StepKind::Component => "component",
            StepKind::Transform => "transform",
            StepKind::Resource => "resource",
            StepKind::Method => "method",
            StepKind::Literal => "literal",
        }
    }
}

/// Method argument
#[derive(Debug, Clone, PartialEq)]
pub enum Argument {
    Value(Value),
    Expr(AccessorPath),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Text(String),
    Value(Value),
    /// Sub-path resolved against the root (`!` modifier)
    Expr(AccessorPath),
    Call { name: String, args: Vec<Argument> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    pub kind: StepKind,
    pub operand: Operand,
    pub conditional: bool,
    pub evaluated: bool,
    text: String,
}

impl Step {
    /// Source text of this step
    pub fn text(&self) -> &str {
        &self.text
    }
}

/// A parsed accessor path
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AccessorPath {
    steps: Vec<Step>,
    source: String,
}

impl AccessorPath {
    pub fn parse(source: &str) -> AccessorResult<Self> {
        parse_path(source, 0)
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Source text of the first `count` steps
    pub fn prefix(&self, count: usize) -> String {
        self.steps
            .iter()
            .take(count)
            .map(Step::text)
            .collect::<Vec<_>>()
            .join("/")
    }

    /// True when no step carries `?` or `!`
    pub fn is_plain(&self) -> bool {
        self.steps.iter().all(|s| !s.conditional && !s.evaluated)
    }
}

impl FromStr for AccessorPath {
    type Err = AccessorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AccessorPath::parse(s)
    }
}

impl fmt::Display for AccessorPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

fn syntax(position: usize, reason: impl Into<String>) -> AccessorError {
    AccessorError::Syntax {
        position,
        reason: reason.into(),
    }
}

/// Split on `sep` outside parentheses, returning each piece with its byte offset.
fn split_top_level(text: &str, sep: char, base: usize) -> AccessorResult<Vec<(usize, &str)>> {
    let mut pieces = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;
    for (i, c) in text.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth = depth
                    .checked_sub(1)
                    .ok_or_else(|| syntax(base + i, "unbalanced ')'"))?;
            }
            c if c == sep && depth == 0 => {
                pieces.push((base + start, &text[start..i]));
                start = i + c.len_utf8();
            }
            _ => {}
        }
    }
    if depth != 0 {
        return Err(syntax(base + text.len(), "unclosed '('"));
    }
    pieces.push((base + start, &text[start..]));
    Ok(pieces)
}

/// Position of the first `c` outside parentheses
fn find_top_level(text: &str, target: char) -> Option<usize> {
    let mut depth = 0usize;
    for (i, c) in text.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            c if c == target && depth == 0 => return Some(i),
            _ => {}
        }
    }
    None
}

/// `(inner)` → `inner` when the parentheses enclose the whole operand
fn strip_group(text: &str) -> (&str, usize) {
    if text.len() >= 2 && text.starts_with('(') && text.ends_with(')') {
        let mut depth = 0usize;
        for (i, c) in text.char_indices() {
            match c {
                '(' => depth += 1,
                ')' => {
                    depth -= 1;
                    if depth == 0 && i != text.len() - 1 {
                        return (text, 0);
                    }
                }
                _ => {}
            }
        }
        return (&text[1..text.len() - 1], 1);
    }
    (text, 0)
}

fn parse_path(source: &str, base: usize) -> AccessorResult<AccessorPath> {
    let trimmed = source.trim();
    if trimmed.is_empty() {
        return Ok(AccessorPath {
            steps: Vec::new(),
            source: String::new(),
        });
    }
    let lead = source.len() - source.trim_start().len();
    let mut steps = Vec::new();
    for (offset, text) in split_top_level(trimmed, DELIMITER, base + lead)? {
        steps.push(parse_step(text, offset)?);
    }
    Ok(AccessorPath {
        steps,
        source: trimmed.to_string(),
    })
}

fn literal_value(text: &str) -> Value {
    serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string()))
}

fn parse_step(text: &str, offset: usize) -> AccessorResult<Step> {
    if text.is_empty() {
        return Err(syntax(offset, "empty step"));
    }

    let mut conditional = false;
    let mut evaluated = false;
    let mut rest = text;
    let mut consumed = 0;
    loop {
        if let Some(r) = rest.strip_prefix('?') {
            conditional = true;
            rest = r;
        } else if let Some(r) = rest.strip_prefix('!') {
            evaluated = true;
            rest = r;
        } else {
            break;
        }
        consumed += 1;
    }

    let (kind, operand_text, operand_offset) = match find_top_level(rest, ':') {
        Some(colon) => {
            let type_name = &rest[..colon];
            let kind = StepKind::from_name(type_name).ok_or_else(|| {
                syntax(offset + consumed, format!("unknown step type `{}`", type_name))
            })?;
            (kind, &rest[colon + 1..], offset + consumed + colon + 1)
        }
        None => (StepKind::Member, rest, offset + consumed),
    };

    if operand_text.is_empty() {
        return Err(syntax(operand_offset, "missing operand"));
    }

    let operand = if kind == StepKind::Method {
        parse_call(operand_text, operand_offset, evaluated)?
    } else {
        let (inner, shift) = strip_group(operand_text);
        if inner.is_empty() {
            return Err(syntax(operand_offset, "empty group"));
        }
        if evaluated {
            Operand::Expr(parse_path(inner, operand_offset + shift)?)
        } else if kind == StepKind::Literal {
            Operand::Value(literal_value(inner))
        } else {
            if kind == StepKind::Index && inner.parse::<usize>().is_err() {
                return Err(syntax(
                    operand_offset,
                    format!("index operand `{}` is not a non-negative integer", inner),
                ));
            }
            Operand::Text(inner.to_string())
        }
    };

    Ok(Step {
        kind,
        operand,
        conditional,
        evaluated,
        text: text.to_string(),
    })
}

fn parse_call(text: &str, offset: usize, evaluated: bool) -> AccessorResult<Operand> {
    let Some(open) = text.find('(') else {
        return Ok(Operand::Call {
            name: text.to_string(),
            args: Vec::new(),
        });
    };
    if !text.ends_with(')') {
        return Err(syntax(offset + text.len(), "method arguments must end with ')'"));
    }
    let name = &text[..open];
    if name.is_empty() {
        return Err(syntax(offset, "missing method name"));
    }
    let inner = &text[open + 1..text.len() - 1];
    let mut args = Vec::new();
    if !inner.trim().is_empty() {
        for (arg_offset, arg) in split_top_level(inner, ',', offset + open + 1)? {
            let arg = arg.trim();
            if arg.is_empty() {
                return Err(syntax(arg_offset, "empty method argument"));
            }
            if evaluated {
                let (group, shift) = strip_group(arg);
                args.push(Argument::Expr(parse_path(group, arg_offset + shift)?));
            } else {
                args.push(Argument::Value(literal_value(arg)));
            }
        }
    }
    Ok(Operand::Call {
        name: name.to_string(),
        args,
    })
}
