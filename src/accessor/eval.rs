//! Path evaluation and assignment

use serde_json::Value;

use super::path::{AccessorPath, Argument, Operand, Step, StepKind};
use super::reflect::{resolve_member_name, Reflect};
use crate::convert::{Convert, ConvertContext};
use crate::core::{AccessorError, AccessorResult, ConvertError};

const PARENT: &str = "..";

/// Operand after `!` sub-paths have been resolved
#[derive(Debug, Clone, PartialEq)]
enum Resolved {
    Key(String),
    Value(Value),
    Call { name: String, args: Vec<Value> },
}

impl Resolved {
    fn key(&self) -> Result<&str, String> {
        match self {
            Resolved::Key(key) => Ok(key.as_str()),
            Resolved::Value(value) => Err(format!("operand {} is not a name", value)),
            Resolved::Call { name, .. } => Err(format!("`{}(..)` is not a name", name)),
        }
    }

    fn index(&self) -> Result<usize, String> {
        let key = self.key()?;
        key.parse::<usize>()
            .map_err(|_| format!("`{}` is not a valid index", key))
    }
}

/// Where a member-style step lands on the current value
enum Route {
    Member(String),
    Index(usize),
    Key,
}

fn member_route(target: &dyn Reflect, name: &str) -> Result<Route, String> {
    if let Some(resolved) = resolve_member_name(target, name) {
        return Ok(Route::Member(resolved));
    }
    if let (Some(len), Ok(i)) = (target.len(), name.parse::<usize>()) {
        if i < len && target.index(i).is_some() {
            return Ok(Route::Index(i));
        }
    }
    if target.key(name).is_some() {
        return Ok(Route::Key);
    }
    Err(format!("{} has no member `{}`", target.type_name(), name))
}

/// Sub-path results become keys when they are strings or whole numbers.
fn value_to_key(value: Value) -> Resolved {
    match value {
        Value::String(s) => Resolved::Key(s),
        Value::Number(n) => match (n.as_u64(), n.as_i64(), n.as_f64()) {
            (Some(u), _, _) => Resolved::Key(u.to_string()),
            (None, Some(i), _) => Resolved::Key(i.to_string()),
            (None, None, Some(f)) if f.fract() == 0.0 && f >= 0.0 => {
                Resolved::Key(format!("{}", f as u64))
            }
            _ => Resolved::Value(Value::Number(n)),
        },
        other => Resolved::Value(other),
    }
}

fn resolve_operand(
    step: &Step,
    root: &dyn Reflect,
    ctx: &ConvertContext<'_>,
) -> Result<Resolved, String> {
    let sub = |path: &AccessorPath| -> Result<Value, String> {
        evaluate(root, path, ctx).map_err(|e| format!("sub-path `{}` failed: {}", path, e))
    };
    match &step.operand {
        Operand::Text(text) => Ok(Resolved::Key(text.clone())),
        Operand::Value(value) => Ok(Resolved::Value(value.clone())),
        Operand::Expr(path) => {
            let value = sub(path)?;
            if step.kind == StepKind::Literal {
                Ok(Resolved::Value(value))
            } else {
                Ok(value_to_key(value))
            }
        }
        Operand::Call { name, args } => {
            let mut values = Vec::with_capacity(args.len());
            for arg in args {
                values.push(match arg {
                    Argument::Value(value) => value.clone(),
                    Argument::Expr(path) => sub(path)?,
                });
            }
            Ok(Resolved::Call {
                name: name.clone(),
                args: values,
            })
        }
    }
}

enum Nav<'a> {
    Ref(&'a dyn Reflect),
    Owned(Value),
}

impl Nav<'_> {
    fn into_json(self) -> Value {
        match self {
            Nav::Ref(r) => r.to_json(),
            Nav::Owned(v) => v,
        }
    }
}

fn navigate<'a>(
    current: &'a dyn Reflect,
    kind: StepKind,
    operand: &Resolved,
    ctx: &ConvertContext<'_>,
) -> Result<Nav<'a>, String> {
    let type_name = current.type_name();
    match kind {
        StepKind::Member => {
            let name = operand.key()?;
            let next = match member_route(current, name)? {
                Route::Member(resolved) => current.member(&resolved),
                Route::Index(i) => current.index(i),
                Route::Key => current.key(name),
            };
            next.map(Nav::Ref)
                .ok_or_else(|| format!("{} has no member `{}`", type_name, name))
        }
        StepKind::Index => {
            let i = operand.index()?;
            let len = current
                .len()
                .ok_or_else(|| format!("{} is not indexable", type_name))?;
            current
                .index(i)
                .map(Nav::Ref)
                .ok_or_else(|| format!("index {} out of range for {} of length {}", i, type_name, len))
        }
        StepKind::Map => {
            let key = operand.key()?;
            current
                .key(key)
                .map(Nav::Ref)
                .ok_or_else(|| format!("{} has no key `{}`", type_name, key))
        }
        StepKind::Component => {
            let name = operand.key()?;
            current
                .component(name)
                .map(Nav::Ref)
                .ok_or_else(|| format!("{} has no component `{}`", type_name, name))
        }
        StepKind::Transform => {
            let name = operand.key()?;
            current
                .child(name)
                .map(Nav::Ref)
                .ok_or_else(|| format!("{} has no child `{}`", type_name, name))
        }
        StepKind::Resource => {
            let path = operand.key()?;
            let loader = ctx
                .resources
                .ok_or_else(|| format!("no resource loader to resolve `{}`", path))?;
            Ok(Nav::Owned(loader.load(path, ctx.requester).encode()))
        }
        StepKind::Method => match operand {
            Resolved::Call { name, args } => match current.call(name, args) {
                Some(Ok(value)) => Ok(Nav::Owned(value)),
                Some(Err(reason)) => Err(format!("{}.{} failed: {}", type_name, name, reason)),
                None => Err(format!("{} has no method `{}`", type_name, name)),
            },
            _ => Err("method step needs a call operand".to_string()),
        },
        StepKind::Literal => match operand {
            Resolved::Value(value) => Ok(Nav::Owned(value.clone())),
            Resolved::Key(text) => Ok(Nav::Owned(Value::String(text.clone()))),
            Resolved::Call { name, .. } => Err(format!("`{}(..)` is not a literal", name)),
        },
    }
}

enum Cursor<'a> {
    Ref(&'a dyn Reflect),
    Owned(Value),
}

impl Cursor<'_> {
    fn get(&self) -> &dyn Reflect {
        match self {
            Cursor::Ref(r) => *r,
            Cursor::Owned(v) => v,
        }
    }

    fn into_json(self) -> Value {
        match self {
            Cursor::Ref(r) => r.to_json(),
            Cursor::Owned(v) => v,
        }
    }
}

fn advance<'a>(
    cursor: Cursor<'a>,
    step: &Step,
    root: &dyn Reflect,
    ctx: &ConvertContext<'_>,
    parents: &mut Vec<Cursor<'a>>,
) -> Result<Cursor<'a>, String> {
    let operand = resolve_operand(step, root, ctx)?;

    if step.kind == StepKind::Transform && operand == Resolved::Key(PARENT.to_string()) {
        return parents
            .pop()
            .ok_or_else(|| "no parent to return to".to_string());
    }
    if step.kind != StepKind::Literal && cursor.get().is_null() {
        return Err("cannot step into null".to_string());
    }

    match cursor {
        Cursor::Ref(current) => {
            let next = match navigate(current, step.kind, &operand, ctx)? {
                Nav::Ref(r) => Cursor::Ref(r),
                Nav::Owned(v) => Cursor::Owned(v),
            };
            if step.kind == StepKind::Transform {
                parents.push(Cursor::Ref(current));
            }
            Ok(next)
        }
        Cursor::Owned(value) => {
            let next = navigate(&value, step.kind, &operand, ctx)?.into_json();
            if step.kind == StepKind::Transform {
                parents.push(Cursor::Owned(value));
            }
            Ok(Cursor::Owned(next))
        }
    }
}

fn resolution_error(path: &AccessorPath, index: usize, reason: String) -> AccessorError {
    AccessorError::PathResolution {
        step: index,
        text: path.steps()[index].text().to_string(),
        prefix: path.prefix(index),
        reason,
    }
}

fn convert_error(path: &AccessorPath, source: ConvertError) -> AccessorError {
    AccessorError::Convert {
        path: path.to_string(),
        source,
    }
}

/// Read the value `path` designates under `root`.
///
/// An empty path encodes the root itself. A failing conditional step ends
/// evaluation with `null`, and once a conditional step has run, a `null`
/// reached by any later step also ends evaluation with `null`.
pub fn evaluate(
    root: &dyn Reflect,
    path: &AccessorPath,
    ctx: &ConvertContext<'_>,
) -> AccessorResult<Value> {
    let mut cursor = Cursor::Ref(root);
    let mut parents = Vec::new();
    let mut null_safe = false;
    for (i, step) in path.steps().iter().enumerate() {
        if null_safe && step.kind != StepKind::Literal && cursor.get().is_null() {
            return Ok(Value::Null);
        }
        null_safe |= step.conditional;
        match advance(cursor, step, root, ctx, &mut parents) {
            Ok(next) => cursor = next,
            Err(reason) if step.conditional => {
                tracing::trace!(target: "accessor", "Conditional step `{}` skipped: {}", step.text(), reason);
                return Ok(Value::Null);
            }
            Err(reason) => return Err(resolution_error(path, i, reason)),
        }
    }
    Ok(cursor.into_json())
}

fn navigate_mut<'a>(
    current: &'a mut dyn Reflect,
    kind: StepKind,
    operand: &Resolved,
) -> Result<&'a mut dyn Reflect, String> {
    let type_name = current.type_name();
    match kind {
        StepKind::Member => {
            let name = operand.key()?;
            let next = match member_route(&*current, name)? {
                Route::Member(resolved) => current.member_mut(&resolved),
                Route::Index(i) => current.index_mut(i),
                Route::Key => current.key_mut(name),
            };
            next.ok_or_else(|| format!("{} has no member `{}`", type_name, name))
        }
        StepKind::Index => {
            let i = operand.index()?;
            current
                .index_mut(i)
                .ok_or_else(|| format!("{} has no element {}", type_name, i))
        }
        StepKind::Map => {
            let key = operand.key()?;
            current
                .key_mut(key)
                .ok_or_else(|| format!("{} has no key `{}`", type_name, key))
        }
        StepKind::Component => {
            let name = operand.key()?;
            current
                .component_mut(name)
                .ok_or_else(|| format!("{} has no component `{}`", type_name, name))
        }
        StepKind::Transform => {
            let name = operand.key()?;
            if name == PARENT {
                return Err("parent navigation is read-only".to_string());
            }
            current
                .child_mut(name)
                .ok_or_else(|| format!("{} has no child `{}`", type_name, name))
        }
        StepKind::Resource | StepKind::Method | StepKind::Literal => {
            Err(format!("{} steps are read-only", kind.name()))
        }
    }
}

/// Outcome of writing the final step
enum Write {
    Done,
    Failed(String),
    Convert(ConvertError),
}

fn write_last(
    target: &mut dyn Reflect,
    kind: StepKind,
    operand: &Resolved,
    value: &Value,
    ctx: &ConvertContext<'_>,
) -> Write {
    let finish = |result: Result<(), ConvertError>| match result {
        Ok(()) => Write::Done,
        Err(e) => Write::Convert(e),
    };
    let type_name = target.type_name();
    match kind {
        StepKind::Member => {
            let name = match operand.key() {
                Ok(name) => name,
                Err(reason) => return Write::Failed(reason),
            };
            match member_route(&*target, name) {
                Ok(Route::Member(resolved)) => match target.member_mut(&resolved) {
                    Some(slot) => finish(slot.set_json(value, ctx)),
                    None => Write::Failed(format!("{} has no member `{}`", type_name, name)),
                },
                Ok(Route::Index(i)) => match target.index_mut(i) {
                    Some(slot) => finish(slot.set_json(value, ctx)),
                    None => Write::Failed(format!("{} has no element {}", type_name, i)),
                },
                Ok(Route::Key) => match target.key_mut(name) {
                    Some(slot) => finish(slot.set_json(value, ctx)),
                    None => Write::Failed(format!("{} has no key `{}`", type_name, name)),
                },
                Err(reason) => match target.insert_key(name, value, ctx) {
                    Some(result) => finish(result),
                    None => Write::Failed(reason),
                },
            }
        }
        StepKind::Map => {
            let key = match operand.key() {
                Ok(key) => key,
                Err(reason) => return Write::Failed(reason),
            };
            if target.key(key).is_some() {
                match target.key_mut(key) {
                    Some(slot) => finish(slot.set_json(value, ctx)),
                    None => Write::Failed(format!("{} has no key `{}`", type_name, key)),
                }
            } else {
                match target.insert_key(key, value, ctx) {
                    Some(result) => finish(result),
                    None => Write::Failed(format!("{} is not a map", type_name)),
                }
            }
        }
        _ => match navigate_mut(target, kind, operand) {
            Ok(slot) => finish(slot.set_json(value, ctx)),
            Err(reason) => Write::Failed(reason),
        },
    }
}

/// Write `value` at the location `path` designates under `root`.
///
/// `!` operands are resolved against the root before any mutation. A failing
/// conditional step makes the whole assignment a no-op.
pub fn assign(
    root: &mut dyn Reflect,
    path: &AccessorPath,
    value: &Value,
    ctx: &ConvertContext<'_>,
) -> AccessorResult<()> {
    let steps = path.steps();
    let Some(last_index) = steps.len().checked_sub(1) else {
        return root
            .set_json(value, ctx)
            .map_err(|e| convert_error(path, e));
    };

    let mut operands = Vec::with_capacity(steps.len());
    for (i, step) in steps.iter().enumerate() {
        match resolve_operand(step, &*root, ctx) {
            Ok(operand) => operands.push(operand),
            Err(_) if step.conditional => return Ok(()),
            Err(reason) => return Err(resolution_error(path, i, reason)),
        }
    }

    let mut cursor: &mut dyn Reflect = root;
    let mut null_safe = false;
    for (i, step) in steps[..last_index].iter().enumerate() {
        null_safe |= step.conditional;
        if cursor.is_null() {
            if null_safe {
                return Ok(());
            }
            return Err(resolution_error(path, i, "cannot step into null".to_string()));
        }
        match navigate_mut(cursor, step.kind, &operands[i]) {
            Ok(next) => cursor = next,
            Err(_) if step.conditional => return Ok(()),
            Err(reason) => return Err(resolution_error(path, i, reason)),
        }
    }

    let last = &steps[last_index];
    if cursor.is_null() && (null_safe || last.conditional) {
        return Ok(());
    }
    match write_last(cursor, last.kind, &operands[last_index], value, ctx) {
        Write::Done => Ok(()),
        Write::Failed(_) if last.conditional => Ok(()),
        Write::Failed(reason) => Err(resolution_error(path, last_index, reason)),
        Write::Convert(source) => Err(convert_error(path, source)),
    }
}
