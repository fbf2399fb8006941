//! Tree-walking evaluator with a fuel budget and a fixed builtin table.
//!
//! The only names a script can reach are the base model, the field helpers,
//! the safe primitives below, its own `let` bindings, and its own models.
//! There is no I/O of any kind; `print` goes to the debug log.
//!
//! Fuel also pays for memory: every list cell and every 64 bytes of string
//! a script builds or copies cost one step. Lists are shared rather than
//! copied, and each carries its nesting depth and total size so neither can
//! outgrow [`ScriptLimits`].

use crate::error::{ScriptError, ScriptResult};
use crate::model::{ScriptModel, ScriptOutput, BASE_MODEL};
use crate::parser::{Arg, BinaryOp, Expr, Member, ModelDecl, Pos, Stmt, UnaryOp};
use crate::sandbox::ScriptLimits;
use persistkit_model::{FieldDescriptor, FieldType};
use serde_json::Value;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Field helper names and the max length each presets.
const FIELD_HELPERS: [(&str, Option<usize>); 11] = [
    ("field", None),
    ("standard_field", None),
    ("id_field", Some(26)),
    ("reference_id_field", Some(36)),
    ("key_field", Some(200)),
    ("title_field", Some(400)),
    ("description_field", Some(800)),
    ("content_field", Some(4000)),
    ("large_content_field", Some(10_000)),
    ("max_content_field", Some(100_000)),
    ("version_field", Some(50)),
];

const PRIMITIVES: [&str; 10] = [
    "len", "lower", "upper", "trim", "concat", "join", "str", "int", "bool", "print",
];

/// Host capabilities scripts sometimes reach for. Named in the error so the
/// author sees why the call failed.
const FORBIDDEN: [&str; 14] = [
    "open",
    "read_file",
    "write_file",
    "remove_file",
    "exec",
    "eval",
    "system",
    "env",
    "getenv",
    "spawn",
    "fetch",
    "socket",
    "require",
    "exit",
];

/// String bytes paid for by one unit of fuel.
const BYTES_PER_FUEL: usize = 64;

/// Settings gathered from a field helper call.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct FieldSpec {
    max_length: Option<usize>,
    indexed: bool,
    unique: bool,
    primary_key: bool,
    required: Option<bool>,
    default: Option<Value>,
    description: String,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum ScriptValue {
    Null,
    Bool(bool),
    Int(i64),
    Str(String),
    List(Rc<ScriptList>),
    Field(Box<FieldSpec>),
    Model(String),
}

impl ScriptValue {
    fn kind(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Str(_) => "string",
            Self::List(_) => "list",
            Self::Field(_) => "field spec",
            Self::Model(_) => "model",
        }
    }

    /// A flat list has depth 1; scalars have 0.
    fn depth(&self) -> usize {
        match self {
            Self::List(list) => list.depth,
            _ => 0,
        }
    }

    /// One unit per value plus one per string byte, summed over nested lists.
    fn size(&self) -> usize {
        match self {
            Self::Str(s) => s.len().saturating_add(1),
            Self::List(list) => list.size,
            _ => 1,
        }
    }

    /// Appends the printed form to `out`. Returns `false` as soon as `out`
    /// grows past `limit`.
    fn write_display(&self, out: &mut String, limit: usize) -> bool {
        match self {
            Self::Null => out.push_str("null"),
            Self::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
            Self::Int(n) => out.push_str(&n.to_string()),
            Self::Str(s) => {
                if out.len().saturating_add(s.len()) > limit {
                    return false;
                }
                out.push_str(s);
            }
            Self::List(list) => {
                out.push('[');
                for (i, item) in list.items.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    if !item.write_display(out, limit) {
                        return false;
                    }
                }
                out.push(']');
            }
            Self::Field(_) => out.push_str("<field>"),
            Self::Model(name) => {
                out.push_str("<model ");
                out.push_str(name);
                out.push('>');
            }
        }
        out.len() <= limit
    }

    fn to_json(&self) -> Option<Value> {
        Some(match self {
            Self::Null => Value::Null,
            Self::Bool(b) => Value::Bool(*b),
            Self::Int(n) => Value::from(*n),
            Self::Str(s) => Value::String(s.clone()),
            Self::List(list) => Value::Array(
                list.items
                    .iter()
                    .map(Self::to_json)
                    .collect::<Option<_>>()?,
            ),
            Self::Field(_) | Self::Model(_) => return None,
        })
    }
}

/// A list value with its nesting depth and total size worked out once.
#[derive(Debug, PartialEq)]
pub(crate) struct ScriptList {
    items: Vec<ScriptValue>,
    depth: usize,
    size: usize,
}

fn at(pos: Pos, message: impl std::fmt::Display) -> ScriptError {
    ScriptError::Runtime(format!("{}:{}: {message}", pos.line, pos.column))
}

pub(crate) struct Interpreter {
    limits: ScriptLimits,
    cancel: Arc<AtomicBool>,
    fuel_used: u64,
    globals: HashMap<String, ScriptValue>,
    models: Vec<ScriptModel>,
}

impl Interpreter {
    pub(crate) fn new(limits: ScriptLimits) -> Self {
        Self {
            limits,
            cancel: Arc::new(AtomicBool::new(false)),
            fuel_used: 0,
            globals: HashMap::new(),
            models: Vec::new(),
        }
    }

    /// Stops the run with [`ScriptError::Timeout`] once `cancel` is set.
    pub(crate) fn with_cancel(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = cancel;
        self
    }

    pub(crate) fn run(mut self, program: &[Stmt]) -> ScriptResult<ScriptOutput> {
        for stmt in program {
            self.exec(stmt)?;
        }
        Ok(ScriptOutput {
            models: self.models,
            fuel_used: self.fuel_used,
        })
    }

    fn burn(&mut self, amount: u64) -> ScriptResult<()> {
        if self.cancel.load(Ordering::Relaxed) {
            return Err(ScriptError::Timeout {
                timeout_ms: self.limits.timeout_ms,
            });
        }
        self.fuel_used = self.fuel_used.saturating_add(amount);
        if self.fuel_used > self.limits.fuel {
            return Err(ScriptError::ResourceLimit(format!(
                "fuel exhausted after {} steps",
                self.limits.fuel
            )));
        }
        Ok(())
    }

    fn burn_bytes(&mut self, bytes: usize) -> ScriptResult<()> {
        self.burn((bytes / BYTES_PER_FUEL) as u64)
    }

    fn check_string(&mut self, s: String) -> ScriptResult<ScriptValue> {
        if s.len() > self.limits.max_string_bytes {
            return Err(ScriptError::ResourceLimit(format!(
                "string of {} bytes exceeds the {} byte limit",
                s.len(),
                self.limits.max_string_bytes
            )));
        }
        self.burn_bytes(s.len())?;
        Ok(ScriptValue::Str(s))
    }

    fn check_list(&mut self, items: Vec<ScriptValue>) -> ScriptResult<ScriptValue> {
        if items.len() > self.limits.max_list_items {
            return Err(ScriptError::ResourceLimit(format!(
                "list of {} items exceeds the {} item limit",
                items.len(),
                self.limits.max_list_items
            )));
        }
        self.burn(items.len() as u64)?;
        let depth = 1 + items.iter().map(ScriptValue::depth).max().unwrap_or(0);
        if depth > self.limits.max_depth {
            return Err(ScriptError::ResourceLimit(format!(
                "list nested {depth} levels deep exceeds the {} level limit",
                self.limits.max_depth
            )));
        }
        let size = items
            .iter()
            .fold(1usize, |total, item| total.saturating_add(item.size()));
        if size > self.limits.max_value_size {
            return Err(ScriptError::ResourceLimit(format!(
                "list of total size {size} exceeds the {} limit",
                self.limits.max_value_size
            )));
        }
        Ok(ScriptValue::List(Rc::new(ScriptList { items, depth, size })))
    }

    /// Printed form of `values`, separated by `sep`, capped at the string limit.
    fn render(&mut self, values: &[ScriptValue], sep: &str) -> ScriptResult<String> {
        let limit = self.limits.max_string_bytes;
        let mut out = String::new();
        for (i, value) in values.iter().enumerate() {
            if i > 0 {
                out.push_str(sep);
            }
            if !value.write_display(&mut out, limit) {
                return Err(ScriptError::ResourceLimit(format!(
                    "rendered text exceeds the {limit} byte limit"
                )));
            }
        }
        self.burn_bytes(out.len())?;
        Ok(out)
    }

    fn is_reserved(&self, name: &str) -> bool {
        name == BASE_MODEL
            || PRIMITIVES.contains(&name)
            || FIELD_HELPERS.iter().any(|(h, _)| *h == name)
            || self.globals.contains_key(name)
    }

    // ── Statements ───────────────────────────────────────────────

    fn exec(&mut self, stmt: &Stmt) -> ScriptResult<()> {
        self.burn(1)?;
        match stmt {
            Stmt::Let { name, value, pos } => {
                if self.is_reserved(name) {
                    return Err(at(*pos, format!("'{name}' is already defined")));
                }
                let value = self.eval(value)?;
                self.globals.insert(name.clone(), value);
            }
            Stmt::Model(decl) => self.declare(decl)?,
            Stmt::Import { path, pos } => {
                return Err(ScriptError::Disallowed(format!(
                    "{}:{}: import of '{path}' is not allowed in entity scripts",
                    pos.line, pos.column
                )));
            }
            Stmt::Expr(expr) => {
                self.eval(expr)?;
            }
        }
        Ok(())
    }

    fn declare(&mut self, decl: &ModelDecl) -> ScriptResult<()> {
        if self.is_reserved(&decl.name) {
            return Err(at(decl.pos, format!("'{}' is already defined", decl.name)));
        }
        let mut model = match decl.base.as_deref() {
            None => ScriptModel::root(&decl.name, None),
            Some(BASE_MODEL) => ScriptModel::root(&decl.name, Some(BASE_MODEL)),
            Some(base) => {
                let parent = self
                    .models
                    .iter()
                    .find(|m| m.name == base)
                    .ok_or_else(|| at(decl.pos, format!("undefined base model '{base}'")))?;
                ScriptModel::derive(&decl.name, parent)
            }
        };

        for member in &decl.members {
            self.burn(1)?;
            match member {
                Member::Attr { name, value, pos } => {
                    let value = self.eval(value)?;
                    assign_attr(&mut model, name, value, *pos)?;
                }
                Member::Field {
                    name,
                    type_tag,
                    optional,
                    init,
                    pos,
                } => {
                    let init = init.as_ref().map(|e| self.eval(e)).transpose()?;
                    model.set_field(build_field(name, type_tag, *optional, init, *pos)?);
                }
            }
        }

        debug!(model = %model.name, fields = model.fields.len(), "script model declared");
        self.globals
            .insert(decl.name.clone(), ScriptValue::Model(decl.name.clone()));
        self.models.push(model);
        Ok(())
    }

    // ── Expressions ──────────────────────────────────────────────

    fn eval(&mut self, expr: &Expr) -> ScriptResult<ScriptValue> {
        self.burn(1)?;
        match expr {
            Expr::Null => Ok(ScriptValue::Null),
            Expr::Bool(b) => Ok(ScriptValue::Bool(*b)),
            Expr::Int(n) => Ok(ScriptValue::Int(*n)),
            Expr::Str(s) => self.check_string(s.clone()),
            Expr::List(items) => {
                let values = items
                    .iter()
                    .map(|e| self.eval(e))
                    .collect::<ScriptResult<Vec<_>>>()?;
                self.check_list(values)
            }
            Expr::Name(name, _) if name == BASE_MODEL => Ok(ScriptValue::Model(name.clone())),
            Expr::Name(name, _) => {
                let value = self.globals.get(name).cloned().ok_or_else(|| {
                    ScriptError::Disallowed(format!("undefined name '{name}'"))
                })?;
                if let ScriptValue::Str(s) = &value {
                    self.burn_bytes(s.len())?;
                }
                Ok(value)
            }
            Expr::Call { name, args, pos } => self.call(name, args, *pos),
            Expr::Unary { op, expr, pos } => {
                let value = self.eval(expr)?;
                match (op, value) {
                    (UnaryOp::Not, ScriptValue::Bool(b)) => Ok(ScriptValue::Bool(!b)),
                    (UnaryOp::Neg, ScriptValue::Int(n)) => n
                        .checked_neg()
                        .map(ScriptValue::Int)
                        .ok_or_else(|| at(*pos, "integer overflow")),
                    (UnaryOp::Not, v) => Err(at(*pos, format!("cannot apply '!' to {}", v.kind()))),
                    (UnaryOp::Neg, v) => Err(at(*pos, format!("cannot negate {}", v.kind()))),
                }
            }
            Expr::Binary { op, lhs, rhs, pos } => self.binary(*op, lhs, rhs, *pos),
        }
    }

    fn binary(&mut self, op: BinaryOp, lhs: &Expr, rhs: &Expr, pos: Pos) -> ScriptResult<ScriptValue> {
        use ScriptValue::{Bool, Int, List, Str};

        let left = self.eval(lhs)?;
        if let (BinaryOp::And | BinaryOp::Or, Bool(l)) = (op, &left) {
            let short = if op == BinaryOp::And { !*l } else { *l };
            if short {
                return Ok(Bool(*l));
            }
            return match self.eval(rhs)? {
                Bool(r) => Ok(Bool(r)),
                other => Err(at(pos, format!("expected bool operand, got {}", other.kind()))),
            };
        }
        let right = self.eval(rhs)?;
        let overflow = || at(pos, "integer overflow");

        match (op, left, right) {
            (BinaryOp::Add, Int(a), Int(b)) => a.checked_add(b).map(Int).ok_or_else(overflow),
            (BinaryOp::Sub, Int(a), Int(b)) => a.checked_sub(b).map(Int).ok_or_else(overflow),
            (BinaryOp::Mul, Int(a), Int(b)) => a.checked_mul(b).map(Int).ok_or_else(overflow),
            (BinaryOp::Add, Str(a), Str(b)) => self.check_string(a + &b),
            (BinaryOp::Add, List(a), List(b)) => {
                let items = a.items.iter().chain(b.items.iter()).cloned().collect();
                self.check_list(items)
            }
            (BinaryOp::Mul, Str(s), Int(n)) => {
                let n = usize::try_from(n).map_err(|_| at(pos, "negative repeat count"))?;
                let total = s.len().saturating_mul(n);
                if total > self.limits.max_string_bytes {
                    return Err(ScriptError::ResourceLimit(format!(
                        "string of {total} bytes exceeds the {} byte limit",
                        self.limits.max_string_bytes
                    )));
                }
                self.burn(n as u64)?;
                self.check_string(s.repeat(n))
            }
            (BinaryOp::Eq | BinaryOp::Ne, a, b) => {
                self.burn(a.size().min(b.size()) as u64)?;
                Ok(Bool((a == b) == (op == BinaryOp::Eq)))
            }
            (BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge, a, b) => {
                let ordering = match (&a, &b) {
                    (Int(x), Int(y)) => x.cmp(y),
                    (Str(x), Str(y)) => x.cmp(y),
                    _ => {
                        return Err(at(
                            pos,
                            format!("cannot compare {} with {}", a.kind(), b.kind()),
                        ));
                    }
                };
                Ok(Bool(match op {
                    BinaryOp::Lt => ordering.is_lt(),
                    BinaryOp::Le => ordering.is_le(),
                    BinaryOp::Gt => ordering.is_gt(),
                    _ => ordering.is_ge(),
                }))
            }
            (op, a, b) => Err(at(
                pos,
                format!("unsupported operands for {op:?}: {} and {}", a.kind(), b.kind()),
            )),
        }
    }

    // ── Calls ────────────────────────────────────────────────────

    fn call(&mut self, name: &str, args: &[Arg], pos: Pos) -> ScriptResult<ScriptValue> {
        if FORBIDDEN.contains(&name) {
            return Err(ScriptError::Disallowed(format!(
                "'{name}' is not available in entity scripts"
            )));
        }
        if let Some((_, preset)) = FIELD_HELPERS.iter().find(|(h, _)| *h == name) {
            return self.field_helper(name, *preset, args, pos);
        }
        if !PRIMITIVES.contains(&name) {
            if name == BASE_MODEL || self.models.iter().any(|m| m.name == name) {
                return Err(ScriptError::Disallowed(format!(
                    "model '{name}' cannot be instantiated"
                )));
            }
            return Err(ScriptError::Disallowed(format!("unknown function '{name}'")));
        }
        if let Some(named) = args.iter().find_map(|a| a.name.as_deref()) {
            return Err(at(pos, format!("{name}() takes no named argument '{named}'")));
        }

        let values = args
            .iter()
            .map(|a| self.eval(&a.value))
            .collect::<ScriptResult<Vec<_>>>()?;
        self.primitive(name, values, pos)
    }

    fn primitive(&mut self, name: &str, args: Vec<ScriptValue>, pos: Pos) -> ScriptResult<ScriptValue> {
        use ScriptValue::{Bool, Int, List, Null, Str};

        let arity = |n: usize| {
            if args.len() == n {
                Ok(())
            } else {
                Err(at(pos, format!("{name}() takes {n} argument(s), got {}", args.len())))
            }
        };

        match name {
            "print" => {
                let line = self.render(&args, " ")?;
                debug!(output = %line, "script print");
                Ok(Null)
            }
            "concat" => {
                let out = self.render(&args, "")?;
                Ok(Str(out))
            }
            "join" => {
                arity(2)?;
                let (List(list), Str(sep)) = (&args[0], &args[1]) else {
                    return Err(at(pos, "join() expects a list and a separator string"));
                };
                self.burn(list.items.len() as u64)?;
                let out = self.render(&list.items, sep)?;
                Ok(Str(out))
            }
            _ => {
                arity(1)?;
                let Some(arg) = args.into_iter().next() else {
                    return Err(at(pos, format!("{name}() takes 1 argument(s), got 0")));
                };
                match (name, arg) {
                    ("len", Str(s)) => Ok(Int(s.chars().count() as i64)),
                    ("len", List(list)) => Ok(Int(list.items.len() as i64)),
                    ("lower", Str(s)) => Ok(Str(s.to_lowercase())),
                    ("upper", Str(s)) => self.check_string(s.to_uppercase()),
                    ("trim", Str(s)) => Ok(Str(s.trim().to_string())),
                    ("str", v) => {
                        let out = self.render(std::slice::from_ref(&v), "")?;
                        Ok(Str(out))
                    }
                    ("int", Int(n)) => Ok(Int(n)),
                    ("int", Bool(b)) => Ok(Int(i64::from(b))),
                    ("int", Str(s)) => s
                        .trim()
                        .parse()
                        .map(Int)
                        .map_err(|_| at(pos, format!("int() cannot parse '{s}'"))),
                    ("bool", Bool(b)) => Ok(Bool(b)),
                    ("bool", Int(n)) => Ok(Bool(n != 0)),
                    ("bool", Str(s)) => Ok(Bool(!s.is_empty())),
                    ("bool", List(list)) => Ok(Bool(!list.items.is_empty())),
                    ("bool", Null) => Ok(Bool(false)),
                    (name, v) => Err(at(pos, format!("{name}() does not accept {}", v.kind()))),
                }
            }
        }
    }

    fn field_helper(
        &mut self,
        name: &str,
        preset: Option<usize>,
        args: &[Arg],
        pos: Pos,
    ) -> ScriptResult<ScriptValue> {
        let mut spec = FieldSpec {
            max_length: preset,
            ..FieldSpec::default()
        };
        let mut positional = 0;
        for arg in args {
            let value = self.eval(&arg.value)?;
            let Some(key) = arg.name.as_deref() else {
                positional += 1;
                if positional > 1 {
                    return Err(at(pos, format!("{name}() takes at most one positional argument (the default)")));
                }
                spec.default = Some(default_json(value, pos)?);
                continue;
            };
            let expect_bool = |v: &ScriptValue| match v {
                ScriptValue::Bool(b) => Ok(*b),
                other => Err(at(pos, format!("{name}({key}:) expects bool, got {}", other.kind()))),
            };
            match key {
                "indexed" => spec.indexed = expect_bool(&value)?,
                "unique" => spec.unique = expect_bool(&value)?,
                "primary_key" => spec.primary_key = expect_bool(&value)?,
                "required" => spec.required = Some(expect_bool(&value)?),
                "optional" => spec.required = Some(!expect_bool(&value)?),
                "default" => spec.default = Some(default_json(value, pos)?),
                "max_length" => match value {
                    ScriptValue::Int(n) if n > 0 => spec.max_length = usize::try_from(n).ok(),
                    other => {
                        return Err(at(
                            pos,
                            format!("{name}(max_length:) expects a positive int, got {}", other.kind()),
                        ));
                    }
                },
                "description" => match value {
                    ScriptValue::Str(s) => spec.description = s,
                    other => {
                        return Err(at(pos, format!("{name}(description:) expects string, got {}", other.kind())));
                    }
                },
                other => return Err(at(pos, format!("{name}() has no argument '{other}'"))),
            }
        }
        Ok(ScriptValue::Field(Box::new(spec)))
    }
}

fn default_json(value: ScriptValue, pos: Pos) -> ScriptResult<Value> {
    value
        .to_json()
        .ok_or_else(|| at(pos, format!("a {} cannot be used as a default value", value.kind())))
}

fn expect_str(attr: &str, value: ScriptValue, pos: Pos) -> ScriptResult<String> {
    match value {
        ScriptValue::Str(s) => Ok(s),
        other => Err(at(pos, format!("'{attr}' must be a string, got {}", other.kind()))),
    }
}

fn expect_names(attr: &str, value: ScriptValue, pos: Pos) -> ScriptResult<Vec<String>> {
    match value {
        ScriptValue::List(list) => list
            .items
            .iter()
            .cloned()
            .map(|item| expect_str(attr, item, pos))
            .collect(),
        other => Err(at(pos, format!("'{attr}' must be a list of strings, got {}", other.kind()))),
    }
}

fn assign_attr(model: &mut ScriptModel, name: &str, value: ScriptValue, pos: Pos) -> ScriptResult<()> {
    match name {
        "table" => model.table_name = Some(expect_str(name, value, pos)?),
        "primary_key" => model.primary_key = Some(expect_str(name, value, pos)?),
        "indexed" => model.indexed = expect_names(name, value, pos)?,
        "unique" => model.unique = expect_names(name, value, pos)?,
        "description" => model.description = expect_str(name, value, pos)?,
        "encrypt" => match value {
            ScriptValue::Bool(b) => model.encrypt = b,
            other => return Err(at(pos, format!("'encrypt' must be a bool, got {}", other.kind()))),
        },
        other => {
            return Err(ScriptError::Disallowed(format!(
                "unknown model attribute '{other}' on '{}'",
                model.name
            )));
        }
    }
    Ok(())
}

fn build_field(
    name: &str,
    type_tag: &str,
    optional: bool,
    init: Option<ScriptValue>,
    pos: Pos,
) -> ScriptResult<FieldDescriptor> {
    let mut field = FieldDescriptor::new(name, FieldType::parse(type_tag));
    match init {
        None => {}
        Some(ScriptValue::Field(spec)) => {
            let spec = *spec;
            field.max_length = spec.max_length;
            field.is_indexed = spec.indexed;
            field.is_unique = spec.unique;
            field.is_primary_key = spec.primary_key;
            field.description = spec.description;
            if let Some(default) = spec.default.filter(|d| !d.is_null()) {
                field = field.with_default(default);
            }
            if let Some(required) = spec.required {
                field.required = required;
            }
        }
        Some(ScriptValue::Model(model)) => {
            return Err(at(pos, format!("field '{name}' cannot be initialized with model '{model}'")));
        }
        Some(literal) => {
            let default = default_json(literal, pos)?;
            if default.is_null() {
                field.required = false;
            } else {
                field = field.with_default(default);
            }
        }
    }
    if optional {
        field.required = false;
    }
    if field.field_type.is_complex() {
        field.required = false;
    }
    Ok(field)
}
