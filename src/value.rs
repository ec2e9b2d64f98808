use std::{
    cell::RefCell,
    cmp::Ordering,
    fmt,
    io::{self, BufRead, BufReader, Cursor, Write},
    rc::Rc,
};

use chrono::{Duration, NaiveDateTime};
use indexmap::IndexMap;
use regex::Regex;
use rustc_hash::FxHashSet;

use crate::{
    ast::{LambdaDef, Node},
    collections::{ValueMap, ValueSet},
    diagnostics::{CheckerError, Result, SourcePos},
    environment::EnvironmentRef,
};

/// A runtime value. Containers, functions and streams are shared handles:
/// cloning a `Value` aliases the same storage, it never copies it.
#[derive(Clone)]
pub enum Value {
    Null,
    Boolean(bool),
    Int(i64),
    Decimal(f64),
    String(Rc<str>),
    Date(NaiveDateTime),
    Pattern(Rc<PatternValue>),
    List(Rc<RefCell<Vec<Value>>>),
    Set(Rc<RefCell<ValueSet>>),
    Map(Rc<RefCell<ValueMap>>),
    Object(Rc<RefCell<ObjectValue>>),
    Function(Rc<Function>),
    Input(Rc<RefCell<InputStream>>),
    Output(Rc<RefCell<OutputStream>>),
    Node(Rc<Node>),
}

impl Value {
    pub fn string(value: impl Into<String>) -> Self {
        Self::String(Rc::from(value.into()))
    }

    pub fn list(values: Vec<Value>) -> Self {
        Self::List(Rc::new(RefCell::new(values)))
    }

    pub fn set(values: ValueSet) -> Self {
        Self::Set(Rc::new(RefCell::new(values)))
    }

    pub fn map(entries: ValueMap) -> Self {
        Self::Map(Rc::new(RefCell::new(entries)))
    }

    pub fn object(object: ObjectValue) -> Self {
        Self::Object(Rc::new(RefCell::new(object)))
    }

    pub fn function(function: Function) -> Self {
        Self::Function(Rc::new(function))
    }

    pub fn input(stream: InputStream) -> Self {
        Self::Input(Rc::new(RefCell::new(stream)))
    }

    pub fn output(stream: OutputStream) -> Self {
        Self::Output(Rc::new(RefCell::new(stream)))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Boolean(_) => "boolean",
            Value::Int(_) => "int",
            Value::Decimal(_) => "decimal",
            Value::String(_) => "string",
            Value::Date(_) => "date",
            Value::Pattern(_) => "pattern",
            Value::List(_) => "list",
            Value::Set(_) => "set",
            Value::Map(_) => "map",
            Value::Object(_) => "object",
            Value::Function(_) => "func",
            Value::Input(_) => "input",
            Value::Output(_) => "output",
            Value::Node(_) => "node",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Value::Int(_) | Value::Decimal(_))
    }

    /// Scalars that concatenate with strings.
    pub fn is_atomic(&self) -> bool {
        matches!(
            self,
            Value::Null
                | Value::Boolean(_)
                | Value::Int(_)
                | Value::Decimal(_)
                | Value::String(_)
                | Value::Date(_)
                | Value::Pattern(_)
        )
    }

    /// Identity of the shared storage behind a container value.
    fn container_ptr(&self) -> Option<*const ()> {
        match self {
            Value::List(items) => Some(Rc::as_ptr(items).cast()),
            Value::Set(items) => Some(Rc::as_ptr(items).cast()),
            Value::Map(entries) => Some(Rc::as_ptr(entries).cast()),
            Value::Object(object) => Some(Rc::as_ptr(object).cast()),
            _ => None,
        }
    }

    /// True when `container` is this value or is nested anywhere inside it.
    pub fn reaches(&self, container: &Value) -> bool {
        match container.container_ptr() {
            Some(goal) => self.reaches_ptr(goal, &mut FxHashSet::default()),
            None => false,
        }
    }

    fn reaches_ptr(&self, goal: *const (), seen: &mut FxHashSet<*const ()>) -> bool {
        let Some(ptr) = self.container_ptr() else {
            return false;
        };
        if ptr == goal {
            return true;
        }
        if !seen.insert(ptr) {
            return false;
        }
        match self {
            Value::List(items) => items.borrow().iter().any(|item| item.reaches_ptr(goal, seen)),
            Value::Set(items) => items.borrow().iter().any(|item| item.reaches_ptr(goal, seen)),
            Value::Map(entries) => entries
                .borrow()
                .iter()
                .any(|(key, value)| key.reaches_ptr(goal, seen) || value.reaches_ptr(goal, seen)),
            Value::Object(object) => object
                .borrow()
                .members
                .values()
                .any(|member| member.reaches_ptr(goal, seen)),
            _ => false,
        }
    }

    pub fn as_bool(&self, pos: &SourcePos) -> Result<bool> {
        match self {
            Value::Boolean(b) => Ok(*b),
            _ => Err(self.type_error("boolean", pos)),
        }
    }

    pub fn as_int(&self, pos: &SourcePos) -> Result<i64> {
        match self {
            Value::Int(n) => Ok(*n),
            Value::Decimal(n) => Ok(*n as i64),
            _ => Err(self.type_error("int", pos)),
        }
    }

    pub fn as_decimal(&self, pos: &SourcePos) -> Result<f64> {
        match self {
            Value::Int(n) => Ok(*n as f64),
            Value::Decimal(n) => Ok(*n),
            _ => Err(self.type_error("decimal", pos)),
        }
    }

    pub fn as_str(&self, pos: &SourcePos) -> Result<Rc<str>> {
        match self {
            Value::String(s) => Ok(Rc::clone(s)),
            _ => Err(self.type_error("string", pos)),
        }
    }

    pub fn as_function(&self, pos: &SourcePos) -> Result<Rc<Function>> {
        match self {
            Value::Function(fun) => Ok(Rc::clone(fun)),
            _ => Err(self.type_error("func", pos)),
        }
    }

    fn type_error(&self, expected: &str, pos: &SourcePos) -> CheckerError {
        CheckerError::runtime(
            format!("expected {expected} but got {}", self.type_name()),
            pos,
        )
    }

    /// Elements of a list or set (sets in total order).
    pub fn elements(&self, pos: &SourcePos) -> Result<Vec<Value>> {
        match self {
            Value::List(list) => Ok(list.borrow().clone()),
            Value::Set(set) => Ok(set.borrow().sorted()),
            _ => Err(self.type_error("list or set", pos)),
        }
    }

    /// Plain text form: strings unquoted, everything else canonical.
    pub fn to_text(&self) -> String {
        match self {
            Value::String(s) => s.to_string(),
            other => other.to_string(),
        }
    }

    /// Canonical form used for bucket placement. Matches `Display` except
    /// that numbers are written from their `f64` value, since `1 == 1.0`.
    pub fn hash_key(&self) -> String {
        let mut out = String::new();
        self.write_hash_key(&mut out);
        out
    }

    fn write_hash_key(&self, out: &mut String) {
        match self {
            Value::Int(n) => write_numeric_key(*n as f64, out),
            Value::Decimal(n) => write_numeric_key(*n, out),
            Value::List(list) => {
                out.push('[');
                for (idx, item) in list.borrow().iter().enumerate() {
                    if idx > 0 {
                        out.push_str(", ");
                    }
                    item.write_hash_key(out);
                }
                out.push(']');
            }
            Value::Set(set) => {
                out.push_str("<<");
                for (idx, item) in set.borrow().sorted().iter().enumerate() {
                    if idx > 0 {
                        out.push_str(", ");
                    }
                    item.write_hash_key(out);
                }
                out.push_str(">>");
            }
            Value::Map(map) => {
                out.push_str("<<<");
                for (idx, (key, value)) in map.borrow().sorted_entries().iter().enumerate() {
                    if idx > 0 {
                        out.push_str(", ");
                    }
                    key.write_hash_key(out);
                    out.push_str(" => ");
                    value.write_hash_key(out);
                }
                out.push_str(">>>");
            }
            Value::Object(object) => {
                let object = object.borrow();
                let mut names: Vec<&String> = object.members.keys().collect();
                names.sort();
                out.push_str("<*");
                for (idx, name) in names.into_iter().enumerate() {
                    if idx > 0 {
                        out.push_str(", ");
                    }
                    out.push_str(name);
                    out.push('=');
                    if let Some(value) = object.members.get(name) {
                        value.write_hash_key(out);
                    }
                }
                out.push_str("*>");
            }
            other => out.push_str(&other.to_string()),
        }
    }

    /// Structural equality. Ints and decimals compare by numeric value.
    pub fn is_equals(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Int(_) | Value::Decimal(_), Value::Int(_) | Value::Decimal(_)) => {
                numeric(self) == numeric(other)
            }
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Date(a), Value::Date(b)) => a == b,
            (Value::Pattern(a), Value::Pattern(b)) => a.source == b.source,
            (Value::List(a), Value::List(b)) => {
                if Rc::ptr_eq(a, b) {
                    return true;
                }
                let (a, b) = (a.borrow(), b.borrow());
                a.len() == b.len() && a.iter().zip(b.iter()).all(|(l, r)| l.is_equals(r))
            }
            (Value::Set(a), Value::Set(b)) => {
                if Rc::ptr_eq(a, b) {
                    return true;
                }
                let (a, b) = (a.borrow(), b.borrow());
                a.len() == b.len() && a.iter().all(|item| b.contains(item))
            }
            (Value::Map(a), Value::Map(b)) => {
                if Rc::ptr_eq(a, b) {
                    return true;
                }
                let (a, b) = (a.borrow(), b.borrow());
                a.len() == b.len()
                    && a.iter()
                        .all(|(key, value)| b.get(key).is_some_and(|rhs| value.is_equals(rhs)))
            }
            (Value::Object(a), Value::Object(b)) => {
                if Rc::ptr_eq(a, b) {
                    return true;
                }
                let (a, b) = (a.borrow(), b.borrow());
                a.members.len() == b.members.len()
                    && a.members.iter().all(|(name, value)| {
                        b.members.get(name).is_some_and(|rhs| value.is_equals(rhs))
                    })
            }
            (Value::Function(a), Value::Function(b)) => Rc::ptr_eq(a, b),
            (Value::Input(a), Value::Input(b)) => Rc::ptr_eq(a, b),
            (Value::Output(a), Value::Output(b)) => Rc::ptr_eq(a, b),
            (Value::Node(a), Value::Node(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// Total order used for sorting. Returns `Equal` exactly when
    /// `is_equals` holds; unrelated kinds compare by canonical string.
    pub fn compare_to(&self, other: &Value) -> Ordering {
        match (self, other) {
            (Value::Boolean(a), Value::Boolean(b)) => a.cmp(b),
            (Value::Int(a), Value::Int(b)) => a.cmp(b),
            (Value::Int(_) | Value::Decimal(_), Value::Int(_) | Value::Decimal(_)) => numeric(self)
                .partial_cmp(&numeric(other))
                .unwrap_or(Ordering::Equal),
            (Value::String(a), Value::String(b)) => a.cmp(b),
            (Value::Date(a), Value::Date(b)) => a.cmp(b),
            (Value::List(a), Value::List(b)) => {
                let (a, b) = (a.borrow().clone(), b.borrow().clone());
                for (l, r) in a.iter().zip(b.iter()) {
                    let ordering = l.compare_to(r);
                    if ordering != Ordering::Equal {
                        return ordering;
                    }
                }
                a.len().cmp(&b.len())
            }
            _ if self.is_equals(other) => Ordering::Equal,
            _ => self
                .to_string()
                .cmp(&other.to_string())
                .then_with(|| self.type_name().cmp(other.type_name()))
                .then_with(|| self.identity().cmp(&other.identity())),
        }
    }

    /// Address of the shared storage behind handle values, zero for scalars.
    fn identity(&self) -> usize {
        match self {
            Value::Function(function) => Rc::as_ptr(function) as usize,
            Value::Input(stream) => Rc::as_ptr(stream) as usize,
            Value::Output(stream) => Rc::as_ptr(stream) as usize,
            Value::Node(node) => Rc::as_ptr(node) as usize,
            other => other.container_ptr().map_or(0, |ptr| ptr as usize),
        }
    }

    pub fn add(&self, other: &Value, pos: &SourcePos) -> Result<Value> {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => checked(a.checked_add(*b), pos),
            (Value::Int(_) | Value::Decimal(_), Value::Int(_) | Value::Decimal(_)) => {
                Ok(Value::Decimal(numeric(self) + numeric(other)))
            }
            (Value::List(a), Value::List(b)) => {
                let mut items = a.borrow().clone();
                items.extend(b.borrow().iter().cloned());
                Ok(Value::list(items))
            }
            (Value::List(a), item) => {
                let mut items = a.borrow().clone();
                items.push(item.clone());
                Ok(Value::list(items))
            }
            (Value::Set(a), Value::Set(b)) => {
                let mut items = a.borrow().clone();
                for item in b.borrow().iter() {
                    items.insert(item.clone());
                }
                Ok(Value::set(items))
            }
            (Value::Set(a), item) => {
                let mut items = a.borrow().clone();
                items.insert(item.clone());
                Ok(Value::set(items))
            }
            (Value::Map(a), Value::Map(b)) => {
                let mut entries = a.borrow().clone();
                for (key, value) in b.borrow().iter() {
                    entries.insert(key.clone(), value.clone());
                }
                Ok(Value::map(entries))
            }
            (Value::Date(date), Value::Int(_) | Value::Decimal(_)) => {
                shift_days(date, numeric(other), pos)
            }
            (Value::String(a), rhs) if rhs.is_atomic() => {
                Ok(Value::string(format!("{a}{}", rhs.to_text())))
            }
            (lhs, Value::String(b)) if lhs.is_atomic() => {
                Ok(Value::string(format!("{}{b}", lhs.to_text())))
            }
            _ => Err(self.operand_error("add", other, pos)),
        }
    }

    pub fn sub(&self, other: &Value, pos: &SourcePos) -> Result<Value> {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => checked(a.checked_sub(*b), pos),
            (Value::Int(_) | Value::Decimal(_), Value::Int(_) | Value::Decimal(_)) => {
                Ok(Value::Decimal(numeric(self) - numeric(other)))
            }
            (Value::List(a), Value::List(_) | Value::Set(_)) => {
                let remove: ValueSet = other.elements(pos)?.into_iter().collect();
                Ok(Value::list(
                    a.borrow()
                        .iter()
                        .filter(|item| !remove.contains(item))
                        .cloned()
                        .collect(),
                ))
            }
            (Value::List(a), item) => Ok(Value::list(
                a.borrow()
                    .iter()
                    .filter(|existing| !existing.is_equals(item))
                    .cloned()
                    .collect(),
            )),
            (Value::Set(a), Value::Set(b)) => {
                let mut items = a.borrow().clone();
                for item in b.borrow().iter() {
                    items.remove(item);
                }
                Ok(Value::set(items))
            }
            (Value::Set(a), Value::List(b)) => {
                let mut items = a.borrow().clone();
                for item in b.borrow().iter() {
                    items.remove(item);
                }
                Ok(Value::set(items))
            }
            (Value::Set(a), item) => {
                let mut items = a.borrow().clone();
                items.remove(item);
                Ok(Value::set(items))
            }
            (Value::Date(a), Value::Date(b)) => Ok(Value::Int((*a - *b).num_days())),
            (Value::Date(date), Value::Int(_) | Value::Decimal(_)) => {
                shift_days(date, -numeric(other), pos)
            }
            _ => Err(self.operand_error("subtract", other, pos)),
        }
    }

    pub fn mul(&self, other: &Value, pos: &SourcePos) -> Result<Value> {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => checked(a.checked_mul(*b), pos),
            (Value::Int(_) | Value::Decimal(_), Value::Int(_) | Value::Decimal(_)) => {
                Ok(Value::Decimal(numeric(self) * numeric(other)))
            }
            (Value::String(s), Value::Int(n)) => {
                let times = repetitions(s.len(), *n, pos)?;
                Ok(Value::string(s.repeat(times)))
            }
            (Value::List(items), Value::Int(n)) => {
                let items = items.borrow();
                let times = repetitions(items.len(), *n, pos)?;
                let mut repeated = Vec::with_capacity(items.len() * times);
                for _ in 0..times {
                    repeated.extend(items.iter().cloned());
                }
                Ok(Value::list(repeated))
            }
            _ => Err(self.operand_error("multiply", other, pos)),
        }
    }

    /// Errors with "divide by zero" for a zero divisor; callers that honour
    /// a fallback check [`Value::is_zero`] first.
    pub fn div(&self, other: &Value, pos: &SourcePos) -> Result<Value> {
        if other.is_numeric() && other.is_zero() && self.is_numeric() {
            return Err(CheckerError::runtime("divide by zero", pos));
        }
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => checked(a.checked_div(*b), pos),
            (Value::Int(_) | Value::Decimal(_), Value::Int(_) | Value::Decimal(_)) => {
                Ok(Value::Decimal(numeric(self) / numeric(other)))
            }
            _ => Err(self.operand_error("divide", other, pos)),
        }
    }

    pub fn rem(&self, other: &Value, pos: &SourcePos) -> Result<Value> {
        if other.is_numeric() && other.is_zero() && self.is_numeric() {
            return Err(CheckerError::runtime("divide by zero", pos));
        }
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => checked(a.checked_rem(*b), pos),
            (Value::Int(_) | Value::Decimal(_), Value::Int(_) | Value::Decimal(_)) => {
                Ok(Value::Decimal(numeric(self) % numeric(other)))
            }
            _ => Err(self.operand_error("take the remainder of", other, pos)),
        }
    }

    /// Membership: list/set element, map key, object member or substring.
    pub fn contains(&self, element: &Value, pos: &SourcePos) -> Result<bool> {
        match self {
            Value::List(items) => Ok(items.borrow().iter().any(|item| item.is_equals(element))),
            Value::Set(items) => Ok(items.borrow().contains(element)),
            Value::Map(entries) => Ok(entries.borrow().contains_key(element)),
            Value::Object(object) => Ok(object.borrow().members.contains_key(&*element.as_str(pos)?)),
            Value::String(text) => Ok(text.contains(&*element.as_str(pos)?)),
            _ => Err(self.type_error("container", pos)),
        }
    }

    pub fn is_zero(&self) -> bool {
        match self {
            Value::Int(n) => *n == 0,
            Value::Decimal(n) => *n == 0.0,
            _ => false,
        }
    }

    fn operand_error(&self, verb: &str, other: &Value, pos: &SourcePos) -> CheckerError {
        CheckerError::runtime(
            format!(
                "cannot {verb} {} and {}",
                self.type_name(),
                other.type_name()
            ),
            pos,
        )
    }
}

fn numeric(value: &Value) -> f64 {
    match value {
        Value::Int(n) => *n as f64,
        Value::Decimal(n) => *n,
        _ => f64::NAN,
    }
}

/// Upper bound on the length produced by string or list repetition.
const MAX_REPEAT_LEN: usize = 1 << 28;

/// Repeat count for `len * n`; negative counts repeat nothing.
fn repetitions(len: usize, n: i64, pos: &SourcePos) -> Result<usize> {
    let times = usize::try_from(n).unwrap_or(0);
    if len == 0 {
        return Ok(0);
    }
    match len.checked_mul(times) {
        Some(total) if total <= MAX_REPEAT_LEN => Ok(times),
        _ => Err(CheckerError::runtime("repetition too large", pos)),
    }
}

fn checked(result: Option<i64>, pos: &SourcePos) -> Result<Value> {
    result
        .map(Value::Int)
        .ok_or_else(|| CheckerError::runtime("integer overflow", pos))
}

fn shift_days(date: &NaiveDateTime, days: f64, pos: &SourcePos) -> Result<Value> {
    Duration::try_seconds((days * 86_400.0).round() as i64)
        .and_then(|delta| date.checked_add_signed(delta))
        .map(Value::Date)
        .ok_or_else(|| CheckerError::runtime("date out of range", pos))
}

/// Numbers hash by their `f64` value, the same value `is_equals` compares,
/// so an int and the decimal it rounds to share a bucket.
fn write_numeric_key(n: f64, out: &mut String) {
    if n == 0.0 {
        out.push('0');
    } else if n.is_finite() && n.fract() == 0.0 {
        out.push_str(&format!("{n:.0}"));
    } else {
        out.push_str(&n.to_string());
    }
}

pub(crate) fn format_decimal(n: f64) -> String {
    if n.is_finite() && n.fract() == 0.0 && n.abs() < 1.0e16 {
        format!("{n:.1}")
    } else {
        format!("{n}")
    }
}

fn write_quoted(f: &mut fmt::Formatter<'_>, text: &str) -> fmt::Result {
    write!(f, "'")?;
    for ch in text.chars() {
        match ch {
            '\\' => write!(f, "\\\\")?,
            '\'' => write!(f, "\\'")?,
            '\n' => write!(f, "\\n")?,
            '\r' => write!(f, "\\r")?,
            '\t' => write!(f, "\\t")?,
            other => write!(f, "{other}")?,
        }
    }
    write!(f, "'")
}

fn write_joined(f: &mut fmt::Formatter<'_>, values: &[Value]) -> fmt::Result {
    for (idx, value) in values.iter().enumerate() {
        if idx > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{value}")?;
    }
    Ok(())
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Boolean(true) => write!(f, "TRUE"),
            Value::Boolean(false) => write!(f, "FALSE"),
            Value::Int(n) => write!(f, "{n}"),
            Value::Decimal(n) => write!(f, "{}", format_decimal(*n)),
            Value::String(s) => write_quoted(f, s),
            Value::Date(date) => write!(f, "{}", date.format("%Y%m%d%H%M%S")),
            Value::Pattern(pattern) => write!(f, "//{}//", pattern.source),
            Value::List(items) => {
                write!(f, "[")?;
                write_joined(f, &items.borrow())?;
                write!(f, "]")
            }
            Value::Set(items) => {
                write!(f, "<<")?;
                write_joined(f, &items.borrow().sorted())?;
                write!(f, ">>")
            }
            Value::Map(entries) => {
                write!(f, "<<<")?;
                for (idx, (key, value)) in entries.borrow().sorted_entries().iter().enumerate() {
                    if idx > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{key} => {value}")?;
                }
                write!(f, ">>>")
            }
            Value::Object(object) => {
                write!(f, "<*")?;
                for (idx, (name, value)) in object.borrow().members.iter().enumerate() {
                    if idx > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{name}={value}")?;
                }
                write!(f, "*>")
            }
            Value::Function(fun) => write!(f, "<#{}>", fun.name()),
            Value::Input(_) => write!(f, "<!input-stream>"),
            Value::Output(_) => write!(f, "<!output-stream>"),
            Value::Node(node) => write!(f, "{node}"),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// Compiled regular expression together with its literal source.
#[derive(Debug)]
pub struct PatternValue {
    pub source: String,
    pub regex: Regex,
}

impl PatternValue {
    pub fn new(source: &str) -> std::result::Result<Self, regex::Error> {
        Ok(Self {
            source: source.to_string(),
            regex: Regex::new(source)?,
        })
    }
}

/// Insertion-ordered record; module namespaces are objects tagged with the
/// module identifier.
#[derive(Clone, Default)]
pub struct ObjectValue {
    pub members: IndexMap<String, Value>,
    pub module: Option<String>,
}

impl ObjectValue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn namespace(module: impl Into<String>, members: IndexMap<String, Value>) -> Self {
        Self {
            members,
            module: Some(module.into()),
        }
    }
}

pub enum Function {
    Native(NativeFunction),
    Lambda(Lambda),
}

impl Function {
    pub fn name(&self) -> &str {
        match self {
            Function::Native(native) => &native.name,
            Function::Lambda(lambda) => lambda.def.name.as_deref().unwrap_or("lambda"),
        }
    }

    /// Declared parameter names (rest parameter excluded) and rest name.
    pub fn signature(&self) -> (Vec<String>, Option<String>) {
        match self {
            Function::Native(native) => (native.params.clone(), native.rest.clone()),
            Function::Lambda(lambda) => (
                lambda.def.params.iter().map(|p| p.name.clone()).collect(),
                lambda.def.rest.clone(),
            ),
        }
    }
}

/// A closure: lambda definition plus the environment it was created in.
pub struct Lambda {
    pub def: Rc<LambdaDef>,
    pub env: EnvironmentRef,
}

pub type NativeCallback = fn(&Args, &EnvironmentRef, &SourcePos) -> Result<Value>;

/// Host-implemented function. Arguments are bound by name exactly like
/// lambda arguments; parameters without a bound argument are simply absent
/// from [`Args`].
pub struct NativeFunction {
    pub name: String,
    pub params: Vec<String>,
    pub rest: Option<String>,
    pub callback: NativeCallback,
}

impl NativeFunction {
    pub fn new(name: &str, params: &[&str], callback: NativeCallback) -> Self {
        Self {
            name: name.to_string(),
            params: params.iter().map(|p| p.to_string()).collect(),
            rest: None,
            callback,
        }
    }

    pub fn with_rest(mut self, rest: &str) -> Self {
        self.rest = Some(rest.to_string());
        self
    }

    pub fn call(&self, args: &Args, env: &EnvironmentRef, pos: &SourcePos) -> Result<Value> {
        (self.callback)(args, env, pos)
    }
}

/// Arguments bound for one call, in binding order.
#[derive(Default)]
pub struct Args {
    values: IndexMap<String, Value>,
}

impl Args {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind(&mut self, name: &str, value: Value) {
        self.values.insert(name.to_string(), value);
    }

    pub fn has(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn get(&self, name: &str, pos: &SourcePos) -> Result<&Value> {
        self.values
            .get(name)
            .ok_or_else(|| CheckerError::runtime(format!("missing argument `{name}`"), pos))
    }

    /// Bound, non-NULL argument.
    pub fn get_opt(&self, name: &str) -> Option<&Value> {
        self.values.get(name).filter(|value| !value.is_null())
    }

    pub fn get_int(&self, name: &str, pos: &SourcePos) -> Result<i64> {
        self.get(name, pos)?.as_int(pos)
    }

    pub fn get_str(&self, name: &str, pos: &SourcePos) -> Result<Rc<str>> {
        self.get(name, pos)?.as_str(pos)
    }
}

/// Line-oriented input source.
pub struct InputStream {
    reader: Box<dyn BufRead>,
}

impl InputStream {
    pub fn new(reader: impl BufRead + 'static) -> Self {
        Self {
            reader: Box::new(reader),
        }
    }

    pub fn from_string(text: &str) -> Self {
        Self::new(Cursor::new(text.as_bytes().to_vec()))
    }

    pub fn stdin() -> Self {
        Self::new(BufReader::new(io::stdin()))
    }

    /// Next line without its terminator; `None` at end of stream.
    pub fn read_line(&mut self) -> io::Result<Option<String>> {
        let mut line = String::new();
        if self.reader.read_line(&mut line)? == 0 {
            return Ok(None);
        }
        if line.ends_with('\n') {
            line.pop();
            if line.ends_with('\r') {
                line.pop();
            }
        }
        Ok(Some(line))
    }
}

/// Output sink: process stdout or an in-memory buffer hosts can inspect.
pub enum OutputStream {
    Stdout,
    Buffer(String),
}

impl OutputStream {
    pub fn write_str(&mut self, text: &str) -> io::Result<()> {
        match self {
            OutputStream::Stdout => {
                let mut stdout = io::stdout().lock();
                stdout.write_all(text.as_bytes())?;
                stdout.flush()
            }
            OutputStream::Buffer(buffer) => {
                buffer.push_str(text);
                Ok(())
            }
        }
    }

    pub fn contents(&self) -> Option<&str> {
        match self {
            OutputStream::Stdout => None,
            OutputStream::Buffer(buffer) => Some(buffer),
        }
    }
}
