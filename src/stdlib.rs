use std::{cmp::Ordering, rc::Rc};

use chrono::{Local, NaiveDate, NaiveDateTime, NaiveTime};
use unicode_segmentation::UnicodeSegmentation;

use crate::{
    collections::ValueSet,
    diagnostics::{CheckerError, Result, SourcePos},
    environment::{Environment, EnvironmentRef},
    parser,
    runtime::{call_function, evaluate_in_child},
    value::{Args, Function, InputStream, NativeCallback, NativeFunction, OutputStream, PatternValue, Value},
};

/// Variable consulted when an integer or decimal division has a zero divisor.
pub const DIV_0_VALUE: &str = "DIV_0_VALUE";

/// Binds the core natives plus `NULL`, `stdout` and `stdin` into `env`.
pub fn install(env: &EnvironmentRef) {
    let natives = [
        native("add", &["a", "b"], arith_add),
        native("sub", &["a", "b"], arith_sub),
        native("mul", &["a", "b"], arith_mul),
        native("div", &["a", "b"], arith_div),
        native("mod", &["a", "b"], arith_mod),
        native("equals", &["a", "b"], cmp_equals),
        native("not_equals", &["a", "b"], cmp_not_equals),
        native("less", &["a", "b"], cmp_less),
        native("less_equals", &["a", "b"], cmp_less_equals),
        native("greater", &["a", "b"], cmp_greater),
        native("greater_equals", &["a", "b"], cmp_greater_equals),
        native("is_empty", &["obj"], pred_is_empty),
        native("is_zero", &["obj"], pred_is_zero),
        native("is_negative", &["obj"], pred_is_negative),
        native(
            "is_numerical",
            &["str", "min_len", "max_len", "exact_len"],
            pred_is_numerical,
        ),
        native(
            "is_alphanumerical",
            &["str", "min_len", "max_len", "exact_len"],
            pred_is_alphanumerical,
        ),
        native("is_date", &["str", "with_hour"], pred_is_date),
        native("is_time", &["str"], pred_is_time),
        native("starts_with", &["str", "part"], string_starts_with),
        native("ends_with", &["str", "part"], string_ends_with),
        native("contains", &["obj", "part"], coll_contains),
        native("matches", &["str", "pattern"], string_matches),
        native("range", &["a", "b", "step"], coll_range),
        native("length", &["obj"], coll_length),
        native("sorted", &["lst", "cmp", "key"], coll_sorted),
        native("append", &["lst", "element"], coll_append),
        native("type", &["obj"], conv_type),
        native("string", &["obj"], conv_string),
        native("int", &["obj"], conv_int),
        native("decimal", &["obj"], conv_decimal),
        native("list", &["obj"], conv_list),
        native("set", &["obj"], conv_set),
        native("date", &["obj", "fmt"], conv_date),
        native("println", &["obj", "out"], io_println),
        native("print", &["obj", "out"], io_print),
        native("str_input", &["str"], io_str_input),
        native("read_line", &["input"], io_read_line),
        native("parse", &["str"], meta_parse),
        native("eval", &["obj"], meta_eval),
    ];

    let mut scope = env.borrow_mut();
    for function in natives {
        let name = function.name.clone();
        scope.put(name, Value::function(Function::Native(function)));
    }
    scope.put("NULL", Value::Null);
    scope.put("stdout", Value::output(OutputStream::Stdout));
    scope.put("stdin", Value::input(InputStream::stdin()));
}

fn native(name: &str, params: &[&str], callback: NativeCallback) -> NativeFunction {
    NativeFunction::new(name, params, callback)
}

fn arith_add(args: &Args, _env: &EnvironmentRef, pos: &SourcePos) -> Result<Value> {
    args.get("a", pos)?.add(args.get("b", pos)?, pos)
}

fn arith_sub(args: &Args, _env: &EnvironmentRef, pos: &SourcePos) -> Result<Value> {
    args.get("a", pos)?.sub(args.get("b", pos)?, pos)
}

fn arith_mul(args: &Args, _env: &EnvironmentRef, pos: &SourcePos) -> Result<Value> {
    args.get("a", pos)?.mul(args.get("b", pos)?, pos)
}

/// `DIV_0_VALUE`, when bound to a non-NULL value, replaces the error for a
/// numeric division by zero.
fn div_zero_fallback(a: &Value, b: &Value, env: &EnvironmentRef) -> Option<Value> {
    if !(a.is_numeric() && b.is_numeric() && b.is_zero()) {
        return None;
    }
    Environment::lookup(env, DIV_0_VALUE).filter(|value| !value.is_null())
}

fn arith_div(args: &Args, env: &EnvironmentRef, pos: &SourcePos) -> Result<Value> {
    let (a, b) = (args.get("a", pos)?, args.get("b", pos)?);
    match div_zero_fallback(a, b, env) {
        Some(fallback) => Ok(fallback),
        None => a.div(b, pos),
    }
}

fn arith_mod(args: &Args, env: &EnvironmentRef, pos: &SourcePos) -> Result<Value> {
    let (a, b) = (args.get("a", pos)?, args.get("b", pos)?);
    match div_zero_fallback(a, b, env) {
        Some(fallback) => Ok(fallback),
        None => a.rem(b, pos),
    }
}

fn compare(args: &Args, pos: &SourcePos) -> Result<Ordering> {
    Ok(args.get("a", pos)?.compare_to(args.get("b", pos)?))
}

fn cmp_equals(args: &Args, _env: &EnvironmentRef, pos: &SourcePos) -> Result<Value> {
    Ok(Value::Boolean(args.get("a", pos)?.is_equals(args.get("b", pos)?)))
}

fn cmp_not_equals(args: &Args, _env: &EnvironmentRef, pos: &SourcePos) -> Result<Value> {
    Ok(Value::Boolean(!args.get("a", pos)?.is_equals(args.get("b", pos)?)))
}

fn cmp_less(args: &Args, _env: &EnvironmentRef, pos: &SourcePos) -> Result<Value> {
    Ok(Value::Boolean(compare(args, pos)? == Ordering::Less))
}

fn cmp_less_equals(args: &Args, _env: &EnvironmentRef, pos: &SourcePos) -> Result<Value> {
    Ok(Value::Boolean(compare(args, pos)? != Ordering::Greater))
}

fn cmp_greater(args: &Args, _env: &EnvironmentRef, pos: &SourcePos) -> Result<Value> {
    Ok(Value::Boolean(compare(args, pos)? == Ordering::Greater))
}

fn cmp_greater_equals(args: &Args, _env: &EnvironmentRef, pos: &SourcePos) -> Result<Value> {
    Ok(Value::Boolean(compare(args, pos)? != Ordering::Less))
}

fn length_of(value: &Value, pos: &SourcePos) -> Result<usize> {
    match value {
        Value::String(text) => Ok(text.graphemes(true).count()),
        Value::List(items) => Ok(items.borrow().len()),
        Value::Set(items) => Ok(items.borrow().len()),
        Value::Map(entries) => Ok(entries.borrow().len()),
        Value::Object(object) => Ok(object.borrow().members.len()),
        other => Err(CheckerError::runtime(
            format!("{} has no length", other.type_name()),
            pos,
        )),
    }
}

fn pred_is_empty(args: &Args, _env: &EnvironmentRef, pos: &SourcePos) -> Result<Value> {
    let obj = args.get("obj", pos)?;
    if obj.is_null() {
        return Ok(Value::Boolean(true));
    }
    Ok(Value::Boolean(length_of(obj, pos)? == 0))
}

fn pred_is_zero(args: &Args, _env: &EnvironmentRef, pos: &SourcePos) -> Result<Value> {
    let obj = args.get("obj", pos)?;
    obj.as_decimal(pos)?;
    Ok(Value::Boolean(obj.is_zero()))
}

fn pred_is_negative(args: &Args, _env: &EnvironmentRef, pos: &SourcePos) -> Result<Value> {
    Ok(Value::Boolean(args.get("obj", pos)?.as_decimal(pos)? < 0.0))
}

/// Shared body of `is_numerical`/`is_alphanumerical`: every character
/// passes `accept` and the length options hold.
fn check_text(args: &Args, pos: &SourcePos, accept: fn(char) -> bool) -> Result<Value> {
    let Value::String(text) = args.get("str", pos)? else {
        return Ok(Value::Boolean(false));
    };
    let len = text.chars().count() as i64;
    let mut ok = text.chars().all(accept);
    if let Some(min) = args.get_opt("min_len") {
        ok &= len >= min.as_int(pos)?;
    }
    if let Some(max) = args.get_opt("max_len") {
        ok &= len <= max.as_int(pos)?;
    }
    if let Some(exact) = args.get_opt("exact_len") {
        ok &= len == exact.as_int(pos)?;
    }
    Ok(Value::Boolean(ok))
}

fn pred_is_numerical(args: &Args, _env: &EnvironmentRef, pos: &SourcePos) -> Result<Value> {
    check_text(args, pos, |ch| ch.is_ascii_digit())
}

fn pred_is_alphanumerical(args: &Args, _env: &EnvironmentRef, pos: &SourcePos) -> Result<Value> {
    check_text(args, pos, char::is_alphanumeric)
}

/// `yyyyMMdd`, or `yyyyMMddHH` with `with_hour`.
fn pred_is_date(args: &Args, _env: &EnvironmentRef, pos: &SourcePos) -> Result<Value> {
    let Value::String(text) = args.get("str", pos)? else {
        return Ok(Value::Boolean(false));
    };
    let with_hour = match args.get_opt("with_hour") {
        Some(flag) => flag.as_bool(pos)?,
        None => false,
    };
    let valid = if with_hour {
        text.len() == 10
            && text.is_char_boundary(8)
            && NaiveDate::parse_from_str(&text[..8], "%Y%m%d").is_ok()
            && text[8..].parse::<u32>().is_ok_and(|hour| hour < 24)
    } else {
        text.len() == 8 && NaiveDate::parse_from_str(text, "%Y%m%d").is_ok()
    };
    Ok(Value::Boolean(valid))
}

/// `HHmm`.
fn pred_is_time(args: &Args, _env: &EnvironmentRef, pos: &SourcePos) -> Result<Value> {
    let Value::String(text) = args.get("str", pos)? else {
        return Ok(Value::Boolean(false));
    };
    let valid = text.len() == 4 && NaiveTime::parse_from_str(text, "%H%M").is_ok();
    Ok(Value::Boolean(valid))
}

fn string_starts_with(args: &Args, _env: &EnvironmentRef, pos: &SourcePos) -> Result<Value> {
    let text = args.get_str("str", pos)?;
    Ok(Value::Boolean(text.starts_with(&*args.get_str("part", pos)?)))
}

fn string_ends_with(args: &Args, _env: &EnvironmentRef, pos: &SourcePos) -> Result<Value> {
    let text = args.get_str("str", pos)?;
    Ok(Value::Boolean(text.ends_with(&*args.get_str("part", pos)?)))
}

fn coll_contains(args: &Args, _env: &EnvironmentRef, pos: &SourcePos) -> Result<Value> {
    let obj = args.get("obj", pos)?;
    Ok(Value::Boolean(obj.contains(args.get("part", pos)?, pos)?))
}

fn string_matches(args: &Args, _env: &EnvironmentRef, pos: &SourcePos) -> Result<Value> {
    let text = args.get_str("str", pos)?;
    let matched = match args.get("pattern", pos)? {
        Value::Pattern(pattern) => pattern.regex.is_match(&text),
        Value::String(source) => PatternValue::new(source)
            .map_err(|err| CheckerError::runtime(format!("invalid pattern: {err}"), pos))?
            .regex
            .is_match(&text),
        other => {
            return Err(CheckerError::runtime(
                format!("expected pattern but got {}", other.type_name()),
                pos,
            ))
        }
    };
    Ok(Value::Boolean(matched))
}

/// `range(n)` counts from 0; `range(a, b[, step])` from `a` up to (or down
/// to) `b`, exclusive.
fn coll_range(args: &Args, _env: &EnvironmentRef, pos: &SourcePos) -> Result<Value> {
    let (start, end) = match args.get_opt("b") {
        Some(end) => (args.get_int("a", pos)?, end.as_int(pos)?),
        None => (0, args.get_int("a", pos)?),
    };
    let step = match args.get_opt("step") {
        Some(step) => step.as_int(pos)?,
        None => 1,
    };
    if step == 0 {
        return Err(CheckerError::runtime("range step must not be zero", pos));
    }
    let mut values = Vec::new();
    let mut current = start;
    while (step > 0 && current < end) || (step < 0 && current > end) {
        values.push(Value::Int(current));
        current = match current.checked_add(step) {
            Some(next) => next,
            None => break,
        };
    }
    Ok(Value::list(values))
}

fn coll_length(args: &Args, _env: &EnvironmentRef, pos: &SourcePos) -> Result<Value> {
    Ok(Value::Int(length_of(args.get("obj", pos)?, pos)? as i64))
}

/// Sorts a copy. `key` maps elements before comparing; `cmp` is a
/// two-argument function returning a negative, zero or positive number.
fn coll_sorted(args: &Args, env: &EnvironmentRef, pos: &SourcePos) -> Result<Value> {
    let elements = args.get("lst", pos)?.elements(pos)?;
    let key_function = match args.get_opt("key") {
        Some(key) => Some(key.as_function(pos)?),
        None => None,
    };
    let mut keyed = Vec::with_capacity(elements.len());
    for element in elements {
        let key = match &key_function {
            Some(function) => call_function(function, vec![(None, element.clone())], env, pos)?,
            None => element.clone(),
        };
        keyed.push((key, element));
    }

    let Some(cmp) = args.get_opt("cmp") else {
        keyed.sort_by(|a, b| a.0.compare_to(&b.0));
        return Ok(Value::list(keyed.into_iter().map(|(_, element)| element).collect()));
    };
    let cmp = cmp.as_function(pos)?;
    let mut failure: Option<CheckerError> = None;
    keyed.sort_by(|a, b| {
        if failure.is_some() {
            return Ordering::Equal;
        }
        let outcome = call_function(&cmp, vec![(None, a.0.clone()), (None, b.0.clone())], env, pos)
            .and_then(|result| result.as_decimal(pos));
        match outcome {
            Ok(n) => n.partial_cmp(&0.0).unwrap_or(Ordering::Equal),
            Err(err) => {
                failure = Some(err);
                Ordering::Equal
            }
        }
    });
    if let Some(err) = failure {
        return Err(err);
    }
    Ok(Value::list(keyed.into_iter().map(|(_, element)| element).collect()))
}

/// Appends in place, so every alias of the list or set sees the element.
fn coll_append(args: &Args, _env: &EnvironmentRef, pos: &SourcePos) -> Result<Value> {
    let target = args.get("lst", pos)?;
    let element = args.get("element", pos)?.clone();
    match target {
        Value::List(items) => items.borrow_mut().push(element),
        Value::Set(items) => {
            if element.reaches(target) {
                return Err(CheckerError::runtime("cannot add a set to itself", pos));
            }
            ValueSet::insert_shared(items, element);
        }
        other => {
            return Err(CheckerError::runtime(
                format!("cannot append to {}", other.type_name()),
                pos,
            ))
        }
    }
    Ok(target.clone())
}

fn conv_type(args: &Args, _env: &EnvironmentRef, pos: &SourcePos) -> Result<Value> {
    Ok(Value::string(args.get("obj", pos)?.type_name()))
}

fn conv_string(args: &Args, _env: &EnvironmentRef, pos: &SourcePos) -> Result<Value> {
    Ok(Value::string(args.get("obj", pos)?.to_text()))
}

fn conv_int(args: &Args, _env: &EnvironmentRef, pos: &SourcePos) -> Result<Value> {
    match args.get("obj", pos)? {
        Value::Int(n) => Ok(Value::Int(*n)),
        Value::Decimal(n) => Ok(Value::Int(n.trunc() as i64)),
        Value::Boolean(b) => Ok(Value::Int(i64::from(*b))),
        Value::String(text) => text.trim().parse::<i64>().map(Value::Int).map_err(|_| {
            CheckerError::runtime(format!("cannot convert '{text}' to int"), pos)
        }),
        other => Err(CheckerError::runtime(
            format!("cannot convert {} to int", other.type_name()),
            pos,
        )),
    }
}

fn conv_decimal(args: &Args, _env: &EnvironmentRef, pos: &SourcePos) -> Result<Value> {
    match args.get("obj", pos)? {
        Value::String(text) => text.trim().parse::<f64>().map(Value::Decimal).map_err(|_| {
            CheckerError::runtime(format!("cannot convert '{text}' to decimal"), pos)
        }),
        other => Ok(Value::Decimal(other.as_decimal(pos)?)),
    }
}

fn conv_list(args: &Args, _env: &EnvironmentRef, pos: &SourcePos) -> Result<Value> {
    match args.get("obj", pos)? {
        Value::Map(entries) => Ok(Value::list(
            entries
                .borrow()
                .sorted_entries()
                .into_iter()
                .map(|(key, value)| Value::list(vec![key, value]))
                .collect(),
        )),
        Value::String(text) => Ok(Value::list(text.graphemes(true).map(Value::string).collect())),
        other => Ok(Value::list(other.elements(pos)?)),
    }
}

fn conv_set(args: &Args, _env: &EnvironmentRef, pos: &SourcePos) -> Result<Value> {
    let obj = args.get("obj", pos)?;
    let items: ValueSet = match obj {
        Value::Map(entries) => entries.borrow().sorted_keys().into_iter().collect(),
        other => other.elements(pos)?.into_iter().collect(),
    };
    Ok(Value::set(items))
}

const DATE_FORMATS: [&str; 3] = ["%Y%m%d%H%M%S", "%Y%m%d%H%M", "%Y%m%d%H"];

/// `date()` is now; `date(str)` parses `yyyyMMdd[HH[mm[ss]]]`; `fmt` gives an
/// explicit chrono format.
fn conv_date(args: &Args, _env: &EnvironmentRef, pos: &SourcePos) -> Result<Value> {
    let Some(obj) = args.get_opt("obj") else {
        return Ok(Value::Date(Local::now().naive_local()));
    };
    if let Value::Date(date) = obj {
        return Ok(Value::Date(*date));
    }
    let text = obj.as_str(pos)?;
    let parsed = match args.get_opt("fmt") {
        Some(fmt) => {
            let fmt = fmt.as_str(pos)?;
            NaiveDateTime::parse_from_str(&text, &fmt).ok().or_else(|| {
                NaiveDate::parse_from_str(&text, &fmt)
                    .ok()
                    .and_then(|date| date.and_hms_opt(0, 0, 0))
            })
        }
        None => DATE_FORMATS
            .iter()
            .find_map(|fmt| NaiveDateTime::parse_from_str(&text, fmt).ok())
            .or_else(|| {
                NaiveDate::parse_from_str(&text, "%Y%m%d")
                    .ok()
                    .and_then(|date| date.and_hms_opt(0, 0, 0))
            }),
    };
    parsed
        .map(Value::Date)
        .ok_or_else(|| CheckerError::runtime(format!("cannot parse date '{text}'"), pos))
}

fn output_stream(args: &Args, env: &EnvironmentRef, pos: &SourcePos) -> Result<Value> {
    let out = match args.get_opt("out") {
        Some(out) => out.clone(),
        None => Environment::get(env, "stdout", pos)?,
    };
    match out {
        Value::Output(_) => Ok(out),
        other => Err(CheckerError::runtime(
            format!("expected output but got {}", other.type_name()),
            pos,
        )),
    }
}

fn write_to(args: &Args, env: &EnvironmentRef, pos: &SourcePos, newline: bool) -> Result<Value> {
    let mut text = match args.get_opt("obj") {
        Some(obj) => obj.to_text(),
        None => String::new(),
    };
    if newline {
        text.push('\n');
    }
    if let Value::Output(stream) = output_stream(args, env, pos)? {
        stream.borrow_mut().write_str(&text)?;
    }
    Ok(Value::Null)
}

fn io_println(args: &Args, env: &EnvironmentRef, pos: &SourcePos) -> Result<Value> {
    write_to(args, env, pos, true)
}

fn io_print(args: &Args, env: &EnvironmentRef, pos: &SourcePos) -> Result<Value> {
    write_to(args, env, pos, false)
}

fn io_str_input(args: &Args, _env: &EnvironmentRef, pos: &SourcePos) -> Result<Value> {
    Ok(Value::input(InputStream::from_string(&args.get_str("str", pos)?)))
}

/// Next line of `input` (default `stdin`), NULL at end of stream.
fn io_read_line(args: &Args, env: &EnvironmentRef, pos: &SourcePos) -> Result<Value> {
    let input = match args.get_opt("input") {
        Some(input) => input.clone(),
        None => Environment::get(env, "stdin", pos)?,
    };
    let Value::Input(stream) = &input else {
        return Err(CheckerError::runtime(
            format!("expected input but got {}", input.type_name()),
            pos,
        ));
    };
    let line = stream.borrow_mut().read_line()?;
    Ok(line.map(Value::string).unwrap_or(Value::Null))
}

fn meta_parse(args: &Args, _env: &EnvironmentRef, pos: &SourcePos) -> Result<Value> {
    let source = args.get_str("str", pos)?;
    let node = parser::parse_script(&source, &pos.file)?;
    Ok(Value::Node(Rc::new(node)))
}

/// Evaluates source text or a parsed node in a child of the caller's scope.
fn meta_eval(args: &Args, env: &EnvironmentRef, pos: &SourcePos) -> Result<Value> {
    match args.get("obj", pos)? {
        Value::Node(node) => evaluate_in_child(node, env),
        Value::String(source) => {
            let node = parser::parse_script(source, &pos.file)?;
            evaluate_in_child(&node, env)
        }
        other => Err(CheckerError::runtime(
            format!("cannot evaluate {}", other.type_name()),
            pos,
        )),
    }
}
