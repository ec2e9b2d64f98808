use std::{cell::RefCell, rc::Rc};

use tracing::trace;
use unicode_segmentation::UnicodeSegmentation;

use crate::{
    ast::{
        Argument, Block, ComprehensionKind, ForLoop, IterationKind, MapItem, Node, NodeKind,
    },
    collections::{ValueMap, ValueSet},
    diagnostics::{CheckerError, Diagnostic, Result, SourcePos},
    environment::{Environment, EnvironmentRef, ModuleResolver, NoModules},
    modules,
    parser,
    stdlib,
    value::{Args, Function, InputStream, Lambda, NativeFunction, ObjectValue, Value},
};

/// Name bound to the caught error inside a `catch` handler.
pub const LAST_ERROR: &str = "last_error";

#[derive(Debug, Clone)]
pub struct ExecutionContext {
    /// Source unit name used in positions.
    pub filename: String,
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self {
            filename: "{main}".to_string(),
        }
    }
}

/// Owns one base environment (natives plus module registry) and a user
/// frame on top of it. Separate interpreters share nothing.
pub struct Interpreter {
    base: EnvironmentRef,
    env: EnvironmentRef,
    context: ExecutionContext,
}

impl Interpreter {
    pub fn new() -> Self {
        Self::with_context(ExecutionContext::default())
    }

    pub fn with_context(context: ExecutionContext) -> Self {
        Self::with_resolver(NoModules, context)
    }

    pub fn with_resolver(resolver: impl ModuleResolver + 'static, context: ExecutionContext) -> Self {
        let base = Environment::with_resolver(Box::new(resolver));
        stdlib::install(&base);
        let env = Environment::with_parent(Rc::clone(&base));
        Self { base, env, context }
    }

    pub fn context(&self) -> &ExecutionContext {
        &self.context
    }

    /// Frame user code runs in.
    pub fn environment(&self) -> EnvironmentRef {
        Rc::clone(&self.env)
    }

    pub fn base_environment(&self) -> EnvironmentRef {
        Rc::clone(&self.base)
    }

    /// Registers a host function in the base environment, where modules
    /// see it too.
    pub fn register_native(&mut self, native: NativeFunction) {
        let name = native.name.clone();
        self.base
            .borrow_mut()
            .put(name, Value::function(Function::Native(native)));
    }

    pub fn define(&mut self, name: &str, value: Value) {
        self.env.borrow_mut().put(name, value);
    }

    pub fn parse(&self, source: &str) -> Result<Node> {
        Ok(parser::parse_script(source, &self.context.filename)?)
    }

    pub fn eval_source(&mut self, source: &str) -> Result<Value> {
        let node = self.parse(source)?;
        self.eval_node(&node)
    }

    /// Evaluates `source` with positions attributed to `filename`.
    pub fn eval_named(&mut self, source: &str, filename: &str) -> Result<Value> {
        let node = parser::parse_script(source, filename)?;
        self.eval_node(&node)
    }

    pub fn eval_node(&mut self, node: &Node) -> Result<Value> {
        finish_top_level(node.evaluate(&self.env)?, &node.pos)
    }
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new()
    }
}

/// Outcome of evaluating one node: a value, or a control-flow sentinel
/// travelling towards the loop or lambda that handles it.
#[derive(Debug, Clone)]
pub enum FlowControl {
    Value(Value),
    Break,
    Continue,
    Return(Value),
}

/// Script or module result: a top-level `return` ends the script with its
/// value, while `break`/`continue` have nothing left to stop.
pub(crate) fn finish_top_level(flow: FlowControl, pos: &SourcePos) -> Result<Value> {
    match flow {
        FlowControl::Value(value) | FlowControl::Return(value) => Ok(value),
        FlowControl::Break => Err(CheckerError::runtime("`break` outside loop", pos)),
        FlowControl::Continue => Err(CheckerError::runtime("`continue` outside loop", pos)),
    }
}

/// Evaluates a sub-node, handing any sentinel straight back to the caller.
macro_rules! value {
    ($node:expr, $env:expr) => {
        match $node.evaluate($env)? {
            FlowControl::Value(value) => value,
            flow => return Ok(flow),
        }
    };
}

/// For positions that must produce a value, such as arguments.
fn evaluate_value(node: &Node, env: &EnvironmentRef) -> Result<Value> {
    match node.evaluate(env)? {
        FlowControl::Value(value) => Ok(value),
        FlowControl::Return(_) => Err(CheckerError::runtime(
            "`return` is not allowed here",
            &node.pos,
        )),
        FlowControl::Break => Err(CheckerError::runtime("`break` outside loop", &node.pos)),
        FlowControl::Continue => Err(CheckerError::runtime("`continue` outside loop", &node.pos)),
    }
}

fn evaluate_bool(node: &Node, env: &EnvironmentRef) -> Result<bool> {
    evaluate_value(node, env)?.as_bool(&node.pos)
}

impl Node {
    pub fn evaluate(&self, env: &EnvironmentRef) -> Result<FlowControl> {
        let pos = &self.pos;
        let value = match &self.kind {
            NodeKind::Literal(literal) => literal.to_value(),
            NodeKind::Identifier(name) => Environment::get(env, name, pos)?,
            NodeKind::Spread(_) => {
                return Err(CheckerError::runtime(
                    "spread is only allowed in literals and argument lists",
                    pos,
                ))
            }
            NodeKind::List(items) => {
                let mut values = Vec::with_capacity(items.len());
                for item in items {
                    match &item.kind {
                        NodeKind::Spread(inner) => {
                            values.extend(value!(inner, env).elements(&inner.pos)?)
                        }
                        _ => values.push(value!(item, env)),
                    }
                }
                Value::list(values)
            }
            NodeKind::Set(items) => {
                let mut values = ValueSet::new();
                for item in items {
                    match &item.kind {
                        NodeKind::Spread(inner) => {
                            for element in value!(inner, env).elements(&inner.pos)? {
                                values.insert(element);
                            }
                        }
                        _ => {
                            values.insert(value!(item, env));
                        }
                    }
                }
                Value::set(values)
            }
            NodeKind::Map(items) => {
                let mut entries = ValueMap::new();
                for item in items {
                    match item {
                        MapItem::Entry(key, value) => {
                            let key = value!(key, env);
                            entries.insert(key, value!(value, env));
                        }
                        MapItem::Spread(inner) => {
                            for (key, value) in spread_pairs(&value!(inner, env), &inner.pos)? {
                                entries.insert(key, value);
                            }
                        }
                    }
                }
                Value::map(entries)
            }
            NodeKind::Object(members) => {
                let mut object = ObjectValue::new();
                for (name, value) in members {
                    object.members.insert(name.clone(), value!(value, env));
                }
                Value::object(object)
            }
            NodeKind::Comprehension(comprehension) => {
                let source = value!(comprehension.source, env);
                let scope = Environment::with_parent(Rc::clone(env));
                let mut iteration = Iteration::over(&source, IterationKind::Default, pos)?;
                let mut list = Vec::new();
                let mut set = ValueSet::new();
                let mut map = ValueMap::new();
                while let Some(item) = iteration.next_item()? {
                    scope.borrow_mut().put(comprehension.var.as_str(), item);
                    if let Some(condition) = &comprehension.condition {
                        if !evaluate_bool(condition, &scope)? {
                            continue;
                        }
                    }
                    let element = evaluate_value(&comprehension.element, &scope)?;
                    match (comprehension.kind, &comprehension.value) {
                        (ComprehensionKind::List, _) => list.push(element),
                        (ComprehensionKind::Set, _) => {
                            set.insert(element);
                        }
                        (ComprehensionKind::Map, Some(value)) => {
                            map.insert(element, evaluate_value(value, &scope)?);
                        }
                        (ComprehensionKind::Map, None) => {
                            map.insert(element, Value::Null);
                        }
                    }
                }
                match comprehension.kind {
                    ComprehensionKind::List => Value::list(list),
                    ComprehensionKind::Set => Value::set(set),
                    ComprehensionKind::Map => Value::map(map),
                }
            }
            NodeKind::Block(block) => return evaluate_block(block, env),
            NodeKind::If {
                branches,
                otherwise,
            } => {
                for (condition, body) in branches {
                    if value!(condition, env).as_bool(&condition.pos)? {
                        return body.evaluate(env);
                    }
                }
                match otherwise {
                    Some(otherwise) => return otherwise.evaluate(env),
                    None => Value::Null,
                }
            }
            NodeKind::And(left, right) => {
                let result = value!(left, env).as_bool(&left.pos)?
                    && value!(right, env).as_bool(&right.pos)?;
                Value::Boolean(result)
            }
            NodeKind::Or(left, right) => {
                let result = value!(left, env).as_bool(&left.pos)?
                    || value!(right, env).as_bool(&right.pos)?;
                Value::Boolean(result)
            }
            NodeKind::Not(operand) => Value::Boolean(!value!(operand, env).as_bool(&operand.pos)?),
            NodeKind::In { element, container } => {
                let element = value!(element, env);
                Value::Boolean(value!(container, env).contains(&element, pos)?)
            }
            NodeKind::Funcall { callee, args } => {
                let function = value!(callee, env).as_function(&callee.pos)?;
                let args = evaluate_arguments(args, env)?;
                call_function(&function, args, env, pos)?
            }
            NodeKind::Deref { target, index } => {
                let target = value!(target, env);
                let index = value!(index, env);
                deref(&target, &index, pos)?
            }
            NodeKind::DerefAssign {
                target,
                index,
                value,
            } => {
                let target = value!(target, env);
                let index = value!(index, env);
                let value = value!(value, env);
                deref_assign(&target, index, value.clone(), pos)?;
                value
            }
            NodeKind::DerefInvoke {
                target,
                member,
                args,
            } => {
                let target = value!(target, env);
                let function = member_function(&target, member, pos)?;
                let args = evaluate_arguments(args, env)?;
                call_function(&function, args, env, pos)?
            }
            NodeKind::Assign { name, value } => {
                let value = value!(value, env);
                Environment::set(env, name, value.clone(), pos)?;
                value
            }
            NodeKind::AssignDestructuring { names, value } => {
                let value = value!(value, env);
                for (name, element) in names.iter().zip(destructure(&value, names.len(), pos)?) {
                    Environment::set(env, name, element, pos)?;
                }
                value
            }
            NodeKind::Def { name, value } => {
                let value = value!(value, env);
                env.borrow_mut().put(name.as_str(), value.clone());
                value
            }
            NodeKind::DefDestructuring { names, value } => {
                let value = value!(value, env);
                let elements = destructure(&value, names.len(), pos)?;
                let mut scope = env.borrow_mut();
                for (name, element) in names.iter().zip(elements) {
                    scope.put(name.as_str(), element);
                }
                value
            }
            NodeKind::Lambda(def) => Value::function(Function::Lambda(Lambda {
                def: Rc::clone(def),
                env: Rc::clone(env),
            })),
            NodeKind::For(for_loop) => return evaluate_for(for_loop, env, pos),
            NodeKind::While { condition, body } => {
                let mut last = Value::Null;
                while value!(condition, env).as_bool(&condition.pos)? {
                    match body.evaluate(env)? {
                        FlowControl::Value(value) => last = value,
                        FlowControl::Break => break,
                        FlowControl::Continue => continue,
                        FlowControl::Return(value) => return Ok(FlowControl::Return(value)),
                    }
                }
                last
            }
            NodeKind::Break => return Ok(FlowControl::Break),
            NodeKind::Continue => return Ok(FlowControl::Continue),
            NodeKind::Return(value) => {
                let value = match value {
                    Some(value) => value!(value, env),
                    None => Value::Null,
                };
                return Ok(FlowControl::Return(value));
            }
            NodeKind::Error(payload) => {
                let payload = value!(payload, env);
                return Err(Diagnostic::user(payload, pos).into());
            }
            NodeKind::Require(require) => modules::require(require, env, pos)?,
        };
        Ok(FlowControl::Value(value))
    }
}

/// Runs nodes in order; the first sentinel stops the sequence.
fn evaluate_sequence(nodes: &[Node], env: &EnvironmentRef) -> Result<FlowControl> {
    let mut last = Value::Null;
    for node in nodes {
        match node.evaluate(env)? {
            FlowControl::Value(value) => last = value,
            flow => return Ok(flow),
        }
    }
    Ok(FlowControl::Value(last))
}

fn evaluate_block(block: &Block, env: &EnvironmentRef) -> Result<FlowControl> {
    let mut outcome = evaluate_sequence(&block.body, env);
    if !block.catches.is_empty() {
        if let Err(err) = outcome {
            outcome = handle_error(block, env, err);
        }
    }
    if !block.finally.is_empty() {
        evaluate_sequence(&block.finally, env)?;
    }
    outcome
}

/// Runs the first matching catch clause with `last_error` bound to the
/// payload (user errors) or the message (runtime errors).
fn handle_error(block: &Block, env: &EnvironmentRef, err: CheckerError) -> Result<FlowControl> {
    let (payload, caught) = match &err {
        CheckerError::Diagnostic(diagnostic) if diagnostic.kind.is_syntax() => return Err(err),
        CheckerError::Diagnostic(diagnostic) => match &diagnostic.payload {
            Some(payload) => (Some(payload.clone()), payload.clone()),
            None => (None, Value::string(diagnostic.message.clone())),
        },
        CheckerError::Io(io) => (None, Value::string(io.to_string())),
    };
    for clause in &block.catches {
        let matched = match &clause.filter {
            None => true,
            Some(filter) => {
                let expected = evaluate_value(filter, env)?;
                payload
                    .as_ref()
                    .is_some_and(|payload| payload.is_equals(&expected))
            }
        };
        if !matched {
            continue;
        }
        let previous = env.borrow_mut().remove(LAST_ERROR);
        env.borrow_mut().put(LAST_ERROR, caught);
        let result = evaluate_sequence(&clause.body, env);
        let mut scope = env.borrow_mut();
        scope.remove(LAST_ERROR);
        if let Some(previous) = previous {
            scope.put(LAST_ERROR, previous);
        }
        return result;
    }
    Err(err)
}

fn evaluate_for(for_loop: &ForLoop, env: &EnvironmentRef, pos: &SourcePos) -> Result<FlowControl> {
    let source = value!(for_loop.source, env);
    let mut iteration = Iteration::over(&source, for_loop.what, pos)?;
    let shadowed: Vec<(String, Option<Value>)> = for_loop
        .names
        .iter()
        .map(|name| (name.clone(), env.borrow().get_local(name).cloned()))
        .collect();

    let outcome = run_loop(for_loop, env, &mut iteration, pos);

    let mut scope = env.borrow_mut();
    for (name, previous) in shadowed {
        scope.remove(&name);
        if let Some(previous) = previous {
            scope.put(name, previous);
        }
    }
    outcome
}

fn run_loop(
    for_loop: &ForLoop,
    env: &EnvironmentRef,
    iteration: &mut Iteration,
    pos: &SourcePos,
) -> Result<FlowControl> {
    let mut last = Value::Null;
    while let Some(item) = iteration.next_item()? {
        if for_loop.destructure {
            let elements = destructure(&item, for_loop.names.len(), pos)?;
            let mut scope = env.borrow_mut();
            for (name, element) in for_loop.names.iter().zip(elements) {
                scope.put(name.as_str(), element);
            }
        } else if let Some(name) = for_loop.names.first() {
            env.borrow_mut().put(name.as_str(), item);
        }
        match for_loop.body.evaluate(env)? {
            FlowControl::Value(value) => last = value,
            FlowControl::Break => break,
            FlowControl::Continue => continue,
            FlowControl::Return(value) => return Ok(FlowControl::Return(value)),
        }
    }
    Ok(FlowControl::Value(last))
}

/// Source of loop and comprehension items.
enum Iteration {
    Items(std::vec::IntoIter<Value>),
    Lines(Rc<RefCell<InputStream>>),
}

impl Iteration {
    fn over(source: &Value, what: IterationKind, pos: &SourcePos) -> Result<Self> {
        let items = match source {
            Value::Input(input) => return Ok(Iteration::Lines(Rc::clone(input))),
            Value::List(items) => {
                let items = items.borrow();
                match what {
                    IterationKind::Default | IterationKind::Values => items.clone(),
                    IterationKind::Keys => (0..items.len() as i64).map(Value::Int).collect(),
                    IterationKind::Entries => items
                        .iter()
                        .enumerate()
                        .map(|(idx, item)| Value::list(vec![Value::Int(idx as i64), item.clone()]))
                        .collect(),
                }
            }
            Value::Set(items) => items.borrow().sorted(),
            Value::Map(entries) => {
                let entries = entries.borrow();
                match what {
                    IterationKind::Default | IterationKind::Keys => entries.sorted_keys(),
                    IterationKind::Values => entries.sorted_values(),
                    IterationKind::Entries => entries
                        .sorted_entries()
                        .into_iter()
                        .map(|(key, value)| Value::list(vec![key, value]))
                        .collect(),
                }
            }
            Value::Object(object) => {
                let object = object.borrow();
                let members = object.members.iter();
                match what {
                    IterationKind::Default | IterationKind::Keys => {
                        members.map(|(name, _)| Value::string(name.as_str())).collect()
                    }
                    IterationKind::Values => members.map(|(_, value)| value.clone()).collect(),
                    IterationKind::Entries => members
                        .map(|(name, value)| {
                            Value::list(vec![Value::string(name.as_str()), value.clone()])
                        })
                        .collect(),
                }
            }
            Value::String(text) => text.graphemes(true).map(Value::string).collect(),
            other => {
                return Err(CheckerError::runtime(
                    format!("cannot iterate over {}", other.type_name()),
                    pos,
                ))
            }
        };
        Ok(Iteration::Items(items.into_iter()))
    }

    fn next_item(&mut self) -> Result<Option<Value>> {
        match self {
            Iteration::Items(items) => Ok(items.next()),
            Iteration::Lines(input) => Ok(input.borrow_mut().read_line()?.map(Value::string)),
        }
    }
}

/// Splits a list or set into exactly `count` values, padding with NULL.
fn destructure(value: &Value, count: usize, pos: &SourcePos) -> Result<Vec<Value>> {
    let mut elements = value.elements(pos)?;
    elements.resize(count.max(elements.len()), Value::Null);
    elements.truncate(count);
    Ok(elements)
}

/// Key/value pairs contributed by spreading a map or object.
fn spread_pairs(value: &Value, pos: &SourcePos) -> Result<Vec<(Value, Value)>> {
    match value {
        Value::Map(entries) => Ok(entries.borrow().sorted_entries()),
        Value::Object(object) => Ok(object
            .borrow()
            .members
            .iter()
            .map(|(name, value)| (Value::string(name.as_str()), value.clone()))
            .collect()),
        other => Err(CheckerError::runtime(
            format!("cannot spread {} into a map", other.type_name()),
            pos,
        )),
    }
}

/// Evaluates call arguments left to right. Spread lists and sets become
/// positional values, spread maps and objects named ones.
fn evaluate_arguments(
    args: &[Argument],
    env: &EnvironmentRef,
) -> Result<Vec<(Option<String>, Value)>> {
    let mut values = Vec::with_capacity(args.len());
    for arg in args {
        match (&arg.name, &arg.value.kind) {
            (None, NodeKind::Spread(inner)) => {
                let spread = evaluate_value(inner, env)?;
                match &spread {
                    Value::List(_) | Value::Set(_) => {
                        values.extend(spread.elements(&inner.pos)?.into_iter().map(|v| (None, v)));
                    }
                    _ => {
                        for (key, value) in spread_pairs(&spread, &inner.pos)? {
                            values.push((Some(key.to_text()), value));
                        }
                    }
                }
            }
            (name, _) => values.push((name.clone(), evaluate_value(&arg.value, env)?)),
        }
    }
    Ok(values)
}

/// Parameter bindings produced by [`bind_arguments`].
struct Bindings {
    params: Vec<(String, Value)>,
    rest: Option<(String, Vec<Value>)>,
}

/// Named arguments bind first; positional arguments then fill the first
/// unbound parameters left to right and overflow into the rest parameter.
fn bind_arguments(
    function: &Function,
    args: Vec<(Option<String>, Value)>,
    pos: &SourcePos,
) -> Result<Bindings> {
    let (params, rest) = function.signature();
    let mut slots: Vec<Option<Value>> = vec![None; params.len()];
    let mut extra_named = Vec::new();
    let mut positional = Vec::new();

    for (name, value) in args {
        let Some(name) = name else {
            positional.push(value);
            continue;
        };
        match params.iter().position(|param| *param == name) {
            Some(idx) if slots[idx].is_some() => {
                return Err(CheckerError::runtime(
                    format!("argument `{name}` bound twice in call to `{}`", function.name()),
                    pos,
                ))
            }
            Some(idx) => slots[idx] = Some(value),
            None if rest.is_some() => extra_named.push(value),
            None => {
                return Err(CheckerError::runtime(
                    format!("unknown argument `{name}` for `{}`", function.name()),
                    pos,
                ))
            }
        }
    }

    let mut rest_values = Vec::new();
    for value in positional {
        match slots.iter_mut().find(|slot| slot.is_none()) {
            Some(slot) => *slot = Some(value),
            None if rest.is_some() => rest_values.push(value),
            None => {
                return Err(CheckerError::runtime(
                    format!("too many arguments for `{}`", function.name()),
                    pos,
                ))
            }
        }
    }
    rest_values.extend(extra_named);

    Ok(Bindings {
        params: params
            .into_iter()
            .zip(slots)
            .filter_map(|(name, slot)| slot.map(|value| (name, value)))
            .collect(),
        rest: rest.map(|name| (name, rest_values)),
    })
}

const TRACE_ARG_WIDTH: usize = 20;

fn trace_entry(function: &Function, args: &[(Option<String>, Value)], pos: &SourcePos) -> String {
    let rendered: Vec<String> = args
        .iter()
        .map(|(name, value)| {
            let mut text = value.to_string();
            if let Some((cut, _)) = text.char_indices().nth(TRACE_ARG_WIDTH) {
                text.truncate(cut);
                text.push_str("...");
            }
            match name {
                Some(name) => format!("{name}={text}"),
                None => text,
            }
        })
        .collect();
    format!("{}({}) @ {pos}", function.name(), rendered.join(", "))
}

/// Invokes `function` with evaluated arguments. `env` is the caller's
/// environment, which natives receive; lambdas run in a fresh frame of
/// their captured environment.
pub fn call_function(
    function: &Function,
    args: Vec<(Option<String>, Value)>,
    env: &EnvironmentRef,
    pos: &SourcePos,
) -> Result<Value> {
    trace!(function = function.name(), args = args.len(), "invoke");
    let trace_args = args.clone();
    invoke(function, args, env, pos)
        .map_err(|err| err.with_trace(trace_entry(function, &trace_args, pos)))
}

fn invoke(
    function: &Function,
    args: Vec<(Option<String>, Value)>,
    env: &EnvironmentRef,
    pos: &SourcePos,
) -> Result<Value> {
    let bindings = bind_arguments(function, args, pos)?;
    match function {
        Function::Native(native) => {
            let mut args = Args::new();
            for (name, value) in bindings.params {
                args.bind(&name, value);
            }
            if let Some((name, values)) = bindings.rest {
                args.bind(&name, Value::list(values));
            }
            native.call(&args, env, pos)
        }
        Function::Lambda(lambda) => {
            let frame = Environment::with_parent(Rc::clone(&lambda.env));
            {
                let mut scope = frame.borrow_mut();
                for (name, value) in bindings.params {
                    scope.put(name, value);
                }
                if let Some((name, values)) = bindings.rest {
                    scope.put(name, Value::list(values));
                }
            }
            for param in &lambda.def.params {
                if frame.borrow().get_local(&param.name).is_some() {
                    continue;
                }
                let Some(default) = &param.default else {
                    return Err(CheckerError::runtime(
                        format!(
                            "missing argument `{}` in call to `{}`",
                            param.name,
                            function.name()
                        ),
                        pos,
                    ));
                };
                let value = evaluate_value(default, &frame)?;
                frame.borrow_mut().put(param.name.as_str(), value);
            }
            match lambda.def.body.evaluate(&frame)? {
                FlowControl::Value(value) | FlowControl::Return(value) => Ok(value),
                FlowControl::Break => Err(CheckerError::runtime(
                    "`break` outside loop",
                    &lambda.def.body.pos,
                )),
                FlowControl::Continue => Err(CheckerError::runtime(
                    "`continue` outside loop",
                    &lambda.def.body.pos,
                )),
            }
        }
    }
}

fn list_index(index: &Value, len: usize, pos: &SourcePos) -> Result<usize> {
    let raw = index.as_int(pos)?;
    let resolved = if raw < 0 { raw + len as i64 } else { raw };
    if resolved < 0 || resolved >= len as i64 {
        return Err(CheckerError::runtime(
            format!("index {raw} out of range for length {len}"),
            pos,
        ));
    }
    Ok(resolved as usize)
}

fn deref(target: &Value, index: &Value, pos: &SourcePos) -> Result<Value> {
    match target {
        Value::List(items) => {
            let items = items.borrow();
            Ok(items[list_index(index, items.len(), pos)?].clone())
        }
        Value::String(text) => {
            let graphemes: Vec<&str> = text.graphemes(true).collect();
            let idx = list_index(index, graphemes.len(), pos)?;
            Ok(Value::string(graphemes[idx]))
        }
        Value::Map(entries) => entries.borrow().get(index).cloned().ok_or_else(|| {
            CheckerError::runtime(format!("key {index} not found in map"), pos)
        }),
        Value::Object(object) => {
            let name = index.as_str(pos)?;
            object.borrow().members.get(&*name).cloned().ok_or_else(|| {
                CheckerError::runtime(format!("object has no member `{name}`"), pos)
            })
        }
        other => Err(CheckerError::runtime(
            format!("cannot index into {}", other.type_name()),
            pos,
        )),
    }
}

fn deref_assign(target: &Value, index: Value, value: Value, pos: &SourcePos) -> Result<()> {
    match target {
        Value::List(items) => {
            let mut items = items.borrow_mut();
            let idx = list_index(&index, items.len(), pos)?;
            items[idx] = value;
        }
        Value::Map(entries) => {
            if index.reaches(target) {
                return Err(CheckerError::runtime("cannot use a map as its own key", pos));
            }
            ValueMap::insert_shared(entries, index, value);
        }
        Value::Object(object) => {
            let name = index.as_str(pos)?;
            object.borrow_mut().members.insert(name.to_string(), value);
        }
        other => {
            return Err(CheckerError::runtime(
                format!("cannot assign into {}", other.type_name()),
                pos,
            ))
        }
    }
    Ok(())
}

fn member_function(target: &Value, member: &str, pos: &SourcePos) -> Result<Rc<Function>> {
    let found = match target {
        Value::Object(object) => object.borrow().members.get(member).cloned(),
        Value::Map(entries) => entries.borrow().get(&Value::string(member)).cloned(),
        other => {
            return Err(CheckerError::runtime(
                format!("cannot invoke `{member}` on {}", other.type_name()),
                pos,
            ))
        }
    };
    found
        .ok_or_else(|| CheckerError::runtime(format!("no member `{member}` to invoke"), pos))?
        .as_function(pos)
}

/// Evaluates a parsed node in a child of `env`, for `eval`.
pub(crate) fn evaluate_in_child(node: &Node, env: &EnvironmentRef) -> Result<Value> {
    let scope = Environment::with_parent(Rc::clone(env));
    finish_top_level(node.evaluate(&scope)?, &node.pos)
}
