use std::{collections::HashSet, fmt, rc::Rc};

use crate::{
    diagnostics::SourcePos,
    modules::module_identifier,
    runtime::LAST_ERROR,
    value::{PatternValue, Value},
};

#[derive(Debug, Clone)]
pub enum Literal {
    Boolean(bool),
    Int(i64),
    Decimal(f64),
    String(Rc<str>),
    Pattern(Rc<PatternValue>),
}

impl Literal {
    pub fn to_value(&self) -> Value {
        match self {
            Literal::Boolean(b) => Value::Boolean(*b),
            Literal::Int(n) => Value::Int(*n),
            Literal::Decimal(n) => Value::Decimal(*n),
            Literal::String(s) => Value::String(Rc::clone(s)),
            Literal::Pattern(p) => Value::Pattern(Rc::clone(p)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Node {
    pub kind: NodeKind,
    pub pos: SourcePos,
}

impl Node {
    pub fn new(kind: NodeKind, pos: SourcePos) -> Self {
        Self { kind, pos }
    }
}

#[derive(Debug, Clone)]
pub enum NodeKind {
    Literal(Literal),
    Identifier(String),
    /// `...expr` inside a literal or argument list.
    Spread(Box<Node>),
    List(Vec<Node>),
    Set(Vec<Node>),
    Map(Vec<MapItem>),
    Object(Vec<(String, Node)>),
    Comprehension(Box<Comprehension>),
    Block(Box<Block>),
    If {
        branches: Vec<(Node, Node)>,
        otherwise: Option<Box<Node>>,
    },
    And(Box<Node>, Box<Node>),
    Or(Box<Node>, Box<Node>),
    Not(Box<Node>),
    In {
        element: Box<Node>,
        container: Box<Node>,
    },
    Funcall {
        callee: Box<Node>,
        args: Vec<Argument>,
    },
    Deref {
        target: Box<Node>,
        index: Box<Node>,
    },
    DerefAssign {
        target: Box<Node>,
        index: Box<Node>,
        value: Box<Node>,
    },
    DerefInvoke {
        target: Box<Node>,
        member: String,
        args: Vec<Argument>,
    },
    Assign {
        name: String,
        value: Box<Node>,
    },
    AssignDestructuring {
        names: Vec<String>,
        value: Box<Node>,
    },
    Def {
        name: String,
        value: Box<Node>,
    },
    DefDestructuring {
        names: Vec<String>,
        value: Box<Node>,
    },
    Lambda(Rc<LambdaDef>),
    For(Box<ForLoop>),
    While {
        condition: Box<Node>,
        body: Box<Node>,
    },
    Break,
    Continue,
    Return(Option<Box<Node>>),
    Error(Box<Node>),
    Require(Box<Require>),
}

#[derive(Debug, Clone)]
pub enum MapItem {
    Entry(Node, Node),
    Spread(Node),
}

/// Call argument; spread arguments carry a `Spread` node.
#[derive(Debug, Clone)]
pub struct Argument {
    pub name: Option<String>,
    pub value: Node,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComprehensionKind {
    List,
    Set,
    Map,
}

#[derive(Debug, Clone)]
pub struct Comprehension {
    pub kind: ComprehensionKind,
    pub element: Node,
    /// Value expression of a map comprehension.
    pub value: Option<Node>,
    pub var: String,
    pub source: Node,
    pub condition: Option<Node>,
}

#[derive(Debug, Clone)]
pub struct Block {
    pub body: Vec<Node>,
    pub catches: Vec<CatchClause>,
    pub finally: Vec<Node>,
}

/// `catch all` has no filter; `catch expr` matches user error payloads.
#[derive(Debug, Clone)]
pub struct CatchClause {
    pub filter: Option<Node>,
    pub body: Vec<Node>,
}

#[derive(Debug, Clone)]
pub struct Param {
    pub name: String,
    pub default: Option<Node>,
}

#[derive(Debug)]
pub struct LambdaDef {
    pub name: Option<String>,
    pub params: Vec<Param>,
    pub rest: Option<String>,
    pub body: Node,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IterationKind {
    Default,
    Keys,
    Values,
    Entries,
}

#[derive(Debug, Clone)]
pub struct ForLoop {
    pub names: Vec<String>,
    pub destructure: bool,
    pub what: IterationKind,
    pub source: Node,
    pub body: Node,
}

#[derive(Debug, Clone)]
pub enum RequireStyle {
    Qualified(Option<String>),
    Unqualified,
    Import(Vec<(String, String)>),
}

#[derive(Debug, Clone)]
pub struct Require {
    pub module: Node,
    pub style: RequireStyle,
}

impl Node {
    /// Classifies every identifier reference below this node as bound or
    /// free. `additional_bound` holds names defined by sibling `def`s of an
    /// enclosing block, which are visible before their definition.
    pub fn collect_vars(
        &self,
        free: &mut HashSet<String>,
        bound: &mut HashSet<String>,
        additional_bound: &HashSet<String>,
    ) {
        let mut mark = |name: &str, free: &mut HashSet<String>, bound: &HashSet<String>| {
            if !bound.contains(name) && !additional_bound.contains(name) {
                free.insert(name.to_string());
            }
        };
        match &self.kind {
            NodeKind::Literal(_) | NodeKind::Break | NodeKind::Continue => {}
            NodeKind::Identifier(name) => mark(name, free, bound),
            NodeKind::Spread(inner) | NodeKind::Not(inner) | NodeKind::Error(inner) => {
                inner.collect_vars(free, bound, additional_bound);
            }
            NodeKind::List(items) | NodeKind::Set(items) => {
                for item in items {
                    item.collect_vars(free, bound, additional_bound);
                }
            }
            NodeKind::Map(items) => {
                for item in items {
                    match item {
                        MapItem::Entry(key, value) => {
                            key.collect_vars(free, bound, additional_bound);
                            value.collect_vars(free, bound, additional_bound);
                        }
                        MapItem::Spread(inner) => inner.collect_vars(free, bound, additional_bound),
                    }
                }
            }
            NodeKind::Object(members) => {
                for (_, value) in members {
                    value.collect_vars(free, bound, additional_bound);
                }
            }
            NodeKind::Comprehension(comprehension) => {
                comprehension
                    .source
                    .collect_vars(free, bound, additional_bound);
                let mut inner = bound.clone();
                inner.insert(comprehension.var.clone());
                comprehension
                    .element
                    .collect_vars(free, &mut inner, additional_bound);
                for node in comprehension
                    .value
                    .iter()
                    .chain(comprehension.condition.iter())
                {
                    node.collect_vars(free, &mut inner, additional_bound);
                }
            }
            NodeKind::Block(block) => {
                let mut siblings = additional_bound.clone();
                for node in &block.body {
                    match &node.kind {
                        NodeKind::Def { name, .. } => {
                            siblings.insert(name.clone());
                        }
                        NodeKind::DefDestructuring { names, .. } => {
                            siblings.extend(names.iter().cloned());
                        }
                        _ => {}
                    }
                }
                for node in block.body.iter().chain(block.finally.iter()) {
                    node.collect_vars(free, bound, &siblings);
                }
                if !block.catches.is_empty() {
                    let mut handler_bound = bound.clone();
                    handler_bound.insert(LAST_ERROR.to_string());
                    for clause in &block.catches {
                        if let Some(filter) = &clause.filter {
                            filter.collect_vars(free, bound, &siblings);
                        }
                        for node in &clause.body {
                            node.collect_vars(free, &mut handler_bound, &siblings);
                        }
                    }
                }
            }
            NodeKind::If {
                branches,
                otherwise,
            } => {
                for (condition, body) in branches {
                    condition.collect_vars(free, bound, additional_bound);
                    body.collect_vars(free, bound, additional_bound);
                }
                if let Some(otherwise) = otherwise {
                    otherwise.collect_vars(free, bound, additional_bound);
                }
            }
            NodeKind::And(left, right) | NodeKind::Or(left, right) => {
                left.collect_vars(free, bound, additional_bound);
                right.collect_vars(free, bound, additional_bound);
            }
            NodeKind::In { element, container } => {
                element.collect_vars(free, bound, additional_bound);
                container.collect_vars(free, bound, additional_bound);
            }
            NodeKind::Funcall { callee, args } => {
                callee.collect_vars(free, bound, additional_bound);
                for arg in args {
                    arg.value.collect_vars(free, bound, additional_bound);
                }
            }
            NodeKind::Deref { target, index } => {
                target.collect_vars(free, bound, additional_bound);
                index.collect_vars(free, bound, additional_bound);
            }
            NodeKind::DerefAssign {
                target,
                index,
                value,
            } => {
                target.collect_vars(free, bound, additional_bound);
                index.collect_vars(free, bound, additional_bound);
                value.collect_vars(free, bound, additional_bound);
            }
            NodeKind::DerefInvoke { target, args, .. } => {
                target.collect_vars(free, bound, additional_bound);
                for arg in args {
                    arg.value.collect_vars(free, bound, additional_bound);
                }
            }
            NodeKind::Assign { name, value } => {
                value.collect_vars(free, bound, additional_bound);
                mark(name, free, bound);
            }
            NodeKind::AssignDestructuring { names, value } => {
                value.collect_vars(free, bound, additional_bound);
                for name in names {
                    mark(name, free, bound);
                }
            }
            NodeKind::Def { name, value } => {
                value.collect_vars(free, bound, additional_bound);
                bound.insert(name.clone());
            }
            NodeKind::DefDestructuring { names, value } => {
                value.collect_vars(free, bound, additional_bound);
                bound.extend(names.iter().cloned());
            }
            NodeKind::Lambda(def) => {
                let mut inner = bound.clone();
                inner.extend(def.params.iter().map(|param| param.name.clone()));
                inner.extend(def.rest.iter().cloned());
                for param in &def.params {
                    if let Some(default) = &param.default {
                        default.collect_vars(free, &mut inner, additional_bound);
                    }
                }
                def.body.collect_vars(free, &mut inner, additional_bound);
            }
            NodeKind::For(for_loop) => {
                for_loop.source.collect_vars(free, bound, additional_bound);
                let mut inner = bound.clone();
                inner.extend(for_loop.names.iter().cloned());
                for_loop.body.collect_vars(free, &mut inner, additional_bound);
            }
            NodeKind::While { condition, body } => {
                condition.collect_vars(free, bound, additional_bound);
                body.collect_vars(free, bound, additional_bound);
            }
            NodeKind::Return(value) => {
                if let Some(value) = value {
                    value.collect_vars(free, bound, additional_bound);
                }
            }
            NodeKind::Require(require) => match &require.style {
                RequireStyle::Qualified(alias) => {
                    let name = alias.clone().or_else(|| match &require.module.kind {
                        NodeKind::Identifier(name) => Some(module_identifier(name)),
                        NodeKind::Literal(Literal::String(path)) => Some(module_identifier(path)),
                        _ => None,
                    });
                    bound.extend(name);
                }
                RequireStyle::Import(symbols) => {
                    bound.extend(symbols.iter().map(|(_, alias)| alias.clone()));
                }
                RequireStyle::Unqualified => {}
            },
        }
    }

    /// Free identifiers of this node, sorted.
    pub fn free_vars(&self) -> Vec<String> {
        let mut free = HashSet::new();
        self.collect_vars(&mut free, &mut HashSet::new(), &HashSet::new());
        let mut names: Vec<String> = free.into_iter().collect();
        names.sort();
        names
    }
}

fn write_list<T>(
    f: &mut fmt::Formatter<'_>,
    items: &[T],
    mut write: impl FnMut(&mut fmt::Formatter<'_>, &T) -> fmt::Result,
) -> fmt::Result {
    for (idx, item) in items.iter().enumerate() {
        if idx > 0 {
            write!(f, ", ")?;
        }
        write(f, item)?;
    }
    Ok(())
}

fn write_args(f: &mut fmt::Formatter<'_>, args: &[Argument]) -> fmt::Result {
    write_list(f, args, |f, arg| match &arg.name {
        Some(name) => write!(f, "{name}={}", arg.value),
        None => write!(f, "{}", arg.value),
    })
}

fn write_body(f: &mut fmt::Formatter<'_>, nodes: &[Node]) -> fmt::Result {
    for node in nodes {
        write!(f, " {node};")?;
    }
    Ok(())
}

/// Prints the node back in surface syntax, with operators shown as the
/// core function calls they desugar to.
impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            NodeKind::Literal(literal) => write!(f, "{}", literal.to_value()),
            NodeKind::Identifier(name) => write!(f, "{name}"),
            NodeKind::Spread(inner) => write!(f, "...{inner}"),
            NodeKind::List(items) => {
                write!(f, "[")?;
                write_list(f, items, |f, item| write!(f, "{item}"))?;
                write!(f, "]")
            }
            NodeKind::Set(items) => {
                write!(f, "<<")?;
                write_list(f, items, |f, item| write!(f, "{item}"))?;
                write!(f, ">>")
            }
            NodeKind::Map(items) => {
                write!(f, "<<<")?;
                write_list(f, items, |f, item| match item {
                    MapItem::Entry(key, value) => write!(f, "{key} => {value}"),
                    MapItem::Spread(inner) => write!(f, "...{inner}"),
                })?;
                write!(f, ">>>")
            }
            NodeKind::Object(members) => {
                write!(f, "<*")?;
                write_list(f, members, |f, (name, value)| write!(f, "{name}={value}"))?;
                write!(f, "*>")
            }
            NodeKind::Comprehension(c) => {
                let (open, close) = match c.kind {
                    ComprehensionKind::List => ("[", "]"),
                    ComprehensionKind::Set => ("<<", ">>"),
                    ComprehensionKind::Map => ("<<<", ">>>"),
                };
                write!(f, "{open}{}", c.element)?;
                if let Some(value) = &c.value {
                    write!(f, " => {value}")?;
                }
                write!(f, " for {} in {}", c.var, c.source)?;
                if let Some(condition) = &c.condition {
                    write!(f, " if {condition}")?;
                }
                write!(f, "{close}")
            }
            NodeKind::Block(block) => {
                write!(f, "do")?;
                write_body(f, &block.body)?;
                for clause in &block.catches {
                    match &clause.filter {
                        Some(filter) => write!(f, " catch {filter}")?,
                        None => write!(f, " catch all")?,
                    }
                    write_body(f, &clause.body)?;
                }
                if !block.finally.is_empty() {
                    write!(f, " finally")?;
                    write_body(f, &block.finally)?;
                }
                write!(f, " end")
            }
            NodeKind::If {
                branches,
                otherwise,
            } => {
                for (idx, (condition, body)) in branches.iter().enumerate() {
                    let keyword = if idx == 0 { "if" } else { " elif" };
                    write!(f, "{keyword} {condition} then {body}")?;
                }
                if let Some(otherwise) = otherwise {
                    write!(f, " else {otherwise}")?;
                }
                Ok(())
            }
            NodeKind::And(left, right) => write!(f, "({left} and {right})"),
            NodeKind::Or(left, right) => write!(f, "({left} or {right})"),
            NodeKind::Not(inner) => write!(f, "not {inner}"),
            NodeKind::In { element, container } => write!(f, "({element} in {container})"),
            NodeKind::Funcall { callee, args } => {
                write!(f, "{callee}(")?;
                write_args(f, args)?;
                write!(f, ")")
            }
            NodeKind::Deref { target, index } => write!(f, "{target}[{index}]"),
            NodeKind::DerefAssign {
                target,
                index,
                value,
            } => write!(f, "{target}[{index}] = {value}"),
            NodeKind::DerefInvoke {
                target,
                member,
                args,
            } => {
                write!(f, "{target}->{member}(")?;
                write_args(f, args)?;
                write!(f, ")")
            }
            NodeKind::Assign { name, value } => write!(f, "{name} = {value}"),
            NodeKind::AssignDestructuring { names, value } => {
                write!(f, "[{}] = {value}", names.join(", "))
            }
            NodeKind::Def { name, value } => write!(f, "def {name} = {value}"),
            NodeKind::DefDestructuring { names, value } => {
                write!(f, "def [{}] = {value}", names.join(", "))
            }
            NodeKind::Lambda(def) => {
                write!(f, "fn(")?;
                write_list(f, &def.params, |f, param| match &param.default {
                    Some(default) => write!(f, "{}={default}", param.name),
                    None => write!(f, "{}", param.name),
                })?;
                if let Some(rest) = &def.rest {
                    if !def.params.is_empty() {
                        write!(f, ", ")?;
                    }
                    write!(f, "{rest}...")?;
                }
                write!(f, ") {}", def.body)
            }
            NodeKind::For(for_loop) => {
                let names = if for_loop.destructure {
                    format!("[{}]", for_loop.names.join(", "))
                } else {
                    for_loop.names.join(", ")
                };
                let what = match for_loop.what {
                    IterationKind::Default => "",
                    IterationKind::Keys => "keys ",
                    IterationKind::Values => "values ",
                    IterationKind::Entries => "entries ",
                };
                write!(
                    f,
                    "for {names} in {what}{} {}",
                    for_loop.source, for_loop.body
                )
            }
            NodeKind::While { condition, body } => write!(f, "while {condition} {body}"),
            NodeKind::Break => write!(f, "break"),
            NodeKind::Continue => write!(f, "continue"),
            NodeKind::Return(Some(value)) => write!(f, "return {value}"),
            NodeKind::Return(None) => write!(f, "return"),
            NodeKind::Error(value) => write!(f, "error {value}"),
            NodeKind::Require(require) => {
                write!(f, "require {}", require.module)?;
                match &require.style {
                    RequireStyle::Qualified(Some(alias)) => write!(f, " as {alias}"),
                    RequireStyle::Qualified(None) => Ok(()),
                    RequireStyle::Unqualified => write!(f, " unqualified"),
                    RequireStyle::Import(symbols) => {
                        write!(f, " import [")?;
                        write_list(f, symbols, |f, (name, alias)| {
                            if name == alias {
                                write!(f, "{name}")
                            } else {
                                write!(f, "{name} as {alias}")
                            }
                        })?;
                        write!(f, "]")
                    }
                }
            }
        }
    }
}
