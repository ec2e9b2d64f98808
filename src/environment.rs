use std::{cell::RefCell, rc::Rc};

use indexmap::IndexMap;

use crate::{
    diagnostics::{CheckerError, Result, SourcePos},
    value::Value,
};

pub type EnvironmentRef = Rc<RefCell<Environment>>;

/// One lexical frame. Frames chain to their parent; the root frame also
/// owns the module registry of its interpreter.
#[derive(Default)]
pub struct Environment {
    parent: Option<EnvironmentRef>,
    bindings: IndexMap<String, Value>,
    modules: Option<Rc<ModuleRegistry>>,
}

impl Environment {
    /// Root frame whose `require` always fails with "module not found".
    pub fn new() -> EnvironmentRef {
        Self::with_resolver(Box::new(NoModules))
    }

    pub fn with_resolver(resolver: Box<dyn ModuleResolver>) -> EnvironmentRef {
        Rc::new(RefCell::new(Self {
            parent: None,
            bindings: IndexMap::new(),
            modules: Some(Rc::new(ModuleRegistry::new(resolver))),
        }))
    }

    pub fn with_parent(parent: EnvironmentRef) -> EnvironmentRef {
        Rc::new(RefCell::new(Self {
            parent: Some(parent),
            bindings: IndexMap::new(),
            modules: None,
        }))
    }

    /// Binds in this frame, shadowing outer bindings.
    pub fn put(&mut self, name: impl Into<String>, value: Value) {
        self.bindings.insert(name.into(), value);
    }

    /// Removes from this frame only.
    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.bindings.shift_remove(name)
    }

    pub fn get_local(&self, name: &str) -> Option<&Value> {
        self.bindings.get(name)
    }

    pub fn bindings(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.bindings.iter()
    }

    /// Rebinds the nearest frame that already defines `name`.
    pub fn set(env: &EnvironmentRef, name: &str, value: Value, pos: &SourcePos) -> Result<()> {
        if let Some(slot) = env.borrow_mut().bindings.get_mut(name) {
            *slot = value;
            return Ok(());
        }
        let parent = env.borrow().parent.clone();
        match parent {
            Some(parent) => Environment::set(&parent, name, value, pos),
            None => Err(CheckerError::runtime(
                format!("undefined symbol `{name}`"),
                pos,
            )),
        }
    }

    pub fn get(env: &EnvironmentRef, name: &str, pos: &SourcePos) -> Result<Value> {
        Environment::lookup(env, name)
            .ok_or_else(|| CheckerError::runtime(format!("undefined symbol `{name}`"), pos))
    }

    pub fn lookup(env: &EnvironmentRef, name: &str) -> Option<Value> {
        if let Some(value) = env.borrow().bindings.get(name) {
            return Some(value.clone());
        }
        let parent = env.borrow().parent.clone();
        parent.and_then(|parent| Environment::lookup(&parent, name))
    }

    pub fn is_defined(env: &EnvironmentRef, name: &str) -> bool {
        Environment::lookup(env, name).is_some()
    }

    /// The parentless frame at the end of the chain.
    pub fn root(env: &EnvironmentRef) -> EnvironmentRef {
        let mut current = Rc::clone(env);
        loop {
            let parent = current.borrow().parent.clone();
            match parent {
                Some(parent) => current = parent,
                None => return current,
            }
        }
    }

    pub fn registry(env: &EnvironmentRef, pos: &SourcePos) -> Result<Rc<ModuleRegistry>> {
        Environment::root(env)
            .borrow()
            .modules
            .clone()
            .ok_or_else(|| CheckerError::runtime("environment has no module registry", pos))
    }
}

/// Maps a module file name to its source text.
pub trait ModuleResolver {
    fn resolve(&self, file_name: &str, pos: &SourcePos) -> Result<String>;
}

pub fn module_not_found(file_name: &str, pos: &SourcePos) -> CheckerError {
    CheckerError::runtime(format!("module not found: {file_name}"), pos)
}

/// Resolver for hosts without modules.
pub struct NoModules;

impl ModuleResolver for NoModules {
    fn resolve(&self, file_name: &str, pos: &SourcePos) -> Result<String> {
        Err(module_not_found(file_name, pos))
    }
}

/// In-memory module sources keyed by file name.
#[derive(Default)]
pub struct MemoryResolver {
    sources: IndexMap<String, String>,
}

impl MemoryResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_module(mut self, file_name: &str, source: &str) -> Self {
        self.sources
            .insert(file_name.to_string(), source.to_string());
        self
    }
}

impl ModuleResolver for MemoryResolver {
    fn resolve(&self, file_name: &str, pos: &SourcePos) -> Result<String> {
        self.sources
            .get(file_name)
            .cloned()
            .ok_or_else(|| module_not_found(file_name, pos))
    }
}

/// Loaded modules and the stack of modules currently being loaded.
pub struct ModuleRegistry {
    modules: RefCell<IndexMap<String, EnvironmentRef>>,
    loading: RefCell<Vec<String>>,
    resolver: Box<dyn ModuleResolver>,
}

impl ModuleRegistry {
    fn new(resolver: Box<dyn ModuleResolver>) -> Self {
        Self {
            modules: RefCell::new(IndexMap::new()),
            loading: RefCell::new(Vec::new()),
            resolver,
        }
    }

    pub fn resolve(&self, file_name: &str, pos: &SourcePos) -> Result<String> {
        self.resolver.resolve(file_name, pos)
    }

    pub fn cached(&self, module: &str) -> Option<EnvironmentRef> {
        self.modules.borrow().get(module).cloned()
    }

    pub fn store(&self, module: &str, env: EnvironmentRef) {
        self.modules.borrow_mut().insert(module.to_string(), env);
    }

    pub fn push_module_stack(&self, module: &str, pos: &SourcePos) -> Result<()> {
        let mut loading = self.loading.borrow_mut();
        if let Some(start) = loading.iter().position(|m| m == module) {
            let mut cycle: Vec<&str> = loading[start..].iter().map(String::as_str).collect();
            cycle.push(module);
            return Err(CheckerError::runtime(
                format!("circular module dependency: {}", cycle.join(" -> ")),
                pos,
            ));
        }
        loading.push(module.to_string());
        Ok(())
    }

    pub fn pop_module_stack(&self) {
        self.loading.borrow_mut().pop();
    }
}
