//! `require`: resolving, loading, caching and binding modules.

use indexmap::IndexMap;
use tracing::debug;

use crate::{
    ast::{NodeKind, Literal, Require, RequireStyle},
    diagnostics::{CheckerError, Result, SourcePos},
    environment::{Environment, EnvironmentRef, ModuleRegistry},
    parser,
    runtime::finish_top_level,
    value::{ObjectValue, Value},
};

pub const MODULE_EXTENSION: &str = ".ckl";

/// Top-level names starting with this prefix are private to their module.
pub const PRIVATE_PREFIX: char = '_';

/// File name handed to the resolver: the specifier with the module
/// extension appended when missing.
pub fn module_file_name(specifier: &str) -> String {
    if specifier.ends_with(MODULE_EXTENSION) {
        specifier.to_string()
    } else {
        format!("{specifier}{MODULE_EXTENSION}")
    }
}

/// Identifier a module is cached and bound under: the last path segment
/// without the extension.
pub fn module_identifier(specifier: &str) -> String {
    let base = specifier.rsplit(['/', '\\']).next().unwrap_or(specifier);
    base.strip_suffix(MODULE_EXTENSION).unwrap_or(base).to_string()
}

fn module_specifier(require: &Require, env: &EnvironmentRef) -> Result<String> {
    match &require.module.kind {
        NodeKind::Literal(Literal::String(path)) => Ok(path.to_string()),
        NodeKind::Identifier(name) => match Environment::lookup(env, name) {
            Some(Value::String(path)) => Ok(path.to_string()),
            _ => Ok(name.clone()),
        },
        _ => Err(CheckerError::runtime(
            "module specifier must be an identifier or a string",
            &require.module.pos,
        )),
    }
}

pub(crate) fn require(require: &Require, env: &EnvironmentRef, pos: &SourcePos) -> Result<Value> {
    let specifier = module_specifier(require, env)?;
    let file_name = module_file_name(&specifier);
    let module_id = module_identifier(&specifier);
    let registry = Environment::registry(env, pos)?;

    registry.push_module_stack(&module_id, pos)?;
    let loaded = load_module(&registry, &file_name, &module_id, env, pos);
    registry.pop_module_stack();
    let module_env = loaded?;

    let public: IndexMap<String, Value> = module_env
        .borrow()
        .bindings()
        .filter(|(name, _)| !name.starts_with(PRIVATE_PREFIX))
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect();

    match &require.style {
        RequireStyle::Unqualified => {
            let mut scope = env.borrow_mut();
            for (name, value) in public {
                scope.put(name, value);
            }
            Ok(Value::Null)
        }
        RequireStyle::Import(symbols) => {
            for (name, alias) in symbols {
                let value = public.get(name).cloned().ok_or_else(|| {
                    CheckerError::runtime(
                        format!("module `{module_id}` has no public symbol `{name}`"),
                        pos,
                    )
                })?;
                env.borrow_mut().put(alias.clone(), value);
            }
            Ok(Value::Null)
        }
        RequireStyle::Qualified(alias) => {
            let namespace = Value::object(ObjectValue::namespace(module_id.clone(), public));
            let name = alias.clone().unwrap_or(module_id);
            env.borrow_mut().put(name, namespace.clone());
            Ok(namespace)
        }
    }
}

fn load_module(
    registry: &ModuleRegistry,
    file_name: &str,
    module_id: &str,
    env: &EnvironmentRef,
    pos: &SourcePos,
) -> Result<EnvironmentRef> {
    if let Some(cached) = registry.cached(module_id) {
        debug!(module = module_id, "module cache hit");
        return Ok(cached);
    }
    debug!(module = module_id, file = file_name, "resolving module");
    let source = registry.resolve(file_name, pos)?;
    let node = parser::parse_script(&source, file_name)?;
    let module_env = Environment::with_parent(Environment::root(env));
    finish_top_level(node.evaluate(&module_env)?, &node.pos)?;
    registry.store(module_id, module_env.clone());
    debug!(module = module_id, "module loaded");
    Ok(module_env)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_names_get_the_extension_once() {
        assert_eq!(module_file_name("util"), "util.ckl");
        assert_eq!(module_file_name("lib/util.ckl"), "lib/util.ckl");
    }

    #[test]
    fn identifiers_drop_directories_and_extension() {
        assert_eq!(module_identifier("util"), "util");
        assert_eq!(module_identifier("lib/util.ckl"), "util");
        assert_eq!(module_identifier("lib\\text"), "text");
    }
}
