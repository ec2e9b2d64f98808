use checker::{CheckerError, ExecutionContext, Interpreter, MemoryResolver, Value};

const UTIL: &str = r#"
def _secret = 41
def answer() _secret + 1
def greeting = 'hi'
"#;

fn with_modules(resolver: MemoryResolver) -> Interpreter {
    Interpreter::with_resolver(resolver, ExecutionContext::default())
}

fn with_util() -> Interpreter {
    with_modules(MemoryResolver::new().with_module("util.ckl", UTIL))
}

fn run(interpreter: &mut Interpreter, source: &str) -> Value {
    interpreter
        .eval_source(source)
        .expect("evaluation should succeed")
}

fn run_error(interpreter: &mut Interpreter, source: &str) -> String {
    match interpreter.eval_source(source) {
        Ok(value) => panic!("expected error, received value {value}"),
        Err(err) => message(&err),
    }
}

fn message(err: &CheckerError) -> String {
    err.diagnostic()
        .map(|diagnostic| diagnostic.message.clone())
        .unwrap_or_else(|| err.to_string())
}

#[test]
fn qualified_require_binds_namespace() {
    let mut interpreter = with_util();
    let value = run(&mut interpreter, "require util\nutil->answer()");
    assert_eq!(value.to_string(), "42");
}

#[test]
fn qualified_require_with_alias() {
    let mut interpreter = with_util();
    let value = run(&mut interpreter, "require util as u\nu->greeting");
    assert_eq!(value.to_string(), "'hi'");
}

#[test]
fn unqualified_require_binds_public_names() {
    let mut interpreter = with_util();
    let value = run(&mut interpreter, "require util unqualified\n[answer(), greeting]");
    assert_eq!(value.to_string(), "[42, 'hi']");
}

#[test]
fn import_binds_selected_names_with_aliases() {
    let mut interpreter = with_util();
    let value = run(
        &mut interpreter,
        "require util import [answer as a, greeting]\n[a(), greeting]",
    );
    assert_eq!(value.to_string(), "[42, 'hi']");
    let err = run_error(&mut interpreter, "require util import [nothing]");
    assert!(err.contains("no public symbol `nothing`"));
}

#[test]
fn private_names_stay_hidden() {
    let mut interpreter = with_util();
    let err = run_error(&mut interpreter, "require util\nutil->_secret");
    assert!(err.contains("_secret"));
    let err = run_error(&mut interpreter, "require util unqualified\n_secret");
    assert_eq!(err, "undefined symbol `_secret`");
}

#[test]
fn modules_are_evaluated_once() {
    let mut interpreter =
        with_modules(MemoryResolver::new().with_module("store.ckl", "def items = []"));
    let value = run(
        &mut interpreter,
        r#"
        require store
        require store as again
        append(store->items, 1)
        again->items
        "#,
    );
    assert_eq!(value.to_string(), "[1]");
}

#[test]
fn string_specifiers_use_the_last_segment() {
    let mut interpreter =
        with_modules(MemoryResolver::new().with_module("lib/text.ckl", "def shout(s) s + '!'"));
    let value = run(&mut interpreter, "require 'lib/text.ckl'\ntext->shout('hey')");
    assert_eq!(value.to_string(), "'hey!'");
    let value = run(
        &mut interpreter,
        "def path = 'lib/text'\nrequire path as t\nt->shout('ho')",
    );
    assert_eq!(value.to_string(), "'ho!'");
}

#[test]
fn modules_do_not_see_caller_bindings() {
    let mut interpreter =
        with_modules(MemoryResolver::new().with_module("peek.ckl", "def seen = local_only"));
    let err = run_error(&mut interpreter, "def local_only = 1\nrequire peek");
    assert_eq!(err, "undefined symbol `local_only`");
}

#[test]
fn circular_requires_are_reported() {
    let mut interpreter = with_modules(
        MemoryResolver::new()
            .with_module("a.ckl", "require b\ndef x = 1")
            .with_module("b.ckl", "require a\ndef y = 2"),
    );
    let err = run_error(&mut interpreter, "require a");
    assert!(err.contains("circular module dependency: a -> b -> a"));
}

#[test]
fn missing_modules_are_reported() {
    let mut interpreter = with_util();
    let err = run_error(&mut interpreter, "require nowhere");
    assert_eq!(err, "module not found: nowhere.ckl");
}
