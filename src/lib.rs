//! Core library for the Checker scripting language: lexing, parsing,
//! tree-walking evaluation, structural collections, module loading and
//! REPL utilities.

pub mod ast;
pub mod collections;
pub mod diagnostics;
pub mod environment;
pub mod lexer;
pub mod modules;
pub mod parser;
pub mod repl;
pub mod runtime;
pub mod stdlib;
pub mod value;

pub use diagnostics::{CheckerError, Diagnostic, DiagnosticKind, SourcePos};
pub use environment::{Environment, EnvironmentRef, MemoryResolver, ModuleResolver, NoModules};
pub use repl::Repl;
pub use runtime::{ExecutionContext, FlowControl, Interpreter};
pub use value::{NativeFunction, Value};
