//! Filter-tree to Datalog query builder for graph knowledge bases.
//!
//! A UI-built tree of typed filters is compiled by [`DatalogCompiler`] into a
//! `:find`/`:where` query; [`ReferenceResolver`] then rewrites `[[uuid]]`
//! references in the returned records into readable titles.

pub mod ast;
pub mod clause;
pub mod config;
pub mod datalog_compiler;
pub mod entity;
pub mod escape;
pub mod executor;
pub mod resolver;
pub mod schema;
pub mod validate;

pub use datalog_compiler::{CompiledQuery, CompilerConfig, DatalogCompiler};
pub use resolver::{ReferenceResolver, ResolverConfig, TitleLookup};
