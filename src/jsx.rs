//! Snippet transpiling through oxc.
//!
//! JSX becomes classic-runtime `React.createElement` calls and TypeScript
//! syntax is erased, so snippets run in a plain ES interpreter without a
//! Babel runtime.

use std::path::Path;

use oxc_allocator::Allocator;
use oxc_codegen::Codegen;
use oxc_parser::Parser;
use oxc_semantic::SemanticBuilder;
use oxc_span::SourceType;
use oxc_transformer::{JsxOptions, JsxRuntime, TransformOptions, Transformer};
use thiserror::Error;

/// A snippet oxc could not parse or transform
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct JsxError {
    pub message: String,
}

/// Rewrite JSX (and erase TypeScript) in `source`.
pub fn transpile(source: &str) -> Result<String, JsxError> {
    transform(source, SourceType::tsx(), "snippet.tsx")
}

/// Erase TypeScript annotations, parameter properties and type declarations.
pub fn strip_types(source: &str) -> Result<String, JsxError> {
    transform(source, SourceType::ts(), "snippet.ts")
}

fn options() -> TransformOptions {
    TransformOptions {
        jsx: JsxOptions {
            runtime: JsxRuntime::Classic,
            pragma: Some("React.createElement".to_string()),
            pragma_frag: Some("React.Fragment".to_string()),
            // Object spread keeps props free of helper imports
            use_spread: Some(true),
            pure: false,
            ..JsxOptions::default()
        },
        ..TransformOptions::default()
    }
}

fn transform(source: &str, source_type: SourceType, file_name: &str) -> Result<String, JsxError> {
    let allocator = Allocator::default();
    let parsed = Parser::new(&allocator, source, source_type).parse();
    if let Some(err) = parsed.errors.first() {
        return Err(JsxError { message: err.to_string() });
    }

    let mut program = parsed.program;
    let scoping = SemanticBuilder::new().build(&program).semantic.into_scoping();
    let options = options();
    let transformed =
        Transformer::new(&allocator, Path::new(file_name), &options).build_with_scoping(scoping, &mut program);
    if let Some(err) = transformed.errors.first() {
        return Err(JsxError { message: err.to_string() });
    }

    Ok(Codegen::new().build(&program).code)
}
