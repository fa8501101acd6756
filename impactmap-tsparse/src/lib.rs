//! TypeScript/TSX source analysis for change-impact tracking.
//!
//! Parses a source file into a [`FileAnalysis`] record (imports including
//! dynamic `import(...)` forms, exports including re-exports, symbol
//! declarations with line spans) and diffs two analyses of the same file to
//! decide which symbols changed at runtime, as opposed to type-only edits
//! that are erased during compilation.

pub mod analysis;
pub mod astdiff;
pub mod error;

pub use analysis::{
    parse_file, parse_source, Export, FileAnalysis, Import, ImportName, SymbolDecl, SymbolKind,
};
pub use astdiff::find_affected_symbols;
pub use error::{Error, Result};
