use crate::ast::Position;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::PathBuf;

/// Every way a unit (or the project around it) can fail to compile.
#[derive(Debug, Clone)]
pub enum CompileError {
    Syntax {
        message: String,
        pos: Position,
    },
    DuplicateDeclaration {
        name: String,
        first: Position,
        second: Position,
    },
    UnresolvedReference {
        name: String,
        pos: Position,
    },
    ArityMismatch {
        name: String,
        expected: usize,
        given: usize,
        pos: Position,
    },
    NotAVariable {
        name: String,
        pos: Position,
    },
    NotAList {
        name: String,
        pos: Position,
    },
    DuplicateSpriteName {
        name: String,
    },
    DuplicateStage {
        first: PathBuf,
        second: PathBuf,
    },
    SourceRead {
        path: PathBuf,
        message: String,
    },
}

impl Display for CompileError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            CompileError::Syntax { message, pos } => {
                write!(f, "{} (line {}, column {})", message, pos.line, pos.column)
            }
            CompileError::DuplicateDeclaration {
                name,
                first,
                second,
            } => write!(
                f,
                "Name '{}' is declared twice (first at line {}, column {}; again at line {}, column {}).",
                name, first.line, first.column, second.line, second.column
            ),
            CompileError::UnresolvedReference { name, pos } => write!(
                f,
                "Unknown name '{}' (line {}, column {}).",
                name, pos.line, pos.column
            ),
            CompileError::ArityMismatch {
                name,
                expected,
                given,
                pos,
            } => write!(
                f,
                "Function '{}' expects {} argument(s), got {} (line {}, column {}).",
                name, expected, given, pos.line, pos.column
            ),
            CompileError::NotAVariable { name, pos } => write!(
                f,
                "'{}' is not a declared variable (line {}, column {}).",
                name, pos.line, pos.column
            ),
            CompileError::NotAList { name, pos } => write!(
                f,
                "'{}' is not a declared list (line {}, column {}).",
                name, pos.line, pos.column
            ),
            CompileError::DuplicateSpriteName { name } => {
                write!(f, "Duplicate sprite name '{}'.", name)
            }
            CompileError::DuplicateStage { first, second } => write!(
                f,
                "Multiple stage files found: '{}' and '{}'.",
                first.display(),
                second.display()
            ),
            CompileError::SourceRead { path, message } => {
                write!(f, "Failed to read '{}': {}.", path.display(), message)
            }
        }
    }
}

impl Error for CompileError {}

/// A compile error attributed to the unit it occurred in.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub unit: String,
    pub error: CompileError,
}

impl Diagnostic {
    pub fn new(unit: impl Into<String>, error: CompileError) -> Self {
        Self {
            unit: unit.into(),
            error,
        }
    }
}

impl Display for Diagnostic {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.unit, self.error)
    }
}

impl Error for Diagnostic {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        Some(&self.error)
    }
}
