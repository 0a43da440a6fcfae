use quill_ast::Span;
use miette::Diagnostic;
use thiserror::Error;

/// Broad classification of semantic failures, used by tests and the CLI report.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The expansion range is not an array, brace list, or destructurable record.
    Shape,
    /// An instantiation failed to check.
    Instantiation,
    /// A selection index could not be evaluated to a constant.
    IndexEvaluation,
    Type,
    Name,
    /// `max_instantiation_depth` or `max_expansion_size` exceeded.
    Limit,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Shape => "shape",
            ErrorKind::Instantiation => "instantiation",
            ErrorKind::IndexEvaluation => "index-evaluation",
            ErrorKind::Type => "type",
            ErrorKind::Name => "name",
            ErrorKind::Limit => "limit",
        }
    }
}

#[derive(Clone, Debug, Error, Diagnostic)]
#[error("semantic error: {message}")]
#[diagnostic(code(quill::sema))]
pub struct SemanticError {
    pub message: String,
    #[label]
    pub span: Span,
    pub kind: ErrorKind,
    /// Instantiation back-trace, innermost first.
    #[related]
    pub notes: Vec<Note>,
}

#[derive(Clone, Debug, Error, Diagnostic)]
#[error("{message}")]
#[diagnostic(severity(Advice))]
pub struct Note {
    pub message: String,
    #[label]
    pub span: Span,
}

impl SemanticError {
    pub fn new(kind: ErrorKind, message: impl Into<String>, span: Span) -> Self {
        SemanticError {
            message: message.into(),
            span,
            kind,
            notes: Vec::new(),
        }
    }

    pub fn type_error(message: impl Into<String>, span: Span) -> Self {
        Self::new(ErrorKind::Type, message, span)
    }

    pub fn name_error(message: impl Into<String>, span: Span) -> Self {
        Self::new(ErrorKind::Name, message, span)
    }

    pub fn with_note(mut self, message: impl Into<String>, span: Span) -> Self {
        self.notes.push(Note {
            message: message.into(),
            span,
        });
        self
    }
}
