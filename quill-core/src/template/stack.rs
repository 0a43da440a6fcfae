use quill_ast::Span;

use crate::error::{ErrorKind, Note, SemanticError};

#[derive(Clone, Debug, PartialEq)]
pub enum InstantiationKind {
    Cell { name: String },
    Alias { name: String },
    Expansion { depth: u32, index: u64 },
}

#[derive(Clone, Debug, PartialEq)]
pub struct InstantiationFrame {
    pub kind: InstantiationKind,
    pub span: Span,
}

impl InstantiationFrame {
    pub fn describe(&self) -> String {
        match &self.kind {
            InstantiationKind::Cell { name } => format!("in instantiation of cell '{name}'"),
            InstantiationKind::Alias { name } => format!("in instantiation of type '{name}'"),
            InstantiationKind::Expansion { index, .. } => {
                format!("in expansion instantiation for index {index}")
            }
        }
    }
}

/// Active instantiations, outermost first.
#[derive(Debug)]
pub struct InstantiationStack {
    frames: Vec<InstantiationFrame>,
    limit: usize,
}

impl InstantiationStack {
    pub fn new(limit: usize) -> Self {
        InstantiationStack {
            frames: Vec::new(),
            limit,
        }
    }

    pub fn push(&mut self, frame: InstantiationFrame) -> Result<(), SemanticError> {
        if self.frames.len() >= self.limit {
            let mut err = SemanticError::new(
                ErrorKind::Limit,
                format!(
                    "instantiation depth limit of {} exceeded (set max_instantiation_depth to raise it)",
                    self.limit
                ),
                frame.span,
            );
            err.notes = self.backtrace(8);
            return Err(err);
        }
        self.frames.push(frame);
        Ok(())
    }

    pub fn pop(&mut self) -> Option<InstantiationFrame> {
        self.frames.pop()
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn frames(&self) -> &[InstantiationFrame] {
        &self.frames
    }

    /// Up to `max` notes, innermost frame first.
    pub fn backtrace(&self, max: usize) -> Vec<Note> {
        self.frames
            .iter()
            .rev()
            .take(max)
            .map(|f| Note {
                message: f.describe(),
                span: f.span,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(index: u64) -> InstantiationFrame {
        InstantiationFrame {
            kind: InstantiationKind::Expansion { depth: 0, index },
            span: quill_ast::span(0, 6),
        }
    }

    #[test]
    fn push_beyond_limit_fails_with_backtrace() {
        let mut stack = InstantiationStack::new(2);
        stack.push(frame(0)).unwrap();
        stack.push(frame(1)).unwrap();
        let err = stack.push(frame(2)).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Limit);
        assert_eq!(err.notes.len(), 2);
        assert!(err.notes[0].message.contains("index 1"));
        stack.pop();
        assert_eq!(stack.depth(), 1);
    }
}
