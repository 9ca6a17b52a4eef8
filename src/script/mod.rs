//! Build-script sandbox
//!
//! A script goes through `parse -> validate -> execute`. Validation rejects
//! anything outside the small language the builder needs, so nothing in a
//! rejected script ever runs. Execution is a tree-walking interpreter whose
//! only window on the outside world is the `build` capability object.

pub mod ast;
pub mod builtins;
pub mod capability;
pub mod interp;
pub mod lexer;
pub mod parser;
pub mod sandbox;
pub mod validate;
pub mod value;

use std::time::Duration;

use thiserror::Error;

pub use capability::{BuildApi, CanvasBuilder};
pub use sandbox::{Sandbox, SandboxFailure, SandboxOutput};

/// Why a script produced no build
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ScriptError {
    #[error("Syntax error on line {line}: {message}")]
    Syntax { line: usize, message: String },

    #[error("Script rejected: {}", .0.join("; "))]
    SecurityRejected(Vec<String>),

    #[error("Script timed out after {0:?}")]
    Timeout(Duration),

    #[error("Runtime error: {0}")]
    Runtime(String),
}

impl ScriptError {
    /// User-facing reason, without internals
    pub fn reason(&self) -> String {
        match self {
            ScriptError::SecurityRejected(reasons) => {
                format!("Script rejected:\n{}", reasons.join("\n"))
            }
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reasons() {
        let err = ScriptError::Syntax {
            line: 3,
            message: "expected ':'".to_string(),
        };
        assert_eq!(err.reason(), "Syntax error on line 3: expected ':'");

        let err = ScriptError::SecurityRejected(vec![
            "line 1: Import not allowed: os".to_string(),
            "line 2: Blocked function call: eval".to_string(),
        ]);
        assert_eq!(
            err.reason(),
            "Script rejected:\nline 1: Import not allowed: os\nline 2: Blocked function call: eval"
        );

        let err = ScriptError::Timeout(Duration::from_secs(30));
        assert_eq!(err.reason(), "Script timed out after 30s");
    }
}
