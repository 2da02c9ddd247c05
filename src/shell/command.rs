//! Shell command batches
//!
//! Each command carries its own failure policy instead of relying on
//! `|| true` being spelled correctly at every call site.

use std::fmt;

/// What a failing command means for its batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnFailure {
    /// Idempotent cleanup; failure is expected and ignored
    Tolerate,
    /// Failure marks the whole batch as failed (the batch still runs to the end)
    Fail,
}

/// A single shell command line with its failure policy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellCommand {
    pub line: String,
    pub on_failure: OnFailure,
}

impl ShellCommand {
    pub fn required(line: impl Into<String>) -> Self {
        Self {
            line: line.into(),
            on_failure: OnFailure::Fail,
        }
    }

    pub fn tolerated(line: impl Into<String>) -> Self {
        Self {
            line: line.into(),
            on_failure: OnFailure::Tolerate,
        }
    }

    pub fn is_required(&self) -> bool {
        self.on_failure == OnFailure::Fail
    }
}

impl fmt::Display for ShellCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.line)
    }
}

/// Ordered list of commands executed in one privileged shell
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandBatch {
    commands: Vec<ShellCommand>,
}

impl CommandBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            commands: Vec::with_capacity(capacity),
        }
    }

    /// Batch holding a single required command
    pub fn single(line: impl Into<String>) -> Self {
        let mut batch = Self::with_capacity(1);
        batch.required(line);
        batch
    }

    pub fn required(&mut self, line: impl Into<String>) -> &mut Self {
        self.commands.push(ShellCommand::required(line));
        self
    }

    pub fn tolerated(&mut self, line: impl Into<String>) -> &mut Self {
        self.commands.push(ShellCommand::tolerated(line));
        self
    }

    pub fn push(&mut self, command: ShellCommand) -> &mut Self {
        self.commands.push(command);
        self
    }

    pub fn commands(&self) -> &[ShellCommand] {
        &self.commands
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// Render as a script for the shell's stdin
    ///
    /// Required failures set the exit status but do not stop later commands.
    pub fn render(&self) -> String {
        let mut script = String::from("__rc=0\n");
        for cmd in &self.commands {
            match cmd.on_failure {
                OnFailure::Tolerate => {
                    script.push_str(&format!("{{ {}\n}} || true\n", cmd.line))
                }
                OnFailure::Fail => script.push_str(&format!("{{ {}\n}} || __rc=1\n", cmd.line)),
            }
        }
        script.push_str("exit $__rc\n");
        script
    }
}

/// Quote a value for a POSIX shell
pub fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// Write `value` into `path` with a trailing newline
pub fn write_cmd(value: &str, path: &str) -> String {
    format!("echo {} > {}", quote(value), path)
}

/// Stderr noise produced by idempotent cleanup commands
pub fn is_benign_stderr(line: &str) -> bool {
    const BENIGN: [&str; 4] = [
        "No such file",
        "Read-only",
        "File exists",
        "Directory not empty",
    ];
    BENIGN.iter().any(|pattern| line.contains(pattern))
}
