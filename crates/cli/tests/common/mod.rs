//! Helpers for running the `lt` binary

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

/// `lt` invocation with an isolated config directory
pub struct LtCommand {
    args: Vec<String>,
    working_dir: PathBuf,
}

impl LtCommand {
    pub fn new(working_dir: impl AsRef<Path>) -> Self {
        Self {
            args: Vec::new(),
            working_dir: working_dir.as_ref().to_path_buf(),
        }
    }

    pub fn args(&mut self, args: &[&str]) -> &mut Self {
        self.args.extend(args.iter().map(|s| s.to_string()));
        self
    }

    pub fn execute(&self) -> CommandResult {
        let output = Command::new(env!("CARGO_BIN_EXE_lt"))
            .args(&self.args)
            .current_dir(&self.working_dir)
            // Keep a user's real config out of the tests
            .env("XDG_CONFIG_HOME", &self.working_dir)
            .env("HOME", &self.working_dir)
            .env("RUST_LOG", "warn")
            .output()
            .expect("failed to run lt");
        CommandResult { output }
    }
}

pub struct CommandResult {
    output: Output,
}

impl CommandResult {
    pub fn success(&self) -> bool {
        self.output.status.success()
    }

    pub fn stdout(&self) -> String {
        String::from_utf8_lossy(&self.output.stdout).into_owned()
    }

    pub fn stderr(&self) -> String {
        String::from_utf8_lossy(&self.output.stderr).into_owned()
    }

    pub fn assert_success(&self) -> &Self {
        assert!(
            self.success(),
            "lt failed\nstdout:\n{}\nstderr:\n{}",
            self.stdout(),
            self.stderr()
        );
        self
    }
}
