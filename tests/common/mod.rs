//! Scripted transport fake for exercising stage command sequences.

#![allow(dead_code)]

use anyhow::Result;
use async_trait::async_trait;
use nodeforge::transport::{ExecOutput, Transport};
use std::path::Path;
use std::sync::Mutex;

/// Transport whose responses are driven by substring rules.
///
/// The first rule matching the command decides the response; unmatched
/// commands succeed with empty output. Every exec and copy is recorded
/// so tests can assert on the exact sequence a stage issued.
pub struct ScriptedTransport {
    rules: Vec<(String, ExecOutput)>,
    log: Mutex<Vec<String>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self {
            rules: Vec::new(),
            log: Mutex::new(Vec::new()),
        }
    }

    /// Commands containing `pattern` fail with `exit_code`.
    pub fn fail_on(mut self, pattern: &str, exit_code: i32) -> Self {
        self.rules.push((
            pattern.to_string(),
            ExecOutput::failed(exit_code, "scripted failure"),
        ));
        self
    }

    /// Commands containing `pattern` succeed with `stdout`.
    pub fn respond(mut self, pattern: &str, stdout: &str) -> Self {
        self.rules.push((pattern.to_string(), ExecOutput::ok(stdout)));
        self
    }

    pub fn commands(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    pub fn ran(&self, pattern: &str) -> bool {
        self.commands().iter().any(|c| c.contains(pattern))
    }

    pub fn position(&self, pattern: &str) -> Option<usize> {
        self.commands().iter().position(|c| c.contains(pattern))
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn exec(&self, command: &str) -> Result<ExecOutput> {
        self.log.lock().unwrap().push(command.to_string());
        for (pattern, response) in &self.rules {
            if command.contains(pattern) {
                return Ok(response.clone());
            }
        }
        Ok(ExecOutput::ok(""))
    }

    async fn copy_to(&self, _local: &Path, remote: &str) -> Result<()> {
        self.log
            .lock()
            .unwrap()
            .push(format!("copy_to {}", remote));
        Ok(())
    }

    async fn copy_from(&self, remote: &str, _local: &Path) -> Result<()> {
        self.log
            .lock()
            .unwrap()
            .push(format!("copy_from {}", remote));
        Ok(())
    }
}
