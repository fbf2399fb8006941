//! Script sandbox: limits plus a worker thread with a hard deadline.
//!
//! Each run gets its own interpreter on a fresh thread. The caller waits on
//! a channel with `recv_timeout`; a timeout or a panic on the worker comes
//! back as a [`ScriptError`] and the caller never sees the fault itself.
//! On a timeout the worker is told to stop and gives up at its next step.

use crate::error::{ScriptError, ScriptResult};
use crate::interp::Interpreter;
use crate::lexer::tokenize;
use crate::model::{ScriptModel, ScriptModelInfo, ScriptOutput};
use crate::parser::parse;
use serde::Deserialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};

const WORKER_STACK_BYTES: usize = 4 * 1024 * 1024;

/// Resource limits applied to every script run.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ScriptLimits {
    /// Largest accepted source text.
    pub max_source_bytes: usize,
    /// Evaluation steps per run.
    pub fuel: u64,
    /// Largest string value a script may build.
    pub max_string_bytes: usize,
    /// Longest list value a script may build.
    pub max_list_items: usize,
    /// Deepest nesting of lists inside lists.
    pub max_depth: usize,
    /// Total size of one value: a unit per element at every nesting level
    /// plus one per string byte.
    pub max_value_size: usize,
    /// Wall-clock deadline for one run. A run that misses it is cancelled
    /// and stops at its next evaluation step.
    pub timeout_ms: u64,
}

impl Default for ScriptLimits {
    fn default() -> Self {
        Self {
            max_source_bytes: 64 * 1024,
            fuel: 100_000,
            max_string_bytes: 64 * 1024,
            max_list_items: 4096,
            max_depth: 32,
            max_value_size: 256 * 1024,
            timeout_ms: 2_000,
        }
    }
}

/// Runs entity scripts under [`ScriptLimits`].
#[derive(Debug, Clone, Default)]
pub struct ScriptSandbox {
    limits: ScriptLimits,
}

impl ScriptSandbox {
    pub fn new(limits: ScriptLimits) -> Self {
        Self { limits }
    }

    pub fn limits(&self) -> &ScriptLimits {
        &self.limits
    }

    /// Parses and evaluates `source`, returning every declared model.
    pub fn evaluate(&self, source: &str) -> ScriptResult<ScriptOutput> {
        if source.trim().is_empty() {
            return Err(ScriptError::Runtime("script is empty".into()));
        }
        if source.len() > self.limits.max_source_bytes {
            return Err(ScriptError::ResourceLimit(format!(
                "script of {} bytes exceeds the {} byte limit",
                source.len(),
                self.limits.max_source_bytes
            )));
        }

        let source = source.to_string();
        let limits = self.limits.clone();
        let output = run_isolated(self.limits.timeout_ms, move |cancel| {
            let program = parse(tokenize(&source)?)?;
            Interpreter::new(limits).with_cancel(cancel).run(&program)
        })?;
        debug!(
            models = output.models.len(),
            fuel_used = output.fuel_used,
            "entity script evaluated"
        );
        Ok(output)
    }

    /// Evaluates `source` and picks the single model to register.
    pub fn extract_model(&self, source: &str) -> ScriptResult<ScriptModel> {
        self.evaluate(source)?.resolve()
    }

    /// Name, table, and description of the script's model.
    pub fn inspect(&self, source: &str) -> ScriptResult<ScriptModelInfo> {
        self.extract_model(source).map(|model| model.info())
    }
}

/// Runs `job` on a dedicated thread and waits at most `timeout_ms` for it.
///
/// `job` receives a flag that is raised when the wait gives up.
fn run_isolated<T, F>(timeout_ms: u64, job: F) -> ScriptResult<T>
where
    T: Send + 'static,
    F: FnOnce(Arc<AtomicBool>) -> ScriptResult<T> + Send + 'static,
{
    let cancel = Arc::new(AtomicBool::new(false));
    let worker_cancel = Arc::clone(&cancel);
    let (tx, rx) = mpsc::channel();
    thread::Builder::new()
        .name("persistkit-script".into())
        .stack_size(WORKER_STACK_BYTES)
        .spawn(move || {
            // The receiver is gone after a timeout; nothing left to report to.
            let _ = tx.send(job(worker_cancel));
        })
        .map_err(|e| ScriptError::Runtime(format!("failed to start script worker: {e}")))?;

    match rx.recv_timeout(Duration::from_millis(timeout_ms)) {
        Ok(result) => result,
        Err(RecvTimeoutError::Timeout) => {
            cancel.store(true, Ordering::Relaxed);
            warn!(timeout_ms, "entity script timed out");
            Err(ScriptError::Timeout { timeout_ms })
        }
        Err(RecvTimeoutError::Disconnected) => Err(ScriptError::Runtime(
            "script worker stopped unexpectedly".into(),
        )),
    }
}
