//! Parse, validate and execute one script on a dedicated worker thread

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::time::{Duration, Instant};

use super::ScriptError;
use super::ast::Stmt;
use super::capability::CanvasBuilder;
use super::interp::{Interpreter, Interrupt};
use super::parser::parse;
use super::validate::validate;
use super::value::Exception;
use crate::core::config::SandboxConfig;
use crate::voxel::VoxelCanvas;

/// Stack for the worker; deeply nested scripts recurse through the evaluator
const WORKER_STACK_SIZE: usize = 64 * 1024 * 1024;

/// How long past the deadline the caller keeps waiting for the worker
const DEADLINE_GRACE: Duration = Duration::from_secs(1);

/// Voxels produced by a successful run
#[derive(Debug)]
pub struct SandboxOutput {
    pub canvas: VoxelCanvas,
    pub block_count: usize,
}

/// Why a run failed, plus whatever the script drew before it stopped
#[derive(Debug)]
pub struct SandboxFailure {
    pub error: ScriptError,
    /// Partial canvas, for diagnostics only; never delivered
    pub partial: Option<VoxelCanvas>,
}

impl SandboxFailure {
    pub fn new(error: ScriptError) -> Self {
        Self { error, partial: None }
    }
}

impl From<SandboxFailure> for ScriptError {
    fn from(f: SandboxFailure) -> Self {
        f.error
    }
}

pub struct Sandbox {
    config: SandboxConfig,
}

impl Sandbox {
    pub fn new(config: SandboxConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    /// Parse and validate without executing anything
    pub fn check(&self, source: &str) -> Result<Vec<Stmt>, ScriptError> {
        check_source(source, &self.config)
    }

    /// Run `source` to completion, failure or timeout.
    ///
    /// Blocks the calling thread; async callers go through
    /// `tokio::task::spawn_blocking`.
    pub fn run(&self, source: &str) -> Result<SandboxOutput, SandboxFailure> {
        if source.len() > self.config.max_script_len {
            return Err(SandboxFailure::new(ScriptError::SecurityRejected(vec![format!(
                "Script too long: {} bytes, maximum is {}",
                source.len(),
                self.config.max_script_len
            )])));
        }

        let start = Instant::now();
        let timeout = self.config.timeout();
        let deadline = start + timeout;
        let cancel = Arc::new(AtomicBool::new(false));
        let (tx, rx) = mpsc::channel();

        let worker_source = source.to_string();
        let worker_config = self.config.clone();
        let worker_cancel = cancel.clone();
        let spawned = std::thread::Builder::new()
            .name("script-worker".to_string())
            .stack_size(WORKER_STACK_SIZE)
            .spawn(move || {
                let result = execute(&worker_source, &worker_config, deadline, worker_cancel);
                let _ = tx.send(result);
            });
        if let Err(e) = spawned {
            return Err(SandboxFailure::new(ScriptError::Runtime(format!(
                "failed to start script worker: {}",
                e
            ))));
        }

        let result = match rx.recv_timeout(timeout + DEADLINE_GRACE) {
            Ok(result) => result,
            Err(mpsc::RecvTimeoutError::Timeout) => {
                cancel.store(true, Ordering::Relaxed);
                log::warn!("Script worker missed its deadline; abandoned");
                Err(SandboxFailure::new(ScriptError::Timeout(timeout)))
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => Err(SandboxFailure::new(
                ScriptError::Runtime("script worker exited unexpectedly".to_string()),
            )),
        };

        match &result {
            Ok(output) => log::info!(
                "Script executed in {:.2?}: {} blocks",
                start.elapsed(),
                output.block_count
            ),
            Err(failure) => log::info!(
                "Script failed after {:.2?}: {}",
                start.elapsed(),
                failure.error
            ),
        }
        result
    }
}

fn check_source(source: &str, config: &SandboxConfig) -> Result<Vec<Stmt>, ScriptError> {
    if source.len() > config.max_script_len {
        return Err(ScriptError::SecurityRejected(vec![format!(
            "Script too long: {} bytes, maximum is {}",
            source.len(),
            config.max_script_len
        )]));
    }
    let program = parse(source).map_err(|e| ScriptError::Syntax {
        line: e.line,
        message: e.message,
    })?;
    validate(&program).map_err(ScriptError::SecurityRejected)?;
    Ok(program)
}

/// Text reported for an uncaught script exception
fn describe(e: &Exception) -> String {
    if e.kind.is_fatal() && !e.message.is_empty() {
        e.message.clone()
    } else {
        e.to_string()
    }
}

fn execute(
    source: &str,
    config: &SandboxConfig,
    deadline: Instant,
    cancel: Arc<AtomicBool>,
) -> Result<SandboxOutput, SandboxFailure> {
    let program = check_source(source, config).map_err(SandboxFailure::new)?;

    let mut builder = CanvasBuilder::new(config.limits);
    let result = {
        let mut interp = Interpreter::new(&mut builder, config, deadline, cancel);
        interp.run(&program)
    };
    let canvas = builder.into_canvas();

    match result {
        Ok(()) => Ok(SandboxOutput {
            block_count: canvas.count(),
            canvas,
        }),
        Err(interrupt) => {
            let error = match interrupt {
                Interrupt::Timeout => ScriptError::Timeout(config.timeout()),
                Interrupt::Raise(e, 0) => ScriptError::Runtime(describe(&e)),
                Interrupt::Raise(e, line) => {
                    ScriptError::Runtime(format!("line {}: {}", line, describe(&e)))
                }
            };
            Err(SandboxFailure {
                error,
                partial: Some(canvas),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::BuildLimits;
    use glam::IVec3;

    fn sandbox() -> Sandbox {
        Sandbox::new(SandboxConfig::default())
    }

    #[test]
    fn test_runs_build_script() {
        let src = r#"
import math

build.fill(0, 0, 0, 4, 0, 4, "stone_bricks")
for i in range(4):
    build.setblock(0, i + 1, 0, "oak_log")
roof = [(x, z) for x in range(5) for z in range(5) if (x + z) % 2 == 0]
for x, z in roof:
    builder.place_block(x, 5, z, "glass")
print(f"placed {build.get_block_count()} blocks")
"#;
        let output = sandbox().run(src).unwrap();
        assert_eq!(output.block_count, 25 + 4 + 13);
        assert_eq!(output.canvas.count(), output.block_count);
        assert_eq!(
            output.canvas.get(IVec3::new(0, 3, 0)).unwrap().name,
            "minecraft:oak_log"
        );
    }

    #[test]
    fn test_syntax_error_reports_line() {
        let err = sandbox().run("x = 1\nif x\n    pass\n").unwrap_err();
        assert!(matches!(err.error, ScriptError::Syntax { line: 2, .. }));
        assert!(err.partial.is_none());
    }

    #[test]
    fn test_rejected_script_never_runs() {
        let src = "build.setblock(0, 0, 0, 'stone')\nimport os\nwhile True:\n    pass\n";
        let err = sandbox().run(src).unwrap_err();
        let ScriptError::SecurityRejected(reasons) = &err.error else {
            panic!("expected rejection, got {:?}", err.error);
        };
        assert_eq!(reasons.len(), 2);
        assert!(reasons.iter().any(|r| r.contains("Infinite loop")));
        assert!(err.partial.is_none());
    }

    #[test]
    fn test_script_too_long() {
        let config = SandboxConfig {
            max_script_len: 10,
            ..SandboxConfig::default()
        };
        let err = Sandbox::new(config).run("x = 1\ny = 2\nz = 3\n").unwrap_err();
        assert!(matches!(err.error, ScriptError::SecurityRejected(_)));
    }

    #[test]
    fn test_timeout() {
        let config = SandboxConfig {
            timeout_ms: 100,
            ..SandboxConfig::default()
        };
        let start = Instant::now();
        let err = Sandbox::new(config)
            .run("n = 0\nwhile n >= 0:\n    n += 1\n")
            .unwrap_err();
        assert!(matches!(err.error, ScriptError::Timeout(_)));
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_block_limit_keeps_partial_canvas() {
        let config = SandboxConfig {
            limits: BuildLimits {
                max_blocks: 10,
                ..BuildLimits::default()
            },
            ..SandboxConfig::default()
        };
        let err = Sandbox::new(config)
            .run("for i in range(20):\n    build.setblock(i, 0, 0, 'stone')\n")
            .unwrap_err();
        let ScriptError::Runtime(message) = &err.error else {
            panic!("expected runtime error, got {:?}", err.error);
        };
        assert!(message.starts_with("line 2: Build limit exceeded"), "{}", message);
        assert_eq!(err.partial.unwrap().count(), 10);
    }

    #[test]
    fn test_shapes_past_coordinate_range_fail_cleanly() {
        let scripts = [
            "build.sphere(2147483640, 0, 0, 20, 'stone')",
            "build.box(2147483647, 0, 0, 2, 2, 2, 'stone')",
            "build.stairs(0, 2147483647, 0, 5, 'east', 'stone')",
        ];
        for src in scripts {
            let err = sandbox().run(src).unwrap_err();
            let ScriptError::Runtime(message) = &err.error else {
                panic!("expected runtime error for {}, got {:?}", src, err.error);
            };
            assert!(message.contains("Build bounds exceeded"), "{}: {}", src, message);
            assert_eq!(err.partial.map_or(0, |c| c.count()), 0);
        }
    }

    #[test]
    fn test_runtime_error_message() {
        let err = sandbox().run("x = [1, 2]\ny = x[5]\n").unwrap_err();
        assert_eq!(
            err.error,
            ScriptError::Runtime("line 2: IndexError: list index out of range".to_string())
        );
    }

    #[test]
    fn test_check_without_running() {
        assert!(sandbox().check("build.sphere(0, 0, 0, 5, 'stone')\n").is_ok());
        assert!(matches!(
            sandbox().check("eval('1')\n"),
            Err(ScriptError::SecurityRejected(_))
        ));
    }
}
