/// `scripting/engine.rs` - resource-limited script execution
///
/// A chunk is compiled by the privileged interpreter against the sandbox's
/// environment and then run as a single coroutine. With a budget set, a
/// count hook fires after that many VM instructions, trips the sandbox's
/// `CancelToken` and raises a fault that unwinds the coroutine.
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use mlua::{ChunkMode, HookTriggers, MultiValue};

use super::sandbox::Sandbox;
use crate::error::ScriptError;

pub const RESOURCE_LIMIT_MESSAGE: &str = "Script overran resource limits.";

// ── CancelToken ───────────────────────────────────────────────────────────────

/// Tripped once by the instruction hook, checked after the run finishes.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trip(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_tripped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

// ── Execution ─────────────────────────────────────────────────────────────────

impl Sandbox {
    /// Compile and run `script`. Compile errors never reach execution; a
    /// tripped budget is reported as `ResourceLimit` even if the script
    /// caught the fault itself.
    pub fn execute(
        &self,
        script: impl AsRef<[u8]>,
        label: &str,
        budget: Option<u32>,
    ) -> Result<MultiValue, ScriptError> {
        let function = self
            .lua
            .load(script.as_ref())
            .set_name(format!("={label}"))
            .set_mode(ChunkMode::Text)
            .set_environment(self.env.clone())
            .into_function()
            .map_err(|e| match e {
                mlua::Error::SyntaxError { message, .. } => ScriptError::Compile {
                    label: label.to_string(),
                    message,
                },
                other => ScriptError::Compile {
                    label: label.to_string(),
                    message: other.to_string(),
                },
            })?;

        let thread = self.lua.create_thread(function)?;
        self.token.reset();

        if let Some(budget) = budget {
            let token = self.token.clone();
            thread.set_hook(
                HookTriggers::new().every_nth_instruction(budget.max(1)),
                move |_, _| {
                    token.trip();
                    Err(mlua::Error::runtime(RESOURCE_LIMIT_MESSAGE))
                },
            );
        }

        log::debug!("executing {label} (budget: {budget:?})");
        let result = thread.resume::<MultiValue>(());

        if self.token.is_tripped() {
            log::warn!("{label} overran its instruction budget");
            return Err(ScriptError::ResourceLimit {
                label: label.to_string(),
                budget: budget.unwrap_or_default(),
            });
        }

        result.map_err(|e| ScriptError::Runtime {
            label: label.to_string(),
            message: fault_message(&e),
        })
    }
}

/// The script-facing message of a fault, without mlua's own prefixes.
fn fault_message(err: &mlua::Error) -> String {
    match err {
        mlua::Error::RuntimeError(message) => message.clone(),
        mlua::Error::CallbackError { cause, .. } => fault_message(cause),
        other => other.to_string(),
    }
}
