use std::sync::Arc;

use anyhow::{Context as AnyhowContext, Result};
use rquickjs::{Context, Ctx, Error as JsError, Function, Runtime, Value};

use crate::config::is_ignored_log;
use crate::dispatch::CancelFlag;

/// Limits applied to the QuickJS runtime at construction.
#[derive(Debug, Clone, Default)]
pub struct EngineLimits {
    pub memory_limit_bytes: Option<usize>,
    pub max_stack_size: Option<usize>,
    pub max_pending_jobs: usize,
    pub ignore_logs: Arc<Vec<String>>,
}

/// JavaScript runtime backed by QuickJS.
///
/// Owns the QuickJS runtime and context. `console` is forwarded to tracing,
/// and running script is interrupted as soon as the cancel flag is raised.
pub struct QuickJsEngine {
    runtime: Runtime,
    context: Context,
    max_pending_jobs: usize,
}

impl QuickJsEngine {
    pub fn new(limits: &EngineLimits, cancel: CancelFlag) -> Result<Self> {
        let runtime = Runtime::new().context("failed to create QuickJS runtime")?;
        if let Some(limit) = limits.memory_limit_bytes {
            runtime.set_memory_limit(limit);
        }
        if let Some(limit) = limits.max_stack_size {
            runtime.set_max_stack_size(limit);
        }
        runtime.set_interrupt_handler(Some(Box::new(move || cancel.is_cancelled())));

        let context = Context::full(&runtime).context("failed to create QuickJS context")?;
        let engine = Self {
            runtime,
            context,
            max_pending_jobs: limits.max_pending_jobs.max(1),
        };
        engine.init_console(Arc::clone(&limits.ignore_logs))?;
        Ok(engine)
    }

    /// Evaluate a script and discard the result.
    pub fn eval(&self, source: &str, filename: &str) -> Result<()> {
        self.eval_with::<()>(source, filename)
    }

    /// Evaluate a script and convert the result into `V`.
    pub fn eval_with<V>(&self, source: &str, filename: &str) -> Result<V>
    where
        V: for<'js> rquickjs::FromJs<'js>,
    {
        let script = Self::with_source_url(source, filename);
        let eval_result = self.context.with(|ctx| match ctx.eval::<V, _>(script) {
            Ok(value) => Ok(value),
            Err(JsError::Exception) => Err(anyhow::anyhow!(
                capture_exception_message(&ctx).unwrap_or_else(|| "QuickJS exception".to_string())
            )),
            Err(err) => Err(anyhow::Error::from(err)),
        });

        let value = eval_result?;
        self.drain_jobs()?;
        Ok(value)
    }

    /// Run pending promise jobs, up to the configured bound.
    ///
    /// Returns whether any job ran.
    pub fn drain_jobs(&self) -> Result<bool> {
        let mut job_count = 0;

        while self.runtime.is_job_pending() {
            match self.runtime.execute_pending_job() {
                Ok(true) => {
                    job_count += 1;
                    if job_count >= self.max_pending_jobs {
                        tracing::warn!(
                            target: "quickjs",
                            "Stopped processing jobs after {} iterations (possible infinite loop)",
                            self.max_pending_jobs
                        );
                        break;
                    }
                }
                Ok(false) => break,
                Err(job_exception) => {
                    tracing::error!(
                        target: "quickjs",
                        "Job execution error: {:?}",
                        job_exception
                    );
                    break;
                }
            }
        }

        if job_count > 0 {
            tracing::debug!(target: "quickjs", "Executed {} pending jobs", job_count);
        }
        Ok(job_count > 0)
    }

    /// Access the underlying context for bindings and host calls.
    pub fn with_context<T, F>(&self, f: F) -> Result<T>
    where
        F: for<'js> FnOnce(Ctx<'js>) -> rquickjs::Result<T>,
    {
        self.context.with(|ctx| match f(ctx.clone()) {
            Ok(value) => Ok(value),
            Err(JsError::Exception) => Err(anyhow::anyhow!(
                capture_exception_message(&ctx).unwrap_or_else(|| "QuickJS exception".to_string())
            )),
            Err(err) => Err(anyhow::Error::from(err)),
        })
    }

    fn init_console(&self, ignore_logs: Arc<Vec<String>>) -> Result<()> {
        self.context
            .with(|ctx| {
                let global = ctx.globals();
                let log_fn = Function::new(ctx.clone(), move |level: String, message: String| {
                    log_from_js(&ignore_logs, &level, &message)
                })?
                .with_name("__loadmaster_log")?;
                global.set("__loadmaster_log", log_fn)?;
                ctx.eval::<(), _>(CONSOLE_BOOTSTRAP.as_bytes())
            })
            .map_err(anyhow::Error::from)
    }

    fn with_source_url(source: &str, filename: &str) -> Vec<u8> {
        let mut script = String::with_capacity(source.len() + filename.len() + 32);
        script.push_str(source);
        if !source.ends_with('\n') {
            script.push('\n');
        }
        script.push_str("//# sourceURL=");
        script.push_str(filename);
        script.push('\n');
        script.into_bytes()
    }
}

fn log_from_js(ignore_logs: &[String], level: &str, message: &str) -> rquickjs::Result<()> {
    if is_ignored_log(ignore_logs, message) {
        return Ok(());
    }
    match level {
        "error" => tracing::error!(target: "quickjs", message = %message),
        "warn" => tracing::warn!(target: "quickjs", message = %message),
        "debug" => tracing::debug!(target: "quickjs", message = %message),
        _ => tracing::info!(target: "quickjs", message = %message),
    }
    Ok(())
}

pub(crate) fn capture_exception_message(ctx: &Ctx<'_>) -> Option<String> {
    let exception: Value = ctx.catch();

    if let Some(obj) = exception.as_object() {
        if let Ok(message) = obj.get::<_, String>("message") {
            if let Ok(stack) = obj.get::<_, String>("stack") {
                if !stack.is_empty() {
                    return Some(format!("Error: {}\nStack: {}", message, stack));
                }
            }
            return Some(format!("Error: {}", message));
        }
    }
    if let Some(text) = exception.as_string().and_then(|s| s.to_string().ok()) {
        return Some(text);
    }

    Some(format!("{:?}", exception))
}

const CONSOLE_BOOTSTRAP: &str = r#"
(() => {
    const global = globalThis;
    if (typeof global.self === 'undefined') {
        global.self = global;
    }

    const stringify = (value) => {
        try {
            if (typeof value === 'string') {
                return value;
            }
            if (value === undefined) {
                return 'undefined';
            }
            if (value === null) {
                return 'null';
            }
            if (typeof value === 'object') {
                try {
                    return JSON.stringify(value);
                } catch (err) {
                    return String(value);
                }
            }
            return String(value);
        } catch (err) {
            return '[unprintable]';
        }
    };

    const logger = (level) => (...args) => {
        try {
            global.__loadmaster_log(level, args.map(stringify).join(' '));
        } catch (err) {
            // console must never throw
        }
    };

    if (typeof global.console !== 'object' || global.console === null) {
        global.console = {};
    }
    global.console.log = logger('info');
    global.console.info = logger('info');
    global.console.debug = logger('debug');
    global.console.warn = logger('warn');
    global.console.error = logger('error');
})();
"#;
