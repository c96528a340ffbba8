use std::cell::RefCell;
use std::rc::Rc;

use anyhow::{anyhow, Result};
use rquickjs::{Ctx, Function, IntoJs, Object};
use serde_json::Value as JsonValue;
use tokio::runtime::Handle;
use tokio::sync::mpsc::UnboundedSender;

use super::engine::{EngineLimits, QuickJsEngine};
use super::timers::{TimerKind, TimerManager};
use crate::command::MutationCommand;
use crate::dispatch::CancelFlag;
use crate::error::BundleLoadError;

/// Script-side services of one runtime instance: the engine, the command
/// buffer filled by `UIManager`, and timers.
pub struct RuntimeHost {
    engine: QuickJsEngine,
    commands: Rc<RefCell<Vec<MutationCommand>>>,
    timers: Rc<TimerManager>,
}

impl RuntimeHost {
    pub fn new(
        limits: &EngineLimits,
        cancel: CancelFlag,
        fired_tx: UnboundedSender<u32>,
    ) -> Result<Self> {
        let engine = QuickJsEngine::new(limits, cancel)?;
        let commands = Rc::new(RefCell::new(Vec::new()));
        let timers = Rc::new(TimerManager::new(Handle::current(), fired_tx));
        install_bindings(&engine, Rc::clone(&commands), Rc::clone(&timers))?;
        Ok(Self {
            engine,
            commands,
            timers,
        })
    }

    pub fn engine(&self) -> &QuickJsEngine {
        &self.engine
    }

    pub fn timers(&self) -> &TimerManager {
        &self.timers
    }

    /// Evaluate the bundle and, when `app_name` is given, run that component
    /// against the root.
    pub fn load_bundle(
        &self,
        source: &str,
        source_name: &str,
        app_name: Option<&str>,
        initial_props: &JsonValue,
    ) -> Result<(), BundleLoadError> {
        self.engine
            .with_context(|ctx| {
                ctx.globals()
                    .set("__loadmaster_app_name", app_name.map(str::to_string))
            })
            .map_err(|err| BundleLoadError::Evaluation(err.to_string()))?;
        self.engine
            .eval(source, source_name)
            .map_err(|err| BundleLoadError::Evaluation(err.to_string()))?;

        let Some(app_name) = app_name else {
            return Ok(());
        };

        let registered = self
            .engine
            .with_context(|ctx| {
                let registry: Object = ctx.globals().get("AppRegistry")?;
                let has: Function = registry.get("hasComponent")?;
                has.call::<_, bool>((app_name.to_string(),))
            })
            .map_err(|err| BundleLoadError::Evaluation(err.to_string()))?;
        if !registered {
            return Err(BundleLoadError::UnregisteredComponent(app_name.to_string()));
        }

        let params = serde_json::to_string(initial_props)
            .map_err(|err| BundleLoadError::Evaluation(err.to_string()))?;
        self.engine
            .with_context(|ctx| {
                let registry: Object = ctx.globals().get("AppRegistry")?;
                let run: Function = registry.get("runApplication")?;
                let params = ctx.json_parse(params.as_bytes())?;
                run.call::<_, ()>((app_name.to_string(), params))
            })
            .map_err(|err| BundleLoadError::Evaluation(err.to_string()))?;
        self.drain_jobs();
        Ok(())
    }

    /// Invoke the callback for a fired timer. Returns whether one ran.
    pub fn fire_timer(&self, id: u32) -> Result<bool> {
        let Some(kind) = self.timers.take_fired(id) else {
            return Ok(false);
        };
        let timestamp = self.timers.timestamp_ms();
        self.engine.with_context(|ctx| {
            let invoke: Function = ctx.globals().get("__loadmaster_invoke_timer")?;
            match kind {
                TimerKind::AnimationFrame => invoke.call::<_, ()>((id, timestamp)),
                _ => invoke.call::<_, ()>((id,)),
            }
        })?;
        self.drain_jobs();
        Ok(true)
    }

    pub fn drain_jobs(&self) {
        if let Err(err) = self.engine.drain_jobs() {
            tracing::error!(target: "quickjs", error = %err, "failed to drain pending jobs");
        }
    }

    pub fn push_command(&self, command: MutationCommand) {
        self.commands.borrow_mut().push(command);
    }

    pub fn pending_commands(&self) -> usize {
        self.commands.borrow().len()
    }

    /// Everything emitted since the previous call, in emission order.
    pub fn take_commands(&self) -> Vec<MutationCommand> {
        std::mem::take(&mut *self.commands.borrow_mut())
    }
}

fn install_bindings(
    engine: &QuickJsEngine,
    commands: Rc<RefCell<Vec<MutationCommand>>>,
    timers: Rc<TimerManager>,
) -> Result<()> {
    engine.with_context(|ctx| {
        let global = ctx.globals();

        {
            let commands = Rc::clone(&commands);
            let func = Function::new(
                ctx.clone(),
                move |ctx: Ctx<'_>, payload: String| -> rquickjs::Result<()> {
                    match serde_json::from_str::<MutationCommand>(&payload) {
                        Ok(command) => {
                            commands.borrow_mut().push(command);
                            Ok(())
                        }
                        Err(err) => host_error(&ctx, anyhow!("malformed UIManager command: {err}")),
                    }
                },
            )?
            .with_name("__loadmaster_emit")?;
            global.set("__loadmaster_emit", func)?;
        }

        {
            let timers = Rc::clone(&timers);
            let func = Function::new(
                ctx.clone(),
                move |ctx: Ctx<'_>, delay: f64, kind: String| -> rquickjs::Result<u32> {
                    match TimerKind::parse(&kind) {
                        Some(kind) => Ok(timers.register(delay, kind)),
                        None => host_error(&ctx, anyhow!("unknown timer kind {kind:?}")),
                    }
                },
            )?
            .with_name("__loadmaster_timer_register")?;
            global.set("__loadmaster_timer_register", func)?;
        }

        {
            let timers = Rc::clone(&timers);
            let func = Function::new(ctx.clone(), move |id: u32| {
                timers.clear(id);
            })?
            .with_name("__loadmaster_timer_clear")?;
            global.set("__loadmaster_timer_clear", func)?;
        }

        ctx.eval::<(), _>(HOST_BOOTSTRAP.as_bytes())
    })
}

fn host_error<T>(ctx: &Ctx<'_>, err: anyhow::Error) -> rquickjs::Result<T> {
    tracing::error!(target: "quickjs", "host call failed: {err}");
    let value = format!("{err}").into_js(ctx)?;
    Err(ctx.throw(value))
}

const HOST_BOOTSTRAP: &str = r#"
(() => {
    const global = globalThis;
    const emit = (command) => global.__loadmaster_emit(JSON.stringify(command));

    const tag = (value, name) => {
        if (typeof value !== 'number' || !Number.isInteger(value) || value < 0) {
            throw new TypeError(name + ' must be a non-negative integer, got ' + String(value));
        }
        return value;
    };
    const bag = (props) => (props && typeof props === 'object') ? props : {};

    global.UIManager = Object.freeze({
        rootTag: 0,
        createView(id, viewType, props) {
            emit({
                op: 'create',
                id: tag(id, 'id'),
                view_type: String(viewType),
                props: bag(props),
            });
        },
        updateView(id, props) {
            emit({ op: 'update', id: tag(id, 'id'), props: bag(props) });
        },
        insertChild(parent, child, index) {
            emit({
                op: 'insert_child',
                parent: tag(parent, 'parent'),
                child: tag(child, 'child'),
                index: tag(index, 'index'),
            });
        },
        removeChild(parent, child) {
            emit({ op: 'remove_child', parent: tag(parent, 'parent'), child: tag(child, 'child') });
        },
        deleteView(id) {
            emit({ op: 'delete', id: tag(id, 'id') });
        },
    });

    const components = new Map();
    global.AppRegistry = Object.freeze({
        registerComponent(name, provider) {
            if (typeof provider !== 'function') {
                throw new TypeError('registerComponent expects a component provider function');
            }
            components.set(String(name), provider);
            return String(name);
        },
        hasComponent(name) {
            return components.has(String(name));
        },
        getAppKeys() {
            return Array.from(components.keys());
        },
        runApplication(name, params) {
            const provider = components.get(String(name));
            if (!provider) {
                throw new Error('Application "' + name + '" has not been registered.');
            }
            const component = provider();
            if (typeof component !== 'function') {
                throw new TypeError(
                    'Application "' + name + '" did not provide a component function');
            }
            component(Object.assign({ rootTag: global.UIManager.rootTag }, params || {}));
        },
    });

    const timers = new Map();
    const schedule = (kind, callback, delay, args) => {
        if (typeof callback !== 'function') {
            throw new TypeError('timer callback must be a function');
        }
        const id = global.__loadmaster_timer_register(Number(delay) || 0, kind);
        timers.set(id, { kind, callback, args });
        return id;
    };
    const cancel = (id) => {
        if (timers.delete(id)) {
            global.__loadmaster_timer_clear(id);
        }
    };

    global.setTimeout = (callback, delay, ...args) => schedule('timeout', callback, delay, args);
    global.setInterval = (callback, delay, ...args) => schedule('interval', callback, delay, args);
    global.requestAnimationFrame = (callback) => schedule('frame', callback, 0, []);
    global.clearTimeout = cancel;
    global.clearInterval = cancel;
    global.cancelAnimationFrame = cancel;

    global.__loadmaster_invoke_timer = (id, timestamp) => {
        const entry = timers.get(id);
        if (!entry) {
            return;
        }
        if (entry.kind !== 'interval') {
            timers.delete(id);
        }
        if (entry.kind === 'frame') {
            entry.callback(timestamp);
        } else {
            entry.callback(...entry.args);
        }
    };
})();
"#;
