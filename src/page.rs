use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::bundle::BundleRef;
use crate::context::BridgeContext;
use crate::dispatch::{NativeDispatcher, NativeEnvelope, NativeMessage, ReloadTrigger};
use crate::error::{BridgeError, BridgeResult};
use crate::instance::InstanceManager;
use crate::js::RuntimeScope;
use crate::lifecycle::LifecycleState;
use crate::reload::BundleWatcher;
use crate::session::BridgeSession;
use crate::toolkit::{ContentSlot, NativeOp, NativeToolkit};

/// What one call to [`PageAdapter::pump`] did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PumpReport {
    pub messages: usize,
    pub batches: usize,
    pub applied: usize,
    pub dropped: usize,
    /// Messages from sessions that are no longer current.
    pub stale: usize,
    pub committed: bool,
    pub became_ready: bool,
    pub load_failed: bool,
    pub reloaded: bool,
}

/// The native page hosting one script-driven UI.
///
/// All methods must be called on the thread that constructed the page (the
/// host's UI thread).
pub struct PageAdapter<T: NativeToolkit> {
    context: BridgeContext,
    manager: InstanceManager,
    dispatcher: NativeDispatcher,
    toolkit: T,
    bundle: BundleRef,
    current: Option<BridgeSession>,
    /// Previous session whose tree stays on screen until the reloaded one is
    /// ready.
    retiring: Option<BridgeSession>,
    content: ContentSlot,
    suspended: bool,
    destroyed: bool,
    watcher: Option<BundleWatcher>,
}

impl<T: NativeToolkit> PageAdapter<T> {
    /// Create the page and start loading `bundle`. Start-up failures are
    /// shown as fallback content rather than returned.
    pub fn new(context: BridgeContext, bundle: BundleRef, toolkit: T) -> Self {
        let manager = InstanceManager::new(&context);
        let mut page = Self {
            context,
            manager,
            dispatcher: NativeDispatcher::new(),
            toolkit,
            bundle,
            current: None,
            retiring: None,
            content: ContentSlot::Placeholder,
            suspended: false,
            destroyed: false,
            watcher: None,
        };
        page.toolkit
            .commit(vec![NativeOp::SetContent(ContentSlot::Placeholder)]);
        page.watcher = page.start_watcher();
        page.start_session();
        page
    }

    pub fn content(&self) -> &ContentSlot {
        &self.content
    }

    pub fn bundle(&self) -> &BundleRef {
        &self.bundle
    }

    pub fn session(&self) -> Option<&BridgeSession> {
        self.current.as_ref()
    }

    pub fn state(&self) -> Option<LifecycleState> {
        self.current.as_ref().map(|session| session.state())
    }

    pub fn toolkit(&self) -> &T {
        &self.toolkit
    }

    pub fn toolkit_mut(&mut self) -> &mut T {
        &mut self.toolkit
    }

    pub fn is_suspended(&self) -> bool {
        self.suspended
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    pub fn is_watching(&self) -> bool {
        self.watcher.is_some()
    }

    /// Handle for development tooling that wants to request a reload from
    /// another thread.
    pub fn reload_trigger(&self) -> ReloadTrigger {
        self.dispatcher.reload_trigger()
    }

    pub fn on_navigated_to(&mut self) {
        if self.destroyed {
            return;
        }
        debug!(target: "page", bundle = %self.bundle, "navigated to");
        if self.suspended {
            self.on_resuming();
        }
    }

    /// Quiesce the runtime. Timers and frames stop; no state is dropped.
    pub fn on_suspending(&mut self) {
        if self.destroyed || self.suspended {
            return;
        }
        self.suspended = true;
        if let Some(session) = &self.current {
            if let Err(err) = session.bridge().pause() {
                debug!(target: "page", error = %err, "pause hint not delivered");
            }
        }
        info!(target: "page", "suspended");
    }

    pub fn on_resuming(&mut self) {
        if self.destroyed || !self.suspended {
            return;
        }
        self.suspended = false;
        if let Some(session) = &self.current {
            if let Err(err) = session.bridge().resume() {
                debug!(target: "page", error = %err, "resume hint not delivered");
            }
        }
        info!(target: "page", "resumed");
    }

    /// Replace the runtime with a fresh one for the same bundle. The current
    /// content stays until the new tree is ready.
    pub fn on_reload_requested(&mut self) {
        if self.destroyed {
            return;
        }
        info!(target: "page", bundle = %self.bundle, "reload requested");

        let Some(mut previous) = self.current.take() else {
            self.start_session();
            return;
        };

        let reloaded = self
            .manager
            .reload(previous.instance_mut(), &self.dispatcher);

        if previous.is_presented() && self.retiring.is_none() {
            previous.retire(&self.manager);
            self.retiring = Some(previous);
        } else {
            // Never shown, so it can go right away.
            let ops = previous.teardown(&self.manager);
            if !ops.is_empty() {
                self.toolkit.commit(ops);
            }
        }

        match reloaded {
            Ok(instance) => self.install_session(BridgeSession::new(instance)),
            Err(err) => self.show_fallback(&err),
        }
    }

    pub fn on_navigated_away(&mut self) {
        self.on_destroy();
    }

    /// Dispose the runtime and release the native tree. Must run before the
    /// host releases the page.
    pub fn on_destroy(&mut self) {
        if self.destroyed {
            return;
        }
        self.destroyed = true;
        self.watcher = None;

        let mut ops = Vec::new();
        if let Some(mut session) = self.retiring.take() {
            ops.extend(session.teardown(&self.manager));
        }
        if let Some(mut session) = self.current.take() {
            ops.extend(session.teardown(&self.manager));
        }
        self.content = ContentSlot::Placeholder;
        ops.push(NativeOp::SetContent(ContentSlot::Placeholder));
        self.toolkit.commit(ops);

        let discarded = self.dispatcher.drain().len();
        info!(target: "page", discarded, "page destroyed");
    }

    /// Run everything the runtime posted since the last pump and commit the
    /// result as one visual update.
    pub fn pump(&mut self) -> PumpReport {
        let mut report = PumpReport::default();
        if self.destroyed {
            self.dispatcher.drain();
            return report;
        }

        #[cfg(feature = "log_batch_times")]
        let started = std::time::Instant::now();

        let mut became_ready = false;
        let mut reload_requested = false;
        let mut failure = None;

        for NativeEnvelope { session, message } in self.dispatcher.drain() {
            report.messages += 1;
            let Some(session) = session else {
                if matches!(message, NativeMessage::ReloadRequested) {
                    reload_requested = true;
                }
                continue;
            };
            let Some(current) = self.current.as_mut().filter(|s| s.id() == session) else {
                report.stale += 1;
                continue;
            };

            match message {
                NativeMessage::Batch(commands) => {
                    report.batches += 1;
                    match current.apply(commands) {
                        Some(batch) => {
                            report.applied += batch.applied;
                            report.dropped += batch.dropped_count();
                        }
                        None => report.stale += 1,
                    }
                }
                NativeMessage::Ready => became_ready = true,
                NativeMessage::LoadFailed(err) => failure = Some(err),
                NativeMessage::Task(job) => job(),
                NativeMessage::ReloadRequested => reload_requested = true,
            }
        }

        if let Some(err) = failure {
            self.show_fallback(&err);
            report.load_failed = true;
            report.committed = true;
            if reload_requested {
                self.on_reload_requested();
                report.reloaded = true;
            }
            return report;
        }

        let mut ops = match self.current.as_mut() {
            Some(session) => session.take_pending(),
            None => Vec::new(),
        };

        if became_ready {
            if let Some(current) = self.current.as_mut() {
                if !current.is_presented() {
                    if let Some(mut previous) = self.retiring.take() {
                        ops.extend(previous.teardown(&self.manager));
                    }
                    let slot = ContentSlot::Root {
                        handle: current.root_handle(),
                    };
                    ops.push(NativeOp::SetContent(slot.clone()));
                    self.content = slot;
                    current.mark_presented();
                    report.became_ready = true;
                    info!(target: "page", session = current.id(), "content root attached");
                }
            }
        }

        if !ops.is_empty() {
            self.toolkit.commit(ops);
            report.committed = true;
        }

        #[cfg(feature = "log_batch_times")]
        debug!(target: "page", elapsed_us = started.elapsed().as_micros() as u64, "pump finished");

        if reload_requested {
            self.on_reload_requested();
            report.reloaded = true;
        }
        report
    }

    /// Post work to the current runtime.
    pub fn post_to_runtime<F>(&self, f: F) -> BridgeResult<()>
    where
        F: FnOnce(&mut RuntimeScope<'_>) + Send + 'static,
    {
        match &self.current {
            Some(session) => session.bridge().post_to_runtime(f),
            None => Err(BridgeError::Disposed),
        }
    }

    /// Blocking call into the current runtime, bounded by the configured
    /// timeout.
    pub fn call_sync<R, F>(&self, f: F) -> BridgeResult<R>
    where
        R: Send + 'static,
        F: FnOnce(&mut RuntimeScope<'_>) -> R + Send + 'static,
    {
        match &self.current {
            Some(session) => session.bridge().call_sync(f),
            None => Err(BridgeError::Disposed),
        }
    }

    fn start_session(&mut self) {
        let created = self.manager.create(
            self.bundle.clone(),
            Arc::clone(self.context.config()),
            &self.dispatcher,
        );
        match created {
            Ok(instance) => self.install_session(BridgeSession::new(instance)),
            Err(err) => self.show_fallback(&err),
        }
    }

    fn install_session(&mut self, session: BridgeSession) {
        if self.suspended {
            if let Err(err) = session.bridge().pause() {
                debug!(target: "page", error = %err, "pause hint not delivered");
            }
        }
        self.current = Some(session);
    }

    fn show_fallback(&mut self, err: &BridgeError) {
        error!(target: "page", bundle = %self.bundle, error = %err, "showing fallback content");
        let mut ops = Vec::new();
        if let Some(mut session) = self.retiring.take() {
            ops.extend(session.teardown(&self.manager));
        }
        if let Some(mut session) = self.current.take() {
            ops.extend(session.teardown(&self.manager));
        }
        let slot = ContentSlot::Fallback {
            message: err.to_string(),
        };
        ops.push(NativeOp::SetContent(slot.clone()));
        self.content = slot;
        self.toolkit.commit(ops);
    }

    fn start_watcher(&self) -> Option<BundleWatcher> {
        if !self.context.config().watch_bundle {
            return None;
        }
        let Some(path) = self.context.loader().watch_path(&self.bundle) else {
            warn!(target: "page", bundle = %self.bundle, "bundle has no file to watch");
            return None;
        };
        match BundleWatcher::spawn(&path, self.dispatcher.reload_trigger()) {
            Ok(watcher) => Some(watcher),
            Err(err) => {
                warn!(
                    target: "page",
                    path = %path.display(),
                    error = %err,
                    "failed to watch bundle"
                );
                None
            }
        }
    }
}

impl<T: NativeToolkit> Drop for PageAdapter<T> {
    fn drop(&mut self) {
        self.on_destroy();
    }
}
