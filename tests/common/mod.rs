#![allow(dead_code)]

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use loadmaster::{
    BridgeConfig, BridgeContext, BundleLoader, BundleRef, MemoryBundleLoader, NativeToolkit,
    PageAdapter, PumpReport,
};

pub const SETTLE: Duration = Duration::from_secs(5);

/// Panel with one text child attached to the root.
pub fn panel_bundle(text: &str) -> String {
    format!(
        r#"
        UIManager.createView(1, 'StackPanel', {{ padding: 4 }});
        UIManager.createView(2, 'TextBlock', {{ text: '{text}' }});
        UIManager.insertChild(1, 2, 0);
        UIManager.insertChild(UIManager.rootTag, 1, 0);
        "#
    )
}

pub fn memory_context(
    bundles: &[(&str, String)],
    config: BridgeConfig,
) -> (Arc<MemoryBundleLoader>, BridgeContext) {
    let loader = Arc::new(MemoryBundleLoader::new());
    for (name, source) in bundles {
        loader.insert(BundleRef::id(*name), source.clone());
    }
    let context = BridgeContext::new(Arc::clone(&loader) as Arc<dyn BundleLoader>, config);
    (loader, context)
}

/// Pump until `done` holds, summing the reports. Panics after [`SETTLE`].
pub fn pump_until<T, F>(page: &mut PageAdapter<T>, mut done: F) -> PumpReport
where
    T: NativeToolkit,
    F: FnMut(&PageAdapter<T>) -> bool,
{
    let deadline = Instant::now() + SETTLE;
    let mut total = PumpReport::default();
    loop {
        let report = page.pump();
        total.messages += report.messages;
        total.batches += report.batches;
        total.applied += report.applied;
        total.dropped += report.dropped;
        total.stale += report.stale;
        total.committed |= report.committed;
        total.became_ready |= report.became_ready;
        total.load_failed |= report.load_failed;
        total.reloaded |= report.reloaded;
        if done(page) {
            return total;
        }
        if Instant::now() >= deadline {
            panic!("page did not settle within {SETTLE:?}: {total:?}");
        }
        thread::sleep(Duration::from_millis(5));
    }
}
