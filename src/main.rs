use std::thread;
use std::time::{Duration, Instant};

use loadmaster::{
    ActivationRegistry, BridgeConfig, BridgeContext, BundleRef, ContentSlot, MemoryToolkit,
    TreeSnapshot, MAIN_PAGE_CLASS,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

const FRAME: Duration = Duration::from_millis(16);
const RUN_WITHOUT_WATCH: Duration = Duration::from_secs(10);

fn usage() -> ! {
    eprintln!("usage: loadmaster <bundle> [--watch]");
    std::process::exit(2);
}

fn main() {
    let mut bundle_arg = None;
    let mut watch = false;
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--watch" => watch = true,
            "-h" | "--help" => usage(),
            _ if bundle_arg.is_none() => bundle_arg = Some(arg),
            _ => usage(),
        }
    }
    let Some(raw_bundle) = bundle_arg else { usage() };

    let subscriber_result = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .try_init();
    if subscriber_result.is_err() {
        // tracing was already initialised; continue silently
    }

    let bundle = match BundleRef::parse(&raw_bundle) {
        Ok(bundle) => bundle,
        Err(err) => {
            eprintln!("invalid bundle reference {raw_bundle}: {err}");
            std::process::exit(2);
        }
    };

    let mut config = match BridgeConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("failed to load bridge config: {err}");
            std::process::exit(1);
        }
    };
    config.watch_bundle |= watch;
    if config.bundle_root.is_none() {
        config.bundle_root = std::env::current_dir().ok();
    }
    let watching = config.watch_bundle;
    let context = BridgeContext::from_config(config);

    let registry = ActivationRegistry::with_main_page(bundle);
    let mut page = match registry.activate(MAIN_PAGE_CLASS, &context, MemoryToolkit::new()) {
        Ok(page) => page,
        Err(err) => {
            eprintln!("{err}");
            std::process::exit(1);
        }
    };
    page.on_navigated_to();

    let started = Instant::now();
    let mut last_printed: Option<(ContentSlot, Option<TreeSnapshot>)> = None;
    loop {
        let report = page.pump();
        if report.committed {
            let current = (page.toolkit().content(), page.toolkit().content_tree());
            if last_printed.as_ref() != Some(&current) {
                print_content(&current.0, current.1.as_ref());
                last_printed = Some(current);
            }
        }
        if !watching && started.elapsed() >= RUN_WITHOUT_WATCH {
            break;
        }
        thread::sleep(FRAME);
    }

    info!("shutting down");
    page.on_destroy();
}

fn print_content(slot: &ContentSlot, tree: Option<&TreeSnapshot>) {
    let value = serde_json::json!({
        "content": slot,
        "tree": tree,
    });
    match serde_json::to_string_pretty(&value) {
        Ok(text) => println!("{text}"),
        Err(err) => eprintln!("failed to encode tree: {err}"),
    }
}
