//! Process-wide failure hooks.
//!
//! One installation point, no teardown: the hooks live as long as the
//! process. A panic that unwinds out of the host binary's `main` remains
//! fatal; panics inside request handlers are caught separately by the
//! orchestrator's panic-capture layer and become classified 500s.

use std::any::Any;
use std::future::Future;
use std::panic;
use std::sync::Once;

use crate::config::Environment;

static INSTALL: Once = Once::new();

/// Install the process-wide panic hook. Safe to call more than once;
/// only the first call takes effect.
pub fn install(environment: Environment) {
    INSTALL.call_once(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            let location = info
                .location()
                .map_or_else(|| "unknown".to_owned(), ToString::to_string);
            tracing::error!(
                environment = %environment,
                %location,
                payload = payload_str(info.payload()),
                "panic"
            );
            previous(info);
        }));
    });
}

/// Run a background task under supervision. A panicked task is always
/// logged; it terminates the process only outside production.
pub fn spawn_supervised<F>(
    name: &'static str,
    environment: Environment,
    future: F,
) -> tokio::task::JoinHandle<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        if let Err(err) = tokio::spawn(future).await {
            if err.is_panic() {
                tracing::error!(task = name, "background task panicked");
                if !environment.is_production() {
                    std::process::exit(1);
                }
            }
        }
    })
}

fn payload_str(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| payload.downcast_ref::<&'static str>().copied())
        .unwrap_or("non-string panic payload")
}
