pub mod autosave;
pub mod config;
pub mod forms;
pub mod harness;
pub mod store;

use std::future::Future;
use std::path::Path;
use std::time::Duration;

use tokio::runtime::Runtime;
use tracing_subscriber::EnvFilter;

use crate::forms::FormSchema;
use crate::harness::HarnessError;

/// Form shown when no argument is given.
const DEFAULT_FORM: &str = "clinical-record";

/// How long exit waits on blocking tasks. A stdin read left behind by
/// Ctrl-C stays parked until the next line, so it is not waited for.
const RUNTIME_SHUTDOWN_GRACE: Duration = Duration::from_millis(250);

/// Entry point for the terminal harness.
///
/// `args` are the command-line arguments after the program name: an
/// optional form name, then an optional path to a JSON file with the
/// initial field values.
pub fn run(args: impl IntoIterator<Item = String>) -> Result<(), HarnessError> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config::default_log_filter())),
        )
        .with_writer(std::io::stderr)
        .init();

    tracing::info!("{} starting v{}", config::APP_NAME, config::APP_VERSION);

    let mut args = args.into_iter();
    let form = args.next().unwrap_or_else(|| DEFAULT_FORM.to_string());
    let schema = FormSchema::by_name(&form).ok_or(HarnessError::UnknownForm(form))?;
    let initial_data = args
        .next()
        .map(|path| harness::load_initial_data(Path::new(&path)))
        .transpose()?;
    let config = config::AutosaveConfig::from_env()?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    block_on_then_release(runtime, harness::run_form(schema, config, initial_data))
}

/// Drive `future` to completion, then shut the runtime down without
/// waiting indefinitely on blocking tasks.
fn block_on_then_release<F: Future>(runtime: Runtime, future: F) -> F::Output {
    let output = runtime.block_on(future);
    runtime.shutdown_timeout(RUNTIME_SHUTDOWN_GRACE);
    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::time::Instant;

    #[test]
    fn exit_does_not_wait_on_parked_blocking_reads() {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .unwrap();
        let (release_tx, release_rx) = mpsc::channel::<()>();

        let started = Instant::now();
        let output = block_on_then_release(runtime, async move {
            tokio::task::spawn_blocking(move || {
                let _ = release_rx.recv();
            });
            7
        });

        assert_eq!(output, 7);
        assert!(started.elapsed() < Duration::from_secs(5));
        drop(release_tx);
    }
}
