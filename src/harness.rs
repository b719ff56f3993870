//! Terminal form view.
//!
//! Stands in for the browser page: each stdin line is an input event,
//! Ctrl-C or end of input is the unload. Saves land in an in-memory store
//! after a simulated server delay.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::runtime::Handle;

use crate::autosave::{
    AutosaveController, AutosaveEvent, AutosaveSession, ControllerState, Draft, SessionError,
    ShutdownSignal, StoreSink, TokioScheduler,
};
use crate::config::{AutosaveConfig, ConfigError};
use crate::forms::{clinical_record_sample, FormError, FormSchema};
use crate::store::{FormStore, InMemoryFormStore, StoreError};

/// The demo pages pretend every save takes a second.
const SIMULATED_SAVE_LATENCY: Duration = Duration::from_secs(1);

#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    #[error("Unknown form: {0} (expected clinical-record or session-notes)")]
    UnknownForm(String),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Form data error: {0}")]
    Form(#[from] FormError),
}

/// Read initial form data from a JSON file.
pub fn load_initial_data(path: &Path) -> Result<Value, HarnessError> {
    let text = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&text)?)
}

/// Initial Draft for `schema`: caller-supplied data when present, otherwise
/// the demo record for the clinical form and blank fields for the rest.
pub fn initial_draft(schema: &FormSchema, data: Option<&Value>) -> Result<Draft, HarnessError> {
    match data {
        Some(data) => Ok(schema.draft_from_json(data)?),
        None if *schema == FormSchema::clinical_record() => Ok(clinical_record_sample()),
        None => Ok(schema.empty_draft()),
    }
}

/// One parsed line of input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Event(AutosaveEvent),
    Status,
    Help,
    Quit,
}

/// Parse `field=value`, `:save`, `:status`, `:help` or `:quit`.
/// Blank lines parse to `None`.
pub fn parse_command(line: &str) -> Result<Option<Command>, String> {
    let line = line.trim_end_matches(['\r', '\n']);
    if line.trim().is_empty() {
        return Ok(None);
    }

    if let Some(command) = line.trim().strip_prefix(':') {
        return match command {
            "save" | "w" => Ok(Some(Command::Event(AutosaveEvent::ManualSave))),
            "status" => Ok(Some(Command::Status)),
            "help" | "h" => Ok(Some(Command::Help)),
            "quit" | "q" => Ok(Some(Command::Quit)),
            other => Err(format!("unknown command :{other}")),
        };
    }

    match line.split_once('=') {
        Some((name, value)) if !name.trim().is_empty() => {
            Ok(Some(Command::Event(AutosaveEvent::FieldChanged {
                name: name.trim().to_string(),
                value: value.to_string(),
            })))
        }
        _ => Err(format!("expected field=value, got {line:?}")),
    }
}

const HELP: &str = "\
  field=value   edit a field (value may be empty)
  :save         save now
  :status       print the save status
  :quit         leave (unsaved edits are flushed)";

/// Run the interactive form until the user leaves.
pub async fn run_form(
    schema: FormSchema,
    config: AutosaveConfig,
    initial_data: Option<Value>,
) -> Result<(), HarnessError> {
    let initial = initial_draft(&schema, initial_data.as_ref())?;
    let store = Arc::new(InMemoryFormStore::new());
    let sink = Arc::new(StoreSink::new(store.clone()).with_latency(SIMULATED_SAVE_LATENCY));

    let controller = AutosaveController::new(schema.form_id, initial, sink, config.clone());
    let scheduler = TokioScheduler::new(Handle::current());
    let signal = ShutdownSignal::new();
    let session = AutosaveSession::mount(controller.clone(), &scheduler, &signal)?;

    println!("{}: autosaves every {}s", schema.title, config.save_interval.as_secs());
    for field in schema.fields {
        let value = controller.draft().get(field.name).unwrap_or_default().to_string();
        println!("  {} ({}): {}", field.label, field.name, value);
    }
    println!("{HELP}");

    let mut status = controller.subscribe();
    let badge = tokio::spawn(async move {
        let mut last = status.borrow().label();
        while status.changed().await.is_ok() {
            let label = status.borrow_and_update().label();
            if label != last {
                println!("[{label}]");
                last = label;
            }
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        let line = tokio::select! {
            _ = &mut ctrl_c => {
                tracing::info!("Interrupted");
                break;
            }
            line = lines.next_line() => line?,
        };
        let Some(line) = line else { break };

        match parse_command(&line) {
            Ok(None) => {}
            Ok(Some(Command::Quit)) => break,
            Ok(Some(Command::Help)) => println!("{HELP}"),
            Ok(Some(Command::Status)) => {
                println!("{}", serde_json::to_string_pretty(&controller.report())?);
            }
            Ok(Some(Command::Event(event))) => {
                // Never block input on the sink.
                if let Some(save) = controller.handle(event) {
                    tokio::spawn(save);
                }
            }
            Err(message) => println!("? {message}"),
        }
    }

    if signal.trigger() {
        println!("Flushing unsaved changes...");
        let mut status = controller.subscribe();
        let settled = tokio::time::timeout(
            config.unload_grace,
            status.wait_for(|report| report.state != ControllerState::Saving),
        )
        .await
        .is_ok();
        if !settled {
            tracing::warn!(
                grace_ms = config.unload_grace.as_millis() as u64,
                "Leaving before the last save was confirmed"
            );
        }
    }

    session.unmount();
    badge.abort();

    for record in store.list()? {
        println!(
            "{} saved {} time(s), last at {}",
            record.form_id,
            record.revision,
            record.saved_at.to_rfc3339()
        );
    }
    Ok(())
}
