//! Prints a trace bundle.

use std::fmt::Write as _;
use std::path::Path;

use anyhow::{Context, Result};
use culprit::TraceBundle;
use culprit_types::Event;

pub fn run(path: &Path, events: bool) -> Result<()> {
    let bundle = TraceBundle::load_from_file(path)
        .with_context(|| format!("failed to load bundle {}", path.display()))?;

    println!("Bundle: {}", path.display());
    println!("{}", bundle.summary());

    if events {
        println!();
        for event in &bundle.events {
            println!("{}", describe(event));
        }
    }
    Ok(())
}

/// One line per event: label, time, direction, kind and fingerprint.
pub fn describe(event: &Event) -> String {
    let direction = if event.is_input() { "input" } else { "internal" };
    let mut line = format!(
        "  {:<6} {:>10}  {:<8} {:<24} {}",
        event.label.to_string(),
        event.time.to_string(),
        direction,
        event.kind_name(),
        event.fingerprint()
    );
    if !event.dependent_labels.is_empty() {
        let dependents: Vec<String> = event
            .dependent_labels
            .iter()
            .map(ToString::to_string)
            .collect();
        let _ = write!(line, "  -> {}", dependents.join(", "));
    }
    line
}
