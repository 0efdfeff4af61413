//! Minimizes a trace bundle to its minimal causal sequence.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use culprit::{
    EfficientMcsFinder, McsConfig, McsError, McsFinder, McsOutcome, PeekConfig, ReplayConfig,
    SimulationHarness, TraceBundle,
};
use culprit_config::{ConfigLoader, CulpritConfig, DriverKind};
use culprit_sim::{InvariantOracle, ScriptedFactory};
use culprit_types::SimDuration;

use super::show::describe;

/// Command-line values that take precedence over loaded configuration.
#[derive(Debug, Default)]
pub struct Overrides {
    pub invariant: Option<String>,
    pub driver: Option<DriverKind>,
    pub peek_window_ms: Option<u64>,
    pub output: Option<PathBuf>,
    pub skip_seed_check: bool,
}

impl Overrides {
    fn apply(&self, config: &mut CulpritConfig) {
        if let Some(driver) = self.driver {
            config.mcs.driver = driver;
        }
        if let Some(window) = self.peek_window_ms {
            config.peek.window_ms = window;
        }
        config.mcs.skip_seed_check |= self.skip_seed_check;
    }
}

pub fn run(project: &Path, bundle_path: &Path, overrides: Overrides) -> Result<()> {
    let mut config = ConfigLoader::new()
        .with_project_dir(project)
        .load()
        .context("failed to load configuration")?;
    overrides.apply(&mut config);

    let bundle = TraceBundle::load_from_file(bundle_path)
        .with_context(|| format!("failed to load bundle {}", bundle_path.display()))?;
    let world = bundle.world.clone().with_context(|| {
        format!(
            "bundle {} carries no world description to replay against",
            bundle_path.display()
        )
    })?;
    world
        .validate()
        .with_context(|| format!("bundle {} embeds an unusable world", bundle_path.display()))?;

    // Flag, then the bundle's own check, then configuration.
    let invariant = overrides
        .invariant
        .clone()
        .or_else(|| (!bundle.invariant.is_empty()).then(|| bundle.invariant.clone()))
        .unwrap_or_else(|| config.mcs.invariant.clone());
    let check = InvariantOracle::standard().get(&invariant)?;

    let replay = replay_config(&config);
    let dag = bundle.to_dag(peek_config(&config))?;
    let inputs = dag.input_events().len();

    println!("═══════════════════════════════════════════");
    println!("culprit - Minimal Causal Sequence");
    println!("═══════════════════════════════════════════");
    println!("Bundle:    {}", bundle_path.display());
    println!("Invariant: {invariant}");
    println!("Driver:    {:?}", config.mcs.driver);
    println!("Events:    {} ({inputs} input)", dag.len());
    println!("═══════════════════════════════════════════\n");

    let factory = ScriptedFactory::new(world);
    let harness = SimulationHarness::new(factory.clone(), check)
        .with_replay_config(replay)
        .with_settle(SimDuration::from_millis(config.replay.settle_ms));
    let mcs_config = mcs_config(&config);

    let result = match config.mcs.driver {
        DriverKind::Basic => McsFinder::new(dag, &factory, &harness, mcs_config).find(),
        DriverKind::Efficient => EfficientMcsFinder::new(dag, &factory, &harness, mcs_config).find(),
    };

    let outcome = match result {
        Ok(outcome) => outcome,
        Err(err) if err.is_halted() => {
            println!("Run halted by the invariant check: {err}");
            return Ok(());
        }
        Err(McsError::SeedNotReproducible) => {
            anyhow::bail!(
                "the full trace does not reproduce '{invariant}'; nothing to minimize"
            )
        }
        Err(err) => return Err(err).context("minimization failed"),
    };

    print_outcome(&outcome);

    let output_path = match &overrides.output {
        Some(path) => path.clone(),
        None => default_output_path(bundle_path, config.output.directory.as_deref()),
    };
    let events = outcome.dag.events().iter().map(|event| (**event).clone()).collect();
    bundle
        .derive(events)?
        .save_to_file(&output_path)
        .with_context(|| format!("failed to write {}", output_path.display()))?;

    println!("\n✓ Minimized bundle saved: {}", output_path.display());
    println!("\n✓ To inspect: culprit show --events {}", output_path.display());

    Ok(())
}

fn print_outcome(outcome: &McsOutcome) {
    let stats = &outcome.stats;

    println!("═══════════════════════════════════════════");
    println!("Minimization Results");
    println!("═══════════════════════════════════════════");
    println!("Original inputs:  {}", stats.original_inputs);
    println!("Minimized inputs: {}", stats.minimized_inputs);
    println!("Reduction:        {:.1}%", stats.reduction_pct());
    println!("Rounds:           {}", stats.rounds);
    println!("Replays:          {} ({} memoized)", stats.replays, stats.memo_hits);
    println!(
        "Peek cache:       {} hits, {} misses, {} entries",
        stats.cache.hits, stats.cache.misses, stats.cache.entries
    );
    println!("Elapsed:          {:.2?}", stats.elapsed);
    println!("═══════════════════════════════════════════");

    println!("\nMCS:");
    for event in &outcome.mcs {
        println!("{}", describe(event));
    }

    println!("\nViolations:");
    for violation in &outcome.violations {
        println!("  {violation}");
    }
}

fn mcs_config(config: &CulpritConfig) -> McsConfig {
    McsConfig {
        initial_granularity: config.mcs.initial_granularity,
        max_replays: config.mcs.max_replays,
        skip_seed_check: config.mcs.skip_seed_check,
    }
}

fn replay_config(config: &CulpritConfig) -> ReplayConfig {
    ReplayConfig {
        internal_event_timeout: SimDuration::from_millis(config.replay.internal_event_timeout_ms),
        poll_interval: SimDuration::from_millis(config.replay.poll_interval_ms),
    }
}

fn peek_config(config: &CulpritConfig) -> PeekConfig {
    PeekConfig {
        window: SimDuration::from_millis(config.peek.window_ms),
        replay: replay_config(config),
    }
}

/// `trace.json` becomes `trace.mcs.json`, in `directory` when one is configured.
fn default_output_path(bundle_path: &Path, directory: Option<&Path>) -> PathBuf {
    let stem = bundle_path
        .file_stem()
        .map_or_else(|| "trace".to_string(), |stem| stem.to_string_lossy().into_owned());
    let extension = bundle_path
        .extension()
        .map_or_else(|| "json".to_string(), |ext| ext.to_string_lossy().into_owned());
    let file_name = format!("{stem}.mcs.{extension}");

    match directory {
        Some(directory) => directory.join(file_name),
        None => bundle_path.with_file_name(file_name),
    }
}
