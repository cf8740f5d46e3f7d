mod account;
mod aws;
mod bootstrap;
mod cli;
mod config;
mod directory;
mod org_units;
mod permissions;
mod policy;
mod program;
mod tags;
mod ui;
mod workload;
mod workloads;

use anyhow::{Context, Result, bail};
use clap::Parser;
use colored::Colorize;
use stackkit::{ExecuteSummary, Stack, StackState, StateSink, StepAction, TokioWaiter};
use std::path::PathBuf;

use crate::aws::context::OrgContext;
use crate::aws::provider::AwsOrgProvider;
use crate::aws::remote_state::{FileStateSink, RemoteState};
use crate::cli::Cli;
use crate::config::{EnvTier, Settings};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    let log_level = match cli.verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };

    env_logger::Builder::new()
        .filter_level(if cli.quiet {
            log::LevelFilter::Error
        } else {
            log_level
        })
        .format_timestamp(None)
        .init();

    // Git branch names double as stack names
    let stack_name = config::normalize_stack_name(&cli.stack);
    let env = EnvTier::classify(&stack_name);

    if cli.destroy && env.is_protected() {
        bail!("Stack {stack_name} can't be destroyed, because it's not a test/dev stack.");
    }

    let settings = Settings::load(cli.config.as_deref())?;
    let context = OrgContext::discover(&settings).await?;

    let mut stack = Stack::new(stack_name.as_str());
    program::build_program(
        &mut stack,
        &settings,
        env,
        &context.management_account_id,
        &context.organization_root_id,
        &context.kms_key_arn,
    )?;

    let backend = state_backend(&settings, &context, &stack_name)?;
    let lock = match &backend {
        StateBackend::Remote(remote) if cli.apply || cli.destroy => {
            Some(remote.lock(&stack_name).await?)
        }
        _ => None,
    };
    let mut state = backend.load(&stack_name).await?;
    let sink = backend.sink();

    let provider = AwsOrgProvider::new(
        context.config.clone(),
        &context.region,
        &context.management_account_id,
    );

    let outcome = run(&cli, &stack, &mut state, &provider, sink.as_ref()).await;

    if let Some(lock) = lock {
        if let Err(err) = lock.release().await {
            log::warn!("{err:#}");
        }
    }

    // A destroyed stack keeps no state behind
    if cli.destroy && outcome.is_ok() {
        backend.remove(&stack_name).await?;
    }

    outcome
}

async fn run(
    cli: &Cli,
    stack: &Stack,
    state: &mut StackState,
    provider: &AwsOrgProvider,
    sink: &dyn StateSink,
) -> Result<()> {
    if cli.destroy {
        ui::header(&format!("Destroying stack {}", state.name));
        let summary = stackkit::destroy(state, provider, &TokioWaiter, sink).await?;
        println!();
        ui::success(&format!("Deleted {} resources", summary.deleted));
        return Ok(());
    }

    if cli.apply {
        ui::header(&format!("Applying stack {}", stack.name()));
        let summary = stackkit::apply(stack, state, provider, &TokioWaiter, sink).await?;
        print_summary(&summary, state, cli.quiet);
        return Ok(());
    }

    preview(stack, state, cli.quiet)
}

fn preview(stack: &Stack, state: &StackState, quiet: bool) -> Result<()> {
    let plan = stackkit::plan(stack, state)?;

    ui::header(&format!("Previewing stack {}", stack.name()));

    for step in &plan.steps {
        match step.action {
            StepAction::Create => println!("  {} {}", "+ create".green(), step.urn),
            StepAction::Update => println!("  {} {}", "~ update".yellow(), step.urn),
            StepAction::Converge => println!("  {} {}", "~ converge".yellow(), step.urn),
            StepAction::Wait => println!("  {} {}", "→ wait".cyan(), step.urn),
            StepAction::Unchanged | StepAction::SkipWait => {
                if !quiet {
                    ui::dim(&step.urn);
                }
            }
        }
    }

    println!();
    if plan.pending_changes() == 0 {
        ui::success("No changes - deployed state matches the declaration");
    } else {
        ui::kv("Pending changes", &plan.pending_changes().to_string());
        ui::dim("Run again with --apply to converge");
    }
    Ok(())
}

fn print_summary(summary: &ExecuteSummary, state: &StackState, quiet: bool) {
    println!();
    if summary.changed() {
        ui::success(&format!(
            "{} created, {} updated, {} unchanged",
            summary.created, summary.updated, summary.unchanged
        ));
    } else {
        ui::success("No changes - everything already converged");
    }

    if quiet || state.exports.is_empty() {
        return;
    }
    ui::section("Exports");
    for (name, value) in &state.exports {
        ui::kv(name, &value.to_string());
    }
}

/// Where a stack's state lives for this run.
enum StateBackend {
    Remote(RemoteState),
    Local(PathBuf),
}

fn state_backend(
    settings: &Settings,
    context: &OrgContext,
    stack_name: &str,
) -> Result<StateBackend> {
    match &context.state_bucket {
        Some(bucket) => {
            let prefix = config::backend_prefix(
                &context.management_account_id,
                &settings.github_repo,
                &settings.project_name,
            );
            log::info!(
                "state backend is {}",
                config::backend_url(
                    bucket,
                    &context.management_account_id,
                    &settings.github_repo,
                    &settings.project_name,
                    &context.region,
                )
            );
            Ok(StateBackend::Remote(RemoteState::new(
                &context.config,
                bucket,
                &prefix,
                &context.kms_key_arn,
            )))
        }
        None => {
            let path = config::local_state_path(stack_name)?;
            log::info!(
                "no state bucket is published yet; keeping state at {}",
                path.display()
            );
            Ok(StateBackend::Local(path))
        }
    }
}

impl StateBackend {
    async fn load(&self, stack_name: &str) -> Result<StackState> {
        match self {
            Self::Remote(remote) => remote.load(stack_name).await,
            Self::Local(path) => Ok(StackState::load(path, stack_name)?),
        }
    }

    fn sink(&self) -> Box<dyn StateSink> {
        match self {
            Self::Remote(remote) => Box::new(remote.clone()),
            Self::Local(path) => Box::new(FileStateSink::new(path.clone())),
        }
    }

    async fn remove(&self, stack_name: &str) -> Result<()> {
        match self {
            Self::Remote(remote) => remote.remove(stack_name).await,
            Self::Local(path) => {
                if path.exists() {
                    std::fs::remove_file(path)
                        .with_context(|| format!("Could not remove {}", path.display()))?;
                }
                Ok(())
            }
        }
    }
}
