//! CLI command handling
//!
//! Dispatches CLI commands and formats their results. `dispatch` returns
//! `Ok(false)` when the command ran but what it checked did not hold.

use std::path::Path;
use std::time::Duration;

use colored::Colorize;
use tokio::sync::watch;

use crate::cluster::{ClusterContext, ObjectRef};
use crate::commands::Commands;
use crate::common::config::Config;
use crate::common::Result;
use crate::report::{self, ReportEvaluator, RunArtifacts};
use crate::scenario::{teardown, Scenario, ScenarioReport, Sequencer};
use crate::wait::readiness::Exists;
use crate::wait::{ReadinessTarget, ResourceWaiter, WaitOutcome};

/// Dispatch a CLI command
pub async fn dispatch(command: Commands, config: Config) -> Result<bool> {
    match command {
        Commands::Run {
            scenarios,
            fail_fast,
            timeout,
        } => {
            let ctx = ClusterContext::from_config(config)?;
            let (stop, shutdown) = watch::channel(false);
            let watcher = tokio::spawn(stop_on_signal(stop, timeout.map(Duration::from_secs)));
            let result = run_scenarios(&ctx, &scenarios, fail_fast, Some(shutdown)).await;
            watcher.abort();
            result
        }

        Commands::Evaluate {
            dir,
            test_plan,
            expect,
        } => {
            let artifacts = RunArtifacts::locate(
                &dir,
                &config.certsuite.junit_file,
                &config.certsuite.claim_file,
            );
            if artifacts.is_empty() {
                println!("{} no ledgers found in {}", "!".yellow(), dir.display());
            }
            let evaluation = ReportEvaluator::evaluate(&artifacts, &test_plan)?;
            println!(
                "{} {}",
                format!("{}:", test_plan).white().bold(),
                evaluation.verdict.to_string().bold()
            );

            match expect {
                Some(expected) => match report::validate(expected, evaluation.verdict, &evaluation.excerpt) {
                    Ok(()) => {
                        println!("  {} matches expected verdict", "✓".green());
                        Ok(true)
                    }
                    Err(e) => {
                        println!("  {} {}", "✗".red(), e);
                        Ok(false)
                    }
                },
                None => {
                    println!("{}", evaluation.excerpt.dimmed());
                    Ok(true)
                }
            }
        }

        Commands::Wait {
            kind,
            name,
            namespace,
            timeout,
        } => {
            let timeout = timeout.map_or_else(|| config.timeouts.ready(), Duration::from_secs);
            let interval = config.timeouts.poll_interval();
            let ctx = ClusterContext::from_config(config)?;

            let object = if kind.is_namespaced() {
                ObjectRef::namespaced(kind, namespace.as_deref().unwrap_or("default"), &name)
            } else {
                ObjectRef::cluster_scoped(kind, &name)
            };
            let target = ReadinessTarget::with_default(object.clone())
                .unwrap_or_else(|| ReadinessTarget::new(object, Exists));

            let waiter = ResourceWaiter::from_context(&ctx);
            match waiter.wait_until_ready(&target, timeout, interval).await {
                WaitOutcome::Ready => {
                    println!("{} {} is ready", "✓".green(), target.object);
                    Ok(true)
                }
                WaitOutcome::TimedOut { last_status } => {
                    println!(
                        "{} {} not ready after {}s",
                        "✗".red(),
                        target.object,
                        timeout.as_secs()
                    );
                    println!("  last status: {}", last_status.dimmed());
                    Ok(false)
                }
                WaitOutcome::PollError(cause) => {
                    println!("{} failed to poll {}: {}", "✗".red(), target.object, cause);
                    Ok(false)
                }
            }
        }

        Commands::Cleanup {
            namespaces,
            timeout,
        } => {
            let mut timeouts = config.timeouts.clone();
            if let Some(secs) = timeout {
                timeouts.teardown_secs = secs;
            }
            let ctx = ClusterContext::from_config(config)?;
            match teardown::delete_namespaces(&ctx, &namespaces, &timeouts).await {
                Ok(()) => {
                    for ns in &namespaces {
                        println!("{} namespace {} deleted", "✓".green(), ns);
                    }
                    Ok(true)
                }
                Err(e) => {
                    println!("{} {}", "✗".red(), e);
                    Ok(false)
                }
            }
        }
    }
}

/// Run every scenario file in turn; a failure never stops the others unless `fail_fast`
///
/// Once `shutdown` turns true the running scenario is torn down and the
/// remaining files are skipped.
pub async fn run_scenarios(
    ctx: &ClusterContext,
    paths: &[impl AsRef<Path>],
    fail_fast: bool,
    shutdown: Option<watch::Receiver<bool>>,
) -> Result<bool> {
    let mut sequencer = Sequencer::new(ctx);
    if let Some(shutdown) = shutdown {
        sequencer = sequencer.with_shutdown(shutdown);
    }
    let mut passed = 0usize;
    let mut failed = 0usize;

    for path in paths {
        if sequencer.is_shut_down() {
            println!("\n{} stopping before {}", "!".yellow(), path.as_ref().display());
            failed += 1;
            break;
        }
        let path = path.as_ref();
        let scenario = match Scenario::load(path) {
            Ok(scenario) => scenario,
            Err(e) => {
                println!(
                    "\n{} {} {}",
                    "✗".red().bold(),
                    path.display().to_string().white().bold(),
                    e
                );
                failed += 1;
                if fail_fast {
                    break;
                }
                continue;
            }
        };

        println!(
            "\n{} {}",
            "Running Scenario:".blue().bold(),
            scenario.name.white().bold()
        );
        if let Some(desc) = &scenario.description {
            println!("  {}", desc.dimmed());
        }

        let report = sequencer.run(&scenario).await;
        print_report(&report);
        if report.passed() {
            passed += 1;
        } else {
            failed += 1;
            if fail_fast {
                break;
            }
        }
    }

    let summary = format!("{} passed, {} failed", passed, failed);
    if failed == 0 {
        println!("\n{}\n", summary.green().bold());
    } else {
        println!("\n{}\n", summary.red().bold());
    }
    Ok(failed == 0)
}

/// Flip `stop` on SIGINT, SIGTERM or when `suite_timeout` expires
async fn stop_on_signal(stop: watch::Sender<bool>, suite_timeout: Option<Duration>) {
    let deadline = async {
        match suite_timeout {
            Some(limit) => tokio::time::sleep(limit).await,
            None => std::future::pending().await,
        }
    };

    tokio::select! {
        _ = shutdown_signal() => {}
        _ = deadline => {
            tracing::warn!(
                secs = suite_timeout.map_or(0, |d| d.as_secs()),
                "suite timeout expired, tearing down"
            );
        }
    }
    let _ = stop.send(true);
}

async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "could not listen for Ctrl+C");
        std::future::pending::<()>().await;
    }
}

#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            tokio::select! {
                _ = sigterm.recv() => tracing::info!("Received SIGTERM, tearing down"),
                _ = ctrl_c() => tracing::info!("Received SIGINT (Ctrl+C), tearing down"),
            }
        }
        Err(e) => {
            tracing::warn!(error = %e, "could not listen for SIGTERM");
            ctrl_c().await;
            tracing::info!("Received SIGINT (Ctrl+C), tearing down");
        }
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() {
    ctrl_c().await;
    tracing::info!("Received Ctrl+C, tearing down");
}

fn print_report(report: &ScenarioReport) {
    println!("  namespace: {}", report.namespace.dimmed());
    if let Some(dir) = &report.output_dir {
        println!("  artifacts: {}", dir.display().to_string().dimmed());
    }
    if let Some(verdict) = report.verdict {
        println!("  verdict:   {}", verdict.to_string().bold());
    }

    match &report.outcome {
        Ok(()) => println!("  {} {}", "✓".green(), "expected verdict observed".green()),
        Err(e) => {
            println!(
                "  {} failed after {} [{}]",
                "✗".red(),
                report.reached(),
                e.code()
            );
            for line in e.to_string().lines() {
                println!("    {}", line);
            }
        }
    }
    match &report.cleanup {
        Ok(()) => println!("  {} torn down", "✓".green()),
        Err(e) => println!("  {} {}", "✗".red(), e.to_string().yellow()),
    }
}
