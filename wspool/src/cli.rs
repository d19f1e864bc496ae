//! CLI-only subcommand implementations: `check` and `bench`.
//!
//! Both run against the simulated gateway; `check` never starts the pool.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::time::Instant;

use wspool::config::Config;
use wspool::gateway::SimulatedGateway;
use wspool::metrics::MetricsRegistry;
use wspool::naming::RandomNames;
use wspool::workspace::PoolManager;

// ---------------------------------------------------------------------------
// check
// ---------------------------------------------------------------------------

struct Check {
    label: &'static str,
    ok: bool,
    detail: String,
    fix: Option<String>,
}

impl Check {
    fn pass(label: &'static str, detail: impl Into<String>) -> Self {
        Self { label, ok: true, detail: detail.into(), fix: None }
    }

    fn fail(label: &'static str, detail: impl Into<String>, fix: impl Into<String>) -> Self {
        Self { label, ok: false, detail: detail.into(), fix: Some(fix.into()) }
    }
}

/// Run `wspool check`. Returns `Ok(())` if all checks pass, `Err` otherwise.
pub fn run_check(config: &Config) -> Result<()> {
    println!("Checking configuration...\n");

    let checks = vec![
        check_pool(config),
        check_default_profile(config),
        check_start_budget(config),
        check_shutdown_budget(config),
    ];

    let all_pass = checks.iter().all(|c| c.ok);

    for c in &checks {
        let icon = if c.ok { "\u{2713}" } else { "\u{2717}" };
        println!("  {} {} ({})", icon, c.label, c.detail);
        if !c.ok {
            if let Some(fix) = &c.fix {
                println!("    Fix: {}", fix);
            }
        }
    }

    println!();
    if all_pass {
        println!("All checks passed. Run: wspool serve --config config.toml");
        Ok(())
    } else {
        let failed = checks.iter().filter(|c| !c.ok).count();
        anyhow::bail!("{} check(s) failed", failed)
    }
}

fn check_pool(config: &Config) -> Check {
    let pool = &config.pool;
    if pool.threads == 0 {
        return Check::fail(
            "Pool capacity",
            "threads = 0",
            "Set pool.threads to the number of concurrent test threads (at least 1)",
        );
    }
    if pool.replenish_interval_ms == 0 {
        return Check::fail(
            "Pool capacity",
            "replenish_interval_ms = 0",
            "Set pool.replenish_interval_ms to at least 1",
        );
    }
    let wait = match pool.acquire_timeout_secs {
        Some(secs) => format!("acquire waits up to {}s", secs),
        None => "acquire waits until a workspace is ready".to_string(),
    };
    Check::pass(
        "Pool capacity",
        format!(
            "{} workspace(s) for {} thread(s), replenish every {}ms, {}",
            pool.capacity(),
            pool.threads,
            pool.replenish_interval_ms,
            wait
        ),
    )
}

fn check_default_profile(config: &Config) -> Check {
    let d = &config.defaults;
    if !d.owner_email.contains('@') {
        return Check::fail(
            "Default profile",
            format!("owner e-mail '{}' is not an address", d.owner_email),
            "Set defaults.owner_email to the default user's e-mail",
        );
    }
    if d.template.is_empty() || d.name_prefix.is_empty() || d.memory_gb == 0 {
        return Check::fail(
            "Default profile",
            "template, name prefix and memory must be set",
            "Set defaults.template, defaults.name_prefix and defaults.memory_gb",
        );
    }
    Check::pass(
        "Default profile",
        format!(
            "{} <{}>, {}GB, template '{}', names '{}xxxxxx'",
            d.owner_name, d.owner_email, d.memory_gb, d.template, d.name_prefix
        ),
    )
}

fn check_start_budget(config: &Config) -> Check {
    let start = &config.start;
    if start.poll_interval_secs == 0 || start.max_polls == 0 {
        return Check::fail(
            "Start confirmation",
            format!(
                "poll every {}s, {} poll(s)",
                start.poll_interval_secs, start.max_polls
            ),
            "Set start.poll_interval_secs and start.max_polls to at least 1",
        );
    }
    Check::pass(
        "Start confirmation",
        format!(
            "poll every {}s, give up after {}s",
            start.poll_interval_secs,
            start.timeout().as_secs()
        ),
    )
}

fn check_shutdown_budget(config: &Config) -> Check {
    let s = &config.shutdown;
    if s.delete_timeout_secs == 0 {
        return Check::fail(
            "Shutdown budget",
            "delete_timeout_secs = 0",
            "Set shutdown.delete_timeout_secs to at least 1",
        );
    }
    Check::pass(
        "Shutdown budget",
        format!(
            "graceful {}s, forced {}s, {}s per delete",
            s.graceful_timeout_secs, s.forced_timeout_secs, s.delete_timeout_secs
        ),
    )
}

// ---------------------------------------------------------------------------
// bench
// ---------------------------------------------------------------------------

/// Run `wspool bench`: warm the pool, acquire `count` workspaces at once,
/// print how long each caller waited, then release them and shut down.
pub async fn run_bench(config: &Config, count: usize, custom: bool) -> Result<()> {
    let gateway = Arc::new(SimulatedGateway::new(config.simulator.clone()));
    let manager = Arc::new(PoolManager::new(
        config,
        gateway.clone(),
        Arc::new(RandomNames::default()),
        MetricsRegistry::new(),
    ));
    manager.start().await?;

    println!("Warming pool (capacity {})...", manager.capacity());
    let warm = tokio::time::timeout(config.start.timeout(), async {
        while manager.ready_count().await < manager.capacity() {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    })
    .await;
    if warm.is_err() {
        println!("Pool not full after {}s, continuing", config.start.timeout().as_secs());
    }

    let defaults = &config.defaults;
    let owner = defaults.owner();
    let (memory_gb, template) = if custom {
        (defaults.memory_gb * 2, "custom".to_string())
    } else {
        (defaults.memory_gb, defaults.template.clone())
    };

    let tasks: Vec<_> = (0..count)
        .map(|_| {
            let manager = Arc::clone(&manager);
            let owner = owner.clone();
            let template = template.clone();
            tokio::spawn(async move {
                let started = Instant::now();
                let result = manager.acquire(&owner, memory_gb, &template).await;
                (started.elapsed(), result)
            })
        })
        .collect();

    println!();
    println!("{:<4} {:<20} {:<10} {:>12}", "#", "WORKSPACE", "RESULT", "WAIT");
    println!("{}", "-".repeat(50));

    let mut acquired = Vec::new();
    let mut failures = 0usize;
    let mut total_wait = Duration::ZERO;
    for (i, task) in tasks.into_iter().enumerate() {
        let (waited, result) = task.await?;
        total_wait += waited;
        match result {
            Ok(handle) => {
                println!(
                    "{:<4} {:<20} {:<10} {:>10}ms",
                    i + 1,
                    handle.name(),
                    "OK",
                    waited.as_millis()
                );
                acquired.push(handle);
            }
            Err(e) => {
                failures += 1;
                println!("{:<4} {:<20} {:<10} {:>10}ms", i + 1, "-", "FAILED", waited.as_millis());
                println!("     {}", e);
            }
        }
    }

    for handle in acquired {
        if let Err(e) = manager.release(handle).await {
            tracing::warn!(error = %e, "failed to release workspace");
        }
    }

    let report = manager.shutdown().await;
    let calls = gateway.calls();

    println!();
    if count > 0 {
        println!(
            "Acquired {}/{} (mean wait {}ms)",
            count - failures,
            count,
            (total_wait / count as u32).as_millis()
        );
    }
    println!(
        "Gateway calls: {} create, {} start, {} status, {} delete",
        calls.create, calls.start, calls.status, calls.delete
    );
    println!(
        "Shutdown: scheduler {:?}, {} deleted, {} failed",
        report.scheduler, report.deleted, report.delete_failures
    );

    if failures > 0 {
        anyhow::bail!("{} acquisition(s) failed", failures);
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Shared helpers
// ---------------------------------------------------------------------------

/// Load config from an optional path, falling back to defaults.
pub fn load_config(config_path: Option<PathBuf>) -> Result<Config> {
    match config_path {
        Some(path) => Config::load(&path),
        None => Ok(Config::default()),
    }
}

/// Like [`load_config`] but without validation, so `check` can report every
/// problem itself.
pub fn load_config_unchecked(config_path: Option<PathBuf>) -> Result<Config> {
    match config_path {
        Some(path) => Config::parse_file(&path),
        None => Ok(Config::default()),
    }
}
