use std::io::{self, Write};

use amdgpu_inventory::{
    arg_parser::ArgsOptions,
    config_manager::InventoryConfig,
    devices_manager::{DevicesManager, RefreshReport},
    env_check::{self, EnvReport},
    logger, presenter,
    sources::{clinfo::ClinfoSource, lspci::LspciSource},
};
use anyhow::{Context, Result};
use tokio::{select, signal::ctrl_c};
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use tracing::{debug, error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse the command line arguments
    let args = ArgsOptions::parse();

    // The config can turn on debug output, its load is logged once the
    // logger is up
    let mut config = InventoryConfig::load(args.config_file_path.as_deref())?;
    config.debug |= args.debug;

    logger::init_logging(config.debug);
    match &args.config_file_path {
        Some(path) => info!("Loaded configuration from {}", path.display()),
        None => debug!("No configuration file given, using defaults"),
    }
    debug!("Using {config:?}");

    let environment = env_check::check_environment(&config).await;
    if !environment.is_ready() {
        warn!("Overdrive features or kernel version missing, values may be incomplete");
    }

    let bus_source = LspciSource::new(&config);
    let capability_source = ClinfoSource::new(&config);

    let mut manager = DevicesManager::new(config);
    let report = manager
        .refresh(&bus_source, &capability_source)
        .await
        .with_context(|| "GPU discovery failed")?;

    if manager.count() == 0 {
        warn!("No AMD GPU with an overdrive table found");
    }
    info!(
        "{} of {} GPU(s) use the {} driver",
        manager.compatible_count(),
        manager.count(),
        manager.config().compatible_driver
    );
    debug!("{} diagnostic(s) during the first refresh", report.len());

    print_snapshot(&manager, &args, &environment)?;

    if args.watch {
        watch(&mut manager, &args).await?;
    }

    Ok(())
}

fn print_snapshot(
    manager: &DevicesManager,
    args: &ArgsOptions,
    environment: &EnvReport,
) -> Result<()> {
    let mut out = io::stdout().lock();

    if args.json {
        return presenter::write_json(&mut out, manager.records(), Some(environment));
    }

    if !args.no_table {
        presenter::write_table(&mut out, manager.records())?;
    }

    for record in manager.records() {
        if args.details || args.clinfo {
            presenter::write_details(&mut out, record, args.clinfo)?;
        }
        if args.pstates {
            presenter::write_pstates(&mut out, record)?;
        }
        if args.ppm {
            presenter::write_power_profiles(&mut out, record)?;
        }
    }

    out.flush().with_context(|| "Failed to flush stdout")?;

    Ok(())
}

// Re-read the live metrics every interval and reprint them until Ctrl-C
async fn watch(manager: &mut DevicesManager, args: &ArgsOptions) -> Result<()> {
    // This token and tracker will be used to handle graceful shutdown
    let tracker = TaskTracker::new();
    let token = CancellationToken::new();

    {
        let token = token.clone();

        tracker.spawn(async move {
            select! {
                _ = token.cancelled() => {},
                result = ctrl_c() => {
                    if let Err(e) = result {
                        error!("Failed to listen for Ctrl-C: {e}");
                    }
                    token.cancel();
                }
            }
        });
    }

    let interval = manager.config().refresh_interval();
    let result = loop {
        select! {
            _ = token.cancelled() => {
                info!("Watch: quitting");
                break Ok(());
            },
            _ = tokio::time::sleep(interval) => {
                let mut report = RefreshReport::default();
                report.extend(manager.read_live_metrics().await);
                debug!("{} diagnostic(s) during the live refresh", report.len());

                if let Err(e) = print_live(manager, args) {
                    break Err(e);
                }
            }
        }
    };

    // Cancel the token to communicate the program
    // termination to the running tasks
    token.cancel();

    // Wait for the tasks to finish
    tracker.close();
    tracker.wait().await;

    result
}

fn print_live(manager: &DevicesManager, args: &ArgsOptions) -> Result<()> {
    let mut out = io::stdout().lock();

    if args.json {
        presenter::write_json(&mut out, manager.records(), None)?;
    } else {
        presenter::write_table(&mut out, manager.records())?;
        writeln!(out)?;
    }

    out.flush().with_context(|| "Failed to flush stdout")?;

    Ok(())
}
