//! Command line interface

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use heatlink_calc::{encode_input, Bounds, Calculator};
use heatlink_modbus::{DataFormat, ItemRegistry, ModbusItem};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::catalog::load_catalog;
use crate::config::ServiceConfig;
use crate::coordinator::{Coordinator, Snapshot};
use crate::error::{Result, ServiceError};
use crate::shutdown::shutdown_token;
use crate::view::{render, render_point};

/// Heat pump Modbus polling service
#[derive(Debug, Parser)]
#[command(name = "heatsrv")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Configuration file (yaml, toml or json)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Log level or filter directive, overrides the config file
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Clone, PartialEq, Eq, Subcommand)]
pub enum Command {
    /// Poll the device until Ctrl+C (default)
    Run,

    /// Read a single point
    Read {
        /// Point identifier
        id: String,
    },

    /// Write a single point
    Write {
        /// Point identifier
        id: String,

        /// Value in display units, or a status key
        value: String,
    },

    /// Validate configuration and item catalog
    CheckConfig,
}

impl Args {
    pub fn command(&self) -> Command {
        self.command.clone().unwrap_or(Command::Run)
    }
}

/// Configuration and catalog for one invocation
pub struct Context {
    pub config: ServiceConfig,
    pub registry: Arc<ItemRegistry>,
}

impl Context {
    pub fn load(args: &Args) -> Result<Self> {
        let mut config = ServiceConfig::load(args.config.as_deref())?;
        if let Some(level) = &args.log_level {
            config.logging.level = level.clone();
        }
        let registry = Arc::new(load_catalog(&config.catalog.path)?);
        Ok(Self { config, registry })
    }

    fn calculator(&self) -> Calculator {
        Calculator::new(self.registry.iter(), None)
    }
}

pub async fn execute(command: Command, context: Context) -> Result<()> {
    match command {
        Command::Run => run(context).await,
        Command::Read { id } => read(context, &id).await,
        Command::Write { id, value } => write(context, &id, &value).await,
        Command::CheckConfig => {
            println!("{}", summary(&context));
            Ok(())
        },
    }
}

async fn run(context: Context) -> Result<()> {
    let coordinator = Arc::new(Coordinator::from_config(
        &context.config,
        Arc::clone(&context.registry),
    ));
    coordinator.setup().await?;

    let shutdown = shutdown_token();
    let calculator = context.calculator();
    let registry = Arc::clone(&context.registry);
    let mut updates = coordinator.subscribe();
    let watcher = shutdown.clone();
    let reporter = tokio::spawn(async move {
        loop {
            tokio::select! {
                changed = updates.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let snapshot = Arc::clone(&updates.borrow_and_update());
                    for view in render(&registry, &calculator, &snapshot) {
                        match &view.value {
                            Some(value) => debug!("{} = {}", view.id, value),
                            None => debug!("{} = -", view.id),
                        }
                    }
                }
                () = watcher.cancelled() => break,
            }
        }
    });

    coordinator.run(shutdown).await;
    join_reporter(reporter).await;
    info!("heatsrv stopped");
    Ok(())
}

async fn join_reporter(reporter: JoinHandle<()>) {
    if let Err(e) = reporter.await {
        warn!("Reporter task failed: {}", e);
    }
}

async fn read(context: Context, id: &str) -> Result<()> {
    let coordinator = Coordinator::from_config(&context.config, Arc::clone(&context.registry));
    let item = context
        .registry
        .by_id(id)
        .ok_or_else(|| ServiceError::point_not_found(id))?;
    coordinator.setup().await?;

    let values = read_with_references(&coordinator, item).await?;
    let view = render_point(item, &context.calculator(), &values);
    coordinator.manager().close().await;

    let json = serde_json::to_string_pretty(&view)
        .map_err(|e| ServiceError::config(format!("Failed to render {}: {}", id, e)))?;
    println!("{}", json);
    Ok(())
}

async fn write(context: Context, id: &str, input: &str) -> Result<()> {
    let coordinator = Coordinator::from_config(&context.config, Arc::clone(&context.registry));
    let item = context
        .registry
        .by_id(id)
        .ok_or_else(|| ServiceError::point_not_found(id))?;
    if !item.kind.is_writable() {
        return Err(ServiceError::ReadOnly(id.to_string()));
    }
    let raw = encode_input(item, input)?;
    coordinator.setup().await?;

    if item.format != DataFormat::Status {
        let values = read_with_references(&coordinator, item).await?;
        let bounds = Bounds::resolve(item, |reference| values.get(reference).copied().flatten());
        let display = f64::from(raw) / item.params.divider_f64();
        if !bounds.contains(display) {
            coordinator.manager().close().await;
            return Err(ServiceError::config(format!(
                "{} out of range for {} ({:?}..{:?})",
                input, id, bounds.min, bounds.max
            )));
        }
    }

    let result = coordinator.write(id, raw).await;
    coordinator.manager().close().await;
    result?;
    println!("{} = {}", id, input.trim());
    Ok(())
}

/// Read an item plus the items its formula and bounds refer to
async fn read_with_references(coordinator: &Coordinator, item: &ModbusItem) -> Result<Snapshot> {
    let params = &item.params;
    let references = params
        .formula_refs()
        .map(|(_, id)| id)
        .chain(params.dynamic_min.as_deref())
        .chain(params.dynamic_max.as_deref());

    let mut values = Snapshot::new();
    values.insert(item.id.clone(), coordinator.read_point(&item.id).await?);
    for reference in references {
        if !values.contains_key(reference) {
            values.insert(reference.to_string(), coordinator.read_point(reference).await?);
        }
    }
    Ok(values)
}

/// Human-readable configuration summary
pub fn summary(context: &Context) -> String {
    let config = &context.config;
    let registry = &context.registry;
    let enabled = registry
        .iter()
        .filter(|item| config.circuits.is_enabled(item.device))
        .count();
    let writable = registry.iter().filter(|item| item.kind.is_writable()).count();

    format!(
        "device:   {}:{} (unit {})\n\
         polling:  every {}ms, cycle timeout {}ms\n\
         circuits: hk2={} hk3={} hk4={} hk5={}\n\
         catalog:  {} ({} items, {} polled, {} writable, {} calculated)",
        config.device.host,
        config.device.port,
        config.device.unit_id,
        config.polling.interval_ms,
        config.polling.cycle_timeout_ms,
        config.circuits.hk2,
        config.circuits.hk3,
        config.circuits.hk4,
        config.circuits.hk5,
        config.catalog.path.display(),
        registry.len(),
        enabled,
        writable,
        context.calculator().len(),
    )
}
