//! Whole launcher flow after argument parsing

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{debug, info, warn};

use common::{ConfigError, OperationTimer};
use rtc_core::{
    apply_workarounds, load_json_config, ActionContext, CommandRunner, DispatchReport, Dispatcher,
    HandlerRegistry, ModeActionTable, RuntimeConfig,
};
use tools::{register_all, DryRunRunner, SystemRunner};

use crate::args::Cli;
use crate::startup;

pub async fn run(cli: Cli) -> Result<DispatchReport> {
    let config = startup::build_runtime_config(&cli)?;
    execute(config).await
}

/// Проверка, регистрация обработчиков, загрузка профиля и обход JSON
pub async fn execute(mut config: RuntimeConfig) -> Result<DispatchReport> {
    let config_file = config.check_consistency()?;
    let mode = config
        .mode()
        .ok_or(ConfigError::NotSet { what: "mode" })?;

    let runner: Arc<dyn CommandRunner> = if config.dry_run() {
        info!("dry run: commands are logged and not executed");
        Arc::new(DryRunRunner::new())
    } else {
        Arc::new(SystemRunner::new())
    };
    startup::check_environment(&config, runner.as_ref()).await?;

    let mut registry = HandlerRegistry::new();
    let rejected = register_all(&mut registry);
    if rejected > 0 {
        warn!("{} handler registrations were rejected", rejected);
    }
    let plan = apply_workarounds(registry, ModeActionTable::default(), &mut config);

    let (document, saved) = load_json_config(&config)
        .with_context(|| format!("cannot load configuration {}", config_file.display()))?;
    debug!("preprocessed configuration saved to {}", saved.display());

    let mut ctx = ActionContext::new(Arc::new(config), runner);
    let timer = OperationTimer::new(format!("dispatch:{}", mode));
    let result = Dispatcher::new(&plan).dispatch(&document, mode, &mut ctx).await;
    timer.finish_with_result(&result);

    let report = result?;
    for path in &report.unmatched {
        debug!("no handler for configuration node {}", path);
    }
    info!("Done: {} configuration steps applied", report.invoked.len());
    Ok(report)
}
