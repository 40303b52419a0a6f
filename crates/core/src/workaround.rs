//! Environment adjustment phase.
//!
//! Между регистрацией обработчиков и первым обходом конфигурации
//! реестр и таблица режимов один раз корректируются по фактам о хосте.
//! Результат - неизменяемый `DispatchPlan`. Повторное применение
//! невозможно: `apply_workarounds` забирает реестр по значению.

use chrono::Utc;
use sysinfo::System;
use tracing::{debug, info};

use crate::dispatch::DispatchPlan;
use crate::domain::action_names::{STRESS_APPS, SYNC_CLOCKS, TSN_DISC};
use crate::domain::Mode;
use crate::modes::ModeActionTable;
use crate::registry::HandlerRegistry;
use crate::runtime_config::RuntimeConfig;

/// Facts about the host that feed the adjustment phase
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostFacts {
    /// `uname -r`
    pub kernel_release: Option<String>,
}

impl HostFacts {
    pub fn detect() -> Self {
        Self {
            kernel_release: System::kernel_version(),
        }
    }

    /// `major.minor` of the kernel release, e.g. `5.10`
    pub fn kernel_series(&self) -> Option<String> {
        let release = self.kernel_release.as_deref()?;
        let mut parts = release.split('.');
        let major = parts.next()?;
        let minor: String = parts
            .next()?
            .chars()
            .take_while(char::is_ascii_digit)
            .collect();
        if major.is_empty() || minor.is_empty() {
            return None;
        }
        Some(format!("{}.{}", major, minor))
    }
}

/// Known host defect that needs the dispatch metadata adjusted
pub trait Workaround: Send + Sync {
    fn name(&self) -> &'static str;

    fn applies(&self, config: &RuntimeConfig) -> bool;

    /// Not idempotent: every call shifts orders again
    fn patch(&self, registry: &mut HandlerRegistry, modes: &mut ModeActionTable);
}

/// После установки XDP-обработчика на ядре 5.10 сетевая карта
/// сбрасывается, поэтому настройку TSN и синхронизацию часов нужно
/// выполнить после запуска приложения, в том числе в режиме `run`.
pub struct XdpKernelWorkaround;

impl XdpKernelWorkaround {
    pub const ORDER_OFFSET: u32 = 1000;
    const MOVED_ACTIONS: [&'static str; 2] = [TSN_DISC, SYNC_CLOCKS];
}

impl Workaround for XdpKernelWorkaround {
    fn name(&self) -> &'static str {
        "XDP communication in Kernel 5.10"
    }

    fn applies(&self, config: &RuntimeConfig) -> bool {
        config.xdp_defect_present()
    }

    fn patch(&self, registry: &mut HandlerRegistry, modes: &mut ModeActionTable) {
        for action in Self::MOVED_ACTIONS {
            if let Some(node) = registry.lookup_mut(action) {
                node.shift_order(Self::ORDER_OFFSET);
                debug!("order of {} moved to {:?}", action, node.order());
            }
            modes.append(Mode::Run, action);
        }
    }
}

pub fn default_workarounds() -> Vec<Box<dyn Workaround>> {
    vec![Box::new(XdpKernelWorkaround)]
}

/// Run the adjustment phase with the built-in workarounds
pub fn apply_workarounds(
    registry: HandlerRegistry,
    modes: ModeActionTable,
    config: &mut RuntimeConfig,
) -> DispatchPlan {
    apply_with(registry, modes, config, &default_workarounds())
}

pub fn apply_with(
    mut registry: HandlerRegistry,
    mut modes: ModeActionTable,
    config: &mut RuntimeConfig,
    workarounds: &[Box<dyn Workaround>],
) -> DispatchPlan {
    if config.use_stresses() {
        for mode in [Mode::All, Mode::Run] {
            if modes.append(mode, STRESS_APPS) {
                debug!("best-effort load enabled for mode {}", mode);
            }
        }
    }

    for workaround in workarounds {
        if workaround.applies(config) {
            info!("Applying the workaround for {}", workaround.name());
            workaround.patch(&mut registry, &mut modes);
        }
    }

    config.update_base_time(Utc::now());
    DispatchPlan::new(registry, modes)
}
