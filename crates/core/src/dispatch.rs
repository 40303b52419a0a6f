//! Configuration tree walker.
//!
//! Обход строго последовательный: обработчик следующего узла запускается
//! только после завершения предыдущего, поэтому его побочные эффекты
//! видны всем последующим обработчикам.

use futures::future::{BoxFuture, FutureExt};
use serde_json::Value;
use tracing::{debug, trace, warn};

use crate::contracts::ActionContext;
use crate::domain::Mode;
use crate::error::DispatchError;
use crate::modes::ModeActionTable;
use crate::normalize::normalize;
use crate::registry::{HandlerNode, HandlerRegistry};

/// Free-text keys that never need a handler
pub const DESCRIPTIVE_KEYS: &[&str] = &["Note"];

/// Registry and mode table frozen after the adjustment phase
#[derive(Debug)]
pub struct DispatchPlan {
    registry: HandlerRegistry,
    modes: ModeActionTable,
}

impl DispatchPlan {
    pub(crate) fn new(registry: HandlerRegistry, modes: ModeActionTable) -> Self {
        Self { registry, modes }
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    pub fn modes(&self) -> &ModeActionTable {
        &self.modes
    }
}

/// Итог одного обхода
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Dotted paths whose action ran, in invocation order
    pub invoked: Vec<String>,
    /// Dotted paths of configuration nodes without a handler
    pub unmatched: Vec<String>,
}

pub struct Dispatcher<'p> {
    plan: &'p DispatchPlan,
}

impl<'p> Dispatcher<'p> {
    pub fn new(plan: &'p DispatchPlan) -> Self {
        Self { plan }
    }

    /// Walk `document` for `mode`. The first failing action aborts the walk;
    /// side effects of actions that already ran are left in place.
    pub async fn dispatch(
        &self,
        document: &Value,
        mode: Mode,
        ctx: &mut ActionContext,
    ) -> Result<DispatchReport, DispatchError> {
        let permitted = self.plan.modes.permitted_actions(mode)?;
        let registered = self.plan.registry.top_level();
        let eligible: Vec<&HandlerNode> = registered
            .iter()
            .filter(|h| permitted.iter().any(|a| a == h.name()))
            .collect();

        debug!("dispatching json config for mode {}", mode);
        let mut report = DispatchReport::default();
        walk(document, String::new(), registered, eligible, ctx, &mut report).await?;
        Ok(report)
    }
}

fn join(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", prefix, name)
    }
}

/// One level of the walk. `registered` is every handler of the level and
/// decides which keys are unknown; `eligible` is what may run.
fn walk<'a>(
    node: &'a Value,
    prefix: String,
    registered: &'a [HandlerNode],
    eligible: Vec<&'a HandlerNode>,
    ctx: &'a mut ActionContext,
    report: &'a mut DispatchReport,
) -> BoxFuture<'a, Result<(), DispatchError>> {
    async move {
        let object = node.as_object().ok_or_else(|| DispatchError::NotAnObject {
            path: if prefix.is_empty() {
                "<root>".to_string()
            } else {
                prefix.clone()
            },
        })?;

        let ordered = normalize(eligible);
        trace!(
            "handlers execution order at \"{}\": {:?}",
            prefix,
            ordered.iter().map(|h| h.name()).collect::<Vec<_>>()
        );

        for handler in ordered {
            let Some(sub) = object.get(handler.name()) else {
                continue;
            };
            let path = join(&prefix, handler.name());

            if let Some(action) = handler.action() {
                trace!(
                    "action:{}, order:{:?}, func:{}, json:\n{:#}",
                    path,
                    handler.order(),
                    action.name(),
                    sub
                );
                action
                    .apply(sub, ctx)
                    .await
                    .map_err(|source| DispatchError::Action {
                        path: path.clone(),
                        source,
                    })?;
                report.invoked.push(path.clone());
            }

            if !handler.children().is_empty() {
                let children = handler.children();
                walk(sub, path, children, children.iter().collect(), ctx, report).await?;
            }
        }

        for key in object.keys() {
            if DESCRIPTIVE_KEYS.contains(&key.as_str())
                || registered.iter().any(|h| h.name() == key)
            {
                continue;
            }
            let path = join(&prefix, key);
            warn!("missing handler for json config node \"{}\"", path);
            report.unmatched.push(path);
        }
        Ok(())
    }
    .boxed()
}
