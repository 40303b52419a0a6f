//! HandlerRegistry - дерево обработчиков узлов JSON-конфигурации
//!
//! Обработчики регистрируются по точечному пути (`eth-if.ethtool`).
//! Промежуточные сегменты создаются как структурные узлы без действия.

use std::fmt;
use std::sync::Arc;
use tracing::{debug, error};

use crate::contracts::ConfigAction;

/// Effective order of a handler registered without an explicit order
/// Один узел дерева обработчиков
pub struct HandlerNode {
    name: String,
    action: Option<Arc<dyn ConfigAction>>,
    order: Option<u32>,
    seq: u64,
    children: Vec<HandlerNode>,
}

impl HandlerNode {
    fn structural(name: &str, seq: u64) -> Self {
        Self {
            name: name.to_string(),
            action: None,
            order: None,
            seq,
            children: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn action(&self) -> Option<&Arc<dyn ConfigAction>> {
        self.action.as_ref()
    }

    pub fn order(&self) -> Option<u32> {
        self.order
    }

    /// Ключ сортировки: узлы без порядка идут после любого явного порядка,
    /// равные порядки сохраняют порядок регистрации
    pub fn order_key(&self) -> (bool, u32, u64) {
        (self.order.is_none(), self.order.unwrap_or(0), self.seq)
    }

    /// Registration sequence number, tie-breaker for equal orders
    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn children(&self) -> &[HandlerNode] {
        &self.children
    }

    pub fn child(&self, name: &str) -> Option<&HandlerNode> {
        self.children.iter().find(|c| c.name == name)
    }

    /// `true` for a node that only groups children
    pub fn is_structural(&self) -> bool {
        self.action.is_none()
    }

    /// Сдвинуть порядок узла. Узел без порядка остаётся последним.
    pub fn shift_order(&mut self, offset: u32) {
        if let Some(order) = self.order {
            self.order = Some(order.saturating_add(offset));
        }
    }
}

impl fmt::Debug for HandlerNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerNode")
            .field("name", &self.name)
            .field("action", &self.action.as_ref().map(|a| a.name().to_string()))
            .field("order", &self.order)
            .field("seq", &self.seq)
            .field("children", &self.children)
            .finish()
    }
}

/// Повторная регистрация действия по уже занятому пути
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrationConflict {
    pub path: String,
    pub existing: String,
    pub attempted: String,
}

impl fmt::Display for RegistrationConflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "handler for json config node \"{}\" is already registered ({}), \
             registration of {} is ignored",
            self.path, self.existing, self.attempted
        )
    }
}

/// Результат вызова `register`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistrationOutcome {
    Registered,
    Conflict(RegistrationConflict),
    InvalidPath(String),
}

impl RegistrationOutcome {
    pub fn is_registered(&self) -> bool {
        matches!(self, RegistrationOutcome::Registered)
    }
}

/// Tree of handlers keyed by dotted configuration paths.
///
/// Registration never fails the process: conflicts and malformed paths are
/// logged, remembered and returned to the caller. The first action bound to
/// a path stays authoritative.
#[derive(Debug, Default)]
pub struct HandlerRegistry {
    roots: Vec<HandlerNode>,
    next_seq: u64,
    conflicts: Vec<RegistrationConflict>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        path: &str,
        order: Option<u32>,
        action: Arc<dyn ConfigAction>,
    ) -> RegistrationOutcome {
        let segments: Vec<&str> = path.split('.').collect();
        if segments.iter().any(|s| s.is_empty()) {
            error!("cannot register handler {} for malformed path \"{}\"", action.name(), path);
            return RegistrationOutcome::InvalidPath(path.to_string());
        }

        // split('.') always yields at least one segment
        let Some(node) = attach(&mut self.roots, &segments, &mut self.next_seq) else {
            return RegistrationOutcome::InvalidPath(path.to_string());
        };

        if let Some(existing) = &node.action {
            let conflict = RegistrationConflict {
                path: path.to_string(),
                existing: existing.name().to_string(),
                attempted: action.name().to_string(),
            };
            error!("{}", conflict);
            self.conflicts.push(conflict.clone());
            return RegistrationOutcome::Conflict(conflict);
        }

        debug!(
            "registered handler {} for json config node \"{}\" (order {:?})",
            action.name(),
            path,
            order
        );
        node.action = Some(action);
        node.order = order;
        RegistrationOutcome::Registered
    }

    pub fn lookup(&self, path: &str) -> Option<&HandlerNode> {
        let mut level = &self.roots;
        let mut found = None;
        for segment in path.split('.') {
            let node = level.iter().find(|n| n.name == segment)?;
            level = &node.children;
            found = Some(node);
        }
        found
    }

    pub fn lookup_mut(&mut self, path: &str) -> Option<&mut HandlerNode> {
        let segments: Vec<&str> = path.split('.').collect();
        find_mut(&mut self.roots, &segments)
    }

    /// Handlers registered directly under the document root
    pub fn top_level(&self) -> &[HandlerNode] {
        &self.roots
    }

    pub fn conflicts(&self) -> &[RegistrationConflict] {
        &self.conflicts
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }
}

/// Walks `segments`, creating structural nodes on the way
fn attach<'a>(
    level: &'a mut Vec<HandlerNode>,
    segments: &[&str],
    next_seq: &mut u64,
) -> Option<&'a mut HandlerNode> {
    let (first, rest) = segments.split_first()?;
    let idx = match level.iter().position(|n| n.name == *first) {
        Some(idx) => idx,
        None => {
            level.push(HandlerNode::structural(first, *next_seq));
            *next_seq += 1;
            level.len() - 1
        }
    };
    let node = &mut level[idx];
    if rest.is_empty() {
        Some(node)
    } else {
        attach(&mut node.children, rest, next_seq)
    }
}

fn find_mut<'a>(level: &'a mut [HandlerNode], segments: &[&str]) -> Option<&'a mut HandlerNode> {
    let (first, rest) = segments.split_first()?;
    let node = level.iter_mut().find(|n| n.name == *first)?;
    if rest.is_empty() {
        Some(node)
    } else {
        find_mut(&mut node.children, rest)
    }
}
