//! Mode-to-action table: which top-level configuration nodes run in a mode

use std::collections::HashMap;

use crate::domain::action_names::*;
use crate::domain::Mode;
use crate::error::DispatchError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModeActionTable {
    entries: HashMap<Mode, Vec<String>>,
}

impl Default for ModeActionTable {
    fn default() -> Self {
        let remote = [RUN_REMOTE_APPS, FINISH_REMOTE_APPS];
        Self::empty()
            .with(
                Mode::All,
                [ETH_IF, TSN_DISC, SYNC_CLOCKS, RUN_APPS, FINISH_APPS]
                    .into_iter()
                    .chain(remote),
            )
            .with(Mode::Run, [RUN_APPS, FINISH_APPS].into_iter().chain(remote))
            .with(Mode::Clock, [SYNC_CLOCKS].into_iter().chain(remote))
            .with(Mode::Tsn, [TSN_DISC].into_iter().chain(remote))
            .with(
                Mode::Setup,
                [ETH_IF, TSN_DISC, SYNC_CLOCKS].into_iter().chain(remote),
            )
    }
}

impl ModeActionTable {
    /// Таблица без режимов; любой режим для неё неизвестен
    pub fn empty() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Replace the action list of `mode`
    pub fn with<I, S>(mut self, mode: Mode, actions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.entries
            .insert(mode, actions.into_iter().map(Into::into).collect());
        self
    }

    pub fn permitted_actions(&self, mode: Mode) -> Result<&[String], DispatchError> {
        self.entries
            .get(&mode)
            .map(Vec::as_slice)
            .ok_or(DispatchError::UnknownMode(mode))
    }

    pub fn permits(&self, mode: Mode, action: &str) -> bool {
        self.entries
            .get(&mode)
            .is_some_and(|actions| actions.iter().any(|a| a == action))
    }

    /// Добавить действие в конец списка режима. Повторы не добавляются;
    /// возвращает `true`, если список изменился.
    pub fn append(&mut self, mode: Mode, action: &str) -> bool {
        let actions = self.entries.entry(mode).or_default();
        if actions.iter().any(|a| a == action) {
            return false;
        }
        actions.push(action.to_string());
        true
    }
}
