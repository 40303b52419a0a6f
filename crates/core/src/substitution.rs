//! `${name}` substitution pairs applied to the raw JSON text before parsing

use tracing::trace;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubstitutionPair {
    pub name: String,
    pub value: String,
}

impl SubstitutionPair {
    pub fn pattern(&self) -> String {
        format!("${{{}}}", self.name)
    }
}

/// Список пар в порядке LIFO: последняя зарегистрированная пара
/// применяется первой и затеняет более ранние с тем же именем.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubstitutionList {
    // newest first
    pairs: Vec<SubstitutionPair>,
}

impl SubstitutionList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, name: impl Into<String>, value: impl ToString) {
        let pair = SubstitutionPair {
            name: name.into(),
            value: value.to_string(),
        };
        trace!("registered substitution ${{{}}}={}", pair.name, pair.value);
        self.pairs.insert(0, pair);
    }

    /// Current value of `name`, i.e. the newest pair with that name
    pub fn lookup(&self, name: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|p| p.name == name)
            .map(|p| p.value.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = &SubstitutionPair> {
        self.pairs.iter()
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn apply(&self, text: &str) -> String {
        let mut out = text.to_string();
        for pair in &self.pairs {
            let pattern = pair.pattern();
            if out.contains(&pattern) {
                trace!("preprocessing json config using variable {}={}", pattern, pair.value);
                out = out.replace(&pattern, &pair.value);
            }
        }
        out
    }
}
