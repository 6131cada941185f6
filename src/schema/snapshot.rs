use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use super::state::Value;

/// An immutable assignment of values to every declared state variable.
///
/// Entries are kept in name order, so equality, hashing and ordering are
/// all structural. Mutations go through [`StateSnapshot::with`], which
/// returns a fresh snapshot and leaves the receiver untouched.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StateSnapshot {
    values: BTreeMap<String, Value>,
}

impl StateSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    /// Copy-on-write update.
    pub fn with(&self, name: &str, value: Value) -> StateSnapshot {
        let mut values = self.values.clone();
        values.insert(name.to_string(), value);
        StateSnapshot { values }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.values.iter()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl FromIterator<(String, Value)> for StateSnapshot {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        StateSnapshot {
            values: iter.into_iter().collect(),
        }
    }
}

impl fmt::Display for StateSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (name, value)) in self.values.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}: {}", name, value)?;
        }
        write!(f, "}}")
    }
}
