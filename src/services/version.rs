//! Service version ordering.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

/// A dot-separated version such as `2.2.0`.
///
/// Components compare numerically when both sides are numbers and
/// lexically otherwise; a missing component sorts before a present one.
#[derive(Debug, Clone, Eq, Deserialize, Serialize)]
#[serde(transparent)]
pub struct ServiceVersion(String);

impl ServiceVersion {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into().trim().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn components(&self) -> impl Iterator<Item = &str> {
        self.0.split('.')
    }
}

impl PartialEq for ServiceVersion {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Ord for ServiceVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        let mut left = self.components();
        let mut right = other.components();
        loop {
            match (left.next(), right.next()) {
                (None, None) => return Ordering::Equal,
                (None, Some(_)) => return Ordering::Less,
                (Some(_), None) => return Ordering::Greater,
                (Some(a), Some(b)) => {
                    let ord = match (a.parse::<u64>(), b.parse::<u64>()) {
                        (Ok(x), Ok(y)) => x.cmp(&y),
                        _ => a.cmp(b),
                    };
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
            }
        }
    }
}

impl Hash for ServiceVersion {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for component in self.components() {
            match component.parse::<u64>() {
                Ok(n) => n.hash(state),
                Err(_) => component.hash(state),
            }
        }
    }
}

impl PartialOrd for ServiceVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for ServiceVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ServiceVersion {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_components_order_numerically() {
        let mut versions: Vec<ServiceVersion> =
            ["2.10.0", "2.2.0", "0.0.1", "2.2"].iter().map(|v| ServiceVersion::from(*v)).collect();
        versions.sort();
        let ordered: Vec<&str> = versions.iter().map(ServiceVersion::as_str).collect();
        assert_eq!(ordered, vec!["0.0.1", "2.2", "2.2.0", "2.10.0"]);
    }

    #[test]
    fn equality_follows_ordering() {
        assert_eq!(ServiceVersion::from("1.0"), ServiceVersion::from(" 1.0 "));
        assert_ne!(ServiceVersion::from("1.0"), ServiceVersion::from("1.0.0"));
    }
}
