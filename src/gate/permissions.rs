use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Capabilities an API key can be granted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Permission {
    /// Search and fetch catalog items.
    Read,
    /// Create and update catalog items.
    Write,
    /// Key management.
    Admin,
}

impl Permission {
    pub const ALL: [Permission; 3] = [Permission::Read, Permission::Write, Permission::Admin];

    pub fn as_str(&self) -> &'static str {
        match self {
            Permission::Read => "read",
            Permission::Write => "write",
            Permission::Admin => "admin",
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Permission {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Permission::ALL
            .into_iter()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| format!("unknown permission '{}'", s))
    }
}

/// Conjunctive check: every required capability must be granted.
///
/// Works on plain strings so granted sets containing values outside
/// [`Permission`] are still evaluated correctly.
pub fn has_all_permissions<S: AsRef<str>>(required: &[S], granted: &[String]) -> bool {
    required
        .iter()
        .all(|r| granted.iter().any(|g| g == r.as_ref()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn granted(perms: &[&str]) -> Vec<String> {
        perms.iter().map(|p| p.to_string()).collect()
    }

    #[test]
    fn round_trips_through_strings() {
        for p in Permission::ALL {
            assert_eq!(p.as_str().parse::<Permission>().unwrap(), p);
        }
        assert!("superuser".parse::<Permission>().is_err());
        assert!("Read".parse::<Permission>().is_err());
    }

    #[test]
    fn serde_uses_lowercase() {
        assert_eq!(serde_json::to_string(&Permission::Admin).unwrap(), "\"admin\"");
    }

    #[test]
    fn empty_requirement_always_allows() {
        let none: [&str; 0] = [];
        assert!(has_all_permissions(&none, &[]));
        assert!(has_all_permissions(&none, &granted(&["read"])));
    }

    #[test]
    fn all_required_must_be_present() {
        let g = granted(&["read"]);
        assert!(has_all_permissions(&["read"], &g));
        assert!(!has_all_permissions(&["read", "write"], &g));
        assert!(has_all_permissions(&["read", "write"], &granted(&["write", "read", "admin"])));
    }

    #[test]
    fn empty_grant_denies_any_requirement() {
        assert!(!has_all_permissions(&["read"], &[]));
    }

    #[test]
    fn admin_does_not_imply_other_capabilities() {
        assert!(!has_all_permissions(&["write"], &granted(&["admin"])));
    }

    #[test]
    fn allow_iff_subset_exhaustive() {
        // Every pair of subsets over {read, write, admin}.
        let universe = ["read", "write", "admin"];
        let subsets: Vec<Vec<&str>> = (0..8u8)
            .map(|mask| {
                universe
                    .iter()
                    .enumerate()
                    .filter(|(i, _)| mask & (1 << i) != 0)
                    .map(|(_, p)| *p)
                    .collect()
            })
            .collect();

        for required in &subsets {
            for grant in &subsets {
                let g = granted(grant);
                let subset = required.iter().all(|r| grant.contains(r));
                assert_eq!(
                    has_all_permissions(required, &g),
                    subset,
                    "required={:?} granted={:?}",
                    required,
                    grant
                );
            }
        }
    }
}
