use anyhow::{Result, bail};
use std::collections::BTreeMap;

use crate::config::Settings;

/// Access-shaping attributes attached to a user.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserAttributes {
    pub exclude_from_manual_artifacts: bool,
    pub exclude_from_cloud_courier: bool,
}

/// A user in the identity store, as the rest of the program sees them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserInfo {
    pub username: String,
    pub attributes: UserAttributes,
}

impl UserInfo {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            attributes: UserAttributes::default(),
        }
    }
}

/// Registry of every user the settings declare, keyed by username.
#[derive(Debug, Clone, Default)]
pub struct UserDirectory {
    users: BTreeMap<String, UserInfo>,
}

impl UserDirectory {
    pub fn from_settings(settings: &Settings) -> Self {
        let users = settings
            .users
            .iter()
            .map(|spec| {
                (
                    spec.username.clone(),
                    UserInfo {
                        username: spec.username.clone(),
                        attributes: UserAttributes {
                            exclude_from_manual_artifacts: spec.exclude_from_manual_artifacts,
                            exclude_from_cloud_courier: spec.exclude_from_cloud_courier,
                        },
                    },
                )
            })
            .collect();
        Self { users }
    }

    /// Resolve a list of usernames against the registry. Unknown names
    /// are a configuration error.
    pub fn resolve(&self, usernames: &[String]) -> Result<Vec<UserInfo>> {
        usernames
            .iter()
            .map(|username| match self.users.get(username) {
                Some(info) => Ok(info.clone()),
                None => bail!("User {username} is not declared in the settings"),
            })
            .collect()
    }
}

/// Collapse a user list to one entry per username, preserving first-seen
/// order. Duplicates with differing attributes are a configuration error.
pub fn unique_users(users: &[UserInfo]) -> Result<Vec<UserInfo>> {
    let mut seen: BTreeMap<&str, &UserInfo> = BTreeMap::new();
    let mut unique: Vec<UserInfo> = Vec::new();
    for user in users {
        match seen.get(user.username.as_str()) {
            None => {
                seen.insert(&user.username, user);
                unique.push(user.clone());
            }
            Some(existing) if *existing == user => {}
            Some(existing) => {
                bail!("Duplicate user info for {user:?} and {existing:?}")
            }
        }
    }
    Ok(unique)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(username: &str) -> UserInfo {
        UserInfo::new(username)
    }

    #[test]
    fn test_unique_users_deduplicates() {
        let users = vec![user("a.b"), user("a.b"), user("c.d")];
        let unique = unique_users(&users).unwrap();
        assert_eq!(unique.len(), 2);
        assert_eq!(unique[0].username, "a.b");
        assert_eq!(unique[1].username, "c.d");
    }

    #[test]
    fn test_unique_users_rejects_conflicting_attributes() {
        let mut excluded = user("a.b");
        excluded.attributes.exclude_from_manual_artifacts = true;
        let users = vec![user("a.b"), excluded];
        assert!(unique_users(&users).is_err());
    }

    #[test]
    fn test_resolve_unknown_user_fails() {
        let directory = UserDirectory::default();
        let result = directory.resolve(&["ghost".to_string()]);
        assert!(result.is_err());
    }
}
