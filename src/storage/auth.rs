//! Users, roles and key permissions.
//!
//! Every mutation bumps `revision`; proposals carry the revision their identity was resolved at,
//! and the authorization layer refuses stale ones.

use std::collections::{BTreeMap, BTreeSet};

use argon2::password_hash::{
    PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng,
};
use argon2::{Algorithm, Argon2, Params, Version};
use serde::{Deserialize, Serialize};

use crate::error::{ApplyError, ApplyResult};

pub const ROOT_USER: &str = "root";
pub const ROOT_ROLE: &str = "root";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionType {
    Read,
    Write,
    Readwrite,
}

impl PermissionType {
    fn allows(self, wanted: PermissionType) -> bool {
        self == PermissionType::Readwrite || self == wanted
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permission {
    pub perm_type: PermissionType,
    #[serde(with = "crate::b64")]
    pub key: Vec<u8>,
    #[serde(with = "crate::b64", default)]
    pub range_end: Vec<u8>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub name: String,
    #[serde(default)]
    pub password_hash: String,
    #[serde(default)]
    pub roles: BTreeSet<String>,
    #[serde(default)]
    pub no_password: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub name: String,
    #[serde(default)]
    pub permissions: Vec<Permission>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthStore {
    enabled: bool,
    revision: u64,
    users: BTreeMap<String, User>,
    roles: BTreeMap<String, Role>,
    /// simple token -> user name
    tokens: BTreeMap<String, String>,
}

impl AuthStore {
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn user(&self, name: &str) -> Option<&User> {
        self.users.get(name)
    }

    pub fn token_owner(&self, token: &str) -> Option<&str> {
        self.tokens.get(token).map(String::as_str)
    }

    pub fn size_bytes(&self) -> u64 {
        let users: usize = self
            .users
            .values()
            .map(|u| {
                u.name.len()
                    + u.password_hash.len()
                    + u.roles.iter().map(String::len).sum::<usize>()
            })
            .sum();
        let roles: usize = self
            .roles
            .values()
            .map(|r| {
                r.name.len()
                    + r.permissions
                        .iter()
                        .map(|p| p.key.len() + p.range_end.len() + 1)
                        .sum::<usize>()
            })
            .sum();
        (users + roles) as u64
    }

    fn bump(&mut self) -> u64 {
        self.revision += 1;
        self.revision
    }

    pub fn enable(&mut self) -> ApplyResult<u64> {
        if self.enabled {
            return Ok(self.revision);
        }
        let root = self.users.get(ROOT_USER).ok_or(ApplyError::RootUserNotExist)?;
        if !root.roles.contains(ROOT_ROLE) {
            return Err(ApplyError::RootRoleNotExist);
        }
        self.enabled = true;
        Ok(self.bump())
    }

    pub fn disable(&mut self) -> u64 {
        if !self.enabled {
            return self.revision;
        }
        self.enabled = false;
        self.tokens.clear();
        self.bump()
    }

    /// Records a token issued by the proposer after it verified the password.
    pub fn authenticate(&mut self, name: &str, token: &str) -> ApplyResult<String> {
        if !self.enabled {
            return Err(ApplyError::AuthNotEnabled);
        }
        if !self.users.contains_key(name) {
            return Err(ApplyError::AuthFailed);
        }
        self.tokens.insert(token.to_string(), name.to_string());
        Ok(token.to_string())
    }

    pub fn user_add(
        &mut self,
        name: &str,
        password_hash: &str,
        no_password: bool,
    ) -> ApplyResult<u64> {
        if name.is_empty() {
            return Err(ApplyError::UserEmpty);
        }
        if self.users.contains_key(name) {
            return Err(ApplyError::UserAlreadyExist {
                name: name.to_string(),
            });
        }
        if password_hash.is_empty() && !no_password {
            return Err(ApplyError::PasswordRequired);
        }
        self.users.insert(
            name.to_string(),
            User {
                name: name.to_string(),
                password_hash: if no_password {
                    String::new()
                } else {
                    password_hash.to_string()
                },
                roles: BTreeSet::new(),
                no_password,
            },
        );
        Ok(self.bump())
    }

    pub fn user_delete(&mut self, name: &str) -> ApplyResult<u64> {
        if self.enabled && name == ROOT_USER {
            return Err(ApplyError::InvalidAuthManagement);
        }
        if self.users.remove(name).is_none() {
            return Err(user_not_found(name));
        }
        self.tokens.retain(|_, owner| owner != name);
        Ok(self.bump())
    }

    pub fn user_change_password(&mut self, name: &str, password_hash: &str) -> ApplyResult<u64> {
        let user = self.users.get_mut(name).ok_or_else(|| user_not_found(name))?;
        if password_hash.is_empty() && !user.no_password {
            return Err(ApplyError::PasswordRequired);
        }
        user.password_hash = password_hash.to_string();
        self.tokens.retain(|_, owner| owner != name);
        Ok(self.bump())
    }

    pub fn user_grant_role(&mut self, name: &str, role: &str) -> ApplyResult<u64> {
        if role != ROOT_ROLE && !self.roles.contains_key(role) {
            return Err(role_not_found(role));
        }
        let user = self.users.get_mut(name).ok_or_else(|| user_not_found(name))?;
        if !user.roles.insert(role.to_string()) {
            return Ok(self.revision);
        }
        Ok(self.bump())
    }

    pub fn user_revoke_role(&mut self, name: &str, role: &str) -> ApplyResult<u64> {
        if self.enabled && name == ROOT_USER && role == ROOT_ROLE {
            return Err(ApplyError::InvalidAuthManagement);
        }
        let user = self.users.get_mut(name).ok_or_else(|| user_not_found(name))?;
        if !user.roles.remove(role) {
            return Err(ApplyError::RoleNotGranted {
                name: role.to_string(),
            });
        }
        Ok(self.bump())
    }

    pub fn user_get(&self, name: &str) -> ApplyResult<Vec<String>> {
        let user = self.users.get(name).ok_or_else(|| user_not_found(name))?;
        Ok(user.roles.iter().cloned().collect())
    }

    pub fn user_list(&self) -> Vec<String> {
        self.users.keys().cloned().collect()
    }

    pub fn role_add(&mut self, name: &str) -> ApplyResult<u64> {
        if name.is_empty() {
            return Err(ApplyError::RoleEmpty);
        }
        if self.roles.contains_key(name) {
            return Err(ApplyError::RoleAlreadyExist {
                name: name.to_string(),
            });
        }
        self.roles.insert(
            name.to_string(),
            Role {
                name: name.to_string(),
                permissions: Vec::new(),
            },
        );
        Ok(self.bump())
    }

    /// The root role is implicit and grants read-write over the whole key space.
    pub fn role_get(&self, name: &str) -> ApplyResult<Vec<Permission>> {
        if name == ROOT_ROLE {
            return Ok(vec![Permission {
                perm_type: PermissionType::Readwrite,
                key: Vec::new(),
                range_end: vec![0],
            }]);
        }
        let role = self.roles.get(name).ok_or_else(|| role_not_found(name))?;
        Ok(role.permissions.clone())
    }

    pub fn role_list(&self) -> Vec<String> {
        self.roles.keys().cloned().collect()
    }

    pub fn role_delete(&mut self, name: &str) -> ApplyResult<u64> {
        if self.enabled && name == ROOT_ROLE {
            return Err(ApplyError::InvalidAuthManagement);
        }
        if self.roles.remove(name).is_none() {
            return Err(role_not_found(name));
        }
        for user in self.users.values_mut() {
            user.roles.remove(name);
        }
        Ok(self.bump())
    }

    pub fn role_grant_permission(&mut self, name: &str, perm: &Permission) -> ApplyResult<u64> {
        let role = self.roles.get_mut(name).ok_or_else(|| role_not_found(name))?;
        match role
            .permissions
            .iter_mut()
            .find(|p| p.key == perm.key && p.range_end == perm.range_end)
        {
            Some(existing) => existing.perm_type = perm.perm_type,
            None => {
                role.permissions.push(perm.clone());
                role.permissions
                    .sort_by(|a, b| (&a.key, &a.range_end).cmp(&(&b.key, &b.range_end)));
            }
        }
        Ok(self.bump())
    }

    pub fn role_revoke_permission(
        &mut self,
        name: &str,
        key: &[u8],
        range_end: &[u8],
    ) -> ApplyResult<u64> {
        let role = self.roles.get_mut(name).ok_or_else(|| role_not_found(name))?;
        let before = role.permissions.len();
        role.permissions
            .retain(|p| p.key != key || p.range_end != range_end);
        if role.permissions.len() == before {
            return Err(ApplyError::PermissionNotGranted);
        }
        Ok(self.bump())
    }

    pub fn has_root_role(&self, name: &str) -> bool {
        self.users
            .get(name)
            .is_some_and(|user| user.roles.contains(ROOT_ROLE))
    }

    /// Whether `name` may access every key in `[key, range_end)` with `wanted`.
    pub fn is_range_permitted(
        &self,
        name: &str,
        key: &[u8],
        range_end: &[u8],
        wanted: PermissionType,
    ) -> bool {
        let Some(user) = self.users.get(name) else {
            return false;
        };
        if user.roles.contains(ROOT_ROLE) {
            return true;
        }
        let granted: Vec<Interval> = user
            .roles
            .iter()
            .filter_map(|role| self.roles.get(role))
            .flat_map(|role| role.permissions.iter())
            .filter(|perm| perm.perm_type.allows(wanted))
            .map(|perm| Interval::of(&perm.key, &perm.range_end))
            .collect();
        Interval::of(key, range_end).is_covered_by(granted)
    }
}

/// Verifies a plain password against the stored argon2id hash.
pub fn verify_password(user: &User, password: &str) -> bool {
    if user.no_password || password.is_empty() {
        return false;
    }
    let Ok(parsed) = PasswordHash::new(&user.password_hash) else {
        return false;
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}

/// Hashes a password into a PHC string. Done by the proposer so replicas never see plain text.
pub fn hash_password(password: &str) -> Result<String, String> {
    if password.is_empty() {
        return Err("password is empty".to_string());
    }
    let params = Params::new(19_456, 2, 1, None).map_err(|e| format!("argon2 params: {e}"))?;
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);
    let salt = SaltString::generate(&mut OsRng);
    argon2
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| format!("argon2 hash: {e}"))
}

fn user_not_found(name: &str) -> ApplyError {
    ApplyError::UserNotFound {
        name: name.to_string(),
    }
}

fn role_not_found(name: &str) -> ApplyError {
    ApplyError::RoleNotFound {
        name: name.to_string(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum Bound {
    Key(Vec<u8>),
    Infinite,
}

#[derive(Debug, Clone)]
struct Interval {
    start: Vec<u8>,
    end: Bound,
}

impl Interval {
    fn of(key: &[u8], range_end: &[u8]) -> Self {
        let end = match range_end {
            [] => {
                let mut next = key.to_vec();
                next.push(0);
                Bound::Key(next)
            }
            [0] => Bound::Infinite,
            end => Bound::Key(end.to_vec()),
        };
        Self {
            start: key.to_vec(),
            end,
        }
    }

    fn is_covered_by(&self, mut granted: Vec<Interval>) -> bool {
        granted.sort_by(|a, b| a.start.cmp(&b.start));
        let mut reached = Bound::Key(self.start.clone());
        for iv in granted {
            if Bound::Key(iv.start.clone()) > reached {
                break;
            }
            if iv.end > reached {
                reached = iv.end;
            }
            if reached >= self.end {
                return true;
            }
        }
        reached >= self.end
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn store_with_root() -> AuthStore {
        let mut store = AuthStore::default();
        store.user_add(ROOT_USER, "$hash", false).unwrap();
        store.user_grant_role(ROOT_USER, ROOT_ROLE).unwrap();
        store
    }

    fn read(key: &str, range_end: &str) -> Permission {
        Permission {
            perm_type: PermissionType::Read,
            key: key.as_bytes().to_vec(),
            range_end: range_end.as_bytes().to_vec(),
        }
    }

    #[test]
    fn enable_requires_root_with_root_role() {
        let mut store = AuthStore::default();
        assert_eq!(store.enable(), Err(ApplyError::RootUserNotExist));
        store.user_add(ROOT_USER, "$hash", false).unwrap();
        assert_eq!(store.enable(), Err(ApplyError::RootRoleNotExist));
        store.user_grant_role(ROOT_USER, ROOT_ROLE).unwrap();
        let rev = store.enable().unwrap();
        assert!(store.is_enabled());
        assert_eq!(rev, 3);
        assert_eq!(store.enable(), Ok(3));
    }

    #[test]
    fn every_mutation_bumps_revision() {
        let mut store = AuthStore::default();
        assert_eq!(store.role_add("r").unwrap(), 1);
        assert_eq!(store.user_add("u", "$h", false).unwrap(), 2);
        assert_eq!(store.user_grant_role("u", "r").unwrap(), 3);
        // granting an already held role changes nothing
        assert_eq!(store.user_grant_role("u", "r").unwrap(), 3);
        assert_eq!(store.role_grant_permission("r", &read("a", "b")).unwrap(), 4);
        assert_eq!(store.user_revoke_role("u", "r").unwrap(), 5);
        assert_eq!(store.revision(), 5);
    }

    #[test]
    fn root_is_protected_while_enabled() {
        let mut store = store_with_root();
        store.enable().unwrap();
        assert_eq!(
            store.user_delete(ROOT_USER),
            Err(ApplyError::InvalidAuthManagement)
        );
        assert_eq!(
            store.user_revoke_role(ROOT_USER, ROOT_ROLE),
            Err(ApplyError::InvalidAuthManagement)
        );
        assert_eq!(
            store.role_delete(ROOT_ROLE),
            Err(ApplyError::InvalidAuthManagement)
        );
        store.disable();
        store.user_revoke_role(ROOT_USER, ROOT_ROLE).unwrap();
    }

    #[test]
    fn user_and_role_errors() {
        let mut store = AuthStore::default();
        assert_eq!(store.user_add("", "$h", false), Err(ApplyError::UserEmpty));
        assert_eq!(store.user_add("u", "", false), Err(ApplyError::PasswordRequired));
        store.user_add("u", "", true).unwrap();
        assert_eq!(
            store.user_add("u", "$h", false),
            Err(ApplyError::UserAlreadyExist {
                name: "u".to_string()
            })
        );
        assert_eq!(
            store.user_grant_role("u", "missing"),
            Err(ApplyError::RoleNotFound {
                name: "missing".to_string()
            })
        );
        assert_eq!(store.role_add(""), Err(ApplyError::RoleEmpty));
        store.role_add("r").unwrap();
        assert_eq!(
            store.user_revoke_role("u", "r"),
            Err(ApplyError::RoleNotGranted {
                name: "r".to_string()
            })
        );
        assert_eq!(
            store.role_revoke_permission("r", b"a", b""),
            Err(ApplyError::PermissionNotGranted)
        );
    }

    #[test]
    fn deleting_a_role_removes_it_from_users() {
        let mut store = AuthStore::default();
        store.role_add("r").unwrap();
        store.user_add("u", "$h", false).unwrap();
        store.user_grant_role("u", "r").unwrap();
        store.role_delete("r").unwrap();
        assert!(store.user_get("u").unwrap().is_empty());
    }

    #[test]
    fn root_role_get_covers_everything() {
        let store = AuthStore::default();
        let perms = store.role_get(ROOT_ROLE).unwrap();
        assert_eq!(perms[0].perm_type, PermissionType::Readwrite);
        assert_eq!(perms[0].range_end, vec![0]);
    }

    #[test]
    fn range_permission_needs_full_coverage() {
        let mut store = AuthStore::default();
        store.role_add("r").unwrap();
        store.role_grant_permission("r", &read("a", "c")).unwrap();
        store.role_grant_permission("r", &read("c", "e")).unwrap();
        store.user_add("u", "$h", false).unwrap();
        store.user_grant_role("u", "r").unwrap();

        assert!(store.is_range_permitted("u", b"b", b"", PermissionType::Read));
        assert!(store.is_range_permitted("u", b"a", b"e", PermissionType::Read));
        assert!(!store.is_range_permitted("u", b"a", b"f", PermissionType::Read));
        assert!(!store.is_range_permitted("u", b"b", b"", PermissionType::Write));
        assert!(!store.is_range_permitted("u", b"a", &[0], PermissionType::Read));
        assert!(!store.is_range_permitted("ghost", b"b", b"", PermissionType::Read));
    }

    #[test]
    fn root_role_is_permitted_anywhere() {
        let store = store_with_root();
        assert!(store.is_range_permitted(ROOT_USER, b"", &[0], PermissionType::Write));
    }

    #[test]
    fn password_hash_roundtrip() {
        let hash = hash_password("s3cret").unwrap();
        assert!(hash.starts_with("$argon2id$"));
        let user = User {
            name: "u".to_string(),
            password_hash: hash,
            ..Default::default()
        };
        assert!(verify_password(&user, "s3cret"));
        assert!(!verify_password(&user, "wrong"));
        assert!(hash_password("").is_err());
    }

    #[test]
    fn tokens_are_dropped_with_their_user() {
        let mut store = store_with_root();
        store.user_add("u", "$h", false).unwrap();
        store.enable().unwrap();
        store.authenticate("u", "tok").unwrap();
        assert_eq!(store.token_owner("tok"), Some("u"));
        store.user_delete("u").unwrap();
        assert_eq!(store.token_owner("tok"), None);
        assert_eq!(store.authenticate("u", "tok2"), Err(ApplyError::AuthFailed));
    }
}
