#![forbid(unsafe_code)]
//! User registry and login sessions.
//!
//! `AuthManager` keeps the user table and the current session under one
//! mutex. Passwords are stored as blake3 digests. The table persists to a
//! tab-separated sidecar (`username\thash\tis_admin`).

use mtfs_error::Result;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::Path;
use tracing::{debug, info, warn};

/// One registered user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub username: String,
    pub password_hash: String,
    pub is_admin: bool,
}

#[derive(Debug, Default)]
struct AuthState {
    users: HashMap<String, User>,
    current: Option<String>,
}

/// User registry plus the current login session.
///
/// A fresh manager seeds an `admin`/`admin` account so the store is usable
/// before any users are provisioned.
#[derive(Debug)]
pub struct AuthManager {
    state: Mutex<AuthState>,
}

impl Default for AuthManager {
    fn default() -> Self {
        Self::new()
    }
}

impl AuthManager {
    #[must_use]
    pub fn new() -> Self {
        let manager = Self {
            state: Mutex::new(AuthState::default()),
        };
        let _ = manager.register_user("admin", "admin", true);
        manager
    }

    /// Register a user. Returns `false` if the name is taken.
    pub fn register_user(&self, username: &str, password: &str, is_admin: bool) -> bool {
        let mut state = self.state.lock();
        if state.users.contains_key(username) {
            return false;
        }
        state.users.insert(
            username.to_owned(),
            User {
                username: username.to_owned(),
                password_hash: hash_password(password),
                is_admin,
            },
        );
        info!(user = username, is_admin, "user registered");
        true
    }

    /// Verify credentials and start a session on success.
    pub fn login(&self, username: &str, password: &str) -> bool {
        let mut state = self.state.lock();
        let ok = state
            .users
            .get(username)
            .is_some_and(|user| user.password_hash == hash_password(password));
        if ok {
            state.current = Some(username.to_owned());
            debug!(user = username, "login succeeded");
        } else {
            warn!(user = username, "login rejected");
        }
        ok
    }

    /// End the current session.
    pub fn logout(&self) {
        self.state.lock().current = None;
    }

    #[must_use]
    pub fn is_logged_in(&self) -> bool {
        self.state.lock().current.is_some()
    }

    /// The logged-in username, if any.
    #[must_use]
    pub fn current_user(&self) -> Option<String> {
        self.state.lock().current.clone()
    }

    #[must_use]
    pub fn user_exists(&self, username: &str) -> bool {
        self.state.lock().users.contains_key(username)
    }

    #[must_use]
    pub fn is_admin(&self, username: &str) -> bool {
        self.state
            .lock()
            .users
            .get(username)
            .is_some_and(|user| user.is_admin)
    }

    /// Remove a user. Idempotent; an active session for the removed user
    /// stays logged in until logout.
    pub fn remove_user(&self, username: &str) -> bool {
        self.state.lock().users.remove(username).is_some()
    }

    /// Persist the user table as `username\thash\tis_admin` rows.
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let state = self.state.lock();
        let mut out = Vec::new();
        for user in state.users.values() {
            writeln!(
                out,
                "{}\t{}\t{}",
                user.username,
                user.password_hash,
                u8::from(user.is_admin)
            )?;
        }
        fs::write(path.as_ref(), out)?;
        Ok(())
    }

    /// Replace the user table from a sidecar written by [`save_to_file`].
    ///
    /// Malformed rows are skipped.
    ///
    /// [`save_to_file`]: AuthManager::save_to_file
    pub fn load_from_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let data = fs::read_to_string(path.as_ref())?;
        let mut state = self.state.lock();
        state.users.clear();
        for line in data.lines() {
            let mut fields = line.split('\t');
            let (Some(username), Some(hash), Some(is_admin)) =
                (fields.next(), fields.next(), fields.next())
            else {
                continue;
            };
            state.users.insert(
                username.to_owned(),
                User {
                    username: username.to_owned(),
                    password_hash: hash.to_owned(),
                    is_admin: is_admin == "1",
                },
            );
        }
        info!(users = state.users.len(), "user table loaded");
        Ok(())
    }

    /// Number of registered users.
    #[must_use]
    pub fn user_count(&self) -> usize {
        self.state.lock().users.len()
    }
}

fn hash_password(password: &str) -> String {
    blake3::hash(password.as_bytes()).to_hex().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_admin_can_login() {
        let auth = AuthManager::new();
        assert!(auth.login("admin", "admin"));
        assert!(auth.is_logged_in());
        assert_eq!(auth.current_user().as_deref(), Some("admin"));
        assert!(auth.is_admin("admin"));
    }

    #[test]
    fn wrong_password_rejected() {
        let auth = AuthManager::new();
        assert!(auth.register_user("mika", "hunter2", false));
        assert!(!auth.login("mika", "hunter3"));
        assert!(!auth.is_logged_in());
    }

    #[test]
    fn duplicate_registration_rejected() {
        let auth = AuthManager::new();
        assert!(auth.register_user("mika", "a", false));
        assert!(!auth.register_user("mika", "b", false));
    }

    #[test]
    fn logout_clears_session() {
        let auth = AuthManager::new();
        assert!(auth.login("admin", "admin"));
        auth.logout();
        assert!(!auth.is_logged_in());
        assert_eq!(auth.current_user(), None);
    }

    #[test]
    fn unknown_user_never_authenticates() {
        let auth = AuthManager::new();
        assert!(!auth.login("ghost", ""));
        assert!(!auth.is_admin("ghost"));
    }

    #[test]
    fn save_load_roundtrip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("users.tsv");

        let auth = AuthManager::new();
        auth.register_user("mika", "hunter2", false);
        auth.register_user("ops", "s3cret", true);
        auth.save_to_file(&path).expect("save");

        let restored = AuthManager::new();
        restored.load_from_file(&path).expect("load");
        assert_eq!(restored.user_count(), 3);
        assert!(restored.login("mika", "hunter2"));
        assert!(restored.is_admin("ops"));
        assert!(!restored.is_admin("mika"));
    }
}
