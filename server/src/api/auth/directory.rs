//! In-memory account table

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;
use utoipa::ToSchema;

use super::password;
use crate::core::config::{Role, UserFileConfig};

/// A configured account. The password hash never leaves this module except
/// when the table is written back to the configuration file.
#[derive(Clone, PartialEq, Eq)]
pub struct Account {
    pub username: String,
    pub role: Role,
    pub email: Option<String>,
    pub display_name: Option<String>,
    password_hash: Option<String>,
}

impl std::fmt::Debug for Account {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Account")
            .field("username", &self.username)
            .field("role", &self.role)
            .field("has_password", &self.password_hash.is_some())
            .finish()
    }
}

impl Account {
    pub fn new(username: impl Into<String>, role: Role, password_hash: Option<String>) -> Self {
        Self {
            username: username.into(),
            role,
            email: None,
            display_name: None,
            password_hash,
        }
    }

    pub fn has_password(&self) -> bool {
        self.password_hash.is_some()
    }

    pub fn set_password_hash(&mut self, hash: String) {
        self.password_hash = Some(hash);
    }

    pub fn view(&self) -> AccountView {
        AccountView {
            username: self.username.clone(),
            role: self.role,
            email: self.email.clone(),
            display_name: self.display_name.clone(),
            has_password: self.has_password(),
        }
    }
}

impl From<UserFileConfig> for Account {
    fn from(user: UserFileConfig) -> Self {
        Self {
            username: user.username,
            role: user.role,
            email: user.email,
            display_name: user.display_name,
            password_hash: user.password_hash,
        }
    }
}

impl From<&Account> for UserFileConfig {
    fn from(account: &Account) -> Self {
        Self {
            username: account.username.clone(),
            password_hash: account.password_hash.clone(),
            role: account.role,
            email: account.email.clone(),
            display_name: account.display_name.clone(),
        }
    }
}

/// Public view of an account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct AccountView {
    pub username: String,
    pub role: Role,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    pub has_password: bool,
}

/// Copy-on-write account table keyed by username.
///
/// Readers take an `Arc` snapshot and never block writers for longer than
/// the pointer swap.
#[derive(Default)]
pub struct UserDirectory {
    accounts: RwLock<Arc<HashMap<String, Account>>>,
}

impl UserDirectory {
    pub fn new(accounts: impl IntoIterator<Item = Account>) -> Self {
        let directory = Self::default();
        directory.load(accounts);
        directory
    }

    /// Replace the whole table
    pub fn load(&self, accounts: impl IntoIterator<Item = Account>) {
        let map: HashMap<String, Account> = accounts
            .into_iter()
            .map(|a| (a.username.clone(), a))
            .collect();
        tracing::debug!(count = map.len(), "User directory loaded");
        *self.accounts.write() = Arc::new(map);
    }

    pub fn snapshot(&self) -> Arc<HashMap<String, Account>> {
        self.accounts.read().clone()
    }

    pub fn get(&self, username: &str) -> Option<AccountView> {
        self.accounts.read().get(username).map(Account::view)
    }

    pub fn contains(&self, username: &str) -> bool {
        self.accounts.read().contains_key(username)
    }

    pub fn count(&self) -> usize {
        self.accounts.read().len()
    }

    pub fn admin_count(&self) -> usize {
        self.accounts
            .read()
            .values()
            .filter(|a| a.role == Role::Admin)
            .count()
    }

    /// Whether an admin exists that can sign in with a password
    pub fn has_password_admin(&self) -> bool {
        self.accounts
            .read()
            .values()
            .any(|a| a.role == Role::Admin && a.has_password())
    }

    /// Accounts sorted by username
    pub fn list(&self) -> Vec<AccountView> {
        let mut accounts: Vec<AccountView> =
            self.accounts.read().values().map(Account::view).collect();
        accounts.sort_by(|a, b| a.username.cmp(&b.username));
        accounts
    }

    /// Check credentials. Runs a dummy hash for unknown users and accounts
    /// without a password so timing stays uniform.
    ///
    /// CPU-bound; call from a blocking task.
    pub fn verify_password(&self, username: &str, password: &str) -> Option<AccountView> {
        let account = self.accounts.read().get(username).cloned();
        match account {
            Some(account) => match &account.password_hash {
                Some(hash) if password::verify_password(password, hash) => Some(account.view()),
                Some(_) => None,
                None => {
                    password::dummy_verify(password);
                    None
                }
            },
            None => {
                password::dummy_verify(password);
                None
            }
        }
    }

}

/// `auth.users` entries for `accounts`, sorted by username
pub fn users_config(accounts: &HashMap<String, Account>) -> Vec<UserFileConfig> {
    let mut users: Vec<UserFileConfig> = accounts.values().map(UserFileConfig::from).collect();
    users.sort_by(|a, b| a.username.cmp(&b.username));
    users
}
