//! In-memory store implementations.
//!
//! The service core only knows the `AccountStore`/`KeyStore` seams;
//! production deployments put a real database behind them. These
//! implementations back small fixed deployments seeded from the config
//! file, and every test.

use crate::config::SeedAccount;

use ahash::AHashMap;
use codec::payload::{Id, MIN_ACCOUNT_ID};
use parking_lot::RwLock;
use service::{Account, AccountStore, StoreError};

#[cfg(feature = "secure")]
use service::KeyStore;

struct Row {
    login: String,
    email: String,
    password: String,
}

#[derive(Default)]
struct AccountTable {
    next_id: Id,
    rows: AHashMap<Id, Row>,
}

/// Account storage with the effective schema
/// `id PK, login UNIQUE, email UNIQUE, password_hash`.
pub struct MemoryAccountStore {
    table: RwLock<AccountTable>,
}

impl MemoryAccountStore {
    pub fn new() -> Self {
        Self {
            table: RwLock::new(AccountTable {
                next_id: MIN_ACCOUNT_ID,
                rows: AHashMap::new(),
            }),
        }
    }

    /// Pre-create the configured static accounts. Duplicates in the seed
    /// list are skipped with a warning rather than failing startup.
    pub fn seed(accounts: &[SeedAccount]) -> Self {
        let store = Self::new();

        for account in accounts {
            match store.create(&account.login, &account.email, &account.password) {
                Ok(Some(created)) => {
                    log::info!(
                        "static account created: id={}, login={:?}",
                        created.id,
                        created.login
                    );
                }
                Ok(None) => {
                    log::warn!("static account skipped, duplicate: login={:?}", account.login);
                }
                Err(error) => {
                    log::error!("static account failed: login={:?}, err={error}", account.login);
                }
            }
        }

        store
    }
}

impl Default for MemoryAccountStore {
    fn default() -> Self {
        Self::new()
    }
}

impl AccountStore for MemoryAccountStore {
    fn create(
        &self,
        login: &str,
        email: &str,
        password: &str,
    ) -> Result<Option<Account>, StoreError> {
        let mut table = self.table.write();

        if table
            .rows
            .values()
            .any(|row| row.login == login || row.email == email)
        {
            return Ok(None);
        }

        let id = table.next_id;
        table.next_id += 1;
        table.rows.insert(
            id,
            Row {
                login: login.to_string(),
                email: email.to_string(),
                password: password.to_string(),
            },
        );

        Ok(Some(Account {
            id,
            login: login.to_string(),
            email: email.to_string(),
        }))
    }

    fn find(&self, name: &str) -> Result<Option<Account>, StoreError> {
        Ok(self.table.read().rows.iter().find_map(|(id, row)| {
            (row.login == name || row.email == name).then(|| Account {
                id: *id,
                login: row.login.clone(),
                email: row.email.clone(),
            })
        }))
    }

    fn verify_password(&self, id: Id, password: &str) -> Result<bool, StoreError> {
        Ok(self
            .table
            .read()
            .rows
            .get(&id)
            .is_some_and(|row| row.password == password))
    }
}

/// Public-key storage: `owner_id UNIQUE, key`. Keys are opaque strings.
#[cfg(feature = "secure")]
#[derive(Default)]
pub struct MemoryKeyStore {
    rows: RwLock<AHashMap<Id, String>>,
}

#[cfg(feature = "secure")]
impl KeyStore for MemoryKeyStore {
    fn put(&self, owner: Id, key: &str) -> Result<(), StoreError> {
        self.rows.write().insert(owner, key.to_string());
        Ok(())
    }

    fn get(&self, owner: Id) -> Result<Option<String>, StoreError> {
        Ok(self.rows.read().get(&owner).cloned())
    }

    fn delete(&self, owner: Id) -> Result<(), StoreError> {
        self.rows.write().remove(&owner);
        Ok(())
    }
}
