use sha1::{Digest, Sha1};

/// A single playable character as returned by the account store.
#[derive(Debug, Clone, Default)]
pub struct Character {
    pub name: String,
    pub instance_name: String,
    pub instance_id: String,
    pub level: u16,
    pub auto_reconnect: bool,
}

/// Value type returned by the account store. `id == 0` is the sentinel for
/// "not found" — never a real account.
#[derive(Debug, Clone, Default)]
pub struct Account {
    pub id: u32,
    pub email: String,
    pub password: String,
    pub premium_ends_at: u32,
    pub characters: Vec<Character>,
}

impl Account {
    pub fn not_found() -> Self {
        Account::default()
    }

    pub fn is_found(&self) -> bool {
        self.id != 0
    }
}

/// Salts and hashes a client-submitted password the same way the account
/// store is expected to have hashed it at registration time.
pub fn hash_password(salt: &str, password: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(salt.as_bytes());
    hasher.update(password.as_bytes());
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

/// The account database, modeled as an external collaborator: a
/// synchronous query interface returning an account record and its
/// character list. Implementations are expected to be cheap to call from
/// the connection's read thread since the handshake blocks on it.
pub trait AccountStore: Send + Sync {
    fn find_account(&self, email: &str, password_hash: &str) -> Account;
    fn find_characters(&self, account_id: u32) -> Vec<Character>;
}

/// Reference in-memory implementation used by tests and standalone runs.
/// Stores pre-hashed passwords, matching the store contract in section 6:
/// the server never sees (or stores) a plaintext password.
pub struct InMemoryAccountStore {
    accounts: Vec<(Account, Vec<Character>)>,
}

impl InMemoryAccountStore {
    pub fn new() -> Self {
        InMemoryAccountStore { accounts: Vec::new() }
    }

    pub fn add_account(&mut self, account: Account, characters: Vec<Character>) {
        self.accounts.push((account, characters));
    }
}

impl Default for InMemoryAccountStore {
    fn default() -> Self {
        Self::new()
    }
}

impl AccountStore for InMemoryAccountStore {
    fn find_account(&self, email: &str, password_hash: &str) -> Account {
        self.accounts
            .iter()
            .find(|(a, _)| a.email == email && a.password == password_hash)
            .map(|(a, _)| a.clone())
            .unwrap_or_else(Account::not_found)
    }

    fn find_characters(&self, account_id: u32) -> Vec<Character> {
        self.accounts
            .iter()
            .find(|(a, _)| a.id == account_id)
            .map(|(_, chars)| chars.clone())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_account_is_sentinel() {
        let store = InMemoryAccountStore::new();
        let account = store.find_account("a@b", &hash_password("salt", "pw"));
        assert!(!account.is_found());
    }

    #[test]
    fn known_account_round_trips() {
        let mut store = InMemoryAccountStore::new();
        let hash = hash_password("salt", "pw");
        store.add_account(
            Account {
                id: 1,
                email: "a@b".into(),
                password: hash.clone(),
                premium_ends_at: 0,
                characters: Vec::new(),
            },
            Vec::new(),
        );

        let found = store.find_account("a@b", &hash);
        assert_eq!(found.id, 1);
        assert!(store.find_characters(1).is_empty());
    }
}
