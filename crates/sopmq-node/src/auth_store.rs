//! User credential lookup for the auth handshake. Keyed by `uname_hash`
//! (hex SHA-256 of the username) so the server never has to see a raw
//! username to check a `AnswerChallenge`.

use sopmq_protocol::auth;
use std::collections::HashMap;

/// An in-memory credential table: `uname_hash -> pw_hash`.
#[derive(Default)]
pub struct AuthStore {
    users: HashMap<String, String>,
}

impl AuthStore {
    pub fn new() -> AuthStore {
        AuthStore::default()
    }

    pub fn add_user(&mut self, username: &str, password: &str) {
        self.users.insert(auth::uname_hash(username), auth::pw_hash(password));
    }

    pub fn pw_hash_for(&self, uname_hash: &str) -> Option<&str> {
        self.users.get(uname_hash).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn looks_up_by_username_hash() {
        let mut store = AuthStore::new();
        store.add_user("alice", "good");

        let uname_hash = auth::uname_hash("alice");
        assert_eq!(store.pw_hash_for(&uname_hash), Some(auth::pw_hash("good").as_str()));
        assert_eq!(store.pw_hash_for(&auth::uname_hash("bob")), None);
    }
}
