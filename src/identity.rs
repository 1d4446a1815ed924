//! Peer identity and the administrator list.
//!
//! The real GSI/GSSAPI credential machinery is an external collaborator
//! (spec section 1); this module provides the minimal identity type the
//! core needs in order to make lock-ownership and admin-verb decisions.
//! A production deployment plugs in GSI subject-name resolution here.

use std::collections::HashSet;

/// A resolved peer identity, e.g. a GSI subject DN or PBS-style username.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Identity(String);

impl Identity {
    pub fn new(raw: impl Into<String>) -> Self {
        Identity(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// The set of identities permitted to act as administrator for any LFN
/// (spec section 4.7: "the caller is in the administrator list").
#[derive(Debug, Clone, Default)]
pub struct AdminList(HashSet<Identity>);

impl AdminList {
    pub fn new(admins: impl IntoIterator<Item = Identity>) -> Self {
        AdminList(admins.into_iter().collect())
    }

    pub fn is_admin(&self, who: &Identity) -> bool {
        self.0.contains(who)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admin_membership() {
        let alice = Identity::new("alice");
        let bob = Identity::new("bob");
        let admins = AdminList::new([alice.clone()]);
        assert!(admins.is_admin(&alice));
        assert!(!admins.is_admin(&bob));
    }
}
