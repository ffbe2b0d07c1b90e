//! Session-scoped key/value storage for ceremony state.
//!
//! Challenges and reauthentication proofs live in the caller's session, not
//! in the database. Slots are keyed by structured [`SessionKey`] values
//! rather than concatenated strings so ceremony kinds cannot collide.

use std::collections::HashMap;
use std::sync::Mutex;

/// The ceremony a challenge was minted for. A challenge stored for one kind
/// is never visible to another.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CeremonyKind {
    Registration,
    Authentication,
    Reauthentication,
    Recovery,
}

/// Structured session slot names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionKey {
    Challenge(CeremonyKind),
    ReauthenticationProof,
}

/// Key/value storage bound to a single login/browser session.
///
/// Implementations are expected to be last-write-wins per slot; only one
/// ceremony per session is ever intended to be outstanding.
pub trait SessionStore: Send + Sync {
    fn put(&self, key: SessionKey, value: String);
    fn get(&self, key: SessionKey) -> Option<String>;
    /// Remove and return the slot in a single logical read.
    fn take(&self, key: SessionKey) -> Option<String>;
}

/// In-process session store.
#[derive(Debug, Default)]
pub struct MemorySession {
    slots: Mutex<HashMap<SessionKey, String>>,
}

impl MemorySession {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for MemorySession {
    fn put(&self, key: SessionKey, value: String) {
        self.slots.lock().unwrap().insert(key, value);
    }

    fn get(&self, key: SessionKey) -> Option<String> {
        self.slots.lock().unwrap().get(&key).cloned()
    }

    fn take(&self, key: SessionKey) -> Option<String> {
        self.slots.lock().unwrap().remove(&key)
    }
}

/// Challenge slot access for a ceremony kind.
///
/// `take` consumes the slot, so a challenge can back at most one
/// verification attempt; callers must mint a fresh challenge per retry.
pub struct ChallengeStore;

impl ChallengeStore {
    pub fn put(session: &dyn SessionStore, kind: CeremonyKind, challenge: &str) {
        session.put(SessionKey::Challenge(kind), challenge.to_string());
    }

    pub fn take(session: &dyn SessionStore, kind: CeremonyKind) -> Option<String> {
        session.take(SessionKey::Challenge(kind))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn take_consumes_the_slot() {
        let session = MemorySession::new();
        ChallengeStore::put(&session, CeremonyKind::Authentication, "abc");

        assert_eq!(
            ChallengeStore::take(&session, CeremonyKind::Authentication).as_deref(),
            Some("abc")
        );
        assert!(ChallengeStore::take(&session, CeremonyKind::Authentication).is_none());
    }

    #[test]
    fn ceremony_kinds_do_not_share_slots() {
        let session = MemorySession::new();
        ChallengeStore::put(&session, CeremonyKind::Registration, "reg");

        assert!(ChallengeStore::take(&session, CeremonyKind::Authentication).is_none());
        assert!(ChallengeStore::take(&session, CeremonyKind::Recovery).is_none());
        assert_eq!(
            ChallengeStore::take(&session, CeremonyKind::Registration).as_deref(),
            Some("reg")
        );
    }

    #[test]
    fn put_overwrites_an_outstanding_challenge() {
        let session = MemorySession::new();
        ChallengeStore::put(&session, CeremonyKind::Authentication, "first");
        ChallengeStore::put(&session, CeremonyKind::Authentication, "second");

        assert_eq!(
            ChallengeStore::take(&session, CeremonyKind::Authentication).as_deref(),
            Some("second")
        );
    }
}
