//! Replicated document capability and the Yrs binding

use crate::error::{Error, Result};
use yrs::updates::decoder::Decode;
use yrs::{Doc, GetString, ReadTxn, StateVector, Text, Transact};

/// Name of the shared text type edited by clients
pub const SHARED_TEXT: &str = "monaco";

/// An exclusively owned handle to one replicated document.
///
/// The only property relied upon is convergence: applying any sequence of
/// updates, in any order and any number of times, yields the same state.
pub trait DocumentHandle: Send {
    /// Merge an update produced by any replica
    fn apply_update(&mut self, update: &[u8]) -> Result<()>;

    /// Encode the full current state as a single update
    fn encode_snapshot(&self) -> Vec<u8>;
}

/// Creates empty documents for new rooms
pub trait DocumentEngine: Send + Sync {
    fn create(&self) -> Box<dyn DocumentHandle>;
}

/// Yrs-backed engine, wire compatible with Yjs clients
#[derive(Debug, Clone, Copy, Default)]
pub struct YrsEngine;

impl DocumentEngine for YrsEngine {
    fn create(&self) -> Box<dyn DocumentHandle> {
        Box::new(YrsDocument::new())
    }
}

/// A Y.Doc holding the shared editor text
pub struct YrsDocument {
    doc: Doc,
}

impl YrsDocument {
    pub fn new() -> Self {
        Self { doc: Doc::new() }
    }

    /// Current contents of the shared text
    pub fn text(&self) -> String {
        let text = self.doc.get_or_insert_text(SHARED_TEXT);
        let txn = self.doc.transact();
        text.get_string(&txn)
    }

    /// Insert `chunk` at `index` and return the resulting update (v1 encoding)
    pub fn insert(&mut self, index: u32, chunk: &str) -> Vec<u8> {
        let text = self.doc.get_or_insert_text(SHARED_TEXT);
        let mut txn = self.doc.transact_mut();
        text.insert(&mut txn, index, chunk);
        txn.encode_update_v1()
    }

    /// Append `chunk` to the end of the shared text
    pub fn append(&mut self, chunk: &str) -> Vec<u8> {
        let len = {
            let text = self.doc.get_or_insert_text(SHARED_TEXT);
            let txn = self.doc.transact();
            text.len(&txn)
        };
        self.insert(len, chunk)
    }
}

impl Default for YrsDocument {
    fn default() -> Self {
        Self::new()
    }
}

impl DocumentHandle for YrsDocument {
    fn apply_update(&mut self, update: &[u8]) -> Result<()> {
        let decoded = yrs::Update::decode_v1(update)
            .map_err(|e: yrs::encoding::read::Error| Error::MalformedUpdate(e.to_string()))?;
        let mut txn = self.doc.transact_mut();
        txn.apply_update(decoded);
        Ok(())
    }

    fn encode_snapshot(&self) -> Vec<u8> {
        let txn = self.doc.transact();
        txn.encode_state_as_update_v1(&StateVector::default())
    }
}

impl std::fmt::Debug for YrsDocument {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("YrsDocument")
            .field("client_id", &self.doc.client_id())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_remote_insert() {
        let mut alice = YrsDocument::new();
        let mut bob = YrsDocument::new();

        let update = alice.append("hello");
        bob.apply_update(&update).unwrap();

        assert_eq!(bob.text(), "hello");
    }

    #[test]
    fn test_snapshot_seeds_fresh_replica() {
        let mut server = YrsDocument::new();
        let mut alice = YrsDocument::new();
        server.apply_update(&alice.append("fn main() {}")).unwrap();

        let mut joiner = YrsDocument::new();
        joiner.apply_update(&server.encode_snapshot()).unwrap();

        assert_eq!(joiner.text(), "fn main() {}");
    }

    #[test]
    fn test_duplicate_update_is_idempotent() {
        let mut alice = YrsDocument::new();
        let mut bob = YrsDocument::new();

        let update = alice.append("abc");
        bob.apply_update(&update).unwrap();
        bob.apply_update(&update).unwrap();

        assert_eq!(bob.text(), "abc");
    }

    #[test]
    fn test_garbage_update_rejected() {
        let mut doc = YrsDocument::new();
        let err = doc.apply_update(&[0xff, 0xff, 0xff]).unwrap_err();
        assert!(matches!(err, Error::MalformedUpdate(_)));
    }
}
