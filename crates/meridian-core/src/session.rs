//! User session reference.
//!
//! Session lifecycle (bind, close, per-connection ordering) belongs to the
//! frontend's connection layer. The core only carries a reference and
//! snapshots it across the peer channel.

use meridian_proto::SessionRecord;

/// A user session as seen by the dispatch path.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Session {
    /// Frontend-local session id.
    pub id: i64,
    /// Bound user id; empty while unauthenticated.
    pub uid: String,
    /// Serializer-encoded session attributes, treated as opaque bytes.
    pub data: Vec<u8>,
}

impl Session {
    /// Creates a session.
    #[must_use]
    pub fn new(id: i64, uid: impl Into<String>) -> Self {
        Self {
            id,
            uid: uid.into(),
            data: Vec::new(),
        }
    }

    /// Snapshot for embedding in a peer request.
    #[must_use]
    pub fn snapshot(&self) -> SessionRecord {
        SessionRecord {
            id: self.id,
            uid: self.uid.clone(),
            data: self.data.clone(),
        }
    }

    /// Rebuilds a session reference from a wire snapshot.
    #[must_use]
    pub fn from_record(record: SessionRecord) -> Self {
        Self {
            id: record.id,
            uid: record.uid,
            data: record.data,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_roundtrip() {
        let mut session = Session::new(3, "u1");
        session.data = b"{\"lvl\":9}".to_vec();

        let restored = Session::from_record(session.snapshot());
        assert_eq!(restored, session);
    }
}
