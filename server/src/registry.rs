//! Session registry: the authoritative record of who is present
//!
//! This module owns every [`Session`] for the lifetime of its connection:
//! - Admission allocates a unique display name and stores the session
//! - Renames are checked and applied here, never by callers
//! - Removal on disconnect returns the final session record for farewell
//!   broadcasts
//!
//! The registry is the single source of truth for membership. The central
//! invariant is that no two active sessions ever hold case-insensitively
//! equal display names; every mutation below preserves it.

use crate::identity::{AllocationExhausted, IdentityAllocator};
use log::info;
use shared::{ServerPacket, UserInfo};
use std::collections::{HashMap, HashSet};
use thiserror::Error;
use tokio::sync::mpsc::UnboundedSender;

/// Failures of registry operations, per the broker's error taxonomy
#[derive(Debug, Error)]
pub enum RegistryError {
    /// The transport admitted the same connection id twice
    #[error("connection {0} is already admitted")]
    DuplicateConnection(u32),
    /// The referenced connection is not (or no longer) present
    #[error("connection {0} is not in the registry")]
    UnknownConnection(u32),
    /// Another session already holds the proposed display name
    #[error("display name \"{0}\" is already taken")]
    NameConflict(String),
    /// Name allocation ran out of retries during admission
    #[error(transparent)]
    AllocationExhausted(#[from] AllocationExhausted),
}

/// One connected participant: immutable connection id, mutable display
/// name, and the handle for sending packets back over its connection
#[derive(Debug)]
pub struct Session {
    /// Connection identifier supplied by the transport
    pub id: u32,
    /// Display name, unique among active sessions (case-insensitive);
    /// mutated only by [`SessionRegistry::rename`]
    name: String,
    /// Outbound channel to this connection's writer task
    sender: UnboundedSender<ServerPacket>,
}

impl Session {
    fn new(id: u32, name: String, sender: UnboundedSender<ServerPacket>) -> Self {
        Self { id, name, sender }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The session's public data as broadcast to other participants.
    pub fn info(&self) -> UserInfo {
        UserInfo {
            id: self.id,
            name: self.name.clone(),
        }
    }

    /// Enqueues a packet on this connection's outbound channel.
    ///
    /// Returns false if the writer task is already gone, which is
    /// expected when a disconnect races an in-flight broadcast.
    pub fn send(&self, packet: ServerPacket) -> bool {
        self.sender.send(packet).is_ok()
    }
}

/// Process-wide mapping from connection id to session
///
/// Constructed once at startup and handed to the broadcast router; all
/// mutation happens through the operations below, one event at a time.
pub struct SessionRegistry {
    sessions: HashMap<u32, Session>,
    allocator: IdentityAllocator,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::with_allocator(IdentityAllocator::new())
    }

    pub fn with_allocator(allocator: IdentityAllocator) -> Self {
        Self {
            sessions: HashMap::new(),
            allocator,
        }
    }

    /// Lowercased names of all active sessions, the taken-set for
    /// allocation and conflict checks.
    fn taken_names(&self) -> HashSet<String> {
        self.sessions
            .values()
            .map(|session| session.name.to_lowercase())
            .collect()
    }

    /// Admits a new connection: allocates a unique display name, stores
    /// the session, and returns it.
    ///
    /// Allocation and insertion happen as one step, so an admitted
    /// connection is always fully initialized and uniquely named.
    pub fn admit(
        &mut self,
        conn_id: u32,
        sender: UnboundedSender<ServerPacket>,
    ) -> Result<&Session, RegistryError> {
        if self.sessions.contains_key(&conn_id) {
            return Err(RegistryError::DuplicateConnection(conn_id));
        }

        let name = self.allocator.allocate(&self.taken_names())?;
        info!("connection {} admitted as <{}>", conn_id, name);

        self.sessions
            .insert(conn_id, Session::new(conn_id, name, sender));
        Ok(&self.sessions[&conn_id])
    }

    /// Returns the session for a connection, or `UnknownConnection`.
    pub fn lookup(&self, conn_id: u32) -> Result<&Session, RegistryError> {
        self.sessions
            .get(&conn_id)
            .ok_or(RegistryError::UnknownConnection(conn_id))
    }

    /// Changes a session's display name if no *other* session holds the
    /// proposed name (case-insensitive).
    ///
    /// On conflict the registry is left untouched. A session may freely
    /// re-case its own name.
    pub fn rename(&mut self, conn_id: u32, proposed: &str) -> Result<UserInfo, RegistryError> {
        if !self.sessions.contains_key(&conn_id) {
            return Err(RegistryError::UnknownConnection(conn_id));
        }

        let proposed_lower = proposed.to_lowercase();
        let conflict = self
            .sessions
            .iter()
            .any(|(id, session)| *id != conn_id && session.name.to_lowercase() == proposed_lower);
        if conflict {
            return Err(RegistryError::NameConflict(proposed.to_string()));
        }

        // Uniqueness was just checked and nothing can interleave before
        // this write; events are handled one at a time.
        let session = self
            .sessions
            .get_mut(&conn_id)
            .ok_or(RegistryError::UnknownConnection(conn_id))?;
        info!("<{}> renamed to <{}>", session.name, proposed);
        session.name = proposed.to_string();
        Ok(session.info())
    }

    /// Deletes and returns the session for a disconnected connection.
    pub fn remove(&mut self, conn_id: u32) -> Result<Session, RegistryError> {
        let session = self
            .sessions
            .remove(&conn_id)
            .ok_or(RegistryError::UnknownConnection(conn_id))?;
        info!("connection {} (<{}>) removed", conn_id, session.name);
        Ok(session)
    }

    /// Read-only copy of current membership, keyed by connection id.
    ///
    /// Used to populate the initial STATE packet for a new joiner.
    pub fn snapshot(&self) -> HashMap<u32, UserInfo> {
        self.sessions
            .iter()
            .map(|(id, session)| (*id, session.info()))
            .collect()
    }

    /// Iterates all active sessions, for broadcast fan-out.
    pub fn iter(&self) -> impl Iterator<Item = &Session> {
        self.sessions.values()
    }

    /// Returns the number of active sessions
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Returns true if no one is connected
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
