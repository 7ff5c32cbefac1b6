//! Broadcast router: the protocol state machine
//!
//! Translates transport events into registry mutations and outbound
//! packets. Every event is handled to completion before the next one,
//! so registry operations never interleave and fan-out is complete by
//! the time a handler returns.
//!
//! No error escapes a handler. A rename conflict is answered to the
//! proposer as `ERROR/NON_UNIQUE_NAME`; everything else (unknown
//! connections racing a disconnect, duplicate admissions, allocator
//! exhaustion) is logged and the event dropped.

use crate::registry::{RegistryError, SessionRegistry};
use log::{debug, error, info, warn};
use shared::{image_message, ClientPacket, ServerPacket, NON_UNIQUE_NAME};
use tokio::sync::mpsc::UnboundedSender;

/// Events delivered by the transport
///
/// One `Connected` and exactly one `Disconnected` per connection, with
/// any number of `Inbound` packets between them, in arrival order.
#[derive(Debug)]
pub enum SessionEvent {
    Connected {
        conn_id: u32,
        sender: UnboundedSender<ServerPacket>,
    },
    Inbound {
        conn_id: u32,
        packet: ClientPacket,
    },
    Disconnected {
        conn_id: u32,
    },
}

/// Owns the session registry and applies the broadcast protocol to each
/// incoming event
pub struct BroadcastRouter {
    registry: SessionRegistry,
}

impl BroadcastRouter {
    pub fn new(registry: SessionRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// Handles one transport event to completion.
    pub fn handle_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Connected { conn_id, sender } => self.handle_connect(conn_id, sender),
            SessionEvent::Inbound { conn_id, packet } => match packet {
                ClientPacket::Mesg { message } => self.handle_message(conn_id, message),
                ClientPacket::Name { new_name } => self.handle_rename(conn_id, new_name),
                ClientPacket::Img { url } => self.handle_image(conn_id, url),
            },
            SessionEvent::Disconnected { conn_id } => self.handle_disconnect(conn_id),
        }
    }

    /// Admission: allocate an identity, send the joiner its initial
    /// state, and announce it to everyone else.
    ///
    /// On any admission failure the offered sender is dropped, which
    /// closes the connection's writer; the failure never touches
    /// existing sessions.
    fn handle_connect(&mut self, conn_id: u32, sender: UnboundedSender<ServerPacket>) {
        let user = match self.registry.admit(conn_id, sender) {
            Ok(session) => session.info(),
            Err(err) => {
                error!("admission of connection {} rejected: {}", conn_id, err);
                return;
            }
        };

        info!(":CONNECTION - {} ({})", user.name, user.id);

        // The snapshot is taken after insertion, so the joiner sees its
        // own entry in the membership it receives.
        self.send_to(
            conn_id,
            ServerPacket::State {
                users: self.registry.snapshot(),
                user: conn_id,
            },
        );
        self.broadcast_others(conn_id, ServerPacket::Joined { user });
    }

    /// Stateless relay: one MESG to every connection, sender included.
    fn handle_message(&mut self, conn_id: u32, message: String) {
        let Some(from) = self.sender_name(conn_id, "MESG") else {
            return;
        };

        info!(":MESG - <{}> {}", from, message);
        self.broadcast_all(ServerPacket::Mesg { from, message });
    }

    /// Image sharing is a framing of the message relay: the URL is
    /// wrapped in the fixed image template and broadcast as a MESG.
    fn handle_image(&mut self, conn_id: u32, url: String) {
        let Some(from) = self.sender_name(conn_id, "IMG") else {
            return;
        };

        info!(":IMG - <{}> IMAGE @ {}", from, url);
        self.broadcast_all(ServerPacket::Mesg {
            from,
            message: image_message(&url),
        });
    }

    fn handle_rename(&mut self, conn_id: u32, new_name: String) {
        match self.registry.rename(conn_id, &new_name) {
            Ok(user) => {
                info!(":NAME - connection {} is now <{}>", conn_id, user.name);
                self.broadcast_all(ServerPacket::Name { user });
            }
            Err(RegistryError::NameConflict(_)) => {
                info!(":ERROR - NON_UNIQUE_NAME");
                self.send_to(
                    conn_id,
                    ServerPacket::Error {
                        message: NON_UNIQUE_NAME.to_string(),
                    },
                );
            }
            Err(err) => {
                warn!("dropping NAME event: {}", err);
            }
        }
    }

    fn handle_disconnect(&mut self, conn_id: u32) {
        let session = match self.registry.remove(conn_id) {
            Ok(session) => session,
            Err(err) => {
                warn!("dropping disconnect event: {}", err);
                return;
            }
        };

        let user = session.info();
        info!(":LEFT - {} ({})", user.name, user.id);

        // The departed session is already out of the registry, so this
        // reaches exactly the remaining connections.
        self.broadcast_all(ServerPacket::Left { user });
    }

    /// Resolves the sender's display name, logging and dropping the
    /// event if the connection is gone (a late packet racing its own
    /// disconnect).
    fn sender_name(&self, conn_id: u32, event: &str) -> Option<String> {
        match self.registry.lookup(conn_id) {
            Ok(session) => Some(session.name().to_string()),
            Err(err) => {
                warn!("dropping {} event: {}", event, err);
                None
            }
        }
    }

    fn send_to(&self, conn_id: u32, packet: ServerPacket) {
        match self.registry.lookup(conn_id) {
            Ok(session) => {
                if !session.send(packet) {
                    debug!("connection {} outbound channel closed", conn_id);
                }
            }
            Err(err) => warn!("dropping outbound packet: {}", err),
        }
    }

    fn broadcast_all(&self, packet: ServerPacket) {
        for session in self.registry.iter() {
            if !session.send(packet.clone()) {
                debug!("connection {} outbound channel closed", session.id);
            }
        }
    }

    fn broadcast_others(&self, exclude: u32, packet: ServerPacket) {
        for session in self.registry.iter() {
            if session.id == exclude {
                continue;
            }
            if !session.send(packet.clone()) {
                debug!("connection {} outbound channel closed", session.id);
            }
        }
    }
}
