//! Wire protocol shared between the chat broker and its clients.
//!
//! Packets are bincode-encoded and carried in frames with a 4-byte
//! big-endian length prefix. Connect and disconnect are transport
//! lifecycle events and never appear on the wire as packets.

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Upper bound on a single frame body, generous for chat payloads.
pub const MAX_FRAME_LEN: usize = 64 * 1024;

/// The one rename failure reason clients are shown.
pub const NON_UNIQUE_NAME: &str = "NON_UNIQUE_NAME";

/// Packets sent from a client to the broker
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub enum ClientPacket {
    /// Broadcast a chat message to everyone
    Mesg { message: String },
    /// Request a display-name change
    Name { new_name: String },
    /// Share an image by URL with everyone
    Img { url: String },
}

/// Packets sent from the broker to one or more clients
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub enum ServerPacket {
    /// Initial state for a newly admitted connection: full membership
    /// plus the connection's own id
    State {
        users: HashMap<u32, UserInfo>,
        user: u32,
    },
    /// Someone else joined
    Joined { user: UserInfo },
    /// A chat message, relayed to everyone including the sender
    Mesg { from: String, message: String },
    /// Someone's rename succeeded
    Name { user: UserInfo },
    /// A request from this client failed (only `NON_UNIQUE_NAME` today)
    Error { message: String },
    /// Someone else left
    Left { user: UserInfo },
}

/// A session's public data as shown to other participants
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct UserInfo {
    pub id: u32,
    pub name: String,
}

/// Renders an image URL as a chat message body.
///
/// The broker never fetches or validates the URL; it only embeds it in
/// this fixed template so clients render it inline.
pub fn image_message(url: &str) -> String {
    format!(r#"<img src="{}" class="message-image">"#, url)
}

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("frame body of {0} bytes exceeds limit of {MAX_FRAME_LEN}")]
    TooLarge(usize),
    #[error("packet codec error: {0}")]
    Codec(#[from] bincode::Error),
}

/// Encodes a packet as a length-prefixed frame ready to write.
pub fn encode_frame<T: Serialize>(packet: &T) -> Result<Vec<u8>, FrameError> {
    let body = bincode::serialize(packet)?;
    if body.len() > MAX_FRAME_LEN {
        return Err(FrameError::TooLarge(body.len()));
    }
    let mut frame = Vec::with_capacity(4 + body.len());
    frame.extend_from_slice(&(body.len() as u32).to_be_bytes());
    frame.extend_from_slice(&body);
    Ok(frame)
}

/// Parses a frame header into a body length, rejecting oversized frames.
pub fn frame_len(header: [u8; 4]) -> Result<usize, FrameError> {
    let len = u32::from_be_bytes(header) as usize;
    if len > MAX_FRAME_LEN {
        return Err(FrameError::TooLarge(len));
    }
    Ok(len)
}

/// Decodes a frame body read off the wire.
pub fn decode_body<T: DeserializeOwned>(body: &[u8]) -> Result<T, FrameError> {
    Ok(bincode::deserialize(body)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_packet_roundtrip() {
        let packet = ClientPacket::Name {
            new_name: "blue-owl".to_string(),
        };
        let frame = encode_frame(&packet).unwrap();

        let mut header = [0u8; 4];
        header.copy_from_slice(&frame[..4]);
        let len = frame_len(header).unwrap();
        assert_eq!(len, frame.len() - 4);

        let decoded: ClientPacket = decode_body(&frame[4..]).unwrap();
        match decoded {
            ClientPacket::Name { new_name } => assert_eq!(new_name, "blue-owl"),
            _ => panic!("wrong packet type after roundtrip"),
        }
    }

    #[test]
    fn test_state_packet_roundtrip() {
        let mut users = HashMap::new();
        users.insert(
            1,
            UserInfo {
                id: 1,
                name: "red-fox".to_string(),
            },
        );
        users.insert(
            2,
            UserInfo {
                id: 2,
                name: "blue-owl".to_string(),
            },
        );

        let packet = ServerPacket::State { users, user: 2 };
        let frame = encode_frame(&packet).unwrap();
        let decoded: ServerPacket = decode_body(&frame[4..]).unwrap();

        match decoded {
            ServerPacket::State { users, user } => {
                assert_eq!(user, 2);
                assert_eq!(users.len(), 2);
                assert_eq!(users.get(&1).unwrap().name, "red-fox");
            }
            _ => panic!("wrong packet type after roundtrip"),
        }
    }

    #[test]
    fn test_oversized_frame_rejected() {
        let packet = ClientPacket::Mesg {
            message: "x".repeat(MAX_FRAME_LEN + 1),
        };
        assert!(matches!(
            encode_frame(&packet),
            Err(FrameError::TooLarge(_))
        ));
    }

    #[test]
    fn test_oversized_header_rejected() {
        let header = (MAX_FRAME_LEN as u32 + 1).to_be_bytes();
        assert!(matches!(frame_len(header), Err(FrameError::TooLarge(_))));
    }

    #[test]
    fn test_image_message_template() {
        let body = image_message("https://example.com/cat.png");
        assert_eq!(
            body,
            r#"<img src="https://example.com/cat.png" class="message-image">"#
        );
        assert!(body.contains(r#"class="message-image""#));
    }
}
