//! Client-side connection handling and the interactive chat loop

use log::{info, warn};
use shared::{decode_body, encode_frame, frame_len, ClientPacket, ServerPacket};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

/// What a line of terminal input means
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Send this packet to the broker
    Send(ClientPacket),
    /// Leave the chat
    Quit,
    /// Nothing to do (blank line, incomplete command)
    Ignore,
}

/// Parses one line of terminal input.
///
/// `/name <new-name>` renames, `/img <url>` shares an image, `/quit`
/// exits; anything else is a chat message.
pub fn parse_command(line: &str) -> Command {
    let line = line.trim();
    if line.is_empty() {
        return Command::Ignore;
    }

    if let Some(rest) = line.strip_prefix("/name ") {
        let new_name = rest.trim();
        if new_name.is_empty() {
            return Command::Ignore;
        }
        return Command::Send(ClientPacket::Name {
            new_name: new_name.to_string(),
        });
    }

    if let Some(rest) = line.strip_prefix("/img ") {
        let url = rest.trim();
        if url.is_empty() {
            return Command::Ignore;
        }
        return Command::Send(ClientPacket::Img {
            url: url.to_string(),
        });
    }

    if line == "/quit" {
        return Command::Quit;
    }

    Command::Send(ClientPacket::Mesg {
        message: line.to_string(),
    })
}

/// Renders a broker packet as one terminal line.
///
/// `own_id` is learned from the initial STATE packet and used to label
/// our own rename confirmations.
pub fn render(packet: &ServerPacket, own_id: &mut Option<u32>) -> String {
    match packet {
        ServerPacket::State { users, user } => {
            *own_id = Some(*user);
            let own_name = users
                .get(user)
                .map(|info| info.name.as_str())
                .unwrap_or("?");
            let mut names: Vec<&str> = users.values().map(|info| info.name.as_str()).collect();
            names.sort_unstable();
            format!(
                "* connected as <{}>; online: {}",
                own_name,
                names.join(", ")
            )
        }
        ServerPacket::Joined { user } => format!("* <{}> joined", user.name),
        ServerPacket::Left { user } => format!("* <{}> left", user.name),
        ServerPacket::Mesg { from, message } => format!("<{}> {}", from, message),
        ServerPacket::Name { user } => {
            if Some(user.id) == *own_id {
                format!("* you are now <{}>", user.name)
            } else {
                format!("* user {} is now <{}>", user.id, user.name)
            }
        }
        ServerPacket::Error { message } => format!("! error: {}", message),
    }
}

/// Reads one length-prefixed packet, or None on a clean EOF.
pub async fn read_packet<R: AsyncRead + Unpin>(
    reader: &mut R,
) -> Result<Option<ServerPacket>, Box<dyn std::error::Error + Send + Sync>> {
    let mut header = [0u8; 4];
    if let Err(err) = reader.read_exact(&mut header).await {
        if err.kind() == std::io::ErrorKind::UnexpectedEof {
            return Ok(None);
        }
        return Err(err.into());
    }

    let len = frame_len(header)?;
    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    Ok(Some(decode_body(&body)?))
}

/// A connected chat client
pub struct Client {
    stream: TcpStream,
}

impl Client {
    pub async fn new(server_addr: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let stream = TcpStream::connect(server_addr).await?;
        info!("Connected to {}", server_addr);
        Ok(Client { stream })
    }

    /// Runs until `/quit`, stdin EOF, or the broker closes the
    /// connection.
    ///
    /// Incoming packets are printed by a spawned task so a half-typed
    /// line never delays (or tears) a frame read.
    pub async fn run(self) -> Result<(), Box<dyn std::error::Error>> {
        let (mut read_half, mut write_half) = self.stream.into_split();

        let incoming = tokio::spawn(async move {
            let mut own_id = None;
            loop {
                match read_packet(&mut read_half).await {
                    Ok(Some(packet)) => println!("{}", render(&packet, &mut own_id)),
                    Ok(None) => {
                        info!("Server closed the connection");
                        break;
                    }
                    Err(err) => {
                        warn!("Connection lost: {}", err);
                        break;
                    }
                }
            }
        });

        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Some(line) = lines.next_line().await? {
            match parse_command(&line) {
                Command::Send(packet) => {
                    let frame = encode_frame(&packet)?;
                    write_half.write_all(&frame).await?;
                }
                Command::Quit => break,
                Command::Ignore => {}
            }
        }

        write_half.shutdown().await?;
        incoming.abort();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::UserInfo;
    use std::collections::HashMap;

    #[test]
    fn test_parse_plain_message() {
        assert_eq!(
            parse_command("hello there"),
            Command::Send(ClientPacket::Mesg {
                message: "hello there".to_string()
            })
        );
    }

    #[test]
    fn test_parse_name_command() {
        assert_eq!(
            parse_command("/name red-fox"),
            Command::Send(ClientPacket::Name {
                new_name: "red-fox".to_string()
            })
        );
    }

    #[test]
    fn test_parse_img_command() {
        assert_eq!(
            parse_command("/img https://example.com/cat.png"),
            Command::Send(ClientPacket::Img {
                url: "https://example.com/cat.png".to_string()
            })
        );
    }

    #[test]
    fn test_parse_quit_and_blank() {
        assert_eq!(parse_command("/quit"), Command::Quit);
        assert_eq!(parse_command("   "), Command::Ignore);
        assert_eq!(parse_command("/name  "), Command::Ignore);
    }

    #[test]
    fn test_render_state_learns_own_id() {
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

        let mut own_id = None;
        let line = render(&packet, &mut own_id);

        assert_eq!(own_id, Some(2));
        assert_eq!(line, "* connected as <blue-owl>; online: blue-owl, red-fox");
    }

    #[test]
    fn test_render_rename_distinguishes_self() {
        let mut own_id = Some(2);
        let own = ServerPacket::Name {
            user: UserInfo {
                id: 2,
                name: "night-owl".to_string(),
            },
        };
        let other = ServerPacket::Name {
            user: UserInfo {
                id: 1,
                name: "grey-wolf".to_string(),
            },
        };

        assert_eq!(render(&own, &mut own_id), "* you are now <night-owl>");
        assert_eq!(render(&other, &mut own_id), "* user 1 is now <grey-wolf>");
    }

    #[test]
    fn test_render_message_and_error() {
        let mut own_id = None;
        let mesg = ServerPacket::Mesg {
            from: "red-fox".to_string(),
            message: "hi".to_string(),
        };
        let error = ServerPacket::Error {
            message: shared::NON_UNIQUE_NAME.to_string(),
        };

        assert_eq!(render(&mesg, &mut own_id), "<red-fox> hi");
        assert_eq!(render(&error, &mut own_id), "! error: NON_UNIQUE_NAME");
    }
}
