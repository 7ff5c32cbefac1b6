//! TCP transport and the broker event loop
//!
//! The transport owns no business logic. Each accepted connection gets a
//! reader task (frames in, [`SessionEvent`]s out) and a writer task
//! (outbound queue to socket). A single broker loop consumes all events
//! from one channel and feeds the router, so exactly one event is
//! handled at a time and per-connection ordering is preserved.
//!
//! Contract with the core: every `Connected` event is followed by
//! exactly one `Disconnected` event, emitted by the reader task on any
//! exit path.

use crate::registry::SessionRegistry;
use crate::router::{BroadcastRouter, SessionEvent};
use log::{debug, error, info};
use shared::{decode_body, encode_frame, frame_len, ClientPacket, ServerPacket};
use std::net::SocketAddr;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

type TransportError = Box<dyn std::error::Error + Send + Sync>;

/// The broker server: listener, router, and the event channel feeding it
pub struct Server {
    listener: TcpListener,
    router: BroadcastRouter,
    event_tx: UnboundedSender<SessionEvent>,
    event_rx: UnboundedReceiver<SessionEvent>,
    /// Connection ids are a transport concern; the core treats them as
    /// opaque
    next_conn_id: u32,
}

impl Server {
    pub async fn new(addr: &str) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        info!("Broker listening on {}", listener.local_addr()?);

        let (event_tx, event_rx) = mpsc::unbounded_channel();

        Ok(Server {
            listener,
            router: BroadcastRouter::new(SessionRegistry::new()),
            event_tx,
            event_rx,
            next_conn_id: 1,
        })
    }

    /// The bound address, for callers that asked for port 0.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accepts connections and routes events until the process stops.
    pub async fn run(&mut self) -> std::io::Result<()> {
        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, addr)) => {
                            let conn_id = self.next_conn_id;
                            self.next_conn_id += 1;
                            debug!("connection {} accepted from {}", conn_id, addr);
                            spawn_connection(conn_id, stream, self.event_tx.clone());
                        }
                        Err(err) => {
                            error!("accept failed: {}", err);
                        }
                    }
                },

                event = self.event_rx.recv() => {
                    match event {
                        Some(event) => self.router.handle_event(event),
                        // Unreachable while we hold event_tx, but not
                        // worth a panic
                        None => break,
                    }
                },
            }
        }

        Ok(())
    }
}

/// Wires up the reader and writer tasks for one accepted connection.
fn spawn_connection(conn_id: u32, stream: TcpStream, events: UnboundedSender<SessionEvent>) {
    let (mut read_half, write_half) = stream.into_split();
    let (sender, outbound) = mpsc::unbounded_channel::<ServerPacket>();

    if events
        .send(SessionEvent::Connected { conn_id, sender })
        .is_err()
    {
        // Broker loop is gone; the connection closes when the halves drop
        return;
    }

    tokio::spawn(async move {
        write_loop(conn_id, write_half, outbound).await;
    });

    tokio::spawn(async move {
        if let Err(err) = read_loop(conn_id, &mut read_half, &events).await {
            debug!("connection {} read loop ended: {}", conn_id, err);
        }
        // The one guaranteed disconnect, on every exit path
        let _ = events.send(SessionEvent::Disconnected { conn_id });
    });
}

/// Reads frames and forwards them as inbound events until EOF or error.
///
/// A clean EOF returns Ok; frame and I/O errors propagate so the caller
/// can log them. Either way the connection is over.
async fn read_loop<R: AsyncRead + Unpin>(
    conn_id: u32,
    reader: &mut R,
    events: &UnboundedSender<SessionEvent>,
) -> Result<(), TransportError> {
    loop {
        let mut header = [0u8; 4];
        if let Err(err) = reader.read_exact(&mut header).await {
            if err.kind() == std::io::ErrorKind::UnexpectedEof {
                return Ok(());
            }
            return Err(err.into());
        }

        let len = frame_len(header)?;
        let mut body = vec![0u8; len];
        reader.read_exact(&mut body).await?;

        let packet: ClientPacket = decode_body(&body)?;
        if events
            .send(SessionEvent::Inbound { conn_id, packet })
            .is_err()
        {
            return Ok(());
        }
    }
}

/// Drains the outbound queue onto the socket.
///
/// Ends when the registry drops the session's sender (disconnect or
/// rejected admission), then half-closes so the peer sees EOF.
async fn write_loop<W: AsyncWrite + Unpin>(
    conn_id: u32,
    mut writer: W,
    mut outbound: UnboundedReceiver<ServerPacket>,
) {
    while let Some(packet) = outbound.recv().await {
        let frame = match encode_frame(&packet) {
            Ok(frame) => frame,
            Err(err) => {
                error!("connection {}: dropping unencodable packet: {}", conn_id, err);
                continue;
            }
        };

        if let Err(err) = writer.write_all(&frame).await {
            debug!("connection {} write failed: {}", conn_id, err);
            break;
        }
    }

    let _ = writer.shutdown().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::UserInfo;

    #[tokio::test]
    async fn test_read_loop_forwards_packets_then_ends_on_eof() {
        let (mut local, mut remote) = tokio::io::duplex(1024);
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();

        let frame = encode_frame(&ClientPacket::Mesg {
            message: "hi".to_string(),
        })
        .unwrap();
        remote.write_all(&frame).await.unwrap();
        remote.shutdown().await.unwrap();
        drop(remote);

        read_loop(7, &mut local, &events_tx).await.unwrap();

        match events_rx.try_recv().unwrap() {
            SessionEvent::Inbound { conn_id, packet } => {
                assert_eq!(conn_id, 7);
                match packet {
                    ClientPacket::Mesg { message } => assert_eq!(message, "hi"),
                    other => panic!("unexpected packet {:?}", other),
                }
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_read_loop_rejects_oversized_frame() {
        let (mut local, mut remote) = tokio::io::duplex(64);
        let (events_tx, _events_rx) = mpsc::unbounded_channel();

        let bogus_header = (shared::MAX_FRAME_LEN as u32 + 1).to_be_bytes();
        remote.write_all(&bogus_header).await.unwrap();

        let result = read_loop(7, &mut local, &events_tx).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_write_loop_frames_packets_and_closes_on_drop() {
        let (local, mut remote) = tokio::io::duplex(1024);
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();

        let packet = ServerPacket::Joined {
            user: UserInfo {
                id: 3,
                name: "red-fox".to_string(),
            },
        };
        outbound_tx.send(packet.clone()).unwrap();
        drop(outbound_tx);

        write_loop(3, local, outbound_rx).await;

        let mut header = [0u8; 4];
        remote.read_exact(&mut header).await.unwrap();
        let len = frame_len(header).unwrap();
        let mut body = vec![0u8; len];
        remote.read_exact(&mut body).await.unwrap();

        let decoded: ServerPacket = decode_body(&body).unwrap();
        assert_eq!(decoded, packet);

        // Sender dropped, so the stream is half-closed behind the frame
        assert_eq!(remote.read(&mut [0u8; 8]).await.unwrap(), 0);
    }
}
