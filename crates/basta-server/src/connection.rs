use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use uuid::Uuid;

use basta_common::protocol::{
    self, ClientMessage, ServerMessage, framed_transport, serialize_message,
};

use crate::handler;
use crate::registry::ConnectionHandle;
use crate::server::SharedState;

pub async fn handle_connection(stream: TcpStream, state: SharedState) -> anyhow::Result<()> {
    let mut transport = framed_transport(stream);

    // Handshake: the first frame must be Hello, carrying the identity
    // established by the external login flow.
    let hello: ClientMessage = match protocol::recv_message(&mut transport).await? {
        Some(msg) => msg,
        None => return Ok(()),
    };

    let (user_id, username) = match hello {
        ClientMessage::Hello {
            user_id,
            username,
            version,
        } => {
            tracing::info!(
                "User '{}' connected (client version: {})",
                username,
                version
            );
            protocol::send_message(
                &mut transport,
                &ServerMessage::Welcome {
                    server_version: env!("CARGO_PKG_VERSION").to_string(),
                },
            )
            .await?;
            (user_id, username)
        }
        _ => {
            protocol::send_message(
                &mut transport,
                &ServerMessage::HandshakeError {
                    reason: "Expected Hello message".into(),
                },
            )
            .await?;
            return Ok(());
        }
    };

    // Outbound channel: the handler and room timers push messages here,
    // the writer task drains them onto the wire.
    let (tx, mut rx) = mpsc::channel::<ServerMessage>(64);

    let connection_id = Uuid::new_v4();
    state
        .registry
        .register_connection(ConnectionHandle {
            connection_id,
            user_id,
            username: username.clone(),
            tx,
            room_code: None,
        })
        .await;

    let (mut sink, mut stream) = transport.split();

    let write_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            match serialize_message(&msg) {
                Ok(bytes) => {
                    if sink.send(bytes).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    tracing::error!("Failed to serialize message: {}", e);
                }
            }
        }
    });

    loop {
        match stream.next().await {
            Some(Ok(frame)) => match protocol::deserialize_message::<ClientMessage>(&frame) {
                Ok(msg) => {
                    if let Err(e) =
                        handler::handle_message(user_id, connection_id, &username, msg, &state)
                            .await
                    {
                        tracing::error!("Handler error for {}: {}", username, e);
                    }
                }
                Err(e) => {
                    tracing::warn!("Failed to parse message from {}: {}", username, e);
                }
            },
            Some(Err(e)) => {
                tracing::warn!("Read error from {}: {}", username, e);
                break;
            }
            None => {
                tracing::info!("User '{}' disconnected", username);
                break;
            }
        }
    }

    handler::handle_disconnect(user_id, connection_id, &state).await;
    write_task.abort();
    Ok(())
}
