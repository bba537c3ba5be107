//! Newline-delimited JSON transport to the local bridge
//!
//! Outbound: one serialized [`BridgeCommand`] per line.
//! Inbound: one serialized [`BridgeEvent`] per line, pumped into an mpsc
//! channel by a reader task. Undecodable lines are logged and skipped; a
//! socket error is delivered as `Error` followed by `Close`.

use super::{BridgeCommand, BridgeEvent, Transport};
use async_trait::async_trait;
use pcbmill_core::{ConnectionError, Error, Result};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

/// Capacity of the inbound event channel
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// TCP connection to the bridge
pub struct TcpBridgeTransport {
    address: String,
    writer: Mutex<BufWriter<OwnedWriteHalf>>,
    reader_task: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl TcpBridgeTransport {
    /// Connect to `address` and start the inbound pump
    ///
    /// Returns the transport and the receiver for inbound events.
    pub async fn connect(
        address: &str,
        timeout: Duration,
    ) -> Result<(Self, mpsc::Receiver<BridgeEvent>)> {
        let stream = match tokio::time::timeout(timeout, TcpStream::connect(address)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                return Err(ConnectionError::FailedToOpen {
                    address: address.to_string(),
                    reason: e.to_string(),
                }
                .into())
            }
            Err(_) => {
                return Err(ConnectionError::FailedToOpen {
                    address: address.to_string(),
                    reason: format!("no answer within {}ms", timeout.as_millis()),
                }
                .into())
            }
        };
        stream.set_nodelay(true)?;

        let (read_half, write_half) = stream.into_split();
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let reader_task = tokio::spawn(read_loop(read_half, tx));

        debug!("Bridge connection to {} established", address);

        Ok((
            Self {
                address: address.to_string(),
                writer: Mutex::new(BufWriter::new(write_half)),
                reader_task: parking_lot::Mutex::new(Some(reader_task)),
            },
            rx,
        ))
    }
}

async fn read_loop(read_half: OwnedReadHalf, tx: mpsc::Sender<BridgeEvent>) {
    let mut lines = BufReader::new(read_half).lines();

    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                match decode_event(line) {
                    Ok(event) => {
                        if tx.send(event).await.is_err() {
                            // Session dropped its receiver
                            break;
                        }
                    }
                    Err(e) => warn!("Skipping undecodable bridge line: {}", e),
                }
            }
            Ok(None) => {
                debug!("Bridge closed the connection");
                let _ = tx.send(BridgeEvent::Close).await;
                break;
            }
            Err(e) => {
                error!("Bridge socket error: {}", e);
                let _ = tx
                    .send(BridgeEvent::Error {
                        message: e.to_string(),
                    })
                    .await;
                let _ = tx.send(BridgeEvent::Close).await;
                break;
            }
        }
    }
}

/// Decode one inbound line
pub fn decode_event(line: &str) -> Result<BridgeEvent> {
    serde_json::from_str(line).map_err(|e| {
        Error::from(ConnectionError::Protocol {
            reason: format!("{}: {}", e, line),
        })
    })
}

/// Encode one outbound command, newline terminated
pub fn encode_command(command: &BridgeCommand) -> Result<String> {
    let mut json = serde_json::to_string(command)?;
    json.push('\n');
    Ok(json)
}

#[async_trait]
impl Transport for TcpBridgeTransport {
    fn describe(&self) -> String {
        format!("tcp://{}", self.address)
    }

    async fn send(&self, command: BridgeCommand) -> Result<()> {
        let payload = encode_command(&command)?;
        let mut writer = self.writer.lock().await;
        writer.write_all(payload.as_bytes()).await.map_err(|e| {
            Error::from(ConnectionError::ConnectionLost {
                reason: e.to_string(),
            })
        })?;
        // Commands are latency sensitive; never leave them sitting in the buffer
        writer.flush().await.map_err(|e| {
            Error::from(ConnectionError::ConnectionLost {
                reason: e.to_string(),
            })
        })
    }

    async fn drain(&self) -> Result<()> {
        // Taking the lock waits out any write in progress
        let mut writer = self.writer.lock().await;
        writer.flush().await.map_err(|e| {
            Error::from(ConnectionError::ConnectionLost {
                reason: e.to_string(),
            })
        })
    }

    async fn close(&self) -> Result<()> {
        {
            let mut writer = self.writer.lock().await;
            let _ = writer.flush().await;
            let _ = writer.shutdown().await;
        }
        if let Some(handle) = self.reader_task.lock().take() {
            handle.abort();
        }
        Ok(())
    }
}

impl Drop for TcpBridgeTransport {
    fn drop(&mut self) {
        if let Some(handle) = self.reader_task.lock().take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pcbmill_core::WorkflowState;
    use tokio::net::TcpListener;

    #[test]
    fn test_encode_command_is_newline_terminated() {
        let line = encode_command(&BridgeCommand::Homing).unwrap();
        assert_eq!(line, "{\"cmd\":\"homing\"}\n");
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(decode_event("not json").is_err());
    }

    #[tokio::test]
    async fn test_round_trip_over_socket() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();

        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let (read_half, mut write_half) = socket.into_split();
            write_half
                .write_all(b"{\"event\":\"workflow_state\",\"state\":\"running\"}\n")
                .await
                .unwrap();
            let mut lines = BufReader::new(read_half).lines();
            lines.next_line().await.unwrap()
        });

        let (transport, mut events) =
            TcpBridgeTransport::connect(&address, Duration::from_secs(2))
                .await
                .unwrap();

        let event = events.recv().await.unwrap();
        assert_eq!(
            event,
            BridgeEvent::WorkflowState {
                state: WorkflowState::Running
            }
        );

        transport.send(BridgeCommand::Unlock).await.unwrap();
        transport.drain().await.unwrap();

        let received = server.await.unwrap();
        assert_eq!(received.as_deref(), Some("{\"cmd\":\"unlock\"}"));

        transport.close().await.unwrap();
    }
}
