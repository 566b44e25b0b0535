//! In-process rendezvous service for integration tests: assigns ids, tracks
//! host registrations and routes negotiation payloads between clients, the
//! way the production service does.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;

use shoal::signaling::messages::{ClientMessage, HostEntry, ServerMessage};

/// Honors `RUST_LOG`; repeated calls are fine.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[derive(Default)]
struct ServerState {
    /// Connected clients by assigned id.
    peers: HashMap<String, mpsc::UnboundedSender<ServerMessage>>,
    /// Registered hosts: name -> id.
    hosts: HashMap<String, String>,
}

pub struct TestServer {
    addr: std::net::SocketAddr,
    accept_task: JoinHandle<()>,
    state: Arc<Mutex<ServerState>>,
}

impl TestServer {
    pub async fn start() -> Self {
        init_tracing();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(Mutex::new(ServerState::default()));
        let next_id = Arc::new(AtomicUsize::new(1));

        let state_for_accept = state.clone();
        let accept_task = tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    return;
                };
                let id = format!("peer-{}", next_id.fetch_add(1, Ordering::SeqCst));
                tokio::spawn(serve_client(stream, id, state_for_accept.clone()));
            }
        });

        Self {
            addr,
            accept_task,
            state,
        }
    }

    pub fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    pub fn host_id(&self, name: &str) -> Option<String> {
        self.state.lock().hosts.get(name).cloned()
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

async fn serve_client(stream: TcpStream, id: String, state: Arc<Mutex<ServerState>>) {
    let Ok(ws_stream) = accept_async(stream).await else {
        return;
    };
    let (mut ws_write, mut ws_read) = ws_stream.split();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<ServerMessage>();
    state.lock().peers.insert(id.clone(), out_tx.clone());
    let _ = out_tx.send(ServerMessage::Welcome { id: id.clone() });

    let writer = tokio::spawn(async move {
        while let Some(message) = out_rx.recv().await {
            let text = serde_json::to_string(&message).unwrap();
            if ws_write.send(Message::Text(text)).await.is_err() {
                return;
            }
        }
    });

    while let Some(Ok(frame)) = ws_read.next().await {
        let text = match frame {
            Message::Text(text) => text,
            Message::Close(_) => break,
            _ => continue,
        };
        let Ok(message) = serde_json::from_str::<ClientMessage>(&text) else {
            continue;
        };
        match message {
            ClientMessage::CreateHost { name } => {
                let response = {
                    let mut state = state.lock();
                    if state.hosts.contains_key(&name) {
                        ServerMessage::CreateHostResult {
                            status: 409,
                            message: name,
                        }
                    } else {
                        state.hosts.insert(name, id.clone());
                        ServerMessage::CreateHostResult {
                            status: 200,
                            message: String::new(),
                        }
                    }
                };
                let _ = out_tx.send(response);
            }
            ClientMessage::ListHosts => {
                let hosts = state
                    .lock()
                    .hosts
                    .iter()
                    .map(|(name, id)| HostEntry {
                        id: id.clone(),
                        name: name.clone(),
                    })
                    .collect();
                let _ = out_tx.send(ServerMessage::ListHostsResult { status: 200, hosts });
            }
            ClientMessage::Message { mut payload } => {
                payload.from = Some(id.clone());
                let target = payload
                    .to
                    .as_ref()
                    .and_then(|to| state.lock().peers.get(to).cloned());
                if let Some(target) = target {
                    let _ = target.send(ServerMessage::Message { payload });
                }
            }
        }
    }

    // Departed: forget the peer, drop its host entries, tell everyone else.
    let remaining: Vec<mpsc::UnboundedSender<ServerMessage>> = {
        let mut state = state.lock();
        state.peers.remove(&id);
        state.hosts.retain(|_, host_id| host_id != &id);
        state.peers.values().cloned().collect()
    };
    for peer in remaining {
        let _ = peer.send(ServerMessage::UserDisconnected { id: id.clone() });
    }
    writer.abort();
}
