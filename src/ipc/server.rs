//! Unix domain socket server for IPC
//!
//! Provides request-response control of the running assistant and pushes
//! every assistant event to subscribed clients.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::UnixListener;
use tokio::sync::{broadcast, mpsc, RwLock};
use tracing::{debug, error, info, warn};

use crate::dialogue::DialogueInput;
use crate::events::AssistantEvent;
use crate::speech::SpeechHandle;

use super::protocol::{DaemonStatus, Notification, Request, Response};

const MAX_MESSAGE_LEN: usize = 1024 * 1024;

/// Where control requests are forwarded
#[derive(Clone)]
pub struct Control {
    pub speech: SpeechHandle,
    pub dialogue: mpsc::UnboundedSender<DialogueInput>,
}

/// IPC Server handling client connections
pub struct Server {
    socket_path: PathBuf,
    listener: Option<UnixListener>,
    shared: Arc<Shared>,
    shutdown_tx: broadcast::Sender<()>,
}

/// State every client handler sees
struct Shared {
    state: RwLock<ServerState>,
    control: Control,
    event_tx: broadcast::Sender<AssistantEvent>,
}

struct ServerState {
    status: DaemonStatus,
    start_time: Instant,
}

impl Shared {
    fn new(control: Control, event_tx: broadcast::Sender<AssistantEvent>) -> Self {
        Self {
            state: RwLock::new(ServerState {
                status: DaemonStatus::default(),
                start_time: Instant::now(),
            }),
            control,
            event_tx,
        }
    }
}

impl Server {
    /// Create a new IPC server
    pub fn new(socket_path: &Path, control: Control, event_tx: broadcast::Sender<AssistantEvent>) -> Result<Self> {
        if let Some(parent) = socket_path.parent() {
            std::fs::create_dir_all(parent).context("failed to create socket directory")?;
        }

        // Remove stale socket if it exists
        if socket_path.exists() {
            std::fs::remove_file(socket_path).context("failed to remove stale socket")?;
        }

        let listener = UnixListener::bind(socket_path).context("failed to bind Unix socket")?;

        // Owner-only
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(socket_path, std::fs::Permissions::from_mode(0o600))?;
        }

        let (shutdown_tx, _) = broadcast::channel(1);

        info!(?socket_path, "IPC server listening");

        Ok(Self {
            socket_path: socket_path.to_owned(),
            listener: Some(listener),
            shared: Arc::new(Shared::new(control, event_tx)),
            shutdown_tx,
        })
    }

    /// Accept connections and keep the status snapshot current
    pub async fn run(&self) -> Result<()> {
        let listener = self.listener.as_ref().context("server not initialized")?;
        let mut events = self.shared.event_tx.subscribe();

        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, _addr)) => {
                        debug!("client connected");
                        let shared = Arc::clone(&self.shared);
                        let mut shutdown_rx = self.shutdown_tx.subscribe();

                        tokio::spawn(async move {
                            tokio::select! {
                                result = handle_client(stream, shared) => {
                                    if let Err(e) = result {
                                        warn!(?e, "client handler error");
                                    }
                                }
                                _ = shutdown_rx.recv() => {
                                    debug!("client handler shutting down");
                                }
                            }
                        });
                    }
                    Err(e) => {
                        error!(?e, "accept error");
                    }
                },

                event = events.recv() => match event {
                    Ok(event) => {
                        debug!(%event, "assistant event");
                        self.shared.state.write().await.status.apply_event(&event);
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, "status tracker lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        return Ok(());
                    }
                },
            }
        }
    }

    /// Gracefully shutdown the server
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());

        if self.socket_path.exists() {
            if let Err(e) = std::fs::remove_file(&self.socket_path) {
                warn!(?e, "failed to remove socket file");
            }
        }

        info!("IPC server shutdown complete");
    }
}

/// Serve one client connection until it disconnects
async fn handle_client<S>(stream: S, shared: Arc<Shared>) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (mut reader, mut writer) = tokio::io::split(stream);

    // Reading on its own task so pushed events never cut a frame in half
    let (frame_tx, mut frame_rx) = mpsc::channel::<Vec<u8>>(8);
    let read_task = tokio::spawn(async move {
        loop {
            match read_frame(&mut reader).await {
                Ok(Some(frame)) => {
                    if frame_tx.send(frame).await.is_err() {
                        break;
                    }
                }
                Ok(None) => {
                    debug!("client disconnected");
                    break;
                }
                Err(e) => {
                    warn!(?e, "client read failed");
                    break;
                }
            }
        }
    });

    let mut events: Option<broadcast::Receiver<AssistantEvent>> = None;

    let result = loop {
        tokio::select! {
            frame = frame_rx.recv() => {
                let Some(frame) = frame else { break Ok(()) };

                let response = match serde_json::from_slice::<Request>(&frame) {
                    Ok(request) => {
                        debug!(?request, "received request");
                        if request == Request::Subscribe && events.is_none() {
                            events = Some(shared.event_tx.subscribe());
                            debug!("client subscribed to events");
                        }
                        process_request(request, &shared).await
                    }
                    Err(e) => Response::error("bad_request", e.to_string()),
                };

                if let Err(e) = send_message(&mut writer, &response).await {
                    break Err(e);
                }
            }

            event = next_event(&mut events) => match event {
                Ok(event) => {
                    if let Err(e) = send_message(&mut writer, &Notification::Event { event }).await {
                        break Err(e);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(skipped = n, "subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    events = None;
                }
            },
        }
    };

    read_task.abort();
    result
}

async fn next_event(
    events: &mut Option<broadcast::Receiver<AssistantEvent>>,
) -> Result<AssistantEvent, broadcast::error::RecvError> {
    match events {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

/// Read one length-prefixed frame; `None` on a clean disconnect
async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Option<Vec<u8>>> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_le_bytes(len_buf) as usize;
    if len > MAX_MESSAGE_LEN {
        anyhow::bail!("message too large ({} bytes)", len);
    }

    let mut msg_buf = vec![0u8; len];
    reader.read_exact(&mut msg_buf).await?;
    Ok(Some(msg_buf))
}

/// Encode a message with its 4-byte little-endian length prefix
fn frame<T: serde::Serialize>(msg: &T) -> Result<Vec<u8>> {
    let body = serde_json::to_vec(msg)?;
    let mut out = Vec::with_capacity(body.len() + 4);
    out.extend_from_slice(&(body.len() as u32).to_le_bytes());
    out.extend_from_slice(&body);
    Ok(out)
}

async fn send_message<W, T>(writer: &mut W, msg: &T) -> Result<()>
where
    W: AsyncWrite + Unpin,
    T: serde::Serialize,
{
    writer.write_all(&frame(msg)?).await?;
    writer.flush().await?;
    Ok(())
}

async fn process_request(request: Request, shared: &Shared) -> Response {
    let control = &shared.control;
    match request {
        Request::Ping => Response::Pong,

        Request::GetStatus => {
            let mut state = shared.state.write().await;
            state.status.uptime_secs = state.start_time.elapsed().as_secs();
            Response::Status(state.status.clone())
        }

        Request::Subscribe => Response::Subscribed,

        Request::ForceUnlock => {
            info!("force unlock requested via IPC");
            accepted(control.speech.force_unlock(), "speech")
        }

        Request::StartCapture => accepted(control.speech.start_capture(), "speech"),

        Request::StopCapture => {
            info!("capture stop requested via IPC");
            accepted(control.speech.stop_capture(), "speech")
        }

        Request::ResetDialogue => {
            info!("dialogue reset requested via IPC");
            accepted(control.dialogue.send(DialogueInput::Reset).is_ok(), "dialogue")
        }

        Request::InjectTranscript { text } => {
            if text.trim().is_empty() {
                return Response::error("bad_request", "transcript is empty");
            }
            accepted(control.dialogue.send(DialogueInput::Transcript(text)).is_ok(), "dialogue")
        }

        Request::ViewChanged { platform } => {
            debug!(?platform, "view change reported via IPC");
            accepted(control.dialogue.send(DialogueInput::ViewChanged(platform)).is_ok(), "dialogue")
        }

        Request::PauseCapture { reason } => accepted(control.speech.pause_capture(reason), "speech"),

        Request::ResumeCapture { reason } => accepted(control.speech.resume_capture(reason), "speech"),
    }
}

fn accepted(delivered: bool, component: &str) -> Response {
    if delivered {
        Response::Accepted
    } else {
        Response::error("unavailable", format!("{} service is not running", component))
    }
}
