use crate::config::SessionOptions;
use crate::error::{InfusionError, Result};
use crate::protocol::{parse_line, Command, Event, LineBuffer, StatusKind};
use crate::subscription::EventReceiver;
use crate::types::{Iid, Vid};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, oneshot, Mutex};
use tokio::time::{sleep, timeout};

const EVENT_CHANNEL_CAPACITY: usize = 1024;
const READ_CHUNK_SIZE: usize = 4096;

/// Default ramp time for `Load.Ramp`, in seconds
pub const DEFAULT_RAMP_SECONDS: u32 = 1;

/// Default fade time for `RGBLoad.DissolveHSL`, in milliseconds
pub const DEFAULT_DISSOLVE_MS: u32 = 500;

/// A line queued for the writer task with its pacing
struct Outbound {
    line: String,
    pause_before: Duration,
    pause_after: Duration,
    /// Fired once the line has been flushed to the socket
    written: Option<oneshot::Sender<()>>,
}

/// Command session state shared with the reader task
struct SessionState {
    /// Probes waiting for an `IsInterfaceSupported` reply, keyed by (vid, iid)
    pending_probes: HashMap<(Vid, Iid), VecDeque<oneshot::Sender<bool>>>,
}

/// Persistent session on the controller's control port
///
/// Owns the socket through a reader and a writer task. Outbound commands are
/// queued and written in order, with the configured pauses, so the
/// controller's input buffer is never overrun. Inbound lines are decoded and
/// published on a broadcast channel; probe replies are also routed to the
/// request that is waiting for them.
pub struct CommandSession {
    state: Arc<Mutex<SessionState>>,
    out_tx: mpsc::UnboundedSender<Outbound>,
    event_tx: broadcast::Sender<Event>,
    connected: Arc<AtomicBool>,
    options: SessionOptions,
}

impl CommandSession {
    /// Connect to the control port and enable live status pushes
    pub async fn connect(host: &str, port: u16, options: SessionOptions) -> Result<Self> {
        tracing::info!("Connecting command session to {}:{}", host, port);
        let stream = TcpStream::connect((host, port)).await?;
        stream.set_nodelay(true)?;
        Self::from_stream(stream, options)
    }

    /// Run a session over an already established transport
    pub fn from_stream<S>(stream: S, options: SessionOptions) -> Result<Self>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (mut reader, mut writer) = tokio::io::split(stream);

        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Outbound>();
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let connected = Arc::new(AtomicBool::new(true));

        let state = Arc::new(Mutex::new(SessionState {
            pending_probes: HashMap::new(),
        }));

        // Writer: serializes and paces every outbound line
        tokio::spawn(async move {
            while let Some(out) = out_rx.recv().await {
                if !out.pause_before.is_zero() {
                    sleep(out.pause_before).await;
                }
                tracing::debug!("Sending: {}", out.line.trim_end());
                if let Err(e) = writer.write_all(out.line.as_bytes()).await {
                    tracing::error!("Failed to send command: {}", e);
                    break;
                }
                if let Err(e) = writer.flush().await {
                    tracing::error!("Failed to flush command: {}", e);
                    break;
                }
                if let Some(written) = out.written {
                    let _ = written.send(());
                }
                if !out.pause_after.is_zero() {
                    sleep(out.pause_after).await;
                }
            }
        });

        // Reader: frames lines, decodes events, resolves probes
        let state_clone = state.clone();
        let event_tx_clone = event_tx.clone();
        let connected_clone = connected.clone();
        tokio::spawn(async move {
            let mut lines = LineBuffer::new();
            let mut chunk = vec![0u8; READ_CHUNK_SIZE];

            loop {
                match reader.read(&mut chunk).await {
                    Ok(0) => {
                        tracing::info!("Command session closed by controller");
                        break;
                    }
                    Ok(n) => {
                        for line in lines.push(&chunk[..n]) {
                            Self::handle_line(&state_clone, &event_tx_clone, &line).await;
                        }
                        if !lines.pending().is_empty() {
                            tracing::trace!("Holding {} byte(s) of partial line", lines.pending().len());
                        }
                    }
                    Err(e) => {
                        tracing::error!("Command session read error: {}", e);
                        break;
                    }
                }
            }

            // Connection lost, fail all pending probes
            connected_clone.store(false, Ordering::SeqCst);
            state_clone.lock().await.pending_probes.clear();
            let _ = event_tx_clone.send(Event::Disconnected);
        });

        let session = Self {
            state,
            out_tx,
            event_tx,
            connected,
            options,
        };

        session.send(Command::Status(StatusKind::Load))?;
        session.send(Command::Status(StatusKind::Button))?;

        Ok(session)
    }

    /// Handle one complete inbound line
    async fn handle_line(
        state: &Arc<Mutex<SessionState>>,
        event_tx: &broadcast::Sender<Event>,
        line: &str,
    ) {
        tracing::debug!("Received: {}", line);

        let Some(event) = parse_line(line) else {
            return;
        };

        if let Event::InterfaceSupport { vid, iid, supported } = event {
            let mut state = state.lock().await;
            if let Some(waiters) = state.pending_probes.get_mut(&(vid, iid)) {
                // One reply answers exactly one probe
                while let Some(tx) = waiters.pop_front() {
                    if tx.send(supported).is_ok() {
                        break;
                    }
                }
                if waiters.is_empty() {
                    state.pending_probes.remove(&(vid, iid));
                }
            } else {
                tracing::debug!("Unsolicited interface reply for VID {} IID {}", vid, iid);
            }
        }

        let _ = event_tx.send(event);
    }

    /// Whether the socket is still up
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Subscribe to decoded command channel events
    pub fn subscribe(&self) -> EventReceiver {
        EventReceiver::new(self.event_tx.subscribe())
    }

    /// Options this session was started with
    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    /// Queue a command without pacing (fire and forget)
    pub fn send(&self, command: Command) -> Result<()> {
        self.enqueue(command, Duration::ZERO, Duration::ZERO, None)
    }

    fn enqueue(
        &self,
        command: Command,
        pause_before: Duration,
        pause_after: Duration,
        written: Option<oneshot::Sender<()>>,
    ) -> Result<()> {
        self.out_tx
            .send(Outbound {
                line: command.to_line(),
                pause_before,
                pause_after,
                written,
            })
            .map_err(|_| InfusionError::ConnectionClosed)
    }

    /// Queue a state-changing command followed by the command pause
    fn send_paced(&self, command: Command) -> Result<()> {
        self.enqueue(command, Duration::ZERO, self.options.command_pacing, None)
    }

    /// Ask for the current level of a load (answered by `R:GETLOAD`)
    pub fn get_load_status(&self, vid: Vid) -> Result<()> {
        self.send(Command::GetLoad { vid })
    }

    /// Set a load level with the default one second ramp
    pub fn set_load_level(&self, vid: Vid, level: u8) -> Result<()> {
        self.ramp_load_level(vid, level, DEFAULT_RAMP_SECONDS)
    }

    /// Set a load level over `ramp_seconds`
    ///
    /// Switching off a load listed in the relay policy's `set_level_vids`
    /// uses `Load.SetLevel` instead of a ramp.
    pub fn ramp_load_level(&self, vid: Vid, level: u8, ramp_seconds: u32) -> Result<()> {
        let command = if level == 0 && self.options.relay_policy.uses_set_level(vid) {
            Command::SetLevel { vid, level }
        } else {
            Command::Ramp {
                vid,
                seconds: ramp_seconds,
                level,
            }
        };
        self.send_paced(command)
    }

    /// Fade an RGB load to the given colour
    pub fn dissolve_hsl(
        &self,
        vid: Vid,
        hue: f64,
        saturation: f64,
        lightness: f64,
        duration_ms: u32,
    ) -> Result<()> {
        self.send_paced(Command::DissolveHsl {
            vid,
            hue,
            saturation,
            lightness,
            duration_ms,
        })
    }

    /// Request a thermostat's outdoor temperature
    pub fn get_outdoor_temperature(&self, vid: Vid) -> Result<()> {
        self.send(Command::GetOutdoorTemperature { vid })
    }

    /// Ask whether object `vid` implements interface `iid`
    ///
    /// Resolves when a reply carrying the same (vid, iid) pair arrives. Fails
    /// with `Timeout` when the configured probe timeout elapses and with
    /// `ConnectionClosed` when the socket goes away first. The timeout counts
    /// from the moment the probe line is written, not from when it is queued.
    pub async fn probe_interface_support(&self, vid: Vid, iid: Iid) -> Result<bool> {
        let (tx, rx) = oneshot::channel();
        let (written_tx, written_rx) = oneshot::channel();

        // Register before writing so the reply cannot race the listener
        {
            let mut state = self.state.lock().await;
            if !self.is_connected() {
                return Err(InfusionError::ConnectionClosed);
            }
            state.pending_probes.entry((vid, iid)).or_default().push_back(tx);

            if let Err(e) = self.enqueue(
                Command::IsInterfaceSupported { vid, iid },
                self.options.probe_pacing,
                Duration::ZERO,
                Some(written_tx),
            ) {
                state.pending_probes.remove(&(vid, iid));
                return Err(e);
            }
        }

        // Queued probes wait behind the writer's pacing, which is not part of the budget
        if written_rx.await.is_err() {
            drop(rx);
            self.forget_abandoned(vid, iid).await;
            return Err(InfusionError::ConnectionClosed);
        }

        let reply = match self.options.probe_timeout {
            Some(limit) => match timeout(limit, rx).await {
                Ok(reply) => reply,
                Err(_) => {
                    tracing::warn!("No reply to interface probe (VID {}, IID {})", vid, iid);
                    self.forget_abandoned(vid, iid).await;
                    return Err(InfusionError::Timeout);
                }
            },
            None => rx.await,
        };

        reply.map_err(|_| InfusionError::ConnectionClosed)
    }

    /// Drop waiters whose receiving side has gone away
    async fn forget_abandoned(&self, vid: Vid, iid: Iid) {
        let mut state = self.state.lock().await;
        if let Some(waiters) = state.pending_probes.get_mut(&(vid, iid)) {
            waiters.retain(|tx| !tx.is_closed());
            if waiters.is_empty() {
                state.pending_probes.remove(&(vid, iid));
            }
        }
    }

    /// Number of probes still waiting for a reply
    pub async fn pending_probes(&self) -> usize {
        self.state
            .lock()
            .await
            .pending_probes
            .values()
            .map(VecDeque::len)
            .sum()
    }
}

#[cfg(test)]
pub(crate) fn test_session() -> (Arc<CommandSession>, tokio::io::DuplexStream) {
    let (client, controller) = tokio::io::duplex(64 * 1024);
    let session = CommandSession::from_stream(client, SessionOptions::default()).expect("session");
    (Arc::new(session), controller)
}
