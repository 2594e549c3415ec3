//! TCP link to the handset: listener lifecycle, receive loop, command channel.
//!
//! One client is served at a time. Any transport fault (bind, accept, read
//! or send) tears the connection down and drops the listening flag; the
//! session tick loop polls that flag and calls [`SensorLink::start_listening`]
//! again next tick, so recovery happens at tick granularity with no backoff.
//! Nothing here terminates the process.

use crate::pose::{PoseStore, SharedPipeline};
use crate::protocol::FrameDecoder;
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

/// Handshake sent to a freshly accepted client.
pub const GREETING: &str = "Hello!";

/// Out-of-band haptic command.
pub const VIBRATION_COMMAND: &str = "vibration";

const READ_BUFFER_SIZE: usize = 256;

/// Outbound text-command channel to the connected client.
///
/// [`send`](CommandChannel::send) never blocks and never queues across
/// connections: with no client attached it is a silent no-op.
#[derive(Clone, Default)]
pub struct CommandChannel {
    writer: Arc<Mutex<Option<mpsc::UnboundedSender<String>>>>,
}

impl CommandChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn send(&self, text: &str) {
        if let Ok(slot) = self.writer.lock() {
            if let Some(tx) = slot.as_ref() {
                let _ = tx.send(text.to_string());
            }
        }
    }

    pub fn is_connected(&self) -> bool {
        self.writer
            .lock()
            .ok()
            .map(|slot| slot.is_some())
            .unwrap_or(false)
    }

    pub(crate) fn install(&self, tx: mpsc::UnboundedSender<String>) {
        if let Ok(mut slot) = self.writer.lock() {
            *slot = Some(tx);
        }
    }

    pub(crate) fn clear(&self) {
        if let Ok(mut slot) = self.writer.lock() {
            *slot = None;
        }
    }
}

/// Receive-path counters, snapshotted into the status report.
#[derive(Clone, Debug, Default)]
pub struct LinkStats {
    pub samples_decoded: u64,
    pub records_dropped: u64,
    pub connections_accepted: u64,
}

/// Owns the listening endpoint and the per-connection receive/send tasks.
#[derive(Clone)]
pub struct SensorLink {
    bind_addr: IpAddr,
    port: u16,
    listening: Arc<AtomicBool>,
    local_port: Arc<Mutex<Option<u16>>>,
    commands: CommandChannel,
    pose: PoseStore,
    pipeline: SharedPipeline,
    stats: Arc<Mutex<LinkStats>>,
}

impl SensorLink {
    pub fn new(bind_addr: IpAddr, port: u16, pose: PoseStore, pipeline: SharedPipeline) -> Self {
        SensorLink {
            bind_addr,
            port,
            listening: Arc::new(AtomicBool::new(false)),
            local_port: Arc::new(Mutex::new(None)),
            commands: CommandChannel::new(),
            pose,
            pipeline,
            stats: Arc::new(Mutex::new(LinkStats::default())),
        }
    }

    /// Bind and start the accept task. No-op while already listening; on
    /// bind failure the link stays down and the caller retries next tick.
    ///
    /// Must run inside a tokio runtime.
    pub fn start_listening(&self) {
        if self.listening.swap(true, Ordering::SeqCst) {
            return;
        }

        let std_listener = match std::net::TcpListener::bind((self.bind_addr, self.port)) {
            Ok(listener) => listener,
            Err(err) => {
                log::warn!(
                    "[server] bind {}:{} failed, retrying next tick: {}",
                    self.bind_addr,
                    self.port,
                    err
                );
                self.listening.store(false, Ordering::SeqCst);
                return;
            }
        };
        if let Err(err) = std_listener.set_nonblocking(true) {
            log::warn!("[server] listener setup failed: {}", err);
            self.listening.store(false, Ordering::SeqCst);
            return;
        }
        let listener = match TcpListener::from_std(std_listener) {
            Ok(listener) => listener,
            Err(err) => {
                log::warn!("[server] listener registration failed: {}", err);
                self.listening.store(false, Ordering::SeqCst);
                return;
            }
        };

        if let Ok(addr) = listener.local_addr() {
            if let Ok(mut port) = self.local_port.lock() {
                *port = Some(addr.port());
            }
            log::info!("[server] waiting for a connection on port {}", addr.port());
        }

        let link = self.clone();
        tokio::spawn(async move {
            link.serve(listener).await;
        });
    }

    pub fn is_listening(&self) -> bool {
        self.listening.load(Ordering::SeqCst)
    }

    /// Port actually bound, once listening has started. Differs from the
    /// configured port when that was 0.
    pub fn local_port(&self) -> Option<u16> {
        self.local_port.lock().ok().and_then(|port| *port)
    }

    pub fn commands(&self) -> CommandChannel {
        self.commands.clone()
    }

    pub fn send_command(&self, text: &str) {
        self.commands.send(text);
    }

    pub fn stats(&self) -> LinkStats {
        self.stats
            .lock()
            .map(|stats| stats.clone())
            .unwrap_or_default()
    }

    async fn serve(&self, listener: TcpListener) {
        let (stream, peer) = match listener.accept().await {
            Ok(pair) => pair,
            Err(err) => {
                log::warn!("[server] accept failed, will re-listen: {}", err);
                self.close();
                return;
            }
        };
        // One client at a time: further connection attempts are refused
        // until the link re-listens.
        drop(listener);

        log::info!("[server] client connected from {}", peer);
        if let Ok(mut stats) = self.stats.lock() {
            stats.connections_accepted += 1;
        }

        if let Err(err) = self.run_connection(stream).await {
            log::warn!("[server] connection error, will re-listen: {}", err);
        }
        self.close();
    }

    async fn run_connection(&self, stream: TcpStream) -> std::io::Result<()> {
        let (mut reader, mut writer) = stream.into_split();

        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        self.commands.install(tx);

        // Writer half: greeting first, then whatever the command channel
        // queues. Ends when the channel is cleared or the client goes away.
        tokio::spawn(async move {
            if let Err(err) = writer.write_all(GREETING.as_bytes()).await {
                log::warn!("[server] greeting failed: {}", err);
                return;
            }
            log::info!("[server] sent init sequence to client");
            while let Some(command) = rx.recv().await {
                if let Err(err) = writer.write_all(command.as_bytes()).await {
                    log::warn!("[server] send failed: {}", err);
                    break;
                }
            }
        });

        let result = self.read_loop(&mut reader).await;
        self.commands.clear();
        result
    }

    async fn read_loop(&self, reader: &mut OwnedReadHalf) -> std::io::Result<()> {
        let mut decoder = FrameDecoder::new();
        let mut buf = [0u8; READ_BUFFER_SIZE];

        loop {
            let bytes_read = reader.read(&mut buf).await?;
            if bytes_read == 0 {
                log::info!("[server] client disconnected");
                return Ok(());
            }

            match decoder.push_bytes(&buf[..bytes_read]) {
                Some(Ok(sample)) => {
                    let mut pose = self.pose.get();
                    if let Ok(mut pipeline) = self.pipeline.lock() {
                        pipeline.ingest_into(&sample, &mut pose);
                    }
                    self.pose.set(pose);

                    if let Ok(mut stats) = self.stats.lock() {
                        stats.samples_decoded += 1;
                        if stats.samples_decoded % 500 == 0 {
                            log::debug!("[server] {} samples decoded", stats.samples_decoded);
                        }
                    }
                }
                Some(Err(err)) => {
                    log::debug!("[server] dropping malformed record: {}", err);
                    if let Ok(mut stats) = self.stats.lock() {
                        stats.records_dropped += 1;
                    }
                }
                None => {}
            }
        }
    }

    fn close(&self) {
        log::info!("[server] closing connection");
        self.commands.clear();
        self.listening.store(false, Ordering::SeqCst);
    }
}
