//! Listener session: one device, one task.
//!
//! ```text
//!            start()                 transport acquired
//! Stopped ─────────────► Starting ─────────────────────► Running
//!    ▲                      │                              │
//!    │   acquisition failed │      stop() / fatal error    │
//!    └──────────────────────┴──────────────────────────────┘
//! ```
//!
//! A running session owns its transport exclusively. TCP sessions serve one
//! connection at a time; a serial session owns its port. Every suspension
//! point also waits on the session's [`CancellationToken`], so a stop request
//! is noticed immediately.

use crate::alert::Notifier;
use crate::error::{SessionError, SessionResult};
use crate::pipeline::MessagePipeline;
use crate::settings::SessionSettings;
use futures::{SinkExt, StreamExt};
use labgate_core::{
    ChecksumPolicy, DeviceConfig, SerialParity, SerialSettings, SessionStatus, TransportConfig,
};
use labgate_protocol::{FrameAssembler, LabCodec, Reply, StreamEvent, TransportMode};
use labgate_storage::LabStore;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_serial::{SerialPortBuilderExt, SerialStream};
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};

/// Receives `(machine_id, status)` on every transition except `Starting`.
pub type StatusCallback = Arc<dyn Fn(&str, SessionStatus) + Send + Sync>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// State visible to both the session handle and its task.
struct SessionShared {
    machine_id: String,
    status: Mutex<SessionStatus>,
    local_addr: Mutex<Option<SocketAddr>>,
    on_status: Option<StatusCallback>,
}

impl SessionShared {
    fn status(&self) -> SessionStatus {
        *lock(&self.status)
    }

    /// Returns `false` when already in `next`.
    fn transition(&self, next: SessionStatus) -> bool {
        {
            let mut status = lock(&self.status);
            if *status == next {
                return false;
            }
            *status = next;
        }

        if next != SessionStatus::Starting
            && let Some(callback) = &self.on_status
        {
            callback(&self.machine_id, next);
        }
        true
    }
}

struct Control {
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

enum Transport {
    Tcp(TcpListener),
    Serial(SerialStream),
}

/// Connection listener for one device.
pub struct ListenerSession<S> {
    config: DeviceConfig,
    store: Arc<S>,
    notifier: Arc<dyn Notifier>,
    settings: SessionSettings,
    shared: Arc<SessionShared>,
    control: tokio::sync::Mutex<Control>,
}

impl<S: LabStore> ListenerSession<S> {
    pub fn new(
        config: DeviceConfig,
        store: Arc<S>,
        notifier: Arc<dyn Notifier>,
        settings: SessionSettings,
    ) -> Self {
        Self::with_callback(config, store, notifier, settings, None)
    }

    /// Build a session that reports its transitions to `on_status`.
    pub fn with_callback(
        config: DeviceConfig,
        store: Arc<S>,
        notifier: Arc<dyn Notifier>,
        settings: SessionSettings,
        on_status: Option<StatusCallback>,
    ) -> Self {
        let shared = Arc::new(SessionShared {
            machine_id: config.machine_id.clone(),
            status: Mutex::new(SessionStatus::Stopped),
            local_addr: Mutex::new(None),
            on_status,
        });

        Self {
            config,
            store,
            notifier,
            settings,
            shared,
            control: tokio::sync::Mutex::new(Control {
                cancel: CancellationToken::new(),
                task: None,
            }),
        }
    }

    pub fn machine_id(&self) -> &str {
        &self.config.machine_id
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    pub fn status(&self) -> SessionStatus {
        self.shared.status()
    }

    /// Address the TCP listener is bound to while running.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *lock(&self.shared.local_addr)
    }

    fn mode(&self) -> TransportMode {
        match self.config.transport {
            TransportConfig::Serial(_) => TransportMode::Serial,
            TransportConfig::Tcp(_) => TransportMode::Socket,
        }
    }

    /// Acquire the transport and launch the read loop.
    ///
    /// Returns `Ok` without doing anything when already active.
    ///
    /// # Errors
    /// Returns [`SessionError::TransportAcquisition`] when the port cannot
    /// be bound or opened and [`SessionError::Persistence`] when the code
    /// map cannot be loaded. The session is `Stopped` and an alert has been
    /// raised in both cases.
    pub async fn start(&self) -> SessionResult<()> {
        let mut control = self.control.lock().await;
        if self.status().is_active() {
            debug!(machine = %self.config.machine_id, "Listener already active");
            return Ok(());
        }
        self.shared.transition(SessionStatus::Starting);

        let prepared = async {
            let pipeline =
                MessagePipeline::load(&self.config, Arc::clone(&self.store), self.mode()).await?;
            let transport = self.acquire().await?;
            Ok::<_, SessionError>((pipeline, transport))
        }
        .await;

        let (pipeline, transport) = match prepared {
            Ok(prepared) => prepared,
            Err(e) => {
                error!(machine = %self.config.machine_id, error = %e, "Failed to start listener");
                self.notifier.notify_error(
                    &self.config.machine_id,
                    &format!("Failed to start listener: {e}"),
                );
                self.shared.transition(SessionStatus::Stopped);
                return Err(e);
            }
        };

        let cancel = CancellationToken::new();
        control.cancel = cancel.clone();

        let task = SessionTask {
            pipeline,
            settings: self.settings,
            policy: self.config.checksum_policy,
            cancel,
            notifier: Arc::clone(&self.notifier),
            shared: Arc::clone(&self.shared),
        };
        let span = info_span!("listener", machine = %self.config.machine_id);

        self.shared.transition(SessionStatus::Running);
        control.task = Some(tokio::spawn(task.run(transport).instrument(span)));
        info!(machine = %self.config.machine_id, transport = %self.config.transport, "Listener started");
        Ok(())
    }

    /// Cancel the read loop and wait up to the stop timeout for it.
    ///
    /// The session reports `Stopped` even when the task has not finished
    /// unwinding by then.
    pub async fn stop(&self) -> SessionResult<()> {
        let mut control = self.control.lock().await;
        control.cancel.cancel();

        if let Some(task) = control.task.take() {
            match timeout(self.settings.stop_timeout, task).await {
                Ok(Ok(())) => debug!(machine = %self.config.machine_id, "Listener task joined"),
                Ok(Err(e)) => {
                    warn!(machine = %self.config.machine_id, error = %e, "Listener task ended abnormally")
                }
                Err(_) => warn!(
                    machine = %self.config.machine_id,
                    timeout_ms = self.settings.stop_timeout.as_millis() as u64,
                    "Listener still unwinding, detaching"
                ),
            }
        }

        *lock(&self.shared.local_addr) = None;
        self.shared.transition(SessionStatus::Stopped);
        info!(machine = %self.config.machine_id, "Listener stopped");
        Ok(())
    }

    async fn acquire(&self) -> SessionResult<Transport> {
        match &self.config.transport {
            TransportConfig::Tcp(tcp) => {
                let target = tcp.socket_addr();
                let listener = TcpListener::bind(&target).await.map_err(|source| {
                    SessionError::TransportAcquisition {
                        target: target.clone(),
                        source,
                    }
                })?;
                let local = listener.local_addr().ok();
                *lock(&self.shared.local_addr) = local;
                info!(addr = ?local, "TCP listener bound");
                Ok(Transport::Tcp(listener))
            }
            TransportConfig::Serial(serial) => {
                let port = open_serial(serial).map_err(|source| {
                    SessionError::TransportAcquisition {
                        target: serial.port.clone(),
                        source,
                    }
                })?;
                info!(port = %serial.port, baud = serial.baud_rate, "Serial port opened");
                Ok(Transport::Serial(port))
            }
        }
    }
}

impl<S> std::fmt::Debug for ListenerSession<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerSession")
            .field("machine_id", &self.config.machine_id)
            .field("status", &self.shared.status())
            .finish_non_exhaustive()
    }
}

fn open_serial(settings: &SerialSettings) -> std::io::Result<SerialStream> {
    let data_bits = match settings.data_bits {
        5 => tokio_serial::DataBits::Five,
        6 => tokio_serial::DataBits::Six,
        7 => tokio_serial::DataBits::Seven,
        _ => tokio_serial::DataBits::Eight,
    };
    let parity = match settings.parity {
        SerialParity::None => tokio_serial::Parity::None,
        SerialParity::Even => tokio_serial::Parity::Even,
        SerialParity::Odd => tokio_serial::Parity::Odd,
    };
    let stop_bits = match settings.stop_bits {
        2 => tokio_serial::StopBits::Two,
        _ => tokio_serial::StopBits::One,
    };

    let port = tokio_serial::new(settings.port.as_str(), settings.baud_rate)
        .data_bits(data_bits)
        .parity(parity)
        .stop_bits(stop_bits)
        .open_native_async()?;
    Ok(port)
}

/// The spawned half of a session.
struct SessionTask<S> {
    pipeline: MessagePipeline<S>,
    settings: SessionSettings,
    policy: ChecksumPolicy,
    cancel: CancellationToken,
    notifier: Arc<dyn Notifier>,
    shared: Arc<SessionShared>,
}

impl<S: LabStore> SessionTask<S> {
    async fn run(self, transport: Transport) {
        let result = match transport {
            Transport::Tcp(listener) => self.serve_tcp(listener).await,
            Transport::Serial(port) => self.serve_serial(port).await,
        };

        if let Err(e) = result {
            error!(error = %e, "Listener terminated");
            self.notifier
                .notify_error(self.pipeline.machine_id(), &format!("Listener terminated: {e}"));
        }
        *lock(&self.shared.local_addr) = None;
        self.shared.transition(SessionStatus::Stopped);
    }

    /// Accept connections one after another until cancelled.
    async fn serve_tcp(&self, listener: TcpListener) -> SessionResult<()> {
        loop {
            let (stream, peer) = tokio::select! {
                _ = self.cancel.cancelled() => return Ok(()),
                accepted = listener.accept() => accepted.map_err(SessionError::runtime)?,
            };

            info!(%peer, "Instrument connected");
            if let Err(e) = stream.set_nodelay(true) {
                warn!(%peer, error = %e, "Failed to set TCP_NODELAY");
            }

            match self.drive(stream, TransportMode::Socket).await {
                Ok(()) => info!(%peer, "Instrument disconnected"),
                Err(e) => warn!(%peer, error = %e, "Connection closed"),
            }

            if self.cancel.is_cancelled() {
                return Ok(());
            }
        }
    }

    async fn serve_serial(&self, port: SerialStream) -> SessionResult<()> {
        self.drive(port, TransportMode::Serial)
            .await
            .map_err(SessionError::RuntimeTransport)?;

        if self.cancel.is_cancelled() {
            return Ok(());
        }
        Err(SessionError::runtime(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            "serial port closed",
        )))
    }

    /// Read events from one byte stream until it ends or the session is
    /// cancelled. A quiet period hands buffered text to the pipeline.
    async fn drive<T>(&self, io: T, mode: TransportMode) -> labgate_core::Result<()>
    where
        T: AsyncRead + AsyncWrite + Unpin,
    {
        let assembler = FrameAssembler::new(mode)
            .with_policy(self.policy)
            .with_max_buffer(self.settings.max_buffer);
        let mut framed = Framed::new(io, LabCodec::from_assembler(assembler));

        loop {
            let next = tokio::select! {
                _ = self.cancel.cancelled() => return Ok(()),
                next = timeout(self.settings.read_timeout, framed.next()) => next,
            };

            let event = match next {
                Err(_) => match framed.codec_mut().take_pending() {
                    Some(message) => StreamEvent::Message(message),
                    None => continue,
                },
                Ok(None) => return Ok(()),
                Ok(Some(event)) => event?,
            };

            if let Some(reply) = self.handle(event).await {
                framed.send(reply).await?;
            }
        }
    }

    async fn handle(&self, event: StreamEvent) -> Option<Reply> {
        match event {
            StreamEvent::Enquiry => {
                debug!("ENQ received");
                Some(Reply::Ack)
            }
            StreamEvent::FrameAccepted { checksum_ok } => {
                if !checksum_ok {
                    warn!("Frame checksum mismatch, frame accepted");
                }
                Some(Reply::Ack)
            }
            StreamEvent::FrameRejected { expected, received } => {
                warn!(
                    expected = %String::from_utf8_lossy(&expected),
                    received = %String::from_utf8_lossy(&received),
                    "Frame checksum mismatch, frame rejected"
                );
                Some(Reply::Nak)
            }
            StreamEvent::Message(message) => self.pipeline.process(&message).await.reply,
            StreamEvent::Discarded { reason, bytes } => {
                let err = labgate_core::Error::Framing(format!("{reason}, {bytes} bytes dropped"));
                warn!(error = %err, "Input discarded");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::ChannelNotifier;
    use labgate_core::{ResultCodeField, TcpSettings};
    use labgate_storage::MemoryLabStore;
    use std::time::Duration;

    fn tcp_config(port: u16) -> DeviceConfig {
        DeviceConfig {
            machine_id: "M1".to_string(),
            name: "Analyzer".to_string(),
            transport: TransportConfig::Tcp(TcpSettings {
                bind_address: "127.0.0.1".to_string(),
                port,
            }),
            protocol_hint: None,
            result_code_field: ResultCodeField::Third,
            checksum_policy: ChecksumPolicy::Permissive,
        }
    }

    fn recorder() -> (StatusCallback, Arc<Mutex<Vec<SessionStatus>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let callback: StatusCallback = Arc::new(move |_, status| sink.lock().unwrap().push(status));
        (callback, seen)
    }

    fn settings() -> SessionSettings {
        SessionSettings::default()
            .read_timeout(Duration::from_millis(100))
            .stop_timeout(Duration::from_secs(1))
    }

    #[tokio::test]
    async fn test_start_stop_transitions() {
        let (callback, seen) = recorder();
        let session = ListenerSession::with_callback(
            tcp_config(0),
            Arc::new(MemoryLabStore::new()),
            Arc::new(crate::alert::NoopNotifier),
            settings(),
            Some(callback),
        );

        session.start().await.unwrap();
        assert_eq!(session.status(), SessionStatus::Running);
        assert!(session.local_addr().is_some());

        session.start().await.unwrap();
        session.stop().await.unwrap();
        assert_eq!(session.status(), SessionStatus::Stopped);
        assert!(session.local_addr().is_none());

        assert_eq!(
            *seen.lock().unwrap(),
            vec![SessionStatus::Running, SessionStatus::Stopped]
        );
    }

    #[tokio::test]
    async fn test_bind_failure_reports_stopped_and_alerts() {
        let occupied = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = occupied.local_addr().unwrap().port();

        let (callback, seen) = recorder();
        let (notifier, mut alerts) = ChannelNotifier::new(4);
        let session = ListenerSession::with_callback(
            tcp_config(port),
            Arc::new(MemoryLabStore::new()),
            Arc::new(notifier),
            settings(),
            Some(callback),
        );

        let err = session.start().await.unwrap_err();
        assert!(matches!(err, SessionError::TransportAcquisition { .. }));
        assert_eq!(session.status(), SessionStatus::Stopped);
        assert_eq!(*seen.lock().unwrap(), vec![SessionStatus::Stopped]);
        assert_eq!(alerts.try_recv().unwrap().machine_id, "M1");
    }

    #[tokio::test]
    async fn test_stop_when_never_started() {
        let (callback, seen) = recorder();
        let session = ListenerSession::with_callback(
            tcp_config(0),
            Arc::new(MemoryLabStore::new()),
            Arc::new(crate::alert::NoopNotifier),
            settings(),
            Some(callback),
        );

        session.stop().await.unwrap();
        assert_eq!(session.status(), SessionStatus::Stopped);
        assert!(seen.lock().unwrap().is_empty());
    }
}
