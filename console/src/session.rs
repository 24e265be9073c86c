//! Session controller: the single owner of an instance's console session.
//!
//! The controller runs a connection-phase state machine that is deliberately
//! decoupled from the lifecycle state reported by the control plane. Desired
//! lifecycle state decides whether a socket *should* exist; socket events
//! decide what happens to the socket that *does* exist. A socket closing on
//! its own never flips the desired state, it only triggers a reconnect if the
//! desired state still calls for one, and a stop acknowledgement closes the
//! socket even while it is perfectly healthy.
//!
//! All transitions for one controller run on its owner's task: socket events
//! are pulled through [`SessionController::next_event`] and fed back through
//! [`SessionController::handle_event`], so no two transitions ever execute
//! concurrently and the controller needs no internal locking.

use crate::buffer::LogBuffer;
use crate::control::ControlPlane;
use crate::error::SessionError;
use crate::socket::{CloseReason, Connector, ConsoleSocket, SocketEvent};
use log::{debug, info, warn};
use shared::{InstanceId, LifecycleState, LifecycleTarget, LogLine};
use tokio::sync::mpsc;

/// Connection phase of the controller's own state machine, distinct from the
/// instance's lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionPhase {
    Idle,
    Connecting,
    Connected,
    Closing,
}

impl std::fmt::Display for ConnectionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ConnectionPhase::Idle => "idle",
            ConnectionPhase::Connecting => "connecting",
            ConnectionPhase::Connected => "connected",
            ConnectionPhase::Closing => "closing",
        };
        f.write_str(s)
    }
}

/// Orchestrates one instance's console session: owns the single active
/// socket, decides when to (re)open or close it, serializes command
/// submission and exposes the merged view (phase + log) to the view layer.
pub struct SessionController<C: Connector, P: ControlPlane> {
    instance: InstanceId,
    connector: C,
    control: P,
    buffer: LogBuffer,
    phase: ConnectionPhase,
    lifecycle: LifecycleState,
    generation: u32,
    socket: Option<C::Socket>,
    events: Option<mpsc::UnboundedReceiver<SocketEvent>>,
    last_error: Option<SessionError>,
    unmounted: bool,
}

impl<C: Connector, P: ControlPlane> SessionController<C, P> {
    /// Mounts a console session for `instance`. The controller starts `Idle`
    /// with lifecycle `Unknown`; nothing connects until the control plane
    /// (or [`observe_lifecycle`](Self::observe_lifecycle)) reports a state
    /// that wants a socket.
    pub fn mount(instance: InstanceId, connector: C, control: P) -> Self {
        Self::mount_with_buffer(instance, connector, control, LogBuffer::new())
    }

    /// Like [`mount`](Self::mount) but with a caller-supplied buffer, e.g. a
    /// bounded scrollback.
    pub fn mount_with_buffer(
        instance: InstanceId,
        connector: C,
        control: P,
        buffer: LogBuffer,
    ) -> Self {
        SessionController {
            instance,
            connector,
            control,
            buffer,
            phase: ConnectionPhase::Idle,
            lifecycle: LifecycleState::Unknown,
            generation: 0,
            socket: None,
            events: None,
            last_error: None,
            unmounted: false,
        }
    }

    pub fn instance(&self) -> &InstanceId {
        &self.instance
    }

    pub fn phase(&self) -> ConnectionPhase {
        self.phase
    }

    pub fn lifecycle(&self) -> LifecycleState {
        self.lifecycle
    }

    /// Generation of the current (or most recent) socket; 0 before the first
    /// connection attempt.
    pub fn generation(&self) -> u32 {
        self.generation
    }

    /// Read-only view of the log, in append order.
    pub fn snapshot(&self) -> impl Iterator<Item = &LogLine> + '_ {
        self.buffer.snapshot()
    }

    pub fn log_len(&self) -> usize {
        self.buffer.len()
    }

    /// Takes the last surfaced error, if any. Only control-plane failures and
    /// transport-unavailable reports land here; everything else the
    /// controller absorbs.
    pub fn take_last_error(&mut self) -> Option<SessionError> {
        self.last_error.take()
    }

    /// Submits one command. Rejected with [`SessionError::NotConnected`]
    /// unless the phase is `Connected`; accepted commands are sent verbatim
    /// and locally echoed into the log before any server echo arrives.
    pub fn send_command(&mut self, text: &str) -> Result<(), SessionError> {
        if self.phase != ConnectionPhase::Connected {
            return Err(SessionError::NotConnected);
        }
        let socket = self.socket.as_mut().ok_or(SessionError::NotConnected)?;
        socket.send(text)?;
        self.buffer.append(self.generation, text);
        debug!("Command sent to {}: {}", self.instance, text);
        Ok(())
    }

    /// Requests a lifecycle transition through the control plane. On
    /// acknowledgement the desired state is updated and the socket follows:
    /// stop closes it, start opens one if missing, restart cycles it onto a
    /// fresh generation. On failure the desired state is left unchanged and
    /// the error is surfaced.
    pub async fn set_lifecycle(&mut self, target: LifecycleTarget) -> Result<(), SessionError> {
        if let Err(e) = self.control.request(&self.instance, target).await {
            self.last_error = Some(e.clone());
            return Err(e);
        }

        info!(
            "Lifecycle {} acknowledged for {}",
            target.path(),
            self.instance
        );
        self.lifecycle = target.acknowledged_state();
        if target == LifecycleTarget::Restart {
            self.close_socket();
        }
        self.evaluate().await;
        Ok(())
    }

    /// Feeds an externally observed lifecycle state (an unsolicited status
    /// push is just another control-plane input) and re-evaluates whether a
    /// socket should exist.
    pub async fn observe_lifecycle(&mut self, state: LifecycleState) {
        if self.lifecycle != state {
            debug!("Lifecycle of {} observed as {}", self.instance, state);
        }
        self.lifecycle = state;
        self.evaluate().await;
    }

    /// Re-runs the desired-state evaluation. Used by owners that want to
    /// retry after a failed connect while the lifecycle still wants a socket.
    pub async fn reevaluate(&mut self) {
        self.evaluate().await;
    }

    /// Waits for the next event from the current socket. Pends forever while
    /// no socket exists, which makes it safe to park in a select loop.
    pub async fn next_event(&mut self) -> SocketEvent {
        match &mut self.events {
            Some(receiver) => match receiver.recv().await {
                Some(event) => event,
                // Event channel dropped without a Closed event; the socket
                // task is gone either way.
                None => SocketEvent::Closed(CloseReason::Error),
            },
            None => std::future::pending().await,
        }
    }

    /// Applies one socket event to the state machine.
    pub async fn handle_event(&mut self, event: SocketEvent) {
        if self.unmounted {
            return;
        }
        match event {
            SocketEvent::Opened => {
                if self.phase == ConnectionPhase::Connecting {
                    info!(
                        "Console connected to {} (generation {})",
                        self.instance, self.generation
                    );
                    self.phase = ConnectionPhase::Connected;
                }
            }
            SocketEvent::Frame(text) => {
                self.buffer.append(self.generation, text);
            }
            SocketEvent::Closed(reason) => {
                self.socket = None;
                self.events = None;
                self.phase = ConnectionPhase::Idle;
                match reason {
                    CloseReason::Normal => {
                        debug!("Console socket for {} closed", self.instance)
                    }
                    CloseReason::Error | CloseReason::RemoteClosed => warn!(
                        "Console socket for {} closed unexpectedly: {:?}",
                        self.instance, reason
                    ),
                }
                // Reconnect iff the desired state still wants a socket.
                self.evaluate().await;
            }
        }
    }

    /// Releases the socket and ends the session. Safe to call repeatedly and
    /// from any phase; the controller accepts no further transitions after.
    pub fn unmount(&mut self) {
        if self.unmounted {
            return;
        }
        self.close_socket();
        self.unmounted = true;
        info!("Console session for {} unmounted", self.instance);
    }

    async fn evaluate(&mut self) {
        if self.unmounted {
            return;
        }
        let desired = self.lifecycle.socket_desired();
        match self.phase {
            ConnectionPhase::Idle if desired => self.open_socket().await,
            ConnectionPhase::Connecting | ConnectionPhase::Connected if !desired => {
                self.close_socket()
            }
            _ => {}
        }
    }

    async fn open_socket(&mut self) {
        self.generation += 1;
        self.phase = ConnectionPhase::Connecting;
        debug!(
            "Opening console socket to {} (generation {})",
            self.instance, self.generation
        );

        match self.connector.connect(&self.instance).await {
            Ok((socket, events)) => {
                self.socket = Some(socket);
                self.events = Some(events);
            }
            Err(e) => {
                warn!("Console connect to {} failed: {}", self.instance, e);
                self.phase = ConnectionPhase::Idle;
                self.last_error = Some(e);
            }
        }
    }

    /// Closes and discards the current socket, if any. Dropping the event
    /// receiver here is what guarantees no stale event of an old generation
    /// ever reaches the state machine.
    fn close_socket(&mut self) {
        if let Some(mut socket) = self.socket.take() {
            self.phase = ConnectionPhase::Closing;
            socket.close();
        }
        self.events = None;
        self.phase = ConnectionPhase::Idle;
    }
}

impl<C: Connector, P: ControlPlane> Drop for SessionController<C, P> {
    fn drop(&mut self) {
        if let Some(mut socket) = self.socket.take() {
            socket.close();
        }
    }
}
