//! Interactive shell channel
//!
//! Bridges one shell process inside a workspace to the client bound to its
//! session. The channel moves through three states:
//!
//! ```text
//! Initializing --attach--> Attached --close--> Closed
//!       \____________________close_____________/
//! ```
//!
//! Client input is dropped until the channel is attached, and after it is
//! closed. Shell output is forwarded verbatim as [`SessionEvent::Output`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use devbox_runtime::ShellProcess;
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Child;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::types::{InputDelivery, SessionEvent, SessionId};

const READ_CHUNK: usize = 8 * 1024;

/// Lifecycle state of a shell channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShellState {
    /// Waiting for the shell process
    Initializing,
    /// Forwarding bytes in both directions
    Attached,
    /// Torn down; terminal
    Closed,
}

#[derive(Debug, Default)]
struct Liveness {
    alive: AtomicBool,
    closed: AtomicBool,
}

#[derive(Debug)]
struct Inner {
    state: ShellState,
    input: Option<mpsc::Sender<Vec<u8>>>,
    tasks: Vec<JoinHandle<()>>,
    child: Option<Child>,
}

/// Duplex byte channel between a client and a workspace shell
#[derive(Debug)]
pub struct ShellChannel {
    session: SessionId,
    events: mpsc::Sender<SessionEvent>,
    input_buffer: usize,
    liveness: Arc<Liveness>,
    inner: Mutex<Inner>,
}

impl ShellChannel {
    /// Create a channel in the `Initializing` state
    #[must_use]
    pub fn new(session: SessionId, events: mpsc::Sender<SessionEvent>, input_buffer: usize) -> Self {
        Self {
            session,
            events,
            input_buffer: input_buffer.max(1),
            liveness: Arc::new(Liveness::default()),
            inner: Mutex::new(Inner {
                state: ShellState::Initializing,
                input: None,
                tasks: Vec::new(),
                child: None,
            }),
        }
    }

    /// Current state
    #[must_use]
    pub fn state(&self) -> ShellState {
        self.inner.lock().state
    }

    /// Whether the shell process is attached and still running
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.liveness.alive.load(Ordering::Acquire)
    }

    /// Attach a shell process and start forwarding
    ///
    /// Emits [`SessionEvent::Ready`] before any output. Returns `false`
    /// without attaching if the channel is not `Initializing`; the process
    /// is then dropped.
    pub fn attach(&self, process: ShellProcess) -> bool {
        let mut inner = self.inner.lock();
        if inner.state != ShellState::Initializing {
            debug!(session = %self.session, state = ?inner.state, "shell attach skipped");
            return false;
        }

        let (mut stdin, mut stdout, child) = process.into_parts();
        self.liveness.alive.store(true, Ordering::Release);
        let (input_tx, mut input_rx) = mpsc::channel::<Vec<u8>>(self.input_buffer);

        let session = self.session.clone();
        let writer = tokio::spawn(async move {
            while let Some(bytes) = input_rx.recv().await {
                if let Err(e) = stdin.write_all(&bytes).await {
                    debug!(session = %session, error = %e, "shell input closed");
                    break;
                }
                if stdin.flush().await.is_err() {
                    break;
                }
            }
        });

        let session = self.session.clone();
        let events = self.events.clone();
        let liveness = Arc::clone(&self.liveness);
        let reader = tokio::spawn(async move {
            if events.send(SessionEvent::Ready).await.is_err() {
                return;
            }
            let mut buf = vec![0u8; READ_CHUNK];
            loop {
                match stdout.read(&mut buf).await {
                    Ok(0) => break,
                    Ok(n) => {
                        if events.send(SessionEvent::Output(buf[..n].to_vec())).await.is_err() {
                            return;
                        }
                    }
                    Err(e) => {
                        debug!(session = %session, error = %e, "shell output read failed");
                        break;
                    }
                }
            }

            liveness.alive.store(false, Ordering::Release);
            if !liveness.closed.load(Ordering::Acquire) {
                info!(session = %session, "shell exited");
                if let Err(e) = events.send(SessionEvent::ShellExited).await {
                    debug!(session = %session, error = %e, "session event dropped");
                }
            }
        });

        inner.state = ShellState::Attached;
        inner.input = Some(input_tx);
        inner.tasks = vec![writer, reader];
        inner.child = child;
        debug!(session = %self.session, "shell attached");
        true
    }

    /// Forward client bytes to the shell
    pub async fn send_input(&self, bytes: Vec<u8>) -> InputDelivery {
        let input = {
            let inner = self.inner.lock();
            match inner.state {
                ShellState::Initializing => return InputDelivery::NotReady,
                ShellState::Closed => return InputDelivery::Closed,
                ShellState::Attached => inner.input.clone(),
            }
        };

        if !self.is_alive() {
            return InputDelivery::Dropped;
        }
        match input {
            Some(tx) if tx.send(bytes).await.is_ok() => InputDelivery::Forwarded,
            _ => InputDelivery::Dropped,
        }
    }

    /// Close the channel and stop the shell
    ///
    /// Returns `true` for the call that performed the close; later calls
    /// are no-ops.
    pub fn close(&self) -> bool {
        let mut inner = self.inner.lock();
        if inner.state == ShellState::Closed {
            return false;
        }

        self.liveness.closed.store(true, Ordering::Release);
        self.liveness.alive.store(false, Ordering::Release);
        inner.state = ShellState::Closed;
        inner.input = None;
        for task in inner.tasks.drain(..) {
            task.abort();
        }
        if let Some(mut child) = inner.child.take() {
            if let Err(e) = child.start_kill() {
                debug!(session = %self.session, error = %e, "shell process already gone");
            }
        }
        debug!(session = %self.session, "shell closed");
        true
    }
}

impl Drop for ShellChannel {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::duplex;
    use tokio::time::timeout;

    struct Fixture {
        channel: ShellChannel,
        events: mpsc::Receiver<SessionEvent>,
        // Far ends of the shell pipes
        shell_in: tokio::io::DuplexStream,
        shell_out: tokio::io::DuplexStream,
    }

    fn attached() -> Fixture {
        let (events_tx, events) = mpsc::channel(16);
        let channel = ShellChannel::new(SessionId::from("s1"), events_tx, 4);
        let (client_in, shell_in) = duplex(1024);
        let (shell_out, client_out) = duplex(1024);
        assert!(channel.attach(ShellProcess::new(client_in, client_out)));
        Fixture {
            channel,
            events,
            shell_in,
            shell_out,
        }
    }

    async fn next(events: &mut mpsc::Receiver<SessionEvent>) -> SessionEvent {
        timeout(Duration::from_secs(2), events.recv())
            .await
            .expect("event timed out")
            .expect("event channel closed")
    }

    #[tokio::test]
    async fn input_before_attach_is_not_ready() {
        let (events_tx, _events) = mpsc::channel(4);
        let channel = ShellChannel::new(SessionId::from("s1"), events_tx, 4);
        assert_eq!(channel.state(), ShellState::Initializing);
        assert_eq!(channel.send_input(b"ls\n".to_vec()).await, InputDelivery::NotReady);
    }

    #[tokio::test]
    async fn ready_precedes_output() {
        let mut fx = attached();
        fx.shell_out.write_all(b"$ ").await.unwrap();

        assert_eq!(next(&mut fx.events).await, SessionEvent::Ready);
        assert_eq!(next(&mut fx.events).await, SessionEvent::Output(b"$ ".to_vec()));
        assert_eq!(fx.channel.state(), ShellState::Attached);
    }

    #[tokio::test]
    async fn input_is_forwarded_verbatim() {
        let mut fx = attached();
        let delivery = fx.channel.send_input(b"echo hi\r".to_vec()).await;
        assert_eq!(delivery, InputDelivery::Forwarded);

        let mut buf = [0u8; 8];
        fx.shell_in.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"echo hi\r");
    }

    #[tokio::test]
    async fn close_is_idempotent_and_silences_input() {
        let mut fx = attached();
        assert!(fx.channel.close());
        assert!(!fx.channel.close());
        assert_eq!(fx.channel.state(), ShellState::Closed);
        assert_eq!(fx.channel.send_input(b"x".to_vec()).await, InputDelivery::Closed);
        assert!(!fx.channel.is_alive());

        // Attaching after close is refused
        let (a, _b) = duplex(8);
        let (_c, d) = duplex(8);
        assert!(!fx.channel.attach(ShellProcess::new(a, d)));

        // No ShellExited after a teardown close
        drop(fx.shell_out);
        while let Ok(Some(event)) = timeout(Duration::from_millis(100), fx.events.recv()).await {
            assert_ne!(event, SessionEvent::ShellExited);
        }
    }

    #[tokio::test]
    async fn process_exit_emits_shell_exited() {
        let mut fx = attached();
        assert_eq!(next(&mut fx.events).await, SessionEvent::Ready);

        drop(fx.shell_out);
        assert_eq!(next(&mut fx.events).await, SessionEvent::ShellExited);
        assert!(!fx.channel.is_alive());
        assert_eq!(fx.channel.state(), ShellState::Attached);
        assert_eq!(fx.channel.send_input(b"x".to_vec()).await, InputDelivery::Dropped);
    }

    #[tokio::test]
    async fn exit_after_subscriber_left_still_marks_dead() {
        let mut fx = attached();
        assert_eq!(next(&mut fx.events).await, SessionEvent::Ready);

        drop(fx.events);
        drop(fx.shell_out);
        timeout(Duration::from_secs(2), async {
            while fx.channel.is_alive() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("shell still alive");
        assert_eq!(fx.channel.send_input(b"x".to_vec()).await, InputDelivery::Dropped);
    }
}
