use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use spop::{haproxy, AgentAck, BufCodec, Disconnect, Frame, Framer};

use crate::acker::Acker;
use crate::dispatch::Dispatch;
use crate::error::{Context as _, Error, Result};
use crate::handshake::{Handshaked, Handshaking};

/// How long a connection waits, once draining, for handlers already in
/// flight to finish before it gives up and closes anyway.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// How many NOTIFY frames may be dispatched concurrently before the reader
/// stops pulling new frames off the socket, back-pressuring HAProxy via TCP.
const MAX_PENDING_NOTIFY: usize = 64;

/// The connection's position in the handshake/serve/shutdown lifecycle.
///
/// `INIT → HELLO-SENT → READY → DRAINING → CLOSED`, generalized from the
/// teacher's own two-state `Connecting`/`Processing` split into the full
/// five states this protocol's lifecycle needs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum State {
    Init,
    HelloSent,
    Ready,
    Draining,
    Closed,
}

/// One TCP connection from HAProxy, driving the SPOP handshake and then
/// pipelined NOTIFY/ACK exchange against a [`Dispatch`].
///
/// A single task owns the socket's read side; each NOTIFY is dispatched to
/// its own spawned task so handlers may complete out of order, while ACKs
/// are written back serially by this same task as they complete. Grounded
/// in the teacher's `msgs.rs` `Acker`/`Processor` split, reworked from
/// unbounded mpsc fan-in into a `JoinSet` so back-pressure falls out of a
/// bounded `Semaphore` instead of an unbounded channel.
pub struct Connection<IO, D> {
    codec: BufCodec<IO>,
    dispatch: Arc<D>,
    state: State,
    handshaked: Option<Handshaked>,
    inflight: JoinSet<AgentAck>,
    permits: Arc<Semaphore>,
    draining_deadline: Option<Instant>,
    shutdown: CancellationToken,
    max_frame_size: u32,
}

impl<IO, D> Connection<IO, D>
where
    IO: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    D: Dispatch,
{
    pub fn new(stream: IO, dispatch: Arc<D>, shutdown: CancellationToken, max_frame_size: u32) -> Self {
        Connection {
            codec: BufCodec::buffered(stream, Framer::new(max_frame_size)),
            dispatch,
            state: State::Init,
            handshaked: None,
            inflight: JoinSet::new(),
            permits: Arc::new(Semaphore::new(MAX_PENDING_NOTIFY)),
            draining_deadline: None,
            shutdown,
            max_frame_size,
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// Drives the connection to completion: handshake, then serve until
    /// DRAINING empties out or a fatal error closes the socket early.
    pub async fn serve(mut self) {
        if let Err(err) = self.run().await {
            debug!(?err, "connection closed");
        }
    }

    async fn run(&mut self) -> Result<()> {
        self.handshake().await?;

        while self.state != State::Closed {
            self.tick().await?;
        }

        Ok(())
    }

    async fn handshake(&mut self) -> Result<()> {
        let hello = match self.codec.read_frame().await.context("read HAPROXY-HELLO")? {
            Frame::HaproxyHello(hello) => hello,
            _ => return self.fail(spop::Error::Invalid, "expected HAPROXY-HELLO").await,
        };

        let handshaking = Handshaking {
            max_frame_size: self.max_frame_size,
            ..Handshaking::default()
        };

        let handshaked = match handshaking.handshake(hello) {
            Ok(handshaked) => handshaked,
            Err(status) => return self.fail(status, status.to_string()).await,
        };

        self.codec
            .write_frame(Frame::AgentHello(handshaked.agent_hello()))
            .await
            .context("write AGENT-HELLO")?;
        self.state = State::HelloSent;

        if handshaked.healthcheck {
            let _ = self
                .codec
                .write_frame(Frame::AgentDisconnect(Disconnect::new(
                    spop::Error::Normal,
                    "healthcheck",
                )))
                .await;
            self.state = State::Closed;
            return Ok(());
        }

        self.handshaked = Some(handshaked);
        self.state = State::Ready;

        Ok(())
    }

    /// One iteration of the serve loop: wait on whichever of "shutdown
    /// requested", "a handler finished", or "a new frame arrived" is
    /// relevant to the current state.
    async fn tick(&mut self) -> Result<()> {
        tokio::select! {
            biased;

            _ = self.shutdown.cancelled(), if self.state == State::Ready => {
                self.begin_draining(spop::Error::Normal, "agent shutting down").await?;
            }

            Some(joined) = self.inflight.join_next(), if !self.inflight.is_empty() => {
                match joined {
                    Ok(ack) => {
                        self.codec.write_frame(Frame::AgentAck(ack)).await.context("write ACK")?;
                    }
                    Err(err) => warn!(?err, "notify handler task did not complete"),
                }

                if self.state == State::Draining && self.inflight.is_empty() {
                    self.state = State::Closed;
                }
            }

            _ = tokio::time::sleep_until(self.draining_deadline.unwrap_or_else(Instant::now)), if self.state == State::Draining => {
                warn!(pending = self.inflight.len(), "drain deadline exceeded, closing with handlers outstanding");
                self.state = State::Closed;
            }

            frame = self.codec.read_frame(), if self.state == State::Ready => {
                match frame {
                    Ok(Frame::HaproxyNotify(notify)) => self.handle_notify(notify).await?,
                    Ok(Frame::HaproxyDisconnect(_)) => self.peer_disconnected(),
                    Ok(_) => return self.fail(spop::Error::Invalid, "unexpected frame in READY").await,
                    Err(status) => return self.fail(status, status.to_string()).await,
                }
            }
        }

        Ok(())
    }

    fn peer_disconnected(&mut self) {
        self.state = State::Draining;
        self.draining_deadline = Some(Instant::now() + DRAIN_TIMEOUT);

        if self.inflight.is_empty() {
            self.state = State::Closed;
        }
    }

    async fn begin_draining(&mut self, status: spop::Error, message: &str) -> Result<()> {
        self.codec
            .write_frame(Frame::AgentDisconnect(Disconnect::new(status, message)))
            .await
            .context("write AGENT-DISCONNECT")?;

        self.state = State::Draining;
        self.draining_deadline = Some(Instant::now() + DRAIN_TIMEOUT);

        if self.inflight.is_empty() {
            self.state = State::Closed;
        }

        Ok(())
    }

    /// Sends an AGENT-DISCONNECT carrying `status`/`message` and tears the
    /// connection down. Used for protocol errors that are fatal per the
    /// codec's own contract (short frame, bad type, oversize, bad version).
    async fn fail(&mut self, status: spop::Error, message: impl Into<String>) -> Result<()> {
        let _ = self
            .codec
            .write_frame(Frame::AgentDisconnect(Disconnect::new(status, message.into())))
            .await;
        self.state = State::Closed;

        Err(Error::Status(status))
    }

    /// Dispatches one NOTIFY frame. Frames carrying the ABORT flag are
    /// dropped without dispatch or ACK, per the protocol's fragmentation
    /// recovery contract.
    async fn handle_notify(&mut self, notify: haproxy::Notify) -> Result<()> {
        if notify.aborted {
            return Ok(());
        }

        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| Error::Closed)?;

        let dispatch = Arc::clone(&self.dispatch);
        let stream_id = notify.stream_id;
        let frame_id = notify.frame_id;
        let messages = notify.messages;

        self.inflight.spawn(async move {
            let _permit = permit;
            let (mut acker, receiver) = Acker::new(stream_id, frame_id);

            for message in &messages {
                let result = match message.name.as_str() {
                    "coraza-req" => dispatch.dispatch_request(message, &mut acker),
                    "coraza-res" => dispatch.dispatch_response(message, &mut acker),
                    name => {
                        debug!(name, "ignoring unrecognized message");
                        continue;
                    }
                };

                if let Err(err) = result {
                    warn!(?err, stream_id, frame_id, "message dispatch failed");
                }
            }

            acker.complete();
            receiver.await.unwrap_or_else(|_| AgentAck::new(stream_id, frame_id))
        });

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use spop::{Capability, Message, Version};
    use tokio::io::duplex;

    use super::*;
    use crate::dispatch::DispatchError;

    struct EchoDispatch;

    impl Dispatch for EchoDispatch {
        fn dispatch_request(&self, _message: &Message, acker: &mut Acker) -> std::result::Result<(), DispatchError> {
            acker.set_var(spop::Scope::Transaction, "id", "ABCDEFGHIJKLMNOP");
            Ok(())
        }

        fn dispatch_response(&self, _message: &Message, _acker: &mut Acker) -> std::result::Result<(), DispatchError> {
            Ok(())
        }
    }

    fn hello() -> haproxy::Hello {
        haproxy::Hello {
            supported_versions: vec![Version::V2_0],
            max_frame_size: 1024,
            capabilities: vec![Capability::Pipelining],
            healthcheck: None,
            engine_id: None,
        }
    }

    #[tokio::test]
    async fn handshake_without_healthcheck_enters_ready() {
        let (client, server) = duplex(4096);

        let conn = Connection::new(server, Arc::new(EchoDispatch), CancellationToken::new(), spop::MAX_FRAME_SIZE as u32);
        let handle = tokio::spawn(async move {
            let mut conn = conn;
            conn.handshake().await.unwrap();
            conn.state()
        });

        let mut codec = BufCodec::buffered(client, Framer::new(spop::MAX_FRAME_SIZE as u32));
        codec.write_frame(Frame::HaproxyHello(hello())).await.unwrap();
        let reply = codec.read_frame().await.unwrap();
        assert!(matches!(reply, Frame::AgentHello(_)));

        assert_eq!(handle.await.unwrap(), State::Ready);
    }

    #[tokio::test]
    async fn healthcheck_hello_closes_after_disconnect() {
        let (client, server) = duplex(4096);

        let mut healthcheck_hello = hello();
        healthcheck_hello.healthcheck = Some(true);

        let conn = Connection::new(server, Arc::new(EchoDispatch), CancellationToken::new(), spop::MAX_FRAME_SIZE as u32);
        let handle = tokio::spawn(async move {
            let mut conn = conn;
            conn.handshake().await.unwrap();
            conn.state()
        });

        let mut codec = BufCodec::buffered(client, Framer::new(spop::MAX_FRAME_SIZE as u32));
        codec.write_frame(Frame::HaproxyHello(healthcheck_hello)).await.unwrap();
        let _agent_hello = codec.read_frame().await.unwrap();
        let disconnect = codec.read_frame().await.unwrap();
        assert!(matches!(disconnect, Frame::AgentDisconnect(_)));

        assert_eq!(handle.await.unwrap(), State::Closed);
    }

    #[tokio::test]
    async fn notify_round_trips_an_ack() {
        let (client, server) = duplex(8192);

        let conn = Connection::new(server, Arc::new(EchoDispatch), CancellationToken::new(), spop::MAX_FRAME_SIZE as u32);
        let handle = tokio::spawn(conn.serve());

        let mut codec = BufCodec::buffered(client, Framer::new(spop::MAX_FRAME_SIZE as u32));
        codec.write_frame(Frame::HaproxyHello(hello())).await.unwrap();
        let _agent_hello = codec.read_frame().await.unwrap();

        let request = Message::builder("coraza-req")
            .arg("app", "site-a")
            .arg("method", "GET")
            .build();
        codec.write_frame(Frame::notify(1, 1, vec![request])).await.unwrap();

        let ack = codec.read_frame().await.unwrap();
        let ack = ack.try_unwrap_agent_ack().expect("expected AGENT-ACK");
        assert_eq!(ack.stream_id, 1);
        assert_eq!(ack.frame_id, 1);
        assert_eq!(ack.actions.len(), 1);

        codec
            .write_frame(Frame::HaproxyDisconnect(Disconnect::new(spop::Error::Normal, "bye")))
            .await
            .unwrap();

        handle.await.unwrap();
    }

    #[tokio::test]
    async fn aborted_notify_is_dropped_without_ack() {
        let (client, server) = duplex(4096);

        let conn = Connection::new(server, Arc::new(EchoDispatch), CancellationToken::new(), spop::MAX_FRAME_SIZE as u32);
        let handle = tokio::spawn(conn.serve());

        let mut codec = BufCodec::buffered(client, Framer::new(spop::MAX_FRAME_SIZE as u32));
        codec.write_frame(Frame::HaproxyHello(hello())).await.unwrap();
        let _agent_hello = codec.read_frame().await.unwrap();

        let request = Message::builder("coraza-req").arg("app", "site-a").build();
        let mut notify = match Frame::notify(1, 1, vec![request]) {
            Frame::HaproxyNotify(notify) => notify,
            _ => unreachable!(),
        };
        notify.aborted = true;
        codec.write_frame(Frame::HaproxyNotify(notify)).await.unwrap();

        codec
            .write_frame(Frame::HaproxyDisconnect(Disconnect::new(spop::Error::Normal, "bye")))
            .await
            .unwrap();

        // No ACK was ever spawned for the aborted frame, so the next thing
        // on the wire is the connection closing, not an AGENT-ACK.
        assert!(codec.read_frame().await.is_err());

        handle.await.unwrap();
    }
}
