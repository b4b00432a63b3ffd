use spop::{Action, AgentAck, FrameId, Scope, StreamId, Typed};
use tokio::sync::oneshot;

/// The write half of a NOTIFY/ACK round trip for a single `(stream-id,
/// frame-id)`.
///
/// A handler accumulates proxy-bound variables on its `Acker` and drops it
/// (or calls [`Acker::complete`] explicitly) when done; `Drop` always
/// completes the paired oneshot, so a handler that panics or returns early
/// still yields an ACK instead of silently starving the proxy. Ported from
/// the teacher's own `msgs.rs::Acker` against the new `spop` KV/action API.
#[derive(Debug)]
pub struct Acker(Option<Inner>);

#[derive(Debug)]
struct Inner(AgentAck, oneshot::Sender<AgentAck>);

impl Drop for Acker {
    fn drop(&mut self) {
        self.complete();
    }
}

impl Acker {
    pub fn new(stream_id: StreamId, frame_id: FrameId) -> (Self, oneshot::Receiver<AgentAck>) {
        let (sender, receiver) = oneshot::channel();

        (
            Acker(Some(Inner(AgentAck::new(stream_id, frame_id), sender))),
            receiver,
        )
    }

    /// Sends the accumulated ACK. A no-op if already completed or aborted.
    pub fn complete(&mut self) {
        if let Some(Inner(ack, sender)) = self.0.take() {
            let _ = sender.send(ack);
        }
    }

    /// Sends the ACK with the ABORT flag set, discarding any actions
    /// accumulated so far.
    pub fn abort(&mut self) {
        if let Some(Inner(mut ack, sender)) = self.0.take() {
            ack.aborted = true;
            ack.actions.clear();
            let _ = sender.send(ack);
        }
    }

    pub fn set_var<S: Into<String>, V: Into<Typed>>(&mut self, scope: Scope, name: S, value: V) {
        if let Some(Inner(ref mut ack, _)) = self.0 {
            ack.actions.push(Action::set_var(scope, name, value));
        }
    }

    pub fn unset_var<S: Into<String>>(&mut self, scope: Scope, name: S) {
        if let Some(Inner(ref mut ack, _)) = self.0 {
            ack.actions.push(Action::unset_var(scope, name));
        }
    }
}
