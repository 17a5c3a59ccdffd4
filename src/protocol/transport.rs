//! The blocking point-to-point transport the recursion protocol runs over,
//! and an in-process implementation built on channels.
//!
//! Delivery is blocking and ordered per sender. There is no timeout: a task
//! waiting on a peer that never answers waits forever, exactly as the
//! protocol expects. The channel implementation does report a peer that has
//! gone away entirely as `RhsegError::Transport`.

use std::sync::mpsc::{channel, Receiver, Sender};

use crate::error::RhsegError;
use crate::protocol::request::Envelope;

/// A task's endpoint on the message fabric.
pub trait Transport {
    fn task_id(&self) -> u32;

    /// Delivers `envelope` to task `to`.
    fn send(&mut self, to: u32, envelope: Envelope) -> Result<(), RhsegError>;

    /// Blocks until the next envelope addressed to this task arrives.
    fn receive(&mut self) -> Result<Envelope, RhsegError>;
}

/// An endpoint of a `ChannelNetwork`. Envelopes travel as encoded frames, so
/// the in-process path exercises the same framing as a real link.
pub struct ChannelTransport {
    task_id: u32,
    /// One sender per peer; `None` at this task's own slot.
    peers: Vec<Option<Sender<Vec<u8>>>>,
    inbox: Receiver<Vec<u8>>,
}

impl ChannelTransport {
    pub fn nb_tasks(&self) -> usize {
        self.peers.len()
    }
}

impl Transport for ChannelTransport {
    fn task_id(&self) -> u32 {
        self.task_id
    }

    fn send(&mut self, to: u32, envelope: Envelope) -> Result<(), RhsegError> {
        let peer = self
            .peers
            .get(to as usize)
            .and_then(Option::as_ref)
            .ok_or_else(|| {
                RhsegError::Transport(format!("task {} has no link to task {}", self.task_id, to))
            })?;
        let frame = envelope.to_bytes()?;
        peer.send(frame).map_err(|_| {
            RhsegError::Transport(format!("task {} is no longer receiving", to))
        })
    }

    fn receive(&mut self) -> Result<Envelope, RhsegError> {
        let frame = self.inbox.recv().map_err(|_| {
            RhsegError::Transport(format!("every peer of task {} has shut down", self.task_id))
        })?;
        let envelope = Envelope::from_bytes(&frame)?;
        if envelope.to != self.task_id {
            return Err(RhsegError::Protocol(format!(
                "task {} received an envelope addressed to task {}",
                self.task_id, envelope.to
            )));
        }
        Ok(envelope)
    }
}

/// Builds fully connected sets of channel endpoints.
pub struct ChannelNetwork;

impl ChannelNetwork {
    /// `n` endpoints; endpoint `i` has task id `i`.
    pub fn endpoints(n: usize) -> Vec<ChannelTransport> {
        let (senders, inboxes): (Vec<_>, Vec<_>) = (0..n).map(|_| channel::<Vec<u8>>()).unzip();
        inboxes
            .into_iter()
            .enumerate()
            .map(|(id, inbox)| ChannelTransport {
                task_id: id as u32,
                peers: senders
                    .iter()
                    .enumerate()
                    .map(|(peer, tx)| (peer != id).then(|| tx.clone()))
                    .collect(),
                inbox,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Dimensionality, FeatureFlags};
    use crate::protocol::request::RequestKind;
    use crate::records::layout::RecordLayout;

    fn layout() -> RecordLayout {
        RecordLayout::new(Dimensionality::One, 1, FeatureFlags::default())
    }

    #[test]
    fn test_endpoints_deliver_in_order() {
        let mut endpoints = ChannelNetwork::endpoints(3);
        let mut receiver = endpoints.remove(2);
        let sender = &mut endpoints[0];
        for level in 0..3 {
            let env = Envelope::new(RequestKind::Ack, 0, 2, level, &layout());
            sender.send(2, env).unwrap();
        }
        for level in 0..3 {
            let env = receiver.receive().unwrap();
            assert_eq!(env.from, 0);
            assert_eq!(env.level, level);
        }
    }

    #[test]
    fn test_cannot_send_to_self_or_unknown_task() {
        let mut endpoints = ChannelNetwork::endpoints(2);
        let env = Envelope::new(RequestKind::Ack, 0, 0, 0, &layout());
        assert!(matches!(
            endpoints[0].send(0, env.clone()),
            Err(RhsegError::Transport(_))
        ));
        assert!(matches!(endpoints[0].send(5, env), Err(RhsegError::Transport(_))));
    }

    #[test]
    fn test_receive_fails_once_all_peers_are_gone() {
        let mut endpoints = ChannelNetwork::endpoints(2);
        let mut last = endpoints.remove(0);
        drop(endpoints);
        assert!(matches!(last.receive(), Err(RhsegError::Transport(_))));
        assert_eq!(last.nb_tasks(), 2);
    }

    #[test]
    fn test_misaddressed_envelope_is_a_protocol_error() {
        let mut endpoints = ChannelNetwork::endpoints(2);
        let env = Envelope::new(RequestKind::Ack, 0, 7, 0, &layout());
        endpoints[0].send(1, env).unwrap();
        assert!(matches!(endpoints[1].receive(), Err(RhsegError::Protocol(_))));
    }
}
