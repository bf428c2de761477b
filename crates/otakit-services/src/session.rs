//! Transport session — the protocol brain between broker and reassembler.
//!
//! A session owns the single in-flight transfer. The driver feeds it one
//! inbound publish at a time, in delivery order; the session classifies it,
//! updates state, and hands back the outcome plus at most one control
//! message for the driver to publish. The session never talks to the
//! network and never exits the process — every failure is a value.

use std::path::PathBuf;

use otakit_core::message::{classify, ControlMessage, Inbound, MessageKind};
use serde_json::Map;

use crate::reassembler::{ImageReassembler, Progress, ReassemblyError};

/// Result of feeding one inbound message to the session.
#[derive(Debug)]
pub enum Outcome {
    /// Keep polling.
    Continuing,
    /// The image was fully reassembled and written here.
    Completed(PathBuf),
    /// The transfer was aborted; the reassembler is idle again.
    Aborted(ReassemblyError),
}

/// One OTA exchange: availability request → update request → chunk stream →
/// result report → result ack.
pub struct Session {
    unique_topic: String,
    direct_flow: bool,
    reassembler: ImageReassembler,
    /// Extra keys from the publisher's job document, echoed on replies.
    job: Map<String, serde_json::Value>,
    finished: bool,
}

impl Session {
    pub fn new(
        unique_topic: impl Into<String>,
        output_path: impl Into<PathBuf>,
        direct_flow: bool,
    ) -> Self {
        Self {
            unique_topic: unique_topic.into(),
            direct_flow,
            reassembler: ImageReassembler::new(output_path),
            job: Map::new(),
            finished: false,
        }
    }

    /// The message that opens the exchange, published by the driver right
    /// after subscribing to the unique topic.
    pub fn availability_request(&self) -> ControlMessage {
        ControlMessage::new(MessageKind::RequestAvailability, self.unique_topic.clone())
    }

    /// True once the exchange is over: result acknowledged, or the
    /// publisher reported that no update exists.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn unique_topic(&self) -> &str {
        &self.unique_topic
    }

    /// Feed one inbound publish. Returns the outcome and, when the protocol
    /// calls for it, a control message the caller must publish.
    pub fn handle_message(
        &mut self,
        topic: &str,
        payload: &[u8],
    ) -> (Outcome, Option<ControlMessage>) {
        match classify(payload) {
            Ok(Inbound::Chunk(message)) => self.handle_chunk(message),
            Ok(Inbound::Control(message)) => self.handle_control(topic, message),
            Err(e) => {
                // Stray broker traffic. Reject the message, keep the session.
                tracing::warn!(topic, error = %e, "ignoring undecodable message");
                (Outcome::Continuing, None)
            }
        }
    }

    fn handle_chunk(&mut self, message: &[u8]) -> (Outcome, Option<ControlMessage>) {
        match self.reassembler.accept(message) {
            Ok(Progress::Collecting { index, total }) => {
                tracing::debug!(index, total, "collecting");
                (Outcome::Continuing, None)
            }
            Ok(Progress::Complete(path)) => {
                tracing::info!(path = %path.display(), "download complete, reporting success");
                let reply = self.reply(MessageKind::ResultSuccess);
                (Outcome::Completed(path), Some(reply))
            }
            Err(e) => {
                tracing::warn!(error = %e, "transfer aborted, reporting failure");
                let reply = self.reply(MessageKind::ResultFailure);
                (Outcome::Aborted(e), Some(reply))
            }
        }
    }

    fn handle_control(
        &mut self,
        topic: &str,
        message: ControlMessage,
    ) -> (Outcome, Option<ControlMessage>) {
        match message.kind {
            MessageKind::NoUpdate => {
                tracing::info!("publisher has no update available");
                self.finished = true;
                (Outcome::Continuing, None)
            }

            MessageKind::UpdateAvailable => {
                if !self.direct_flow && topic != self.unique_topic {
                    tracing::warn!(topic, "update-available on unexpected topic, ignoring");
                    return (Outcome::Continuing, None);
                }
                // Keep the job document so result reports carry its fields.
                self.job = message.extra.clone();
                let kind = if self.direct_flow {
                    MessageKind::RequestDirectUpdate
                } else {
                    MessageKind::RequestUpdate
                };
                tracing::info!(request = ?kind, "update available, requesting download");
                (Outcome::Continuing, Some(message.reply(kind)))
            }

            MessageKind::ResultAck => {
                tracing::info!("publisher acknowledged our result");
                self.finished = true;
                (Outcome::Continuing, None)
            }

            // Subscriber-originated kinds looped back by the broker, or a
            // misdirected publisher. Nothing to do with them here.
            MessageKind::RequestAvailability
            | MessageKind::RequestUpdate
            | MessageKind::RequestDirectUpdate
            | MessageKind::ResultSuccess
            | MessageKind::ResultFailure => {
                tracing::debug!(kind = ?message.kind, "ignoring echoed request");
                (Outcome::Continuing, None)
            }
        }
    }

    fn reply(&self, kind: MessageKind) -> ControlMessage {
        ControlMessage {
            kind,
            unique_topic: self.unique_topic.clone(),
            extra: self.job.clone(),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
