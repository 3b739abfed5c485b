//! Seal candidate publisher for the approval collection module
use crate::approval_collector::SealObserver;
use caryatid_sdk::Context;
use sealing_common::{
    messages::{Message, SealCandidateMessage, SealingMessage},
    SealCandidate,
};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info};

/// Observer queueing seal candidates for async publishing
pub struct SealCandidatePublisher {
    sender: mpsc::UnboundedSender<SealCandidate>,
}

impl SealCandidatePublisher {
    /// Create the publisher and the receiving end of its queue
    pub fn new() -> (Self, mpsc::UnboundedReceiver<SealCandidate>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl SealObserver for SealCandidatePublisher {
    fn seal_candidate(&self, candidate: SealCandidate) {
        if self.sender.send(candidate).is_err() {
            error!("Seal candidate queue closed");
        }
    }
}

/// Publish queued seal candidates until the queue closes
pub async fn publish_seal_candidates(
    context: Arc<Context<Message>>,
    topic: String,
    mut receiver: mpsc::UnboundedReceiver<SealCandidate>,
) {
    while let Some(candidate) = receiver.recv().await {
        info!(
            "Publishing seal candidate for result {} in block {}",
            candidate.incorporated_result.result_id(),
            candidate.incorporated_result.incorporated_block_id
        );
        let message = Message::Sealing(SealingMessage::SealCandidate(SealCandidateMessage {
            candidate,
        }));
        context
            .message_bus
            .publish(&topic, Arc::new(message))
            .await
            .unwrap_or_else(|e| error!("Failed to publish seal candidate: {e}"));
    }
}
