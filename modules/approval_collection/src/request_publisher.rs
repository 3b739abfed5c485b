//! Approval request publisher for the approval collection module
use crate::collaborators::RequestConduit;
use anyhow::Result;
use async_trait::async_trait;
use caryatid_sdk::Context;
use sealing_common::{
    messages::{ApprovalRequestMessage, Message, SealingMessage},
    ApprovalRequest, Identifier,
};
use std::sync::Arc;
use tracing::debug;

/// Conduit publishing approval requests on the message bus
pub struct BusRequestConduit {
    /// Module context
    context: Arc<Context<Message>>,

    /// Topic to publish on
    topic: String,
}

impl BusRequestConduit {
    pub fn new(context: Arc<Context<Message>>, topic: String) -> Self {
        Self { context, topic }
    }
}

#[async_trait]
impl RequestConduit for BusRequestConduit {
    async fn publish(&self, request: &ApprovalRequest, recipients: &[Identifier]) -> Result<()> {
        debug!(
            "Requesting approvals for chunk {} of result {} from {} verifiers",
            request.chunk_index,
            request.result_id,
            recipients.len()
        );
        let message = Message::Sealing(SealingMessage::ApprovalRequest(ApprovalRequestMessage {
            request: request.clone(),
            recipients: recipients.to_vec(),
        }));
        self.context.message_bus.publish(&self.topic, Arc::new(message)).await
    }
}
