//! Sealing node approval collection module for Caryatid.
//! Collects signed chunk approvals for incorporated execution results across
//! competing forks, prunes forks which lose finalization, and re-requests
//! missing approvals with backoff.

pub mod approval_cache;
pub mod approval_collector;
pub mod assignment_collector;
pub mod chain_view;
pub mod chunk_assigner;
pub mod collaborators;
pub mod collector_error;
pub mod configuration;
pub mod height_index;
pub mod request_publisher;
pub mod request_tracker;
pub mod seal_publisher;
pub mod signature;
pub mod state;

#[cfg(test)]
mod test_collaborators;

use anyhow::Result;
use caryatid_sdk::{module, Context, Module, Subscription};
use config::Config;
use sealing_common::messages::{Message, SealingMessage};
use std::sync::Arc;
use tracing::{error, info, info_span, warn, Instrument};

use crate::approval_collector::ChunkApprovalCollectorFactory;
use crate::chain_view::ChainView;
use crate::chunk_assigner::PublicChunkAssigner;
use crate::collaborators::Collaborators;
use crate::collector_error::CollectorError;
use crate::configuration::ApprovalCollectionConfig;
use crate::request_publisher::BusRequestConduit;
use crate::seal_publisher::{publish_seal_candidates, SealCandidatePublisher};
use crate::signature::Ed25519SignatureVerifier;
use crate::state::State;

// Subscription topics
const DEFAULT_BLOCKS_SUBSCRIBE_TOPIC: (&str, &str) =
    ("blocks-subscribe-topic", "sealing.block.header");
const DEFAULT_VERIFIERS_SUBSCRIBE_TOPIC: (&str, &str) =
    ("verifiers-subscribe-topic", "sealing.epoch.verifiers");
const DEFAULT_INCORPORATED_RESULTS_SUBSCRIBE_TOPIC: (&str, &str) =
    ("incorporated-results-subscribe-topic", "sealing.result.incorporated");
const DEFAULT_APPROVALS_SUBSCRIBE_TOPIC: (&str, &str) =
    ("approvals-subscribe-topic", "sealing.approval");
const DEFAULT_FINALIZED_SUBSCRIBE_TOPIC: (&str, &str) =
    ("finalized-subscribe-topic", "sealing.block.finalized");
const DEFAULT_CLOCK_TICK_SUBSCRIBE_TOPIC: (&str, &str) =
    ("clock-tick-subscribe-topic", "clock.tick");

// Publish topics
const DEFAULT_APPROVAL_REQUESTS_PUBLISH_TOPIC: (&str, &str) =
    ("approval-requests-publish-topic", "sealing.approval.request");
const DEFAULT_SEAL_CANDIDATES_PUBLISH_TOPIC: (&str, &str) =
    ("seal-candidates-publish-topic", "sealing.seal.candidate");

/// Approval collection module
#[module(
    message_type(Message),
    name = "approval-collection",
    description = "Chunk approval collection for incorporated execution results"
)]
pub struct ApprovalCollection;

impl ApprovalCollection {
    /// Record blocks and verifier sets in the chain view
    async fn run_chain_view(
        chain_view: Arc<ChainView>,
        mut subscription: Box<dyn Subscription<Message>>,
    ) -> Result<()> {
        loop {
            let (_, message) = subscription.read().await?;
            match message.as_ref() {
                Message::Sealing(SealingMessage::BlockHeader(header)) => {
                    chain_view.record_block(header.block.clone());
                }
                Message::Sealing(SealingMessage::EpochVerifiers(verifiers)) => {
                    info!(
                        "Epoch {}: {} verifiers",
                        verifiers.epoch,
                        verifiers.verifiers.len()
                    );
                    chain_view.record_epoch_verifiers(verifiers.epoch, verifiers.verifiers.clone());
                }
                other => error!("Unexpected message on chain view subscription: {other:?}"),
            }
        }
    }

    async fn run_incorporated_results(
        state: Arc<State>,
        chain_view: Arc<ChainView>,
        mut subscription: Box<dyn Subscription<Message>>,
    ) -> Result<()> {
        loop {
            let (_, message) = subscription.read().await?;
            let Message::Sealing(SealingMessage::IncorporatedResult(incorporated)) =
                message.as_ref()
            else {
                error!("Unexpected message on incorporated results subscription: {message:?}");
                continue;
            };

            let span = info_span!(
                "approval_collection.incorporated",
                block = %incorporated.block.id,
                height = incorporated.block.height
            );
            async {
                chain_view.record_block(incorporated.block.clone());
                state.handle_incorporated_result(&incorporated.incorporated_result).await
            }
            .instrument(span)
            .await
            .or_else(log_unless_fatal)?;
        }
    }

    async fn run_approvals(
        state: Arc<State>,
        mut subscription: Box<dyn Subscription<Message>>,
    ) -> Result<()> {
        loop {
            let (_, message) = subscription.read().await?;
            let Message::Sealing(SealingMessage::Approval(approval)) = message.as_ref() else {
                error!("Unexpected message on approvals subscription: {message:?}");
                continue;
            };

            let span = info_span!(
                "approval_collection.approval",
                chunk = approval.approval.chunk_index()
            );
            state.handle_approval(&approval.approval).instrument(span).await.or_else(log_unless_fatal)?;
        }
    }

    async fn run_finalized(
        state: Arc<State>,
        mut subscription: Box<dyn Subscription<Message>>,
    ) -> Result<()> {
        loop {
            let (_, message) = subscription.read().await?;
            let Message::Sealing(SealingMessage::BlockFinalized(finalized)) = message.as_ref() else {
                error!("Unexpected message on finalized subscription: {message:?}");
                continue;
            };

            let span = info_span!("approval_collection.finalized", height = finalized.height);
            state
                .handle_block_finalized(&finalized.block_id, finalized.height)
                .instrument(span)
                .await;
        }
    }

    /// Sweep for missing approvals on every clock tick
    async fn run_requests(
        state: Arc<State>,
        mut subscription: Box<dyn Subscription<Message>>,
    ) -> Result<()> {
        loop {
            let (_, message) = subscription.read().await?;
            if let Message::Clock(tick) = message.as_ref() {
                let span = info_span!("approval_collection.tick", number = tick.number);
                state.request_missing_approvals().instrument(span).await?;
            }
        }
    }

    /// Main init function
    pub async fn init(&self, context: Arc<Context<Message>>, config: Arc<Config>) -> Result<()> {
        fn get_string_flag(config: &Config, key: (&str, &str)) -> String {
            config.get_string(key.0).unwrap_or_else(|_| key.1.to_string())
        }

        let blocks_topic = get_string_flag(&config, DEFAULT_BLOCKS_SUBSCRIBE_TOPIC);
        info!("Creating blocks subscriber on '{blocks_topic}'");

        let verifiers_topic = get_string_flag(&config, DEFAULT_VERIFIERS_SUBSCRIBE_TOPIC);
        info!("Creating verifiers subscriber on '{verifiers_topic}'");

        let incorporated_topic = get_string_flag(&config, DEFAULT_INCORPORATED_RESULTS_SUBSCRIBE_TOPIC);
        info!("Creating incorporated results subscriber on '{incorporated_topic}'");

        let approvals_topic = get_string_flag(&config, DEFAULT_APPROVALS_SUBSCRIBE_TOPIC);
        info!("Creating approvals subscriber on '{approvals_topic}'");

        let finalized_topic = get_string_flag(&config, DEFAULT_FINALIZED_SUBSCRIBE_TOPIC);
        info!("Creating finalized blocks subscriber on '{finalized_topic}'");

        let clock_tick_topic = get_string_flag(&config, DEFAULT_CLOCK_TICK_SUBSCRIBE_TOPIC);
        info!("Creating clock tick subscriber on '{clock_tick_topic}'");

        let requests_topic = get_string_flag(&config, DEFAULT_APPROVAL_REQUESTS_PUBLISH_TOPIC);
        info!("Publishing approval requests on '{requests_topic}'");

        let seal_candidates_topic = get_string_flag(&config, DEFAULT_SEAL_CANDIDATES_PUBLISH_TOPIC);
        info!("Publishing seal candidates on '{seal_candidates_topic}'");

        let engine_config = ApprovalCollectionConfig::from_config(&config);
        info!("{engine_config:?}");

        // Collaborators
        let chain_view = Arc::new(ChainView::new());
        let (seal_publisher, seal_candidates) = SealCandidatePublisher::new();
        let collaborators = Collaborators {
            assigner: Arc::new(PublicChunkAssigner::new(
                chain_view.clone(),
                engine_config.chunk_alpha,
            )),
            heights: chain_view.clone(),
            verifiers: chain_view.clone(),
            signature_verifier: Arc::new(Ed25519SignatureVerifier),
            collector_factory: Arc::new(ChunkApprovalCollectorFactory::new(
                engine_config.required_approvals,
                Arc::new(seal_publisher),
            )),
            conduit: Arc::new(BusRequestConduit::new(context.clone(), requests_topic)),
        };
        let state = Arc::new(State::new(engine_config, collaborators));

        // Subscribe
        let blocks_subscription = context.subscribe(&blocks_topic).await?;
        let verifiers_subscription = context.subscribe(&verifiers_topic).await?;
        let incorporated_subscription = context.subscribe(&incorporated_topic).await?;
        let approvals_subscription = context.subscribe(&approvals_topic).await?;
        let finalized_subscription = context.subscribe(&finalized_topic).await?;
        let clock_subscription = context.subscribe(&clock_tick_topic).await?;

        context.run(publish_seal_candidates(
            context.clone(),
            seal_candidates_topic,
            seal_candidates,
        ));

        let view = chain_view.clone();
        context.run(async move {
            Self::run_chain_view(view, blocks_subscription)
                .await
                .unwrap_or_else(|e| error!("Blocks failed: {e}"));
        });

        let view = chain_view.clone();
        context.run(async move {
            Self::run_chain_view(view, verifiers_subscription)
                .await
                .unwrap_or_else(|e| error!("Verifiers failed: {e}"));
        });

        let run_state = state.clone();
        context.run(async move {
            Self::run_incorporated_results(run_state, chain_view, incorporated_subscription)
                .await
                .unwrap_or_else(|e| error!("Incorporated results failed: {e}"));
        });

        let run_state = state.clone();
        context.run(async move {
            Self::run_approvals(run_state, approvals_subscription)
                .await
                .unwrap_or_else(|e| error!("Approvals failed: {e}"));
        });

        let run_state = state.clone();
        context.run(async move {
            Self::run_finalized(run_state, finalized_subscription)
                .await
                .unwrap_or_else(|e| error!("Finalized blocks failed: {e}"));
        });

        context.run(async move {
            Self::run_requests(state, clock_subscription)
                .await
                .unwrap_or_else(|e| error!("Approval requests failed: {e}"));
        });

        Ok(())
    }
}

/// Rejected input is logged and skipped, fatal errors end the task
fn log_unless_fatal(error: CollectorError) -> Result<(), CollectorError> {
    if error.is_fatal() {
        return Err(error);
    }
    warn!("{error}");
    Ok(())
}
