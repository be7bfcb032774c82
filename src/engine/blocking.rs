//! Decides when a distracting activity should raise a blocking prompt.
//! Debouncing is explicit state (a last-prompt timestamp per activity
//! signature) plus a pure predicate, independent of runtime timers.

use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
    time::Duration as StdDuration,
};

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::rules::Rating;

pub const DEFAULT_DEBOUNCE: Duration = Duration::seconds(60);
pub const PROMPT_TIMEOUT: StdDuration = StdDuration::from_secs(30);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockPromptRequest {
    /// Domain for browser activity, lowercased application name otherwise.
    pub signature: Arc<str>,
    pub reason: Arc<str>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BlockResponse {
    AllowOnce,
    Block,
    Acknowledge,
}

/// Outbound round-trip to whatever surface renders blocking prompts. The
/// engine only raises the prompt and records the answer; enforcement is the
/// caller's business.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BlockPrompter: Send + Sync + 'static {
    async fn prompt(&self, request: BlockPromptRequest) -> Result<BlockResponse>;
}

/// Prompter used when no interactive surface is attached to the daemon. The
/// prompt is logged and immediately acknowledged.
pub struct LogPrompter;

#[async_trait]
impl BlockPrompter for LogPrompter {
    async fn prompt(&self, request: BlockPromptRequest) -> Result<BlockResponse> {
        info!(
            "Focus session interrupted by {} ({})",
            request.signature, request.reason
        );
        Ok(BlockResponse::Acknowledge)
    }
}

pub struct BlockingCoordinator {
    debounce: Duration,
    last_prompt: HashMap<Arc<str>, DateTime<Utc>>,
    allowed_once: HashSet<Arc<str>>,
}

impl BlockingCoordinator {
    pub fn new(debounce: Duration) -> Self {
        Self {
            debounce,
            last_prompt: HashMap::new(),
            allowed_once: HashSet::new(),
        }
    }

    /// Returns a prompt request when a distracting activity should interrupt
    /// the user. Sampling ticks for the same ongoing distraction inside the
    /// debounce window stay silent.
    pub fn on_activity_classified(
        &mut self,
        signature: &Arc<str>,
        reason: &str,
        rating: Option<Rating>,
        is_focus_mode_active: bool,
        blocking_enabled: bool,
        now: DateTime<Utc>,
    ) -> Option<BlockPromptRequest> {
        if rating != Some(Rating::Distracting) || !is_focus_mode_active || !blocking_enabled {
            return None;
        }
        if !self.should_prompt(signature, now) {
            return None;
        }

        self.last_prompt.insert(signature.clone(), now);
        Some(BlockPromptRequest {
            signature: signature.clone(),
            reason: reason.into(),
        })
    }

    /// Pure debounce predicate: a prompt goes out when the signature isn't
    /// allow-listed for this session and no prompt for it is inside the
    /// debounce window.
    pub fn should_prompt(&self, signature: &Arc<str>, now: DateTime<Utc>) -> bool {
        if self.allowed_once.contains(signature) {
            return false;
        }
        match self.last_prompt.get(signature) {
            Some(last) => now - *last >= self.debounce,
            None => true,
        }
    }

    pub fn record_response(&mut self, signature: &Arc<str>, response: BlockResponse) {
        info!("Blocking prompt for {signature} answered with {response:?}");
        if response == BlockResponse::AllowOnce {
            self.allowed_once.insert(signature.clone());
        }
    }

    /// Forgets session-scoped decisions. Called when a new focus session
    /// starts.
    pub fn reset(&mut self) {
        self.last_prompt.clear();
        self.allowed_once.clear();
    }
}

impl Default for BlockingCoordinator {
    fn default() -> Self {
        Self::new(DEFAULT_DEBOUNCE)
    }
}

/// Runs the prompt round-trip with a fail-open timeout: an unreachable or
/// silent surface counts as an acknowledgement so the user is never stalled.
pub async fn prompt_with_timeout(
    prompter: &dyn BlockPrompter,
    request: BlockPromptRequest,
) -> BlockResponse {
    match tokio::time::timeout(PROMPT_TIMEOUT, prompter.prompt(request.clone())).await {
        Ok(Ok(response)) => response,
        Ok(Err(e)) => {
            warn!("Blocking prompt for {} failed: {e:?}", request.signature);
            BlockResponse::Acknowledge
        }
        Err(_) => {
            warn!("Blocking prompt for {} timed out", request.signature);
            BlockResponse::Acknowledge
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn coordinator() -> BlockingCoordinator {
        BlockingCoordinator::new(Duration::seconds(60))
    }

    fn at(offset: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_600_000_000 + offset, 0).unwrap()
    }

    #[test]
    fn test_sustained_distraction_prompts_once_within_debounce() {
        let mut coordinator = coordinator();
        let signature: Arc<str> = "youtube.com".into();

        let mut prompts = 0;
        for tick in 0..5 {
            if coordinator
                .on_activity_classified(
                    &signature,
                    "YouTube",
                    Some(Rating::Distracting),
                    true,
                    true,
                    at(tick * 5),
                )
                .is_some()
            {
                prompts += 1;
            }
        }
        assert_eq!(prompts, 1);

        // Past the debounce window the prompt fires again.
        assert!(coordinator
            .on_activity_classified(
                &signature,
                "YouTube",
                Some(Rating::Distracting),
                true,
                true,
                at(61),
            )
            .is_some());
    }

    #[test]
    fn test_prompt_requires_focus_blocking_and_distraction() {
        let mut coordinator = coordinator();
        let signature: Arc<str> = "youtube.com".into();

        let cases = [
            (Some(Rating::Productive), true, true),
            (None, true, true),
            (Some(Rating::Distracting), false, true),
            (Some(Rating::Distracting), true, false),
        ];
        for (rating, focus, blocking) in cases {
            assert!(coordinator
                .on_activity_classified(&signature, "x", rating, focus, blocking, at(0))
                .is_none());
        }
    }

    #[test]
    fn test_allow_once_silences_signature_until_reset() {
        let mut coordinator = coordinator();
        let signature: Arc<str> = "youtube.com".into();

        coordinator.record_response(&signature, BlockResponse::AllowOnce);
        assert!(!coordinator.should_prompt(&signature, at(1_000_000)));

        coordinator.reset();
        assert!(coordinator.should_prompt(&signature, at(1_000_000)));
    }

    #[test]
    fn test_independent_signatures_prompt_independently() {
        let mut coordinator = coordinator();
        let videos: Arc<str> = "youtube.com".into();
        let social: Arc<str> = "reddit.com".into();

        assert!(coordinator
            .on_activity_classified(&videos, "a", Some(Rating::Distracting), true, true, at(0))
            .is_some());
        assert!(coordinator
            .on_activity_classified(&social, "b", Some(Rating::Distracting), true, true, at(1))
            .is_some());
    }

    #[tokio::test]
    async fn test_prompt_round_trip_fails_open() {
        let mut prompter = MockBlockPrompter::new();
        prompter
            .expect_prompt()
            .returning(|_| Err(anyhow::anyhow!("surface is gone")));

        let response = prompt_with_timeout(
            &prompter,
            BlockPromptRequest {
                signature: "youtube.com".into(),
                reason: "YouTube".into(),
            },
        )
        .await;
        assert_eq!(response, BlockResponse::Acknowledge);
    }
}
