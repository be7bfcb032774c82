use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::Result;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::{
    storage::{
        activity_store::ActivityStoreImpl, entities::ClassifiedSampleEntity,
        entry_store::TimeEntryStoreImpl, rule_store::{RuleStore, RuleStoreImpl},
    },
    utils::clock::{Clock, SystemClock},
};

use blocking::{BlockPrompter, BlockingCoordinator, LogPrompter};
use probe::{ActivityProbe, FeedProbe};
use processor::{EngineProcessor, ProcessingModule};
use sampler::SamplerModule;
use session::{
    broadcast::SessionBroadcaster,
    entry::{SessionEvent, SessionPhase},
    machine::{SessionMachine, StartOptions},
};

pub mod args;
pub mod blocking;
pub mod category;
pub mod domain;
pub mod error;
pub mod matcher;
pub mod probe;
pub mod processor;
pub mod rules;
pub mod sampler;
pub mod session;
pub mod shutdown;

const DEFAULT_SAMPLING_INTERVAL: Duration = Duration::from_secs(5);

/// Single-machine deployments run everything under one user.
pub const DEFAULT_USER: &str = "local";

#[derive(Debug, Clone, Default)]
pub struct EngineOptions {
    /// Start a focus session as soon as the engine is up. Without an IPC
    /// surface this is the only way the daemon opens one itself.
    pub start_focus_session: bool,
    pub focus_description: Option<Arc<str>>,
    pub focus_target_seconds: Option<i64>,
    pub blocking_enabled: bool,
}

/// Represents the starting point for the engine daemon.
pub async fn start_engine(dir: PathBuf, options: EngineOptions) -> Result<()> {
    std::env::set_current_dir("/")?;

    let clock = Arc::new(SystemClock);
    let rules: Arc<dyn RuleStore> = Arc::new(RuleStoreImpl::new(dir.clone(), clock.clone())?);
    let entries = Arc::new(TimeEntryStoreImpl::new(dir.clone())?);

    let broadcaster = Arc::new(SessionBroadcaster::new());
    let machine = Arc::new(SessionMachine::new(
        entries,
        clock.clone(),
        broadcaster.clone(),
        DEFAULT_USER.into(),
    ));

    if let Some(recovered) = machine.recover().await? {
        warn!(
            "Found an open time entry {:?} from a previous run, waiting for resume or complete",
            recovered.time_entry_id
        );
    }
    if options.start_focus_session {
        match machine
            .start(StartOptions {
                description: options.focus_description.clone(),
                target_duration_seconds: options.focus_target_seconds,
                is_focus_mode: true,
                ..Default::default()
            })
            .await
        {
            Ok(snapshot) => info!("Opened focus session {:?}", snapshot.time_entry_id),
            Err(e) => warn!("Could not open a focus session: {e:?}"),
        }
    }

    let (sender, receiver) = mpsc::channel::<ClassifiedSampleEntity>(10);
    let shutdown_token = CancellationToken::new();

    let sampler = create_sampler(
        sender,
        FeedProbe::new(dir.join("feed.jsonl")),
        rules,
        &shutdown_token,
        DEFAULT_SAMPLING_INTERVAL,
        SystemClock,
    );
    let processor = create_processor(
        dir.join("records"),
        receiver,
        SystemClock,
        machine.clone(),
        Arc::new(LogPrompter),
        options.blocking_enabled,
    )?;

    let (_, _, sampling_result, processing_result) = tokio::join!(
        shutdown::detect_shutdown(shutdown_token.clone()),
        observe_sessions(broadcaster, shutdown_token.clone()),
        sampler.run(),
        processor.run(),
    );

    if let Err(sampling_result) = sampling_result {
        error!("Sampling module got an error {:?}", sampling_result);
    }

    if let Err(processing_result) = processing_result {
        error!("Processing module got an error {:?}", processing_result);
    }

    // A session the daemon opened itself has nobody left to close it.
    if options.start_focus_session && machine.snapshot().await.phase != SessionPhase::Idle {
        match machine.complete().await {
            Ok(entry) => info!("Closed focus session {} on shutdown", entry.id),
            Err(e) => error!("Could not close the focus session on shutdown: {e:?}"),
        }
    }

    Ok(())
}

fn create_sampler(
    sender: mpsc::Sender<ClassifiedSampleEntity>,
    probe: impl ActivityProbe,
    rules: Arc<dyn RuleStore>,
    shutdown_token: &CancellationToken,
    sampling_interval: Duration,
    clock: impl Clock,
) -> SamplerModule {
    SamplerModule::new(
        sender,
        Box::new(probe),
        rules,
        DEFAULT_USER.into(),
        shutdown_token.clone(),
        sampling_interval,
        Box::new(clock),
    )
}

fn create_processor(
    record_dir: PathBuf,
    receiver: mpsc::Receiver<ClassifiedSampleEntity>,
    clock: impl Clock,
    machine: Arc<SessionMachine>,
    prompter: Arc<dyn BlockPrompter>,
    blocking_enabled: bool,
) -> Result<ProcessingModule<EngineProcessor<ActivityStoreImpl>>, anyhow::Error> {
    let storage = ActivityStoreImpl::new(record_dir)?;
    let processor = EngineProcessor::new(
        storage,
        Box::new(clock),
        machine,
        BlockingCoordinator::default(),
        prompter,
        blocking_enabled,
    );
    Ok(ProcessingModule::new(receiver, processor))
}

/// Logs every session transition. Also the reference observer: it reconciles
/// through a fresh subscribe whenever it falls behind the event stream.
async fn observe_sessions(broadcaster: Arc<SessionBroadcaster>, shutdown: CancellationToken) {
    let (snapshot, mut receiver) = broadcaster.subscribe();
    info!("Session state at startup: {:?}", snapshot.phase);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return,
            event = receiver.recv() => match event {
                Ok(SessionEvent::Running { snapshot }) => {
                    info!("Session running, {}s elapsed", snapshot.elapsed_seconds)
                }
                Ok(SessionEvent::Paused { snapshot }) => {
                    info!(
                        "Session paused, {}s elapsed, requires resume: {}",
                        snapshot.elapsed_seconds, snapshot.requires_resume
                    )
                }
                Ok(SessionEvent::Completed { entry }) => {
                    info!("Session {} completed", entry.id)
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                    // Dropped events are only recoverable through the
                    // authoritative snapshot.
                    warn!("Session observer lagged by {missed} events, reconciling");
                    let (snapshot, fresh) = broadcaster.subscribe();
                    info!("Session state after reconciliation: {:?}", snapshot.phase);
                    receiver = fresh;
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => return,
            }
        }
    }
}
