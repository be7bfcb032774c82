use std::sync::Arc;

use anyhow::Result;
use tokio::sync::mpsc::Receiver;
use tracing::{debug, error, info};

use crate::{
    engine::domain::activity_signature,
    storage::{
        activity_store::{ActivityStore, DayFileHandle},
        entities::ClassifiedSampleEntity,
    },
    utils::clock::Clock,
};

use super::{
    blocking::{prompt_with_timeout, BlockPrompter, BlockingCoordinator},
    session::{entry::SessionPhase, machine::SessionMachine},
};

/// Represents a consumer of classified samples. Abstracts over the real
/// processor so the pipeline can be tested with a recording stub.
pub trait SampleProcessor {
    fn process_next(
        &mut self,
        sample: ClassifiedSampleEntity,
    ) -> impl std::future::Future<Output = Result<()>>;

    fn finalize(&mut self) -> impl std::future::Future<Output = Result<()>>;
}

/// Drains the sampler channel and hands every sample to the processor.
pub struct ProcessingModule<Processor> {
    receiver: Receiver<ClassifiedSampleEntity>,
    processor: Processor,
}

impl<P: SampleProcessor> ProcessingModule<P> {
    pub fn new(receiver: Receiver<ClassifiedSampleEntity>, processor: P) -> Self {
        Self {
            receiver,
            processor,
        }
    }

    pub async fn run(mut self) -> Result<()> {
        while let Some(sample) = self.receiver.recv().await {
            debug!("Processing sample {:?}", sample);
            match self.processor.process_next(sample.clone()).await {
                Ok(_) => {
                    info!("Processed sample {:?}", sample)
                }
                Err(e) => {
                    error!("Error processing sample {:?}: {e:?}", sample)
                }
            }
        }

        let result = self.processor.finalize().await;
        self.receiver.close();
        result
    }
}

/// The daemon's processor: archives samples into day files and raises
/// blocking prompts for distracting activity during focus sessions.
pub struct EngineProcessor<S: ActivityStore> {
    activity_store: S,
    current_handle: Option<S::DayFile>,
    date_provider: Box<dyn Clock>,
    machine: Arc<SessionMachine>,
    coordinator: BlockingCoordinator,
    prompter: Arc<dyn BlockPrompter>,
    blocking_enabled: bool,
    observed_entry: Option<Arc<str>>,
}

impl<S: ActivityStore> EngineProcessor<S> {
    pub fn new(
        activity_store: S,
        date_provider: Box<dyn Clock>,
        machine: Arc<SessionMachine>,
        coordinator: BlockingCoordinator,
        prompter: Arc<dyn BlockPrompter>,
        blocking_enabled: bool,
    ) -> Self {
        Self {
            activity_store,
            current_handle: None,
            date_provider,
            machine,
            coordinator,
            prompter,
            blocking_enabled,
            observed_entry: None,
        }
    }

    async fn move_file_handle(&mut self) -> Result<S::DayFile> {
        let current_file = self.current_handle.take();
        let now = self.date_provider.time().date_naive();

        match current_file {
            Some(mut file) if file.get_date() != now => {
                file.flush().await?;
            }
            Some(v) => return Ok(v),
            None => {}
        };
        self.activity_store.create_or_append_day(now).await
    }

    async fn evaluate_blocking(&mut self, sample: &ClassifiedSampleEntity) -> Result<()> {
        let snapshot = self.machine.snapshot().await;
        // Allow-once decisions live for one session. A different open entry
        // means a new session started since the last sample.
        if snapshot.time_entry_id != self.observed_entry {
            self.coordinator.reset();
            self.observed_entry = snapshot.time_entry_id.clone();
        }
        let focus_active = snapshot.phase == SessionPhase::Running && snapshot.is_focus_mode;

        let signature = activity_signature(&sample.owner_name, &sample.domain);
        let Some(request) = self.coordinator.on_activity_classified(
            &signature,
            &sample.title,
            sample.rating,
            focus_active,
            self.blocking_enabled,
            self.date_provider.time(),
        ) else {
            return Ok(());
        };

        info!("Raising blocking prompt for {}", request.signature);
        let response = prompt_with_timeout(self.prompter.as_ref(), request).await;
        self.coordinator.record_response(&signature, response);
        Ok(())
    }
}

impl<S: ActivityStore> SampleProcessor for EngineProcessor<S> {
    async fn process_next(&mut self, sample: ClassifiedSampleEntity) -> Result<()> {
        let mut active_file = self.move_file_handle().await?;
        active_file.append(vec![sample.clone()]).await?;
        self.current_handle = Some(active_file);

        self.evaluate_blocking(&sample).await
    }

    async fn finalize(&mut self) -> Result<()> {
        if let Some(v) = self.current_handle.as_mut() {
            v.flush().await?;
        }
        Ok(())
    }
}
