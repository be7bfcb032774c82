use std::{sync::Arc, time::Duration};

use anyhow::Result;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info_span, Instrument};

use crate::{
    storage::{entities::ClassifiedSampleEntity, rule_store::RuleStore},
    utils::clock::Clock,
};

use super::{
    matcher::{classify, record_domain},
    probe::ActivityProbe,
};

/// Polls the activity probe on a fixed cadence and classifies every record
/// before handing it downstream. Classification is pure, so reprocessing the
/// same record always yields the same verdict.
pub struct SamplerModule {
    next: mpsc::Sender<ClassifiedSampleEntity>,
    probe: Box<dyn ActivityProbe>,
    rules: Arc<dyn RuleStore>,
    user_id: Arc<str>,
    shutdown: CancellationToken,
    sampling_interval: Duration,
    time_provider: Box<dyn Clock>,
}

impl SamplerModule {
    pub fn new(
        next: mpsc::Sender<ClassifiedSampleEntity>,
        probe: Box<dyn ActivityProbe>,
        rules: Arc<dyn RuleStore>,
        user_id: Arc<str>,
        shutdown: CancellationToken,
        sampling_interval: Duration,
        time_provider: Box<dyn Clock>,
    ) -> Self {
        Self {
            next,
            probe,
            rules,
            user_id,
            shutdown,
            sampling_interval,
            time_provider,
        }
    }

    async fn collect_samples(&mut self) -> Result<Vec<ClassifiedSampleEntity>> {
        let records = self.probe.poll().await?;
        if records.is_empty() {
            return Ok(vec![]);
        }

        // Rules are reloaded per poll so edits apply without a restart.
        let rules = self.rules.list(&self.user_id).await?;

        Ok(records
            .into_iter()
            .map(|record| {
                let verdict = classify(&record, &rules);
                let domain = record_domain(&record);
                ClassifiedSampleEntity {
                    title: record.title.clone(),
                    owner_name: record.owner_name.clone(),
                    domain: domain.into(),
                    rating: verdict.rating,
                    rule_id: verdict.matched.map(|rule| rule.id),
                    moment: record.timestamp,
                    duration: chrono::Duration::seconds(record.duration_seconds),
                }
            })
            .collect())
    }

    /// Executes the sampling event loop.
    pub async fn run(mut self) -> Result<()> {
        let mut collection_point = self.time_provider.instant();
        loop {
            collection_point += self.sampling_interval;

            match self.collect_samples().await {
                Ok(samples) => {
                    for sample in samples {
                        let span = info_span!("Processing classified sample");
                        debug!("Sending sample {:?}", sample);
                        self.next
                            .send(sample)
                            .instrument(span)
                            .await
                            .inspect_err(|e| error!("Unexpected error during sending {e:?}"))?;
                    }
                }
                Err(e) => {
                    // A missed sample is absent data, never an error state.
                    error!("Encountered an error during sampling {:?}", e)
                }
            }

            tokio::select! {
                // Cancellation stops the event loop. That also drops the
                // sender channel and consequently stops the processing module.
                _ = self.shutdown.cancelled() => {
                    return Ok(())
                }
                _ = self.time_provider.sleep_until(collection_point) => ()
            }
        }
    }
}
