use std::{
    future::Future,
    io::ErrorKind,
    ops::Deref,
    path::{Path, PathBuf},
};

use anyhow::Result;
use chrono::{Duration, NaiveDate};
use fs4::tokio::AsyncFileExt;
use tokio::{
    fs::File,
    io::{
        AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncSeek, AsyncSeekExt, AsyncWrite,
        AsyncWriteExt, BufReader,
    },
};
use tracing::{debug, warn};

use crate::{fs::operations::seek_line_backwards, utils::time::date_to_record_name};

use super::entities::{ClassifiedIntervalEntity, ClassifiedSampleEntity};

/// Interface for the classified-interval archive. Data lives in one file per
/// day, named after the date.
pub trait ActivityStore {
    type DayFile: DayFileHandle;

    fn create_or_append_day(
        &self,
        date: NaiveDate,
    ) -> impl Future<Output = Result<Self::DayFile>>;

    fn get_data_for(
        &self,
        date: NaiveDate,
    ) -> impl Future<Output = Result<Vec<ClassifiedIntervalEntity>>> + Send;
}

impl<T: Deref> ActivityStore for T
where
    T::Target: ActivityStore,
{
    type DayFile = <T::Target as ActivityStore>::DayFile;

    fn create_or_append_day(
        &self,
        date: NaiveDate,
    ) -> impl Future<Output = Result<Self::DayFile>> {
        self.deref().create_or_append_day(date)
    }

    fn get_data_for(
        &self,
        date: NaiveDate,
    ) -> impl Future<Output = Result<Vec<ClassifiedIntervalEntity>>> + Send {
        self.deref().get_data_for(date)
    }
}

pub trait DayFileHandle {
    fn append(
        &mut self,
        samples: Vec<ClassifiedSampleEntity>,
    ) -> impl Future<Output = Result<()>>;
    fn get_date(&self) -> NaiveDate;
    fn flush(&mut self) -> impl Future<Output = Result<()>>;
}

/// The main realization of [ActivityStore].
pub struct ActivityStoreImpl {
    record_dir: PathBuf,
}

impl ActivityStoreImpl {
    pub fn new(record_dir: PathBuf) -> Result<Self, std::io::Error> {
        std::fs::create_dir_all(&record_dir)?;

        Ok(Self { record_dir })
    }

    async fn get_all_inner(&self, path: &Path) -> Result<Vec<ClassifiedIntervalEntity>> {
        async fn extract(
            path: &Path,
        ) -> std::result::Result<Vec<ClassifiedIntervalEntity>, std::io::Error> {
            debug!("Extracting {path:?}");
            let file = File::open(path).await?;
            file.lock_shared()?;
            let buffer = BufReader::new(file);
            let mut lines = buffer.lines();
            let mut intervals = vec![];
            while let Ok(Some(v)) = lines.next_line().await {
                match serde_json::from_str::<ClassifiedIntervalEntity>(&v) {
                    Ok(v) => intervals.push(v),
                    Err(e) => {
                        // ignore illegal values. Might happen after shutdowns
                        warn!(
                            "During parsing in path {:?} found illegal json string {}:  {e}",
                            path, &v
                        )
                    }
                }
            }

            lines.into_inner().into_inner().unlock_async().await?;

            Ok(intervals)
        }

        match extract(path).await {
            Ok(s) => Ok(s),
            Err(e) => {
                if e.kind() == ErrorKind::NotFound {
                    Ok(vec![])
                } else {
                    Err(e)?
                }
            }
        }
    }
}

impl ActivityStore for ActivityStoreImpl {
    type DayFile = ClassifiedDayFile<File>;

    async fn create_or_append_day(&self, date: NaiveDate) -> Result<Self::DayFile> {
        let file_name = date_to_record_name(date);
        let path = self.record_dir.join(file_name);

        let v = File::options()
            .write(true)
            .create(true)
            .read(true)
            .truncate(false)
            .open(path)
            .await?;

        Ok(ClassifiedDayFile::new(v, date))
    }

    async fn get_data_for(&self, date: NaiveDate) -> Result<Vec<ClassifiedIntervalEntity>> {
        let file_name = date_to_record_name(date);
        let path = self.record_dir.join(file_name);
        let data = self.get_all_inner(&path).await?;
        Ok(data)
    }
}

pub struct ClassifiedDayFile<F> {
    file: F,
    date: NaiveDate,
}

impl<F: AsyncSeek + AsyncRead + AsyncWrite + fs4::tokio::AsyncFileExt + Unpin> DayFileHandle
    for ClassifiedDayFile<F>
{
    async fn append(&mut self, samples: Vec<ClassifiedSampleEntity>) -> Result<()> {
        self.append_inner(samples).await
    }

    fn get_date(&self) -> NaiveDate {
        self.date
    }

    async fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

impl<F: AsyncSeek + AsyncRead + AsyncWrite + fs4::tokio::AsyncFileExt + Unpin>
    ClassifiedDayFile<F>
{
    fn new(file: F, date: NaiveDate) -> Self {
        Self { file, date }
    }

    /// Tries to read out the previous interval.
    async fn extract_line_backwards(file: &mut F) -> Result<String, anyhow::Error> {
        seek_line_backwards(file, &mut vec![0; 1024]).await?;
        let mut last_line = String::new();
        file.read_to_string(&mut last_line).await?;
        Ok(last_line)
    }

    async fn append_inner(&mut self, samples: Vec<ClassifiedSampleEntity>) -> Result<()> {
        // Semi-safe acquire-release for a file
        self.file.lock_exclusive()?;
        let result = Self::append_with_file(&mut self.file, samples).await;
        self.file.unlock_async().await?;
        result
    }

    async fn append_with_file(file: &mut F, samples: Vec<ClassifiedSampleEntity>) -> Result<()> {
        // The process of appending samples is as such.
        // 1. Get the last interval from the file.
        // 2. Collapse the interval with the added samples.
        // 3. Overwrite the last interval with its updated version and append
        //    new intervals.

        file.seek(std::io::SeekFrom::End(0)).await?;

        let last_line = Self::extract_line_backwards(file).await?;

        file.seek(std::io::SeekFrom::Current(-(last_line.len() as i64)))
            .await?;

        file.stream_position().await?;

        let last_interval: Option<ClassifiedIntervalEntity> = if last_line.is_empty() {
            None
        } else {
            match serde_json::from_str::<ClassifiedIntervalEntity>(&last_line) {
                Ok(v) => Some(v),
                Err(e) => {
                    // Might happen due to shutdown cutting off the write.
                    warn!("Last interval was corrupted {e}");
                    None
                }
            }
        };

        let collapsed = collapse_samples(last_interval, samples);

        let mut buffer = Vec::<u8>::new();
        for interval in collapsed {
            serde_json::to_writer(&mut buffer, &interval)?;
            buffer.push(b'\n');
        }

        file.write_all(&buffer).await?;
        file.flush().await?;
        Ok(())
    }
}

/// Value used to bridge the gap between sampling ticks. There should be a
/// limit, though, so that a sample from an hour ago doesn't get merged with a
/// fresh one.
const MAX_MERGE_GAP: Duration = Duration::seconds(2);

/// Creates an optimal sequence of intervals out of classified samples.
fn collapse_samples(
    last_interval: Option<ClassifiedIntervalEntity>,
    samples: impl IntoIterator<Item = ClassifiedSampleEntity>,
) -> Vec<ClassifiedIntervalEntity> {
    let mut intervals = Vec::new();
    if let Some(last) = last_interval {
        intervals.push(last);
    }

    for sample in samples {
        let sample_end = sample.moment + sample.duration;
        match intervals.last_mut() {
            Some(interval)
                if interval.same_activity(&sample)
                    && sample.moment - interval.end() < MAX_MERGE_GAP =>
            {
                interval.set_end(sample_end)
            }
            Some(previous) if sample.moment - previous.end() < MAX_MERGE_GAP => {
                let mut next: ClassifiedIntervalEntity = sample.into();
                next.start = previous.end();
                next.set_end(sample_end);
                intervals.push(next);
            }
            Some(_) | None => {
                intervals.push(sample.into());
            }
        }
    }

    intervals
}
