use std::{collections::HashMap, fmt::Display, future, sync::Arc};

use ansi_term::Colour;
use anyhow::Result;
use chrono::{DateTime, Duration, Local, NaiveDate, Utc};
use chrono_english::parse_date_string;
use clap::{CommandFactory, ValueEnum};
use futures::{stream, Stream, StreamExt};
use now::DateTimeNow;
use tracing::error;

use crate::{
    engine::{
        category::{build_report, CategoryReport},
        rules::Rating,
    },
    storage::{
        activity_store::{ActivityStore, ActivityStoreImpl},
        category_store::{CategoryIndex, CategoryStore},
        entities::ClassifiedIntervalEntity,
    },
    utils::{
        dir::create_application_default_path,
        percentage::{duration_percentage, Percentage},
        time::{format_duration, next_day_start},
    },
};

use super::Args;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum DateStyle {
    Uk,
    Us,
}

impl From<DateStyle> for chrono_english::Dialect {
    fn from(value: DateStyle) -> Self {
        match value {
            DateStyle::Uk => Self::Uk,
            DateStyle::Us => Self::Us,
        }
    }
}

impl Display for DateStyle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DateStyle::Uk => write!(f, "uk"),
            DateStyle::Us => write!(f, "us"),
        }
    }
}

#[derive(Debug, clap::Args)]
pub struct ReportCommand {
    #[arg(
        long = "start",
        short,
        help = "Start of the range. Examples are \"yesterday\", \"1 hour ago\", \"15/03/2025\", \"12:00 16/03/2025\". Defaults to the start of today"
    )]
    start_date: Option<String>,
    #[arg(
        long = "end",
        short,
        help = "End of the range. Same formats as --start. Defaults to now"
    )]
    end_date: Option<String>,
    #[arg(long, default_value_t = DateStyle::Uk, help = "Style of dates used during parsing. For Uk it's day/month/year. For Us it's month/day/year")]
    date_style: DateStyle,
    #[arg(
        long = "days",
        default_value_t = false,
        help = "Take inputs as whole days. For example if start and end are both 15/03/2025 this option allows to report on the whole day"
    )]
    treat_as_days: bool,
    #[arg(short = 'p', long = "percentage", help = "Filter categories to have at least specified percentage", default_value_t = Percentage::new_opt(1.).unwrap())]
    min_percentage: Percentage,
}

/// Command that aggregates classified intervals from `start_date` to
/// `end_date` into the category tree plus verdict totals.
pub async fn process_report_command(
    ReportCommand {
        start_date,
        end_date,
        date_style,
        treat_as_days,
        min_percentage,
    }: ReportCommand,
) -> Result<()> {
    let (start, end) = parse_range(start_date, end_date, date_style, treat_as_days)?;

    let dir = create_application_default_path()?;
    let storage = ActivityStoreImpl::new(dir.join("records"))?;

    let results = extract_between(
        storage,
        ExtractConfig {
            start: start.into(),
            end: end.into(),
        },
    );
    let totals = accumulate(results).await?;

    let index = CategoryIndex::load(&CategoryStore::new(dir)?).await?;
    print_report(&totals, &index, min_percentage);
    Ok(())
}

fn parse_range(
    start_date: Option<String>,
    end_date: Option<String>,
    date_style: DateStyle,
    treat_as_days: bool,
) -> Result<(DateTime<Local>, DateTime<Local>)> {
    let now = Local::now();
    let dialect: chrono_english::Dialect = date_style.into();

    let mut start = match start_date.map(|s| parse_date_string(&s, now, dialect)) {
        Some(Ok(v)) => v.with_timezone(&Local),
        Some(Err(e)) => {
            return Err(Args::command()
                .error(
                    clap::error::ErrorKind::ValueValidation,
                    format!("Failed to validate start date {e}"),
                )
                .into());
        }
        None => now.beginning_of_day(),
    };
    let mut end = match end_date.map(|s| parse_date_string(&s, now, dialect)) {
        Some(Ok(v)) => v.with_timezone(&Local),
        Some(Err(e)) => {
            return Err(Args::command()
                .error(
                    clap::error::ErrorKind::ValueValidation,
                    format!("Failed to validate end date {e}"),
                )
                .into());
        }
        None => now,
    };
    if treat_as_days {
        start = start.beginning_of_day();
        end = next_day_start(end);
    }
    Ok((start, end))
}

pub struct ExtractConfig {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl ExtractConfig {
    fn filter(&self, entity: ClassifiedIntervalEntity) -> Option<ClassifiedIntervalEntity> {
        entity.clamp(self.start, self.end)
    }
}

/// Extracts [ClassifiedIntervalEntity] between 2 dates. To do it in an
/// efficient manner streams are used.
pub fn extract_between(
    storage: impl ActivityStore + Send + Sync + 'static,
    config: ExtractConfig,
) -> impl Stream<Item = Result<ClassifiedIntervalEntity>> {
    let storage = Arc::new(storage);
    let start = config.start;
    let end = config.end;

    let date_iteration = date_range(start.date_naive(), end.date_naive());

    let files = date_iteration
        .map(move |day| {
            let storage = storage.clone();
            async move { (day, storage.get_data_for(day).await) }
        })
        .buffered(4);

    files
        .flat_map(|(day, data)| match data {
            Ok(data) => stream::iter(data).map(Ok).boxed(),
            Err(e) => {
                error!("Failed to process file {day} {e}");
                stream::once(future::ready(Err(e))).boxed()
            }
        })
        .filter_map(move |v| future::ready(v.map(|v| config.filter(v)).transpose()))
}

/// Returns a stream of dates between start (inclusive) and end (inclusive).
fn date_range(start: NaiveDate, end: NaiveDate) -> impl Stream<Item = NaiveDate> {
    stream::unfold((start, end), |(mut current, end)| {
        future::ready({
            if current <= end {
                let last_current = current;
                current = current.succ_opt().expect("End of time should never happen");
                Some((last_current, (current, end)))
            } else {
                None
            }
        })
    })
}

#[derive(Default)]
struct ReportTotals {
    by_signature: HashMap<Arc<str>, Duration>,
    productive: Duration,
    distracting: Duration,
    unclassified: Duration,
}

impl ReportTotals {
    fn whole(&self) -> Duration {
        self.productive + self.distracting + self.unclassified
    }
}

async fn accumulate(
    results: impl Stream<Item = Result<ClassifiedIntervalEntity>>,
) -> Result<ReportTotals> {
    let mut totals = ReportTotals::default();
    futures::pin_mut!(results);
    while let Some(interval) = results.next().await {
        let interval = interval?;
        *totals
            .by_signature
            .entry(interval.signature())
            .or_insert_with(Duration::zero) += interval.duration;
        match interval.rating {
            Some(Rating::Productive) => totals.productive += interval.duration,
            Some(Rating::Distracting) => totals.distracting += interval.duration,
            None => totals.unclassified += interval.duration,
        }
    }
    Ok(totals)
}

fn print_report(totals: &ReportTotals, index: &CategoryIndex, min_percentage: Percentage) {
    let whole = totals.whole();
    if whole.is_zero() {
        println!("No activity in the requested range");
        return;
    }

    let entries = totals
        .by_signature
        .iter()
        .map(|(signature, duration)| (index.path_for_signature(signature), *duration))
        .collect::<Vec<_>>();
    let report = build_report(entries);

    print_nodes(&report, whole, min_percentage, 0);

    println!();
    println!(
        "{} {}\t{} {}\t{} {}",
        Colour::Green.paint("productive"),
        format_duration(totals.productive),
        Colour::Red.paint("distracting"),
        format_duration(totals.distracting),
        "unclassified",
        format_duration(totals.unclassified),
    );
}

fn print_nodes(nodes: &[CategoryReport], whole: Duration, min_percentage: Percentage, depth: usize) {
    for node in nodes {
        let share = duration_percentage(node.total, whole);
        if share < min_percentage {
            continue;
        }
        println!(
            "{}{}\t{}\t{}%",
            "  ".repeat(depth),
            node.name,
            format_duration(node.total),
            *share as i32,
        );
        print_nodes(&node.children, whole, min_percentage, depth + 1);
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use futures::StreamExt;
    use tempfile::tempdir;

    use crate::storage::{
        activity_store::DayFileHandle, entities::ClassifiedSampleEntity,
    };

    use super::*;

    fn sample(title: &str, domain: &str, offset: i64, seconds: i64) -> ClassifiedSampleEntity {
        ClassifiedSampleEntity {
            title: title.into(),
            owner_name: "Google Chrome".into(),
            domain: domain.into(),
            rating: Some(Rating::Distracting),
            rule_id: Some(1),
            moment: Utc.timestamp_opt(1_600_000_000 + offset, 0).unwrap(),
            duration: Duration::seconds(seconds),
        }
    }

    #[tokio::test]
    async fn test_extract_between_clamps_to_the_range() -> Result<()> {
        let dir = tempdir()?;
        let storage = ActivityStoreImpl::new(dir.path().to_owned())?;

        let start = Utc.timestamp_opt(1_600_000_000, 0).unwrap();
        let mut day = storage.create_or_append_day(start.date_naive()).await?;
        day.append(vec![sample("a", "youtube.com", 0, 100)]).await?;

        let results = extract_between(
            storage,
            ExtractConfig {
                start: start + Duration::seconds(30),
                end: start + Duration::seconds(60),
            },
        );
        let collected = results.collect::<Vec<_>>().await;
        assert_eq!(collected.len(), 1);
        let interval = collected.into_iter().next().unwrap()?;
        assert_eq!(interval.duration, Duration::seconds(30));
        Ok(())
    }

    #[tokio::test]
    async fn test_accumulate_groups_by_signature() -> Result<()> {
        let intervals = vec![
            Ok(ClassifiedIntervalEntity::from(sample(
                "a",
                "youtube.com",
                0,
                60,
            ))),
            Ok(ClassifiedIntervalEntity::from(sample(
                "b",
                "youtube.com",
                100,
                30,
            ))),
            Ok(ClassifiedIntervalEntity::from(sample(
                "c",
                "reddit.com",
                200,
                10,
            ))),
        ];
        let totals = accumulate(stream::iter(intervals)).await?;
        assert_eq!(
            totals.by_signature.get("youtube.com"),
            Some(&Duration::seconds(90))
        );
        assert_eq!(totals.distracting, Duration::seconds(100));
        assert_eq!(totals.whole(), Duration::seconds(100));
        Ok(())
    }
}
