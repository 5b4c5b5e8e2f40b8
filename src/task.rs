//! The task record that threads all stages together.

use crate::error::PipelineError;
use crate::pipeline::status::TaskStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::ops::RangeInclusive;

/// One document submission and its progress through the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    /// Unique, immutable identifier assigned at submission.
    pub reference_key: String,
    pub status: TaskStatus,
    /// Why the last failure status was written, when one was.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<FailureReason>,
    /// Artifact key of the uploaded document.
    pub source_location: String,
    pub language: String,
    pub page_range: PageRange,
    pub owner: String,
    pub display_name: String,
    pub created_at: DateTime<Utc>,
    /// Advisory retention deadline consumed by an external reaper.
    pub expires_at: DateTime<Utc>,
}

impl TaskRecord {
    /// Check the invariants a stage relies on before doing any work.
    pub fn validate(&self) -> Result<(), PipelineError> {
        let invalid = |detail: &str| PipelineError::InvalidTaskRecord {
            reference_key: self.reference_key.clone(),
            detail: detail.to_string(),
        };
        if self.expires_at <= self.created_at {
            return Err(invalid("expires_at must be after created_at"));
        }
        if self.source_location.is_empty() {
            return Err(invalid("source_location is empty"));
        }
        if self.language.trim().is_empty() {
            return Err(invalid("language is empty"));
        }
        PageRange::new(self.page_range.start, self.page_range.end)
            .map_err(|e| invalid(&e.to_string()))?;
        Ok(())
    }
}

/// Persisted cause of a failure status.
///
/// "No inputs found" and "every input failed" end in the same status value;
/// this field keeps them apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureReason {
    /// The stage found nothing to process.
    NoInputs,
    /// Inputs existed but every one of them failed.
    AllItemsFailed,
    /// The trigger or the task metadata was unusable.
    InputFault,
    /// An external job failed or exceeded its deadline.
    ExternalJob,
    /// The artifact store or status store failed.
    Storage,
}

impl FailureReason {
    pub fn as_str(self) -> &'static str {
        match self {
            FailureReason::NoInputs => "no-inputs",
            FailureReason::AllItemsFailed => "all-items-failed",
            FailureReason::InputFault => "input-fault",
            FailureReason::ExternalJob => "external-job",
            FailureReason::Storage => "storage",
        }
    }
}

/// Inclusive, 1-based range of pages to narrate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRange {
    pub start: u32,
    pub end: u32,
}

impl PageRange {
    pub fn new(start: u32, end: u32) -> Result<Self, PipelineError> {
        if start < 1 {
            return Err(PipelineError::InvalidSubmission(format!(
                "pages are 1-indexed, minimum is 1 (got {start})"
            )));
        }
        if start > end {
            return Err(PipelineError::InvalidSubmission(format!(
                "invalid page range '{start}-{end}': start must be <= end"
            )));
        }
        Ok(Self { start, end })
    }

    /// Split the range into the pages that exist in a `total`-page document
    /// and the tail, if any, that lies beyond its end.
    ///
    /// The existing part never holds more than `total` pages, however far
    /// past the end the request reaches.
    pub fn clip(&self, total: u32) -> (RangeInclusive<u32>, Option<PageRange>) {
        let present = self.start..=self.end.min(total);
        let beyond = (self.end > total).then(|| PageRange {
            start: self.start.max(total.saturating_add(1)),
            end: self.end,
        });
        (present, beyond)
    }
}

impl std::str::FromStr for PageRange {
    type Err = PipelineError;

    /// Parse `"5"` or `"3-15"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let parse = |v: &str| {
            v.trim()
                .parse::<u32>()
                .map_err(|_| PipelineError::InvalidSubmission(format!("invalid page number '{v}'")))
        };
        match s.split_once('-') {
            Some((start, end)) => PageRange::new(parse(start)?, parse(end)?),
            None => {
                let page = parse(s)?;
                PageRange::new(page, page)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn record() -> TaskRecord {
        let now = Utc::now();
        TaskRecord {
            reference_key: "r1".into(),
            status: TaskStatus::Submitted,
            failure_reason: None,
            source_location: "upload/r1/doc.pdf".into(),
            language: "english".into(),
            page_range: PageRange { start: 1, end: 3 },
            owner: "a@example.com".into(),
            display_name: "doc.pdf".into(),
            created_at: now,
            expires_at: now + Duration::weeks(1),
        }
    }

    #[test]
    fn valid_record_passes() {
        assert!(record().validate().is_ok());
    }

    #[test]
    fn expiry_must_follow_creation() {
        let mut r = record();
        r.expires_at = r.created_at;
        assert!(matches!(
            r.validate(),
            Err(PipelineError::InvalidTaskRecord { .. })
        ));
    }

    #[test]
    fn inverted_page_range_is_invalid() {
        let mut r = record();
        r.page_range = PageRange { start: 4, end: 2 };
        assert!(r.validate().is_err());
    }

    #[test]
    fn clip_separates_missing_pages() {
        let range = PageRange::new(3, 7).unwrap();
        assert_eq!(range.clip(5), (3..=5, Some(PageRange { start: 6, end: 7 })));
        assert_eq!(range.clip(10), (3..=7, None));

        let (present, beyond) = PageRange::new(5, 8).unwrap().clip(2);
        assert_eq!(present.count(), 0);
        assert_eq!(beyond, Some(PageRange { start: 5, end: 8 }));
    }

    #[test]
    fn clip_is_bounded_by_the_document() {
        let (present, beyond) = PageRange::new(1, 4_000_000_000).unwrap().clip(5);
        assert_eq!(present, 1..=5);
        assert_eq!(
            beyond,
            Some(PageRange {
                start: 6,
                end: 4_000_000_000
            })
        );
        assert_eq!(PageRange::new(1, u32::MAX).unwrap().clip(u32::MAX).1, None);
    }

    #[test]
    fn parse_single_and_range() {
        assert_eq!("4".parse::<PageRange>().unwrap(), PageRange { start: 4, end: 4 });
        assert_eq!(" 2-9 ".parse::<PageRange>().unwrap(), PageRange { start: 2, end: 9 });
        assert!("0-3".parse::<PageRange>().is_err());
        assert!("x".parse::<PageRange>().is_err());
    }

    #[test]
    fn failure_reason_serialises_kebab_case() {
        let json = serde_json::to_string(&FailureReason::AllItemsFailed).unwrap();
        assert_eq!(json, format!("\"{}\"", FailureReason::AllItemsFailed.as_str()));
    }
}
