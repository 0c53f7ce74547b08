//! Segmenter: slices an ordered record stream into segments.
//!
//! A split happens, in order of evaluation, when at least one record is
//! buffered and (1) the temporal gap to the previous record reaches
//! `gap_seconds`, (2) the app changes, or (3) the buffer reaches
//! `max_records`. The remaining buffer is only emitted on an explicit
//! [`Segmenter::flush`].

use mimic_core::model::{parse_timestamp, ActionStep, CaptureRecord, Segment};
use uuid::Uuid;

/// Default temporal gap for workflow extraction.
pub const EXTRACTION_GAP_SECONDS: i64 = 30;
/// Default buffer cap for workflow extraction.
pub const EXTRACTION_MAX_RECORDS: usize = 100;

/// Streaming segment builder.
#[derive(Debug)]
pub struct Segmenter {
    gap_seconds: i64,
    max_records: usize,
    buffer: Vec<CaptureRecord>,
    current_app: String,
}

impl Segmenter {
    /// Creates a segmenter with the given split bounds.
    #[must_use]
    pub fn new(gap_seconds: i64, max_records: usize) -> Self {
        Self { gap_seconds, max_records, buffer: Vec::new(), current_app: String::new() }
    }

    /// Feeds one record; returns a finished segment when a split fires.
    pub fn add_record(&mut self, record: CaptureRecord) -> Option<Segment> {
        let app_name = record.app.name.clone();
        let mut finished = None;

        if !self.buffer.is_empty() {
            let mut should_split = false;

            if let (Some(prev), Some(curr)) = (
                self.buffer.last().and_then(|r| parse_timestamp(&r.timestamp)),
                parse_timestamp(&record.timestamp),
            ) {
                if (curr - prev).num_seconds() >= self.gap_seconds {
                    should_split = true;
                }
            }
            if app_name != self.current_app {
                should_split = true;
            }
            if self.buffer.len() >= self.max_records {
                should_split = true;
            }

            if should_split {
                finished = Some(build_segment(std::mem::take(&mut self.buffer)));
            }
        }

        self.buffer.push(record);
        self.current_app = app_name;
        finished
    }

    /// Emits whatever is buffered, if anything.
    pub fn flush(&mut self) -> Option<Segment> {
        if self.buffer.is_empty() {
            return None;
        }
        self.current_app.clear();
        Some(build_segment(std::mem::take(&mut self.buffer)))
    }

    /// Number of records currently buffered.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }
}

/// Segments a whole record list at once (records must already be in
/// timestamp order). Includes the trailing buffer.
pub fn segment_records(
    records: Vec<CaptureRecord>,
    gap_seconds: i64,
    max_records: usize,
) -> Vec<Segment> {
    let mut segmenter = Segmenter::new(gap_seconds, max_records);
    let mut segments = Vec::new();
    for record in records {
        if let Some(segment) = segmenter.add_record(record) {
            segments.push(segment);
        }
    }
    if let Some(segment) = segmenter.flush() {
        segments.push(segment);
    }
    segments
}

fn build_segment(records: Vec<CaptureRecord>) -> Segment {
    let first = records.first();
    let session_id = first
        .map(|r| r.session.session_id.clone())
        .filter(|id| !id.is_empty())
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    Segment {
        app_name: first.map(|r| r.app.name.clone()).unwrap_or_default(),
        steps: records.iter().map(ActionStep::from_capture).collect(),
        start_time: first.map(|r| r.timestamp.clone()).unwrap_or_default(),
        end_time: records.last().map(|r| r.timestamp.clone()).unwrap_or_default(),
        session_id,
        records,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mimic_core::model::{AppInfo, SessionHint, UserAction};

    fn record(app: &str, timestamp: &str) -> CaptureRecord {
        CaptureRecord {
            capture_id: format!("cap-{timestamp}"),
            timestamp: timestamp.to_string(),
            session: SessionHint { session_id: "s1".to_string(), sequence: 0 },
            user_action: UserAction {
                kind: "click".to_string(),
                x: Some(1.0),
                y: Some(2.0),
                ..UserAction::default()
            },
            app: AppInfo { name: app.to_string(), ..AppInfo::default() },
            ..CaptureRecord::default()
        }
    }

    #[test]
    fn test_split_on_temporal_gap() {
        let records = vec![
            record("Finder", "2026-02-17T12:00:00"),
            record("Finder", "2026-02-17T12:00:10"),
            record("Finder", "2026-02-17T12:01:00"),
        ];
        let segments = segment_records(records, 30, 100);
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].records.len(), 2);
        assert_eq!(segments[1].records.len(), 1);
    }

    #[test]
    fn test_split_on_app_change() {
        let records = vec![
            record("Finder", "2026-02-17T12:00:00"),
            record("Safari", "2026-02-17T12:00:05"),
        ];
        let segments = segment_records(records, 30, 100);
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].app_name, "Finder");
        assert_eq!(segments[1].app_name, "Safari");
    }

    #[test]
    fn test_split_on_size_cap() {
        let records: Vec<CaptureRecord> = (0..5)
            .map(|i| record("Finder", &format!("2026-02-17T12:00:0{i}")))
            .collect();
        let segments = segment_records(records, 300, 2);
        assert_eq!(segments.len(), 3);
        assert_eq!(segments[0].records.len(), 2);
        assert_eq!(segments[2].records.len(), 1);
    }

    #[test]
    fn test_single_segment_carries_metadata() {
        let records = vec![
            record("Finder", "2026-02-17T12:00:00"),
            record("Finder", "2026-02-17T12:00:05"),
        ];
        let segments = segment_records(records, 30, 100);
        assert_eq!(segments.len(), 1);
        let segment = &segments[0];
        assert_eq!(segment.session_id, "s1");
        assert_eq!(segment.start_time, "2026-02-17T12:00:00");
        assert_eq!(segment.end_time, "2026-02-17T12:00:05");
        assert_eq!(segment.steps.len(), 2);
    }

    #[test]
    fn test_streaming_flush_only_on_demand() {
        let mut segmenter = Segmenter::new(30, 100);
        assert!(segmenter.add_record(record("Finder", "2026-02-17T12:00:00")).is_none());
        assert!(segmenter.add_record(record("Finder", "2026-02-17T12:00:05")).is_none());
        assert_eq!(segmenter.buffered(), 2);

        let segment = segmenter.flush().unwrap();
        assert_eq!(segment.records.len(), 2);
        assert!(segmenter.flush().is_none());
    }

    #[test]
    fn test_fresh_session_id_when_hint_missing() {
        let mut r = record("Finder", "2026-02-17T12:00:00");
        r.session.session_id = String::new();
        let segments = segment_records(vec![r], 30, 100);
        assert!(!segments[0].session_id.is_empty());
    }
}
