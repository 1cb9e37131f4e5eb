//! Bounded decision history.
//!
//! Keeps the most recent `capacity` decision records in memory. Records are
//! appended in processing order and evicted oldest first; queries always
//! return the most recent record first.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::domain::errors::{EngineError, EngineResult};
use crate::domain::models::decision::{DecisionId, DecisionRecord, DecisionStatus};
use crate::domain::models::rule::RuleId;

/// Filter for querying decision history.
#[derive(Debug, Clone, Default)]
pub struct HistoryFilter {
    pub rule_id: Option<RuleId>,
    pub success: Option<bool>,
    pub status: Option<DecisionStatus>,
    /// Filter by time range start.
    pub from: Option<DateTime<Utc>>,
    /// Filter by time range end.
    pub to: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

impl HistoryFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rule(mut self, rule_id: impl Into<RuleId>) -> Self {
        self.rule_id = Some(rule_id.into());
        self
    }

    pub fn with_success(mut self, success: bool) -> Self {
        self.success = Some(success);
        self
    }

    pub fn with_status(mut self, status: DecisionStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_time_range(mut self, from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        self.from = Some(from);
        self.to = Some(to);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn matches(&self, record: &DecisionRecord) -> bool {
        if let Some(ref rule_id) = self.rule_id {
            if record.matched_rule_id.as_ref() != Some(rule_id) {
                return false;
            }
        }

        if let Some(success) = self.success {
            if record.success != success {
                return false;
            }
        }

        if let Some(status) = self.status {
            if record.status != status {
                return false;
            }
        }

        if let Some(from) = self.from {
            if record.timestamp < from {
                return false;
            }
        }

        if let Some(to) = self.to {
            if record.timestamp > to {
                return false;
            }
        }

        true
    }
}

/// Summary of the records currently held.
#[derive(Debug, Clone, Default, Serialize)]
pub struct HistoryStats {
    pub total: usize,
    pub capacity: usize,
    pub evicted: u64,
    pub successful: usize,
    pub by_status: HashMap<String, usize>,
    pub oldest: Option<DateTime<Utc>>,
    pub newest: Option<DateTime<Utc>>,
}

struct HistoryInner {
    records: VecDeque<DecisionRecord>,
    evicted: u64,
}

/// In-memory ring of decision records.
#[derive(Clone)]
pub struct DecisionHistory {
    capacity: usize,
    inner: Arc<RwLock<HistoryInner>>,
}

impl DecisionHistory {
    /// Create a history holding at most `capacity` records (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            inner: Arc::new(RwLock::new(HistoryInner {
                records: VecDeque::with_capacity(capacity.min(1024)),
                evicted: 0,
            })),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append a record, evicting the oldest if full. Returns the ids of the
    /// evicted records.
    pub async fn record(&self, record: DecisionRecord) -> Vec<DecisionId> {
        let mut inner = self.inner.write().await;
        let mut evicted_ids = Vec::new();

        while inner.records.len() >= self.capacity {
            if let Some(evicted) = inner.records.pop_front() {
                inner.evicted += 1;
                tracing::debug!(decision_id = %evicted.id, "Evicted oldest decision record");
                evicted_ids.push(evicted.id);
            }
        }

        inner.records.push_back(record);
        evicted_ids
    }

    /// Replace a stored record in place, keeping its position.
    pub async fn update(&self, record: DecisionRecord) -> EngineResult<()> {
        let mut inner = self.inner.write().await;
        let slot = inner
            .records
            .iter_mut()
            .find(|r| r.id == record.id)
            .ok_or(EngineError::DecisionNotFound(record.id.0))?;
        *slot = record;
        Ok(())
    }

    pub async fn get(&self, id: DecisionId) -> Option<DecisionRecord> {
        self.inner
            .read()
            .await
            .records
            .iter()
            .find(|r| r.id == id)
            .cloned()
    }

    /// Matching records, most recent first.
    pub async fn query(&self, filter: &HistoryFilter) -> Vec<DecisionRecord> {
        let inner = self.inner.read().await;
        let matching = inner.records.iter().rev().filter(|r| filter.matches(r));

        match filter.limit {
            Some(limit) => matching.take(limit).cloned().collect(),
            None => matching.cloned().collect(),
        }
    }

    /// Every record, most recent first.
    pub async fn all(&self) -> Vec<DecisionRecord> {
        self.query(&HistoryFilter::new()).await
    }

    /// Decisions waiting on an operator.
    pub async fn pending(&self) -> Vec<DecisionRecord> {
        self.query(&HistoryFilter::new().with_status(DecisionStatus::Pending))
            .await
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.records.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.records.is_empty()
    }

    pub async fn stats(&self) -> HistoryStats {
        let inner = self.inner.read().await;

        let mut by_status: HashMap<String, usize> = HashMap::new();
        let mut successful = 0;
        for record in &inner.records {
            *by_status.entry(record.status.as_str().to_string()).or_default() += 1;
            if record.success {
                successful += 1;
            }
        }

        HistoryStats {
            total: inner.records.len(),
            capacity: self.capacity,
            evicted: inner.evicted,
            successful,
            by_status,
            oldest: inner.records.front().map(|r| r.timestamp),
            newest: inner.records.back().map(|r| r.timestamp),
        }
    }

    pub async fn clear(&self) {
        self.inner.write().await.records.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::action::{ActionOutcome, ActionSpec, ActionType};
    use crate::domain::models::event::EventId;

    fn completed(rule: &str) -> DecisionRecord {
        let restart = ActionSpec::new("restart", ActionType::Restart);
        DecisionRecord::for_rule(
            EventId::new(),
            RuleId::from(rule),
            vec![ActionOutcome::succeeded(&restart, 1)],
        )
    }

    #[tokio::test]
    async fn test_capacity_evicts_oldest() {
        let history = DecisionHistory::new(3);
        let first = DecisionRecord::no_match(EventId::new());
        let first_id = first.id;
        assert!(history.record(first).await.is_empty());
        for _ in 0..2 {
            assert!(history.record(completed("r1")).await.is_empty());
        }
        assert_eq!(history.record(completed("r1")).await, vec![first_id]);

        assert_eq!(history.len().await, 3);
        assert!(history.get(first_id).await.is_none());
        assert_eq!(history.stats().await.evicted, 1);
    }

    #[tokio::test]
    async fn test_query_is_most_recent_first() {
        let history = DecisionHistory::new(10);
        let records: Vec<_> = (0..4).map(|_| completed("r1")).collect();
        for record in &records {
            history.record(record.clone()).await;
        }

        let ids: Vec<_> = history.all().await.into_iter().map(|r| r.id).collect();
        let expected: Vec<_> = records.iter().rev().map(|r| r.id).collect();
        assert_eq!(ids, expected);
    }

    #[tokio::test]
    async fn test_query_filters() {
        let history = DecisionHistory::new(10);
        history.record(completed("r1")).await;
        history.record(completed("r2")).await;
        history.record(DecisionRecord::no_match(EventId::new())).await;
        history.record(completed("r1")).await;

        assert_eq!(history.query(&HistoryFilter::new().with_rule("r1")).await.len(), 2);
        assert_eq!(
            history
                .query(&HistoryFilter::new().with_success(false))
                .await
                .len(),
            1
        );
        assert_eq!(
            history
                .query(&HistoryFilter::new().with_status(DecisionStatus::NoMatch))
                .await
                .len(),
            1
        );
        assert_eq!(history.query(&HistoryFilter::new().with_limit(2)).await.len(), 2);

        let future = Utc::now() + chrono::Duration::hours(1);
        assert!(history
            .query(&HistoryFilter::new().with_time_range(future, future + chrono::Duration::hours(1)))
            .await
            .is_empty());
    }

    #[tokio::test]
    async fn test_update_in_place() {
        let history = DecisionHistory::new(10);
        let mut record = completed("r1");
        history.record(record.clone()).await;

        record.note = Some("checked".into());
        history.update(record.clone()).await.unwrap();
        assert_eq!(history.get(record.id).await.unwrap().note.as_deref(), Some("checked"));

        let unknown = completed("r2");
        assert!(matches!(
            history.update(unknown).await,
            Err(EngineError::DecisionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_stats_by_status() {
        let history = DecisionHistory::new(10);
        history.record(completed("r1")).await;
        history.record(DecisionRecord::no_match(EventId::new())).await;

        let stats = history.stats().await;
        assert_eq!(stats.total, 2);
        assert_eq!(stats.successful, 1);
        assert_eq!(stats.by_status.get("completed"), Some(&1));
        assert_eq!(stats.by_status.get("no_match"), Some(&1));
    }
}
