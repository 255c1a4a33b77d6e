use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::error::UpstreamError;
use crate::logic;
use crate::models::{WorkCalendar, WorkItemTimeInState};
use crate::upstream::WorkItemSource;

/// Histories fetched at once for one project.
const MAX_CONCURRENT_FETCHES: usize = 8;

/// Time in state for every work item of a project.
///
/// Only the work item listing can fail the whole call. A history fetch that
/// fails is logged and that item is left out; the rest keep listing order.
pub async fn project_time_in_state<S>(
    source: Arc<S>,
    project: &str,
    calendar: &WorkCalendar,
    now: DateTime<Utc>,
) -> Result<Vec<WorkItemTimeInState>, UpstreamError>
where
    S: WorkItemSource + ?Sized + 'static,
{
    let items = source.project_work_items(project).await?;
    info!(project, work_items = items.len(), "computing time in state");

    let permits = Arc::new(Semaphore::new(MAX_CONCURRENT_FETCHES));
    let mut tasks = JoinSet::new();

    for (index, item) in items.iter().enumerate() {
        let source = Arc::clone(&source);
        let permits = Arc::clone(&permits);
        let calendar = calendar.clone();
        let project = project.to_string();
        let id = item.id;

        tasks.spawn(async move {
            let _permit = permits.acquire_owned().await;
            let result = source
                .work_item_history(&project, id)
                .await
                .map(|updates| logic::time_in_state(&updates, &calendar, now));
            (index, id, result)
        });
    }

    let mut slots: Vec<Option<WorkItemTimeInState>> = vec![None; items.len()];

    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((index, id, Ok(time_in_state))) => {
                slots[index] = Some(WorkItemTimeInState {
                    work_item_id: id,
                    time_in_state,
                });
            }
            Ok((_, id, Err(e))) => {
                warn!(project, work_item_id = id, error = %e, "skipping work item");
            }
            Err(e) => {
                warn!(project, error = %e, "work item task did not finish");
            }
        }
    }

    Ok(slots.into_iter().flatten().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FieldChange, WorkItemUpdate};
    use crate::upstream::fake::FakeTracker;
    use chrono::{FixedOffset, TimeZone};
    use serde_json::json;
    use std::collections::HashMap;

    fn office() -> WorkCalendar {
        WorkCalendar::new([1, 2, 3, 4, 5, 6], 11, 19, FixedOffset::east_opt(0).unwrap()).unwrap()
    }

    // 2024-06-10 is a Monday
    fn monday(h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 10, h, 0, 0).unwrap()
    }

    fn entered(state: &str, at: &str) -> WorkItemUpdate {
        let mut fields = HashMap::new();
        fields.insert(
            "System.State".to_string(),
            FieldChange {
                new_value: Some(json!(state)),
            },
        );
        fields.insert(
            "Microsoft.VSTS.Common.StateChangeDate".to_string(),
            FieldChange {
                new_value: Some(json!(at)),
            },
        );
        WorkItemUpdate { rev: 1, fields }
    }

    fn tracker(ids: &[u64]) -> FakeTracker {
        let mut fake = FakeTracker::default();
        fake.items.insert("Board".to_string(), ids.to_vec());
        for &id in ids {
            fake.histories
                .insert(id, vec![entered("Doing", "2024-06-10T12:00:00Z")]);
        }
        fake
    }

    #[tokio::test]
    async fn failed_item_is_left_out() {
        let mut fake = tracker(&[11, 12, 13]);
        fake.failing_history.insert(12);

        let result = project_time_in_state(Arc::new(fake), "Board", &office(), monday(14))
            .await
            .unwrap();

        let ids: Vec<u64> = result.iter().map(|r| r.work_item_id).collect();
        assert_eq!(ids, vec![11, 13]);
        for item in &result {
            assert_eq!(item.time_in_state.get("Doing"), Some(7200.0));
        }
    }

    #[tokio::test]
    async fn output_follows_listing_order() {
        let ids: Vec<u64> = (1..=40).rev().collect();
        let result = project_time_in_state(Arc::new(tracker(&ids)), "Board", &office(), monday(14))
            .await
            .unwrap();

        let got: Vec<u64> = result.iter().map(|r| r.work_item_id).collect();
        assert_eq!(got, ids);
    }

    #[tokio::test]
    async fn item_without_history_reports_zeroes() {
        let mut fake = tracker(&[5]);
        fake.histories.clear();

        let result = project_time_in_state(Arc::new(fake), "Board", &office(), monday(14))
            .await
            .unwrap();

        assert_eq!(result.len(), 1);
        assert_eq!(result[0].time_in_state.total(), 0.0);
        assert_eq!(result[0].time_in_state.iter().count(), 5);
    }

    #[tokio::test]
    async fn listing_failure_fails_the_call() {
        let fake = tracker(&[1]);
        let err = project_time_in_state(Arc::new(fake), "Elsewhere", &office(), monday(14))
            .await
            .unwrap_err();
        assert!(matches!(err, UpstreamError::NotFound(_)));
    }

    #[tokio::test]
    async fn empty_project_is_empty_list() {
        let result = project_time_in_state(Arc::new(tracker(&[])), "Board", &office(), monday(14))
            .await
            .unwrap();
        assert!(result.is_empty());
    }
}
