//! Deadline-triggered auto-approval of content posts.
//!
//! One pass runs three stages in order:
//! 1. select posts still pending whose approval deadline has elapsed;
//! 2. approve all of them in a single bulk write;
//! 3. for each approved post, complete the client's review tasks and append an
//!    activity entry.
//!
//! Stages 1 and 2 abort the pass through [`SweepError`]. Stage 3 is best-effort:
//! every failure is logged and recorded in the [`SweepReport`], and the loop moves on.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::time::{Interval, MissedTickBehavior};
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::config::Workflow;
use crate::model::{ContentPost, NewActivity, TaskFilter};
use crate::store::{Store, StoreError};

#[derive(Debug, Error)]
pub enum SweepError {
    #[error("failed to select posts due for approval: {0}")]
    Select(#[source] StoreError),
    #[error("failed to approve posts: {0}")]
    Transition(#[source] StoreError),
}

impl SweepError {
    pub fn stage(&self) -> &'static str {
        match self {
            SweepError::Select(_) => "select",
            SweepError::Transition(_) => "transition",
        }
    }

    pub fn store_error(&self) -> &StoreError {
        match self {
            SweepError::Select(e) | SweepError::Transition(e) => e,
        }
    }
}

/// Result of one cascade step for one post.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StepOutcome {
    Done { affected: usize },
    Failed { error: String },
}

impl StepOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, StepOutcome::Failed { .. })
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct PostOutcome {
    pub post_id: Uuid,
    pub tasks: StepOutcome,
    pub activity: StepOutcome,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct SweepReport {
    pub approved: Vec<ContentPost>,
    pub outcomes: Vec<PostOutcome>,
}

impl SweepReport {
    pub fn processed(&self) -> usize {
        self.approved.len()
    }

    pub fn failed_steps(&self) -> usize {
        self.outcomes
            .iter()
            .map(|o| o.tasks.is_failed() as usize + o.activity.is_failed() as usize)
            .sum()
    }
}

/// Settings the cascade needs; derived from the `workflow` config section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SweepSettings {
    pub review_task_title: String,
    pub task_window: Duration,
    pub activity_type: String,
    pub activity_author: String,
}

impl From<&Workflow> for SweepSettings {
    fn from(wf: &Workflow) -> Self {
        Self {
            review_task_title: wf.review_task_title.clone(),
            task_window: Duration::days(i64::from(wf.task_window_days)),
            activity_type: wf.activity_type.clone(),
            activity_author: wf.activity_author.clone(),
        }
    }
}

impl Default for SweepSettings {
    fn default() -> Self {
        Self::from(&Workflow::default())
    }
}

/// Run one auto-approval pass against `store` as of `now`.
#[instrument(skip_all, fields(now = %now))]
pub async fn run(
    store: &dyn Store,
    settings: &SweepSettings,
    now: DateTime<Utc>,
) -> Result<SweepReport, SweepError> {
    let due = select_due(store, now).await?;
    if due.is_empty() {
        info!("no posts due for auto-approval");
        return Ok(SweepReport::default());
    }

    let approved = transition(store, &due, now).await?;
    info!(count = approved.len(), "auto-approved posts");

    let outcomes = cascade(store, settings, &approved, now).await;
    Ok(SweepReport { approved, outcomes })
}

async fn select_due(store: &dyn Store, now: DateTime<Utc>) -> Result<Vec<ContentPost>, SweepError> {
    let posts = store.select_due_posts(now).await.map_err(SweepError::Select)?;
    // The store filters already; re-check so a lax backend can never widen the selection.
    let (due, skipped): (Vec<_>, Vec<_>) = posts.into_iter().partition(|p| p.is_due(now));
    if !skipped.is_empty() {
        warn!(count = skipped.len(), "store returned posts that are not due; ignoring them");
    }
    Ok(due)
}

async fn transition(
    store: &dyn Store,
    due: &[ContentPost],
    now: DateTime<Utc>,
) -> Result<Vec<ContentPost>, SweepError> {
    let ids: Vec<Uuid> = due.iter().map(|p| p.id).collect();
    store
        .approve_posts(&ids, now)
        .await
        .map_err(SweepError::Transition)
}

async fn cascade(
    store: &dyn Store,
    settings: &SweepSettings,
    approved: &[ContentPost],
    now: DateTime<Utc>,
) -> Vec<PostOutcome> {
    let mut outcomes = Vec::with_capacity(approved.len());
    for post in approved {
        let tasks = complete_review_tasks(store, settings, post, now).await;
        let activity = record_activity(store, settings, post, now).await;
        outcomes.push(PostOutcome {
            post_id: post.id,
            tasks,
            activity,
        });
    }
    outcomes
}

async fn complete_review_tasks(
    store: &dyn Store,
    settings: &SweepSettings,
    post: &ContentPost,
    now: DateTime<Utc>,
) -> StepOutcome {
    let filter = TaskFilter {
        client_id: post.client_id,
        title: settings.review_task_title.clone(),
        due_from: now - settings.task_window,
        due_to: now,
    };
    match store.complete_tasks(&filter, now).await {
        Ok(tasks) => StepOutcome::Done {
            affected: tasks.len(),
        },
        Err(err) => {
            warn!(post_id = %post.id, client_id = %post.client_id, error = %err, "failed to auto-complete review tasks");
            StepOutcome::Failed {
                error: err.to_string(),
            }
        }
    }
}

async fn record_activity(
    store: &dyn Store,
    settings: &SweepSettings,
    post: &ContentPost,
    now: DateTime<Utc>,
) -> StepOutcome {
    let entry = NewActivity {
        client_id: post.client_id,
        kind: settings.activity_type.clone(),
        description: approval_description(post),
        created_at: now,
        created_by: settings.activity_author.clone(),
    };
    match store.append_activity(&entry).await {
        Ok(_) => StepOutcome::Done { affected: 1 },
        Err(err) => {
            warn!(post_id = %post.id, client_id = %post.client_id, error = %err, "failed to record approval activity");
            StepOutcome::Failed {
                error: err.to_string(),
            }
        }
    }
}

/// Interval for the in-process trigger. A pass that overruns the period delays
/// the next tick instead of firing a burst of catch-up passes.
pub fn ticker(period: std::time::Duration) -> Interval {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

/// Run a pass on every tick, forever. One task drives the loop, so passes never overlap.
pub async fn run_periodically(
    store: Arc<dyn Store>,
    settings: SweepSettings,
    period: std::time::Duration,
) {
    let mut ticker = ticker(period);
    loop {
        ticker.tick().await;
        match run(store.as_ref(), &settings, Utc::now()).await {
            Ok(report) if report.processed() > 0 => info!(
                processed = report.processed(),
                failed_steps = report.failed_steps(),
                "scheduled auto-approval finished"
            ),
            Ok(_) => {}
            Err(err) => error!(error = %err, "scheduled auto-approval failed"),
        }
    }
}

pub fn approval_description(post: &ContentPost) -> String {
    if post.platforms.is_empty() {
        "Content post auto-approved after the approval deadline passed".to_string()
    } else {
        format!(
            "Content post for {} auto-approved after the approval deadline passed",
            post.platform_list()
        )
    }
}
