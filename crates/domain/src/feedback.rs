//! Feedback Aggregator.
//!
//! A target's rating is the mean of the most recent feedback of each user
//! who rated it, and its review count is the number of those users.

use std::collections::HashMap;

use common::{FeedbackId, UserId};
use serde::Serialize;
use store::{Feedback, FeedbackTarget, RatingSummary, Store, StoreTx};

use crate::error::{DomainError, Result};

/// Feedback as written, with the target's rating after the write.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeedbackReceipt {
    pub feedback: Feedback,
    pub summary: RatingSummary,
}

/// Computes the summary from every feedback row of a target.
pub fn summarize(feedback: &[Feedback]) -> RatingSummary {
    let mut latest: HashMap<UserId, &Feedback> = HashMap::new();
    for entry in feedback {
        match latest.get(&entry.user_id) {
            Some(seen) if seen.updated_at >= entry.updated_at => {}
            _ => {
                latest.insert(entry.user_id, entry);
            }
        }
    }

    if latest.is_empty() {
        return RatingSummary::default();
    }
    let total: f64 = latest.values().map(|f| f.rating).sum();
    let review_count = u32::try_from(latest.len()).unwrap_or(u32::MAX);
    RatingSummary {
        rating: total / f64::from(review_count),
        review_count,
    }
}

async fn recompute(tx: &mut dyn StoreTx, target: FeedbackTarget) -> Result<RatingSummary> {
    let feedback = tx.list_feedback(target).await?;
    let summary = summarize(&feedback);
    if !tx.set_rating(target, summary).await? {
        return Err(DomainError::not_found(target.kind.as_str(), target.id));
    }
    Ok(summary)
}

pub struct FeedbackService<S: Store> {
    store: S,
}

impl<S: Store> FeedbackService<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Records a user's rating of a target, replacing their earlier one, and
    /// refreshes the target's summary in the same transaction.
    #[tracing::instrument(skip(self, comment), fields(%target))]
    pub async fn upsert(
        &self,
        user_id: UserId,
        target: FeedbackTarget,
        rating: f64,
        comment: String,
    ) -> Result<FeedbackReceipt> {
        let mut tx = self.store.begin().await?;
        tx.lock_feedback_target(target).await?;
        let now = crate::now();
        let feedback = tx
            .upsert_feedback(&Feedback {
                id: FeedbackId::new(),
                user_id,
                target,
                rating,
                comment,
                created_at: now,
                updated_at: now,
            })
            .await?;
        let summary = recompute(&mut *tx, target).await?;
        tx.commit().await?;

        tracing::info!(
            rating = summary.rating,
            reviews = summary.review_count,
            "target rating updated"
        );
        Ok(FeedbackReceipt { feedback, summary })
    }

    /// Recomputes and stores the rating summary of a target.
    #[tracing::instrument(skip(self), fields(%target))]
    pub async fn recompute_target_rating(&self, target: FeedbackTarget) -> Result<RatingSummary> {
        let mut tx = self.store.begin().await?;
        tx.lock_feedback_target(target).await?;
        let summary = recompute(&mut *tx, target).await?;
        tx.commit().await?;
        Ok(summary)
    }
}
