//! Review eligibility and dispatch.
//!
//! Local eligibility is a pure predicate over the stored order. Upstream
//! eligibility comes from the solicitation-actions lookup. Dispatch goes
//! through the upstream solicitation call, or through an [`EmailSink`] when
//! the caller supplies a custom template. Batches are processed strictly one
//! order at a time.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use futures::future::BoxFuture;
use sellerdesk_core::{Order, ReviewRequestStatus, SolicitationReason};
use sellerdesk_spapi::{MarketplaceApi, SolicitationActions, SpApiError};
use serde::Serialize;
use uuid::Uuid;

/// The upstream does not offer solicitations this soon after purchase.
pub const SOLICITATION_MIN_AGE_DAYS: i64 = 5;
/// The upstream stops offering solicitations after this many days.
pub const SOLICITATION_MAX_AGE_DAYS: i64 = 30;

const DEFAULT_BUYER_NAME: &str = "お客様";
const DEFAULT_PRODUCT_TITLE: &str = "ご購入商品";
const EMAIL_SUBJECT: &str = "ご購入商品のレビューのお願い";

/// Purchased within `window_days`, in a post-shipment status, not already
/// requested, and with a deliverable contact email.
#[must_use]
pub fn is_locally_eligible(order: &Order, window_days: i64, now: DateTime<Utc>) -> bool {
    order.purchase_date >= now - Duration::days(window_days)
        && order.status.permits_review_request()
        && !order.review.request_sent
        && order.contact_email().is_some()
}

#[must_use]
pub fn eligible_orders(orders: &[Order], window_days: i64, now: DateTime<Utc>) -> Vec<Order> {
    orders
        .iter()
        .filter(|o| is_locally_eligible(o, window_days, now))
        .cloned()
        .collect()
}

/// Interprets a solicitation-actions response. When no action is offered
/// the reason is inferred from the order's age.
#[must_use]
pub fn evaluate_solicitation(
    actions: &SolicitationActions,
    purchase_date: DateTime<Utc>,
    now: DateTime<Utc>,
) -> (bool, SolicitationReason) {
    if actions.offers_review_request() {
        return (true, SolicitationReason::Eligible);
    }
    let age = now - purchase_date;
    let reason = if age > Duration::days(SOLICITATION_MAX_AGE_DAYS) {
        SolicitationReason::WindowClosed
    } else if age < Duration::days(SOLICITATION_MIN_AGE_DAYS) {
        SolicitationReason::TooEarly
    } else {
        SolicitationReason::NotOffered
    };
    (false, reason)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchChannel {
    Solicitation,
    Email,
}

/// Outcome for one order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewRequest {
    pub order_id: String,
    pub status: ReviewRequestStatus,
    pub channel: DispatchChannel,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Completed,
    Partial,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewRequestBatch {
    pub id: Uuid,
    pub total: usize,
    pub sent: usize,
    pub failed: usize,
    pub status: BatchStatus,
    pub results: Vec<ReviewRequest>,
    pub created_at: DateTime<Utc>,
}

impl ReviewRequestBatch {
    fn from_results(results: Vec<ReviewRequest>, created_at: DateTime<Utc>) -> Self {
        let sent = results
            .iter()
            .filter(|r| r.status == ReviewRequestStatus::Sent)
            .count();
        let failed = results.len() - sent;
        let status = match (sent, failed) {
            (_, 0) => BatchStatus::Completed,
            (0, _) => BatchStatus::Failed,
            _ => BatchStatus::Partial,
        };
        Self {
            id: Uuid::new_v4(),
            total: results.len(),
            sent,
            failed,
            status,
            results,
            created_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailMessage {
    pub order_id: String,
    pub to: String,
    pub subject: String,
    pub body: String,
}

/// Outbound email delivery.
pub trait EmailSink: Send + Sync {
    fn send<'a>(&'a self, message: &'a EmailMessage) -> BoxFuture<'a, Result<(), String>>;
}

/// Default sink: logs the rendered message instead of delivering it.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEmailSink;

impl EmailSink for TracingEmailSink {
    fn send<'a>(&'a self, message: &'a EmailMessage) -> BoxFuture<'a, Result<(), String>> {
        Box::pin(async move {
            tracing::info!(
                order_id = %message.order_id,
                to = %message.to,
                subject = %message.subject,
                body_len = message.body.len(),
                "review request email (log-only sink)"
            );
            Ok(())
        })
    }
}

/// Substitutes `{{buyer_name}}`, `{{order_id}}`, and `{{product_title}}`.
#[must_use]
pub fn render_template(template: &str, order: &Order) -> String {
    let product_title = order
        .items
        .iter()
        .find(|i| !i.is_placeholder())
        .map_or(DEFAULT_PRODUCT_TITLE, |i| i.title.as_str());
    template
        .replace("{{buyer_name}}", order.buyer_name().unwrap_or(DEFAULT_BUYER_NAME))
        .replace("{{order_id}}", &order.id)
        .replace("{{product_title}}", product_title)
}

pub struct ReviewDispatcher<A> {
    api: Arc<A>,
    email: Arc<dyn EmailSink>,
    window_days: i64,
}

impl<A> std::fmt::Debug for ReviewDispatcher<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReviewDispatcher").finish_non_exhaustive()
    }
}

impl<A: MarketplaceApi> ReviewDispatcher<A> {
    #[must_use]
    pub fn new(api: Arc<A>, email: Arc<dyn EmailSink>, window_days: i64) -> Self {
        Self {
            api,
            email,
            window_days,
        }
    }

    /// Sends one review request and records the outcome on `order`.
    ///
    /// An order that fails [`is_locally_eligible`] is reported as failed
    /// without contacting the upstream or the email sink.
    ///
    /// # Errors
    ///
    /// Returns the upstream error, leaving `order` untouched, when the
    /// upstream rejects our credentials. Every other failure is reported in
    /// the returned [`ReviewRequest`].
    pub async fn send_single(
        &self,
        order: &mut Order,
        template: Option<&str>,
    ) -> Result<ReviewRequest, SpApiError> {
        let channel = if template.is_some() {
            DispatchChannel::Email
        } else {
            DispatchChannel::Solicitation
        };
        let now = Utc::now();

        if order.review.request_sent {
            return Ok(failed(order, channel, "review request already sent", now));
        }
        if !is_locally_eligible(order, self.window_days, now) {
            tracing::info!(order_id = %order.id, status = ?order.status, "order not eligible for a review request");
            return Ok(failed(
                order,
                channel,
                "order is not eligible for a review request",
                now,
            ));
        }

        let outcome = match template {
            Some(template) => self.send_email(order, template).await,
            None => match self.api.create_review_solicitation(&order.id).await {
                Ok(()) => Ok(()),
                Err(e) if e.is_auth() => return Err(e),
                Err(e) => Err(e.to_string()),
            },
        };

        match outcome {
            Ok(()) => {
                order.mark_review_sent(now);
                tracing::info!(order_id = %order.id, ?channel, "review request sent");
                Ok(ReviewRequest {
                    order_id: order.id.clone(),
                    status: ReviewRequestStatus::Sent,
                    channel,
                    message: "レビューリクエストを送信しました".to_string(),
                    timestamp: now,
                })
            }
            Err(message) => {
                tracing::warn!(order_id = %order.id, ?channel, error = %message, "review request failed");
                order.mark_review_failed();
                Ok(failed(order, channel, &message, now))
            }
        }
    }

    /// Sends review requests one order at a time. A failed order does not
    /// stop the batch; an authentication failure does, and is returned after
    /// the orders already processed have been updated in place.
    ///
    /// # Errors
    ///
    /// Returns the upstream error when the upstream rejects our credentials.
    pub async fn send_batch(
        &self,
        orders: &mut [Order],
        template: Option<&str>,
    ) -> Result<ReviewRequestBatch, SpApiError> {
        let created_at = Utc::now();
        let mut results = Vec::with_capacity(orders.len());
        for order in orders.iter_mut() {
            results.push(self.send_single(order, template).await?);
        }
        let batch = ReviewRequestBatch::from_results(results, created_at);
        tracing::info!(
            batch_id = %batch.id,
            total = batch.total,
            sent = batch.sent,
            failed = batch.failed,
            "review request batch finished"
        );
        Ok(batch)
    }

    async fn send_email(&self, order: &Order, template: &str) -> Result<(), String> {
        let Some(to) = order.contact_email() else {
            return Err("no deliverable contact email".to_string());
        };
        let message = EmailMessage {
            order_id: order.id.clone(),
            to: to.to_string(),
            subject: EMAIL_SUBJECT.to_string(),
            body: render_template(template, order),
        };
        self.email.send(&message).await
    }
}

fn failed(order: &Order, channel: DispatchChannel, message: &str, at: DateTime<Utc>) -> ReviewRequest {
    ReviewRequest {
        order_id: order.id.clone(),
        status: ReviewRequestStatus::Failed,
        channel,
        message: message.to_string(),
        timestamp: at,
    }
}

#[cfg(test)]
#[path = "review_test.rs"]
mod tests;
