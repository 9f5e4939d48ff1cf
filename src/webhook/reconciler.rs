use std::sync::Arc;

use rust_decimal::Decimal;
use tracing::{debug, error, info, warn};
use ulid::Ulid;

use crate::engine::{Engine, EngineError, PaymentApplication, Policy};
use crate::gateway::{ChargeRequest, ChargeStatus, PaymentGateway};
use crate::limits::MAX_REASON_LEN;
use crate::model::*;
use crate::observability::{INTEGRITY_FAILURES_TOTAL, WEBHOOK_EVENTS_TOTAL};

use super::{EventKind, GatewayEvent, Outcome, ReconcileError};

const FAILED_REASON: &str = "Payment failed";

/// Drives local payments and reservations from gateway events, applying
/// each event id at most once per payment.
pub struct Reconciler {
    engine: Arc<Engine>,
    gateway: Arc<dyn PaymentGateway>,
}

enum LockAttempt {
    Acquired { took_over_from: Option<String> },
    Busy(String),
    Settled,
}

/// Result of recording an event on a payment.
enum Step {
    Duplicate,
    Transitioned,
    Unchanged,
}

fn bounded_reason(mut reason: String) -> String {
    if reason.len() > MAX_REASON_LEN {
        let mut end = MAX_REASON_LEN;
        while !reason.is_char_boundary(end) {
            end -= 1;
        }
        reason.truncate(end);
    }
    reason
}

fn release_own_lock(p: &mut Payment, event_id: &str, now: Ms) {
    if let Some(lock) = p.lock.take_if(|l| l.event_id == event_id) {
        p.history.push(AuditEntry::LockReleased {
            at: now,
            event_id: lock.event_id,
        });
    }
}

fn mark_completed(p: &mut Payment, amount: Decimal, event_id: &str, now: Ms) -> bool {
    if p.status != PaymentStatus::Pending {
        return false;
    }
    p.history.push(AuditEntry::PaymentStatusChanged {
        at: now,
        from: p.status,
        to: PaymentStatus::Completed,
        event_id: Some(event_id.to_string()),
    });
    p.status = PaymentStatus::Completed;
    p.amount = amount;
    true
}

fn mark_failed(p: &mut Payment, reason: &str, event_id: &str, now: Ms) -> bool {
    if p.status != PaymentStatus::Pending {
        return false;
    }
    p.history.push(AuditEntry::PaymentStatusChanged {
        at: now,
        from: p.status,
        to: PaymentStatus::Failed,
        event_id: Some(event_id.to_string()),
    });
    p.history.push(AuditEntry::PaymentFailed {
        at: now,
        reason: reason.to_string(),
    });
    p.status = PaymentStatus::Failed;
    p.failure_reason = Some(reason.to_string());
    true
}

impl Reconciler {
    pub fn new(engine: Arc<Engine>, gateway: Arc<dyn PaymentGateway>) -> Self {
        Self { engine, gateway }
    }

    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    pub async fn handle(&self, event: &GatewayEvent, now: Ms) -> Result<Outcome, ReconcileError> {
        let result = self.dispatch(event, now).await;
        let outcome = match &result {
            Ok(o) => o.as_str(),
            Err(_) => "error",
        };
        metrics::counter!(WEBHOOK_EVENTS_TOTAL, "type" => event.kind.as_str(), "outcome" => outcome).increment(1);
        result
    }

    async fn dispatch(&self, event: &GatewayEvent, now: Ms) -> Result<Outcome, ReconcileError> {
        if event.kind == EventKind::Other {
            debug!(event_id = %event.id, "ignoring unhandled webhook event type");
            return Ok(Outcome::Ignored);
        }
        let Some(payment_id) = self.locate_payment(event) else {
            warn!(event_id = %event.id, kind = event.kind.as_str(), "no payment matches webhook event");
            return Ok(Outcome::Ignored);
        };

        let payment = self.engine.payment_snapshot(payment_id).await?;
        if payment.has_processed(&event.id) {
            info!(%payment_id, event_id = %event.id, "duplicate webhook event");
            self.repair(&payment, now).await?;
            return Ok(Outcome::Duplicate);
        }

        match event.kind {
            EventKind::SourceChargeable => self.on_chargeable(payment, event, now).await,
            EventKind::PaymentPaid => self.on_paid(payment_id, event, now).await,
            EventKind::PaymentFailed => self.on_failed(payment_id, event, now).await,
            EventKind::Other => Ok(Outcome::Ignored),
        }
    }

    /// Gateway charge id, then cached source id, then embedded payment
    /// reference, then the reservation's most recent payment.
    fn locate_payment(&self, event: &GatewayEvent) -> Option<Ulid> {
        let resource = event.resource_id.as_deref();
        resource
            .and_then(|id| self.engine.payment_by_gateway_id(id))
            .or_else(|| {
                [resource, event.source_id.as_deref()]
                    .into_iter()
                    .flatten()
                    .find_map(|id| self.engine.payment_by_source_id(id))
            })
            .or_else(|| event.payment_ref.filter(|id| self.engine.get_payment(id).is_some()))
            .or_else(|| {
                event
                    .reservation_ref
                    .and_then(|r| self.engine.latest_payment_for_reservation(&r))
            })
    }

    async fn record_event(&self, payment_id: Ulid, event_id: &str) -> Result<Payment, ReconcileError> {
        let (payment, ()) = self
            .engine
            .modify_payment(payment_id, |p| {
                p.processed_events.insert(event_id.to_string());
                Ok(())
            })
            .await?;
        Ok(payment)
    }

    async fn on_chargeable(&self, payment: Payment, event: &GatewayEvent, now: Ms) -> Result<Outcome, ReconcileError> {
        let payment_id = payment.id;
        match payment.status {
            PaymentStatus::Completed => {
                let payment = self.record_event(payment_id, &event.id).await?;
                self.repair(&payment, now).await?;
                return Ok(Outcome::Duplicate);
            }
            PaymentStatus::Failed => {
                self.record_event(payment_id, &event.id).await?;
                info!(%payment_id, event_id = %event.id, "chargeable source for a failed payment, not charging");
                return Ok(Outcome::Ignored);
            }
            PaymentStatus::Pending => {}
        }

        let (payment, attempt) = self
            .engine
            .modify_payment(payment_id, |p| {
                if p.has_processed(&event.id) || p.status != PaymentStatus::Pending {
                    return Ok(LockAttempt::Settled);
                }
                let took_over_from = match &p.lock {
                    Some(lock) if !lock.is_stale(now) => return Ok(LockAttempt::Busy(lock.event_id.clone())),
                    Some(lock) => Some(lock.event_id.clone()),
                    None => None,
                };
                p.lock = Some(AdvisoryLock {
                    event_id: event.id.clone(),
                    acquired_at: now,
                });
                p.history.push(AuditEntry::LockAcquired {
                    at: now,
                    event_id: event.id.clone(),
                    took_over_from: took_over_from.clone(),
                });
                Ok(LockAttempt::Acquired { took_over_from })
            })
            .await?;

        match attempt {
            LockAttempt::Busy(holder) => {
                info!(%payment_id, event_id = %event.id, %holder, "charge already in progress, deferring");
                return Ok(Outcome::Deferred);
            }
            LockAttempt::Settled => {
                self.repair(&payment, now).await?;
                return Ok(Outcome::Duplicate);
            }
            LockAttempt::Acquired {
                took_over_from: Some(previous),
            } => warn!(%payment_id, event_id = %event.id, %previous, "took over stale payment lock"),
            LockAttempt::Acquired { took_over_from: None } => {}
        }

        // No store lock is held across the gateway call; the advisory lock keeps other deliveries out.
        let charge = match event.resource_id.clone().or_else(|| payment.source_id.clone()) {
            Some(source_id) => {
                let req = ChargeRequest {
                    payment_id,
                    reservation_id: payment.reservation_id,
                    source_id,
                    amount: payment.amount,
                    description: format!("Court reservation {}", payment.reservation_id.unwrap_or(payment_id)),
                };
                self.gateway.create_payment(&req).await.map_err(|e| e.to_string())
            }
            None => Err("chargeable event carries no source id".to_string()),
        };

        let charge = match charge {
            Ok(charge) => charge,
            Err(reason) => {
                warn!(%payment_id, event_id = %event.id, %reason, "gateway charge failed");
                let (payment, newly_failed) = self
                    .engine
                    .modify_payment(payment_id, |p| {
                        release_own_lock(p, &event.id, now);
                        p.processed_events.insert(event.id.clone());
                        Ok(mark_failed(p, &reason, &event.id, now))
                    })
                    .await?;
                if newly_failed {
                    self.cancel_for_failure(&payment, bounded_reason(format!("{FAILED_REASON}: {reason}")), now)
                        .await?;
                }
                return Ok(Outcome::Failed);
            }
        };

        let (payment, newly_failed) = self
            .engine
            .modify_payment(payment_id, |p| {
                release_own_lock(p, &event.id, now);
                p.processed_events.insert(event.id.clone());
                p.gateway_id = Some(charge.id.clone());
                p.history.push(AuditEntry::GatewayCharged {
                    at: now,
                    charge_id: charge.id.clone(),
                });
                Ok(match charge.status {
                    ChargeStatus::Paid => {
                        mark_completed(p, charge.amount, &event.id, now);
                        false
                    }
                    ChargeStatus::Failed => mark_failed(p, "charge failed", &event.id, now),
                    ChargeStatus::Pending => false,
                })
            })
            .await?;
        info!(%payment_id, charge_id = %charge.id, status = ?charge.status, "gateway charge created");

        match payment.status {
            PaymentStatus::Completed => {
                self.confirm(&payment, Some(event.id.clone()), now).await?;
                Ok(Outcome::Applied)
            }
            PaymentStatus::Failed if newly_failed => {
                self.cancel_for_failure(&payment, format!("{FAILED_REASON}: charge failed"), now)
                    .await?;
                Ok(Outcome::Failed)
            }
            _ => Ok(Outcome::Applied),
        }
    }

    async fn on_paid(&self, payment_id: Ulid, event: &GatewayEvent, now: Ms) -> Result<Outcome, ReconcileError> {
        let (payment, step) = self
            .engine
            .modify_payment(payment_id, |p| {
                if !p.processed_events.insert(event.id.clone()) {
                    return Ok(Step::Duplicate);
                }
                if p.gateway_id.is_none() {
                    p.gateway_id = event.resource_id.clone();
                }
                let amount = event.amount.unwrap_or(p.amount);
                Ok(match p.status {
                    PaymentStatus::Failed => Step::Unchanged,
                    _ => {
                        mark_completed(p, amount, &event.id, now);
                        Step::Transitioned
                    }
                })
            })
            .await?;

        match step {
            Step::Duplicate => {
                self.repair(&payment, now).await?;
                Ok(Outcome::Duplicate)
            }
            Step::Unchanged => {
                error!(%payment_id, event_id = %event.id, "gateway reports paid for a failed payment, refund required");
                metrics::counter!(INTEGRITY_FAILURES_TOTAL).increment(1);
                Ok(Outcome::Ignored)
            }
            Step::Transitioned => {
                self.confirm(&payment, Some(event.id.clone()), now).await?;
                Ok(Outcome::Applied)
            }
        }
    }

    async fn on_failed(&self, payment_id: Ulid, event: &GatewayEvent, now: Ms) -> Result<Outcome, ReconcileError> {
        let reason = event
            .failure_message
            .clone()
            .unwrap_or_else(|| FAILED_REASON.to_string());
        let (payment, step) = self
            .engine
            .modify_payment(payment_id, |p| {
                if !p.processed_events.insert(event.id.clone()) {
                    return Ok(Step::Duplicate);
                }
                Ok(if mark_failed(p, &reason, &event.id, now) {
                    Step::Transitioned
                } else {
                    Step::Unchanged
                })
            })
            .await?;

        match step {
            Step::Duplicate => {
                self.repair(&payment, now).await?;
                Ok(Outcome::Duplicate)
            }
            Step::Unchanged => {
                warn!(%payment_id, event_id = %event.id, status = ?payment.status, "payment.failed for a settled payment, ignoring");
                Ok(Outcome::Ignored)
            }
            Step::Transitioned => {
                self.cancel_for_failure(&payment, FAILED_REASON.to_string(), now)
                    .await?;
                Ok(Outcome::Applied)
            }
        }
    }

    /// Bring the reservation in line with an already-settled payment.
    async fn repair(&self, payment: &Payment, now: Ms) -> Result<(), ReconcileError> {
        match payment.status {
            PaymentStatus::Completed => {
                let Some(reservation_id) = payment.reservation_id else {
                    return Ok(());
                };
                let status = self.engine.reservation_status(reservation_id).await.ok();
                if !matches!(
                    status,
                    Some(ReservationStatus::Confirmed | ReservationStatus::Completed | ReservationStatus::NoShow)
                ) {
                    warn!(payment_id = %payment.id, %reservation_id, ?status, "repairing unconfirmed reservation");
                    self.confirm(payment, None, now).await?;
                }
                Ok(())
            }
            PaymentStatus::Failed => self.cancel_for_failure(payment, FAILED_REASON.to_string(), now).await,
            PaymentStatus::Pending => Ok(()),
        }
    }

    /// `paid` when the store accepts it, then `confirmed`. Failing to reach
    /// `confirmed` after money moved is an integrity failure.
    async fn confirm(&self, payment: &Payment, event_id: Option<String>, now: Ms) -> Result<(), ReconcileError> {
        let Some(reservation_id) = payment.reservation_id else {
            return Err(self.integrity(payment.id, None, "payment has no reservation".into()));
        };
        let applied = PaymentApplication {
            payment_id: payment.id,
            event_id,
            amount: payment.amount,
        };
        if let Err(e) = self
            .engine
            .advance_reservation(reservation_id, ReservationStatus::Paid, Some(applied.clone()), now)
            .await
        {
            debug!(payment_id = %payment.id, %reservation_id, "paid step skipped: {e}");
        }
        self.engine
            .advance_reservation(reservation_id, ReservationStatus::Confirmed, Some(applied), now)
            .await
            .map_err(|e| self.integrity(payment.id, Some(reservation_id), e.to_string()))?;
        info!(payment_id = %payment.id, %reservation_id, amount = %payment.amount, "reservation confirmed");
        Ok(())
    }

    fn integrity(&self, payment_id: Ulid, reservation_id: Option<Ulid>, reason: String) -> ReconcileError {
        error!(%payment_id, ?reservation_id, %reason, "payment completed but reservation not confirmed");
        metrics::counter!(INTEGRITY_FAILURES_TOTAL).increment(1);
        ReconcileError::Integrity {
            payment_id,
            reservation_id,
            reason,
        }
    }

    /// Cancel the reservation a failed payment was meant to cover, if it is
    /// still waiting on that payment.
    async fn cancel_for_failure(&self, payment: &Payment, reason: String, now: Ms) -> Result<(), ReconcileError> {
        let Some(reservation_id) = payment.reservation_id else {
            return Ok(());
        };
        if self.engine.latest_payment_for_reservation(&reservation_id) != Some(payment.id) {
            info!(payment_id = %payment.id, %reservation_id, "newer payment exists, keeping reservation");
            return Ok(());
        }
        let status = self.engine.reservation_status(reservation_id).await?;
        if !matches!(status, ReservationStatus::PendingPayment | ReservationStatus::Pending) {
            return Ok(());
        }
        match self
            .engine
            .cancel_reservation(reservation_id, Actor::System, reason, now)
            .await
        {
            Ok(()) => Ok(()),
            // Raced with another cancellation.
            Err(EngineError::Policy(Policy::NotCancellable(_))) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reason_is_cut_on_char_boundary() {
        let long = "é".repeat(MAX_REASON_LEN);
        let cut = bounded_reason(long);
        assert!(cut.len() <= MAX_REASON_LEN);
        assert!(cut.chars().all(|c| c == 'é'));
        assert_eq!(bounded_reason("short".into()), "short");
    }

    #[test]
    fn failed_mark_only_from_pending() {
        let mut p = Payment {
            id: Ulid::new(),
            reservation_id: None,
            gateway_id: None,
            source_id: None,
            amount: Decimal::new(100, 0),
            status: PaymentStatus::Pending,
            processed_events: Default::default(),
            lock: Some(AdvisoryLock {
                event_id: "evt_a".into(),
                acquired_at: 0,
            }),
            failure_reason: None,
            history: Vec::new(),
            created_at: 0,
        };
        release_own_lock(&mut p, "evt_b", 1);
        assert!(p.lock.is_some());
        release_own_lock(&mut p, "evt_a", 1);
        assert!(p.lock.is_none());

        assert!(mark_failed(&mut p, "declined", "evt_a", 2));
        assert!(!mark_completed(&mut p, Decimal::ONE, "evt_c", 3));
        assert_eq!(p.status, PaymentStatus::Failed);
        assert_eq!(p.failure_reason.as_deref(), Some("declined"));
    }
}
