//! Scheduled sweeps. Each due item runs in its own unit so one failure never
//! holds back the rest.

use std::time::Duration as StdDuration;

use chrono::Duration;
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

use super::orders::OrderService;
use super::payment::cancel_unpaid;
use super::refunds::RefundService;
use super::Context;
use crate::Result;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub processed: usize,
    pub failed: usize,
}

impl SweepReport {
    fn record(&mut self, sweep: &'static str, id: Uuid, outcome: Result<bool>) {
        match outcome {
            Ok(true) => self.processed += 1,
            Ok(false) => {}
            Err(e) => {
                self.failed += 1;
                warn!(sweep, id = %id, error = %e, "sweep item failed");
            }
        }
    }
}

#[derive(Clone)]
pub struct SweepService {
    ctx: Context,
    orders: OrderService,
    refunds: RefundService,
    rejection_grace: Duration,
}

impl SweepService {
    pub(crate) fn new(ctx: Context, orders: OrderService, refunds: RefundService, rejection_grace: Duration) -> Self {
        Self { ctx, orders, refunds, rejection_grace }
    }

    /// Orders still on delivery past their arrival deadline become completed.
    pub async fn complete_due_deliveries(&self) -> Result<SweepReport> {
        let now = self.ctx.clock.now();
        let ids = {
            let mut uow = self.ctx.store.begin().await?;
            uow.due_deliveries(now).await?
        };
        let mut report = SweepReport::default();
        for id in ids {
            report.record("due_deliveries", id, self.orders.complete_if_due(id).await);
        }
        info!(processed = report.processed, failed = report.failed, "due deliveries swept");
        Ok(report)
    }

    /// Card transactions nobody paid before their deadline are canceled with their orders.
    pub async fn expire_unpaid_transactions(&self) -> Result<SweepReport> {
        let now = self.ctx.clock.now();
        let ids = {
            let mut uow = self.ctx.store.begin().await?;
            uow.overdue_transactions(now).await?
        };
        let mut report = SweepReport::default();
        for id in ids {
            report.record("unpaid_transactions", id, self.expire_one(id).await);
        }
        info!(processed = report.processed, failed = report.failed, "unpaid transactions swept");
        Ok(report)
    }

    async fn expire_one(&self, transaction_id: Uuid) -> Result<bool> {
        let now = self.ctx.clock.now();
        let mut events = Vec::new();
        let mut uow = self.ctx.store.begin().await?;
        let Some(mut transaction) = uow.transaction(transaction_id).await? else {
            return Ok(false);
        };
        if !transaction.is_overdue(now) {
            return Ok(false);
        }
        cancel_unpaid(uow.as_mut(), &mut transaction, now, &mut events).await?;
        uow.commit().await?;
        self.ctx.notifier.dispatch_all(events);
        Ok(true)
    }

    /// Rejected refunds past the grace period hand the order back to its earlier status.
    pub async fn process_rejected_refunds(&self) -> Result<SweepReport> {
        let before = self.ctx.clock.now() - self.rejection_grace;
        let ids = {
            let mut uow = self.ctx.store.begin().await?;
            uow.settled_rejections(before).await?
        };
        let mut report = SweepReport::default();
        for id in ids {
            report.record("rejected_refunds", id, self.refunds.restore_if_settled(id).await);
        }
        info!(processed = report.processed, failed = report.failed, "rejected refunds swept");
        Ok(report)
    }

    pub async fn run_all(&self) -> Result<[SweepReport; 3]> {
        Ok([
            self.complete_due_deliveries().await?,
            self.expire_unpaid_transactions().await?,
            self.process_rejected_refunds().await?,
        ])
    }

    /// Runs every sweep once per `period` until the runtime shuts down.
    pub fn run_every(self, period: StdDuration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if let Err(e) = self.run_all().await {
                    warn!(error = %e, "sweep run aborted");
                }
            }
        })
    }
}
