//! Payment Service
//!
//! Posts and reverses payments against purchase orders. The amount paid and
//! the pending-settlement flag are always re-derived from the live payments.

use crate::{
    db::{self, DbPool},
    entities::{
        payment::{self, Entity as Payment, PaymentType},
        purchase_order::{self, Entity as PurchaseOrder, PaymentMethod, PurchaseOrderStatus},
    },
    errors::ServiceError,
    events::{Event, EventSender},
    money::ensure_positive,
    services::purchase_orders::save_order,
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter,
    QueryOrder, QuerySelect, Set,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, instrument};
use uuid::Uuid;

/// Payment-derived fields of a purchase order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementState {
    pub amount_paid: Decimal,
    pub pending_settlement: bool,
}

/// Derives the settlement state from the full set of live payment amounts.
///
/// Only credit-term and wire-transfer orders can be pending settlement.
pub fn settlement_state<I>(total: Decimal, amounts: I, method: PaymentMethod) -> SettlementState
where
    I: IntoIterator<Item = Decimal>,
{
    let amount_paid: Decimal = amounts.into_iter().sum();
    SettlementState {
        amount_paid,
        pending_settlement: method.carries_settlement() && amount_paid < total,
    }
}

/// Amounts of the order's payments that have not been reversed.
pub(crate) async fn live_payment_amounts<C: ConnectionTrait>(
    conn: &C,
    purchase_order_id: Uuid,
) -> Result<Vec<Decimal>, ServiceError> {
    let payments = Payment::find()
        .filter(payment::Column::PurchaseOrderId.eq(purchase_order_id))
        .filter(payment::Column::ReversedAt.is_null())
        .all(conn)
        .await?;
    Ok(payments.into_iter().map(|p| p.amount).collect())
}

/// Re-sums the payments of a locked order and writes the derived fields.
async fn reconcile<C: ConnectionTrait>(
    conn: &C,
    order: purchase_order::Model,
) -> Result<purchase_order::Model, ServiceError> {
    let amounts = live_payment_amounts(conn, order.id).await?;
    let state = settlement_state(order.total, amounts, order.payment_method);

    save_order(conn, order, |active| {
        active.amount_paid = Set(state.amount_paid);
        active.pending_settlement = Set(state.pending_settlement);
    })
    .await
}

/// Posts and reverses payments, keeping each order's settlement state in step.
#[derive(Clone)]
pub struct PaymentService {
    db_pool: Arc<DbPool>,
    event_sender: EventSender,
}

impl PaymentService {
    pub fn new(db_pool: Arc<DbPool>, event_sender: EventSender) -> Self {
        Self {
            db_pool,
            event_sender,
        }
    }

    #[instrument(skip(self))]
    pub async fn post_payment(
        &self,
        purchase_order_id: Uuid,
        amount: Decimal,
        payment_type: PaymentType,
        reference: Option<String>,
    ) -> Result<purchase_order::Model, ServiceError> {
        ensure_positive(amount, "amount")?;

        let started = Instant::now();
        let txn = db::begin_transaction(&self.db_pool).await?;

        let order = PurchaseOrder::find_by_id(purchase_order_id)
            .lock_exclusive()
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::not_found("Purchase order", purchase_order_id))?;

        if matches!(
            order.status,
            PurchaseOrderStatus::Cancelled | PurchaseOrderStatus::Closed
        ) {
            return Err(ServiceError::invalid_transition(
                "Purchase order",
                order.id,
                order.status,
                "PaymentPosted",
            ));
        }

        let now = Utc::now();
        let payment = payment::ActiveModel {
            id: Set(Uuid::new_v4()),
            purchase_order_id: Set(purchase_order_id),
            amount: Set(amount),
            payment_type: Set(payment_type),
            reference: Set(reference),
            paid_at: Set(now),
            reversed_at: Set(None),
            reversal_reason: Set(None),
            created_at: Set(now),
        }
        .insert(&txn)
        .await?;

        let order = reconcile(&txn, order).await?;
        db::commit_transaction(txn, started).await?;

        info!(
            purchase_order_id = %order.id,
            payment_id = %payment.id,
            amount_paid = %order.amount_paid,
            pending_settlement = order.pending_settlement,
            "Payment posted"
        );

        self.event_sender
            .publish(Event::PaymentPosted {
                purchase_order_id: order.id,
                payment_id: payment.id,
                amount,
                pending_settlement: order.pending_settlement,
            });

        Ok(order)
    }

    /// Reverses a payment once; the order's settlement state is re-derived.
    #[instrument(skip(self))]
    pub async fn reverse_payment(
        &self,
        payment_id: Uuid,
        reason: String,
    ) -> Result<purchase_order::Model, ServiceError> {
        let started = Instant::now();
        let txn = db::begin_transaction(&self.db_pool).await?;

        let payment = Payment::find_by_id(payment_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::not_found("Payment", payment_id))?;

        if payment.is_reversed() {
            return Err(ServiceError::AlreadyReversed(payment_id));
        }

        let order = PurchaseOrder::find_by_id(payment.purchase_order_id)
            .lock_exclusive()
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::not_found("Purchase order", payment.purchase_order_id))?;

        if order.status == PurchaseOrderStatus::Closed {
            return Err(ServiceError::ValidationError(format!(
                "payments of closed purchase order {} cannot be reversed",
                order.id
            )));
        }

        let reversed = Payment::update_many()
            .col_expr(payment::Column::ReversedAt, Expr::value(Utc::now()))
            .col_expr(payment::Column::ReversalReason, Expr::value(reason))
            .filter(payment::Column::Id.eq(payment_id))
            .filter(payment::Column::ReversedAt.is_null())
            .exec(&txn)
            .await?;
        if reversed.rows_affected == 0 {
            return Err(ServiceError::AlreadyReversed(payment_id));
        }

        let order = reconcile(&txn, order).await?;
        db::commit_transaction(txn, started).await?;

        info!(
            purchase_order_id = %order.id,
            payment_id = %payment_id,
            amount_paid = %order.amount_paid,
            "Payment reversed"
        );

        self.event_sender
            .publish(Event::PaymentReversed {
                purchase_order_id: order.id,
                payment_id,
                amount: payment.amount,
                pending_settlement: order.pending_settlement,
            });

        Ok(order)
    }

    /// Re-derives `amount_paid` and `pending_settlement` from the payment set.
    #[instrument(skip(self))]
    pub async fn recompute_settlement(
        &self,
        purchase_order_id: Uuid,
    ) -> Result<purchase_order::Model, ServiceError> {
        let started = Instant::now();
        let txn = db::begin_transaction(&self.db_pool).await?;

        let order = PurchaseOrder::find_by_id(purchase_order_id)
            .lock_exclusive()
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::not_found("Purchase order", purchase_order_id))?;

        let order = reconcile(&txn, order).await?;
        db::commit_transaction(txn, started).await?;
        Ok(order)
    }

    #[instrument(skip(self))]
    pub async fn list_payments(
        &self,
        purchase_order_id: Uuid,
    ) -> Result<Vec<payment::Model>, ServiceError> {
        Ok(Payment::find()
            .filter(payment::Column::PurchaseOrderId.eq(purchase_order_id))
            .order_by_asc(payment::Column::PaidAt)
            .all(&*self.db_pool)
            .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use rust_decimal_macros::dec;

    #[rstest]
    #[case(PaymentMethod::CreditTerm, vec![dec!(50)], true)]
    #[case(PaymentMethod::WireTransfer, vec![dec!(60), dec!(40)], false)]
    #[case(PaymentMethod::WireTransfer, vec![], true)]
    #[case(PaymentMethod::Cash, vec![dec!(10)], false)]
    #[case(PaymentMethod::Card, vec![], false)]
    fn pending_settlement_depends_on_method(
        #[case] method: PaymentMethod,
        #[case] amounts: Vec<Decimal>,
        #[case] pending: bool,
    ) {
        let state = settlement_state(dec!(100), amounts, method);
        assert_eq!(state.pending_settlement, pending);
    }

    #[test]
    fn amount_paid_is_the_plain_sum() {
        let state = settlement_state(
            dec!(100),
            vec![dec!(10.50), dec!(20.25), dec!(69.25)],
            PaymentMethod::CreditTerm,
        );
        assert_eq!(state.amount_paid, dec!(100.00));
        assert!(!state.pending_settlement);
    }

    #[test]
    fn overpayment_clears_the_flag() {
        let state = settlement_state(dec!(100), vec![dec!(150)], PaymentMethod::CreditTerm);
        assert!(!state.pending_settlement);
    }
}
