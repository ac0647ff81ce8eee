//! Settlement state machine shared by the confirmed track and the catch-up worker.
//!
//! All arithmetic is done on integer smallest units. The order amount is reduced
//! by a [`PaymentCovering`] tolerance before comparing against the cumulative
//! transferred amount.

use crate::entities::OrderStatus;
use crate::entities::payment_order::PaymentOrder;
use crate::units::{UnitError, from_smallest_unit, to_smallest_unit};
use alloy::primitives::U256;
use rust_decimal::Decimal;

/// Computes the smallest cumulative payment that settles an order in full.
pub trait PaymentCovering: Send + Sync {
    fn minimum_accepted(&self, order_amount: U256, decimals: u8) -> Result<U256, UnitError>;
}

/// Accept payments short of the amount by at most `discount` whole tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AbsoluteDiscount {
    pub discount: Decimal,
}

impl PaymentCovering for AbsoluteDiscount {
    fn minimum_accepted(&self, order_amount: U256, decimals: u8) -> Result<U256, UnitError> {
        let discount = to_smallest_unit(self.discount, decimals)?;
        Ok(order_amount.saturating_sub(discount))
    }
}

/// Accept payments short of the amount by at most `percent` percent.
///
/// Factors outside `[0, 100]` disable the tolerance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PercentageDiscount {
    pub percent: Decimal,
}

impl PaymentCovering for PercentageDiscount {
    fn minimum_accepted(&self, order_amount: U256, _decimals: u8) -> Result<U256, UnitError> {
        if self.percent < Decimal::ZERO || self.percent > Decimal::ONE_HUNDRED {
            return Ok(order_amount);
        }
        let kept = (Decimal::ONE_HUNDRED - self.percent) / Decimal::ONE_HUNDRED;
        crate::units::scale_by(order_amount, kept)
    }
}

/// Covering policy selected by configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoveringStrategy {
    Absolute(AbsoluteDiscount),
    Percentage(PercentageDiscount),
}

impl Default for CoveringStrategy {
    fn default() -> Self {
        CoveringStrategy::Absolute(AbsoluteDiscount {
            discount: Decimal::ZERO,
        })
    }
}

impl PaymentCovering for CoveringStrategy {
    fn minimum_accepted(&self, order_amount: U256, decimals: u8) -> Result<U256, UnitError> {
        match self {
            CoveringStrategy::Absolute(s) => s.minimum_accepted(order_amount, decimals),
            CoveringStrategy::Percentage(s) => s.minimum_accepted(order_amount, decimals),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SettlementInput {
    pub status: OrderStatus,
    pub transferred: U256,
    pub minimum_accepted: U256,
    pub incoming_value: U256,
    pub current_block: u64,
    pub upcoming_block_height: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Settlement {
    pub status: OrderStatus,
    pub transferred: U256,
    pub changed: bool,
}

/// Apply one incoming transfer to an order's settlement state.
///
/// A log from a block earlier than `upcoming_block_height` leaves the order in
/// Processing, since a newer tentative observation is still outstanding.
/// Expired orders are only reachable from the catch-up worker: they may still
/// become Success, and otherwise stay Expired while accumulating payments.
pub fn compute_settlement(input: &SettlementInput) -> Settlement {
    let unchanged = Settlement {
        status: input.status,
        transferred: input.transferred,
        changed: false,
    };
    if matches!(input.status, OrderStatus::Success | OrderStatus::Failed) {
        return unchanged;
    }

    let total = input.transferred.saturating_add(input.incoming_value);
    let behind_tentative = input.current_block < input.upcoming_block_height;
    let expired = input.status == OrderStatus::Expired;

    let status = if total >= input.minimum_accepted && !total.is_zero() {
        if behind_tentative && !expired {
            OrderStatus::Processing
        } else {
            OrderStatus::Success
        }
    } else if !total.is_zero() {
        if expired {
            OrderStatus::Expired
        } else if behind_tentative {
            OrderStatus::Processing
        } else {
            OrderStatus::Partial
        }
    } else {
        return unchanged;
    };

    Settlement {
        status,
        transferred: total,
        changed: status != input.status || total != input.transferred,
    }
}

/// Settlement result expressed in the order's human-readable units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SettlementOutcome {
    pub status: OrderStatus,
    pub transferred: Decimal,
    /// The incoming transfer value.
    pub credited: Decimal,
    pub changed: bool,
}

/// Convert an order to smallest units, run [`compute_settlement`] and convert back.
pub fn settle_order(
    order: &PaymentOrder,
    decimals: u8,
    covering: &dyn PaymentCovering,
    incoming_value: U256,
    current_block: u64,
) -> Result<SettlementOutcome, UnitError> {
    let order_amount = to_smallest_unit(order.amount, decimals)?;
    let transferred = to_smallest_unit(order.transferred, decimals)?;
    let settlement = compute_settlement(&SettlementInput {
        status: order.status,
        transferred,
        minimum_accepted: covering.minimum_accepted(order_amount, decimals)?,
        incoming_value,
        current_block,
        upcoming_block_height: order.upcoming_block_height.max(0) as u64,
    });
    Ok(SettlementOutcome {
        status: settlement.status,
        transferred: from_smallest_unit(settlement.transferred, decimals)?,
        credited: from_smallest_unit(incoming_value, decimals)?,
        changed: settlement.changed,
    })
}
