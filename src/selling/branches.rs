//! The contributions of the source tables.
//!
//! Each branch turns one version of a row into the deltas it adds to the
//! daily sums. Rows whose contribution depends on another row look that
//! row up through the [`SellingContext`].

use crate::change::{ChangeEvent, Record, Source};
use crate::commons::error::Error;
use crate::commons::storage::Key;
use crate::models::{
    AdjustmentType, AdsExpenseHistory, ExpenseHistory, InvResolution,
    InvTransaction, InvTxStatus, InvTxType, Order, OrderAdjustment,
    OrderStatus, OrderTimestamp, PaymentType, RestockCost,
};
use super::{
    event_deltas, DailyShop, DailyShopeepay, SellingContext, ShopAmounts,
    ShopeepayAmounts,
};


//------------ Entry Points --------------------------------------------------

/// Returns the daily shop deltas of a classified event.
pub fn shop_deltas(
    context: &SellingContext, event: &ChangeEvent
) -> Result<Vec<DailyShop>, Error> {
    let identity = event.identity_key()?;
    event_deltas(event, |record| {
        let mut res = shop_contribution(
            context, &event.source, &identity, record
        )?;
        res.retain(|delta| !delta.amounts.is_zero());
        Ok(res)
    })
}

/// Returns the daily ShopeePay deltas of a classified event.
///
/// The actual balance changes are not included. They come from
/// [`BalanceDiffs`][super::BalanceDiffs].
pub fn shopeepay_deltas(
    context: &SellingContext, event: &ChangeEvent
) -> Result<Vec<DailyShopeepay>, Error> {
    let identity = event.identity_key()?;
    event_deltas(event, |record| {
        let mut res = match record {
            Record::RestockCost(cost) => {
                restock_cost(context, &event.source, &identity, cost)?
            }
            Record::ExpenseHistory(expense) => topup(context, expense)?,
            Record::InvResolution(resolution) => refund(context, resolution)?,
            _ => Vec::new(),
        };
        res.retain(|delta| !delta.amounts.is_zero());
        Ok(res)
    })
}

fn shop_contribution(
    context: &SellingContext,
    source: &Source,
    identity: &Key,
    record: &Record,
) -> Result<Vec<DailyShop>, Error> {
    match record {
        Record::Order(order) => orders(context, order),
        Record::OrderAdjustment(adjustment) => {
            withdrawal(context, source, identity, adjustment)
        }
        Record::AdsExpenseHistory(ads) => ads_expense(context, ads),
        Record::InvTransaction(tx) if !tx.deleted => match tx.kind {
            InvTxType::Order => warehouse_fee(context, source, identity, tx),
            InvTxType::Return => returns(context, source, identity, tx),
            _ => Ok(Vec::new()),
        }
        Record::OrderTimestamp(timestamp) => {
            order_status(context, source, identity, timestamp)
        }
        _ => Ok(Vec::new()),
    }
}


//------------ Shop Branches -------------------------------------------------

/// Orders count on the day they were placed and the day they were entered.
fn orders(
    context: &SellingContext, order: &Order
) -> Result<Vec<DailyShop>, Error> {
    let mut res = Vec::new();
    if let Some(time) = order.order_time {
        res.push(DailyShop::new(
            context.day(time)?, order.team_id, order.order_mp_id,
            ShopAmounts {
                created_order_amount: order.order_mp_total,
                ..Default::default()
            }
        ));
    }
    if let Some(time) = order.created_at {
        res.push(DailyShop::new(
            context.day(time)?, order.team_id, order.order_mp_id,
            ShopAmounts {
                sys_created_order_amount: order.order_mp_total,
                ..Default::default()
            }
        ));
    }
    Ok(res)
}

/// Adjustments count on the day the money arrived.
fn withdrawal(
    context: &SellingContext,
    source: &Source,
    identity: &Key,
    adjustment: &OrderAdjustment,
) -> Result<Vec<DailyShop>, Error> {
    let Some(fund_at) = adjustment.fund_at else {
        return Ok(Vec::new())
    };
    let order = context.order(source, identity, adjustment.order_id)?;
    let amounts = match adjustment.kind {
        AdjustmentType::OrderFund => ShopAmounts {
            est_withdrawal_amount: order.order_mp_total,
            withdrawal_amount: adjustment.amount,
            ..Default::default()
        },
        _ => ShopAmounts {
            mp_adjustment_amount: adjustment.amount,
            ..Default::default()
        }
    };
    Ok(vec![DailyShop::new(
        context.day(fund_at)?, order.team_id, adjustment.mp_id, amounts
    )])
}

fn ads_expense(
    context: &SellingContext, ads: &AdsExpenseHistory
) -> Result<Vec<DailyShop>, Error> {
    let Some(at) = ads.at else {
        return Ok(Vec::new())
    };
    Ok(vec![DailyShop::new(
        context.day(at)?, ads.team_id, ads.marketplace_id,
        ShopAmounts { ads_spent_amount: ads.amount, ..Default::default() }
    )])
}

/// The warehouse fee of an order counts when goods leave the warehouse.
fn warehouse_fee(
    context: &SellingContext,
    source: &Source,
    identity: &Key,
    tx: &InvTransaction,
) -> Result<Vec<DailyShop>, Error> {
    if tx.status == InvTxStatus::Cancel {
        return Ok(Vec::new())
    }
    let Some(created) = tx.created else {
        return Ok(Vec::new())
    };
    let order = context.inv_order(source, identity, tx.id)?;
    Ok(vec![DailyShop::new(
        context.day(created)?, order.team_id, order.shop_id,
        ShopAmounts {
            warehouse_fee_amount: order.warehouse_fee,
            ..Default::default()
        }
    )])
}

/// Returns count when they are created and again when they arrive.
fn returns(
    context: &SellingContext,
    source: &Source,
    identity: &Key,
    tx: &InvTransaction,
) -> Result<Vec<DailyShop>, Error> {
    if tx.created.is_none() && tx.arrived.is_none() {
        return Ok(Vec::new())
    }
    let order = context.inv_order(source, identity, tx.id)?;
    let mut res = Vec::new();
    if let Some(created) = tx.created {
        res.push(DailyShop::new(
            context.day(created)?, order.team_id, order.shop_id,
            ShopAmounts {
                return_created_amount: order.mp_total,
                ..Default::default()
            }
        ));
    }
    if let Some(arrived) = tx.arrived {
        res.push(DailyShop::new(
            context.day(arrived)?, order.team_id, order.shop_id,
            ShopAmounts {
                return_arrived_amount: order.mp_total,
                ..Default::default()
            }
        ));
    }
    Ok(res)
}

/// Cancelled, problematic and lost orders count on the day of the change.
fn order_status(
    context: &SellingContext,
    source: &Source,
    identity: &Key,
    timestamp: &OrderTimestamp,
) -> Result<Vec<DailyShop>, Error> {
    let relevant = matches!(
        timestamp.order_status,
        OrderStatus::Cancel | OrderStatus::Problem | OrderStatus::Lost
    );
    let Some(time) = timestamp.timestamp.filter(|_| relevant) else {
        return Ok(Vec::new())
    };
    let order = context.order(source, identity, timestamp.order_id)?;
    let mut amounts = ShopAmounts::default();
    match timestamp.order_status {
        OrderStatus::Cancel => {
            amounts.cancel_order_amount = order.order_mp_total
        }
        OrderStatus::Problem => {
            amounts.problem_order_amount = order.order_mp_total
        }
        _ => amounts.lost_order_amount = order.order_mp_total,
    }
    Ok(vec![DailyShop::new(
        context.day(time)?, order.team_id, order.order_mp_id, amounts
    )])
}


//------------ ShopeePay Branches --------------------------------------------

/// Restocks paid from the wallet cost their total plus the COD fee on the
/// day the restock was created.
fn restock_cost(
    context: &SellingContext,
    source: &Source,
    identity: &Key,
    cost: &RestockCost,
) -> Result<Vec<DailyShopeepay>, Error> {
    if cost.payment_type != PaymentType::ShopeePay {
        return Ok(Vec::new())
    }
    let tx = context.inv_transaction(
        source, identity, cost.inv_transaction_id
    )?;
    let Some(created) = tx.created else {
        return Ok(Vec::new())
    };
    Ok(vec![DailyShopeepay::new(
        context.day(created)?, tx.team_id,
        ShopeepayAmounts {
            cost_amount: tx.total + cost.cod_fee,
            ..Default::default()
        }
    )])
}

fn topup(
    context: &SellingContext, expense: &ExpenseHistory
) -> Result<Vec<DailyShopeepay>, Error> {
    if !expense.is_topup() {
        return Ok(Vec::new())
    }
    let Some(at) = expense.at else {
        return Ok(Vec::new())
    };
    Ok(vec![DailyShopeepay::new(
        context.day(at)?, expense.team_id,
        ShopeepayAmounts { topup_amount: expense.amount, ..Default::default() }
    )])
}

/// Refunds count on the day the money came back.
fn refund(
    context: &SellingContext, resolution: &InvResolution
) -> Result<Vec<DailyShopeepay>, Error> {
    if resolution.refund_payment_type != PaymentType::ShopeePay {
        return Ok(Vec::new())
    }
    let Some(fund_at) = resolution.fund_at else {
        return Ok(Vec::new())
    };
    Ok(vec![DailyShopeepay::new(
        context.day(fund_at)?, resolution.team_id,
        ShopeepayAmounts {
            refund_amount: resolution.refund_amount,
            ..Default::default()
        }
    )])
}


//============ Tests =========================================================
