//! Daily reconciliation of bank balances.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use crate::commons::error::Error;
use crate::commons::storage::{Key, Segment, SegmentBuf};
use crate::metric::Aggregate;
use super::{amounts, family_scope, DailyShop};


//------------ BankAmounts ---------------------------------------------------

amounts! {
    pub struct BankAmounts {
        /// Payouts received from marketplaces.
        pub withdrawal_amount,

        /// Money spent on advertising.
        pub ads_cost_amount,

        pub warehouse_fee_amount,

        /// The day-over-day change of the team’s accounts other than
        /// ShopeePay wallets.
        pub actual_diff_amount,
    }
}


//------------ DailyBank -----------------------------------------------------

/// The expected and actual balance change of a team on one day.
///
/// Stored under `metric/daily_bank/<day>/<team>`.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct DailyBank {
    pub day: SegmentBuf,
    pub team_id: u64,

    #[serde(flatten)]
    pub amounts: BankAmounts,

    /// The expected change, only set on emitted totals.
    #[serde(default)]
    pub diff_amount: f64,

    /// The actual minus the expected change, only set on emitted totals.
    #[serde(default)]
    pub err_diff_amount: f64,

    #[serde(default)]
    pub freshness: Option<DateTime<Utc>>,
}

impl DailyBank {
    pub const FAMILY: &'static Segment = &Segment::make("daily_bank");

    pub fn new(day: SegmentBuf, team_id: u64, amounts: BankAmounts) -> Self {
        DailyBank {
            day, team_id, amounts,
            diff_amount: 0.,
            err_diff_amount: 0.,
            freshness: None,
        }
    }

    pub fn key_for(day: &SegmentBuf, team_id: u64) -> Key {
        let mut scope = family_scope(Self::FAMILY);
        scope.add_sub_scope(day.clone());
        Key::new_scoped(scope, team_id)
    }

    /// Returns the bank delta of a shop delta.
    ///
    /// Returns `None` if the shop delta doesn’t touch any bank amount.
    pub fn project(shop: &DailyShop) -> Option<Self> {
        let amounts = BankAmounts {
            withdrawal_amount: shop.amounts.withdrawal_amount,
            ads_cost_amount: shop.amounts.ads_spent_amount,
            warehouse_fee_amount: shop.amounts.warehouse_fee_amount,
            actual_diff_amount: 0.,
        };
        if amounts.is_zero() {
            None
        }
        else {
            Some(DailyBank::new(shop.day.clone(), shop.team_id, amounts))
        }
    }

    /// Prepares a total for output.
    pub fn finalize(mut self) -> Result<Self, Error> {
        self.diff_amount = self.amounts.withdrawal_amount
            - self.amounts.ads_cost_amount
            - self.amounts.warehouse_fee_amount;
        self.err_diff_amount = self.amounts.actual_diff_amount
            - self.diff_amount;
        self.freshness = Some(Utc::now());
        Ok(self)
    }
}

impl Aggregate for DailyBank {
    fn key(&self) -> Key {
        Self::key_for(&self.day, self.team_id)
    }

    fn merge(self, older: Self) -> Self {
        DailyBank {
            amounts: self.amounts.add(older.amounts),
            diff_amount: 0.,
            err_diff_amount: 0.,
            freshness: self.freshness.or(older.freshness),
            ..self
        }
    }

    fn negate(&self) -> Self {
        DailyBank {
            amounts: self.amounts.negate(),
            ..self.clone()
        }
    }
}


//============ Tests =========================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::selling::ShopAmounts;

    #[test]
    fn projection_keeps_bank_amounts() {
        let shop = DailyShop::new(
            "2025-08-01".parse().unwrap(), 2, 3,
            ShopAmounts {
                withdrawal_amount: 100.0,
                ads_spent_amount: 20.0,
                created_order_amount: 500.0,
                ..Default::default()
            }
        );
        let bank = DailyBank::project(&shop).unwrap();
        assert_eq!(bank.key().to_string(), "metric/daily_bank/2025-08-01/2");
        assert_eq!(bank.amounts.withdrawal_amount, 100.0);
        assert_eq!(bank.amounts.ads_cost_amount, 20.0);

        let orders_only = DailyShop::new(
            "2025-08-01".parse().unwrap(), 2, 3,
            ShopAmounts { created_order_amount: 500.0, ..Default::default() }
        );
        assert!(DailyBank::project(&orders_only).is_none());
    }

    #[test]
    fn finalize_reconciles() {
        let bank = DailyBank::new(
            "2025-08-01".parse().unwrap(), 2,
            BankAmounts {
                withdrawal_amount: 100.0,
                ads_cost_amount: 20.0,
                warehouse_fee_amount: 5.0,
                actual_diff_amount: 70.0,
            }
        ).finalize().unwrap();
        assert_eq!(bank.diff_amount, 75.0);
        assert_eq!(bank.err_diff_amount, -5.0);
    }
}
