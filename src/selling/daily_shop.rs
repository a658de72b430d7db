//! Daily sums per marketplace shop.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use crate::commons::error::Error;
use crate::commons::storage::{Key, Segment, SegmentBuf};
use crate::metric::Aggregate;
use super::{amounts, family_scope};


//------------ ShopAmounts ---------------------------------------------------

amounts! {
    /// The amounts tracked per shop and per team.
    pub struct ShopAmounts {
        /// Order totals by the day the order was placed.
        pub created_order_amount,

        /// Order totals by the day the order was entered.
        pub sys_created_order_amount,

        /// Order totals of orders paid out by the marketplace.
        pub est_withdrawal_amount,

        /// What the marketplace actually paid out.
        pub withdrawal_amount,

        pub mp_adjustment_amount,
        pub ads_spent_amount,
        pub warehouse_fee_amount,
        pub return_created_amount,
        pub return_arrived_amount,
        pub cancel_order_amount,
        pub problem_order_amount,
        pub lost_order_amount,
    }
}


//------------ DailyShop -----------------------------------------------------

/// The sums of one marketplace shop on one day.
///
/// Stored under `metric/daily_shop/<day>/<team>/<shop>`.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct DailyShop {
    pub day: SegmentBuf,
    pub team_id: u64,
    pub shop_id: u64,

    #[serde(flatten)]
    pub amounts: ShopAmounts,

    /// The difference between expected and actual payouts.
    ///
    /// Only set on emitted totals.
    #[serde(default)]
    pub adj_order_amount: f64,

    /// When the total was emitted.
    #[serde(default)]
    pub freshness: Option<DateTime<Utc>>,
}

impl DailyShop {
    pub const FAMILY: &'static Segment = &Segment::make("daily_shop");

    /// Creates a delta with the given amounts.
    pub fn new(
        day: SegmentBuf, team_id: u64, shop_id: u64, amounts: ShopAmounts
    ) -> Self {
        DailyShop {
            day, team_id, shop_id, amounts,
            adj_order_amount: 0.,
            freshness: None,
        }
    }

    /// Returns the key of the total for a day, team and shop.
    pub fn key_for(day: &SegmentBuf, team_id: u64, shop_id: u64) -> Key {
        let mut scope = family_scope(Self::FAMILY);
        scope.add_sub_scope(day.clone());
        scope.add_sub_scope(team_id);
        Key::new_scoped(scope, shop_id)
    }

    /// Prepares a total for output.
    pub fn finalize(mut self) -> Result<Self, Error> {
        self.adj_order_amount = self.amounts.est_withdrawal_amount
            - self.amounts.withdrawal_amount;
        self.freshness = Some(Utc::now());
        Ok(self)
    }
}

impl Aggregate for DailyShop {
    fn key(&self) -> Key {
        Self::key_for(&self.day, self.team_id, self.shop_id)
    }

    fn merge(self, older: Self) -> Self {
        DailyShop {
            amounts: self.amounts.add(older.amounts),
            adj_order_amount: 0.,
            freshness: self.freshness.or(older.freshness),
            ..self
        }
    }

    fn negate(&self) -> Self {
        DailyShop {
            amounts: self.amounts.negate(),
            ..self.clone()
        }
    }
}


//============ Tests =========================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn shop(amounts: ShopAmounts) -> DailyShop {
        DailyShop::new("2025-08-01".parse().unwrap(), 2, 3, amounts)
    }

    #[test]
    fn key_and_serialization() {
        let total = shop(ShopAmounts {
            withdrawal_amount: 90.0, est_withdrawal_amount: 100.0,
            ..Default::default()
        });
        assert_eq!(total.key().to_string(), "metric/daily_shop/2025-08-01/2/3");

        let value = serde_json::to_value(&total).unwrap();
        assert_eq!(value["day"], json!("2025-08-01"));
        assert_eq!(value["withdrawal_amount"], json!(90.0));
        assert_eq!(serde_json::from_value::<DailyShop>(value).unwrap(), total);
    }

    #[test]
    fn merge_sums_amounts() {
        let merged = shop(ShopAmounts {
            ads_spent_amount: 10.0, ..Default::default()
        }).merge(shop(ShopAmounts {
            ads_spent_amount: 5.0, created_order_amount: 1.0,
            ..Default::default()
        }));
        assert_eq!(merged.amounts.ads_spent_amount, 15.0);
        assert_eq!(merged.amounts.created_order_amount, 1.0);

        let undone = merged.clone().merge(merged.negate());
        assert!(undone.amounts.is_zero());
    }

    #[test]
    fn finalize_derives_adjustment() {
        let total = shop(ShopAmounts {
            withdrawal_amount: 90.0, est_withdrawal_amount: 100.0,
            ..Default::default()
        }).finalize().unwrap();
        assert_eq!(total.adj_order_amount, 10.0);
        assert!(total.freshness.is_some());
    }
}
