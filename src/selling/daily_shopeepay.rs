//! Daily reconciliation of ShopeePay wallets.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use crate::commons::error::Error;
use crate::commons::storage::{Key, Segment, SegmentBuf};
use crate::metric::Aggregate;
use super::{amounts, family_scope, SellingContext};


//------------ ShopeepayAmounts ----------------------------------------------

amounts! {
    pub struct ShopeepayAmounts {
        /// The day-over-day change of the team’s ShopeePay balances.
        pub actual_diff_amount,

        /// Restock refunds paid back onto the wallet.
        pub refund_amount,

        /// Restocks paid from the wallet, including the COD fee.
        pub cost_amount,

        /// Money moved onto the wallet.
        pub topup_amount,
    }
}


//------------ DailyShopeepay ------------------------------------------------

/// The expected and actual ShopeePay balance change of a team on one day.
///
/// Stored under `metric/daily_shopeepay_balance/<day>/<team>`.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct DailyShopeepay {
    pub day: SegmentBuf,
    pub team_id: u64,

    #[serde(flatten)]
    pub amounts: ShopeepayAmounts,

    #[serde(default)]
    pub team_name: String,

    /// Refunds and topups minus costs, only set on emitted totals.
    #[serde(default)]
    pub diff_amount: f64,

    /// The actual minus the expected change, only set on emitted totals.
    #[serde(default)]
    pub err_diff_amount: f64,

    #[serde(default)]
    pub freshness: Option<DateTime<Utc>>,
}

impl DailyShopeepay {
    pub const FAMILY: &'static Segment = &Segment::make(
        "daily_shopeepay_balance"
    );

    pub fn new(
        day: SegmentBuf, team_id: u64, amounts: ShopeepayAmounts
    ) -> Self {
        DailyShopeepay {
            day, team_id, amounts,
            team_name: String::new(),
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

    /// Prepares a total for output.
    pub fn finalize(mut self, context: &SellingContext) -> Result<Self, Error> {
        self.diff_amount = self.amounts.refund_amount
            + self.amounts.topup_amount
            - self.amounts.cost_amount;
        self.err_diff_amount = self.amounts.actual_diff_amount
            - self.diff_amount;
        self.team_name = context.team_name(self.team_id)?;
        self.freshness = Some(Utc::now());
        Ok(self)
    }
}

impl Aggregate for DailyShopeepay {
    fn key(&self) -> Key {
        Self::key_for(&self.day, self.team_id)
    }

    fn merge(self, older: Self) -> Self {
        let team_name = if self.team_name.is_empty() {
            older.team_name
        }
        else {
            self.team_name
        };
        DailyShopeepay {
            amounts: self.amounts.add(older.amounts),
            team_name,
            diff_amount: 0.,
            err_diff_amount: 0.,
            freshness: self.freshness.or(older.freshness),
            ..self
        }
    }

    fn negate(&self) -> Self {
        DailyShopeepay {
            amounts: self.amounts.negate(),
            ..self.clone()
        }
    }
}


//============ Tests =========================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Model, Team};
    use crate::selling::tests::context;

    #[test]
    fn finalize_reconciles() {
        let (store, context) = context();
        store.store(
            &Team::source().identity_key(2u64),
            &Team { id: 2, name: "Gamma".into(), ..Default::default() }
        ).unwrap();

        let total = DailyShopeepay::new(
            "2025-08-01".parse().unwrap(), 2,
            ShopeepayAmounts {
                actual_diff_amount: 40.0,
                refund_amount: 10.0,
                cost_amount: 120.0,
                topup_amount: 150.0,
            }
        ).finalize(&context).unwrap();
        assert_eq!(
            total.key().to_string(),
            "metric/daily_shopeepay_balance/2025-08-01/2"
        );
        assert_eq!(total.team_name, "Gamma");
        assert_eq!(total.diff_amount, 40.0);
        assert_eq!(total.err_diff_amount, 0.0);
    }
}
