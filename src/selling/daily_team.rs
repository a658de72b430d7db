//! Daily sums per team.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use crate::commons::error::Error;
use crate::commons::storage::{Key, Segment, SegmentBuf};
use crate::metric::Aggregate;
use super::{family_scope, DailyShop, SellingContext, ShopAmounts};


//------------ DailyTeam -----------------------------------------------------

/// The sums of all shops of a team on one day.
///
/// Stored under `metric/daily_team/<day>/<team>`.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct DailyTeam {
    pub day: SegmentBuf,
    pub team_id: u64,

    #[serde(flatten)]
    pub amounts: ShopAmounts,

    #[serde(default)]
    pub adj_order_amount: f64,

    /// The name of the team at the time the total was emitted.
    #[serde(default)]
    pub team_name: String,

    #[serde(default)]
    pub freshness: Option<DateTime<Utc>>,
}

impl DailyTeam {
    pub const FAMILY: &'static Segment = &Segment::make("daily_team");

    pub fn key_for(day: &SegmentBuf, team_id: u64) -> Key {
        let mut scope = family_scope(Self::FAMILY);
        scope.add_sub_scope(day.clone());
        Key::new_scoped(scope, team_id)
    }

    /// Returns the team delta of a shop delta.
    pub fn project(shop: &DailyShop) -> Self {
        DailyTeam {
            day: shop.day.clone(),
            team_id: shop.team_id,
            amounts: shop.amounts,
            adj_order_amount: 0.,
            team_name: String::new(),
            freshness: None,
        }
    }

    /// Prepares a total for output.
    ///
    /// Looks up the current name of the team.
    pub fn finalize(mut self, context: &SellingContext) -> Result<Self, Error> {
        self.adj_order_amount = self.amounts.est_withdrawal_amount
            - self.amounts.withdrawal_amount;
        self.team_name = context.team_name(self.team_id)?;
        self.freshness = Some(Utc::now());
        Ok(self)
    }
}

impl Aggregate for DailyTeam {
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
        DailyTeam {
            amounts: self.amounts.add(older.amounts),
            adj_order_amount: 0.,
            team_name,
            freshness: self.freshness.or(older.freshness),
            ..self
        }
    }

    fn negate(&self) -> Self {
        DailyTeam {
            amounts: self.amounts.negate(),
            ..self.clone()
        }
    }
}


//============ Tests =========================================================
