//! Daily selling metrics.
//!
//! Four metric families are maintained from the classified change stream:
//!
//! * [`DailyShop`] sums order, payout, advertising, warehouse and return
//!   amounts per day, team and marketplace shop,
//! * [`DailyTeam`] holds the same sums per day and team,
//! * [`DailyBank`] reconciles the money a team should have received per day
//!   with how its bank accounts actually changed, and
//! * [`DailyShopeepay`] does the same for the team’s ShopeePay wallets.
//!
//! Every source table is handled by a branch in [`branches`] that computes
//! the contribution of one version of a row. The contribution of the new
//! version replaces that of the previous version via
//! [`retraction`][crate::metric::retraction]. Team and bank deltas are
//! projected from the shop deltas, so these families always agree. Actual
//! balance changes come from [`BalanceDiffs`].

pub use self::balance::{BalanceDiff, BalanceDiffs};
pub use self::daily_bank::{BankAmounts, DailyBank};
pub use self::daily_shop::{DailyShop, ShopAmounts};
pub use self::daily_shopeepay::{DailyShopeepay, ShopeepayAmounts};
pub use self::daily_team::DailyTeam;

pub mod balance;
pub mod branches;
mod daily_bank;
mod daily_shop;
mod daily_shopeepay;
mod daily_team;

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use chrono::{DateTime, FixedOffset, Utc};
use crate::change::{ChangeEvent, ModKind, Record, Source};
use crate::commons::error::Error;
use crate::commons::storage::{Key, KeyValueStore, Scope, Segment, SegmentBuf};
use crate::constants::METRIC_SCOPE;
use crate::exactly_once::Resolver;
use crate::metric::{Aggregate, AggregateEngine, FlushListener, retraction};
use crate::models::{
    ExpenseAccount, InvOrderRef, InvTransaction, Model, Order, Team,
};


//------------ amounts! ------------------------------------------------------

/// Defines a struct of summed monetary amounts.
macro_rules! amounts {
    (
        $(#[$attr:meta])*
        pub struct $name:ident {
            $( $(#[$fattr:meta])* pub $field:ident, )*
        }
    ) => {
        $(#[$attr])*
        #[derive(
            Clone, Copy, Debug, Default, serde::Deserialize, PartialEq,
            serde::Serialize
        )]
        #[serde(default)]
        pub struct $name {
            $( $(#[$fattr])* pub $field: f64, )*
        }

        impl $name {
            /// Returns the component-wise sum.
            pub fn add(self, other: Self) -> Self {
                $name { $( $field: self.$field + other.$field, )* }
            }

            /// Returns all amounts negated.
            pub fn negate(self) -> Self {
                $name { $( $field: -self.$field, )* }
            }

            /// Returns whether all amounts are zero.
            pub fn is_zero(&self) -> bool {
                $( self.$field == 0. )&&*
            }
        }
    }
}

pub(crate) use amounts;


//------------ Day -----------------------------------------------------------

/// Turns a point in time into the day bucket it belongs to.
///
/// Days are formatted as `YYYY-MM-DD` in the configured offset.
pub fn day(
    time: DateTime<Utc>, offset: &FixedOffset
) -> Result<SegmentBuf, Error> {
    let day = time.with_timezone(offset).format("%Y-%m-%d").to_string();
    SegmentBuf::from_str(&day).map_err(|err| {
        Error::invalid_key(format!("day '{day}': {err}"))
    })
}

/// Returns the scope of all aggregates of a family.
pub fn family_scope(family: &Segment) -> Scope {
    Scope::new(vec![METRIC_SCOPE.into(), family.into()])
}


//------------ SellingContext ------------------------------------------------

/// What the branches need besides the event itself.
#[derive(Clone, Debug)]
pub struct SellingContext {
    resolver: Resolver,
    offset: FixedOffset,
}

impl SellingContext {
    pub fn new(resolver: Resolver, offset: FixedOffset) -> Self {
        SellingContext { resolver, offset }
    }

    pub fn offset(&self) -> &FixedOffset {
        &self.offset
    }

    pub fn resolver(&self) -> &Resolver {
        &self.resolver
    }

    pub fn day(&self, time: DateTime<Utc>) -> Result<SegmentBuf, Error> {
        day(time, &self.offset)
    }

    /// Returns a row another row refers to.
    ///
    /// Fails with [`Error::ReferenceNotFound`] if the row is not known.
    fn reference<T: serde::de::DeserializeOwned>(
        &self, source: &Source, identity: &Key, key: Key
    ) -> Result<T, Error> {
        self.resolver.lookup(&key)?.ok_or_else(|| {
            Error::ReferenceNotFound {
                source: source.clone(),
                identity: identity.clone(),
                reference: key,
            }
        })
    }

    /// Returns the latest snapshot of an order.
    pub fn order(
        &self, source: &Source, identity: &Key, order_id: u64
    ) -> Result<Order, Error> {
        self.reference(
            source, identity, Order::source().identity_key(order_id)
        )
    }

    /// Returns the order an inventory transaction belongs to.
    pub fn inv_order(
        &self, source: &Source, identity: &Key, inv_id: u64
    ) -> Result<InvOrderRef, Error> {
        self.reference(source, identity, InvOrderRef::key(inv_id))
    }

    pub fn inv_transaction(
        &self, source: &Source, identity: &Key, tx_id: u64
    ) -> Result<InvTransaction, Error> {
        self.reference(
            source, identity, InvTransaction::source().identity_key(tx_id)
        )
    }

    pub fn expense_account(
        &self, source: &Source, identity: &Key, account_id: u64
    ) -> Result<ExpenseAccount, Error> {
        self.reference(
            source, identity, ExpenseAccount::source().identity_key(account_id)
        )
    }

    /// Returns the name of a team or an empty string if it isn’t known.
    pub fn team_name(&self, team_id: u64) -> Result<String, Error> {
        let key = Team::source().identity_key(team_id);
        Ok(self.resolver.lookup::<Team>(&key)?.map(|team| team.name)
            .unwrap_or_default())
    }
}


//------------ SellingSinks --------------------------------------------------

/// The listeners to attach to the engines of the four families.
#[derive(Default)]
pub struct SellingSinks {
    pub shop: Vec<Arc<dyn FlushListener<DailyShop>>>,
    pub team: Vec<Arc<dyn FlushListener<DailyTeam>>>,
    pub bank: Vec<Arc<dyn FlushListener<DailyBank>>>,
    pub shopeepay: Vec<Arc<dyn FlushListener<DailyShopeepay>>>,
}


//------------ SellingDeltas -------------------------------------------------

/// The deltas of one event for all families.
#[derive(Clone, Debug, Default)]
pub struct SellingDeltas {
    pub shop: Vec<DailyShop>,
    pub team: Vec<DailyTeam>,
    pub bank: Vec<DailyBank>,
    pub shopeepay: Vec<DailyShopeepay>,
}

impl SellingDeltas {
    /// Returns the number of deltas not derived from shop deltas.
    pub fn len(&self) -> usize {
        self.shop.len() + self.bank.len() + self.shopeepay.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}


//------------ SellingMetrics ------------------------------------------------

/// The engines of all selling metric families.
///
/// All branches feed the same four engines, so merges on a shared key
/// from different branches are serialized by the engine.
#[derive(Debug)]
pub struct SellingMetrics {
    context: SellingContext,
    balances: BalanceDiffs,
    shop: Arc<AggregateEngine<DailyShop>>,
    team: Arc<AggregateEngine<DailyTeam>>,
    bank: Arc<AggregateEngine<DailyBank>>,
    shopeepay: Arc<AggregateEngine<DailyShopeepay>>,
}

impl SellingMetrics {
    pub fn new(
        store: Arc<KeyValueStore>,
        context: SellingContext,
        interval: Duration,
        sinks: SellingSinks,
    ) -> Self {
        let mut shop = AggregateEngine::new(
            "daily shop", store.clone(), interval
        ).with_transform(DailyShop::finalize);
        for sink in sinks.shop {
            shop.add_listener(sink);
        }

        let names = context.clone();
        let mut team = AggregateEngine::new(
            "daily team", store.clone(), interval
        ).with_transform(move |total: DailyTeam| total.finalize(&names));
        for sink in sinks.team {
            team.add_listener(sink);
        }

        let mut bank = AggregateEngine::new(
            "daily bank", store.clone(), interval
        ).with_transform(DailyBank::finalize);
        for sink in sinks.bank {
            bank.add_listener(sink);
        }

        let names = context.clone();
        let mut shopeepay = AggregateEngine::new(
            "daily shopeepay", store.clone(), interval
        ).with_transform(
            move |total: DailyShopeepay| total.finalize(&names)
        );
        for sink in sinks.shopeepay {
            shopeepay.add_listener(sink);
        }

        SellingMetrics {
            context,
            balances: BalanceDiffs::new(store),
            shop: Arc::new(shop),
            team: Arc::new(team),
            bank: Arc::new(bank),
            shopeepay: Arc::new(shopeepay),
        }
    }

    pub fn shop(&self) -> &Arc<AggregateEngine<DailyShop>> {
        &self.shop
    }

    pub fn team(&self) -> &Arc<AggregateEngine<DailyTeam>> {
        &self.team
    }

    pub fn bank(&self) -> &Arc<AggregateEngine<DailyBank>> {
        &self.bank
    }

    pub fn shopeepay(&self) -> &Arc<AggregateEngine<DailyShopeepay>> {
        &self.shopeepay
    }

    /// Computes the deltas of a classified event and merges them.
    ///
    /// Returns the number of deltas merged.
    pub fn process(&self, event: &ChangeEvent) -> Result<usize, Error> {
        let mut deltas = self.deltas(event)?;
        self.add_balance_diffs(event, &mut deltas)?;
        Ok(self.merge(deltas))
    }

    /// Computes the deltas of the branches.
    ///
    /// This only reads, so it can be repeated for the same event.
    pub fn deltas(&self, event: &ChangeEvent) -> Result<SellingDeltas, Error> {
        let shop = branches::shop_deltas(&self.context, event)?;
        let shopeepay = branches::shopeepay_deltas(&self.context, event)?;
        Ok(SellingDeltas {
            team: shop.iter().map(DailyTeam::project).collect(),
            bank: shop.iter().filter_map(DailyBank::project).collect(),
            shop,
            shopeepay,
        })
    }

    /// Applies a balance reading and adds the resulting changes.
    ///
    /// Unlike [`deltas`][Self::deltas] this updates the stored readings.
    /// If it fails, nothing has been updated.
    pub fn add_balance_diffs(
        &self, event: &ChangeEvent, deltas: &mut SellingDeltas
    ) -> Result<(), Error> {
        for diff in self.balances.apply(&self.context, event)? {
            if diff.is_shopeepay() {
                deltas.shopeepay.push(DailyShopeepay::new(
                    diff.day, diff.team_id,
                    ShopeepayAmounts {
                        actual_diff_amount: diff.amount,
                        ..Default::default()
                    }
                ));
            }
            else {
                deltas.bank.push(DailyBank::new(
                    diff.day, diff.team_id,
                    BankAmounts {
                        actual_diff_amount: diff.amount,
                        ..Default::default()
                    }
                ));
            }
        }
        Ok(())
    }

    /// Merges the deltas of an event into the engines.
    pub fn merge(&self, deltas: SellingDeltas) -> usize {
        let merged = deltas.len();
        self.shop.merge_all(deltas.shop);
        self.team.merge_all(deltas.team);
        self.bank.merge_all(deltas.bank);
        self.shopeepay.merge_all(deltas.shopeepay);
        merged
    }

    /// Flushes all four engines.
    pub fn flush(&self) {
        self.shop.flush();
        self.team.flush();
        self.bank.flush();
        self.shopeepay.flush();
    }
}


//------------ Contributions -------------------------------------------------

/// Returns the deltas replacing the prior contribution of an event.
///
/// The `contribution` function computes the contribution of one version
/// of the event's row. A delete has no current contribution.
pub fn event_deltas<A: Aggregate>(
    event: &ChangeEvent,
    contribution: impl Fn(&Record) -> Result<Vec<A>, Error>,
) -> Result<Vec<A>, Error> {
    let current = match event.kind {
        ModKind::Delete => Vec::new(),
        _ => contribution(&event.data)?,
    };
    let prior = match &event.prior {
        Some(prior) => contribution(prior)?,
        None => Vec::new(),
    };
    Ok(retraction(prior, current))
}


//============ Tests =========================================================
