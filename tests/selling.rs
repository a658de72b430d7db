//! Daily selling metrics from the change streams of the shop tables.

use std::sync::Arc;
use serde_json::{json, Value};
use materialize::commons::error::Error;
use materialize::metric::{FlushListener, TotalsCollector};
use materialize::pipeline::{Pipeline, PipelineContext};
use materialize::selling::{
    DailyBank, DailyShop, DailyShopeepay, DailyTeam, SellingSinks,
};

mod common;


struct Shop {
    context: PipelineContext,
    pipeline: Pipeline,
    shops: Arc<TotalsCollector<DailyShop>>,
    teams: Arc<TotalsCollector<DailyTeam>>,
    banks: Arc<TotalsCollector<DailyBank>>,
    wallets: Arc<TotalsCollector<DailyShopeepay>>,
}

impl Shop {
    fn new() -> Self {
        let context = common::context(common::mem_store());
        let shops = Arc::new(TotalsCollector::default());
        let teams = Arc::new(TotalsCollector::default());
        let banks = Arc::new(TotalsCollector::default());
        let wallets = Arc::new(TotalsCollector::default());
        let sinks = SellingSinks {
            shop: vec![shops.clone() as Arc<dyn FlushListener<_>>],
            team: vec![teams.clone() as Arc<dyn FlushListener<_>>],
            bank: vec![banks.clone() as Arc<dyn FlushListener<_>>],
            shopeepay: vec![wallets.clone() as Arc<dyn FlushListener<_>>],
        };
        let pipeline = Pipeline::new(&context, sinks).unwrap();
        Shop { context, pipeline, shops, teams, banks, wallets }
    }

    fn process(&self, table: &str, kind: &str, data: Value) -> Result<bool, Error> {
        self.pipeline.process(
            common::event(self.context.registry(), table, kind, data)
        )
    }

    fn apply(&self, table: &str, kind: &str, data: Value) {
        assert!(self.process(table, kind, data).unwrap());
    }

    fn shop(&self, day: &str) -> DailyShop {
        self.pipeline.selling().shop().total(
            &DailyShop::key_for(&day.parse().unwrap(), 2, 3)
        ).unwrap().unwrap()
    }

    fn team(&self, day: &str) -> DailyTeam {
        self.pipeline.selling().team().total(
            &DailyTeam::key_for(&day.parse().unwrap(), 2)
        ).unwrap().unwrap()
    }

    fn bank(&self, day: &str) -> DailyBank {
        self.pipeline.selling().bank().total(
            &DailyBank::key_for(&day.parse().unwrap(), 2)
        ).unwrap().unwrap()
    }

    fn shopeepay(&self, day: &str) -> DailyShopeepay {
        self.pipeline.selling().shopeepay().total(
            &DailyShopeepay::key_for(&day.parse().unwrap(), 2)
        ).unwrap().unwrap()
    }

    /// Backfills account 1, a bank account, and account 45, a ShopeePay
    /// wallet, both of team 2.
    fn accounts(&self) {
        self.apply("expense_accounts", "backfill", json!({
            "id": 1, "team_id": 2, "account_type_id": 1, "name": "BCA"
        }));
        self.apply("expense_accounts", "backfill", json!({
            "id": 45, "team_id": 2, "account_type_id": 7, "name": "Wallet"
        }));
    }

    fn reading(&self, id: u64, account_id: u64, amount: f64, at: &str) {
        self.apply("balance_account_histories", "insert", json!({
            "id": id, "team_id": 2, "account_id": account_id,
            "amount": amount, "at": at
        }));
    }

    /// Inserts order 1 of team 2 in shop 3.
    fn order(&self) {
        self.apply("orders", "insert", json!({
            "id": 1, "team_id": 2, "order_mp_id": 3,
            "invertory_tx_id": 10, "invertory_ret_tx_id": 11,
            "order_mp_total": 100.0, "warehouse_fee": 4.0,
            "order_time": "2025-08-01T03:00:00Z",
            "created_at": "2025-08-01T20:00:00Z"
        }));
    }
}

fn adjustment(kind: &str, amount: f64, fund_at: Value) -> Value {
    json!({
        "id": 5, "order_id": 1, "mp_id": 3, "type": kind,
        "amount": amount, "fund_at": fund_at
    })
}


#[test]
fn orders_count_on_two_days() {
    let shop = Shop::new();
    shop.order();
    shop.pipeline.flush();

    // 20:00Z is already the next day at UTC+7.
    assert_eq!(shop.shop("2025-08-01").amounts.created_order_amount, 100.0);
    assert_eq!(shop.shop("2025-08-02").amounts.sys_created_order_amount, 100.0);
    assert_eq!(shop.team("2025-08-01").amounts.created_order_amount, 100.0);
}

#[test]
fn withdrawal_moves_with_fund_date() {
    let shop = Shop::new();
    shop.order();
    shop.apply("order_adjustments", "insert", adjustment(
        "order_fund", 90.0, json!("2025-08-01T05:00:00Z")
    ));
    shop.pipeline.flush();

    let day1 = shop.shop("2025-08-01");
    assert_eq!(day1.amounts.est_withdrawal_amount, 100.0);
    assert_eq!(day1.amounts.withdrawal_amount, 90.0);
    assert_eq!(shop.bank("2025-08-01").amounts.withdrawal_amount, 90.0);

    // Emitted totals carry the derived amounts.
    let emitted = shop.shops.latest(
        &DailyShop::key_for(&"2025-08-01".parse().unwrap(), 2, 3)
    ).unwrap();
    assert_eq!(emitted.adj_order_amount, 10.0);
    assert!(emitted.freshness.is_some());
    assert_eq!(day1.adj_order_amount, 0.0);

    shop.apply("order_adjustments", "update", adjustment(
        "order_fund", 90.0, json!("2025-08-03T05:00:00Z")
    ));
    shop.pipeline.flush();

    let day1 = shop.shop("2025-08-01");
    assert_eq!(day1.amounts.est_withdrawal_amount, 0.0);
    assert_eq!(day1.amounts.withdrawal_amount, 0.0);
    assert_eq!(day1.amounts.created_order_amount, 100.0);
    let day3 = shop.shop("2025-08-03");
    assert_eq!(day3.amounts.est_withdrawal_amount, 100.0);
    assert_eq!(day3.amounts.withdrawal_amount, 90.0);
    assert_eq!(shop.bank("2025-08-01").amounts.withdrawal_amount, 0.0);
    assert_eq!(shop.bank("2025-08-03").amounts.withdrawal_amount, 90.0);
    assert_eq!(shop.team("2025-08-03").amounts.withdrawal_amount, 90.0);
}

#[test]
fn unchanged_update_emits_nothing() {
    let shop = Shop::new();
    shop.order();
    shop.apply("order_adjustments", "insert", adjustment(
        "order_fund", 90.0, json!("2025-08-01T05:00:00Z")
    ));
    shop.pipeline.flush();

    // Only the description changes.
    let mut row = adjustment("order_fund", 90.0, json!("2025-08-01T05:00:00Z"));
    row["desc"] = json!("checked");
    shop.apply("order_adjustments", "update", row);
    assert_eq!(shop.pipeline.selling().shop().pending_len(), 0);
}

#[test]
fn pending_payout_counts_once_funded() {
    let shop = Shop::new();
    shop.order();
    shop.apply("order_adjustments", "insert", adjustment(
        "order_fund", 90.0, Value::Null
    ));
    assert_eq!(shop.pipeline.selling().shop().pending_len(), 2);
    shop.pipeline.flush();
    assert_eq!(shop.shop("2025-08-01").amounts.withdrawal_amount, 0.0);

    shop.apply("order_adjustments", "update", adjustment(
        "order_fund", 90.0, json!("2025-08-02T05:00:00Z")
    ));
    shop.pipeline.flush();
    assert_eq!(shop.shop("2025-08-02").amounts.withdrawal_amount, 90.0);
}

#[test]
fn other_adjustments_are_mp_adjustments() {
    let shop = Shop::new();
    shop.order();
    shop.apply("order_adjustments", "insert", adjustment(
        "penalty", -7.5, json!("2025-08-01T05:00:00Z")
    ));
    shop.pipeline.flush();
    let day1 = shop.shop("2025-08-01");
    assert_eq!(day1.amounts.mp_adjustment_amount, -7.5);
    assert_eq!(day1.amounts.withdrawal_amount, 0.0);
}

#[test]
fn cancelling_status_moves_and_disappears() {
    let shop = Shop::new();
    shop.order();
    shop.apply("order_timestamps", "insert", json!({
        "id": 8, "order_id": 1, "order_status": "cancel",
        "timestamp": "2025-08-01T06:00:00Z"
    }));
    shop.pipeline.flush();
    assert_eq!(shop.shop("2025-08-01").amounts.cancel_order_amount, 100.0);

    shop.apply("order_timestamps", "update", json!({
        "id": 8, "order_id": 1, "order_status": "lost",
        "timestamp": "2025-08-01T06:00:00Z"
    }));
    shop.pipeline.flush();
    let day1 = shop.shop("2025-08-01");
    assert_eq!(day1.amounts.cancel_order_amount, 0.0);
    assert_eq!(day1.amounts.lost_order_amount, 100.0);

    shop.apply("order_timestamps", "delete", json!({"id": 8}));
    shop.pipeline.flush();
    assert_eq!(shop.shop("2025-08-01").amounts.lost_order_amount, 0.0);
}

#[test]
fn warehouse_fee_through_order_cache() {
    let shop = Shop::new();
    shop.order();
    shop.apply("inv_transactions", "insert", json!({
        "id": 10, "team_id": 2, "type": "order", "status": "ongoing",
        "created": "2025-08-01T07:00:00Z"
    }));
    shop.pipeline.flush();
    assert_eq!(shop.shop("2025-08-01").amounts.warehouse_fee_amount, 4.0);
    assert_eq!(shop.bank("2025-08-01").amounts.warehouse_fee_amount, 4.0);

    shop.apply("inv_transactions", "update", json!({
        "id": 10, "team_id": 2, "type": "order", "status": "cancel",
        "created": "2025-08-01T07:00:00Z"
    }));
    shop.pipeline.flush();
    assert_eq!(shop.shop("2025-08-01").amounts.warehouse_fee_amount, 0.0);
}

#[test]
fn returns_count_when_created_and_arrived() {
    let shop = Shop::new();
    shop.order();
    shop.apply("inv_transactions", "insert", json!({
        "id": 11, "team_id": 2, "type": "return", "status": "ongoing",
        "created": "2025-08-02T03:00:00Z"
    }));
    shop.apply("inv_transactions", "update", json!({
        "id": 11, "team_id": 2, "type": "return", "status": "completed",
        "created": "2025-08-02T03:00:00Z",
        "arrived": "2025-08-04T03:00:00Z"
    }));
    shop.pipeline.flush();
    let day2 = shop.shop("2025-08-02");
    assert_eq!(day2.amounts.return_created_amount, 100.0);
    assert_eq!(shop.shop("2025-08-04").amounts.return_arrived_amount, 100.0);
}

#[test]
fn bank_reconciliation() {
    let shop = Shop::new();
    shop.order();
    shop.accounts();
    shop.apply("teams", "backfill", json!({"id": 2, "name": "Alpha"}));
    shop.apply("order_adjustments", "insert", adjustment(
        "order_fund", 90.0, json!("2025-08-01T05:00:00Z")
    ));
    shop.apply("ads_expense_histories", "insert", json!({
        "id": 3, "team_id": 2, "marketplace_id": 3, "amount": 20.0,
        "at": "2025-08-01T08:00:00Z"
    }));
    shop.reading(4, 1, 1000.0, "2025-07-31T09:00:00Z");
    shop.reading(5, 1, 1065.0, "2025-08-01T09:00:00Z");
    shop.pipeline.flush();

    let stored = shop.bank("2025-08-01");
    assert_eq!(stored.amounts.withdrawal_amount, 90.0);
    assert_eq!(stored.amounts.ads_cost_amount, 20.0);
    assert_eq!(stored.amounts.actual_diff_amount, 65.0);

    let emitted = shop.banks.latest(
        &DailyBank::key_for(&"2025-08-01".parse().unwrap(), 2)
    ).unwrap();
    assert_eq!(emitted.diff_amount, 70.0);
    assert_eq!(emitted.err_diff_amount, -5.0);

    let team = shop.teams.latest(
        &DailyTeam::key_for(&"2025-08-01".parse().unwrap(), 2)
    ).unwrap();
    assert_eq!(team.team_name, "Alpha");
    assert_eq!(team.amounts.ads_spent_amount, 20.0);
}

#[test]
fn balance_readings_are_diffed() {
    let shop = Shop::new();
    shop.accounts();
    shop.reading(1, 1, 1000.0, "2025-08-01T01:00:00Z");
    shop.reading(2, 1, 1010.0, "2025-08-01T06:00:00Z");
    shop.reading(3, 1, 1040.0, "2025-08-02T01:00:00Z");
    shop.pipeline.flush();
    assert_eq!(shop.bank("2025-08-02").amounts.actual_diff_amount, 30.0);
    assert!(shop.pipeline.selling().bank().total(
        &DailyBank::key_for(&"2025-08-01".parse().unwrap(), 2)
    ).unwrap().is_none());

    // A late reading of the day before gives the first day a change.
    shop.reading(4, 1, 900.0, "2025-07-31T01:00:00Z");
    shop.pipeline.flush();
    assert_eq!(shop.bank("2025-08-01").amounts.actual_diff_amount, 110.0);
    assert_eq!(shop.bank("2025-08-02").amounts.actual_diff_amount, 30.0);

    // Wallet readings stay out of the bank family.
    assert!(shop.pipeline.selling().shopeepay().total(
        &DailyShopeepay::key_for(&"2025-08-02".parse().unwrap(), 2)
    ).unwrap().is_none());
}

#[test]
fn reading_of_unknown_account_can_be_resent() {
    let shop = Shop::new();
    let reading = json!({
        "id": 1, "team_id": 2, "account_id": 45, "amount": 10.0,
        "at": "2025-08-01T01:00:00Z"
    });
    assert!(matches!(
        shop.process("balance_account_histories", "insert", reading.clone()),
        Err(Error::ReferenceNotFound { .. })
    ));

    shop.accounts();
    shop.apply("balance_account_histories", "update", reading);
    shop.reading(2, 45, 25.0, "2025-08-02T01:00:00Z");
    shop.pipeline.flush();
    assert_eq!(shop.shopeepay("2025-08-02").amounts.actual_diff_amount, 15.0);
}

#[test]
fn shopeepay_reconciliation() {
    let shop = Shop::new();
    shop.accounts();
    shop.apply("teams", "backfill", json!({"id": 2, "name": "Alpha"}));
    shop.apply("inv_transactions", "insert", json!({
        "id": 50, "team_id": 2, "type": "restock", "status": "ongoing",
        "total": 200.0, "created": "2025-08-01T02:00:00Z"
    }));
    shop.apply("restock_costs", "insert", json!({
        "id": 1, "inv_transaction_id": 50, "payment_type": "shopeepay",
        "cod_fee": 5.0, "shipping_fee": 12.0
    }));
    shop.apply("expense_histories", "insert", json!({
        "id": 2, "team_id": 2, "category_id": 5, "amount": 500.0,
        "at": "2025-08-01T03:00:00Z"
    }));
    shop.apply("inv_resolutions", "insert", json!({
        "id": 3, "tx_id": 50, "team_id": 2, "refund_amount": 25.0,
        "refund_payment_type": "shopeepay",
        "fund_at": "2025-08-01T04:00:00Z"
    }));
    shop.reading(4, 45, 1000.0, "2025-07-31T09:00:00Z");
    shop.reading(5, 45, 1320.0, "2025-08-01T09:00:00Z");
    shop.pipeline.flush();

    let stored = shop.shopeepay("2025-08-01");
    assert_eq!(stored.amounts.cost_amount, 205.0);
    assert_eq!(stored.amounts.topup_amount, 500.0);
    assert_eq!(stored.amounts.refund_amount, 25.0);
    assert_eq!(stored.amounts.actual_diff_amount, 320.0);

    let emitted = shop.wallets.latest(
        &DailyShopeepay::key_for(&"2025-08-01".parse().unwrap(), 2)
    ).unwrap();
    assert_eq!(emitted.team_name, "Alpha");
    assert_eq!(emitted.diff_amount, 320.0);
    assert_eq!(emitted.err_diff_amount, 0.0);

    // The wallet balance doesn’t touch the bank family.
    assert!(shop.pipeline.selling().bank().total(
        &DailyBank::key_for(&"2025-08-01".parse().unwrap(), 2)
    ).unwrap().is_none());
}

#[test]
fn resend_after_missing_order_counts() {
    let shop = Shop::new();
    assert!(shop.process("order_adjustments", "insert", adjustment(
        "order_fund", 90.0, json!("2025-08-01T05:00:00Z")
    )).is_err());

    shop.order();
    shop.apply("order_adjustments", "update", adjustment(
        "order_fund", 90.0, json!("2025-08-01T05:00:00Z")
    ));
    shop.pipeline.flush();
    assert_eq!(shop.shop("2025-08-01").amounts.withdrawal_amount, 90.0);
    assert_eq!(shop.bank("2025-08-01").amounts.withdrawal_amount, 90.0);
}

#[test]
fn missing_order_fails_without_merging() {
    let shop = Shop::new();
    let res = shop.process("order_adjustments", "insert", adjustment(
        "order_fund", 90.0, json!("2025-08-01T05:00:00Z")
    ));
    assert!(matches!(res, Err(Error::ReferenceNotFound { .. })));
    assert_eq!(shop.pipeline.selling().shop().pending_len(), 0);
    assert_eq!(shop.pipeline.selling().bank().pending_len(), 0);
}
