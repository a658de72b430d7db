//! Orders and the rows hanging off them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use crate::commons::ext_serde::{de_opt_time, ser_opt_time};
use super::string_enum;


//------------ OrderStatus ---------------------------------------------------

string_enum! {
    /// The status of an order.
    pub enum OrderStatus {
        Created => "created",
        Completed => "completed",
        Returned => "return",
        Cancel => "cancel",
        Problem => "problem",
        Lost => "lost",
    }
}


//------------ AdjustmentType ------------------------------------------------

string_enum! {
    /// The kind of a marketplace adjustment.
    pub enum AdjustmentType {
        /// The marketplace paid out the order.
        OrderFund => "order_fund",
    }
}


//------------ Order ---------------------------------------------------------

/// A row of `public.orders`.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct Order {
    pub id: u64,
    pub team_id: u64,
    pub created_by_id: u64,

    /// The outbound inventory transaction of the order.
    #[serde(alias = "invertory_tx_id")]
    pub inventory_tx_id: u64,

    /// The inventory transaction of a return, zero if there is none.
    #[serde(alias = "invertory_ret_tx_id")]
    pub inventory_ret_tx_id: u64,

    pub order_ref_id: String,
    pub order_from: String,

    /// The marketplace shop the order was placed in.
    pub order_mp_id: u64,

    /// The order total as reported by the marketplace.
    pub order_mp_total: f64,

    pub double_order: bool,
    pub is_partial: bool,
    pub is_order_fake: bool,

    pub status: OrderStatus,
    pub warehouse_fee: f64,
    #[serde(alias = "shipping_fee")]
    pub shipment_fee: f64,
    pub item_count: i64,
    pub total: f64,
    pub adjustment: f64,

    pub wd_total: f64,
    pub wd_fund: bool,
    #[serde(deserialize_with = "de_opt_time", serialize_with = "ser_opt_time")]
    pub wd_fund_at: Option<DateTime<Utc>>,

    /// When the order was placed at the marketplace.
    #[serde(deserialize_with = "de_opt_time", serialize_with = "ser_opt_time")]
    pub order_time: Option<DateTime<Utc>>,

    /// When the order was entered into the system.
    #[serde(deserialize_with = "de_opt_time", serialize_with = "ser_opt_time")]
    pub created_at: Option<DateTime<Utc>>,
}


//------------ OrderAdjustment -----------------------------------------------

/// A row of `public.order_adjustments`.
///
/// Adjustments are marketplace payouts and corrections booked against an
/// order.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct OrderAdjustment {
    pub id: u64,
    pub order_id: u64,

    /// The marketplace shop.
    pub mp_id: u64,

    #[serde(rename = "type")]
    pub kind: AdjustmentType,
    pub amount: f64,
    pub desc: String,

    #[serde(deserialize_with = "de_opt_time", serialize_with = "ser_opt_time")]
    pub at: Option<DateTime<Utc>>,

    /// When the money arrived. Unset while the payout is pending.
    #[serde(deserialize_with = "de_opt_time", serialize_with = "ser_opt_time")]
    pub fund_at: Option<DateTime<Utc>>,
}


//------------ OrderTimestamp ------------------------------------------------

/// A row of `public.order_timestamps`, one status change of an order.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct OrderTimestamp {
    pub id: u64,
    pub order_id: u64,
    pub user_id: u64,
    pub from: String,
    pub order_status: OrderStatus,
    #[serde(deserialize_with = "de_opt_time", serialize_with = "ser_opt_time")]
    pub timestamp: Option<DateTime<Utc>>,
}


//============ Tests =========================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decode_source_order() {
        let order: Order = serde_json::from_value(json!({
            "id": 1,
            "team_id": 2,
            "invertory_tx_id": 30,
            "invertory_ret_tx_id": 0,
            "order_mp_id": 4,
            "order_mp_total": 150000,
            "status": "completed",
            "shipping_fee": 9000,
            "wd_fund_at": "0001-01-01T00:00:00Z",
            "order_time": "2025-08-01T10:00:00Z",
            "created_at": "2025-08-02T01:00:00Z",
            "receipt": "JX123"
        })).unwrap();

        assert_eq!(order.inventory_tx_id, 30);
        assert_eq!(order.order_mp_total, 150000.0);
        assert_eq!(order.shipment_fee, 9000.0);
        assert_eq!(order.status, OrderStatus::Completed);
        assert!(order.wd_fund_at.is_none());
        assert!(order.order_time.is_some());
    }

    #[test]
    fn identity_only_row_decodes() {
        let adj: OrderAdjustment = serde_json::from_value(
            json!({"id": 5})
        ).unwrap();
        assert_eq!(adj.id, 5);
        assert_eq!(adj.kind, AdjustmentType::Unset);
        assert!(adj.fund_at.is_none());
    }

    #[test]
    fn snapshot_round_trip() {
        let adj = OrderAdjustment {
            id: 5,
            order_id: 1,
            kind: AdjustmentType::OrderFund,
            amount: 12.5,
            fund_at: Some("2025-08-01T00:00:00Z".parse().unwrap()),
            ..Default::default()
        };
        let value = serde_json::to_value(&adj).unwrap();
        assert_eq!(value["type"], json!("order_fund"));
        assert_eq!(serde_json::from_value::<OrderAdjustment>(value).unwrap(), adj);
    }
}
