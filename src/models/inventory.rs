//! Inventory transactions and the order lookup derived from them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use crate::commons::ext_serde::{de_opt_time, ser_opt_time};
use crate::commons::storage::{Key, Scope, Segment};
use crate::constants::CACHE_SCOPE;
use super::string_enum;
use super::order::Order;


//------------ InvTxType -----------------------------------------------------

string_enum! {
    /// What moved goods in or out of a warehouse.
    pub enum InvTxType {
        Order => "order",
        Return => "return",
        Restock => "restock",
    }
}


//------------ InvTxStatus ---------------------------------------------------

string_enum! {
    pub enum InvTxStatus {
        Waiting => "waiting",
        Ongoing => "ongoing",
        Completed => "completed",
        Cancel => "cancel",
    }
}


//------------ InvTransaction ------------------------------------------------

/// A row of `public.inv_transactions`.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct InvTransaction {
    pub id: u64,
    pub team_id: u64,
    pub warehouse_id: u64,
    pub extern_ord_id: String,
    pub receipt: String,

    #[serde(rename = "type")]
    pub kind: InvTxType,
    pub status: InvTxStatus,
    pub is_shipped: bool,
    pub deleted: bool,

    /// When the goods arrived. Unset while they are on their way.
    #[serde(deserialize_with = "de_opt_time", serialize_with = "ser_opt_time")]
    pub arrived: Option<DateTime<Utc>>,

    #[serde(deserialize_with = "de_opt_time", serialize_with = "ser_opt_time")]
    pub send_at: Option<DateTime<Utc>>,

    #[serde(deserialize_with = "de_opt_time", serialize_with = "ser_opt_time")]
    pub created: Option<DateTime<Utc>>,

    pub total: f64,
}


//------------ PaymentType ---------------------------------------------------

string_enum! {
    /// How a restock was paid for or a resolution refunded.
    pub enum PaymentType {
        ShopeePay => "shopeepay",
    }
}


//------------ RestockCost ---------------------------------------------------

/// A row of `public.restock_costs`, the fees paid on top of a restock.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct RestockCost {
    pub id: u64,
    pub inv_transaction_id: u64,
    pub payment_type: PaymentType,
    pub shipping_fee: f64,
    pub cod_fee: f64,
    pub other_fee: f64,
    pub per_piece_fee: f64,
}


//------------ InvResolution -------------------------------------------------

/// A row of `public.inv_resolutions`, the settlement of a problem with a
/// restock such as missing goods.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct InvResolution {
    pub id: u64,
    pub tx_id: u64,
    pub team_id: u64,
    pub warehouse_id: u64,

    /// The restock sending replacement goods, if any.
    pub res_tx_id: u64,

    pub refund_payment_type: PaymentType,
    pub refund_amount: f64,

    #[serde(deserialize_with = "de_opt_time", serialize_with = "ser_opt_time")]
    pub fund_at: Option<DateTime<Utc>>,

    #[serde(deserialize_with = "de_opt_time", serialize_with = "ser_opt_time")]
    pub created: Option<DateTime<Utc>>,
}


//------------ InvOrderRef ---------------------------------------------------

/// Links an inventory transaction to the order it belongs to.
///
/// Inventory transactions carry no order columns, so metrics on them need
/// this entry to find team, shop and amounts. It is kept up to date from
/// the order stream.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct InvOrderRef {
    pub inv_id: u64,
    pub order_id: u64,
    pub team_id: u64,
    pub shop_id: u64,
    pub warehouse_fee: f64,
    pub mp_total: f64,

    /// Whether the inventory transaction is the return leg of the order.
    pub is_return: bool,
}

impl InvOrderRef {
    const NAME: &'static Segment = &Segment::make("inv_order");

    /// Returns the scope of all entries.
    pub fn scope() -> Scope {
        Scope::new(vec![CACHE_SCOPE.into(), Self::NAME.into()])
    }

    /// Returns the key of the entry for an inventory transaction.
    pub fn key(inv_id: u64) -> Key {
        Key::new_scoped(Self::scope(), inv_id)
    }

    /// Returns the entries an order implies.
    ///
    /// That is one for the outbound transaction and one for the return
    /// transaction if the order has been returned.
    pub fn from_order(order: &Order) -> Vec<Self> {
        let make = |inv_id, is_return| InvOrderRef {
            inv_id,
            order_id: order.id,
            team_id: order.team_id,
            shop_id: order.order_mp_id,
            warehouse_fee: order.warehouse_fee,
            mp_total: order.order_mp_total,
            is_return,
        };
        let mut res = Vec::new();
        if order.inventory_tx_id != 0 {
            res.push(make(order.inventory_tx_id, false));
        }
        if order.inventory_ret_tx_id != 0 {
            res.push(make(order.inventory_ret_tx_id, true));
        }
        res
    }
}


//============ Tests =========================================================
