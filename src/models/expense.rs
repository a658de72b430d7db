//! Money leaving or entering team accounts outside of orders.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use crate::commons::ext_serde::{de_opt_time, ser_opt_time};


//------------ AdsExpenseHistory ---------------------------------------------

/// A row of `public.ads_expense_histories`, money spent on ads for a shop.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct AdsExpenseHistory {
    pub id: u64,
    pub team_id: u64,
    pub created_by_id: u64,
    pub marketplace_id: u64,
    pub amount: f64,
    pub note: String,

    #[serde(deserialize_with = "de_opt_time", serialize_with = "ser_opt_time")]
    pub at: Option<DateTime<Utc>>,

    #[serde(deserialize_with = "de_opt_time", serialize_with = "ser_opt_time")]
    pub created_at: Option<DateTime<Utc>>,
}


//------------ BalanceAccountHistory -----------------------------------------

/// A row of `public.balance_account_histories`.
///
/// A reading of an account balance at a point in time.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct BalanceAccountHistory {
    pub id: u64,
    pub team_id: u64,
    pub account_id: u64,
    pub amount: f64,

    #[serde(deserialize_with = "de_opt_time", serialize_with = "ser_opt_time")]
    pub at: Option<DateTime<Utc>>,

    #[serde(deserialize_with = "de_opt_time", serialize_with = "ser_opt_time")]
    pub created_at: Option<DateTime<Utc>>,
}


//------------ ExpenseAccount ------------------------------------------------

/// A row of `public.expense_accounts`, a bank or wallet account of a team.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct ExpenseAccount {
    pub id: u64,
    pub team_id: u64,
    pub account_type_id: u64,
    pub number_id: String,
    pub name: String,
    pub disabled: bool,

    #[serde(deserialize_with = "de_opt_time", serialize_with = "ser_opt_time")]
    pub created_at: Option<DateTime<Utc>>,
}

impl ExpenseAccount {
    /// The account type of ShopeePay wallets.
    pub const SHOPEEPAY_TYPE: u64 = 7;

    pub fn is_shopeepay(&self) -> bool {
        self.account_type_id == Self::SHOPEEPAY_TYPE
    }
}


//------------ ExpenseHistory ------------------------------------------------

/// A row of `public.expense_histories`, a categorized team expense.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct ExpenseHistory {
    pub id: u64,
    pub team_id: u64,
    pub category_id: u64,
    pub created_by_id: u64,
    pub amount: f64,
    pub note: String,

    #[serde(deserialize_with = "de_opt_time", serialize_with = "ser_opt_time")]
    pub at: Option<DateTime<Utc>>,

    #[serde(deserialize_with = "de_opt_time", serialize_with = "ser_opt_time")]
    pub created_at: Option<DateTime<Utc>>,
}

impl ExpenseHistory {
    /// The category of money moved onto a ShopeePay wallet.
    pub const TOPUP_CATEGORY: u64 = 5;

    pub fn is_topup(&self) -> bool {
        self.category_id == Self::TOPUP_CATEGORY
    }
}
