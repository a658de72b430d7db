//! Typed rows of the operational database.
//!
//! Every type here mirrors one source table. All fields default so that a
//! partial row, such as the identity-only row of a delete, still decodes.

pub use self::expense::{
    AdsExpenseHistory, BalanceAccountHistory, ExpenseAccount, ExpenseHistory,
};
pub use self::inventory::{
    InvOrderRef, InvResolution, InvTransaction, InvTxStatus, InvTxType,
    PaymentType, RestockCost,
};
pub use self::order::{
    AdjustmentType, Order, OrderAdjustment, OrderStatus, OrderTimestamp,
};
pub use self::team::Team;

mod expense;
mod inventory;
mod order;
mod team;

use serde::de::DeserializeOwned;
use serde::Serialize;
use crate::change::{Record, Source};
use crate::commons::storage::Key;


//------------ Model ---------------------------------------------------------

/// A row type with a registered decoder.
pub trait Model: Serialize + DeserializeOwned + Sized {
    /// The table of the public schema the rows come from.
    const TABLE: &'static str;

    /// Returns the numeric row id.
    fn id(&self) -> u64;

    /// Wraps the row into its record variant.
    fn into_record(self) -> Record;

    fn source() -> Source {
        Source::public(Self::TABLE)
    }

    fn identity_key(&self) -> Key {
        Self::source().identity_key(self.id())
    }
}

macro_rules! model {
    ( $( $ty:ident => $table:expr, )* ) => {
        $(
            impl Model for $ty {
                const TABLE: &'static str = $table;

                fn id(&self) -> u64 {
                    self.id
                }

                fn into_record(self) -> Record {
                    Record::$ty(self)
                }
            }
        )*
    }
}

model! {
    Order => "orders",
    OrderAdjustment => "order_adjustments",
    OrderTimestamp => "order_timestamps",
    InvTransaction => "inv_transactions",
    AdsExpenseHistory => "ads_expense_histories",
    BalanceAccountHistory => "balance_account_histories",
    ExpenseAccount => "expense_accounts",
    ExpenseHistory => "expense_histories",
    InvResolution => "inv_resolutions",
    RestockCost => "restock_costs",
    Team => "teams",
}


//------------ String Enums --------------------------------------------------

/// Defines an enum for a textual column.
///
/// Known values get their own variant, everything else is kept verbatim in
/// `Other` so that stored snapshots do not lose information.
macro_rules! string_enum {
    (
        $(#[$attr:meta])*
        pub enum $name:ident {
            $(
                $(#[$vattr:meta])*
                $variant:ident => $text:literal,
            )*
        }
    ) => {
        $(#[$attr])*
        #[derive(Clone, Debug, Default, Eq, Hash, PartialEq)]
        pub enum $name {
            $(
                $(#[$vattr])*
                $variant,
            )*
            #[default]
            Unset,
            Other(String),
        }

        impl $name {
            pub fn as_str(&self) -> &str {
                match self {
                    $( $name::$variant => $text, )*
                    $name::Unset => "",
                    $name::Other(s) => s.as_str(),
                }
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                match s {
                    $( $text => $name::$variant, )*
                    "" => $name::Unset,
                    other => $name::Other(other.into()),
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl serde::Serialize for $name {
            fn serialize<S: serde::Serializer>(
                &self, serializer: S
            ) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(self.as_str())
            }
        }

        impl<'de> serde::Deserialize<'de> for $name {
            fn deserialize<D: serde::Deserializer<'de>>(
                deserializer: D
            ) -> Result<Self, D::Error> {
                let s = Option::<String>::deserialize(deserializer)?;
                Ok(s.as_deref().map(Self::from).unwrap_or_default())
            }
        }
    }
}

pub(crate) use string_enum;


//============ Tests =========================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn unknown_text_survives() {
        let status: OrderStatus = serde_json::from_value(
            json!("waiting_pickup")
        ).unwrap();
        assert_eq!(status, OrderStatus::Other("waiting_pickup".into()));
        assert_eq!(
            serde_json::to_value(&status).unwrap(), json!("waiting_pickup")
        );
        let status: OrderStatus = serde_json::from_value(json!(null)).unwrap();
        assert_eq!(status, OrderStatus::Unset);
    }

    #[test]
    fn documented_variants() {
        assert_eq!(AdjustmentType::from("order_fund"), AdjustmentType::OrderFund);
        let kind: AdjustmentType = serde_json::from_value(
            json!("order_fund")
        ).unwrap();
        assert_eq!(kind, AdjustmentType::OrderFund);
        assert_eq!(serde_json::to_value(&kind).unwrap(), json!("order_fund"));
        assert_eq!(PaymentType::from("shopeepay"), PaymentType::ShopeePay);
    }

    #[test]
    fn identity_keys() {
        let order = Order { id: 11, ..Default::default() };
        assert_eq!(order.identity_key().to_string(), "public/orders/11");
        assert_eq!(
            Team::source().to_string(), "public.teams"
        );
    }
}
