//! Common types used by the various components.
pub mod error;
pub mod ext_serde;
pub mod storage;

//------------ Response Aliases ----------------------------------------------

pub type MaterializeResult<T> = std::result::Result<T, self::error::Error>;
