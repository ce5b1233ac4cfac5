//! DM value encodings
//!
//! Wire forms of the scalar types that need more than a byte copy:
//! DECIMAL, the datetime family, intervals and LOB handles.

mod date;
mod interval;
mod lob;
mod number;

pub use date::{DmDateTime, DATETIME2_LEN, DATETIME_LEN};
pub use interval::{IntervalDT, IntervalYM, INTERVAL_DT_LEN, INTERVAL_YM_LEN};
pub use lob::{LobData, LobExtension, LobLocator};
pub use number::Decimal;
