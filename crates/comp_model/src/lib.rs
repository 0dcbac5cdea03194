//! Pure compensation model for the TMC engine
//! No I/O, no unwrap/panic, all functions total

pub mod state;
pub mod math;
pub mod money;
pub mod accrual;
pub mod level;
pub mod limits;
pub mod rank;
pub mod rewards;
pub mod helpers;

// Re-export commonly used types
pub use state::*;
pub use money::{parse_usd, usd, AmountError, Money, Usd, SCALE};
pub use helpers::*;
