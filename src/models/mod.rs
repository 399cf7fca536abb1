pub mod filter;
pub mod round;

pub use filter::{select_rounds, RoundFilter, RoundStats, StatusFilter};
pub use round::{now_ms, NewStep, RoundAction, RoundData, RoundStep, StartRound};
