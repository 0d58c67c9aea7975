// Bot lifecycle and operator-facing module
pub mod controller;
pub mod operator;

pub use controller::{BotController, BotState, BotStatus, StartOutcome, StartRequest};
pub use operator::{CommandResponse, ManualOrder, OperatorApi, PriceQuote};
