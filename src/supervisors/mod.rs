//! Supervisors (C11-C14, §4.11-§4.14): independent background tasks that
//! watch the store and take corrective action. Each runs on its own timer and
//! never blocks the trading loop.

pub mod deal_completion;
pub mod filled_buy;
pub mod stale_buy;
pub mod stop_loss;

pub use deal_completion::DealCompletionMonitor;
pub use filled_buy::FilledBuyHandler;
pub use stale_buy::StaleBuyMonitor;
pub use stop_loss::TieredStopLoss;
