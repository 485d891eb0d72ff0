//! Application layer containing business logic and shared state.

pub mod reward_service;
pub mod scheduler;
pub mod state;
pub mod withdrawal_service;

pub use reward_service::RewardService;
pub use scheduler::{
    BatchOutcome, RetryPolicy, SchedulerConfig, SchedulerHandle, TransactionScheduler,
    spawn_scheduler,
};
pub use state::AppState;
pub use withdrawal_service::{ScheduleParams, WithdrawalService};
