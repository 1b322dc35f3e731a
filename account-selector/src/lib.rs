pub mod health;
pub mod publish;
pub mod reservation;
pub mod selector;

pub use health::{
    apply_health_signal, health_issues, record_health_signal, refresh_account,
    refresh_stored_account, HealthSignal,
};
pub use publish::{PublishCapability, PublishOutcome, PublishReceipt, Publisher};
pub use reservation::AccountReserver;
pub use selector::{check_eligibility, select_account, selection_score, AccountSelector, Ineligibility};
