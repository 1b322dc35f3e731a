//! Pre-publish content checks.
//!
//! Gate results never raise; a failed check is data for the caller and the
//! human reviewer.

pub mod gate;
pub mod signals;

pub use gate::{
    apply_gate, evaluate, run_quality_gate, suggest_improvements, CheckOutcome, ContentSignals,
    GateCheck, GateResult, QualityGate,
};
pub use signals::{analyze, TextSignals};
