//! Extrusight: Extrusion Operational Intelligence
//!
//! Predictive-maintenance core for plastics-extrusion lines.
//!
//! ## Architecture
//!
//! - **Historian Poller**: read-only change-data-capture over the plant
//!   historian, feeding a rolling in-memory window
//! - **Feature Engine**: deterministic window statistics and drift scoring
//! - **State Detector**: five-state machine classifier with hysteresis;
//!   gates all downstream evaluation on PRODUCTION
//! - **Profile Store & Baseline Learner**: per-(machine, material)
//!   baselines learned during production
//! - **Evaluator**: rule -> stability -> ML-advisory -> weighted-risk
//!   decision hierarchy producing the traffic-light process status
//! - **Incident Manager**: calm alarm/ticket stream with dwell, cooldown,
//!   dedup, and recovery

pub mod ai;
pub mod api;
pub mod config;
pub mod demo;
pub mod evaluator;
pub mod events;
pub mod features;
pub mod historian;
pub mod incident;
pub mod pipeline;
pub mod profiles;
pub mod state;
pub mod storage;
pub mod types;

// Re-export commonly used types
pub use types::{
    Alarm, AlarmSeverity, AlarmStatus, BandMode, BaselineStats, HistorianRow, Machine,
    MachineState, MachineStateInfo, MlReply, Prediction, Profile, ProfileContext, ScoringBand,
    SensorReading, Severity, StateThresholds, Ticket,
};

// Re-export the pipeline building blocks
pub use evaluator::{Evaluation, EvaluationInput};
pub use historian::{ExtruderPoller, PollerStatus, RollingWindow};
pub use incident::{IncidentManager, IncidentPolicy, WearClassifier, WearProfile};
pub use pipeline::TickProcessor;
pub use state::{DetectorRegistry, MachineStateDetector};
pub use storage::Store;
