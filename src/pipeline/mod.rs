//! Tick processor - the per-poll processing sequence.
//!
//! ```text
//! PHASE 1: Feature derivation      (done by the poller, passed in)
//! PHASE 2: State detection         (detector update + transition persistence)
//! PHASE 3: Baseline collection     (PRODUCTION + learning profile only)
//! PHASE 4: Evaluation              (decision hierarchy, PRODUCTION only)
//! PHASE 5: AI scoring              (advisory, 20 s timeout, degrades to empty)
//! PHASE 6: Prediction persistence  (PRODUCTION only, append-only)
//! PHASE 7: Wear classification     (trend classifier + severity mapping)
//! PHASE 8: Incident policy         (calm alarms/tickets, best-effort)
//! PHASE 9: Event broadcast         (non-blocking)
//! ```
//!
//! Phases 7-8 are best-effort: their failures are logged and never block
//! prediction persistence or the next tick.

use async_trait::async_trait;
use chrono::Duration;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::ai::{AiClient, PredictionContext, PredictionRequest};
use crate::config::defaults::{ML_LOOKBACK_LIMIT, ML_LOOKBACK_MINUTES};
use crate::evaluator::{self, Evaluation, EvaluationInput};
use crate::events::EventBus;
use crate::historian::poller::{TickContext, TickHandler};
use crate::incident::{IncidentManager, WearClassifier, WearProfile};
use crate::state::{state_alert_for_transition, DetectorRegistry};
use crate::storage::Store;
use crate::types::{
    metrics, MachineState, MachineStateInfo, MlReply, Prediction, ProfileContext, SensorReading,
};

/// Owns the per-tick processing sequence. One instance serves all machines;
/// per-machine mutable state lives in the registry, the classifier, and the
/// incident manager.
pub struct TickProcessor {
    store: Store,
    registry: Arc<DetectorRegistry>,
    classifier: Mutex<WearClassifier>,
    incidents: Mutex<IncidentManager>,
    ai: Option<AiClient>,
    events: EventBus,
    latest_evaluation: RwLock<Option<Evaluation>>,
}

impl TickProcessor {
    pub fn new(
        store: Store,
        registry: Arc<DetectorRegistry>,
        incidents: IncidentManager,
        ai: Option<AiClient>,
        events: EventBus,
    ) -> Self {
        Self {
            store,
            registry,
            classifier: Mutex::new(WearClassifier::new()),
            incidents: Mutex::new(incidents),
            ai,
            events,
            latest_evaluation: RwLock::new(None),
        }
    }

    /// Latest evaluation for the dashboard surface.
    pub async fn latest_evaluation(&self) -> Option<Evaluation> {
        self.latest_evaluation.read().await.clone()
    }

    pub fn registry(&self) -> &Arc<DetectorRegistry> {
        &self.registry
    }

    /// Clear in-memory incident tracking (reset-state command).
    pub async fn reset_incident_state(&self) {
        self.incidents.lock().await.reset_runtime_state();
        self.classifier.lock().await.reset();
    }

    // ------------------------------------------------------------------
    // Phase 2: state detection
    // ------------------------------------------------------------------

    async fn update_state(
        &self,
        machine_id: Uuid,
        reading: SensorReading,
    ) -> anyhow::Result<MachineStateInfo> {
        let thresholds = self
            .store
            .get_state_thresholds(machine_id)
            .await
            .unwrap_or_default()
            .unwrap_or_default();

        let existed = self.registry.contains(machine_id);
        let detector = self.registry.get_or_create(machine_id, thresholds);
        let mut detector = detector.lock().await;

        if !existed {
            match self.store.latest_transition(machine_id).await {
                Ok(Some(last)) => detector.hydrate(
                    last.to_state,
                    last.transition_time,
                    last.confidence_after,
                ),
                Ok(None) => {}
                Err(e) => debug!(error = %e, "Detector hydration skipped"),
            }
        }

        let update = detector.add_reading(reading);
        drop(detector);

        if let Some(transition) = update.transition {
            if let Err(e) = self.store.record_transition(&transition).await {
                error!(error = %e, "Failed to persist state transition");
            }
            if let Err(e) = self
                .store
                .record_machine_state(machine_id, &update.info)
                .await
            {
                error!(error = %e, "Failed to persist machine state snapshot");
            }
            if let Some(alert) = state_alert_for_transition(&transition) {
                if let Err(e) = self.store.record_state_alert(&alert).await {
                    error!(error = %e, "Failed to persist state alert");
                }
                self.events.publish(
                    "machine_state.alert",
                    serde_json::json!({
                        "machine_id": alert.machine_id,
                        "alert_type": alert.alert_type,
                        "state": alert.state.as_str(),
                        "message": alert.message,
                    }),
                );
            }
        }

        Ok(update.info)
    }

    // ------------------------------------------------------------------
    // Phase 3: baseline collection
    // ------------------------------------------------------------------

    async fn collect_baseline_samples(
        &self,
        profile: &ProfileContext,
        state: MachineState,
        ctx: &TickContext<'_>,
    ) {
        let Some(profile_id) = profile.profile_id else {
            return;
        };
        if !profile.baseline_learning {
            return;
        }
        let Some(newest) = ctx.window.last() else {
            return;
        };

        let samples: BTreeMap<String, f64> = metrics::BASELINE_METRICS
            .iter()
            .filter_map(|m| metrics::value_from_row(newest, m).map(|v| ((*m).to_string(), v)))
            .collect();

        match self
            .store
            .collect_samples_batch(profile_id, &samples, state, newest.timestamp)
            .await
        {
            Ok(collected) if collected > 0 => {
                debug!(profile_id = %profile_id, collected, "Baseline samples collected");
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "Baseline sample collection failed"),
        }
    }

    // ------------------------------------------------------------------
    // Phase 5: AI scoring
    // ------------------------------------------------------------------

    async fn score_with_ai(
        &self,
        ctx: &TickContext<'_>,
        profile: Option<&ProfileContext>,
    ) -> MlReply {
        let Some(ai) = &self.ai else {
            return MlReply::empty();
        };
        let Some(newest) = ctx.window.last() else {
            return MlReply::empty();
        };

        let ready = profile.filter(|p| p.baseline_ready);
        let request = PredictionRequest {
            sensor_id: ctx.sensor_id,
            machine_id: ctx.machine_id,
            timestamp: newest.timestamp,
            value: newest.pressure_bar,
            context: PredictionContext {
                readings: ctx.features.readings.clone(),
            },
            profile_id: ready.and_then(|p| p.profile_id),
            material_id: ready.and_then(|p| p.material_id.clone()),
            baseline_stats: ready.map(|p| p.baselines.clone()),
        };
        ai.predict(&request).await
    }

    // ------------------------------------------------------------------
    // Phase 6: prediction persistence
    // ------------------------------------------------------------------

    async fn persist_prediction(
        &self,
        ctx: &TickContext<'_>,
        evaluation: &Evaluation,
        reply: &MlReply,
    ) -> anyhow::Result<()> {
        let Some(newest) = ctx.window.last() else {
            return Ok(());
        };

        let severities: BTreeMap<&String, i8> = evaluation
            .metrics
            .iter()
            .map(|(k, m)| (k, m.final_severity.code()))
            .collect();

        let prediction = Prediction {
            id: Uuid::new_v4(),
            machine_id: ctx.machine_id,
            sensor_id: ctx.sensor_id,
            timestamp: newest.timestamp,
            prediction: reply
                .prediction
                .clone()
                .or_else(|| reply.status.clone())
                .unwrap_or_else(|| "normal".into()),
            status: reply.status.clone().unwrap_or_else(|| "normal".into()),
            score: reply.score.unwrap_or(0.0),
            confidence: reply.confidence.unwrap_or(0.0),
            anomaly_type: reply.anomaly_type.clone(),
            model_version: reply
                .model_version
                .clone()
                .unwrap_or_else(|| "unknown".into()),
            remaining_useful_life: reply.rul,
            response_time_ms: reply.response_time_ms.unwrap_or(0.0),
            contributing_features: reply.contributing_features.clone(),
            metadata: serde_json::json!({
                "source": "mssql",
                "trend_date": newest.timestamp,
                "snapshot": ctx.features.readings,
                "anomaly_score": reply.score.unwrap_or(0.0),
                "drift_score": ctx.features.drift_score,
                "wear_risk_score": reply.wear_risk_score(),
                "feature_window": {
                    "window_size": ctx.features.window_size,
                    "channels": ctx.features.channels,
                    "temp_slope_c_per_min": ctx.features.temp_slope_c_per_min,
                },
                "ai_raw": reply.raw,
                "severities": severities,
                "risk_score": evaluation.risk_score,
                "process_status": evaluation.process_status.color(),
            }),
        };

        self.store.insert_prediction(&prediction).await?;
        self.events.publish(
            "prediction.created",
            serde_json::json!({
                "id": prediction.id,
                "machine_id": prediction.machine_id,
                "score": prediction.score,
                "status": prediction.status,
                "timestamp": prediction.timestamp,
            }),
        );
        Ok(())
    }

    // ------------------------------------------------------------------
    // Phases 7-8: wear classification and incident policy
    // ------------------------------------------------------------------

    async fn run_incident_policy(
        &self,
        ctx: &TickContext<'_>,
        state: MachineState,
        evaluation: &Evaluation,
    ) {
        let Some(newest) = ctx.window.last() else {
            return;
        };
        let now = newest.timestamp;

        let mut profile = WearProfile::from_severity(if state.is_production() {
            evaluation.process_status
        } else {
            crate::types::Severity::Unknown
        });

        // Trend classifier may escalate, never de-escalate.
        let decision = {
            let mut classifier = self.classifier.lock().await;
            if state.is_production() {
                classifier.observe(ctx.machine_id, "temperature", newest.temp_avg(), now);
                classifier.observe(ctx.machine_id, "pressure", newest.pressure_bar, now);
            }
            classifier.decide(ctx.machine_id, now)
        };
        if let Some(decision) = &decision {
            if state.is_production() {
                profile = profile.max(decision.profile);
            }

            // Persist the wear state for the dashboard, like any other
            // machine metadata.
            let ai_state = serde_json::json!({
                "ai_state": {
                    "active_profile": profile.code(),
                    "confidence": decision.confidence,
                    "wear_index": decision.wear_index,
                    "reason": decision.reason,
                    "evidence": decision.evidence,
                    "updated_at": now,
                }
            });
            if let Err(e) = self
                .store
                .update_machine_metadata(ctx.machine_id, &ai_state)
                .await
            {
                debug!(error = %e, "Failed to persist wear state");
            }
        }

        let actions = {
            let mut incidents = self.incidents.lock().await;
            incidents.observe_profile(ctx.machine_id, profile, now)
        };
        if actions.is_empty() {
            return;
        }

        match self
            .store
            .apply_incident_actions(ctx.machine_id, &actions)
            .await
        {
            Ok(created_keys) => {
                let mut incidents = self.incidents.lock().await;
                for key in &created_keys {
                    incidents.note_alarm_created(key, now);
                    self.events.publish(
                        "alarm.created",
                        serde_json::json!({
                            "machine_id": ctx.machine_id,
                            "incident_key": key,
                        }),
                    );
                }
            }
            Err(e) => {
                // Best-effort: incident failures never block the tick.
                error!(error = %e, "Incident application failed");
            }
        }
    }

    // ------------------------------------------------------------------
    // Profile context
    // ------------------------------------------------------------------

    async fn load_profile_context(&self, machine_id: Uuid) -> Option<ProfileContext> {
        let machine = match self.store.get_machine(machine_id).await {
            Ok(Some(m)) => m,
            Ok(None) => return None,
            Err(e) => {
                warn!(error = %e, "Machine lookup failed");
                return None;
            }
        };
        let material = machine.current_material();
        let profile = match self.store.get_active_profile(machine_id, &material).await {
            Ok(Some(p)) => p,
            Ok(None) => {
                debug!(machine_id = %machine_id, material = %material, "No active profile");
                return None;
            }
            Err(e) => {
                warn!(error = %e, "Profile lookup failed");
                return None;
            }
        };
        match self.store.load_profile_context(&profile).await {
            Ok(context) => Some(context),
            Err(e) => {
                warn!(error = %e, "Profile context load failed");
                None
            }
        }
    }
}

#[async_trait]
impl TickHandler for TickProcessor {
    async fn handle_tick(&self, ctx: TickContext<'_>) -> anyhow::Result<()> {
        let Some(newest) = ctx.window.last() else {
            return Ok(());
        };

        // PHASE 2: state detection.
        let reading = SensorReading::from_row(newest);
        let info = self.update_state(ctx.machine_id, reading).await?;
        let state = info.state;

        // Profile context for this tick.
        let profile = self.load_profile_context(ctx.machine_id).await;

        // PHASE 3: baseline collection (gated inside on learning flag).
        if state.is_production() {
            if let Some(profile) = &profile {
                self.collect_baseline_samples(profile, state, &ctx).await;
            }
        }

        // PHASE 4: evaluation. ML advisory comes from the stored
        // prediction history of the last half hour.
        let (ml_scores, ml_warning_overall) = if state.is_production() {
            let since = newest.timestamp - Duration::minutes(ML_LOOKBACK_MINUTES);
            match self
                .store
                .recent_predictions(ctx.machine_id, since, ML_LOOKBACK_LIMIT)
                .await
            {
                Ok(predictions) => evaluator::ml::ml_scores(&predictions),
                Err(e) => {
                    debug!(error = %e, "ML prediction lookup failed");
                    (BTreeMap::new(), false)
                }
            }
        } else {
            (BTreeMap::new(), false)
        };

        let evaluation = evaluator::evaluate(&EvaluationInput {
            machine_id: ctx.machine_id,
            timestamp: newest.timestamp,
            window: ctx.window,
            state,
            profile: profile.as_ref(),
            ml_scores,
            ml_warning_overall,
        });

        // PHASES 5-6: AI scoring and prediction persistence, PRODUCTION only.
        if state.is_production() {
            let reply = self.score_with_ai(&ctx, profile.as_ref()).await;
            self.persist_prediction(&ctx, &evaluation, &reply).await?;
        }

        // PHASES 7-8: wear classification and incident policy (best-effort).
        self.run_incident_policy(&ctx, state, &evaluation).await;

        // PHASE 9: publish the tick and retain the latest evaluation.
        self.events.publish(
            "sensor.data",
            serde_json::json!({
                "machine_id": ctx.machine_id,
                "timestamp": newest.timestamp,
                "state": state.as_str(),
                "readings": ctx.features.readings,
            }),
        );
        *self.latest_evaluation.write().await = Some(evaluation);

        Ok(())
    }
}
