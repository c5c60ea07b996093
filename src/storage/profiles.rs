//! Profile store: lookup, baseline lifecycle, bands, templates.
//!
//! Lifecycle operations are atomic - each runs in a single transaction so
//! flags, stats rows, and sample rows can never drift apart. Samples exist
//! only while `baseline_learning` is set.

use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::Row;
use std::collections::BTreeMap;
use tracing::{info, warn};
use uuid::Uuid;

use crate::profiles::{collect_gate, finalize_gate, stats as baseline_stats, ProfileError};
use crate::types::{
    BandMode, BaselineStats, MachineState, Profile, ProfileContext, ScoringBand, Severity,
};

use super::Store;

fn profile_from_row(row: &PgRow) -> Result<Profile, sqlx::Error> {
    Ok(Profile {
        id: row.try_get("id")?,
        machine_id: row.try_get("machine_id")?,
        material_id: row.try_get("material_id")?,
        is_active: row.try_get("is_active")?,
        baseline_learning: row.try_get("baseline_learning")?,
        baseline_ready: row.try_get("baseline_ready")?,
        created_at: row.try_get("created_at")?,
    })
}

const PROFILE_COLUMNS: &str =
    "id, machine_id, material_id, is_active, baseline_learning, baseline_ready, created_at";

impl Store {
    // ------------------------------------------------------------------
    // Lookup
    // ------------------------------------------------------------------

    pub async fn get_profile(&self, profile_id: Uuid) -> Result<Option<Profile>, ProfileError> {
        let row = sqlx::query(&format!(
            "SELECT {PROFILE_COLUMNS} FROM profiles WHERE id = $1"
        ))
        .bind(profile_id)
        .fetch_optional(self.pool())
        .await?;
        row.map(|r| profile_from_row(&r)).transpose().map_err(Into::into)
    }

    /// Active profile for `(machine, material)`: exact match first, then
    /// the material default (machine NULL), else None.
    pub async fn get_active_profile(
        &self,
        machine_id: Uuid,
        material_id: &str,
    ) -> Result<Option<Profile>, ProfileError> {
        let row = sqlx::query(&format!(
            "SELECT {PROFILE_COLUMNS} FROM profiles
             WHERE machine_id = $1 AND material_id = $2 AND is_active"
        ))
        .bind(machine_id)
        .bind(material_id)
        .fetch_optional(self.pool())
        .await?;
        if let Some(row) = row {
            return Ok(Some(profile_from_row(&row)?));
        }

        let row = sqlx::query(&format!(
            "SELECT {PROFILE_COLUMNS} FROM profiles
             WHERE machine_id IS NULL AND material_id = $1 AND is_active"
        ))
        .bind(material_id)
        .fetch_optional(self.pool())
        .await?;
        row.map(|r| profile_from_row(&r)).transpose().map_err(Into::into)
    }

    /// Create an active profile. At most one active profile may exist per
    /// `(machine, material)`; the partial unique indexes enforce it.
    pub async fn create_profile(
        &self,
        machine_id: Option<Uuid>,
        material_id: &str,
    ) -> Result<Profile, ProfileError> {
        let id = Uuid::new_v4();
        let result = sqlx::query(
            "INSERT INTO profiles (id, machine_id, material_id, is_active)
             VALUES ($1, $2, $3, TRUE)",
        )
        .bind(id)
        .bind(machine_id)
        .bind(material_id)
        .execute(self.pool())
        .await;

        match result {
            Ok(_) => {}
            Err(e) if e
                .as_database_error()
                .is_some_and(|d| d.is_unique_violation()) =>
            {
                return Err(ProfileError::DuplicateActiveProfile);
            }
            Err(e) => return Err(e.into()),
        }

        self.get_profile(id)
            .await?
            .ok_or(ProfileError::NotFound(id))
    }

    /// Load everything the evaluator needs from a profile.
    pub async fn load_profile_context(
        &self,
        profile: &Profile,
    ) -> Result<ProfileContext, ProfileError> {
        let mut context = ProfileContext {
            profile_id: Some(profile.id),
            material_id: Some(profile.material_id.clone()),
            baseline_learning: profile.baseline_learning,
            baseline_ready: profile.baseline_ready,
            baselines: BTreeMap::new(),
            bands: BTreeMap::new(),
            templates: BTreeMap::new(),
        };

        let rows = sqlx::query(
            "SELECT metric_name, baseline_mean, baseline_std, p05, p95, sample_count
             FROM profile_baseline_stats WHERE profile_id = $1",
        )
        .bind(profile.id)
        .fetch_all(self.pool())
        .await?;
        for row in rows {
            let metric: String = row.try_get("metric_name")?;
            context.baselines.insert(
                metric,
                BaselineStats {
                    mean: row.try_get("baseline_mean")?,
                    std: row.try_get("baseline_std")?,
                    p05: row.try_get("p05")?,
                    p95: row.try_get("p95")?,
                    sample_count: row.try_get("sample_count")?,
                },
            );
        }

        let rows = sqlx::query(
            "SELECT metric_name, mode, green_limit, orange_limit
             FROM profile_scoring_bands WHERE profile_id = $1",
        )
        .bind(profile.id)
        .fetch_all(self.pool())
        .await?;
        for row in rows {
            let metric: String = row.try_get("metric_name")?;
            let mode: String = row.try_get("mode")?;
            let Some(mode) = BandMode::parse(&mode) else {
                warn!(metric = %metric, mode = %mode, "Unknown scoring band mode, skipping");
                continue;
            };
            context.bands.insert(
                metric,
                ScoringBand {
                    mode,
                    green_limit: row.try_get("green_limit")?,
                    orange_limit: row.try_get("orange_limit")?,
                },
            );
        }

        let rows = sqlx::query(
            "SELECT metric_name, severity, text
             FROM profile_message_templates WHERE profile_id = $1",
        )
        .bind(profile.id)
        .fetch_all(self.pool())
        .await?;
        for row in rows {
            let metric: String = row.try_get("metric_name")?;
            let severity: String = row.try_get("severity")?;
            let text: String = row.try_get("text")?;
            context.templates.insert(format!("{metric}:{severity}"), text);
        }

        Ok(context)
    }

    // ------------------------------------------------------------------
    // Baseline lifecycle
    // ------------------------------------------------------------------

    /// Enter learning mode: set the flag, clear ready, delete existing
    /// samples and stats. Fails if the profile is already learning.
    pub async fn start_baseline_learning(&self, profile_id: Uuid) -> Result<(), ProfileError> {
        let profile = self
            .get_profile(profile_id)
            .await?
            .ok_or(ProfileError::NotFound(profile_id))?;
        if profile.baseline_learning {
            return Err(ProfileError::AlreadyLearning(profile_id));
        }

        let mut tx = self.pool().begin().await?;
        sqlx::query(
            "UPDATE profiles SET baseline_learning = TRUE, baseline_ready = FALSE WHERE id = $1",
        )
        .bind(profile_id)
        .execute(&mut *tx)
        .await?;
        sqlx::query("DELETE FROM profile_baseline_stats WHERE profile_id = $1")
            .bind(profile_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM profile_baseline_samples WHERE profile_id = $1")
            .bind(profile_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        info!(profile_id = %profile_id, "Started baseline learning");
        Ok(())
    }

    /// Collect one tick's samples. Gated on the learning flag, PRODUCTION
    /// state, and the tracked metric set. Returns how many were stored.
    pub async fn collect_samples_batch(
        &self,
        profile_id: Uuid,
        samples: &BTreeMap<String, f64>,
        machine_state: MachineState,
        timestamp: DateTime<Utc>,
    ) -> Result<usize, ProfileError> {
        let profile = self
            .get_profile(profile_id)
            .await?
            .ok_or(ProfileError::NotFound(profile_id))?;

        let mut tx = self.pool().begin().await?;
        let mut collected = 0usize;
        for (metric, value) in samples {
            if collect_gate(&profile, machine_state, metric).is_err() {
                continue;
            }
            sqlx::query(
                "INSERT INTO profile_baseline_samples (id, profile_id, metric_name, value, timestamp)
                 VALUES ($1, $2, $3, $4, $5)",
            )
            .bind(Uuid::new_v4())
            .bind(profile_id)
            .bind(metric)
            .bind(value)
            .bind(timestamp)
            .execute(&mut *tx)
            .await?;

            // Stats row tracks the running sample count; statistics stay
            // null until finalize.
            sqlx::query(
                "INSERT INTO profile_baseline_stats
                 (id, profile_id, metric_name, sample_count, last_updated)
                 VALUES ($1, $2, $3, 1, $4)
                 ON CONFLICT (profile_id, metric_name) DO UPDATE
                 SET sample_count = profile_baseline_stats.sample_count + 1,
                     last_updated = EXCLUDED.last_updated",
            )
            .bind(Uuid::new_v4())
            .bind(profile_id)
            .bind(metric)
            .bind(timestamp)
            .execute(&mut *tx)
            .await?;

            collected += 1;
        }
        tx.commit().await?;
        Ok(collected)
    }

    /// Compute and persist the baseline statistics, delete the samples,
    /// and flip the lifecycle flags. Requires ≥ 100 samples per metric.
    pub async fn finalize_baseline(&self, profile_id: Uuid) -> Result<(), ProfileError> {
        let profile = self
            .get_profile(profile_id)
            .await?
            .ok_or(ProfileError::NotFound(profile_id))?;
        if !profile.baseline_learning {
            return Err(ProfileError::NotLearning(profile_id));
        }

        let rows = sqlx::query(
            "SELECT metric_name, value FROM profile_baseline_samples WHERE profile_id = $1",
        )
        .bind(profile_id)
        .fetch_all(self.pool())
        .await?;
        if rows.is_empty() {
            return Err(ProfileError::NoSamples(profile_id));
        }

        let mut by_metric: BTreeMap<String, Vec<f64>> = BTreeMap::new();
        for row in rows {
            let metric: String = row.try_get("metric_name")?;
            let value: f64 = row.try_get("value")?;
            by_metric.entry(metric).or_default().push(value);
        }

        let counts: Vec<(String, i64)> = by_metric
            .iter()
            .map(|(m, v)| (m.clone(), v.len() as i64))
            .collect();
        finalize_gate(&counts)?;

        let now = Utc::now();
        let mut tx = self.pool().begin().await?;
        for (metric, values) in &by_metric {
            let Some(stats) = baseline_stats::finalize(values) else {
                continue;
            };
            sqlx::query(
                "INSERT INTO profile_baseline_stats
                 (id, profile_id, metric_name, baseline_mean, baseline_std, p05, p95,
                  sample_count, last_updated)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                 ON CONFLICT (profile_id, metric_name) DO UPDATE
                 SET baseline_mean = EXCLUDED.baseline_mean,
                     baseline_std = EXCLUDED.baseline_std,
                     p05 = EXCLUDED.p05,
                     p95 = EXCLUDED.p95,
                     sample_count = EXCLUDED.sample_count,
                     last_updated = EXCLUDED.last_updated",
            )
            .bind(Uuid::new_v4())
            .bind(profile_id)
            .bind(metric)
            .bind(stats.mean)
            .bind(stats.std)
            .bind(stats.p05)
            .bind(stats.p95)
            .bind(stats.sample_count)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query("DELETE FROM profile_baseline_samples WHERE profile_id = $1")
            .bind(profile_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            "UPDATE profiles SET baseline_learning = FALSE, baseline_ready = TRUE WHERE id = $1",
        )
        .bind(profile_id)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        info!(profile_id = %profile_id, metrics = by_metric.len(), "Baseline finalized");
        Ok(())
    }

    /// Drop the baseline: delete stats and samples, clear both flags.
    pub async fn reset_baseline(&self, profile_id: Uuid, archive: bool) -> Result<(), ProfileError> {
        let profile = self
            .get_profile(profile_id)
            .await?
            .ok_or(ProfileError::NotFound(profile_id))?;

        let mut tx = self.pool().begin().await?;
        if archive {
            sqlx::query("DELETE FROM profile_baseline_stats WHERE profile_id = $1")
                .bind(profile.id)
                .execute(&mut *tx)
                .await?;
            sqlx::query("DELETE FROM profile_baseline_samples WHERE profile_id = $1")
                .bind(profile.id)
                .execute(&mut *tx)
                .await?;
        }
        sqlx::query(
            "UPDATE profiles SET baseline_learning = FALSE, baseline_ready = FALSE WHERE id = $1",
        )
        .bind(profile.id)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        info!(profile_id = %profile_id, archive, "Baseline reset");
        Ok(())
    }

    /// Whether the machine's active profile is currently learning - the
    /// alarm-suppression check used by the incident applier.
    pub async fn is_baseline_learning(
        &self,
        machine_id: Uuid,
        material_id: &str,
    ) -> Result<bool, ProfileError> {
        Ok(self
            .get_active_profile(machine_id, material_id)
            .await?
            .is_some_and(|p| p.baseline_learning))
    }

    // ------------------------------------------------------------------
    // Bands and templates
    // ------------------------------------------------------------------

    pub async fn upsert_scoring_band(
        &self,
        profile_id: Uuid,
        metric: &str,
        band: &ScoringBand,
    ) -> Result<(), ProfileError> {
        sqlx::query(
            "INSERT INTO profile_scoring_bands (id, profile_id, metric_name, mode, green_limit, orange_limit)
             VALUES ($1, $2, $3, $4, $5, $6)
             ON CONFLICT (profile_id, metric_name) DO UPDATE
             SET mode = EXCLUDED.mode,
                 green_limit = EXCLUDED.green_limit,
                 orange_limit = EXCLUDED.orange_limit",
        )
        .bind(Uuid::new_v4())
        .bind(profile_id)
        .bind(metric)
        .bind(band.mode.as_str())
        .bind(band.green_limit)
        .bind(band.orange_limit)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn upsert_message_template(
        &self,
        profile_id: Uuid,
        metric: &str,
        severity: Severity,
        text: &str,
    ) -> Result<(), ProfileError> {
        sqlx::query(
            "INSERT INTO profile_message_templates (id, profile_id, metric_name, severity, text)
             VALUES ($1, $2, $3, $4, $5)
             ON CONFLICT (profile_id, metric_name, severity) DO UPDATE
             SET text = EXCLUDED.text",
        )
        .bind(Uuid::new_v4())
        .bind(profile_id)
        .bind(metric)
        .bind(severity.label())
        .bind(text)
        .execute(self.pool())
        .await?;
        Ok(())
    }
}
