//! Demo seeding: synthetic historian rows and a ready-to-learn profile.
//!
//! Used by the `seed-demo` CLI command and by the integration tests. The
//! synthetic day follows a realistic shift: cold start, heat-up, a short
//! warm idle, then steady production with mild noise.

use chrono::{DateTime, Duration, Utc};
use rand::Rng;

use crate::config::defaults::{DEFAULT_MATERIAL_ID, SETTING_HISTORIAN_CONNECTION};
use crate::config::HistorianConfig;
use crate::profiles::ProfileError;
use crate::storage::Store;
use crate::types::{metrics, BandMode, HistorianRow, ScoringBand, Severity};

/// Synthetic rows covering heat-up, idle, and production, one row per
/// `step_secs` seconds.
pub fn demo_rows(start: DateTime<Utc>, step_secs: i64) -> Vec<HistorianRow> {
    let mut rng = rand::thread_rng();
    let mut rows = Vec::new();
    let mut ts = start;

    // Heat-up: still machine, temperatures climbing 40 -> 180 °C.
    let heating_steps = 40;
    for i in 0..heating_steps {
        let temp = 40.0 + (i as f64 / heating_steps as f64) * 140.0;
        rows.push(row(ts, 0.0, 0.3, temp, &mut rng));
        ts += Duration::seconds(step_secs);
    }

    // Warm idle: flat temperatures, no rotation.
    for _ in 0..15 {
        rows.push(row(ts, 0.0, 0.8, 180.0, &mut rng));
        ts += Duration::seconds(step_secs);
    }

    // Production: steady screw speed and melt pressure.
    for _ in 0..120 {
        let rpm = 85.0 + rng.gen_range(-1.5..1.5);
        let pressure = 30.0 + rng.gen_range(-0.4..0.4);
        let temp = 179.5 + rng.gen_range(-0.8..0.8);
        rows.push(row(ts, rpm, pressure, temp, &mut rng));
        ts += Duration::seconds(step_secs);
    }

    rows
}

fn row(
    ts: DateTime<Utc>,
    rpm: f64,
    pressure: f64,
    temp: f64,
    rng: &mut impl Rng,
) -> HistorianRow {
    HistorianRow {
        timestamp: ts,
        screw_speed_rpm: rpm,
        pressure_bar: pressure,
        temp_zone1_c: temp + rng.gen_range(-0.5..0.5),
        temp_zone2_c: temp + rng.gen_range(-0.5..0.5),
        temp_zone3_c: temp + rng.gen_range(-0.5..0.5),
        temp_zone4_c: temp + rng.gen_range(-0.5..0.5),
    }
}

/// Seed the demo machine, a profile with scoring bands and operator
/// messages, and a disabled historian settings blob the operator can flip
/// on from the settings surface.
pub async fn seed_demo(store: &Store) -> anyhow::Result<()> {
    let historian = HistorianConfig::default();
    let (machine_id, _sensor_id) = store.ensure_extruder_machine(&historian).await?;
    store
        .update_machine_metadata(
            machine_id,
            &serde_json::json!({"current_material": DEFAULT_MATERIAL_ID}),
        )
        .await?;

    let profile = match store.create_profile(Some(machine_id), DEFAULT_MATERIAL_ID).await {
        Ok(profile) => profile,
        Err(ProfileError::DuplicateActiveProfile) => store
            .get_active_profile(machine_id, DEFAULT_MATERIAL_ID)
            .await?
            .ok_or_else(|| anyhow::anyhow!("active profile vanished during seeding"))?,
        Err(e) => return Err(e.into()),
    };

    store
        .upsert_scoring_band(
            profile.id,
            metrics::PRESSURE,
            &ScoringBand {
                mode: BandMode::Rel,
                green_limit: Some(3.0),
                orange_limit: Some(5.0),
            },
        )
        .await?;
    store
        .upsert_scoring_band(
            profile.id,
            metrics::SCREW_SPEED,
            &ScoringBand {
                mode: BandMode::Rel,
                green_limit: Some(5.0),
                orange_limit: Some(10.0),
            },
        )
        .await?;
    store
        .upsert_scoring_band(
            profile.id,
            metrics::TEMP_AVG,
            &ScoringBand {
                mode: BandMode::Abs,
                green_limit: Some(3.0),
                orange_limit: Some(6.0),
            },
        )
        .await?;

    for (metric, severity, text) in [
        (
            metrics::PRESSURE,
            Severity::Orange,
            "Melt pressure drifting - check screen pack and die",
        ),
        (
            metrics::PRESSURE,
            Severity::Red,
            "Melt pressure critical - risk of die damage, reduce output",
        ),
        (
            metrics::TEMP_AVG,
            Severity::Orange,
            "Barrel temperature drifting - verify heater zones",
        ),
        (
            metrics::TEMP_SPREAD,
            Severity::Red,
            "Zone spread critical - suspected heater or thermocouple failure",
        ),
    ] {
        store
            .upsert_message_template(profile.id, metric, severity, text)
            .await?;
    }

    // Historian connection blob, runtime-disabled until the operator
    // flips it on.
    store
        .put_setting_json(
            SETTING_HISTORIAN_CONNECTION,
            &serde_json::json!({
                "enabled": false,
                "database": historian.database,
                "schema": historian.schema,
                "table": historian.table,
            }),
        )
        .await?;

    tracing::info!(machine_id = %machine_id, profile_id = %profile.id, "Demo data seeded");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn demo_rows_cover_all_phases() {
        let start = Utc.with_ymd_and_hms(2025, 3, 1, 6, 0, 0).unwrap();
        let rows = demo_rows(start, 30);
        assert_eq!(rows.len(), 175);
        assert!(rows.windows(2).all(|p| p[0].timestamp < p[1].timestamp));

        // Heat-up starts cold and still.
        assert!(rows[0].temp_avg() < 60.0);
        assert_eq!(rows[0].screw_speed_rpm, 0.0);

        // Production phase turns the screw at pressure.
        let last = rows.last().unwrap();
        assert!(last.screw_speed_rpm > 80.0);
        assert!(last.pressure_bar > 25.0);
        assert!(last.temp_avg() > 175.0);
    }
}
