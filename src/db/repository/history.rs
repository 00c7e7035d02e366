use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection};
use uuid::Uuid;

use crate::db::DatabaseError;
use crate::models::*;

/// Fixed-width UTC timestamps so text order equals time order.
fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn insert_history_entry(conn: &Connection, entry: &HistoryEntry) -> Result<(), DatabaseError> {
    let result = &entry.result;
    conn.execute(
        "INSERT INTO food_history (id, owner_id, timestamp, name, confidence, calories, protein,
         carbs, fat, recommendation, is_unknown, top_predictions)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        params![
            entry.id.to_string(),
            entry.owner_id,
            format_timestamp(&entry.timestamp),
            result.name,
            result.confidence as f64,
            result.nutrition.calories.value(),
            result.nutrition.protein.value(),
            result.nutrition.carbs.value(),
            result.nutrition.fat.value(),
            result.recommendation,
            result.is_unknown as i32,
            serde_json::to_string(&result.top_predictions)?,
        ],
    )?;
    Ok(())
}

/// Entries for one owner, newest first. Ties keep reverse insertion order.
pub fn list_history_for_owner(
    conn: &Connection,
    owner_id: &str,
) -> Result<Vec<HistoryEntry>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT id, owner_id, timestamp, name, confidence, calories, protein, carbs, fat,
         recommendation, is_unknown, top_predictions
         FROM food_history WHERE owner_id = ?1 ORDER BY timestamp DESC, rowid DESC",
    )?;

    let rows = stmt.query_map(params![owner_id], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
            row.get::<_, String>(3)?,
            row.get::<_, f64>(4)?,
            row.get::<_, Option<f64>>(5)?,
            row.get::<_, Option<f64>>(6)?,
            row.get::<_, Option<f64>>(7)?,
            row.get::<_, Option<f64>>(8)?,
            row.get::<_, Option<String>>(9)?,
            row.get::<_, i32>(10)?,
            row.get::<_, String>(11)?,
        ))
    })?;

    let mut entries = Vec::new();
    for row in rows {
        let (
            id,
            owner_id,
            timestamp,
            name,
            confidence,
            calories,
            protein,
            carbs,
            fat,
            recommendation,
            is_unknown,
            top_predictions,
        ) = row?;

        let id = Uuid::parse_str(&id).map_err(|_| DatabaseError::CorruptValue {
            field: "food_history.id".into(),
            value: id.clone(),
        })?;
        let timestamp = DateTime::parse_from_rfc3339(&timestamp)
            .map_err(|_| DatabaseError::CorruptValue {
                field: "food_history.timestamp".into(),
                value: timestamp.clone(),
            })?
            .with_timezone(&Utc);

        entries.push(HistoryEntry {
            id: HistoryEntryId(id),
            owner_id,
            timestamp,
            result: FoodResult {
                name,
                confidence: confidence as f32,
                nutrition: NutritionRecord {
                    calories: calories.into(),
                    protein: protein.into(),
                    carbs: carbs.into(),
                    fat: fat.into(),
                },
                recommendation,
                is_unknown: is_unknown != 0,
                top_predictions: serde_json::from_str(&top_predictions)?,
            },
        });
    }
    Ok(entries)
}
