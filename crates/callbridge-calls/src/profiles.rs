use crate::CallStoreError;
use callbridge_types::{BusinessProfile, TurnDetection, VoiceSettings};
use rusqlite::{params, Connection, OptionalExtension, Row};

const PROFILE_COLUMNS: &str = "business_id, name, phone_number, agent_name, greeting,
    business_hours, emergency_keywords_json, transfer_keywords_json,
    emergency_transfer_number, voice_json, turn_detection_json";

/// Inserts or replaces a business profile, keyed by `business_id`.
///
/// Profiles are owned by the admin product; the server binary only calls
/// this to seed profiles from its configuration file.
pub fn upsert_business(conn: &Connection, profile: &BusinessProfile) -> Result<(), CallStoreError> {
    conn.execute(
        "INSERT INTO businesses (
            business_id, name, phone_number, agent_name, greeting, business_hours,
            emergency_keywords_json, transfer_keywords_json, emergency_transfer_number,
            voice_json, turn_detection_json
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
        ON CONFLICT(business_id) DO UPDATE SET
            name = excluded.name,
            phone_number = excluded.phone_number,
            agent_name = excluded.agent_name,
            greeting = excluded.greeting,
            business_hours = excluded.business_hours,
            emergency_keywords_json = excluded.emergency_keywords_json,
            transfer_keywords_json = excluded.transfer_keywords_json,
            emergency_transfer_number = excluded.emergency_transfer_number,
            voice_json = excluded.voice_json,
            turn_detection_json = excluded.turn_detection_json",
        params![
            profile.business_id,
            profile.name,
            profile.phone_number,
            profile.agent_name,
            profile.greeting,
            profile.business_hours,
            serde_json::to_string(&profile.emergency_keywords)?,
            serde_json::to_string(&profile.transfer_keywords)?,
            profile.emergency_transfer_number,
            serde_json::to_string(&profile.voice)?,
            serde_json::to_string(&profile.turn_detection)?,
        ],
    )?;
    Ok(())
}

/// Looks up the profile for a business id.
///
/// Returns [`CallStoreError::ConfigurationMissing`] if none exists.
pub fn get_business(conn: &Connection, business_id: &str) -> Result<BusinessProfile, CallStoreError> {
    conn.query_row(
        &format!("SELECT {PROFILE_COLUMNS} FROM businesses WHERE business_id = ?1"),
        [business_id],
        map_row_to_profile,
    )
    .optional()?
    .ok_or_else(|| CallStoreError::ConfigurationMissing(business_id.to_string()))
}

/// Looks up the profile serving an inbound (dialed) number.
pub fn find_business_by_number(
    conn: &Connection,
    phone_number: &str,
) -> Result<BusinessProfile, CallStoreError> {
    conn.query_row(
        &format!("SELECT {PROFILE_COLUMNS} FROM businesses WHERE phone_number = ?1"),
        [phone_number],
        map_row_to_profile,
    )
    .optional()?
    .ok_or_else(|| CallStoreError::ConfigurationMissing(phone_number.to_string()))
}

fn json_column<T: serde::de::DeserializeOwned>(row: &Row, idx: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

/// Like [`json_column`], but an empty object (the column default) yields `T::default()`.
fn json_column_or_default<T>(row: &Row, idx: usize) -> rusqlite::Result<T>
where
    T: serde::de::DeserializeOwned + Default,
{
    let raw: String = row.get(idx)?;
    if raw.trim() == "{}" {
        return Ok(T::default());
    }
    json_column(row, idx)
}

fn map_row_to_profile(row: &Row) -> rusqlite::Result<BusinessProfile> {
    Ok(BusinessProfile {
        business_id: row.get(0)?,
        name: row.get(1)?,
        phone_number: row.get(2)?,
        agent_name: row.get(3)?,
        greeting: row.get(4)?,
        business_hours: row.get(5)?,
        emergency_keywords: json_column(row, 6)?,
        transfer_keywords: json_column(row, 7)?,
        emergency_transfer_number: row.get(8)?,
        voice: json_column_or_default::<VoiceSettings>(row, 9)?,
        turn_detection: json_column_or_default::<TurnDetection>(row, 10)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        callbridge_db::run_migrations(&conn).unwrap();
        conn
    }

    fn plumber() -> BusinessProfile {
        BusinessProfile {
            business_id: "rapid-plumbing".to_string(),
            name: "Rapid Plumbing".to_string(),
            phone_number: "+15550001111".to_string(),
            agent_name: "Riley".to_string(),
            greeting: "Rapid Plumbing, this is Riley.".to_string(),
            business_hours: "24/7".to_string(),
            emergency_keywords: vec!["burst pipe".to_string()],
            transfer_keywords: vec![],
            emergency_transfer_number: Some("+15550009999".to_string()),
            voice: VoiceSettings::default(),
            turn_detection: TurnDetection::default(),
        }
    }

    #[test]
    fn profile_round_trips_through_both_lookups() {
        let conn = conn();
        upsert_business(&conn, &plumber()).unwrap();

        assert_eq!(get_business(&conn, "rapid-plumbing").unwrap(), plumber());
        assert_eq!(
            find_business_by_number(&conn, "+15550001111").unwrap(),
            plumber()
        );
    }

    #[test]
    fn unknown_number_is_configuration_missing() {
        let conn = conn();
        match find_business_by_number(&conn, "+10000000000") {
            Err(CallStoreError::ConfigurationMissing(n)) => assert_eq!(n, "+10000000000"),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn upsert_replaces_existing_profile() {
        let conn = conn();
        upsert_business(&conn, &plumber()).unwrap();

        let mut updated = plumber();
        updated.greeting = "Hello from Rapid.".to_string();
        upsert_business(&conn, &updated).unwrap();

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM businesses", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
        assert_eq!(
            get_business(&conn, "rapid-plumbing").unwrap().greeting,
            "Hello from Rapid."
        );
    }

    #[test]
    fn default_json_columns_decode_to_defaults() {
        let conn = conn();
        conn.execute(
            "INSERT INTO businesses (business_id, name, phone_number, agent_name, greeting)
             VALUES ('bare', 'Bare', '+1222', 'Ava', 'Hi')",
            [],
        )
        .unwrap();

        let p = get_business(&conn, "bare").unwrap();
        assert_eq!(p.voice, VoiceSettings::default());
        assert!(p.emergency_keywords.is_empty());
    }
}
