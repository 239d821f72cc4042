use serde::{Deserialize, Deserializer};
use serde_json::Value;
use tracing::warn;

/// Number of emergency contact slots a user can register.
pub const CONTACT_SLOTS: usize = 3;

/// Envelope returned by `GET /api/critical-users`.
///
/// Users stay raw so one malformed record can be skipped without losing the
/// rest of the batch; see [`CriticalUsersResponse::into_alerts`].
#[derive(Debug, Deserialize)]
pub struct CriticalUsersResponse {
    #[serde(default)]
    pub users: Vec<Value>,
    #[serde(default)]
    pub count: Option<u64>,
    #[serde(default)]
    pub timestamp: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Contact {
    pub name: Option<String>,
    pub phone: Option<String>,
}

impl Contact {
    fn new(name: Option<String>, phone: Option<String>) -> Self {
        Self {
            name: non_empty(name),
            phone: non_empty(phone),
        }
    }
}

/// One server-reported critical episode for a user.
///
/// `(user_id, alert_id)` is the dedup key. The server encodes missing vitals as
/// zero or empty values; those are normalised to `None` here so a reading is
/// only ever `Some` when it should appear in the outgoing message.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(from = "RawCriticalAlert")]
pub struct CriticalAlert {
    pub user_id: i64,
    pub alert_id: i64,
    pub name: String,
    pub email: String,
    pub contacts: [Contact; CONTACT_SLOTS],
    pub heart_rate: Option<i64>,
    pub blood_pressure: Option<String>,
    pub spo2: Option<i64>,
    pub temperature: Option<f64>,
    pub alert_message: String,
    pub created_at: String,
}

impl CriticalUsersResponse {
    /// Decodes each user on its own. Records without a usable `user_id` or
    /// `alert_id` are logged and dropped.
    pub fn into_alerts(self) -> Vec<CriticalAlert> {
        let mut alerts = Vec::with_capacity(self.users.len());
        for (index, raw) in self.users.into_iter().enumerate() {
            match serde_json::from_value::<CriticalAlert>(raw) {
                Ok(alert) => alerts.push(alert),
                Err(e) => warn!(index, error = %e, "skipping malformed critical user record"),
            }
        }
        alerts
    }
}

impl CriticalAlert {
    /// Populated phone numbers with their 1-based slot, in slot order.
    pub fn contact_phones(&self) -> impl Iterator<Item = (usize, &str)> {
        self.contacts
            .iter()
            .enumerate()
            .filter_map(|(idx, c)| c.phone.as_deref().map(|p| (idx + 1, p)))
    }
}

#[derive(Debug, Deserialize)]
struct RawCriticalAlert {
    #[serde(deserialize_with = "parse_i64")]
    user_id: i64,
    #[serde(deserialize_with = "parse_i64")]
    alert_id: i64,
    #[serde(default, deserialize_with = "parse_string")]
    name: String,
    #[serde(default, deserialize_with = "parse_string")]
    email: String,
    #[serde(default, deserialize_with = "parse_string_option")]
    emergency_contact: Option<String>,
    #[serde(default, deserialize_with = "parse_string_option")]
    emergency_phone: Option<String>,
    #[serde(default, deserialize_with = "parse_string_option")]
    emergency_contact1: Option<String>,
    #[serde(default, deserialize_with = "parse_string_option")]
    emergency_phone1: Option<String>,
    #[serde(default, deserialize_with = "parse_string_option")]
    emergency_contact2: Option<String>,
    #[serde(default, deserialize_with = "parse_string_option")]
    emergency_phone2: Option<String>,
    #[serde(default, deserialize_with = "parse_string_option")]
    emergency_contact3: Option<String>,
    #[serde(default, deserialize_with = "parse_string_option")]
    emergency_phone3: Option<String>,
    #[serde(default, deserialize_with = "parse_f64_option")]
    heart_rate: Option<f64>,
    #[serde(default, deserialize_with = "parse_string_option")]
    blood_pressure: Option<String>,
    #[serde(default, deserialize_with = "parse_f64_option")]
    spo2: Option<f64>,
    #[serde(default, deserialize_with = "parse_f64_option")]
    temperature: Option<f64>,
    #[serde(default, deserialize_with = "parse_string")]
    alert_message: String,
    #[serde(default, deserialize_with = "parse_string")]
    created_at: String,
}

impl From<RawCriticalAlert> for CriticalAlert {
    fn from(raw: RawCriticalAlert) -> Self {
        // The unnumbered pair is the legacy single-contact form and fills slot 1
        // unless the server sends an explicit slot 1.
        let first = if non_empty(raw.emergency_phone1.clone()).is_some() {
            Contact::new(raw.emergency_contact1, raw.emergency_phone1)
        } else {
            Contact::new(
                raw.emergency_contact1.or(raw.emergency_contact),
                raw.emergency_phone,
            )
        };

        Self {
            user_id: raw.user_id,
            alert_id: raw.alert_id,
            name: raw.name,
            email: raw.email,
            contacts: [
                first,
                Contact::new(raw.emergency_contact2, raw.emergency_phone2),
                Contact::new(raw.emergency_contact3, raw.emergency_phone3),
            ],
            heart_rate: raw.heart_rate.map(|v| v as i64).filter(|v| *v > 0),
            blood_pressure: non_empty(raw.blood_pressure),
            spo2: raw.spo2.map(|v| v as i64).filter(|v| *v > 0),
            temperature: raw.temperature.filter(|v| *v > 0.0),
            alert_message: raw.alert_message,
            created_at: raw.created_at,
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty() && s != "null")
}

fn parse_f64_option<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StringOrFloat {
        String(String),
        Float(f64),
        Other(Value),
    }

    // Unreadable readings ("N/A", booleans, objects) count as not reported.
    let v: Option<StringOrFloat> = Option::deserialize(deserializer)?;
    Ok(match v {
        Some(StringOrFloat::Float(f)) => Some(f),
        Some(StringOrFloat::String(s)) => s.trim().parse::<f64>().ok(),
        Some(StringOrFloat::Other(_)) | None => None,
    }
    .filter(|f| f.is_finite()))
}

fn parse_i64<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    match parse_f64_option(deserializer)? {
        Some(f) if f.fract() == 0.0 => Ok(f as i64),
        Some(f) => Err(serde::de::Error::custom(format!("expected integer id, got {f}"))),
        None => Err(serde::de::Error::custom("missing or non-numeric id")),
    }
}

fn parse_string_option<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let v: Option<Value> = Option::deserialize(deserializer)?;
    Ok(match v {
        Some(Value::String(s)) => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

fn parse_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(parse_string_option(deserializer)?.unwrap_or_default())
}

#[cfg(test)]
impl CriticalAlert {
    pub fn new(user_id: i64, alert_id: i64, name: &str) -> Self {
        Self {
            user_id,
            alert_id,
            name: name.to_string(),
            ..Default::default()
        }
    }

    pub fn with_phone(mut self, slot: usize, phone: &str) -> Self {
        self.contacts[slot - 1] = Contact::new(None, Some(phone.to_string()));
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parsing_server_payload() {
        let payload = r#"
        {
            "users": [
                {
                    "user_id": 7,
                    "name": "Jane Doe",
                    "email": "jane@example.com",
                    "emergency_contact": "John",
                    "emergency_phone": "+15551234567",
                    "alert_id": 42,
                    "alert_message": "Critical health values detected",
                    "location_address": "Somewhere",
                    "created_at": "2025-11-29T06:15:15.000Z",
                    "heart_rate": 130,
                    "blood_pressure": "150/95",
                    "spo2": "0",
                    "temperature": "99.40"
                }
            ],
            "count": 1,
            "timestamp": "2025-11-29T06:15:16.000Z"
        }
        "#;

        let resp: CriticalUsersResponse = serde_json::from_str(payload).unwrap();
        assert_eq!(resp.count, Some(1));
        let alerts = resp.into_alerts();
        assert_eq!(alerts.len(), 1);
        let alert = &alerts[0];
        assert_eq!(alert.user_id, 7);
        assert_eq!(alert.alert_id, 42);
        assert_eq!(alert.contacts[0].phone.as_deref(), Some("+15551234567"));
        assert_eq!(alert.contacts[0].name.as_deref(), Some("John"));
        assert_eq!(alert.heart_rate, Some(130));
        assert_eq!(alert.blood_pressure.as_deref(), Some("150/95"));
        assert_eq!(alert.spo2, None);
        assert_eq!(alert.temperature, Some(99.4));
    }

    #[test]
    fn test_missing_optional_fields_default_to_absent() {
        let alert: CriticalAlert =
            serde_json::from_str(r#"{"user_id": "3", "alert_id": 9, "heart_rate": null}"#).unwrap();
        assert_eq!(alert.user_id, 3);
        assert_eq!(alert.name, "");
        assert_eq!(alert.heart_rate, None);
        assert_eq!(alert.blood_pressure, None);
        assert_eq!(alert.contact_phones().count(), 0);
    }

    #[test]
    fn test_numbered_contacts_keep_slot_order() {
        let alert: CriticalAlert = serde_json::from_str(
            r#"{
                "user_id": 1, "alert_id": 2,
                "emergency_phone": "111",
                "emergency_phone1": "+15550000001",
                "emergency_contact2": "No Phone",
                "emergency_phone3": "+15550000003"
            }"#,
        )
        .unwrap();

        let phones: Vec<_> = alert.contact_phones().collect();
        assert_eq!(phones, vec![(1, "+15550000001"), (3, "+15550000003")]);
        assert_eq!(alert.contacts[1].name.as_deref(), Some("No Phone"));
        assert_eq!(alert.contacts[1].phone, None);
    }

    #[test]
    fn test_missing_alert_id_is_rejected() {
        assert!(serde_json::from_str::<CriticalAlert>(r#"{"user_id": 1}"#).is_err());
        assert!(serde_json::from_str::<CriticalAlert>(r#"{"user_id": "x", "alert_id": 2}"#).is_err());
    }

    #[test]
    fn test_unreadable_vitals_are_absent() {
        let alert: CriticalAlert = serde_json::from_str(
            r#"{
                "user_id": 4, "alert_id": 5,
                "heart_rate": "N/A",
                "spo2": true,
                "temperature": {"value": 99}
            }"#,
        )
        .unwrap();
        assert_eq!(alert.heart_rate, None);
        assert_eq!(alert.spo2, None);
        assert_eq!(alert.temperature, None);
    }

    #[test]
    fn test_bad_record_does_not_drop_batch() {
        let resp: CriticalUsersResponse = serde_json::from_str(
            r#"{"users": [
                {"user_id": 1, "alert_id": 10, "heart_rate": "N/A"},
                {"user_id": "unknown", "alert_id": 11},
                {"user_id": 3, "alert_id": 12, "heart_rate": 140}
            ]}"#,
        )
        .unwrap();

        let alerts = resp.into_alerts();
        let keys: Vec<_> = alerts.iter().map(|a| (a.user_id, a.alert_id)).collect();
        assert_eq!(keys, vec![(1, 10), (3, 12)]);
        assert_eq!(alerts[0].heart_rate, None);
        assert_eq!(alerts[1].heart_rate, Some(140));
    }
}
