use crate::models::alert::CriticalAlert;

/// Builds the emergency SMS body. Vitals the server did not report are left
/// out entirely rather than printed as zero.
pub fn format_emergency_message(alert: &CriticalAlert, location: &str) -> String {
    let mut message = String::from("THIS MESSAGE IS FROM WRISTBUD: ");
    message.push_str("WE WOULD LIKE TO INFORM YOU THAT WE HAVE DETECTED CRITICAL VITALS FOR ");
    message.push_str(&alert.name.to_uppercase());
    message.push_str(". LAST LOCATION SEEN IS ");
    message.push_str(location);
    message.push('.');

    let vitals = format_vitals(alert);
    if !vitals.is_empty() {
        message.push(' ');
        message.push_str(&vitals);
    }

    message.push_str(" Please check on them immediately.");
    message
}

fn format_vitals(alert: &CriticalAlert) -> String {
    let mut parts = Vec::with_capacity(4);
    if let Some(hr) = alert.heart_rate {
        parts.push(format!("HR: {hr} BPM"));
    }
    if let Some(bp) = &alert.blood_pressure {
        parts.push(format!("BP: {bp}"));
    }
    if let Some(spo2) = alert.spo2 {
        parts.push(format!("SpO2: {spo2}%"));
    }
    if let Some(temp) = alert.temperature {
        parts.push(format!("Temp: {temp:.1}°F"));
    }
    parts.join(" ")
}
