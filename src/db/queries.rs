pub const CREATE_SMS_LOG: &str = r#"
CREATE TABLE IF NOT EXISTS sms_log (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id INTEGER NOT NULL,
    alert_id INTEGER NOT NULL,
    phone_number TEXT NOT NULL,
    message TEXT NOT NULL,
    sent_at INTEGER NOT NULL DEFAULT (CAST(strftime('%s', 'now') AS INTEGER) * 1000),
    status TEXT NOT NULL DEFAULT 'sent'
);
"#;

pub const CREATE_SMS_LOG_ALERT_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS idx_sms_log_user_alert ON sms_log (user_id, alert_id);
"#;

pub const EXISTS_FOR_ALERT: &str = r#"
SELECT EXISTS(SELECT 1 FROM sms_log WHERE user_id = ?1 AND alert_id = ?2);
"#;

pub const EXISTS_FOR_CONTACT: &str = r#"
SELECT EXISTS(
    SELECT 1 FROM sms_log WHERE user_id = ?1 AND alert_id = ?2 AND phone_number = ?3
);
"#;

pub const INSERT_DISPATCH: &str = r#"
INSERT INTO sms_log (user_id, alert_id, phone_number, message, sent_at, status)
VALUES (?1, ?2, ?3, ?4, ?5, 'sent');
"#;

pub const TRIM_TO_RECENT: &str = r#"
DELETE FROM sms_log
WHERE id NOT IN (
    SELECT id FROM sms_log ORDER BY sent_at DESC, id DESC LIMIT ?1
);
"#;

pub const COUNT_SINCE: &str = r#"
SELECT COUNT(*) FROM sms_log WHERE sent_at >= ?1;
"#;

pub const COUNT_ALL: &str = r#"
SELECT COUNT(*) FROM sms_log;
"#;

pub const SELECT_RECENT: &str = r#"
SELECT id, user_id, alert_id, phone_number, message, sent_at, status
FROM sms_log
ORDER BY sent_at DESC, id DESC
LIMIT ?1;
"#;
