/// A request-log row, read back for diagnostics and tests.
#[derive(Debug, Clone, serde::Serialize)]
pub struct RequestLogRecord {
    pub request_id: String,
    pub search_query: Option<String>,
    pub status: Option<String>,
    pub error: Option<String>,
    pub payload_json: Option<String>,
    pub notified_at: Option<String>,
    pub last_notification_error: Option<String>,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct AuditEventRecord {
    pub id: i64,
    pub actor: Option<String>,
    pub entity_type: String,
    pub entity_id: String,
    pub event: String,
    pub meta: Option<String>,
    pub created_at: Option<String>,
}
