pub fn default_service_name() -> String {
    "ride-dispatch".to_string()
}

pub fn default_host() -> String {
    "0.0.0.0".to_string()
}

pub fn default_http_port() -> u16 {
    8090
}

pub fn default_websocket_port() -> u16 {
    7090
}

pub fn default_log_format() -> String {
    "pretty".to_string()
}

pub fn default_log_level() -> String {
    "info".to_string()
}

pub fn default_offer_window_seconds() -> u64 {
    30
}

pub fn default_candidate_limit() -> usize {
    10
}

pub fn default_driver_earnings_share() -> f64 {
    0.8
}

pub fn default_search_radius_km() -> f64 {
    5.0
}

pub fn default_auth_timeout_seconds() -> u64 {
    5
}

pub fn default_location_update_interval_seconds() -> u64 {
    3
}

pub fn default_ping_interval_seconds() -> u64 {
    30
}

pub fn default_read_timeout_seconds() -> u64 {
    60
}

pub fn default_write_timeout_seconds() -> u64 {
    10
}

pub fn default_outbound_queue_capacity() -> usize {
    256
}

pub fn default_store_type() -> String {
    "memory".to_string()
}

pub fn default_postgres_port() -> u16 {
    5432
}

pub fn default_ssl_mode() -> String {
    "prefer".to_string()
}

pub fn default_max_connections() -> u32 {
    20
}

pub fn default_connection_timeout() -> u64 {
    30
}

pub fn default_seed_rating() -> f64 {
    5.0
}

pub fn default_seed_status() -> String {
    "AVAILABLE".to_string()
}

pub fn default_metrics_port() -> u16 {
    9090
}
