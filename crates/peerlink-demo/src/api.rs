//! Method tables exposed by the demo server and client.

use peerlink_core::MethodTable;
use tracing::info;

/// Methods the demo server exposes to every client.
pub fn server_api() -> MethodTable {
    MethodTable::builder()
        .method("add", add)
        .method("multiply", multiply)
        .method("gimme_the_time", gimme_the_time)
        .method("plop", plop)
        .build()
}

/// Methods the demo client exposes back to the server.
pub fn client_api() -> MethodTable {
    MethodTable::builder().method("hello", hello).build()
}

pub fn add(a: i64, b: i64) -> i64 {
    a + b
}

pub fn multiply(a: f64, b: f64) -> f64 {
    a * b
}

/// Current time in epoch milliseconds.
pub fn gimme_the_time() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

pub fn plop() {
    info!("plop plop plop");
}

fn hello() {
    info!("The server says hello");
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_server_api_methods() {
        let api = server_api();
        assert_eq!(api.len(), 4);
        assert_eq!(api.call("add", &[json!(987), json!(1234)]), Ok(json!(2221)));
        assert_eq!(api.call("multiply", &[json!(1.4), json!(2.0)]), Ok(json!(2.8)));
        assert_eq!(api.call("plop", &[]), Ok(serde_json::Value::Null));
    }

    #[test]
    fn test_gimme_the_time_is_epoch_millis() {
        let before = chrono::Utc::now().timestamp_millis();
        let now = gimme_the_time();
        assert!(now >= before);
        assert!(now > 1_600_000_000_000);
    }

    #[test]
    fn test_client_api_accepts_hello() {
        assert!(client_api().contains("hello"));
    }
}
