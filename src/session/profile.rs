//! Protocol parameters applied after a successful connect
//!
//! Defaults reproduce the fixed behaviour: subscribe and publish once to
//! `sample-topic/test` at QoS 1 with payload `{"co2":1000}`.

use bytes::Bytes;
use rumqttc::QoS;
use std::time::Duration;

pub const DEFAULT_TOPIC: &str = "sample-topic/test";
pub const DEFAULT_PAYLOAD: &str = r#"{"co2":1000}"#;
pub const DEFAULT_KEEP_ALIVE_SECS: u64 = 60;
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 30;

/// Session-wide MQTT parameters
#[derive(Debug, Clone, PartialEq)]
pub struct SessionProfile {
    pub topic: String,
    pub qos: QoS,
    pub payload: Bytes,
    pub retain: bool,
    pub clean_session: bool,
    pub keep_alive: Duration,
    pub connect_timeout: Duration,
    pub subscribe_on_connect: bool,
    pub publish_on_connect: bool,
}

impl Default for SessionProfile {
    fn default() -> Self {
        Self {
            topic: DEFAULT_TOPIC.to_string(),
            qos: QoS::AtLeastOnce,
            payload: Bytes::from_static(DEFAULT_PAYLOAD.as_bytes()),
            retain: false,
            clean_session: true,
            keep_alive: Duration::from_secs(DEFAULT_KEEP_ALIVE_SECS),
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            subscribe_on_connect: true,
            publish_on_connect: true,
        }
    }
}

/// Map a numeric QoS level (0, 1, 2) to rumqttc's enum
pub fn qos_from_level(level: u8) -> Option<QoS> {
    match level {
        0 => Some(QoS::AtMostOnce),
        1 => Some(QoS::AtLeastOnce),
        2 => Some(QoS::ExactlyOnce),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_profile_matches_fixed_parameters() {
        let profile = SessionProfile::default();
        assert_eq!(profile.topic, "sample-topic/test");
        assert_eq!(profile.qos, QoS::AtLeastOnce);
        assert_eq!(&profile.payload[..], br#"{"co2":1000}"#);
        assert!(!profile.retain);
        assert!(profile.clean_session);
        assert!(profile.subscribe_on_connect && profile.publish_on_connect);
    }

    #[test]
    fn test_qos_from_level() {
        assert_eq!(qos_from_level(0), Some(QoS::AtMostOnce));
        assert_eq!(qos_from_level(1), Some(QoS::AtLeastOnce));
        assert_eq!(qos_from_level(2), Some(QoS::ExactlyOnce));
        assert_eq!(qos_from_level(3), None);
    }
}
