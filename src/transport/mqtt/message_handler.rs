//! Pure routing of rumqttc events
//!
//! Maps raw event-loop output onto routing decisions and engine events so
//! the I/O loop in [`super::client`] stays a thin dispatcher.

use crate::transport::EngineEvent;
use bytes::Bytes;
use rumqttc::{Event, Outgoing, Packet, SubscribeReasonCode};

/// Pure message routing decisions based on MQTT events
pub struct MessageHandler;

impl MessageHandler {
    /// Route an event-loop event to a handling decision (pure function)
    pub fn route_mqtt_event(event: &Event) -> EventRoute {
        match event {
            Event::Incoming(packet) => match packet {
                Packet::ConnAck(_) => EventRoute::ConnectionAcknowledged,
                Packet::Publish(publish) => EventRoute::MessageReceived {
                    topic: publish.topic.clone(),
                    payload: publish.payload.clone(),
                },
                Packet::PubAck(ack) => EventRoute::PublishAcknowledged { packet_id: ack.pkid },
                Packet::SubAck(suback) => EventRoute::SubscriptionConfirmed {
                    packet_id: suback.pkid,
                    return_codes: suback.return_codes.clone(),
                },
                Packet::Disconnect => EventRoute::Disconnected,
                other => EventRoute::InfrastructureEvent(format!("{other:?}")),
            },
            Event::Outgoing(Outgoing::Disconnect) => EventRoute::DisconnectSent,
            Event::Outgoing(_) => EventRoute::OutgoingEvent,
        }
    }

    /// Validate subscription success from SubAck (pure function)
    pub fn validate_subscription_success(return_codes: &[SubscribeReasonCode]) -> Result<(), String> {
        if return_codes
            .iter()
            .any(|code| matches!(code, SubscribeReasonCode::Failure))
        {
            Err(format!(
                "Subscription refused with return codes: {return_codes:?}"
            ))
        } else {
            Ok(())
        }
    }

    /// Engine event to forward to the session for a route, if any (pure function)
    pub fn engine_event(route: &EventRoute) -> Option<EngineEvent> {
        match route {
            EventRoute::ConnectionAcknowledged => Some(EngineEvent::ConnectionEstablished),
            EventRoute::MessageReceived { topic, payload } => Some(EngineEvent::MessageArrived {
                topic: topic.clone(),
                payload: payload.clone(),
            }),
            EventRoute::PublishAcknowledged { packet_id } => Some(EngineEvent::DeliveryComplete {
                packet_id: *packet_id,
            }),
            EventRoute::SubscriptionConfirmed {
                packet_id,
                return_codes,
            } => Some(EngineEvent::SubscribeComplete {
                packet_id: *packet_id,
                granted: Self::validate_subscription_success(return_codes).is_ok(),
            }),
            EventRoute::Disconnected => Some(EngineEvent::ConnectionLost(
                "Broker disconnected".to_string(),
            )),
            EventRoute::DisconnectSent
            | EventRoute::InfrastructureEvent(_)
            | EventRoute::OutgoingEvent => None,
        }
    }
}

/// Routing decisions for MQTT events
#[derive(Debug, Clone, PartialEq)]
pub enum EventRoute {
    /// Connection acknowledged - ready to publish/subscribe
    ConnectionAcknowledged,
    /// Message received on subscribed topic
    MessageReceived { topic: String, payload: Bytes },
    /// QoS 1 publish acknowledged by the broker
    PublishAcknowledged { packet_id: u16 },
    /// Subscription confirmed with return codes
    SubscriptionConfirmed {
        packet_id: u16,
        return_codes: Vec<SubscribeReasonCode>,
    },
    /// Broker closed the session
    Disconnected,
    /// Our own DISCONNECT went out; the loop should stop
    DisconnectSent,
    /// Infrastructure event (PingResp, etc.)
    InfrastructureEvent(String),
    /// Outgoing event (handled automatically)
    OutgoingEvent,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rumqttc::{ConnAck, ConnectReturnCode, PubAck, Publish, QoS, SubAck};

    #[test]
    fn test_route_connack() {
        let event = Event::Incoming(Packet::ConnAck(ConnAck::new(
            ConnectReturnCode::Success,
            false,
        )));
        let route = MessageHandler::route_mqtt_event(&event);
        assert_eq!(route, EventRoute::ConnectionAcknowledged);
        assert_eq!(
            MessageHandler::engine_event(&route),
            Some(EngineEvent::ConnectionEstablished)
        );
    }

    #[test]
    fn test_route_publish() {
        let publish = Publish::new("sample-topic/test", QoS::AtLeastOnce, r#"{"co2":1000}"#);
        let route = MessageHandler::route_mqtt_event(&Event::Incoming(Packet::Publish(publish)));

        assert_eq!(
            route,
            EventRoute::MessageReceived {
                topic: "sample-topic/test".to_string(),
                payload: Bytes::from_static(br#"{"co2":1000}"#),
            }
        );
    }

    #[test]
    fn test_route_puback_maps_to_delivery_complete() {
        let route = MessageHandler::route_mqtt_event(&Event::Incoming(Packet::PubAck(PubAck::new(7))));
        assert_eq!(
            MessageHandler::engine_event(&route),
            Some(EngineEvent::DeliveryComplete { packet_id: 7 })
        );
    }

    #[test]
    fn test_route_suback_failure_is_not_granted() {
        let suback = SubAck::new(3, vec![SubscribeReasonCode::Failure]);
        let route = MessageHandler::route_mqtt_event(&Event::Incoming(Packet::SubAck(suback)));
        assert_eq!(
            MessageHandler::engine_event(&route),
            Some(EngineEvent::SubscribeComplete {
                packet_id: 3,
                granted: false
            })
        );
    }

    #[test]
    fn test_route_outgoing_disconnect() {
        let route = MessageHandler::route_mqtt_event(&Event::Outgoing(Outgoing::Disconnect));
        assert_eq!(route, EventRoute::DisconnectSent);
        assert_eq!(MessageHandler::engine_event(&route), None);
    }

    #[test]
    fn test_route_pingresp_is_infrastructure() {
        let route = MessageHandler::route_mqtt_event(&Event::Incoming(Packet::PingResp));
        assert!(matches!(route, EventRoute::InfrastructureEvent(_)));
    }

    #[test]
    fn test_validate_subscription_success() {
        assert!(MessageHandler::validate_subscription_success(&[SubscribeReasonCode::Success(
            QoS::AtLeastOnce
        )])
        .is_ok());
        assert!(MessageHandler::validate_subscription_success(&[
            SubscribeReasonCode::Success(QoS::AtLeastOnce),
            SubscribeReasonCode::Failure,
        ])
        .is_err());
    }
}
