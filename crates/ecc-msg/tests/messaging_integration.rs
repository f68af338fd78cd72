//! ---
//! ecc_section: "02-messaging-ipc-data-model"
//! ecc_subsection: "module"
//! ecc_type: "source"
//! ecc_scope: "code"
//! ecc_description: "Message schema helpers and protocol codecs."
//! ecc_version: "v0.1.0"
//! ecc_owner: "tbd"
//! ---
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use ecc_common::config::WireFormat;
use ecc_msg::types::{ServiceHeartbeat, ServiceState};
use ecc_msg::{
    service_endpoint, BusClient, ControlCommand, ControlCommandResponse, DeliveryGuarantee,
    HealthStatus, InMemoryBus, Message, MessagePayload, StateValue, WireCodec,
};

fn cbor_client(bus: &InMemoryBus) -> BusClient {
    BusClient::new(
        Arc::new(bus.clone()),
        WireCodec::new(WireFormat::Cbor),
        DeliveryGuarantee::AtMostOnce,
    )
}

#[tokio::test]
async fn heartbeat_reaches_every_consumer_group() {
    let bus = InMemoryBus::new();
    let client = cbor_client(&bus);
    let mut first = client.subscribe("dashboard").expect("subscribe");
    let mut second = client.subscribe("historian").expect("subscribe");

    let mut state = ServiceState::new();
    state.insert("machine-status".into(), StateValue::from("Idle"));
    client
        .publish(MessagePayload::ServiceHeartbeat(ServiceHeartbeat {
            service_id: "cnc-01".into(),
            service_name: "cnc-service".into(),
            machine_name: "bench".into(),
            timestamp: Utc::now(),
            health_status: HealthStatus::Healthy,
            current_state: state.clone(),
            uptime: Duration::from_secs(42),
            message_count: 7,
        }))
        .await
        .expect("publish heartbeat");

    for inbox in [&mut first, &mut second] {
        let message = inbox.next().await.expect("heartbeat delivered");
        match message.payload {
            MessagePayload::ServiceHeartbeat(heartbeat) => {
                assert_eq!(heartbeat.current_state, state);
                assert_eq!(heartbeat.uptime, Duration::from_secs(42));
            }
            other => panic!("unexpected payload {other:?}"),
        }
    }
}

#[tokio::test]
async fn command_and_reply_travel_point_to_point() {
    let bus = InMemoryBus::new();
    let requester = cbor_client(&bus);
    let service = cbor_client(&bus);
    let mut service_inbox = service.bind(&service_endpoint("cnc-01")).expect("bind");
    let mut reply_inbox = requester.bind("client.test").expect("bind reply");

    let command = ControlCommand::new("cnc-01", "coolant-toggle", StateValue::Bool(true));
    let request = Message::new(MessagePayload::ControlCommand(command.clone()))
        .with_reply_to("client.test");
    requester
        .send(&service_endpoint("cnc-01"), &request)
        .await
        .expect("send command");

    let received = service_inbox.next().await.expect("command delivered");
    let reply_to = received.reply_to.clone().expect("reply address");
    let MessagePayload::ControlCommand(inbound) = received.payload else {
        panic!("expected a command");
    };
    let response = ControlCommandResponse::succeeded(
        &inbound,
        StateValue::from("Coolant enabled"),
        Duration::from_millis(3),
    );
    service
        .send(
            &reply_to,
            &Message::new(MessagePayload::ControlCommandResponse(response)),
        )
        .await
        .expect("send reply");

    let reply = reply_inbox.next().await.expect("reply delivered");
    match reply.payload {
        MessagePayload::ControlCommandResponse(response) => {
            assert_eq!(response.command_id, command.command_id);
            assert!(response.success);
        }
        other => panic!("unexpected payload {other:?}"),
    }
}
