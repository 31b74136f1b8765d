//! gRPC Reflection Integration Tests
//!
//! Checks that the reflection service advertises the currency schema compiled
//! from `proto/currency/v1/currency.proto`.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;
use tokio_stream::wrappers::TcpListenerStream;
use tokio_util::sync::CancellationToken;
use tonic::Request;
use tonic::transport::{Channel, Server};
use tonic_reflection::pb::v1::{
    ServerReflectionRequest, server_reflection_client::ServerReflectionClient,
    server_reflection_request::MessageRequest, server_reflection_response::MessageResponse,
};

use currency_service::{
    CurrencyServer, RateLookup, SessionRegistry, SessionSettings, SimulatedRateSource,
    proto::currency_service_server::CurrencyServiceServer, reflection_service,
};

const WAIT: Duration = Duration::from_secs(2);

async fn setup_test_server() -> (ServerReflectionClient<Channel>, CancellationToken) {
    let cancel = CancellationToken::new();
    let rates = Arc::new(SimulatedRateSource::default());
    let registry = Arc::new(SessionRegistry::new(
        SessionSettings::default(),
        cancel.clone(),
    ));
    let server = CurrencyServer::new(RateLookup::new(rates as _), registry);
    let reflection = reflection_service().unwrap();

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server_cancel = cancel.clone();
    tokio::spawn(async move {
        Server::builder()
            .add_service(CurrencyServiceServer::new(server))
            .add_service(reflection)
            .serve_with_incoming_shutdown(
                TcpListenerStream::new(listener),
                server_cancel.cancelled_owned(),
            )
            .await
            .unwrap();
    });

    tokio::time::sleep(Duration::from_millis(50)).await;

    let channel = Channel::from_shared(format!("http://{addr}"))
        .unwrap()
        .connect()
        .await
        .unwrap();

    (ServerReflectionClient::new(channel), cancel)
}

async fn reflect(
    client: &mut ServerReflectionClient<Channel>,
    message_request: MessageRequest,
) -> MessageResponse {
    let request = ServerReflectionRequest {
        host: String::new(),
        message_request: Some(message_request),
    };

    let mut responses = client
        .server_reflection_info(Request::new(tokio_stream::iter([request])))
        .await
        .unwrap()
        .into_inner();

    timeout(WAIT, responses.message())
        .await
        .expect("timeout waiting for reflection response")
        .expect("stream error")
        .expect("stream ended")
        .message_response
        .expect("empty reflection response")
}

#[tokio::test]
async fn test_list_services_includes_currency_service() {
    let (mut client, cancel) = setup_test_server().await;

    let response = reflect(&mut client, MessageRequest::ListServices(String::new())).await;

    let MessageResponse::ListServicesResponse(list) = response else {
        panic!("expected list services response, got {response:?}");
    };
    let names: Vec<&str> = list.service.iter().map(|s| s.name.as_str()).collect();
    assert!(
        names.contains(&"currency.v1.CurrencyService"),
        "services: {names:?}"
    );

    cancel.cancel();
}

#[tokio::test]
async fn test_file_containing_symbol_returns_currency_schema() {
    let (mut client, cancel) = setup_test_server().await;

    let response = reflect(
        &mut client,
        MessageRequest::FileContainingSymbol("currency.v1.RateRequest".to_string()),
    )
    .await;

    let MessageResponse::FileDescriptorResponse(files) = response else {
        panic!("expected file descriptor response, got {response:?}");
    };
    assert!(!files.file_descriptor_proto.is_empty());
    let schema = &files.file_descriptor_proto[0];
    assert!(
        schema
            .windows(b"currency/v1/currency.proto".len())
            .any(|w| w == b"currency/v1/currency.proto")
    );

    cancel.cancel();
}
