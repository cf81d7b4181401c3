use iospush_apns::{
    ApnsError, Connect, DeliveryEngine, DeliveryErrorKind, DeliveryResult, SendOptions,
};
use iospush_common::{DeviceEndpoint, Environment};
use std::path::PathBuf;
use std::time::Duration;

use fixtures::{
    endpoints, hello_payload, loopback_listener, read_frame, token, LoopbackGateway, MockGateway,
    Script, Serve,
};
use iospush_apns::ErrorResponse;
use tokio::io::AsyncWriteExt;

fn engine(gateway: MockGateway, chunk_size: usize) -> DeliveryEngine<MockGateway> {
    DeliveryEngine::new(gateway)
        .with_response_timeout(Duration::from_millis(50))
        .with_chunk_size(chunk_size)
}

#[tokio::test(start_paused = true)]
async fn test_send_many_opens_one_connection_per_chunk() {
    let engine = engine(MockGateway::new(), 3);
    let devices = endpoints(7, Environment::Production);

    let reports = engine
        .send_many(&devices, &hello_payload(), &SendOptions::default())
        .await;

    assert_eq!(reports.len(), 7);
    assert!(reports.iter().all(|r| r.result.is_accepted()));
    for (report, device) in reports.iter().zip(&devices) {
        assert_eq!(report.token, device.token());
        assert_eq!(report.environment, Environment::Production);
    }

    let gateway = engine.connector();
    assert_eq!(gateway.opens(), 3);
    assert_eq!(gateway.closed_by_client().await, vec![true, true, true]);

    let received = gateway.received();
    let connections: Vec<_> = received.iter().map(|r| r.connection).collect();
    assert_eq!(connections, vec![0, 0, 0, 1, 1, 1, 2]);
    let tokens: Vec<_> = received.iter().map(|r| r.frame.token.to_string()).collect();
    let expected: Vec<_> = devices.iter().map(|d| d.token().to_owned()).collect();
    assert_eq!(tokens, expected);
}

#[tokio::test(start_paused = true)]
async fn test_frames_carry_identifier_expiry_and_payload() {
    let engine = engine(MockGateway::new(), 75);
    let devices = endpoints(2, Environment::Sandbox);
    let payload = hello_payload();
    let options = SendOptions::default()
        .with_identifier(42)
        .with_expiry(1_700_000_000);

    engine.send_many(&devices, &payload, &options).await;

    let received = engine.connector().received();
    assert_eq!(received.len(), 2);
    for r in &received {
        assert_eq!(r.frame.identifier, 42);
        assert_eq!(r.frame.expiry, 1_700_000_000);
        assert_eq!(&r.frame.payload[..], payload.as_bytes());
    }
}

#[tokio::test(start_paused = true)]
async fn test_rejected_device_gets_delivery_error() {
    let gateway = MockGateway::with_scripts([Script::Serve(Serve::default().reject(2, 8))]);
    let engine = engine(gateway, 75);
    let devices = endpoints(3, Environment::Production);
    let options = SendOptions::default().with_identifier(42);

    let reports = engine.send_many(&devices, &hello_payload(), &options).await;

    assert!(reports[0].result.is_accepted());
    assert_eq!(
        reports[1].result,
        DeliveryResult::Failed(ApnsError::Delivery {
            kind: DeliveryErrorKind::InvalidToken,
            identifier: 42,
        })
    );
    // The gateway hangs up after an error response
    assert!(reports[2].result.error().is_some_and(ApnsError::is_connection));
    assert_eq!(engine.connector().opens(), 1);
    assert_eq!(engine.connector().received().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_reject_and_hang_up_fails_rest_of_chunk() {
    let gateway = MockGateway::with_scripts([Script::Serve(
        Serve::default().reject_and_hang_up(1, 8),
    )]);
    let engine = engine(gateway, 3);
    let devices = endpoints(5, Environment::Production);

    let reports = engine
        .send_many(&devices, &hello_payload(), &SendOptions::default())
        .await;

    assert!(matches!(
        reports[0].result,
        DeliveryResult::Failed(ApnsError::Delivery {
            kind: DeliveryErrorKind::InvalidToken,
            ..
        })
    ));
    for report in &reports[1..3] {
        assert!(report.result.error().is_some_and(ApnsError::is_connection));
    }
    assert!(reports[3..].iter().all(|r| r.result.is_accepted()));
    assert_eq!(engine.connector().opens(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_unknown_status_is_preserved() {
    let gateway = MockGateway::with_scripts([Script::Serve(Serve::default().reject(1, 99))]);
    let engine = engine(gateway, 75);
    let device = DeviceEndpoint::new(token(1), Environment::Sandbox);

    let result = engine
        .send_one(&device, &hello_payload(), None, &SendOptions::default())
        .await;

    assert_eq!(
        result,
        DeliveryResult::Failed(ApnsError::Delivery {
            kind: DeliveryErrorKind::Unknown(99),
            identifier: 0,
        })
    );
}

#[tokio::test(start_paused = true)]
async fn test_connection_lost_fails_rest_of_chunk_only() {
    let gateway = MockGateway::with_scripts([Script::Serve(Serve::default().hang_up_after(2))]);
    let engine = engine(gateway, 3);
    let devices = endpoints(6, Environment::Sandbox);

    let reports = engine
        .send_many(&devices, &hello_payload(), &SendOptions::default())
        .await;

    assert_eq!(reports.len(), 6);
    assert!(reports[0].result.is_accepted());
    for report in &reports[1..3] {
        assert!(report.result.error().is_some_and(ApnsError::is_connection));
    }
    assert_eq!(reports[1].result, reports[2].result);
    assert!(reports[3..].iter().all(|r| r.result.is_accepted()));
    assert_eq!(engine.connector().opens(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_failed_open_fails_its_chunk_only() {
    let refused = ApnsError::Connection("connection refused".into());
    let gateway = MockGateway::with_scripts([
        Script::Serve(Serve::default()),
        Script::Refuse(refused.clone()),
        Script::Serve(Serve::default()),
    ]);
    let engine = engine(gateway, 2);
    let devices = endpoints(5, Environment::Production);

    let reports = engine
        .send_many(&devices, &hello_payload(), &SendOptions::default())
        .await;

    let results: Vec<_> = reports.into_iter().map(|r| r.result).collect();
    assert_eq!(
        results,
        vec![
            DeliveryResult::Accepted,
            DeliveryResult::Accepted,
            DeliveryResult::Failed(refused.clone()),
            DeliveryResult::Failed(refused),
            DeliveryResult::Accepted,
        ]
    );
    assert_eq!(engine.connector().opens(), 3);
    assert_eq!(engine.connector().received().len(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_certificate_error_fails_whole_chunk() {
    let missing = ApnsError::Certificate("no client certificate configured".into());
    let gateway = MockGateway::with_scripts([Script::Refuse(missing.clone())]);
    let engine = engine(gateway, 75);
    let devices = endpoints(3, Environment::Sandbox);

    let reports = engine
        .send_many(&devices, &hello_payload(), &SendOptions::default())
        .await;

    assert!(reports
        .iter()
        .all(|r| r.result == DeliveryResult::Failed(missing.clone())));
}

#[tokio::test(start_paused = true)]
async fn test_invalid_token_in_batch_does_not_break_chunk() {
    let engine = engine(MockGateway::new(), 75);
    let mut devices = endpoints(3, Environment::Sandbox);
    devices.insert(1, DeviceEndpoint::new("not-a-token", Environment::Sandbox));

    let reports = engine
        .send_many(&devices, &hello_payload(), &SendOptions::default())
        .await;

    assert!(matches!(
        reports[1].result,
        DeliveryResult::Failed(ApnsError::InvalidToken(_))
    ));
    assert!(reports[0].result.is_accepted());
    assert!(reports[2].result.is_accepted());
    assert!(reports[3].result.is_accepted());
    assert_eq!(engine.connector().received().len(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_send_many_uses_first_environment_and_certificate() {
    let engine = engine(MockGateway::new(), 75);
    let devices = vec![
        DeviceEndpoint::new(token(1), Environment::Sandbox),
        DeviceEndpoint::new(token(2), Environment::Production),
    ];
    let options = SendOptions::default().with_certificate("/etc/apns/dev.pem");

    engine.send_many(&devices, &hello_payload(), &options).await;

    let opened = engine.connector().opened();
    assert_eq!(opened.len(), 1);
    assert_eq!(opened[0].environment, Environment::Sandbox);
    assert_eq!(
        opened[0].certificate_path,
        Some(PathBuf::from("/etc/apns/dev.pem"))
    );
}

#[tokio::test(start_paused = true)]
async fn test_send_many_without_endpoints() {
    let engine = engine(MockGateway::new(), 75);

    let reports = engine
        .send_many(&[], &hello_payload(), &SendOptions::default())
        .await;

    assert!(reports.is_empty());
    assert_eq!(engine.connector().opens(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_chunk_size_zero_sends_one_per_connection() {
    let engine = engine(MockGateway::new(), 0);
    let devices = endpoints(2, Environment::Sandbox);

    engine
        .send_many(&devices, &hello_payload(), &SendOptions::default())
        .await;

    assert_eq!(engine.connector().opens(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_send_one_opens_and_closes_its_own_connection() {
    let engine = engine(MockGateway::new(), 75);
    let device = DeviceEndpoint::new(token(9), Environment::Production);

    let result = engine
        .send_one(&device, &hello_payload(), None, &SendOptions::default())
        .await;

    assert_eq!(result, DeliveryResult::Accepted);
    let gateway = engine.connector();
    assert_eq!(gateway.opens(), 1);
    assert_eq!(gateway.opened()[0].environment, Environment::Production);
    assert_eq!(gateway.closed_by_client().await, vec![true]);
}

#[tokio::test(start_paused = true)]
async fn test_send_one_leaves_caller_connection_open() {
    let engine = engine(MockGateway::new(), 75);
    let mut connection = engine
        .connector()
        .connect(Environment::Sandbox, None)
        .await
        .expect("mock connection");
    let payload = hello_payload();

    for n in 1..=2 {
        let device = DeviceEndpoint::new(token(n), Environment::Sandbox);
        let result = engine
            .send_one(&device, &payload, Some(&mut connection), &SendOptions::default())
            .await;
        assert!(result.is_accepted());
    }

    assert!(!connection.is_closed());
    assert_eq!(engine.connector().opens(), 1);
    assert_eq!(engine.connector().received().len(), 2);

    connection.close().await;
    assert_eq!(engine.connector().closed_by_client().await, vec![true]);
}

#[tokio::test(start_paused = true)]
async fn test_send_one_invalid_token_does_no_io() {
    let engine = engine(MockGateway::new(), 75);
    let device = DeviceEndpoint::new("abc", Environment::Sandbox);

    let result = engine
        .send_one(&device, &hello_payload(), None, &SendOptions::default())
        .await;

    assert!(matches!(
        result,
        DeliveryResult::Failed(ApnsError::InvalidToken(_))
    ));
    assert_eq!(engine.connector().opens(), 0);
}

#[tokio::test]
async fn test_loopback_rejection_fails_rest_of_chunk() {
    let listener = loopback_listener().await;
    let addr = listener.local_addr().expect("local addr");
    let server = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.expect("accept");
        let frame = read_frame(&mut stream).await;
        stream
            .write_all(&ErrorResponse::new(8, frame.identifier).to_bytes())
            .await
            .expect("write response");
        stream.shutdown().await.expect("shutdown");
    });

    let engine = DeliveryEngine::new(LoopbackGateway::new(addr))
        .with_response_timeout(Duration::from_secs(2));
    let devices = endpoints(3, Environment::Production);
    let options = SendOptions::default().with_identifier(7);

    let reports = engine.send_many(&devices, &hello_payload(), &options).await;
    server.await.expect("server task");

    assert_eq!(
        reports[0].result,
        DeliveryResult::Failed(ApnsError::Delivery {
            kind: DeliveryErrorKind::InvalidToken,
            identifier: 7,
        })
    );
    for report in &reports[1..] {
        assert!(
            report.result.error().is_some_and(ApnsError::is_connection),
            "expected a connection error, got {:?}",
            report.result
        );
    }
    assert_eq!(engine.connector().opens(), 1);
}

#[tokio::test]
async fn test_loopback_hang_up_is_not_accepted() {
    let listener = loopback_listener().await;
    let addr = listener.local_addr().expect("local addr");
    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.expect("accept");
        drop(stream);
    });

    let engine = DeliveryEngine::new(LoopbackGateway::new(addr))
        .with_response_timeout(Duration::from_secs(2));
    let device = DeviceEndpoint::new(token(1), Environment::Sandbox);

    let result = engine
        .send_one(&device, &hello_payload(), None, &SendOptions::default())
        .await;
    server.await.expect("server task");

    assert!(result.error().is_some_and(ApnsError::is_connection));
}
