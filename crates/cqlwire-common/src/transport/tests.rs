//! Integration tests for the transport layer
//!
//! These tests run a [`FrameServer`] on loopback and talk to it through a
//! [`Transport`], with and without TLS.

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::time::Duration;

    use bytes::Bytes;
    use tempfile::TempDir;

    use crate::protocol::{
        ColumnSpec, ColumnType, CqlError, CqlValue, Frame, Opcode, QueryRequest, Request,
        Response, Row, Rows,
    };
    use crate::transport::{
        server_acceptor, FrameCodec, FrameServer, Reply, RequestContext, TlsConfig, Transport,
    };

    const TIMEOUT: Duration = Duration::from_secs(2);

    async fn echo_handler(_ctx: RequestContext, request: Request) -> Reply {
        match request {
            Request::Options => Response::Supported(Default::default()).into(),
            Request::Query(query) => {
                if query.query.contains("slow") {
                    tokio::time::sleep(Duration::from_millis(200)).await;
                }
                let rows = Rows::new(
                    vec![ColumnSpec::new("ks", "t", "query", ColumnType::Text)],
                    vec![Row::new(vec![Some(CqlValue::Text(query.query))])],
                )
                .unwrap();
                Response::Rows(rows).into()
            }
            Request::Startup(_) => Reply::RespondWithWarnings(
                Response::Ready,
                vec!["startup is deprecated".to_string()],
            ),
            Request::AuthResponse(_) => Reply::Close,
        }
    }

    async fn spawn_server(server: FrameServer) -> String {
        let addr = server.local_addr().unwrap().to_string();
        tokio::spawn(async move { server.run_with_handler(echo_handler).await });
        addr
    }

    fn query_frame(stream: i16, text: &str) -> Frame {
        FrameCodec::encode_request(stream, &Request::Query(QueryRequest::new(text))).unwrap()
    }

    fn answered_text(frame: &Frame) -> String {
        match FrameCodec::decode_response(frame).unwrap().response {
            Response::Rows(rows) => match &rows.rows[0].cells[0] {
                Some(CqlValue::Text(text)) => text.clone(),
                other => panic!("unexpected cell {:?}", other),
            },
            other => panic!("unexpected response {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_plain_request_response() {
        let addr = spawn_server(FrameServer::new("127.0.0.1:0").await.unwrap()).await;
        let transport = Transport::connect(&addr, None, TIMEOUT).await.unwrap();
        assert!(!transport.is_tls());

        transport.send(&query_frame(1, "SELECT 1")).await.unwrap();
        let frame = transport.receive().await.unwrap();
        assert_eq!(frame.stream, 1);
        assert_eq!(answered_text(&frame), "SELECT 1");
    }

    #[tokio::test]
    async fn test_responses_matched_by_stream_not_order() {
        let addr = spawn_server(FrameServer::new("127.0.0.1:0").await.unwrap()).await;
        let transport = Transport::connect(&addr, None, TIMEOUT).await.unwrap();

        transport.send(&query_frame(1, "slow query")).await.unwrap();
        transport.send(&query_frame(2, "fast query")).await.unwrap();

        let first = transport.receive().await.unwrap();
        let second = transport.receive().await.unwrap();
        assert_eq!(first.stream, 2);
        assert_eq!(answered_text(&first), "fast query");
        assert_eq!(second.stream, 1);
        assert_eq!(answered_text(&second), "slow query");
    }

    #[tokio::test]
    async fn test_warnings_are_decoded() {
        let addr = spawn_server(FrameServer::new("127.0.0.1:0").await.unwrap()).await;
        let transport = Transport::connect(&addr, None, TIMEOUT).await.unwrap();
        transport
            .send(&FrameCodec::encode_request(0, &Request::startup()).unwrap())
            .await
            .unwrap();
        let decoded = FrameCodec::decode_response(&transport.receive().await.unwrap()).unwrap();
        assert_eq!(decoded.response, Response::Ready);
        assert_eq!(decoded.warnings, vec!["startup is deprecated".to_string()]);
    }

    #[tokio::test]
    async fn test_bad_body_gets_protocol_error() {
        let addr = spawn_server(FrameServer::new("127.0.0.1:0").await.unwrap()).await;
        let transport = Transport::connect(&addr, None, TIMEOUT).await.unwrap();
        let frame = Frame::request(5, Opcode::Query, Bytes::from_static(&[0, 0, 0, 9]));
        transport.send(&frame).await.unwrap();
        let decoded = FrameCodec::decode_response(&transport.receive().await.unwrap()).unwrap();
        assert_eq!(decoded.stream, 5);
        assert!(matches!(decoded.response, Response::Error(_)));
    }

    #[tokio::test]
    async fn test_server_close_surfaces_connection_closed() {
        let addr = spawn_server(FrameServer::new("127.0.0.1:0").await.unwrap()).await;
        let transport = Transport::connect(&addr, None, TIMEOUT).await.unwrap();
        transport
            .send(&FrameCodec::encode_request(3, &Request::AuthResponse(None)).unwrap())
            .await
            .unwrap();
        assert!(matches!(
            transport.receive().await,
            Err(CqlError::ConnectionClosed(_))
        ));
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let addr = spawn_server(FrameServer::new("127.0.0.1:0").await.unwrap()).await;
        let transport = Transport::connect(&addr, None, TIMEOUT).await.unwrap();
        transport.close().await;
        transport.close().await;
        assert!(transport.is_closed());
        assert!(matches!(
            transport.send(&query_frame(1, "SELECT 1")).await,
            Err(CqlError::ConnectionClosed(_))
        ));
    }

    struct Pki {
        _dir: TempDir,
        cert: PathBuf,
        key: PathBuf,
        other_ca: PathBuf,
    }

    fn pki() -> Pki {
        let dir = tempfile::tempdir().unwrap();
        let node = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
        let other = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
        let cert = dir.path().join("node.pem");
        let key = dir.path().join("node.key");
        let other_ca = dir.path().join("other.pem");
        std::fs::write(&cert, node.cert.pem()).unwrap();
        std::fs::write(&key, node.key_pair.serialize_pem()).unwrap();
        std::fs::write(&other_ca, other.cert.pem()).unwrap();
        Pki {
            _dir: dir,
            cert,
            key,
            other_ca,
        }
    }

    async fn tls_server(pki: &Pki) -> String {
        let acceptor = server_acceptor(&pki.cert, &pki.key).unwrap();
        let server = FrameServer::new("127.0.0.1:0").await.unwrap().with_tls(acceptor);
        spawn_server(server).await
    }

    #[tokio::test]
    async fn test_tls_peer_verification_succeeds() {
        let pki = pki();
        let addr = tls_server(&pki).await;
        let context = TlsConfig::peer(&pki.cert)
            .with_server_name("localhost")
            .build_context()
            .unwrap();
        let transport = Transport::connect(&addr, context.as_ref(), TIMEOUT)
            .await
            .unwrap();
        assert!(transport.is_tls());

        transport.send(&query_frame(9, "SELECT tls")).await.unwrap();
        assert_eq!(answered_text(&transport.receive().await.unwrap()), "SELECT tls");
    }

    #[tokio::test]
    async fn test_tls_wrong_ca_fails_handshake() {
        let pki = pki();
        let addr = tls_server(&pki).await;
        let context = TlsConfig::peer(&pki.other_ca)
            .with_server_name("localhost")
            .build_context()
            .unwrap();
        let result = Transport::connect(&addr, context.as_ref(), TIMEOUT).await;
        assert!(matches!(result, Err(CqlError::TlsHandshake(_))));
    }

    #[tokio::test]
    async fn test_tls_name_mismatch_fails_handshake() {
        let pki = pki();
        let addr = tls_server(&pki).await;
        let context = TlsConfig::peer(&pki.cert)
            .with_server_name("db.example.com")
            .build_context()
            .unwrap();
        let result = Transport::connect(&addr, context.as_ref(), TIMEOUT).await;
        assert!(matches!(result, Err(CqlError::TlsHandshake(_))));
    }

    #[tokio::test]
    async fn test_tls_verify_none_accepts_any_certificate() {
        let pki = pki();
        let addr = tls_server(&pki).await;
        let context = TlsConfig::insecure().build_context().unwrap();
        let transport = Transport::connect(&addr, context.as_ref(), TIMEOUT)
            .await
            .unwrap();
        transport.send(&query_frame(1, "SELECT 1")).await.unwrap();
        assert_eq!(answered_text(&transport.receive().await.unwrap()), "SELECT 1");
    }
}
