//! Integration tests for the protocol module
//!
//! These tests check that request and response bodies survive a trip through
//! their encoders and decoders bit-for-bit, and that malformed bodies are
//! rejected instead of partially decoded.

#[cfg(test)]
mod tests {
    use super::super::*;
    use bytes::Bytes;

    fn request_round_trip(request: Request) {
        let body = request.encode_body().unwrap();
        let decoded = Request::decode_body(request.opcode(), &body).unwrap();
        assert_eq!(decoded, request);
        assert_eq!(decoded.encode_body().unwrap(), body);
    }

    #[test]
    fn test_query_round_trip_preserves_text_and_values() {
        let query = QueryRequest::new("SELECT * FROM ks.users WHERE id = ? AND name = ?")
            .with_consistency(Consistency::Quorum)
            .with_values(&[
                BoundValue::from(42i64),
                BoundValue::from("zoë"),
                BoundValue::Null,
                BoundValue::Unset,
            ])
            .unwrap()
            .with_page_size(Some(5000))
            .with_paging_state(Some(Bytes::from_static(&[0xDE, 0xAD])))
            .with_serial_consistency(Some(Consistency::LocalSerial));
        request_round_trip(Request::Query(query.clone()));

        let body = Request::Query(query).encode_body().unwrap();
        match Request::decode_body(Opcode::Query, &body).unwrap() {
            Request::Query(decoded) => {
                assert_eq!(
                    decoded.query,
                    "SELECT * FROM ks.users WHERE id = ? AND name = ?"
                );
                assert_eq!(
                    decoded.params.values[0],
                    RawValue::Bytes(Bytes::from(42i64.to_be_bytes().to_vec()))
                );
                assert_eq!(
                    decoded.params.values[1],
                    RawValue::Bytes(Bytes::from("zoë".as_bytes().to_vec()))
                );
                assert_eq!(decoded.params.values[2], RawValue::Null);
                assert_eq!(decoded.params.values[3], RawValue::Unset);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_query_without_parameters() {
        request_round_trip(Request::Query(QueryRequest::new("SELECT 1")));
    }

    #[test]
    fn test_startup_and_auth_round_trip() {
        request_round_trip(Request::startup());
        request_round_trip(Request::AuthResponse(Some(Bytes::from_static(
            b"\0cassandra\0cassandra",
        ))));
        request_round_trip(Request::AuthResponse(None));
        request_round_trip(Request::Options);
    }

    #[test]
    fn test_startup_carries_cql_version() {
        match Request::startup() {
            Request::Startup(options) => {
                assert_eq!(options.get("CQL_VERSION").map(String::as_str), Some("3.0.0"));
                assert!(options.contains_key("DRIVER_NAME"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_truncated_query_rejected() {
        let body = Request::Query(
            QueryRequest::new("SELECT 1")
                .with_values(&[BoundValue::from(1)])
                .unwrap(),
        )
        .encode_body()
        .unwrap();
        for cut in [0, 3, 10, body.len() - 1] {
            assert!(
                matches!(
                    Request::decode_body(Opcode::Query, &body[..cut]),
                    Err(CqlError::Protocol(_))
                ),
                "cut at {} should fail",
                cut
            );
        }
    }

    #[test]
    fn test_response_round_trips() {
        let responses = vec![
            Response::Ready,
            Response::Authenticate("org.apache.cassandra.auth.PasswordAuthenticator".into()),
            Response::AuthSuccess(None),
            Response::AuthChallenge(Some(Bytes::from_static(b"nonce"))),
            Response::Void,
            Response::SetKeyspace("ks".into()),
            Response::error(DbErrorCode::SyntaxError, "line 1:0 no viable alternative"),
        ];
        for response in responses {
            let body = response.encode_body().unwrap();
            assert_eq!(
                Response::decode_body(response.opcode(), &body).unwrap(),
                response
            );
        }
    }

    #[test]
    fn test_frame_carries_request() {
        let request = Request::Query(QueryRequest::new("SELECT now() FROM system.local"));
        let frame = Frame::request(12, request.opcode(), request.encode_body().unwrap());
        let wire = frame.to_bytes().unwrap();
        let parsed = Frame::from_slice(&wire).unwrap();
        assert_eq!(parsed.stream, 12);
        assert_eq!(
            Request::decode_body(parsed.opcode, &parsed.body).unwrap(),
            request
        );
    }

    #[test]
    fn test_server_error_becomes_query_error() {
        let err: CqlError = ServerError::new(DbErrorCode::Unauthorized, "no access").into();
        match err {
            CqlError::Query { code, message } => {
                assert_eq!(code, DbErrorCode::Unauthorized);
                assert_eq!(message, "no access");
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
