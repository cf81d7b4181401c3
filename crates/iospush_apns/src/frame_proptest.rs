#[cfg(test)]
mod tests {
    use crate::error::ApnsError;
    use crate::frame::{encode, DeviceToken, NotificationFrame};
    use crate::payload::{PayloadBuilder, MAX_PAYLOAD_SIZE};
    use proptest::prelude::*;

    // Helper strategy producing 64 lowercase hex characters
    fn hex_token() -> impl Strategy<Value = String> {
        prop::array::uniform32(any::<u8>()).prop_map(hex::encode)
    }

    proptest! {
        // Any payload that builds also survives framing byte for byte
        #[test]
        fn test_built_payload_round_trips_through_frame(
            token in hex_token(),
            alert in "[a-zA-Z0-9 äöü✓]{0,60}",
            badge in proptest::option::of(0u32..1000),
            identifier in any::<u32>(),
            expiry in any::<u32>(),
        ) {
            let mut builder = PayloadBuilder::new(alert);
            if let Some(badge) = badge {
                builder = builder.badge(badge);
            }
            let payload = builder.build().expect("short alerts always fit");
            prop_assert!(payload.len() <= MAX_PAYLOAD_SIZE);

            let bytes = encode(&token, payload.as_bytes(), identifier, expiry).expect("valid frame");
            let frame = NotificationFrame::decode(&bytes).expect("decodable frame");

            prop_assert_eq!(frame.token.to_string(), token);
            prop_assert_eq!(frame.identifier, identifier);
            prop_assert_eq!(frame.expiry, expiry);
            prop_assert_eq!(&frame.payload[..], payload.as_bytes());
        }

        // Oversized payloads never build
        #[test]
        fn test_oversized_payload_is_rejected(extra in 1usize..200) {
            let alert = "x".repeat(MAX_PAYLOAD_SIZE - 20 + extra);
            let err = PayloadBuilder::new(alert).build().unwrap_err();
            let is_too_large = matches!(err, ApnsError::PayloadTooLarge { .. });
            prop_assert!(is_too_large);
        }

        // Every 64-character hex string maps to exactly its 32 bytes
        #[test]
        fn test_hex_token_recovers_raw_bytes(raw in prop::array::uniform32(any::<u8>())) {
            let token: DeviceToken = hex::encode(raw).parse().expect("valid hex");
            prop_assert_eq!(token.as_bytes(), &raw);
        }

        // Wrong lengths are rejected
        #[test]
        fn test_wrong_length_token_is_rejected(token in "[0-9a-f]{0,128}") {
            prop_assume!(token.len() != 64);
            let result = token.parse::<DeviceToken>();
            let is_invalid = matches!(result, Err(ApnsError::InvalidToken(_)));
            prop_assert!(is_invalid);
        }

        // Non-hex characters are rejected even at the right length
        #[test]
        fn test_non_hex_token_is_rejected(prefix in "[0-9a-f]{0,63}", bad in "[g-zG-Z]") {
            let mut token = prefix;
            token.push_str(&bad);
            while token.len() < 64 {
                token.push('0');
            }
            let result = encode(&token, b"{}", 0, 0);
            let is_invalid = matches!(result, Err(ApnsError::InvalidToken(_)));
            prop_assert!(is_invalid);
        }
    }
}
