//! TLS alert codes (RFC 8446 Section 6).

/// Alert severity level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AlertLevel {
    Warning = 1,
    Fatal = 2,
}

impl AlertLevel {
    pub fn from_u8(v: u8) -> Result<Self, u8> {
        match v {
            1 => Ok(AlertLevel::Warning),
            2 => Ok(AlertLevel::Fatal),
            _ => Err(v),
        }
    }
}

/// Alert description codes, plus two non-wire sentinels returned by
/// `Connection::handshake`: `NoAlert` (success) and `WouldBlock`
/// (non-blocking mode, retry when more data is available).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Alert {
    CloseNotify = 0,
    UnexpectedMessage = 10,
    BadRecordMac = 20,
    RecordOverflow = 22,
    HandshakeFailure = 40,
    BadCertificate = 42,
    CertificateExpired = 45,
    IllegalParameter = 47,
    DecodeError = 50,
    DecryptError = 51,
    ProtocolVersion = 70,
    InsufficientSecurity = 71,
    InternalError = 80,
    UserCanceled = 90,
    MissingExtension = 109,
    UnsupportedExtension = 110,
    UnrecognizedName = 112,
    UnknownPskIdentity = 115,
    NoApplicationProtocol = 120,
    /// Non-wire sentinel: the operation would block.
    WouldBlock = 254,
    /// Non-wire sentinel: no alert.
    NoAlert = 255,
}

impl Alert {
    pub fn from_u8(v: u8) -> Result<Self, u8> {
        match v {
            0 => Ok(Alert::CloseNotify),
            10 => Ok(Alert::UnexpectedMessage),
            20 => Ok(Alert::BadRecordMac),
            22 => Ok(Alert::RecordOverflow),
            40 => Ok(Alert::HandshakeFailure),
            42 => Ok(Alert::BadCertificate),
            45 => Ok(Alert::CertificateExpired),
            47 => Ok(Alert::IllegalParameter),
            50 => Ok(Alert::DecodeError),
            51 => Ok(Alert::DecryptError),
            70 => Ok(Alert::ProtocolVersion),
            71 => Ok(Alert::InsufficientSecurity),
            80 => Ok(Alert::InternalError),
            90 => Ok(Alert::UserCanceled),
            109 => Ok(Alert::MissingExtension),
            110 => Ok(Alert::UnsupportedExtension),
            112 => Ok(Alert::UnrecognizedName),
            115 => Ok(Alert::UnknownPskIdentity),
            120 => Ok(Alert::NoApplicationProtocol),
            _ => Err(v),
        }
    }

    /// Whether this value may appear on the wire.
    pub fn is_wire(&self) -> bool {
        !matches!(self, Alert::NoAlert | Alert::WouldBlock)
    }

    /// Alert level used when sending this alert.
    pub fn level(&self) -> AlertLevel {
        match self {
            Alert::CloseNotify | Alert::UserCanceled => AlertLevel::Warning,
            _ => AlertLevel::Fatal,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Alert::CloseNotify => "close_notify",
            Alert::UnexpectedMessage => "unexpected_message",
            Alert::BadRecordMac => "bad_record_mac",
            Alert::RecordOverflow => "record_overflow",
            Alert::HandshakeFailure => "handshake_failure",
            Alert::BadCertificate => "bad_certificate",
            Alert::CertificateExpired => "certificate_expired",
            Alert::IllegalParameter => "illegal_parameter",
            Alert::DecodeError => "decode_error",
            Alert::DecryptError => "decrypt_error",
            Alert::ProtocolVersion => "protocol_version",
            Alert::InsufficientSecurity => "insufficient_security",
            Alert::InternalError => "internal_error",
            Alert::UserCanceled => "user_canceled",
            Alert::MissingExtension => "missing_extension",
            Alert::UnsupportedExtension => "unsupported_extension",
            Alert::UnrecognizedName => "unrecognized_name",
            Alert::UnknownPskIdentity => "unknown_psk_identity",
            Alert::NoApplicationProtocol => "no_application_protocol",
            Alert::WouldBlock => "would_block",
            Alert::NoAlert => "no_alert",
        }
    }
}

impl std::fmt::Display for Alert {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_values() {
        assert_eq!(Alert::CloseNotify as u8, 0);
        assert_eq!(Alert::UnexpectedMessage as u8, 10);
        assert_eq!(Alert::BadRecordMac as u8, 20);
        assert_eq!(Alert::HandshakeFailure as u8, 40);
        assert_eq!(Alert::IllegalParameter as u8, 47);
        assert_eq!(Alert::DecodeError as u8, 50);
        assert_eq!(Alert::ProtocolVersion as u8, 70);
        assert_eq!(Alert::InternalError as u8, 80);
    }

    #[test]
    fn test_from_u8_roundtrip() {
        let codes: &[u8] = &[
            0, 10, 20, 22, 40, 42, 45, 47, 50, 51, 70, 71, 80, 90, 109, 110, 112, 115, 120,
        ];
        for &code in codes {
            let a = Alert::from_u8(code).unwrap();
            assert_eq!(a as u8, code);
            assert!(a.is_wire());
        }
        assert!(Alert::from_u8(1).is_err());
        assert!(Alert::from_u8(254).is_err());
        assert!(Alert::from_u8(255).is_err());
    }

    #[test]
    fn test_sentinels_are_not_wire() {
        assert!(!Alert::NoAlert.is_wire());
        assert!(!Alert::WouldBlock.is_wire());
    }

    #[test]
    fn test_levels() {
        assert_eq!(Alert::CloseNotify.level(), AlertLevel::Warning);
        assert_eq!(Alert::UserCanceled.level(), AlertLevel::Warning);
        assert_eq!(Alert::HandshakeFailure.level(), AlertLevel::Fatal);
        assert_eq!(Alert::DecodeError.level(), AlertLevel::Fatal);
    }
}
