// This code is sourced primarily from the tungstenite-rs library, which can be found at:
// https://github.com/snapview/tungstenite-rs/blob/42b8797e8b7f39efb7d9322dc8af3e9089db4f7d/src/protocol/frame/coding.rs#L117
//
// Original contributions by:
// Copyright (c) 2017 Alexey Galakhov
// Copyright (c) 2016 Jason Housley
// Licensed under both MIT and Apache 2.0 licenses
//
// Modifications made by:
// Copyright 2023 Divy Srivastava <dj.srivastava23@gmail.com>
//
// Licensed under the Apache License, Version 2.0 (the "License");
// You may obtain a copy of the License at:
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is provided "AS IS", WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND,
// either express or implied. See the License for specific language governing permissions and limitations.
//
//! Close status codes, as registered in [RFC 6455 Section 7.4](https://datatracker.ietf.org/doc/html/rfc6455#section-7.4).

use self::CloseCode::*;

/// Status code carried in the first two bytes of a close frame.
#[derive(Debug, Eq, PartialEq, Clone, Copy)]
pub enum CloseCode {
    /// 1000: the purpose of the connection has been fulfilled.
    Normal,
    /// 1001: the endpoint is going away. Sent by this client on every graceful close.
    Away,
    /// 1002: protocol error.
    Protocol,
    /// 1003: received a type of data the endpoint cannot accept.
    Unsupported,
    /// 1005: no status code was present. Never sent on the wire.
    Status,
    /// 1006: the connection dropped without a close frame. Never sent on the wire.
    Abnormal,
    /// 1007: payload data inconsistent with the message type, such as invalid UTF-8.
    Invalid,
    /// 1008: policy violation.
    Policy,
    /// 1009: message too big to process.
    Size,
    /// 1010: the client expected an extension the server did not negotiate.
    Extension,
    /// 1011: unexpected condition on the server.
    Error,
    /// 1012: the server is restarting.
    Restart,
    /// 1013: try again later.
    Again,
    /// 1015: TLS handshake failure. Never sent on the wire.
    Tls,
    /// 1004, 1014 and 1016-2999, reserved for future revisions of the protocol.
    Reserved(u16),
    /// 3000-3999, registered with IANA by libraries and frameworks.
    Iana(u16),
    /// 4000-4999, private use by applications.
    Library(u16),
    /// Anything outside the ranges above.
    Bad(u16),
}

impl CloseCode {
    /// Whether this code may appear in a close frame received from the peer.
    pub fn is_allowed(self) -> bool {
        !matches!(self, Bad(_) | Reserved(_) | Status | Abnormal | Tls)
    }
}

impl From<u16> for CloseCode {
    fn from(code: u16) -> CloseCode {
        match code {
            1000 => Normal,
            1001 => Away,
            1002 => Protocol,
            1003 => Unsupported,
            1005 => Status,
            1006 => Abnormal,
            1007 => Invalid,
            1008 => Policy,
            1009 => Size,
            1010 => Extension,
            1011 => Error,
            1012 => Restart,
            1013 => Again,
            1015 => Tls,
            1004 | 1014 | 1016..=2999 => Reserved(code),
            3000..=3999 => Iana(code),
            4000..=4999 => Library(code),
            _ => Bad(code),
        }
    }
}

impl From<CloseCode> for u16 {
    fn from(code: CloseCode) -> u16 {
        match code {
            Normal => 1000,
            Away => 1001,
            Protocol => 1002,
            Unsupported => 1003,
            Status => 1005,
            Abnormal => 1006,
            Invalid => 1007,
            Policy => 1008,
            Size => 1009,
            Extension => 1010,
            Error => 1011,
            Restart => 1012,
            Again => 1013,
            Tls => 1015,
            Reserved(code) | Iana(code) | Library(code) | Bad(code) => code,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_codes() {
        assert_eq!(CloseCode::from(1001), Away);
        assert_eq!(u16::from(Away), 1001);
        assert_eq!(CloseCode::from(1004), Reserved(1004));
        assert_eq!(CloseCode::from(1014), Reserved(1014));
        assert_eq!(CloseCode::from(2999), Reserved(2999));
        assert_eq!(u16::from(Reserved(1014)), 1014);
        assert_eq!(CloseCode::from(3500), Iana(3500));
        assert_eq!(CloseCode::from(4001), Library(4001));
        assert_eq!(CloseCode::from(999), Bad(999));
        assert_eq!(CloseCode::from(5000), Bad(5000));
    }

    #[test]
    fn test_allowed_codes() {
        assert!(Normal.is_allowed());
        assert!(Away.is_allowed());
        assert!(Library(4000).is_allowed());
        assert!(!Status.is_allowed());
        assert!(!Abnormal.is_allowed());
        assert!(!Tls.is_allowed());
        assert!(!CloseCode::from(1004).is_allowed());
        assert!(!CloseCode::from(1014).is_allowed());
        assert!(!CloseCode::from(0).is_allowed());
    }
}
