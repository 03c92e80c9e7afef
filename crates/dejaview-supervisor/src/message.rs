//! Messages posted by the rendered application to its host.

#![allow(missing_docs)]

use serde::Deserialize;
use smol_str::SmolStr;

use crate::error::SupervisorError;

/// Command sent from a surface to the host environment.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "command", rename_all = "lowercase")]
pub enum ClientMessage {
    /// Navigate the editor to a source symbol.
    Open { symbol: SmolStr },
    /// Any command this host does not understand.
    #[serde(other)]
    Unknown,
}

pub fn parse_client_message(text: &str) -> Result<ClientMessage, SupervisorError> {
    serde_json::from_str(text).map_err(|err| SupervisorError::InvalidMessage(err.to_string().into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_command_carries_symbol() {
        let message = parse_client_message(r#"{"command":"open","symbol":"do_sys_open"}"#).unwrap();
        assert_eq!(
            message,
            ClientMessage::Open {
                symbol: "do_sys_open".into()
            }
        );
    }

    #[test]
    fn unknown_command_is_tolerated() {
        let message = parse_client_message(r#"{"command":"zoom"}"#).unwrap();
        assert_eq!(message, ClientMessage::Unknown);
    }

    #[test]
    fn malformed_message_is_rejected() {
        let err = parse_client_message("{\"symbol\":").unwrap_err();
        assert!(matches!(err, SupervisorError::InvalidMessage(_)));
    }
}
