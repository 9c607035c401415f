use std::fmt;

use tokio_tungstenite::tungstenite::http::Uri;

/// Text message a viewer sends once, right after the socket opens.
/// The relay uses it to tell viewers apart from camera sources.
pub const VIEWER_IDENT: &str = "viewer-client";

/// Close code for an intentional, local disconnect
pub const CLOSE_NORMAL: u16 = 1000;

/// Close code carried by a `Closed` event.
///
/// Only `Normal` suppresses automatic reconnection on the viewer side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseCode {
    Normal,
    Abnormal(u16),
}

impl CloseCode {
    pub fn is_normal(self) -> bool {
        matches!(self, CloseCode::Normal)
    }

    pub fn as_u16(self) -> u16 {
        match self {
            CloseCode::Normal => CLOSE_NORMAL,
            CloseCode::Abnormal(code) => code,
        }
    }
}

impl From<u16> for CloseCode {
    fn from(code: u16) -> Self {
        if code == CLOSE_NORMAL {
            CloseCode::Normal
        } else {
            CloseCode::Abnormal(code)
        }
    }
}

impl fmt::Display for CloseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self.as_u16() {
            CLOSE_NORMAL => "Normal",
            1001 => "Away",
            1005 => "NoStatus",
            1006 => "Abnormal",
            1011 => "ServerError",
            _ => "Code",
        };
        write!(f, "{} ({})", name, self.as_u16())
    }
}

/// Check that `uri` is a usable WebSocket endpoint (`ws://` or `wss://` with a host)
pub fn validate_endpoint(uri: &str) -> Result<Uri, String> {
    let parsed: Uri = uri
        .parse()
        .map_err(|e| format!("invalid endpoint '{}': {}", uri, e))?;

    match parsed.scheme_str() {
        Some("ws") | Some("wss") => {}
        Some(other) => return Err(format!("unsupported scheme '{}' (expected ws or wss)", other)),
        None => return Err(format!("endpoint '{}' has no scheme", uri)),
    }

    if parsed.host().map_or(true, str::is_empty) {
        return Err(format!("endpoint '{}' has no host", uri));
    }

    Ok(parsed)
}

/// Whether the endpoint selects TLS
pub fn is_secure(uri: &Uri) -> bool {
    uri.scheme_str() == Some("wss")
}
