//! TLS SNI (Server Name Indication) parsing
//!
//! This module walks a TLS `ClientHello` to extract the Server Name
//! Indication extension. Every length field is checked against the bytes
//! that remain before it is used, and the walk never leaves the record.
//!
//! ## TLS Record Format
//!
//! ```text
//! ContentType (1 byte)
//! ProtocolVersion (2 bytes)
//! Length (2 bytes)
//! Fragment (variable)
//! ```
//!
//! ## `ClientHello` Format (simplified)
//!
//! ```text
//! HandshakeType (1 byte) = 0x01
//! Length (3 bytes)
//! ProtocolVersion (2 bytes)
//! Random (32 bytes)
//! SessionID (1 byte length + variable)
//! CipherSuites (2 bytes length + variable)
//! CompressionMethods (1 byte length + variable)
//! Extensions (2 bytes length + variable)
//! ```
//!
//! ## SNI Extension Format
//!
//! ```text
//! ExtensionType (2 bytes) = 0x0000
//! Length (2 bytes)
//! ServerNameListLength (2 bytes)
//! ServerNameType (1 byte) = 0x00 (host_name)
//! ServerNameLength (2 bytes)
//! ServerName (variable)
//! ```

use tracing::{debug, trace};

use super::result::{SniOutcome, TlsRejectReason};
use crate::packet::Cursor;
use crate::util::{hex_dump, is_valid_utf8};

/// TLS `ContentType` range
const TLS_CONTENT_TYPE_MIN: u8 = 20;
const TLS_CONTENT_TYPE_MAX: u8 = 24;

/// TLS `ContentType` for Handshake
const TLS_CONTENT_TYPE_HANDSHAKE: u8 = 0x16;

/// TLS `ContentType` for `ApplicationData`
const TLS_CONTENT_TYPE_APPLICATION_DATA: u8 = 0x17;

/// TLS `HandshakeType` for `ClientHello`
const TLS_HANDSHAKE_TYPE_CLIENT_HELLO: u8 = 0x01;

/// TLS `ExtensionType` for `server_name`
const TLS_EXTENSION_SERVER_NAME: u16 = 0x0000;

/// `ServerNameType` for `host_name`
const TLS_SNI_NAME_TYPE_HOSTNAME: u8 = 0x00;

/// Handshake length, client version and random
const CLIENT_HELLO_FIXED_LEN: usize = 3 + 2 + 32;

/// Longest server name accepted
pub const MAX_HOSTNAME_LEN: usize = 255;

/// Bytes of a rejected record included in trace output
const DUMP_LEN: usize = 64;

type Step<T> = Result<T, SniOutcome>;

fn truncated() -> SniOutcome {
    SniOutcome::Rejected(TlsRejectReason::Truncated)
}

/// Classify a TCP payload and extract the server name from a `ClientHello`.
///
/// `payload` must start at the TLS record header. `cached_hostname` is the
/// name already captured for this session; an `ApplicationData` record is
/// only actionable once one is known.
///
/// # Example
///
/// ```
/// use tunguard::sniff::{extract_sni, SniOutcome};
///
/// let data = b"GET / HTTP/1.1\r\nHost: example.com\r\n";
/// assert_eq!(extract_sni(data, None), SniOutcome::NotTls);
/// ```
#[must_use]
pub fn extract_sni(payload: &[u8], cached_hostname: Option<&str>) -> SniOutcome {
    let Some(&content_type) = payload.first() else {
        return SniOutcome::NotTls;
    };

    if looks_like_sslv2_hello(payload) {
        debug!("SSL 2.0 ClientHello cannot carry SNI");
        return SniOutcome::PredatesSni;
    }

    if !(TLS_CONTENT_TYPE_MIN..=TLS_CONTENT_TYPE_MAX).contains(&content_type) {
        trace!("Not a TLS record (content type 0x{:02x})", content_type);
        return SniOutcome::NotTls;
    }

    let Some(&major) = payload.get(1) else {
        return truncated();
    };
    if major < 3 {
        debug!(major, "TLS version predates SNI");
        return SniOutcome::PredatesSni;
    }

    match content_type {
        TLS_CONTENT_TYPE_HANDSHAKE => match parse_client_hello(payload) {
            Ok(outcome) => outcome,
            Err(outcome) => {
                trace!(
                    bytes = %hex_dump(&payload[..payload.len().min(DUMP_LEN)]),
                    ?outcome,
                    "Rejected ClientHello"
                );
                outcome
            }
        },
        TLS_CONTENT_TYPE_APPLICATION_DATA => {
            if cached_hostname.is_some_and(|name| !name.is_empty()) {
                SniOutcome::ReadyToDecide
            } else {
                SniOutcome::NotActionable
            }
        }
        _ => {
            trace!(content_type, "TLS record is not a handshake");
            SniOutcome::NotActionable
        }
    }
}

/// SSL 2.0 compatible hello: high bit of the length byte set and message
/// type `ClientHello`
fn looks_like_sslv2_hello(data: &[u8]) -> bool {
    data.len() >= 3 && data[0] & 0x80 != 0 && data[2] == TLS_HANDSHAKE_TYPE_CLIENT_HELLO
}

fn parse_client_hello(payload: &[u8]) -> Step<SniOutcome> {
    let mut record = Cursor::new(payload);
    record.skip(3).ok_or_else(truncated)?; // content type, version
    let record_len = usize::from(record.read_u16().ok_or_else(truncated)?);
    if record_len > record.remaining() {
        debug!(
            record_len,
            available = record.remaining(),
            "Incomplete TLS record"
        );
        return Err(truncated());
    }
    let mut hello = record.sub(record_len).ok_or_else(truncated)?;

    let handshake_type = hello.read_u8().ok_or_else(truncated)?;
    if handshake_type != TLS_HANDSHAKE_TYPE_CLIENT_HELLO {
        return Err(SniOutcome::Rejected(TlsRejectReason::NotClientHello));
    }
    hello.skip(CLIENT_HELLO_FIXED_LEN).ok_or_else(truncated)?;

    let session_id_len = usize::from(hello.read_u8().ok_or_else(truncated)?);
    hello.skip(session_id_len).ok_or_else(truncated)?;

    let cipher_suites_len = usize::from(hello.read_u16().ok_or_else(truncated)?);
    hello.skip(cipher_suites_len).ok_or_else(truncated)?;

    let compression_len = usize::from(hello.read_u8().ok_or_else(truncated)?);
    hello.skip(compression_len).ok_or_else(truncated)?;

    if hello.is_empty() {
        debug!("ClientHello without extensions");
        return Ok(SniOutcome::NoExtensions);
    }

    let extensions_len = usize::from(hello.read_u16().ok_or_else(truncated)?);
    if extensions_len == 0 {
        return Ok(SniOutcome::NoExtensions);
    }
    let extensions = hello
        .sub(extensions_len)
        .ok_or(SniOutcome::Rejected(TlsRejectReason::ExtensionsOverrun))?;

    parse_extensions(extensions)
}

fn parse_extensions(mut extensions: Cursor<'_>) -> Step<SniOutcome> {
    let overrun = SniOutcome::Rejected(TlsRejectReason::ExtensionOverrun);

    while extensions.remaining() >= 4 {
        let ext_type = extensions.read_u16().ok_or_else(truncated)?;
        let ext_len = usize::from(extensions.read_u16().ok_or_else(truncated)?);
        let body = extensions.sub(ext_len).ok_or_else(|| overrun.clone())?;

        if ext_type == TLS_EXTENSION_SERVER_NAME {
            return parse_server_name(body);
        }
        trace!(ext_type, ext_len, "Skipping TLS extension");
    }

    if !extensions.is_empty() {
        return Err(overrun);
    }
    Ok(SniOutcome::NoSni)
}

fn parse_server_name(mut body: Cursor<'_>) -> Step<SniOutcome> {
    let list_len = usize::from(body.read_u16().ok_or_else(truncated)?);
    let mut list = body
        .sub(list_len)
        .ok_or(SniOutcome::Rejected(TlsRejectReason::ExtensionOverrun))?;

    while !list.is_empty() {
        let name_type = list.read_u8().ok_or_else(truncated)?;
        let name_len = usize::from(list.read_u16().ok_or_else(truncated)?);

        if name_type != TLS_SNI_NAME_TYPE_HOSTNAME {
            debug!(name_type, "Unknown server name type");
            list.skip(name_len).ok_or_else(truncated)?;
            continue;
        }

        if name_len > MAX_HOSTNAME_LEN {
            debug!(name_len, "TLS SNI too long");
            return Err(SniOutcome::Rejected(TlsRejectReason::HostnameTooLong));
        }
        let name = list.take(name_len).ok_or_else(truncated)?;
        if name.is_empty() {
            return Ok(SniOutcome::NoSni);
        }

        if !is_valid_utf8(name) {
            debug!("TLS SNI is not valid UTF-8");
            return Ok(SniOutcome::InvalidEncoding);
        }
        // Structural check passed; std also rejects overlong and surrogate forms
        return Ok(match String::from_utf8(name.to_vec()) {
            Ok(hostname) => {
                trace!(%hostname, "Found SNI");
                SniOutcome::Hostname(hostname)
            }
            Err(_) => SniOutcome::InvalidEncoding,
        });
    }

    Ok(SniOutcome::NoSni)
}
