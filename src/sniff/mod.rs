//! Protocol sniffing module
//!
//! This module extracts the TLS Server Name Indication from `ClientHello`
//! messages so hostnames can be matched against the block list before any
//! application data is exchanged.
//!
//! A session's hostname is captured from its handshake and cached on the
//! [`TlsSession`]; the decision is taken when the first `ApplicationData`
//! record shows up.
//!
//! # Example
//!
//! ```
//! use tunguard::sniff::{extract_sni, SniOutcome};
//!
//! let data = [0x17, 0x03, 0x03, 0x00, 0x01, 0x00];
//!
//! assert_eq!(extract_sni(&data, Some("example.com")), SniOutcome::ReadyToDecide);
//! ```

mod result;
mod tls;

pub use result::{SniOutcome, TlsRejectReason, TlsSession, TlsVerdict};
pub use tls::{extract_sni, MAX_HOSTNAME_LEN};

#[cfg(test)]
pub(crate) use tls::testutil;
