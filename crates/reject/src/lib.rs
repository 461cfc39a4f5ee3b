//! Backend rejection classifier.
//!
//! Turns the opaque text of a failed remote call into [`RejectDetails`] and a
//! retriable/fatal verdict. Everything here is a pure function of its input.
//!
//! Two payload shapes are understood:
//!
//! ```text
//! Call failed:
//!   Canister: bkyz2-fmaaa-aaaaa-qaaaq-cai
//!   Method: upload_chunk (update)
//!   "Request ID": "5c1a..."
//!   "Error code": "IC0503"
//!   "Reject code": "5"
//!   "Reject message": "Canister trapped explicitly: \"quota exceeded\""
//! ```
//!
//! and a JSON object with the same fields (`reject_code`, `reject_message`, ...).
//! Text matching neither shape is kept verbatim and classified as fatal.

mod parse;
mod unescape;

pub use parse::parse_rejection;
pub use unescape::unescape;

use vaultup_protocol::{RejectDetails, UploadError};

/// Error codes that signal capacity exhaustion rather than a bad request.
///
/// - `IC0101` subnet oversubscribed
/// - `IC0201` canister queue full
/// - `IC0202` ingress message timeout
/// - `IC0204` ingress history full
pub const TRANSIENT_ERROR_CODES: &[&str] = &["IC0101", "IC0201", "IC0202", "IC0204"];

/// Parsed rejection plus its verdict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub details: RejectDetails,
    pub retriable: bool,
}

impl Classification {
    /// Converts the verdict into the item-level error taxonomy.
    pub fn into_error(self) -> UploadError {
        if self.retriable {
            UploadError::TransportRetriable {
                details: self.details,
            }
        } else {
            UploadError::TransportFatal {
                details: self.details,
            }
        }
    }
}

/// Parses and classifies a rejection payload.
pub fn classify(text: &str) -> Classification {
    let details = parse_rejection(text);
    let retriable = is_retriable(&details);
    Classification { details, retriable }
}

/// Retriable when the reject code is transient or the error code names a
/// capacity condition. Anything unparsed is fatal.
pub fn is_retriable(details: &RejectDetails) -> bool {
    if let Some(code) = &details.error_code
        && TRANSIENT_ERROR_CODES
            .iter()
            .any(|c| c.eq_ignore_ascii_case(code))
    {
        return true;
    }
    details.reject_code.is_some_and(|c| c.is_transient())
}

#[cfg(test)]
mod tests {
    use super::*;
    use vaultup_protocol::RejectCode;

    const TRAPPED: &str = r#"Call failed:
  Canister: bkyz2-fmaaa-aaaaa-qaaaq-cai
  Method: upload_chunk (update)
  "Request ID": "5c1a0d7e"
  "Error code": "IC0503"
  "Reject code": "5"
  "Reject message": "Canister bkyz2-fmaaa-aaaaa-qaaaq-cai trapped explicitly: Caller is not a controller""#;

    #[test]
    fn canister_error_is_fatal() {
        let c = classify(TRAPPED);
        assert!(!c.retriable);
        assert_eq!(c.details.reject_code, Some(RejectCode::CanisterError));
        assert!(matches!(c.into_error(), UploadError::TransportFatal { .. }));
    }

    #[test]
    fn transient_reject_code_is_retriable() {
        let c = classify("Call failed:\n  \"Reject code\": \"2\"\n  \"Reject message\": \"subnet busy\"");
        assert!(c.retriable);
        let err = c.into_error();
        assert!(err.is_retriable());
        assert_eq!(err.to_string(), "transient transport failure: subnet busy");
    }

    #[test]
    fn capacity_error_code_overrides_reject_code() {
        let c = classify(
            "Call was rejected:\n  Reject code: 4\n  Error code: IC0201\n  Reject text: queue full",
        );
        assert!(c.retriable);
    }

    #[test]
    fn unknown_outcome_is_retriable() {
        assert!(classify("Reject code: 6\nReject text: timed out").retriable);
    }

    #[test]
    fn unauthorized_and_invalid_destination_are_fatal() {
        assert!(!classify("Reject code: 4\nReject text: Unauthorized").retriable);
        assert!(!classify("Reject code: 3\nReject text: no such canister").retriable);
        assert!(!classify("Reject code: 1\nReject text: fatal").retriable);
    }

    #[test]
    fn unparseable_text_is_fatal_with_raw_preserved() {
        let text = "<html>502 Bad Gateway</html>";
        let c = classify(text);
        assert!(!c.retriable);
        assert!(!c.details.is_structured());
        assert_eq!(c.details.raw, text);
        assert_eq!(c.into_error().to_string(), format!("upload rejected: {text}"));
    }

    #[test]
    fn empty_text_is_fatal() {
        let c = classify("");
        assert!(!c.retriable);
        assert_eq!(c.details.raw, "");
    }

    #[test]
    fn classification_is_stateless() {
        let first = classify(TRAPPED);
        let _ = classify("Reject code: 2");
        assert_eq!(classify(TRAPPED), first);
    }
}
