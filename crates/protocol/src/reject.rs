use serde::{Deserialize, Serialize};

/// Reject code carried by a backend rejection.
///
/// Numeric values follow the replica's reject-code taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectCode {
    /// Fatal system error; retrying will not help.
    SysFatal,
    /// Transient system condition (capacity, congestion).
    SysTransient,
    /// The destination canister or method does not exist.
    DestinationInvalid,
    /// The canister explicitly rejected the call.
    CanisterReject,
    /// The canister trapped or ran out of resources.
    CanisterError,
    /// Outcome unknown (e.g. a best-effort call timed out).
    SysUnknown,
}

impl RejectCode {
    /// Maps a numeric reject code. Returns `None` for codes outside 1–6.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(Self::SysFatal),
            2 => Some(Self::SysTransient),
            3 => Some(Self::DestinationInvalid),
            4 => Some(Self::CanisterReject),
            5 => Some(Self::CanisterError),
            6 => Some(Self::SysUnknown),
            _ => None,
        }
    }

    /// Returns the numeric form of the code.
    pub fn code(self) -> u8 {
        match self {
            Self::SysFatal => 1,
            Self::SysTransient => 2,
            Self::DestinationInvalid => 3,
            Self::CanisterReject => 4,
            Self::CanisterError => 5,
            Self::SysUnknown => 6,
        }
    }

    /// Whether the code describes a condition expected to clear on its own.
    pub fn is_transient(self) -> bool {
        matches!(self, Self::SysTransient | Self::SysUnknown)
    }
}

/// Structured form of a backend rejection payload.
///
/// Every field is optional because rejections arrive in several shapes;
/// `raw` always keeps the original text for diagnostics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RejectDetails {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub canister_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    /// `query` or `update`, when the payload names it next to the method.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reject_code: Option<RejectCode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reject_message: Option<String>,
    pub raw: String,
}

impl RejectDetails {
    /// Details holding only the raw text (nothing could be parsed).
    pub fn raw(text: impl Into<String>) -> Self {
        Self {
            raw: text.into(),
            ..Self::default()
        }
    }

    /// Returns `true` if at least one structured field was extracted.
    pub fn is_structured(&self) -> bool {
        self.canister_id.is_some()
            || self.method.is_some()
            || self.request_id.is_some()
            || self.reject_code.is_some()
            || self.error_code.is_some()
            || self.reject_message.is_some()
    }

    /// Human-readable one-liner: the reject message if parsed, else the raw text.
    pub fn summary(&self) -> &str {
        self.reject_message.as_deref().unwrap_or(&self.raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reject_code_numeric_mapping() {
        for code in 1..=6u8 {
            let parsed = RejectCode::from_code(code).unwrap();
            assert_eq!(parsed.code(), code);
        }
        assert!(RejectCode::from_code(0).is_none());
        assert!(RejectCode::from_code(7).is_none());
    }

    #[test]
    fn only_system_transient_codes_are_transient() {
        assert!(RejectCode::SysTransient.is_transient());
        assert!(RejectCode::SysUnknown.is_transient());
        assert!(!RejectCode::SysFatal.is_transient());
        assert!(!RejectCode::CanisterReject.is_transient());
        assert!(!RejectCode::CanisterError.is_transient());
        assert!(!RejectCode::DestinationInvalid.is_transient());
    }

    #[test]
    fn summary_prefers_reject_message() {
        let mut details = RejectDetails::raw("Call failed: something");
        assert_eq!(details.summary(), "Call failed: something");
        assert!(!details.is_structured());

        details.reject_message = Some("out of cycles".into());
        assert_eq!(details.summary(), "out of cycles");
        assert!(details.is_structured());
    }

    #[test]
    fn details_omit_empty_fields() {
        let details = RejectDetails {
            reject_code: Some(RejectCode::CanisterReject),
            ..RejectDetails::raw("x")
        };
        let json = serde_json::to_string(&details).unwrap();
        assert!(json.contains("\"rejectCode\":\"canister_reject\""));
        assert!(!json.contains("canisterId"));
        assert!(!json.contains("requestId"));
    }
}
