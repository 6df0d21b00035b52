use facet::Facet;

use crate::{Json, Metadata};

/// Fixed discriminator tagging call records on the page bus.
pub const POST_TYPE: &str = "__CALLSCOPE__";

#[derive(Facet, Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
#[facet(rename_all = "snake_case")]
pub enum MethodType {
    Unary,
    ServerStreaming,
}

/// Error half of a failed call, as reported by the RPC client.
#[derive(Facet, Clone, Debug, PartialEq, Eq)]
pub struct CallError {
    pub code: i32,
    pub message: String,
}

impl CallError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// One message delivered to the observer.
///
/// A unary call produces exactly one record carrying request, outcome,
/// response headers, page url and hostname. `responseHeaders` and `url`
/// are always present on unary records, even when empty. A server-streaming call
/// produces one record per received item (`response` set), then one
/// terminal record: either `response` equal to [`Json::eof`] or `error`.
#[derive(Facet, Clone, Debug, PartialEq)]
#[facet(rename_all = "camelCase")]
pub struct CallRecord {
    pub method: String,
    pub method_type: MethodType,
    #[facet(default, skip_serializing_if = Option::is_none)]
    pub request: Option<Json>,
    #[facet(default, skip_serializing_if = Option::is_none)]
    pub response: Option<Json>,
    #[facet(default, skip_serializing_if = Option::is_none)]
    pub response_headers: Option<Metadata>,
    #[facet(default, skip_serializing_if = Option::is_none)]
    pub error: Option<CallError>,
    #[facet(default, skip_serializing_if = Option::is_none)]
    pub url: Option<String>,
    #[facet(default, skip_serializing_if = Option::is_none)]
    pub hostname: Option<String>,
}

impl CallRecord {
    fn bare(method: impl Into<String>, method_type: MethodType) -> Self {
        Self {
            method: method.into(),
            method_type,
            request: None,
            response: None,
            response_headers: None,
            error: None,
            url: None,
            hostname: None,
        }
    }

    /// Record for a completed unary call. `response` is dropped when `error` is set.
    pub fn unary(
        method: impl Into<String>,
        request: Json,
        outcome: Result<Json, CallError>,
        response_headers: Metadata,
        url: impl Into<String>,
        hostname: impl Into<String>,
    ) -> Self {
        let mut record = Self::bare(method, MethodType::Unary);
        record.request = Some(request);
        match outcome {
            Ok(response) => record.response = Some(response),
            Err(error) => record.error = Some(error),
        }
        record.response_headers = Some(response_headers);
        record.url = Some(url.into());
        record.hostname = Some(hostname.into());
        record
    }

    pub fn stream_data(method: impl Into<String>, response: Json) -> Self {
        let mut record = Self::bare(method, MethodType::ServerStreaming);
        record.response = Some(response);
        record
    }

    pub fn stream_eof(method: impl Into<String>) -> Self {
        Self::stream_data(method, Json::eof())
    }

    pub fn stream_error(method: impl Into<String>, error: CallError) -> Self {
        let mut record = Self::bare(method, MethodType::ServerStreaming);
        record.error = Some(error);
        record
    }

    /// True for the message that closes a streaming sequence.
    pub fn is_terminal(&self) -> bool {
        match self.method_type {
            MethodType::Unary => true,
            MethodType::ServerStreaming => {
                self.error.is_some() || self.response.as_ref().is_some_and(Json::is_eof)
            }
        }
    }

    /// The `x-trace-id` response header, matched case-insensitively.
    pub fn trace_id(&self) -> Option<&str> {
        let headers = self.response_headers.as_ref()?;
        headers
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case("x-trace-id"))
            .map(|(_, value)| value.as_str())
    }
}
