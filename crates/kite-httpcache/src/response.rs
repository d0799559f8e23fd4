//! Loader Boundary Types
//!
//! Plain-data views of an HTTP exchange handed over by the resource
//! loader. The cache never talks to the network; it only copies fields
//! out of these structs at admission time.

/// Coarse TLS classification of the connection a response arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(i32)]
pub enum SecureState {
    /// Not secured (plain HTTP).
    #[default]
    None = 0,
    /// TLS with a problem (certificate error, mixed content).
    Danger = 1,
    /// Ordinary valid TLS.
    Normal = 2,
    /// Extended-validation TLS.
    Ev = 3,
}

impl SecureState {
    pub fn from_i32(v: i32) -> Self {
        match v {
            1 => SecureState::Danger,
            2 => SecureState::Normal,
            3 => SecureState::Ev,
            _ => SecureState::None,
        }
    }
}

/// Certificate verification level of the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(i32)]
pub enum SecureLevel {
    /// No TLS involved.
    #[default]
    NonSsl = 0,
    /// Certificate rejected.
    Unauthorized = 1,
    /// TLS with weak parameters.
    Insecure = 2,
    /// Fully verified TLS.
    Secure = 3,
}

impl SecureLevel {
    pub fn from_i32(v: i32) -> Self {
        match v {
            1 => SecureLevel::Unauthorized,
            2 => SecureLevel::Insecure,
            3 => SecureLevel::Secure,
            _ => SecureLevel::NonSsl,
        }
    }
}

/// Security classification captured from the response's connection.
#[derive(Debug, Clone, Copy)]
pub struct SecurityInfo {
    pub is_ssl: bool,
    pub is_ev_ssl: bool,
    pub secure_state: SecureState,
    pub secure_level: SecureLevel,
}

impl Default for SecurityInfo {
    fn default() -> Self {
        Self {
            is_ssl: false,
            is_ev_ssl: false,
            secure_state: SecureState::None,
            secure_level: SecureLevel::NonSsl,
        }
    }
}

/// Response metadata as seen by the cache. Timestamps are seconds since
/// the Unix epoch; `None` means the origin did not supply the value.
#[derive(Debug, Clone, Default)]
pub struct ResponseMeta {
    pub status: i32,
    pub status_text: String,
    pub mime_type: String,
    pub text_encoding: String,
    pub suggested_filename: String,
    pub expected_content_length: i64,
    pub date: Option<f64>,
    pub last_modified: Option<f64>,
    pub expires: Option<f64>,
    pub max_age: Option<f64>,
    pub age: Option<f64>,
    pub no_cache: bool,
    pub must_revalidate: bool,
    pub headers: Vec<(String, String)>,
    pub security: SecurityInfo,
}

impl ResponseMeta {
    /// Look up a raw header value by case-insensitive name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }
}

/// Request metadata needed for Vary matching.
#[derive(Debug, Clone, Default)]
pub struct RequestMeta {
    pub headers: Vec<(String, String)>,
}

impl RequestMeta {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_lookup_case_insensitive() {
        let resp = ResponseMeta::default().with_header("ETag", "\"abc\"");
        assert_eq!(resp.header("etag"), Some("\"abc\""));
        assert_eq!(resp.header("ETAG"), Some("\"abc\""));
        assert_eq!(resp.header("Last-Modified"), None);
    }

    #[test]
    fn test_secure_enums_lossy_decode() {
        assert_eq!(SecureState::from_i32(2), SecureState::Normal);
        assert_eq!(SecureState::from_i32(99), SecureState::None);
        assert_eq!(SecureLevel::from_i32(3), SecureLevel::Secure);
        assert_eq!(SecureLevel::from_i32(-1), SecureLevel::NonSsl);
    }
}
