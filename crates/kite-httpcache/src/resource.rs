//! Cached Resource Record
//!
//! One cached HTTP exchange: metadata, freshness math per RFC 7234,
//! Vary matching, binary encoding, and chunked content file transfer.

use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::codec::{round_up, round_up_i64, ByteReader, ByteWriter, CodecError, SERIAL_ALIGN};
use crate::response::{RequestMeta, ResponseMeta, SecureLevel, SecureState};

/// Content files occupy storage in multiples of this size; budget
/// accounting uses the rounded-up length.
pub const CONTENT_SIZE_ALIGNMENT: i64 = 16 * 1024;

/// Chunk size for content file transfers.
const IO_CHUNK: usize = 16 * 1024;

/// Serialized size of the fixed-width field block.
const FIXED_FIELDS_SIZE: usize = 8 * 2 + 4 * 8 + 8 * 7;

/// Seconds since the Unix epoch, as the cache's timestamp representation.
pub(crate) fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

fn encode_opt(v: Option<f64>) -> f64 {
    v.unwrap_or(f64::NAN)
}

fn decode_opt(v: f64) -> Option<f64> {
    if v.is_finite() { Some(v) } else { None }
}

/// One cached HTTP response and, transiently, its body bytes.
///
/// The body buffer lives only between admission and the content file
/// write; after a successful write it is released and reads go to disk.
#[derive(Debug, Clone, Default)]
pub struct CachedResource {
    // Persistent fields, in serialization order.
    pub expected_content_length: i64,
    pub content_length: i64,
    pub status: i32,
    pub has_varying_request_headers: bool,
    pub no_cache: bool,
    pub must_revalidate: bool,
    pub is_ssl: bool,
    pub is_ev_ssl: bool,
    pub secure_state: SecureState,
    pub secure_level: SecureLevel,
    pub expires: Option<f64>,
    pub max_age: Option<f64>,
    pub date: Option<f64>,
    pub last_modified: Option<f64>,
    /// When the response was received. Zero means the record never came
    /// over the network (placeholder), which disables expiry.
    pub response_time: f64,
    pub age: Option<f64>,
    pub last_used_time: f64,
    pub url: String,
    pub mime_type: String,
    pub text_encoding: String,
    pub suggested_filename: String,
    pub file_name: String,
    pub status_text: String,
    pub last_modified_header: String,
    pub etag_header: String,
    pub access_control_allow_origin: String,
    pub content_type_header: String,
    pub accept_language: String,

    // Transient bookkeeping.
    pub aligned_content_length: i64,
    pub footprint: usize,
    pub in_use: bool,
    pub server_push: bool,
    body: Option<Vec<u8>>,
}

impl CachedResource {
    pub fn new(file_name: String, url: String) -> Self {
        Self {
            file_name,
            url,
            last_used_time: unix_now(),
            ..Default::default()
        }
    }

    /// Whether the body bytes are still held in memory.
    pub fn has_body(&self) -> bool {
        self.body.is_some()
    }

    /// Copy all HTTP metadata out of a response. The Accept-Language vary
    /// value is captured only when present in `varying_request_headers`.
    pub fn set_response_meta(
        &mut self,
        response: &ResponseMeta,
        varying_request_headers: &[(String, String)],
        server_push: bool,
    ) -> bool {
        self.mime_type = response.mime_type.clone();
        self.expected_content_length = response.expected_content_length;
        self.text_encoding = response.text_encoding.clone();
        self.suggested_filename = response.suggested_filename.clone();
        self.status = response.status;
        self.status_text = response.status_text.clone();
        self.response_time = unix_now();
        self.date = response.date;
        self.last_modified = response.last_modified;
        self.last_modified_header = response.header("Last-Modified").unwrap_or("").to_string();
        self.etag_header = response.header("ETag").unwrap_or("").to_string();
        self.age = response.age;
        self.access_control_allow_origin = response
            .header("Access-Control-Allow-Origin")
            .unwrap_or("")
            .to_string();
        self.content_type_header = response.header("Content-Type").unwrap_or("").to_string();
        self.server_push = server_push;

        self.is_ssl = response.security.is_ssl;
        self.is_ev_ssl = response.security.is_ev_ssl;
        self.secure_state = response.security.secure_state;
        self.secure_level = response.security.secure_level;

        self.no_cache = response.no_cache;
        self.must_revalidate = response.must_revalidate;
        self.max_age = response.max_age;
        self.expires = response.expires;

        // Vary matching supports the Accept-Language dimension only.
        self.has_varying_request_headers = false;
        self.accept_language = String::new();
        for (name, value) in varying_request_headers {
            if name.eq_ignore_ascii_case("Accept-Language") {
                self.has_varying_request_headers = true;
                self.accept_language = value.clone();
                break;
            }
        }

        true
    }

    /// Store the transient body and derive both content lengths.
    pub fn set_body(&mut self, body: Option<Vec<u8>>) {
        match body {
            None => {
                self.body = None;
                self.content_length = 0;
                self.aligned_content_length = 0;
            }
            Some(bytes) => {
                self.content_length = bytes.len() as i64;
                self.aligned_content_length =
                    round_up_i64(self.content_length, CONTENT_SIZE_ALIGNMENT);
                self.body = Some(bytes);
            }
        }
    }

    /// Freshness lifetime per RFC 7234 §4.2.1 / §4.2.2.
    pub fn freshness_lifetime(&self) -> f64 {
        if let Some(max_age) = self.max_age {
            return max_age;
        }

        let date_value = self.date.unwrap_or(self.response_time);

        if let Some(expires) = self.expires {
            return expires - date_value;
        }

        match self.status {
            // Semantically permanent, so a long implicit lifetime.
            301 | 410 => 365.0 * 24.0 * 60.0 * 60.0,
            _ => {
                // Heuristic freshness.
                if let Some(last_modified) = self.last_modified {
                    return (date_value - last_modified) * 0.1;
                }
                0.0
            }
        }
    }

    /// Current age per RFC 7234 §4.2.3. No latency compensation.
    pub fn current_age(&self, now: f64) -> f64 {
        let apparent_age = match self.date {
            Some(date) => (self.response_time - date).max(0.0),
            None => 0.0,
        };
        let age_value = self.age.unwrap_or(0.0);
        let corrected_initial_age = apparent_age.max(age_value);
        let resident_time = now - self.response_time;
        corrected_initial_age + resident_time
    }

    pub fn is_expired(&self, now: f64) -> bool {
        if self.response_time == 0.0 {
            return false;
        }
        self.current_age(now) > self.freshness_lifetime()
    }

    pub fn needs_revalidation(&self, now: f64) -> bool {
        self.no_cache || self.is_expired(now)
    }

    /// True when the recorded Vary dimensions match `request`.
    ///
    /// Known policy limitation inherited from the original engine: only
    /// Accept-Language is recorded, so responses that varied on any other
    /// header are answered as if they did not vary at all.
    pub fn vary_headers_match(&self, request: &RequestMeta) -> bool {
        if !self.has_varying_request_headers {
            return true;
        }
        request
            .header("Accept-Language")
            .unwrap_or("")
            .eq_ignore_ascii_case(&self.accept_language)
    }

    /// Chunked write of the body to `base/file_name`. On success the
    /// in-memory buffer is released. A partially written file is left in
    /// place for the caller to clean up.
    pub fn write_to_disk(&mut self, base: &Path) -> bool {
        let Some(body) = &self.body else {
            return false;
        };

        let path = base.join(&self.file_name);
        let Ok(mut file) = File::create(&path) else {
            return false;
        };

        for chunk in body.chunks(IO_CHUNK) {
            if file.write_all(chunk).is_err() {
                return false;
            }
        }
        tracing::debug!("cache write {}", self.url);

        self.body = None;
        true
    }

    /// Read the body back: from the transient buffer when still held,
    /// otherwise a chunked read of exactly `content_length` bytes from
    /// the content file. A short read fails.
    pub fn read_from_disk(&mut self, base: &Path) -> Option<Vec<u8>> {
        let len = self.content_length as usize;

        if let Some(body) = &self.body {
            if body.len() < len {
                return None;
            }
            return Some(body[..len].to_vec());
        }

        let path = base.join(&self.file_name);
        let Ok(mut file) = File::open(&path) else {
            return None;
        };

        let mut out = vec![0u8; len];
        let mut filled = 0;
        while filled < len {
            let end = (filled + IO_CHUNK).min(len);
            match file.read(&mut out[filled..end]) {
                Ok(0) | Err(_) => return None,
                Ok(n) => filled += n,
            }
        }
        tracing::debug!("cache read {}", self.url);

        self.in_use = false;
        Some(out)
    }

    /// Serialized metadata size: the fixed block plus each string's
    /// length prefix and padded bytes. Must be refreshed after any field
    /// mutation that feeds admission decisions.
    pub fn calc_footprint(&mut self) {
        let mut size = FIXED_FIELDS_SIZE;
        for s in self.string_fields() {
            size += 4 + round_up(s.len(), SERIAL_ALIGN);
        }
        self.footprint = round_up(size, SERIAL_ALIGN);
    }

    fn string_fields(&self) -> [&str; 11] {
        [
            &self.url,
            &self.mime_type,
            &self.text_encoding,
            &self.suggested_filename,
            &self.file_name,
            &self.status_text,
            &self.last_modified_header,
            &self.etag_header,
            &self.access_control_allow_origin,
            &self.content_type_header,
            &self.accept_language,
        ]
    }

    /// Encode into `w`; returns the number of bytes consumed, always a
    /// multiple of the serialization alignment.
    pub fn serialize(&self, w: &mut ByteWriter<'_>) -> Result<usize, CodecError> {
        let start = w.position();

        w.write_i64(self.expected_content_length)?;
        w.write_i64(self.content_length)?;
        w.write_i32(self.status)?;
        w.write_bool(self.has_varying_request_headers)?;
        w.write_bool(self.no_cache)?;
        w.write_bool(self.must_revalidate)?;
        w.write_bool(self.is_ssl)?;
        w.write_bool(self.is_ev_ssl)?;
        w.write_i32(self.secure_state as i32)?;
        w.write_i32(self.secure_level as i32)?;
        w.write_f64(encode_opt(self.expires))?;
        w.write_f64(encode_opt(self.max_age))?;
        w.write_f64(encode_opt(self.date))?;
        w.write_f64(encode_opt(self.last_modified))?;
        w.write_f64(self.response_time)?;
        w.write_f64(encode_opt(self.age))?;
        w.write_f64(self.last_used_time)?;

        for s in self.string_fields() {
            w.write_string(s)?;
        }

        Ok(w.position() - start)
    }

    /// Decode one record; recomputes the footprint and the aligned
    /// content length from the declared content length.
    pub fn deserialize(r: &mut ByteReader<'_>) -> Result<Self, CodecError> {
        let mut res = CachedResource {
            expected_content_length: r.read_i64()?,
            content_length: r.read_i64()?,
            status: r.read_i32()?,
            has_varying_request_headers: r.read_bool()?,
            no_cache: r.read_bool()?,
            must_revalidate: r.read_bool()?,
            is_ssl: r.read_bool()?,
            is_ev_ssl: r.read_bool()?,
            secure_state: SecureState::from_i32(r.read_i32()?),
            secure_level: SecureLevel::from_i32(r.read_i32()?),
            expires: decode_opt(r.read_f64()?),
            max_age: decode_opt(r.read_f64()?),
            date: decode_opt(r.read_f64()?),
            last_modified: decode_opt(r.read_f64()?),
            response_time: r.read_f64()?,
            age: decode_opt(r.read_f64()?),
            last_used_time: r.read_f64()?,
            ..Default::default()
        };

        res.url = r.read_string()?;
        res.mime_type = r.read_string()?;
        res.text_encoding = r.read_string()?;
        res.suggested_filename = r.read_string()?;
        res.file_name = r.read_string()?;
        res.status_text = r.read_string()?;
        res.last_modified_header = r.read_string()?;
        res.etag_header = r.read_string()?;
        res.access_control_allow_origin = r.read_string()?;
        res.content_type_header = r.read_string()?;
        res.accept_language = r.read_string()?;

        res.aligned_content_length = round_up_i64(res.content_length, CONTENT_SIZE_ALIGNMENT);
        res.calc_footprint();

        Ok(res)
    }
}
