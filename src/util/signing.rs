//! Primitives shared by the hand-signed REST backends.

use base64::{engine::general_purpose, Engine as _};
use hmac::{Hmac, Mac};
use md5::{Digest, Md5};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use sha1::Sha1;
use sha2::Sha256;
use time::{
    format_description::{well_known::Rfc3339, FormatItem},
    macros::format_description,
    OffsetDateTime, PrimitiveDateTime,
};

use crate::model::error::{StorageError, StorageResult};

/// RFC 3986 unreserved characters stay, everything else is escaped.
const STRICT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');
const PATH: &AsciiSet = &STRICT.remove(b'/');

const HTTP_DATE: &[FormatItem<'static>] = format_description!(
    "[weekday repr:short], [day] [month repr:short] [year] [hour]:[minute]:[second] GMT"
);
const ISO_SECONDS: &[FormatItem<'static>] =
    format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]Z");

pub fn hmac_sha256_base64(key: &[u8], message: &str) -> StorageResult<String> {
    let mut mac = Hmac::<Sha256>::new_from_slice(key)
        .map_err(|err| StorageError::InvalidArgument(format!("signing key: {}", err)))?;
    mac.update(message.as_bytes());
    Ok(general_purpose::STANDARD.encode(mac.finalize().into_bytes()))
}

pub fn hmac_sha1_base64(key: &[u8], message: &str) -> StorageResult<String> {
    let mut mac = Hmac::<Sha1>::new_from_slice(key)
        .map_err(|err| StorageError::InvalidArgument(format!("signing key: {}", err)))?;
    mac.update(message.as_bytes());
    Ok(general_purpose::STANDARD.encode(mac.finalize().into_bytes()))
}

pub fn md5_base64(body: &[u8]) -> String {
    general_purpose::STANDARD.encode(Md5::digest(body))
}

pub fn decode_base64(value: &str) -> Option<Vec<u8>> {
    general_purpose::STANDARD.decode(value.trim()).ok()
}

/// Percent-encodes a query value or single path segment.
pub fn encode(value: &str) -> String {
    utf8_percent_encode(value, STRICT).to_string()
}

/// Percent-encodes an object key, keeping `/` separators.
pub fn encode_path(key: &str) -> String {
    utf8_percent_encode(key, PATH).to_string()
}

/// IMF-fixdate, e.g. `Wed, 21 Oct 2015 07:28:00 GMT`.
pub fn http_date(at: OffsetDateTime) -> String {
    let at = at.to_offset(time::UtcOffset::UTC);
    at.format(HTTP_DATE).unwrap_or_default()
}

pub fn parse_http_date(value: &str) -> Option<OffsetDateTime> {
    PrimitiveDateTime::parse(value.trim(), HTTP_DATE)
        .ok()
        .map(PrimitiveDateTime::assume_utc)
}

/// ISO 8601 without fractional seconds, as SAS tokens expect.
pub fn iso_seconds(at: OffsetDateTime) -> String {
    let at = at.to_offset(time::UtcOffset::UTC);
    at.format(ISO_SECONDS).unwrap_or_default()
}

pub fn parse_rfc3339(value: &str) -> Option<OffsetDateTime> {
    OffsetDateTime::parse(value.trim(), &Rfc3339).ok()
}

/// Accepts either timestamp shape providers put in listings and headers.
pub fn parse_timestamp(value: &str) -> Option<OffsetDateTime> {
    parse_rfc3339(value).or_else(|| parse_http_date(value))
}
