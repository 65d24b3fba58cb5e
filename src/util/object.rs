//! Key and path helpers. `/` is the only hierarchy delimiter.

pub const DELIMITER: char = '/';

/// Last path segment of a key, ignoring a trailing delimiter.
pub fn basename(key: &str) -> &str {
    let key = key.strip_suffix(DELIMITER).unwrap_or(key);
    key.rsplit(DELIMITER).next().unwrap_or(key)
}

/// Lowercased extension of the key's basename, if it has one.
pub fn extension(key: &str) -> Option<String> {
    let name = basename(key);
    match name.rfind('.') {
        Some(pos) if pos + 1 < name.len() => Some(name[pos + 1..].to_ascii_lowercase()),
        _ => None,
    }
}

pub fn is_pdf(key: &str) -> bool {
    extension(key).as_deref() == Some("pdf")
}

/// Folder marker key for `path`: always ends with `/`.
pub fn folder_key(path: &str) -> String {
    if path.ends_with(DELIMITER) {
        path.to_string()
    } else {
        format!("{}{}", path, DELIMITER)
    }
}
