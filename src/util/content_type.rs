use crate::util::object::extension;

pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";
pub const PDF_CONTENT_TYPE: &str = "application/pdf";

/// Best-effort MIME type from the key's extension.
pub fn content_type_for(key: &str) -> &'static str {
    let ext = match extension(key) {
        Some(ext) => ext,
        None => return DEFAULT_CONTENT_TYPE,
    };

    match ext.as_str() {
        "txt" | "log" => "text/plain",
        "html" | "htm" => "text/html",
        "css" => "text/css",
        "csv" => "text/csv",
        "md" | "markdown" => "text/markdown",
        "xml" => "application/xml",
        "js" => "application/javascript",
        "json" => "application/json",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "pdf" => PDF_CONTENT_TYPE,
        "doc" => "application/msword",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "xls" => "application/vnd.ms-excel",
        "xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        "zip" => "application/zip",
        "mp3" => "audio/mpeg",
        "mp4" => "video/mp4",
        _ => DEFAULT_CONTENT_TYPE,
    }
}
