//! Single-level listing over flat key namespaces, and the response
//! overrides shared by every URL signer.

use std::collections::HashMap;

use crate::model::object::{ObjectEntry, UrlOperation};
use crate::util::{content_type::PDF_CONTENT_TYPE, object};

/// Folds a flat scan under `prefix` into one level of hierarchy.
///
/// Keys equal to `prefix` are dropped. A remainder with a `/` yields one
/// folder entry for its first segment, deduplicated; explicit markers
/// (`prefix + "name/"`) contribute their own timestamp. Everything else is
/// a file at this level. Folders come before files, each in scan order.
pub fn emulate_hierarchy<I>(prefix: &str, flat: I) -> Vec<ObjectEntry>
where
    I: IntoIterator<Item = ObjectEntry>,
{
    let mut folders: Vec<ObjectEntry> = Vec::new();
    let mut folder_index: HashMap<String, usize> = HashMap::new();
    let mut files = Vec::new();

    for entry in flat {
        let rest = match entry.key.strip_prefix(prefix) {
            Some(rest) if !rest.is_empty() => rest,
            _ => continue,
        };

        match rest.find(object::DELIMITER) {
            Some(pos) => {
                let folder = format!("{}{}", prefix, &rest[..=pos]);
                let explicit = pos + 1 == rest.len();

                match folder_index.get(&folder) {
                    Some(&idx) => {
                        if explicit && entry.last_modified.is_some() {
                            folders[idx].last_modified = entry.last_modified;
                        }
                    }
                    None => {
                        let last_modified = if explicit { entry.last_modified } else { None };
                        folder_index.insert(folder.clone(), folders.len());
                        folders.push(ObjectEntry::folder(&folder, last_modified));
                    }
                }
            }
            None => files.push(ObjectEntry {
                is_folder: false,
                ..entry
            }),
        }
    }

    folders.extend(files);
    folders
}

/// Drops the entry standing for the queried prefix itself.
pub fn exclude_prefix(entries: Vec<ObjectEntry>, prefix: &str) -> Vec<ObjectEntry> {
    entries.into_iter().filter(|e| e.key != prefix).collect()
}

/// `Content-Disposition` forcing a save under the key's basename.
pub fn attachment_disposition(key: &str) -> String {
    format!("attachment; filename=\"{}\"", object::basename(key))
}

/// Response header overrides to bake into a signed URL.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UrlOverrides {
    pub content_disposition: Option<String>,
    pub content_type: Option<String>,
}

impl UrlOverrides {
    pub fn is_empty(&self) -> bool {
        self.content_disposition.is_none() && self.content_type.is_none()
    }
}

/// Downloads get an attachment disposition; views get none, except PDFs,
/// which are forced to `application/pdf` so they render inline.
pub fn url_overrides(key: &str, operation: UrlOperation) -> UrlOverrides {
    match operation {
        UrlOperation::Download => UrlOverrides {
            content_disposition: Some(attachment_disposition(key)),
            content_type: None,
        },
        UrlOperation::View if object::is_pdf(key) => UrlOverrides {
            content_disposition: None,
            content_type: Some(PDF_CONTENT_TYPE.to_string()),
        },
        UrlOperation::View => UrlOverrides::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn keys(entries: &[ObjectEntry]) -> Vec<(&str, bool)> {
        entries.iter().map(|e| (e.key.as_str(), e.is_folder)).collect()
    }

    fn flat(list: &[&str]) -> Vec<ObjectEntry> {
        list.iter().map(|k| ObjectEntry::file(k, 1, None)).collect()
    }

    #[test]
    fn test_emulate_one_level_deeper() {
        let entries = emulate_hierarchy("a/", flat(&["a/b/c.txt"]));
        assert_eq!(keys(&entries), vec![("a/b/", true)]);
        assert_eq!(entries[0].size, 0);
    }

    #[test]
    fn test_emulate_cases() {
        let cases = vec![
            ("", vec!["x/"], vec![("x/", true)]),
            ("", vec!["top.txt", "x/y/z/deep.bin"], vec![("x/", true), ("top.txt", false)]),
            (
                "a/",
                vec!["a/", "a/1.txt", "a/b/2.txt", "a/b/3.txt", "a/c/"],
                vec![("a/b/", true), ("a/c/", true), ("a/1.txt", false)],
            ),
            ("a/", vec!["a/b/c/"], vec![("a/b/", true)]),
            ("a/", vec!["ab.txt", "b/c.txt"], vec![]),
        ];

        for (prefix, input, expected) in cases {
            let entries = emulate_hierarchy(prefix, flat(&input));
            assert_eq!(keys(&entries), expected, "failed for case: {:?}", input);
        }
    }

    #[test]
    fn test_emulate_never_returns_prefix() {
        let entries = emulate_hierarchy("docs/", flat(&["docs/", "docs/readme.md"]));
        assert!(entries.iter().all(|e| e.key != "docs/"));
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn test_emulate_marker_timestamp_wins() {
        let stamp = datetime!(2024-05-01 12:00 UTC);
        let mut input = flat(&["a/b/c.txt"]);
        input.push(ObjectEntry::file("a/b/", 0, Some(stamp)));

        let entries = emulate_hierarchy("a/", input);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].last_modified, Some(stamp));

        let synthesized = emulate_hierarchy("a/", flat(&["a/b/c.txt"]));
        assert_eq!(synthesized[0].last_modified, None);
    }

    #[test]
    fn test_exclude_prefix() {
        let entries = vec![
            ObjectEntry::folder("p/", None),
            ObjectEntry::folder("p/q/", None),
            ObjectEntry::file("p/r", 3, None),
        ];

        let kept = exclude_prefix(entries, "p/");
        assert_eq!(keys(&kept), vec![("p/q/", true), ("p/r", false)]);
    }

    #[test]
    fn test_url_overrides() {
        let cases = vec![
            (
                "a/b/report.csv",
                UrlOperation::Download,
                Some("attachment; filename=\"report.csv\""),
                None,
            ),
            (
                "manual.pdf",
                UrlOperation::Download,
                Some("attachment; filename=\"manual.pdf\""),
                None,
            ),
            ("manual.pdf", UrlOperation::View, None, Some("application/pdf")),
            ("photo.png", UrlOperation::View, None, None),
        ];

        for (key, operation, disposition, content_type) in cases {
            let overrides = url_overrides(key, operation);
            assert_eq!(
                overrides.content_disposition.as_deref(),
                disposition,
                "failed on disposition for case: {} {}",
                key,
                operation
            );
            assert_eq!(
                overrides.content_type.as_deref(),
                content_type,
                "failed on content type for case: {} {}",
                key,
                operation
            );
        }

        assert!(url_overrides("photo.png", UrlOperation::View).is_empty());
    }
}
