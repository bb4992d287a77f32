//! Share-link rewriting for file hosting providers.

use url::Url;

pub const GOOGLE_DRIVE: &str = "google_drive";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rewrite {
    pub url: String,
    pub provider: &'static str,
}

/// Rewrite a known share-link shape to its direct download form.
///
/// Returns `None` when the URL is not a recognised share link.
pub fn rewrite(url: &str) -> Option<Rewrite> {
    let parsed = Url::parse(url).ok()?;
    let file_id = google_drive_file_id(&parsed)?;
    Some(Rewrite {
        url: format!("https://drive.google.com/uc?export=download&id={file_id}"),
        provider: GOOGLE_DRIVE,
    })
}

fn google_drive_file_id(url: &Url) -> Option<String> {
    if url.host_str()? != "drive.google.com" {
        return None;
    }

    let mut segments = url.path_segments()?;
    let id = match segments.next()? {
        // /file/d/<id>/view
        "file" => {
            if segments.next()? != "d" {
                return None;
            }
            segments.next()?.to_string()
        }
        // /open?id=<id>, /uc?id=<id>
        "open" | "uc" => url
            .query_pairs()
            .find(|(key, _)| key == "id")
            .map(|(_, value)| value.into_owned())?,
        _ => return None,
    };

    let valid = !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    valid.then_some(id)
}
