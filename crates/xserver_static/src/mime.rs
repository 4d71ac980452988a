use std::path::Path;

use mime_guess::mime;

/// Content types that get the route charset appended.
fn is_texty(m: &mime::Mime) -> bool {
    m.type_() == mime::TEXT
        || matches!(
            m.essence_str(),
            "application/javascript" | "application/json" | "application/xml"
        )
}

/// Content-Type for a file path, keyed on the (lowercased) extension with
/// `application/octet-stream` as the default for anything unknown.
pub fn content_type_for(path: &Path, charset: &str) -> String {
    let m = mime_guess::from_path(path).first_or_octet_stream();
    if is_texty(&m) {
        format!("{}; charset={}", m.essence_str(), charset)
    } else {
        m.essence_str().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::content_type_for;
    use std::path::Path;

    #[test]
    fn text_types_carry_the_route_charset() {
        assert_eq!(
            content_type_for(Path::new("index.html"), "utf-8"),
            "text/html; charset=utf-8"
        );
        assert_eq!(
            content_type_for(Path::new("site.css"), "gbk"),
            "text/css; charset=gbk"
        );
        assert_eq!(
            content_type_for(Path::new("app.js"), "utf-8"),
            "application/javascript; charset=utf-8"
        );
        assert_eq!(
            content_type_for(Path::new("data.json"), "utf-8"),
            "application/json; charset=utf-8"
        );
    }

    #[test]
    fn binary_types_do_not() {
        assert_eq!(content_type_for(Path::new("logo.png"), "utf-8"), "image/png");
        assert_eq!(content_type_for(Path::new("video.mp4"), "utf-8"), "video/mp4");
        assert_eq!(
            content_type_for(Path::new("archive.zip"), "utf-8"),
            "application/zip"
        );
    }

    #[test]
    fn extension_case_is_ignored_and_unknowns_default() {
        assert_eq!(
            content_type_for(Path::new("PAGE.HTML"), "utf-8"),
            "text/html; charset=utf-8"
        );
        assert_eq!(
            content_type_for(Path::new("blob.xyzzy"), "utf-8"),
            "application/octet-stream"
        );
        assert_eq!(
            content_type_for(Path::new("no-extension"), "utf-8"),
            "application/octet-stream"
        );
    }
}
