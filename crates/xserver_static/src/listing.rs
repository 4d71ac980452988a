//! HTML directory listings.

use std::path::Path;

use xserver_http::response::html_escape;

/// Render a directory listing page. Entries are sorted by name; directories
/// link with a trailing slash. The caller wraps this in a response with the
/// strict security header set.
pub async fn render_listing(dir: &Path, url_path: &str, charset: &str) -> std::io::Result<String> {
    let mut names: Vec<(String, bool)> = Vec::new();
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name().to_string_lossy().to_string();
        let is_dir = entry
            .file_type()
            .await
            .map(|t| t.is_dir())
            .unwrap_or(false);
        names.push((name, is_dir));
    }
    names.sort();

    let escaped_url = html_escape(url_path);
    let mut page = format!(
        "<!DOCTYPE html>\r\n\
         <html>\r\n\
         <head>\r\n\
             <meta charset=\"{charset}\">\r\n\
             <title>Directory Listing: {escaped_url}</title>\r\n\
             <style>\r\n\
                 body {{ font-family: Arial, sans-serif; margin: 20px; }}\r\n\
                 h1 {{ color: #333; }}\r\n\
                 ul {{ list-style-type: none; padding: 0; }}\r\n\
                 li {{ margin: 5px 0; }}\r\n\
                 a {{ color: #0066cc; text-decoration: none; }}\r\n\
                 a:hover {{ text-decoration: underline; }}\r\n\
             </style>\r\n\
         </head>\r\n\
         <body>\r\n\
             <h1>Directory Listing: {escaped_url}</h1>\r\n\
             <ul>\r\n"
    );

    if url_path != "/" {
        page.push_str("        <li><a href=\"..\">..</a> (Parent Directory)</li>\r\n");
    }

    for (name, is_dir) in &names {
        let slash = if *is_dir { "/" } else { "" };
        let href = if url_path == "/" {
            format!("/{name}{slash}")
        } else {
            format!("{url_path}/{name}{slash}")
        };
        let marker = if *is_dir { " (Directory)" } else { "" };
        page.push_str(&format!(
            "        <li><a href=\"{}\">{}</a>{marker}</li>\r\n",
            html_escape(&href),
            html_escape(name),
        ));
    }

    page.push_str("    </ul>\r\n</body>\r\n</html>\r\n");
    Ok(page)
}
