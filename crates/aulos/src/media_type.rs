/// Extension-based MIME fallback for origins that answer with no usable
/// `Content-Type`.
pub fn infer_content_type(file_name: &str) -> Option<&'static str> {
    let ext = file_name.rsplit('.').next()?.to_ascii_lowercase();
    let mime = match ext.as_str() {
        "webm" => "video/webm",
        "avi" => "video/x-msvideo",
        "wmv" => "video/x-ms-wmv",
        "flv" => "video/x-flv",
        "mov" => "video/quicktime",
        "mkv" => "video/x-matroska",
        "ts" => "video/mp2t",
        "mpeg" | "mpg" => "video/mpeg",
        "3gpp" | "3gp" => "video/3gpp",
        "mp4" | "m4s" => "video/mp4",
        _ => return None,
    };
    Some(mime)
}

/// File name for the download: the quoted `filename` of a
/// `Content-Disposition` header when present, otherwise the last URL path
/// segment (query string excluded).
pub fn file_name_from(content_disposition: Option<&str>, url: &str) -> String {
    if let Some(value) = content_disposition {
        let lower = value.to_lowercase();
        if let Some(rest) = lower.split("filename=\"").nth(1) {
            if let Some(name) = rest.split('"').next() {
                if !name.is_empty() {
                    return name.to_string();
                }
            }
        }
    }

    let path = match url.find('?') {
        Some(query_index) => &url[..query_index],
        None => url,
    };
    match path.rfind('/') {
        Some(slash) => path[slash + 1..].to_string(),
        None => path.to_string(),
    }
}
