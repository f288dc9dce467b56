//! HTML pages rendered by the endpoints

/// Escape text for use in HTML element content and attribute values.
pub fn html_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#039;"),
            c => out.push(c),
        }
    }
    out
}

fn page(title: &str, head: &str, body: &str) -> String {
    format!(
        "<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n<title>{}</title>\n{}</head>\n<body>\n{}</body>\n</html>\n",
        html_escape(title),
        head,
        body
    )
}

/// Body of the 401 Negotiate challenge.
///
/// Browsers that cannot answer the challenge render this page and are
/// sent on to the fallback endpoint. `retry_url` restarts negotiation.
pub fn negotiate_challenge(backend_url: &str, retry_url: &str) -> String {
    let backend = html_escape(backend_url);
    let retry = html_escape(retry_url);
    page(
        "Redirecting",
        &format!("<meta http-equiv=\"refresh\" content=\"0;URL='{}'\">\n", backend),
        &format!(
            "<p>Kerberos login was not possible. <a href=\"{}\">Continue to the login page</a>.</p>\n\
             <p><a href=\"{}\">Try Kerberos again</a></p>\n",
            backend, retry
        ),
    )
}

/// Confirmation after `/negotiate/enable`.
pub fn enabled(disable_url: &str) -> String {
    page(
        "Kerberos login enabled",
        "",
        &format!(
            "<h1>Kerberos login enabled</h1>\n\
             <p>Automatic login with Kerberos is enabled for this browser.</p>\n\
             <p><a href=\"{}\">Disable automatic login</a></p>\n",
            html_escape(disable_url)
        ),
    )
}

/// Confirmation after `/negotiate/disable`.
pub fn disabled(enable_url: &str) -> String {
    page(
        "Kerberos login disabled",
        "",
        &format!(
            "<h1>Kerberos login disabled</h1>\n\
             <p>Automatic login with Kerberos is disabled for this browser.</p>\n\
             <p><a href=\"{}\">Enable automatic login</a></p>\n",
            html_escape(enable_url)
        ),
    )
}

pub fn logged_out() -> String {
    page("Logged out", "", "<h1>You have been logged out</h1>\n")
}
