//! Responses synthesised when neither the network nor the cache can answer.

use serde_json::json;

use crate::http::{Response, X_SERVED_FROM};

pub const CONTENT_UNAVAILABLE_BODY: &str = "Offline content not available";

/// Self-contained: inline styles and script only, nothing to fetch.
const OFFLINE_PAGE: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>Offline - OpenPIIMap</title>
    <style>
        body {
            font-family: -apple-system, BlinkMacSystemFont, "Segoe UI", Roboto, sans-serif;
            margin: 0;
            min-height: 100vh;
            display: flex;
            align-items: center;
            justify-content: center;
            background: #3b4a8f;
            color: #ffffff;
            text-align: center;
        }
        main { max-width: 26rem; padding: 2rem; }
        h1 { margin-bottom: 0.5rem; }
        p { margin-bottom: 2rem; opacity: 0.85; }
        button {
            font: inherit;
            color: inherit;
            background: rgba(255, 255, 255, 0.2);
            border: 2px solid rgba(255, 255, 255, 0.35);
            border-radius: 0.5rem;
            padding: 0.75rem 1.5rem;
            cursor: pointer;
        }
    </style>
</head>
<body>
    <main>
        <h1>You're Offline</h1>
        <p>This page needs an internet connection. Check your network and try again.</p>
        <button type="button" onclick="window.location.reload()">Try Again</button>
    </main>
    <script>
        window.addEventListener('online', function () {
            window.location.reload();
        });
    </script>
</body>
</html>
"#;

/// Static asset missing from the cache with the network down.
pub fn content_unavailable() -> Response {
    Response::text(503, CONTENT_UNAVAILABLE_BODY)
}

/// Data endpoint missing from the cache with the network down.
pub fn data_unavailable() -> Response {
    let body = json!({
        "error": "Offline mode",
        "message": "This data is not available offline",
        "cached": false,
    });
    Response::json(503, &body).with_header(X_SERVED_FROM, "offline")
}

/// Page navigation missing from the cache with the network down.
pub fn offline_page() -> Response {
    Response::html(200, OFFLINE_PAGE)
}
