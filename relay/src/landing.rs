//! The landing page served for `GET /` on the root domain.

use axum::response::Html;

use crate::AppState;

pub fn page(state: &AppState) -> Html<String> {
    Html(format!(
        r#"<!DOCTYPE html>
<html>
<head><title>tunnel relay</title></head>
<body>
<h1>tunnel relay</h1>
<p>Connect a tunnel client to <code>wss://{domain}/tunnel</code>.</p>
<p>Public traffic is routed to <code>https://{{subdomain}}.{domain}</code> or
<code>https://{domain}/t/{{subdomain}}/...</code>.</p>
</body>
</html>"#,
        domain = state.config.domain
    ))
}
