use crate::portal::{Page, PortalResponse, SetupView, StatusView};

pub const HTML_CONTENT_TYPE: &str = "text/html; charset=utf-8";
pub const JSON_CONTENT_TYPE: &str = "application/json; charset=utf-8";

const PAGE_HEAD: &str = r#"<!doctype html>
<html lang="en">
<head>
  <meta charset="utf-8">
  <meta name="viewport" content="width=device-width, initial-scale=1">
  <title>TempLink</title>
  <style>
    body{font-family:Arial,sans-serif;max-width:560px;margin:2rem auto;padding:0 1rem;color:#111}
    h1{margin:0 0 .5rem}.card{border:1px solid #ddd;border-radius:10px;padding:1rem;margin-bottom:1rem}
    label{display:block;margin:.5rem 0 .2rem}
    input[type=text],input[type=password]{width:100%;padding:.5rem;box-sizing:border-box}
    td{padding:.2rem .6rem .2rem 0}.muted{color:#555}.ok{color:#106010}.err{color:#a00000}
    button{padding:.55rem .9rem;margin-top:.8rem}
  </style>
</head>
<body>
"#;

const PAGE_TAIL: &str = "</body>\n</html>\n";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedPage {
    pub status: u16,
    pub content_type: &'static str,
    pub body: String,
}

pub fn render(response: &PortalResponse) -> RenderedPage {
    let (content_type, body) = match &response.page {
        Page::StatusJson(view) => (
            JSON_CONTENT_TYPE,
            serde_json::to_string(view).unwrap_or_else(|_| "{}".to_string()),
        ),
        Page::Setup(view) => (HTML_CONTENT_TYPE, html(&setup_body(view))),
        Page::Status(view) => (HTML_CONTENT_TYPE, html(&status_body(view))),
        Page::Saved { network_name } => (
            HTML_CONTENT_TYPE,
            html(&format!(
                "<h1>Saved</h1>\n<p class=\"ok\">Restarting to join <b>{}</b>.</p>\n\
                 <p class=\"muted\">If the network cannot be joined the setup access point comes back.</p>\n",
                escape_html(network_name)
            )),
        ),
        Page::ResetConfirm => (
            HTML_CONTENT_TYPE,
            html(
                "<h1>Reset Wi-Fi</h1>\n<div class=\"card\">\n\
                 <p>Forget the stored network and return to setup mode?</p>\n\
                 <form method=\"post\" action=\"/confirmreset\"><button type=\"submit\">Reset</button></form>\n\
                 <p><a href=\"/\">Cancel</a></p>\n</div>\n",
            ),
        ),
        Page::ResetAccepted => (
            HTML_CONTENT_TYPE,
            html(
                "<h1>Reset</h1>\n<p class=\"ok\">Credentials cleared. Restarting into setup mode.</p>\n",
            ),
        ),
        Page::Rejected(message) | Page::Failed(message) => (
            HTML_CONTENT_TYPE,
            html(&format!(
                "<h1>Error</h1>\n<p class=\"err\">{}</p>\n<p><a href=\"/\">Back</a></p>\n",
                escape_html(message)
            )),
        ),
    };

    RenderedPage {
        status: response.status,
        content_type,
        body,
    }
}

fn html(body: &str) -> String {
    let mut page = String::with_capacity(PAGE_HEAD.len() + body.len() + PAGE_TAIL.len());
    page.push_str(PAGE_HEAD);
    page.push_str(body);
    page.push_str(PAGE_TAIL);
    page
}

fn setup_body(view: &SetupView) -> String {
    format!(
        r#"<h1>TempLink Setup</h1>
<p class="muted">Device PIN <b>{pin}</b>. Connected through <code>{ap}</code>.</p>
<div class="card">
  <form method="post" action="/save">
    <label for="ssid">Wi-Fi network</label><input id="ssid" name="ssid" type="text" required>
    <label for="password">Password</label><input id="password" name="password" type="password" required>
    <button type="submit">Save and connect</button>
  </form>
</div>
"#,
        pin = view.pin,
        ap = escape_html(&view.access_point),
    )
}

fn status_body(view: &StatusView) -> String {
    let signal = view
        .signal_dbm
        .map(|rssi| format!("{rssi} dBm"))
        .unwrap_or_else(|| "--".to_string());

    let last = match &view.last_outcome {
        Some(outcome) => {
            let class = if outcome.succeeded { "ok" } else { "err" };
            let code = outcome
                .status_code
                .map(|code| code.to_string())
                .unwrap_or_else(|| "no response".to_string());
            format!(
                "<span class=\"{class}\">{}</span> ({code}, {}s ago) <code>{}</code>",
                if outcome.succeeded { "OK" } else { "FAILED" },
                view.last_upload_age_ms.unwrap_or_default() / 1000,
                escape_html(&outcome.body)
            )
        }
        None => "--".to_string(),
    };

    let next = view
        .next_upload_in_ms
        .map(|ms| format!("{}s", ms / 1000))
        .unwrap_or_else(|| "now".to_string());

    format!(
        r#"<h1>TempLink</h1>
<div class="card">
<table>
<tr><td>State</td><td>{state}</td></tr>
<tr><td>PIN</td><td>{pin}</td></tr>
<tr><td>Hostname</td><td>{hostname}</td></tr>
<tr><td>Network</td><td>{network} ({signal})</td></tr>
<tr><td>Uploads</td><td>{uploads}</td></tr>
<tr><td>Last upload</td><td>{last}</td></tr>
<tr><td>Next upload</td><td>{next} (interval {interval}s)</td></tr>
<tr><td>Uptime</td><td>{uptime}s</td></tr>
<tr><td>Build</td><td>{build}</td></tr>
</table>
</div>
<p><a href="/resetwifi">Reset Wi-Fi</a></p>
"#,
        state = view.state,
        pin = view.pin,
        hostname = escape_html(view.hostname.as_deref().unwrap_or("--")),
        network = escape_html(&view.network_name),
        uploads = view.successful_uploads,
        interval = view.active_interval_ms / 1000,
        uptime = view.uptime_ms / 1000,
        build = escape_html(&view.build),
    )
}

fn escape_html(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(ch),
        }
    }
    escaped
}
