//! HTML pages for the browser flow.
//!
//! Three small server-rendered pages: the landing page, the post-callback
//! page exposing the session id (auto-copied, with ready-to-paste commands),
//! and the team-selection page. The selection form submits JSON via `fetch`
//! and swaps in the returned document.

const STYLE: &str = r"
    body { font-family: Arial, sans-serif; margin: 40px; background: #f8f9fa; }
    .container { max-width: 700px; margin: 0 auto; background: white; padding: 30px;
                 border-radius: 8px; box-shadow: 0 2px 10px rgba(0,0,0,0.1); }
    .info { background: #e7f3ff; padding: 20px; border-radius: 8px; margin: 20px 0; }
    .session-box { background: #fff3cd; padding: 15px; border-radius: 8px; margin: 15px 0; }
    .mono { font-family: monospace; word-break: break-all; }
    .button { background: #007cba; color: white; border: none; padding: 10px 20px;
              border-radius: 4px; cursor: pointer; text-decoration: none; }
    .command-box { background: #2d3748; color: #e2e8f0; padding: 15px; border-radius: 8px;
                   margin: 10px 0; font-family: monospace; overflow-x: auto; }
    .team-option { margin: 12px 0; padding: 12px; border: 2px solid #dee2e6;
                   border-radius: 8px; }
";

/// Minimal HTML entity escaping for interpolated values.
fn escape(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn document(title: &str, body: &str) -> String {
    format!(
        "<!DOCTYPE html>\n<html>\n<head>\n<title>{title}</title>\n<style>{STYLE}</style>\n\
         </head>\n<body>\n<div class=\"container\">\n{body}\n</div>\n</body>\n</html>\n"
    )
}

/// Landing page with the login link and the CLI bootstrap hint.
#[must_use]
pub fn home_page() -> String {
    document(
        "Vault Auth Broker",
        r#"<h1>Vault Auth Broker</h1>
<div class="info">
  <p>Sign in with your identity provider to obtain a short-lived,
     team-scoped Vault token. Your group memberships decide which team
     contexts you can act as.</p>
</div>
<h2>Browser</h2>
<p><a href="/auth/login" class="button">Login</a></p>
<h2>CLI</h2>
<div class="command-box">curl -X POST http://localhost:8081/cli/start</div>
<p>Open the returned <code>auth_url</code> in a browser, then exchange the
   <code>session_id</code> at <code>/exchange</code>.</p>"#,
    )
}

/// Post-authentication page: shows the session id and exchange commands.
#[must_use]
pub fn callback_page(session_id: &str) -> String {
    let sid = escape(session_id);
    let body = format!(
        r#"<h1>Authentication successful</h1>
<div class="session-box">
  <p><strong>Your session id:</strong></p>
  <p class="mono"><span id="sessionId">{sid}</span>
     <button class="button" onclick="copyText('sessionId', this)">Copy</button></p>
</div>
<div class="info">
  <p><strong>Exchange it for a Vault token:</strong></p>
  <div class="command-box">curl -X POST http://localhost:8081/exchange \
  -H "Content-Type: application/json" \
  -d '{{"session_id": "{sid}", "pipeline": "my-pipeline", "repo": "my-repo", "target": "my-target"}}'</div>
  <p>Or with the CLI helper:</p>
  <div class="command-box">bazel-auth --session-id {sid}</div>
</div>
<p><a href="/">&larr; Back</a></p>
<script>
function copyText(id, btn) {{
  const text = document.getElementById(id).textContent;
  navigator.clipboard.writeText(text).then(() => {{
    btn.textContent = 'Copied!';
    setTimeout(() => {{ btn.textContent = 'Copy'; }}, 2000);
  }});
}}
window.addEventListener('load', () => {{
  navigator.clipboard.writeText(document.getElementById('sessionId').textContent)
    .catch(() => {{}});
}});
</script>"#
    );
    document("Authentication Successful", &body)
}

/// Team-selection page for users in more than one team.
#[must_use]
pub fn select_team_page(session_id: &str, email: &str, teams: &[String]) -> String {
    let sid = escape(session_id);
    let options: String = teams
        .iter()
        .map(|team| {
            let t = escape(team);
            format!(
                "<div class=\"team-option\"><label>\
                 <input type=\"radio\" name=\"team\" value=\"{t}\"> {t}</label></div>\n"
            )
        })
        .collect();

    let body = format!(
        r#"<h1>Select team context</h1>
<div class="info">
  <p><strong>{email}</strong>, you belong to multiple teams. Pick the team
     context for this session; the Vault token will be scoped to it alone.</p>
</div>
<form id="teamForm">
{options}
<button type="submit" class="button">Continue</button>
</form>
<script>
document.getElementById('teamForm').addEventListener('submit', async (ev) => {{
  ev.preventDefault();
  const team = new FormData(ev.target).get('team');
  if (!team) return;
  const resp = await fetch('/auth/select-team', {{
    method: 'POST',
    headers: {{'Content-Type': 'application/json'}},
    body: JSON.stringify({{session_id: '{sid}', team: team}}),
  }});
  document.open();
  document.write(await resp.text());
  document.close();
}});
</script>"#,
        email = escape(email),
    );
    document("Select Team Context", &body)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn callback_page_exposes_the_session_id() {
        let html = callback_page("sess_abc123");
        assert!(html.contains("sess_abc123"));
        assert!(html.contains("/exchange"));
        assert!(html.contains("clipboard"));
    }

    #[test]
    fn select_team_page_lists_every_candidate() {
        let teams = vec!["mobile-team".to_string(), "backend-team".to_string()];
        let html = select_team_page("sess_abc", "alice@ex.com", &teams);
        assert!(html.contains("mobile-team"));
        assert!(html.contains("backend-team"));
        assert!(html.contains("alice@ex.com"));
        assert!(html.contains("/auth/select-team"));
    }

    #[test]
    fn interpolated_values_are_escaped() {
        let html = select_team_page("sess_abc", "<script>alert(1)</script>", &[]);
        assert!(!html.contains("<script>alert"));
        assert!(html.contains("&lt;script&gt;"));
    }

    #[test]
    fn home_page_links_both_flows() {
        let html = home_page();
        assert!(html.contains("/auth/login"));
        assert!(html.contains("/cli/start"));
    }
}
