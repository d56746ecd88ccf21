//! Server-rendered intake form
//!
//! `GET /intake/{slug}` shows the form for one organization, `POST` stores
//! the submission through the same path as the JSON endpoint.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Html;
use axum::routing::get;
use axum::{Form, Router};
use diligence_tenant::CompanyStage;
use serde::Deserialize;

use crate::error::ApiError;
use crate::middleware::rate_limit::ClientKey;
use crate::routes::submissions::{submit, IntakeForm};
use crate::ApiState;

type Page = (StatusCode, Html<String>);

const STAGES: [(&str, &str); 6] = [
    ("pre_seed", "Pre-seed"),
    ("seed", "Seed"),
    ("series_a", "Series A"),
    ("series_b", "Series B"),
    ("series_c", "Series C"),
    ("growth", "Growth"),
];

pub fn router() -> Router<Arc<ApiState>> {
    Router::new().route("/:slug", get(show_form).post(submit_form))
}

/// Browser form fields; every input arrives as text
#[derive(Debug, Clone, Default, Deserialize)]
pub struct IntakeFields {
    #[serde(default)]
    pub company_name: String,
    #[serde(default)]
    pub founder_name: String,
    #[serde(default)]
    pub founder_email: String,
    #[serde(default)]
    pub website: String,
    #[serde(default)]
    pub pitch: String,
    #[serde(default)]
    pub stage: String,
}

impl IntakeFields {
    fn into_form(self, slug: &str) -> Result<IntakeForm, ApiError> {
        let stage = match self.stage.trim() {
            "" => None,
            raw => Some(
                serde_json::from_value::<CompanyStage>(serde_json::Value::String(raw.to_string()))
                    .map_err(|_| ApiError::bad_request("Unknown stage"))?,
            ),
        };
        Ok(IntakeForm {
            org_slug: slug.to_string(),
            company_name: self.company_name,
            founder_name: self.founder_name,
            founder_email: self.founder_email,
            website: Some(self.website),
            pitch: Some(self.pitch),
            stage,
        })
    }
}

fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#x27;")
}

fn layout(title: &str, body: &str) -> String {
    let title = html_escape(title);
    format!(
        r##"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1">
<title>{title}</title>
</head>
<body>
<main class="intake">
{body}
</main>
</body>
</html>"##
    )
}

fn render_form(org_name: &str, slug: &str, fields: &IntakeFields, error: Option<&str>) -> String {
    let org = html_escape(org_name);
    let slug = html_escape(slug);
    let error = error
        .map(|e| format!(r#"<p class="error" role="alert">{}</p>"#, html_escape(e)))
        .unwrap_or_default();
    let options: String = STAGES
        .iter()
        .map(|(value, label)| {
            let selected = if fields.stage == *value { " selected" } else { "" };
            format!(r#"<option value="{value}"{selected}>{label}</option>"#)
        })
        .collect();

    let body = format!(
        r##"<h1>Pitch {org}</h1>
{error}
<form method="post" action="/intake/{slug}">
  <label>Company name <input name="company_name" required maxlength="200" value="{company}"></label>
  <label>Your name <input name="founder_name" required maxlength="200" value="{founder}"></label>
  <label>Email <input name="founder_email" type="email" required value="{email}"></label>
  <label>Website <input name="website" type="url" value="{website}"></label>
  <label>Stage <select name="stage"><option value="">Select a stage</option>{options}</select></label>
  <label>Pitch <textarea name="pitch" maxlength="5000">{pitch}</textarea></label>
  <button type="submit">Submit</button>
</form>"##,
        company = html_escape(&fields.company_name),
        founder = html_escape(&fields.founder_name),
        email = html_escape(&fields.founder_email),
        website = html_escape(&fields.website),
        pitch = html_escape(&fields.pitch),
    );
    layout(&format!("Submit your company to {org_name}"), &body)
}

fn render_message(status: StatusCode, title: &str, message: &str) -> Page {
    let body = format!("<h1>{}</h1>\n<p>{}</p>", html_escape(title), html_escape(message));
    (status, Html(layout(title, &body)))
}

fn not_found() -> Page {
    render_message(StatusCode::NOT_FOUND, "Not found", "This intake form does not exist.")
}

async fn show_form(State(state): State<Arc<ApiState>>, Path(slug): Path<String>) -> Page {
    match state.store.find_organization_by_slug(&slug).await {
        Ok(Some(org)) => (
            StatusCode::OK,
            Html(render_form(&org.name, &org.slug, &IntakeFields::default(), None)),
        ),
        Ok(None) => not_found(),
        Err(e) => {
            tracing::error!(%slug, error = %e, "intake form lookup failed");
            render_message(StatusCode::INTERNAL_SERVER_ERROR, "Something went wrong", "Please try again later.")
        }
    }
}

async fn submit_form(
    State(state): State<Arc<ApiState>>,
    Path(slug): Path<String>,
    ClientKey(client): ClientKey,
    Form(fields): Form<IntakeFields>,
) -> Page {
    let org = match state.store.find_organization_by_slug(&slug).await {
        Ok(Some(org)) => org,
        Ok(None) => return not_found(),
        Err(e) => {
            tracing::error!(%slug, error = %e, "intake form lookup failed");
            return render_message(StatusCode::INTERNAL_SERVER_ERROR, "Something went wrong", "Please try again later.");
        }
    };

    let result = match fields.clone().into_form(&org.slug) {
        Ok(form) => submit(&state, &client, &org.slug, form).await,
        Err(e) => Err(e),
    };

    match result {
        Ok(submission) => render_message(
            StatusCode::CREATED,
            "Thank you",
            &format!(
                "{} has received your submission for {}. The team will be in touch.",
                org.name, submission.company_name
            ),
        ),
        Err(ApiError::BadRequest(msg)) => (
            StatusCode::BAD_REQUEST,
            Html(render_form(&org.name, &org.slug, &fields, Some(&msg))),
        ),
        Err(ApiError::RateLimited) => render_message(
            StatusCode::TOO_MANY_REQUESTS,
            "Slow down",
            "Too many submissions from your network. Please try again in a minute.",
        ),
        Err(ApiError::NotFound) => not_found(),
        Err(e) => {
            tracing::error!(%slug, error = ?e, "intake submission failed");
            render_message(StatusCode::INTERNAL_SERVER_ERROR, "Something went wrong", "Please try again later.")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escapes_user_input() {
        let fields = IntakeFields {
            company_name: "<script>alert('x')</script>".into(),
            ..Default::default()
        };
        let html = render_form("A & B Capital", "ab", &fields, Some("bad \"input\""));
        assert!(html.contains("A &amp; B Capital"));
        assert!(html.contains("&lt;script&gt;alert(&#x27;x&#x27;)&lt;/script&gt;"));
        assert!(html.contains("bad &quot;input&quot;"));
        assert!(!html.contains("<script>"));
    }

    #[test]
    fn test_stage_parsing() {
        let fields = IntakeFields {
            stage: "series_a".into(),
            ..Default::default()
        };
        assert_eq!(fields.into_form("acme").unwrap().stage, Some(CompanyStage::SeriesA));

        let blank = IntakeFields::default().into_form("acme").unwrap();
        assert_eq!(blank.stage, None);
        assert_eq!(blank.org_slug, "acme");

        let bad = IntakeFields {
            stage: "ipo".into(),
            ..Default::default()
        };
        assert!(bad.into_form("acme").is_err());
    }

    #[test]
    fn test_selected_stage_survives_rerender() {
        let fields = IntakeFields {
            stage: "seed".into(),
            ..Default::default()
        };
        let html = render_form("Fund", "fund", &fields, None);
        assert!(html.contains(r#"<option value="seed" selected>Seed</option>"#));
    }
}
