//! Application configuration rendering
//!
//! Templates are embedded at compile time and rendered with Tera into a map
//! of absolute remote path to file contents, ready for upload.

use serde::Serialize;
use std::collections::BTreeMap;
use tera::{Context, Tera};

pub const REMOTE_DIR: &str = "/root/cloudcode";

/// (template name, path relative to [`REMOTE_DIR`], source)
const TEMPLATES: &[(&str, &str, &str)] = &[
    ("Caddyfile", "Caddyfile", include_str!("../templates/Caddyfile")),
    ("env", ".env", include_str!("../templates/env")),
    (
        "authelia/configuration.yml",
        "authelia/configuration.yml",
        include_str!("../templates/authelia/configuration.yml"),
    ),
    (
        "authelia/users_database.yml",
        "authelia/users_database.yml",
        include_str!("../templates/authelia/users_database.yml"),
    ),
    (
        "docker-compose.yml",
        "docker-compose.yml",
        include_str!("../templates/docker-compose.yml"),
    ),
];

/// Values substituted into the templates
#[derive(Debug, Clone, Default, Serialize)]
pub struct TemplateData {
    pub domain: String,
    pub username: String,
    pub hashed_password: String,
    pub email: String,
    pub session_secret: String,
    pub storage_encryption_key: String,
    pub openai_api_key: String,
    pub openai_base_url: String,
    pub anthropic_api_key: String,
    pub version: String,
}

/// Render every template, keyed by absolute remote path
pub fn render_all(data: &TemplateData) -> Result<BTreeMap<String, Vec<u8>>, tera::Error> {
    let mut tera = Tera::default();
    tera.autoescape_on(vec![]);
    tera.add_raw_templates(TEMPLATES.iter().map(|(name, _, source)| (*name, *source)))?;

    let context = Context::from_serialize(data)?;

    let mut files = BTreeMap::new();
    for (name, relative, _) in TEMPLATES {
        let rendered = tera.render(name, &context)?;
        files.insert(format!("{}/{}", REMOTE_DIR, relative), rendered.into_bytes());
    }
    tracing::debug!(file_count = files.len(), "Rendered application templates");
    Ok(files)
}
