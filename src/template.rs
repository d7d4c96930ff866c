//! Render-server page templates.
//!
//! Each framework has an HTML page that loads its runtime and carries three
//! placeholders the request body is injected at.

use std::collections::HashMap;
use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;
use serde::Deserialize;

use crate::framework::FrameworkId;
use crate::{Error, Result};

pub const CONTENT_PLACEHOLDER: &str = "<!-- CONTENT_PLACEHOLDER -->";
pub const SCRIPT_PLACEHOLDER: &str = "// SCRIPT_PLACEHOLDER";
pub const STYLE_PLACEHOLDER: &str = "<!-- STYLE_PLACEHOLDER -->";

static SCRIPT_TAG: OnceLock<Regex> = OnceLock::new();

fn script_tag() -> &'static Regex {
    SCRIPT_TAG.get_or_init(|| Regex::new(r"</?script[^>]*>").expect("SCRIPT_TAG should be valid"))
}

/// Body of a render request; every part is optional
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RenderRequest {
    pub content: Option<String>,
    pub script: Option<String>,
    pub style: Option<String>,
}

fn builtin(framework: FrameworkId) -> &'static str {
    match framework {
        FrameworkId::React => include_str!("../templates/react.html"),
        FrameworkId::Angular => include_str!("../templates/angular.html"),
        FrameworkId::Vue => include_str!("../templates/vue.html"),
        FrameworkId::Vanilla => include_str!("../templates/vanilla.html"),
    }
}

/// Template set, built in or overridden from a directory
#[derive(Debug, Clone, Default)]
pub struct Templates {
    overrides: HashMap<FrameworkId, String>,
}

impl Templates {
    /// Load `<framework>.html` files from `dir`; frameworks without a file keep the built-in page.
    pub fn from_dir(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        if !dir.is_dir() {
            return Err(Error::TemplateError(format!("{} is not a directory", dir.display())));
        }
        let mut overrides = HashMap::new();
        for framework in FrameworkId::ALL {
            let path = dir.join(format!("{}.html", framework));
            if !path.exists() {
                continue;
            }
            let page = std::fs::read_to_string(&path).map_err(|e| {
                Error::TemplateError(format!("Failed to load template for {}: {}", framework, e))
            })?;
            log::debug!("using template {} for {}", path.display(), framework);
            overrides.insert(framework, page);
        }
        Ok(Self { overrides })
    }

    pub fn get(&self, framework: FrameworkId) -> &str {
        self.overrides
            .get(&framework)
            .map(String::as_str)
            .unwrap_or_else(|| builtin(framework))
    }

    /// The page for `framework` with `request` injected.
    pub fn render(&self, framework: FrameworkId, request: &RenderRequest) -> String {
        inject(self.get(framework), request)
    }
}

/// Fill the placeholders of `template`.
///
/// Missing or empty parts leave their placeholder untouched. `<script>` tags
/// in the script are removed since the template already provides one.
pub fn inject(template: &str, request: &RenderRequest) -> String {
    let mut page = template.to_string();
    if let Some(content) = request.content.as_deref().filter(|s| !s.is_empty()) {
        page = page.replacen(CONTENT_PLACEHOLDER, content, 1);
    }
    if let Some(script) = request.script.as_deref().filter(|s| !s.is_empty()) {
        let clean = script_tag().replace_all(script, "");
        page = page.replacen(SCRIPT_PLACEHOLDER, &clean, 1);
    }
    if let Some(style) = request.style.as_deref().filter(|s| !s.is_empty()) {
        page = page.replacen(STYLE_PLACEHOLDER, &format!("<style>{}</style>", style), 1);
    }
    page
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_builtin_has_all_placeholders() {
        for framework in FrameworkId::ALL {
            let page = builtin(framework);
            assert!(page.contains(CONTENT_PLACEHOLDER), "{}", framework);
            assert!(page.contains(SCRIPT_PLACEHOLDER), "{}", framework);
            assert!(page.contains(STYLE_PLACEHOLDER), "{}", framework);
        }
    }

    #[test]
    fn injects_and_strips_script_tags() {
        let request = RenderRequest {
            content: Some("<h1>0</h1>".into()),
            script: Some("<script type=\"module\">let count = 0;</script>".into()),
            style: Some("h1 { color: red; }".into()),
        };
        let page = inject(builtin(FrameworkId::Vanilla), &request);
        assert!(page.contains("<h1>0</h1>"));
        assert!(page.contains("let count = 0;"));
        assert!(!page.contains("type=\"module\""));
        assert!(page.contains("<style>h1 { color: red; }</style>"));
        assert!(!page.contains(CONTENT_PLACEHOLDER));
    }

    #[test]
    fn empty_parts_leave_placeholders() {
        let request = RenderRequest { content: Some(String::new()), ..Default::default() };
        let page = inject(builtin(FrameworkId::Vue), &request);
        assert!(page.contains(CONTENT_PLACEHOLDER));
        assert!(page.contains(SCRIPT_PLACEHOLDER));
    }

    #[test]
    fn directory_overrides_single_framework() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("vue.html"), "<main><!-- CONTENT_PLACEHOLDER --></main>").unwrap();
        let templates = Templates::from_dir(dir.path()).unwrap();

        let request = RenderRequest { content: Some("<p>hi</p>".into()), ..Default::default() };
        assert_eq!(templates.render(FrameworkId::Vue, &request), "<main><p>hi</p></main>");
        assert_eq!(templates.get(FrameworkId::React), builtin(FrameworkId::React));

        assert!(matches!(Templates::from_dir(dir.path().join("missing")), Err(Error::TemplateError(_))));
    }
}
