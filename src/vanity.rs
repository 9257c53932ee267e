//! Vanity import page rendering
//!
//! Pages carry the `go-import` and `go-source` meta tags the `go` tool reads,
//! and redirect browsers to the package documentation.

use handlebars::Handlebars;
use serde::Serialize;
use thiserror::Error;

const TEMPLATE_NAME: &str = "vanity";

const DEFAULT_TEMPLATE: &str = r#"<!DOCTYPE html>
<html>
  <head>
    <meta http-equiv="Content-Type" content="text/html; charset=utf-8"/>
    <meta name="go-import" content="{{prefix}} git {{import_url}}">
    <meta name="go-source" content="{{prefix}} {{source_url}} {{source_url}}/tree/HEAD{/dir} {{source_url}}/blob/HEAD{/dir}/{file}#L{line}">
    <meta http-equiv="refresh" content="0; url=https://pkg.go.dev/{{address}}">
  </head>
  <body>
    Nothing to see here; <a href="https://pkg.go.dev/{{address}}">move along</a>.
  </body>
</html>
"#;

/// Errors raised while building or rendering a page.
#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("parsing HTML template: {0}")]
    Parse(#[from] Box<handlebars::TemplateError>),

    #[error("rendering HTML template: {0}")]
    Render(#[from] Box<handlebars::RenderError>),
}

/// Options for [`HtmlGenerator`].
#[derive(Debug, Clone)]
pub struct TemplateOptions {
    /// Custom template source; the built-in page is used when `None`
    pub html_template: Option<String>,
    pub import_url_prefix: String,
    pub source_url_prefix: String,
}

impl Default for TemplateOptions {
    fn default() -> Self {
        Self {
            html_template: None,
            import_url_prefix: "https://github.com".to_string(),
            source_url_prefix: "https://github.com".to_string(),
        }
    }
}

/// Fields available to templates.
#[derive(Debug, Serialize)]
struct PageContext<'a> {
    prefix: &'a str,
    address: &'a str,
    import_url: String,
    source_url: String,
}

/// Renders vanity import pages. Safe for concurrent use.
pub struct HtmlGenerator {
    registry: Handlebars<'static>,
    import_url_prefix: String,
    source_url_prefix: String,
}

impl HtmlGenerator {
    pub fn new(options: TemplateOptions) -> Result<Self, TemplateError> {
        let mut registry = Handlebars::new();
        registry.set_strict_mode(true);
        registry
            .register_template_string(
                TEMPLATE_NAME,
                options.html_template.as_deref().unwrap_or(DEFAULT_TEMPLATE),
            )
            .map_err(Box::new)?;

        Ok(Self {
            registry,
            import_url_prefix: options.import_url_prefix.trim_end_matches('/').to_string(),
            source_url_prefix: options.source_url_prefix.trim_end_matches('/').to_string(),
        })
    }

    /// Render the page for import `prefix`, requested `address` and the
    /// repository's full name.
    pub fn generate(&self, prefix: &str, address: &str, repo: &str) -> Result<String, TemplateError> {
        let context = PageContext {
            prefix: strip_protocol(prefix),
            address: strip_protocol(address),
            import_url: format!("{}/{}", self.import_url_prefix, repo),
            source_url: format!("{}/{}", self.source_url_prefix, repo),
        };

        self.registry
            .render(TEMPLATE_NAME, &context)
            .map_err(|e| TemplateError::from(Box::new(e)))
    }
}

/// Removes the protocol portion of a URL string.
pub fn strip_protocol(url: &str) -> &str {
    match url.find("://") {
        Some(index) => &url[index + 3..],
        None => url,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_protocol() {
        assert_eq!(strip_protocol("https://go.example.com/x"), "go.example.com/x");
        assert_eq!(strip_protocol("go.example.com"), "go.example.com");
        assert_eq!(strip_protocol("http://"), "");
    }

    #[test]
    fn test_default_page() {
        let generator = HtmlGenerator::new(TemplateOptions::default()).unwrap();
        let html = generator
            .generate("https://go.example.com/x", "go.example.com/x/sub", "alice/x")
            .unwrap();

        assert!(html.contains(
            r#"<meta name="go-import" content="go.example.com/x git https://github.com/alice/x">"#
        ));
        assert!(html.contains("https://github.com/alice/x/tree/HEAD{/dir}"));
        assert!(html.contains("url=https://pkg.go.dev/go.example.com/x/sub"));
    }

    #[test]
    fn test_custom_template_and_prefixes() {
        let options = TemplateOptions {
            html_template: Some("{{prefix}}|{{import_url}}|{{source_url}}".to_string()),
            import_url_prefix: "https://ghe.example.com/".to_string(),
            source_url_prefix: "https://src.example.com".to_string(),
        };
        let generator = HtmlGenerator::new(options).unwrap();

        assert_eq!(
            generator.generate("go.example.com/x", "go.example.com/x", "acme/x").unwrap(),
            "go.example.com/x|https://ghe.example.com/acme/x|https://src.example.com/acme/x"
        );
    }

    #[test]
    fn test_invalid_template_is_rejected() {
        let options = TemplateOptions {
            html_template: Some("{{#if prefix}}unterminated".to_string()),
            ..TemplateOptions::default()
        };
        assert!(matches!(HtmlGenerator::new(options), Err(TemplateError::Parse(_))));
    }

    #[test]
    fn test_unknown_field_fails_render() {
        let options = TemplateOptions {
            html_template: Some("{{branch}}".to_string()),
            ..TemplateOptions::default()
        };
        let generator = HtmlGenerator::new(options).unwrap();
        assert!(matches!(
            generator.generate("a", "b", "c/d"),
            Err(TemplateError::Render(_))
        ));
    }
}
