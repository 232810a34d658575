//! Deterministic template generation
//!
//! Templates are keyed by request kind and use `{name}` placeholders filled
//! from the request variables. Unknown placeholders are left as-is.

use std::collections::BTreeMap;

use crate::provider::GenerationRequest;

const FALLBACK_TEMPLATE: &str = "{prompt}";

/// Built-in explanation template
pub const EXPLANATION_TEMPLATE: &str =
    "Recommended because it matches your {traits} profile with {score}% similarity.";

/// Zero-cost text generator
#[derive(Debug, Clone)]
pub struct TemplateGenerator {
    templates: BTreeMap<String, String>,
}

impl Default for TemplateGenerator {
    fn default() -> Self {
        Self::empty().with_template("explanation", EXPLANATION_TEMPLATE)
    }
}

impl TemplateGenerator {
    /// Generator with no registered kinds
    #[must_use]
    pub fn empty() -> Self {
        Self {
            templates: BTreeMap::new(),
        }
    }

    /// Register or replace the template of a kind
    #[must_use]
    pub fn with_template(mut self, kind: impl Into<String>, template: impl Into<String>) -> Self {
        self.templates.insert(kind.into(), template.into());
        self
    }

    /// A template is registered for `kind`
    #[must_use]
    pub fn has_template(&self, kind: &str) -> bool {
        self.templates.contains_key(kind)
    }

    /// Render a request; kinds without a template echo the prompt
    #[must_use]
    pub fn render(&self, request: &GenerationRequest) -> String {
        let template = self
            .templates
            .get(&request.kind)
            .map_or(FALLBACK_TEMPLATE, String::as_str);
        substitute(template, request)
    }
}

fn substitute(template: &str, request: &GenerationRequest) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let Some(close) = after.find('}') else {
            out.push_str(&rest[open..]);
            return out;
        };
        let name = &after[..close];
        match lookup(name, request) {
            Some(value) => out.push_str(value),
            None => {
                out.push('{');
                out.push_str(name);
                out.push('}');
            }
        }
        rest = &after[close + 1..];
    }
    out.push_str(rest);
    out
}

fn lookup<'a>(name: &str, request: &'a GenerationRequest) -> Option<&'a str> {
    if name == "prompt" {
        return Some(request.prompt.as_str());
    }
    request.variables.get(name).map(String::as_str)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substitutes_variables() {
        let generator = TemplateGenerator::default();
        let request = GenerationRequest::new("explanation", "why?")
            .with_variable("traits", "sophisticated, confident")
            .with_variable("score", "87");
        assert_eq!(
            generator.render(&request),
            "Recommended because it matches your sophisticated, confident profile with 87% similarity."
        );
    }

    #[test]
    fn unknown_kind_echoes_prompt() {
        let generator = TemplateGenerator::default();
        let request = GenerationRequest::new("tagline", "A fresh citrus scent");
        assert!(!generator.has_template("tagline"));
        assert_eq!(generator.render(&request), "A fresh citrus scent");
    }

    #[test]
    fn missing_variables_kept_verbatim() {
        let generator = TemplateGenerator::empty().with_template("note", "{a} and {b} {unclosed");
        let request = GenerationRequest::new("note", "").with_variable("a", "x");
        assert_eq!(generator.render(&request), "x and {b} {unclosed");
    }

    #[test]
    fn rendering_is_deterministic() {
        let generator = TemplateGenerator::default();
        let request = GenerationRequest::new("explanation", "").with_variable("traits", "fresh");
        assert_eq!(generator.render(&request), generator.render(&request));
    }
}
