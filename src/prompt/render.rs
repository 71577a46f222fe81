//! Prompt Renderer - Render stage prompts with Handlebars
//!
//! Stage templates are registered by name at construction; callers render them
//! with any serializable context.

use handlebars::Handlebars;
use serde::Serialize;

use super::templates::BUILT_IN;
use crate::error::{AgentError, Result};

/// Renders prompt templates using Handlebars templating
pub struct PromptRenderer {
    handlebars: Handlebars<'static>,
}

impl Default for PromptRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl PromptRenderer {
    /// Create a renderer with the built-in stage templates registered
    pub fn new() -> Self {
        let mut renderer = Self::empty();
        for (name, template) in BUILT_IN {
            if let Err(e) = renderer.register_template(name, template) {
                log::error!("built-in prompt {} failed to register: {}", name, e);
            }
        }
        renderer
    }

    /// Create a renderer with no templates registered
    pub fn empty() -> Self {
        let mut handlebars = Handlebars::new();
        handlebars.set_strict_mode(false);
        // Prompts are not HTML
        handlebars.register_escape_fn(handlebars::no_escape);
        Self { handlebars }
    }

    /// Render a template string with any serializable context
    pub fn render_with<T: Serialize>(&self, template: &str, context: &T) -> Result<String> {
        self.handlebars
            .render_template(template, context)
            .map_err(|e| AgentError::InvalidState(format!("Failed to render template: {}", e)))
    }

    /// Register (or replace) a named template
    pub fn register_template(&mut self, name: &str, template: &str) -> Result<()> {
        self.handlebars
            .register_template_string(name, template)
            .map_err(|e| AgentError::InvalidState(format!("Failed to register template '{}': {}", name, e)))
    }

    /// Render a previously registered template
    pub fn render_named<T: Serialize>(&self, name: &str, context: &T) -> Result<String> {
        self.handlebars
            .render(name, context)
            .map_err(|e| AgentError::InvalidState(format!("Failed to render template '{}': {}", name, e)))
    }

    /// Render `<stage>.system` and `<stage>.user`
    pub fn render_stage<T: Serialize>(&self, stage: &str, context: &T) -> Result<(String, String)> {
        let system = self.render_named(&format!("{}.system", stage), context)?;
        let user = self.render_named(&format!("{}.user", stage), context)?;
        Ok((system, user))
    }

    /// Check if a named template is registered
    pub fn has_template(&self, name: &str) -> bool {
        self.handlebars.get_template(name).is_some()
    }
}
