use handlebars::{Context as HbContext, Handlebars, Helper, HelperResult, Output, RenderContext};
use serde_json::Value;
use thiserror::Error;

use crate::context::Context;
use crate::expr::is_truthy;

/// How a template that fails to render resolves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionMode {
    /// Failures are returned as errors.
    Strict,
    /// Failures keep the template text untouched.
    Relaxed,
}

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("template render error: {0}")]
    Render(String),
}

/// Renders paragraph content against the formula context.
pub struct TemplateEngine {
    handlebars: Handlebars<'static>,
    mode: ResolutionMode,
}

impl Default for TemplateEngine {
    fn default() -> Self {
        Self::new(ResolutionMode::Relaxed)
    }
}

impl TemplateEngine {
    pub fn new(mode: ResolutionMode) -> Self {
        let mut handlebars = Handlebars::new();
        register_default_helpers(&mut handlebars);
        handlebars.set_strict_mode(true);
        Self { handlebars, mode }
    }

    pub fn render(&self, template: &str, ctx: &Context) -> Result<String, TemplateError> {
        match self.handlebars.render_template(template, ctx) {
            Ok(rendered) => Ok(rendered),
            Err(err) => match self.mode {
                ResolutionMode::Relaxed => Ok(template.to_owned()),
                ResolutionMode::Strict => Err(TemplateError::Render(err.to_string())),
            },
        }
    }
}

pub fn register_default_helpers(handlebars: &mut Handlebars<'static>) {
    handlebars.register_helper("default", Box::new(helper_default));
    handlebars.register_helper("eq", Box::new(helper_eq));
}

fn helper_default(
    h: &Helper,
    _: &Handlebars,
    _: &HbContext,
    _: &mut RenderContext,
    out: &mut dyn Output,
) -> HelperResult {
    let first = h.param(0).map(|param| param.value());
    let fallback = h.param(1).map(|param| param.value());
    let chosen = match first {
        Some(value) if is_truthy(Some(value)) => value_to_string(value),
        _ => fallback.map(value_to_string).unwrap_or_default(),
    };
    out.write(&chosen)?;
    Ok(())
}

fn helper_eq(
    h: &Helper,
    _: &Handlebars,
    _: &HbContext,
    _: &mut RenderContext,
    out: &mut dyn Output,
) -> HelperResult {
    let left = h.param(0).map(|param| param.value()).unwrap_or(&Value::Null);
    let right = h.param(1).map(|param| param.value()).unwrap_or(&Value::Null);
    out.write(&(left == right).to_string())?;
    Ok(())
}

pub(crate) fn value_to_string(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(text) => text.clone(),
        Value::Bool(flag) => flag.to_string(),
        Value::Number(num) => num.to_string(),
        other => other.to_string(),
    }
}
