use include_dir::{include_dir, Dir};
use serde::Serialize;
use std::fs;
use std::path::Path;
use tera::{Context, Error as TeraError, Tera};

/// Prompt templates compiled into the library
static PROMPTS: Dir = include_dir!("$CARGO_MANIFEST_DIR/src/prompts");

/// Render a template such as `"Create a recipe for a {{dishType}}"` against any
/// serializable context. Missing variables are an error.
pub fn load_prompt<T: Serialize>(template: &str, context_data: &T) -> Result<String, TeraError> {
    let mut tera = Tera::default();
    tera.add_raw_template("inline_template", template)?;
    let context = Context::from_serialize(context_data)?;
    let rendered = tera.render("inline_template", &context)?;
    Ok(rendered)
}

/// Render a template read from `template_file` on disk
pub fn load_prompt_file<T: Serialize>(
    template_file: impl AsRef<Path>,
    context_data: &T,
) -> Result<String, TeraError> {
    let template_content = fs::read_to_string(template_file)
        .map_err(|e| TeraError::chain("Failed to read template file", e))?;
    load_prompt(&template_content, context_data)
}

/// Render one of the bundled templates, such as `system.md`
pub fn load_bundled_prompt<T: Serialize>(
    name: &str,
    context_data: &T,
) -> Result<String, TeraError> {
    let template_content = PROMPTS
        .get_file(name)
        .and_then(|file| file.contents_utf8())
        .ok_or_else(|| TeraError::msg(format!("No bundled prompt named '{}'", name)))?;
    load_prompt(template_content, context_data)
}
