//! Bounded rendering of user-authored templates.
//!
//! Every template in a rule type (endpoints, bodies, file paths, file
//! contents, patch fragments) is expanded through [`render_bounded`], which
//! stops writing once the output budget is exhausted instead of trusting the
//! template engine to terminate on its own.

use std::io::{self, Write};

use handlebars::Handlebars;
use serde::Serialize;
use serde_json::{json, Value};

use crate::errors::TemplateError;
use crate::models::Entity;

/// Byte budget for HTTP method templates.
pub const MAX_METHOD_BYTES: usize = 10;
/// Byte budget for endpoint templates.
pub const MAX_ENDPOINT_BYTES: usize = 1024;
/// Byte budget for request/patch body templates.
pub const MAX_BODY_BYTES: usize = 5120;
/// Byte budget for file-content templates.
pub const MAX_CONTENT_BYTES: usize = 5120;
/// Byte budget for file-path templates.
pub const MAX_PATH_BYTES: usize = 200;
/// Byte budget for PR title templates.
pub const MAX_TITLE_BYTES: usize = 1024;

/// `io::Write` adapter that refuses to grow past a byte budget.
struct BoundedWriter {
    buf: Vec<u8>,
    limit: usize,
    overflowed: bool,
}

impl BoundedWriter {
    fn new(limit: usize) -> Self {
        Self {
            buf: Vec::new(),
            limit,
            overflowed: false,
        }
    }
}

impl Write for BoundedWriter {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        if self.buf.len() + data.len() > self.limit {
            self.overflowed = true;
            return Err(io::Error::other("output budget exhausted"));
        }
        self.buf.extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Render `template` against `data`, failing if the output exceeds `limit`
/// bytes.
pub fn render_bounded<T: Serialize>(
    template: &str,
    data: &T,
    limit: usize,
) -> Result<String, TemplateError> {
    let mut engine = Handlebars::new();
    engine.set_strict_mode(false);

    let mut writer = BoundedWriter::new(limit);
    match engine.render_template_to_write(template, data, &mut writer) {
        // The engine only writes &str fragments, so the buffer is UTF-8.
        Ok(()) => Ok(String::from_utf8_lossy(&writer.buf).into_owned()),
        Err(_) if writer.overflowed => Err(TemplateError::TooLarge { limit }),
        Err(e) => Err(TemplateError::Render(Box::new(e))),
    }
}

/// Build the template scope shared by all actions:
/// `{ entity, profile, params, eval_result_output }`.
///
/// `profile` is the rule's definition as declared in the profile, `params`
/// the per-instance parameters.
#[must_use]
pub fn action_scope(
    entity: &Entity,
    def: &Value,
    params: &Value,
    eval_output: Option<&Value>,
) -> Value {
    json!({
        "entity": entity,
        "profile": def,
        "params": params,
        "eval_result_output": eval_output.cloned().unwrap_or(Value::Null),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Repository;

    fn repo_entity() -> Entity {
        Entity::Repository(Repository {
            owner: "stacklok".to_string(),
            name: "minder".to_string(),
            default_branch: "main".to_string(),
            is_private: false,
        })
    }

    #[test]
    fn renders_action_scope_fields() {
        let scope = action_scope(
            &repo_entity(),
            &json!({"package_ecosystem": "gomod"}),
            &json!({"branch": "main"}),
            None,
        );
        let out = render_bounded(
            "/repos/{{entity.owner}}/{{entity.name}}/x/{{profile.package_ecosystem}}/{{params.branch}}",
            &scope,
            MAX_ENDPOINT_BYTES,
        )
        .unwrap();
        assert_eq!(out, "/repos/stacklok/minder/x/gomod/main");
    }

    #[test]
    fn overflow_fails_with_bounded_length_error() {
        let scope = json!({"filler": "x".repeat(64)});
        let template = "{{filler}}".repeat(20);
        let err = render_bounded(&template, &scope, 1024).unwrap_err();
        assert!(matches!(err, TemplateError::TooLarge { limit: 1024 }));
    }

    #[test]
    fn output_at_exact_limit_is_allowed() {
        let scope = json!({"v": "abcd"});
        let out = render_bounded("{{v}}", &scope, 4).unwrap();
        assert_eq!(out, "abcd");
    }

    #[test]
    fn missing_variables_render_empty() {
        let out = render_bounded("x{{nope}}y", &json!({}), 16).unwrap();
        assert_eq!(out, "xy");
    }
}
