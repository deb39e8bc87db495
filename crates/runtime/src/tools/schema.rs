//! Parameter schemas and positional argument binding.

use std::collections::BTreeMap;

use serde_json::Value;
use tracing::debug;

use crate::{Error, Result};

/// Named arguments passed to a tool, as literal strings.
pub type Arguments = BTreeMap<String, String>;

/// A declared tool parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Param {
    pub name: String,
    pub required: bool,
}

/// Ordered parameter list of a tool. An empty schema means the tool takes
/// no arguments.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Schema {
    params: Vec<Param>,
    required: Vec<String>,
}

impl Schema {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Append a required parameter.
    pub fn required(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        self.required.push(name.clone());
        self.params.push(Param { name, required: true });
        self
    }

    /// Append an optional parameter.
    pub fn optional(mut self, name: impl Into<String>) -> Self {
        self.params.push(Param {
            name: name.into(),
            required: false,
        });
        self
    }

    /// Read a JSON Schema `object` definition: parameter order follows the
    /// order of `properties`, and `required` names are kept even when they
    /// have no matching property.
    pub fn from_json_schema(schema: &Value) -> Self {
        let required: Vec<String> = schema
            .get("required")
            .and_then(Value::as_array)
            .map(|names| {
                names
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        let params = schema
            .get("properties")
            .and_then(Value::as_object)
            .map(|props| {
                props
                    .keys()
                    .map(|name| Param {
                        name: name.clone(),
                        required: required.contains(name),
                    })
                    .collect()
            })
            .unwrap_or_default();

        Self { params, required }
    }

    pub fn params(&self) -> &[Param] {
        &self.params
    }

    pub fn required_names(&self) -> impl Iterator<Item = &str> {
        self.required.iter().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty() && self.required.is_empty()
    }

    /// Assign `args[i]` to the i-th declared parameter. Fewer arguments than
    /// parameters is fine; every required name must still end up bound.
    /// Positions past the last parameter are dropped. Values are passed
    /// through untouched.
    pub fn bind(&self, tool: &str, args: &[String]) -> Result<Arguments> {
        if args.len() > self.params.len() {
            debug!(
                tool,
                expected = self.params.len(),
                got = args.len(),
                "ignoring surplus positional arguments"
            );
        }

        let bound: Arguments = self
            .params
            .iter()
            .zip(args)
            .map(|(param, value)| (param.name.clone(), value.clone()))
            .collect();

        if let Some(missing) = self.required.iter().find(|name| !bound.contains_key(*name)) {
            return Err(Error::Binding {
                tool: tool.to_string(),
                reason: format!("missing required argument '{missing}'"),
            });
        }

        Ok(bound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn args(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    fn issue_schema() -> Schema {
        Schema::from_json_schema(&json!({
            "type": "object",
            "properties": {
                "project": {"type": "string"},
                "status": {"type": "string"},
                "limit": {"type": "integer"}
            },
            "required": ["project"]
        }))
    }

    #[test]
    fn json_schema_keeps_property_order() {
        let schema = issue_schema();
        let names: Vec<_> = schema.params().iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, ["project", "status", "limit"]);
        assert!(schema.params()[0].required);
        assert!(!schema.params()[2].required);
    }

    #[test]
    fn binds_positions_in_declared_order() {
        let bound = issue_schema().bind("search", &args(&["PROJ", "open"])).unwrap();
        assert_eq!(bound.len(), 2);
        assert_eq!(bound["project"], "PROJ");
        assert_eq!(bound["status"], "open");
        assert!(!bound.contains_key("limit"));
    }

    #[test]
    fn values_are_not_coerced() {
        let bound = issue_schema().bind("search", &args(&["PROJ", "", "10"])).unwrap();
        assert_eq!(bound["status"], "");
        assert_eq!(bound["limit"], "10");
    }

    #[test]
    fn missing_required_argument_is_named() {
        let err = issue_schema().bind("search", &[]).unwrap_err();
        assert!(err.to_string().contains("'project'"), "{err}");
        assert!(matches!(err, Error::Binding { .. }));
    }

    #[test]
    fn required_name_without_property_always_fails() {
        let schema = Schema::from_json_schema(&json!({"properties": {}, "required": ["key"]}));
        assert!(schema.bind("t", &[]).is_err());
    }

    #[test]
    fn surplus_arguments_are_dropped() {
        assert!(Schema::empty().bind("ping", &args(&["now"])).unwrap().is_empty());

        let bound = issue_schema()
            .bind("search", &args(&["PROJ", "open", "5", "extra"]))
            .unwrap();
        assert_eq!(bound.len(), 3);
        assert_eq!(bound["limit"], "5");
    }

    #[test]
    fn binding_is_repeatable() {
        let schema = issue_schema();
        let input = args(&["PROJ", "open", "5"]);
        assert_eq!(
            schema.bind("search", &input).unwrap(),
            schema.bind("search", &input).unwrap()
        );
        assert_eq!(
            schema.bind("search", &[]).unwrap_err().to_string(),
            schema.bind("search", &[]).unwrap_err().to_string()
        );
    }

    #[test]
    fn builder_matches_json_form() {
        let built = Schema::empty().required("project").optional("status").optional("limit");
        assert_eq!(built, issue_schema());
    }

    #[test]
    fn empty_schema_binds_nothing() {
        assert!(Schema::empty().bind("ping", &[]).unwrap().is_empty());
        assert!(Schema::from_json_schema(&json!({})).is_empty());
    }
}
