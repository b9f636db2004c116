use std::collections::HashMap;
use std::sync::Arc;

use trip_agent_model::ModelTool;

use crate::tool::{AnyTool, Tool, ToolObject};

/// Builder for [`Registry`].
#[derive(Default)]
pub struct RegistryBuilder {
    tools: Vec<Arc<dyn ToolObject>>,
}

impl RegistryBuilder {
    /// Registers a tool.
    #[inline]
    pub fn with_tool<T: Tool>(mut self, tool: T) -> Self {
        self.add_tool(tool);
        self
    }

    /// Registers a tool in place.
    #[inline]
    pub fn add_tool<T: Tool>(&mut self, tool: T) {
        self.tools.push(Arc::new(AnyTool(tool)));
    }

    /// Builds the registry. When two tools share a name, the one registered
    /// last wins.
    pub fn build(self) -> Registry {
        let mut tools = HashMap::with_capacity(self.tools.len());
        for tool in self.tools {
            let name = tool.name().to_owned();
            if tools.contains_key(&name) {
                warn!("tool `{name}` is registered more than once");
            }
            tools.insert(name, tool);
        }
        Registry { tools }
    }
}

/// An immutable set of tools, looked up by their exact name.
#[derive(Clone, Default)]
pub struct Registry {
    tools: HashMap<String, Arc<dyn ToolObject>>,
}

impl Registry {
    /// Creates a builder.
    #[inline]
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    #[inline]
    pub(crate) fn get(&self, name: &str) -> Option<&Arc<dyn ToolObject>> {
        self.tools.get(name)
    }

    /// Returns whether a tool with the given name exists.
    #[inline]
    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Returns the number of tools.
    #[inline]
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Returns whether the registry has no tool.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Returns the tool definitions handed to the model, sorted by name.
    pub fn definitions(&self) -> Vec<ModelTool> {
        let mut definitions: Vec<_> =
            self.tools.values().map(|tool| tool.definition()).collect();
        definitions.sort_by(|a, b| a.name.cmp(&b.name));
        definitions
    }
}

#[cfg(test)]
mod tests {
    use std::future::ready;

    use serde_json::{Value, json};

    use super::*;
    use crate::tool::ToolResult;

    struct NamedTool {
        name: &'static str,
        description: &'static str,
        schema: Value,
    }

    impl NamedTool {
        fn new(name: &'static str, description: &'static str) -> Self {
            Self {
                name,
                description,
                schema: json!({ "type": "object" }),
            }
        }
    }

    impl Tool for NamedTool {
        type Input = Value;

        fn name(&self) -> &str {
            self.name
        }

        fn description(&self) -> &str {
            self.description
        }

        fn parameter_schema(&self) -> &Value {
            &self.schema
        }

        fn execute(
            &self,
            _input: Self::Input,
        ) -> impl Future<Output = ToolResult> + Send + 'static {
            ready(Ok(Value::Null))
        }
    }

    #[test]
    fn test_lookup_is_case_sensitive() {
        let registry = Registry::builder()
            .with_tool(NamedTool::new("hotels_finder", "Finds hotels."))
            .with_tool(NamedTool::new("flights_finder", "Finds flights."))
            .build();
        assert_eq!(registry.len(), 2);
        assert!(registry.contains("hotels_finder"));
        assert!(!registry.contains("Hotels_Finder"));

        let names: Vec<_> = registry
            .definitions()
            .into_iter()
            .map(|tool| tool.name)
            .collect();
        assert_eq!(names, vec!["flights_finder", "hotels_finder"]);
    }

    #[test]
    fn test_duplicate_name_keeps_last() {
        let registry = Registry::builder()
            .with_tool(NamedTool::new("hotels_finder", "first"))
            .with_tool(NamedTool::new("hotels_finder", "second"))
            .build();
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.definitions()[0].description, "second");
    }
}
