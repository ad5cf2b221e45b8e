//! The Rhino plug-in functions exposed as MCP tools.
//!
//! Tools carry no behaviour of their own: a call is forwarded to the plug-in
//! as `{function, arguments}` and the plug-in's result is returned verbatim.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// One documented argument of a tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ToolParam {
    /// Argument name as the plug-in reads it.
    pub name: &'static str,
    /// JSON Schema type.
    pub kind: &'static str,
    /// Summary shown to the assistant.
    pub description: &'static str,
}

const fn param(name: &'static str, kind: &'static str, description: &'static str) -> ToolParam {
    ToolParam {
        name,
        kind,
        description,
    }
}

/// One plug-in function exposed as a tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RhinoTool {
    /// MCP tool name.
    pub name: &'static str,
    /// Function name understood by the plug-in.
    pub function: &'static str,
    /// Summary shown to the assistant.
    pub description: &'static str,
    /// Documented arguments. None of them is required.
    pub params: &'static [ToolParam],
}

impl RhinoTool {
    const fn new(
        name: &'static str,
        function: &'static str,
        description: &'static str,
        params: &'static [ToolParam],
    ) -> Self {
        Self {
            name,
            function,
            description,
            params,
        }
    }

    /// The `tools/list` entry for this tool.
    ///
    /// Arguments beyond the documented ones are still forwarded.
    #[must_use]
    pub fn definition(&self) -> ToolDefinition {
        let properties: Map<String, Value> = self
            .params
            .iter()
            .map(|p| {
                let schema = json!({ "type": p.kind, "description": p.description });
                (p.name.to_string(), schema)
            })
            .collect();

        ToolDefinition {
            name: self.name.to_string(),
            description: Some(self.description.to_string()),
            input_schema: json!({
                "type": "object",
                "properties": properties,
                "additionalProperties": true,
            }),
        }
    }
}

const OBJECT_REF: [ToolParam; 2] = [
    param("id", "string", "Object GUID"),
    param("name", "string", "Object name, used when no id is given"),
];

const LAYER_REF: [ToolParam; 2] = [
    param("guid", "string", "Layer GUID"),
    param("name", "string", "Layer name, used when no guid is given"),
];

const TRANSLATION: ToolParam = param("translation", "array", "[x, y, z] offset");
const ROTATION: ToolParam = param("rotation", "array", "[x, y, z] rotation in radians");
const SCALE: ToolParam = param("scale", "array", "[x, y, z] scale factors");

const CREATE_LAYER: &[ToolParam] = &[
    param("name", "string", "Layer name"),
    param("color", "array", "[r, g, b] components, 0-255"),
    param("parent", "string", "Name of the parent layer"),
];

const CREATE_OBJECT: &[ToolParam] = &[
    param("type", "string", "Object type, e.g. POINT, LINE, BOX, SPHERE"),
    param("name", "string", "Object name"),
    param("color", "array", "[r, g, b] components, 0-255"),
    param("params", "object", "Type-specific geometry parameters"),
    TRANSLATION,
    ROTATION,
    SCALE,
];

const DELETE_OBJECT: &[ToolParam] = &[
    OBJECT_REF[0],
    OBJECT_REF[1],
    param("all", "boolean", "Delete every object in the document"),
];

const SELECTED_INFO: &[ToolParam] = &[param(
    "include_attributes",
    "boolean",
    "Include user attributes of each object",
)];

const MODIFY_OBJECT: &[ToolParam] = &[
    OBJECT_REF[0],
    OBJECT_REF[1],
    param("new_name", "string", "New object name"),
    param("new_color", "array", "New [r, g, b] color"),
    TRANSLATION,
    ROTATION,
    SCALE,
    param("visible", "boolean", "Show or hide the object"),
];

const MODIFY_OBJECTS: &[ToolParam] = &[
    param("objects", "array", "modify_object argument sets, one per object"),
    param("all", "boolean", "Apply the first argument set to every object"),
];

const SELECT_OBJECTS: &[ToolParam] = &[
    param("filters", "object", "Filter name to accepted values"),
    param("filters_type", "string", "\"and\" or \"or\""),
];

const EXECUTE_SCRIPT: &[ToolParam] = &[param("code", "string", "Python source to run")];

/// Every function the Rhino plug-in dispatches.
pub const RHINO_TOOLS: [RhinoTool; 13] = [
    RhinoTool::new(
        "create_layer",
        "createLayer",
        "Create a layer in the active Rhino document (name, color, parent).",
        CREATE_LAYER,
    ),
    RhinoTool::new(
        "create_object",
        "createObject",
        "Create one object (point, line, polyline, circle, arc, ellipse, curve, box, sphere, cone, cylinder, surface) with optional name, color and transform.",
        CREATE_OBJECT,
    ),
    RhinoTool::new(
        "create_objects",
        "createObjects",
        "Create several objects in one call; keys are object names, values are createObject arguments.",
        &[],
    ),
    RhinoTool::new(
        "delete_layer",
        "deleteLayer",
        "Delete a layer by guid or name.",
        &LAYER_REF,
    ),
    RhinoTool::new(
        "delete_object",
        "deleteObject",
        "Delete an object by id or name, or every object with `all: true`.",
        DELETE_OBJECT,
    ),
    RhinoTool::new(
        "get_document_info",
        "getDocumentInfo",
        "Summarise the active document: metadata, layers and objects.",
        &[],
    ),
    RhinoTool::new(
        "get_object_info",
        "getObjectInfo",
        "Describe one object by id or name.",
        &OBJECT_REF,
    ),
    RhinoTool::new(
        "get_selected_objects_info",
        "getSelectedObjectsInfo",
        "Describe the currently selected objects.",
        SELECTED_INFO,
    ),
    RhinoTool::new(
        "get_or_set_current_layer",
        "getOrSetCurrentLayer",
        "Return the current layer, or switch to the layer given by guid or name.",
        &LAYER_REF,
    ),
    RhinoTool::new(
        "modify_object",
        "modifyObject",
        "Rename, recolor, move, rotate or scale one object by id or name.",
        MODIFY_OBJECT,
    ),
    RhinoTool::new(
        "modify_objects",
        "modifyObjects",
        "Apply modifyObject arguments to several objects, or to all with `all: true`.",
        MODIFY_OBJECTS,
    ),
    RhinoTool::new(
        "select_objects",
        "selectObjects",
        "Select objects matching name, color or category filters.",
        SELECT_OBJECTS,
    ),
    RhinoTool::new(
        "execute_rhinoscript_python_code",
        "executeRhinoscript",
        "Run RhinoScript Python code inside Rhino and return its printed output.",
        EXECUTE_SCRIPT,
    ),
];

/// Looks up a tool by MCP name or plug-in function name.
#[must_use]
pub fn find_tool(name: &str) -> Option<&'static RhinoTool> {
    RHINO_TOOLS
        .iter()
        .find(|tool| tool.name == name || tool.function.eq_ignore_ascii_case(name))
}

/// A `tools/list` entry.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDefinition {
    /// Tool name.
    pub name: String,
    /// Summary shown to the assistant.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// JSON Schema of the arguments.
    pub input_schema: Value,
}

/// Parameters of `tools/call`.
#[derive(Debug, Clone, Deserialize)]
pub struct ToolCallParams {
    /// Tool to invoke.
    pub name: String,
    /// Tool arguments.
    #[serde(default)]
    pub arguments: Value,
}

/// One content block of a tool result.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ToolContent {
    /// Plain text.
    Text {
        /// The text.
        text: String,
    },
}

/// Result of `tools/call`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallResult {
    /// Content blocks.
    pub content: Vec<ToolContent>,
    /// Set when the call failed.
    #[serde(skip_serializing_if = "is_false")]
    pub is_error: bool,
}

#[allow(clippy::trivially_copy_pass_by_ref)] // skip_serializing_if passes &T
const fn is_false(b: &bool) -> bool {
    !*b
}

impl ToolCallResult {
    /// A successful result carrying `value`.
    ///
    /// Strings are passed through as-is; anything else is pretty-printed.
    #[must_use]
    pub fn from_value(value: &Value) -> Self {
        let text = match value {
            Value::String(s) => s.clone(),
            other => serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string()),
        };
        Self {
            content: vec![ToolContent::Text { text }],
            is_error: false,
        }
    }

    /// A failed result.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            content: vec![ToolContent::Text {
                text: message.into(),
            }],
            is_error: true,
        }
    }
}
