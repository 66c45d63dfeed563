use std::path::Path;

use crate::resources::ResourceDefinition;
use crate::tools::ToolDefinition;
use crate::types::McpError;

/// Load tool definitions from a JSON file on disk.
pub fn load_tools(path: impl AsRef<Path>) -> Result<Vec<ToolDefinition>, McpError> {
    let data = std::fs::read(path)?;
    parse_tools(&data)
}

/// Parse tool definitions from raw JSON bytes.
///
/// The file is an array of tool objects; `inputSchema` uses the field
/// declaration format of [`InputSchema`](crate::schema::InputSchema).
pub fn parse_tools(data: &[u8]) -> Result<Vec<ToolDefinition>, McpError> {
    let tools: Vec<ToolDefinition> = serde_json::from_slice(data)?;
    if let Some(pos) = tools.iter().position(|t| t.name.is_empty()) {
        return Err(McpError::Validation(format!("tool #{} has an empty name", pos)));
    }
    Ok(tools)
}

/// Load resource definitions from a JSON file on disk.
pub fn load_resources(path: impl AsRef<Path>) -> Result<Vec<ResourceDefinition>, McpError> {
    let data = std::fs::read(path)?;
    parse_resources(&data)
}

/// Parse resource definitions from raw JSON bytes.
pub fn parse_resources(data: &[u8]) -> Result<Vec<ResourceDefinition>, McpError> {
    let resources: Vec<ResourceDefinition> = serde_json::from_slice(data)?;
    if let Some(pos) = resources.iter().position(|r| r.uri.is_empty()) {
        return Err(McpError::Validation(format!("resource #{} has an empty uri", pos)));
    }
    Ok(resources)
}
