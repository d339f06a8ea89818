//! The standard coding-agent tool catalogue.

use cadence_core::tools::{ToolCatalog, ToolSpec};

/// Every tool a coding agent is expected to emit, with its parameters.
pub fn default_catalog() -> ToolCatalog {
    ToolCatalog::new()
        .with_tool(
            ToolSpec::new("execute_command", "Run a CLI command in the workspace")
                .required("command", "Command line to execute")
                .optional("requires_approval", "Whether the command needs explicit approval"),
        )
        .with_tool(ToolSpec::new("read_file", "Read a file").required("path", "Path relative to the workspace"))
        .with_tool(
            ToolSpec::new("write_to_file", "Create or overwrite a file")
                .required("path", "Path relative to the workspace")
                .required("content", "Complete file content"),
        )
        .with_tool(
            ToolSpec::new("replace_in_file", "Apply SEARCH/REPLACE blocks to a file")
                .required("path", "Path relative to the workspace")
                .required("diff", "One or more SEARCH/REPLACE blocks"),
        )
        .with_tool(
            ToolSpec::new("search_files", "Regex search across files")
                .required("path", "Directory to search")
                .required("regex", "Rust regex pattern")
                .optional("file_pattern", "Glob filtering searched files"),
        )
        .with_tool(
            ToolSpec::new("list_files", "List a directory")
                .required("path", "Directory to list")
                .optional("recursive", "List recursively"),
        )
        .with_tool(
            ToolSpec::new("list_code_definition_names", "List top-level definitions in a directory")
                .required("path", "Directory to inspect"),
        )
        .with_tool(
            ToolSpec::new("browser_action", "Drive a headless browser")
                .required("action", "launch, click, type, scroll_down, scroll_up or close")
                .optional("url", "URL for launch")
                .optional("coordinate", "x,y for click")
                .optional("text", "Text for type"),
        )
        .with_tool(
            ToolSpec::new("use_mcp_tool", "Call a tool on a connected MCP server")
                .required("server_name", "MCP server")
                .required("tool_name", "Tool on that server")
                .required("arguments", "JSON arguments"),
        )
        .with_tool(
            ToolSpec::new("access_mcp_resource", "Read a resource from a connected MCP server")
                .required("server_name", "MCP server")
                .required("uri", "Resource URI"),
        )
        .with_tool(
            ToolSpec::new("ask_followup_question", "Ask the user a question")
                .required("question", "Question to ask")
                .optional("options", "JSON array of suggested answers"),
        )
        .with_tool(
            ToolSpec::new("attempt_completion", "Present the final result")
                .required("result", "Description of the result")
                .optional("command", "Command demonstrating the result"),
        )
        .with_tool(
            ToolSpec::new("new_task", "Start a new task with preloaded context")
                .required("context", "Context to carry over"),
        )
        .with_tool(ToolSpec::new("plan_mode_respond", "Respond while planning").required("response", "Response text"))
        .with_tool(ToolSpec::new("web_fetch", "Fetch a URL as markdown").required("url", "URL to fetch"))
}
