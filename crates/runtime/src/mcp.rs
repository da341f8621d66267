//! MCP (Model Context Protocol) client integration.
//!
//! Tool servers are separate processes spoken to over stdio using the
//! official rmcp SDK. Connection lifecycle is managed once at startup and
//! shutdown, not per call.
//!
//! # Example
//!
//! ```ignore
//! use runtime::McpClient;
//!
//! # async fn example() -> Result<(), runtime::McpError> {
//! let client = McpClient::spawn("uv", ["run", "python", "hotel_server.py"]).await?;
//!
//! let tools = client.list_tools().await?;
//! for tool in &tools {
//!     println!("Tool: {}", tool.name);
//! }
//! # Ok(())
//! # }
//! ```

use rmcp::{
    ServiceExt,
    model::{CallToolRequestParams, CallToolResult, Tool},
    service::RunningService,
    transport::{ConfigureCommandExt, TokioChildProcess},
};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::process::Command;

/// Error type for MCP operations.
pub type McpError = Box<dyn std::error::Error + Send + Sync>;

/// An MCP client connected to a server process.
pub struct McpClient {
    service: Arc<RunningService<rmcp::service::RoleClient, ()>>,
}

impl McpClient {
    /// Spawn an MCP server and connect to it.
    pub async fn spawn(
        command: impl AsRef<str>,
        args: impl IntoIterator<Item = impl AsRef<str>>,
    ) -> Result<Self, McpError> {
        Self::spawn_with(command, args, &HashMap::new(), None::<&Path>).await
    }

    /// Spawn an MCP server with extra environment variables and an optional
    /// working directory (tool servers often resolve data files relative to
    /// their own location).
    pub async fn spawn_with(
        command: impl AsRef<str>,
        args: impl IntoIterator<Item = impl AsRef<str>>,
        envs: &HashMap<String, String>,
        cwd: Option<impl AsRef<Path>>,
    ) -> Result<Self, McpError> {
        let command_str = command.as_ref().to_string();
        let args_vec: Vec<String> = args.into_iter().map(|a| a.as_ref().to_string()).collect();
        let cwd: Option<PathBuf> = cwd.map(|p| p.as_ref().to_path_buf());

        let transport = TokioChildProcess::new(Command::new(&command_str).configure(|cmd| {
            for arg in &args_vec {
                cmd.arg(arg);
            }
            for (key, value) in envs {
                cmd.env(key, value);
            }
            if let Some(dir) = &cwd {
                cmd.current_dir(dir);
            }
        }))?;

        let service = ().serve(transport).await?;

        Ok(Self {
            service: Arc::new(service),
        })
    }

    /// List available tools from the server.
    pub async fn list_tools(&self) -> Result<Vec<Tool>, McpError> {
        let response = self.service.list_tools(Default::default()).await?;
        Ok(response.tools)
    }

    /// Call a tool with the given name and arguments.
    pub async fn call_tool(
        &self,
        name: impl Into<String>,
        arguments: Option<serde_json::Map<String, serde_json::Value>>,
    ) -> Result<CallToolResult, McpError> {
        let params = CallToolRequestParams {
            name: name.into().into(),
            arguments,
            meta: None,
            task: None,
        };

        let result = self.service.call_tool(params).await?;
        Ok(result)
    }
}
