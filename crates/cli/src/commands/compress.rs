//! `aegis compress`: Compress a tool output the way the context manager does.

use std::path::Path;

use aegis_agent::context::compress_tool_output;
use aegis_core::estimate_tokens;
use tokio::io::AsyncReadExt;

pub async fn run(file: Option<&Path>, tool: Option<&str>) -> Result<(), Box<dyn std::error::Error>> {
    let content = match file {
        Some(path) => tokio::fs::read_to_string(path)
            .await
            .map_err(|e| format!("Failed to read {}: {e}", path.display()))?,
        None => {
            let mut buf = String::new();
            tokio::io::stdin().read_to_string(&mut buf).await?;
            buf
        }
    };

    println!("{}", render(&content, tool));
    Ok(())
}

fn render(content: &str, tool: Option<&str>) -> String {
    match compress_tool_output(content, tool, None) {
        Some(compressed) => format!(
            "{compressed}\n\n[{} → {} chars, {} → {} tokens]",
            content.chars().count(),
            compressed.chars().count(),
            estimate_tokens(content),
            estimate_tokens(&compressed)
        ),
        None => format!(
            "{content}\n\n[unchanged: {} chars is below the compression threshold]",
            content.chars().count()
        ),
    }
}
