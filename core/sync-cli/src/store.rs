//! `measview store`: read-only view of the shared store.

use std::path::Path;

use measview_core::{FileTransport, Transport};
use measview_protocol::ContextRole;

pub fn run(dir: &Path, key: Option<&str>) -> Result<(), String> {
    if !dir.exists() {
        return Err(format!("No transport directory at {}", dir.display()));
    }
    let transport = FileTransport::open(dir, ContextRole::Parent)?;
    print!("{}", render(&transport, key)?);
    Ok(())
}

fn render(transport: &FileTransport, key: Option<&str>) -> Result<String, String> {
    match key {
        Some(key) => {
            let value = transport
                .get(key)?
                .ok_or_else(|| format!("Key '{}' is not in the store", key))?;
            let pretty = serde_json::to_string_pretty(&value)
                .map_err(|e| format!("Failed to format '{}': {}", key, e))?;
            Ok(format!("{}\n", pretty))
        }
        None => {
            let entries = transport.entries()?;
            if entries.is_empty() {
                return Ok("Store is empty\n".to_string());
            }
            let width = entries.iter().map(|(key, _, _)| key.len()).max().unwrap_or(0);
            Ok(entries
                .iter()
                .map(|(key, writer, updated_at)| {
                    format!(
                        "{:<width$}  {:<6}  {}\n",
                        key,
                        writer.as_str(),
                        updated_at.to_rfc3339(),
                        width = width
                    )
                })
                .collect())
        }
    }
}
