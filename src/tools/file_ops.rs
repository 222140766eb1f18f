//! File operations: read, write, edit, list.
//!
//! Reads dispatch on extension: images come back as base64 blocks ready
//! for multimodal messages, PDFs as extracted text, everything else as
//! plain UTF-8.

use async_trait::async_trait;
use base64::Engine as _;
use serde_json::json;
use std::path::{Path, PathBuf};

use crate::tools::{Tool, ToolArgs, ToolResult};

const MAX_READ_BYTES: u64 = 256 * 1024;
const MAX_IMAGE_BYTES: u64 = 4 * 1024 * 1024;

const IMAGE_EXTENSIONS: &[(&str, &str)] = &[
    ("png", "image/png"),
    ("jpg", "image/jpeg"),
    ("jpeg", "image/jpeg"),
    ("gif", "image/gif"),
    ("webp", "image/webp"),
];

fn image_media_type(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_lowercase();
    IMAGE_EXTENSIONS.iter().find(|(e, _)| *e == ext).map(|(_, m)| *m)
}

pub struct FileOpsTool {
    working_dir: PathBuf,
}

impl FileOpsTool {
    pub fn new(working_dir: impl Into<PathBuf>) -> Self {
        Self { working_dir: working_dir.into() }
    }

    fn resolve(&self, path: &str) -> PathBuf {
        let p = Path::new(path);
        if p.is_absolute() {
            p.to_path_buf()
        } else {
            self.working_dir.join(p)
        }
    }

    fn read(&self, path: &str) -> ToolResult {
        let resolved = self.resolve(path);

        if let Some(media_type) = image_media_type(&resolved) {
            return Self::read_image(&resolved, media_type);
        }
        if resolved.extension().and_then(|e| e.to_str()).map(|e| e.eq_ignore_ascii_case("pdf"))
            == Some(true)
        {
            return Self::read_pdf(&resolved);
        }

        match std::fs::metadata(&resolved) {
            Ok(meta) if meta.len() > MAX_READ_BYTES => ToolResult::fail(format!(
                "File too large to read whole ({} bytes): {}",
                meta.len(),
                resolved.display()
            )),
            Ok(_) => match std::fs::read_to_string(&resolved) {
                Ok(content) => ToolResult::ok(content),
                Err(e) => ToolResult::fail(format!("Failed to read {}: {}", resolved.display(), e)),
            },
            Err(e) => ToolResult::fail(format!("Failed to read {}: {}", resolved.display(), e)),
        }
    }

    /// Base64-encode an image for multimodal use. The payload carries
    /// the media type and a display line alongside the data.
    fn read_image(path: &Path, media_type: &str) -> ToolResult {
        let bytes = match std::fs::read(path) {
            Ok(b) => b,
            Err(e) => {
                return ToolResult::fail(format!("Failed to read image {}: {}", path.display(), e))
            }
        };
        if bytes.len() as u64 > MAX_IMAGE_BYTES {
            return ToolResult::fail(format!(
                "Image too large ({} bytes): {}",
                bytes.len(),
                path.display()
            ));
        }

        let size_kb = bytes.len() as f64 / 1024.0;
        let data = base64::engine::general_purpose::STANDARD.encode(&bytes);
        let name = path.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default();

        ToolResult::ok(json!({
            "type": "image",
            "media_type": media_type,
            "data": data,
            "file_path": path.display().to_string(),
            "size_kb": (size_kb * 100.0).round() / 100.0,
            "display_text": format!("[Image: {} ({:.1} KB, {})]", name, size_kb, media_type),
        }))
    }

    /// Extract PDF text.
    fn read_pdf(path: &Path) -> ToolResult {
        let bytes = match std::fs::read(path) {
            Ok(b) => b,
            Err(e) => {
                return ToolResult::fail(format!("Failed to read PDF {}: {}", path.display(), e))
            }
        };

        match pdf_extract::extract_text_from_mem(&bytes) {
            Ok(text) if text.trim().is_empty() => {
                ToolResult::fail(format!("PDF contains no extractable text: {}", path.display()))
            }
            Ok(text) => ToolResult::ok(text),
            Err(e) => ToolResult::fail(format!("Failed to read PDF: {}", e)),
        }
    }

    fn write(&self, path: &str, content: &str) -> ToolResult {
        let resolved = self.resolve(path);
        if let Some(parent) = resolved.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                return ToolResult::fail(format!("Failed to create directories: {}", e));
            }
        }
        match std::fs::write(&resolved, content) {
            Ok(()) => ToolResult::ok(format!(
                "Wrote {} bytes to {}",
                content.len(),
                resolved.display()
            )),
            Err(e) => ToolResult::fail(format!("Failed to write {}: {}", resolved.display(), e)),
        }
    }

    fn edit(&self, path: &str, old: &str, new: &str) -> ToolResult {
        let resolved = self.resolve(path);
        let content = match std::fs::read_to_string(&resolved) {
            Ok(c) => c,
            Err(e) => {
                return ToolResult::fail(format!("Failed to read {}: {}", resolved.display(), e))
            }
        };

        let occurrences = content.matches(old).count();
        if occurrences == 0 {
            return ToolResult::fail(format!("old_text not found in {}", resolved.display()));
        }
        if occurrences > 1 {
            return ToolResult::fail(format!(
                "old_text is ambiguous ({} occurrences) in {}; provide more context",
                occurrences,
                resolved.display()
            ));
        }

        let updated = content.replacen(old, new, 1);
        match std::fs::write(&resolved, updated) {
            Ok(()) => ToolResult::ok(format!("Edited {}", resolved.display())),
            Err(e) => ToolResult::fail(format!("Failed to write {}: {}", resolved.display(), e)),
        }
    }

    fn list(&self, path: &str) -> ToolResult {
        let resolved = self.resolve(path);
        let entries = match std::fs::read_dir(&resolved) {
            Ok(e) => e,
            Err(e) => {
                return ToolResult::fail(format!("Failed to list {}: {}", resolved.display(), e))
            }
        };

        let mut lines = Vec::new();
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().to_string();
            let marker = if entry.path().is_dir() { "/" } else { "" };
            lines.push(format!("{}{}", name, marker));
        }
        lines.sort();
        ToolResult::ok(lines.join("\n"))
    }
}

#[async_trait]
impl Tool for FileOpsTool {
    fn name(&self) -> &str {
        "file_ops"
    }

    fn description(&self) -> &str {
        "Read, write, edit, and list files. Operations: read(path), \
         write(path, content), edit(path, old_text, new_text), list(path). \
         read() extracts text from PDFs and returns images (png/jpg/jpeg/\
         gif/webp) as base64 blocks for multimodal use."
    }

    fn parameters(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "operation": {
                    "type": "string",
                    "enum": ["read", "write", "edit", "list"],
                    "description": "The file operation to perform"
                },
                "path": { "type": "string", "description": "File or directory path" },
                "content": { "type": "string", "description": "Content for write" },
                "old_text": { "type": "string", "description": "Exact text to replace (edit)" },
                "new_text": { "type": "string", "description": "Replacement text (edit)" }
            },
            "required": ["operation", "path"]
        })
    }

    async fn execute(&self, args: &ToolArgs) -> ToolResult {
        let operation = args.get("operation").and_then(|v| v.as_str()).unwrap_or_default();
        let path = args.get("path").and_then(|v| v.as_str()).unwrap_or_default();

        match operation {
            "read" => self.read(path),
            "write" => {
                let content = args.get("content").and_then(|v| v.as_str()).unwrap_or_default();
                self.write(path, content)
            }
            "edit" => {
                let Some(old) = args.get("old_text").and_then(|v| v.as_str()) else {
                    return ToolResult::fail("edit requires 'old_text'");
                };
                let new = args.get("new_text").and_then(|v| v.as_str()).unwrap_or_default();
                self.edit(path, old, new)
            }
            "list" => self.list(path),
            other => ToolResult::fail(format!("Unknown operation: '{}'", other)),
        }
    }
}
