use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use crate::models::NewsletterResult;

/// Path of `target` relative to `base` when it lives underneath it
fn relative_to(target: &Path, base: &Path) -> String {
    target
        .strip_prefix(base)
        .unwrap_or(target)
        .to_string_lossy()
        .replace('\\', "/")
}

/// Newsletter text followed by a section linking each chart
pub fn render_markdown(result: &NewsletterResult, base_dir: &Path) -> String {
    let mut md = String::new();

    md.push_str(result.newsletter.trim_end());
    md.push_str("\n\n---\n\n");
    md.push_str("## 📊 데이터 시각화\n\n");

    for image in &result.images {
        md.push_str(&format!("![Chart]({})\n\n", relative_to(image, base_dir)));
    }

    md
}

pub fn save_newsletter(result: &NewsletterResult, path: &Path) -> Result<PathBuf> {
    if !result.success {
        anyhow::bail!("Refusing to save a failed newsletter result");
    }

    let base_dir = path.parent().unwrap_or_else(|| Path::new(""));
    if !base_dir.as_os_str().is_empty() {
        fs::create_dir_all(base_dir).context("Failed to create newsletter directory")?;
    }

    let content = render_markdown(result, base_dir);
    fs::write(path, content)
        .with_context(|| format!("Failed to write newsletter: {}", path.display()))?;

    tracing::info!(path = %path.display(), "newsletter saved");
    Ok(path.to_path_buf())
}
