//! Storage driver that copies a finished recording to a path built from a
//! small template language, grounded in the original filesystem storage
//! driver's `{source}`/`{show}`/`{date}` substitutions and `path_format`
//! slugifying filter.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Local;
use permanence_core::{EventSource, StorageDriver, StorageEvent};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct FilesystemStorageConfig {
    location: String,
}

pub fn from_config(config: &serde_yaml::Value) -> Result<Arc<dyn StorageDriver>> {
    let parsed: FilesystemStorageConfig = serde_yaml::from_value(config.clone())
        .context("invalid filesystem storage driver configuration")?;
    let template = PathTemplate::compile(&parsed.location)?;
    Ok(Arc::new(FilesystemStorageDriver {
        template,
        events: EventSource::new(),
    }))
}

pub struct FilesystemStorageDriver {
    template: PathTemplate,
    events: EventSource<StorageEvent>,
}

impl StorageDriver for FilesystemStorageDriver {
    fn save(&self, source: &str, show: &str, file_path: &Path) -> Result<()> {
        let extension = file_path.extension().and_then(|e| e.to_str());
        let mut dest = self.template.render(source, show);
        if let Some(extension) = extension {
            dest.set_extension(extension);
        }

        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create directory {}", parent.display()))?;
        }

        std::fs::copy(file_path, &dest).with_context(|| {
            format!(
                "failed to copy {} to {}",
                file_path.display(),
                dest.display()
            )
        })?;

        self.events.fire(StorageEvent::Save {
            source: source.to_string(),
            show: show.to_string(),
            location: dest.display().to_string(),
        });
        Ok(())
    }

    fn events(&self) -> &EventSource<StorageEvent> {
        &self.events
    }
}

/// One `{source}`/`{show}`/`{date}` segment, optionally post-processed by
/// the `path_format` slugifying filter.
enum Segment {
    Literal(String),
    Source,
    Show,
    Date,
}

struct PathTemplate {
    segments: Vec<(Segment, bool)>,
}

impl PathTemplate {
    fn compile(pattern: &str) -> Result<Self> {
        let mut segments = Vec::new();
        let mut rest = pattern;

        while let Some(open) = rest.find('{') {
            if open > 0 {
                segments.push((Segment::Literal(rest[..open].to_string()), false));
            }
            let after_open = &rest[open + 1..];
            let close = after_open
                .find('}')
                .ok_or_else(|| anyhow::anyhow!("missing '}}' in path pattern '{pattern}'"))?;
            let spot = &after_open[..close];
            let mut parts = spot.split('|');
            let name = parts.next().unwrap_or_default();
            let slugify = parts.next() == Some("path_format");

            let segment = match name {
                "source" => Segment::Source,
                "show" => Segment::Show,
                "date" => Segment::Date,
                other => anyhow::bail!("invalid path variable '{other}' in pattern '{pattern}'"),
            };
            segments.push((segment, slugify));

            rest = &after_open[close + 1..];
        }

        if !rest.is_empty() {
            segments.push((Segment::Literal(rest.to_string()), false));
        }

        Ok(Self { segments })
    }

    fn render(&self, source: &str, show: &str) -> std::path::PathBuf {
        let mut out = String::new();
        for (segment, slugify) in &self.segments {
            let value = match segment {
                Segment::Literal(literal) => literal.clone(),
                Segment::Source => source.to_string(),
                Segment::Show => show.to_string(),
                Segment::Date => Local::now().format("%Y-%m-%d").to_string(),
            };
            if *slugify {
                out.push_str(&slugify_segment(&value));
            } else {
                out.push_str(&value);
            }
        }
        std::path::PathBuf::from(out)
    }
}

fn slugify_segment(value: &str) -> String {
    value
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '_')
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_source_and_show_segments() {
        let template = PathTemplate::compile("/recordings/{source}/{show}").unwrap();
        let rendered = template.render("npr", "morning edition");
        assert_eq!(rendered, std::path::PathBuf::from("/recordings/npr/morning edition"));
    }

    #[test]
    fn path_format_filter_slugifies() {
        let template = PathTemplate::compile("/recordings/{show|path_format}").unwrap();
        let rendered = template.render("npr", "Morning Edition!");
        assert_eq!(rendered, std::path::PathBuf::from("/recordings/Morning_Edition"));
    }

    #[test]
    fn rejects_unknown_variable() {
        assert!(PathTemplate::compile("/recordings/{bogus}").is_err());
    }

    #[test]
    fn save_copies_file_and_fires_event() {
        let source_dir = tempfile::tempdir().unwrap();
        let dest_dir = tempfile::tempdir().unwrap();
        let src_file = source_dir.path().join("capture.mp3");
        std::fs::write(&src_file, b"audio").unwrap();

        let pattern = format!("{}/{{source}}-{{show}}", dest_dir.path().display());
        let driver = FilesystemStorageDriver {
            template: PathTemplate::compile(&pattern).unwrap(),
            events: EventSource::new(),
        };

        let fired = std::sync::Arc::new(std::sync::Mutex::new(None));
        let f = fired.clone();
        driver.events.observe(move |event| {
            *f.lock().unwrap() = Some(event.clone());
        });

        driver.save("npr", "morning", &src_file).unwrap();
        assert!(matches!(*fired.lock().unwrap(), Some(StorageEvent::Save { .. })));
    }
}
