//! Show the files a directory tail follows

use anyhow::{Context, Result};
use chrono::Local;
use logtrail_core::TailConfig;
use logtrail_tail::{ContentInfo, Tailer};
use owo_colors::OwoColorize;
use std::path::Path;

pub async fn run(dir: &Path, json: bool, config: TailConfig) -> Result<()> {
    let tailer = Tailer::new(config).context("Failed to start tailer")?;
    let folder = tailer
        .tail_folder(dir)
        .with_context(|| format!("Failed to open directory {}", dir.display()))?;
    let infos = folder.list_content_info(true);
    folder.close();
    tailer.close();

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&infos).context("Failed to serialize file info")?
        );
    } else {
        display_info(folder.dir(), &infos);
    }
    Ok(())
}

fn display_info(dir: &Path, infos: &[ContentInfo]) {
    println!("{}", "Tracked Files".bold());
    println!("{}: {}\n", "Directory".dimmed(), dir.display().dimmed());

    if infos.is_empty() {
        println!("  {}", "(no eligible files)".dimmed());
        return;
    }

    for info in infos {
        let name = info
            .current_path
            .strip_prefix(dir)
            .unwrap_or(&info.current_path);
        println!("  {}", name.display().cyan());
        println!("    {} {}", "id:".dimmed(), info.logical_id);
        println!(
            "    {} {} bytes, read to {}",
            "size:".dimmed(),
            info.length,
            info.byte_offset
        );
        println!("    {} {}", "modified:".dimmed(), format_modified(info));
        if info.original_path != info.current_path {
            println!(
                "    {} {}",
                "originally:".dimmed(),
                info.original_path.display()
            );
        }
    }
    println!("\n{} {}", infos.len().to_string().bold(), "file(s)".dimmed());
}

fn format_modified(info: &ContentInfo) -> String {
    match info.last_modified {
        Some(time) => time
            .with_timezone(&Local)
            .format("%Y-%m-%d %H:%M:%S")
            .to_string(),
        None => "-".to_string(),
    }
}
