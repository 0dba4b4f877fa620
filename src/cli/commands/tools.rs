//! External tool checks and the spectral probe.

use std::path::Path;

use tokio::runtime::Runtime;

use crate::engine::{Ffmpeg, MediaToolkit, is_genuine};
use crate::process::tool_version;

/// External programs the pipeline shells out to.
const TOOLS: &[(&str, &str)] = &[("yt-dlp", "--version"), ("ffmpeg", "-version"), ("ffprobe", "-version")];

pub fn cmd_check_tools(rt: &Runtime) -> anyhow::Result<()> {
    println!("Checking external tools...\n");

    let mut missing = Vec::new();
    rt.block_on(async {
        for (program, arg) in TOOLS {
            match tool_version(program, arg).await {
                Some(version) => println!("✓ {}: {}", program, version),
                None => {
                    println!("✗ {}: NOT FOUND", program);
                    missing.push(*program);
                }
            }
        }
    });

    if missing.contains(&"yt-dlp") {
        print_ytdlp_install_instructions();
    }
    if missing.iter().any(|p| p.starts_with("ff")) {
        print_ffmpeg_install_instructions();
    }
    if !missing.is_empty() {
        anyhow::bail!("{} required tool(s) missing", missing.len());
    }
    Ok(())
}

fn print_ytdlp_install_instructions() {
    eprintln!();
    eprintln!("Install yt-dlp:");
    eprintln!("  Windows: winget install yt-dlp");
    eprintln!("  macOS:   brew install yt-dlp");
    eprintln!("  Linux:   pipx install yt-dlp");
}

fn print_ffmpeg_install_instructions() {
    eprintln!();
    eprintln!("Install FFmpeg (provides ffmpeg and ffprobe):");
    eprintln!("  Windows: winget install Gyan.FFmpeg");
    eprintln!("  macOS:   brew install ffmpeg");
    eprintln!("  Linux:   apt install ffmpeg");
}

/// Report whether `path` has real content above `cutoff_hz`.
pub fn cmd_probe(rt: &Runtime, path: &Path, cutoff_hz: u32, floor_db: f64) -> anyhow::Result<()> {
    if !path.is_file() {
        anyhow::bail!("File not found: {}", path.display());
    }

    let toolkit = Ffmpeg::new();
    rt.block_on(async {
        println!("File:    {}", path.display());
        if let Ok(duration) = toolkit.probe_duration(path).await {
            println!("Length:  {:.1}s", duration);
        }
        match toolkit.high_band_rms(path, cutoff_hz).await {
            Ok(level) if level.is_finite() => {
                println!("Level above {} Hz: {:.1} dB (floor {:.1} dB)", cutoff_hz, level, floor_db)
            }
            Ok(_) => println!("Level above {} Hz: silent", cutoff_hz),
            Err(e) => println!("Level above {} Hz: unknown ({})", cutoff_hz, e),
        }

        if is_genuine(&toolkit, path, cutoff_hz, floor_db).await {
            println!("✓ Looks genuine");
        } else {
            println!("? Probably upscaled from a lower bitrate");
        }
    });
    Ok(())
}
