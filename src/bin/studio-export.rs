use std::path::{Path, PathBuf};

use anyhow::Context as _;
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "studio-export", version, about = "Render studio projects to MP4")]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Render a project JSON file to an MP4 (requires `ffmpeg` on PATH).
    Render(RenderArgs),
    /// Print the detected encoder capabilities as JSON.
    Caps,
    /// Print the track layout of an MP4 file as JSON.
    Inspect(InspectArgs),
}

#[derive(Parser, Debug)]
struct RenderArgs {
    /// Input project JSON.
    #[arg(long = "in")]
    in_path: PathBuf,

    /// Output MP4 path.
    #[arg(long)]
    out: PathBuf,

    /// Override the project's video codec.
    #[arg(long, value_enum)]
    codec: Option<CodecChoice>,

    /// Override the project's video bitrate (bits per second).
    #[arg(long)]
    bitrate: Option<u64>,

    /// Export without audio even if the project lists audio sources.
    #[arg(long)]
    no_audio: bool,

    /// Directory media references resolve against (defaults to the project's directory).
    #[arg(long)]
    assets_root: Option<PathBuf>,
}

#[derive(Parser, Debug)]
struct InspectArgs {
    /// MP4 file to inspect.
    path: PathBuf,

    /// Include per-sample tables.
    #[arg(long)]
    samples: bool,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum CodecChoice {
    H264,
    Hevc,
}

impl From<CodecChoice> for studio_export::VideoCodec {
    fn from(c: CodecChoice) -> Self {
        match c {
            CodecChoice::H264 => Self::H264,
            CodecChoice::Hevc => Self::Hevc,
        }
    }
}

fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();
    match cli.cmd {
        Command::Render(args) => cmd_render(args),
        Command::Caps => cmd_caps(),
        Command::Inspect(args) => cmd_inspect(args),
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .try_init();
}

fn read_project(path: &Path) -> anyhow::Result<studio_export::Project> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("read project '{}'", path.display()))?;
    let project = studio_export::Project::from_json(&text)
        .with_context(|| format!("load project '{}'", path.display()))?;
    Ok(project)
}

fn cmd_render(args: RenderArgs) -> anyhow::Result<()> {
    let mut project = read_project(&args.in_path)?;
    if let Some(codec) = args.codec {
        project.settings.codec = codec.into();
    }
    if let Some(bitrate) = args.bitrate {
        project.settings.bitrate = bitrate;
    }
    if args.no_audio {
        project.settings.audio = false;
    }

    let assets_root = args.assets_root.unwrap_or_else(|| {
        args.in_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."))
    });

    let mut job = studio_export::ExportJob::new(project, assets_root);
    let out = match job.run() {
        Ok(out) => out,
        Err(e) => {
            tracing::debug!(error = ?e, stage = ?e.stage(), "export failed");
            anyhow::bail!("{}", job.status());
        }
    };

    if let Some(parent) = args.out.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create output dir '{}'", parent.display()))?;
    }
    std::fs::write(&args.out, &out.bytes)
        .with_context(|| format!("write '{}'", args.out.display()))?;
    eprintln!(
        "wrote {} ({} frames, {} bytes{})",
        args.out.display(),
        out.frames,
        out.bytes.len(),
        if out.has_audio { ", with audio" } else { "" }
    );
    Ok(())
}

fn cmd_caps() -> anyhow::Result<()> {
    let caps = studio_export::Capabilities::probe();
    println!("{}", serde_json::to_string_pretty(&caps)?);
    Ok(())
}

fn cmd_inspect(args: InspectArgs) -> anyhow::Result<()> {
    let bytes =
        std::fs::read(&args.path).with_context(|| format!("read '{}'", args.path.display()))?;
    let mut info = studio_export::probe_mp4(&bytes)
        .with_context(|| format!("parse '{}'", args.path.display()))?;
    if !args.samples {
        for track in &mut info.tracks {
            track.sample_sizes.clear();
            track.sample_durations.clear();
            track.sample_offsets.clear();
            track.sync_samples = None;
        }
    }
    println!("{}", serde_json::to_string_pretty(&info)?);
    Ok(())
}
