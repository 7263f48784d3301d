//! ctif-convert CLI - convert images to CTIF for character-cell displays

use clap::Parser;
use ctif::{ColorspaceKind, Converter, CtifError, DitherMode, Platform, ResizeMode};
use std::fs::File;
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "ctif-convert", about = "Convert images to CTIF")]
struct Args {
    /// Input image file, or - for stdin
    input: PathBuf,
    /// Output file (default: <input>.ctif, or stdout when reading stdin); - for stdout
    #[arg(short, long)]
    output: Option<PathBuf>,
    /// Write a PNG preview of the result
    #[arg(short = 'P', long)]
    preview: Option<PathBuf>,
    /// Target platform
    #[arg(short = 'm', long = "mode", default_value = "oc-tier3")]
    platform: Platform,
    /// Working colorspace (rgb, yuv, yiq)
    #[arg(long, default_value = "yiq")]
    colorspace: ColorspaceKind,
    /// Optimization level; higher is faster and rougher
    #[arg(short = 'O', long, default_value = "1")]
    optimization_level: u32,
    /// Palette generator threads (default: all cores)
    #[arg(long)]
    threads: Option<usize>,
    /// Output width in pixels
    #[arg(short = 'W', long, default_value = "0")]
    width: u32,
    /// Output height in pixels
    #[arg(short = 'H', long, default_value = "0")]
    height: u32,
    /// Stretch to the requested size instead of keeping the aspect ratio
    #[arg(short = 'N', long)]
    no_aspect: bool,
    /// Resampler (speed, quality-native, quality)
    #[arg(long, default_value = "quality")]
    resize_mode: ResizeMode,
    /// Load the custom palette from a file
    #[arg(long)]
    palette: Option<PathBuf>,
    /// Save the custom palette to a file
    #[arg(long)]
    palette_export: Option<PathBuf>,
    /// Sample palette colors on an RxR grid instead of every pixel
    #[arg(long, default_value = "0")]
    palette_sampling_resolution: u32,
    /// Dither mode (none, error, ordered)
    #[arg(long, default_value = "error")]
    dither_mode: DitherMode,
    /// Dither kernel name, e.g. floyd-steinberg, 4x4, diamond-5x5
    #[arg(long)]
    dither_type: Option<String>,
    /// Dither strength (0.0-1.0)
    #[arg(long, default_value = "1.0")]
    dither_level: f32,
    /// Seed for palette generation
    #[arg(long)]
    seed: Option<u64>,
    /// Write a JSON conversion report
    #[arg(long)]
    report: Option<PathBuf>,
    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

fn main() -> ExitCode {
    let args = Args::parse();

    let default_filter = if args.debug { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().without_time().with_writer(io::stderr))
        .init();

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> Result<(), CtifError> {
    let stdin = args.input == Path::new("-");

    info!("loading image");
    let image = if stdin {
        let mut bytes = Vec::new();
        io::stdin().read_to_end(&mut bytes)?;
        image::load_from_memory(&bytes)?
    } else {
        image::open(&args.input)?
    };

    let mut converter = Converter::new(args.platform)
        .with_colorspace(args.colorspace)
        .with_optimization_level(args.optimization_level)
        .with_size(args.width, args.height)
        .with_ignore_aspect_ratio(args.no_aspect)
        .with_resize_mode(args.resize_mode)
        .with_sampling_resolution(args.palette_sampling_resolution)
        .with_dither(args.dither_mode, args.dither_type.as_deref(), args.dither_level);
    if let Some(threads) = args.threads {
        converter = converter.with_threads(threads);
    }
    if let Some(path) = &args.palette {
        converter = converter.with_palette(path);
    }
    if let Some(path) = &args.palette_export {
        converter = converter.with_palette_export(path);
    }
    if let Some(seed) = args.seed {
        converter = converter.with_seed(seed);
    }

    let conversion = converter.convert(&image)?;

    let output = match args.output {
        Some(path) => path,
        None if stdin => PathBuf::from("-"),
        None => {
            let mut name = args.input.into_os_string();
            name.push(".ctif");
            PathBuf::from(name)
        }
    };
    if output == Path::new("-") {
        let mut out = io::stdout().lock();
        out.write_all(&conversion.data)?;
        out.flush()?;
    } else {
        info!("writing {}", output.display());
        File::create(&output)?.write_all(&conversion.data)?;
    }

    if let Some(path) = &args.preview {
        info!("writing preview {}", path.display());
        conversion.preview.save(path)?;
    }

    if let Some(path) = &args.report {
        let writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(writer, &conversion.report).map_err(io::Error::from)?;
    }

    Ok(())
}
