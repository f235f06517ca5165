use clap::{Parser, Subcommand};
use env_logger::Env;
use log::{error, info};
use ndarray::Array2;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use rasterblock::{
    Backend, BlockContext, BlockInputs, BlockOutputs, CallbackError, CreateOptions, DataType,
    Dimensions, Footprint, GeoTransform, InputFiles, Job, JobConfig, OutputFiles, PixelRect,
    RasterBlock, RasterDriver, RawDriver, Result,
};

/// Projection written into rasters made by the `ramp` command
const RAMP_PROJECTION: &str = "LOCAL_CS[\"rasterblock ramp\"]";

#[derive(Parser, Debug)]
#[command(name = "rasterblock")]
#[command(about = "Block-wise raster processing over serial, pooled or distributed backends")]
#[command(version)]
struct Args {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Per-pixel mean of all inputs, cast to the first input's data type
    Average {
        /// Input rasters
        #[arg(required = true, value_name = "FILE")]
        inputs: Vec<PathBuf>,

        /// Output raster
        #[arg(short, long, value_name = "FILE")]
        output: PathBuf,

        /// Window size in pixels, as WxH or a single number
        #[arg(short, long, value_name = "WxH", value_parser = parse_window)]
        window: Option<(usize, usize)>,

        /// Pixels of overlap around each window
        #[arg(long, value_name = "N")]
        overlap: Option<usize>,

        /// serial, pool, pool:N or distributed
        #[arg(short, long, value_name = "BACKEND")]
        backend: Option<Backend>,

        /// Worker threads for the pool backend
        #[arg(long, value_name = "N", env = "RASTERBLOCK_WORKERS")]
        workers: Option<usize>,

        /// intersection, union or reference
        #[arg(long, value_name = "POLICY", value_parser = parse_footprint)]
        footprint: Option<Footprint>,

        /// No-data value written into the output
        #[arg(long, value_name = "VALUE")]
        nodata: Option<f64>,
    },

    /// Writes a single-band 8-bit ramp raster (values row * size + col)
    Ramp {
        #[arg(value_name = "FILE")]
        path: PathBuf,

        /// Mirror the ramp horizontally
        #[arg(long)]
        reverse: bool,

        /// Width and height in pixels
        #[arg(long, default_value_t = 10)]
        size: usize,
    },

    /// Prints whole-band statistics
    Stats {
        #[arg(value_name = "FILE")]
        path: PathBuf,

        #[arg(long, default_value_t = 1)]
        band: usize,

        /// Value to ignore when computing statistics
        #[arg(long, value_name = "VALUE")]
        ignore: Option<f64>,
    },

    /// Prints size, bands, data type and georeferencing
    Info {
        #[arg(value_name = "FILE")]
        path: PathBuf,
    },
}

fn parse_window(s: &str) -> std::result::Result<(usize, usize), String> {
    let parse = |v: &str| {
        v.trim()
            .parse::<usize>()
            .map_err(|_| format!("invalid window size {:?}", s))
    };
    match s.split_once(['x', 'X']) {
        Some((w, h)) => Ok((parse(w)?, parse(h)?)),
        None => {
            let n = parse(s)?;
            Ok((n, n))
        }
    }
}

fn parse_footprint(s: &str) -> std::result::Result<Footprint, String> {
    Footprint::from_name(s).ok_or_else(|| format!("unknown footprint {:?}", s))
}

/// Combines `--backend`, the configured backend and `--workers`.
///
/// A worker count selects the pool when no backend was asked for and is an
/// error with any backend other than the pool.
fn resolve_backend(
    requested: Option<Backend>,
    configured: Backend,
    workers: Option<usize>,
) -> Result<Backend> {
    let backend = requested.unwrap_or(configured);
    match (workers, backend) {
        (None, backend) => Ok(backend),
        (Some(n), Backend::Pool { .. }) => Ok(Backend::Pool { workers: Some(n) }),
        (Some(n), Backend::Serial) if requested.is_none() => Ok(Backend::Pool { workers: Some(n) }),
        (Some(_), other) => Err(rasterblock::Error::configuration(format!(
            "a worker count only applies to the pool backend, not {}",
            other
        ))),
    }
}

/// Mean of every input block, band by band
fn average(
    _ctx: &BlockContext<'_>,
    inputs: &BlockInputs,
    outputs: &mut BlockOutputs,
) -> std::result::Result<(), CallbackError> {
    let mut blocks = inputs.slots().map(|(_, block)| block);
    let first = blocks.next().ok_or("no input blocks delivered")?;

    let mut sum = first.data().clone();
    let mut count = 1.0;
    for block in blocks {
        if block.band_count() != first.band_count() {
            return Err(format!(
                "cannot average {} band(s) with {} band(s)",
                block.band_count(),
                first.band_count()
            )
            .into());
        }
        sum += block.data();
        count += 1.0;
    }
    sum /= count;

    outputs.insert("average", RasterBlock::new(first.data_type(), sum));
    Ok(())
}

fn ramp(driver: &RawDriver, path: &Path, size: usize, reverse: bool) -> Result<()> {
    let options = CreateOptions {
        size: Dimensions::new(size, size),
        bands: 1,
        data_type: DataType::U8,
        transform: GeoTransform::north_up(0.0, size as f64, 1.0, 1.0),
        projection: RAMP_PROJECTION.to_string(),
        no_data: None,
    };
    let pixels = Array2::from_shape_fn((size, size), |(r, c)| {
        let col = if reverse { size - 1 - c } else { c };
        (r * size + col) as f64
    });

    driver.remove(path)?;
    let dataset = driver.open_for_write(path, &options)?;
    dataset.write_window(1, PixelRect::new(0, 0, size, size), pixels.view())?;
    info!("Wrote {}x{} ramp to {}", size, size, path.display());
    Ok(())
}

fn run(args: Args) -> Result<()> {
    let driver = RawDriver::new();

    match args.command {
        Command::Average {
            inputs,
            output,
            window,
            overlap,
            backend,
            workers,
            footprint,
            nodata,
        } => {
            let mut config = JobConfig::from_env()?;
            if let Some((w, h)) = window {
                config = config.with_window(w, h);
            }
            if let Some(overlap) = overlap {
                config = config.with_overlap(overlap);
            }
            let backend = resolve_backend(backend, config.backend, workers)?;
            config = config.with_backend(backend);
            if let Some(footprint) = footprint {
                config = config.with_footprint(footprint);
            }
            if nodata.is_some() {
                config.output_no_data = nodata;
            }

            let mut input_files = InputFiles::new();
            input_files.insert("image".to_string(), inputs);
            let mut output_files = OutputFiles::new();
            output_files.insert("average".to_string(), output);

            let mut job = Job::new(Arc::new(driver), &input_files, output_files, config)?;
            let summary = job.run(average)?;
            println!("{}", summary);
        }

        Command::Ramp { path, reverse, size } => {
            if size == 0 {
                return Err(rasterblock::Error::configuration("ramp size must be positive"));
            }
            ramp(&driver, &path, size, reverse)?;
        }

        Command::Stats { path, band, ignore } => {
            let dataset = driver.open_for_read(&path)?;
            if ignore.is_some() {
                dataset.set_no_data_value(band, ignore)?;
            }
            let stats = dataset.compute_statistics(band, true)?;
            println!("{} band {}", path.display(), band);
            println!("  Min:    {}", stats.min);
            println!("  Max:    {}", stats.max);
            println!("  Mean:   {}", stats.mean);
            println!("  Stddev: {}", stats.stddev);
        }

        Command::Info { path } => {
            let dataset = driver.open_for_read(&path)?;
            let info = dataset.info();
            println!("{}", path.display());
            println!("  Size: {}", info.size);
            println!("  Bands: {}", info.bands);
            println!("  Data type: {}", info.data_type);
            println!("  Transform: {:?}", info.transform.coefficients());
            println!("  Projection: {}", info.projection);
            for band in 1..=info.bands {
                if let Some(value) = dataset.no_data_value(band)? {
                    println!("  Band {} no-data: {}", band, value);
                }
            }
        }
    }

    Ok(())
}

fn main() -> ExitCode {
    let args = Args::parse();

    let log_level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level)).init();

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
