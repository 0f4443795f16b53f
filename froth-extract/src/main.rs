//! Measure froth surface velocity over a directory of frames

use anyhow::{anyhow, Context, Result};
use clap::*;
use froth::prelude::v1::*;
use froth::roi::Polygon;
use log::*;
use nalgebra as na;
use std::path::{Path, PathBuf};
use std::time::Duration;

const EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "bmp", "tif", "tiff"];

fn main() -> Result<()> {
    env_logger::init();

    let matches = Command::new("froth-extract")
        .version(crate_version!())
        .about("Measures froth surface velocity and exports it per region")
        .arg(
            Arg::new("input")
                .long("input")
                .short('i')
                .takes_value(true)
                .required(true)
                .help("Directory of frames, processed in file name order"),
        )
        .arg(
            Arg::new("fps")
                .long("fps")
                .short('f')
                .takes_value(true)
                .required(true),
        )
        .arg(
            Arg::new("ruler")
                .long("ruler")
                .short('r')
                .takes_value(true)
                .required(true)
                .help("x1,y1,x2,y2,distance"),
        )
        .arg(
            Arg::new("overflow-deg")
                .long("overflow-deg")
                .short('d')
                .takes_value(true)
                .required(true)
                .allow_hyphen_values(true)
                .help("Overflow direction, degrees anticlockwise from the horizontal"),
        )
        .arg(
            Arg::new("roi")
                .long("roi")
                .takes_value(true)
                .multiple_occurrences(true)
                .required(true)
                .help("x,y,w,h rectangle or x1,y1,x2,y2,x3,y3,... polygon"),
        )
        .arg(
            Arg::new("config")
                .long("config")
                .short('c')
                .takes_value(true),
        )
        .arg(Arg::new("output").takes_value(true).required(true))
        .get_matches();

    let input = matches.value_of("input").unwrap();
    let output = PathBuf::from(matches.value_of("output").unwrap());
    let fps: f64 = matches.value_of("fps").unwrap().parse()?;
    let ruler = parse_values(matches.value_of("ruler").unwrap())?;
    let overflow: f32 = matches.value_of("overflow-deg").unwrap().parse()?;
    let rois = matches
        .values_of("roi")
        .into_iter()
        .flatten()
        .map(parse_polygon)
        .collect::<Result<Vec<_>>>()?;

    if !(fps.is_finite() && fps > 0.0) {
        return Err(anyhow!("frame rate must be positive"));
    }

    if ruler.len() != 5 {
        return Err(anyhow!("ruler needs 5 values, got {}", ruler.len()));
    }

    let config = flow_loader::load_config(matches.value_of("config").map(Path::new))?;
    let estimator = flow_loader::create_estimator(&config.estimator);

    let mut session = Session::new(config);
    session.set_ruler(
        na::Point2::new(ruler[0], ruler[1]),
        na::Point2::new(ruler[2], ruler[3]),
        ruler[4],
    )?;
    session.set_overflow_degrees(overflow)?;
    session.lock_calibration()?;

    for (i, polygon) in rois.into_iter().enumerate() {
        session.add_roi(format!("roi_{i}"), polygon)?;
    }

    let frames = list_frames(Path::new(input))?;
    info!("processing {} frames from {}", frames.len(), input);

    let pipeline = Pipeline::spawn(session, estimator);

    for (i, path) in frames.iter().enumerate() {
        let timestamp = Duration::from_secs_f64(i as f64 / fps);
        let frame = load_frame(path, i as u64, timestamp)?;
        pipeline.push_frame(frame);
        pipeline.flush();
    }

    let stats = pipeline.stats();
    let mut session = pipeline.shutdown();
    let snapshot = session.end()?;

    let (total, avg) = stats.estimator_perf();
    info!(
        "{} pairs processed, {} samples recorded, estimation took {:.2}s ({:.2}ms avg)",
        stats.pairs_processed, stats.samples_recorded, total, avg
    );
    info!(
        "dropped: {} without texture, {} empty ROI, {} bad interval, {} out of order",
        stats.insufficient_texture, stats.empty_roi, stats.non_positive_interval, stats.out_of_order
    );

    CsvDirExporter::new(&output).export(&snapshot)?;
    JsonExporter::new(output.join("snapshot.json")).export(&snapshot)?;

    for roi in session.rois() {
        let samples = session.history().samples(roi.id());
        let mean_speed = if samples.is_empty() {
            0.0
        } else {
            samples.iter().map(|s| s.speed).sum::<f32>() / samples.len() as f32
        };

        println!(
            "{} ({}): {} samples, mean speed {:.4}, projected {:.4}",
            roi.name(),
            roi.id(),
            samples.len(),
            mean_speed,
            session.average_projected_speed(roi.id()).unwrap_or(0.0)
        );
    }

    Ok(())
}

fn parse_values(s: &str) -> Result<Vec<f32>> {
    s.split(',')
        .map(str::trim)
        .map(|v| {
            v.parse::<f32>()
                .with_context(|| format!("invalid number {:?}", v))
        })
        .collect()
}

fn parse_polygon(s: &str) -> Result<Polygon> {
    let values = parse_values(s)?;

    let polygon = match values.len() {
        4 => Polygon::rect(values[0], values[1], values[2], values[3])?,
        n if n >= 6 && n % 2 == 0 => Polygon::new(
            values
                .chunks(2)
                .map(|c| na::Point2::new(c[0], c[1]))
                .collect(),
        )?,
        n => {
            return Err(anyhow!(
                "region needs 4 values or an even count of at least 6, got {}",
                n
            ))
        }
    };

    Ok(polygon)
}

fn list_frames(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut frames = std::fs::read_dir(dir)
        .with_context(|| format!("failed to read {}", dir.display()))?
        .map(|e| e.map(|e| e.path()))
        .collect::<std::io::Result<Vec<_>>>()?;

    frames.retain(|p| {
        p.extension()
            .and_then(|e| e.to_str())
            .map(|e| EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
            .unwrap_or(false)
    });

    frames.sort();

    Ok(frames)
}

fn load_frame(path: &Path, index: u64, timestamp: Duration) -> Result<Frame> {
    let img = image::open(path)
        .with_context(|| format!("failed to load {}", path.display()))?
        .to_rgba8();

    let width = img.width() as usize;
    let pixels: &[RGBA] = bytemuck::cast_slice(img.as_raw().as_slice());

    Ok(Frame::from_rgba(index, timestamp, width, pixels)?)
}
