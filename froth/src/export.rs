//! # Session snapshot and export
//!
//! A [`SessionSnapshot`] is an immutable copy of everything recorded in a session. Exporters
//! turn it into files without recomputing any value.

use crate::prelude::v1::*;
use crate::session::FrameRecord;
use log::*;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Recorded samples of one region.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RoiRecord {
    pub id: RoiId,
    pub name: String,
    pub samples: Vec<VelocitySample>,
}

/// Point in time copy of a session.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub calibration: CalibrationSpec,
    pub rois: Vec<RoiRecord>,
    pub frames: Vec<FrameRecord>,
}

/// One row of a region table.
///
/// Field order is the column order of the exported tables.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SampleRow {
    pub frame_index: u64,
    /// Seconds since the start of the stream.
    pub timestamp: f64,
    pub delta_x_px: f32,
    pub delta_y_px: f32,
    /// Magnitude of the displacement in physical units.
    pub physical_delta: f32,
    /// Physical units per second.
    pub speed: f32,
    /// Radians from the overflow direction.
    pub angle: f32,
}

impl From<&VelocitySample> for SampleRow {
    fn from(s: &VelocitySample) -> Self {
        Self {
            frame_index: s.frame_index,
            timestamp: s.timestamp.as_secs_f64(),
            delta_x_px: s.delta_pixels.x,
            delta_y_px: s.delta_pixels.y,
            physical_delta: s.delta_physical.magnitude(),
            speed: s.speed,
            angle: s.angle,
        }
    }
}

/// Calibration summary written next to the region tables.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CalibrationRow {
    pub pixels_per_unit: f32,
    pub real_distance: f32,
    pub ruler_ax: f32,
    pub ruler_ay: f32,
    pub ruler_bx: f32,
    pub ruler_by: f32,
    /// Degrees anticlockwise from the horizontal.
    pub overflow_deg: f32,
}

/// Table of one region.
#[derive(Clone, Debug, PartialEq)]
pub struct Table {
    pub roi_id: RoiId,
    pub name: String,
    pub rows: Vec<SampleRow>,
}

impl SessionSnapshot {
    pub(crate) fn new(
        calibration: CalibrationSpec,
        rois: impl Iterator<Item = (RoiId, String, Vec<VelocitySample>)>,
        frames: Vec<FrameRecord>,
    ) -> Self {
        Self {
            calibration,
            rois: rois
                .map(|(id, name, samples)| RoiRecord { id, name, samples })
                .collect(),
            frames,
        }
    }

    /// Convert to one table per region.
    pub fn tables(&self) -> Vec<Table> {
        self.rois
            .iter()
            .map(|roi| Table {
                roi_id: roi.id,
                name: roi.name.clone(),
                rows: roi.samples.iter().map(SampleRow::from).collect(),
            })
            .collect()
    }

    pub fn calibration_row(&self) -> CalibrationRow {
        let c = &self.calibration;
        CalibrationRow {
            pixels_per_unit: c.pixels_per_unit,
            real_distance: c.ruler.real_distance,
            ruler_ax: c.ruler.a.x,
            ruler_ay: c.ruler.a.y,
            ruler_bx: c.ruler.b.x,
            ruler_by: c.ruler.b.y,
            overflow_deg: c.overflow_degrees(),
        }
    }
}

/// Destination of a finished session.
pub trait Exporter {
    fn export(&mut self, snapshot: &SessionSnapshot) -> Result<()>;
}

/// Write rows as CSV, with a header derived from the row type.
pub fn write_csv<W: std::io::Write, T: Serialize>(
    writer: W,
    rows: impl IntoIterator<Item = T>,
) -> Result<()> {
    let mut writer = csv::Writer::from_writer(writer);
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}

/// Writes `calibration.csv` and one `roi_<id>.csv` per region into a directory.
pub struct CsvDirExporter {
    dir: PathBuf,
}

impl CsvDirExporter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Path of the table of a region.
    pub fn table_path(&self, roi: RoiId) -> PathBuf {
        self.dir.join(format!("roi_{roi}.csv"))
    }

    pub fn calibration_path(&self) -> PathBuf {
        self.dir.join("calibration.csv")
    }
}

impl Exporter for CsvDirExporter {
    fn export(&mut self, snapshot: &SessionSnapshot) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;

        write_csv(
            std::fs::File::create(self.calibration_path())?,
            [snapshot.calibration_row()],
        )?;

        for table in snapshot.tables() {
            let path = self.table_path(table.roi_id);
            // Header only for regions without samples.
            if table.rows.is_empty() {
                let mut writer = csv::Writer::from_path(&path)?;
                writer.write_record(SAMPLE_COLUMNS)?;
                writer.flush()?;
            } else {
                write_csv(std::fs::File::create(&path)?, table.rows)?;
            }
            info!("exported ROI {} ({}) to {}", table.roi_id, table.name, path.display());
        }

        Ok(())
    }
}

/// Column names of the region tables.
pub const SAMPLE_COLUMNS: [&str; 7] = [
    "frame_index",
    "timestamp",
    "delta_x_px",
    "delta_y_px",
    "physical_delta",
    "speed",
    "angle",
];

/// Writes the whole snapshot as JSON.
pub struct JsonExporter {
    path: PathBuf,
}

impl JsonExporter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl Exporter for JsonExporter {
    fn export(&mut self, snapshot: &SessionSnapshot) -> Result<()> {
        let file = std::io::BufWriter::new(std::fs::File::create(&self.path)?);
        serde_json::to_writer_pretty(file, snapshot)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::Calibration;
    use nalgebra as na;
    use std::time::Duration;

    fn snapshot() -> SessionSnapshot {
        let mut c = Calibration::default();
        c.set_ruler(na::Point2::new(0.0, 0.0), na::Point2::new(100.0, 0.0), 10.0)
            .unwrap();
        c.set_overflow_degrees(-90.0).unwrap();
        let calibration = c.lock().unwrap();

        let sample = VelocitySample {
            roi_id: RoiId(0),
            frame_index: 4,
            timestamp: Duration::from_millis(1500),
            delta_pixels: na::Vector2::new(30.0, 40.0),
            delta_physical: na::Vector2::new(3.0, 4.0),
            speed: 10.0,
            angle: 0.5,
            projected_speed: 8.0,
        };

        SessionSnapshot::new(
            calibration,
            vec![
                (RoiId(0), "left".to_string(), vec![sample]),
                (RoiId(2), "right".to_string(), vec![]),
            ]
            .into_iter(),
            vec![FrameRecord {
                frame_index: 4,
                timestamp: Duration::from_millis(1500),
            }],
        )
    }

    #[test]
    fn tables_follow_column_order() {
        let snap = snapshot();
        let tables = snap.tables();
        assert_eq!(tables.len(), 2);
        assert!(tables[1].rows.is_empty());

        let mut out = vec![];
        write_csv(&mut out, tables[0].rows.iter().copied()).unwrap();
        let text = String::from_utf8(out).unwrap();
        let mut lines = text.lines();
        assert_eq!(lines.next(), Some(SAMPLE_COLUMNS.join(",").as_str()));
        assert_eq!(lines.next(), Some("4,1.5,30.0,40.0,5.0,10.0,0.5"));
        assert_eq!(lines.next(), None);
    }

    #[test]
    fn calibration_summary() {
        let row = snapshot().calibration_row();
        assert_eq!(row.pixels_per_unit, 10.0);
        assert_eq!(row.real_distance, 10.0);
        assert!((row.overflow_deg + 90.0).abs() < 1e-3);
    }

    #[test]
    fn csv_directory_export() {
        let dir = std::env::temp_dir().join(format!("froth-export-{}", std::process::id()));
        let mut exporter = CsvDirExporter::new(&dir);
        exporter.export(&snapshot()).unwrap();

        let left = std::fs::read_to_string(exporter.table_path(RoiId(0))).unwrap();
        assert_eq!(left.lines().count(), 2);
        let right = std::fs::read_to_string(exporter.table_path(RoiId(2))).unwrap();
        assert_eq!(right.trim_end(), SAMPLE_COLUMNS.join(","));
        assert!(exporter.calibration_path().exists());

        let json_path = dir.join("snapshot.json");
        JsonExporter::new(&json_path).export(&snapshot()).unwrap();
        let back: SessionSnapshot =
            serde_json::from_str(&std::fs::read_to_string(&json_path).unwrap()).unwrap();
        assert_eq!(back, snapshot());

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
