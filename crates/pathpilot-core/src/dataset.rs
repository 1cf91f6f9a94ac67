use crate::action::Action;
use crate::features::{self, FeatureError, FeatureVector, WorldState, RAY_COUNT};
use crate::geometry::Vec2;
use crate::raycast::RayHit;
use crate::training::{Episode, Sample};
use csv::{ReaderBuilder, StringRecord, WriterBuilder};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::{error::Error, fmt, io};

/// Recorded-play CSV files.
///
/// One row per frame, 132 columns: ten scalar state columns, 60 ray distances,
/// 60 ray hit flags, then the action. Values are stored raw (pixels, radians)
/// and normalized only when turned into training samples.
pub const COLUMN_COUNT: usize = 10 + 2 * RAY_COUNT + 2;

pub const DEFAULT_MAX_IDLE_RUN: usize = 10;
pub const DEFAULT_KEEP_INTERVAL: usize = 5;

const SCALAR_COLUMNS: [&str; 10] = [
    "pos_x",
    "pos_y",
    "vel_x",
    "vel_y",
    "energy",
    "target_x",
    "target_y",
    "dist_target",
    "angle_target",
    "is_grounded",
];

pub fn header() -> Vec<String> {
    let mut cols: Vec<String> = SCALAR_COLUMNS.iter().map(|s| s.to_string()).collect();
    cols.extend((0..RAY_COUNT).map(|i| format!("ray_dist_{i}")));
    cols.extend((0..RAY_COUNT).map(|i| format!("ray_hit_{i}")));
    cols.push("action_x".into());
    cols.push("use_energy".into());
    cols
}

#[derive(Debug)]
pub enum DatasetError {
    Io { path: PathBuf, source: io::Error },
    Csv(csv::Error),
    Header { column: usize, expected: String, actual: String },
    RowWidth { row: usize, expected: usize, actual: usize },
    Value { row: usize, column: String, value: String },
    Feature { row: usize, source: FeatureError },
}

impl fmt::Display for DatasetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DatasetError::Io { path, source } => write!(f, "{}: {}", path.display(), source),
            DatasetError::Csv(e) => write!(f, "csv error: {e}"),
            DatasetError::Header {
                column,
                expected,
                actual,
            } => write!(f, "header column {column} is '{actual}', expected '{expected}'"),
            DatasetError::RowWidth {
                row,
                expected,
                actual,
            } => write!(f, "row {row} has {actual} columns, expected {expected}"),
            DatasetError::Value { row, column, value } => {
                write!(f, "row {row}, column {column}: cannot parse '{value}'")
            }
            DatasetError::Feature { row, source } => write!(f, "row {row}: {source}"),
        }
    }
}

impl Error for DatasetError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            DatasetError::Io { source, .. } => Some(source),
            DatasetError::Csv(e) => Some(e),
            DatasetError::Feature { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<csv::Error> for DatasetError {
    fn from(e: csv::Error) -> Self {
        DatasetError::Csv(e)
    }
}

/// One recorded frame, before normalization.
#[derive(Clone, Debug, PartialEq)]
pub struct RecordedFrame {
    pub position: Vec2,
    pub velocity: Vec2,
    pub energy: f32,
    pub target: Vec2,
    pub distance_to_target: f32,
    pub angle_to_target: f32,
    pub grounded: bool,
    pub ray_distances: Vec<f32>,
    pub ray_hits: Vec<bool>,
    pub action: Action,
}

impl RecordedFrame {
    /// Capture a frame from live state and its perception cast.
    pub fn capture(state: &WorldState, rays: &[RayHit], action: Action) -> Self {
        Self {
            position: state.player_position,
            velocity: state.player_velocity,
            energy: state.energy,
            target: state.target,
            distance_to_target: state.player_position.distance(state.target),
            angle_to_target: state.player_position.angle_to(state.target),
            grounded: state.grounded,
            ray_distances: rays.iter().map(|r| r.distance).collect(),
            ray_hits: rays.iter().map(|r| r.hit).collect(),
            action,
        }
    }

    /// Normalize through the same table the live controller uses.
    pub fn features(&self) -> Result<FeatureVector, FeatureError> {
        features::extract_raw(
            self.position,
            self.velocity,
            self.energy,
            self.grounded,
            self.target,
            &self.ray_distances,
            &self.ray_hits,
        )
    }

    pub fn to_sample(&self) -> Result<Sample, FeatureError> {
        Ok(Sample::new(&self.features()?, self.action))
    }

    fn to_record(&self) -> Vec<String> {
        let flag = |b: bool| if b { "1" } else { "0" }.to_string();
        let mut rec = Vec::with_capacity(COLUMN_COUNT);
        for v in [
            self.position.x,
            self.position.y,
            self.velocity.x,
            self.velocity.y,
            self.energy,
            self.target.x,
            self.target.y,
            self.distance_to_target,
            self.angle_to_target,
        ] {
            rec.push(v.to_string());
        }
        rec.push(flag(self.grounded));
        // Short ray lists are padded so every row keeps the fixed width.
        rec.extend((0..RAY_COUNT).map(|i| {
            self.ray_distances.get(i).copied().unwrap_or(0.0).to_string()
        }));
        rec.extend((0..RAY_COUNT).map(|i| flag(self.ray_hits.get(i).copied().unwrap_or(false))));
        rec.push(self.action.move_x.to_string());
        rec.push(flag(self.action.use_energy));
        rec
    }

    fn from_record(record: &StringRecord, row: usize, names: &[String]) -> Result<Self, DatasetError> {
        if record.len() != COLUMN_COUNT {
            return Err(DatasetError::RowWidth {
                row,
                expected: COLUMN_COUNT,
                actual: record.len(),
            });
        }
        let mut values = [0.0f32; COLUMN_COUNT];
        for (i, field) in record.iter().enumerate() {
            values[i] = field.trim().parse().map_err(|_| DatasetError::Value {
                row,
                column: names[i].clone(),
                value: field.to_string(),
            })?;
        }
        let rays = 10..10 + RAY_COUNT;
        let hits = 10 + RAY_COUNT..10 + 2 * RAY_COUNT;
        Ok(Self {
            position: Vec2::new(values[0], values[1]),
            velocity: Vec2::new(values[2], values[3]),
            energy: values[4],
            target: Vec2::new(values[5], values[6]),
            distance_to_target: values[7],
            angle_to_target: values[8],
            grounded: values[9] != 0.0,
            ray_distances: values[rays].to_vec(),
            ray_hits: values[hits].iter().map(|&h| h != 0.0).collect(),
            action: Action::new(
                values[COLUMN_COUNT - 2].round() as i8,
                values[COLUMN_COUNT - 1] != 0.0,
            ),
        })
    }
}

/// Write frames as CSV rows, optionally preceded by the header.
pub fn write_csv<W: io::Write>(
    writer: W,
    frames: &[RecordedFrame],
    with_header: bool,
) -> Result<(), DatasetError> {
    let mut w = WriterBuilder::new().has_headers(false).from_writer(writer);
    if with_header {
        w.write_record(header())?;
    }
    for frame in frames {
        w.write_record(frame.to_record())?;
    }
    w.flush().map_err(|e| DatasetError::Csv(e.into()))?;
    Ok(())
}

/// Append frames to `path`, writing the header only when the file is new.
pub fn append_csv_file(path: impl AsRef<Path>, frames: &[RecordedFrame]) -> Result<(), DatasetError> {
    let path = path.as_ref();
    let io_err = |source| DatasetError::Io {
        path: path.to_path_buf(),
        source,
    };
    let is_new = !path.exists() || path.metadata().map_err(io_err)?.len() == 0;
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(io_err)?;
    write_csv(file, frames, is_new)
}

pub fn write_csv_file(path: impl AsRef<Path>, frames: &[RecordedFrame]) -> Result<(), DatasetError> {
    let path = path.as_ref();
    let file = std::fs::File::create(path).map_err(|source| DatasetError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    write_csv(file, frames, true)
}

/// Read frames, checking the header and every row width. Row numbers in
/// errors are 1-based data rows.
pub fn read_csv<R: io::Read>(reader: R) -> Result<Vec<RecordedFrame>, DatasetError> {
    let mut r = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(reader);
    let expected = header();
    let actual = r.headers()?.clone();
    for (column, name) in expected.iter().enumerate() {
        let found = actual.get(column).unwrap_or("").trim();
        if found != name {
            return Err(DatasetError::Header {
                column,
                expected: name.clone(),
                actual: found.to_string(),
            });
        }
    }
    if actual.len() != COLUMN_COUNT {
        return Err(DatasetError::RowWidth {
            row: 0,
            expected: COLUMN_COUNT,
            actual: actual.len(),
        });
    }

    let mut frames = Vec::new();
    for (i, record) in r.records().enumerate() {
        frames.push(RecordedFrame::from_record(&record?, i + 1, &expected)?);
    }
    Ok(frames)
}

pub fn read_csv_file(path: impl AsRef<Path>) -> Result<Vec<RecordedFrame>, DatasetError> {
    let path = path.as_ref();
    let file = std::fs::File::open(path).map_err(|source| DatasetError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    read_csv(io::BufReader::new(file))
}

/// Thin out long stretches of idle frames.
///
/// In every run of consecutive idle actions longer than `max_run`, the first
/// `max_run` frames are kept and then every `keep_interval`-th frame of the rest.
/// Non-idle frames and shorter runs pass through untouched, order preserved.
pub fn reduce_idle_runs(
    frames: &[RecordedFrame],
    max_run: usize,
    keep_interval: usize,
) -> Vec<RecordedFrame> {
    let keep_interval = keep_interval.max(1);
    let mut out = Vec::with_capacity(frames.len());
    let mut run = 0usize;
    for frame in frames {
        if !frame.action.is_idle() {
            run = 0;
            out.push(frame.clone());
            continue;
        }
        run += 1;
        if run <= max_run || (run - max_run - 1) % keep_interval == 0 {
            out.push(frame.clone());
        }
    }
    out
}

/// Normalize frames into one training episode.
pub fn frames_to_episode(frames: &[RecordedFrame], success: bool) -> Result<Episode, DatasetError> {
    let samples = frames
        .iter()
        .enumerate()
        .map(|(i, f)| {
            f.to_sample()
                .map_err(|source| DatasetError::Feature { row: i + 1, source })
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Episode { samples, success })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(action: Action) -> RecordedFrame {
        RecordedFrame {
            position: Vec2::new(100.0, 200.0),
            velocity: Vec2::new(-12.5, 3.0),
            energy: 80.0,
            target: Vec2::new(400.0, 200.0),
            distance_to_target: 300.0,
            angle_to_target: 0.0,
            grounded: true,
            ray_distances: (0..RAY_COUNT).map(|i| i as f32 * 2.5).collect(),
            ray_hits: (0..RAY_COUNT).map(|i| i % 3 == 0).collect(),
            action,
        }
    }

    fn idle_pattern(pattern: &[usize]) -> Vec<RecordedFrame> {
        // Alternates runs of idle frames with single moving frames.
        let mut frames = Vec::new();
        for &len in pattern {
            frames.extend((0..len).map(|_| frame(Action::NONE)));
            frames.push(frame(Action::new(1, false)));
        }
        frames
    }

    #[test]
    fn header_has_132_columns() {
        let h = header();
        assert_eq!(h.len(), 132);
        assert_eq!(h[0], "pos_x");
        assert_eq!(h[9], "is_grounded");
        assert_eq!(h[10], "ray_dist_0");
        assert_eq!(h[70], "ray_hit_0");
        assert_eq!(h[131], "use_energy");
    }

    #[test]
    fn csv_round_trip() {
        let frames = vec![frame(Action::new(-1, true)), frame(Action::NONE)];
        let mut buf = Vec::new();
        write_csv(&mut buf, &frames, true).unwrap();
        let text = String::from_utf8(buf.clone()).unwrap();
        assert!(text.starts_with("pos_x,pos_y,vel_x"));
        assert_eq!(read_csv(buf.as_slice()).unwrap(), frames);
    }

    #[test]
    fn bad_header_is_rejected() {
        let mut buf = Vec::new();
        write_csv(&mut buf, &[frame(Action::NONE)], true).unwrap();
        let text = String::from_utf8(buf).unwrap().replacen("energy", "fuel", 1);
        match read_csv(text.as_bytes()) {
            Err(DatasetError::Header { column, actual, .. }) => {
                assert_eq!(column, 4);
                assert_eq!(actual, "fuel");
            }
            other => panic!("expected header error, got {other:?}"),
        }
    }

    #[test]
    fn short_row_is_rejected() {
        let mut text = header().join(",");
        text.push('\n');
        text.push_str("1,2,3\n");
        assert!(matches!(
            read_csv(text.as_bytes()),
            Err(DatasetError::RowWidth {
                row: 1,
                expected: 132,
                actual: 3
            })
        ));
    }

    #[test]
    fn unparsable_value_names_its_column() {
        let mut buf = Vec::new();
        write_csv(&mut buf, &[frame(Action::NONE)], true).unwrap();
        let text = String::from_utf8(buf).unwrap().replacen(",80,", ",lots,", 1);
        match read_csv(text.as_bytes()) {
            Err(DatasetError::Value { row, column, value }) => {
                assert_eq!(row, 1);
                assert_eq!(column, "energy");
                assert_eq!(value, "lots");
            }
            other => panic!("expected value error, got {other:?}"),
        }
    }

    #[test]
    fn append_writes_header_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.csv");
        append_csv_file(&path, &[frame(Action::NONE)]).unwrap();
        append_csv_file(&path, &[frame(Action::new(1, true))]).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text.matches("pos_x").count(), 1);
        assert_eq!(read_csv_file(&path).unwrap().len(), 2);
    }

    #[test]
    fn idle_runs_are_thinned() {
        // Runs of 3, 10, 11, 25 idle frames; each followed by one moving frame.
        let frames = idle_pattern(&[3, 10, 11, 25]);
        let reduced = reduce_idle_runs(&frames, DEFAULT_MAX_IDLE_RUN, DEFAULT_KEEP_INTERVAL);
        // 3 + 10 + (10 + 1) + (10 + 3) idle frames kept, plus 4 moving frames.
        assert_eq!(reduced.len(), 3 + 10 + 11 + 13 + 4);
        let moving = reduced.iter().filter(|f| !f.action.is_idle()).count();
        assert_eq!(moving, 4);
    }

    #[test]
    fn reduction_keeps_everything_without_long_runs() {
        let frames = idle_pattern(&[1, 2, 10]);
        assert_eq!(reduce_idle_runs(&frames, 10, 5), frames);
        assert!(reduce_idle_runs(&[], 10, 5).is_empty());
    }

    #[test]
    fn frames_become_normalized_samples() {
        let episode = frames_to_episode(&[frame(Action::new(1, true))], true).unwrap();
        assert!(episode.success);
        let s = &episode.samples[0];
        assert_eq!(s.input.len(), features::FEATURE_COUNT);
        assert_eq!(s.target, vec![1.0, 1.0]);
        assert!((s.input[0] - 100.0 / 1350.0).abs() < 1e-6);
        // Target lands at feature slots 8..10, not at its CSV columns.
        assert!((s.input[8] - 400.0 / 1350.0).abs() < 1e-6);
    }

    #[test]
    fn short_ray_list_is_a_feature_error() {
        let mut f = frame(Action::NONE);
        f.ray_hits.truncate(10);
        assert!(matches!(
            frames_to_episode(&[f], false),
            Err(DatasetError::Feature { row: 1, .. })
        ));
    }
}
