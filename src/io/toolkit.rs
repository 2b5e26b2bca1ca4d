use crate::types::{LatLon, PlotError, PlotResult};
use chrono::NaiveDate;
use std::fmt;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// A validated invocation of one external geodesy command
pub trait ToolCommand: fmt::Debug {
    /// Executable name as installed by the toolkit
    fn program(&self) -> &'static str;

    fn args(&self) -> Vec<String>;

    /// Files the command is expected to write
    fn outputs(&self) -> Vec<PathBuf> {
        Vec::new()
    }

    fn working_dir(&self) -> Option<&Path> {
        None
    }

    fn validate(&self) -> PlotResult<()> {
        Ok(())
    }
}

/// Capability to run external geodesy commands; returns captured standard output
pub trait GeodesyToolkit {
    fn run(&self, command: &dyn ToolCommand) -> PlotResult<String>;
}

fn invalid(program: &str, detail: impl Into<String>) -> PlotError {
    PlotError::ExternalProcess {
        program: program.to_string(),
        detail: detail.into(),
    }
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn mintpy_date(date: NaiveDate) -> String {
    date.format("%Y%m%d").to_string()
}

/// `info.py <file> --date`: list acquisition dates of a time-series file
#[derive(Debug, Clone)]
pub struct ListDates {
    pub timeseries: PathBuf,
}

impl ToolCommand for ListDates {
    fn program(&self) -> &'static str {
        "info.py"
    }

    fn args(&self) -> Vec<String> {
        vec![path_arg(&self.timeseries), "--date".to_string()]
    }
}

/// Parse the `YYYYMMDD` lines printed by [`ListDates`]
pub fn parse_date_listing(stdout: &str) -> PlotResult<Vec<NaiveDate>> {
    let mut dates = stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| {
            NaiveDate::parse_from_str(line, "%Y%m%d")
                .map_err(|e| PlotError::Metadata(format!("Unexpected date line '{}': {}", line, e)))
        })
        .collect::<PlotResult<Vec<_>>>()?;
    dates.sort();
    Ok(dates)
}

/// `timeseries2velocity.py`: estimate a velocity product over a date window
#[derive(Debug, Clone)]
pub struct TimeseriesToVelocity {
    pub timeseries: PathBuf,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub output: PathBuf,
}

impl ToolCommand for TimeseriesToVelocity {
    fn program(&self) -> &'static str {
        "timeseries2velocity.py"
    }

    fn args(&self) -> Vec<String> {
        vec![
            path_arg(&self.timeseries),
            "--start-date".to_string(),
            mintpy_date(self.start_date),
            "--end-date".to_string(),
            mintpy_date(self.end_date),
            "--output".to_string(),
            path_arg(&self.output),
        ]
    }

    fn outputs(&self) -> Vec<PathBuf> {
        vec![self.output.clone()]
    }

    fn validate(&self) -> PlotResult<()> {
        if self.start_date >= self.end_date {
            return Err(invalid(
                self.program(),
                format!("start date {} is not before end date {}", self.start_date, self.end_date),
            ));
        }
        Ok(())
    }
}

/// `geocode.py`: resample a radar-coordinate product onto a regular lat/lon grid
#[derive(Debug, Clone)]
pub struct Geocode {
    pub file: PathBuf,
    pub lat_step: f64,
    pub lon_step: f64,
    pub outdir: PathBuf,
}

impl ToolCommand for Geocode {
    fn program(&self) -> &'static str {
        "geocode.py"
    }

    fn args(&self) -> Vec<String> {
        vec![
            path_arg(&self.file),
            "--lalo-step".to_string(),
            self.lat_step.to_string(),
            self.lon_step.to_string(),
            "--outdir".to_string(),
            path_arg(&self.outdir),
        ]
    }

    fn outputs(&self) -> Vec<PathBuf> {
        let name = self
            .file
            .file_name()
            .map(|n| format!("geo_{}", n.to_string_lossy()))
            .unwrap_or_default();
        vec![self.outdir.join(name)]
    }

    fn working_dir(&self) -> Option<&Path> {
        Some(&self.outdir)
    }

    fn validate(&self) -> PlotResult<()> {
        if !self.lat_step.is_finite() || !self.lon_step.is_finite() || self.lon_step == 0.0 || self.lat_step == 0.0 {
            return Err(invalid(
                self.program(),
                format!("invalid lat/lon step {} {}", self.lat_step, self.lon_step),
            ));
        }
        Ok(())
    }
}

/// `save_gdal.py`: export one dataset of a MintPy file to GeoTIFF
#[derive(Debug, Clone)]
pub struct SaveGdal {
    pub file: PathBuf,
    pub dataset: String,
    pub output: PathBuf,
}

impl ToolCommand for SaveGdal {
    fn program(&self) -> &'static str {
        "save_gdal.py"
    }

    fn args(&self) -> Vec<String> {
        vec![
            path_arg(&self.file),
            "--dset".to_string(),
            self.dataset.clone(),
            "--output".to_string(),
            path_arg(&self.output),
        ]
    }

    fn outputs(&self) -> Vec<PathBuf> {
        vec![self.output.clone()]
    }

    fn validate(&self) -> PlotResult<()> {
        if self.dataset.trim().is_empty() {
            return Err(invalid(self.program(), "empty dataset name"));
        }
        Ok(())
    }
}

/// `mask.py`: blank pixels whose mask value falls below a threshold
#[derive(Debug, Clone)]
pub struct Mask {
    pub file: PathBuf,
    pub mask: PathBuf,
    pub mask_vmin: f64,
    pub outfile: PathBuf,
}

impl ToolCommand for Mask {
    fn program(&self) -> &'static str {
        "mask.py"
    }

    fn args(&self) -> Vec<String> {
        vec![
            path_arg(&self.file),
            "--mask".to_string(),
            path_arg(&self.mask),
            "--mask-vmin".to_string(),
            self.mask_vmin.to_string(),
            "--outfile".to_string(),
            path_arg(&self.outfile),
        ]
    }

    fn outputs(&self) -> Vec<PathBuf> {
        vec![self.outfile.clone()]
    }

    fn validate(&self) -> PlotResult<()> {
        if !(0.0..=1.0).contains(&self.mask_vmin) {
            return Err(invalid(
                self.program(),
                format!("coherence threshold {} outside 0..1", self.mask_vmin),
            ));
        }
        if self.file == self.outfile {
            return Err(invalid(self.program(), "output would overwrite the input product"));
        }
        Ok(())
    }
}

/// `reference_point.py`: re-reference a product to a pixel, in place
#[derive(Debug, Clone)]
pub struct ReferencePoint {
    pub file: PathBuf,
    pub lalo: LatLon,
}

impl ToolCommand for ReferencePoint {
    fn program(&self) -> &'static str {
        "reference_point.py"
    }

    fn args(&self) -> Vec<String> {
        vec![
            path_arg(&self.file),
            "--lat".to_string(),
            self.lalo.lat.to_string(),
            "--lon".to_string(),
            self.lalo.lon.to_string(),
        ]
    }

    fn outputs(&self) -> Vec<PathBuf> {
        vec![self.file.clone()]
    }

    fn validate(&self) -> PlotResult<()> {
        if !(-90.0..=90.0).contains(&self.lalo.lat) || !(-180.0..=360.0).contains(&self.lalo.lon) {
            return Err(invalid(
                self.program(),
                format!("reference point {:?} out of range", self.lalo),
            ));
        }
        Ok(())
    }
}

/// `asc_desc2horz_vert.py`: decompose ascending + descending line-of-sight into horizontal/vertical
#[derive(Debug, Clone)]
pub struct AscDescToHorzVert {
    pub ascending: PathBuf,
    pub descending: PathBuf,
    pub horizontal: PathBuf,
    pub vertical: PathBuf,
}

impl ToolCommand for AscDescToHorzVert {
    fn program(&self) -> &'static str {
        "asc_desc2horz_vert.py"
    }

    fn args(&self) -> Vec<String> {
        vec![
            path_arg(&self.ascending),
            path_arg(&self.descending),
            "--output".to_string(),
            path_arg(&self.horizontal),
            path_arg(&self.vertical),
        ]
    }

    fn outputs(&self) -> Vec<PathBuf> {
        vec![self.horizontal.clone(), self.vertical.clone()]
    }

    fn validate(&self) -> PlotResult<()> {
        if self.ascending == self.descending {
            return Err(invalid(self.program(), "ascending and descending inputs are the same file"));
        }
        Ok(())
    }
}

/// `save_gbis.py`: export a product for GBIS inversion
#[derive(Debug, Clone)]
pub struct SaveGbis {
    pub file: PathBuf,
    pub geometry: PathBuf,
    pub out_dir: PathBuf,
}

impl ToolCommand for SaveGbis {
    fn program(&self) -> &'static str {
        "save_gbis.py"
    }

    fn args(&self) -> Vec<String> {
        vec![
            path_arg(&self.file),
            "-g".to_string(),
            path_arg(&self.geometry),
            "--out-dir".to_string(),
            path_arg(&self.out_dir),
            "--nodisplay".to_string(),
        ]
    }
}

/// Runs MintPy command-line entry points as child processes
#[derive(Debug, Clone, Default)]
pub struct MintpyCli {
    /// Directory holding the executables; `PATH` lookup when unset
    pub bin_dir: Option<PathBuf>,
    /// Kill a command that runs longer than this
    pub timeout: Option<Duration>,
}

impl MintpyCli {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_bin_dir<P: AsRef<Path>>(mut self, dir: P) -> Self {
        self.bin_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    fn executable(&self, program: &str) -> PathBuf {
        match &self.bin_dir {
            Some(dir) => dir.join(program),
            None => PathBuf::from(program),
        }
    }
}

impl GeodesyToolkit for MintpyCli {
    fn run(&self, command: &dyn ToolCommand) -> PlotResult<String> {
        command.validate()?;

        let program = command.program();
        let args = command.args();
        log::info!("Running {} {}", program, args.join(" "));

        let mut process = Command::new(self.executable(program));
        process.args(&args).stdout(Stdio::piped()).stderr(Stdio::piped());
        if let Some(dir) = command.working_dir() {
            process.current_dir(dir);
        }

        let mut child = process
            .spawn()
            .map_err(|e| invalid(program, format!("failed to start: {}", e)))?;

        // drain pipes off-thread so a chatty command cannot block on a full pipe
        let stdout_reader = drain(child.stdout.take());
        let stderr_reader = drain(child.stderr.take());

        let started = Instant::now();
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) => {}
                Err(e) => {
                    terminate(&mut child);
                    return Err(invalid(program, format!("lost track of process: {}", e)));
                }
            }
            if let Some(limit) = self.timeout {
                if started.elapsed() > limit {
                    terminate(&mut child);
                    return Err(invalid(program, format!("timed out after {:?}", limit)));
                }
            }
            std::thread::sleep(Duration::from_millis(100));
        };

        let stdout = collect(program, "stdout", stdout_reader)?;
        let stderr = collect(program, "stderr", stderr_reader)?;

        if !status.success() {
            let tail: Vec<&str> = stderr.lines().rev().take(5).collect();
            let tail: Vec<&str> = tail.into_iter().rev().collect();
            return Err(invalid(
                program,
                format!("exited with {}: {}", status, tail.join(" | ")),
            ));
        }

        log::debug!("{} finished in {:.1}s", program, started.elapsed().as_secs_f64());
        Ok(stdout)
    }
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> JoinHandle<std::io::Result<Vec<u8>>> {
    std::thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            pipe.read_to_end(&mut buf)?;
        }
        Ok(buf)
    })
}

/// Captured output with invalid UTF-8 replaced rather than dropped
fn collect(
    program: &str,
    stream: &str,
    reader: JoinHandle<std::io::Result<Vec<u8>>>,
) -> PlotResult<String> {
    match reader.join() {
        Ok(Ok(bytes)) => Ok(String::from_utf8_lossy(&bytes).into_owned()),
        Ok(Err(e)) => Err(invalid(program, format!("failed to read {}: {}", stream, e))),
        Err(_) => Err(invalid(program, format!("{} reader panicked", stream))),
    }
}

fn terminate(child: &mut Child) {
    if let Err(e) = child.kill() {
        log::warn!("Failed to kill child {}: {}", child.id(), e);
    }
    let _ = child.wait();
}
