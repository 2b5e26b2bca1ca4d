use ndarray::Array2;
use plotdata::core::plot_driver::{FileKind, PlotType};
use plotdata::core::prepare::{run_prepare, PrepareConfig};
use plotdata::io::file_handler::{Metadata, RasterProduct, RasterReader};
use plotdata::io::toolkit::{GeodesyToolkit, ToolCommand};
use plotdata::types::{LatLon, PlotError, PlotResult, Region};
use std::cell::RefCell;
use std::path::{Path, PathBuf};

/// Records every command and writes empty files where the command would
struct RecordingToolkit {
    calls: RefCell<Vec<String>>,
    fail_on: Option<&'static str>,
}

impl RecordingToolkit {
    fn new() -> Self {
        Self {
            calls: RefCell::new(Vec::new()),
            fail_on: None,
        }
    }

    fn failing_on(program: &'static str) -> Self {
        Self {
            fail_on: Some(program),
            ..Self::new()
        }
    }

    fn programs(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }
}

impl GeodesyToolkit for RecordingToolkit {
    fn run(&self, command: &dyn ToolCommand) -> PlotResult<String> {
        command.validate()?;
        let program = command.program();
        self.calls.borrow_mut().push(program.to_string());

        if self.fail_on == Some(program) {
            return Err(PlotError::ExternalProcess {
                program: program.to_string(),
                detail: "exit status 1".to_string(),
            });
        }
        for output in command.outputs() {
            if let Some(parent) = output.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&output, b"")?;
        }
        if program == "info.py" {
            return Ok("20200113\n20200101\n20210105\n".to_string());
        }
        Ok(String::new())
    }
}

struct FakeReader;

impl RasterReader for FakeReader {
    fn read(&self, path: &Path) -> PlotResult<RasterProduct> {
        let mut data = Array2::from_elem((5, 5), 0.01f32);
        if path.to_string_lossy().contains("SenAT") {
            // centre pixel unusable in the ascending track
            data[[2, 2]] = f32::NAN;
        }
        Ok(RasterProduct {
            data,
            metadata: self.metadata(path)?,
            region: Region::new(-155.7, -155.5, 19.3, 19.5)?,
        })
    }

    fn metadata(&self, _path: &Path) -> PlotResult<Metadata> {
        Ok(Metadata::from_pairs([
            ("START_DATE", "20200101"),
            ("END_DATE", "20210105"),
            ("LAT_REF1", "19.4"),
            ("mintpy.geocode.laloStep", "-0.000833, 0.000833"),
        ]))
    }
}

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn config(scratch: &Path) -> PrepareConfig {
    let mut config = PrepareConfig::new(
        scratch,
        vec![PathBuf::from("MaunaLoaSenAT124"), PathBuf::from("MaunaLoaSenDT87")],
        PlotType::Horzvert,
    );
    config.ref_lalo = Some(LatLon::new(19.4, -155.6));
    config
}

#[test]
fn test_full_pipeline_runs_every_step_once() {
    init_logging();
    let scratch = tempfile::tempdir().unwrap();
    let toolkit = RecordingToolkit::new();

    let products = run_prepare(&config(scratch.path()), &toolkit, &FakeReader).unwrap();

    let per_track = ["info.py", "timeseries2velocity.py", "geocode.py", "save_gdal.py", "mask.py"];
    let mut expected: Vec<&str> = per_track.iter().chain(per_track.iter()).copied().collect();
    expected.extend(["reference_point.py", "reference_point.py", "asc_desc2horz_vert.py"]);
    assert_eq!(toolkit.programs(), expected);

    assert_eq!(products.tracks.len(), 2);
    let masked = &products.tracks[0].masked;
    assert_eq!(
        masked,
        &scratch.path().join("MaunaLoa").join("SenAT124").join("geo_velocity_msk.h5")
    );
    assert_eq!(products.horizontal, Some(scratch.path().join("MaunaLoa").join("hz.h5")));

    let files = products.into_input_files();
    for kind in [FileKind::Ascending, FileKind::Descending, FileKind::Horizontal, FileKind::Vertical] {
        assert_eq!(files.len(kind), 1);
    }
}

#[test]
fn test_second_run_reuses_existing_products() {
    init_logging();
    let scratch = tempfile::tempdir().unwrap();
    run_prepare(&config(scratch.path()), &RecordingToolkit::new(), &FakeReader).unwrap();

    let toolkit = RecordingToolkit::new();
    let products = run_prepare(&config(scratch.path()), &toolkit, &FakeReader).unwrap();

    assert_eq!(toolkit.programs(), vec!["info.py", "info.py"]);
    assert!(products.vertical.is_some());
}

#[test]
fn test_failing_command_stops_the_run() {
    init_logging();
    let scratch = tempfile::tempdir().unwrap();
    let toolkit = RecordingToolkit::failing_on("geocode.py");

    let result = run_prepare(&config(scratch.path()), &toolkit, &FakeReader);

    assert!(matches!(result, Err(PlotError::ExternalProcess { .. })));
    assert_eq!(toolkit.programs(), vec!["info.py", "timeseries2velocity.py", "geocode.py"]);
}

#[test]
fn test_velocity_plot_skips_decomposition() {
    init_logging();
    let scratch = tempfile::tempdir().unwrap();
    let toolkit = RecordingToolkit::new();
    let mut config = config(scratch.path());
    config.plot_type = PlotType::Velocity;

    let products = run_prepare(&config, &toolkit, &FakeReader).unwrap();

    assert!(!toolkit.programs().iter().any(|p| p == "asc_desc2horz_vert.py"));
    assert!(products.horizontal.is_none());
}

#[test]
fn test_bad_track_name_is_rejected_before_any_command() {
    init_logging();
    let scratch = tempfile::tempdir().unwrap();
    let toolkit = RecordingToolkit::new();
    let config = PrepareConfig::new(scratch.path(), vec![PathBuf::from("MaunaLoa")], PlotType::Velocity);

    assert!(matches!(
        run_prepare(&config, &toolkit, &FakeReader),
        Err(PlotError::InputResolution(_))
    ));
    assert!(toolkit.programs().is_empty());
}
