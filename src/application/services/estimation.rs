//! Divergence-time estimation service
//!
//! Builds the estimator inputs (calibrated tree, sequence block, control
//! file), runs the estimator and maps its posterior summary back onto the
//! nodes of the input tree.

use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use crate::application::{ApplicationError, ApplicationResult, IoResultExt};
use crate::domain::{
    annotate, assign_node_times, auto_root_age, parse_newick, render_time_table, Alignment,
    AlignmentFormat, AnnotatedTree, CalibrationParser, CalibrationTable, ControlFile,
    ControlParams, NodeTime, PhyloTree, PosteriorParser, SubstitutionModel,
};
use crate::infrastructure::traits::{CommandRunner, FileSystem};

/// Everything one estimation run needs.
#[derive(Debug, Clone)]
pub struct EstimationRequest {
    pub seq: PathBuf,
    pub seq_format: Option<AlignmentFormat>,
    pub tree: PathBuf,
    /// Literal constraint or path to a file of constraints
    pub calibration: Option<String>,
    pub auto_calibration: bool,
    pub model: SubstitutionModel,
    pub mut_rate: f64,
    pub filter: f64,
    pub nsample: Option<u64>,
    pub prefix: PathBuf,
}

/// Output file names derived from a prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputPaths {
    prefix: PathBuf,
}

impl OutputPaths {
    pub fn new(prefix: impl Into<PathBuf>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    fn with_suffix(&self, suffix: &str) -> PathBuf {
        let mut path: OsString = self.prefix.clone().into_os_string();
        path.push(suffix);
        PathBuf::from(path)
    }

    pub fn mcmc(&self) -> PathBuf {
        self.with_suffix(".mcmc.txt")
    }

    pub fn report(&self) -> PathBuf {
        self.with_suffix(".out.txt")
    }

    pub fn time_table(&self) -> PathBuf {
        self.with_suffix(".haptime.txt")
    }

    pub fn sequences(&self) -> PathBuf {
        self.with_suffix(".seq.txt")
    }

    pub fn tree(&self) -> PathBuf {
        self.with_suffix(".tree.txt")
    }

    pub fn control(&self) -> PathBuf {
        self.with_suffix(".ctl")
    }
}

/// Inputs written for the estimator.
#[derive(Debug, Clone)]
pub struct PreparedRun {
    pub tree: AnnotatedTree,
    pub control: ControlFile,
    pub seqfile: PathBuf,
    pub treefile: PathBuf,
    pub ctlfile: PathBuf,
}

/// Result of a completed run.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub rows: Vec<NodeTime>,
    pub table: PathBuf,
    pub report: PathBuf,
}

/// Service for preparing, running and summarizing estimator runs.
pub struct EstimationService {
    fs: Arc<dyn FileSystem>,
    cmd: Arc<dyn CommandRunner>,
    estimator: String,
    calibration_table: Option<PathBuf>,
}

impl EstimationService {
    pub fn new(
        fs: Arc<dyn FileSystem>,
        cmd: Arc<dyn CommandRunner>,
        estimator: impl Into<String>,
        calibration_table: Option<PathBuf>,
    ) -> Self {
        Self {
            fs,
            cmd,
            estimator: estimator.into(),
            calibration_table,
        }
    }

    /// Constraint lines from `source`: file contents if it names an existing
    /// file, otherwise `source` itself as the single constraint.
    pub fn calibration_lines(&self, source: &str) -> ApplicationResult<Vec<String>> {
        let path = Path::new(source);
        if self.fs.is_file(path) {
            debug!("reading calibrations from {}", path.display());
            let content = self
                .fs
                .read_to_string(path)
                .with_path_context("read calibration file", path)?;
            Ok(content.lines().map(str::to_string).collect())
        } else {
            Ok(vec![source.to_string()])
        }
    }

    pub fn read_tree(&self, path: &Path) -> ApplicationResult<PhyloTree> {
        let content = self
            .fs
            .read_to_string(path)
            .with_path_context("read tree file", path)?;
        Ok(parse_newick(&content)?)
    }

    /// Normalized tree only, as the estimator would see its topology.
    pub fn normalized_tree(&self, path: &Path) -> ApplicationResult<PhyloTree> {
        let mut tree = self.read_tree(path)?;
        tree.normalize()?;
        Ok(tree)
    }

    pub fn load_calibration_table(&self) -> ApplicationResult<CalibrationTable> {
        match &self.calibration_table {
            Some(path) => {
                let content = self
                    .fs
                    .read_to_string(path)
                    .with_path_context("read calibration table", path)?;
                Ok(CalibrationTable::parse(&content)?)
            }
            None => {
                warn!("No calibration table configured, automatic calibration has no entries");
                Ok(CalibrationTable::default())
            }
        }
    }

    /// Normalize the tree and apply explicit or automatic calibration.
    #[instrument(level = "debug", skip(self, request))]
    pub fn calibrate_tree(&self, request: &EstimationRequest) -> ApplicationResult<AnnotatedTree> {
        if !(request.auto_calibration || request.calibration.is_some()) {
            return Err(ApplicationError::MissingCalibration);
        }
        info!("Read tree file and calibration");
        let tree = self.normalized_tree(&request.tree)?;

        match &request.calibration {
            Some(source) => {
                if request.auto_calibration {
                    warn!("Explicit calibration given, automatic calibration is ignored");
                }
                let lines = self.calibration_lines(source)?;
                let calibrations = CalibrationParser::new().parse_lines(&lines)?;
                Ok(annotate(tree, &calibrations)?)
            }
            None => {
                let table = self.load_calibration_table()?;
                let root_age = auto_root_age(&tree, &table);
                let mut annotated = annotate(tree, &[])?;
                annotated.root_age = root_age;
                Ok(annotated)
            }
        }
    }

    pub fn clean_alignment(&self, request: &EstimationRequest) -> ApplicationResult<Alignment> {
        info!("Read seq file");
        let format = request
            .seq_format
            .unwrap_or_else(|| AlignmentFormat::from_path(&request.seq));
        let content = self
            .fs
            .read_to_string(&request.seq)
            .with_path_context("read sequence file", &request.seq)?;
        let alignment = Alignment::parse(&content, format)?;
        Ok(alignment.filter_missing(request.filter)?)
    }

    /// Write tree, sequence block and control file to the given locations.
    fn prepare_files(
        &self,
        request: &EstimationRequest,
        outputs: &OutputPaths,
        seqfile: PathBuf,
        treefile: PathBuf,
        ctlfile: PathBuf,
    ) -> ApplicationResult<PreparedRun> {
        let tree = self.calibrate_tree(request)?;
        let alignment = self.clean_alignment(request)?;
        let control = ControlFile::assemble(&ControlParams {
            seqfile: seqfile.clone(),
            treefile: treefile.clone(),
            mcmcfile: outputs.mcmc(),
            outfile: outputs.report(),
            model: request.model,
            mut_rate: request.mut_rate,
            nsample: request.nsample,
            root_age: tree.root_age,
        })?;

        for (path, content, what) in [
            (&seqfile, alignment.to_block(), "write sequence file"),
            (&treefile, tree.to_tree_file(), "write tree file"),
            (&ctlfile, control.render(), "write control file"),
        ] {
            self.fs.ensure_parent(path).with_path_context(what, path)?;
            self.fs.write(path, &content).with_path_context(what, path)?;
        }
        debug!(
            "prepared {} leaves, root age {:?}",
            tree.leaf_count, tree.root_age
        );

        Ok(PreparedRun {
            tree,
            control,
            seqfile,
            treefile,
            ctlfile,
        })
    }

    /// Write the estimator inputs next to the output prefix without running it.
    pub fn prepare(&self, request: &EstimationRequest) -> ApplicationResult<PreparedRun> {
        let outputs = OutputPaths::new(absolute(&request.prefix)?);
        self.prepare_files(
            request,
            &outputs,
            outputs.sequences(),
            outputs.tree(),
            outputs.control(),
        )
    }

    /// Full run: inputs in a temporary directory, estimator, summary table.
    #[instrument(level = "debug", skip(self, request))]
    pub fn run(&self, request: &EstimationRequest) -> ApplicationResult<RunSummary> {
        if !(request.auto_calibration || request.calibration.is_some()) {
            return Err(ApplicationError::MissingCalibration);
        }
        let outputs = OutputPaths::new(absolute(&request.prefix)?);
        self.fs
            .ensure_parent(&outputs.report())
            .with_path_context("create output directory", &outputs.report())?;
        let workdir = tempfile::Builder::new()
            .prefix("haptime-")
            .tempdir()
            .with_path_context("create temporary directory", &std::env::temp_dir())?;

        let prepared = self.prepare_files(
            request,
            &outputs,
            workdir.path().join("seq.txt"),
            workdir.path().join("tree.txt"),
            workdir.path().join("mcmctree.ctl"),
        )?;

        self.clear_previous_outputs(&outputs)?;

        info!("Estimating divergence time, this may take some time");
        self.invoke_estimator(&prepared.ctlfile, workdir.path())?;

        info!("Summarizing output result");
        let table = outputs.time_table();
        let rows = self.summarize(&request.tree, &outputs.report(), &table)?;

        let workdir_path = workdir.path().to_path_buf();
        workdir
            .close()
            .with_path_context("remove temporary directory", &workdir_path)?;

        Ok(RunSummary {
            rows,
            table,
            report: outputs.report(),
        })
    }

    /// Outputs of an earlier run with the same prefix must not be read back.
    fn clear_previous_outputs(&self, outputs: &OutputPaths) -> ApplicationResult<()> {
        for path in [outputs.report(), outputs.mcmc()] {
            match self.fs.remove_file(&path) {
                Ok(()) => debug!("removed previous output {}", path.display()),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e).with_path_context("remove previous output", &path),
            }
        }
        Ok(())
    }

    fn invoke_estimator(&self, ctlfile: &Path, workdir: &Path) -> ApplicationResult<()> {
        let ctl = ctlfile.to_string_lossy();
        debug!("running {} {}", self.estimator, ctl);
        let output = self
            .cmd
            .run_in_dir(&self.estimator, &[ctl.as_ref()], workdir)
            .map_err(|e| ApplicationError::Estimator {
                message: format!("cannot start '{}': {}", self.estimator, e),
                exit_code: None,
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ApplicationError::Estimator {
                message: format!(
                    "'{}' exited with {}: {}",
                    self.estimator,
                    output.status,
                    stderr.trim()
                ),
                exit_code: output.status.code(),
            });
        }
        Ok(())
    }

    /// Pair the estimator report with the original (un-normalized) tree and
    /// write the time table.
    pub fn summarize(
        &self,
        original_tree: &Path,
        report: &Path,
        table: &Path,
    ) -> ApplicationResult<Vec<NodeTime>> {
        let tree = self.read_tree(original_tree)?;
        if !self.fs.is_file(report) {
            return Err(ApplicationError::Estimator {
                message: format!("output file not found: {}", report.display()),
                exit_code: None,
            });
        }
        let content = self
            .fs
            .read_to_string(report)
            .with_path_context("read estimator output", report)?;
        let records = PosteriorParser::new().parse(&content)?;
        let rows = assign_node_times(&tree, &records)?;

        self.fs
            .ensure_parent(table)
            .with_path_context("write time table", table)?;
        self.fs
            .write(table, &render_time_table(&rows))
            .with_path_context("write time table", table)?;
        debug!("wrote {} rows to {}", rows.len(), table.display());
        Ok(rows)
    }
}

fn absolute(path: &Path) -> ApplicationResult<PathBuf> {
    std::path::absolute(path).with_path_context("resolve output prefix", path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{DomainError, Prior};
    use crate::infrastructure::traits::RealFileSystem;
    use std::io;
    use std::process::Output;
    use std::sync::Mutex;
    use tempfile::TempDir;

    const TREE: &str = "((A,(B,C)),D)R;";
    const SEQS: &str = ">A\nACGTAC\n>B\nACGTAA\n>C\nACGNAC\n>D\nACGTCC\n";
    const REPORT: &str = "\
Posterior mean (95% Equal-tail CI) (95% HPD CI) HPD-CI-width

t_n5           0.5000 (0.4000, 0.6000) (0.4100, 0.6100)  0.2000 (Jnode  6)
t_n6           0.3000 (0.2000, 0.4000) (0.2100, 0.4100)  0.2000 (Jnode  5)
t_n7           0.1500 (0.1000, 0.2000) (0.1100, 0.2100)  0.1000 (Jnode  4)
lnL          -10.0000 (-12.0, -9.0) (-12.0, -9.0)  3.0000
";

    /// Pretends to be the estimator: records the call and writes a canned report.
    struct FakeEstimator {
        report: Option<(PathBuf, String)>,
        exit_code: i32,
        calls: Mutex<Vec<(String, Vec<String>, PathBuf)>>,
    }

    impl FakeEstimator {
        fn writing(report: PathBuf) -> Self {
            Self {
                report: Some((report, REPORT.to_string())),
                exit_code: 0,
                calls: Mutex::new(Vec::new()),
            }
        }

        fn failing(exit_code: i32) -> Self {
            Self {
                report: None,
                exit_code,
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[cfg(unix)]
    fn status(code: i32) -> std::process::ExitStatus {
        use std::os::unix::process::ExitStatusExt;
        std::process::ExitStatus::from_raw(code << 8)
    }

    impl CommandRunner for FakeEstimator {
        fn run_in_dir(&self, cmd: &str, args: &[&str], dir: &Path) -> io::Result<Output> {
            self.calls.lock().unwrap().push((
                cmd.to_string(),
                args.iter().map(|a| a.to_string()).collect(),
                dir.to_path_buf(),
            ));
            if let Some((path, content)) = &self.report {
                std::fs::write(path, content)?;
            }
            Ok(Output {
                status: status(self.exit_code),
                stdout: Vec::new(),
                stderr: b"boom".to_vec(),
            })
        }
    }

    fn setup() -> (TempDir, EstimationRequest) {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("tree.nwk"), TREE).unwrap();
        std::fs::write(temp.path().join("seqs.fasta"), SEQS).unwrap();
        let request = EstimationRequest {
            seq: temp.path().join("seqs.fasta"),
            seq_format: None,
            tree: temp.path().join("tree.nwk"),
            calibration: Some("B:100-200".to_string()),
            auto_calibration: false,
            model: SubstitutionModel::Hky85,
            mut_rate: 7.6e-10,
            filter: 0.2,
            nsample: None,
            prefix: temp.path().join("out/TimeEstimation"),
        };
        (temp, request)
    }

    fn service(cmd: Arc<dyn CommandRunner>, table: Option<PathBuf>) -> EstimationService {
        EstimationService::new(Arc::new(RealFileSystem), cmd, "mcmctree", table)
    }

    #[test]
    fn given_prefix_when_deriving_outputs_then_appends_suffixes() {
        let outputs = OutputPaths::new("/data/run/TimeEstimation");

        assert_eq!(outputs.report(), PathBuf::from("/data/run/TimeEstimation.out.txt"));
        assert_eq!(outputs.mcmc(), PathBuf::from("/data/run/TimeEstimation.mcmc.txt"));
        assert_eq!(
            outputs.time_table(),
            PathBuf::from("/data/run/TimeEstimation.haptime.txt")
        );
        assert_eq!(outputs.control(), PathBuf::from("/data/run/TimeEstimation.ctl"));
    }

    #[test]
    fn given_no_calibration_when_running_then_missing_calibration() {
        let (_temp, mut request) = setup();
        request.calibration = None;
        let svc = service(Arc::new(FakeEstimator::failing(0)), None);

        let result = svc.run(&request);
        assert!(matches!(result, Err(ApplicationError::MissingCalibration)));
    }

    #[test]
    fn given_literal_calibration_when_preparing_then_writes_inputs() {
        let (temp, request) = setup();
        let svc = service(Arc::new(FakeEstimator::failing(0)), None);

        let prepared = svc.prepare(&request).unwrap();

        let tree = std::fs::read_to_string(&prepared.treefile).unwrap();
        assert_eq!(tree, "4 1\n\n((A,(B(100, 200),C)),D)R;\n");
        let seqs = std::fs::read_to_string(&prepared.seqfile).unwrap();
        assert!(seqs.starts_with("4 5\n"));
        let ctl = std::fs::read_to_string(&prepared.ctlfile).unwrap();
        assert!(ctl.contains("model = 4"));
        assert!(prepared.ctlfile.starts_with(temp.path().join("out")));
    }

    #[test]
    fn given_calibration_file_when_reading_lines_then_uses_contents() {
        let (temp, _) = setup();
        let file = temp.path().join("cal.txt");
        std::fs::write(&file, "B:100-200\n\nR:<300\n").unwrap();
        let svc = service(Arc::new(FakeEstimator::failing(0)), None);

        let lines = svc.calibration_lines(file.to_str().unwrap()).unwrap();
        assert_eq!(lines, vec!["B:100-200", "", "R:<300"]);

        let literal = svc.calibration_lines("B:100-200").unwrap();
        assert_eq!(literal, vec!["B:100-200"]);
    }

    #[test]
    fn given_auto_calibration_when_calibrating_then_root_age_from_table() {
        let (temp, mut request) = setup();
        let table = temp.path().join("ages.tsv");
        std::fs::write(&table, "Haplogroup\tLower1\tUpper1\nR\t0.8\t1.2\n").unwrap();
        request.calibration = None;
        request.auto_calibration = true;
        let svc = service(Arc::new(FakeEstimator::failing(0)), Some(table));

        let annotated = svc.calibrate_tree(&request).unwrap();

        assert_eq!(annotated.root_age, Some(Prior::Bounded(0.8, 1.2)));
        assert_eq!(annotated.tree.to_newick(), "((A,(B,C)),D)R;");
    }

    #[test]
    fn given_unknown_calibration_node_when_calibrating_then_node_not_found() {
        let (_temp, mut request) = setup();
        request.calibration = Some("Z:100-200".to_string());
        let svc = service(Arc::new(FakeEstimator::failing(0)), None);

        let result = svc.calibrate_tree(&request);
        assert!(matches!(
            result,
            Err(ApplicationError::Domain(DomainError::NodeNotFound(ref n))) if n == "Z"
        ));
    }

    #[cfg(unix)]
    #[test]
    fn given_successful_estimator_when_running_then_writes_time_table() {
        let (temp, request) = setup();
        let report = temp.path().join("out/TimeEstimation.out.txt");
        let fake = Arc::new(FakeEstimator::writing(report));
        let svc = service(fake.clone(), None);

        let summary = svc.run(&request).unwrap();

        let names: Vec<_> = summary.rows.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["R", "NoName0", "NoName1"]);
        let table = std::fs::read_to_string(&summary.table).unwrap();
        assert!(table.starts_with("NodeName\tNodeTime\tLower\tUpper\nR\t0.5000\t0.4100\t0.6100\n"));

        let calls = fake.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "mcmctree");
        assert!(calls[0].1[0].ends_with("mcmctree.ctl"));
        // temporary working directory is removed afterwards
        assert!(!calls[0].2.exists());
    }

    #[cfg(unix)]
    #[test]
    fn given_failing_estimator_when_running_then_estimator_error() {
        let (_temp, request) = setup();
        let svc = service(Arc::new(FakeEstimator::failing(3)), None);

        let result = svc.run(&request);
        assert!(matches!(
            result,
            Err(ApplicationError::Estimator {
                exit_code: Some(3),
                ..
            })
        ));
    }

    #[cfg(unix)]
    #[test]
    fn given_estimator_without_report_when_running_then_estimator_error() {
        let (_temp, request) = setup();
        let svc = service(Arc::new(FakeEstimator::failing(0)), None);

        let result = svc.run(&request);
        assert!(matches!(
            result,
            Err(ApplicationError::Estimator { exit_code: None, .. })
        ));
    }

    #[cfg(unix)]
    #[test]
    fn given_stale_report_when_estimator_writes_nothing_then_estimator_error() {
        let (temp, request) = setup();
        let report = temp.path().join("out/TimeEstimation.out.txt");
        let mcmc = temp.path().join("out/TimeEstimation.mcmc.txt");
        std::fs::create_dir_all(temp.path().join("out")).unwrap();
        std::fs::write(&report, REPORT.replace("0.5000", "9.9000")).unwrap();
        std::fs::write(&mcmc, "Gen\tt_n5\n").unwrap();
        let svc = service(Arc::new(FakeEstimator::failing(0)), None);

        let result = svc.run(&request);

        assert!(matches!(
            result,
            Err(ApplicationError::Estimator { exit_code: None, .. })
        ));
        assert!(!report.exists());
        assert!(!mcmc.exists());
        assert!(!temp.path().join("out/TimeEstimation.haptime.txt").exists());
    }
}
