//! Test helper utilities

#![allow(dead_code)]

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tempfile::TempDir;

use klpgen::codestream::{Codestream, CodestreamTable, ExtSymbols, FileData};
use klpgen::extractor::backend::{
    lp_out_file, BackendError, BackendResult, ExtractorBackend, Invocation, InvocationContext,
};
use klpgen::extractor::{CompilerCommandSource, ExtractError, ExtractResult, SymbolTableSource};
use klpgen::patches::PatchSet;

pub const BSC: &str = "bsc1";
pub const ARCHS: [&str; 2] = ["x86_64", "s390x"];

/// A livepatch directory plus extracted kernels in a scratch directory.
pub struct TestLivepatch {
    pub temp: TempDir,
    pub work: PathBuf,
    pub data: PathBuf,
}

impl TestLivepatch {
    pub fn bsc_path(&self) -> PathBuf {
        self.work.join(BSC)
    }
}

pub fn kernel_of(cs: &str) -> String {
    format!("5.14.21-{}", cs.replace('.', "_"))
}

/// Create `<work>/bsc1` with `conf.json` and `codestreams.json`, and an empty
/// vmlinux for every codestream and architecture.
pub fn setup_livepatch(codestreams: &[(&str, &[&str])]) -> TestLivepatch {
    let temp = TempDir::new().expect("Failed to create temp dir");
    let work = temp.path().join("work");
    let data = temp.path().join("data");
    let bsc = work.join(BSC);
    fs::create_dir_all(&bsc).expect("Failed to create bsc dir");

    fs::write(
        bsc.join("conf.json"),
        r#"{"mod":"vmlinux","conf":"CONFIG_NET_SCH_QFQ","archs":["x86_64","s390x"],"cve":"CVE-2024-0001"}"#,
    )
    .expect("Failed to write conf.json");

    let mut table = CodestreamTable::new();
    for (cs, files) in codestreams {
        let kernel = kernel_of(cs);
        let mut codestream = Codestream::new(&kernel);
        codestream.archs = ARCHS.iter().map(|a| a.to_string()).collect();
        for f in *files {
            codestream.files.insert(*f, FileData::with_symbols(["qfq_change_agg"]));
        }
        table.insert(*cs, codestream);

        for arch in ARCHS {
            let boot = data.join(cs).join(arch).join("boot");
            fs::create_dir_all(&boot).expect("Failed to create boot dir");
            fs::write(boot.join(format!("vmlinux-{}-default", kernel)), "")
                .expect("Failed to write vmlinux");
        }
    }
    fs::write(
        bsc.join("codestreams.json"),
        serde_json::to_string_pretty(&table).expect("Failed to serialize table"),
    )
    .expect("Failed to write codestreams.json");

    TestLivepatch { temp, work, data }
}

/// Extraction backend writing canned output instead of running a tool.
pub struct MockBackend {
    bsc: String,
    /// (codestream, file) -> generated source
    outputs: HashMap<(String, String), String>,
    ext_symbols: ExtSymbols,
    fail_on: Option<(String, String)>,
    runs: Mutex<Vec<(String, String)>>,
}

impl MockBackend {
    pub fn new(ext_symbols: ExtSymbols) -> Self {
        Self {
            bsc: BSC.to_string(),
            outputs: HashMap::new(),
            ext_symbols,
            fail_on: None,
            runs: Mutex::new(Vec::new()),
        }
    }

    pub fn with_output(mut self, cs: &str, fname: &str, content: &str) -> Self {
        self.outputs
            .insert((cs.to_string(), fname.to_string()), content.to_string());
        self
    }

    pub fn failing_on(mut self, cs: &str, fname: &str) -> Self {
        self.fail_on = Some((cs.to_string(), fname.to_string()));
        self
    }

    pub fn runs(&self) -> Vec<(String, String)> {
        self.runs.lock().unwrap().clone()
    }
}

impl ExtractorBackend for MockBackend {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn tool_name(&self) -> &'static str {
        "mock-extract"
    }

    fn is_available(&self) -> bool {
        true
    }

    fn command_args(&self, ctx: &InvocationContext<'_>) -> Invocation {
        Invocation {
            args: vec![
                ctx.out_dir.to_string_lossy().into_owned(),
                ctx.cs.to_string(),
                ctx.fname.to_string(),
            ],
            env: Vec::new(),
        }
    }

    fn output_file(&self, fname: &str) -> String {
        lp_out_file(&self.bsc, fname)
    }

    fn report_path(&self, out_dir: &Path) -> PathBuf {
        out_dir.join("ext_syms.json")
    }

    fn parse_report(&self, contents: &str) -> Result<ExtSymbols, String> {
        serde_json::from_str(contents).map_err(|e| e.to_string())
    }

    fn run(&self, invocation: &Invocation, _cwd: &Path, log: &Path) -> BackendResult<()> {
        let [out_dir, cs, fname] = invocation.args.as_slice() else {
            return Err(BackendError::EmptyCommand);
        };
        let key = (cs.clone(), fname.clone());
        self.runs.lock().unwrap().push(key.clone());
        fs::write(log, invocation.args.join("\n"))?;

        if self.fail_on.as_ref() == Some(&key) {
            return Err(BackendError::ExitCode { code: Some(1) });
        }

        let out_dir = Path::new(out_dir);
        let content = self.outputs.get(&key).cloned().unwrap_or_default();
        fs::write(out_dir.join(self.output_file(fname)), content)?;
        let report = serde_json::to_string(&self.ext_symbols).unwrap();
        fs::write(self.report_path(out_dir), report)?;
        Ok(())
    }
}

/// Command source that records how many calls overlap.
#[derive(Default)]
pub struct MockCommands {
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    calls: AtomicUsize,
}

impl MockCommands {
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl CompilerCommandSource for MockCommands {
    fn compiler_command(
        &self,
        _cs: &str,
        fname: &str,
        _odir: &Path,
        _out_dir: &Path,
    ) -> ExtractResult<String> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(3));
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(format!("-Wp,-MD,.x.o.d -nostdinc -isystem /inc -c {}", fname))
    }
}

/// `nm` replacement answering per architecture.
pub struct FakeSymbols {
    listings: HashMap<String, String>,
}

impl FakeSymbols {
    pub fn new(listings: &[(&str, &str)]) -> Self {
        Self {
            listings: listings
                .iter()
                .map(|(arch, listing)| (arch.to_string(), listing.to_string()))
                .collect(),
        }
    }
}

impl SymbolTableSource for FakeSymbols {
    fn read_symbols(&self, object: &Path) -> ExtractResult<String> {
        let path = object.to_string_lossy();
        self.listings
            .iter()
            .find(|(arch, _)| path.contains(&format!("/{}/", arch)))
            .map(|(_, listing)| listing.clone())
            .ok_or_else(|| ExtractError::Config(format!("no listing for {}", path)))
    }
}

/// Patch set recording successful apply/remove calls.
#[derive(Default)]
pub struct RecordingPatches {
    events: Mutex<Vec<String>>,
    fail_apply: Option<String>,
    fail_remove: Option<String>,
}

impl RecordingPatches {
    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    pub fn failing_apply_on(mut self, cs: &str) -> Self {
        self.fail_apply = Some(cs.to_string());
        self
    }

    pub fn failing_remove_on(mut self, cs: &str) -> Self {
        self.fail_remove = Some(cs.to_string());
        self
    }

    fn quilt_error(cs: &str) -> ExtractError {
        ExtractError::ToolFailed {
            tool: "quilt".to_string(),
            cs: cs.to_string(),
            file: String::new(),
            code: Some(1),
            log: PathBuf::from("quilt.log"),
        }
    }
}

impl PatchSet for RecordingPatches {
    fn apply(&self, cs: &str, _sdir: &Path) -> ExtractResult<()> {
        if self.fail_apply.as_deref() == Some(cs) {
            return Err(Self::quilt_error(cs));
        }
        self.events.lock().unwrap().push(format!("apply {}", cs));
        Ok(())
    }

    fn remove(&self, cs: &str, _sdir: &Path) -> ExtractResult<()> {
        if self.fail_remove.as_deref() == Some(cs) {
            return Err(Self::quilt_error(cs));
        }
        self.events.lock().unwrap().push(format!("remove {}", cs));
        Ok(())
    }
}

/// Externalized symbols as returned by a backend report.
pub fn ext_symbols(entries: &[(&str, &[&str])]) -> ExtSymbols {
    entries
        .iter()
        .map(|(obj, syms)| (obj.to_string(), syms.iter().map(|s| s.to_string()).collect()))
        .collect()
}
