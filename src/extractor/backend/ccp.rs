//! klp-ccp backend implementation.
//!
//! klp-ccp is driven by a set of policy scripts and reports externalized
//! symbols in a `fun_exts` file inside the work directory.

use super::{command_exists, lp_out_file, ExtractorBackend, Invocation, InvocationContext};
use crate::codestream::{ExtSymbols, VMLINUX};
use std::path::{Path, PathBuf};

/// Policy hooks, each backed by `kgr-ccp-pol-<hook>.sh`.
const POLICY_HOOKS: &[&str] = &[
    "may-include-header",
    "can-externalize-fun",
    "shall-externalize-fun",
    "shall-externalize-obj",
    "modify-externalized-sym",
    "rename-rewritten-fun",
];

/// Compiler klp-ccp emulates.
const EMULATED_COMPILER: &str = "x86_64-gcc-9.1.0";

/// Prefix of the functions klp-ccp renames.
const RENAME_PREFIX: &str = "klpp";

/// Backend for klp-ccp.
#[derive(Debug, Clone)]
pub struct CcpBackend {
    bsc: String,
    ccp_path: PathBuf,
    pol_path: PathBuf,
    /// Symbols that must not be externalized, comma separated
    avoid_ext: String,
    /// Module being patched, as used by kallsyms
    patched_module: String,
}

impl CcpBackend {
    pub fn new(
        bsc: impl Into<String>,
        ccp_path: impl Into<PathBuf>,
        pol_path: impl Into<PathBuf>,
        avoid_ext: impl Into<String>,
        patched_module: impl Into<String>,
    ) -> Self {
        Self {
            bsc: bsc.into(),
            ccp_path: ccp_path.into(),
            pol_path: pol_path.into(),
            avoid_ext: avoid_ext.into(),
            patched_module: patched_module.into(),
        }
    }

    fn policy_arg(&self, hook: &str) -> String {
        format!(
            "--pol-cmd-{}={}",
            hook,
            self.pol_path
                .join(format!("kgr-ccp-pol-{}.sh", hook))
                .display()
        )
    }

    /// Symbols of modules other than the patched one go through vmlinux.
    fn report_object(&self, module: &str) -> String {
        if module != VMLINUX && module.replace('-', "_") == self.patched_module.replace('-', "_") {
            module.to_string()
        } else {
            VMLINUX.to_string()
        }
    }
}

impl ExtractorBackend for CcpBackend {
    fn name(&self) -> &'static str {
        "ccp"
    }

    fn tool_name(&self) -> &'static str {
        "klp-ccp"
    }

    fn is_available(&self) -> bool {
        command_exists(&self.ccp_path.to_string_lossy())
    }

    fn command_args(&self, ctx: &InvocationContext<'_>) -> Invocation {
        let lp_out = ctx.out_dir.join(self.output_file(ctx.fname));

        let mut args = vec![self.ccp_path.to_string_lossy().into_owned()];
        args.extend(POLICY_HOOKS.iter().map(|hook| self.policy_arg(hook)));
        args.push(format!(
            "--pol-cmd-modify-patched-fun-sym={}",
            self.pol_path.join("kgr-ccp-pol-modify-patched-sym.sh").display()
        ));
        args.push(format!("--compiler={}", EMULATED_COMPILER));
        args.push("-i".to_string());
        args.push(ctx.symbols.clone());
        args.push("-o".to_string());
        args.push(lp_out.to_string_lossy().into_owned());
        args.push("--".to_string());
        args.extend(ctx.compiler_args().map(str::to_string));

        let path = |p: &Path| p.to_string_lossy().into_owned();
        let env = vec![
            ("KCP_MOD_SYMVERS".to_string(), path(&ctx.symvers)),
            ("KCP_READELF".to_string(), "readelf".to_string()),
            ("KCP_RENAME_PREFIX".to_string(), RENAME_PREFIX.to_string()),
            ("KCP_WORK_DIR".to_string(), path(ctx.out_dir)),
            ("KCP_KBUILD_ODIR".to_string(), path(&ctx.odir)),
            ("KCP_KBUILD_SDIR".to_string(), path(&ctx.sdir)),
            ("KCP_PATCHED_OBJ".to_string(), path(&ctx.patched_obj)),
            ("KCP_IPA_CLONES_DUMP".to_string(), path(&ctx.ipa_clones_dump())),
            ("KCP_EXT_BLACKLIST".to_string(), self.avoid_ext.clone()),
        ];

        Invocation { args, env }
    }

    fn output_file(&self, fname: &str) -> String {
        lp_out_file(&self.bsc, fname)
    }

    fn report_path(&self, out_dir: &Path) -> PathBuf {
        out_dir.join("fun_exts")
    }

    fn parse_report(&self, contents: &str) -> Result<ExtSymbols, String> {
        let mut syms = ExtSymbols::new();

        for (lineno, line) in contents.lines().enumerate() {
            let line = line.trim();
            if !line.starts_with("KALLSYMS") && !line.starts_with("KLP_CONVERT") {
                continue;
            }

            let fields: Vec<&str> = line.split_whitespace().collect();
            let [_, sym, _var, module] = fields[..] else {
                return Err(format!(
                    "line {}: expected '<kind> <sym> <var> <mod>', got '{}'",
                    lineno + 1,
                    line
                ));
            };

            syms.entry(self.report_object(module))
                .or_default()
                .push(sym.to_string());
        }

        Ok(syms)
    }
}
