use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{exit, Command, ExitStatus};

use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use studio_stack_core::feature_schema::{
    feature_definitions, feature_group_spec, FeatureGroupSpec, FeatureSchema,
};
use studio_stack_core::ownership::{plan_domain, ProbeOutcome};
use studio_stack_core::parameters::{resolve_upstream, UpstreamOutputs};
use studio_stack_core::stack::{deployment_stage, MlPlatformStackInput, RemovalPolicy, StagePlan};
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

const LAMBDA_PACKAGE: &str = "studio_stack_lambda";
const LAMBDA_BINARIES: [&str; 4] = [
    "domain_probe",
    "domain_lifecycle",
    "app_cleanup",
    "user_cleanup",
];

// ── CLI definition ─────────────────────────────────────────────────

#[derive(Parser)]
#[command(
    name = "xtask",
    about = "Task runner for the studio feature stack workspace",
    long_about = "A unified CLI for CI checks, Lambda packaging, and offline\n\
                  rendering of stage plans and feature definitions."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run CI checks (fmt, clippy, tests)
    Ci {
        /// Job to run
        #[arg(value_enum, default_value_t = CiJob::Check)]
        job: CiJob,
    },
    /// Build the custom-resource handlers and zip each one as a Lambda bootstrap
    LambdaPackage {
        /// Compilation target triple for Lambda binaries
        #[arg(long, default_value = "x86_64-unknown-linux-gnu")]
        target: String,
        /// Build profile used for binaries
        #[arg(value_enum, long, default_value_t = BuildProfile::Release)]
        profile: BuildProfile,
        /// Directory receiving one zip per handler
        #[arg(long, default_value = "dist/lambda")]
        out_dir: PathBuf,
    },
    /// Render the deployment stage plan as JSON
    Plan {
        /// Feature schema JSON; the file stem names the feature group
        #[arg(long, required = true)]
        schema: Vec<PathBuf>,
        /// JSON object of published parameter names to values
        #[arg(long)]
        parameters: PathBuf,
        /// Deployment prefix shared by every stack in the stage
        #[arg(long, env = "STACK_PREFIX", default_value = "dev")]
        prefix: String,
        /// Removal policy applied to every resource
        #[arg(value_enum, long, default_value_t = Removal::Destroy)]
        removal: Removal,
        /// Role the feature store assumes to write the offline store
        #[arg(long, env = "FEATURE_STORE_ROLE_ARN")]
        role_arn: String,
        /// Name for a newly created domain (defaults to `<prefix>-ml-platform`)
        #[arg(long)]
        domain_name: Option<String>,
        /// Id of an existing domain to adopt instead of creating one
        #[arg(long, requires = "adopted_domain_name")]
        adopted_domain_id: Option<String>,
        /// Name of the existing domain to adopt
        #[arg(long, requires = "adopted_domain_id")]
        adopted_domain_name: Option<String>,
        /// Id of the domain a previous deployment of this stage created
        #[arg(long)]
        owned_domain_id: Option<String>,
    },
    /// Print the feature definitions a schema file maps to
    FeatureDefinitions {
        /// Feature schema JSON
        schema: PathBuf,
    },
}

#[derive(Clone, ValueEnum)]
enum CiJob {
    /// Formatting, clippy, and tests
    Check,
    /// Build the Lambda binaries for the host target
    Build,
    /// Run check + build
    All,
}

#[derive(Clone, Copy, ValueEnum)]
enum BuildProfile {
    Debug,
    Release,
}

impl BuildProfile {
    fn dir_name(self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Release => "release",
        }
    }

    fn as_cargo_flag(self) -> Option<&'static str> {
        match self {
            Self::Debug => None,
            Self::Release => Some("--release"),
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum Removal {
    Destroy,
    Retain,
}

impl From<Removal> for RemovalPolicy {
    fn from(value: Removal) -> Self {
        match value {
            Removal::Destroy => RemovalPolicy::Destroy,
            Removal::Retain => RemovalPolicy::Retain,
        }
    }
}

#[derive(Serialize)]
struct StageReport {
    deployment_order: Vec<String>,
    deletion_order: BTreeMap<String, Vec<String>>,
    upstream: UpstreamOutputs,
    feature_groups: Vec<FeatureGroupSpec>,
    stage: StagePlan,
}

// ── helpers ────────────────────────────────────────────────────────

fn step(label: &str) {
    eprintln!("\n=== {label} ===");
}

fn cargo(args: &[&str]) -> ExitStatus {
    eprintln!("+ cargo {}", args.join(" "));
    Command::new("cargo")
        .args(args)
        .status()
        .expect("failed to execute cargo")
}

fn run_cargo(args: &[&str]) {
    let status = cargo(args);
    if !status.success() {
        exit(status.code().unwrap_or(1));
    }
}

fn fail(message: impl std::fmt::Display) -> ! {
    eprintln!("error: {message}");
    exit(2);
}

fn read_text(path: &Path) -> String {
    fs::read_to_string(path)
        .unwrap_or_else(|error| fail(format!("failed to read '{}': {error}", path.display())))
}

fn load_schema(path: &Path) -> FeatureSchema {
    FeatureSchema::from_json_str(&read_text(path))
        .unwrap_or_else(|error| fail(format!("{}: {error}", path.display())))
}

fn print_json(value: &impl Serialize) {
    let rendered = serde_json::to_string_pretty(value)
        .unwrap_or_else(|error| fail(format!("failed to render JSON: {error}")));
    println!("{rendered}");
}

fn build_lambda_binaries(target: Option<&str>, profile: BuildProfile) {
    let mut cargo_args = vec!["build", "-p", LAMBDA_PACKAGE];
    if let Some(target) = target {
        cargo_args.extend(["--target", target]);
    }
    for bin in LAMBDA_BINARIES {
        cargo_args.extend(["--bin", bin]);
    }
    if let Some(flag) = profile.as_cargo_flag() {
        cargo_args.push(flag);
    }
    run_cargo(&cargo_args);
}

fn package_lambdas(target: &str, profile: BuildProfile, out_dir: &Path) {
    ensure_rust_target_installed(target);

    step("Build custom-resource handler binaries");
    build_lambda_binaries(Some(target), profile);

    step("Package Lambda zip artifacts");
    let target_dir = Path::new("target").join(target).join(profile.dir_name());
    fs::create_dir_all(out_dir).expect("failed to create lambda dist directory");

    let mut packaged = Vec::with_capacity(LAMBDA_BINARIES.len());
    for bin in LAMBDA_BINARIES {
        let zip_path = out_dir.join(format!("{bin}.zip"));
        package_lambda_zip(&target_dir.join(binary_name(bin, target)), &zip_path);
        packaged.push(zip_path);
    }

    eprintln!("\nPackaged artifacts:");
    for path in packaged {
        eprintln!("- {}", path.display());
    }
}

fn ensure_rust_target_installed(target: &str) {
    let output = Command::new("rustup")
        .args(["target", "list", "--installed"])
        .output();

    let output = match output {
        Ok(value) => value,
        Err(error) => {
            eprintln!(
                "warning: failed to run `rustup target list --installed` ({error}); continuing without target preflight"
            );
            return;
        }
    };

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        fail(format!(
            "failed to list installed rust targets; run `rustup target list --installed` manually. details: {}",
            stderr.trim()
        ));
    }

    let installed = String::from_utf8_lossy(&output.stdout);
    if !installed.lines().any(|line| line.trim() == target) {
        fail(format!(
            "required rust target `{target}` is not installed. install it with `rustup target add {target}` and re-run `cargo run -p xtask -- lambda-package`"
        ));
    }
}

fn binary_name(bin_name: &str, target: &str) -> String {
    if target.contains("windows") {
        format!("{bin_name}.exe")
    } else {
        bin_name.to_string()
    }
}

fn package_lambda_zip(binary_path: &Path, zip_path: &Path) {
    if !binary_path.exists() {
        fail(format!("expected lambda binary at '{}'", binary_path.display()));
    }

    let binary = fs::read(binary_path).expect("failed to read lambda binary");
    let file = fs::File::create(zip_path).expect("failed to create lambda zip");
    let mut zip = ZipWriter::new(file);
    let options = FileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .unix_permissions(0o755);
    zip.start_file("bootstrap", options)
        .expect("failed to start bootstrap entry in lambda zip");
    zip.write_all(&binary)
        .expect("failed to write bootstrap entry");
    zip.finish().expect("failed to finish lambda zip");
}

// ── offline rendering ──────────────────────────────────────────────

struct PlanArgs {
    schemas: Vec<PathBuf>,
    parameters: PathBuf,
    prefix: String,
    removal: RemovalPolicy,
    role_arn: String,
    domain_name: Option<String>,
    adopted: ProbeOutcome,
    owned_domain_id: Option<String>,
}

fn feature_group_name(prefix: &str, schema_path: &Path) -> String {
    let stem = schema_path
        .file_stem()
        .map(|stem| stem.to_string_lossy().replace('_', "-"))
        .unwrap_or_default();
    format!("{prefix}-{stem}")
}

fn render_plan(args: PlanArgs) {
    let parameters: BTreeMap<String, String> =
        serde_json::from_str(&read_text(&args.parameters)).unwrap_or_else(|error| {
            fail(format!(
                "{}: expected a JSON object of parameter names to values: {error}",
                args.parameters.display()
            ))
        });
    let upstream = resolve_upstream(&args.prefix, &parameters).unwrap_or_else(|error| fail(error));

    let mut feature_groups = Vec::with_capacity(args.schemas.len());
    for path in &args.schemas {
        let schema = load_schema(path);
        let name = feature_group_name(&args.prefix, path);
        let spec = feature_group_spec(&name, &schema, upstream.data_bucket_name(), &args.role_arn)
            .unwrap_or_else(|error| fail(format!("{}: {error}", path.display())));
        feature_groups.push(spec);
    }

    let desired_name = args
        .domain_name
        .unwrap_or_else(|| format!("{}-ml-platform", args.prefix));
    let input = MlPlatformStackInput {
        prefix: args.prefix,
        removal: args.removal,
        domain: plan_domain(
            &args.adopted,
            &desired_name,
            args.owned_domain_id.as_deref(),
        ),
        feature_groups: feature_groups
            .iter()
            .map(|group| group.feature_group_name.clone())
            .collect(),
    };
    let stage = deployment_stage(&input).unwrap_or_else(|error| fail(error));
    let deployment_order = stage
        .deployment_order()
        .unwrap_or_else(|error| fail(error))
        .into_iter()
        .map(|stack| stack.name.clone())
        .collect();
    let mut deletion_order = BTreeMap::new();
    for stack in &stage.stacks {
        let ids: Vec<String> = stack
            .deletion_order()
            .unwrap_or_else(|error| fail(error))
            .into_iter()
            .map(|node| node.id.clone())
            .collect();
        deletion_order.insert(stack.name.clone(), ids);
    }

    print_json(&StageReport {
        deployment_order,
        deletion_order,
        upstream,
        feature_groups,
        stage,
    });
}

// ── CI jobs ────────────────────────────────────────────────────────

fn ci_check() {
    step("Check formatting");
    run_cargo(&["fmt", "--all", "--", "--check"]);

    step("Clippy");
    run_cargo(&[
        "clippy",
        "--all-targets",
        "--all-features",
        "--",
        "-D",
        "warnings",
    ]);

    step("Test studio_stack_core");
    run_cargo(&["test", "-p", "studio_stack_core"]);

    step("Test studio_stack_lambda");
    run_cargo(&["test", "-p", LAMBDA_PACKAGE]);
}

fn ci_build() {
    step("Build custom-resource handler binaries");
    build_lambda_binaries(None, BuildProfile::Debug);
}

// ── main ───────────────────────────────────────────────────────────

fn main() {
    let cli = Cli::parse();

    match cli.command {
        Commands::Ci { job } => {
            match job {
                CiJob::Check => ci_check(),
                CiJob::Build => ci_build(),
                CiJob::All => {
                    ci_check();
                    ci_build();
                }
            }
            eprintln!("\nCI job passed.");
        }
        Commands::LambdaPackage {
            target,
            profile,
            out_dir,
        } => {
            package_lambdas(&target, profile, &out_dir);
        }
        Commands::Plan {
            schema,
            parameters,
            prefix,
            removal,
            role_arn,
            domain_name,
            adopted_domain_id,
            adopted_domain_name,
            owned_domain_id,
        } => {
            let adopted = ProbeOutcome {
                domain_name: adopted_domain_name.unwrap_or_default(),
                domain_id: adopted_domain_id.unwrap_or_default(),
            };
            render_plan(PlanArgs {
                schemas: schema,
                parameters,
                prefix,
                removal: removal.into(),
                role_arn,
                domain_name,
                adopted,
                owned_domain_id,
            });
        }
        Commands::FeatureDefinitions { schema } => {
            print_json(&feature_definitions(&load_schema(&schema)));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn feature_group_name_uses_prefix_and_hyphenated_stem() {
        let name = feature_group_name("dev", Path::new("schemas/block_transactions.json"));
        assert_eq!(name, "dev-block-transactions");
    }

    #[test]
    fn binary_name_adds_exe_only_for_windows_targets() {
        assert_eq!(binary_name("app_cleanup", "x86_64-unknown-linux-gnu"), "app_cleanup");
        assert_eq!(binary_name("app_cleanup", "x86_64-pc-windows-msvc"), "app_cleanup.exe");
    }

    #[test]
    fn cli_rejects_half_specified_adopted_domain() {
        let result = Cli::try_parse_from([
            "xtask",
            "plan",
            "--schema",
            "blocks.json",
            "--parameters",
            "params.json",
            "--role-arn",
            "arn:aws:iam::123456789012:role/feature-store",
            "--adopted-domain-id",
            "d-abc",
        ]);
        assert!(result.is_err());
    }
}
