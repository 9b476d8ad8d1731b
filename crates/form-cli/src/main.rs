use std::fs;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand, ValueEnum};
use form_spec::{
    Activity, AnswerState, DraftSnapshot, EngineConfig, Evaluator, FormSession, OpenOptions,
    PermissionRecord, PermissionSet, ValidationResult, build_render_payload, render_json_ui,
    render_text,
};
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::debug;
use tracing_subscriber::EnvFilter;

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

#[derive(Parser)]
#[command(
    author,
    version,
    about = "Data-collection form CLI",
    long_about = "Renders, evaluates, validates, and recomputes activity forms against a set of answers"
)]
struct Cli {
    /// Engine configuration JSON (base path, evaluation error mode, elevated roles, limits).
    #[arg(long, global = true, value_name = "CONFIG")]
    config: Option<PathBuf>,
    /// Log engine decisions to stderr.
    #[arg(long, short, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum RenderMode {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Render what a viewer sees for an activity and its answers.
    Render {
        #[command(flatten)]
        input: FormInput,
        /// Page permission records for the role.
        #[arg(long, value_name = "PERMISSIONS")]
        permissions: Option<PathBuf>,
        /// Output mode.
        #[arg(long, value_enum, default_value_t = RenderMode::Text)]
        format: RenderMode,
    },
    /// Evaluate a single formula against a context object.
    Eval {
        /// Formula text, e.g. `weight / (height*height)`.
        #[arg(long)]
        formula: String,
        /// JSON file holding the variable bindings.
        #[arg(long, value_name = "CONTEXT")]
        context: Option<PathBuf>,
    },
    /// Validate answers; exits non-zero when they are not acceptable.
    Validate {
        #[command(flatten)]
        input: FormInput,
        /// Page permission records for the role.
        #[arg(long, value_name = "PERMISSIONS")]
        permissions: Option<PathBuf>,
    },
    /// Print the answers with every computed question filled in.
    Recompute {
        #[command(flatten)]
        input: FormInput,
    },
    /// Print the JSON schema of the activity document.
    Schema,
}

#[derive(clap::Args)]
struct FormInput {
    /// Activity JSON holding the form definition.
    #[arg(long, value_name = "ACTIVITY")]
    activity: PathBuf,
    /// Answers JSON: an answer map or a list of `{question_id, answer_value}` records.
    #[arg(long, value_name = "ANSWERS")]
    answers: Option<PathBuf>,
    /// Role of the viewer.
    #[arg(long, default_value = "Viewer")]
    role: String,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum PermissionsFile {
    Records(Vec<PermissionRecord>),
    Wrapped { records: Vec<PermissionRecord> },
}

impl PermissionsFile {
    fn into_records(self) -> Vec<PermissionRecord> {
        match self {
            PermissionsFile::Records(records) | PermissionsFile::Wrapped { records } => records,
        }
    }
}

fn main() -> CliResult<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    let config = load_config(cli.config.as_deref())?;
    match cli.command {
        Command::Render {
            input,
            permissions,
            format,
        } => run_render(&config, input, permissions, format),
        Command::Eval { formula, context } => run_eval(&config, &formula, context),
        Command::Validate { input, permissions } => run_validate(&config, input, permissions),
        Command::Recompute { input } => run_recompute(&config, input),
        Command::Schema => run_schema(),
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "form_spec=debug,form_cli=debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn load_config(path: Option<&Path>) -> CliResult<EngineConfig> {
    match path {
        Some(path) => Ok(EngineConfig::load(path)?),
        None => Ok(EngineConfig::default()),
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> CliResult<T> {
    let contents = fs::read_to_string(path)
        .map_err(|err| format!("failed to read {}: {}", path.display(), err))?;
    serde_json::from_str(&contents)
        .map_err(|err| format!("failed to parse {}: {}", path.display(), err).into())
}

fn load_permissions(path: Option<&Path>) -> CliResult<PermissionSet> {
    match path {
        Some(path) => {
            let file: PermissionsFile = read_json(path)?;
            Ok(PermissionSet::new(file.into_records()))
        }
        None => Ok(PermissionSet::allow_all()),
    }
}

/// Opens a standalone session seeded with the answers file, if any.
fn open_session(
    config: &EngineConfig,
    input: &FormInput,
    permissions: PermissionSet,
) -> CliResult<FormSession> {
    let activity: Activity = read_json(&input.activity)?;
    let answers = match &input.answers {
        Some(path) => AnswerState::hydrate(&read_json::<Value>(path)?),
        None => AnswerState::new(),
    };
    debug!(
        activity_id = %activity.id,
        single = answers.single.len(),
        groups = answers.groups.len(),
        "loaded answers"
    );
    let draft = DraftSnapshot {
        activity_id: activity.id.clone(),
        report_id: None,
        stage: Default::default(),
        answers,
        facility_id: None,
        user_id: None,
        uploaded_files: Vec::new(),
    };
    let options = OpenOptions::for_role(input.role.clone()).standalone();
    Ok(FormSession::restore(
        activity,
        config.clone(),
        permissions,
        options,
        draft,
    )?)
}

fn run_render(
    config: &EngineConfig,
    input: FormInput,
    permissions: Option<PathBuf>,
    format: RenderMode,
) -> CliResult<()> {
    let permissions = load_permissions(permissions.as_deref())?;
    let session = open_session(config, &input, permissions)?;
    let payload = build_render_payload(&session);
    match format {
        RenderMode::Text => println!("{}", render_text(&payload)),
        RenderMode::Json => println!("{}", serde_json::to_string_pretty(&render_json_ui(&payload))?),
    }
    Ok(())
}

fn run_eval(config: &EngineConfig, formula: &str, context: Option<PathBuf>) -> CliResult<()> {
    let ctx: Map<String, Value> = match context {
        Some(path) => read_json(&path)?,
        None => Map::new(),
    };
    let evaluator = Evaluator::new(config.limits);
    match evaluator.try_evaluate(formula, &ctx)? {
        Some(value) => println!("{}", serde_json::to_string(&value)?),
        None => println!("undefined"),
    }
    Ok(())
}

fn run_validate(
    config: &EngineConfig,
    input: FormInput,
    permissions: Option<PathBuf>,
) -> CliResult<()> {
    let permissions = load_permissions(permissions.as_deref())?;
    let session = open_session(config, &input, permissions)?;
    let result = session.validate();
    println!(
        "Validation result: {}",
        if result.valid { "valid" } else { "invalid" }
    );
    describe_validation(&result);

    if result.valid {
        Ok(())
    } else {
        Err("validation failed".into())
    }
}

fn describe_validation(result: &ValidationResult) {
    if !result.errors.is_empty() {
        println!("Errors:");
        for error in &result.errors {
            let code = error.code.as_deref().unwrap_or("invalid");
            println!(
                "  {} [{}] - {}",
                error.path.as_deref().unwrap_or("<form>"),
                code,
                error.message
            );
        }
    }
    if !result.missing_required.is_empty() {
        println!(
            "Missing required answers: {}",
            result.missing_required.join(", ")
        );
    }
    if !result.unknown_fields.is_empty() {
        println!(
            "Unknown answer fields: {}",
            result.unknown_fields.join(", ")
        );
    }
}

fn run_recompute(config: &EngineConfig, input: FormInput) -> CliResult<()> {
    let session = open_session(config, &input, PermissionSet::allow_all())?;
    let tree = Value::Object(session.state().to_answer_tree());
    println!("{}", serde_json::to_string_pretty(&tree)?);
    Ok(())
}

fn run_schema() -> CliResult<()> {
    let schema = schemars::schema_for!(Activity);
    println!("{}", serde_json::to_string_pretty(&schema)?);
    Ok(())
}
